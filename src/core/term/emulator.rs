//! Terminal screen state machine
//!
//! Owns the grid, cursor, pen attributes and alternate screen, and applies
//! decoded input to them. Nothing here can fail: malformed input is consumed
//! minimally and processing continues.

use std::mem;

use unicode_width::UnicodeWidthChar;

use super::parser::{parse_escape, CsiSequence, Parsed, Response, Sequence, StringKind, ESC};
use super::state::{AnsiColor, AttrFlags, Cell, CellAttrs, Color, Cursor, Grid, TerminalModes};
use super::utf8::Utf8Decoder;

/// Pending replies kept before the oldest are dropped
const MAX_RESPONSES: usize = 64;

const TAB_WIDTH: usize = 8;

/// Main screen set aside while the alternate screen is active
#[derive(Debug, Clone)]
struct MainScreen {
    grid: Grid,
    cursor: Cursor,
}

/// VT100/ANSI screen emulator
#[derive(Debug, Clone)]
pub struct Emulator {
    width: usize,
    height: usize,
    grid: Grid,
    /// `Some` exactly while the alternate screen is active
    main: Option<MainScreen>,
    cursor: Cursor,
    /// Cursor sits in the last column and the next printable char wraps
    wrap_pending: bool,
    saved_cursor: Cursor,
    attrs: CellAttrs,
    scroll_top: usize,
    scroll_bottom: usize,
    modes: TerminalModes,
    title: String,
    decoder: Utf8Decoder,
    /// Unfinished escape sequence carried to the next feed
    pending: Vec<char>,
    responses: Vec<Response>,
}

impl Emulator {
    /// Create an emulator; zero dimensions are raised to one
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            grid: Grid::new(width, height),
            main: None,
            cursor: Cursor::default(),
            wrap_pending: false,
            saved_cursor: Cursor::default(),
            attrs: CellAttrs::default(),
            scroll_top: 0,
            scroll_bottom: height - 1,
            modes: TerminalModes::default(),
            title: String::new(),
            decoder: Utf8Decoder::new(),
            pending: Vec::new(),
            responses: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Feed raw process output
    pub fn feed(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        self.feed_str(&text);
    }

    /// Feed already-decoded text
    pub fn feed_str(&mut self, text: &str) {
        let mut input = mem::take(&mut self.pending);
        input.extend(text.chars());

        let mut i = 0;
        while i < input.len() {
            let ch = input[i];
            if ch == ESC {
                match parse_escape(&input[i..]) {
                    Parsed::Complete { sequence, consumed } => {
                        self.dispatch(sequence);
                        i += consumed;
                    }
                    Parsed::Incomplete => {
                        self.pending = input[i..].to_vec();
                        return;
                    }
                }
                continue;
            }
            self.handle_char(ch);
            i += 1;
        }
    }

    /// Rows as text with trailing whitespace trimmed
    pub fn get_lines(&self) -> Vec<String> {
        self.grid.lines()
    }

    /// Copy of the active grid
    pub fn get_screen(&self) -> Grid {
        self.grid.clone()
    }

    pub fn screen(&self) -> &Grid {
        &self.grid
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Current pen
    pub fn attrs(&self) -> CellAttrs {
        self.attrs
    }

    pub fn modes(&self) -> TerminalModes {
        self.modes
    }

    pub fn is_alternate(&self) -> bool {
        self.main.is_some()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// True while an escape sequence is split across feeds
    pub fn has_pending_sequence(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain replies owed to the process (DSR, DA)
    pub fn take_responses(&mut self) -> Vec<Response> {
        mem::take(&mut self.responses)
    }

    fn handle_char(&mut self, ch: char) {
        match ch {
            '\n' | '\x0b' | '\x0c' => {
                if self.modes.linefeed_newline {
                    self.carriage_return();
                }
                self.index();
            }
            '\r' => self.carriage_return(),
            '\t' => self.horizontal_tab(),
            '\x08' => self.backspace(),
            // BEL and the rest of C0, DEL, C1
            '\0'..='\x1f' | '\x7f' | '\u{80}'..='\u{9f}' => {}
            _ => self.put_char(ch),
        }
    }

    fn blank(&self) -> Cell {
        Cell::blank(self.attrs.bg)
    }

    /// Put a character at the current cursor position
    pub fn put_char(&mut self, ch: char) {
        let char_width = ch.width().unwrap_or(0);
        if char_width == 0 {
            return;
        }
        if char_width > self.width {
            return;
        }

        if self.wrap_pending {
            self.wrap_pending = false;
            if self.modes.auto_wrap {
                self.cursor.x = 0;
                self.index();
            }
        }

        // A wide char never straddles the right margin
        if self.cursor.x + char_width > self.width {
            if self.modes.auto_wrap {
                let blank = self.blank();
                let (x, y) = (self.cursor.x, self.cursor.y);
                self.grid.clear_span(y, x, self.width, blank);
                self.cursor.x = 0;
                self.index();
            } else {
                self.cursor.x = self.width - char_width;
            }
        }

        let (x, y) = (self.cursor.x, self.cursor.y);
        self.clear_wide_overlap(x, y);
        if char_width == 2 {
            self.clear_wide_overlap(x + 1, y);
        }

        let attrs = self.attrs;
        if let Some(cell) = self.grid.cell_mut(x, y) {
            *cell = Cell::new(ch, attrs);
        }
        if char_width == 2 {
            if let Some(cell) = self.grid.cell_mut(x + 1, y) {
                let mut spacer = attrs;
                spacer.flags |= AttrFlags::WIDE_SPACER;
                *cell = Cell::new(' ', spacer);
            }
        }

        let next = x + char_width;
        if next >= self.width {
            self.cursor.x = self.width - 1;
            self.wrap_pending = self.modes.auto_wrap;
        } else {
            self.cursor.x = next;
        }
    }

    /// Blank the other half of a wide char about to be split at (x, y)
    fn clear_wide_overlap(&mut self, x: usize, y: usize) {
        let blank = self.blank();
        let Some(cell) = self.grid.cell(x, y).copied() else {
            return;
        };
        if cell.is_wide_spacer() {
            if x > 0 {
                if let Some(left) = self.grid.cell_mut(x - 1, y) {
                    *left = blank;
                }
            }
        } else if cell.ch.width().unwrap_or(0) == 2 {
            if let Some(right) = self.grid.cell_mut(x + 1, y) {
                if right.is_wide_spacer() {
                    *right = blank;
                }
            }
        }
    }

    fn set_cursor(&mut self, x: usize, y: usize) {
        self.cursor.x = x.min(self.width - 1);
        self.cursor.y = y.min(self.height - 1);
        self.wrap_pending = false;
    }

    pub fn carriage_return(&mut self) {
        self.set_cursor(0, self.cursor.y);
    }

    /// Move down one row, scrolling at the bottom of the scroll region
    pub fn index(&mut self) {
        self.wrap_pending = false;
        if self.cursor.y == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.y + 1 < self.height {
            self.cursor.y += 1;
        }
    }

    /// Move up one row, scrolling at the top of the scroll region
    pub fn reverse_index(&mut self) {
        self.wrap_pending = false;
        if self.cursor.y == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.y > 0 {
            self.cursor.y -= 1;
        }
    }

    pub fn backspace(&mut self) {
        if self.wrap_pending {
            self.wrap_pending = false;
        } else {
            self.cursor.x = self.cursor.x.saturating_sub(1);
        }
    }

    pub fn horizontal_tab(&mut self) {
        let next = (self.cursor.x / TAB_WIDTH + 1) * TAB_WIDTH;
        self.set_cursor(next, self.cursor.y);
    }

    pub fn cursor_up(&mut self, n: usize) {
        self.set_cursor(self.cursor.x, self.cursor.y.saturating_sub(n));
    }

    pub fn cursor_down(&mut self, n: usize) {
        self.set_cursor(self.cursor.x, self.cursor.y.saturating_add(n));
    }

    pub fn cursor_forward(&mut self, n: usize) {
        self.set_cursor(self.cursor.x.saturating_add(n), self.cursor.y);
    }

    pub fn cursor_backward(&mut self, n: usize) {
        self.set_cursor(self.cursor.x.saturating_sub(n), self.cursor.y);
    }

    /// CNL: down `n` rows to column 0
    pub fn next_line(&mut self, n: usize) {
        self.set_cursor(0, self.cursor.y.saturating_add(n));
    }

    /// CPL: up `n` rows to column 0
    pub fn prev_line(&mut self, n: usize) {
        self.set_cursor(0, self.cursor.y.saturating_sub(n));
    }

    /// Absolute column, 1-indexed
    pub fn set_column(&mut self, col: usize) {
        self.set_cursor(col.saturating_sub(1), self.cursor.y);
    }

    /// Absolute row, 1-indexed
    pub fn set_row(&mut self, row: usize) {
        self.set_cursor(self.cursor.x, row.saturating_sub(1));
    }

    /// Absolute position, 1-indexed
    pub fn set_position(&mut self, row: usize, col: usize) {
        self.set_cursor(col.saturating_sub(1), row.saturating_sub(1));
    }

    /// Erase in display: 0 to end, 1 to start, 2/3 all; anything else is 0
    pub fn erase_in_display(&mut self, mode: u16) {
        let blank = self.blank();
        let Cursor { x, y } = self.cursor;
        match mode {
            1 => {
                for row in 0..y {
                    self.grid.clear_row(row, blank);
                }
                self.grid.clear_span(y, 0, x + 1, blank);
            }
            2 | 3 => {
                for row in 0..self.height {
                    self.grid.clear_row(row, blank);
                }
            }
            _ => {
                self.grid.clear_span(y, x, self.width, blank);
                for row in y + 1..self.height {
                    self.grid.clear_row(row, blank);
                }
            }
        }
    }

    /// Erase in line: 0 to end, 1 to start, 2 all; anything else is 0
    pub fn erase_in_line(&mut self, mode: u16) {
        let blank = self.blank();
        let Cursor { x, y } = self.cursor;
        match mode {
            1 => self.grid.clear_span(y, 0, x + 1, blank),
            2 => self.grid.clear_row(y, blank),
            _ => self.grid.clear_span(y, x, self.width, blank),
        }
    }

    /// ECH: blank `n` cells from the cursor without moving it
    pub fn erase_chars(&mut self, n: usize) {
        let blank = self.blank();
        let Cursor { x, y } = self.cursor;
        self.grid.clear_span(y, x, x.saturating_add(n), blank);
    }

    /// ICH: shift the rest of the row right by `n`
    pub fn insert_chars(&mut self, n: usize) {
        let blank = self.blank();
        let Cursor { x, y } = self.cursor;
        if let Some(row) = self.grid.row_mut(y) {
            let tail = &mut row[x..];
            let n = n.min(tail.len());
            tail.rotate_right(n);
            tail[..n].fill(blank);
        }
        self.wrap_pending = false;
    }

    /// DCH: shift the rest of the row left by `n`
    pub fn delete_chars(&mut self, n: usize) {
        let blank = self.blank();
        let Cursor { x, y } = self.cursor;
        if let Some(row) = self.grid.row_mut(y) {
            let tail = &mut row[x..];
            let n = n.min(tail.len());
            tail.rotate_left(n);
            let len = tail.len();
            tail[len - n..].fill(blank);
        }
        self.wrap_pending = false;
    }

    /// Scroll the scroll region up by `n` rows
    pub fn scroll_up(&mut self, n: usize) {
        let blank = self.blank();
        self.grid.scroll_up(self.scroll_top, self.scroll_bottom, n, blank);
    }

    /// Scroll the scroll region down by `n` rows
    pub fn scroll_down(&mut self, n: usize) {
        let blank = self.blank();
        self.grid.scroll_down(self.scroll_top, self.scroll_bottom, n, blank);
    }

    /// IL: insert `n` blank lines at the cursor row
    pub fn insert_lines(&mut self, n: usize) {
        let y = self.cursor.y;
        if y < self.scroll_top || y > self.scroll_bottom {
            return;
        }
        let blank = self.blank();
        self.grid.scroll_down(y, self.scroll_bottom, n, blank);
        self.set_cursor(0, y);
    }

    /// DL: delete `n` lines at the cursor row
    pub fn delete_lines(&mut self, n: usize) {
        let y = self.cursor.y;
        if y < self.scroll_top || y > self.scroll_bottom {
            return;
        }
        let blank = self.blank();
        self.grid.scroll_up(y, self.scroll_bottom, n, blank);
        self.set_cursor(0, y);
    }

    /// DECSTBM, 1-indexed inclusive; invalid regions are ignored
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let top = top.saturating_sub(1);
        let bottom = bottom.saturating_sub(1).min(self.height - 1);
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
            self.set_cursor(0, 0);
        }
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = self.cursor;
    }

    pub fn restore_cursor(&mut self) {
        let saved = self.saved_cursor;
        self.set_cursor(saved.x, saved.y);
    }

    /// Switch to a fresh alternate screen; no-op if already there
    pub fn enter_alternate(&mut self) {
        if self.main.is_some() {
            return;
        }
        let grid = mem::replace(&mut self.grid, Grid::new(self.width, self.height));
        self.main = Some(MainScreen {
            grid,
            cursor: self.cursor,
        });
        self.wrap_pending = false;
    }

    /// Restore the main screen; no-op if not on the alternate screen
    pub fn exit_alternate(&mut self) {
        if let Some(main) = self.main.take() {
            self.grid = main.grid;
            self.cursor = main.cursor;
            self.wrap_pending = false;
        }
    }

    /// RIS
    pub fn reset(&mut self) {
        let responses = mem::take(&mut self.responses);
        let decoder = mem::take(&mut self.decoder);
        *self = Self::new(self.width, self.height);
        self.responses = responses;
        self.decoder = decoder;
    }

    fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.modes.application_cursor = enable,
            7 => {
                self.modes.auto_wrap = enable;
                if !enable {
                    self.wrap_pending = false;
                }
            }
            25 => self.modes.cursor_visible = enable,
            47 | 1047 | 1049 => {
                if enable {
                    self.enter_alternate();
                } else {
                    self.exit_alternate();
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enable,
            _ => tracing::debug!("Ignoring private mode {} = {}", mode, enable),
        }
    }

    fn respond(&mut self, response: Response) {
        if self.responses.len() >= MAX_RESPONSES {
            self.responses.remove(0);
        }
        self.responses.push(response);
    }

    fn dispatch(&mut self, sequence: Sequence) {
        match sequence {
            Sequence::Csi(csi) => self.execute_csi(&csi),
            Sequence::Str { kind, payload } => self.execute_string(kind, &payload),
            Sequence::SaveCursor => self.save_cursor(),
            Sequence::RestoreCursor => self.restore_cursor(),
            Sequence::FullReset => self.reset(),
            Sequence::Index => self.index(),
            Sequence::ReverseIndex => self.reverse_index(),
            Sequence::NextLine => {
                self.carriage_return();
                self.index();
            }
            Sequence::Ignored => {}
            Sequence::Unknown(c) => tracing::debug!("Unknown escape: ESC {:?}", c),
        }
    }

    fn execute_csi(&mut self, csi: &CsiSequence) {
        if !csi.intermediates.is_empty() {
            tracing::debug!(
                "Ignoring CSI with intermediates={:?}, final={:?}",
                csi.intermediates,
                csi.final_byte
            );
            return;
        }

        match (csi.private, csi.marker, csi.final_byte) {
            // Cursor movement
            (false, None, 'A') => self.cursor_up(csi.count(0)),
            (false, None, 'B') | (false, None, 'e') => self.cursor_down(csi.count(0)),
            (false, None, 'C') | (false, None, 'a') => self.cursor_forward(csi.count(0)),
            (false, None, 'D') => self.cursor_backward(csi.count(0)),
            (false, None, 'E') => self.next_line(csi.count(0)),
            (false, None, 'F') => self.prev_line(csi.count(0)),
            (false, None, 'G') | (false, None, '`') => self.set_column(csi.count(0)),
            (false, None, 'd') => self.set_row(csi.count(0)),
            (false, None, 'H') | (false, None, 'f') => {
                self.set_position(csi.count(0), csi.count(1))
            }

            // Erase
            (false, None, 'J') => self.erase_in_display(csi.param(0, 0)),
            (false, None, 'K') => self.erase_in_line(csi.param(0, 0)),
            (false, None, 'X') => self.erase_chars(csi.count(0)),

            // Line and character editing
            (false, None, 'L') => self.insert_lines(csi.count(0)),
            (false, None, 'M') => self.delete_lines(csi.count(0)),
            (false, None, '@') => self.insert_chars(csi.count(0)),
            (false, None, 'P') => self.delete_chars(csi.count(0)),

            // Scroll
            (false, None, 'S') => self.scroll_up(csi.count(0)),
            (false, None, 'T') => self.scroll_down(csi.count(0)),
            (false, None, 'r') => {
                let top = csi.count(0);
                let bottom = match csi.param(1, 0) {
                    0 => self.height,
                    b => b as usize,
                };
                self.set_scroll_region(top, bottom);
            }

            (false, None, 'm') => self.execute_sgr(&csi.params),

            (false, None, 's') => self.save_cursor(),
            (false, None, 'u') => self.restore_cursor(),

            // Device status report
            (false, None, 'n') => match csi.param(0, 0) {
                5 => self.respond(Response::StatusOk),
                6 => {
                    let Cursor { x, y } = self.cursor;
                    self.respond(Response::CursorPosition(y + 1, x + 1));
                }
                _ => {}
            },

            // Device attributes
            (false, None, 'c') => {
                if csi.param(0, 0) == 0 {
                    self.respond(Response::DeviceAttributes);
                }
            }
            (false, Some('>'), 'c') => self.respond(Response::SecondaryDeviceAttributes),

            // DEC private modes
            (true, _, 'h') => {
                for &p in &csi.params {
                    self.set_private_mode(p, true);
                }
            }
            (true, _, 'l') => {
                for &p in &csi.params {
                    self.set_private_mode(p, false);
                }
            }

            // ANSI modes
            (false, None, 'h') | (false, None, 'l') => {
                let enable = csi.final_byte == 'h';
                for &p in &csi.params {
                    if p == 20 {
                        self.modes.linefeed_newline = enable;
                    }
                }
            }

            _ => {
                tracing::debug!(
                    "Unknown CSI: private={}, marker={:?}, params={:?}, final={:?}",
                    csi.private,
                    csi.marker,
                    csi.params,
                    csi.final_byte
                );
            }
        }
    }

    /// Apply an SGR parameter list to the pen
    pub fn execute_sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.attrs.reset();
            return;
        }

        let mut iter = params.iter().copied();

        while let Some(param) = iter.next() {
            match param {
                0 => self.attrs.reset(),
                1 => self.attrs.flags |= AttrFlags::BOLD,
                2 => self.attrs.flags |= AttrFlags::DIM,
                3 => self.attrs.flags |= AttrFlags::ITALIC,
                4 => self.attrs.flags |= AttrFlags::UNDERLINE,
                7 => self.attrs.flags |= AttrFlags::REVERSE,

                22 => self.attrs.flags &= !(AttrFlags::BOLD | AttrFlags::DIM),
                23 => self.attrs.flags &= !AttrFlags::ITALIC,
                24 => self.attrs.flags &= !AttrFlags::UNDERLINE,
                27 => self.attrs.flags &= !AttrFlags::REVERSE,

                30..=37 => self.attrs.fg = named(param - 30),
                90..=97 => self.attrs.fg = named(param - 90 + 8),
                39 => self.attrs.fg = Color::Default,

                40..=47 => self.attrs.bg = named(param - 40),
                100..=107 => self.attrs.bg = named(param - 100 + 8),
                49 => self.attrs.bg = Color::Default,

                38 | 48 => {
                    // Truncated extended color: the rest of the list is unreliable
                    let Some(color) = extended_color(&mut iter) else {
                        break;
                    };
                    if param == 38 {
                        self.attrs.fg = color;
                    } else {
                        self.attrs.bg = color;
                    }
                }

                _ => {}
            }
        }
    }

    fn execute_string(&mut self, kind: StringKind, payload: &str) {
        if kind != StringKind::Osc {
            return;
        }
        if let Some((code, text)) = payload.split_once(';') {
            match code {
                "0" | "2" => self.title = text.to_string(),
                _ => {}
            }
        }
    }
}

fn named(index: u16) -> Color {
    AnsiColor::from_index(index as u8)
        .map(Color::Named)
        .unwrap_or_default()
}

/// Rest of `38;5;n` or `38;2;r;g;b` after the 38/48
fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => {
            let n = iter.next()?;
            Some(Color::from_256(n.min(255) as u8))
        }
        2 => {
            let r = iter.next()?;
            let g = iter.next()?;
            let b = iter.next()?;
            Some(Color::Rgb(
                r.min(255) as u8,
                g.min(255) as u8,
                b.min(255) as u8,
            ))
        }
        _ => None,
    }
}
