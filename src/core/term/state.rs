//! Screen data model
//!
//! Passive data only: cells, colors, attributes, the fixed-size grid and the
//! cursor. All mutation logic lives in the emulator.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// The 16 slots of the ANSI palette
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnsiColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

impl AnsiColor {
    const ALL: [AnsiColor; 16] = [
        AnsiColor::Black,
        AnsiColor::Red,
        AnsiColor::Green,
        AnsiColor::Yellow,
        AnsiColor::Blue,
        AnsiColor::Magenta,
        AnsiColor::Cyan,
        AnsiColor::White,
        AnsiColor::BrightBlack,
        AnsiColor::BrightRed,
        AnsiColor::BrightGreen,
        AnsiColor::BrightYellow,
        AnsiColor::BrightBlue,
        AnsiColor::BrightMagenta,
        AnsiColor::BrightCyan,
        AnsiColor::BrightWhite,
    ];

    /// Palette slot for an index in 0..16
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Logical name, e.g. `red` or `bright_blue`
    pub fn name(self) -> &'static str {
        match self {
            AnsiColor::Black => "black",
            AnsiColor::Red => "red",
            AnsiColor::Green => "green",
            AnsiColor::Yellow => "yellow",
            AnsiColor::Blue => "blue",
            AnsiColor::Magenta => "magenta",
            AnsiColor::Cyan => "cyan",
            AnsiColor::White => "white",
            AnsiColor::BrightBlack => "bright_black",
            AnsiColor::BrightRed => "bright_red",
            AnsiColor::BrightGreen => "bright_green",
            AnsiColor::BrightYellow => "bright_yellow",
            AnsiColor::BrightBlue => "bright_blue",
            AnsiColor::BrightMagenta => "bright_magenta",
            AnsiColor::BrightCyan => "bright_cyan",
            AnsiColor::BrightWhite => "bright_white",
        }
    }
}

/// Color reference stored in a cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// The renderer's default foreground/background
    #[default]
    Default,
    /// One of the 16 palette slots
    Named(AnsiColor),
    /// Literal 24-bit color
    Rgb(u8, u8, u8),
}

impl Color {
    /// Resolve an xterm 256-color index.
    ///
    /// 0-15 map to the named palette, 16-231 to the 6x6x6 cube and
    /// 232-255 to the 24-step grayscale ramp.
    pub fn from_256(n: u8) -> Self {
        match n {
            0..=15 => AnsiColor::from_index(n).map(Color::Named).unwrap_or_default(),
            16..=231 => {
                let n = n - 16;
                Color::Rgb((n / 36) * 51, ((n / 6) % 6) * 51, (n % 6) * 51)
            }
            _ => {
                let level = (n - 232) * 10 + 8;
                Color::Rgb(level, level, level)
            }
        }
    }

    /// Convert to crossterm color
    pub fn to_crossterm(&self) -> crossterm::style::Color {
        match self {
            Color::Default => crossterm::style::Color::Reset,
            Color::Named(c) => crossterm::style::Color::AnsiValue(c.index()),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb {
                r: *r,
                g: *g,
                b: *b,
            },
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Default => f.write_str("default"),
            Color::Named(c) => f.write_str(c.name()),
            Color::Rgb(r, g, b) => write!(f, "#{:02x}{:02x}{:02x}", r, g, b),
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AttrFlags: u8 {
        const BOLD        = 0b0000_0001;
        const DIM         = 0b0000_0010;
        const ITALIC      = 0b0000_0100;
        const UNDERLINE   = 0b0000_1000;
        const REVERSE     = 0b0001_0000;
        /// Right half of a double-width character
        const WIDE_SPACER = 0b1000_0000;
    }
}

/// Graphic rendition state (current pen, or frozen into a cell)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A single character cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub ch: char,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn new(ch: char, attrs: CellAttrs) -> Self {
        Self { ch, attrs }
    }

    /// Empty cell that keeps only a background color
    pub fn blank(bg: Color) -> Self {
        Self {
            ch: ' ',
            attrs: CellAttrs {
                bg,
                ..CellAttrs::default()
            },
        }
    }

    pub fn fg(&self) -> Color {
        self.attrs.fg
    }

    pub fn bg(&self) -> Color {
        self.attrs.bg
    }

    pub fn bold(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::BOLD)
    }

    pub fn dim(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::DIM)
    }

    pub fn italic(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::ITALIC)
    }

    pub fn underline(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::UNDERLINE)
    }

    pub fn reverse(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::REVERSE)
    }

    pub fn is_wide_spacer(&self) -> bool {
        self.attrs.flags.contains(AttrFlags::WIDE_SPACER)
    }
}

/// Fixed-size grid of cells, `height` rows of `width` columns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            rows: vec![vec![Cell::default(); width]; height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, y: usize) -> Option<&[Cell]> {
        self.rows.get(y).map(Vec::as_slice)
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.rows.get(y).and_then(|row| row.get(x))
    }

    pub(crate) fn cell_mut(&mut self, x: usize, y: usize) -> Option<&mut Cell> {
        self.rows.get_mut(y).and_then(|row| row.get_mut(x))
    }

    pub(crate) fn row_mut(&mut self, y: usize) -> Option<&mut Vec<Cell>> {
        self.rows.get_mut(y)
    }

    /// Row text with trailing whitespace trimmed
    pub fn line_text(&self, y: usize) -> String {
        let Some(row) = self.rows.get(y) else {
            return String::new();
        };
        let line: String = row
            .iter()
            .filter(|cell| !cell.is_wide_spacer())
            .map(|cell| cell.ch)
            .collect();
        line.trim_end().to_string()
    }

    /// Attribute-free text view, one string per row
    pub fn lines(&self) -> Vec<String> {
        (0..self.height).map(|y| self.line_text(y)).collect()
    }

    /// True if any cell holds a non-whitespace character
    pub fn has_visible_content(&self) -> bool {
        self.rows
            .iter()
            .flatten()
            .any(|cell| !cell.ch.is_whitespace())
    }

    /// Fill cells `from..to` of row `y` with `blank`
    pub(crate) fn clear_span(&mut self, y: usize, from: usize, to: usize, blank: Cell) {
        if let Some(row) = self.rows.get_mut(y) {
            let to = to.min(row.len());
            if from < to {
                row[from..to].fill(blank);
            }
        }
    }

    pub(crate) fn clear_row(&mut self, y: usize, blank: Cell) {
        let width = self.width;
        self.clear_span(y, 0, width, blank);
    }

    /// Scroll rows `top..=bottom` up by `n`, filling the bottom with `blank`
    pub(crate) fn scroll_up(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) {
        if top > bottom || bottom >= self.height {
            return;
        }
        let n = n.min(bottom - top + 1);
        self.rows[top..=bottom].rotate_left(n);
        for y in (bottom + 1 - n)..=bottom {
            self.clear_row(y, blank);
        }
    }

    /// Scroll rows `top..=bottom` down by `n`, filling the top with `blank`
    pub(crate) fn scroll_down(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) {
        if top > bottom || bottom >= self.height {
            return;
        }
        let n = n.min(bottom - top + 1);
        self.rows[top..=bottom].rotate_right(n);
        for y in top..top + n {
            self.clear_row(y, blank);
        }
    }
}

/// Cursor position, 0-indexed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
}

/// DEC/ANSI modes that affect input encoding or output handling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalModes {
    /// DECCKM: arrows send SS3 instead of CSI
    pub application_cursor: bool,
    /// DECAWM
    pub auto_wrap: bool,
    /// DECTCEM
    pub cursor_visible: bool,
    pub bracketed_paste: bool,
    /// LNM: line feed also returns the carriage
    pub linefeed_newline: bool,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            cursor_visible: true,
            bracketed_paste: false,
            linefeed_newline: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_256_color_layout() {
        assert_eq!(Color::from_256(1), Color::Named(AnsiColor::Red));
        assert_eq!(Color::from_256(9), Color::Named(AnsiColor::BrightRed));
        assert_eq!(Color::from_256(16), Color::Rgb(0, 0, 0));
        assert_eq!(Color::from_256(196), Color::Rgb(255, 0, 0));
        assert_eq!(Color::from_256(231), Color::Rgb(255, 255, 255));
        assert_eq!(Color::from_256(232), Color::Rgb(8, 8, 8));
        assert_eq!(Color::from_256(255), Color::Rgb(238, 238, 238));
    }

    #[test]
    fn test_color_display() {
        assert_eq!(Color::Default.to_string(), "default");
        assert_eq!(Color::Named(AnsiColor::BrightCyan).to_string(), "bright_cyan");
        assert_eq!(Color::Rgb(255, 16, 1).to_string(), "#ff1001");
    }

    #[test]
    fn test_scroll_region_rotation() {
        let mut grid = Grid::new(3, 4);
        for y in 0..4 {
            grid.cell_mut(0, y).unwrap().ch = char::from(b'a' + y as u8);
        }

        grid.scroll_up(1, 2, 1, Cell::default());
        assert_eq!(grid.lines(), vec!["a", "c", "", "d"]);

        grid.scroll_down(0, 3, 2, Cell::default());
        assert_eq!(grid.lines(), vec!["", "", "a", "c"]);
    }

    #[test]
    fn test_line_text_skips_wide_spacers() {
        let mut grid = Grid::new(4, 1);
        *grid.cell_mut(0, 0).unwrap() = Cell::new('漢', CellAttrs::default());
        grid.cell_mut(1, 0).unwrap().attrs.flags = AttrFlags::WIDE_SPACER;
        *grid.cell_mut(2, 0).unwrap() = Cell::new('x', CellAttrs::default());
        assert_eq!(grid.line_text(0), "漢x");
    }
}
