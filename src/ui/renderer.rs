//! Screen dump using crossterm
//!
//! Writes a captured grid to a text stream, either as plain lines or with
//! the cell attributes reproduced as ANSI styling.

use std::io::{self, Write};

use crossterm::{
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
};

use crate::core::term::{AttrFlags, CellAttrs, Color, Grid};

/// Grid renderer for stdout or files
pub struct Renderer {
    /// Reproduce colors and attributes
    color: bool,
}

impl Renderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Render every row, one line per row
    pub fn render<W: Write>(&self, grid: &Grid, out: &mut W) -> io::Result<()> {
        if self.color {
            self.render_styled(grid, out)
        } else {
            for line in grid.lines() {
                writeln!(out, "{}", line)?;
            }
            Ok(())
        }
    }

    /// Render to a string
    pub fn render_to_string(&self, grid: &Grid) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.render(grid, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn render_styled<W: Write>(&self, grid: &Grid, out: &mut W) -> io::Result<()> {
        for y in 0..grid.height() {
            let Some(row) = grid.row(y) else {
                continue;
            };

            // Trailing blanks without a background are not worth styling
            let end = row
                .iter()
                .rposition(|cell| cell.ch != ' ' || cell.attrs.bg != Color::Default || cell.reverse())
                .map_or(0, |i| i + 1);

            let mut current: Option<CellAttrs> = None;
            for cell in &row[..end] {
                if cell.is_wide_spacer() {
                    continue;
                }
                if current != Some(cell.attrs) {
                    apply_attrs(out, &cell.attrs)?;
                    current = Some(cell.attrs);
                }
                queue!(out, Print(cell.ch))?;
            }

            if current.is_some() {
                queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;
            }
            queue!(out, Print("\n"))?;
        }
        out.flush()
    }
}

fn apply_attrs<W: Write>(out: &mut W, attrs: &CellAttrs) -> io::Result<()> {
    // Reset first
    queue!(out, SetAttribute(Attribute::Reset), ResetColor)?;

    if attrs.flags.contains(AttrFlags::BOLD) {
        queue!(out, SetAttribute(Attribute::Bold))?;
    }
    if attrs.flags.contains(AttrFlags::DIM) {
        queue!(out, SetAttribute(Attribute::Dim))?;
    }
    if attrs.flags.contains(AttrFlags::ITALIC) {
        queue!(out, SetAttribute(Attribute::Italic))?;
    }
    if attrs.flags.contains(AttrFlags::UNDERLINE) {
        queue!(out, SetAttribute(Attribute::Underlined))?;
    }
    if attrs.flags.contains(AttrFlags::REVERSE) {
        queue!(out, SetAttribute(Attribute::Reverse))?;
    }

    let fg = attrs.fg.to_crossterm();
    if fg != crossterm::style::Color::Reset {
        queue!(out, SetForegroundColor(fg))?;
    }
    let bg = attrs.bg.to_crossterm();
    if bg != crossterm::style::Color::Reset {
        queue!(out, SetBackgroundColor(bg))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Emulator;

    #[test]
    fn test_plain_render() {
        let mut emu = Emulator::new(10, 3);
        emu.feed_str("\x1b[31mred\x1b[0m\r\nplain");

        let text = Renderer::new(false).render_to_string(emu.screen());
        assert_eq!(text, "red\nplain\n\n");
    }

    #[test]
    fn test_styled_render() {
        let mut emu = Emulator::new(10, 2);
        emu.feed_str("\x1b[1;31mA\x1b[0mB");

        let text = Renderer::new(true).render_to_string(emu.screen());
        assert!(text.contains("\x1b[1m"), "{:?}", text);
        assert!(text.contains('A'));
        assert!(text.contains('B'));
        assert!(!text.contains("\x1b[1mB"));
        // Empty second row is just a newline
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_styled_render_skips_wide_spacer() {
        let mut emu = Emulator::new(6, 1);
        emu.feed_str("中x");

        let text = Renderer::new(true).render_to_string(emu.screen());
        assert_eq!(text.matches('中').count(), 1);
        assert!(text.contains("中"));
        assert!(!text.contains("中 x"));
    }
}
