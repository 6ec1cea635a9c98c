//! Terminal emulation
//!
//! - **state**: cells, colors, grid and cursor
//! - **parser**: escape sequence decoder
//! - **emulator**: screen state machine driven by decoded output
//! - **utf8**: streaming UTF-8 decoding with carry-over

pub mod emulator;
pub mod parser;
pub mod state;
pub mod utf8;

pub use emulator::Emulator;
pub use parser::{parse_escape, Parsed, Response, Sequence};
pub use state::{AnsiColor, AttrFlags, Cell, CellAttrs, Color, Cursor, Grid, TerminalModes};
pub use utf8::Utf8Decoder;
