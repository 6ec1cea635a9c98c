//! Input encoding and output rendering.
//!
//! - **keymapper**: key names and key events to input byte sequences
//! - **renderer**: captured grids to plain or ANSI-styled text

pub mod keymapper;
pub mod renderer;

pub use keymapper::{encode_key, KeyMapper, Modifiers};
pub use renderer::Renderer;
