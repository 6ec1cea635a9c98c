//! Core terminal capture components.
//!
//! - **term**: VT100/ANSI screen emulation and escape sequence decoding
//! - **pty**: pseudo-terminal backends (openpty, ConPTY) and the pipe fallback
//! - **session**: a running command wired to an emulator by a reader thread
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Backend (pty or pipe: reader, writer, process)
//! ├── Reader thread (decode → feed → answer queries)
//! └── Mutex<ScreenState>
//!     ├── Emulator (grid, cursor, alternate screen)
//!     └── Raw output buffer
//! ```

pub mod pty;
pub mod session;
pub mod term;
