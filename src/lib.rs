//! vtrec - run commands under a pseudo-terminal and capture their screen
//!
//! The [`core`] module holds the terminal emulator, the process backends and
//! the [`Session`](core::session::Session) that ties them together. The
//! [`recorder`] drives a session through a list of [`actions`] and samples
//! frames on its own cadence.
//!
//! ```no_run
//! use std::time::Duration;
//! use vtrec::core::session::Session;
//!
//! let mut session = Session::new(80, 24);
//! if session.start("ls --color=always") {
//!     session.wait(Duration::from_secs(5));
//!     for line in session.get_lines() {
//!         println!("{}", line);
//!     }
//! }
//! ```

pub mod actions;
pub mod config;
pub mod core;
pub mod recorder;
pub mod ui;
