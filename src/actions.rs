//! Recording actions
//!
//! One variant per directive a recording script can contain. The recorder
//! dispatches on them with an exhaustive match.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Type text one character at a time
    Type(String),
    /// Press Enter
    Enter,
    /// Keep sampling frames for a while
    Sleep(Duration),
    /// Press a named key, e.g. `ctrl+c` or `f5`
    Key(String),
    /// Stop capturing frames
    Hide,
    /// Resume capturing frames
    Show,
    /// Write the current screen text to a file
    Screenshot(PathBuf),
    /// Name the current point of the recording
    Marker(String),
    /// Fail unless a program is available
    Require(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Type(text) => write!(f, "type {:?}", text),
            Action::Enter => f.write_str("enter"),
            Action::Sleep(d) => write!(f, "sleep {}ms", d.as_millis()),
            Action::Key(name) => write!(f, "key {}", name),
            Action::Hide => f.write_str("hide"),
            Action::Show => f.write_str("show"),
            Action::Screenshot(path) => write!(f, "screenshot {}", path.display()),
            Action::Marker(name) => write!(f, "marker {}", name),
            Action::Require(cmd) => write!(f, "require {}", cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Action::Type("ls".into()).to_string(), "type \"ls\"");
        assert_eq!(Action::Sleep(Duration::from_millis(250)).to_string(), "sleep 250ms");
        assert_eq!(Action::Key("ctrl+c".into()).to_string(), "key ctrl+c");
    }
}
