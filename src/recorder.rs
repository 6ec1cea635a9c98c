//! Frame recorder
//!
//! Drives a [`Session`] through a list of actions and samples its screen on
//! the caller's cadence. The reader thread only keeps the latest state; every
//! frame here is a copy taken at a moment the recorder chose.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::actions::Action;
use crate::config::RecordingConfig;
use crate::core::pty::{find_program, CaptureMode, PtyError};
use crate::core::session::Session;
use crate::core::term::{Cursor, Grid};

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Required program not found: {0}")]
    MissingCommand(String),

    #[error("Failed to start command: {0}")]
    Start(#[from] PtyError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One sampled screen and how long it stays up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub grid: Grid,
    pub cursor: Cursor,
    pub duration_ms: u64,
}

/// Named point in the recording, as an index into the frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Marker {
    pub name: String,
    pub frame: usize,
}

/// Everything captured from one run
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub frames: Vec<Frame>,
    pub markers: Vec<Marker>,
    pub exit_code: Option<i32>,
    pub mode: Option<CaptureMode>,
    pub title: String,
}

pub struct Recorder {
    session: Session,
    config: RecordingConfig,
    frames: Vec<Frame>,
    markers: Vec<Marker>,
    capturing: bool,
}

impl Recorder {
    pub fn new(session: Session, config: RecordingConfig) -> Self {
        Self {
            session,
            config,
            frames: Vec::new(),
            markers: Vec::new(),
            capturing: true,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Check `Require` actions, start `command` and wait for its first paint
    pub fn start(&mut self, command: &str, actions: &[Action]) -> Result<CaptureMode, RecordError> {
        for action in actions {
            if let Action::Require(program) = action {
                require(program)?;
            }
        }

        let mode = self.session.try_start(command)?;
        tracing::info!("Recording {:?} in {} mode", command, mode);

        let timeout = Duration::from_millis(self.config.first_paint_timeout_ms);
        if !self.session.wait_for_content(timeout) {
            tracing::debug!("No output within {}ms", timeout.as_millis());
        }
        self.capture_frame(self.config.frame_interval_ms);
        Ok(mode)
    }

    /// Apply every action in order
    pub fn run(&mut self, actions: &[Action]) -> Result<(), RecordError> {
        for action in actions {
            self.apply(action)?;
        }
        Ok(())
    }

    pub fn apply(&mut self, action: &Action) -> Result<(), RecordError> {
        tracing::debug!("Action: {}", action);
        match action {
            Action::Type(text) => {
                let delay = self.config.typing_delay_ms;
                for ch in text.chars() {
                    let mut buf = [0u8; 4];
                    self.session.send_input(ch.encode_utf8(&mut buf));
                    thread::sleep(Duration::from_millis(delay));
                    self.capture_frame(delay);
                }
            }
            Action::Enter => self.press("enter"),
            Action::Key(name) => self.press(name),
            Action::Sleep(duration) => self.sample_for(*duration),
            Action::Hide => self.capturing = false,
            Action::Show => self.capturing = true,
            Action::Screenshot(path) => self.screenshot(path)?,
            Action::Marker(name) => self.markers.push(Marker {
                name: name.clone(),
                frame: self.frames.len(),
            }),
            Action::Require(program) => require(program)?,
        }
        Ok(())
    }

    fn press(&mut self, key: &str) {
        self.session.send_key(key);
        thread::sleep(Duration::from_millis(self.config.key_settle_ms));
        self.capture_frame(self.config.key_settle_ms);
    }

    /// Sample frames at the frame interval for `duration`
    fn sample_for(&mut self, duration: Duration) {
        let interval = self.config.frame_interval_ms.max(1);
        let count = (duration.as_millis() as u64 / interval).max(1);
        for _ in 0..count {
            thread::sleep(Duration::from_millis(interval));
            self.capture_frame(interval);
        }
    }

    /// Record the current screen unless capture is hidden
    pub fn capture_frame(&mut self, duration_ms: u64) {
        if !self.capturing {
            return;
        }
        let (grid, cursor) = self.session.snapshot();
        self.frames.push(Frame {
            grid,
            cursor,
            duration_ms,
        });
    }

    fn screenshot(&self, path: &Path) -> Result<(), RecordError> {
        let to_err = |source| RecordError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(to_err)?;
            }
        }
        let mut text = self.session.get_lines().join("\n");
        text.push('\n');
        fs::write(path, text).map_err(to_err)?;
        tracing::info!("Screenshot saved to {}", path.display());
        Ok(())
    }

    /// Wait up to `timeout` for the command to exit, take the last frame and
    /// stop the session
    pub fn finish(mut self, timeout: Duration) -> Recording {
        let exit_code = self.session.wait(timeout);
        if exit_code.is_none() {
            tracing::debug!("Command still running after {}ms; stopping", timeout.as_millis());
        }
        self.capture_frame(self.config.frame_interval_ms);
        self.session.stop();

        Recording {
            frames: std::mem::take(&mut self.frames),
            markers: std::mem::take(&mut self.markers),
            exit_code,
            mode: self.session.capture_mode(),
            title: self.session.title(),
        }
    }
}

fn require(command: &str) -> Result<(), RecordError> {
    let program = command.split_whitespace().next().unwrap_or(command);
    match find_program(program) {
        Some(path) => {
            tracing::debug!("Found {} at {}", program, path.display());
            Ok(())
        }
        None => Err(RecordError::MissingCommand(program.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RecordingConfig {
        RecordingConfig {
            frame_interval_ms: 10,
            typing_delay_ms: 5,
            key_settle_ms: 20,
            first_paint_timeout_ms: 2000,
        }
    }

    #[test]
    fn test_missing_requirement() {
        let mut recorder = Recorder::new(Session::new(20, 5), fast_config());
        let actions = vec![Action::Require("definitely-not-a-real-program-vtrec".into())];

        let err = recorder.start("true", &actions).unwrap_err();
        assert!(matches!(err, RecordError::MissingCommand(ref p) if p == "definitely-not-a-real-program-vtrec"));
        assert!(!recorder.session().is_running());
    }

    #[test]
    fn test_start_failure() {
        let mut recorder = Recorder::new(Session::new(20, 5), fast_config());
        let err = recorder.start("definitely-not-a-real-program-vtrec", &[]).unwrap_err();
        assert!(matches!(err, RecordError::Start(PtyError::NotFound(_))));
    }

    #[test]
    fn test_hide_show_and_markers() {
        let mut recorder = Recorder::new(Session::new(20, 5), fast_config());
        recorder.capture_frame(10);
        recorder.apply(&Action::Hide).unwrap();
        recorder.apply(&Action::Sleep(Duration::from_millis(30))).unwrap();
        assert_eq!(recorder.frames().len(), 1);

        recorder.apply(&Action::Show).unwrap();
        recorder.apply(&Action::Marker("after".into())).unwrap();
        recorder.apply(&Action::Sleep(Duration::from_millis(30))).unwrap();

        assert_eq!(recorder.frames().len(), 4);
        assert_eq!(recorder.markers(), &[Marker { name: "after".into(), frame: 1 }]);
        assert!(recorder.frames().iter().all(|f| f.duration_ms == 10));
    }

    #[test]
    fn test_frame_serializes() {
        let mut recorder = Recorder::new(Session::new(4, 2), fast_config());
        recorder.capture_frame(40);

        let json = serde_json::to_value(&recorder.frames()[0]).unwrap();
        assert_eq!(json["duration_ms"], 40);
        assert_eq!(json["cursor"]["x"], 0);
        assert_eq!(json["grid"]["width"], 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_record_interactive_command() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("shots").join("screen.txt");

        let mut recorder = Recorder::new(Session::new(30, 5), fast_config());
        let actions = vec![
            Action::Require("sh".into()),
            Action::Type("abc".into()),
            Action::Enter,
            Action::Sleep(Duration::from_millis(100)),
            Action::Marker("answered".into()),
            Action::Screenshot(shot.clone()),
        ];

        let mode = recorder
            .start("printf 'name? '; read name; echo \"hi $name\"", &actions)
            .unwrap();
        assert_eq!(mode, CaptureMode::Pty);
        recorder.run(&actions).unwrap();

        let text = fs::read_to_string(&shot).unwrap();
        assert!(text.contains("hi abc"), "{:?}", text);

        let recording = recorder.finish(Duration::from_secs(5));
        assert_eq!(recording.exit_code, Some(0));
        assert_eq!(recording.mode, Some(CaptureMode::Pty));
        assert!(recording.frames.len() > 5);
        assert_eq!(recording.markers[0].name, "answered");

        let last = recording.frames.last().unwrap();
        assert!(last.grid.lines().iter().any(|l| l.contains("hi abc")));
    }
}
