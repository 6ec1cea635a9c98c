//! Session management
//!
//! Runs one command under a pseudo-terminal (or the pipe fallback) and keeps
//! an emulator up to date from its output on a background reader thread.
//! Callers sample the screen and inject input from their own thread.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::pty::{self, CaptureMode, OutputReader, ProcessHandle, PtyError, ReadOutcome, SpawnOptions};
use super::term::parser::{parse_escape, Parsed, ESC};
use super::term::{Cursor, Emulator, Grid, TerminalModes, Utf8Decoder};
use crate::config::SessionConfig;
use crate::ui::keymapper::encode_key;

/// Visible characters the raw output must exceed to count as painted
const MIN_VISIBLE_CHARS: usize = 5;

/// Polling step for `wait` and `wait_for_content`
const WAIT_STEP: Duration = Duration::from_millis(10);

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;
type SharedProcess = Arc<Mutex<Box<dyn ProcessHandle>>>;

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the reader thread mutates, guarded by one lock
struct ScreenState {
    emulator: Emulator,
    /// Most recent decoded output, escape sequences included
    raw: String,
    raw_limit: usize,
}

impl ScreenState {
    fn feed(&mut self, text: &str) {
        self.emulator.feed_str(text);
        self.raw.push_str(text);
        let excess = self.raw.chars().count().saturating_sub(self.raw_limit);
        if excess > 0 {
            let cut = self
                .raw
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.raw.len());
            self.raw.drain(..cut);
        }
    }
}

/// Handles the reader thread works with
struct ReaderContext {
    screen: Arc<Mutex<ScreenState>>,
    running: Arc<AtomicBool>,
    writer: SharedWriter,
    process: SharedProcess,
    poll_interval: Duration,
    buffer_size: usize,
    answer_queries: bool,
}

/// A command running against a fixed-size virtual terminal
pub struct Session {
    width: u16,
    height: u16,
    config: SessionConfig,
    shell: Option<String>,
    screen: Arc<Mutex<ScreenState>>,
    running: Arc<AtomicBool>,
    writer: Option<SharedWriter>,
    process: Option<SharedProcess>,
    reader_thread: Option<JoinHandle<()>>,
    mode: Option<CaptureMode>,
    started: bool,
    exit_code: Option<i32>,
}

impl Session {
    /// Create a session with default settings
    pub fn new(width: u16, height: u16) -> Self {
        Self::with_config(width, height, SessionConfig::default())
    }

    pub fn with_config(width: u16, height: u16, config: SessionConfig) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let screen = ScreenState {
            emulator: Emulator::new(width as usize, height as usize),
            raw: String::new(),
            raw_limit: config.raw_buffer_limit,
        };
        Self {
            width,
            height,
            config,
            shell: None,
            screen: Arc::new(Mutex::new(screen)),
            running: Arc::new(AtomicBool::new(false)),
            writer: None,
            process: None,
            reader_thread: None,
            mode: None,
            started: false,
            exit_code: None,
        }
    }

    /// Use `shell` instead of the platform default to run commands
    pub fn set_shell(&mut self, shell: Option<String>) {
        self.shell = shell;
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Start `command`, reporting why it failed.
    ///
    /// On success returns the capture mode actually in use, so a degraded
    /// pipe capture is never silent.
    pub fn try_start(&mut self, command: &str) -> Result<CaptureMode, PtyError> {
        if self.started {
            return Err(PtyError::AlreadyStarted);
        }

        let options = SpawnOptions {
            cols: self.width,
            rows: self.height,
            shell: self.shell.clone(),
            term: self.config.term.clone(),
            codepage: self.config.codepage,
            force_pipe: self.config.force_pipe,
        };
        let spawned = pty::spawn(command, &options)?;
        self.started = true;
        tracing::debug!(
            "Spawned {:?} (pid {:?}) in {} mode",
            command,
            spawned.process.id(),
            spawned.mode
        );

        let writer: SharedWriter = Arc::new(Mutex::new(spawned.writer));
        let process: SharedProcess = Arc::new(Mutex::new(spawned.process));
        self.running.store(true, Ordering::SeqCst);

        let context = ReaderContext {
            screen: self.screen.clone(),
            running: self.running.clone(),
            writer: writer.clone(),
            process: process.clone(),
            poll_interval: self.config.poll_interval(),
            buffer_size: self.config.read_buffer_size.max(1),
            answer_queries: self.config.answer_queries,
        };
        let reader = spawned.reader;
        let handle = thread::Builder::new()
            .name("vtrec-reader".to_string())
            .spawn(move || reader_loop(reader, context));

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let mut process = lock(&process);
                let _ = process.kill();
                return Err(PtyError::Spawn(e));
            }
        };

        self.writer = Some(writer);
        self.process = Some(process);
        self.reader_thread = Some(handle);
        self.mode = Some(spawned.mode);
        Ok(spawned.mode)
    }

    /// Start `command`; false if it could not be spawned
    pub fn start(&mut self, command: &str) -> bool {
        match self.try_start(command) {
            Ok(mode) => {
                tracing::debug!("Session started in {} mode", mode);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to start {:?}: {}", command, e);
                false
            }
        }
    }

    /// Capture mode, once started
    pub fn capture_mode(&self) -> Option<CaptureMode> {
        self.mode
    }

    /// Write raw bytes to the command's input; ignored when not running
    pub fn send_bytes(&self, data: &[u8]) {
        if !self.is_running() {
            return;
        }
        let Some(writer) = &self.writer else {
            return;
        };
        let mut writer = lock(writer);
        if let Err(e) = writer.write_all(data).and_then(|_| writer.flush()) {
            tracing::debug!("Input write failed: {}", e);
        }
    }

    /// Write text to the command's input
    pub fn send_input(&self, text: &str) {
        self.send_bytes(text.as_bytes());
    }

    /// Send a named key such as `enter`, `ctrl+c` or `alt+f4`
    pub fn send_key(&self, name: &str) {
        let modes = self.modes();
        match encode_key(name, &modes) {
            Some(bytes) => self.send_bytes(&bytes),
            None => tracing::debug!("Unknown key name {:?}", name),
        }
    }

    /// Copy of the current screen
    pub fn get_screen(&self) -> Grid {
        lock(&self.screen).emulator.get_screen()
    }

    /// Current screen as trimmed text lines
    pub fn get_lines(&self) -> Vec<String> {
        lock(&self.screen).emulator.get_lines()
    }

    /// Screen and cursor taken under one lock
    pub fn snapshot(&self) -> (Grid, Cursor) {
        let screen = lock(&self.screen);
        (screen.emulator.get_screen(), screen.emulator.cursor())
    }

    pub fn cursor(&self) -> Cursor {
        lock(&self.screen).emulator.cursor()
    }

    pub fn modes(&self) -> TerminalModes {
        lock(&self.screen).emulator.modes()
    }

    /// Window title set by the program
    pub fn title(&self) -> String {
        lock(&self.screen).emulator.title().to_string()
    }

    /// Recent raw output, escape sequences included
    pub fn raw_output(&self) -> String {
        lock(&self.screen).raw.clone()
    }

    /// True once the program has drawn something visible
    pub fn has_content(&self) -> bool {
        let screen = lock(&self.screen);
        screen.emulator.screen().has_visible_content()
            || visible_text(&screen.raw).trim().chars().count() > MIN_VISIBLE_CHARS
    }

    /// Poll `has_content` until it holds or `timeout` passes
    pub fn wait_for_content(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_content() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_STEP);
        }
    }

    /// True while the reader is pumping output
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Exit code, if the process has been seen to exit
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn poll_exit(&mut self) -> Option<i32> {
        if self.exit_code.is_some() {
            return self.exit_code;
        }
        let process = self.process.as_ref()?;
        match lock(process).try_wait() {
            Ok(code) => self.exit_code = code,
            Err(e) => tracing::debug!("try_wait failed: {}", e),
        }
        self.exit_code
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Once it has exited the reader is given `drain_timeout` to put the
    /// last output on screen before this returns.
    pub fn wait(&mut self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        let code = loop {
            if let Some(code) = self.poll_exit() {
                break code;
            }
            if self.process.is_none() || Instant::now() >= deadline {
                return None;
            }
            thread::sleep(WAIT_STEP);
        };
        self.join_reader();
        Some(code)
    }

    /// Give the reader thread `drain_timeout` to finish, then let it go
    fn join_reader(&mut self) {
        let Some(handle) = self.reader_thread.take() else {
            return;
        };
        let deadline = Instant::now() + self.config.drain_timeout();
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(WAIT_STEP);
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            tracing::debug!("Reader still busy after drain timeout; detaching");
            self.reader_thread = Some(handle);
        }
    }

    /// Stop the command and release the channel; safe to call repeatedly
    pub fn stop(&mut self) {
        if let Some(process) = self.process.clone() {
            if self.poll_exit().is_none() {
                tracing::debug!("Terminating session process");
                if let Err(e) = lock(&process).terminate() {
                    tracing::debug!("terminate failed: {}", e);
                }

                let deadline = Instant::now() + self.config.stop_grace();
                while self.poll_exit().is_none() && Instant::now() < deadline {
                    thread::sleep(WAIT_STEP);
                }

                if self.exit_code.is_none() {
                    tracing::warn!("Process ignored terminate; killing");
                    if let Err(e) = lock(&process).kill() {
                        tracing::debug!("kill failed: {}", e);
                    }
                    let deadline = Instant::now() + self.config.drain_timeout();
                    while self.poll_exit().is_none() && Instant::now() < deadline {
                        thread::sleep(WAIT_STEP);
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.writer = None;
        self.join_reader();
        // A detached reader exits on its next poll tick
        self.reader_thread = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reader_loop(mut reader: Box<dyn OutputReader>, ctx: ReaderContext) {
    let mut buffer = vec![0u8; ctx.buffer_size];
    let mut decoder = Utf8Decoder::new();
    let mut exited = false;

    while ctx.running.load(Ordering::SeqCst) {
        match reader.read_timeout(&mut buffer, ctx.poll_interval) {
            Ok(ReadOutcome::Data(n)) => {
                let text = decoder.decode(&buffer[..n]);
                let replies = {
                    let mut screen = lock(&ctx.screen);
                    screen.feed(&text);
                    screen.emulator.take_responses()
                };

                // Written after the screen lock is released
                if ctx.answer_queries && !replies.is_empty() {
                    let mut writer = lock(&ctx.writer);
                    for reply in replies {
                        if writer.write_all(&reply.to_bytes()).is_err() {
                            break;
                        }
                    }
                    let _ = writer.flush();
                }
            }
            Ok(ReadOutcome::Idle) => {
                // Exited but something still holds the channel open: one
                // more idle tick means everything has been read
                if exited {
                    break;
                }
                if let Ok(Some(code)) = lock(&ctx.process).try_wait() {
                    tracing::debug!("Process exited with {}", code);
                    exited = true;
                }
            }
            Ok(ReadOutcome::Closed) => break,
            Err(e) => {
                tracing::debug!("Read failed: {}", e);
                break;
            }
        }
    }

    if let Some(replacement) = decoder.finish() {
        lock(&ctx.screen).feed(&replacement.to_string());
    }
    ctx.running.store(false, Ordering::SeqCst);
    tracing::debug!("Reader thread exiting");
}

/// Printable text left after stripping escape sequences and controls
fn visible_text(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == ESC {
            match parse_escape(&chars[i..]) {
                Parsed::Complete { consumed, .. } => i += consumed,
                Parsed::Incomplete => break,
            }
            continue;
        }
        if !ch.is_control() || matches!(ch, '\n' | '\r' | '\t') {
            out.push(ch);
        }
        i += 1;
    }
    out
}

/// Run `command` to completion and return its final screen and exit code.
///
/// A command that cannot be started yields one `[Failed to start: ...]`
/// line and exit code 1; one still running after `timeout` is stopped and
/// reported as -1.
pub fn run_captured(command: &str, width: u16, height: u16, timeout: Duration) -> (Vec<String>, i32) {
    run_captured_with(command, width, height, timeout, SessionConfig::default(), None)
}

/// [`run_captured`] with explicit session settings and shell
pub fn run_captured_with(
    command: &str,
    width: u16,
    height: u16,
    timeout: Duration,
    config: SessionConfig,
    shell: Option<String>,
) -> (Vec<String>, i32) {
    let mut session = Session::with_config(width, height, config);
    session.set_shell(shell);
    if !session.start(command) {
        return (vec![format!("[Failed to start: {}]", command)], 1);
    }

    let code = session.wait(timeout);
    session.stop();
    (session.get_lines(), code.unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_strips_sequences() {
        assert_eq!(visible_text("\x1b[?1049h\x1b[1;1H\x1b[31mhi\x1b[0m"), "hi");
        assert_eq!(visible_text("\x1b]0;title\x07ok\x07\r\n"), "ok\r\n");
        assert_eq!(visible_text("a\x1b[3"), "a");
    }

    #[test]
    fn test_raw_buffer_keeps_recent_text() {
        let mut state = ScreenState {
            emulator: Emulator::new(10, 2),
            raw: String::new(),
            raw_limit: 4,
        };
        state.feed("abc");
        state.feed("déf");
        assert_eq!(state.raw, "cdéf");
    }

    #[test]
    fn test_unstarted_session() {
        let mut session = Session::new(20, 5);
        assert!(!session.is_running());
        assert!(!session.has_content());
        assert_eq!(session.get_lines(), vec![""; 5]);
        assert_eq!(session.capture_mode(), None);
        assert_eq!(session.wait(Duration::from_millis(10)), None);
        session.send_input("ignored");
        session.stop();
        session.stop();
    }

    #[test]
    fn test_missing_command_fails_to_start() {
        let mut session = Session::new(20, 5);
        assert!(!session.start("definitely-not-a-real-program-vtrec"));
        assert!(!session.is_running());

        let (lines, code) = run_captured("definitely-not-a-real-program-vtrec", 20, 5, Duration::from_secs(1));
        assert_eq!(lines, vec!["[Failed to start: definitely-not-a-real-program-vtrec]"]);
        assert_eq!(code, 1);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        #[test]
        fn test_command_output_and_exit() {
            let mut session = Session::new(40, 5);
            assert!(session.start("printf 'hello session'"));
            assert_eq!(session.capture_mode(), Some(CaptureMode::Pty));

            assert_eq!(session.wait(Duration::from_secs(5)), Some(0));
            assert!(session.get_lines().iter().any(|l| l.contains("hello session")));
            assert!(session.has_content());

            session.stop();
            session.stop();
            assert!(!session.is_running());
        }

        #[test]
        fn test_start_twice_is_rejected() {
            let mut session = Session::new(20, 5);
            assert!(session.start("true"));
            assert!(matches!(session.try_start("true"), Err(PtyError::AlreadyStarted)));
        }

        #[test]
        fn test_nonzero_exit_code() {
            let (lines, code) = run_captured("echo done; exit 7", 20, 3, Duration::from_secs(5));
            assert_eq!(code, 7);
            assert_eq!(lines[0], "done");
        }

        #[test]
        fn test_builtin_only_command_starts() {
            let (lines, code) = run_captured("hash -r; unset NOTHING; echo fine", 20, 3, Duration::from_secs(5));
            assert_eq!(code, 0);
            assert_eq!(lines[0], "fine");
        }

        #[test]
        fn test_send_input_reaches_program() {
            let mut session = Session::new(40, 5);
            assert!(session.start("read line; echo \"got:$line\""));
            session.send_input("abc");
            session.send_key("enter");

            assert_eq!(session.wait(Duration::from_secs(5)), Some(0));
            assert!(session.get_lines().iter().any(|l| l.contains("got:abc")));
        }

        #[test]
        fn test_stop_kills_long_running_command() {
            let mut session = Session::new(20, 5);
            assert!(session.start("sleep 30"));
            assert!(session.is_running());
            assert_eq!(session.wait(Duration::from_millis(100)), None);

            let started = Instant::now();
            session.stop();
            assert!(!session.is_running());
            assert!(started.elapsed() < Duration::from_secs(5));
            session.stop();
        }

        #[test]
        fn test_timeout_reports_minus_one() {
            let (_, code) = run_captured("sleep 30", 20, 3, Duration::from_millis(200));
            assert_eq!(code, -1);
        }

        #[test]
        fn test_forced_pipe_mode() {
            let config = SessionConfig {
                force_pipe: true,
                ..SessionConfig::default()
            };
            let mut session = Session::with_config(20, 4, config);
            assert_eq!(session.try_start("echo one; echo two").unwrap(), CaptureMode::Pipe);
            assert_eq!(session.wait(Duration::from_secs(5)), Some(0));
            assert_eq!(&session.get_lines()[..2], &["one", "two"]);
        }

        #[test]
        fn test_wait_for_content() {
            let mut session = Session::new(20, 3);
            assert!(session.start("sleep 0.2; printf ready"));
            assert!(session.wait_for_content(Duration::from_secs(5)));
            assert!(session.raw_output().contains("ready"));
            session.stop();
        }

        #[test]
        fn test_cursor_position_query_is_answered() {
            let mut session = Session::new(20, 3);
            // The tty echoes the reply written to the program's input
            assert!(session.start("printf 'x\\033[6n'; sleep 0.3"));
            assert_eq!(session.wait(Duration::from_secs(5)), Some(0));
            assert!(session.raw_output().contains("1;2R"), "{:?}", session.raw_output());
        }
    }
}
