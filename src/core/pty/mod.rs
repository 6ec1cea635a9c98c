//! Process backends
//!
//! A spawned command is exposed as three independently owned halves: an
//! output reader with a bounded wait, an input writer, and a process handle.
//! The pseudo-terminal backend is preferred; when no pseudo-terminal can be
//! allocated the pipe backend runs the command with degraded fidelity and
//! reports [`CaptureMode::Pipe`].

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[cfg(windows)]
mod conpty;
mod pipe;
#[cfg(unix)]
mod unix;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    Allocate(#[source] io::Error),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Pseudo-terminals are not supported on this platform")]
    Unsupported,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How the command's output is being captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Real pseudo-terminal: full-screen programs render faithfully
    Pty,
    /// Plain pipes: line-oriented output only, no terminal for the child
    Pipe,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Pty => f.write_str("pty"),
            CaptureMode::Pipe => f.write_str("pipe"),
        }
    }
}

/// Result of one bounded read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// Nothing arrived before the timeout
    Idle,
    /// The channel is closed for good
    Closed,
}

/// Output side of a spawned command
pub trait OutputReader: Send {
    /// Wait at most `timeout` for output, then read what is available
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome>;
}

/// Handle on the spawned process
pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Exit code if the process has exited; never blocks
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Ask the process to exit
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit
    fn kill(&mut self) -> io::Result<()>;
}

/// A running command split into its owned halves
pub struct Spawned {
    pub mode: CaptureMode,
    pub reader: Box<dyn OutputReader>,
    pub writer: Box<dyn Write + Send>,
    pub process: Box<dyn ProcessHandle>,
}

/// Parameters for spawning a command
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub cols: u16,
    pub rows: u16,
    /// Shell used to interpret the command string
    pub shell: Option<String>,
    /// Value of `TERM` for the child
    pub term: String,
    /// Console codepage (Windows only)
    pub codepage: Option<u32>,
    /// Skip pseudo-terminal allocation
    pub force_pipe: bool,
}

impl SpawnOptions {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
            shell: None,
            term: "xterm-256color".to_string(),
            codepage: None,
            force_pipe: false,
        }
    }

    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or(default_shell())
    }
}

/// Platform default shell
pub fn default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd.exe"
    } else {
        "/bin/sh"
    }
}

/// Command-line dialect of a shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShellKind {
    Posix,
    Cmd,
    PowerShell,
    /// Anything else, e.g. fish or nushell
    Other,
}

impl ShellKind {
    pub(crate) fn of(shell: &str) -> Self {
        let name = Path::new(shell)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match name.as_str() {
            "sh" | "bash" | "dash" | "zsh" | "ksh" | "mksh" | "ash" | "yash" | "busybox" => {
                ShellKind::Posix
            }
            "cmd" => ShellKind::Cmd,
            "powershell" | "pwsh" => ShellKind::PowerShell,
            _ => ShellKind::Other,
        }
    }
}

/// Arguments that make `shell` run `command`
pub(crate) fn shell_args(shell: &str, command: &str) -> Vec<String> {
    match ShellKind::of(shell) {
        ShellKind::Cmd => vec!["/C".to_string(), command.to_string()],
        ShellKind::PowerShell => vec![
            "-NoProfile".to_string(),
            "-Command".to_string(),
            command.to_string(),
        ],
        ShellKind::Posix | ShellKind::Other => vec!["-c".to_string(), command.to_string()],
    }
}

/// Build the command string for `shell` from separate arguments.
///
/// A single argument is taken as a complete command line and passed through
/// untouched, so `vtrec "ls | wc -l"` keeps its pipe. Several arguments are
/// quoted so each reaches the program as one word.
pub fn join_command<S: AsRef<str>>(args: &[S], shell: &str) -> String {
    if let [only] = args {
        return only.as_ref().to_string();
    }
    match ShellKind::of(shell) {
        ShellKind::Cmd | ShellKind::PowerShell => args
            .iter()
            .map(|arg| {
                let arg = arg.as_ref();
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("\"{}\"", arg.replace('"', "\\\""))
                } else {
                    arg.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        ShellKind::Posix | ShellKind::Other => shell_words::join(args),
    }
}

/// Spawn `command` through the configured shell.
///
/// Tries a pseudo-terminal first and falls back to pipes when one cannot be
/// allocated; the returned [`Spawned::mode`] says which one is in use.
pub fn spawn(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    let command = command.trim();
    if command.is_empty() {
        return Err(PtyError::EmptyCommand);
    }
    preflight(command, options.shell())?;

    if !options.force_pipe {
        match spawn_pty(command, options) {
            Ok(spawned) => return Ok(spawned),
            Err(PtyError::Allocate(err)) => {
                tracing::warn!("Pseudo-terminal unavailable ({}), capturing through pipes", err);
            }
            Err(PtyError::Unsupported) => {
                tracing::warn!("No pseudo-terminal support, capturing through pipes");
            }
            Err(err) => return Err(err),
        }
    }

    pipe::spawn(command, options)
}

#[cfg(unix)]
fn spawn_pty(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    unix::spawn(command, options)
}

#[cfg(windows)]
fn spawn_pty(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    conpty::spawn(command, options)
}

#[cfg(not(any(unix, windows)))]
fn spawn_pty(_command: &str, _options: &SpawnOptions) -> Result<Spawned> {
    Err(PtyError::Unsupported)
}

/// Exit code of a finished process; signal deaths map to 128 + signal
pub(crate) fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Words the shell grammar reserves; `command -v` is not consistent on them
const RESERVED_WORDS: &[&str] = &[
    "!", "{", "}", "case", "do", "done", "elif", "else", "esac", "fi", "for", "function", "if",
    "in", "select", "then", "time", "until", "while",
];

#[cfg(windows)]
const CMD_BUILTINS: &[&str] = &[
    "assoc", "call", "cd", "chdir", "cls", "copy", "date", "del", "dir", "echo", "erase",
    "exit", "for", "if", "md", "mkdir", "move", "path", "pause", "popd", "pushd", "rd", "rem",
    "ren", "rename", "rmdir", "set", "setlocal", "start", "time", "title", "type", "ver",
    "vol",
];

/// Check that the program a command starts with exists.
///
/// Explicit paths must point at an executable. Bare names are looked up on
/// PATH first; names not found there are handed to `shell`, which knows its
/// own builtins and functions. Variable assignments, options and anything
/// using shell syntax in the first word are not checked.
pub fn preflight(command: &str, shell: &str) -> Result<()> {
    let Some(program) = command.split_whitespace().next() else {
        return Err(PtyError::EmptyCommand);
    };

    if program.starts_with('-')
        || program
            .chars()
            .any(|c| "$`()'\"\\*?;&|<>=~%".contains(c))
    {
        return Ok(());
    }

    if find_program(program).is_some() {
        return Ok(());
    }
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return Err(PtyError::NotFound(program.to_string()));
    }

    let known = match ShellKind::of(shell) {
        ShellKind::Posix => RESERVED_WORDS.contains(&program) || shell_knows(shell, program),
        #[cfg(windows)]
        ShellKind::Cmd => CMD_BUILTINS.contains(&program.to_lowercase().as_str()),
        // Cmdlets, aliases and functions are not on PATH
        _ => true,
    };
    if known {
        Ok(())
    } else {
        Err(PtyError::NotFound(program.to_string()))
    }
}

/// Ask a POSIX shell whether it can run `name` as a builtin or function.
///
/// A shell that cannot be started gives the benefit of the doubt; the real
/// spawn reports the failure.
fn shell_knows(shell: &str, name: &str) -> bool {
    let status = std::process::Command::new(shell)
        .args(["-c", "command -v \"$1\" >/dev/null 2>&1", "vtrec", name])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match status {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::debug!("Could not ask {} about {:?}: {}", shell, name, e);
            true
        }
    }
}

/// Resolve a program name the way the shell would
pub fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return executable_candidates(path).into_iter().find(|p| is_executable(p));
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .flat_map(|dir| executable_candidates(&dir.join(program)))
        .find(|p| is_executable(p))
}

#[cfg(windows)]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![path.to_path_buf()];
    if path.extension().is_none() {
        let exts = std::env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
        for ext in exts.split(';').filter(|e| !e.is_empty()) {
            let mut name = path.as_os_str().to_os_string();
            name.push(ext);
            candidates.push(PathBuf::from(name));
        }
    }
    candidates
}

#[cfg(not(windows))]
fn executable_candidates(path: &Path) -> Vec<PathBuf> {
    vec![path.to_path_buf()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_args() {
        assert_eq!(shell_args("/bin/sh", "ls -l"), vec!["-c", "ls -l"]);
        assert_eq!(shell_args("cmd.exe", "dir"), vec!["/C", "dir"]);
        assert_eq!(
            shell_args("pwsh", "Get-Date"),
            vec!["-NoProfile", "-Command", "Get-Date"]
        );
    }

    #[test]
    fn test_shell_kind() {
        assert_eq!(ShellKind::of("/bin/bash"), ShellKind::Posix);
        assert_eq!(ShellKind::of("cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::of("pwsh.exe"), ShellKind::PowerShell);
        assert_eq!(ShellKind::of("/usr/bin/fish"), ShellKind::Other);
    }

    #[test]
    fn test_join_command() {
        assert_eq!(join_command(&["ls | wc -l"], "/bin/sh"), "ls | wc -l");
        assert_eq!(
            join_command(&["printf", "%s\\n", "a b"], "/bin/sh"),
            "printf '%s\\n' 'a b'"
        );
        assert_eq!(join_command(&["grep", "it's"], "/bin/bash"), "grep 'it'\\''s'");
        assert_eq!(
            join_command(&["findstr", "a b", "x.txt"], "cmd.exe"),
            "findstr \"a b\" x.txt"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_preflight_skips_syntax() {
        assert!(preflight("echo hi", "/bin/sh").is_ok());
        assert!(preflight("FOO=1 some-tool", "/bin/sh").is_ok());
        assert!(preflight("$EDITOR file", "/bin/sh").is_ok());
        assert!(preflight("(subshell)", "/bin/sh").is_ok());
        assert!(preflight("\\ls -d .", "/bin/sh").is_ok());
        assert!(preflight("if true; then echo y; fi", "/bin/sh").is_ok());
        assert!(matches!(preflight("   ", "/bin/sh"), Err(PtyError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[test]
    fn test_preflight_asks_shell_for_builtins() {
        // Builtins with no executable of the same name on PATH
        assert!(preflight("hash -r; echo fine", "/bin/sh").is_ok());
        assert!(preflight("unset FOO", "/bin/sh").is_ok());
        assert!(preflight("export A=1", "/bin/sh").is_ok());

        if let Some(bash) = find_program("bash") {
            let bash = bash.to_string_lossy();
            assert!(preflight("pushd /tmp >/dev/null && echo fine", &bash).is_ok());
            assert!(preflight("[[ -n x ]] && echo fine", &bash).is_ok());
            assert!(matches!(
                preflight("definitely-not-a-real-program-vtrec", &bash),
                Err(PtyError::NotFound(_))
            ));
        }
    }

    #[test]
    fn test_preflight_other_shells_not_checked() {
        assert!(preflight("Get-ChildItem -Force", "pwsh").is_ok());
        assert!(preflight("set -l x 1", "/usr/bin/fish").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_preflight_missing_program() {
        let err = preflight("definitely-not-a-real-program-vtrec --flag", "/bin/sh").unwrap_err();
        assert!(matches!(err, PtyError::NotFound(ref name) if name == "definitely-not-a-real-program-vtrec"));
        assert!(matches!(
            preflight("/no/such/dir/tool", "/bin/sh"),
            Err(PtyError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_find_program_on_path() {
        assert!(find_program("sh").is_some());
        assert!(find_program("/bin/sh").is_some());
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let options = SpawnOptions::new(80, 24);
        assert!(matches!(spawn("  ", &options), Err(PtyError::EmptyCommand)));
    }
}
