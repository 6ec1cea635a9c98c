//! Pipe fallback backend
//!
//! Runs the command with plain pipes when no pseudo-terminal is available.
//! The child sees no terminal, so full-screen programs degrade, but
//! line-oriented output is still captured. stdout and stderr share one
//! stream.

use std::io;
use std::process::{Child, Command, Stdio};

use super::{shell_args, CaptureMode, ProcessHandle, PtyError, Result, SpawnOptions, Spawned};

pub(super) fn spawn(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    let shell = options.shell();
    let mut cmd = Command::new(shell);
    cmd.args(shell_args(shell, command))
        .env("TERM", "dumb")
        .env("COLUMNS", options.cols.to_string())
        .env("LINES", options.rows.to_string())
        .stdin(Stdio::piped());

    let (reader, mut child) = attach_output(&mut cmd)?;

    let writer = child
        .stdin
        .take()
        .ok_or_else(|| PtyError::Spawn(io::Error::new(io::ErrorKind::Other, "stdin not captured")))?;

    tracing::info!("Spawned pid {} with pipes: {}", child.id(), command);

    Ok(Spawned {
        mode: CaptureMode::Pipe,
        reader,
        writer: Box::new(writer),
        process: Box::new(PipeProcess::new(child)),
    })
}

/// One pipe shared by stdout and stderr, read with `poll`
#[cfg(unix)]
fn attach_output(cmd: &mut Command) -> Result<(Box<dyn super::OutputReader>, Child)> {
    use std::fs::File;
    use std::os::unix::process::CommandExt;

    use nix::unistd::pipe;

    let (read_end, write_end) = pipe().map_err(|e| PtyError::Spawn(io::Error::from(e)))?;
    nix::fcntl::fcntl(
        std::os::fd::AsRawFd::as_raw_fd(&read_end),
        nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC),
    )
    .map_err(|e| PtyError::Spawn(io::Error::from(e)))?;

    cmd.stdout(Stdio::from(write_end.try_clone()?))
        .stderr(Stdio::from(write_end))
        // Own process group so the whole pipeline can be signalled
        .process_group(0);

    let child = cmd.spawn().map_err(PtyError::Spawn)?;
    // Closing our write ends lets the reader see EOF when the child is done
    let _ = cmd.stdout(Stdio::null()).stderr(Stdio::null());

    let reader = super::unix::FdReader::new(File::from(read_end));
    Ok((Box::new(reader), child))
}

/// stdout and stderr pumped by two threads into one channel
#[cfg(not(unix))]
fn attach_output(cmd: &mut Command) -> Result<(Box<dyn super::OutputReader>, Child)> {
    use std::sync::mpsc;

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(PtyError::Spawn)?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, tx);
    }

    Ok((Box::new(ChannelReader::new(rx)), child))
}

#[cfg(not(unix))]
fn pump(mut source: impl io::Read + Send + 'static, tx: std::sync::mpsc::Sender<Vec<u8>>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Reader over chunks delivered by pump threads
#[cfg(not(unix))]
struct ChannelReader {
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    leftover: Vec<u8>,
}

#[cfg(not(unix))]
impl ChannelReader {
    fn new(rx: std::sync::mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            leftover: Vec::new(),
        }
    }
}

#[cfg(not(unix))]
impl super::OutputReader for ChannelReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: std::time::Duration) -> io::Result<super::ReadOutcome> {
        use std::sync::mpsc::RecvTimeoutError;

        if self.leftover.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.leftover = chunk,
                Err(RecvTimeoutError::Timeout) => return Ok(super::ReadOutcome::Idle),
                Err(RecvTimeoutError::Disconnected) => return Ok(super::ReadOutcome::Closed),
            }
        }
        let n = self.leftover.len().min(buf.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(super::ReadOutcome::Data(n))
    }
}

/// Child process started without a terminal
struct PipeProcess {
    child: Child,
    exit: Option<i32>,
}

impl PipeProcess {
    fn new(child: Child) -> Self {
        Self { child, exit: None }
    }
}

impl ProcessHandle for PipeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if let Some(code) = self.exit {
            return Ok(Some(code));
        }
        let status = self.child.try_wait()?;
        self.exit = status.map(super::exit_code);
        Ok(self.exit)
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if self.exit.is_some() {
            return Ok(());
        }
        match killpg(Pid::from_raw(self.child.id() as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    // Windows has no graceful signal for a console-less child
    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            let _ = killpg(Pid::from_raw(self.child.id() as i32), Signal::SIGKILL);
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pty::ReadOutcome;
    use std::time::{Duration, Instant};

    #[test]
    fn test_pipe_captures_stdout_and_stderr() {
        let options = SpawnOptions::new(80, 24);
        let mut spawned = spawn("echo out; echo err 1>&2", &options).unwrap();
        assert_eq!(spawned.mode, CaptureMode::Pipe);

        let mut output = Vec::new();
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match spawned.reader.read_timeout(&mut buf, Duration::from_millis(50)) {
                Ok(ReadOutcome::Data(n)) => output.extend_from_slice(&buf[..n]),
                Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Closed) | Err(_) => break,
            }
        }

        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("out"), "output: {:?}", text);
        assert!(text.contains("err"), "output: {:?}", text);
    }
}
