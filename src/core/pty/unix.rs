//! Unix pseudo-terminal backend
//!
//! Allocates a master/slave pair with `openpty`, starts the shell on the
//! slave as session leader with the slave as its controlling terminal, and
//! keeps the master for reading and writing.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::sys::termios::Termios;
use nix::unistd::{setsid, Pid};

use super::{shell_args, CaptureMode, OutputReader, ProcessHandle, PtyError, ReadOutcome, Result, SpawnOptions, Spawned};

pub(super) fn spawn(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    let winsize = Winsize {
        ws_row: options.rows,
        ws_col: options.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(Some(&winsize), None::<&Termios>)
        .map_err(|e| PtyError::Allocate(io::Error::from(e)))?;
    set_cloexec(&pty.master).map_err(PtyError::Allocate)?;

    let shell = options.shell();
    let mut cmd = Command::new(shell);
    cmd.args(shell_args(shell, command))
        .env("TERM", &options.term)
        .env("COLUMNS", options.cols.to_string())
        .env("LINES", options.rows.to_string())
        .stdin(Stdio::from(pty.slave.try_clone()?))
        .stdout(Stdio::from(pty.slave.try_clone()?))
        .stderr(Stdio::from(pty.slave));

    // SAFETY: only async-signal-safe calls between fork and exec
    unsafe {
        cmd.pre_exec(|| {
            setsid().map_err(io::Error::from)?;
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(PtyError::Spawn)?;
    // Drop our copies of the slave so the master sees EOF/EIO when the child exits
    drop(cmd);

    tracing::info!("Spawned pid {} on pty {}x{}: {}", child.id(), options.cols, options.rows, command);

    let writer = File::from(pty.master.try_clone()?);
    let reader = FdReader::new(File::from(pty.master));

    Ok(Spawned {
        mode: CaptureMode::Pty,
        reader: Box::new(reader),
        writer: Box::new(writer),
        process: Box::new(UnixProcess::new(child)),
    })
}

fn set_cloexec(fd: &OwnedFd) -> io::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(io::Error::from)?;
    Ok(())
}

/// Readable descriptor with a `poll`-bounded read
pub(super) struct FdReader {
    file: File,
}

impl FdReader {
    pub(super) fn new(file: File) -> Self {
        Self { file }
    }
}

impl OutputReader for FdReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        // SAFETY: one valid pollfd for the duration of the call
        let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(ReadOutcome::Idle);
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(ReadOutcome::Idle);
        }

        match self.file.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            // Linux reports a hung-up pty master as EIO
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(ReadOutcome::Closed),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(ReadOutcome::Idle)
            }
            Err(e) => Err(e),
        }
    }
}

/// Child process led by its own process group
pub(super) struct UnixProcess {
    child: Child,
    exit: Option<i32>,
}

impl UnixProcess {
    pub(super) fn new(child: Child) -> Self {
        Self { child, exit: None }
    }

    fn signal_group(&mut self, signal: Signal) -> io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        let pid = Pid::from_raw(self.child.id() as i32);
        match killpg(pid, signal) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl ProcessHandle for UnixProcess {
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

    fn terminate(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGHUP)?;
        self.signal_group(Signal::SIGTERM)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signal_group(Signal::SIGKILL)?;
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn read_all(reader: &mut dyn OutputReader) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match reader.read_timeout(&mut buf, Duration::from_millis(50)) {
                Ok(ReadOutcome::Data(n)) => out.extend_from_slice(&buf[..n]),
                Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Closed) | Err(_) => break,
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_pty_echo() {
        let options = SpawnOptions::new(40, 10);
        let mut spawned = spawn("printf 'hello pty'", &options).unwrap();
        assert_eq!(spawned.mode, CaptureMode::Pty);

        let output = read_all(spawned.reader.as_mut());
        assert!(output.contains("hello pty"), "output: {:?}", output);
    }

    #[test]
    fn test_pty_is_a_terminal_with_size() {
        let options = SpawnOptions::new(33, 7);
        let mut spawned = spawn("[ -t 1 ] && echo tty; stty size", &options).unwrap();

        let output = read_all(spawned.reader.as_mut());
        assert!(output.contains("tty"), "output: {:?}", output);
        assert!(output.contains("7 33"), "output: {:?}", output);
    }

    #[test]
    fn test_exit_code_and_kill() {
        let options = SpawnOptions::new(20, 5);
        let mut spawned = spawn("exit 3", &options).unwrap();
        let _ = read_all(spawned.reader.as_mut());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut code = None;
        while code.is_none() && Instant::now() < deadline {
            code = spawned.process.try_wait().unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(code, Some(3));

        // Signalling an exited process is not an error
        assert!(spawned.process.terminate().is_ok());
        assert!(spawned.process.kill().is_ok());
    }
}
