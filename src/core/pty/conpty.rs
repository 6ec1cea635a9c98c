//! ConPTY backend for Windows
//!
//! Wraps a pseudo console and the process attached to it. The reader,
//! writer and process halves share one [`ConPty`] through an `Arc`; the
//! console is closed when the last half is dropped.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{ClosePseudoConsole, CreatePseudoConsole, COORD, HPCON};
use windows::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST,
    PROCESS_INFORMATION, STARTUPINFOEXW,
};

use super::{shell_args, CaptureMode, OutputReader, ProcessHandle, PtyError, ReadOutcome, Result, SpawnOptions, Spawned};

/// Poll step while waiting for output
const PEEK_INTERVAL: Duration = Duration::from_millis(5);

fn win_error(err: windows::core::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// ConPTY handle wrapper
struct ConPty {
    hpc: HPCON,
    input_write: HANDLE,
    output_read: HANDLE,
    process: PROCESS_INFORMATION,
}

// Safety: the handles are plain kernel handles usable from any thread
unsafe impl Send for ConPty {}
unsafe impl Sync for ConPty {}

impl ConPty {
    unsafe fn create(command_line: &str, cols: u16, rows: u16) -> Result<Self> {
        let mut pty_input_read = HANDLE::default();
        let mut pty_input_write = HANDLE::default();
        let mut pty_output_read = HANDLE::default();
        let mut pty_output_write = HANDLE::default();

        // Input pipe (we write, PTY reads)
        CreatePipe(&mut pty_input_read, &mut pty_input_write, None, 0)
            .map_err(|e| PtyError::Allocate(win_error(e)))?;

        // Output pipe (PTY writes, we read)
        CreatePipe(&mut pty_output_read, &mut pty_output_write, None, 0)
            .map_err(|e| PtyError::Allocate(win_error(e)))?;

        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };

        let hpc = CreatePseudoConsole(size, pty_input_read, pty_output_write, 0)
            .map_err(|e| PtyError::Allocate(win_error(e)))?;

        // The pseudo console owns these now
        let _ = CloseHandle(pty_input_read);
        let _ = CloseHandle(pty_output_write);

        let mut attr_list_size: usize = 0;
        let _ = InitializeProcThreadAttributeList(
            LPPROC_THREAD_ATTRIBUTE_LIST::default(),
            1,
            0,
            &mut attr_list_size,
        );

        let mut attr_list_buffer = vec![0u8; attr_list_size];
        let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_list_buffer.as_mut_ptr() as *mut _);

        InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_list_size)
            .map_err(|e| PtyError::Spawn(win_error(e)))?;

        const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;
        UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(hpc.0 as *const _),
            std::mem::size_of::<HPCON>(),
            None,
            None,
        )
        .map_err(|e| PtyError::Spawn(win_error(e)))?;

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut process_info = PROCESS_INFORMATION::default();
        let mut cmd_wide: Vec<u16> = command_line.encode_utf16().chain(std::iter::once(0)).collect();

        let spawned = CreateProcessW(
            PCWSTR::null(),
            PWSTR(cmd_wide.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT,
            None,
            PCWSTR::null(),
            &startup_info.StartupInfo,
            &mut process_info,
        );
        DeleteProcThreadAttributeList(attr_list);

        if let Err(e) = spawned {
            ClosePseudoConsole(hpc);
            let _ = CloseHandle(pty_input_write);
            let _ = CloseHandle(pty_output_read);
            return Err(PtyError::Spawn(win_error(e)));
        }

        Ok(ConPty {
            hpc,
            input_write: pty_input_write,
            output_read: pty_output_read,
            process: process_info,
        })
    }

    /// Bytes waiting in the output pipe
    fn available(&self) -> io::Result<u32> {
        let mut available: u32 = 0;
        unsafe {
            PeekNamedPipe(self.output_read, None, 0, None, Some(&mut available), None)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Pipe closed"))?;
        }
        Ok(available)
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        unsafe {
            ClosePseudoConsole(self.hpc);
            let _ = CloseHandle(self.input_write);
            let _ = CloseHandle(self.output_read);
            let _ = CloseHandle(self.process.hProcess);
            let _ = CloseHandle(self.process.hThread);
        }
    }
}

/// Build the command line run inside the console
fn command_line(command: &str, options: &SpawnOptions) -> String {
    let command = match options.codepage {
        Some(cp) => format!("chcp {} >nul & {}", cp, command),
        None => command.to_string(),
    };
    let shell = options.shell();
    let args = shell_args(shell, &command);
    let mut line = shell.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg);
    }
    line
}

pub(super) fn spawn(command: &str, options: &SpawnOptions) -> Result<Spawned> {
    let line = command_line(command, options);
    let pty = Arc::new(unsafe { ConPty::create(&line, options.cols, options.rows)? });

    tracing::info!(
        "Spawned pid {} on ConPTY {}x{}: {}",
        pty.process.dwProcessId,
        options.cols,
        options.rows,
        command
    );

    Ok(Spawned {
        mode: CaptureMode::Pty,
        reader: Box::new(ConPtyReader { pty: pty.clone() }),
        writer: Box::new(ConPtyWriter { pty: pty.clone() }),
        process: Box::new(ConPtyProcess { pty, exit: None }),
    })
}

struct ConPtyReader {
    pty: Arc<ConPty>,
}

impl OutputReader for ConPtyReader {
    fn read_timeout(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        let available = loop {
            let available = match self.pty.available() {
                Ok(n) => n,
                Err(_) => return Ok(ReadOutcome::Closed),
            };
            if available > 0 {
                break available;
            }
            if Instant::now() >= deadline {
                return Ok(ReadOutcome::Idle);
            }
            thread::sleep(PEEK_INTERVAL);
        };

        let to_read = (available as usize).min(buffer.len());
        let mut read: u32 = 0;
        unsafe {
            ReadFile(self.pty.output_read, Some(&mut buffer[..to_read]), Some(&mut read), None)
                .map_err(win_error)?;
        }

        if read == 0 {
            Ok(ReadOutcome::Closed)
        } else {
            Ok(ReadOutcome::Data(read as usize))
        }
    }
}

struct ConPtyWriter {
    pty: Arc<ConPty>,
}

impl Write for ConPtyWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written: u32 = 0;
        unsafe {
            WriteFile(self.pty.input_write, Some(data), Some(&mut written), None).map_err(win_error)?;
        }
        Ok(written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct ConPtyProcess {
    pty: Arc<ConPty>,
    exit: Option<i32>,
}

impl ProcessHandle for ConPtyProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pty.process.dwProcessId)
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.exit.is_some() {
            return Ok(self.exit);
        }
        let signaled = unsafe { WaitForSingleObject(self.pty.process.hProcess, 0) } == WAIT_OBJECT_0;
        if !signaled {
            return Ok(None);
        }
        let mut code: u32 = 0;
        unsafe {
            GetExitCodeProcess(self.pty.process.hProcess, &mut code).map_err(win_error)?;
        }
        self.exit = Some(code as i32);
        Ok(self.exit)
    }

    // Console processes have no graceful signal here; terminate outright
    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }
        unsafe {
            TerminateProcess(self.pty.process.hProcess, 1).map_err(win_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let mut options = SpawnOptions::new(80, 24);
        options.shell = Some("cmd.exe".to_string());
        assert_eq!(command_line("echo hi", &options), "cmd.exe /C echo hi");

        options.codepage = Some(65001);
        assert_eq!(
            command_line("echo hi", &options),
            "cmd.exe /C chcp 65001 >nul & echo hi"
        );
    }

    #[test]
    fn test_conpty_creation() {
        let options = SpawnOptions::new(80, 24);
        assert!(spawn("echo hello", &options).is_ok());
    }
}
