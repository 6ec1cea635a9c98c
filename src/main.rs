//! vtrec - capture a command's terminal screen
//!
//! Runs a command under a pseudo-terminal, optionally types keys into it,
//! and prints the final screen.
//!
//! ```text
//! vtrec ls --color=always              # plain text dump
//! vtrec --color -W 120 htop -t 2       # styled dump after two seconds
//! vtrec -k down -k enter -- fzf        # drive a TUI, then dump
//! vtrec --json -- git log --oneline    # final frame as JSON
//! ```

use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vtrec::actions::Action;
use vtrec::config::Config;
use vtrec::core::pty::{default_shell, join_command, CaptureMode};
use vtrec::core::session::Session;
use vtrec::recorder::{RecordError, Recorder};
use vtrec::ui::Renderer;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status when the command outlives `--timeout`
const TIMEOUT_EXIT: i32 = 124;

/// Command-line options
struct Args {
    width: Option<u16>,
    height: Option<u16>,
    timeout: Duration,
    actions: Vec<Action>,
    color: bool,
    json: bool,
    force_pipe: bool,
    config: Option<PathBuf>,
    log: Option<PathBuf>,
    command: Vec<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            timeout: Duration::from_secs(10),
            actions: Vec::new(),
            color: false,
            json: false,
            force_pipe: false,
            config: None,
            log: None,
            command: Vec::new(),
        }
    }
}

fn print_version() {
    eprintln!("vtrec {}", VERSION);
}

fn print_help() {
    eprintln!("vtrec {} - capture a command's terminal screen", VERSION);
    eprintln!();
    eprintln!("Usage: vtrec [OPTIONS] [--] <command...>");
    eprintln!();
    eprintln!("Terminal:");
    eprintln!("  -W, --width <COLS>    Terminal width (default 80)");
    eprintln!("  -H, --height <ROWS>   Terminal height (default 24)");
    eprintln!("  -t, --timeout <SECS>  Stop the command after this long (default 10)");
    eprintln!("  --pipe                Capture through pipes instead of a pseudo-terminal");
    eprintln!();
    eprintln!("Input (run in order once the command has drawn something):");
    eprintln!("  -k, --key <NAME>      Press a key: enter, up, f5, ctrl+c, alt+x, ...");
    eprintln!("  -T, --type <TEXT>     Type text");
    eprintln!("  -s, --sleep <MS>      Wait before the next input");
    eprintln!();
    eprintln!("Output:");
    eprintln!("  --color               Keep colors and attributes (ANSI)");
    eprintln!("  --json                Print the final frame as JSON");
    eprintln!();
    eprintln!("Other:");
    eprintln!("  --config <PATH>       Config file (default ~/.vtrec/config.toml)");
    eprintln!("  --log <PATH>          Append logs to a file (level from RUST_LOG)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut i = 0;

    fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
        *i += 1;
        args.get(*i)
            .map(String::as_str)
            .ok_or_else(|| format!("Missing value for {}", flag))
    }

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-W" | "--width" => {
                let v = value(args, &mut i, arg)?;
                parsed.width = Some(v.parse().map_err(|_| format!("Invalid width: {}", v))?);
            }
            "-H" | "--height" => {
                let v = value(args, &mut i, arg)?;
                parsed.height = Some(v.parse().map_err(|_| format!("Invalid height: {}", v))?);
            }
            "-t" | "--timeout" => {
                let v = value(args, &mut i, arg)?;
                let secs: f64 = v.parse().map_err(|_| format!("Invalid timeout: {}", v))?;
                parsed.timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|_| format!("Invalid timeout: {}", v))?;
            }
            "-k" | "--key" => {
                let v = value(args, &mut i, arg)?;
                parsed.actions.push(Action::Key(v.to_string()));
            }
            "-T" | "--type" => {
                let v = value(args, &mut i, arg)?;
                parsed.actions.push(Action::Type(v.to_string()));
            }
            "-s" | "--sleep" => {
                let v = value(args, &mut i, arg)?;
                let ms: u64 = v.parse().map_err(|_| format!("Invalid sleep: {}", v))?;
                parsed.actions.push(Action::Sleep(Duration::from_millis(ms)));
            }
            "--color" => parsed.color = true,
            "--json" => parsed.json = true,
            "--pipe" => parsed.force_pipe = true,
            "--config" => {
                parsed.config = Some(PathBuf::from(value(args, &mut i, arg)?));
            }
            "--log" => {
                parsed.log = Some(PathBuf::from(value(args, &mut i, arg)?));
            }
            "--" => {
                parsed.command = args[i + 1..].to_vec();
                break;
            }
            flag if flag.starts_with('-') && flag.len() > 1 => {
                return Err(format!("Unknown argument: {}. Use -h for help.", flag));
            }
            _ => {
                parsed.command = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    if parsed.command.is_empty() {
        return Err("No command given".to_string());
    }
    Ok(parsed)
}

/// Install the log subscriber: stderr by default, or an append-mode file
fn init_logging(log: Option<&PathBuf>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging(args.log.as_ref())?;
    tracing::info!("vtrec {} starting", VERSION);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }
    if args.force_pipe {
        config.session.force_pipe = true;
    }

    let code = run(&args, config)?;
    std::process::exit(code);
}

/// Command line handed to the shell
fn command_line(args: &Args, config: &Config) -> String {
    let shell = config.shell.as_deref().unwrap_or(default_shell());
    join_command(&args.command, shell)
}

/// Record the command and print its final screen; returns the exit status
fn run(args: &Args, config: Config) -> anyhow::Result<i32> {
    let command = command_line(args, &config);

    let mut session = Session::with_config(config.width, config.height, config.session.clone());
    session.set_shell(config.shell.clone());
    let mut recorder = Recorder::new(session, config.recording.clone());

    match recorder.start(&command, &args.actions) {
        Ok(CaptureMode::Pty) => {}
        Ok(CaptureMode::Pipe) => {
            eprintln!("vtrec: no pseudo-terminal, output captured through pipes");
        }
        Err(RecordError::Start(e)) => {
            eprintln!("[Failed to start: {}] {}", command, e);
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    }

    recorder.run(&args.actions).context("Failed to apply input")?;
    let recording = recorder.finish(args.timeout);

    let Some(frame) = recording.frames.last() else {
        anyhow::bail!("No frame captured");
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, frame).context("Failed to write JSON")?;
        writeln!(out)?;
    } else {
        Renderer::new(args.color)
            .render(&frame.grid, &mut out)
            .context("Failed to write screen")?;
    }
    out.flush()?;

    match recording.exit_code {
        Some(code) => Ok(code),
        None => {
            eprintln!("vtrec: command still running after {:?}; stopped", args.timeout);
            Ok(TIMEOUT_EXIT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_command_and_options() {
        let parsed = parse_args(&args(&["-W", "100", "--color", "ls", "-la"])).unwrap();
        assert_eq!(parsed.width, Some(100));
        assert!(parsed.color);
        assert_eq!(parsed.command, vec!["ls", "-la"]);
    }

    #[test]
    fn test_parse_actions_in_order() {
        let parsed = parse_args(&args(&["-T", "hi", "-k", "enter", "-s", "200", "--", "cat"])).unwrap();
        assert_eq!(
            parsed.actions,
            vec![
                Action::Type("hi".into()),
                Action::Key("enter".into()),
                Action::Sleep(Duration::from_millis(200)),
            ]
        );
        assert_eq!(parsed.command, vec!["cat"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["-W"])).is_err());
        assert!(parse_args(&args(&["-W", "wide", "ls"])).is_err());
        assert!(parse_args(&args(&["--bogus", "ls"])).is_err());
        assert!(parse_args(&args(&["-t", "-1", "ls"])).is_err());
        assert!(parse_args(&args(&["-t", "NaN", "ls"])).is_err());
        assert!(parse_args(&args(&["-t", "1e30", "ls"])).is_err());
    }

    #[test]
    fn test_parse_timeout() {
        let parsed = parse_args(&args(&["-t", "1.5", "top"])).unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(1500));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_keeps_argument_boundaries() {
        let parsed = parse_args(&args(&["-t", "5", "--", "printf", "[%s]\\n", "a b", "it's"])).unwrap();
        let config = Config {
            width: 20,
            height: 4,
            ..Config::default()
        };
        let command = command_line(&parsed, &config);

        let (lines, code) = vtrec::core::session::run_captured_with(
            &command,
            config.width,
            config.height,
            parsed.timeout,
            config.session.clone(),
            config.shell.clone(),
        );
        assert_eq!(code, 0);
        assert_eq!(lines[0], "[a b]");
        assert_eq!(lines[1], "[it's]");
    }
}
