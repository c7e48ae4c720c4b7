//! sandterm - resilient code sandbox terminal
//!
//! Runs programs through the embedded script runtime and renders their
//! output as a styled terminal log. Programs can prompt for input, draw
//! progress bars with carriage returns, and attempt process operations that
//! are intercepted instead of crashing the session.
//!
//! # Quick Start
//!
//! ```text
//! sandterm                 # interactive terminal
//! sandterm -r demo.sts     # run a script, then stay interactive
//! ```
//!
//! # Terminal commands
//!
//! | Input | Action |
//! |-------|--------|
//! | `<statement>` | Evaluate one statement |
//! | `pip install <pkg>` | Install a package |
//! | `:run <file>` | Run a script file |
//! | `:clear` | Clear the output |
//! | `:quit` | Exit |

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sandterm::ui::ConsoleRenderer;
use sandterm::{Config, ScriptRuntime, Session, SessionError, SessionState};

/// Command line options
#[derive(Default)]
struct Args {
    /// Config file overriding ~/.sandterm/config.toml
    config_path: Option<PathBuf>,
    /// Script to run after boot
    run_file: Option<PathBuf>,
    /// Suppress start/finish markers
    no_markers: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("sandterm {}", VERSION);
}

fn print_help() {
    eprintln!("sandterm {} - resilient code sandbox terminal", VERSION);
    eprintln!();
    eprintln!("Usage: sandterm [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>   Use this config file");
    eprintln!("  -r, --run <FILE>      Run a script file after boot");
    eprintln!("      --no-markers      Do not print session start/finish markers");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Terminal commands:");
    eprintln!("  pip install <pkg>     Install a package");
    eprintln!("  :run <file>           Run a script file");
    eprintln!("  :clear                Clear the output");
    eprintln!("  :quit                 Exit");
    eprintln!();
    eprintln!("Configuration: ~/.sandterm/config.toml");
    eprintln!("Log file:      ~/.sandterm/sandterm.log (filter via SANDTERM_LOG)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).ok_or("Missing config file argument")?;
                parsed.config_path = Some(PathBuf::from(path));
            }
            "-r" | "--run" => {
                i += 1;
                let path = args.get(i).ok_or("Missing script file argument")?;
                parsed.run_file = Some(PathBuf::from(path));
            }
            "--no-markers" => {
                parsed.no_markers = true;
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// Log to ~/.sandterm/sandterm.log; SANDTERM_LOG overrides the config level
fn init_logging(config: &Config) {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("sandterm.log"))
        .unwrap_or_else(|| PathBuf::from("sandterm.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("SANDTERM_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load(),
    };
    if args.no_markers {
        config.terminal.session_markers = false;
    }

    init_logging(&config);
    info!("sandterm {} starting...", VERSION);

    run_terminal(config, args.run_file).await
}

async fn run_terminal(config: Config, run_file: Option<PathBuf>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runtime = Arc::new(ScriptRuntime::new(&config.runtime));
    let session = Session::with_events(runtime, &config, tx);

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let render_session = session.clone();
    let renderer = tokio::spawn(async move {
        let mut renderer = ConsoleRenderer::stdout();
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = &mut shutdown_rx => {
                    // Events are queued synchronously, so draining catches everything
                    while let Ok(event) = rx.try_recv() {
                        if renderer.handle(&event, &render_session).is_err() {
                            break;
                        }
                    }
                    None
                }
            };
            let Some(event) = event else { break };
            if let Err(e) = renderer.handle(&event, &render_session) {
                error!("Render error: {}", e);
                break;
            }
        }
    });

    let result = drive(&session, run_file).await;
    let _ = shutdown_tx.send(());
    let _ = renderer.await;
    info!("sandterm exiting");
    result
}

async fn drive(session: &Session, run_file: Option<PathBuf>) -> anyhow::Result<()> {
    if let Err(e) = session.boot().await {
        warn!("Session unusable: {}", e);
        return Err(e.into());
    }

    let mut active: Option<JoinHandle<()>> = None;
    if let Some(path) = run_file {
        active = Some(spawn_run(session, path).await?);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            ":quit" | ":exit" => break,
            ":clear" => {
                session.clear();
                continue;
            }
            cmd if cmd.starts_with(":run ") && session.state() != SessionState::AwaitingInput => {
                let path = PathBuf::from(cmd[":run ".len()..].trim());
                match spawn_run(session, path).await {
                    Ok(handle) => active = Some(handle),
                    Err(e) => eprintln!("{:#}", e),
                }
                continue;
            }
            _ => {}
        }

        if session.state() == SessionState::AwaitingInput {
            if let Err(e) = session.supply_input(line) {
                warn!("Input not accepted: {}", e);
            }
            continue;
        }

        let submit_session = session.clone();
        active = Some(tokio::spawn(async move {
            match submit_session.submit_line(&line).await {
                Ok(_) => {}
                Err(SessionError::Busy(state)) => eprintln!("(busy: {:?})", state),
                Err(e) => eprintln!("{}", e),
            }
        }));
    }

    // Let a finished-but-unflushed run settle; a run still waiting for input
    // cannot complete once stdin is closed.
    if let Some(handle) = active {
        if session.state() != SessionState::AwaitingInput {
            let _ = handle.await;
        }
    }
    Ok(())
}

async fn spawn_run(session: &Session, path: PathBuf) -> anyhow::Result<JoinHandle<()>> {
    let source = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let run_session = session.clone();
    Ok(tokio::spawn(async move {
        if let Err(e) = run_session.run_source(&source).await {
            eprintln!("{}", e);
        }
    }))
}
