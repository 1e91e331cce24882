// pilotty server binary.
//
// Reads one JSON request per line on stdin and answers on stdout; the
// live mirror (when enabled) owns stderr, so the protocol channel stays
// clean. A trailing command on the invocation line eagerly becomes the
// "legacy" session.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::tty::IsTty;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use pilotty::live::{LiveOptions, LiveRenderer};
use pilotty::server::{ControlServer, ServerConfig};

#[derive(Parser)]
#[command(name = "pilotty")]
#[command(about = "Drive interactive terminal applications over a PTY", long_about = None)]
struct Cli {
    /// Width of newly created terminals
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Height of newly created terminals
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Working directory for spawned commands (defaults to the server's)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Mirror the focused screen to stderr (when stderr is a terminal)
    #[arg(long)]
    live: bool,

    /// Rewrite this file with the focused screen on every update
    #[arg(long)]
    live_file: Option<PathBuf>,

    /// Append TOOL_CALL / TOOL_RESULT lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Command (with arguments) to launch eagerly as the legacy session
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action).context("failed to install SIGINT handler")?;
        sigaction(Signal::SIGTERM, &action).context("failed to install SIGTERM handler")?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("pilotty: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    install_signal_handlers()?;

    let config = ServerConfig {
        default_cols: cli.cols,
        default_rows: cli.rows,
        default_cwd: cli.cwd,
        log_file: cli.log_file,
    };
    let mut server = ControlServer::new(config);

    if let Some((command, args)) = cli.command.split_first() {
        server
            .spawn_legacy(command.clone(), args.to_vec())
            .context("failed to start initial command")?;
    }

    let options = LiveOptions {
        terminal: cli.live && std::io::stderr().is_tty(),
        file: cli.live_file,
    };
    let renderer = options.enabled().then(|| {
        LiveRenderer::spawn(
            options,
            server.bus().subscribe(),
            server.registry(),
            server.legacy_session(),
            server.focus_handle(),
            server.last_call_handle(),
        )
    });

    // Stdin on its own thread so the request loop can poll the shutdown
    // flag between lines.
    let (tx, rx) = channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = server.handle_line(line);
                let payload = serde_json::to_string(&response)
                    .unwrap_or_else(|_| r#"{"status":"error"}"#.to_string());
                let stdout = std::io::stdout();
                let mut out = stdout.lock();
                if writeln!(out, "{}", payload).is_err() || out.flush().is_err() {
                    // Client hung up; shut down like EOF.
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    server.shutdown();
    if let Some(renderer) = renderer {
        renderer.shutdown();
    }
    Ok(())
}
