// Live mirror of the focused session's screen.
//
// Subscribes to the event bus and to the output device's resize signal,
// and redraws whichever sink is configured (stderr when it is a
// terminal, and/or a regularly rewritten file) whenever the focused
// session produces output or exits, or the device changes width.
// Redraws are coalesced by a short debounce so bursty output does not
// thrash the output device, and sink errors are swallowed: mirroring
// must never apply back-pressure to child output.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossterm::{cursor, queue, terminal};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::events::ServerEvent;
use crate::grid::Grid;
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Redraw coalescing window.
const DEBOUNCE: Duration = Duration::from_millis(16);

/// Idle poll interval, also the shutdown-latency bound.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Set by SIGWINCH when the output device changes size.
static RESIZED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigwinch(_sig: i32) {
    RESIZED.store(true, Ordering::SeqCst);
}

fn install_resize_handler() {
    let action = SigAction::new(
        SigHandler::Handler(on_sigwinch),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGWINCH, &action);
    }
}

/// The most recent remote call, shown in the status bar.
#[derive(Debug, Clone)]
pub struct LastCall {
    pub operation: String,
    pub received: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct LiveOptions {
    /// Mirror to stderr (only honored when stderr is a terminal).
    pub terminal: bool,
    /// Rewrite this file with a framed snapshot on every redraw.
    pub file: Option<PathBuf>,
}

impl LiveOptions {
    pub fn enabled(&self) -> bool {
        self.terminal || self.file.is_some()
    }
}

pub struct LiveRenderer {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl LiveRenderer {
    /// Start the renderer thread. `rx` must be a fresh subscription on
    /// the server's event bus.
    pub fn spawn(
        options: LiveOptions,
        rx: Receiver<ServerEvent>,
        registry: Arc<Mutex<SessionRegistry>>,
        legacy: Option<Arc<Session>>,
        focus: Arc<Mutex<Option<String>>>,
        last_call: Arc<Mutex<Option<LastCall>>>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        if options.terminal {
            install_resize_handler();
        }
        let renderer = Renderer {
            options,
            registry,
            legacy,
            focus,
            last_call,
            current: None,
        };
        let handle = thread::Builder::new()
            .name("live-renderer".to_string())
            .spawn(move || renderer.run(rx, flag))
            .ok();
        LiveRenderer { handle, shutdown }
    }

    /// Final flush and terminal restore; joins the renderer thread.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Renderer {
    options: LiveOptions,
    registry: Arc<Mutex<SessionRegistry>>,
    legacy: Option<Arc<Session>>,
    focus: Arc<Mutex<Option<String>>>,
    last_call: Arc<Mutex<Option<LastCall>>>,
    // Last session rendered; keeps the final-flush frame available even
    // after shutdown has removed the session from the registry.
    current: Option<(String, Arc<Session>)>,
}

impl Renderer {
    fn run(mut self, rx: Receiver<ServerEvent>, shutdown: Arc<AtomicBool>) {
        let mut dirty = false;
        let mut deadline = Instant::now();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if RESIZED.swap(false, Ordering::SeqCst) && !dirty {
                dirty = true;
                deadline = Instant::now() + DEBOUNCE;
            }
            let timeout = if dirty {
                deadline.saturating_duration_since(Instant::now())
            } else {
                IDLE_TICK
            };
            match rx.recv_timeout(timeout) {
                Ok(event) => {
                    // Only the focused session is mirrored; a pending
                    // redraw absorbs further events until the deadline.
                    if !dirty && self.matches_focus(event.terminal_id()) {
                        dirty = true;
                        deadline = Instant::now() + DEBOUNCE;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if dirty {
                        self.redraw();
                        dirty = false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // One last frame so the file sink holds the final screen, then
        // hand the terminal back.
        self.redraw();
        if self.options.terminal {
            let mut stderr = io::stderr();
            let _ = queue!(stderr, cursor::Show);
            let _ = stderr.flush();
        }
    }

    fn focused_id(&self) -> Option<String> {
        if let Some(id) = self.focus.lock().unwrap().clone() {
            return Some(id);
        }
        self.legacy.as_ref().map(|s| s.id().to_string())
    }

    fn matches_focus(&self, terminal_id: &str) -> bool {
        self.focused_id().as_deref() == Some(terminal_id)
    }

    fn focused_session(&self) -> Option<(String, Arc<Session>)> {
        let id = self.focused_id()?;
        let session = if self.legacy.as_ref().is_some_and(|s| s.id() == id) {
            self.legacy.clone()
        } else {
            self.registry.lock().unwrap().get(&id)
        }?;
        Some((id, session))
    }

    fn redraw(&mut self) {
        // Resolve fresh when possible; fall back to the last rendered
        // session so the shutdown flush outlives registry removal.
        if let Some(target) = self.focused_session() {
            self.current = Some(target);
        }
        let Some((id, session)) = self
            .current
            .as_ref()
            .map(|(id, session)| (id.clone(), Arc::clone(session)))
        else {
            return;
        };
        let grid = session.grid_snapshot();
        let status = self.status_line();
        if self.options.terminal {
            self.draw_terminal(&id, &grid, &status);
        }
        if let Some(path) = &self.options.file {
            // Write errors are swallowed: observability must never
            // throttle the control path.
            let _ = std::fs::write(path, file_frame(&id, &grid, &status));
        }
    }

    fn status_line(&self) -> String {
        match self.last_call.lock().unwrap().as_ref() {
            Some(call) => format!(
                "last call: {} ({:.1}s ago)",
                call.operation,
                call.received.elapsed().as_secs_f64()
            ),
            None => "no calls yet".to_string(),
        }
    }

    fn draw_terminal(&self, id: &str, grid: &Grid, status: &str) {
        let mut stderr = io::stderr();
        let width = terminal::size()
            .map(|(w, _)| w as usize)
            .unwrap_or(grid.cols());
        if queue!(stderr, cursor::Hide, cursor::MoveTo(0, 0)).is_err() {
            return;
        }
        let mut frame = String::new();
        frame.push_str(&fit_width(&border_line(id, width), width));
        frame.push_str("\r\n");
        for row in 0..grid.rows() {
            frame.push_str(&fit_width(&grid.line(row), width));
            frame.push_str("\r\n");
        }
        frame.push_str(&fit_width(&"─".repeat(width), width));
        frame.push_str("\r\n");
        frame.push_str(&fit_width(status, width));
        let _ = stderr.write_all(frame.as_bytes());
        let _ = stderr.flush();
    }
}

/// Truncate or pad a line to exactly `width` characters.
fn fit_width(line: &str, width: usize) -> String {
    let mut fitted: String = line.chars().take(width).collect();
    let len = fitted.chars().count();
    if len < width {
        fitted.extend(std::iter::repeat(' ').take(width - len));
    }
    fitted
}

fn border_line(id: &str, width: usize) -> String {
    let label = format!("── terminal {} ", id);
    let used = label.chars().count();
    if used >= width {
        return label;
    }
    format!("{}{}", label, "─".repeat(width - used))
}

/// Box-drawn frame around the grid, with the status line below.
fn file_frame(id: &str, grid: &Grid, status: &str) -> String {
    let cols = grid.cols();
    let mut out = String::new();
    let label = format!("─ {} ", id);
    let used = label.chars().count();
    let top = if used >= cols {
        label.chars().take(cols).collect::<String>()
    } else {
        format!("{}{}", label, "─".repeat(cols - used))
    };
    out.push('┌');
    out.push_str(&top);
    out.push_str("┐\n");
    for row in 0..grid.rows() {
        out.push('│');
        out.push_str(&grid.line(row));
        out.push_str("│\n");
    }
    out.push('└');
    out.push_str(&"─".repeat(cols));
    out.push_str("┘\n");
    out.push_str(status);
    out.push('\n');
    out
}
