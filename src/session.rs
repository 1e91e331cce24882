// One child process under a pseudo-terminal.
//
// A session owns the child, the PTY master, a reader thread, the screen
// emulator state, and a bounded log of raw output. The reader is the
// only grid mutator; request handlers take the state mutex for control
// operations and read-only snapshots.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use fork::{fork as safe_fork, Fork};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{dup2, setsid, Pid};

use crate::ansi::Interpreter;
use crate::error::{ControlError, Result};
use crate::events::{EventSink, SessionEvent};
use crate::grid::Grid;
use crate::keys::encode_key;
use crate::ring::{RawRing, DEFAULT_CAPACITY};

/// Poll interval of the reader thread.
const READ_INTERVAL: Duration = Duration::from_millis(20);

/// How long `terminate` waits after SIGTERM before escalating.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// How to launch (and relaunch) the child.
#[derive(Debug, Clone)]
pub struct SessionRecipe {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

impl SessionRecipe {
    pub fn new(command: impl Into<String>, cols: u16, rows: u16) -> Self {
        SessionRecipe {
            command: Some(command.into()),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            cols,
            rows,
        }
    }

    /// The command with its arguments, for listings.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(command) = &self.command {
            parts.push(command.clone());
        }
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn apply(&mut self, patch: RecipePatch) {
        if let Some(command) = patch.command {
            self.command = Some(command);
        }
        if let Some(args) = patch.args {
            self.args = args;
        }
        if let Some(cwd) = patch.cwd {
            self.cwd = Some(cwd);
        }
        if let Some(env) = patch.env {
            self.env = env;
        }
        if let Some(cols) = patch.cols {
            self.cols = cols;
        }
        if let Some(rows) = patch.rows {
            self.rows = rows;
        }
    }
}

/// Fields to amend on `restart`; anything left `None` keeps the stored
/// recipe's value.
#[derive(Debug, Default, Clone)]
pub struct RecipePatch {
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<PathBuf>,
    pub env: Option<HashMap<String, String>>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// How the child went away.
#[derive(Debug, Clone, Copy)]
pub struct ExitRecord {
    pub exit_code: i32,
    pub signal: Option<i32>,
}

struct SessionState {
    recipe: SessionRecipe,
    running: bool,
    master: Option<OwnedFd>,
    child: Option<Pid>,
    grid: Grid,
    interp: Interpreter,
    ring: RawRing,
    exit: Option<ExitRecord>,
    reader: Option<JoinHandle<()>>,
    // Bumped on every start so a superseded reader retires silently.
    generation: u64,
}

pub struct Session {
    id: String,
    created_at: SystemTime,
    sink: EventSink,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: String, recipe: SessionRecipe, sink: EventSink) -> Arc<Self> {
        let grid = Grid::new(recipe.rows as usize, recipe.cols as usize);
        Arc::new(Session {
            id,
            created_at: SystemTime::now(),
            sink,
            state: Mutex::new(SessionState {
                recipe,
                running: false,
                master: None,
                child: None,
                grid,
                interp: Interpreter::new(),
                ring: RawRing::new(DEFAULT_CAPACITY),
                exit: None,
                reader: None,
                generation: 0,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Spawn the child under a fresh PTY sized from the recipe. Fails
    /// with `AlreadyRunning` when called twice without a stop, and the
    /// command is resolved up front so spawn failures surface here
    /// rather than as an instantly-exited child.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.running {
            return Err(ControlError::AlreadyRunning(self.id.clone()));
        }
        let command = st
            .recipe
            .command
            .clone()
            .ok_or_else(|| ControlError::InvalidArgs("missing required field: command".to_string()))?;
        let program = resolve_command(&command).map_err(|source| ControlError::SpawnFailed {
            command: command.clone(),
            source,
        })?;
        if let Some(cwd) = &st.recipe.cwd {
            if !cwd.is_dir() {
                return Err(ControlError::SpawnFailed {
                    command,
                    source: io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("working directory {} does not exist", cwd.display()),
                    ),
                });
            }
        }

        let winsize = Winsize {
            ws_row: st.recipe.rows,
            ws_col: st.recipe.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).map_err(|e| ControlError::SpawnFailed {
            command: command.clone(),
            source: errno_to_io(e),
        })?;

        match safe_fork() {
            Ok(Fork::Child) => {
                // The child never returns: become a session leader, wire
                // the slave to stdio, claim it as the controlling
                // terminal, and exec.
                drop(pty.master);
                let _ = setsid();
                let slave_fd = pty.slave.as_raw_fd();
                let _ = dup2(slave_fd, 0);
                let _ = dup2(slave_fd, 1);
                let _ = dup2(slave_fd, 2);
                let _ = rustix::process::ioctl_tiocsctty(&pty.slave);
                drop(pty.slave);

                let mut cmd = ProcessCommand::new(&program);
                cmd.args(&st.recipe.args)
                    .env("TERM", "xterm-256color")
                    .env("COLORTERM", "truecolor")
                    .envs(&st.recipe.env);
                if let Some(cwd) = &st.recipe.cwd {
                    cmd.current_dir(cwd);
                }
                let _ = cmd.exec();
                std::process::exit(127);
            }
            Ok(Fork::Parent(child)) => {
                drop(pty.slave);
                let pid = Pid::from_raw(child);
                if let Err(e) = set_nonblocking(&pty.master) {
                    let _ = kill(pid, Signal::SIGKILL);
                    let _ = waitpid(pid, None);
                    return Err(ControlError::SpawnFailed {
                        command,
                        source: errno_to_io(e),
                    });
                }

                let rows = st.recipe.rows as usize;
                let cols = st.recipe.cols as usize;
                st.master = Some(pty.master);
                st.child = Some(pid);
                st.running = true;
                st.exit = None;
                st.grid = Grid::new(rows, cols);
                st.interp = Interpreter::new();
                st.ring.clear();
                st.generation += 1;
                let generation = st.generation;

                let session = Arc::clone(self);
                match thread::Builder::new()
                    .name(format!("pty-reader-{}", self.id))
                    .spawn(move || session.reader_loop(generation))
                {
                    Ok(handle) => st.reader = Some(handle),
                    Err(source) => {
                        let _ = kill(pid, Signal::SIGKILL);
                        let _ = waitpid(pid, None);
                        st.master = None;
                        st.child = None;
                        st.running = false;
                        return Err(ControlError::SpawnFailed { command, source });
                    }
                }
            }
            Err(_) => {
                return Err(ControlError::SpawnFailed {
                    command,
                    source: io::Error::last_os_error(),
                });
            }
        }
        drop(st);
        self.sink.emit(SessionEvent::Start);
        Ok(())
    }

    /// Write the exact bytes to the PTY master. Fails with `NotRunning`
    /// once the child has exited; nothing is buffered for a future
    /// session.
    pub fn type_text(&self, bytes: &[u8]) -> Result<()> {
        let master = {
            let st = self.state.lock().unwrap();
            if !st.running {
                return Err(ControlError::NotRunning(self.id.clone()));
            }
            let master = st.master.as_ref().expect("running session has a master");
            // Duplicate the fd so retries on a full input buffer don't
            // hold the state lock against the reader.
            master
                .try_clone()
                .map_err(|_| ControlError::NotRunning(self.id.clone()))?
        };
        let mut written = 0;
        while written < bytes.len() {
            match nix::unistd::write(master.as_raw_fd(), &bytes[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) => thread::sleep(Duration::from_millis(1)),
                Err(_) => return Err(ControlError::NotRunning(self.id.clone())),
            }
        }
        Ok(())
    }

    /// Encode a symbolic key name and transmit it.
    pub fn press_key(&self, key: &str) -> Result<()> {
        let bytes = encode_key(key)?;
        self.type_text(&bytes)
    }

    /// Update the PTY window size and the grid together.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if !st.running {
            return Err(ControlError::NotRunning(self.id.clone()));
        }
        let master = st.master.as_ref().expect("running session has a master");
        let winsize = rustix::termios::Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        if rustix::termios::tcsetwinsize(master, winsize).is_err() {
            return Err(ControlError::NotRunning(self.id.clone()));
        }
        st.recipe.cols = cols;
        st.recipe.rows = rows;
        st.grid.resize(rows as usize, cols as usize);
        Ok(())
    }

    /// Ask the child to terminate. Idempotent; does not wait.
    pub fn stop(&self) -> Result<()> {
        let st = self.state.lock().unwrap();
        if st.running {
            if let Some(pid) = st.child {
                let _ = kill(pid, Signal::SIGTERM);
            }
        }
        Ok(())
    }

    /// Stop the child and wait for the reader to shut down, escalating
    /// to SIGKILL after a grace period. Used by registry removal and
    /// server shutdown.
    pub fn terminate(&self) {
        let reader = {
            let mut st = self.state.lock().unwrap();
            if st.running {
                if let Some(pid) = st.child {
                    let _ = kill(pid, Signal::SIGTERM);
                }
            }
            st.reader.take()
        };
        let deadline = std::time::Instant::now() + TERM_GRACE;
        while self.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        if self.is_running() {
            let pid = self.state.lock().unwrap().child;
            if let Some(pid) = pid {
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
        if let Some(handle) = reader {
            let _ = handle.join();
        }
    }

    /// Stop, amend the stored recipe with the given fields, and start
    /// again. The grid and the raw ring begin empty.
    pub fn restart(self: &Arc<Self>, patch: RecipePatch) -> Result<()> {
        self.terminate();
        {
            let mut st = self.state.lock().unwrap();
            st.recipe.apply(patch);
        }
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    pub fn exit_record(&self) -> Option<ExitRecord> {
        self.state.lock().unwrap().exit
    }

    /// Screen text, one trimmed line per row.
    pub fn screen_text(&self) -> String {
        self.state.lock().unwrap().grid.to_text()
    }

    /// Cursor position as (row, col).
    pub fn cursor(&self) -> (usize, usize) {
        self.state.lock().unwrap().grid.cursor()
    }

    /// Current dimensions as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        let st = self.state.lock().unwrap();
        (st.grid.cols() as u16, st.grid.rows() as u16)
    }

    /// Full-width copy of the grid for rendering.
    pub fn grid_snapshot(&self) -> Grid {
        self.state.lock().unwrap().grid.clone()
    }

    /// The last `n` lines of raw child output.
    pub fn last_output(&self, n: usize) -> String {
        self.state.lock().unwrap().ring.tail_lines(n)
    }

    pub fn command_line(&self) -> String {
        self.state.lock().unwrap().recipe.command_line()
    }

    fn reader_loop(self: Arc<Self>, generation: u64) {
        loop {
            thread::sleep(READ_INTERVAL);
            let mut chunks: Vec<Vec<u8>> = Vec::new();
            let mut pending_wait: Option<Pid> = None;
            let mut exit_event: Option<ExitRecord> = None;
            {
                let mut st = self.state.lock().unwrap();
                if st.generation != generation {
                    return;
                }
                let eof = st.drain_output(&mut chunks);
                if st.exit.is_none() {
                    st.check_child();
                }
                if eof && st.exit.is_none() {
                    pending_wait = st.child;
                }
                if st.exit.is_some() {
                    st.drain_output(&mut chunks);
                    exit_event = st.finish();
                }
            }
            for bytes in chunks {
                self.sink.emit(SessionEvent::Data(bytes));
            }
            if let Some(record) = exit_event {
                self.sink.emit(SessionEvent::Exit {
                    code: record.exit_code,
                    signal: record.signal,
                });
                return;
            }
            if let Some(pid) = pending_wait {
                // The PTY reported end-of-file: await the exit status
                // without holding the lock (a stuck child is unstuck by
                // terminate's SIGKILL).
                let record = match waitpid(pid, None) {
                    Ok(WaitStatus::Exited(_, code)) => ExitRecord {
                        exit_code: code,
                        signal: None,
                    },
                    Ok(WaitStatus::Signaled(_, sig, _)) => ExitRecord {
                        exit_code: 128 + sig as i32,
                        signal: Some(sig as i32),
                    },
                    _ => ExitRecord {
                        exit_code: -1,
                        signal: None,
                    },
                };
                let (mut final_chunks, exit_event) = {
                    let mut st = self.state.lock().unwrap();
                    if st.generation != generation {
                        return;
                    }
                    st.exit = Some(record);
                    let mut chunks = Vec::new();
                    st.drain_output(&mut chunks);
                    (chunks, st.finish())
                };
                for bytes in final_chunks.drain(..) {
                    self.sink.emit(SessionEvent::Data(bytes));
                }
                if let Some(record) = exit_event {
                    self.sink.emit(SessionEvent::Exit {
                        code: record.exit_code,
                        signal: record.signal,
                    });
                }
                return;
            }
        }
    }
}

impl SessionState {
    /// Drain whatever the PTY has buffered into the emulator, the raw
    /// ring, and `chunks`. Returns true at end-of-file (or any read
    /// error, which is treated as early EOF).
    fn drain_output(&mut self, chunks: &mut Vec<Vec<u8>>) -> bool {
        let fd = match &self.master {
            Some(fd) => fd.as_raw_fd(),
            None => return true,
        };
        let mut buf = [0u8; 4096];
        loop {
            match nix::unistd::read(fd, &mut buf) {
                Ok(0) => return true,
                Ok(n) => {
                    self.interp.feed(&mut self.grid, &buf[..n]);
                    self.ring.push(&buf[..n]);
                    chunks.push(buf[..n].to_vec());
                }
                Err(Errno::EAGAIN) => return false,
                // EIO once the slave side is gone.
                Err(_) => return true,
            }
        }
    }

    fn check_child(&mut self) {
        let Some(pid) = self.child else { return };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                self.exit = Some(ExitRecord {
                    exit_code: code,
                    signal: None,
                });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                self.exit = Some(ExitRecord {
                    exit_code: 128 + sig as i32,
                    signal: Some(sig as i32),
                });
            }
            Err(Errno::ECHILD) => {
                self.exit = Some(ExitRecord {
                    exit_code: -1,
                    signal: None,
                });
            }
            _ => {}
        }
    }

    fn finish(&mut self) -> Option<ExitRecord> {
        self.running = false;
        self.master = None;
        self.child = None;
        self.reader = None;
        self.exit
    }
}

fn set_nonblocking(fd: &OwnedFd) -> std::result::Result<(), Errno> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let mut oflags = OFlag::from_bits_truncate(flags);
    oflags.insert(OFlag::O_NONBLOCK);
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(oflags))?;
    Ok(())
}

fn errno_to_io(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Resolve a command name to an executable path, searching PATH for
/// bare names, so a bad recipe fails before the fork.
fn resolve_command(command: &str) -> io::Result<PathBuf> {
    let path = Path::new(command);
    if command.contains('/') {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no such executable",
        ));
    }
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(command);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "command not found in PATH",
    ))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn test_session(recipe: SessionRecipe) -> Arc<Session> {
        let bus = Arc::new(EventBus::new());
        let sink = EventSink::new("test".to_string(), bus);
        Session::new("test".to_string(), recipe, sink)
    }

    fn wait_for_exit(session: &Session) {
        for _ in 0..250 {
            if !session.is_running() && session.exit_record().is_some() {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("session did not exit in time");
    }

    #[test]
    fn test_start_requires_command() {
        let mut recipe = SessionRecipe::new("sh", 80, 24);
        recipe.command = None;
        let session = test_session(recipe);
        assert!(matches!(
            session.start(),
            Err(ControlError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_spawn_failure_is_synchronous() {
        let session = test_session(SessionRecipe::new("definitely-no-such-cmd-xyz", 80, 24));
        assert!(matches!(
            session.start(),
            Err(ControlError::SpawnFailed { .. })
        ));
        assert!(!session.is_running());
    }

    #[test]
    fn test_missing_cwd_is_spawn_failure() {
        let mut recipe = SessionRecipe::new("sh", 80, 24);
        recipe.cwd = Some(PathBuf::from("/no/such/dir/for/pilotty"));
        let session = test_session(recipe);
        assert!(matches!(
            session.start(),
            Err(ControlError::SpawnFailed { .. })
        ));
    }

    /// Output of a short-lived child lands on the grid and in the raw
    /// ring, and input after exit fails with NotRunning.
    #[test]
    fn test_output_and_exit() {
        let mut recipe = SessionRecipe::new("sh", 40, 10);
        recipe.args = vec!["-c".to_string(), "printf 'hi there'".to_string()];
        let session = test_session(recipe);
        session.start().unwrap();
        wait_for_exit(&session);

        assert!(session.screen_text().lines().next().unwrap().contains("hi there"));
        assert!(session.last_output(5).contains("hi there"));
        assert_eq!(session.exit_record().unwrap().exit_code, 0);
        assert!(matches!(
            session.type_text(b"late"),
            Err(ControlError::NotRunning(_))
        ));
    }

    #[test]
    fn test_exit_code_captured() {
        let mut recipe = SessionRecipe::new("sh", 40, 10);
        recipe.args = vec!["-c".to_string(), "exit 3".to_string()];
        let session = test_session(recipe);
        session.start().unwrap();
        wait_for_exit(&session);
        let record = session.exit_record().unwrap();
        assert_eq!(record.exit_code, 3);
        assert_eq!(record.signal, None);
    }

    #[test]
    fn test_double_start_rejected() {
        let session = test_session(SessionRecipe::new("cat", 40, 10));
        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(ControlError::AlreadyRunning(_))
        ));
        session.terminate();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let session = test_session(SessionRecipe::new("cat", 40, 10));
        session.start().unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
        wait_for_exit(&session);
        session.stop().unwrap();
    }

    /// Typed input reaches the child: cat echoes it back onto the grid
    /// (once via the tty echo, once via cat itself).
    #[test]
    fn test_type_text_round_trip() {
        let session = test_session(SessionRecipe::new("cat", 40, 10));
        session.start().unwrap();
        session.type_text(b"ping\r").unwrap();
        for _ in 0..100 {
            if session.screen_text().contains("ping") {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert!(session.screen_text().contains("ping"));
        session.terminate();
        assert!(!session.is_running());
    }

    #[test]
    fn test_restart_clears_screen() {
        let mut recipe = SessionRecipe::new("sh", 40, 10);
        recipe.args = vec!["-c".to_string(), "printf 'first'".to_string()];
        let session = test_session(recipe);
        session.start().unwrap();
        wait_for_exit(&session);
        assert!(session.screen_text().contains("first"));

        let patch = RecipePatch {
            args: Some(vec!["-c".to_string(), "printf 'second'".to_string()]),
            ..Default::default()
        };
        session.restart(patch).unwrap();
        wait_for_exit(&session);
        let screen = session.screen_text();
        assert!(screen.contains("second"));
        assert!(!screen.contains("first"));
        assert!(!session.last_output(10).contains("first"));
    }

    #[test]
    fn test_resize_requires_running() {
        let session = test_session(SessionRecipe::new("cat", 40, 10));
        assert!(matches!(
            session.resize(20, 5),
            Err(ControlError::NotRunning(_))
        ));
        session.start().unwrap();
        session.resize(20, 5).unwrap();
        assert_eq!(session.size(), (20, 5));
        session.terminate();
    }
}
