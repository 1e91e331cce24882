// Remote operations over the session fleet.
//
// The dispatcher is transport-agnostic: requests are JSON objects with a
// "type" field plus operation parameters, responses carry either a data
// payload or a {kind, message} error. One dispatcher thread mutates the
// registry and the focus slot; sessions do their own I/O.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ControlError, Result};
use crate::events::{EventBus, EventSink};
use crate::live::LastCall;
use crate::registry::{summarize, SessionRegistry, SessionSummary};
use crate::session::{RecipePatch, Session, SessionRecipe};

/// Fixed id of the session created from the launch command line.
pub const LEGACY_ID: &str = "legacy";

/// Pause after injecting input, letting the child react before the
/// caller's next snapshot.
const INPUT_SETTLE: Duration = Duration::from_millis(50);

/// Pause after starting a child, giving a TUI time to paint its first
/// frame.
const INITIAL_RENDER_PAUSE: Duration = Duration::from_millis(500);

const DEFAULT_WAIT_MS: u64 = 100;

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub operation: String,
    #[serde(flatten)]
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(data: Value) -> Self {
        Response {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(err: &ControlError) -> Self {
        Response {
            status: "error".to_string(),
            data: None,
            error: Some(ErrorPayload {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub default_cols: u16,
    pub default_rows: u16,
    pub default_cwd: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            default_cols: 80,
            default_rows: 24,
            default_cwd: None,
            log_file: None,
        }
    }
}

pub struct ControlServer {
    config: ServerConfig,
    bus: Arc<EventBus>,
    registry: Arc<Mutex<SessionRegistry>>,
    legacy: Option<Arc<Session>>,
    focus: Arc<Mutex<Option<String>>>,
    last_call: Arc<Mutex<Option<LastCall>>>,
    log: Option<Mutex<RequestLog>>,
}

impl ControlServer {
    pub fn new(config: ServerConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(Mutex::new(SessionRegistry::new(Arc::clone(&bus))));
        // A broken log sink never blocks startup; logging is best-effort
        // throughout.
        let log = config
            .log_file
            .as_ref()
            .and_then(|path| RequestLog::open(path).ok())
            .map(Mutex::new);
        ControlServer {
            config,
            bus,
            registry,
            legacy: None,
            focus: Arc::new(Mutex::new(None)),
            last_call: Arc::new(Mutex::new(None)),
            log,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        Arc::clone(&self.registry)
    }

    pub fn focus_handle(&self) -> Arc<Mutex<Option<String>>> {
        Arc::clone(&self.focus)
    }

    pub fn last_call_handle(&self) -> Arc<Mutex<Option<LastCall>>> {
        Arc::clone(&self.last_call)
    }

    pub fn legacy_session(&self) -> Option<Arc<Session>> {
        self.legacy.clone()
    }

    /// Eagerly create the `legacy` session from the launch command. It
    /// participates in listing and the focus chain but never comes from
    /// the id allocator.
    pub fn spawn_legacy(&mut self, command: String, args: Vec<String>) -> Result<()> {
        let mut recipe =
            SessionRecipe::new(command, self.config.default_cols, self.config.default_rows);
        recipe.args = args;
        recipe.cwd = self.config.default_cwd.clone();
        let sink = EventSink::new(LEGACY_ID.to_string(), Arc::clone(&self.bus));
        let session = Session::new(LEGACY_ID.to_string(), recipe, sink);
        session.start()?;
        self.legacy = Some(session);
        Ok(())
    }

    /// Kill every session. Called on graceful shutdown.
    pub fn shutdown(&self) {
        self.registry.lock().unwrap().kill_all();
        if let Some(legacy) = &self.legacy {
            legacy.terminate();
        }
    }

    /// Parse one JSON request line and handle it. Parse failures come
    /// back as InvalidArgs so a confused client still gets a structured
    /// answer.
    pub fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                let err = ControlError::InvalidArgs(format!("invalid request: {}", e));
                let response = Response::error(&err);
                self.log_response(&response);
                response
            }
        }
    }

    pub fn handle(&self, request: &Request) -> Response {
        *self.last_call.lock().unwrap() = Some(LastCall {
            operation: request.operation.clone(),
            received: Instant::now(),
        });
        self.log_call(request);
        let response = match self.dispatch(&request.operation, &request.params) {
            Ok(data) => Response::ok(data),
            Err(e) => Response::error(&e),
        };
        self.log_response(&response);
        response
    }

    fn dispatch(&self, operation: &str, params: &Value) -> Result<Value> {
        match operation {
            "view_screen" => self.view_screen(params),
            "type_text" => self.type_text(params),
            "press_key" => self.press_key(params),
            "get_screen_size" => self.get_screen_size(params),
            "wait" => self.wait(params),
            "run_tui" => self.run_tui(params),
            "stop_tui" => self.stop_tui(),
            "create_process" => self.create_process(params),
            "kill_process" => self.kill_process(params),
            "list_tabs" => self.list_tabs(),
            other => Err(ControlError::InvalidArgs(format!(
                "unknown operation '{}'",
                other
            ))),
        }
    }

    fn view_screen(&self, params: &Value) -> Result<Value> {
        let (id, session) = self.resolve_target(opt_str(params, "terminal_id").as_deref())?;
        let screen = session.screen_text();
        if opt_bool(params, "include_metadata").unwrap_or(false) {
            let (row, col) = session.cursor();
            let (cols, rows) = session.size();
            Ok(json!({
                "terminal_id": id,
                "screen": screen,
                "cursor": { "row": row, "col": col },
                "size": { "cols": cols, "rows": rows },
            }))
        } else {
            Ok(Value::String(screen))
        }
    }

    fn type_text(&self, params: &Value) -> Result<Value> {
        let text = req_str(params, "text")?;
        let (id, session) = self.resolve_target(opt_str(params, "terminal_id").as_deref())?;
        session.type_text(text.as_bytes())?;
        thread::sleep(INPUT_SETTLE);
        Ok(json!(format!(
            "typed {} bytes to terminal {}",
            text.len(),
            id
        )))
    }

    fn press_key(&self, params: &Value) -> Result<Value> {
        let key = req_str(params, "key")?;
        let (id, session) = self.resolve_target(opt_str(params, "terminal_id").as_deref())?;
        session.press_key(&key)?;
        thread::sleep(INPUT_SETTLE);
        Ok(json!(format!("pressed '{}' on terminal {}", key.trim(), id)))
    }

    fn get_screen_size(&self, params: &Value) -> Result<Value> {
        let (id, session) = self.resolve_target(opt_str(params, "terminal_id").as_deref())?;
        let (cols, rows) = session.size();
        Ok(json!({ "terminal_id": id, "cols": cols, "rows": rows }))
    }

    fn wait(&self, params: &Value) -> Result<Value> {
        let ms = opt_u64(params, "ms").unwrap_or(DEFAULT_WAIT_MS);
        thread::sleep(Duration::from_millis(ms));
        Ok(json!(format!("waited {}ms", ms)))
    }

    /// Restart the focused session in place, or create (and focus) a new
    /// one when no focus is set.
    fn run_tui(&self, params: &Value) -> Result<Value> {
        let command = req_str(params, "command")?;
        let args = opt_str_vec(params, "args")?;
        let cwd = opt_str(params, "cwd").map(PathBuf::from);
        let cols = opt_u16(params, "cols")?;
        let rows = opt_u16(params, "rows")?;

        let focused = self.focus.lock().unwrap().clone();
        if let Some(id) = focused {
            if let Ok((id, session)) = self.lookup(&id) {
                let patch = RecipePatch {
                    command: Some(command.clone()),
                    args: Some(args.unwrap_or_default()),
                    cwd,
                    env: None,
                    cols,
                    rows,
                };
                session.restart(patch)?;
                thread::sleep(INITIAL_RENDER_PAUSE);
                return Ok(json!(format!(
                    "restarted terminal {} with '{}'",
                    id, command
                )));
            }
        }

        let session = self.create_session(command, args, cwd, cols, rows)?;
        let id = session.id().to_string();
        *self.focus.lock().unwrap() = Some(id.clone());
        thread::sleep(INITIAL_RENDER_PAUSE);
        Ok(json!(format!(
            "started '{}' in terminal {}",
            session.command_line(),
            id
        )))
    }

    /// Stop the target from the focus chain and fall back to the most
    /// recent remaining session, or clear the focus.
    fn stop_tui(&self) -> Result<Value> {
        let (id, session) = self.resolve_target(None)?;
        session.stop()?;

        let next = {
            let registry = self.registry.lock().unwrap();
            registry
                .ids()
                .into_iter()
                .rev()
                .find(|candidate| *candidate != id)
        };
        let next = next.or_else(|| {
            self.legacy
                .as_ref()
                .filter(|legacy| legacy.id() != id && legacy.is_running())
                .map(|legacy| legacy.id().to_string())
        });
        *self.focus.lock().unwrap() = next;
        Ok(json!(format!("stopped terminal {}", id)))
    }

    /// Always create and focus a fresh session.
    fn create_process(&self, params: &Value) -> Result<Value> {
        let command = req_str(params, "command")?;
        let args = opt_str_vec(params, "args")?;
        let cwd = opt_str(params, "cwd").map(PathBuf::from);
        let cols = opt_u16(params, "cols")?;
        let rows = opt_u16(params, "rows")?;

        let session = self.create_session(command, args, cwd, cols, rows)?;
        let id = session.id().to_string();
        *self.focus.lock().unwrap() = Some(id.clone());
        thread::sleep(INITIAL_RENDER_PAUSE);
        Ok(json!({
            "terminal_id": id,
            "command": session.command_line(),
            "message": format!("created terminal {}", id),
        }))
    }

    fn kill_process(&self, params: &Value) -> Result<Value> {
        let id = req_str(params, "terminal_id")?;
        // The legacy session is stopped through stop_tui, never killed
        // here; only allocator ids qualify.
        let killed = id != LEGACY_ID && self.registry.lock().unwrap().kill(&id);
        if !killed {
            return Err(ControlError::UnknownSession {
                id,
                available: self.registry.lock().unwrap().ids(),
            });
        }
        let mut focus = self.focus.lock().unwrap();
        if focus.as_deref() == Some(id.as_str()) {
            *focus = None;
        }
        Ok(json!(format!("killed terminal {}", id)))
    }

    fn list_tabs(&self) -> Result<Value> {
        let mut terminals: Vec<SessionSummary> = self.registry.lock().unwrap().list();
        if let Some(legacy) = &self.legacy {
            terminals.push(summarize(LEGACY_ID, legacy));
        }
        let focused = self.focus.lock().unwrap().clone();
        let mut data = json!({ "terminals": terminals, "focused": focused });
        if terminals.is_empty() {
            data["hint"] =
                json!("no terminals; use run_tui or create_process to start one");
        }
        Ok(data)
    }

    fn create_session(
        &self,
        command: String,
        args: Option<Vec<String>>,
        cwd: Option<PathBuf>,
        cols: Option<u16>,
        rows: Option<u16>,
    ) -> Result<Arc<Session>> {
        let mut recipe = SessionRecipe::new(
            command,
            cols.unwrap_or(self.config.default_cols),
            rows.unwrap_or(self.config.default_rows),
        );
        recipe.args = args.unwrap_or_default();
        recipe.cwd = cwd.or_else(|| self.config.default_cwd.clone());
        self.registry.lock().unwrap().create(recipe)
    }

    /// The focus-fallback chain: explicit id, current focus, the
    /// registry's largest id, then the legacy session while it runs.
    fn resolve_target(&self, explicit: Option<&str>) -> Result<(String, Arc<Session>)> {
        if let Some(id) = explicit {
            return self.lookup(id);
        }
        if let Some(id) = self.focus.lock().unwrap().clone() {
            if let Ok(target) = self.lookup(&id) {
                return Ok(target);
            }
        }
        let last = self.registry.lock().unwrap().last_id();
        if let Some(id) = last {
            return self.lookup(&id);
        }
        if let Some(legacy) = &self.legacy {
            if legacy.is_running() {
                return Ok((LEGACY_ID.to_string(), Arc::clone(legacy)));
            }
        }
        Err(ControlError::NoSession)
    }

    fn lookup(&self, id: &str) -> Result<(String, Arc<Session>)> {
        if let Some(session) = self.registry.lock().unwrap().get(id) {
            return Ok((id.to_string(), session));
        }
        if id == LEGACY_ID {
            if let Some(legacy) = &self.legacy {
                return Ok((LEGACY_ID.to_string(), Arc::clone(legacy)));
            }
        }
        Err(ControlError::UnknownSession {
            id: id.to_string(),
            available: self.available_ids(),
        })
    }

    fn available_ids(&self) -> Vec<String> {
        let mut ids = self.registry.lock().unwrap().ids();
        if self.legacy.is_some() {
            ids.push(LEGACY_ID.to_string());
        }
        ids
    }

    fn log_call(&self, request: &Request) {
        if let Some(log) = &self.log {
            let line = json!({ "type": request.operation, "params": request.params });
            log.lock().unwrap().record("TOOL_CALL", &line.to_string());
        }
    }

    fn log_response(&self, response: &Response) {
        if let Some(log) = &self.log {
            let line = serde_json::to_string(response).unwrap_or_default();
            log.lock().unwrap().record("TOOL_RESULT", &line);
        }
    }
}

/// Append-only request log: one ISO-8601-UTC-stamped line per entry.
struct RequestLog {
    file: std::fs::File,
}

impl RequestLog {
    fn open(path: &PathBuf) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(RequestLog { file })
    }

    fn record(&mut self, kind: &str, payload: &str) {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let _ = writeln!(self.file, "{} {} {}", timestamp, kind, payload);
    }
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn req_str(params: &Value, key: &str) -> Result<String> {
    opt_str(params, key)
        .ok_or_else(|| ControlError::InvalidArgs(format!("missing required field: {}", key)))
}

fn opt_bool(params: &Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

fn opt_u64(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

fn opt_u16(params: &Value, key: &str) -> Result<Option<u16>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .filter(|&n| n > 0)
            .map(Some)
            .ok_or_else(|| {
                ControlError::InvalidArgs(format!("{} must be a positive integer", key))
            }),
    }
}

fn opt_str_vec(params: &Value, key: &str) -> Result<Option<Vec<String>>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ControlError::InvalidArgs(format!("{} must be an array of strings", key))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(_) => Err(ControlError::InvalidArgs(format!(
            "{} must be an array of strings",
            key
        ))),
    }
}
