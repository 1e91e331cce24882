// Session registry: id allocation, lookup, and event tagging.
//
// The registry exclusively owns its sessions. Ids are successive
// positive integers rendered in decimal and are never reused; removal
// always terminates the session and awaits its reader first.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::events::{EventBus, EventSink, ServerEvent};
use crate::session::{Session, SessionRecipe};

/// One row of `list_tabs`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub command: String,
    pub running: bool,
    pub cols: u16,
    pub rows: u16,
}

pub struct SessionRegistry {
    sessions: HashMap<String, Arc<Session>>,
    next_id: u64,
    bus: Arc<EventBus>,
}

impl SessionRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            next_id: 1,
            bus,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Allocate the next id, construct and start a session, and insert
    /// it. The id is consumed even when the spawn fails.
    pub fn create(&mut self, recipe: SessionRecipe) -> Result<Arc<Session>> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let sink = EventSink::new(id.clone(), Arc::clone(&self.bus));
        let session = Session::new(id.clone(), recipe, sink);
        session.start()?;
        let command = session.command_line();
        self.sessions.insert(id.clone(), Arc::clone(&session));
        self.bus.emit(ServerEvent::Created {
            terminal_id: id,
            command,
        });
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Present ids in numeric order.
    pub fn ids(&self) -> Vec<String> {
        let mut numeric: Vec<u64> = self
            .sessions
            .keys()
            .filter_map(|id| id.parse().ok())
            .collect();
        numeric.sort_unstable();
        numeric.into_iter().map(|id| id.to_string()).collect()
    }

    /// The largest id currently present (not merely the most recently
    /// allocated), so the focus fallback survives out-of-order kills.
    pub fn last_id(&self) -> Option<String> {
        self.sessions
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map(|id| id.to_string())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.sessions.get(&id).map(|s| summarize(&id, s)))
            .collect()
    }

    /// Terminate the session, await its reader, remove it, and announce
    /// the removal. Unknown ids return false with no effect.
    pub fn kill(&mut self, id: &str) -> bool {
        let Some(session) = self.sessions.get(id).cloned() else {
            return false;
        };
        session.terminate();
        self.sessions.remove(id);
        self.bus.emit(ServerEvent::Killed {
            terminal_id: id.to_string(),
        });
        true
    }

    pub fn kill_all(&mut self) {
        for id in self.ids() {
            self.kill(&id);
        }
    }
}

pub fn summarize(id: &str, session: &Session) -> SessionSummary {
    let (cols, rows) = session.size();
    SessionSummary {
        id: id.to_string(),
        command: session.command_line(),
        running: session.is_running(),
        cols,
        rows,
    }
}
