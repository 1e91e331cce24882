// Session events and their fan-out.
//
// Sessions publish upward through an EventSink handed to them at
// creation; the bus rebroadcasts every event, tagged with the terminal
// id, to whoever subscribed (the live renderer, tests). Senders whose
// receiver went away are pruned on the next emit.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Events a single session emits about itself.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start,
    Data(Vec<u8>),
    Exit { code: i32, signal: Option<i32> },
}

/// Session events tagged with their terminal id, plus registry-level
/// lifecycle events.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Created {
        terminal_id: String,
        command: String,
    },
    Start {
        terminal_id: String,
    },
    Data {
        terminal_id: String,
        bytes: Vec<u8>,
    },
    Exit {
        terminal_id: String,
        code: i32,
        signal: Option<i32>,
    },
    Killed {
        terminal_id: String,
    },
}

impl ServerEvent {
    /// The id of the session this event concerns.
    pub fn terminal_id(&self) -> &str {
        match self {
            ServerEvent::Created { terminal_id, .. }
            | ServerEvent::Start { terminal_id }
            | ServerEvent::Data { terminal_id, .. }
            | ServerEvent::Exit { terminal_id, .. }
            | ServerEvent::Killed { terminal_id } => terminal_id,
        }
    }
}

/// Broadcast hub for server events.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ServerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> Receiver<ServerEvent> {
        let (tx, rx) = channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: ServerEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishing handle a session holds: events flow up to the bus already
/// tagged with the session's id.
#[derive(Clone)]
pub struct EventSink {
    terminal_id: String,
    bus: Arc<EventBus>,
}

impl EventSink {
    pub fn new(terminal_id: String, bus: Arc<EventBus>) -> Self {
        EventSink { terminal_id, bus }
    }

    pub fn emit(&self, event: SessionEvent) {
        let terminal_id = self.terminal_id.clone();
        let tagged = match event {
            SessionEvent::Start => ServerEvent::Start { terminal_id },
            SessionEvent::Data(bytes) => ServerEvent::Data {
                terminal_id,
                bytes,
            },
            SessionEvent::Exit { code, signal } => ServerEvent::Exit {
                terminal_id,
                code,
                signal,
            },
        };
        self.bus.emit(tagged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_and_emit() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.emit(ServerEvent::Killed {
            terminal_id: "1".to_string(),
        });
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.terminal_id(), "1");
    }

    #[test]
    fn test_dead_subscribers_pruned() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        let rx = bus.subscribe();
        bus.emit(ServerEvent::Killed {
            terminal_id: "1".to_string(),
        });
        assert!(rx.try_recv().is_ok());
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sink_tags_events() {
        let bus = Arc::new(EventBus::new());
        let rx = bus.subscribe();
        let sink = EventSink::new("3".to_string(), Arc::clone(&bus));
        sink.emit(SessionEvent::Data(b"out".to_vec()));
        match rx.try_recv().unwrap() {
            ServerEvent::Data { terminal_id, bytes } => {
                assert_eq!(terminal_id, "3");
                assert_eq!(bytes, b"out");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
