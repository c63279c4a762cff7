//! In-memory socket connector for tests.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::connection::{Connector, SocketHandle};
use crate::event::{EventTx, SessionEvent, SocketEvent};

struct MockSocket {
    generation: u64,
    outbound: mpsc::UnboundedReceiver<String>,
    sent: Vec<String>,
    events: EventTx,
}

/// Records every socket the session opens. Tests play the server by
/// injecting [`SocketEvent`]s and reading what the client wrote.
#[derive(Clone, Default)]
pub struct MockConnector {
    sockets: Arc<Mutex<Vec<MockSocket>>>,
}

impl Connector for MockConnector {
    fn open(&self, _url: &str, generation: u64, events: EventTx) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sockets.lock().unwrap().push(MockSocket {
            generation,
            outbound: rx,
            sent: Vec::new(),
            events,
        });
        SocketHandle::new(tx, None)
    }
}

impl MockConnector {
    /// Number of sockets opened so far.
    pub fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn latest_generation(&self) -> u64 {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .map(|s| s.generation)
            .expect("no socket opened")
    }

    /// Raw text written to the socket of `generation`, in order.
    pub fn sent(&self, generation: u64) -> Vec<String> {
        let mut sockets = self.sockets.lock().unwrap();
        let socket = sockets
            .iter_mut()
            .find(|s| s.generation == generation)
            .expect("unknown generation");
        while let Ok(text) = socket.outbound.try_recv() {
            socket.sent.push(text);
        }
        socket.sent.clone()
    }

    /// Everything written to any socket, parsed as JSON.
    pub fn all_frames(&self) -> Vec<Value> {
        let generations: Vec<u64> = self
            .sockets
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.generation)
            .collect();
        generations
            .into_iter()
            .flat_map(|g| self.sent(g))
            .map(|t| serde_json::from_str(&t).expect("client sent invalid JSON"))
            .collect()
    }

    /// Frames of the given `type`, across all sockets.
    pub fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.all_frames()
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }

    /// Posts `event` as if the socket of `generation` produced it.
    pub fn emit(&self, generation: u64, event: SocketEvent) {
        let sockets = self.sockets.lock().unwrap();
        let socket = sockets
            .iter()
            .find(|s| s.generation == generation)
            .expect("unknown generation");
        let _ = socket
            .events
            .send(SessionEvent::Socket { generation, event });
    }
}
