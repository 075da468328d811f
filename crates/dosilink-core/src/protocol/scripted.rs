//! Scripted transport
//!
//! An in-memory [`Transport`] that answers each write with the next canned
//! reply. Lets the protocol layers run without hardware, and lets tests
//! inspect exactly what was sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{CommunicationError, Transport};

enum Reply {
    Bytes(Vec<u8>),
    /// Send back whatever was written
    Echo,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    open: bool,
    releases: usize,
}

/// Transport that replays canned replies
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

/// Inspection handle that stays valid after the transport is boxed away
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

fn lock(script: &Arc<Mutex<Script>>) -> MutexGuard<'_, Script> {
    script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedTransport {
    /// Create an open transport with no replies queued
    pub fn new() -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script {
            open: true,
            ..Default::default()
        }));
        (
            Self {
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }
}

impl ScriptHandle {
    /// Queue the bytes delivered after the next unanswered write.
    /// An empty reply makes the device stay silent for that write.
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        lock(&self.script)
            .replies
            .push_back(Reply::Bytes(reply.into()));
    }

    /// Answer the next unanswered write with its own bytes
    pub fn push_echo(&self) {
        lock(&self.script).replies.push_back(Reply::Echo);
    }

    /// Every write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.script).writes.clone()
    }

    /// Number of writes so far
    pub fn write_count(&self) -> usize {
        lock(&self.script).writes.len()
    }

    /// Replies not yet delivered
    pub fn pending_replies(&self) -> usize {
        lock(&self.script).replies.len()
    }

    /// Whether the transport is still open
    pub fn is_open(&self) -> bool {
        lock(&self.script).open
    }

    /// How many times the handle was actually released
    pub fn releases(&self) -> usize {
        lock(&self.script).releases
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), CommunicationError> {
        let mut script = lock(&self.script);
        if !script.open {
            return Err(CommunicationError::Closed);
        }
        script.writes.push(data.to_vec());
        match script.replies.pop_front() {
            Some(Reply::Bytes(reply)) => script.rx.extend(reply),
            Some(Reply::Echo) => script.rx.extend(data.iter().copied()),
            None => {}
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>, CommunicationError> {
        let mut script = lock(&self.script);
        if !script.open {
            return Err(CommunicationError::Closed);
        }
        if script.rx.len() < n {
            // Whatever trickled in is consumed before the deadline passes
            let received = script.rx.len();
            script.rx.clear();
            return Err(CommunicationError::Timeout {
                expected: n,
                received,
            });
        }
        Ok(script.rx.drain(..n).collect())
    }

    fn clear_input(&mut self) -> Result<(), CommunicationError> {
        lock(&self.script).rx.clear();
        Ok(())
    }

    fn close(&mut self) {
        let mut script = lock(&self.script);
        if script.open {
            script.open = false;
            script.releases += 1;
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.script).open
    }
}
