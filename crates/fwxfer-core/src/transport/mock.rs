//! Scripted transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::traits::{Transport, TransportError};

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Return these bytes as the reply.
    Data(Vec<u8>),
    /// Fail the exchange with a transport timeout.
    Timeout,
    /// Fail the exchange as if the device was unplugged.
    Disconnect,
}

/// A captured request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub bytes: Vec<u8>,
    pub expected_reply_len: usize,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    fallback: Option<Vec<u8>>,
    requests: Vec<MockRequest>,
    disconnected: bool,
}

/// Mock transport for unit testing engine and orchestrator logic.
///
/// Clones share state, so a test can keep a handle for inspection after
/// handing the transport to a session.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply to be returned by the next transaction.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.state().replies.push_back(MockReply::Data(bytes.to_vec()));
    }

    pub fn queue(&self, reply: MockReply) {
        self.state().replies.push_back(reply);
    }

    /// Reply returned whenever the queue is empty.
    pub fn set_fallback_reply(&self, bytes: &[u8]) {
        self.state().fallback = Some(bytes.to_vec());
    }

    /// Get all captured requests.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Clear captured requests.
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        self.state().disconnected = false;
    }
}

impl Transport for MockTransport {
    fn transact(
        &mut self,
        request: &[u8],
        expected_reply_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state();
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        state.requests.push(MockRequest {
            bytes: request.to_vec(),
            expected_reply_len,
            timeout,
        });

        if expected_reply_len == 0 {
            return Ok(Vec::new());
        }

        let reply = match state.replies.pop_front() {
            Some(reply) => reply,
            None => match &state.fallback {
                Some(bytes) => MockReply::Data(bytes.clone()),
                None => MockReply::Timeout,
            },
        };
        match reply {
            MockReply::Data(bytes) => Ok(bytes),
            MockReply::Timeout => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            MockReply::Disconnect => {
                state.disconnected = true;
                Err(TransportError::Disconnected)
            }
        }
    }

    fn is_connected(&self) -> bool {
        !self.state().disconnected
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
