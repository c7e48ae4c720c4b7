//! Input bridge
//!
//! Single-slot rendezvous between a running program that wants a line of
//! input and the UI that eventually supplies it. The waiting side is resumed
//! only by `supply_input`; there is no timeout and no polling.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("An input request is already pending")]
    ConcurrentInputRequest,

    #[error("No input request is pending")]
    NoPendingInput,

    #[error("Input request was abandoned")]
    Abandoned,
}

struct PendingInput {
    prompt: String,
    reply: oneshot::Sender<String>,
}

/// Resolves to the supplied line once `supply_input` is called
#[derive(Debug)]
pub struct InputReply {
    rx: oneshot::Receiver<String>,
}

impl Future for InputReply {
    type Output = Result<String, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.map_err(|_| BridgeError::Abandoned))
    }
}

/// Holds at most one pending input request
#[derive(Default)]
pub struct InputBridge {
    slot: Mutex<Option<PendingInput>>,
}

impl InputBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for input and get a future for the answer
    pub fn request_input(&self, prompt: &str) -> Result<InputReply, BridgeError> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(BridgeError::ConcurrentInputRequest);
        }
        let (reply, rx) = oneshot::channel();
        *slot = Some(PendingInput {
            prompt: prompt.to_string(),
            reply,
        });
        tracing::debug!("Input requested: {:?}", prompt);
        Ok(InputReply { rx })
    }

    /// Resolve the pending request with `value`
    pub fn supply_input(&self, value: String) -> Result<(), BridgeError> {
        let pending = self.lock().take().ok_or(BridgeError::NoPendingInput)?;
        pending
            .reply
            .send(value)
            .map_err(|_| BridgeError::Abandoned)
    }

    /// Drop the pending request; its waiter resolves to `Abandoned`
    pub fn cancel(&self) -> bool {
        self.lock().take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    pub fn pending_prompt(&self) -> Option<String> {
        self.lock().as_ref().map(|p| p.prompt.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingInput>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_then_supply() {
        let bridge = InputBridge::new();
        let reply = bridge.request_input("Name?").unwrap();
        assert_eq!(bridge.pending_prompt().as_deref(), Some("Name?"));

        bridge.supply_input("Ada".to_string()).unwrap();
        assert!(!bridge.is_pending());
        assert_eq!(reply.await, Ok("Ada".to_string()));
    }

    #[test]
    fn test_concurrent_request_rejected() {
        let bridge = InputBridge::new();
        let _reply = bridge.request_input("first").unwrap();
        assert_eq!(
            bridge.request_input("second").unwrap_err(),
            BridgeError::ConcurrentInputRequest
        );
        // The original request is untouched
        assert_eq!(bridge.pending_prompt().as_deref(), Some("first"));
    }

    #[test]
    fn test_supply_without_request() {
        let bridge = InputBridge::new();
        assert_eq!(
            bridge.supply_input("x".to_string()),
            Err(BridgeError::NoPendingInput)
        );
    }

    #[tokio::test]
    async fn test_cancel_abandons_waiter() {
        let bridge = InputBridge::new();
        let reply = bridge.request_input("?").unwrap();
        assert!(bridge.cancel());
        assert_eq!(reply.await, Err(BridgeError::Abandoned));
        assert!(!bridge.cancel());
    }

    #[test]
    fn test_supply_after_waiter_dropped() {
        let bridge = InputBridge::new();
        drop(bridge.request_input("?").unwrap());
        assert_eq!(
            bridge.supply_input("late".to_string()),
            Err(BridgeError::Abandoned)
        );
        assert!(!bridge.is_pending());
    }
}
