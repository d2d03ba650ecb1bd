use std::{borrow::BorrowMut, sync::Arc};

use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Cancellation signal source.
///
/// One handle exists per session, and the scheduler holds an additional
/// handle covering every session. Cancellation is cooperative: listeners
/// check the signal at step boundaries and between wait polls, so an
/// in-flight locator call always completes before the session stops.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Sender<()>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    /// Request cancellation of everything listening on this handle.
    pub fn cancel(&self) {
        if let Err(e) = self.sender.send(()) {
            // Fails when nobody is listening, which happens once the session
            // has already reached a terminal state.
            log::debug!("Cancel signal had no listeners: {e:?}");
        }
    }

    pub fn new_listener(&self) -> CancelListener {
        CancelListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct CancelListener {
    receiver: Arc<Mutex<Receiver<()>>>,
}

impl CancelListener {
    pub(crate) fn new(receiver: Receiver<()>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Point-in-time check of whether cancellation has been requested. Once
    /// this returns true the current unit of work should stop so the session
    /// can transition to `Aborted`.
    pub fn is_cancelled(&mut self) -> bool {
        match self.receiver.try_lock() {
            Ok(mut guard) => {
                match guard.try_recv() {
                    Ok(_) => true,
                    Err(tokio::sync::broadcast::error::TryRecvError::Closed) => true,
                    // Empty or lagged means no cancellation yet.
                    Err(_) => false,
                }
            }
            Err(_) => false,
        }
    }

    /// Wait until cancellation is requested. Safe to race against other
    /// futures so the signal can interrupt work that supports it.
    pub async fn wait_cancelled(&mut self) {
        self.receiver
            .borrow_mut()
            .lock()
            .await
            .recv()
            .await
            .expect("Failed to receive cancel signal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_sees_signal_sent_after_subscribing() {
        let handle = CancelHandle::new();
        let mut listener = handle.new_listener();

        assert!(!listener.is_cancelled());
        handle.cancel();
        assert!(listener.is_cancelled());
    }

    #[test]
    fn listeners_subscribed_before_the_signal_all_observe_it() {
        let handle = CancelHandle::new();
        let mut first = handle.new_listener();
        let mut second = handle.new_listener();

        handle.cancel();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
