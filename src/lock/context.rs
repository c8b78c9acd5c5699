//! Cancellation for blocking waits
//!
//! A [`Context`] is cancelled when its [`CancelHandle`] is cancelled or
//! when every clone of the handle has been dropped. Waits select on the
//! context's channel, which disconnects at that moment.

use crossbeam_channel::{bounded, never, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Cancellation signal passed to blocking operations
#[derive(Debug, Clone)]
pub struct Context {
    done: Receiver<()>,
}

impl Context {
    /// A context that is never cancelled
    pub fn background() -> Self {
        Self { done: never() }
    }

    /// A cancellable context and the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = bounded(0);
        let handle = CancelHandle {
            tx: Arc::new(Mutex::new(Some(tx))),
        };
        (Self { done: rx }, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Channel that becomes ready once the context is cancelled
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the paired [`Context`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.lock().take();
    }
}
