//! Shared cancellation token threaded through both pipeline stages.
//!
//! The first executor error cancels the token with its message as the cause;
//! every other worker observes the flag between tasks and winds down. External
//! cancellation (e.g. SIGINT wired up by the binaries) uses the same flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::ArchiverError;

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    cause: Mutex<Option<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token without an error cause.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    /// Cancels the token, recording the error as the cause. The first cause
    /// wins; later calls only raise the flag.
    pub fn cancel_with(&self, cause: &ArchiverError) {
        {
            let mut slot = self.inner.cause.lock().unwrap();
            if slot.is_none() {
                *slot = Some(cause.to_string());
            }
        }
        self.inner.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// The cause recorded by the first `cancel_with`, if any.
    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().unwrap().clone()
    }
}
