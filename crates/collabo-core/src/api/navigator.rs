use std::sync::Arc;

use tokio::sync::watch;

/// Where the mediator sends the user once the session has expired.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self);
}

/// For callers that react to `RequestError::SessionExpired` themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect_to_login(&self) {}
}

/// A "login required" flag that views can watch.
///
/// Raised by the mediator on a 401; the login view lowers it again with
/// [`LoginSignal::reset`] once the user has signed back in.
#[derive(Debug, Clone)]
pub struct LoginSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for LoginSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_login_required(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }
}

impl Navigator for LoginSignal {
    fn redirect_to_login(&self) {
        self.tx.send_replace(true);
    }
}
