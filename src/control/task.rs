use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A background task that exists at most once.
///
/// `restart` cancels the running instance before spawning its replacement, so
/// two publishers never race on the same signal. Cancellation is normal
/// control flow and only shows up at trace level.
pub struct RestartableTask {
    name: &'static str,
    current: Mutex<Option<Running>>,
}

impl RestartableTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
        }
    }

    /// Must be called from inside a tokio runtime.
    pub fn restart<F, Fut>(&self, make: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut current = self.lock();
        if let Some(previous) = current.take() {
            Self::stop(self.name, previous);
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(make(token.clone()));
        trace!(task = self.name, "spawned");
        *current = Some(Running { token, handle });
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            Self::stop(self.name, previous);
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .map_or(false, |running| !running.handle.is_finished())
    }

    fn stop(name: &'static str, running: Running) {
        running.token.cancel();
        running.handle.abort();
        trace!(task = name, "cancelled");
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RestartableTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
