use std::sync::Arc;

use tokio::sync::watch;

/// Trigger side of a cancellation signal.
///
/// Each stage of the pipeline owns its own handle so that stages can be stopped one at a time.
/// Once triggered, the signal stays set: listeners created after the call still observe it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn shutdown(&self) {
        // `send_replace` succeeds even when nobody is listening yet.
        let already_shutdown = self.sender.send_replace(true);
        if !already_shutdown {
            log::debug!("Shutdown signal sent");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Point in time check if the shutdown signal has been received. If this returns true then the
    /// current unit of work should be finished and the task should exit.
    pub fn should_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the shutdown signal to be received. It is safe to race this with another future so
    /// that the shutdown signal can be used to cancel other work in progress.
    ///
    /// If every [ShutdownHandle] has been dropped then nobody can send the signal any more, and this
    /// resolves immediately.
    pub async fn wait_for_shutdown(&mut self) {
        if self.receiver.wait_for(|stop| *stop).await.is_err() {
            log::debug!("Shutdown handle dropped, treating as a shutdown signal");
        }
    }
}

/// Returned when a long running operation is abandoned because the user asked the process to stop.
///
/// This is not a failure. Callers check for it with `err.is::<ShutdownSignalError>()` and exit
/// cleanly without reporting an error.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct ShutdownSignalError {
    msg: String,
}

impl Default for ShutdownSignalError {
    fn default() -> Self {
        Self {
            msg: "Process stopped by user".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn listener_created_after_shutdown_sees_signal() {
        let handle = ShutdownHandle::new();
        handle.shutdown();

        let mut listener = handle.new_listener();
        assert!(listener.should_shutdown());
        tokio::time::timeout(Duration::from_secs(1), listener.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_resolves_when_signalled() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        assert!(!listener.should_shutdown());

        let waiter = tokio::spawn(async move { listener.wait_for_shutdown().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn dropped_handle_releases_waiters() {
        let handle = ShutdownHandle::new();
        let mut listener = handle.new_listener();
        drop(handle);

        tokio::time::timeout(Duration::from_secs(1), listener.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn shutdown_signal_error_message() {
        assert_eq!(
            ShutdownSignalError::default().to_string(),
            "Process stopped by user"
        );
    }
}
