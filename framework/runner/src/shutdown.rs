use gatling_influx_core::prelude::ShutdownHandle;
use tokio::signal;

/// Turn Ctrl-C into a shutdown of everything listening on the returned handle.
pub(crate) fn start_shutdown_listener(runtime: &tokio::runtime::Runtime) -> ShutdownHandle {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for the Ctrl-C signal: {e}");
            return;
        }
        log::info!("Received shutdown signal, shutting down...");
        listener_handle.shutdown();
    });

    handle
}
