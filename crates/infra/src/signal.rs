//! Translates process signals into run cancellation.
//!
//! SIGINT (ctrl-c) and, on unix, SIGTERM only flip the run's cancellation flag.
//! Workers and the dispatcher notice it at their next poll.

use std::io;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::jobs::RunControl;

/// Spawn a watcher thread that cancels `control` on the first signal.
///
/// The SIGTERM handler is registered before this returns; ctrl-c once the
/// watcher thread starts polling.
pub fn install(control: Arc<RunControl>) -> io::Result<thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    #[cfg(unix)]
    let mut terminate = {
        let _guard = runtime.enter();
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?
    };

    thread::Builder::new()
        .name("ebssnap-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                #[cfg(unix)]
                let received = tokio::select! {
                    res = tokio::signal::ctrl_c() => match res {
                        Ok(()) => "SIGINT",
                        Err(err) => {
                            warn!(error = %err, "failed to listen for ctrl-c");
                            return;
                        }
                    },
                    _ = terminate.recv() => "SIGTERM",
                };

                #[cfg(not(unix))]
                let received = match tokio::signal::ctrl_c().await {
                    Ok(()) => "ctrl-c",
                    Err(err) => {
                        warn!(error = %err, "failed to listen for ctrl-c");
                        return;
                    }
                };

                info!(signal = received, "signal received, cancelling run");
                control.cancel();
            });
        })
}
