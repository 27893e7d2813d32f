//! Terminates the platform once the process is asked to stop.
//!
//! Forks a task which waits for **CTRL+C**, **SIGHUP** or **SIGTERM** (as sent by docker when
//! stopping a container) and then invokes
//! [Platform::terminate](crate::platform::Platform::terminate).
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use crate::platform::Platform;
use crate::spawn;

/// Installs the signal listener for the given platform.
///
/// Note that this is called by the [Builder](crate::builder::Builder) unless disabled.
pub fn install(platform: Arc<Platform>) {
    spawn!(async move {
        let (mut sig_hup, mut sig_term) =
            match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
                (Ok(sig_hup), Ok(sig_term)) => (sig_hup, sig_term),
                (Err(error), _) | (_, Err(error)) => {
                    log::error!("Failed to install signal handlers: {}", error);
                    return;
                }
            };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("Received CTRL-C. Shutting down..."),
            _ = sig_hup.recv() => log::info!("Received SIGHUP. Shutting down..."),
            _ = sig_term.recv() => log::info!("Received SIGTERM. Shutting down..."),
        }

        platform.terminate();
    });
}
