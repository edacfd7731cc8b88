use anyhow::{Context, Result};
use std::thread;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl+C, or SIGTERM on Unix.
///
/// The acquisition loop is blocking, so the signal listener gets its own
/// thread with a single-threaded runtime. Handlers are registered before
/// this returns, so a signal arriving right after startup is still caught.
pub fn install_shutdown_handler(token: CancellationToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start signal handler runtime")?;

    let signals = {
        let _guard = runtime.enter();
        ShutdownSignals::register().context("Failed to register signal handlers")?
    };

    thread::Builder::new()
        .name("shutdown-signal".to_string())
        .spawn(move || runtime.block_on(wait_for_shutdown(signals, token)))
        .context("Failed to spawn signal handler thread")?;

    Ok(())
}

async fn wait_for_shutdown(mut signals: ShutdownSignals, token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = signals.recv() => {}
    }

    log::info!("Received shutdown signal, stopping after the current cycle");
    token.cancel();
}

#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(windows)]
struct ShutdownSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(windows)]
impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    async fn recv(&mut self) {
        self.ctrl_c.recv().await;
    }
}
