use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    /// Interrupted once: nothing new starts, running transfers finish.
    Draining,
    Terminated,
}

/// What the signal listener should do about the interrupt it just saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Nothing was running, leave right away.
    Exit,
    /// Let the current batch drain.
    Drain,
    /// Second interrupt, leave without waiting.
    ForceExit,
}

/// Owns the process-wide cancellation token and the interrupt state machine.
pub struct ShutdownCoordinator {
    state: Mutex<ShutdownState>,
    busy: AtomicBool,
    cancel: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ShutdownState::Running),
            busy: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ShutdownState {
        *self.lock()
    }

    /// Marks whether a batch is in flight.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn interrupt(&self) -> InterruptAction {
        let mut state = self.lock();
        match *state {
            ShutdownState::Running if self.busy.load(Ordering::SeqCst) => {
                self.cancel.cancel();
                *state = ShutdownState::Draining;
                InterruptAction::Drain
            }
            ShutdownState::Running => {
                *state = ShutdownState::Terminated;
                InterruptAction::Exit
            }
            ShutdownState::Draining | ShutdownState::Terminated => {
                *state = ShutdownState::Terminated;
                InterruptAction::ForceExit
            }
        }
    }

    /// Called once a batch has settled. Returns `true` if the process should
    /// stop instead of asking for more work.
    pub fn batch_settled(&self) -> bool {
        self.set_busy(false);
        let mut state = self.lock();
        if *state == ShutdownState::Draining {
            *state = ShutdownState::Terminated;
        }
        *state == ShutdownState::Terminated || self.cancel.is_cancelled()
    }

    /// Spawns the task that reacts to Ctrl-C / SIGTERM.
    pub fn listen(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let mut interrupts = Interrupts::new()?;
        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while interrupts.next().await {
                match coordinator.interrupt() {
                    InterruptAction::Exit => {
                        info!("👋 Interrupted, exiting");
                        std::process::exit(0);
                    }
                    InterruptAction::Drain => {
                        info!("🛑 Shutdown signal received. Waiting for download workers to finish (interrupt again to force)");
                    }
                    InterruptAction::ForceExit => {
                        warn!("⚠️  Forced exit, unfinished downloads are left as .part files");
                        std::process::exit(0);
                    }
                }
            }
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShutdownState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(unix)]
struct Interrupts {
    term: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Interrupts {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> bool {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.is_ok(),
            received = self.term.recv() => received.is_some(),
        }
    }
}

#[cfg(not(unix))]
struct Interrupts;

#[cfg(not(unix))]
impl Interrupts {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> bool {
        tokio::signal::ctrl_c().await.is_ok()
    }
}
