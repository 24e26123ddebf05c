//! Transaction counting and the stabilisation gate.
//!
//! Transactions run concurrently. When the last one leaves, the gate closes,
//! the stabilisation hook runs once, and the gate reopens. Transactions that
//! try to start while the hook runs wait for it to finish.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Maintenance hook run each time the manager goes idle.
pub type StabilizeHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GateState {
    active: usize,
    stabilizing: bool,
}

pub(crate) struct TransactionGate {
    state: watch::Sender<GateState>,
    hook: Option<StabilizeHook>,
    stabilizations: AtomicU64,
}

impl TransactionGate {
    pub(crate) fn new(hook: Option<StabilizeHook>) -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self {
            state,
            hook,
            stabilizations: AtomicU64::new(0),
        }
    }

    /// Runs `work` as one transaction.
    ///
    /// If the returned future is dropped early the transaction still leaves
    /// the gate, and stabilisation is spawned onto the current runtime.
    pub(crate) async fn run<F: Future>(self: &Arc<Self>, work: F) -> F::Output {
        self.enter().await;
        let guard = ActiveGuard {
            gate: Some(self.clone()),
        };
        let output = work.await;
        guard.release().await;
        output
    }

    /// Waits until no transaction is active and no stabilisation is running.
    pub(crate) async fn stabilised(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|s| s.active == 0 && !s.stabilizing).await;
    }

    pub(crate) fn active(&self) -> usize {
        self.state.borrow().active
    }

    pub(crate) fn stabilizations(&self) -> u64 {
        self.stabilizations.load(Ordering::Acquire)
    }

    async fn enter(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let entered = self.state.send_if_modified(|s| {
                if s.stabilizing {
                    false
                } else {
                    s.active += 1;
                    true
                }
            });
            if entered {
                return;
            }
            trace!("transaction waiting for stabilisation");
            let _ = rx.wait_for(|s| !s.stabilizing).await;
        }
    }

    /// Leaves the gate. Returns true if the caller must run stabilisation.
    fn leave(&self) -> bool {
        let mut stabilize = false;
        self.state.send_modify(|s| {
            s.active = s.active.saturating_sub(1);
            if s.active == 0 {
                s.stabilizing = true;
                stabilize = true;
            }
        });
        stabilize
    }

    async fn stabilize(&self) {
        let _reopen = Reopen(self);
        if let Some(hook) = &self.hook {
            debug!("running stabilisation hook");
            hook().await;
        }
    }

    fn reopen(&self) {
        self.stabilizations.fetch_add(1, Ordering::AcqRel);
        self.state.send_modify(|s| s.stabilizing = false);
    }
}

/// Reopens the gate even if the hook is cancelled.
struct Reopen<'a>(&'a TransactionGate);

impl Drop for Reopen<'_> {
    fn drop(&mut self) {
        self.0.reopen();
    }
}

struct ActiveGuard {
    gate: Option<Arc<TransactionGate>>,
}

impl ActiveGuard {
    async fn release(mut self) {
        if let Some(gate) = self.gate.take() {
            if gate.leave() {
                gate.stabilize().await;
            }
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        if gate.leave() {
            match Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move { gate.stabilize().await });
                }
                Err(_) => gate.reopen(),
            }
        }
    }
}
