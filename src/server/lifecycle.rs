use crossbeam::utils::CachePadded;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    sync::{watch, Mutex, Notify},
    task::JoinHandle,
};
use tracing::{error, info};

/// Lifecycle of one server.
///
/// ```text
/// Created -> Running -> StopRequested -> Stopped
///               |
///               +----> Failed  (fatal accept fault or `Abort` rejection)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerState {
    /// Built, listener not yet serving.
    Created = 0,
    /// Accepting connections.
    Running = 1,
    /// `stop` was called; no new accepts, in-flight work is draining.
    StopRequested = 2,
    /// Drained and released.
    Stopped = 3,
    /// The acceptor ended on its own; in-flight work still completes.
    Failed = 4,
}

impl ServerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Running,
            2 => ServerState::StopRequested,
            3 => ServerState::Stopped,
            _ => ServerState::Failed,
        }
    }
}

#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: ServerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub(crate) fn load(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn store(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from -> to`; returns `false` if the state was not `from`.
    #[inline]
    pub(crate) fn advance(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

//

/// Count of connections being processed, with a wait-for-zero.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: CachePadded<AtomicUsize>,
    drained: Notify,
}

impl InFlight {
    /// Registers one connection until the guard is dropped.
    #[inline]
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }

    #[inline]
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once the count is zero.
    pub(crate) async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }

            notified.await;
        }
    }
}

#[must_use]
pub(crate) struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    #[inline]
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

//

/// The running side of one server, as kept by the manager.
pub(crate) struct ServerHandle {
    pub(crate) local_addr: SocketAddr,
    pub(crate) state: Arc<AtomicState>,
    pub(crate) in_flight: Arc<InFlight>,
    shutdown: watch::Sender<bool>,
    /// `None` once a `stop` has consumed it.
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    pub(crate) fn new(
        local_addr: SocketAddr,
        state: Arc<AtomicState>,
        in_flight: Arc<InFlight>,
        shutdown: watch::Sender<bool>,
        acceptor: JoinHandle<()>,
    ) -> Self {
        Self {
            local_addr,
            state,
            in_flight,
            shutdown,
            acceptor: Mutex::new(Some(acceptor)),
        }
    }

    /// Stops accepting, then waits for in-flight connections.
    ///
    /// Concurrent calls are serialized and all of them return after the drain.
    pub(crate) async fn stop(&self) {
        let mut acceptor = self.acceptor.lock().await;
        let Some(task) = acceptor.take() else {
            return;
        };

        self.state
            .advance(ServerState::Running, ServerState::StopRequested);
        let _ = self.shutdown.send(true);

        if let Err(err) = task.await {
            error!(address = %self.local_addr, error = %err, "acceptor task failed");
        }

        self.in_flight.drained().await;

        self.state
            .advance(ServerState::StopRequested, ServerState::Stopped);
        info!(address = %self.local_addr, state = ?self.state.load(), "server stopped");
    }
}
