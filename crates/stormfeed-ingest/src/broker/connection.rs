//! Reference-counted broker connection shared by every source task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BrokerResult, MessageBroker};

#[derive(Debug, Default)]
struct LeaseState {
    ref_count: usize,
    connected: bool,
}

/// Owns the process-wide broker connection.
///
/// `acquire` connects on first use and `release` disconnects once the last
/// lease is returned. The connect runs while the state lock is held, so
/// callers arriving during an in-flight connect wait for it instead of
/// starting a second one.
pub struct ConnectionManager {
    broker: Arc<dyn MessageBroker>,
    state: Mutex<LeaseState>,
    connected: AtomicBool,
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            state: Mutex::new(LeaseState::default()),
            connected: AtomicBool::new(false),
        }
    }

    /// Take a lease on the connection, connecting if needed
    ///
    /// On error no lease is taken and the caller must not call `release`.
    pub async fn acquire(&self) -> BrokerResult<Arc<dyn MessageBroker>> {
        let mut state = self.state.lock().await;

        if !state.connected {
            debug!("Connecting to broker");
            self.broker.connect().await?;
            state.connected = true;
            self.connected.store(true, Ordering::Release);
            info!("Broker connection established");
        }

        state.ref_count += 1;
        debug!(ref_count = state.ref_count, "Broker lease acquired");
        Ok(Arc::clone(&self.broker))
    }

    /// Return a lease; the last one out disconnects
    pub async fn release(&self) {
        let mut state = self.state.lock().await;

        if state.ref_count == 0 {
            warn!("Broker lease released with no outstanding leases");
            return;
        }

        state.ref_count -= 1;
        debug!(ref_count = state.ref_count, "Broker lease released");

        if state.ref_count == 0 && state.connected {
            if let Err(e) = self.broker.disconnect().await {
                warn!(error = %e, "Broker disconnect failed");
            }
            state.connected = false;
            self.connected.store(false, Ordering::Release);
            info!("Broker connection closed");
        }
    }

    /// Whether the broker connection is currently established
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn ref_count(&self) -> usize {
        self.state.lock().await.ref_count
    }

    /// Like [`acquire`](Self::acquire), but the lease is returned when dropped
    pub async fn lease(self: &Arc<Self>) -> BrokerResult<Lease> {
        let broker = self.acquire().await?;
        Ok(Lease {
            manager: Arc::clone(self),
            broker,
            active: true,
        })
    }
}

/// A held reference on the shared connection
///
/// Prefer [`Lease::release`]. A lease dropped without it (a cancelled or
/// timed-out task) is released on a spawned task.
pub struct Lease {
    manager: Arc<ConnectionManager>,
    broker: Arc<dyn MessageBroker>,
    active: bool,
}

impl Lease {
    pub fn broker(&self) -> &dyn MessageBroker {
        self.broker.as_ref()
    }

    pub async fn release(mut self) {
        self.active = false;
        self.manager.release().await;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let manager = Arc::clone(&self.manager);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { manager.release().await });
            },
            Err(_) => warn!("Broker lease dropped outside a runtime; lease leaked"),
        }
    }
}
