//! Bridge Adapter Channel
//!
//! A bridge is a helper adapter that sits on the CAN link, parses the
//! wideband controller's serial stream itself and relays the payloads as
//! system messages. Hosts implement [`Bridge`] over their CAN client;
//! [`MemoryBridge`] is an in-process version.

use crate::error::WblError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound system message identifier
pub const SYSTEM_MSG: u32 = 0x123;

/// Inbound identifier carrying relayed wideband payloads
pub const SYSTEM_MSG_WBL_READING: u32 = 0x126;

/// Handshake enabling the relay stream for a vendor tag
pub fn handshake(tag: u8) -> [u8; 4] {
    [b'w', 1, tag, tag]
}

/// One frame received from or sent to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeFrame {
    pub id: u32,
    pub data: Vec<u8>,
    /// 29-bit identifier
    pub extended: bool,
}

impl BridgeFrame {
    pub fn system(data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: SYSTEM_MSG_WBL_READING,
            data: data.into(),
            extended: false,
        }
    }

    pub fn can(id: u32, data: impl Into<Vec<u8>>, extended: bool) -> Self {
        Self {
            id,
            data: data.into(),
            extended,
        }
    }
}

/// What a subscriber wants to receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    SystemMessage(u32),
    CanIds(Vec<u32>),
}

impl Subscription {
    pub fn matches(&self, id: u32) -> bool {
        match self {
            Subscription::SystemMessage(sys) => *sys == id,
            Subscription::CanIds(ids) => ids.contains(&id),
        }
    }
}

/// Host-side handle to a bridge adapter
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Send a payload on the system message channel
    async fn send_system(&self, payload: &[u8]) -> Result<(), WblError>;

    /// Subscribe to frames; dropping the receiver releases the subscription
    fn subscribe(&self, subscription: Subscription, capacity: usize) -> mpsc::Receiver<BridgeFrame>;
}

struct Subscriber {
    subscription: Subscription,
    tx: mpsc::Sender<BridgeFrame>,
}

/// In-process bridge: frames published here reach matching subscribers,
/// system messages sent through it are recorded.
#[derive(Default)]
pub struct MemoryBridge {
    subscribers: Mutex<Vec<Subscriber>>,
    sent: Mutex<Vec<Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `send_system` fail, as a disconnected adapter would
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Deliver a frame to every matching subscriber, waiting for channel
    /// space rather than dropping. Returns the number of receivers reached.
    pub async fn publish(&self, frame: BridgeFrame) -> usize {
        let targets: Vec<mpsc::Sender<BridgeFrame>> = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.retain(|s| !s.tx.is_closed());
            subscribers
                .iter()
                .filter(|s| s.subscription.matches(frame.id))
                .map(|s| s.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(frame.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// System messages sent so far, oldest first
    pub fn sent(&self) -> Vec<Vec<u8>> {
        lock(&self.sent).clone()
    }

    /// Live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl Bridge for MemoryBridge {
    async fn send_system(&self, payload: &[u8]) -> Result<(), WblError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(WblError::Bridge("adapter offline".to_string()));
        }
        debug!("bridge: system message {:02X?}", payload);
        lock(&self.sent).push(payload.to_vec());
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription, capacity: usize) -> mpsc::Receiver<BridgeFrame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        lock(&self.subscribers).push(Subscriber { subscription, tx });
        rx
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
