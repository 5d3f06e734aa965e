use alloy::primitives::Address;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::eth;
use crate::rpc::{JsonRpc, RpcError};

/// Next-nonce state for a single sender.
///
/// After a rejected submission the cached value is untrusted: the node may or may not
/// have consumed it. A stale slot must be resynchronised from the chain before the
/// sender submits again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceSlot {
    next: u64,
    stale: bool,
}

impl NonceSlot {
    pub fn new(next: u64) -> Self {
        Self { next, stale: false }
    }

    /// The nonce to use for the next submission, or `None` while the slot is stale.
    pub fn peek(&self) -> Option<u64> {
        (!self.stale).then_some(self.next)
    }

    /// Record an accepted submission.
    pub fn advance(&mut self) -> u64 {
        debug_assert!(!self.stale, "advanced a stale nonce");
        self.next += 1;
        self.next
    }

    /// Record a rejected submission.
    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Overwrite with the node's transaction count for this sender.
    pub async fn resync<R: JsonRpc>(&mut self, rpc: &R, address: Address) -> Result<u64, RpcError> {
        let next = eth::transaction_count(rpc, address).await?;
        debug!(%address, previous = self.next, next, "resynced nonce");
        self.next = next;
        self.stale = false;
        Ok(next)
    }

    /// The nonce to use next, resynchronising first if the slot is stale.
    pub async fn ready<R: JsonRpc>(&mut self, rpc: &R, address: Address) -> Result<u64, RpcError> {
        match self.peek() {
            Some(nonce) => Ok(nonce),
            None => self.resync(rpc, address).await,
        }
    }
}

/// One nonce slot per sender, indexed by sender id. Owned by a single dispatch loop.
#[derive(Debug, Clone, Default)]
pub struct NonceTracker {
    slots: Vec<NonceSlot>,
}

impl NonceTracker {
    pub fn new(initial: impl IntoIterator<Item = u64>) -> Self {
        Self { slots: initial.into_iter().map(NonceSlot::new).collect() }
    }

    /// Fetch the starting nonce of every sender.
    pub async fn fetch<R: JsonRpc>(rpc: &R, senders: &[Address]) -> Result<Self, RpcError> {
        let mut slots = Vec::with_capacity(senders.len());
        for &address in senders {
            let nonce = eth::transaction_count(rpc, address).await?;
            debug!(%address, nonce, "initial nonce");
            slots.push(NonceSlot::new(nonce));
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_mut(&mut self, id: usize) -> &mut NonceSlot {
        &mut self.slots[id]
    }

    /// Cached next nonce per sender, ignoring staleness.
    pub fn snapshot(&self) -> Vec<u64> {
        self.slots.iter().map(|slot| slot.next).collect()
    }

    /// Split into independently lockable slots for concurrent request handlers.
    pub fn into_shared(self) -> SharedNonces {
        SharedNonces { slots: self.slots.into_iter().map(Mutex::new).collect() }
    }
}

/// Per-sender exclusive ownership of nonce slots.
///
/// Holding the guard for a sender is the right to submit from that sender, so two
/// concurrent requests can never hand out the same nonce.
#[derive(Debug)]
pub struct SharedNonces {
    slots: Vec<Mutex<NonceSlot>>,
}

impl SharedNonces {
    pub async fn acquire(&self, id: usize) -> MutexGuard<'_, NonceSlot> {
        self.slots[id].lock().await
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
