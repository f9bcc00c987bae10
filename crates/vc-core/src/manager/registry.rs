//! Active call registry

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::event::{CallId, ProviderCallId};
use crate::record::CallRecord;
use crate::{Error, Result};

/// How many event ids (and retired call ids) are remembered for deduplication
const DEDUP_WINDOW: usize = 10_000;

/// Insertion-ordered set that forgets its oldest entries past a capacity
#[derive(Debug, Default)]
struct BoundedSet {
    members: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            members: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    fn insert(&mut self, key: &str) {
        if !self.members.insert(key.to_string()) {
            return;
        }
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    fn clear(&mut self) {
        self.members.clear();
        self.order.clear();
    }
}

/// Sender half of a transcript-wait future
pub(crate) type TranscriptWaiter = oneshot::Sender<Result<String>>;

/// In-memory state owned by one call manager.
///
/// Holds the active calls, the provider-id index, the global dedup window,
/// the max-duration timers and the pending transcript waiters.
#[derive(Debug)]
pub struct CallRegistry {
    calls: HashMap<CallId, CallRecord>,
    provider_index: HashMap<ProviderCallId, CallId>,
    seen_events: BoundedSet,
    retired: BoundedSet,
    timers: HashMap<CallId, AbortHandle>,
    waiters: HashMap<CallId, TranscriptWaiter>,
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
            provider_index: HashMap::new(),
            seen_events: BoundedSet::with_capacity(DEDUP_WINDOW),
            retired: BoundedSet::with_capacity(DEDUP_WINDOW),
            timers: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn get(&self, call_id: &str) -> Option<&CallRecord> {
        self.calls.get(call_id)
    }

    pub fn get_mut(&mut self, call_id: &str) -> Option<&mut CallRecord> {
        self.calls.get_mut(call_id)
    }

    pub fn calls(&self) -> impl Iterator<Item = &CallRecord> {
        self.calls.values()
    }

    /// Resolve by call id first, then by provider call id
    pub fn resolve(&self, call_id: &str, provider_call_id: Option<&str>) -> Option<CallId> {
        if self.calls.contains_key(call_id) {
            return Some(call_id.to_string());
        }
        provider_call_id.and_then(|p| self.provider_index.get(p).cloned())
    }

    /// Whether either identifier belongs to a call that already ended
    pub fn is_retired(&self, call_id: &str, provider_call_id: Option<&str>) -> bool {
        (!call_id.is_empty() && self.retired.contains(call_id))
            || provider_call_id.is_some_and(|p| self.retired.contains(p))
    }

    pub fn insert(&mut self, record: CallRecord) {
        if let Some(provider_call_id) = &record.provider_call_id {
            self.provider_index
                .insert(provider_call_id.clone(), record.call_id.clone());
        }
        self.calls.insert(record.call_id.clone(), record);
    }

    pub fn index_provider_call(&mut self, provider_call_id: &str, call_id: &str) {
        self.provider_index
            .insert(provider_call_id.to_string(), call_id.to_string());
    }

    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen_events.contains(event_id)
    }

    pub fn mark_seen(&mut self, event_id: &str) {
        self.seen_events.insert(event_id);
    }

    /// Remove a call from both indices, cancel its timer and fail its waiter
    pub fn retire(&mut self, call_id: &str) -> Option<CallRecord> {
        let record = self.calls.remove(call_id)?;
        if let Some(provider_call_id) = &record.provider_call_id {
            self.provider_index.remove(provider_call_id);
            self.retired.insert(provider_call_id);
        }
        self.retired.insert(call_id);
        self.cancel_timer(call_id);
        self.reject_waiter(call_id, Error::CallEnded(call_id.to_string()));
        Some(record)
    }

    pub fn has_timer(&self, call_id: &str) -> bool {
        self.timers.contains_key(call_id)
    }

    pub fn set_timer(&mut self, call_id: &str, handle: AbortHandle) {
        if let Some(previous) = self.timers.insert(call_id.to_string(), handle) {
            previous.abort();
        }
    }

    /// Claim the timer for a firing expiry; `None` means it was cancelled
    pub fn take_timer(&mut self, call_id: &str) -> Option<AbortHandle> {
        self.timers.remove(call_id)
    }

    /// Aborting a timer that already fired is a no-op
    pub fn cancel_timer(&mut self, call_id: &str) {
        if let Some(handle) = self.timers.remove(call_id) {
            handle.abort();
        }
    }

    /// Register the single allowed transcript waiter for a call
    pub fn register_waiter(&mut self, call_id: &str) -> Result<oneshot::Receiver<Result<String>>> {
        if let Some(existing) = self.waiters.get(call_id) {
            if !existing.is_closed() {
                return Err(Error::TranscriptPending(call_id.to_string()));
            }
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(call_id.to_string(), tx);
        Ok(rx)
    }

    pub fn has_waiter(&self, call_id: &str) -> bool {
        self.waiters.get(call_id).is_some_and(|w| !w.is_closed())
    }

    pub fn resolve_waiter(&mut self, call_id: &str, transcript: &str) -> bool {
        match self.waiters.remove(call_id) {
            Some(tx) => tx.send(Ok(transcript.to_string())).is_ok(),
            None => false,
        }
    }

    pub fn reject_waiter(&mut self, call_id: &str, error: Error) -> bool {
        match self.waiters.remove(call_id) {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Drop a waiter without settling it (its receiver was abandoned)
    pub fn remove_waiter(&mut self, call_id: &str) {
        self.waiters.remove(call_id);
    }

    /// Tear down all state and return the calls that were active
    pub fn drain(&mut self) -> Vec<CallRecord> {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        for (call_id, tx) in self.waiters.drain() {
            let _ = tx.send(Err(Error::CallEnded(call_id)));
        }
        self.provider_index.clear();
        self.seen_events.clear();
        self.retired.clear();
        self.calls.drain().map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_provider_id() {
        let mut registry = CallRegistry::new();
        let mut record = CallRecord::outbound("mock", "+1", "+2");
        record.provider_call_id = Some("CA1".to_string());
        let call_id = record.call_id.clone();
        registry.insert(record);

        assert_eq!(registry.resolve("unknown", Some("CA1")), Some(call_id.clone()));
        assert_eq!(registry.resolve(&call_id, None), Some(call_id));
        assert_eq!(registry.resolve("unknown", Some("CA2")), None);
    }

    #[test]
    fn test_retire_clears_indices() {
        let mut registry = CallRegistry::new();
        let mut record = CallRecord::outbound("mock", "+1", "+2");
        record.provider_call_id = Some("CA1".to_string());
        let call_id = record.call_id.clone();
        registry.insert(record);

        let mut rx = registry.register_waiter(&call_id).unwrap();
        assert!(registry.retire(&call_id).is_some());

        assert!(registry.is_empty());
        assert_eq!(registry.resolve("x", Some("CA1")), None);
        assert!(registry.is_retired(&call_id, None));
        assert!(registry.is_retired("", Some("CA1")));
        assert!(matches!(rx.try_recv(), Ok(Err(Error::CallEnded(_)))));
    }

    #[test]
    fn test_single_waiter_per_call() {
        let mut registry = CallRegistry::new();
        let _rx = registry.register_waiter("c1").unwrap();
        assert!(matches!(
            registry.register_waiter("c1"),
            Err(Error::TranscriptPending(_))
        ));
    }

    #[test]
    fn test_abandoned_waiter_can_be_replaced() {
        let mut registry = CallRegistry::new();
        let rx = registry.register_waiter("c1").unwrap();
        drop(rx);
        assert!(registry.register_waiter("c1").is_ok());
    }

    #[test]
    fn test_dedup_window_is_bounded() {
        let mut set = BoundedSet::with_capacity(2);
        set.insert("a");
        set.insert("b");
        set.insert("c");
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("c"));
    }
}
