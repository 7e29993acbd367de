//! Per-destination content-hash index.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use contentgate_state::ContentDigest;

#[derive(Debug, Default)]
struct DestinationIndex {
    published: HashSet<ContentDigest>,
    /// Reserved by an attempt that has not finished yet
    in_flight: HashSet<ContentDigest>,
}

/// Exact-hash duplicate index, shared by the quality gate (read) and the
/// resilience layer (write).
///
/// A hash is reserved before the outbound call and either committed on
/// success or released on any other outcome, so two concurrent attempts with
/// the same content can never both reach a publisher.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    inner: Mutex<HashMap<String, DestinationIndex>>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, DestinationIndex>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Published or in flight for this destination.
    pub fn contains(&self, destination: &str, hash: &ContentDigest) -> bool {
        self.lock()
            .get(destination)
            .is_some_and(|d| d.published.contains(hash) || d.in_flight.contains(hash))
    }

    pub fn is_published(&self, destination: &str, hash: &ContentDigest) -> bool {
        self.lock()
            .get(destination)
            .is_some_and(|d| d.published.contains(hash))
    }

    /// Reserve `hash` for an attempt. `false` when already present.
    pub fn reserve(&self, destination: &str, hash: &ContentDigest) -> bool {
        let mut inner = self.lock();
        let dest = inner.entry(destination.to_string()).or_default();
        if dest.published.contains(hash) || dest.in_flight.contains(hash) {
            return false;
        }
        dest.in_flight.insert(hash.clone());
        true
    }

    /// Mark a reserved hash as published.
    pub fn commit(&self, destination: &str, hash: &ContentDigest) {
        let mut inner = self.lock();
        let dest = inner.entry(destination.to_string()).or_default();
        dest.in_flight.remove(hash);
        dest.published.insert(hash.clone());
    }

    pub fn release(&self, destination: &str, hash: &ContentDigest) {
        if let Some(dest) = self.lock().get_mut(destination) {
            dest.in_flight.remove(hash);
        }
    }

    /// Load published pairs, e.g. from the publish ledger on start.
    pub fn hydrate<I>(&self, published: I) -> usize
    where
        I: IntoIterator<Item = (String, ContentDigest)>,
    {
        let mut inner = self.lock();
        let mut added = 0;
        for (destination, hash) in published {
            if inner.entry(destination).or_default().published.insert(hash) {
                added += 1;
            }
        }
        added
    }

    pub fn published_count(&self, destination: &str) -> usize {
        self.lock()
            .get(destination)
            .map_or(0, |d| d.published.len())
    }
}
