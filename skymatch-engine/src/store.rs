//! Snapshot-isolated repository of active skymaps.
//!
//! The store is the engine's only shared mutable state. It is read-mostly:
//! many concurrent snapshot/lookup readers, rare serialized writers
//! (ingest and the expiry sweep). Maps are handed out as `Arc<Skymap>`, so
//! a snapshot taken before a sweep keeps consistent access to its maps for
//! as long as the caller holds it.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::skymap::{Skymap, SkymapMetadata};
use skymatch_core::UtcInstant;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct SkymapStore {
    maps: RwLock<HashMap<String, Arc<Skymap>>>,
    probability_tolerance: f64,
    stale_grace_s: f64,
}

impl SkymapStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            maps: RwLock::new(HashMap::new()),
            probability_tolerance: config.probability_tolerance,
            stale_grace_s: config.stale_grace_s,
        }
    }

    /// Validate and store a skymap, replacing any previous version with the
    /// same id.
    ///
    /// The map is fully built (validation, normalization, credible-level
    /// table) before the write lock is taken, so a concurrent `lookup`
    /// never observes a partially built map: it sees either the old version
    /// or the finished new one.
    ///
    /// A map already past `expires_at` is admitted only within the stale
    /// grace window, to serve late-arriving alerts; beyond that it is
    /// rejected with `StaleSkymap`.
    pub fn insert(
        &self,
        raw_probabilities: Vec<f64>,
        metadata: SkymapMetadata,
        now: UtcInstant,
    ) -> EngineResult<Arc<Skymap>> {
        let map = Skymap::build(raw_probabilities, metadata, self.probability_tolerance)?;
        self.insert_built(map, now)
    }

    /// Store an already-built map, replacing any previous version with the
    /// same id.
    ///
    /// Split out from [`insert`](Self::insert) so callers can run the
    /// expensive build step elsewhere (e.g. under a time budget on a
    /// blocking thread) and commit only on success.
    pub fn insert_built(&self, map: Skymap, now: UtcInstant) -> EngineResult<Arc<Skymap>> {
        if map.expires_at <= now {
            let expired_for_s = now.seconds_since(&map.expires_at);
            if expired_for_s > self.stale_grace_s {
                return Err(EngineError::stale_skymap(map.id, expired_for_s));
            }
            tracing::warn!(
                skymap_id = %map.id,
                expired_for_s,
                "admitting already-expired skymap within grace window"
            );
        }

        let map = Arc::new(map);
        let mut maps = self.maps.write().expect("skymap store lock poisoned");
        maps.insert(map.id.clone(), Arc::clone(&map));
        Ok(map)
    }

    /// The probability tolerance this store validates against.
    pub fn probability_tolerance(&self) -> f64 {
        self.probability_tolerance
    }

    pub fn lookup(&self, skymap_id: &str) -> Option<Arc<Skymap>> {
        let maps = self.maps.read().expect("skymap store lock poisoned");
        maps.get(skymap_id).cloned()
    }

    /// Point-in-time view of every map whose freshness window covers
    /// `as_of` (`published_at <= as_of < expires_at`).
    ///
    /// The returned maps stay readable even if a concurrent sweep expires
    /// them afterwards. Sorted by id so repeated evaluations walk maps in
    /// the same order.
    pub fn active_snapshot(&self, as_of: UtcInstant) -> Vec<Arc<Skymap>> {
        let maps = self.maps.read().expect("skymap store lock poisoned");
        let mut snapshot: Vec<Arc<Skymap>> = maps
            .values()
            .filter(|map| map.is_active_at(as_of))
            .cloned()
            .collect();
        drop(maps);

        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Drop every map past its expiry. Idempotent; safe to run while
    /// readers hold snapshots. Returns the number of maps removed.
    pub fn expire_sweep(&self, now: UtcInstant) -> usize {
        let mut maps = self.maps.write().expect("skymap store lock poisoned");
        let before = maps.len();
        maps.retain(|_, map| map.expires_at > now);
        let removed = before - maps.len();
        drop(maps);

        if removed > 0 {
            tracing::debug!(removed, "expired skymaps swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.maps.read().expect("skymap store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
