//! Cache layer
//!
//! Holds the latest statistics result per student in an in-memory moka store.
//!
//! Writes are ordered by generation: every computation takes a number from a
//! monotonically increasing counter before it starts, and its result is kept
//! only if nothing newer has been stored (or invalidated) for that student in
//! the meantime. A slow stale computation therefore can never overwrite a
//! fresher one.

pub mod memory;

pub use memory::MemoryCache;

use crate::config::StatsConfig;
use crate::models::AttendanceStats;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

#[derive(Serialize, Deserialize)]
struct Versioned {
    generation: u64,
    stats: AttendanceStats,
}

#[derive(Default)]
struct Fences {
    /// Results older than this are rejected for every student
    floor: u64,
    /// Newest generation stored or invalidated, per student
    latest: HashMap<i64, u64>,
}

/// Last-request-wins cache of per-student statistics
pub struct StatsCache {
    store: MemoryCache,
    counter: AtomicU64,
    fences: Mutex<Fences>,
}

impl std::fmt::Debug for StatsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCache")
            .field("store", &self.store)
            .field("generation", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

fn key(student_id: i64) -> String {
    format!("stats:{}", student_id)
}

impl StatsCache {
    pub fn new(store: MemoryCache) -> Self {
        Self {
            store,
            counter: AtomicU64::new(0),
            fences: Mutex::new(Fences::default()),
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        Self::new(MemoryCache::with_capacity_and_ttl(
            config.cache_capacity,
            config.cache_ttl(),
        ))
    }

    /// Take the generation number for a computation about to start
    pub fn next_generation(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest stored result for a student, if still fresh
    pub async fn get(&self, student_id: i64) -> Result<Option<AttendanceStats>> {
        Ok(self
            .store
            .get::<Versioned>(&key(student_id))
            .await?
            .map(|v| v.stats))
    }

    /// Store `stats` unless a newer generation was already stored or an
    /// invalidation happened after `generation` was taken. Returns whether
    /// the value was kept.
    pub async fn store_if_latest(
        &self,
        student_id: i64,
        generation: u64,
        stats: &AttendanceStats,
    ) -> Result<bool> {
        let mut fences = self.fences.lock().await;
        let newest = fences.latest.get(&student_id).copied().unwrap_or(0);
        if generation <= fences.floor || generation <= newest {
            tracing::debug!(student_id, generation, newest, "Dropping stale statistics result");
            return Ok(false);
        }

        self.store
            .set(
                &key(student_id),
                &Versioned {
                    generation,
                    stats: stats.clone(),
                },
            )
            .await?;
        fences.latest.insert(student_id, generation);
        Ok(true)
    }

    /// Forget a student's result and fence off computations already running
    pub async fn invalidate(&self, student_id: i64) {
        let mut fences = self.fences.lock().await;
        let fence = self.next_generation();
        fences.latest.insert(student_id, fence);
        self.store.delete(&key(student_id)).await;
    }

    /// Forget every result, e.g. after schedules or semester dates change
    pub async fn invalidate_all(&self) {
        let mut fences = self.fences.lock().await;
        fences.floor = self.next_generation();
        fences.latest.clear();
        self.store.delete_pattern("stats:*").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache() -> StatsCache {
        StatsCache::new(MemoryCache::with_capacity_and_ttl(100, Duration::from_secs(60)))
    }

    fn stats(student_id: i64, rate: u32) -> AttendanceStats {
        AttendanceStats {
            student_id,
            attendance_rate: rate,
            total_classes: 100,
            attended_classes: rate,
            missed_classes: 100 - rate,
            subject_breakdown: vec![],
        }
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let cache = cache();
        let generation = cache.next_generation();
        assert!(cache.store_if_latest(1, generation, &stats(1, 80)).await.unwrap());
        assert_eq!(cache.get(1).await.unwrap(), Some(stats(1, 80)));
        assert_eq!(cache.get(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_request_wins() {
        let cache = cache();
        let older = cache.next_generation();
        let newer = cache.next_generation();

        // The newer request finishes first; the older one must not overwrite it
        assert!(cache.store_if_latest(1, newer, &stats(1, 90)).await.unwrap());
        assert!(!cache.store_if_latest(1, older, &stats(1, 10)).await.unwrap());

        assert_eq!(cache.get(1).await.unwrap(), Some(stats(1, 90)));
    }

    #[tokio::test]
    async fn test_generations_are_per_student() {
        let cache = cache();
        let a = cache.next_generation();
        let b = cache.next_generation();
        assert!(cache.store_if_latest(2, b, &stats(2, 50)).await.unwrap());
        assert!(cache.store_if_latest(1, a, &stats(1, 60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_fences_inflight_computation() {
        let cache = cache();
        let inflight = cache.next_generation();
        cache.invalidate(1).await;

        assert!(!cache.store_if_latest(1, inflight, &stats(1, 40)).await.unwrap());
        assert_eq!(cache.get(1).await.unwrap(), None);

        let fresh = cache.next_generation();
        assert!(cache.store_if_latest(1, fresh, &stats(1, 45)).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = cache();
        let g1 = cache.next_generation();
        cache.store_if_latest(1, g1, &stats(1, 70)).await.unwrap();
        let inflight = cache.next_generation();

        cache.invalidate_all().await;

        assert_eq!(cache.get(1).await.unwrap(), None);
        assert!(!cache.store_if_latest(2, inflight, &stats(2, 70)).await.unwrap());
        let fresh = cache.next_generation();
        assert!(cache.store_if_latest(2, fresh, &stats(2, 70)).await.unwrap());
    }
}
