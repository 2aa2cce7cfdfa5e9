// Process-local tier of the dedup cache. Entries expire lazily when they are
// looked up, and the map is pruned in one batch once it grows past MAX_ENTRIES.
use crate::identity::SubmissionIdentity;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Eviction runs once the tier holds strictly more than this many entries.
pub const MAX_ENTRIES: usize = 1000;
/// Number of most recently recorded entries kept by an eviction pass.
pub const RETAINED_ENTRIES: usize = 500;

pub struct MemoryTier {
    entries: Mutex<HashMap<SubmissionIdentity, DateTime<Utc>>>,
    ttl: Duration,
}

impl MemoryTier {
    pub fn new(ttl: Duration) -> Self {
        MemoryTier {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns when `key` was recorded if the entry is still inside the TTL.
    /// An expired entry is removed and reported as absent.
    pub fn lookup(&self, key: &SubmissionIdentity, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut entries = self.entries.lock();
        let recorded_at = *entries.get(key)?;

        if now - recorded_at >= self.ttl {
            entries.remove(key);
            return None;
        }

        Some(recorded_at)
    }

    /// Records `key` at `now`, replacing any previous entry. Returns the number
    /// of entries evicted as a result.
    pub fn record(&self, key: SubmissionIdentity, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock();
        entries.insert(key, now);

        if entries.len() > MAX_ENTRIES {
            evict_oldest(&mut entries)
        } else {
            0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// Keeps the RETAINED_ENTRIES entries with the most recent timestamps.
fn evict_oldest(entries: &mut HashMap<SubmissionIdentity, DateTime<Utc>>) -> usize {
    let mut by_recency: Vec<(DateTime<Utc>, SubmissionIdentity)> = entries
        .iter()
        .map(|(key, recorded_at)| (*recorded_at, key.clone()))
        .collect();
    by_recency.sort_unstable_by(|a, b| b.cmp(a));

    let evicted = by_recency.split_off(RETAINED_ENTRIES.min(by_recency.len()));
    for (_, key) in &evicted {
        entries.remove(key);
    }

    evicted.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::normalize;

    fn tier() -> MemoryTier {
        MemoryTier::new(Duration::hours(24))
    }

    fn identity(i: usize) -> SubmissionIdentity {
        normalize(&format!("user{i}@example.com"))
    }

    #[test]
    fn test_lookup_within_ttl() {
        let tier = tier();
        let t0 = Utc::now();
        tier.record(identity(1), t0);

        assert_eq!(tier.lookup(&identity(1), t0 + Duration::hours(23)), Some(t0));
        assert_eq!(tier.lookup(&identity(2), t0), None);
    }

    #[test]
    fn test_expired_entry_is_removed_on_lookup() {
        let tier = tier();
        let t0 = Utc::now();
        tier.record(identity(1), t0);
        assert_eq!(tier.len(), 1);

        assert_eq!(tier.lookup(&identity(1), t0 + Duration::hours(24)), None);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_rerecord_after_expiry_overwrites() {
        let tier = tier();
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(30);
        tier.record(identity(1), t0);
        tier.record(identity(1), t1);

        assert_eq!(tier.lookup(&identity(1), t1 + Duration::hours(1)), Some(t1));
    }

    #[test]
    fn test_no_eviction_at_threshold() {
        let tier = tier();
        let t0 = Utc::now();
        let evicted: usize = (0..MAX_ENTRIES)
            .map(|i| tier.record(identity(i), t0 + Duration::seconds(i as i64)))
            .sum();

        assert_eq!(evicted, 0);
        assert_eq!(tier.len(), MAX_ENTRIES);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let tier = tier();
        let t0 = Utc::now();
        let mut evicted = 0;
        for i in 0..=MAX_ENTRIES {
            evicted += tier.record(identity(i), t0 + Duration::seconds(i as i64));
        }

        assert_eq!(evicted, MAX_ENTRIES + 1 - RETAINED_ENTRIES);
        assert_eq!(tier.len(), RETAINED_ENTRIES);

        let now = t0 + Duration::seconds(MAX_ENTRIES as i64);
        for i in 0..=MAX_ENTRIES {
            let present = tier.lookup(&identity(i), now).is_some();
            assert_eq!(present, i > MAX_ENTRIES - RETAINED_ENTRIES, "entry {i}");
        }
    }

    #[test]
    fn test_rerecorded_key_survives_eviction() {
        let tier = tier();
        let t0 = Utc::now();
        for i in 0..MAX_ENTRIES {
            tier.record(identity(i), t0 + Duration::seconds(i as i64));
        }

        // The oldest key becomes the freshest entry and triggers eviction.
        let fresh = t0 + Duration::seconds(MAX_ENTRIES as i64);
        tier.record(identity(0), fresh);
        assert_eq!(tier.len(), MAX_ENTRIES);

        tier.record(identity(MAX_ENTRIES), fresh + Duration::seconds(1));
        assert_eq!(tier.len(), RETAINED_ENTRIES);
        assert_eq!(tier.lookup(&identity(0), fresh), Some(fresh));
        assert_eq!(tier.lookup(&identity(1), fresh), None);
    }
}
