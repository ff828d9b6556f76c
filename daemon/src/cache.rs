//! Per-owner cache of the most recent top-CPU snapshot

use crate::error::{GuardError, Result};
use crate::sampler::{ProcessSample, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn uid(uid: u32) -> Self {
        OwnerId(format!("uid:{}", uid))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        OwnerId(s.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CachedQuery {
    pub captured_at: Instant,
    pub snapshot: Snapshot,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<OwnerId, CachedQuery>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces whatever the owner stored before.
    pub fn store(&mut self, owner: OwnerId, snapshot: Snapshot) {
        self.entries.insert(
            owner,
            CachedQuery {
                captured_at: Instant::now(),
                snapshot,
            },
        );
    }

    /// Missing and expired entries are indistinguishable.
    pub fn lookup(&self, owner: &OwnerId, max_age: Duration) -> Option<&Snapshot> {
        let entry = self.entries.get(owner)?;
        if entry.captured_at.elapsed() > max_age {
            return None;
        }
        Some(&entry.snapshot)
    }

    /// Row at 1-based `index` of the owner's snapshot, honouring the TTL.
    pub fn select(&self, owner: &OwnerId, index: usize) -> Result<ProcessSample> {
        let snapshot = self.lookup(owner, self.ttl).ok_or(GuardError::Expired)?;
        let len = snapshot.rows.len();
        if index == 0 || index > len {
            return Err(GuardError::OutOfRange { index, len });
        }
        Ok(snapshot.rows[index - 1].clone())
    }

    /// Drop every entry older than the TTL; returns how many went.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.captured_at.elapsed() <= ttl);
        before - self.entries.len()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
