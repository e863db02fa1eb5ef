//! The skill cache and its usage-driven lifecycle.
//!
//! Metadata for every discovered skill is held for the life of the manager.
//! Full skill bodies are read on first use and kept in a cache until
//! eviction. Cache, usage timestamps and the recent-query ring sit behind
//! one `RwLock` so readers never see a half-updated record.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aiq_core::error::SkillError;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::skill::{Metadata, Priority, Skill};
use crate::store;

/// How many recent queries are kept for relevance checks.
pub const RECENT_QUERY_CAPACITY: usize = 10;

/// Uses older than this never count as recent.
const DEFAULT_RECENCY_INTERVAL_MINS: i64 = 60;

#[derive(Debug, Default)]
struct CacheState {
    skills: HashMap<String, Skill>,
    usage: HashMap<String, Vec<DateTime<Utc>>>,
    recent_queries: VecDeque<String>,
}

pub struct SkillsManager {
    metadata: Vec<Metadata>,
    state: RwLock<CacheState>,
    recency_interval: Duration,
}

impl SkillsManager {
    pub fn new(metadata: Vec<Metadata>) -> Self {
        Self {
            metadata,
            state: RwLock::new(CacheState::default()),
            recency_interval: Duration::minutes(DEFAULT_RECENCY_INTERVAL_MINS),
        }
    }

    /// Discover skills under `dir` (see [`store::discover`]).
    pub fn from_dir(dir: &Path) -> Self {
        let metadata = store::discover(dir);
        info!(dir = %dir.display(), count = metadata.len(), "Skills metadata loaded");
        Self::new(metadata)
    }

    /// Only uses newer than `interval` count as recent.
    pub fn with_recency_interval(mut self, interval: Duration) -> Self {
        self.recency_interval = interval;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every known skill's metadata.
    pub fn list_metadata(&self) -> Vec<Metadata> {
        self.metadata.clone()
    }

    pub fn metadata(&self, name: &str) -> Option<&Metadata> {
        self.metadata.iter().find(|m| m.name == name)
    }

    /// Return the cached skill, reading it from disk on first use.
    pub fn load(&self, name: &str) -> Result<Skill, SkillError> {
        if let Some(skill) = self.read().skills.get(name).filter(|s| s.loaded) {
            return Ok(skill.clone());
        }

        let metadata = self
            .metadata(name)
            .ok_or_else(|| SkillError::NotFound(name.to_string()))?;

        // File I/O happens outside the lock
        let mut skill = store::load_skill(&metadata.location)?;
        // The directory listing is authoritative for the name
        skill.name = metadata.name.clone();
        debug!(skill = %skill.name, bytes = skill.content.len(), "Loaded skill content");

        let mut state = self.write();
        let entry = state.skills.entry(skill.name.clone()).or_insert(skill);
        Ok(entry.clone())
    }

    /// Load several skills, keeping whatever succeeded.
    pub fn load_many(&self, names: &[String]) -> (Vec<Skill>, Option<SkillError>) {
        let mut loaded = Vec::with_capacity(names.len());
        let mut errors = Vec::new();

        for name in names {
            match self.load(name) {
                Ok(skill) => loaded.push(skill),
                Err(e) => errors.push(e),
            }
        }

        let error = if errors.is_empty() {
            None
        } else {
            Some(SkillError::Multiple(errors))
        };
        (loaded, error)
    }

    /// Tag a cached skill. Unknown or uncached names are ignored.
    pub fn set_priority(&self, name: &str, priority: Priority) {
        if let Some(skill) = self.write().skills.get_mut(name) {
            skill.priority = priority;
        }
    }

    /// Lower every cached `Active` skill not named in `keep` to `Relevant`
    /// so eviction can reclaim it once it stops being used. Returns the
    /// demoted names.
    pub fn demote_active_except(&self, keep: &[String]) -> Vec<String> {
        let mut state = self.write();
        let mut demoted = Vec::new();
        for skill in state.skills.values_mut() {
            if skill.priority == Priority::Active && !keep.contains(&skill.name) {
                skill.priority = Priority::Relevant;
                demoted.push(skill.name.clone());
            }
        }
        demoted.sort();
        demoted
    }

    /// Record that `name` served `query` just now.
    pub fn track_usage(&self, name: &str, query: &str) {
        self.record_usage(name, query, Utc::now());
    }

    fn record_usage(&self, name: &str, query: &str, at: DateTime<Utc>) {
        let mut state = self.write();
        state.usage.entry(name.to_string()).or_default().push(at);
        state.recent_queries.push_back(query.to_string());
        while state.recent_queries.len() > RECENT_QUERY_CAPACITY {
            state.recent_queries.pop_front();
        }
    }

    /// Evict cached skills that are neither recently used nor relevant to
    /// recent queries. Returns the evicted names.
    ///
    /// Only the last `window_size` uses of a skill are considered, and only
    /// those inside the recency interval. `Active` skills always stay.
    /// Skills never used at all are dropped only when `Inactive`.
    pub fn evict_unused_skills(&self, window_size: usize) -> Vec<String> {
        let now = Utc::now();
        let cutoff = now - self.recency_interval;
        let mut state = self.write();

        let mut evicted = Vec::new();
        for (name, skill) in &state.skills {
            let uses = state.usage.get(name).map(Vec::as_slice).unwrap_or_default();

            if uses.is_empty() {
                if skill.priority == Priority::Inactive {
                    evicted.push((name.clone(), true));
                }
                continue;
            }

            let start = uses.len().saturating_sub(window_size);
            let recent_uses = uses[start..].iter().filter(|t| **t >= cutoff).count();
            if recent_uses > 0 || skill.priority >= Priority::Active {
                continue;
            }

            if !is_contextually_relevant(name, state.recent_queries.iter()) {
                evicted.push((name.clone(), false));
            }
        }

        let mut names = Vec::with_capacity(evicted.len());
        for (name, never_used) in evicted {
            state.skills.remove(&name);
            if never_used {
                state.usage.remove(&name);
            }
            names.push(name);
        }
        names.sort();

        if !names.is_empty() {
            info!(count = names.len(), skills = ?names, "Evicted unused skills");
        }
        names
    }

    /// Drop one skill from the cache.
    pub fn evict(&self, name: &str) -> bool {
        self.write().skills.remove(name).is_some()
    }

    /// Drop every cached skill below `threshold`.
    pub fn evict_below(&self, threshold: Priority) -> Vec<String> {
        let mut state = self.write();
        let mut names: Vec<String> = state
            .skills
            .values()
            .filter(|s| s.priority < threshold)
            .map(|s| s.name.clone())
            .collect();
        for name in &names {
            state.skills.remove(name);
        }
        names.sort();
        names
    }

    /// Snapshot of the cache, sorted by name.
    pub fn cached_skills(&self) -> Vec<Skill> {
        let mut skills: Vec<Skill> = self.read().skills.values().cloned().collect();
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    pub fn recent_queries(&self) -> Vec<String> {
        self.read().recent_queries.iter().cloned().collect()
    }
}

/// Whether any recent query plausibly refers to skill `name`.
///
/// True when the whole name appears in a query (case-insensitive), or when
/// any segment of a hyphen/underscore-separated name with 3+ characters
/// equals a word of a query. The second check only ever adds matches, so it
/// keeps at least everything the plain substring check would.
fn is_contextually_relevant<'a>(name: &str, queries: impl Iterator<Item = &'a String>) -> bool {
    let name_lower = name.to_lowercase();
    let segments: Vec<&str> = name_lower
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|s| s.chars().count() >= 3)
        .collect();

    for query in queries {
        let query_lower = query.to_lowercase();
        if query_lower.contains(&name_lower) {
            return true;
        }
        let mut words = query_lower.split(|c: char| !c.is_alphanumeric());
        if words.any(|w| !w.is_empty() && segments.contains(&w)) {
            return true;
        }
    }
    false
}
