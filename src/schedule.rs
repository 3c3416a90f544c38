use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_TTL_SECS: i64 = 120;
pub const MIN_TTL_SECS: i64 = 60;
pub const MAX_TTL_SECS: i64 = 300;

/// One access window for a (course, date) pair, times as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessWindow {
    pub start_time: String,
    pub end_time: String,
    pub is_active: bool,
}

/// Cache seam for the access gate. The clock is passed in so expiry is
/// testable without sleeping.
pub trait WindowCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<AccessWindow>>;
    fn put(&mut self, key: &str, windows: Vec<AccessWindow>, now: DateTime<Utc>);
    fn invalidate(&mut self, key: &str);
    fn clear(&mut self);
}

pub struct MemoryWindowCache {
    ttl_secs: i64,
    entries: HashMap<String, (DateTime<Utc>, Vec<AccessWindow>)>,
}

impl MemoryWindowCache {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs: ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS),
            entries: HashMap::new(),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }
}

impl Default for MemoryWindowCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS)
    }
}

impl WindowCache for MemoryWindowCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Vec<AccessWindow>> {
        let (stored_at, windows) = self.entries.get(key)?;
        if (now - *stored_at).num_seconds() >= self.ttl_secs {
            return None;
        }
        Some(windows.clone())
    }

    fn put(&mut self, key: &str, windows: Vec<AccessWindow>, now: DateTime<Utc>) {
        self.entries.insert(key.to_string(), (now, windows));
    }

    fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

pub fn cache_key(course: &str, date: &str) -> String {
    format!("{}|{}", course, date)
}

/// Cache-aside read for the access gate: serve cached windows inside the TTL,
/// otherwise load from the database and repopulate.
pub fn resolve_windows<F>(
    cache: &mut dyn WindowCache,
    course: &str,
    date: &str,
    now: DateTime<Utc>,
    load: F,
) -> anyhow::Result<Vec<AccessWindow>>
where
    F: FnOnce() -> anyhow::Result<Vec<AccessWindow>>,
{
    let key = cache_key(course, date);
    if let Some(hit) = cache.get(&key, now) {
        return Ok(hit);
    }
    let windows = load()?;
    cache.put(&key, windows.clone(), now);
    Ok(windows)
}

pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Portal-open check: any active window with `start <= t < end`.
pub fn is_open_at(windows: &[AccessWindow], t: NaiveTime) -> bool {
    windows.iter().any(|w| {
        if !w.is_active {
            return false;
        }
        match (parse_hhmm(&w.start_time), parse_hhmm(&w.end_time)) {
            (Some(start), Some(end)) => start <= t && t < end,
            _ => false,
        }
    })
}
