use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::schedule::MemoryWindowCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub window_cache: MemoryWindowCache,
    pub upload_cancel: Arc<AtomicBool>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            window_cache: MemoryWindowCache::default(),
            upload_cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}
