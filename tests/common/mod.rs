//! Test utilities for tarn integration tests.
//!
//! Provides:
//! - Temporary database directories
//! - The projects/chapters schema used across tests
//! - Polling helpers

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tarn::{BroadcastTransport, Config, Database, NoopTransport, Schema, StoreSchema};
use tempfile::TempDir;

pub const PROJECTS: &str = "projects";
pub const CHAPTERS: &str = "chapters";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub favorite: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: i64,
    pub pid: i64,
    pub title: String,
    pub read: i64,
}

pub fn project(id: i64, title: &str, favorite: bool) -> Project {
    Project {
        id,
        title: title.to_string(),
        favorite: i64::from(favorite),
    }
}

pub fn chapter(id: i64, pid: i64, title: &str) -> Chapter {
    Chapter {
        id,
        pid,
        title: title.to_string(),
        read: 0,
    }
}

/// Projects keyed by `id` with a `by-favorite` index; chapters keyed by
/// `id` with `by-project` and `by-read` indexes.
pub fn library_schema() -> Schema {
    Schema::new()
        .with_store(
            StoreSchema::new(PROJECTS)
                .with_key_path("id")
                .with_index("by-favorite", "favorite"),
        )
        .with_store(
            StoreSchema::new(CHAPTERS)
                .with_key_path("id")
                .with_index("by-project", "pid")
                .with_index("by-read", "read"),
        )
}

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub config: Config,
}

impl TestFixture {
    pub fn new() -> Self {
        tarn::observability::tracing::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = Config::test_config(temp_dir.path());
        Self { temp_dir, config }
    }

    /// Open the fixture's database as a single context.
    pub async fn open(&self) -> Database {
        self.open_with(Arc::new(NoopTransport)).await
    }

    /// Open the fixture's database with a specific broadcast transport.
    pub async fn open_with(&self, transport: Arc<dyn BroadcastTransport>) -> Database {
        Database::open(&self.config, library_schema(), transport)
            .await
            .expect("failed to open database")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a condition to become true with timeout.
///
/// Returns `true` if the condition was met, `false` if the timeout expired.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Insert projects in one transaction, reporting their keys.
pub async fn seed_projects(db: &Database, projects: Vec<Project>) {
    db.mutate([PROJECTS])
        .handled_by(move |tx| {
            let store = tx.store(PROJECTS)?;
            let mut keys = Vec::new();
            for project in &projects {
                keys.push(store.put(project)?);
            }
            Ok(tarn::TransactorResult::changes_only().with_changes(PROJECTS, keys))
        })
        .execute()
        .await
        .expect("failed to seed projects");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.config.db_path().starts_with(fixture.temp_dir.path()));
    }
}
