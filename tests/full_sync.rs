#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use common::dataset;
use inventory_sync::app::SyncApp;
use inventory_sync::config::Config;
use inventory_sync::db::driver::sqlite::Sqlite;
use inventory_sync::db::SeaStore;
use inventory_sync::prelude::*;
use inventory_sync::types::from_micros;
use tempfile::TempDir;

fn sqlite_url(dir: &TempDir, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join(name).display())
}

async fn open(dir: &TempDir, name: &str) -> SeaStore {
    let driver = Sqlite::connect(dir.path(), name).await.unwrap();
    let store = SeaStore::new(name, Arc::new(driver));
    store.migrate().await.unwrap();
    store
}

fn once_app(dir: &TempDir, extra: &[&str]) -> SyncApp {
    let primary = sqlite_url(dir, "primary.db");
    let replica = sqlite_url(dir, "replica.db");
    let mut args = vec![
        "inventory-sync",
        "--primary-url",
        primary.as_str(),
        "--replica-url",
        replica.as_str(),
        "--webhook-secret",
        common::SECRET,
        "--max-connections=2",
        "--once",
    ];
    args.extend_from_slice(extra);
    SyncApp::new(Config::from_args(args).unwrap())
}

#[tokio::test]
async fn single_cycle_from_command_line() {
    let dir = TempDir::new().unwrap();
    {
        let primary = open(&dir, "primary.db").await;
        for rec in dataset(30) {
            primary.put(&rec).await.unwrap();
        }
    }

    once_app(&dir, &[]).run().await.unwrap();

    let primary = open(&dir, "primary.db").await;
    let replica = open(&dir, "replica.db").await;
    let everything = from_micros(0);
    assert_eq!(
        replica.changed_since(everything).await.unwrap(),
        primary.changed_since(everything).await.unwrap()
    );

    // Nothing changed on the primary; a second run leaves the replica as is.
    once_app(&dir, &["--skip-migrations"]).run().await.unwrap();
    assert_eq!(replica.changed_since(everything).await.unwrap().len(), 30);
}
