use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use directsql::statement::{DefinitionWatcher, StatementStore};

/// Poll until `check` holds or a few seconds pass
async fn eventually(what: &str, check: impl Fn() -> bool) -> Result<()> {
    for _ in 0..100 {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("timed out waiting for {}", what)
}

fn sql_of(store: &StatementStore, path: &str) -> Option<String> {
    let def = store.get(path).ok()?;
    let sql = def.templates().first().map(|t| t.sql().to_string());
    sql
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn picks_up_added_changed_and_removed_files() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("bizmodel");
    fs::create_dir_all(root.join("plan"))?;
    let store = Arc::new(StatementStore::new([("biz", root.clone())], "msql"));
    let watcher = DefinitionWatcher::start(Arc::clone(&store), 64)?;

    let file = root.join("plan/main.msql");
    fs::write(&file, "kind: select\nsql: SELECT 1\n")?;
    eventually("new definition", || sql_of(&store, "biz/plan/main").as_deref() == Some("SELECT 1")).await?;

    fs::write(&file, "kind: select\nsql: SELECT 2\n")?;
    eventually("changed definition", || sql_of(&store, "biz/plan/main").as_deref() == Some("SELECT 2")).await?;

    fs::remove_file(&file)?;
    eventually("removal", || store.get("biz/plan/main").is_err()).await?;

    watcher.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broken_edit_keeps_last_good_definition() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("bizmodel");
    fs::create_dir_all(&root)?;
    let store = Arc::new(StatementStore::new([("biz", root.clone())], "msql"));
    let watcher = DefinitionWatcher::start(Arc::clone(&store), 64)?;

    let good = root.join("good.msql");
    fs::write(&good, "kind: delete\nsql: DELETE FROM plan WHERE id = :id\n")?;
    eventually("initial definition", || store.get("biz/good").is_ok()).await?;
    let revision = store.get("biz/good")?.revision;

    fs::write(&good, "kind: nonsense\n")?;
    // a second file acts as a marker that the broken edit has been processed
    fs::write(root.join("marker.msql"), "kind: select\nsql: SELECT 1\n")?;
    eventually("marker", || store.get("biz/marker").is_ok()).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let served = store.get("biz/good")?;
    assert_eq!(served.revision, revision);
    assert_eq!(served.templates()[0].sql(), "DELETE FROM plan WHERE id = $1");

    watcher.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rescan_handle_reloads_everything() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("bizmodel");
    fs::create_dir_all(&root)?;
    let store = Arc::new(StatementStore::new([("biz", root.clone())], "msql"));
    let watcher = DefinitionWatcher::start(Arc::clone(&store), 64)?;

    store.put(directsql::statement::StatementDefinition::parse(
        "biz/stale",
        &root.join("stale.msql"),
        "kind: select\nsql: SELECT 0\n",
    )?);
    fs::write(root.join("fresh.msql"), "kind: select\nsql: SELECT 1\n")?;

    watcher.rescan_handle().request();
    eventually("rescan", || store.get("biz/stale").is_err() && store.get("biz/fresh").is_ok()).await?;

    watcher.shutdown();
    Ok(())
}
