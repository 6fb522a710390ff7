use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use directsql::router::StatementRouter;
use directsql::statement::{StatementDefinition, StatementStore, StoreError};
use directsql::types::StatementKind;

fn store_with_root() -> Result<(tempfile::TempDir, Arc<StatementStore>)> {
    let tmp = tempfile::tempdir()?;
    fs::create_dir_all(tmp.path().join("bizmodel/plan"))?;
    fs::create_dir_all(tmp.path().join("sysmodel"))?;
    let store = Arc::new(StatementStore::new(
        [("biz", tmp.path().join("bizmodel")), ("sys", tmp.path().join("sysmodel"))],
        "msql",
    ));
    Ok((tmp, store))
}

#[test]
fn resolve_then_get_returns_latest_installed_definition() -> Result<()> {
    let (tmp, store) = store_with_root()?;
    let file = tmp.path().join("bizmodel/plan/main.msql");
    let router = StatementRouter::new("/api/sql", Arc::clone(&store));

    fs::write(&file, "kind: select\nsql: SELECT 1\n")?;
    let first = store.reload_file("biz", Path::new("plan/main.msql"))?;

    fs::write(&file, "kind: select\nsql: SELECT 2\n")?;
    let second = store.reload_file("biz", Path::new("plan/main.msql"))?;
    assert!(second.revision > first.revision);

    let found = router.lookup("/api/sql/biz/plan/main")?;
    assert!(Arc::ptr_eq(&found, &second));
    assert_eq!(found.templates()[0].sql(), "SELECT 2");
    Ok(())
}

#[test]
fn parse_error_keeps_previous_definition() -> Result<()> {
    let (tmp, store) = store_with_root()?;
    let file = tmp.path().join("bizmodel/plan/main.msql");

    fs::write(&file, "kind: paging_select\nsql: SELECT * FROM plan LIMIT :limited OFFSET :start\ncount: SELECT COUNT(*) FROM plan\n")?;
    let good = store.reload_file("biz", Path::new("plan/main.msql"))?;

    // paging without its count query is rejected
    fs::write(&file, "kind: paging_select\nsql: SELECT * FROM plan LIMIT :limited OFFSET :start\n")?;
    assert!(store.reload_file("biz", Path::new("plan/main.msql")).is_err());

    let served = store.get("biz/plan/main")?;
    assert!(Arc::ptr_eq(&served, &good));
    assert_eq!(served.kind, StatementKind::PagingSelect);

    // a full rescan keeps it too
    let report = store.scan();
    assert_eq!(report.kept, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(store.get("biz/plan/main")?.templates(), good.templates());
    Ok(())
}

#[test]
fn scan_loads_every_root_and_skips_other_files() -> Result<()> {
    let (tmp, store) = store_with_root()?;
    fs::write(tmp.path().join("bizmodel/plan/main.msql"), "kind: select\nsql: SELECT 1\n")?;
    fs::write(tmp.path().join("bizmodel/plan/readme.txt"), "not a statement")?;
    fs::write(tmp.path().join("bizmodel/plan/.draft.msql"), "kind: select\nsql: SELECT 1\n")?;
    fs::write(tmp.path().join("sysmodel/users.msql"), "kind: delete\nsql: DELETE FROM users WHERE id = :id\n")?;

    let report = store.scan();
    assert_eq!(report.loaded, 2);
    assert_eq!(store.paths(), vec!["biz/plan/main", "sys/users"]);

    fs::remove_file(tmp.path().join("sysmodel/users.msql"))?;
    let report = store.scan();
    assert_eq!(report.removed, 1);
    assert!(matches!(store.get("sys/users"), Err(StoreError::NotFound(_))));
    Ok(())
}

#[test]
fn concurrent_puts_leave_other_paths_untouched() -> Result<()> {
    let (_tmp, store) = store_with_root()?;
    let parse = |path: &str, sql: &str| {
        StatementDefinition::parse(path, Path::new("x.msql"), &format!("kind: select\nsql: {}\n", sql))
    };
    let third = store.put(parse("biz/third", "SELECT 3")?);

    let writers: Vec<_> = ["biz/first", "biz/second"]
        .into_iter()
        .map(|path| {
            let store = Arc::clone(&store);
            let def = parse(path, "SELECT 1").map_err(anyhow::Error::from);
            thread::spawn(move || -> Result<()> {
                let def = def?;
                for _ in 0..500 {
                    store.put(def.clone());
                }
                Ok(())
            })
        })
        .collect();

    let reader = {
        let store = Arc::clone(&store);
        let expected = Arc::clone(&third);
        thread::spawn(move || {
            for _ in 0..2_000 {
                let got = store.get("biz/third").expect("third path disappeared");
                assert!(Arc::ptr_eq(&got, &expected));
            }
        })
    };

    for writer in writers {
        writer.join().expect("writer panicked")?;
    }
    reader.join().expect("reader panicked");

    assert_eq!(store.len(), 3);
    assert_eq!(store.get("biz/third")?.templates()[0].sql(), "SELECT 3");
    Ok(())
}
