use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::definition::StatementDefinition;
use super::error::{ParseError, StoreError};
use crate::config::DirectSqlConfig;

/// Outcome of a full rescan
#[derive(Debug, Default)]
pub struct ScanReport {
    pub loaded: usize,
    /// Files that failed to parse but still serve their last-good definition
    pub kept: usize,
    pub removed: usize,
    pub errors: Vec<ParseError>,
}

/// Holds every parsed statement definition, keyed by logical path.
///
/// Readers clone an `Arc` under a short read lock; file parsing always happens
/// before the write lock is taken, so a lookup never waits on disk I/O and
/// never observes a partially replaced entry.
pub struct StatementStore {
    ext: String,
    roots: BTreeMap<String, PathBuf>,
    entries: RwLock<HashMap<String, Arc<StatementDefinition>>>,
    revision: AtomicU64,
}

impl StatementStore {
    pub fn new<I, S, P>(roots: I, ext: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        let roots = roots
            .into_iter()
            .map(|(alias, dir)| {
                let dir = dir.into();
                // notify reports canonical paths on some platforms
                let dir = std::fs::canonicalize(&dir).unwrap_or(dir);
                (alias.into(), dir)
            })
            .collect();

        Self {
            ext: ext.into().trim_start_matches('.').to_string(),
            roots,
            entries: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &DirectSqlConfig) -> Self {
        Self::new(config.roots.clone(), config.ext.clone())
    }

    /// Statement file extension, without the leading dot
    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn roots(&self) -> &BTreeMap<String, PathBuf> {
        &self.roots
    }

    pub fn root_dir(&self, alias: &str) -> Option<&Path> {
        self.roots.get(alias).map(PathBuf::as_path)
    }

    /// Has the statement extension and no hidden component, matching what `scan` walks
    pub fn is_statement_file(&self, path: &Path) -> bool {
        path.extension().map_or(false, |e| e == self.ext.as_str())
            && path.components().all(|component| match component {
                Component::Normal(part) => part.to_str().map_or(false, |p| !p.starts_with('.')),
                _ => true,
            })
    }

    /// Build the logical path `<alias>/<relative path without extension>`
    pub fn logical_path(&self, alias: &str, relative: &Path) -> Result<String, ParseError> {
        if !self.roots.contains_key(alias) {
            return Err(ParseError::UnknownRoot(alias.to_string()));
        }
        if !self.is_statement_file(relative) {
            return Err(ParseError::NotStatementFile(relative.to_path_buf()));
        }

        let stem = relative.with_extension("");
        let mut logical = alias.to_string();
        for component in stem.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| ParseError::NotStatementFile(relative.to_path_buf()))?;
                    logical.push('/');
                    logical.push_str(part);
                }
                _ => return Err(ParseError::NotStatementFile(relative.to_path_buf())),
            }
        }
        Ok(logical)
    }

    /// Find which root holds an absolute path; returns the alias and the relative path
    pub fn locate(&self, path: &Path) -> Option<(String, PathBuf)> {
        let find = |candidate: &Path| {
            self.roots.iter().find_map(|(alias, dir)| {
                candidate
                    .strip_prefix(dir)
                    .ok()
                    .map(|rel| (alias.clone(), rel.to_path_buf()))
            })
        };

        if let Some(found) = find(path) {
            return Some(found);
        }

        // Removed files cannot be canonicalized; their parent usually can
        let parent = path.parent()?;
        let canonical = std::fs::canonicalize(parent).ok()?.join(path.file_name()?);
        find(&canonical)
    }

    /// Read and parse a definition file without installing it
    pub fn load(&self, root: &str, relative: &Path) -> Result<StatementDefinition, ParseError> {
        let dir = self
            .root_dir(root)
            .ok_or_else(|| ParseError::UnknownRoot(root.to_string()))?;
        let logical = self.logical_path(root, relative)?;
        let file = dir.join(relative);
        let text = std::fs::read_to_string(&file).map_err(|e| ParseError::Io {
            path: file.clone(),
            source: e,
        })?;
        StatementDefinition::parse(logical, &file, &text)
    }

    pub fn get(&self, logical_path: &str) -> Result<Arc<StatementDefinition>, StoreError> {
        self.entries
            .read()
            .get(logical_path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(logical_path.to_string()))
    }

    /// Install a definition, replacing any previous one at the same logical path
    pub fn put(&self, mut definition: StatementDefinition) -> Arc<StatementDefinition> {
        definition.revision = self.next_revision();
        let definition = Arc::new(definition);
        let previous = self
            .entries
            .write()
            .insert(definition.path.clone(), Arc::clone(&definition));

        match previous {
            Some(old) => debug!(
                "Replaced statement {} (revision {} -> {})",
                definition.path, old.revision, definition.revision
            ),
            None => debug!("Added statement {} ({})", definition.path, definition.kind),
        }
        definition
    }

    pub fn remove(&self, logical_path: &str) -> Option<Arc<StatementDefinition>> {
        let removed = self.entries.write().remove(logical_path);
        if removed.is_some() {
            debug!("Removed statement {}", logical_path);
        }
        removed
    }

    /// Re-parse one file and swap it in. On parse failure the previous
    /// definition stays installed and the error is returned.
    pub fn reload_file(&self, root: &str, relative: &Path) -> Result<Arc<StatementDefinition>, ParseError> {
        let definition = self.load(root, relative)?;
        Ok(self.put(definition))
    }

    pub fn remove_file(&self, root: &str, relative: &Path) -> Option<Arc<StatementDefinition>> {
        let logical = self.logical_path(root, relative).ok()?;
        self.remove(&logical)
    }

    /// Re-read every root from disk and swap the whole map in one step.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut fresh: HashMap<String, Arc<StatementDefinition>> = HashMap::new();
        let previous = self.entries.read().clone();

        for (alias, dir) in &self.roots {
            let mut files = Vec::new();
            if let Err(e) = collect_files(dir, dir, &self.ext, &mut files) {
                warn!("Failed to scan root {} ({}): {}", alias, dir.display(), e);
                // Keep whatever this root served before
                for (path, def) in previous.iter().filter(|(p, _)| in_root(p, alias)) {
                    fresh.insert(path.clone(), Arc::clone(def));
                }
                continue;
            }

            for relative in files {
                if !self.is_statement_file(&relative) {
                    continue;
                }
                match self.load(alias, &relative) {
                    Ok(mut definition) => {
                        definition.revision = self.next_revision();
                        fresh.insert(definition.path.clone(), Arc::new(definition));
                        report.loaded += 1;
                    }
                    Err(e) => {
                        warn!("Skipping statement file {}: {}", relative.display(), e);
                        if let Ok(logical) = self.logical_path(alias, &relative) {
                            if let Some(old) = previous.get(&logical) {
                                fresh.insert(logical, Arc::clone(old));
                                report.kept += 1;
                            }
                        }
                        report.errors.push(e);
                    }
                }
            }
        }

        report.removed = previous.keys().filter(|p| !fresh.contains_key(*p)).count();
        *self.entries.write() = fresh;

        info!(
            "Statement scan complete: {} loaded, {} kept, {} removed, {} errors",
            report.loaded,
            report.kept,
            report.removed,
            report.errors.len()
        );
        report
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Snapshot of every installed definition, sorted by logical path
    pub fn definitions(&self) -> Vec<Arc<StatementDefinition>> {
        let mut defs: Vec<_> = self.entries.read().values().cloned().collect();
        defs.sort_by(|a, b| a.path.cmp(&b.path));
        defs
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn in_root(logical_path: &str, alias: &str) -> bool {
    logical_path
        .strip_prefix(alias)
        .map_or(false, |rest| rest.starts_with('/'))
}

/// Recursively collect files under `dir` (relative to `base`), skipping hidden entries
fn collect_files(base: &Path, dir: &Path, ext: &str, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_str().map_or(true, |n| n.starts_with('.'));
        if hidden {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(base, &path, ext, out)?;
        } else if path.extension().map_or(false, |e| e == ext) {
            if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    fn write(dir: &Path, relative: &str, body: &str) {
        let file = dir.join(relative);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, body).unwrap();
    }

    fn store_with(dir: &Path) -> StatementStore {
        StatementStore::new([("biz", dir.to_path_buf())], "msql")
    }

    #[test]
    fn logical_path_strips_extension_and_uses_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_with(tmp.path());
        assert_eq!(
            store.logical_path("biz", Path::new("plan/main.msql")).unwrap(),
            "biz/plan/main"
        );
        assert!(store.logical_path("biz", Path::new("plan/main.sql")).is_err());
        assert!(store.logical_path("sys", Path::new("plan/main.msql")).is_err());
        assert!(store.logical_path("biz", Path::new("../main.msql")).is_err());
    }

    #[test]
    fn get_returns_most_recently_installed_definition() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "plan/main.msql", "kind: select\nsql: SELECT 1\n");
        let store = store_with(tmp.path());

        let first = store.reload_file("biz", Path::new("plan/main.msql")).unwrap();
        write(tmp.path(), "plan/main.msql", "kind: select\nsql: SELECT 2\n");
        let second = store.reload_file("biz", Path::new("plan/main.msql")).unwrap();

        let current = store.get("biz/plan/main").unwrap();
        assert!(second.revision > first.revision);
        assert_eq!(current.revision, second.revision);
        assert_eq!(current.templates()[0].sql(), "SELECT 2");
    }

    #[test]
    fn parse_error_keeps_last_good_definition() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "plan/main.msql", "kind: select\nsql: SELECT 1\n");
        let store = store_with(tmp.path());
        let good = store.reload_file("biz", Path::new("plan/main.msql")).unwrap();

        write(tmp.path(), "plan/main.msql", "kind: nonsense\n");
        assert!(store.reload_file("biz", Path::new("plan/main.msql")).is_err());

        let served = store.get("biz/plan/main").unwrap();
        assert!(Arc::ptr_eq(&good, &served));
    }

    #[test]
    fn scan_loads_nested_files_and_drops_removed_ones() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "plan/main.msql", "kind: select\nsql: SELECT 1\n");
        write(tmp.path(), "plan/detail/items.msql", "kind: select\nsql: SELECT 2\n");
        write(tmp.path(), "plan/readme.txt", "not a statement");
        write(tmp.path(), ".hidden/skip.msql", "kind: select\nsql: SELECT 3\n");
        let store = store_with(tmp.path());

        let report = store.scan();
        assert_eq!(report.loaded, 2);
        assert_eq!(store.paths(), vec!["biz/plan/detail/items", "biz/plan/main"]);

        fs::remove_file(tmp.path().join("plan/main.msql")).unwrap();
        let report = store.scan();
        assert_eq!(report.removed, 1);
        assert!(matches!(store.get("biz/plan/main"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn scan_keeps_last_good_on_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "plan/main.msql", "kind: select\nsql: SELECT 1\n");
        let store = store_with(tmp.path());
        store.scan();

        write(tmp.path(), "plan/main.msql", "kind: select\n");
        let report = store.scan();
        assert_eq!(report.kept, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(store.get("biz/plan/main").unwrap().templates()[0].sql(), "SELECT 1");
    }

    #[test]
    fn files_under_hidden_directories_are_not_statements() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_with(tmp.path());
        assert!(store.is_statement_file(Path::new("plan/main.msql")));
        assert!(!store.is_statement_file(Path::new("plan/.main.msql")));
        assert!(!store.is_statement_file(Path::new(".git/plan/main.msql")));
        assert!(!store.is_statement_file(Path::new("plan/.drafts/main.msql")));
        assert!(!store.is_statement_file(Path::new("plan/main.sql")));
    }

    #[test]
    fn locate_maps_absolute_paths_to_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_with(tmp.path());
        let root = store.root_dir("biz").unwrap().to_path_buf();
        let (alias, rel) = store.locate(&root.join("plan/main.msql")).unwrap();
        assert_eq!(alias, "biz");
        assert_eq!(rel, Path::new("plan/main.msql"));
    }

    #[test]
    fn concurrent_puts_leave_other_paths_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.msql", "kind: select\nsql: SELECT 'a'\n");
        write(tmp.path(), "b.msql", "kind: select\nsql: SELECT 'b'\n");
        write(tmp.path(), "c.msql", "kind: select\nsql: SELECT 'c'\n");
        let store = Arc::new(store_with(tmp.path()));
        store.scan();
        let third = store.get("biz/c").unwrap();

        let writers: Vec<_> = ["a.msql", "b.msql"]
            .into_iter()
            .map(|file| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        store.reload_file("biz", Path::new(file)).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..500 {
            let seen = store.get("biz/c").unwrap();
            assert!(Arc::ptr_eq(&seen, &third));
            assert_eq!(seen.templates()[0].sql(), "SELECT 'c'");
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(store.len(), 3);
    }
}
