// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Two-tier persistent plugin cache.
//!
//! The cache directory holds `index.json` (quick summaries for every
//! installed unit) and `details/<hex-sha256>.json` (full parameter schemas,
//! one file per quadruplet key). Detail files are validated against the
//! index entry's content checksum; a mismatch forces re-introspection.
//!
//! Expensive introspections are deduplicated with a single-flight map of
//! shared futures: concurrent `get_details` calls for the same key run one
//! host introspection and all await its result.

use super::host::{HostError, PluginHost};
use super::types::{PluginBlueprint, PluginRecord, PluginSummary};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Format stamp for `index.json`. A mismatch treats the index as empty.
pub const INDEX_VERSION: &str = "1.0-index";
/// Format stamp for detail files. A mismatch forces re-introspection.
pub const DETAILS_VERSION: &str = "1.0-details";

/// Environment variable overriding the cache directory location.
pub const CACHE_DIR_ENV: &str = "MACAUDIO_CACHE_DIR";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("no cache directory could be determined")]
    NoCacheDir,
}

/// One quick-index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
    pub manufacturer_id: String,
    pub name: String,
    pub category: String,
    pub checksum: String,
    pub last_seen_at: i64,
}

impl IndexEntry {
    fn from_summary(summary: &PluginSummary, now: i64) -> Self {
        Self {
            key: summary.blueprint.quadruplet(),
            kind: summary.blueprint.kind.clone(),
            subtype: summary.blueprint.subtype.clone(),
            manufacturer_id: summary.blueprint.manufacturer.clone(),
            name: summary.blueprint.name.clone(),
            category: summary.category.clone(),
            checksum: summary.checksum(),
            last_seen_at: now,
        }
    }

    pub fn blueprint(&self) -> PluginBlueprint {
        PluginBlueprint::new(
            self.kind.clone(),
            self.subtype.clone(),
            self.manufacturer_id.clone(),
            self.name.clone(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: String,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DetailFile {
    version: String,
    last_introspected: i64,
    checksum: String,
    plugin: PluginRecord,
}

/// Outcome of a quick refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

/// Observer hooks for embedders. All methods have empty defaults.
pub trait CacheMetrics: Send + Sync {
    fn refresh_completed(&self, _summary: &RefreshSummary) {}
    fn details_hit(&self, _key: &str) {}
    fn details_miss(&self, _key: &str) {}
    fn warm_progress(&self, _total: usize, _completed: usize) {}
}

type SharedIntrospection = Shared<BoxFuture<'static, Result<PluginRecord, Arc<CacheError>>>>;

/// Persistent plugin introspection cache.
pub struct PluginCache {
    dir: PathBuf,
    details_dir: PathBuf,
    host: Arc<dyn PluginHost>,
    /// In-memory index snapshot. Written only by the refresh path.
    index: RwLock<HashMap<String, IndexEntry>>,
    /// Single-flight map: quadruplet key -> shared in-progress introspection.
    in_flight: Mutex<HashMap<String, SharedIntrospection>>,
    metrics: Option<Arc<dyn CacheMetrics>>,
}

impl PluginCache {
    /// Open (or initialize) the cache at `dir`, falling back to
    /// `MACAUDIO_CACHE_DIR` and then the platform user cache location.
    pub fn open(
        dir: Option<PathBuf>,
        host: Arc<dyn PluginHost>,
        metrics: Option<Arc<dyn CacheMetrics>>,
    ) -> Result<Self, CacheError> {
        let dir = match dir {
            Some(d) => d,
            None => resolve_cache_dir()?,
        };
        let details_dir = dir.join("details");
        std::fs::create_dir_all(&details_dir)?;

        let index = load_index(&dir.join("index.json"));
        info!(
            entries = index.len(),
            dir = %dir.display(),
            "plugin cache opened"
        );

        Ok(Self {
            dir,
            details_dir,
            host,
            index: RwLock::new(index),
            in_flight: Mutex::new(HashMap::new()),
            metrics,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    /// Number of units currently indexed.
    pub fn indexed_count(&self) -> usize {
        self.index.read().len()
    }

    /// Cloned snapshot of the quick index, sorted by key.
    pub fn index_snapshot(&self) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self.index.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Run a quick host scan and reconcile the index against it.
    ///
    /// Added keys are inserted, removed keys dropped (their detail files
    /// deleted best-effort), and changed keys (same key, new checksum) get
    /// their stale detail file deleted so the next details request
    /// re-introspects. Orphaned detail files are swept on every refresh.
    pub fn refresh_quick(&self) -> Result<RefreshSummary, CacheError> {
        let scanned = self.host.quick_scan()?;
        let now = unix_now();

        let mut summary = RefreshSummary::default();
        let mut stale_details: Vec<PluginBlueprint> = Vec::new();

        {
            let mut index = self.index.write();
            let mut seen: HashMap<String, PluginSummary> = HashMap::new();
            for s in scanned {
                seen.insert(s.blueprint.quadruplet(), s);
            }

            // Removed keys.
            let removed: Vec<String> = index
                .keys()
                .filter(|k| !seen.contains_key(*k))
                .cloned()
                .collect();
            for key in removed {
                if let Some(entry) = index.remove(&key) {
                    stale_details.push(entry.blueprint());
                    summary.removed += 1;
                }
            }

            // Added and changed keys.
            for (key, scanned_entry) in seen {
                let checksum = scanned_entry.checksum();
                match index.get_mut(&key) {
                    None => {
                        index.insert(key, IndexEntry::from_summary(&scanned_entry, now));
                        summary.added += 1;
                    }
                    Some(existing) if existing.checksum != checksum => {
                        stale_details.push(existing.blueprint());
                        *existing = IndexEntry::from_summary(&scanned_entry, now);
                        summary.changed += 1;
                    }
                    Some(existing) => {
                        existing.last_seen_at = now;
                    }
                }
            }
        }

        // Persistence failure downgrades to an unpersisted index; the
        // refresh itself still succeeded.
        if let Err(e) = self.write_index() {
            warn!(error = %e, "index write failed");
        }

        for blueprint in stale_details {
            self.delete_detail(&blueprint);
        }
        self.sweep_orphan_details();

        debug!(
            added = summary.added,
            removed = summary.removed,
            changed = summary.changed,
            "plugin index refreshed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.refresh_completed(&summary);
        }
        Ok(summary)
    }

    /// Fetch the full introspected record for one unit.
    ///
    /// Cache hit when a detail file exists and its checksum matches the
    /// current index entry; otherwise the unit is introspected on the task
    /// pool and the detail file rewritten. Concurrent calls for the same key
    /// share one introspection.
    pub async fn get_details(
        &self,
        blueprint: &PluginBlueprint,
    ) -> Result<PluginRecord, Arc<CacheError>> {
        let key = blueprint.quadruplet();

        if let Some(record) = self.read_valid_detail(blueprint) {
            if let Some(metrics) = &self.metrics {
                metrics.details_hit(&key);
            }
            return Ok(record);
        }
        if let Some(metrics) = &self.metrics {
            metrics.details_miss(&key);
        }

        let shared = self.join_or_start_introspection(blueprint, &key);
        let result = shared.await;
        self.in_flight.lock().remove(&key);
        result
    }

    /// Batch details fetch with progress reporting.
    pub async fn warm(&self, blueprints: &[PluginBlueprint]) -> Vec<Result<PluginRecord, Arc<CacheError>>> {
        let total = blueprints.len();
        let mut results = Vec::with_capacity(total);
        for (done, blueprint) in blueprints.iter().enumerate() {
            results.push(self.get_details(blueprint).await);
            if let Some(metrics) = &self.metrics {
                metrics.warm_progress(total, done + 1);
            }
        }
        results
    }

    fn join_or_start_introspection(
        &self,
        blueprint: &PluginBlueprint,
        key: &str,
    ) -> SharedIntrospection {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            return existing.clone();
        }

        let host = Arc::clone(&self.host);
        let blueprint = blueprint.clone();
        let details_dir = self.details_dir.clone();
        let future = async move {
            let introspect_bp = blueprint.clone();
            let record = tokio::task::spawn_blocking(move || host.introspect(&introspect_bp))
                .await
                .map_err(|e| {
                    Arc::new(CacheError::Host(HostError::IntrospectionFailed {
                        key: blueprint.quadruplet(),
                        reason: format!("introspection task failed: {e}"),
                    }))
                })?
                .map_err(|e| Arc::new(CacheError::Host(e)))?;

            // Write-through; a failed write downgrades to uncached but does
            // not fail the request.
            if let Err(e) = write_detail(&details_dir, &blueprint, &record) {
                warn!(key = %blueprint.quadruplet(), error = %e, "detail write failed");
            }
            Ok(record)
        }
        .boxed()
        .shared();

        in_flight.insert(key.to_string(), future.clone());
        future
    }

    /// Read a detail file and validate it against the index entry.
    fn read_valid_detail(&self, blueprint: &PluginBlueprint) -> Option<PluginRecord> {
        let expected = {
            let index = self.index.read();
            index.get(&blueprint.quadruplet())?.checksum.clone()
        };

        let path = self.detail_path(blueprint);
        let content = std::fs::read_to_string(&path).ok()?;
        let detail: DetailFile = match serde_json::from_str(&content) {
            Ok(d) => d,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable detail file");
                return None;
            }
        };
        if detail.version != DETAILS_VERSION || detail.checksum != expected {
            return None;
        }
        Some(detail.plugin)
    }

    fn detail_path(&self, blueprint: &PluginBlueprint) -> PathBuf {
        self.details_dir
            .join(format!("{}.json", blueprint.detail_file_stem()))
    }

    fn delete_detail(&self, blueprint: &PluginBlueprint) {
        let path = self.detail_path(blueprint);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "stale detail delete failed");
            }
        }
    }

    /// Delete detail files whose stem matches no current index entry.
    fn sweep_orphan_details(&self) {
        let valid: std::collections::HashSet<String> = {
            let index = self.index.read();
            index
                .values()
                .map(|e| e.blueprint().detail_file_stem())
                .collect()
        };

        let entries = match std::fs::read_dir(&self.details_dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if !valid.contains(&stem) {
                debug!(path = %path.display(), "removing orphaned detail file");
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    fn write_index(&self) -> Result<(), CacheError> {
        let mut entries: Vec<IndexEntry> = self.index.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let file = IndexFile {
            version: INDEX_VERSION.to_string(),
            entries,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.dir.join("index.json"), &json)?;
        Ok(())
    }
}

fn load_index(path: &Path) -> HashMap<String, IndexEntry> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return HashMap::new(),
    };
    let file: IndexFile = match serde_json::from_str(&content) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt index, starting empty");
            return HashMap::new();
        }
    };
    if file.version != INDEX_VERSION {
        warn!(
            found = %file.version,
            expected = INDEX_VERSION,
            "index version mismatch, starting empty"
        );
        return HashMap::new();
    }
    file.entries.into_iter().map(|e| (e.key.clone(), e)).collect()
}

fn write_detail(
    details_dir: &Path,
    blueprint: &PluginBlueprint,
    record: &PluginRecord,
) -> Result<(), CacheError> {
    let detail = DetailFile {
        version: DETAILS_VERSION.to_string(),
        last_introspected: unix_now(),
        checksum: record.summary().checksum(),
        plugin: record.clone(),
    };
    let json = serde_json::to_vec_pretty(&detail)?;
    let path = details_dir.join(format!("{}.json", blueprint.detail_file_stem()));
    write_atomic(&path, &json)?;
    Ok(())
}

/// Write via `<path>.tmp` + rename so partial writes are never observable.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Cache directory resolution: env override, then platform user cache dir.
pub fn resolve_cache_dir() -> Result<PathBuf, CacheError> {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    directories::ProjectDirs::from("", "", "macaudio")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .ok_or(CacheError::NoCacheDir)
}

impl From<CacheError> for crate::error::EngineError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Io(e) => Self::Io(e),
            CacheError::Json(e) => {
                Self::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }
            CacheError::Host(e) => {
                let key = match &e {
                    HostError::IntrospectionFailed { key, .. } => key.clone(),
                    HostError::NotInstalled(key) => key.clone(),
                    HostError::ScanFailed(_) => "*".to_string(),
                };
                Self::PluginLoad {
                    key,
                    reason: e.to_string(),
                }
            }
            CacheError::NoCacheDir => Self::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no cache directory could be determined",
            )),
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::host::{HostError, PluginHost, StaticPluginHost};
    use crate::plugins::{ParameterInfo, PluginBlueprint, PluginRecord, PluginSummary};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(name: &str, subtype: &str, category: &str) -> PluginRecord {
        PluginRecord {
            blueprint: PluginBlueprint::new("aufx", subtype, "acme", name),
            category: category.to_string(),
            parameters: vec![ParameterInfo {
                address: 10,
                name: "Amount".to_string(),
                min_value: 0.0,
                max_value: 1.0,
                default_value: 0.3,
                unit: None,
            }],
        }
    }

    fn open_cache(dir: &Path, host: Arc<StaticPluginHost>) -> PluginCache {
        PluginCache::open(Some(dir.to_path_buf()), host, None).unwrap()
    }

    #[tokio::test]
    async fn test_details_miss_then_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        let cache = open_cache(tmp.path(), Arc::clone(&host));
        cache.refresh_quick().unwrap();

        let blueprint = PluginBlueprint::new("aufx", "rvb1", "acme", "Verb");
        let first = cache.get_details(&blueprint).await.unwrap();
        assert_eq!(first.parameters.len(), 1);
        assert_eq!(host.introspect_calls(), 1);

        // Second request is served from disk.
        let second = cache.get_details(&blueprint).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(host.introspect_calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        host.install(record("Comp", "cmp1", "Dynamics"));
        let cache = open_cache(tmp.path(), Arc::clone(&host));

        let first = cache.refresh_quick().unwrap();
        assert_eq!(first.added, 2);
        let second = cache.refresh_quick().unwrap();
        assert_eq!(
            second,
            RefreshSummary {
                added: 0,
                removed: 0,
                changed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_changed_checksum_forces_reintrospection() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        let cache = open_cache(tmp.path(), Arc::clone(&host));
        cache.refresh_quick().unwrap();

        let blueprint = PluginBlueprint::new("aufx", "rvb1", "acme", "Verb");
        cache.get_details(&blueprint).await.unwrap();
        assert_eq!(host.introspect_calls(), 1);

        // Same key, different category: changed checksum.
        host.install(record("Verb", "rvb1", "Effect"));
        let summary = cache.refresh_quick().unwrap();
        assert_eq!(summary.changed, 1);

        cache.get_details(&blueprint).await.unwrap();
        assert_eq!(host.introspect_calls(), 2);
    }

    #[tokio::test]
    async fn test_removed_plugin_drops_detail_file() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        let cache = open_cache(tmp.path(), Arc::clone(&host));
        cache.refresh_quick().unwrap();

        let blueprint = PluginBlueprint::new("aufx", "rvb1", "acme", "Verb");
        cache.get_details(&blueprint).await.unwrap();
        let detail_path = tmp
            .path()
            .join("details")
            .join(format!("{}.json", blueprint.detail_file_stem()));
        assert!(detail_path.exists());

        host.uninstall(&blueprint.quadruplet());
        let summary = cache.refresh_quick().unwrap();
        assert_eq!(summary.removed, 1);
        assert!(!detail_path.exists());
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        {
            let cache = open_cache(tmp.path(), Arc::clone(&host));
            cache.refresh_quick().unwrap();
        }
        let reopened = open_cache(tmp.path(), host);
        assert_eq!(reopened.indexed_count(), 1);
        assert_eq!(reopened.index_snapshot()[0].key, "aufx:rvb1:acme:Verb");
    }

    #[tokio::test]
    async fn test_version_mismatch_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("index.json"),
            r#"{"version":"0.9-index","entries":[]}"#,
        )
        .unwrap();
        let host = Arc::new(StaticPluginHost::new());
        let cache = open_cache(tmp.path(), host);
        assert_eq!(cache.indexed_count(), 0);
    }

    /// Host whose introspection blocks long enough for calls to overlap.
    struct SlowHost {
        inner: StaticPluginHost,
        introspections: AtomicUsize,
    }

    impl PluginHost for SlowHost {
        fn quick_scan(&self) -> Result<Vec<PluginSummary>, HostError> {
            self.inner.quick_scan()
        }

        fn introspect(&self, blueprint: &PluginBlueprint) -> Result<PluginRecord, HostError> {
            self.introspections.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.inner.introspect(blueprint)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_deduplicates_introspection() {
        let tmp = tempfile::tempdir().unwrap();
        let slow = Arc::new(SlowHost {
            inner: StaticPluginHost::new(),
            introspections: AtomicUsize::new(0),
        });
        slow.inner.install(record("Verb", "rvb1", "Reverb"));

        let cache = Arc::new(
            PluginCache::open(
                Some(tmp.path().to_path_buf()),
                Arc::clone(&slow) as Arc<dyn PluginHost>,
                None,
            )
            .unwrap(),
        );
        cache.refresh_quick().unwrap();

        let blueprint = PluginBlueprint::new("aufx", "rvb1", "acme", "Verb");
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let blueprint = blueprint.clone();
            tasks.push(tokio::spawn(
                async move { cache.get_details(&blueprint).await },
            ));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(slow.introspections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_orphan_detail_swept_on_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        let cache = open_cache(tmp.path(), host);

        let orphan = tmp.path().join("details").join(format!("{}.json", "ab".repeat(32)));
        std::fs::write(&orphan, "{}").unwrap();
        cache.refresh_quick().unwrap();
        assert!(!orphan.exists());
    }

    #[derive(Default)]
    struct CountingMetrics {
        hits: AtomicUsize,
        misses: AtomicUsize,
        refreshes: AtomicUsize,
        warmed: AtomicUsize,
    }

    impl CacheMetrics for CountingMetrics {
        fn refresh_completed(&self, _summary: &RefreshSummary) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
        }

        fn details_hit(&self, _key: &str) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }

        fn details_miss(&self, _key: &str) {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }

        fn warm_progress(&self, _total: usize, completed: usize) {
            self.warmed.store(completed, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_metrics_hook_observes_hits_and_misses() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        host.install(record("Verb", "rvb1", "Reverb"));
        host.install(record("Comp", "cmp1", "Dynamics"));
        let metrics = Arc::new(CountingMetrics::default());
        let cache = PluginCache::open(
            Some(tmp.path().to_path_buf()),
            Arc::clone(&host) as Arc<dyn PluginHost>,
            Some(Arc::clone(&metrics) as Arc<dyn CacheMetrics>),
        )
        .unwrap();
        cache.refresh_quick().unwrap();
        assert_eq!(metrics.refreshes.load(Ordering::SeqCst), 1);

        let blueprint = PluginBlueprint::new("aufx", "rvb1", "acme", "Verb");
        cache.get_details(&blueprint).await.unwrap();
        assert_eq!(metrics.misses.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.hits.load(Ordering::SeqCst), 0);

        cache.get_details(&blueprint).await.unwrap();
        assert_eq!(metrics.hits.load(Ordering::SeqCst), 1);

        // Warm reports progress for the whole batch.
        let batch = vec![
            blueprint,
            PluginBlueprint::new("aufx", "cmp1", "acme", "Comp"),
        ];
        cache.warm(&batch).await;
        assert_eq!(metrics.warmed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_introspection_failure_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let host = Arc::new(StaticPluginHost::new());
        let cache = open_cache(tmp.path(), host);

        let missing = PluginBlueprint::new("aufx", "gone", "acme", "Ghost");
        let err = cache.get_details(&missing).await.unwrap_err();
        assert!(matches!(&*err, CacheError::Host(HostError::NotInstalled(_))));
    }
}
