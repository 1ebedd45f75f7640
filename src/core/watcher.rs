//! # ConfigWatcher: keeps the file cache in sync with disk.
//!
//! ```text
//! startup: load() ── read every path once ──► SharedState.files
//!
//! notify (own thread) ── Create/Modify under a watched parent dir ──► [mpsc]
//!                                                                      │
//! run():  first notification ─► collect until `debounce` of quiet ─────┘
//!         └─► flush(pending):  reread each path once (in config order)
//!                ├─ identical content → nothing (no mutation, no push)
//!                ├─ changed content   → cache + log line + push
//!                └─ restart_on_change → Batch: one restart per window
//!                                       PerFile: one restart per changed file
//! ```
//!
//! Parent directories are watched rather than the files themselves, so
//! editors that save through an atomic rename are still noticed.
//!
//! Any setup failure disables watching with a single log line; the cache
//! loaded at startup stays valid.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::{Config, ReloadCoalescing};
use super::controller::{ProcessController, RestartOrigin};
use crate::events::{Event, EventKind};
use crate::logs::LogSink;
use crate::state::SharedState;

/// Watches the configured files and restarts the child on change.
pub struct ConfigWatcher {
    paths: Vec<PathBuf>,
    restart_on_change: bool,
    debounce: Duration,
    coalescing: ReloadCoalescing,
    state: Arc<SharedState>,
    log: LogSink,
    controller: ProcessController,
}

impl ConfigWatcher {
    pub fn new(cfg: &Config, state: Arc<SharedState>, log: LogSink, controller: ProcessController) -> Self {
        Self {
            paths: cfg.config_files.clone(),
            restart_on_change: cfg.restart_on_change,
            debounce: cfg.debounce,
            coalescing: cfg.coalescing,
            state,
            log,
            controller,
        }
    }

    /// Reads every path once. Returns the number of files whose cached content changed.
    pub async fn load(&self) -> usize {
        let mut changed = 0;
        for index in 0..self.paths.len() {
            if self.reread(index).await {
                changed += 1;
            }
        }
        changed
    }

    /// Re-reads one path. `true` if the cache changed (and a push was requested).
    ///
    /// Unreadable files keep their previous content.
    pub async fn reread(&self, index: usize) -> bool {
        let Some(path) = self.paths.get(index) else {
            return false;
        };
        let key = path.display().to_string();

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) => {
                self.log
                    .event(
                        &Event::new(EventKind::ConfigUnreadable)
                            .with_path(key)
                            .with_attempt(index as u32)
                            .with_reason(e.to_string()),
                    )
                    .await;
                return false;
            }
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let changed = self.state.mutate_if(|d| {
            if d.files.get(&key) == Some(&text) {
                return false;
            }
            d.files.insert(key.clone(), text);
            true
        });
        if changed {
            self.log
                .event(&Event::new(EventKind::ConfigLoaded).with_path(key))
                .await;
        }
        changed
    }

    /// Watches until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        if self.paths.is_empty() {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
        let (_watcher, targets) = match self.watch(tx) {
            Ok(w) => w,
            Err(e) => {
                self.log
                    .event(&Event::new(EventKind::WatchDisabled).with_reason(e.to_string()))
                    .await;
                return;
            }
        };
        tracing::debug!(files = self.paths.len(), "watching config files");

        loop {
            let first = tokio::select! {
                _ = token.cancelled() => return,
                p = rx.recv() => match p {
                    Some(p) => p,
                    None => return,
                },
            };

            let mut pending = BTreeSet::new();
            pending.extend(targets.get(&first).copied());
            if !self.debounce.is_zero() {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(self.debounce) => break,
                        p = rx.recv() => match p {
                            Some(p) => pending.extend(targets.get(&p).copied()),
                            None => break,
                        },
                    }
                }
            }

            self.flush(pending).await;
        }
    }

    /// Re-reads each pending file once and issues restarts per the coalescing policy.
    pub(crate) async fn flush(&self, pending: BTreeSet<usize>) -> usize {
        let mut changed = 0;
        for index in pending {
            if !self.reread(index).await {
                continue;
            }
            changed += 1;
            if self.restart_on_change && self.coalescing == ReloadCoalescing::PerFile {
                self.restart().await;
            }
        }
        if changed > 0 && self.restart_on_change && self.coalescing == ReloadCoalescing::Batch {
            self.restart().await;
        }
        changed
    }

    async fn restart(&self) {
        if self
            .controller
            .restart_for(RestartOrigin::ConfigChange)
            .await
            .is_err()
        {
            tracing::debug!("controller gone; config restart skipped");
        }
    }

    /// Registers the parent directories. Returns the watcher and the map of
    /// watched file path (as notify reports it) to config index.
    fn watch(
        &self,
        tx: mpsc::Sender<PathBuf>,
    ) -> notify::Result<(RecommendedWatcher, HashMap<PathBuf, usize>)> {
        let mut targets = HashMap::new();
        let mut dirs = BTreeSet::new();
        for (index, path) in self.paths.iter().enumerate() {
            let (dir, name) = split(path)?;
            targets.insert(dir.join(name), index);
            dirs.insert(dir);
        }

        let wanted: BTreeSet<PathBuf> = targets.keys().cloned().collect();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            if !matches!(
                event.kind,
                notify::EventKind::Create(_) | notify::EventKind::Modify(_)
            ) {
                return;
            }
            for p in event.paths {
                if wanted.contains(&p) && tx.blocking_send(p).is_err() {
                    return;
                }
            }
        })?;

        for dir in &dirs {
            watcher.watch(dir, RecursiveMode::NonRecursive)?;
        }
        Ok((watcher, targets))
    }
}

/// Canonical parent directory and file name of `path`.
fn split(path: &Path) -> notify::Result<(PathBuf, std::ffi::OsString)> {
    let name = path
        .file_name()
        .ok_or_else(|| notify::Error::generic(&format!("not a file path: {}", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = std::fs::canonicalize(parent).map_err(notify::Error::io)?;
    Ok((dir, name.to_os_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogMode;
    use crate::core::controller::CommandQueue;
    use crate::logs::LogAggregator;
    use crate::observers::PushHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Rig {
        watcher: ConfigWatcher,
        state: Arc<SharedState>,
        restarts: Arc<AtomicUsize>,
        dir: tempfile::TempDir,
        // Held but not run: log lines must not touch the state under test.
        _intake: LogAggregator,
    }

    fn count_restarts(mut queue: CommandQueue) -> Arc<AtomicUsize> {
        let restarts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&restarts);
        tokio::spawn(async move {
            while let Some(cmd) = queue.next().await {
                if cmd.restart_origin() == Some(RestartOrigin::ConfigChange) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });
        restarts
    }

    fn rig(files: &[&str], coalescing: ReloadCoalescing) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::new("t", false, 64, PushHandle::new());
        let (log, intake) = LogAggregator::channel(64, LogMode::WebUi, Arc::clone(&state));
        let (controller, queue) = ProcessController::channel(Arc::clone(&state));
        let cfg = Config {
            config_files: files.iter().map(|f| dir.path().join(f)).collect(),
            restart_on_change: true,
            debounce: Duration::from_millis(50),
            coalescing,
            ..Config::default()
        };
        Rig {
            watcher: ConfigWatcher::new(&cfg, Arc::clone(&state), log, controller),
            state,
            restarts: count_restarts(queue),
            dir,
            _intake: intake,
        }
    }

    fn key(rig: &Rig, name: &str) -> String {
        rig.dir.path().join(name).display().to_string()
    }

    #[tokio::test]
    async fn load_caches_readable_files_only() {
        let rig = rig(&["a.conf", "missing.conf"], ReloadCoalescing::Batch);
        std::fs::write(rig.dir.path().join("a.conf"), "x=1").unwrap();

        assert_eq!(rig.watcher.load().await, 1);
        let a = key(&rig, "a.conf");
        let missing = key(&rig, "missing.conf");
        rig.state.read(|d| {
            assert_eq!(d.files.get(&a).map(String::as_str), Some("x=1"));
            assert!(!d.files.contains_key(&missing));
        });
    }

    #[tokio::test]
    async fn unchanged_file_causes_no_mutation_and_no_push() {
        let rig = rig(&["a.conf"], ReloadCoalescing::Batch);
        std::fs::write(rig.dir.path().join("a.conf"), "same").unwrap();
        rig.watcher.load().await;

        let revision = rig.state.revision();
        let requests = rig.state.push_handle().requests();
        assert!(!rig.watcher.reread(0).await);
        assert_eq!(rig.state.revision(), revision);
        assert_eq!(rig.state.push_handle().requests(), requests);
    }

    #[tokio::test]
    async fn unreadable_file_keeps_previous_content() {
        let rig = rig(&["a.conf"], ReloadCoalescing::Batch);
        let path = rig.dir.path().join("a.conf");
        std::fs::write(&path, "v1").unwrap();
        rig.watcher.load().await;

        std::fs::remove_file(&path).unwrap();
        assert!(!rig.watcher.reread(0).await);
        let a = key(&rig, "a.conf");
        assert_eq!(rig.state.read(|d| d.files.get(&a).cloned()), Some("v1".into()));
    }

    #[tokio::test]
    async fn batch_coalescing_restarts_once_per_window() {
        let rig = rig(&["a.conf", "b.conf"], ReloadCoalescing::Batch);
        std::fs::write(rig.dir.path().join("a.conf"), "a").unwrap();
        std::fs::write(rig.dir.path().join("b.conf"), "b").unwrap();

        assert_eq!(rig.watcher.flush(BTreeSet::from([0, 1])).await, 2);
        assert_eq!(rig.restarts.load(Ordering::SeqCst), 1);

        assert_eq!(rig.watcher.flush(BTreeSet::from([0, 1])).await, 0);
        assert_eq!(rig.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn per_file_coalescing_restarts_per_changed_file() {
        let rig = rig(&["a.conf", "b.conf"], ReloadCoalescing::PerFile);
        std::fs::write(rig.dir.path().join("a.conf"), "a").unwrap();
        std::fs::write(rig.dir.path().join("b.conf"), "b").unwrap();

        rig.watcher.flush(BTreeSet::from([0, 1])).await;
        assert_eq!(rig.restarts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn written_change_is_picked_up_and_restarts_once() {
        let rig = rig(&["app.conf"], ReloadCoalescing::Batch);
        let path = rig.dir.path().join("app.conf");
        std::fs::write(&path, "v1").unwrap();
        rig.watcher.load().await;

        let Rig {
            watcher,
            state,
            restarts,
            dir: _dir,
            _intake,
        } = rig;
        let token = CancellationToken::new();
        let task = tokio::spawn(watcher.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        std::fs::write(&path, "v2").unwrap();
        let key = path.display().to_string();
        tokio::time::timeout(Duration::from_secs(5), async {
            while restarts.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("restart after change");
        assert_eq!(state.read(|d| d.files.get(&key).cloned()), Some("v2".into()));

        std::fs::write(&path, "v2").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(restarts.load(Ordering::SeqCst), 1);

        token.cancel();
        task.await.unwrap();
    }
    #[tokio::test]
    async fn failed_registration_disables_watching_once() {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::new("t", false, 64, PushHandle::new());
        let (log, intake) = LogAggregator::channel(64, LogMode::WebUi, Arc::clone(&state));
        tokio::spawn(intake.run(CancellationToken::new()));
        let (controller, queue) = ProcessController::channel(Arc::clone(&state));
        let restarts = count_restarts(queue);
        let cfg = Config {
            config_files: vec![dir.path().join("no-such-dir").join("app.conf")],
            restart_on_change: true,
            ..Config::default()
        };
        let watcher = ConfigWatcher::new(&cfg, Arc::clone(&state), log, controller);

        tokio::time::timeout(Duration::from_secs(5), watcher.run(CancellationToken::new()))
            .await
            .expect("run must return when watching is impossible");

        let disabled = |d: &crate::state::StateData| {
            d.log
                .iter()
                .filter(|e| e.text.starts_with("config watch disabled:"))
                .count()
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.read(disabled) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("disabled line logged");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.read(disabled), 1);
        assert_eq!(restarts.load(Ordering::SeqCst), 0);
    }
}
