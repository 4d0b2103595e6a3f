//! End-to-end tests for the debounced repo pipeline.
//!
//! These drive the watcher through a `ManualSource` over real temporary
//! directories, with tokio's clock paused so debounce windows elapse
//! deterministically.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use repo_watcher::{
    ChangeNotification, Delivery, EventSource, ManualHandle, ManualSource, PipelineError,
    RawEventKind, RepoWatcher, WatchConfig, WatcherError,
};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};

const WINDOW: Duration = Duration::from_millis(500);

fn start_watcher(config: WatchConfig) -> (RepoWatcher, ManualHandle) {
    let (source, handle, streams) = ManualSource::new(64);
    let watcher = RepoWatcher::with_source(config, source, streams);
    watcher.start();
    (watcher, handle)
}

/// Create `name` under the temp dir and return its canonical path.
fn make_repo(temp_dir: &TempDir, name: &str) -> PathBuf {
    let dir = temp_dir.path().join(name);
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::canonicalize(dir).unwrap()
}

async fn next_change(watcher: &RepoWatcher) -> ChangeNotification {
    match timeout(Duration::from_secs(5), watcher.notifications().next()).await {
        Ok(Delivery::Item(n)) => n,
        other => panic!("expected a notification, got {other:?}"),
    }
}

async fn assert_quiet(watcher: &RepoWatcher) {
    let read = timeout(WINDOW * 3, watcher.notifications().next()).await;
    assert!(read.is_err(), "unexpected delivery: {read:?}");
}

#[tokio::test(start_paused = true)]
async fn test_bursts_coalesce_per_root() {
    let temp_dir = TempDir::new().unwrap();
    let repo_a = make_repo(&temp_dir, "a");
    let repo_b = make_repo(&temp_dir, "b");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo_a).await.unwrap();
    watcher.register(&repo_b).await.unwrap();

    for _ in 0..3 {
        handle.emit(RawEventKind::Write, repo_a.join("x")).await;
        sleep(Duration::from_millis(20)).await;
    }
    handle.emit(RawEventKind::Write, repo_b.join("y")).await;

    let mut changes = vec![next_change(&watcher).await, next_change(&watcher).await];
    changes.sort_by(|l, r| l.root.cmp(&r.root));

    assert_eq!(changes[0].root, repo_a);
    assert_eq!(changes[0].path, repo_a.join("x"));
    assert_eq!(changes[1].root, repo_b);
    assert_eq!(changes[1].path, repo_b.join("y"));
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_last_path_wins_and_window_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default().with_debounce(WINDOW));
    watcher.register(&repo).await.unwrap();

    let start = Instant::now();
    handle.emit(RawEventKind::Write, repo.join("f1")).await;
    sleep(Duration::from_millis(200)).await;
    handle.emit(RawEventKind::Write, repo.join("f2")).await;
    sleep(Duration::from_millis(200)).await;
    handle.emit(RawEventKind::Write, repo.join("f3")).await;

    let change = next_change(&watcher).await;
    assert_eq!(change.path, repo.join("f3"));
    assert!(start.elapsed() >= Duration::from_millis(900));
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_every_event_kind_triggers() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    for kind in [
        RawEventKind::Create,
        RawEventKind::Write,
        RawEventKind::Remove,
        RawEventKind::Rename,
        RawEventKind::Chmod,
    ] {
        handle.emit(kind, repo.join("file.txt")).await;
        let change = next_change(&watcher).await;
        assert_eq!(change.root, repo, "kind {kind:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_ignored_paths_produce_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let objects = repo.join(".git/objects/ab/cd");
    fs::create_dir_all(&objects).unwrap();
    fs::create_dir_all(repo.join("node_modules")).unwrap();

    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();
    let watched_before = handle.watched();

    handle.emit(RawEventKind::Create, &objects).await;
    handle.emit(RawEventKind::Create, repo.join("node_modules")).await;
    handle
        .emit(RawEventKind::Write, repo.join("dist/bundle.js"))
        .await;

    assert_quiet(&watcher).await;
    assert_eq!(handle.watched(), watched_before);
}

#[tokio::test(start_paused = true)]
async fn test_paths_outside_roots_are_dropped() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    handle
        .emit(RawEventKind::Write, temp_dir.path().join("elsewhere.txt"))
        .await;
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_notification() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    handle.emit(RawEventKind::Write, repo.join("x")).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(watcher.stats().await.pending, 1);

    watcher.close().await.unwrap();
    sleep(WINDOW * 2).await;

    assert_eq!(watcher.notifications().next().await, Delivery::Closed);
    assert!(handle.is_closed());
    assert_eq!(watcher.stats().await.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_directory_becomes_watched() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    let new_dir = repo.join("newdir");
    fs::create_dir(&new_dir).unwrap();
    handle.emit(RawEventKind::Create, &new_dir).await;
    handle.emit(RawEventKind::Write, new_dir.join("f")).await;

    let change = next_change(&watcher).await;
    assert_eq!(change.root, repo);
    assert_eq!(change.path, new_dir.join("f"));
    assert!(handle.watched().contains(&new_dir));
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_created_file_is_not_watched() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();
    let watched_before = handle.watched().len();

    let file = repo.join("notes.txt");
    fs::write(&file, b"hello").unwrap();
    handle.emit(RawEventKind::Create, &file).await;

    assert_eq!(next_change(&watcher).await.path, file);
    assert_eq!(handle.watched().len(), watched_before);
}

#[tokio::test]
async fn test_register_twice_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());

    watcher.register(&repo).await.unwrap();
    let first = handle.watched();
    watcher.register(&repo).await.unwrap();
    watcher.register(repo.join("src/..")).await.unwrap();

    assert_eq!(handle.watched(), first);
    assert_eq!(watcher.roots().await, vec![repo]);
}

#[tokio::test]
async fn test_register_rejects_bad_roots() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, _handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    assert!(matches!(
        watcher.register("").await,
        Err(WatcherError::InvalidRoot { .. })
    ));
    assert!(matches!(
        watcher.register(temp_dir.path().join("missing")).await,
        Err(WatcherError::DirectoryNotFound(_))
    ));
    assert!(matches!(
        watcher.register(repo.join("src")).await,
        Err(WatcherError::RootConflict { .. })
    ));
    assert!(matches!(
        watcher.register(temp_dir.path()).await,
        Err(WatcherError::RootConflict { .. })
    ));
    assert_eq!(watcher.roots().await.len(), 1);
}

#[tokio::test]
async fn test_register_fails_when_root_cannot_be_watched() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    handle.fail_watch(repo.clone());

    assert!(watcher.register(&repo).await.is_err());
    assert!(watcher.roots().await.is_empty());
}

#[tokio::test]
async fn test_register_after_close_fails() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, _handle) = start_watcher(WatchConfig::default());
    watcher.close().await.unwrap();

    assert!(matches!(
        watcher.register(&repo).await,
        Err(WatcherError::Closed)
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (watcher, handle) = start_watcher(WatchConfig::default());

    watcher.close().await.unwrap();
    watcher.close().await.unwrap();

    assert!(watcher.is_closed());
    assert!(handle.is_closed());
    assert_eq!(watcher.notifications().next().await, Delivery::Closed);
    assert_eq!(watcher.errors().next().await, Delivery::Closed);
}

#[tokio::test]
async fn test_source_errors_pass_through() {
    let (watcher, handle) = start_watcher(WatchConfig::default());

    handle.fail(PipelineError::new("event queue overflow")).await;
    handle
        .fail(PipelineError::new("watch lost").with_path("/repos/a"))
        .await;

    let consumer = watcher.consumer();
    assert_eq!(
        consumer.next_error().await,
        Delivery::Item(PipelineError::new("event queue overflow"))
    );
    let second = consumer.next_error().await.into_item().unwrap();
    assert_eq!(second.paths, vec![PathBuf::from("/repos/a")]);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_files_bypass_ignore_rules() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join(".git/HEAD"), b"ref: refs/heads/main\n").unwrap();
    fs::write(repo.join(".git/index"), b"").unwrap();

    let ignore_git = |path: &Path| path.components().any(|c| c.as_os_str() == ".git");
    let (watcher, handle) = start_watcher(WatchConfig::default().with_ignore(ignore_git));
    watcher.register(&repo).await.unwrap();
    assert!(handle.watched().contains(&repo.join(".git")));

    handle.emit(RawEventKind::Write, repo.join(".git/HEAD")).await;
    assert_eq!(next_change(&watcher).await.path, repo.join(".git/HEAD"));

    handle.emit(RawEventKind::Write, repo.join(".git/config")).await;
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_branch_switch_via_lock_file_rename() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join(".git/HEAD"), b"ref: refs/heads/main\n").unwrap();

    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    for _ in 0..2 {
        handle.emit(RawEventKind::Create, repo.join(".git/HEAD.lock")).await;
        handle.emit(RawEventKind::Write, repo.join(".git/HEAD.lock")).await;
        handle.emit(RawEventKind::Rename, repo.join(".git/HEAD.lock")).await;
        handle.emit(RawEventKind::Rename, repo.join(".git/HEAD")).await;

        assert_eq!(next_change(&watcher).await.path, repo.join(".git/HEAD"));
    }
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_nested_checkout_metadata_stays_ignored() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    handle
        .emit(RawEventKind::Write, repo.join("node_modules/pkg/.git/HEAD"))
        .await;
    handle
        .emit(RawEventKind::Write, repo.join("node_modules/pkg/.git/index"))
        .await;
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_git_init_after_register_is_tracked() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    fs::create_dir(repo.join(".git")).unwrap();
    handle.emit(RawEventKind::Create, repo.join(".git")).await;

    assert_eq!(next_change(&watcher).await.path, repo.join(".git"));
    assert!(handle.watched().contains(&repo.join(".git")));
}

#[tokio::test(start_paused = true)]
async fn test_metadata_tracking_can_be_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    fs::create_dir_all(repo.join(".git")).unwrap();
    fs::write(repo.join(".git/HEAD"), b"ref: refs/heads/main\n").unwrap();

    let ignore_git = |path: &Path| path.components().any(|c| c.as_os_str() == ".git");
    let config = WatchConfig::default()
        .with_ignore(ignore_git)
        .track_metadata(false);
    let (watcher, handle) = start_watcher(config);
    watcher.register(&repo).await.unwrap();
    assert!(!handle.watched().contains(&repo.join(".git")));

    handle.emit(RawEventKind::Write, repo.join(".git/HEAD")).await;
    assert_quiet(&watcher).await;
}

#[tokio::test(start_paused = true)]
async fn test_stats_track_roots_and_watches() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, _handle) = start_watcher(WatchConfig::default());
    watcher.register(&repo).await.unwrap();

    let stats = watcher.stats().await;
    assert_eq!(stats.roots, 1);
    assert_eq!(stats.watched_paths, 2);
    assert_eq!(stats.pending, 0);
    assert!(!stats.closed);
}

#[tokio::test]
async fn test_concurrent_duplicate_register_waits_for_watches() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let (watcher, handle) = start_watcher(WatchConfig::default());

    let register = || async { watcher.register(&repo).await.map(|()| handle.watched().len()) };
    let (first, second) = tokio::join!(register(), register());

    assert_eq!(first.unwrap(), 2);
    assert_eq!(second.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_walk_fails_register() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");

    // Hold the registration walk inside the ignore predicate until released.
    let (entered_tx, entered_rx) = std::sync::mpsc::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);
    let gate = move |_: &Path| {
        let _ = entered_tx.send(());
        let _ = release_rx.lock().unwrap().recv();
        false
    };

    let (watcher, handle) = start_watcher(WatchConfig::default().with_ignore(gate));
    let watcher = Arc::new(watcher);
    let register = tokio::spawn({
        let watcher = watcher.clone();
        let repo = repo.clone();
        async move { watcher.register(&repo).await }
    });

    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    watcher.close().await.unwrap();
    drop(release_tx);

    assert!(matches!(register.await.unwrap(), Err(WatcherError::Closed)));
    assert!(handle.watched().is_empty());
    assert!(watcher.roots().await.is_empty());
}

/// Source whose `close` parks until the test lets it continue.
struct GatedSource {
    inner: ManualSource,
    entered: Option<oneshot::Sender<()>>,
    release: std::sync::mpsc::Receiver<()>,
}

impl EventSource for GatedSource {
    fn watch(&mut self, path: &Path) -> repo_watcher::Result<()> {
        self.inner.watch(path)
    }

    fn close(&mut self) -> repo_watcher::Result<()> {
        if let Some(entered) = self.entered.take() {
            let _ = entered.send(());
        }
        let _ = self.release.recv();
        self.inner.close()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_notification_once_close_begins() {
    let temp_dir = TempDir::new().unwrap();
    let repo = make_repo(&temp_dir, "a");
    let window = Duration::from_millis(20);

    let (inner, handle, streams) = ManualSource::new(16);
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    let source = GatedSource {
        inner,
        entered: Some(entered_tx),
        release: release_rx,
    };
    let config = WatchConfig::default()
        .with_debounce(window)
        .with_capacities(1, 1);
    let watcher = Arc::new(RepoWatcher::with_source(config, source, streams));
    watcher.start();
    watcher.register(&repo).await.unwrap();

    // The first notification fills the stream; the second timer wakes up
    // and has to wait for room.
    handle.emit(RawEventKind::Write, repo.join("x")).await;
    sleep(window * 10).await;
    handle.emit(RawEventKind::Write, repo.join("y")).await;
    sleep(window * 10).await;

    let closing = tokio::spawn({
        let watcher = watcher.clone();
        async move { watcher.close().await }
    });
    entered_rx.await.unwrap();

    // Close has begun but the streams are still open: the buffered
    // notification drains, and the woken timer must not deliver.
    let subscription = watcher.notifications();
    assert_eq!(
        subscription.next().await,
        Delivery::Item(ChangeNotification::new(&repo, repo.join("x")))
    );
    let late = timeout(window * 10, subscription.next()).await;
    assert!(late.is_err(), "delivered after close began: {late:?}");

    release_tx.send(()).unwrap();
    closing.await.unwrap().unwrap();
    assert_eq!(subscription.next().await, Delivery::Closed);
}
