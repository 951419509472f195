//! File-backed counter store - durable counters shared between processes on one host.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use radix_core::StoreError;
use radix_core::domain::{Counter, CounterHit};
use radix_core::ports::{Clock, CounterStore, SystemClock};

type CounterMap = BTreeMap<String, Counter>;
type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

const LOCK_RETRY: Duration = Duration::from_millis(2);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Counters kept in a single JSON document.
///
/// Calls are queued and applied in batches on the blocking pool: one flush
/// takes the exclusive `<file>.lock`, reads the document once, applies every
/// queued operation, and renames a temp file over the document. A caller that
/// gives up waiting only drops its reply; the flush always runs to the end and
/// releases the lock.
pub struct FileCounterStore {
    settings: Arc<Settings>,
    queue: Arc<Queue>,
}

#[derive(Clone)]
struct Settings {
    path: PathBuf,
    lock_path: PathBuf,
    tmp_path: PathBuf,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    stale_after: Duration,
}

#[derive(Default)]
struct Queue {
    pending: Mutex<Vec<Op>>,
    io: Mutex<()>,
}

enum Op {
    Increment {
        key: String,
        window: Duration,
        reply: Reply<CounterHit>,
    },
    Peek {
        key: String,
        reply: Reply<Option<Counter>>,
    },
    Purge {
        reply: Reply<usize>,
    },
}

/// Result of an applied op, held back until the document is on disk.
enum Outcome {
    Hit(Reply<CounterHit>, CounterHit),
    Peeked(Reply<Option<Counter>>, Option<Counter>),
    Purged(Reply<usize>, usize),
}

impl FileCounterStore {
    /// Open a store at `path`, creating its directory if needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(path = %path.display(), "Using file counter store");

        Ok(Self {
            settings: Arc::new(Settings {
                lock_path: sibling(&path, "lock"),
                tmp_path: sibling(&path, "tmp"),
                path,
                clock: Arc::new(SystemClock),
                lock_timeout: DEFAULT_LOCK_TIMEOUT,
                stale_after: DEFAULT_STALE_AFTER,
            }),
            queue: Arc::new(Queue::default()),
        })
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        self.configure(|s| s.clock = clock)
    }

    /// How long a flush waits for another process to release the lock file.
    pub fn with_lock_timeout(self, timeout: Duration) -> Self {
        self.configure(|s| s.lock_timeout = timeout)
    }

    fn configure(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = (*self.settings).clone();
        f(&mut settings);
        self.settings = Arc::new(settings);
        self
    }

    /// Queue `op` and wait for the flush that applies it.
    async fn submit<T>(&self, op: impl FnOnce(Reply<T>) -> Op) -> Result<T, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(op(tx));

        let settings = self.settings.clone();
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || queue.flush(&settings));

        rx.await
            .map_err(|_| StoreError::Unavailable("counter file flush was lost".to_string()))?
    }
}

impl Queue {
    /// Apply everything queued so far. Later flushes find the queue empty and return.
    fn flush(&self, settings: &Settings) {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
        if batch.is_empty() {
            return;
        }

        settings.apply(batch);
    }
}

impl Settings {
    /// Apply `batch` under the lock file and answer every caller in it.
    fn apply(&self, batch: Vec<Op>) {
        let lock = match LockFile::acquire(self) {
            Ok(lock) => lock,
            Err(e) => return self.fail_batch(batch, e),
        };
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(e) => return self.fail_batch(batch, e),
        };

        let now = self.clock.now();
        let mut dirty = false;
        let outcomes: Vec<Outcome> = batch
            .into_iter()
            .map(|op| match op {
                Op::Increment { key, window, reply } => {
                    dirty = true;
                    let hit = match map.get_mut(&key) {
                        Some(counter) => counter.hit(now, window),
                        None => {
                            let counter = Counter::start(key.clone(), now, window);
                            let hit = counter.snapshot();
                            map.insert(key, counter);
                            hit
                        }
                    };
                    Outcome::Hit(reply, hit)
                }
                Op::Peek { key, reply } => {
                    let counter = map.get(&key).filter(|c| !c.is_expired(now)).cloned();
                    Outcome::Peeked(reply, counter)
                }
                Op::Purge { reply } => {
                    let before = map.len();
                    map.retain(|_, counter| !counter.is_expired(now));
                    let removed = before - map.len();
                    dirty |= removed > 0;
                    Outcome::Purged(reply, removed)
                }
            })
            .collect();

        let written = match (dirty, lock.is_held()) {
            (false, _) => Ok(()),
            (true, true) => self.write_map(&map),
            (true, false) => Err(StoreError::Unavailable(
                "counter lock was taken over".to_string(),
            )),
        };
        drop(lock);

        match written {
            Ok(()) => outcomes.into_iter().for_each(Outcome::send),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Counter file write failed");
                for outcome in outcomes {
                    outcome.fail(&e);
                }
            }
        }
    }

    fn fail_batch(&self, batch: Vec<Op>, e: StoreError) {
        tracing::debug!(path = %self.path.display(), error = %e, "Counter file unavailable");
        for op in batch {
            op.fail(&e);
        }
    }

    fn read_map(&self) -> Result<CounterMap, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CounterMap::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.is_empty() {
            return Ok(CounterMap::new());
        }

        match serde_json::from_slice(&bytes) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Discarding unreadable counter file"
                );
                Ok(CounterMap::new())
            }
        }
    }

    fn write_map(&self, map: &CounterMap) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(map).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        fs::write(&self.tmp_path, bytes)?;
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    fn is_stale(&self, path: &Path) -> bool {
        fs::metadata(path)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|age| age > self.stale_after)
    }

    /// Remove a lock whose owner stopped refreshing it. Returns true when the
    /// caller should retry creating the lock at once.
    ///
    /// Breakers exclude each other through `<file>.lock.break`, and the lock is
    /// checked again once that is held, so a lock created by the winner of an
    /// earlier break is never removed.
    fn break_stale_lock(&self) -> bool {
        if !self.is_stale(&self.lock_path) {
            return false;
        }

        let breaker = sibling(&self.lock_path, "break");
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&breaker)
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if self.is_stale(&breaker) {
                    let _ = fs::remove_file(&breaker);
                }
                return false;
            }
            Err(_) => return false,
        }

        let broken = self.is_stale(&self.lock_path) && fs::remove_file(&self.lock_path).is_ok();
        if broken {
            tracing::warn!(lock = %self.lock_path.display(), "Breaking stale counter lock");
        }
        let _ = fs::remove_file(&breaker);
        broken
    }
}

impl Outcome {
    fn send(self) {
        // A dropped receiver means the caller stopped waiting; the hit still counts.
        match self {
            Outcome::Hit(reply, hit) => drop(reply.send(Ok(hit))),
            Outcome::Peeked(reply, counter) => drop(reply.send(Ok(counter))),
            Outcome::Purged(reply, removed) => drop(reply.send(Ok(removed))),
        }
    }

    fn fail(self, e: &StoreError) {
        match self {
            Outcome::Hit(reply, _) => drop(reply.send(Err(duplicate(e)))),
            Outcome::Peeked(reply, _) => drop(reply.send(Err(duplicate(e)))),
            Outcome::Purged(reply, _) => drop(reply.send(Err(duplicate(e)))),
        }
    }
}

impl Op {
    fn fail(self, e: &StoreError) {
        match self {
            Op::Increment { reply, .. } => drop(reply.send(Err(duplicate(e)))),
            Op::Peek { reply, .. } => drop(reply.send(Err(duplicate(e)))),
            Op::Purge { reply } => drop(reply.send(Err(duplicate(e)))),
        }
    }
}

/// Hand one batch failure to every caller in the batch.
fn duplicate(e: &StoreError) -> StoreError {
    match e {
        StoreError::Unavailable(msg) => StoreError::Unavailable(msg.clone()),
        StoreError::Timeout(after) => StoreError::Timeout(*after),
        StoreError::Io(io) => StoreError::Io(std::io::Error::new(io.kind(), io.to_string())),
        StoreError::Corrupt(msg) => StoreError::Corrupt(msg.clone()),
    }
}

/// `counters.json` -> `counters.json.lock`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Held lock file carrying a unique owner token.
///
/// Dropping it removes the file only while it still holds that token.
struct LockFile {
    path: PathBuf,
    token: String,
}

impl LockFile {
    fn acquire(settings: &Settings) -> Result<Self, StoreError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + settings.lock_timeout;

        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&settings.lock_path)
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = fs::remove_file(&settings.lock_path);
                        return Err(e.into());
                    }
                    return Ok(LockFile {
                        path: settings.lock_path.clone(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if settings.break_stale_lock() {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StoreError::Timeout(settings.lock_timeout));
                    }
                    thread::sleep(LOCK_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn is_held(&self) -> bool {
        fs::read_to_string(&self.path).is_ok_and(|token| token == self.token)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if self.is_held() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[async_trait]
impl CounterStore for FileCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterHit, StoreError> {
        let key = key.to_string();
        self.submit(|reply| Op::Increment { key, window, reply })
            .await
    }

    async fn peek(&self, key: &str) -> Result<Option<Counter>, StoreError> {
        let key = key.to_string();
        self.submit(|reply| Op::Peek { key, reply }).await
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.submit(|reply| Op::Purge { reply }).await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta};
    use radix_core::RateLimiter;
    use radix_core::domain::{BucketRegistry, HARD};
    use radix_core::ports::ManualClock;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ))
    }

    fn seed_stale_lock(lock_path: &Path) {
        fs::write(lock_path, b"crashed-owner").unwrap();
        let file = fs::File::options().write(true).open(lock_path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
    }

    #[tokio::test]
    async fn test_counters_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage").join("ratelimit.json");
        let clock = clock();
        let window = Duration::from_secs(60);

        let store = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());
        store.increment("hard:10.0.0.1", window).await.unwrap();
        let second = store.increment("hard:10.0.0.1", window).await.unwrap();
        assert_eq!(second.count, 2);
        drop(store);

        let reopened = FileCounterStore::open(&path).await.unwrap().with_clock(clock.clone());
        let third = reopened.increment("hard:10.0.0.1", window).await.unwrap();
        assert_eq!(third.count, 3);
        assert_eq!(third.expires_at, second.expires_at);
        assert!(!sibling(&path, "lock").exists());
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = FileCounterStore::open(dir.path().join("c.json"))
            .await
            .unwrap()
            .with_clock(clock.clone());
        let window = Duration::from_secs(60);

        store.increment("light:a", window).await.unwrap();
        clock.advance(TimeDelta::seconds(61));

        let hit = store.increment("light:a", window).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(hit.expires_at, clock.now() + TimeDelta::seconds(60));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_handles_on_one_file_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.json");
        let window = Duration::from_secs(300);

        let a = Arc::new(
            FileCounterStore::open(&path)
                .await
                .unwrap()
                .with_lock_timeout(Duration::from_secs(10)),
        );
        let b = Arc::new(
            FileCounterStore::open(&path)
                .await
                .unwrap()
                .with_lock_timeout(Duration::from_secs(10)),
        );

        let handles: Vec<_> = (0..60)
            .map(|i| {
                let store = if i % 2 == 0 { a.clone() } else { b.clone() };
                tokio::spawn(async move { store.increment("api:burst", window).await.unwrap() })
            })
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=60).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stale_lock_is_broken_once_under_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.json");
        let lock_path = sibling(&path, "lock");
        seed_stale_lock(&lock_path);

        let window = Duration::from_secs(300);
        let a = Arc::new(
            FileCounterStore::open(&path)
                .await
                .unwrap()
                .with_lock_timeout(Duration::from_secs(10)),
        );
        let b = Arc::new(
            FileCounterStore::open(&path)
                .await
                .unwrap()
                .with_lock_timeout(Duration::from_secs(10)),
        );

        let handles: Vec<_> = (0..80)
            .map(|i| {
                let store = if i % 2 == 0 { a.clone() } else { b.clone() };
                tokio::spawn(async move { store.increment("hard:race", window).await.unwrap() })
            })
            .collect();

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap().count);
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=80).collect::<Vec<u64>>());
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_lock_owned_by_someone_else_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        let settings = Settings {
            lock_path: sibling(&path, "lock"),
            tmp_path: sibling(&path, "tmp"),
            path,
            clock: Arc::new(SystemClock),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        };

        let lock = LockFile::acquire(&settings).unwrap();
        assert!(lock.is_held());

        fs::write(&settings.lock_path, b"another-owner").unwrap();
        assert!(!lock.is_held());
        drop(lock);
        assert!(settings.lock_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_through_limiter_leaves_no_lock_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ratelimit.json");
        let store = Arc::new(FileCounterStore::open(&path).await.unwrap());
        let limiter = Arc::new(RateLimiter::new(store.clone(), BucketRegistry::defaults()));

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check(HARD, "203.0.113.9").await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Calls the limiter gave up on still land; wait for the last flush.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stored = store.peek("hard:203.0.113.9").await.unwrap();
            if stored.is_some_and(|c| c.count == 200) || Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(
            store.peek("hard:203.0.113.9").await.unwrap().unwrap().count,
            200
        );
        assert!(!sibling(&path, "lock").exists());

        let mut allowed = 0;
        for _ in 0..30 {
            if limiter.check(HARD, "198.51.100.20").await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileCounterStore::open(&path).await.unwrap();
        let hit = store.increment("light:a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(hit.count, 1);
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.json");
        let store = FileCounterStore::open(&path)
            .await
            .unwrap()
            .with_lock_timeout(Duration::from_millis(20));

        tokio::fs::write(sibling(&path, "lock"), b"live-owner").await.unwrap();

        let err = store
            .increment("light:a", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
        assert!(sibling(&path, "lock").exists());
    }

    #[tokio::test]
    async fn test_purge_and_peek() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let store = FileCounterStore::open(dir.path().join("c.json"))
            .await
            .unwrap()
            .with_clock(clock.clone());

        store.increment("api:short", Duration::from_secs(5)).await.unwrap();
        store.increment("api:long", Duration::from_secs(600)).await.unwrap();
        clock.advance(TimeDelta::seconds(10));

        assert!(store.peek("api:short").await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.peek("api:long").await.unwrap().unwrap().count, 1);
    }
}
