use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::*;
use crate::test;

const TTL: Duration = Duration::from_secs(1);

/// A producer factory counting how often a refresh actually ran.
#[derive(Clone, Default)]
struct Producer {
    calls: Arc<AtomicUsize>,
}

type Produce<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

impl Producer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn returning<T: Send + 'static>(&self, value: T, delay: Duration) -> Produce<T> {
        let calls = Arc::clone(&self.calls);
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok::<_, anyhow::Error>(value)
            })
        })
    }

    fn failing<T: Send + 'static>(&self, error: &'static str) -> Produce<T> {
        let calls = Arc::clone(&self.calls);
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Err::<T, _>(anyhow::anyhow!(error)) })
        })
    }

    fn never<T: Send + 'static>(&self) -> Produce<T> {
        let calls = Arc::clone(&self.calls);
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(futures::future::pending())
        })
    }
}

fn setup() -> (tempfile::TempDir, Cacher<Value>) {
    test::setup();
    let dir = test::tempdir();
    let store = CacheStore::open(dir.path()).unwrap();
    (dir, Cacher::new(Arc::new(store)))
}

fn key(key: &str) -> CacheKey {
    CacheKey::new(key).unwrap()
}

/// Writes an entry that went stale a while ago.
fn put_stale(cacher: &Cacher<Value>, key: &CacheKey, value: &Value) {
    let stored_at = Utc::now() - TimeDelta::seconds(60);
    cacher.store().put_at(key, value, TTL, stored_at).unwrap();
}

async fn settle<T: CacheValue>(cacher: &Cacher<T>, key: &CacheKey) {
    for _ in 0..200 {
        if !cacher.coalescer().in_flight(key) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("refresh of {key} did not settle");
}

#[tokio::test]
async fn test_fresh_hit() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_roster");
    let producer = Producer::default();

    cacher
        .store()
        .put(&key, &json!(["A"]), Duration::from_secs(60))
        .unwrap();

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["B"]), Duration::ZERO),
            json!([]),
        )
        .await;

    assert_eq!(fetched.value, json!(["A"]));
    assert_eq!(fetched.status, CacheStatus::Fresh);
    assert!(fetched.stored_at.is_some());
    assert_eq!(producer.calls(), 0);
    assert!(cacher.coalescer().is_empty());
}

#[tokio::test]
async fn test_stale_hit_refreshes_in_background() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_roster");
    let producer = Producer::default();

    put_stale(&cacher, &key, &json!(["A"]));

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["B"]), Duration::from_millis(20)),
            json!([]),
        )
        .await;
    assert_eq!(fetched.value, json!(["A"]));
    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(producer.calls(), 1);

    settle(&cacher, &key).await;

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["C"]), Duration::ZERO),
            json!([]),
        )
        .await;
    assert_eq!(fetched.value, json!(["B"]));
    assert_eq!(fetched.status, CacheStatus::Fresh);
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn test_stale_hit_does_not_wait() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_schedule");
    let producer = Producer::default();

    put_stale(&cacher, &key, &json!([{"game": 1}]));

    let fetched = tokio::time::timeout(
        Duration::from_secs(1),
        cacher.request(&key, RefreshPolicy::new(TTL), producer.never(), json!([])),
    )
    .await
    .expect("stale request must not wait for the producer");

    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(fetched.value, json!([{"game": 1}]));
    assert!(cacher.coalescer().in_flight(&key));

    // A second stale hit joins the hanging refresh instead of starting another one.
    let fetched = cacher
        .request(&key, RefreshPolicy::new(TTL), producer.never(), json!([]))
        .await;
    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_misses_coalesce() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_schedule");
    let producer = Producer::default();
    let policy = RefreshPolicy::new(Duration::from_secs(60));
    let games = json!([{"game": 1}]);

    let (a, b, c) = futures::join!(
        cacher.request(
            &key,
            policy,
            producer.returning(games.clone(), Duration::from_millis(50)),
            json!([])
        ),
        cacher.request(
            &key,
            policy,
            producer.returning(json!(["other"]), Duration::ZERO),
            json!([])
        ),
        cacher.request(
            &key,
            policy,
            producer.returning(json!(["other"]), Duration::ZERO),
            json!([])
        ),
    );

    assert_eq!(producer.calls(), 1);
    for fetched in [a, b, c] {
        assert_eq!(fetched.status, CacheStatus::Live);
        assert_eq!(fetched.value, games);
    }
    assert!(cacher.coalescer().is_empty());
    assert_eq!(cacher.store().get::<Value>(&key).unwrap().value, games);
}

#[test]
fn test_concurrent_misses_on_multi_thread_runtime() {
    test::setup();
    let dir = test::tempdir();
    let store = Arc::new(CacheStore::open(dir.path()).unwrap());
    let cacher = Cacher::<Value>::new(store);
    let key = key("asu_hockey_stats");
    let producer = Producer::default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let results = runtime.block_on(async {
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cacher = cacher.clone();
                let key = key.clone();
                let produce = producer.returning(json!({"skaters": [1]}), Duration::from_millis(100));
                tokio::spawn(async move {
                    cacher
                        .request(&key, RefreshPolicy::new(TTL), produce, json!({}))
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    });

    assert_eq!(producer.calls(), 1);
    for fetched in results {
        assert_eq!(fetched.value, json!({"skaters": [1]}));
        assert_eq!(fetched.status, CacheStatus::Live);
    }
}

#[tokio::test]
async fn test_miss_failure_serves_fallback() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_stats");
    let producer = Producer::default();
    let fallback = json!({"skaters": [], "goalies": []});

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.failing("connection refused"),
            fallback.clone(),
        )
        .await;

    assert_eq!(fetched.status, CacheStatus::Fallback);
    assert_eq!(fetched.value, fallback);
    assert_eq!(fetched.stored_at, None);
    assert_eq!(producer.calls(), 1);
    assert!(cacher.store().get::<Value>(&key).is_none());
}

#[tokio::test]
async fn test_failure_keeps_stale_entry() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_news");
    let producer = Producer::default();

    put_stale(&cacher, &key, &json!(["old"]));
    let before = cacher.store().get::<Value>(&key).unwrap();

    for _ in 0..3 {
        let fetched = cacher
            .request(
                &key,
                RefreshPolicy::new(TTL),
                producer.failing("500 Internal Server Error"),
                json!([]),
            )
            .await;
        assert_eq!(fetched.status, CacheStatus::Stale);
        assert_eq!(fetched.value, json!(["old"]));
        settle(&cacher, &key).await;
    }

    assert_eq!(producer.calls(), 3);
    assert_eq!(cacher.store().get::<Value>(&key).unwrap(), before);
}

#[tokio::test]
async fn test_empty_result_keeps_stale_entry() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_roster");
    let producer = Producer::default();
    let policy = RefreshPolicy::new(TTL).cache_empty(false);

    put_stale(&cacher, &key, &json!(["Ryan Ebert"]));

    let fetched = cacher
        .request(&key, policy, producer.returning(json!([]), Duration::ZERO), json!([]))
        .await;
    assert_eq!(fetched.status, CacheStatus::Stale);
    settle(&cacher, &key).await;

    let entry = cacher.store().get::<Value>(&key).unwrap();
    assert_eq!(entry.value, json!(["Ryan Ebert"]));
    assert!(!entry.is_fresh());
}

#[tokio::test]
async fn test_empty_result_on_miss() {
    let (_dir, cacher) = setup();
    let producer = Producer::default();

    let skipped = key("asu_hockey_news");
    let fetched = cacher
        .request(
            &skipped,
            RefreshPolicy::new(TTL).cache_empty(false),
            producer.returning(json!([]), Duration::ZERO),
            json!(["fallback"]),
        )
        .await;
    assert_eq!(fetched.status, CacheStatus::Fallback);
    assert_eq!(fetched.value, json!(["fallback"]));
    assert!(cacher.store().get::<Value>(&skipped).is_none());

    let cached = key("asu_hockey_schedule");
    let fetched = cacher
        .request(
            &cached,
            RefreshPolicy::new(TTL),
            producer.returning(json!([]), Duration::ZERO),
            json!(["fallback"]),
        )
        .await;
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(fetched.value, json!([]));
    assert_eq!(cacher.store().get::<Value>(&cached).unwrap().value, json!([]));
}

#[tokio::test]
async fn test_miss_failure_rereads_store() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_schedule");

    // Another writer puts an entry into the store while our producer is failing.
    let store = Arc::clone(cacher.store());
    let writer_key = key.clone();
    let produce = move || async move {
        let stored_at = Utc::now() - TimeDelta::seconds(60);
        store.put_at(&writer_key, &json!(["written meanwhile"]), TTL, stored_at)?;
        Err::<Value, _>(anyhow::anyhow!("timed out"))
    };

    let fetched = cacher
        .request(&key, RefreshPolicy::new(TTL), produce, json!([]))
        .await;
    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(fetched.value, json!(["written meanwhile"]));
}

#[tokio::test]
async fn test_corrupt_entry_is_a_miss() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_news");
    let producer = Producer::default();

    let path = cacher.store().entry_path(&key);
    fs::write(&path, "{\"timestamp\":").unwrap();

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["fresh news"]), Duration::ZERO),
            json!([]),
        )
        .await;
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(fetched.value, json!(["fresh news"]));
    assert_eq!(producer.calls(), 1);

    let entry = cacher.store().get::<Value>(&key).unwrap();
    assert_eq!(entry.value, json!(["fresh news"]));
}

async fn explode() -> anyhow::Result<Value> {
    panic!("scraper exploded");
}

#[tokio::test]
async fn test_panicking_producer() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_roster");

    let fetched = cacher
        .request(&key, RefreshPolicy::new(TTL), explode, json!(["fallback"]))
        .await;
    assert_eq!(fetched.status, CacheStatus::Fallback);
    assert!(cacher.coalescer().is_empty());

    let producer = Producer::default();
    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["recovered"]), Duration::ZERO),
            json!(["fallback"]),
        )
        .await;
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(producer.calls(), 1);
}

fn explode_before_future() -> BoxFuture<'static, anyhow::Result<Value>> {
    panic!("scraper exploded before fetching");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_panicking_before_its_future() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_stats");

    let request = tokio::spawn({
        let cacher = cacher.clone();
        let key = key.clone();
        async move {
            cacher
                .request(&key, RefreshPolicy::new(TTL), explode_before_future, json!([]))
                .await
        }
    });
    let result = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .unwrap();
    assert!(result.unwrap_err().is_panic());
    assert!(cacher.coalescer().is_empty());

    let producer = Producer::default();
    let fetched = tokio::time::timeout(
        Duration::from_secs(5),
        cacher.request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!({"skaters": ["Cullen Potter"]}), Duration::ZERO),
            json!([]),
        ),
    )
    .await
    .unwrap();
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(producer.calls(), 1);
}

#[tokio::test]
async fn test_write_failure_still_serves_value() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_schedule");
    let producer = Producer::default();

    // A directory in place of the entry makes every write fail.
    fs::create_dir(cacher.store().entry_path(&key)).unwrap();

    let outcome = cacher
        .refresh(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!([{"game": 1}]), Duration::ZERO),
        )
        .await;
    assert_eq!(outcome, RefreshOutcome::Success(json!([{"game": 1}])));

    let fetched = cacher
        .request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!([{"game": 2}]), Duration::ZERO),
            json!([]),
        )
        .await;
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(fetched.value, json!([{"game": 2}]));
}

#[tokio::test]
async fn test_explicit_refresh_joins_request() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_news");
    let producer = Producer::default();

    let (fetched, outcome) = futures::join!(
        cacher.request(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["first"]), Duration::from_millis(50)),
            json!([]),
        ),
        cacher.refresh(
            &key,
            RefreshPolicy::new(TTL),
            producer.returning(json!(["second"]), Duration::ZERO),
        ),
    );

    assert_eq!(producer.calls(), 1);
    assert_eq!(fetched.value, json!(["first"]));
    assert_eq!(outcome, RefreshOutcome::Success(json!(["first"])));
}

#[tokio::test]
async fn test_refresh_ignores_freshness() {
    let (_dir, cacher) = setup();
    let key = key("asu_hockey_roster");
    let producer = Producer::default();

    cacher
        .store()
        .put(&key, &json!(["A"]), Duration::from_secs(3600))
        .unwrap();

    let outcome = cacher
        .refresh(
            &key,
            RefreshPolicy::new(Duration::from_secs(3600)),
            producer.returning(json!(["B"]), Duration::ZERO),
        )
        .await;
    assert!(outcome.is_success());
    assert_eq!(producer.calls(), 1);
    assert_eq!(cacher.store().get::<Value>(&key).unwrap().value, json!(["B"]));
}
