use std::time::Duration;

use rinkside_service::caching::{CacheStatus, RefreshError, RefreshOutcome};
use serde_json::json;

use crate::{Reply, Upstream, resource, setup_service};

#[tokio::test]
async fn test_fetch_caches_upstream() {
    let upstream = Upstream::new();
    upstream.respond("/roster.json", Reply::json(json!([{"name": "Cruz Lucius"}])));

    let (service, cache_dir) = setup_service(|config| {
        config.resources.insert(
            "roster".into(),
            resource(&upstream, "/roster.json", Duration::from_secs(3600)),
        );
    });

    let fetched = service.fetch("roster").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Live);
    assert_eq!(fetched.value, json!([{"name": "Cruz Lucius"}]));

    let fetched = service.fetch("roster").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Fresh);
    assert_eq!(upstream.hits("/roster.json"), 1);

    assert!(cache_dir.path().join("asu_hockey_roster").is_file());
}

#[tokio::test]
async fn test_unknown_resource() {
    let (service, _cache_dir) = setup_service(|_| {});

    assert!(service.fetch("standings").await.is_none());
    assert!(service.refresh("standings").await.is_none());
}

#[tokio::test]
async fn test_fallback_when_upstream_down() {
    let upstream = Upstream::new();
    upstream.respond("/stats.json", Reply::status(503));

    let (service, _cache_dir) = setup_service(|config| {
        let mut stats = resource(&upstream, "/stats.json", Duration::from_secs(3600));
        stats.fallback = json!({"skaters": [], "goalies": []});
        config.resources.insert("stats".into(), stats);
    });

    let fetched = service.fetch("stats").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Fallback);
    assert_eq!(fetched.value, json!({"skaters": [], "goalies": []}));
    // one attempt plus two retries
    assert_eq!(upstream.hits("/stats.json"), 3);
}

#[tokio::test]
async fn test_concurrent_fetches_hit_upstream_once() {
    let upstream = Upstream::new();
    upstream.respond(
        "/schedule.json",
        Reply::json(json!([{"opponent": "Minnesota"}])).delayed(Duration::from_millis(100)),
    );

    let (service, _cache_dir) = setup_service(|config| {
        config.resources.insert(
            "schedule".into(),
            resource(&upstream, "/schedule.json", Duration::from_secs(3600)),
        );
    });

    let results = futures::future::join_all((0..5).map(|_| service.fetch("schedule"))).await;

    assert_eq!(upstream.hits("/schedule.json"), 1);
    for fetched in results {
        let fetched = fetched.unwrap();
        assert_eq!(fetched.status, CacheStatus::Live);
        assert_eq!(fetched.value, json!([{"opponent": "Minnesota"}]));
    }
}

#[tokio::test]
async fn test_stale_served_while_refreshing() {
    let upstream = Upstream::new();
    upstream
        .respond_once("/news.json", Reply::json(json!([{"title": "old"}])))
        .respond("/news.json", Reply::json(json!([{"title": "new"}])));

    let (service, _cache_dir) = setup_service(|config| {
        config.resources.insert(
            "news".into(),
            resource(&upstream, "/news.json", Duration::from_millis(200)),
        );
    });

    let fetched = service.fetch("news").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Live);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let fetched = service.fetch("news").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(fetched.value, json!([{"title": "old"}]));

    let key = &service.resource("news").unwrap().key;
    for _ in 0..100 {
        if !service.cacher().coalescer().in_flight(key) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let fetched = service.fetch("news").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Fresh);
    assert_eq!(fetched.value, json!([{"title": "new"}]));
    assert_eq!(upstream.hits("/news.json"), 2);
}

#[tokio::test]
async fn test_empty_upstream_keeps_stale_data() {
    let upstream = Upstream::new();
    upstream
        .respond_once("/roster.json", Reply::json(json!(["Ryan Ebert"])))
        .respond("/roster.json", Reply::json(json!([])));

    let (service, _cache_dir) = setup_service(|config| {
        config.resources.insert(
            "roster".into(),
            resource(&upstream, "/roster.json", Duration::from_millis(200)),
        );
    });

    assert!(service.refresh("roster").await.unwrap().is_success());

    let outcome = service.refresh("roster").await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Failure(RefreshError::EmptyResult));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let fetched = service.fetch("roster").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Stale);
    assert_eq!(fetched.value, json!(["Ryan Ebert"]));
}

#[tokio::test]
async fn test_refresh_all() {
    let upstream = Upstream::new();
    upstream
        .respond("/news.json", Reply::json(json!([{"title": "Sun Devils sweep"}])))
        .respond("/stats.json", Reply::status(500));

    let (service, _cache_dir) = setup_service(|config| {
        config.resources.insert(
            "news".into(),
            resource(&upstream, "/news.json", Duration::from_secs(3600)),
        );
        config.resources.insert(
            "stats".into(),
            resource(&upstream, "/stats.json", Duration::from_secs(3600)),
        );
    });

    let names: Vec<_> = service.resources().map(|r| r.name.clone()).collect();
    assert_eq!(names, ["news", "stats"]);

    let results = service.refresh_all(&names).await;
    assert_eq!(results.len(), 2);

    let (name, news) = &results[0];
    assert_eq!(name, "news");
    assert!(news.as_ref().unwrap().is_success());

    let (name, stats) = &results[1];
    assert_eq!(name, "stats");
    assert!(matches!(
        stats,
        Some(RefreshOutcome::Failure(RefreshError::Producer(_)))
    ));

    let fetched = service.fetch("news").await.unwrap();
    assert_eq!(fetched.status, CacheStatus::Fresh);
}
