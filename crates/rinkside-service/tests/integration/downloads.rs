use rinkside_service::download::Downloader;
use serde_json::json;

use crate::{Reply, Upstream, fast_http};

#[tokio::test]
async fn test_success_without_retry() {
    rinkside_test::setup();
    let upstream = Upstream::new();
    upstream.respond("/roster.json", Reply::json(json!([{"name": "Ryan Ebert"}])));

    let downloader = Downloader::new(&fast_http()).unwrap();
    let value = downloader
        .fetch_json(&upstream.url("/roster.json"))
        .await
        .unwrap();

    assert_eq!(value, json!([{"name": "Ryan Ebert"}]));
    assert_eq!(upstream.hits("/roster.json"), 1);
}

#[tokio::test]
async fn test_retries_server_errors() {
    rinkside_test::setup();
    let upstream = Upstream::new();
    upstream
        .respond_once("/schedule.json", Reply::status(503))
        .respond_once("/schedule.json", Reply::status(500))
        .respond("/schedule.json", Reply::json(json!([{"game": 1}])));

    let downloader = Downloader::new(&fast_http()).unwrap();
    let value = downloader
        .fetch_json(&upstream.url("/schedule.json"))
        .await
        .unwrap();

    assert_eq!(value, json!([{"game": 1}]));
    assert_eq!(upstream.hits("/schedule.json"), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    rinkside_test::setup();
    let upstream = Upstream::new();
    upstream.respond("/stats.json", Reply::status(502));

    let downloader = Downloader::new(&fast_http()).unwrap();
    let url = upstream.url("/stats.json");
    let err = downloader.fetch_json(&url).await.unwrap_err();

    // max_retries = 2
    assert_eq!(upstream.hits("/stats.json"), 3);
    assert_eq!(
        format!("{err:#}"),
        format!("failed to fetch {url}: upstream responded with 502 Bad Gateway")
    );
}

#[tokio::test]
async fn test_no_retry_on_client_error() {
    rinkside_test::setup();
    let upstream = Upstream::new();

    let downloader = Downloader::new(&fast_http()).unwrap();
    let url = upstream.url("/missing.json");
    let err = downloader.fetch_json(&url).await.unwrap_err();

    assert_eq!(upstream.hits("/missing.json"), 1);
    assert_eq!(
        format!("{err:#}"),
        format!("failed to fetch {url}: upstream responded with 404 Not Found")
    );
}

#[tokio::test]
async fn test_no_retry_on_malformed_json() {
    rinkside_test::setup();
    let upstream = Upstream::new();
    upstream.respond("/news.json", Reply::Garbage("<html>maintenance</html>".into()));

    let downloader = Downloader::new(&fast_http()).unwrap();
    let err = downloader
        .fetch_json(&upstream.url("/news.json"))
        .await
        .unwrap_err();

    assert_eq!(upstream.hits("/news.json"), 1);
    assert!(format!("{err:#}").contains("upstream returned malformed JSON"));
}
