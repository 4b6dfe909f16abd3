mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::StatusCode;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::rss;
use news_relay::feed::{FeedFetcher, FetchCause};
use news_relay::models::Source;

fn fetcher() -> FeedFetcher {
    FeedFetcher::new(Duration::from_secs(2)).unwrap()
}

async fn serve(server: &MockServer, at: &str, status: u16, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(status)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn items_come_back_in_the_requested_zone() {
    let server = MockServer::start().await;
    let published = Utc.with_ymd_and_hms(2024, 10, 21, 7, 28, 0).unwrap();
    serve(
        &server,
        "/feed",
        200,
        rss(&[
            ("Item 1", "http://example.com/1", published),
            ("Item 2", "http://example.com/2", published),
        ]),
    )
    .await;

    let items = fetcher()
        .fetch(&format!("{}/feed", server.uri()), Tz::Europe__Moscow)
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Item 1");
    assert_eq!(items[0].link, "http://example.com/1");
    assert_eq!(items[0].description, "About Item 1");
    assert_eq!(items[0].published_at.to_rfc3339(), "2024-10-21T10:28:00+03:00");
}

#[tokio::test]
async fn non_200_status_is_a_fetch_error() {
    let server = MockServer::start().await;
    serve(&server, "/gone", 404, String::new()).await;

    let err = fetcher()
        .fetch(&format!("{}/gone", server.uri()), Tz::UTC)
        .await
        .unwrap_err();
    assert!(err.url.ends_with("/gone"));
    assert!(matches!(err.cause, FetchCause::Status(StatusCode::NOT_FOUND)));
}

#[tokio::test]
async fn malformed_document_is_a_parse_error() {
    let server = MockServer::start().await;
    serve(&server, "/junk", 200, "<html>not a feed".to_string()).await;

    let err = fetcher()
        .fetch(&format!("{}/junk", server.uri()), Tz::UTC)
        .await
        .unwrap_err();
    assert!(matches!(err.cause, FetchCause::Parse(_)));
}

#[tokio::test]
async fn fetch_all_reports_every_source() {
    let server = MockServer::start().await;
    let published = Utc::now();
    serve(&server, "/ok", 200, rss(&[("A", "http://example.com/a", published)])).await;
    serve(&server, "/bad", 500, String::new()).await;

    let sources = vec![
        Source {
            id: 1,
            name: "ok".into(),
            url: format!("{}/ok", server.uri()),
        },
        Source {
            id: 2,
            name: "bad".into(),
            url: format!("{}/bad", server.uri()),
        },
    ];
    let mut results = fetcher().fetch_all(sources, Tz::UTC, 2).await;
    results.sort_by_key(|(source, _)| source.id);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].1.as_ref().unwrap().len(), 1);
    assert!(results[1].1.is_err());
}
