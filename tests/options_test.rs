mod common;

use common::{Outcome, Scripted};
use fetchnet::urlrequest::TargetParts;
use fetchnet::{Client, ErrorKind, Options};
use http::Method;
use serde::Serialize;
use serde_json::json;

fn client(agent: &Scripted) -> Client {
    Client::builder().agent(agent.clone()).build()
}

#[tokio::test]
async fn test_defaults_headers() {
    let agent = Scripted::new([Outcome::ok("")]);
    client(&agent).get("http://example.com/", Options::new()).await.unwrap();

    let headers = &agent.requests()[0].headers;
    assert!(headers["user-agent"].to_str().unwrap().starts_with("fetchnet/"));
    assert_eq!(headers["accept-encoding"], "gzip, deflate");
    assert!(!headers.contains_key("content-length"));
}

#[tokio::test]
async fn test_call_header_overrides_client_header() {
    let agent = Scripted::new([Outcome::ok("")]);
    let client = Client::builder()
        .agent(agent.clone())
        .header("user-agent", "custom/1.0")
        .header("x-team", "core")
        .build();

    client
        .get("http://example.com/", Options::new().header("x-team", "edge"))
        .await
        .unwrap();

    let headers = &agent.requests()[0].headers;
    assert_eq!(headers["user-agent"], "custom/1.0");
    assert_eq!(headers.get_all("x-team").iter().count(), 1);
    assert_eq!(headers["x-team"], "edge");
}

#[tokio::test]
async fn test_query_replaces_url_params() {
    let agent = Scripted::new([Outcome::ok("")]);
    client(&agent)
        .get(
            "http://example.com/search?q=old&page=2",
            Options::new().query("q", "new").query("limit", 10),
        )
        .await
        .unwrap();

    let url = &agent.requests()[0].url;
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("q".into(), "new".into())));
    assert!(pairs.contains(&("page".into(), "2".into())));
    assert!(pairs.contains(&("limit".into(), "10".into())));
    assert!(!pairs.contains(&("q".into(), "old".into())));
}

#[tokio::test]
async fn test_json_body_sets_headers() {
    let agent = Scripted::new([Outcome::ok("{\"created\":true}")]);
    let response = client(&agent)
        .post(
            "http://example.com/items",
            Options::new().json_body(&json!({"name": "widget"})),
        )
        .await
        .unwrap();

    assert_eq!(response.body().as_json(), Some(&json!({"created": true})));
    let sent = &agent.requests()[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.headers["content-type"], "application/json");
    assert_eq!(sent.headers["accept"], "application/json");
    assert_eq!(sent.body, "{\"name\":\"widget\"}");
    assert_eq!(sent.headers["content-length"], "17");
}

#[derive(Serialize)]
struct Login<'a> {
    user: &'a str,
    pass: &'a str,
}

#[tokio::test]
async fn test_form_body() {
    let agent = Scripted::new([Outcome::ok("")]);
    client(&agent)
        .post(
            "http://example.com/login",
            Options::new().form_body(&Login {
                user: "ann",
                pass: "a b",
            }),
        )
        .await
        .unwrap();

    let sent = &agent.requests()[0];
    assert_eq!(sent.headers["content-type"], "application/x-www-form-urlencoded");
    let mut fields: Vec<(String, String)> = url::form_urlencoded::parse(&sent.body)
        .into_owned()
        .collect();
    fields.sort();
    assert_eq!(
        fields,
        vec![
            ("pass".to_string(), "a b".to_string()),
            ("user".to_string(), "ann".to_string())
        ]
    );
}

#[tokio::test]
async fn test_get_with_body_is_rejected() {
    let agent = Scripted::new([Outcome::ok("")]);
    let err = client(&agent)
        .get("http://example.com/", Options::new().body("payload"))
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::Validation(_)));
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn test_structured_body_needs_json_or_form() {
    let agent = Scripted::new([Outcome::ok("")]);
    let err = client(&agent)
        .post("http://example.com/", Options::new().body(json!({"a": 1})))
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ValidationError");
}

#[tokio::test]
async fn test_invalid_header_fails_call() {
    let agent = Scripted::new([Outcome::ok("")]);
    let err = client(&agent)
        .get("http://example.com/", Options::new().header("bad header", "x"))
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ValidationError");
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_protocol() {
    let agent = Scripted::new([Outcome::ok("")]);
    let err = client(&agent)
        .get("ftp://example.com/file", Options::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.kind(),
        &ErrorKind::UnsupportedProtocol {
            protocol: "ftp:".to_string()
        }
    );
    assert_eq!(err.to_string(), "Unsupported protocol \"ftp:\"");
}

#[tokio::test]
async fn test_target_from_parts() {
    let agent = Scripted::new([Outcome::ok("")]);
    let target = TargetParts {
        protocol: "http:".to_string(),
        hostname: "example.com".to_string(),
        port: Some(8080),
        path: "status?verbose=1".to_string(),
    };

    client(&agent).get(target, Options::new()).await.unwrap();

    assert_eq!(
        agent.requests()[0].url.as_str(),
        "http://example.com:8080/status?verbose=1"
    );
}

#[tokio::test]
async fn test_relative_target_without_base_url() {
    let agent = Scripted::new([Outcome::ok("")]);
    let err = client(&agent)
        .get("/relative", Options::new())
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ValidationError");
}
