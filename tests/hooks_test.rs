mod common;

use common::{Outcome, Scripted};
use fetchnet::{BoxError, Client, ErrorKind, Hooks, Options, RequestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn client(agent: &Scripted, hooks: Hooks) -> Client {
    Client::builder()
        .agent(agent.clone())
        .retries(0)
        .hooks(hooks)
        .build()
}

#[tokio::test]
async fn test_before_request_mutation_is_sent() {
    let agent = Scripted::new([Outcome::ok("")]);
    let hooks = Hooks::new().before_request_sync(|request| {
        request.headers.insert("x-signed", "yes".parse().unwrap());
        request.url.set_path("/signed");
        Ok(())
    });

    client(&agent, hooks)
        .get("http://example.com/raw", Options::new())
        .await
        .unwrap();

    let requests = agent.requests();
    assert_eq!(requests[0].headers["x-signed"], "yes");
    assert_eq!(requests[0].url.path(), "/signed");
}

#[tokio::test(start_paused = true)]
async fn test_async_before_request_runs_every_attempt() {
    let agent = Scripted::new([Outcome::Fail("ECONNRESET"), Outcome::ok("")]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let hooks = Hooks::new().before_request(move |_| {
        let counter = counter.clone();
        Box::pin(async move {
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        })
    });

    Client::builder()
        .agent(agent.clone())
        .hooks(hooks)
        .build()
        .get("http://example.com/", Options::new())
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_before_request_error_is_terminal() {
    let agent = Scripted::new([Outcome::ok("")]);
    let hooks = Hooks::new().before_request_sync(|_| Err("no credentials".into()));

    let err = Client::builder()
        .agent(agent.clone())
        .hooks(hooks)
        .build()
        .get("http://example.com/", Options::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), &ErrorKind::Hook);
    assert_eq!(err.code(), "ERR_HOOK");
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn test_after_response_upgrade_reissues_once() {
    let agent = Scripted::new([Outcome::status(401), Outcome::ok("secret")]);
    let hooks = Hooks::new().after_response(|response, retry| {
        Box::pin(async move {
            if response.status().as_u16() == 401 {
                let upgraded = retry
                    .retry(Options::new().header("authorization", "token fresh"))
                    .await;
                return upgraded.map_err(BoxError::from);
            }
            Ok(response)
        })
    });

    let response = client(&agent, hooks)
        .get("http://example.com/", Options::new())
        .await
        .unwrap();

    assert_eq!(response.text(), Some("secret"));
    let requests = agent.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].headers.contains_key("authorization"));
    assert_eq!(requests[1].headers["authorization"], "token fresh");
}

#[tokio::test]
async fn test_after_response_runs_before_status_check() {
    let agent = Scripted::new([Outcome::status(500)]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let hooks = Hooks::new().after_response(move |response, _| {
        record.lock().unwrap().push(response.status().as_u16());
        Box::pin(async move { Ok::<_, BoxError>(response) })
    });

    let err = client(&agent, hooks)
        .get("http://example.com/", Options::new())
        .await
        .unwrap_err();

    assert_eq!(*seen.lock().unwrap(), vec![500]);
    assert_eq!(err.name(), "HTTPError");
    assert_eq!(err.response().map(|r| r.status().as_u16()), Some(500));
}

#[tokio::test]
async fn test_after_response_skipped_for_redirect_hops() {
    let agent = Scripted::new([Outcome::redirect(302, "/next"), Outcome::ok("")]);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let hooks = Hooks::new().after_response(move |response, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok::<_, BoxError>(response) })
    });

    client(&agent, hooks)
        .get("http://example.com/", Options::new())
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_request_error_from_hook_keeps_its_kind() {
    let agent = Scripted::new([Outcome::ok("")]);
    let hooks = Hooks::new().after_response(|_, _| {
        Box::pin(async {
            Err::<fetchnet::Response, BoxError>(Box::new(RequestError::validation("rejected body")))
        })
    });

    let err = client(&agent, hooks)
        .get("http://example.com/", Options::new())
        .await
        .unwrap_err();

    assert_eq!(err.name(), "ValidationError");
    assert_eq!(err.to_string(), "rejected body");
}

#[tokio::test]
async fn test_per_call_hooks_replace_client_hooks() {
    let agent = Scripted::new([Outcome::ok("")]);
    let client_hooks = Hooks::new().before_request_sync(|request| {
        request.headers.insert("x-from", "client".parse().unwrap());
        Ok(())
    });
    let call_hooks = Hooks::new().before_request_sync(|request| {
        request.headers.insert("x-call", "1".parse().unwrap());
        Ok(())
    });

    client(&agent, client_hooks)
        .get("http://example.com/", Options::new().hooks(call_hooks))
        .await
        .unwrap();

    let headers = &agent.requests()[0].headers;
    assert!(headers.contains_key("x-call"));
    assert!(!headers.contains_key("x-from"));
}
