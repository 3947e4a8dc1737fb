//! Request lifecycle controller.
//!
//! A [`RequestJob`] drives one logical call: normalization, cache lookup,
//! dispatch, retries and redirects, `afterResponse` hooks and the final
//! status check. Every suspension point is raced against the call's
//! cancellation token.

use crate::base::loadstate::LoadState;
use crate::base::neterror::RequestError;
use crate::http::hooks::UpgradeContext;
use crate::http::httpcache::{self, Cache, CachedResponse};
use crate::http::response::{Response, ResponseHead};
use crate::http::responsebody::{self, ResponseBody, StreamDecoder};
use crate::http::streamfactory::TransportResponse;
use crate::http::transaction::{Attempt, ChunkStream};
use crate::urlrequest::events::{Event, EventSink};
use crate::urlrequest::options::{Options, RequestDescriptor, Target};
use crate::urlrequest::redirect::{self, RedirectChain};
use bytes::Bytes;
use futures::StreamExt;
use http::{StatusCode, Version};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What a finished call hands back.
pub(crate) enum Delivery {
    Buffered(Response),
    /// Response head plus the body still to be read.
    Streaming(Response, ChunkStream),
}

enum Input {
    Options(Target, Options),
    Descriptor(RequestDescriptor),
}

/// Result of one attempt, as seen by the controller.
enum Step {
    Deliver(Delivery),
    Redirect { status: StatusCode, target: Url },
    /// Failed in a way the retry policy gets to judge.
    Retry(RequestError),
}

enum CacheHit {
    Fresh(Response),
    Redirect { status: StatusCode, target: Url },
}

/// Per-call bookkeeping carried across attempts.
struct Call {
    request_url: Url,
    chain: RedirectChain,
    cache_key: Option<String>,
    retry_count: u32,
    stream: bool,
}

pub struct RequestJob {
    input: Option<Input>,
    cancel: CancellationToken,
    events: EventSink,
    state: LoadState,
    top_level: bool,
}

impl RequestJob {
    /// A top-level call. The event channel is closed when it ends.
    pub fn new(target: Target, options: Options, cancel: CancellationToken, events: EventSink) -> Self {
        Self {
            input: Some(Input::Options(target, options)),
            cancel,
            events,
            state: LoadState::Idle,
            top_level: true,
        }
    }

    /// A call re-issued from inside another one. Shares the parent's token
    /// and events, and leaves the terminal event to the parent.
    pub(crate) fn nested(
        request: RequestDescriptor,
        cancel: CancellationToken,
        events: EventSink,
    ) -> Self {
        Self {
            input: Some(Input::Descriptor(request)),
            cancel,
            events,
            state: LoadState::Idle,
            top_level: false,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Run to completion and buffer the body.
    pub async fn run(self) -> Result<Response, RequestError> {
        match self.drive(false).await? {
            Delivery::Buffered(response) | Delivery::Streaming(response, _) => Ok(response),
        }
    }

    /// Run until a terminal response head arrives; the body is returned as
    /// a stream of decoded chunks.
    pub async fn run_stream(self) -> Result<(Response, ChunkStream), RequestError> {
        match self.drive(true).await? {
            Delivery::Streaming(response, body) => Ok((response, body)),
            Delivery::Buffered(response) => {
                let body = response.raw_body().clone();
                let chunks = futures::stream::iter((!body.is_empty()).then_some(Ok(body))).boxed();
                Ok((response, chunks))
            }
        }
    }

    async fn drive(mut self, stream: bool) -> Result<Delivery, RequestError> {
        let result = self.execute(stream).await;
        match &result {
            Ok(Delivery::Buffered(_)) => {
                self.transition(LoadState::Completed);
                if self.top_level {
                    self.events.close();
                }
            }
            // The body stream closes the channel when it ends.
            Ok(Delivery::Streaming(..)) => self.transition(LoadState::Completed),
            Err(error) => {
                let terminal = if error.is_cancelled() {
                    LoadState::Cancelled
                } else {
                    LoadState::Failed
                };
                self.transition(terminal);
                tracing::debug!(
                    error = %error,
                    code = error.code(),
                    url = ?error.url().map(Url::as_str),
                    "request failed"
                );
                if self.top_level {
                    self.events.fail(error.clone());
                }
            }
        }
        result
    }

    fn transition(&mut self, next: LoadState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "unexpected state transition");
        }
        tracing::debug!(from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    async fn execute(&mut self, stream: bool) -> Result<Delivery, RequestError> {
        self.transition(LoadState::Normalizing);
        let mut request = match self.input.take() {
            Some(Input::Options(target, options)) => {
                RequestDescriptor::from_options(target, options)?
            }
            Some(Input::Descriptor(request)) => request,
            None => return Err(RequestError::validation("The request was already started")),
        };

        let mut call = Call {
            request_url: request.url.clone(),
            chain: RedirectChain::new(request.max_redirects),
            cache_key: None,
            retry_count: 0,
            stream,
        };

        let mut pending = self.check_cache(&request, &mut call).await?;
        loop {
            let step = match pending.take() {
                Some(step) => step,
                None => {
                    self.transition(LoadState::Dispatching);
                    self.attempt(&mut request, &call).await?
                }
            };
            match step {
                Step::Deliver(delivery) => return Ok(delivery),
                Step::Redirect { status, target } => {
                    self.transition(LoadState::Redirecting);
                    request = self.follow(&request, &mut call, status, target).await?;
                    pending = self.check_cache(&request, &mut call).await?;
                }
                Step::Retry(error) => self.retry_or_fail(error, &mut request, &mut call).await?,
            }
        }
    }

    /// Consult the cache for the current hop. A fresh entry settles like a
    /// live response; a cached redirect is followed.
    async fn check_cache(
        &mut self,
        request: &RequestDescriptor,
        call: &mut Call,
    ) -> Result<Option<Step>, RequestError> {
        self.transition(LoadState::CacheCheck);
        call.cache_key = None;
        if call.stream || !httpcache::is_cacheable_method(&request.method) {
            return Ok(None);
        }
        let Some(cache) = request.cache.clone() else {
            return Ok(None);
        };
        let key = httpcache::cache_key(
            &request.method,
            &request.url,
            &request.headers,
            &request.cache_vary,
        );
        let hit = guard(&self.cancel, self.cache_lookup(&*cache, &key, request, call)).await?;
        call.cache_key = Some(key);
        match hit {
            None => Ok(None),
            Some(CacheHit::Redirect { status, target }) => {
                tracing::debug!(url = %request.url, to = %target, "cached redirect");
                Ok(Some(Step::Redirect { status, target }))
            }
            Some(CacheHit::Fresh(response)) => {
                tracing::debug!(url = %response.url(), "served from cache");
                self.settle(response, request).await.map(Some)
            }
        }
    }

    /// One dispatch. Errors returned here are terminal; retryable failures
    /// come back as [`Step::Retry`].
    async fn attempt(
        &mut self,
        request: &mut RequestDescriptor,
        call: &Call,
    ) -> Result<Step, RequestError> {
        let hooks = Arc::clone(&request.hooks);
        guard(&self.cancel, hooks.run_before_request(request)).await?;
        self.events.request(request);

        let mut attempt = Attempt::new(request, call.retry_count);
        let response = match attempt.send(request, &self.cancel, &self.events).await {
            Ok(response) => response,
            Err(error) => return Ok(Step::Retry(error)),
        };
        let total = response.content_length();
        let TransportResponse {
            status,
            reason,
            version,
            headers,
            body,
        } = response;
        let head = ResponseHead {
            status,
            status_message: reason,
            version,
            headers,
            url: request.url.clone(),
        };
        tracing::debug!(status = %head.status, url = %head.url, attempt = call.retry_count, "response head");
        self.events.response(&head, false);

        if let Some(target) = redirect::redirect_target(request, &head) {
            attempt.abort();
            let target = target.map_err(|e| e.with_request(&request.url, &request.method))?;
            return Ok(Step::Redirect { status, target });
        }

        if call.stream {
            let response = Response::new(head, ResponseBody::default(), call.request_url.clone())
                .with_redirects(call.chain.urls().to_vec())
                .with_retry_count(call.retry_count)
                .with_timings(attempt.timings());
            if request.throw_http_errors && !response.is_ok(request.follow_redirect) {
                attempt.abort();
                return Ok(Step::Retry(RequestError::http(response)));
            }
            let decoder = StreamDecoder::for_headers(response.headers(), request.decompress);
            let chunks = attempt.forward_body(
                body,
                total,
                decoder,
                self.cancel.clone(),
                self.events.clone(),
            );
            return Ok(Step::Deliver(Delivery::Streaming(response, chunks)));
        }

        let wire = match attempt
            .read_body(body, total, &self.cancel, &self.events)
            .await
        {
            Ok(wire) => wire,
            Err(error) => return Ok(Step::Retry(error)),
        };
        let timings = attempt.timings();
        drop(attempt);

        if let (Some(cache), Some(key)) = (request.cache.clone(), call.cache_key.as_deref()) {
            guard(&self.cancel, async {
                store(&*cache, key, &head, &wire).await;
                Ok(())
            })
            .await?;
        }

        let response = match build_response(head, wire, request, &call.request_url) {
            Ok(response) => response,
            Err(error) => return Ok(Step::Retry(error)),
        };
        let response = response
            .with_redirects(call.chain.urls().to_vec())
            .with_retry_count(call.retry_count)
            .with_timings(timings);
        self.settle(response, request).await
    }

    /// Run `afterResponse` hooks, then apply `throwHttpErrors`.
    async fn settle(
        &mut self,
        response: Response,
        request: &RequestDescriptor,
    ) -> Result<Step, RequestError> {
        let response = if request.hooks.after_response.is_empty() {
            response
        } else {
            let context = UpgradeContext {
                request: request.clone(),
                cancel: self.cancel.clone(),
                events: self.events.clone(),
            };
            let hooks = Arc::clone(&request.hooks);
            guard(&self.cancel, hooks.run_after_response(response, &context)).await?
        };

        if request.throw_http_errors && !response.is_ok(request.follow_redirect) {
            let error = RequestError::http(response).with_method(request.method.clone());
            return Ok(Step::Retry(error));
        }
        Ok(Step::Deliver(Delivery::Buffered(response)))
    }

    /// Record the hop and build the descriptor of the next request.
    async fn follow(
        &mut self,
        request: &RequestDescriptor,
        call: &mut Call,
        status: StatusCode,
        target: Url,
    ) -> Result<RequestDescriptor, RequestError> {
        call.chain
            .push(request.url.clone())
            .map_err(|e| e.with_request(&request.url, &request.method))?;

        let mut next = redirect::redirected(request, status, target)
            .map_err(|e| e.with_request(&request.url, &request.method))?;
        let hooks = Arc::clone(&next.hooks);
        guard(&self.cancel, hooks.run_before_redirect(&mut next)).await?;

        tracing::debug!(
            status = %status,
            from = %request.url,
            to = %next.url,
            hops = call.chain.len(),
            "following redirect"
        );
        self.events.emit(Event::Redirect {
            status,
            from: request.url.clone(),
            to: next.url.clone(),
        });
        Ok(next)
    }

    /// Ask the retry policy about `error`; wait out the delay and run the
    /// `beforeRetry` hooks when it says yes, otherwise hand the error back.
    async fn retry_or_fail(
        &mut self,
        error: RequestError,
        request: &mut RequestDescriptor,
        call: &mut Call,
    ) -> Result<(), RequestError> {
        let error = error.with_request(&request.url, &request.method);
        if error.is_cancelled() {
            return Err(error);
        }
        if !request.body.is_replayable() {
            tracing::debug!(error = %error, "not retrying: request body cannot be replayed");
            return Err(error);
        }

        let retry_count = call.retry_count + 1;
        let decision = request.retry.should_retry(retry_count, &error);
        if !decision.retry {
            tracing::debug!(error = %error, retry = retry_count, "not retrying");
            return Err(error);
        }

        self.transition(LoadState::Retrying);
        tracing::debug!(
            error = %error,
            code = error.code(),
            retry = retry_count,
            delay_ms = decision.delay.as_millis() as u64,
            "retrying"
        );
        guard(&self.cancel, async {
            tokio::time::sleep(decision.delay).await;
            Ok(())
        })
        .await?;

        call.retry_count = retry_count;
        let hooks = Arc::clone(&request.hooks);
        guard(&self.cancel, hooks.run_before_retry(request, &error, retry_count)).await
    }

    async fn cache_lookup(
        &self,
        cache: &dyn Cache,
        key: &str,
        request: &RequestDescriptor,
        call: &Call,
    ) -> Result<Option<CacheHit>, RequestError> {
        let raw = match cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(key, error = %e, "cache lookup failed");
                return Ok(None);
            }
        };
        let entry = match CachedResponse::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable cache entry");
                return Ok(None);
            }
        };
        if entry.is_expired() {
            if let Err(e) = cache.delete(key).await {
                tracing::warn!(key, error = %e, "cache delete failed");
            }
            return Ok(None);
        }

        let (Some(status), Ok(url), Ok(wire)) =
            (entry.status(), Url::parse(&entry.url), entry.body())
        else {
            tracing::warn!(key, "discarding malformed cache entry");
            return Ok(None);
        };
        let head = ResponseHead {
            status,
            status_message: entry.status_message.clone(),
            version: Version::HTTP_11,
            headers: entry.header_map(),
            url,
        };
        self.events.response(&head, true);
        if let Some(target) = redirect::redirect_target(request, &head) {
            let target = target.map_err(|e| e.with_request(&request.url, &request.method))?;
            return Ok(Some(CacheHit::Redirect {
                status: head.status,
                target,
            }));
        }
        build_response(head, wire, request, &call.request_url)
            .map(|r| Some(CacheHit::Fresh(r.cached())))
    }
}

/// Store a fresh response. Failures are logged and swallowed.
async fn store(cache: &dyn Cache, key: &str, head: &ResponseHead, wire: &Bytes) {
    let Some(ttl) = httpcache::cache_ttl(head.status, &head.headers) else {
        return;
    };
    let entry = CachedResponse::new(
        &head.url,
        head.status,
        head.status_message.clone(),
        &head.headers,
        wire,
        Some(ttl),
    );
    let value = match entry.to_bytes() {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(key, error = %e, "cache entry serialization failed");
            return;
        }
    };
    match cache.set(key, value, Some(ttl)).await {
        Ok(()) => tracing::debug!(key, ttl_secs = ttl.as_secs(), "stored in cache"),
        Err(e) => tracing::warn!(key, error = %e, "cache store failed"),
    }
}

/// Decompress and decode a buffered body.
///
/// A body that fails to parse as JSON is an error only on a 2xx; other
/// statuses fall back to the plain representation.
fn build_response(
    head: ResponseHead,
    wire: Bytes,
    request: &RequestDescriptor,
    request_url: &Url,
) -> Result<Response, RequestError> {
    let with_context = |e: RequestError| e.with_request(&request.url, &request.method);

    let body = if request.decompress {
        responsebody::decompress(wire, &head.headers).map_err(with_context)?
    } else {
        wire
    };
    let decoded = match responsebody::decode(&body, request.encoding, request.json) {
        Ok(decoded) => decoded,
        Err(e) if head.status.is_success() => return Err(with_context(e)),
        Err(_) => responsebody::decode(&body, request.encoding, false).map_err(with_context)?,
    };
    Ok(Response::new(head, decoded, request_url.clone()).with_raw_body(body))
}

/// Race `fut` against cancellation.
pub(crate) async fn guard<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, RequestError>
where
    F: Future<Output = Result<T, RequestError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RequestError::cancelled()),
        result = fut => result,
    }
}
