//! Lifecycle hooks.
//!
//! Four ordered sequences of async callbacks run at fixed points of a call:
//! before each attempt, before each redirect hop, before each retry and
//! after the terminal response. Hooks of one sequence run serially in
//! registration order; the first error stops the sequence and becomes the
//! terminal error of the call.

use crate::base::neterror::{BoxError, RequestError};
use crate::http::response::Response;
use crate::urlrequest::events::EventSink;
use crate::urlrequest::job::RequestJob;
use crate::urlrequest::options::{Options, RequestDescriptor};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Alias for the `Future` type returned by a hook.
pub type HookFuture<'a, T = ()> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Runs once per attempt, before the request is dispatched.
pub trait BeforeRequestHook: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut RequestDescriptor) -> HookFuture<'a>;
}

/// Runs once per redirect hop with the descriptor of the next request.
pub trait BeforeRedirectHook: Send + Sync {
    fn call<'a>(&'a self, request: &'a mut RequestDescriptor) -> HookFuture<'a>;
}

/// Runs once per retry, after the backoff delay.
pub trait BeforeRetryHook: Send + Sync {
    fn call<'a>(
        &'a self,
        request: &'a mut RequestDescriptor,
        error: &'a RequestError,
        retry_count: u32,
    ) -> HookFuture<'a>;
}

/// Runs once on the terminal response and returns the response to deliver.
pub trait AfterResponseHook: Send + Sync {
    fn call<'a>(&'a self, response: Response, retry: RetryWithMergedOptions)
        -> HookFuture<'a, Response>;
}

impl<F> BeforeRequestHook for F
where
    F: for<'a> Fn(&'a mut RequestDescriptor) -> HookFuture<'a> + Send + Sync,
{
    fn call<'a>(&'a self, request: &'a mut RequestDescriptor) -> HookFuture<'a> {
        self(request)
    }
}

/// A closure registered as a `beforeRedirect` hook.
struct RedirectFn<F>(F);

impl<F> BeforeRedirectHook for RedirectFn<F>
where
    F: for<'a> Fn(&'a mut RequestDescriptor) -> HookFuture<'a> + Send + Sync,
{
    fn call<'a>(&'a self, request: &'a mut RequestDescriptor) -> HookFuture<'a> {
        (self.0)(request)
    }
}

impl<F> BeforeRetryHook for F
where
    F: for<'a> Fn(&'a mut RequestDescriptor, &'a RequestError, u32) -> HookFuture<'a>
        + Send
        + Sync,
{
    fn call<'a>(
        &'a self,
        request: &'a mut RequestDescriptor,
        error: &'a RequestError,
        retry_count: u32,
    ) -> HookFuture<'a> {
        self(request, error, retry_count)
    }
}

impl<F> AfterResponseHook for F
where
    F: Fn(Response, RetryWithMergedOptions) -> HookFuture<'static, Response> + Send + Sync,
{
    fn call<'a>(
        &'a self,
        response: Response,
        retry: RetryWithMergedOptions,
    ) -> HookFuture<'a, Response> {
        self(response, retry)
    }
}

/// The four hook sequences of a call.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_request: Vec<Arc<dyn BeforeRequestHook>>,
    pub before_redirect: Vec<Arc<dyn BeforeRedirectHook>>,
    pub before_retry: Vec<Arc<dyn BeforeRetryHook>>,
    pub after_response: Vec<Arc<dyn AfterResponseHook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("before_redirect", &self.before_redirect.len())
            .field("before_retry", &self.before_retry.len())
            .field("after_response", &self.after_response.len())
            .finish()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty()
            && self.before_redirect.is_empty()
            && self.before_retry.is_empty()
            && self.after_response.is_empty()
    }

    pub fn before_request<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestDescriptor) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.before_request.push(Arc::new(hook));
        self
    }

    /// Register a synchronous `beforeRequest` hook.
    pub fn before_request_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&mut RequestDescriptor) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_request(move |request| {
            let result = hook(request);
            Box::pin(async move { result })
        })
    }

    pub fn before_redirect<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestDescriptor) -> HookFuture<'a> + Send + Sync + 'static,
    {
        self.before_redirect.push(Arc::new(RedirectFn(hook)));
        self
    }

    pub fn before_redirect_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&mut RequestDescriptor) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.before_redirect(move |request| {
            let result = hook(request);
            Box::pin(async move { result })
        })
    }

    pub fn before_retry<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestDescriptor, &'a RequestError, u32) -> HookFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        self.before_retry.push(Arc::new(hook));
        self
    }

    pub fn before_retry_sync<F>(self, hook: F) -> Self
    where
        F: Fn(&mut RequestDescriptor, &RequestError, u32) -> Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.before_retry(move |request, error, retry_count| {
            let result = hook(request, error, retry_count);
            Box::pin(async move { result })
        })
    }

    pub fn after_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(Response, RetryWithMergedOptions) -> HookFuture<'static, Response>
            + Send
            + Sync
            + 'static,
    {
        self.after_response.push(Arc::new(hook));
        self
    }

    pub(crate) async fn run_before_request(
        &self,
        request: &mut RequestDescriptor,
    ) -> Result<(), RequestError> {
        for hook in &self.before_request {
            hook.call(request).await.map_err(RequestError::hook)?;
        }
        Ok(())
    }

    pub(crate) async fn run_before_redirect(
        &self,
        request: &mut RequestDescriptor,
    ) -> Result<(), RequestError> {
        for hook in &self.before_redirect {
            hook.call(request).await.map_err(RequestError::hook)?;
        }
        Ok(())
    }

    pub(crate) async fn run_before_retry(
        &self,
        request: &mut RequestDescriptor,
        error: &RequestError,
        retry_count: u32,
    ) -> Result<(), RequestError> {
        for hook in &self.before_retry {
            hook.call(request, error, retry_count)
                .await
                .map_err(RequestError::hook)?;
        }
        Ok(())
    }

    pub(crate) async fn run_after_response(
        &self,
        mut response: Response,
        context: &UpgradeContext,
    ) -> Result<Response, RequestError> {
        for (index, hook) in self.after_response.iter().enumerate() {
            let retry = RetryWithMergedOptions {
                context: context.clone(),
                hook_index: index,
            };
            response = hook.call(response, retry).await.map_err(RequestError::hook)?;
        }
        Ok(response)
    }
}

/// What an `afterResponse` hook needs to re-issue the call.
#[derive(Clone)]
pub(crate) struct UpgradeContext {
    pub(crate) request: RequestDescriptor,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: EventSink,
}

/// Handed to each `afterResponse` hook: re-issues the request with extra
/// options and yields the new response.
///
/// The re-issued request never retries, never fails on HTTP status, and only
/// runs the `afterResponse` hooks registered before the current one.
pub struct RetryWithMergedOptions {
    context: UpgradeContext,
    hook_index: usize,
}

impl fmt::Debug for RetryWithMergedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryWithMergedOptions")
            .field("url", &self.context.request.url.as_str())
            .field("hook_index", &self.hook_index)
            .finish()
    }
}

impl RetryWithMergedOptions {
    pub async fn retry(self, options: Options) -> Result<Response, RequestError> {
        let UpgradeContext {
            mut request,
            cancel,
            events,
        } = self.context;

        request.overlay(options)?;
        request.retry = crate::http::retry::RetryPolicy::disabled();
        request.throw_http_errors = false;

        let mut hooks = (*request.hooks).clone();
        hooks.after_response.truncate(self.hook_index);
        request.hooks = Arc::new(hooks);

        tracing::debug!(url = %request.url, "re-issuing request from afterResponse hook");
        let job = RequestJob::nested(request, cancel, events);
        Box::pin(job.run()).await
    }
}
