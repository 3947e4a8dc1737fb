//! Redirect following.
//!
//! Decides whether a 3xx response is followed, derives the descriptor of the
//! next hop and keeps the chain of URLs that answered with a redirect.

use crate::base::neterror::RequestError;
use crate::http::requestbody::RequestBody;
use crate::http::response::ResponseHead;
use crate::urlrequest::options::RequestDescriptor;
use http::header::{self, HeaderName};
use http::{Method, StatusCode};
use url::Url;

/// Statuses that redirect any method.
const ANY_METHOD: [u16; 4] = [300, 303, 307, 308];

/// Statuses that redirect only `GET` and `HEAD`.
const SAFE_METHOD_ONLY: [u16; 3] = [301, 302, 305];

/// Headers describing a body that a method downgrade removes.
const BODY_HEADERS: [HeaderName; 3] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

/// Whether `status` redirects a request made with `method`.
pub fn is_redirect(status: StatusCode, method: &Method) -> bool {
    let code = status.as_u16();
    if ANY_METHOD.contains(&code) {
        return true;
    }
    SAFE_METHOD_ONLY.contains(&code) && (method == Method::GET || method == Method::HEAD)
}

/// Target of the redirect announced by `head`, if it is to be followed.
///
/// A relative `Location` is resolved against the URL that produced the
/// response.
pub fn redirect_target(
    request: &RequestDescriptor,
    head: &ResponseHead,
) -> Option<Result<Url, RequestError>> {
    if !request.follow_redirect || !is_redirect(head.status, &request.method) {
        return None;
    }
    let location = head.headers.get(header::LOCATION)?;
    let target = location
        .to_str()
        .map_err(|e| RequestError::validation(format!("Invalid redirect location: {e}")))
        .and_then(|location| {
            head.url.join(location).map_err(|e| {
                RequestError::validation(format!("Invalid redirect location {location:?}: {e}"))
            })
        });
    Some(target)
}

/// Derive the descriptor of the next hop.
pub fn redirected(
    request: &RequestDescriptor,
    status: StatusCode,
    target: Url,
) -> Result<RequestDescriptor, RequestError> {
    if !matches!(target.scheme(), "http" | "https") {
        return Err(
            RequestError::unsupported_protocol(format!("{}:", target.scheme())).with_url(target),
        );
    }

    let mut next = request.clone();
    if status == StatusCode::SEE_OTHER && next.method != Method::GET && next.method != Method::HEAD
    {
        next.method = Method::GET;
        next.body = RequestBody::Empty;
        for name in &BODY_HEADERS {
            next.headers.remove(name);
        }
    }

    if target.origin() != request.url.origin() {
        next.headers.remove(header::AUTHORIZATION);
        next.headers.remove(header::HOST);
    }

    next.url = target;
    Ok(next)
}

/// URLs that answered with a redirect during one logical call.
#[derive(Debug, Clone)]
pub struct RedirectChain {
    urls: Vec<Url>,
    max: u32,
}

impl RedirectChain {
    pub fn new(max: u32) -> Self {
        Self {
            urls: Vec::new(),
            max,
        }
    }

    /// Record a hop from `url`. Fails once the chain already holds `max`
    /// entries.
    pub fn push(&mut self, url: Url) -> Result<(), RequestError> {
        if self.urls.len() as u64 >= u64::from(self.max) {
            return Err(RequestError::max_redirects(self.urls.clone()));
        }
        self.urls.push(url);
        Ok(())
    }

    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn into_urls(self) -> Vec<Url> {
        self.urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::neterror::ErrorKind;
    use crate::urlrequest::options::Options;
    use http::{HeaderMap, HeaderValue, Version};
    use serde_json::json;

    fn descriptor(target: &str, options: Options) -> RequestDescriptor {
        RequestDescriptor::from_options(target.into(), options).unwrap()
    }

    fn head(status: u16, location: Option<&'static str>) -> ResponseHead {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(header::LOCATION, HeaderValue::from_static(location));
        }
        ResponseHead {
            status: StatusCode::from_u16(status).unwrap(),
            status_message: None,
            version: Version::HTTP_11,
            headers,
            url: Url::parse("http://example.com/a/b").unwrap(),
        }
    }

    #[test]
    fn test_method_rules() {
        for code in [300, 303, 307, 308] {
            assert!(is_redirect(StatusCode::from_u16(code).unwrap(), &Method::POST));
        }
        for code in [301, 302, 305] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(is_redirect(status, &Method::GET));
            assert!(is_redirect(status, &Method::HEAD));
            assert!(!is_redirect(status, &Method::POST));
        }
        assert!(!is_redirect(StatusCode::NOT_MODIFIED, &Method::GET));
    }

    #[test]
    fn test_relative_location_resolves_against_response_url() {
        let request = descriptor("http://example.com/a/b", Options::new());
        let target = redirect_target(&request, &head(302, Some("../c?x=1")))
            .unwrap()
            .unwrap();
        assert_eq!(target.as_str(), "http://example.com/c?x=1");
    }

    #[test]
    fn test_not_followed() {
        let request = descriptor("http://example.com/", Options::new().follow_redirect(false));
        assert!(redirect_target(&request, &head(301, Some("/next"))).is_none());

        let request = descriptor("http://example.com/", Options::new());
        assert!(redirect_target(&request, &head(301, None)).is_none());
    }

    #[test]
    fn test_see_other_downgrades_to_get() {
        let request = descriptor(
            "http://example.com/submit",
            Options::new()
                .method(Method::POST)
                .json(true)
                .body(json!({"a": 1})),
        );
        assert!(request.headers.contains_key(header::CONTENT_TYPE));

        let next = redirected(
            &request,
            StatusCode::SEE_OTHER,
            Url::parse("http://example.com/done").unwrap(),
        )
        .unwrap();
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_empty());
        assert!(!next.headers.contains_key(header::CONTENT_TYPE));
        assert!(!next.headers.contains_key(header::CONTENT_LENGTH));
    }

    #[test]
    fn test_temporary_redirect_keeps_body() {
        let request = descriptor(
            "http://example.com/submit",
            Options::new().method(Method::POST).body("payload"),
        );
        let next = redirected(
            &request,
            StatusCode::TEMPORARY_REDIRECT,
            Url::parse("http://example.com/other").unwrap(),
        )
        .unwrap();
        assert_eq!(next.method, Method::POST);
        assert!(!next.body.is_empty());
    }

    #[test]
    fn test_authorization_stripped_cross_origin() {
        let request = descriptor(
            "http://example.com/",
            Options::new().header("authorization", "Bearer token"),
        );

        let same = redirected(
            &request,
            StatusCode::FOUND,
            Url::parse("http://example.com/next").unwrap(),
        )
        .unwrap();
        assert!(same.headers.contains_key(header::AUTHORIZATION));

        let other = redirected(
            &request,
            StatusCode::FOUND,
            Url::parse("http://other.example/").unwrap(),
        )
        .unwrap();
        assert!(!other.headers.contains_key(header::AUTHORIZATION));
    }

    #[test]
    fn test_unsupported_scheme() {
        let request = descriptor("http://example.com/", Options::new());
        let err = redirected(
            &request,
            StatusCode::FOUND,
            Url::parse("ftp://example.com/file").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::UnsupportedProtocol { protocol } if protocol == "ftp:"
        ));
    }

    #[test]
    fn test_chain_bounded() {
        let mut chain = RedirectChain::new(2);
        let url = Url::parse("http://example.com/").unwrap();
        chain.push(url.clone()).unwrap();
        chain.push(url.clone()).unwrap();

        let err = chain.push(url).unwrap_err();
        match err.kind() {
            ErrorKind::MaxRedirects { redirect_urls } => assert_eq!(redirect_urls.len(), 2),
            other => panic!("unexpected error kind: {other:?}"),
        }
        assert_eq!(chain.len(), 2);
    }
}
