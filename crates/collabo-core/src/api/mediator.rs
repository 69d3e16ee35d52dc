//! The session-aware request mediator.
//!
//! Every authenticated call to the Collabo API passes through [`Mediator`],
//! which attaches the bearer token, turns responses into JSON or a
//! [`RequestError`], and ends the session when the server answers 401.

use std::sync::Arc;

use reqwest::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{self, Session, SessionError, TokenStatus};
use crate::config::Config;

use super::navigator::Navigator;
use super::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use super::RequestError;

/// Method, body and header overrides for a single request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Merged over the defaults; these win on conflict
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self::default().method(Method::POST).body(body)
    }

    pub fn put(body: Value) -> Self {
        Self::default().method(Method::PUT).body(body)
    }

    pub fn delete() -> Self {
        Self::default().method(Method::DELETE)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Panics if `key` is a `&'static str` that is not a valid header name.
    pub fn header<K: IntoHeaderName>(mut self, key: K, value: HeaderValue) -> Self {
        self.headers.insert(key, value);
        self
    }
}

/// Who a request is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Audience {
    /// Carries the session token; a 401 ends the session
    Session,
    /// No token attached; a 401 is an ordinary error (bad credentials)
    Anonymous,
}

struct Inner {
    base_address: String,
    session: Session,
    transport: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
}

/// Clone is cheap: clones share the session, transport and navigator.
#[derive(Clone)]
pub struct Mediator {
    inner: Arc<Inner>,
}

impl Mediator {
    pub fn new(
        base_address: impl Into<String>,
        session: Session,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_address: base_address.into(),
                session,
                transport,
                navigator,
            }),
        }
    }

    /// Production wiring: the configured store, a reqwest transport, and any
    /// session left over from a previous run.
    pub fn from_config(config: &Config, navigator: Arc<dyn Navigator>) -> anyhow::Result<Self> {
        let store = auth::open_store(config)?;
        let session = Session::load(store)?;
        let transport = ReqwestTransport::new()?;
        info!(base_address = %config.base_address, authenticated = session.is_authenticated(), "Mediator ready");
        Ok(Self::new(
            config.base_address.clone(),
            session,
            Arc::new(transport),
            navigator,
        ))
    }

    pub fn base_address(&self) -> &str {
        &self.inner.base_address
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    // ===== Session =====

    pub fn set_token(&self, token: &str) -> Result<(), SessionError> {
        self.inner.session.set_token(token)
    }

    pub fn clear_token(&self) {
        self.inner.session.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.session.token()
    }

    // ===== Requests =====

    /// Send an authenticated request to `{base_address}{path}` and return its JSON body.
    ///
    /// The token is read once, before sending; changing it while the request
    /// is in flight does not alter the header already sent. A 401 clears
    /// whatever token is current when the response arrives, even one set by
    /// a login that completed while this request was in flight.
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, RequestError> {
        self.dispatch(path, options, Audience::Session).await
    }

    /// Like [`Mediator::request`], deserializing the body into `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let value = self.request(path, options).await?;
        serde_json::from_value(value)
            .map_err(|e| RequestError::transport(format!("Unexpected response shape from {}: {}", path, e)))
    }

    pub async fn get(&self, path: &str) -> Result<Value, RequestError> {
        self.request(path, RequestOptions::get()).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, RequestError> {
        self.request(path, RequestOptions::post(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<Value, RequestError> {
        self.request(path, RequestOptions::put(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, RequestError> {
        self.request(path, RequestOptions::delete()).await
    }

    pub(crate) async fn dispatch(
        &self,
        path: &str,
        options: RequestOptions,
        audience: Audience,
    ) -> Result<Value, RequestError> {
        // One snapshot per request; later token changes don't reach this call
        let token = match audience {
            Audience::Session => self.inner.session.token(),
            Audience::Anonymous => None,
        };
        if let Some(ref t) = token {
            if token_looks_expired(t) {
                warn!(path, "Token looks expired locally, sending anyway");
            }
        }

        let headers = build_headers(token.as_deref(), options.headers)?;
        let url = join_url(&self.inner.base_address, path);
        let method = options.method;
        debug!(%method, %url, authenticated = token.is_some(), "Sending request");

        let request = HttpRequest {
            method,
            url,
            headers,
            body: options.body.map(|b| b.to_string().into_bytes()),
        };

        let response = match self.inner.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(path, error = %e, "Transport failure");
                return Err(RequestError::Transport { message: e.message });
            }
        };

        self.handle_response(path, response, audience)
    }

    fn handle_response(
        &self,
        path: &str,
        response: HttpResponse,
        audience: Audience,
    ) -> Result<Value, RequestError> {
        let status = response.status;

        if status == StatusCode::UNAUTHORIZED && audience == Audience::Session {
            warn!(path, "Session expired, clearing token");
            self.inner.session.clear();
            self.inner.navigator.redirect_to_login();
            return Err(RequestError::SessionExpired);
        }

        if !status.is_success() {
            let err = RequestError::from_status(status, &response.body);
            debug!(path, status = status.as_u16(), error = %err, "Request failed");
            return Err(err);
        }

        parse_body(&response.body)
    }
}

fn token_looks_expired(token: &str) -> bool {
    matches!(auth::token_status(token), TokenStatus::Expired)
}

fn build_headers(token: Option<&str>, overrides: HeaderMap) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            RequestError::transport("Stored token cannot be sent as an Authorization header")
        })?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
    }

    // Replaces per key, so caller headers win over defaults and the token
    headers.extend(overrides);
    Ok(headers)
}

fn join_url(base_address: &str, path: &str) -> String {
    match (base_address.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base_address.trim_end_matches('/'), path),
        (false, false) if !path.is_empty() => format!("{}/{}", base_address, path),
        _ => format!("{}{}", base_address, path),
    }
}

fn parse_body(body: &[u8]) -> Result<Value, RequestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| RequestError::transport(format!("Malformed response body: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{MockTransport, RecordingNavigator};
    use crate::auth::{KeyValueStore, MemoryStore, TOKEN_KEY};
    use serde::Deserialize;
    use serde_json::json;

    struct Fixture {
        mediator: Mediator,
        transport: Arc<MockTransport>,
        navigator: Arc<RecordingNavigator>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        let navigator = Arc::new(RecordingNavigator::default());
        let mediator = Mediator::new(
            "http://localhost:3000",
            Session::new(store.clone()),
            transport.clone(),
            navigator.clone(),
        );
        Fixture {
            mediator,
            transport,
            navigator,
            store,
        }
    }

    #[tokio::test]
    async fn test_bearer_header_attached_after_set_token() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(200, r#"{"name":"John Doe"}"#);

        let profile = f.mediator.request("/profile", RequestOptions::get()).await.unwrap();
        assert_eq!(profile, json!({"name": "John Doe"}));

        let sent = f.transport.last_request().unwrap();
        assert_eq!(sent.url, "http://localhost:3000/profile");
        assert_eq!(sent.method, Method::GET);
        assert_eq!(sent.headers[header::AUTHORIZATION], "Bearer abc123");
    }

    #[tokio::test]
    async fn test_no_authorization_header_without_token() {
        let f = fixture();
        f.transport.respond(200, "[]");

        f.mediator.request("/public", RequestOptions::get()).await.unwrap();

        let sent = f.transport.last_request().unwrap();
        assert!(sent.headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(sent.headers[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_unauthorized_expires_session() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(401, r#"{"detail":"Not authenticated"}"#);

        let err = f.mediator.request("/profile", RequestOptions::get()).await.unwrap_err();
        assert_eq!(err, RequestError::SessionExpired);
        assert!(!f.mediator.is_authenticated());
        assert!(!f.store.contains(TOKEN_KEY));
        assert_eq!(f.navigator.redirects(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_does_not_retry() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(401, "");

        let _ = f.mediator.get("/projects/me/42").await;
        assert_eq!(f.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_other_error_status_keeps_session() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(
            404,
            r#"{"detail":{"error":"Project not found","code":"NOT_FOUND"}}"#,
        );

        let err = f.mediator.get("/projects/missing").await.unwrap_err();
        match err {
            RequestError::Status { status, body, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Project not found");
                assert_eq!(body.unwrap()["detail"]["code"], "NOT_FOUND");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(f.mediator.is_authenticated());
        assert_eq!(f.navigator.redirects(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_token_alone() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.fail("connection refused");

        let err = f.mediator.get("/profile").await.unwrap_err();
        assert_eq!(
            err,
            RequestError::Transport {
                message: "connection refused".to_string()
            }
        );
        assert_eq!(f.mediator.token().as_deref(), Some("abc123"));
        assert_eq!(f.store.get(TOKEN_KEY).unwrap().as_deref(), Some("abc123"));
        assert_eq!(f.navigator.redirects(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_without_token() {
        let f = fixture();
        f.transport.fail("dns error");

        let err = f.mediator.get("/public").await.unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
        assert!(!f.mediator.is_authenticated());
    }

    #[tokio::test]
    async fn test_caller_headers_take_precedence() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(200, "{}");

        let options = RequestOptions::get()
            .header(header::AUTHORIZATION, HeaderValue::from_static("Bearer override"))
            .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .header("x-request-id", HeaderValue::from_static("req-1"));
        f.mediator.request("/profile", options).await.unwrap();

        let sent = f.transport.last_request().unwrap();
        assert_eq!(sent.headers[header::AUTHORIZATION], "Bearer override");
        assert_eq!(sent.headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(sent.headers["x-request-id"], "req-1");
        assert_eq!(sent.headers.get_all(header::AUTHORIZATION).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_post_sends_json_body() {
        let f = fixture();
        f.transport.respond(201, r#"{"project_id":"p-1"}"#);

        let created = f
            .mediator
            .post("/projects/create", json!({"title": "Collabo", "creator_id": "u-1"}))
            .await
            .unwrap();
        assert_eq!(created["project_id"], "p-1");

        let sent = f.transport.last_request().unwrap();
        assert_eq!(sent.method, Method::POST);
        let body: Value = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["title"], "Collabo");
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let f = fixture();
        f.transport.respond(204, "");
        assert_eq!(f.mediator.delete("/projects/p-1").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_transport_error() {
        let f = fixture();
        f.mediator.set_token("abc123").unwrap();
        f.transport.respond(200, "<html>oops</html>");

        let err = f.mediator.get("/profile").await.unwrap_err();
        match err {
            RequestError::Transport { message } => assert!(message.starts_with("Malformed response body")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(f.mediator.is_authenticated());
    }

    #[tokio::test]
    async fn test_request_as_decodes_typed_body() {
        #[derive(Debug, Deserialize)]
        struct Notification {
            message: String,
            read: bool,
        }

        let f = fixture();
        f.transport.respond(200, r#"[{"message":"New invite","read":false}]"#);

        let notes: Vec<Notification> = f
            .mediator
            .request_as("/notifications/u-1", RequestOptions::get())
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].message, "New invite");
        assert!(!notes[0].read);

        f.transport.respond(200, r#"{"unexpected":true}"#);
        let err = f
            .mediator
            .request_as::<Vec<Notification>>("/notifications/u-1", RequestOptions::get())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_clear_token_then_unauthenticated() {
        let f = fixture();
        f.mediator.clear_token();
        assert!(!f.mediator.is_authenticated());

        f.mediator.set_token("abc123").unwrap();
        f.mediator.clear_token();
        f.mediator.clear_token();
        assert!(!f.mediator.is_authenticated());

        f.transport.respond(200, "{}");
        f.mediator.get("/public").await.unwrap();
        assert!(f.transport.last_request().unwrap().headers.get(header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_clones_share_session() {
        let f = fixture();
        let view = f.mediator.clone();
        f.mediator.set_token("abc123").unwrap();
        assert!(view.is_authenticated());

        f.transport.respond(401, "");
        let _ = view.get("/profile").await;
        assert!(!f.mediator.is_authenticated());
    }

    async fn wait_for_requests(transport: &MockTransport, count: usize) {
        while transport.requests().len() < count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_in_flight_request_keeps_its_token() {
        let f = fixture();
        f.mediator.set_token("t1").unwrap();
        let gate = f.transport.hold_next();
        f.transport.respond(200, "{}");

        let view = f.mediator.clone();
        let in_flight = tokio::spawn(async move { view.get("/profile").await });
        wait_for_requests(&f.transport, 1).await;

        f.mediator.set_token("t2").unwrap();
        gate.notify_one();
        in_flight.await.unwrap().unwrap();

        assert_eq!(f.transport.requests()[0].headers[header::AUTHORIZATION], "Bearer t1");
        assert_eq!(f.mediator.token().as_deref(), Some("t2"));

        // Sent after set_token returned, so it carries the new token
        f.transport.respond(200, "{}");
        f.mediator.get("/profile").await.unwrap();
        assert_eq!(f.transport.requests()[1].headers[header::AUTHORIZATION], "Bearer t2");
    }

    #[tokio::test]
    async fn test_clear_during_flight_does_not_strip_header() {
        let f = fixture();
        f.mediator.set_token("t1").unwrap();
        let gate = f.transport.hold_next();
        f.transport.respond(200, r#"{"ok":true}"#);

        let view = f.mediator.clone();
        let in_flight = tokio::spawn(async move { view.get("/profile").await });
        wait_for_requests(&f.transport, 1).await;

        f.mediator.clear_token();
        gate.notify_one();
        assert_eq!(in_flight.await.unwrap().unwrap(), json!({"ok": true}));

        assert_eq!(f.transport.requests()[0].headers[header::AUTHORIZATION], "Bearer t1");
        assert!(!f.mediator.is_authenticated());

        f.transport.respond(200, "{}");
        f.mediator.get("/profile").await.unwrap();
        assert!(f.transport.requests()[1].headers.get(header::AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_late_unauthorized_clears_newer_token() {
        let f = fixture();
        f.mediator.set_token("old").unwrap();
        let gate = f.transport.hold_next();
        f.transport.respond(401, "");

        let view = f.mediator.clone();
        let in_flight = tokio::spawn(async move { view.get("/profile").await });
        wait_for_requests(&f.transport, 1).await;

        f.mediator.set_token("new").unwrap();
        gate.notify_one();
        assert_eq!(in_flight.await.unwrap().unwrap_err(), RequestError::SessionExpired);

        assert!(!f.mediator.is_authenticated());
        assert!(!f.store.contains(TOKEN_KEY));
        assert_eq!(f.navigator.redirects(), 1);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://localhost:3000", "/profile"), "http://localhost:3000/profile");
        assert_eq!(join_url("http://localhost:3000/", "/profile"), "http://localhost:3000/profile");
        assert_eq!(join_url("http://localhost:3000", "profile"), "http://localhost:3000/profile");
        assert_eq!(join_url("http://localhost:3000/api/", "users"), "http://localhost:3000/api/users");
        assert_eq!(join_url("http://localhost:3000", ""), "http://localhost:3000");
    }

    #[test]
    fn test_build_headers_rejects_unsendable_token() {
        let err = build_headers(Some("abc\u{7f}"), HeaderMap::new()).unwrap_err();
        assert!(matches!(err, RequestError::Transport { .. }));
    }
}
