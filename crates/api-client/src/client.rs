//! HTTP client for the cairn API.
//!
//! Authenticated requests carry the session's bearer token. A 401 joins the
//! single-flight refresh and the request is replayed exactly once with the
//! new token; a second 401 is final.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{is_transport_error, ApiError, Result};
use crate::refresh::TokenRefreshCoordinator;
use crate::session::SessionManager;
use crate::types::ApiErrorResponse;

const MAX_LOG_BODY_CHARS: usize = 512;

/// Token refresh endpoint, relative to the base URL.
pub const REFRESH_PATH: &str = "/v1/auth/refresh";

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Bytes {
        content_type: &'static str,
        data: Vec<u8>,
    },
}

/// Client for the cairn REST API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    session: Arc<SessionManager>,
    refresher: TokenRefreshCoordinator,
}

impl ApiClient {
    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Create a new API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the API (e.g., "https://api.cairn.app")
    /// * `timeout` - Per-request timeout; exceeding it is a network error
    pub fn new(base_url: &str, timeout: Duration, session: Arc<SessionManager>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let refresher = TokenRefreshCoordinator::new(
            client.clone(),
            format!("{}{}", base_url, REFRESH_PATH),
            Arc::clone(&session),
        );

        Ok(Self {
            client,
            base_url,
            session,
            refresher,
        })
    }

    pub fn session(&self) -> Arc<SessionManager> {
        Arc::clone(&self.session)
    }

    pub fn refresher(&self) -> &TokenRefreshCoordinator {
        &self.refresher
    }

    fn headers(&self, token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::unauthorized("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }
        Ok(headers)
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&RequestBody>,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.headers(token)?);
        request = match body {
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Bytes { content_type, data }) => request
                .header(CONTENT_TYPE, *content_type)
                .body(data.clone()),
            None => request,
        };

        request.send().await.map_err(|e| {
            if is_transport_error(&e) {
                debug!("API request {} {} failed in transport: {}", method, path, e);
                ApiError::network(e.to_string())
            } else {
                ApiError::Http(e)
            }
        })
    }

    /// Read the body of a response, turning non-2xx statuses into errors.
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {}", e)))?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(ApiError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(ApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }
        Ok(body)
    }

    /// Send a request and return the raw response body.
    pub async fn request_text(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        requires_auth: bool,
    ) -> Result<String> {
        if !requires_auth || path == REFRESH_PATH {
            let response = self.send_once(&method, path, body.as_ref(), None).await?;
            return Self::read_body(response).await;
        }

        let token = self
            .session
            .access_token()
            .ok_or_else(|| ApiError::unauthorized("Not signed in"))?;
        let response = self
            .send_once(&method, path, body.as_ref(), Some(&token))
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::read_body(response).await;
        }

        debug!("API request {} {} got 401; refreshing session", method, path);
        let fresh = self
            .refresher
            .refresh_after_unauthorized(Some(&token))
            .await?;
        let retry = self
            .send_once(&method, path, body.as_ref(), Some(&fresh))
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            let body = retry.text().await.unwrap_or_default();
            Self::log_response(StatusCode::UNAUTHORIZED, &body);
            return Err(ApiError::unauthorized(
                "Request rejected after token refresh",
            ));
        }
        Self::read_body(retry).await
    }

    /// Send a request and parse the JSON response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        requires_auth: bool,
    ) -> Result<T> {
        let text = self.request_text(method, path, body, requires_auth).await?;
        serde_json::from_str(&text).map_err(|e| {
            log::error!("Failed to deserialize response from {}: {}", path, e);
            ApiError::Json(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::types::TokenPair;
    use cairn_core::secrets::{InMemorySecretStore, SecretStore};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    enum RefreshScript {
        Issue {
            access_token: &'static str,
            refresh_token: &'static str,
            delay_ms: u64,
        },
        Reject,
        DropConnection,
    }

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        authorization: Option<String>,
    }

    struct MockServer {
        base_url: String,
        refresh_calls: Arc<AtomicUsize>,
        captured: Arc<TokioMutex<Vec<CapturedRequest>>>,
        handle: tokio::task::JoinHandle<()>,
    }

    impl MockServer {
        fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }

        async fn data_requests(&self) -> usize {
            self.captured
                .lock()
                .await
                .iter()
                .filter(|r| r.path != REFRESH_PATH)
                .count()
        }
    }

    impl Drop for MockServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(String, HashMap<String, String>)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let path = request_line.split_whitespace().nth(1)?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body_read = buffer.len().saturating_sub(header_end + 4);
        while body_read < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body_read = body_read.saturating_add(read);
        }

        Some((path, headers))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            401 => "Unauthorized",
            500 => "Internal Server Error",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    fn api_error_body(code: &str, message: &str) -> String {
        format!(
            r#"{{"error":"error","code":"{}","message":"{}"}}"#,
            code, message
        )
    }

    /// Data endpoints accept only `accepted_token`; the refresh endpoint
    /// follows `refresh_script` in order.
    async fn start_mock_server(
        accepted_token: &'static str,
        refresh_script: Vec<RefreshScript>,
    ) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(refresh_script)));

        let refresh_calls_clone = Arc::clone(&refresh_calls);
        let captured_clone = Arc::clone(&captured);
        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let refresh_calls = Arc::clone(&refresh_calls_clone);
                let captured = Arc::clone(&captured_clone);
                let scripted = Arc::clone(&scripted);
                tokio::spawn(async move {
                    let Some((path, headers)) = read_http_request(&mut stream).await else {
                        return;
                    };
                    let authorization = headers.get("authorization").cloned();
                    captured.lock().await.push(CapturedRequest {
                        path: path.clone(),
                        authorization: authorization.clone(),
                    });

                    if path == REFRESH_PATH {
                        refresh_calls.fetch_add(1, Ordering::SeqCst);
                        let step = scripted
                            .lock()
                            .await
                            .pop_front()
                            .unwrap_or(RefreshScript::Reject);
                        match step {
                            RefreshScript::Issue {
                                access_token,
                                refresh_token,
                                delay_ms,
                            } => {
                                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                                let body = format!(
                                    r#"{{"accessToken":"{}","refreshToken":"{}"}}"#,
                                    access_token, refresh_token
                                );
                                let _ = write_http_response(&mut stream, 200, &body).await;
                            }
                            RefreshScript::Reject => {
                                let body = api_error_body("INVALID_GRANT", "refresh token revoked");
                                let _ = write_http_response(&mut stream, 401, &body).await;
                            }
                            RefreshScript::DropConnection => {}
                        }
                        return;
                    }

                    let expected = format!("Bearer {}", accepted_token);
                    if authorization.as_deref() == Some(expected.as_str()) {
                        let _ = write_http_response(&mut stream, 200, "[]").await;
                    } else {
                        let body = api_error_body("UNAUTHORIZED", "token expired");
                        let _ = write_http_response(&mut stream, 401, &body).await;
                    }
                });
            }
        });

        MockServer {
            base_url: format!("http://{}", addr),
            refresh_calls,
            captured,
            handle,
        }
    }

    fn signed_in_client(base_url: &str) -> (Arc<ApiClient>, Arc<InMemorySecretStore>) {
        let store = Arc::new(InMemorySecretStore::new());
        let session = Arc::new(SessionManager::restore(store.clone()).unwrap());
        session
            .install(TokenPair {
                access_token: "stale-access".to_string(),
                refresh_token: Some("refresh-1".to_string()),
            })
            .unwrap();
        let client = ApiClient::new(base_url, Duration::from_secs(5), session).unwrap();
        (Arc::new(client), store)
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let server = start_mock_server(
            "fresh-access",
            vec![RefreshScript::Issue {
                access_token: "fresh-access",
                refresh_token: "refresh-2",
                delay_ms: 100,
            }],
        )
        .await;
        let (client, store) = signed_in_client(&server.base_url);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            tasks.push(tokio::spawn(async move {
                client
                    .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
                    .await
            }));
        }
        for task in tasks {
            let records = task.await.unwrap().unwrap();
            assert!(records.is_empty());
        }

        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(client.session().access_token().as_deref(), Some("fresh-access"));
        assert_eq!(
            store.get_secret(REFRESH_TOKEN_KEY).unwrap().as_deref(),
            Some("refresh-2")
        );
        assert_eq!(
            store.get_secret(ACCESS_TOKEN_KEY).unwrap().as_deref(),
            Some("fresh-access")
        );
        assert!(!client.refresher().is_refreshing());

        let captured = server.captured.lock().await;
        let retried_with_fresh = captured
            .iter()
            .filter(|r| r.authorization.as_deref() == Some("Bearer fresh-access"))
            .count();
        assert_eq!(retried_with_fresh, 8);
    }

    #[tokio::test]
    async fn rejected_refresh_clears_session_and_stops_refreshing() {
        let server = start_mock_server("never-issued", vec![RefreshScript::Reject]).await;
        let (client, store) = signed_in_client(&server.base_url);

        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(client.session().access_token(), None);
        assert_eq!(client.session().refresh_token(), None);
        assert!(store.get_secret(REFRESH_TOKEN_KEY).unwrap().is_none());

        let requests_before = server.data_requests().await;
        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/public", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(server.data_requests().await, requests_before);
    }

    #[tokio::test]
    async fn second_401_after_refresh_is_final() {
        let server = start_mock_server(
            "never-issued",
            vec![
                RefreshScript::Issue {
                    access_token: "fresh-access",
                    refresh_token: "refresh-2",
                    delay_ms: 0,
                },
                RefreshScript::Issue {
                    access_token: "another",
                    refresh_token: "refresh-3",
                    delay_ms: 0,
                },
            ],
        )
        .await;
        let (client, _store) = signed_in_client(&server.base_url);

        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(server.data_requests().await, 2);
    }

    #[tokio::test]
    async fn unreachable_refresh_keeps_session() {
        let server = start_mock_server("never-issued", vec![RefreshScript::DropConnection]).await;
        let (client, _store) = signed_in_client(&server.base_url);

        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NetworkUnreachable(_)));
        assert_eq!(client.session().refresh_token().as_deref(), Some("refresh-1"));
        assert!(!client.refresher().is_refreshing());
    }

    #[tokio::test]
    async fn signed_out_request_fails_without_network() {
        let server = start_mock_server("fresh-access", Vec::new()).await;
        let session = Arc::new(
            SessionManager::restore(Arc::new(InMemorySecretStore::new())).unwrap(),
        );
        let client = ApiClient::new(&server.base_url, Duration::from_secs(5), session).unwrap();

        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert!(server.captured.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let (client, _store) = signed_in_client(&format!("http://{}", addr));

        let err = client
            .request::<Vec<serde_json::Value>>(Method::GET, "/v1/stones/mine", None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NetworkUnreachable(_)));
        let core: cairn_core::Error = err.into();
        assert!(core.is_network_unreachable());
    }

    #[test]
    fn error_body_is_parsed_into_api_error() {
        let body = api_error_body("NOT_FOUND", "no such stone");
        let parsed: ApiErrorResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.code, "NOT_FOUND");
        assert_eq!(parsed.message, "no such stone");
    }
}
