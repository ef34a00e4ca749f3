//! XenAPI JSON-RPC client and session.
//!
//! Every call is a single HTTP POST to `<url>/jsonrpc`. Failed calls are
//! reported as-is; nothing is retried.

use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::XenApiError;

use super::types::{JsonRpcRequest, JsonRpcResponse};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// API version sent on login.
const API_VERSION: &str = "1.0";

/// Originator sent on login.
const ORIGINATOR: &str = "xenvm";

/// XenAPI error code for rejected credentials.
const SESSION_AUTHENTICATION_FAILED: &str = "SESSION_AUTHENTICATION_FAILED";

/// Unauthenticated JSON-RPC client bound to one host.
#[derive(Debug)]
pub struct XenApiClient {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

/// An authenticated XenAPI session.
///
/// Sessions are explicit values; whoever needs to talk to the host receives
/// one by reference.
#[derive(Debug)]
pub struct XenSession {
    client: XenApiClient,
    session_ref: String,
}

impl XenApiClient {
    /// Creates a client for the host at `url` (e.g. `https://xs01.lan`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(url: &str) -> Result<Self, XenApiError> {
        Self::with_timeout(url, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(url: &str, timeout_secs: u64) -> Result<Self, XenApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| XenApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/jsonrpc", url.trim_end_matches('/')),
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns the JSON-RPC endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Logs in with a username and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the host rejects the credentials.
    pub async fn login(self, username: &str, password: &str) -> Result<XenSession, XenApiError> {
        let params = [json!(username), json!(password), json!(API_VERSION), json!(ORIGINATOR)];
        let session_ref = match self.call_raw("session.login_with_password", &params).await {
            Ok(Value::String(session_ref)) => session_ref,
            Ok(other) => {
                return Err(XenApiError::InvalidResponse {
                    message: format!("Expected a session reference, got {other}"),
                });
            }
            Err(XenApiError::Api { code, params, .. }) if code == SESSION_AUTHENTICATION_FAILED => {
                return Err(XenApiError::AuthenticationFailed {
                    message: params.join(": "),
                });
            }
            Err(e) => return Err(e),
        };

        debug!("Logged in to {} as {username}", self.endpoint);
        Ok(XenSession {
            client: self,
            session_ref,
        })
    }

    /// Performs one JSON-RPC call and returns the raw `result`.
    async fn call_raw(&self, method: &str, params: &[Value]) -> Result<Value, XenApiError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        trace!("XenAPI call {method} (id {})", request.id);

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| XenApiError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(XenApiError::AuthenticationFailed {
                message: format!("Host answered {status}"),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(XenApiError::request_failed(status.as_u16(), body));
        }

        let rpc: JsonRpcResponse = response.json().await.map_err(|e| XenApiError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })?;

        if let Some(error) = rpc.error {
            let params = error
                .data
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), String::from))
                .collect();
            return Err(XenApiError::Api {
                method: method.to_string(),
                code: error.message,
                params,
            });
        }

        Ok(rpc.result.unwrap_or(Value::Null))
    }
}

impl XenSession {
    /// Returns the opaque session reference.
    #[must_use]
    pub fn session_ref(&self) -> &str {
        &self.session_ref
    }

    /// Calls `method` with the session reference prepended to `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the result does not decode as `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[Value],
    ) -> Result<T, XenApiError> {
        let mut full = Vec::with_capacity(params.len() + 1);
        full.push(Value::String(self.session_ref.clone()));
        full.extend_from_slice(params);

        let result = self.client.call_raw(method, &full).await?;
        serde_json::from_value(result).map_err(|e| XenApiError::InvalidResponse {
            message: format!("Unexpected result for {method}: {e}"),
        })
    }

    /// Calls a method whose result is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    pub async fn call_void(&self, method: &str, params: &[Value]) -> Result<(), XenApiError> {
        self.call::<Value>(method, params).await.map(|_| ())
    }

    /// Ends the session. Failures are logged and otherwise ignored.
    pub async fn logout(self) {
        if let Err(e) = self.call_void("session.logout", &[]).await {
            warn!("Failed to log out: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"method": "session.login_with_password"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": "OpaqueRef:session-1",
                "id": 1
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_and_call() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({
                "method": "VM.get_by_name_label",
                "params": ["OpaqueRef:session-1", "web-1"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": ["OpaqueRef:vm-1"],
                "id": 2
            })))
            .mount(&server)
            .await;

        let session = XenApiClient::new(&server.uri())
            .unwrap()
            .login("root", "secret")
            .await
            .unwrap();
        assert_eq!(session.session_ref(), "OpaqueRef:session-1");

        let refs: Vec<String> = session
            .call("VM.get_by_name_label", &[json!("web-1")])
            .await
            .unwrap();
        assert_eq!(refs, vec![String::from("OpaqueRef:vm-1")]);
    }

    #[tokio::test]
    async fn test_rejected_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": 1,
                    "message": "SESSION_AUTHENTICATION_FAILED",
                    "data": ["root", "Authentication failure"]
                },
                "id": 1
            })))
            .mount(&server)
            .await;

        let err = XenApiClient::new(&server.uri())
            .unwrap()
            .login("root", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, XenApiError::AuthenticationFailed { .. }));
    }

    #[tokio::test]
    async fn test_api_failure_maps_code_and_params() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .and(body_partial_json(json!({"method": "VBD.destroy"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": 1,
                    "message": "HANDLE_INVALID",
                    "data": ["VBD", "OpaqueRef:gone"]
                },
                "id": 2
            })))
            .mount(&server)
            .await;

        let session = XenApiClient::new(&server.uri())
            .unwrap()
            .login("root", "secret")
            .await
            .unwrap();
        let err = session
            .call_void("VBD.destroy", &[json!("OpaqueRef:gone")])
            .await
            .unwrap_err();

        match err {
            XenApiError::Api { method, code, params } => {
                assert_eq!(method, "VBD.destroy");
                assert_eq!(code, "HANDLE_INVALID");
                assert_eq!(params, vec!["VBD", "OpaqueRef:gone"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/jsonrpc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = XenApiClient::new(&server.uri())
            .unwrap()
            .login("root", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, XenApiError::RequestFailed { status: 500, .. }));
    }
}
