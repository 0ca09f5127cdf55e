// =============================================================================
// api.rs — THE WIRE TO THE MARKETPLACE BACKEND
// =============================================================================
//
// The controller never builds a URL. It talks to `TransportationApi`, one
// async method per backend endpoint, and gets back either a partial record
// or an `ApiError` it can sort into "server said no" and "nobody answered".
//
// `HttpTransportationApi` is the real thing: reqwest against
//
//   POST {base}/transportations/{id}/request_pickup/
//   POST {base}/transportations/{id}/confirm_pickup/
//   POST {base}/transportations/{id}/request_delivery/
//   POST {base}/transportations/{id}/confirm_delivery/
//   POST {base}/transportations/{id}/cancel/          {"reason": ...}
//   POST {base}/transportations/{id}/rate/            {"rating": n, "comment": ...}
//   GET  {base}/transportations/{id}/
//
// Status mapping: 4xx is `Rejected`, 5xx is `Server`, no response at all is
// `Transport`. Error bodies carry `{"detail": "..."}`; that text becomes the
// user-facing message. A 2xx with an empty or detail-only body is an empty
// patch, which leaves the optimistic local values standing.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::ApiError;
use crate::models::{RatingReceipt, ShipmentId, ShipmentPatch, ShipmentRecord, TransitionRequest};

/// The transportation endpoints the controller depends on.
#[async_trait]
pub trait TransportationApi: Send + Sync {
    async fn request_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError>;
    async fn confirm_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError>;
    async fn request_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError>;
    async fn confirm_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError>;
    async fn cancel(&self, id: &ShipmentId, reason: &str) -> Result<ShipmentPatch, ApiError>;

    /// Full refetch.
    async fn get_details(&self, id: &ShipmentId) -> Result<ShipmentRecord, ApiError>;

    async fn rate(
        &self,
        id: &ShipmentId,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<RatingReceipt, ApiError>;

    /// Dispatch a validated transition to its endpoint.
    async fn transition(
        &self,
        id: &ShipmentId,
        request: &TransitionRequest,
    ) -> Result<ShipmentPatch, ApiError> {
        match request {
            TransitionRequest::RequestPickup => self.request_pickup(id).await,
            TransitionRequest::ConfirmPickup => self.confirm_pickup(id).await,
            TransitionRequest::RequestDelivery => self.request_delivery(id).await,
            TransitionRequest::ConfirmDelivery => self.confirm_delivery(id).await,
            TransitionRequest::Cancel { reason } => self.cancel(id, reason).await,
        }
    }
}

/// reqwest-backed client for the marketplace REST API.
pub struct HttpTransportationApi {
    client: Client,
    base_url: Url,
}

impl HttpTransportationApi {
    /// Build from the engine configuration, auth cookie included.
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        Self::connect(
            &config.api_base_url,
            config.request_timeout,
            config.access_token.as_deref(),
            &config.client_version,
        )
    }

    /// Unauthenticated client against `base_url`.
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        Self::connect(base_url, timeout, None, env!("CARGO_PKG_VERSION"))
    }

    pub fn connect(
        base_url: &str,
        timeout: Duration,
        access_token: Option<&str>,
        client_version: &str,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::Config(format!("invalid API base URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "API base URL '{base_url}' cannot carry a path"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-client-version"),
            header_value(client_version)?,
        );
        headers.insert(
            HeaderName::from_static("x-client-platform"),
            HeaderValue::from_static("engine"),
        );
        if let Some(token) = access_token {
            headers.insert(COOKIE, header_value(&format!("access_token={token}"))?);
        }

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(concat!("shipment-status-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Config(format!("could not build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/transportations/{id}/` or `{base}/transportations/{id}/{action}/`.
    fn endpoint(&self, id: &ShipmentId, action: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::Config("API base URL cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            segments.push("transportations");
            segments.push(&id.to_string());
            if let Some(action) = action {
                segments.push(action);
            }
            // trailing slash
            segments.push("");
        }
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        id: &ShipmentId,
        action: Option<&str>,
        body: Option<Value>,
    ) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(id, action)?;
        debug!(method = %method, url = %url, "Calling transportation endpoint");

        let mut request = self.client.request(method, url.clone());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let message = error_message(&bytes).unwrap_or_else(|| default_message(status));
        warn!(
            url = %url,
            status = status.as_u16(),
            message = %message,
            "Transportation endpoint returned an error"
        );
        if status.is_client_error() {
            Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(ApiError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// POST and decode, treating an empty body as `T::default()`.
    async fn post<T: DeserializeOwned + Default>(
        &self,
        id: &ShipmentId,
        action: &str,
        body: Value,
    ) -> Result<T, ApiError> {
        let bytes = self.call(Method::POST, id, Some(action), Some(body)).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TransportationApi for HttpTransportationApi {
    async fn request_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.post(id, "request_pickup", json!({})).await
    }

    async fn confirm_pickup(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.post(id, "confirm_pickup", json!({})).await
    }

    async fn request_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.post(id, "request_delivery", json!({})).await
    }

    async fn confirm_delivery(&self, id: &ShipmentId) -> Result<ShipmentPatch, ApiError> {
        self.post(id, "confirm_delivery", json!({})).await
    }

    async fn cancel(&self, id: &ShipmentId, reason: &str) -> Result<ShipmentPatch, ApiError> {
        self.post(id, "cancel", json!({ "reason": reason })).await
    }

    async fn get_details(&self, id: &ShipmentId) -> Result<ShipmentRecord, ApiError> {
        let bytes = self.call(Method::GET, id, None, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn rate(
        &self,
        id: &ShipmentId,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<RatingReceipt, ApiError> {
        self.post(id, "rate", json!({ "rating": rating, "comment": comment.unwrap_or("") }))
            .await
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(raw).map_err(|e| ApiError::Config(format!("invalid header value: {e}")))
}

/// Pull a human message out of an error body: `detail`, `message` or
/// `error`, else the first string found in a field-error map.
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    for key in ["detail", "message", "error"] {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }
    value.as_object()?.values().find_map(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|i| i.as_str().map(str::to_string)),
        _ => None,
    })
}

fn default_message(status: StatusCode) -> String {
    match status {
        StatusCode::BAD_REQUEST => {
            "The shipment is not in a state that allows this action.".to_string()
        }
        StatusCode::UNAUTHORIZED => "Your session has expired. Please sign in again.".to_string(),
        StatusCode::FORBIDDEN => "You are not allowed to perform this action.".to_string(),
        StatusCode::NOT_FOUND => "Shipment not found.".to_string(),
        s if s.is_server_error() => "The server could not process the request.".to_string(),
        s => format!("Request failed with status {}", s.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShipmentStatus;
    use axum::extract::Path;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    async fn spawn_backend(app: Router) -> String {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/api")
    }

    fn client(base: &str) -> HttpTransportationApi {
        HttpTransportationApi::with_base_url(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_paths_keep_trailing_slash() {
        let api = client("http://backend.local/api");
        let id = ShipmentId::from(7);
        assert_eq!(
            api.endpoint(&id, Some("confirm_pickup")).unwrap().as_str(),
            "http://backend.local/api/transportations/7/confirm_pickup/"
        );
        let api = client("http://backend.local/api/");
        assert_eq!(
            api.endpoint(&id, None).unwrap().as_str(),
            "http://backend.local/api/transportations/7/"
        );
    }

    #[test]
    fn test_bad_base_url_is_config_error() {
        assert!(matches!(
            HttpTransportationApi::with_base_url("not a url", Duration::from_secs(1)),
            Err(ApiError::Config(_))
        ));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(br#"{"detail": "Only the transporter can request pickup."}"#).as_deref(),
            Some("Only the transporter can request pickup.")
        );
        assert_eq!(
            error_message(br#"{"reason": ["This field may not be blank."]}"#).as_deref(),
            Some("This field may not be blank.")
        );
        assert_eq!(error_message(b"<html>oops</html>"), None);
    }

    #[tokio::test]
    async fn test_confirm_pickup_returns_server_fields() {
        let app = Router::new().route(
            "/api/transportations/:id/confirm_pickup/",
            post(|Path(id): Path<String>| async move {
                Json(serde_json::json!({
                    "id": id.parse::<u64>().unwrap(),
                    "status": "in_transit",
                    "pickup_confirmed": true,
                    "pickup_confirmed_at": "2024-05-02T10:00:00Z",
                }))
            }),
        );
        let base = spawn_backend(app).await;

        let patch = client(&base).confirm_pickup(&ShipmentId::from(11)).await.unwrap();
        assert_eq!(patch.status, Some(ShipmentStatus::InTransit));
        assert_eq!(patch.pickup_confirmed, Some(true));
        assert!(matches!(patch.pickup_confirmed_at, Some(Some(_))));
    }

    #[tokio::test]
    async fn test_detail_only_response_is_empty_patch() {
        let app = Router::new().route(
            "/api/transportations/:id/request_pickup/",
            post(|| async {
                Json(serde_json::json!({
                    "detail": "Pickup request sent.",
                    "update": {"id": 1, "update_type": "pickup_requested"}
                }))
            }),
        );
        let base = spawn_backend(app).await;

        let patch = client(&base).request_pickup(&ShipmentId::from(2)).await.unwrap();
        assert!(patch.is_empty());
        assert_eq!(patch.detail.as_deref(), Some("Pickup request sent."));
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_rejected_with_detail() {
        let app = Router::new().route(
            "/api/transportations/:id/cancel/",
            post(|| async {
                (
                    AxumStatus::FORBIDDEN,
                    Json(serde_json::json!({"detail": "You are not part of this transportation."})),
                )
            }),
        );
        let base = spawn_backend(app).await;

        let err = client(&base)
            .cancel(&ShipmentId::from(3), "changed mind")
            .await
            .unwrap_err();
        match err {
            ApiError::Rejected { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "You are not part of this transportation.");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_maps_to_server() {
        let app = Router::new().route(
            "/api/transportations/:id/request_delivery/",
            post(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }),
        );
        let base = spawn_backend(app).await;

        let err = client(&base)
            .request_delivery(&ShipmentId::from(4))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Server { status: 502, .. }));
        assert_eq!(err.status(), Some(502));
    }

    #[tokio::test]
    async fn test_cancel_sends_reason_and_transition_dispatches() {
        let app = Router::new().route(
            "/api/transportations/:id/cancel/",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "status": "cancelled",
                    "cancellation_reason": body["reason"],
                    "cancelled_by": "transporter",
                }))
            }),
        );
        let base = spawn_backend(app).await;

        let request = TransitionRequest::Cancel {
            reason: "truck broke down".into(),
        };
        let patch = client(&base)
            .transition(&ShipmentId::from(5), &request)
            .await
            .unwrap();
        assert_eq!(patch.status, Some(ShipmentStatus::Cancelled));
        assert_eq!(
            patch.cancellation_reason,
            Some(Some("truck broke down".to_string()))
        );
    }

    #[tokio::test]
    async fn test_get_details_sends_client_headers_and_cookie() {
        let app = Router::new().route(
            "/api/transportations/:id/",
            get(|Path(id): Path<String>, headers: AxumHeaders| async move {
                let platform = headers
                    .get("x-client-platform")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                let cookie = headers
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                if platform != "engine" || cookie != "access_token=secret" {
                    return (
                        AxumStatus::UNAUTHORIZED,
                        Json(serde_json::json!({"detail": "not signed in"})),
                    );
                }
                (
                    AxumStatus::OK,
                    Json(serde_json::json!({
                        "id": id,
                        "status": "completed",
                        "delivery_confirmed": true,
                        "ratings": [{
                            "from_cargo_owner": true,
                            "rating": 5,
                            "comment": "",
                            "created_at": "2024-05-03T12:00:00Z"
                        }]
                    })),
                )
            }),
        );
        let base = spawn_backend(app).await;

        let api =
            HttpTransportationApi::connect(&base, Duration::from_secs(5), Some("secret"), "1.2.3")
                .unwrap();
        let record = api.get_details(&"TR-8".parse().unwrap()).await.unwrap();
        assert_eq!(record.id, ShipmentId::Text("TR-8".into()));
        assert_eq!(record.status, ShipmentStatus::Completed);
        assert_eq!(record.ratings.len(), 1);

        let anonymous = client(&base).get_details(&ShipmentId::from(1)).await.unwrap_err();
        assert!(matches!(anonymous, ApiError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_rate_returns_receipt() {
        let app = Router::new().route(
            "/api/transportations/:id/rate/",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "detail": "Rating submitted successfully.",
                    "rating": {
                        "from_cargo_owner": false,
                        "rating": body["rating"],
                        "comment": body["comment"],
                        "created_at": "2024-05-04T08:00:00Z"
                    },
                    "both_rated": false
                }))
            }),
        );
        let base = spawn_backend(app).await;

        let receipt = client(&base)
            .rate(&ShipmentId::from(6), 4, Some("smooth handover"))
            .await
            .unwrap();
        let entry = receipt.rating.unwrap();
        assert_eq!(entry.rating, 4);
        assert!(!entry.from_cargo_owner);
        assert_eq!(entry.comment.as_deref(), Some("smooth handover"));
        assert!(!receipt.both_rated);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}/api"))
            .get_details(&ShipmentId::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
