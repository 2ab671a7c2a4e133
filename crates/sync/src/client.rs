//! HTTP client for the university schedule API.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use campusplan_core::schedule::{ScheduleOwner, SemesterInfo};

use crate::engine::RemoteScheduleSource;
use crate::error::{RemoteError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Error body shape served by the schedule API.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

/// Client for the schedule API.
///
/// Two read-only endpoints: the semester record (whose `updated_at` doubles
/// as the dataset freshness marker) and the full unified schedule dump.
#[derive(Debug, Clone)]
pub struct ScheduleApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ScheduleApiClient {
    /// Create a new schedule API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the schedule API (e.g., "https://api.campus.example")
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
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

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let code = error.code.unwrap_or_else(|| "UNKNOWN".to_string());
                return Err(RemoteError::api(
                    status.as_u16(),
                    format!("{}: {}", code, error.message),
                ));
            }
            return Err(RemoteError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            RemoteError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Fetch the current semester record.
    ///
    /// GET /semester-info
    pub async fn semester_info(&self) -> Result<SemesterInfo> {
        let url = format!("{}/semester-info", self.base_url);
        debug!("Fetching semester info: {}", url);

        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }

    /// Fetch the complete unified schedule dataset.
    ///
    /// GET /unified-schedules
    pub async fn unified_schedules(&self) -> Result<Vec<ScheduleOwner>> {
        let url = format!("{}/unified-schedules", self.base_url);
        debug!("Fetching unified schedules: {}", url);

        let response = self.client.get(&url).send().await?;
        Self::parse_response(response).await
    }
}

#[async_trait]
impl RemoteScheduleSource for ScheduleApiClient {
    async fn fetch_semester_info(&self) -> campusplan_core::Result<SemesterInfo> {
        Ok(self.semester_info().await?)
    }

    async fn fetch_unified_schedules(&self) -> campusplan_core::Result<Vec<ScheduleOwner>> {
        Ok(self.unified_schedules().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            404 => "Not Found",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Error",
        }
    }

    async fn start_mock_server(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<TokioMutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured_paths = Arc::new(TokioMutex::new(Vec::<String>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let paths_clone = Arc::clone(&captured_paths);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let paths_inner = Arc::clone(&paths_clone);
                let scripted_inner = Arc::clone(&scripted_clone);
                tokio::spawn(async move {
                    let mut buffer = [0_u8; 4096];
                    let Ok(read) = stream.read(&mut buffer).await else {
                        return;
                    };
                    let head = String::from_utf8_lossy(&buffer[..read]).to_string();
                    if let Some(path) = head.split_whitespace().nth(1) {
                        paths_inner.lock().await.push(path.to_string());
                    }

                    let (status, body) = scripted_inner
                        .lock()
                        .await
                        .pop_front()
                        .unwrap_or((500, r#"{"message":"unexpected request"}"#.to_string()));
                    let response = format!(
                        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        status_text(status),
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.flush().await;
                });
            }
        });

        (format!("http://{}", addr), captured_paths, handle)
    }

    #[tokio::test]
    async fn semester_info_hits_the_expected_path() {
        let body = r#"{"semester":"WS","academic_year":"2026/27","updated_at":"1726000000000"}"#;
        let (base_url, paths, server) = start_mock_server(vec![(200, body.to_string())]).await;

        let client = ScheduleApiClient::new(&base_url);
        let info = client.semester_info().await.expect("semester info");
        assert_eq!(info.semester, "WS");
        assert_eq!(info.updated_at, "1726000000000");
        assert_eq!(paths.lock().await.clone(), vec!["/semester-info"]);

        server.abort();
    }

    #[tokio::test]
    async fn unified_schedules_parses_owner_rows() {
        let body = r#"[
            {"id":1,"type":"group","name":"3A","faculty":"Informatik",
             "data":{"weeks":{}},"updated_at":"1726000000000","weeks_count":0},
            {"id":7,"type":"room","name":"B-201",
             "data":{"weeks":{}},"updated_at":"1726000000000"}
        ]"#;
        let (base_url, paths, server) = start_mock_server(vec![(200, body.to_string())]).await;

        let client = ScheduleApiClient::new(&base_url);
        let owners = client.unified_schedules().await.expect("owner rows");
        assert_eq!(owners.len(), 2);
        assert_eq!(owners[1].name, "B-201");
        assert_eq!(paths.lock().await.clone(), vec!["/unified-schedules"]);

        server.abort();
    }

    #[tokio::test]
    async fn api_error_body_maps_to_api_variant() {
        let body = r#"{"message":"semester data is being rebuilt","code":"REBUILDING"}"#;
        let (base_url, _paths, server) = start_mock_server(vec![(503, body.to_string())]).await;

        let client = ScheduleApiClient::new(&base_url);
        let err = client.semester_info().await.unwrap_err();
        match err {
            RemoteError::Api { status, message } => {
                assert_eq!(status, 503);
                assert!(message.contains("REBUILDING"));
                assert!(message.contains("rebuilt"));
            }
            other => panic!("expected API error, got {:?}", other),
        }

        server.abort();
    }

    #[tokio::test]
    async fn unparseable_success_body_is_reported_as_api_error() {
        let (base_url, _paths, server) =
            start_mock_server(vec![(200, "<html>proxy error</html>".to_string())]).await;

        let client = ScheduleApiClient::new(&base_url);
        let err = client.semester_info().await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { status: 200, .. }));

        server.abort();
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = ScheduleApiClient::new(&format!("http://{}", addr));
        let err = client.semester_info().await.unwrap_err();
        assert!(matches!(err, RemoteError::Http(_)));
    }
}
