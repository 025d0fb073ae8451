//! Best-effort remote reporting over HTTP.
//!
//! [`HttpReporter`] sends each admitted alert (and, when enabled, a
//! throttled trail of position fixes) to the backend's position/alert
//! endpoint. A failed request is reported to the caller once and never
//! retried: the event is already in the local history.

use std::time::Duration;

use async_trait::async_trait;
use geoguard_core::{AlertEvent, Coordinate, Reading, Timestamp};
use serde::Serialize;
use uuid::Uuid;

use super::{AlertChannel, DeliveryError};

/// HTTP request timeout for a single report.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// ReportConfig
// ---------------------------------------------------------------------------

/// How the payload is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMethod {
    /// Query-string parameters, as the legacy PHP endpoints expect.
    Get,
    /// JSON body.
    #[default]
    Post,
}

impl ReportMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

/// Configuration for the remote reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    /// Endpoint receiving alert reports.
    pub alert_url: String,
    /// Endpoint receiving position trail fixes; defaults to `alert_url`.
    pub position_url: String,
    pub method: ReportMethod,
    /// Device or user identifier sent with every report.
    pub device_id: String,
}

impl ReportConfig {
    pub fn new(alert_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        let alert_url = alert_url.into();
        Self {
            position_url: alert_url.clone(),
            alert_url,
            method: ReportMethod::default(),
            device_id: device_id.into(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `GEOGUARD_REPORT_URL` is not set, signalling that
    /// remote reporting is not configured and should be skipped.
    ///
    /// | Variable                  | Required | Default              |
    /// |---------------------------|----------|----------------------|
    /// | `GEOGUARD_REPORT_URL`     | yes      | --                   |
    /// | `GEOGUARD_POSITION_URL`   | no       | `GEOGUARD_REPORT_URL`|
    /// | `GEOGUARD_REPORT_METHOD`  | no       | `post`               |
    /// | `GEOGUARD_DEVICE_ID`      | no       | `unknown-device`     |
    pub fn from_env() -> Option<Self> {
        let alert_url = std::env::var("GEOGUARD_REPORT_URL").ok()?;
        let method = match std::env::var("GEOGUARD_REPORT_METHOD") {
            Ok(raw) => ReportMethod::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown GEOGUARD_REPORT_METHOD, using POST");
                ReportMethod::Post
            }),
            Err(_) => ReportMethod::Post,
        };
        Some(Self {
            position_url: std::env::var("GEOGUARD_POSITION_URL")
                .unwrap_or_else(|_| alert_url.clone()),
            alert_url,
            method,
            device_id: std::env::var("GEOGUARD_DEVICE_ID")
                .unwrap_or_else(|_| "unknown-device".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Wire payload for an alert report.
#[derive(Debug, Serialize)]
struct AlertReport<'a> {
    device_id: &'a str,
    event_id: Uuid,
    monitor: &'a str,
    kind: &'static str,
    subject: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    /// RFC 3339 / ISO-8601 sample time.
    timestamp: String,
}

impl<'a> AlertReport<'a> {
    fn from_event(device_id: &'a str, event: &'a AlertEvent) -> Self {
        let (latitude, longitude, value) = match event.observation.reading {
            Reading::Position(c) => (Some(c.latitude), Some(c.longitude), None),
            Reading::Scalar(v) => (None, None, Some(v)),
        };
        Self {
            device_id,
            event_id: event.id,
            monitor: &event.monitor,
            kind: event.kind.as_str(),
            subject: &event.subject_name,
            message: &event.message,
            latitude,
            longitude,
            value,
            timestamp: event.observation.timestamp.to_rfc3339(),
        }
    }
}

/// Wire payload for a position trail fix.
#[derive(Debug, Serialize)]
struct PositionReport<'a> {
    device_id: &'a str,
    latitude: f64,
    longitude: f64,
    timestamp: String,
}

// ---------------------------------------------------------------------------
// HttpReporter
// ---------------------------------------------------------------------------

/// Reports alerts and positions to the backend.
pub struct HttpReporter {
    client: reqwest::Client,
    config: ReportConfig,
}

impl HttpReporter {
    /// Create a reporter with a pre-configured HTTP client.
    pub fn new(config: ReportConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Send one alert report. Single attempt.
    pub async fn report_alert(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        let payload = AlertReport::from_event(&self.config.device_id, event);
        self.send(&self.config.alert_url, &payload).await
    }

    /// Send one position fix of the trail. Single attempt.
    pub async fn report_position(
        &self,
        coordinate: Coordinate,
        timestamp: Timestamp,
    ) -> Result<(), DeliveryError> {
        let payload = PositionReport {
            device_id: &self.config.device_id,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timestamp: timestamp.to_rfc3339(),
        };
        self.send(&self.config.position_url, &payload).await
    }

    /// Execute a single request and check the response status.
    async fn send<P: Serialize + ?Sized>(&self, url: &str, payload: &P) -> Result<(), DeliveryError> {
        let request = match self.config.method {
            ReportMethod::Get => self.client.get(url).query(payload),
            ReportMethod::Post => self.client.post(url).json(payload),
        };
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(DeliveryError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertChannel for HttpReporter {
    fn name(&self) -> &'static str {
        "http_report"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        self.report_alert(event).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geoguard_core::{AlertKind, Observation};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, answer with `status`, return the raw request.
    async fn one_shot_server(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.expect("read request");
            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            socket.write_all(response.as_bytes()).await.expect("write response");
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}/position.php"), handle)
    }

    fn entered_event() -> AlertEvent {
        let ts = Utc
            .with_ymd_and_hms(2024, 5, 1, 8, 30, 0)
            .single()
            .expect("valid timestamp");
        AlertEvent::new(
            AlertKind::Entered,
            "school",
            Observation::position(Coordinate::new(45.5, 4.25), ts),
            "Entered zone 'school'",
        )
        .with_monitor("family")
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!(ReportMethod::parse("GET"), Some(ReportMethod::Get));
        assert_eq!(ReportMethod::parse(" post "), Some(ReportMethod::Post));
        assert_eq!(ReportMethod::parse("put"), None);
    }

    #[test]
    fn position_payload_carries_coordinates_and_iso_timestamp() {
        let event = entered_event();
        let payload = AlertReport::from_event("device-42", &event);
        let json = serde_json::to_value(&payload).expect("serializable");

        assert_eq!(json["device_id"], "device-42");
        assert_eq!(json["kind"], "entered");
        assert_eq!(json["latitude"], 45.5);
        assert_eq!(json["longitude"], 4.25);
        assert_eq!(json["timestamp"], "2024-05-01T08:30:00+00:00");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn scalar_payload_omits_coordinates() {
        let event = AlertEvent::new(
            AlertKind::ThresholdExceeded,
            "speed",
            Observation::scalar(41.0, Utc::now()),
            "too fast",
        );
        let json = serde_json::to_value(AlertReport::from_event("d", &event)).expect("serializable");
        assert_eq!(json["value"], 41.0);
        assert!(json.get("latitude").is_none());
    }

    #[tokio::test]
    async fn get_report_sends_query_parameters() {
        let (url, server) = one_shot_server(200).await;
        let mut config = ReportConfig::new(url, "device-42");
        config.method = ReportMethod::Get;
        let reporter = HttpReporter::new(config).expect("client builds");

        reporter
            .report_alert(&entered_event())
            .await
            .expect("200 is success");

        let request = server.await.expect("server task");
        let request_line = request.lines().next().unwrap_or_default();
        assert!(request_line.starts_with("GET /position.php?"));
        assert!(request_line.contains("device_id=device-42"));
        assert!(request_line.contains("latitude=45.5"));
        assert!(request_line.contains("subject=school"));
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_failure() {
        let (url, server) = one_shot_server(503).await;
        let reporter = HttpReporter::new(ReportConfig::new(url, "d")).expect("client builds");

        let err = reporter
            .report_position(Coordinate::new(1.0, 2.0), Utc::now())
            .await
            .expect_err("503 must fail");
        assert!(matches!(err, DeliveryError::HttpStatus(503)));
        assert!(err.is_transport());

        let request = server.await.expect("server task");
        assert!(request.starts_with("POST /position.php"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_request_error() {
        let reporter = HttpReporter::new(ReportConfig::new("http://127.0.0.1:1/report", "d"))
            .expect("client builds");
        let err = reporter
            .report_alert(&entered_event())
            .await
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, DeliveryError::Request(_)));
        assert!(err.to_string().contains("HTTP request failed"));
    }
}
