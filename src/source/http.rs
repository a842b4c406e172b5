use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::ReportLookup;
use crate::source::UsageSource;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const MESSAGES_OP: &str = "messages";
const REPORT_OP: &str = "report";

pub struct HttpUsageSource {
    client: Client,
    base_url: String,
}

impl HttpUsageSource {
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_seconds))
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::transport("client setup", e))?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages/current-period", self.base_url)
    }

    fn report_url(&self, report_id: i64) -> String {
        format!("{}/reports/{report_id}", self.base_url)
    }

    fn parse_messages(body: Value) -> Result<Vec<Value>, AppError> {
        match body {
            Value::Object(mut obj) => match obj.remove("messages") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(AppError::Format {
                    operation: MESSAGES_OP,
                    reason: "'messages' must be a list".into(),
                }),
            },
            _ => Err(AppError::Format {
                operation: MESSAGES_OP,
                reason: "expected a JSON object".into(),
            }),
        }
    }

    fn parse_report(bytes: &[u8]) -> ReportLookup {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(body) => ReportLookup::from_body(&body),
            Err(e) => ReportLookup::Unreadable(e.to_string()),
        }
    }
}

fn decode_error(operation: &'static str, err: reqwest::Error) -> AppError {
    if err.is_decode() {
        AppError::Format {
            operation,
            reason: err.to_string(),
        }
    } else {
        AppError::transport(operation, err)
    }
}

#[async_trait]
impl UsageSource for HttpUsageSource {
    async fn fetch_current_period_messages(&self) -> Result<Vec<Value>, AppError> {
        let url = self.messages_url();
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::transport(MESSAGES_OP, e))?
            .json()
            .await
            .map_err(|e| decode_error(MESSAGES_OP, e))?;

        let messages = Self::parse_messages(body).inspect_err(|e| {
            warn!(%url, error = %e, "unexpected messages payload");
        })?;
        debug!(count = messages.len(), "fetched current period messages");
        Ok(messages)
    }

    async fn fetch_report_details(&self, report_id: i64) -> Result<ReportLookup, AppError> {
        let response = self
            .client
            .get(self.report_url(report_id))
            .send()
            .await
            .map_err(|e| AppError::transport(REPORT_OP, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(report_id, "report not found");
            return Ok(ReportLookup::NotFound);
        }

        let bytes = response
            .error_for_status()
            .map_err(|e| AppError::transport(REPORT_OP, e))?
            .bytes()
            .await
            .map_err(|e| AppError::transport(REPORT_OP, e))?;

        let lookup = Self::parse_report(&bytes);
        match &lookup {
            ReportLookup::Unreadable(reason) => {
                warn!(report_id, %reason, "unreadable report payload")
            }
            ReportLookup::Malformed(e) => {
                warn!(report_id, error = %e, "incomplete report payload")
            }
            _ => {}
        }
        Ok(lookup)
    }
}
