use crate::credits::calculate_message_credits;
use crate::error::{AppError, MessageError};
use crate::models::{Message, ReportLookup, ReportRef, UsageEntry, UsagePeriodResult};
use crate::source::UsageSource;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a message's credit cost comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum CostSource {
    FromReport { name: String, cost: f64 },
    FromText,
}

/// Picks the pricing path for a message given its report reference and the
/// outcome of the lookup (`None` when no lookup was made). A report that exists
/// but lacks its name or cost makes the message unusable.
pub fn resolve_cost_source(
    report: &ReportRef,
    lookup: Option<ReportLookup>,
) -> Result<CostSource, MessageError> {
    match (report, lookup) {
        (ReportRef::Id(_), Some(ReportLookup::Found(details))) => Ok(CostSource::FromReport {
            name: details.name,
            cost: details.credit_cost,
        }),
        (ReportRef::Id(_), Some(ReportLookup::Malformed(e))) => Err(e),
        _ => Ok(CostSource::FromText),
    }
}

pub struct UsageService {
    source: Arc<dyn UsageSource>,
    max_concurrent_lookups: usize,
}

impl UsageService {
    pub fn new(source: Arc<dyn UsageSource>) -> Self {
        Self {
            source,
            max_concurrent_lookups: 1,
        }
    }

    pub fn with_max_concurrent_lookups(mut self, limit: usize) -> Self {
        self.max_concurrent_lookups = limit.max(1);
        self
    }

    #[tracing::instrument(skip(self))]
    pub async fn current_period_usage(&self) -> Result<UsagePeriodResult, AppError> {
        let messages = self
            .source
            .fetch_current_period_messages()
            .await
            .inspect_err(|e| warn!(error = %e, "failed to fetch current period messages"))?;
        let received = messages.len();

        // `buffered` yields in input order whatever order lookups finish in.
        let resolved: Vec<Option<UsageEntry>> = stream::iter(messages)
            .map(|raw| async move { self.resolve_entry(&raw).await })
            .buffered(self.max_concurrent_lookups)
            .try_collect()
            .await?;
        let usage: Vec<UsageEntry> = resolved.into_iter().flatten().collect();

        info!(
            received,
            processed = usage.len(),
            skipped = received - usage.len(),
            "current period usage assembled"
        );
        Ok(UsagePeriodResult { usage })
    }

    /// `Ok(None)` means the message was malformed and skipped.
    async fn resolve_entry(&self, raw: &Value) -> Result<Option<UsageEntry>, AppError> {
        let message = match Message::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                skip_message(raw, &e);
                return Ok(None);
            }
        };

        match self.build_entry(&message).await? {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                skip_message(raw, &e);
                Ok(None)
            }
        }
    }

    async fn build_entry(
        &self,
        message: &Message,
    ) -> Result<Result<UsageEntry, MessageError>, AppError> {
        let lookup = match &message.report {
            ReportRef::Id(report_id) => {
                let outcome = self
                    .source
                    .fetch_report_details(*report_id)
                    .await
                    .inspect_err(|e| {
                        warn!(message_id = message.id, report_id, error = %e, "report lookup failed")
                    })?;
                match &outcome {
                    ReportLookup::NotFound => {
                        debug!(message_id = message.id, report_id, "report not found, pricing from text")
                    }
                    ReportLookup::Unreadable(_) => {
                        debug!(message_id = message.id, report_id, "unreadable report, pricing from text")
                    }
                    _ => {}
                }
                Some(outcome)
            }
            ReportRef::Invalid(raw) => {
                debug!(message_id = message.id, report_id = %raw, "unusable report id, pricing from text");
                None
            }
            ReportRef::Absent => None,
        };

        let source = match resolve_cost_source(&message.report, lookup) {
            Ok(source) => source,
            Err(e) => return Ok(Err(e)),
        };
        let (report_name, credits_used) = match source {
            CostSource::FromReport { name, cost } => (Some(name), cost),
            CostSource::FromText => match message.text() {
                Ok(text) => (None, calculate_message_credits(text)),
                Err(e) => return Ok(Err(e)),
            },
        };

        Ok(Ok(UsageEntry {
            message_id: message.id,
            timestamp: message.timestamp.clone(),
            report_name,
            credits_used,
        }))
    }
}

fn skip_message(raw: &Value, reason: &MessageError) {
    let message_id = raw
        .get("id")
        .map(Value::to_string)
        .unwrap_or_else(|| "unknown".into());
    warn!(%message_id, reason = %reason, "skipping malformed message");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::models::ReportDetails;
    use crate::source::HttpUsageSource;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct FakeSource {
        messages: Vec<Value>,
        reports: HashMap<i64, ReportDetails>,
        failing_reports: Vec<i64>,
        delays: HashMap<i64, Duration>,
        lookups: Mutex<Vec<i64>>,
        completed: Mutex<Vec<i64>>,
    }

    impl FakeSource {
        fn with_messages(messages: Vec<Value>) -> Self {
            Self {
                messages,
                ..Self::default()
            }
        }

        fn report(mut self, id: i64, name: &str, cost: f64) -> Self {
            self.reports.insert(
                id,
                ReportDetails {
                    name: name.into(),
                    credit_cost: cost,
                },
            );
            self
        }

        fn lookups(&self) -> Vec<i64> {
            self.lookups.lock().expect("lookups lock").clone()
        }

        fn completed(&self) -> Vec<i64> {
            self.completed.lock().expect("completed lock").clone()
        }
    }

    #[async_trait]
    impl UsageSource for FakeSource {
        async fn fetch_current_period_messages(&self) -> Result<Vec<Value>, AppError> {
            Ok(self.messages.clone())
        }

        async fn fetch_report_details(&self, report_id: i64) -> Result<ReportLookup, AppError> {
            self.lookups.lock().expect("lookups lock").push(report_id);
            if let Some(delay) = self.delays.get(&report_id) {
                tokio::time::sleep(*delay).await;
            }
            self.completed.lock().expect("completed lock").push(report_id);
            if self.failing_reports.contains(&report_id) {
                return Err(AppError::Timeout {
                    operation: "report",
                });
            }
            Ok(match self.reports.get(&report_id) {
                Some(details) => ReportLookup::Found(details.clone()),
                None => ReportLookup::NotFound,
            })
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl UsageSource for BrokenSource {
        async fn fetch_current_period_messages(&self) -> Result<Vec<Value>, AppError> {
            Err(AppError::Format {
                operation: "messages",
                reason: "'messages' must be a list".into(),
            })
        }

        async fn fetch_report_details(&self, _: i64) -> Result<ReportLookup, AppError> {
            Ok(ReportLookup::NotFound)
        }
    }

    async fn run(source: FakeSource) -> (UsagePeriodResult, Arc<FakeSource>) {
        let source = Arc::new(source);
        let result = UsageService::new(source.clone())
            .current_period_usage()
            .await
            .expect("usage");
        (result, source)
    }

    #[test]
    fn cost_source_prefers_found_report() {
        let details = ReportDetails {
            name: "R".into(),
            credit_cost: 15.0,
        };
        assert_eq!(
            resolve_cost_source(&ReportRef::Id(1), Some(ReportLookup::Found(details.clone()))),
            Ok(CostSource::FromReport {
                name: "R".into(),
                cost: 15.0
            })
        );
        assert_eq!(
            resolve_cost_source(&ReportRef::Id(1), Some(ReportLookup::NotFound)),
            Ok(CostSource::FromText)
        );
        assert_eq!(
            resolve_cost_source(
                &ReportRef::Id(1),
                Some(ReportLookup::Unreadable("not json".into()))
            ),
            Ok(CostSource::FromText)
        );
        assert_eq!(resolve_cost_source(&ReportRef::Absent, None), Ok(CostSource::FromText));
        assert_eq!(
            resolve_cost_source(
                &ReportRef::Invalid("x".into()),
                Some(ReportLookup::Found(details))
            ),
            Ok(CostSource::FromText)
        );
    }

    #[test]
    fn incomplete_report_rejects_the_message() {
        assert_eq!(
            resolve_cost_source(
                &ReportRef::Id(1),
                Some(ReportLookup::Malformed(MessageError::MissingField("name")))
            ),
            Err(MessageError::MissingField("name"))
        );
    }

    #[tokio::test]
    async fn report_cost_is_used_when_found() {
        let source = FakeSource::with_messages(vec![json!({
            "id": "1",
            "timestamp": "2024-11-07T10:00:00Z",
            "report_id": "100"
        })])
        .report(100, "Short Lease Report", 15.0);

        let (result, source) = run(source).await;
        assert_eq!(
            result.usage,
            vec![UsageEntry {
                message_id: 1,
                timestamp: "2024-11-07T10:00:00Z".into(),
                report_name: Some("Short Lease Report".into()),
                credits_used: 15.0,
            }]
        );
        assert_eq!(source.lookups(), vec![100]);
    }

    #[tokio::test]
    async fn report_cost_below_minimum_passes_through() {
        let source = FakeSource::with_messages(vec![json!({
            "id": 4,
            "timestamp": "T",
            "report_id": 8
        })])
        .report(8, "Cheap", 0.25);

        let (result, _) = run(source).await;
        assert_eq!(result.usage[0].credits_used, 0.25);
    }

    #[tokio::test]
    async fn text_is_priced_without_report() {
        let source = FakeSource::with_messages(vec![json!({
            "id": "2",
            "timestamp": "2024-11-07T10:05:00Z",
            "text": "Sample message"
        })]);

        let (result, source) = run(source).await;
        assert_eq!(
            result.usage,
            vec![UsageEntry {
                message_id: 2,
                timestamp: "2024-11-07T10:05:00Z".into(),
                report_name: None,
                credits_used: calculate_message_credits("Sample message"),
            }]
        );
        assert!(source.lookups().is_empty());
    }

    #[tokio::test]
    async fn missing_report_falls_back_to_text() {
        let source = FakeSource::with_messages(vec![json!({
            "id": "3",
            "timestamp": "2024-11-07T10:10:00Z",
            "report_id": "101",
            "text": "Fallback example"
        })]);

        let (result, source) = run(source).await;
        assert_eq!(result.usage.len(), 1);
        assert_eq!(result.usage[0].report_name, None);
        assert_eq!(
            result.usage[0].credits_used,
            calculate_message_credits("Fallback example")
        );
        assert_eq!(source.lookups(), vec![101]);
    }

    #[tokio::test]
    async fn unparseable_report_id_falls_back_without_lookup() {
        let source = FakeSource::with_messages(vec![json!({
            "id": "5",
            "timestamp": "T",
            "report_id": "abc",
            "text": "hello"
        })]);

        let (result, source) = run(source).await;
        assert_eq!(result.usage[0].credits_used, calculate_message_credits("hello"));
        assert!(source.lookups().is_empty());
    }

    #[tokio::test]
    async fn malformed_messages_are_skipped() {
        let source = FakeSource::with_messages(vec![
            json!({ "id": "1", "timestamp": "T", "text": "ok" }),
            json!({ "id": "not-a-number", "timestamp": "T", "text": "bad id" }),
            json!({ "timestamp": "T", "text": "no id" }),
            json!({ "id": "4", "timestamp": "T" }),
            json!({ "id": "5", "timestamp": "T", "report_id": "77" }),
            json!({ "id": "6", "timestamp": "T", "text": "also ok" }),
        ]);

        let (result, source) = run(source).await;
        let ids: Vec<i64> = result.usage.iter().map(|e| e.message_id).collect();
        assert_eq!(ids, vec![1, 6]);
        // report 77 is unknown and the message has no text to fall back on
        assert_eq!(source.lookups(), vec![77]);
    }

    #[tokio::test]
    async fn report_lookups_are_not_cached() {
        let source = FakeSource::with_messages(vec![
            json!({ "id": "1", "timestamp": "T", "report_id": "9" }),
            json!({ "id": "2", "timestamp": "T", "report_id": "9" }),
        ])
        .report(9, "Shared", 3.0);

        let (result, source) = run(source).await;
        assert_eq!(result.usage.len(), 2);
        assert_eq!(source.lookups(), vec![9, 9]);
    }

    #[tokio::test]
    async fn concurrent_lookups_preserve_input_order() {
        let mut messages = Vec::new();
        let mut source = FakeSource::default();
        for i in 0..20 {
            if i % 2 == 0 {
                let report_id = i + 100;
                messages.push(json!({ "id": i, "timestamp": format!("T{i}"), "report_id": report_id }));
                source = source.report(report_id, &format!("R{i}"), i as f64);
                // earlier messages wait longest so lookups finish out of order
                source
                    .delays
                    .insert(report_id, Duration::from_millis(((20 - i) * 10) as u64));
            } else {
                messages.push(json!({ "id": i, "timestamp": format!("T{i}"), "text": "word" }));
            }
        }
        source.messages = messages;

        let source = Arc::new(source);
        let result = UsageService::new(source.clone())
            .with_max_concurrent_lookups(8)
            .current_period_usage()
            .await
            .expect("usage");

        let completed = source.completed();
        let mut sorted = completed.clone();
        sorted.sort_unstable();
        assert_ne!(completed, sorted, "lookups should finish out of order");

        let ids: Vec<i64> = result.usage.iter().map(|e| e.message_id).collect();
        assert_eq!(ids, (0..20).collect::<Vec<_>>());
        for entry in result.usage.iter().filter(|e| e.message_id % 2 == 0) {
            let expected = format!("R{}", entry.message_id);
            assert_eq!(entry.report_name.as_deref(), Some(expected.as_str()));
            assert_eq!(entry.credits_used, entry.message_id as f64);
        }
    }

    #[tokio::test]
    async fn non_string_text_is_ignored_for_report_priced_messages() {
        let source = FakeSource::with_messages(vec![json!({
            "id": "1",
            "timestamp": "T",
            "report_id": "100",
            "text": ["not", "a", "string"]
        })])
        .report(100, "R", 15.0);

        let (result, _) = run(source).await;
        assert_eq!(result.usage.len(), 1);
        assert_eq!(result.usage[0].credits_used, 15.0);
    }

    #[tokio::test]
    async fn float_report_id_is_looked_up() {
        let source = FakeSource::with_messages(vec![json!({
            "id": 1,
            "timestamp": "T",
            "report_id": 100.0
        })])
        .report(100, "R", 15.0);

        let (result, source) = run(source).await;
        assert_eq!(source.lookups(), vec![100]);
        assert_eq!(result.usage[0].report_name.as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn bad_report_payloads_only_affect_their_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages/current-period"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    { "id": "1", "timestamp": "T1", "text": "hello" },
                    { "id": "2", "timestamp": "T2", "report_id": "7", "text": "no cost" },
                    { "id": "3", "timestamp": "T3", "report_id": "8", "text": "list body" },
                    { "id": "4", "timestamp": "T4", "report_id": "9", "text": "not json" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reports/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "R" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reports/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reports/9"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{broken"))
            .mount(&server)
            .await;

        let cfg = AppConfig {
            base_url: server.uri(),
            ..AppConfig::default()
        };
        let source = HttpUsageSource::new(&cfg).expect("build source");
        let result = UsageService::new(Arc::new(source))
            .current_period_usage()
            .await
            .expect("bad report bodies do not fail the request");

        assert_eq!(
            result.usage,
            vec![
                UsageEntry {
                    message_id: 1,
                    timestamp: "T1".into(),
                    report_name: None,
                    credits_used: calculate_message_credits("hello"),
                },
                UsageEntry {
                    message_id: 3,
                    timestamp: "T3".into(),
                    report_name: None,
                    credits_used: calculate_message_credits("list body"),
                },
                UsageEntry {
                    message_id: 4,
                    timestamp: "T4".into(),
                    report_name: None,
                    credits_used: calculate_message_credits("not json"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn report_transport_error_fails_the_request() {
        let mut source = FakeSource::with_messages(vec![
            json!({ "id": "1", "timestamp": "T", "text": "fine" }),
            json!({ "id": "2", "timestamp": "T", "report_id": "13", "text": "x" }),
        ]);
        source.failing_reports = vec![13];

        let err = UsageService::new(Arc::new(source))
            .current_period_usage()
            .await
            .expect_err("transport error surfaces");
        assert!(matches!(err, AppError::Timeout { .. }));
    }

    #[tokio::test]
    async fn message_fetch_error_fails_the_request() {
        let err = UsageService::new(Arc::new(BrokenSource))
            .current_period_usage()
            .await
            .expect_err("format error surfaces");
        assert!(matches!(err, AppError::Format { .. }));
    }

    #[tokio::test]
    async fn output_never_exceeds_input() {
        let source = FakeSource::with_messages(vec![
            json!({ "id": "1", "timestamp": "T", "text": "a" }),
            json!(42),
            json!({ "id": "3", "timestamp": "T", "text": "" }),
        ]);
        let (result, _) = run(source).await;
        assert_eq!(result.usage.len(), 2);
        assert_eq!(result.usage[1].credits_used, 1.0);
    }
}
