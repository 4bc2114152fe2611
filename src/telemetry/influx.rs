//! InfluxDB v2 writer speaking line protocol over the HTTP write API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{TelemetryEvent, TelemetrySink};
use crate::error::TelemetryError;

/// Where and how to write. Status events go to `<stage><status_suffix>`,
/// item events to `item_bucket`.
#[derive(Debug, Clone)]
pub struct InfluxTarget {
    pub url: String,
    pub org: String,
    pub token: String,
    pub item_bucket: String,
    pub status_suffix: String,
}

/// Writes events to InfluxDB v2 over `/api/v2/write` with token auth.
pub struct InfluxSink {
    target: InfluxTarget,
    client: Client,
}

impl InfluxSink {
    /// Builds the HTTP client. Nothing is sent until the first write.
    pub fn new(target: InfluxTarget) -> Result<Self, TelemetryError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { target, client })
    }

    fn bucket_for(&self, event: &TelemetryEvent) -> String {
        match event {
            TelemetryEvent::Status(e) => format!("{}{}", e.stage, self.target.status_suffix),
            TelemetryEvent::Item(_) => self.target.item_bucket.clone(),
        }
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let endpoint = format!("{}/api/v2/write", self.target.url.trim_end_matches('/'));
        let bucket = self.bucket_for(event);
        let response = self
            .client
            .post(&endpoint)
            .query(&[
                ("org", self.target.org.as_str()),
                ("bucket", bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.target.token))
            .header("content-type", "text/plain; charset=utf-8")
            .body(line_protocol(event))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TelemetryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Renders one event as a line-protocol record with a nanosecond timestamp.
pub fn line_protocol(event: &TelemetryEvent) -> String {
    match event {
        TelemetryEvent::Status(e) => format!(
            "status_log,process={},instance={} event_type={},event_status={},available={}i {}",
            escape_tag(&e.stage),
            escape_tag(&e.instance),
            quote_field(&e.event_type.to_string()),
            quote_field(&e.event_status.to_string()),
            i32::from(e.available),
            e.timestamp.timestamp_nanos_opt().unwrap_or_default(),
        ),
        TelemetryEvent::Item(e) => format!(
            "process_log,product_id={},process_id={} status={} {}",
            escape_tag(&e.item),
            escape_tag(&e.stage),
            quote_field(&e.status.to_string()),
            e.timestamp.timestamp_nanos_opt().unwrap_or_default(),
        ),
    }
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn quote_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
