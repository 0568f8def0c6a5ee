//! Report client: credential, rate limit, `runReport`, normalize
//!
//! A 401/403 invalidates the access token that was used and retries once
//! with whatever the credential manager hands out next. Every other failure
//! is returned as-is.

use std::sync::Arc;

use analytics_auth::CredentialManager;
use tracing::{debug, info, warn};

use crate::classify::{UpstreamClass, classify_status};
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::normalize::{Normalizer, RawRow, ReportRow};
use crate::request::{ReportRequest, RunReportResponse};

/// Production Data API base URL.
pub const DEFAULT_API_BASE: &str = "https://analyticsdata.googleapis.com";

pub struct ReportClient {
    credentials: Arc<CredentialManager>,
    limiter: Arc<RateLimiter>,
    http: reqwest::Client,
    api_base: String,
    normalizer: Normalizer,
}

impl ReportClient {
    pub fn new(
        credentials: Arc<CredentialManager>,
        limiter: Arc<RateLimiter>,
        http: reqwest::Client,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            limiter,
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            normalizer: Normalizer::default(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    fn endpoint(&self, property_id: &str) -> String {
        format!(
            "{}/v1beta/properties/{property_id}:runReport",
            self.api_base
        )
    }

    /// Run `request` and return its rows in server order.
    pub async fn fetch_report(&self, request: &ReportRequest) -> Result<Vec<ReportRow>> {
        let url = self.endpoint(&request.property_id);
        let body = request.to_wire();
        let mut reauthenticated = false;

        loop {
            let credential = self.credentials.get_valid_credential().await?;
            self.limiter.admit().await;

            debug!(property = %request.property_id, reauthenticated, "sending report request");
            let response = self
                .http
                .post(&url)
                .bearer_auth(&credential.access_token)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    metrics::counter!("report_upstream_errors_total", "error_type" => "transport")
                        .increment(1);
                    Error::Transport(format!("report request to {url} failed: {e}"))
                })?;

            let status = response.status();
            metrics::counter!("report_requests_total", "status" => status.as_u16().to_string())
                .increment(1);

            if status.is_success() {
                let parsed: RunReportResponse = response
                    .json()
                    .await
                    .map_err(|e| Error::InvalidResponse(format!("decoding runReport body: {e}")))?;
                let kinds = parsed.metric_kinds();
                let raw: Vec<RawRow> = parsed.rows.into_iter().map(RawRow::from).collect();
                let rows = self.normalizer.normalize_typed(
                    &request.dimensions,
                    &request.metrics,
                    &kinds,
                    raw,
                )?;
                info!(property = %request.property_id, rows = rows.len(), "report fetched");
                return Ok(rows);
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let class = classify_status(status.as_u16(), &body);
            metrics::counter!("report_upstream_errors_total", "error_type" => class.label())
                .increment(1);

            if class == UpstreamClass::Unauthorized && !reauthenticated {
                warn!(
                    status = status.as_u16(),
                    property = %request.property_id,
                    "report request unauthorized, refreshing credential and retrying once"
                );
                self.credentials.invalidate(&credential.access_token).await;
                reauthenticated = true;
                continue;
            }

            warn!(
                status = status.as_u16(),
                error_type = class.label(),
                property = %request.property_id,
                "report request failed"
            );
            return Err(Error::ReportFetch {
                status: status.as_u16(),
                body,
            });
        }
    }

    /// Run a one-metric report for today to check the property is reachable
    /// with the current credential.
    ///
    /// Upstream rejections and transport failures yield `Ok(false)`;
    /// credential and decoding failures are returned as errors.
    pub async fn check_connection(&self, property_id: &str) -> Result<bool> {
        let request = ReportRequest::new(property_id)
            .metric("activeUsers")
            .date_range("today", "today");
        match self.fetch_report(&request).await {
            Ok(rows) => {
                info!(property = property_id, rows = rows.len(), "connection check succeeded");
                Ok(true)
            }
            Err(e @ (Error::ReportFetch { .. } | Error::Transport(_))) => {
                warn!(property = property_id, error = %e, "connection check failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
