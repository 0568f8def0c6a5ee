//! Report request and the `runReport` wire format

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::normalize::{MetricKind, RawRow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    /// `YYYY-MM-DD` or a relative form such as `7daysAgo` / `today`
    pub start_date: String,
    pub end_date: String,
}

impl DateRange {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
        }
    }
}

/// One report query against a property.
///
/// `filters` is forwarded verbatim as the API's `dimensionFilter`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub property_id: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub date_ranges: Vec<DateRange>,
    pub filters: Option<serde_json::Value>,
}

impl ReportRequest {
    pub fn new(property_id: impl Into<String>) -> Self {
        Self {
            property_id: property_id.into(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            date_ranges: Vec::new(),
            filters: None,
        }
    }

    pub fn dimension(mut self, name: impl Into<String>) -> Self {
        self.dimensions.push(name.into());
        self
    }

    pub fn metric(mut self, name: impl Into<String>) -> Self {
        self.metrics.push(name.into());
        self
    }

    pub fn date_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.date_ranges.push(DateRange::new(start, end));
        self
    }

    pub fn filter(mut self, filter: serde_json::Value) -> Self {
        self.filters = Some(filter);
        self
    }

    pub(crate) fn to_wire(&self) -> RunReportBody<'_> {
        RunReportBody {
            date_ranges: self
                .date_ranges
                .iter()
                .map(|r| WireDateRange {
                    start_date: &r.start_date,
                    end_date: &r.end_date,
                })
                .collect(),
            dimensions: self.dimensions.iter().map(|n| Named { name: n }).collect(),
            metrics: self.metrics.iter().map(|n| Named { name: n }).collect(),
            dimension_filter: self.filters.as_ref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunReportBody<'a> {
    date_ranges: Vec<WireDateRange<'a>>,
    dimensions: Vec<Named<'a>>,
    metrics: Vec<Named<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimension_filter: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireDateRange<'a> {
    start_date: &'a str,
    end_date: &'a str,
}

#[derive(Debug, Serialize)]
struct Named<'a> {
    name: &'a str,
}

/// `runReport` response body. The API omits `rows` for an empty result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunReportResponse {
    #[serde(default)]
    pub metric_headers: Vec<MetricHeader>,
    #[serde(default)]
    pub rows: Vec<WireRow>,
}

impl RunReportResponse {
    /// Column kinds declared by the response. Untyped headers are left out.
    pub fn metric_kinds(&self) -> HashMap<String, MetricKind> {
        self.metric_headers
            .iter()
            .filter_map(|h| {
                let kind = MetricKind::from_api_type(h.kind.as_deref()?)?;
                Some((h.name.clone(), kind))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MetricHeader {
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireRow {
    #[serde(default)]
    dimension_values: Vec<WireValue>,
    #[serde(default)]
    metric_values: Vec<WireValue>,
}

#[derive(Debug, Deserialize)]
struct WireValue {
    #[serde(default)]
    value: Option<String>,
}

impl From<WireRow> for RawRow {
    fn from(row: WireRow) -> Self {
        RawRow {
            dimensions: row.dimension_values.into_iter().map(|v| v.value).collect(),
            metrics: row.metric_values.into_iter().map(|v| v.value).collect(),
        }
    }
}
