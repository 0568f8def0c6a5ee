//! Report normalization: raw string values to typed, ordered rows
//!
//! Names and values are correlated by index. A value that is missing, extra,
//! or unparseable fails the whole report; nothing is defaulted. Derived
//! columns are appended after parsing.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::error::{Error, Result};

/// Metrics reported as decimals or currency. Used only for columns the
/// response header does not type; everything else parses as an integer.
pub const DEFAULT_FRACTIONAL_METRICS: &[&str] = &[
    "engagementRate",
    "bounceRate",
    "totalRevenue",
    "purchaseRevenue",
    "averageSessionDuration",
    "userEngagementDuration",
    "sessionsPerUser",
    "screenPageViewsPerSession",
    "advertiserAdCost",
    "metrics.ctr",
    "metrics.conversion_rate",
    "metrics.cost_per_conversion",
    "metrics.average_cpc",
    "metrics.conversions",
];

/// How a metric column's values are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Integer,
    Float,
}

impl MetricKind {
    /// Maps a `metricHeaders[].type` value. `None` for `TYPE_UNSPECIFIED`
    /// and types this client does not know.
    pub fn from_api_type(api_type: &str) -> Option<Self> {
        match api_type {
            "TYPE_INTEGER" => Some(MetricKind::Integer),
            "TYPE_FLOAT" | "TYPE_CURRENCY" | "TYPE_STANDARD" | "TYPE_SECONDS"
            | "TYPE_MILLISECONDS" | "TYPE_MINUTES" | "TYPE_HOURS" | "TYPE_FEET"
            | "TYPE_MILES" | "TYPE_METERS" | "TYPE_KILOMETERS" => Some(MetricKind::Float),
            _ => None,
        }
    }
}

/// A typed cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }
}

/// One report row: column name to value, in request order followed by
/// derived columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportRow {
    columns: Vec<(String, Value)>,
}

impl ReportRow {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn push(&mut self, name: &str, value: Value) {
        self.columns.push((name.to_owned(), value));
    }
}

impl Serialize for ReportRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Unparsed values of one row as delivered by the API. `None` marks a value
/// slot the API left empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    pub dimensions: Vec<Option<String>>,
    pub metrics: Vec<Option<String>>,
}

/// How a derived column is computed from parsed columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    /// `minuend - subtrahend`, integer when both inputs are
    Difference {
        minuend: String,
        subtrahend: String,
    },
    /// `numerator / denominator * scale`, rounded to 2 decimals; zero when
    /// the denominator is zero
    Ratio {
        numerator: String,
        denominator: String,
        scale: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: String,
    pub derivation: Derivation,
}

impl DerivedColumn {
    pub fn difference(name: &str, minuend: &str, subtrahend: &str) -> Self {
        Self {
            name: name.into(),
            derivation: Derivation::Difference {
                minuend: minuend.into(),
                subtrahend: subtrahend.into(),
            },
        }
    }

    pub fn ratio(name: &str, numerator: &str, denominator: &str, scale: f64) -> Self {
        Self {
            name: name.into(),
            derivation: Derivation::Ratio {
                numerator: numerator.into(),
                denominator: denominator.into(),
                scale,
            },
        }
    }

    /// `None` when an input column is absent or non-numeric.
    fn compute(&self, row: &ReportRow) -> Option<Value> {
        match &self.derivation {
            Derivation::Difference {
                minuend,
                subtrahend,
            } => match (row.get(minuend)?, row.get(subtrahend)?) {
                (Value::Integer(a), Value::Integer(b)) => match a.checked_sub(*b) {
                    Some(d) => Some(Value::Integer(d)),
                    None => Some(Value::Float(round2(*a as f64 - *b as f64))),
                },
                (a, b) => Some(Value::Float(round2(a.as_f64()? - b.as_f64()?))),
            },
            Derivation::Ratio {
                numerator,
                denominator,
                scale,
            } => {
                let n = row.get(numerator)?.as_f64()?;
                let d = row.get(denominator)?.as_f64()?;
                if d == 0.0 {
                    Some(Value::Float(0.0))
                } else {
                    Some(Value::Float(round2(n / d * scale)))
                }
            }
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// The derived columns added to every report unless replaced.
pub fn default_derived_columns() -> Vec<DerivedColumn> {
    vec![
        DerivedColumn::difference("returningUsers", "activeUsers", "newUsers"),
        DerivedColumn::ratio("pagesPerSession", "screenPageViews", "sessions", 1.0),
        DerivedColumn::ratio("conversionRate", "conversions", "sessions", 100.0),
        DerivedColumn::ratio("avgSessionDuration", "userEngagementDuration", "sessions", 1.0),
    ]
}

/// Converts raw rows into typed `ReportRow`s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    fractional: HashSet<String>,
    derived: Vec<DerivedColumn>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            fractional: DEFAULT_FRACTIONAL_METRICS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            derived: default_derived_columns(),
        }
    }
}

impl Normalizer {
    pub fn new(
        fractional: impl IntoIterator<Item = String>,
        derived: Vec<DerivedColumn>,
    ) -> Self {
        Self {
            fractional: fractional.into_iter().collect(),
            derived,
        }
    }

    /// Treat `metric` as fractional in addition to the current set.
    pub fn with_fractional(mut self, metric: impl Into<String>) -> Self {
        self.fractional.insert(metric.into());
        self
    }

    pub fn with_derived(mut self, column: DerivedColumn) -> Self {
        self.derived.push(column);
        self
    }

    pub fn without_derived(mut self) -> Self {
        self.derived.clear();
        self
    }

    /// Normalize with metric kinds taken from the fractional set alone.
    pub fn normalize(
        &self,
        dimension_names: &[String],
        metric_names: &[String],
        rows: Vec<RawRow>,
    ) -> Result<Vec<ReportRow>> {
        self.normalize_typed(dimension_names, metric_names, &HashMap::new(), rows)
    }

    /// Normalize with per-column kinds from the response headers. Columns
    /// missing from `kinds` fall back to the fractional set.
    pub fn normalize_typed(
        &self,
        dimension_names: &[String],
        metric_names: &[String],
        kinds: &HashMap<String, MetricKind>,
        rows: Vec<RawRow>,
    ) -> Result<Vec<ReportRow>> {
        rows.into_iter()
            .enumerate()
            .map(|(index, raw)| self.normalize_row(dimension_names, metric_names, kinds, raw, index))
            .collect()
    }

    fn kind_of(&self, name: &str, kinds: &HashMap<String, MetricKind>) -> MetricKind {
        match kinds.get(name) {
            Some(kind) => *kind,
            None if self.fractional.contains(name) => MetricKind::Float,
            None => MetricKind::Integer,
        }
    }

    fn normalize_row(
        &self,
        dimension_names: &[String],
        metric_names: &[String],
        kinds: &HashMap<String, MetricKind>,
        raw: RawRow,
        index: usize,
    ) -> Result<ReportRow> {
        check_arity("dimensionValues", dimension_names.len(), raw.dimensions.len(), index)?;
        check_arity("metricValues", metric_names.len(), raw.metrics.len(), index)?;

        let mut row = ReportRow::default();
        for (name, value) in dimension_names.iter().zip(raw.dimensions) {
            let value = value.ok_or_else(|| Error::parse(name, format!("missing value in row {index}")))?;
            row.push(name, Value::Text(value));
        }
        for (name, value) in metric_names.iter().zip(raw.metrics) {
            let value = value.ok_or_else(|| Error::parse(name, format!("missing value in row {index}")))?;
            row.push(name, parse_metric(name, &value, self.kind_of(name, kinds))?);
        }

        for column in &self.derived {
            if row.get(&column.name).is_some() {
                continue;
            }
            if let Some(value) = column.compute(&row) {
                row.push(&column.name, value);
            }
        }
        Ok(row)
    }

}

fn parse_metric(name: &str, raw: &str, kind: MetricKind) -> Result<Value> {
    let trimmed = raw.trim();
    match kind {
        MetricKind::Float => match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Float(f)),
            _ => Err(Error::parse(name, format!("not a number: {raw:?}"))),
        },
        MetricKind::Integer => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| Error::parse(name, format!("not an integer: {raw:?}"))),
    }
}

fn check_arity(field: &str, expected: usize, got: usize, index: usize) -> Result<()> {
    if expected == got {
        return Ok(());
    }
    let reason = if got < expected {
        format!("row {index} has {got} values for {expected} names (missing value)")
    } else {
        format!("row {index} has {got} values for {expected} names (extra value)")
    };
    Err(Error::parse(field, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn raw(dimensions: &[&str], metrics: &[&str]) -> RawRow {
        RawRow {
            dimensions: dimensions.iter().map(|s| Some(s.to_string())).collect(),
            metrics: metrics.iter().map(|s| Some(s.to_string())).collect(),
        }
    }

    #[test]
    fn returning_users_is_derived() {
        let rows = Normalizer::default()
            .normalize(
                &names(&["date"]),
                &names(&["activeUsers", "newUsers"]),
                vec![raw(&["20240101"], &["120", "40"])],
            )
            .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("date"), Some(&Value::Text("20240101".into())));
        assert_eq!(row.get("activeUsers"), Some(&Value::Integer(120)));
        assert_eq!(row.get("newUsers"), Some(&Value::Integer(40)));
        assert_eq!(row.get("returningUsers"), Some(&Value::Integer(80)));
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn ratios_are_rounded_and_zero_safe() {
        let normalizer = Normalizer::default();
        let rows = normalizer
            .normalize(
                &names(&[]),
                &names(&["screenPageViews", "sessions", "conversions", "userEngagementDuration"]),
                vec![
                    raw(&[], &["10", "3", "1", "200.5"]),
                    raw(&[], &["10", "0", "1", "200.5"]),
                ],
            )
            .unwrap();

        assert_eq!(rows[0].get("pagesPerSession"), Some(&Value::Float(3.33)));
        assert_eq!(rows[0].get("conversionRate"), Some(&Value::Float(33.33)));
        assert_eq!(rows[0].get("avgSessionDuration"), Some(&Value::Float(66.83)));
        assert_eq!(rows[1].get("pagesPerSession"), Some(&Value::Float(0.0)));
        assert_eq!(rows[1].get("conversionRate"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn derived_columns_need_all_inputs() {
        let rows = Normalizer::default()
            .normalize(&names(&[]), &names(&["activeUsers"]), vec![raw(&[], &["5"])])
            .unwrap();
        assert!(rows[0].get("returningUsers").is_none());
    }

    #[test]
    fn fractional_metrics_parse_as_float() {
        let rows = Normalizer::default()
            .normalize(
                &names(&[]),
                &names(&["bounceRate", "sessions"]),
                vec![raw(&[], &["0.4231", "17"])],
            )
            .unwrap();
        assert_eq!(rows[0].get("bounceRate"), Some(&Value::Float(0.4231)));
        assert_eq!(rows[0].get("sessions"), Some(&Value::Integer(17)));
    }

    #[test]
    fn unparseable_integer_is_fatal() {
        let err = Normalizer::default()
            .normalize(&names(&[]), &names(&["sessions"]), vec![raw(&[], &["12.5"])])
            .unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "sessions"));
    }

    #[test]
    fn non_finite_float_is_fatal() {
        let err = Normalizer::default()
            .normalize(&names(&[]), &names(&["bounceRate"]), vec![raw(&[], &["NaN"])])
            .unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "bounceRate"));
    }

    #[test]
    fn missing_and_extra_values_are_fatal() {
        let normalizer = Normalizer::default();
        let metrics = names(&["activeUsers", "newUsers"]);

        let short = normalizer
            .normalize(&names(&[]), &metrics, vec![raw(&[], &["1"])])
            .unwrap_err();
        assert!(matches!(short, Error::Parse { ref reason, .. } if reason.contains("missing")));

        let long = normalizer
            .normalize(&names(&[]), &metrics, vec![raw(&[], &["1", "2", "3"])])
            .unwrap_err();
        assert!(matches!(long, Error::Parse { ref reason, .. } if reason.contains("extra")));

        let empty_slot = RawRow {
            dimensions: vec![None],
            metrics: vec![Some("1".into()), Some("2".into())],
        };
        let err = normalizer
            .normalize(&names(&["date"]), &metrics, vec![empty_slot])
            .unwrap_err();
        assert!(matches!(err, Error::Parse { ref field, .. } if field == "date"));
    }

    #[test]
    fn rows_keep_server_order() {
        let rows = Normalizer::default()
            .without_derived()
            .normalize(
                &names(&["date"]),
                &names(&["sessions"]),
                vec![
                    raw(&["20240103"], &["3"]),
                    raw(&["20240101"], &["1"]),
                    raw(&["20240102"], &["2"]),
                ],
            )
            .unwrap();
        let dates: Vec<_> = rows.iter().map(|r| r.get("date").cloned()).collect();
        assert_eq!(
            dates,
            vec![
                Some(Value::Text("20240103".into())),
                Some(Value::Text("20240101".into())),
                Some(Value::Text("20240102".into())),
            ]
        );
    }

    #[test]
    fn requested_column_is_not_overwritten_by_derivation() {
        let rows = Normalizer::default()
            .normalize(
                &names(&[]),
                &names(&["activeUsers", "newUsers", "returningUsers"]),
                vec![raw(&[], &["10", "4", "7"])],
            )
            .unwrap();
        assert_eq!(rows[0].get("returningUsers"), Some(&Value::Integer(7)));
        assert_eq!(rows[0].len(), 3);
    }

    #[test]
    fn custom_fractional_and_derived_columns() {
        let normalizer = Normalizer::new(Vec::new(), Vec::new())
            .with_fractional("cost")
            .with_derived(DerivedColumn::ratio("costPerClick", "cost", "clicks", 1.0));
        let rows = normalizer
            .normalize(&names(&[]), &names(&["cost", "clicks"]), vec![raw(&[], &["12.5", "4"])])
            .unwrap();
        assert_eq!(rows[0].get("costPerClick"), Some(&Value::Float(3.13)));
    }

    #[test]
    fn header_kind_overrides_fractional_set() {
        let kinds = HashMap::from([
            ("eventsPerSession".to_string(), MetricKind::Float),
            ("bounceRate".to_string(), MetricKind::Integer),
        ]);
        let rows = Normalizer::default()
            .normalize_typed(
                &names(&[]),
                &names(&["eventsPerSession", "bounceRate", "engagementRate"]),
                &kinds,
                vec![raw(&[], &["2.5", "3", "0.61"])],
            )
            .unwrap();
        assert_eq!(rows[0].get("eventsPerSession"), Some(&Value::Float(2.5)));
        assert_eq!(rows[0].get("bounceRate"), Some(&Value::Integer(3)));
        // untyped column falls back to the fractional set
        assert_eq!(rows[0].get("engagementRate"), Some(&Value::Float(0.61)));
    }

    #[test]
    fn api_types_map_to_kinds() {
        assert_eq!(MetricKind::from_api_type("TYPE_INTEGER"), Some(MetricKind::Integer));
        assert_eq!(MetricKind::from_api_type("TYPE_FLOAT"), Some(MetricKind::Float));
        assert_eq!(MetricKind::from_api_type("TYPE_CURRENCY"), Some(MetricKind::Float));
        assert_eq!(MetricKind::from_api_type("TYPE_SECONDS"), Some(MetricKind::Float));
        assert_eq!(MetricKind::from_api_type("TYPE_UNSPECIFIED"), None);
    }

    #[test]
    fn overflowing_difference_falls_back_to_float() {
        let rows = Normalizer::default()
            .normalize(
                &names(&[]),
                &names(&["activeUsers", "newUsers"]),
                vec![raw(&[], &["9223372036854775807", "-1"])],
            )
            .unwrap();
        assert!(matches!(rows[0].get("returningUsers"), Some(Value::Float(f)) if *f > 9.2e18));
    }

    #[test]
    fn row_serializes_as_ordered_object() {
        let rows = Normalizer::default()
            .normalize(
                &names(&["date"]),
                &names(&["activeUsers", "newUsers"]),
                vec![raw(&["20240101"], &["120", "40"])],
            )
            .unwrap();
        let json = serde_json::to_string(&rows[0]).unwrap();
        assert_eq!(
            json,
            r#"{"date":"20240101","activeUsers":120,"newUsers":40,"returningUsers":80}"#
        );
    }
}
