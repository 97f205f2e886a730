use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Months, NaiveDate};
use log::debug;
use serde::Serialize;

use crate::{
    data::{Value, format_number, year_month},
    dataset::Dataset,
    error::{FacetError, FacetResult},
    filter::{FilterValue, UNKNOWN_TOKEN},
    schema::ColumnKind,
};

/// Months averaged for the projection when the history is long enough.
pub const PROJECTION_BASIS_MONTHS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub label: String,
    pub count: usize,
    /// Set on the bucket holding null cells.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unknown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryView {
    pub column: String,
    pub buckets: Vec<Bucket>,
    pub total: usize,
}

impl SummaryView {
    pub fn count(&self, label: &str) -> Option<usize> {
        self.buckets
            .iter()
            .find(|bucket| bucket.label == label)
            .map(|bucket| bucket.count)
    }

    /// Rows whose cell was null.
    pub fn unknown_count(&self) -> usize {
        self.buckets
            .iter()
            .find(|bucket| bucket.unknown)
            .map_or(0, |bucket| bucket.count)
    }

    /// Largest `n` buckets; `0` keeps all of them.
    pub fn top(&self, n: usize) -> SummaryView {
        let mut view = self.clone();
        if n > 0 && view.buckets.len() > n {
            view.buckets.truncate(n);
        }
        view
    }

    pub fn percent(&self, bucket: &Bucket) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            bucket.count as f64 / self.total as f64 * 100.0
        }
    }

    pub fn render_rows(&self) -> Vec<Vec<String>> {
        self.buckets
            .iter()
            .map(|bucket| {
                vec![
                    self.column.clone(),
                    bucket.label.clone(),
                    bucket.count.to_string(),
                    format!("{:.2}%", self.percent(bucket)),
                ]
            })
            .collect()
    }
}

/// Counts per distinct value of `column`, largest first. Ties keep the order
/// in which values first appear.
///
/// Nulls form their own bucket labelled `unknown_label`. When a real value
/// already carries that label, the null bucket is labelled [`UNKNOWN_TOKEN`]
/// instead.
pub fn value_counts(dataset: &Dataset, column: &str, unknown_label: &str) -> FacetResult<SummaryView> {
    let values = &dataset.require_column(column)?.values;
    let mut positions: HashMap<FilterValue, usize> = HashMap::new();
    let mut counted: Vec<(FilterValue, usize)> = Vec::new();
    for cell in values {
        let key = FilterValue::of(cell.as_ref());
        match positions.get(&key) {
            Some(&idx) => counted[idx].1 += 1,
            None => {
                positions.insert(key.clone(), counted.len());
                counted.push((key, 1));
            }
        }
    }
    let clashes = positions.contains_key(&FilterValue::Value(unknown_label.to_string()));
    let null_label = if clashes { UNKNOWN_TOKEN } else { unknown_label };
    let mut buckets = counted
        .into_iter()
        .map(|(key, count)| Bucket {
            label: key.label(null_label).to_string(),
            count,
            unknown: key == FilterValue::Unknown,
        })
        .collect::<Vec<_>>();
    // Stable sort: equal counts stay in first-seen order.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    debug!("Counted {} distinct value(s) in '{column}'", buckets.len());
    Ok(SummaryView {
        column: column.to_string(),
        buckets,
        total: dataset.row_count(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub column: String,
    pub count: usize,
    pub rows: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
}

impl NumericSummary {
    pub fn render_row(&self) -> Vec<String> {
        let metric = |value: Option<f64>| value.map(format_metric).unwrap_or_default();
        vec![
            self.column.clone(),
            self.count.to_string(),
            metric(self.min),
            metric(self.max),
            metric(self.mean),
            metric(self.median),
            metric(self.std_dev),
        ]
    }
}

fn format_metric(value: f64) -> String {
    if value.fract() == 0.0 {
        format_number(value)
    } else {
        format!("{value:.4}")
    }
}

#[derive(Debug, Default)]
struct NumericAccumulator {
    values: Vec<f64>,
    sum: f64,
    sum_squares: f64,
}

impl NumericAccumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.sum_squares += value * value;
        self.values.push(value);
    }

    fn count(&self) -> usize {
        self.values.len()
    }

    fn mean(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.sum / self.count() as f64)
    }

    fn median(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len().is_multiple_of(2) {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    /// Sample standard deviation; undefined below two values.
    fn std_dev(&self) -> Option<f64> {
        if self.count() < 2 {
            return None;
        }
        let mean = self.mean()?;
        let n = self.count() as f64;
        let variance = (self.sum_squares - n * mean * mean) / (n - 1.0);
        Some(variance.max(0.0).sqrt())
    }
}

pub fn numeric_summary(dataset: &Dataset, column: &str) -> FacetResult<NumericSummary> {
    let source = dataset.require_column(column)?;
    if source.kind != ColumnKind::Numeric {
        return Err(FacetError::NotNumeric {
            column: column.to_string(),
        });
    }
    let mut acc = NumericAccumulator::default();
    for value in source.values.iter().flatten().filter_map(Value::as_number) {
        acc.add(value);
    }
    Ok(NumericSummary {
        column: column.to_string(),
        count: acc.count(),
        rows: dataset.row_count(),
        min: acc.values.iter().copied().reduce(f64::min),
        max: acc.values.iter().copied().reduce(f64::max),
        mean: acc.mean(),
        median: acc.median(),
        std_dev: acc.std_dev(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub month: String,
    pub count: usize,
    pub moving_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub month: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendView {
    pub column: String,
    pub points: Vec<TrendPoint>,
    pub projection: Vec<ProjectedPoint>,
    pub average: Option<f64>,
}

/// Monthly counts of `date_column`, a trailing moving average over `window`
/// months, and a flat projection of the next `horizon` months.
///
/// Only months that occur in the data are reported. The projection repeats
/// the mean of the last six observed months (or fewer when the history is
/// shorter), rounded to a whole count.
pub fn monthly_trend(
    dataset: &Dataset,
    date_column: &str,
    window: usize,
    horizon: usize,
) -> FacetResult<TrendView> {
    let source = dataset.require_column(date_column)?;
    if source.kind != ColumnKind::Date {
        return Err(FacetError::NotDate {
            column: date_column.to_string(),
        });
    }
    let mut monthly: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for date in source.values.iter().flatten().filter_map(Value::as_date) {
        if let Some(first) = date.with_day(1) {
            *monthly.entry(first).or_insert(0) += 1;
        }
    }
    let counts: Vec<usize> = monthly.values().copied().collect();
    // A history shorter than the window still averages over what it has.
    let window = window.min(counts.len());
    let points = monthly
        .keys()
        .enumerate()
        .map(|(idx, month)| TrendPoint {
            month: year_month(month),
            count: counts[idx],
            moving_average: trailing_mean(&counts[..=idx], window),
        })
        .collect::<Vec<_>>();

    let basis = &counts[counts.len().saturating_sub(PROJECTION_BASIS_MONTHS)..];
    let average = (!basis.is_empty())
        .then(|| basis.iter().sum::<usize>() as f64 / basis.len() as f64);
    let projection = match (average, monthly.keys().next_back()) {
        (Some(average), Some(last)) => (1..=horizon)
            .filter_map(|ahead| last.checked_add_months(Months::new(ahead as u32)))
            .map(|month| ProjectedPoint {
                month: year_month(&month),
                count: average.round() as u64,
            })
            .collect(),
        _ => Vec::new(),
    };
    Ok(TrendView {
        column: date_column.to_string(),
        points,
        projection,
        average,
    })
}

fn trailing_mean(history: &[usize], window: usize) -> Option<f64> {
    if window == 0 || history.len() < window {
        return None;
    }
    let tail = &history[history.len() - window..];
    Some(tail.iter().sum::<usize>() as f64 / window as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetOverview {
    pub rows: usize,
    pub columns: usize,
}

pub fn overview(dataset: &Dataset) -> DatasetOverview {
    DatasetOverview {
        rows: dataset.row_count(),
        columns: dataset.column_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;

    fn text(v: &str) -> Option<Value> {
        Some(Value::Text(v.to_string()))
    }

    fn date(y: i32, m: u32, d: u32) -> Option<Value> {
        NaiveDate::from_ymd_opt(y, m, d).map(Value::Date)
    }

    #[test]
    fn status_counts_include_unknown_bucket() {
        let dataset = Dataset::new(vec![Column::new(
            "STATUS GERAL RECEBIMENTO",
            ColumnKind::Categorical,
            vec![text("Received"), text("Pending"), text("Received"), None],
        )])
        .unwrap();
        let view = value_counts(&dataset, "STATUS GERAL RECEBIMENTO", "unknown").unwrap();
        assert_eq!(view.count("Received"), Some(2));
        assert_eq!(view.count("Pending"), Some(1));
        assert_eq!(view.count("unknown"), Some(1));
        assert_eq!(view.buckets.iter().map(|b| b.count).sum::<usize>(), 4);
        assert_eq!(view.buckets[0].label, "Received");
    }

    #[test]
    fn literal_unknown_text_stays_apart_from_nulls() {
        let dataset = Dataset::new(vec![Column::new(
            "status",
            ColumnKind::Categorical,
            vec![text("unknown"), None, text("Received")],
        )])
        .unwrap();
        let view = value_counts(&dataset, "status", "unknown").unwrap();
        assert_eq!(view.buckets.len(), 3);
        assert_eq!(view.count("unknown"), Some(1));
        assert_eq!(view.count(UNKNOWN_TOKEN), Some(1));
        assert_eq!(view.unknown_count(), 1);
        assert!(view.buckets.iter().filter(|b| b.unknown).all(|b| b.label == UNKNOWN_TOKEN));

        let plain = value_counts(&dataset, "status", "sem status").unwrap();
        assert_eq!(plain.count("sem status"), Some(1));
        assert_eq!(plain.count("unknown"), Some(1));
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let dataset = Dataset::new(vec![Column::new(
            "ESFERA",
            ColumnKind::Categorical,
            vec![text("Municipal"), text("Estadual"), text("Federal"), text("Estadual")],
        )])
        .unwrap();
        let labels = value_counts(&dataset, "ESFERA", "unknown")
            .unwrap()
            .buckets
            .into_iter()
            .map(|b| b.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Estadual", "Municipal", "Federal"]);
    }

    #[test]
    fn top_and_percent() {
        let dataset = Dataset::new(vec![Column::new(
            "c",
            ColumnKind::Categorical,
            vec![text("a"), text("a"), text("a"), text("b")],
        )])
        .unwrap();
        let view = value_counts(&dataset, "c", "unknown").unwrap();
        let top = view.top(1);
        assert_eq!(top.buckets.len(), 1);
        assert_eq!(top.total, 4);
        assert!((view.percent(&view.buckets[0]) - 75.0).abs() < 1e-9);
        assert_eq!(view.render_rows()[1], vec!["c", "b", "1", "25.00%"]);
    }

    #[test]
    fn numeric_summary_ignores_nulls() {
        let dataset = Dataset::new(vec![Column::new(
            "index",
            ColumnKind::Numeric,
            vec![
                Some(Value::Number(10.0)),
                Some(Value::Number(20.0)),
                None,
                Some(Value::Number(30.0)),
            ],
        )])
        .unwrap();
        let summary = numeric_summary(&dataset, "index").unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.max, Some(30.0));
        assert_eq!(summary.mean, Some(20.0));
        assert_eq!(summary.median, Some(20.0));
        assert_eq!(summary.std_dev, Some(10.0));
    }

    #[test]
    fn numeric_summary_rejects_text_columns() {
        let dataset =
            Dataset::new(vec![Column::new("c", ColumnKind::Categorical, vec![text("a")])]).unwrap();
        assert!(matches!(
            numeric_summary(&dataset, "c"),
            Err(FacetError::NotNumeric { .. })
        ));
    }

    #[test]
    fn empty_numeric_column_has_no_statistics() {
        let dataset =
            Dataset::new(vec![Column::new("n", ColumnKind::Numeric, vec![None, None])]).unwrap();
        let summary = numeric_summary(&dataset, "n").unwrap();
        assert_eq!(summary.count, 0);
        assert_eq!(summary.mean, None);
        assert_eq!(summary.render_row()[2], "");
    }

    #[test]
    fn monthly_trend_averages_and_projects() {
        let dataset = Dataset::new(vec![Column::new(
            "DATA DA INSTALAÇÃO",
            ColumnKind::Date,
            vec![
                date(2024, 1, 3),
                date(2024, 1, 20),
                date(2024, 2, 1),
                date(2024, 4, 9),
                date(2024, 4, 10),
                date(2024, 4, 11),
                None,
            ],
        )])
        .unwrap();
        let trend = monthly_trend(&dataset, "DATA DA INSTALAÇÃO", 3, 2).unwrap();
        let months = trend.points.iter().map(|p| p.month.as_str()).collect::<Vec<_>>();
        assert_eq!(months, vec!["2024-01", "2024-02", "2024-04"]);
        assert_eq!(trend.points[1].moving_average, None);
        assert_eq!(trend.points[2].moving_average, Some(2.0));
        assert_eq!(trend.average, Some(2.0));
        assert_eq!(
            trend.projection,
            vec![
                ProjectedPoint {
                    month: "2024-05".to_string(),
                    count: 2
                },
                ProjectedPoint {
                    month: "2024-06".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn short_history_averages_over_available_months() {
        let dataset = Dataset::new(vec![Column::new(
            "installed",
            ColumnKind::Date,
            vec![date(2024, 1, 5), date(2024, 2, 5), date(2024, 2, 6)],
        )])
        .unwrap();
        let trend = monthly_trend(&dataset, "installed", 3, 1).unwrap();
        let averages = trend.points.iter().map(|p| p.moving_average).collect::<Vec<_>>();
        assert_eq!(averages, vec![None, Some(1.5)]);
        assert_eq!(trend.projection[0].month, "2024-03");
        assert_eq!(trend.projection[0].count, 2);
    }

    #[test]
    fn monthly_trend_requires_a_date_column() {
        let dataset =
            Dataset::new(vec![Column::new("c", ColumnKind::Categorical, vec![text("a")])]).unwrap();
        assert!(matches!(
            monthly_trend(&dataset, "c", 3, 6),
            Err(FacetError::NotDate { .. })
        ));
    }

    #[test]
    fn overview_reports_shape() {
        let dataset = Dataset::new(vec![
            Column::new("a", ColumnKind::Categorical, vec![text("x"), None]),
            Column::new("b", ColumnKind::Categorical, vec![None, None]),
        ])
        .unwrap();
        assert_eq!(overview(&dataset), DatasetOverview { rows: 2, columns: 2 });
    }
}
