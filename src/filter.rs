use std::{collections::BTreeSet, fmt};

use chrono::NaiveDate;
use itertools::{Itertools, MinMaxResult};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, format_number, parse_date, parse_number},
    dataset::{Column, Dataset},
    error::{FacetError, FacetResult},
    schema::{ColumnDescriptor, ColumnKind},
};

/// Token accepted by the text filter syntax for the null bucket.
pub const UNKNOWN_TOKEN: &str = "<unknown>";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterValue {
    Value(String),
    Unknown,
}

impl FilterValue {
    pub fn of(cell: Option<&Value>) -> Self {
        match cell {
            Some(value) => FilterValue::Value(value.facet_key()),
            None => FilterValue::Unknown,
        }
    }

    pub fn label<'a>(&'a self, unknown_label: &'a str) -> &'a str {
        match self {
            FilterValue::Value(v) => v,
            FilterValue::Unknown => unknown_label,
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(UNKNOWN_TOKEN))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    Values(BTreeSet<FilterValue>),
    Range {
        min: Option<f64>,
        max: Option<f64>,
        #[serde(default)]
        include_unknown: bool,
    },
    DateRange {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        #[serde(default)]
        include_unknown: bool,
    },
}

impl Selection {
    pub fn values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selection::Values(
            values
                .into_iter()
                .map(|v| FilterValue::Value(v.into()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Values(values) if values.is_empty())
    }

    fn accepts(&self, cell: Option<&Value>) -> bool {
        match self {
            Selection::Values(values) => values.contains(&FilterValue::of(cell)),
            Selection::Range {
                min,
                max,
                include_unknown,
            } => match cell.and_then(Value::as_number) {
                Some(n) => min.is_none_or(|lo| n >= lo) && max.is_none_or(|hi| n <= hi),
                None => *include_unknown,
            },
            Selection::DateRange {
                from,
                to,
                include_unknown,
            } => match cell.and_then(Value::as_date) {
                Some(d) => from.is_none_or(|lo| d >= lo) && to.is_none_or(|hi| d <= hi),
                None => *include_unknown,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    pub kind: ColumnKind,
    pub selection: Selection,
}

impl FilterSpec {
    pub fn new(column: impl Into<String>, kind: ColumnKind, selection: Selection) -> Self {
        Self {
            column: column.into(),
            kind,
            selection,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum FilterControl {
    Choice {
        column: String,
        kind: ColumnKind,
        options: Vec<FilterValue>,
    },
    Range {
        column: String,
        min: f64,
        max: f64,
        has_unknown: bool,
    },
}

impl FilterControl {
    pub fn column(&self) -> &str {
        match self {
            FilterControl::Choice { column, .. } | FilterControl::Range { column, .. } => column,
        }
    }

    /// The "select everything" filter for this control.
    pub fn default_spec(&self) -> FilterSpec {
        match self {
            FilterControl::Choice {
                column,
                kind,
                options,
            } => FilterSpec::new(
                column.clone(),
                *kind,
                Selection::Values(options.iter().cloned().collect()),
            ),
            FilterControl::Range {
                column,
                min,
                max,
                has_unknown,
            } => FilterSpec::new(
                column.clone(),
                ColumnKind::Numeric,
                Selection::Range {
                    min: Some(*min),
                    max: Some(*max),
                    include_unknown: *has_unknown,
                },
            ),
        }
    }
}

pub fn build_filter_controls(
    dataset: &Dataset,
    descriptors: &[ColumnDescriptor],
) -> FacetResult<Vec<FilterControl>> {
    descriptors
        .iter()
        .map(|descriptor| {
            let column = dataset.require_column(&descriptor.name)?;
            Ok(control_for(column, descriptor.kind))
        })
        .collect()
}

fn control_for(column: &Column, kind: ColumnKind) -> FilterControl {
    if kind == ColumnKind::Numeric {
        let bounds = match column
            .values
            .iter()
            .flatten()
            .filter_map(Value::as_number)
            .minmax_by(f64::total_cmp)
        {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(n) => Some((n, n)),
            MinMaxResult::MinMax(min, max) => Some((min, max)),
        };
        // All-null numeric columns fall through to a choice over the null bucket.
        if let Some((min, max)) = bounds {
            return FilterControl::Range {
                column: column.name.clone(),
                min,
                max,
                has_unknown: column.null_count() > 0,
            };
        }
    }
    FilterControl::Choice {
        column: column.name.clone(),
        kind,
        options: column
            .values
            .iter()
            .map(|cell| FilterValue::of(cell.as_ref()))
            .unique()
            .collect(),
    }
}

/// Rows matching every filter, as a new dataset. `dataset` is not modified.
/// A filter with an empty selection matches no rows.
pub fn apply(dataset: &Dataset, filters: &[FilterSpec]) -> FacetResult<Dataset> {
    let mut bound = Vec::with_capacity(filters.len());
    for filter in filters {
        let column = dataset.require_column(&filter.column)?;
        check_compatible(column, &filter.selection)?;
        bound.push((column, &filter.selection));
    }
    let keep: Vec<usize> = (0..dataset.row_count())
        .filter(|&row| {
            bound
                .iter()
                .all(|(column, selection)| selection.accepts(column.values[row].as_ref()))
        })
        .collect();
    debug!(
        "Applied {} filter(s): {} of {} row(s) kept",
        filters.len(),
        keep.len(),
        dataset.row_count()
    );
    Ok(dataset.take_rows(&keep))
}

fn check_compatible(column: &Column, selection: &Selection) -> FacetResult<()> {
    let reason = match (selection, column.kind) {
        (Selection::Range { .. }, kind) if kind != ColumnKind::Numeric => {
            format!("range filters need a numeric column, found {kind}")
        }
        (Selection::DateRange { .. }, kind) if kind != ColumnKind::Date => {
            format!("date range filters need a date column, found {kind}")
        }
        _ => return Ok(()),
    };
    Err(FacetError::InvalidFilter {
        column: column.name.clone(),
        reason,
    })
}

/// A filter written as `column=value|value`, `column=min..max`, or
/// `column=from..to` (dates), before it is bound to a concrete column.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpression {
    pub column: String,
    pub raw_value: String,
}

pub fn parse_filter_expressions(filters: &[String]) -> FacetResult<Vec<FilterExpression>> {
    filters.iter().map(|f| parse_filter_expression(f)).collect()
}

fn parse_filter_expression(filter: &str) -> FacetResult<FilterExpression> {
    let trimmed = filter.trim();
    let Some((left, right)) = trimmed.split_once('=') else {
        return Err(FacetError::InvalidFilter {
            column: trimmed.to_string(),
            reason: "expected 'column=value'".to_string(),
        });
    };
    let column = unquote(left.trim()).to_string();
    if column.is_empty() {
        return Err(FacetError::InvalidFilter {
            column: trimmed.to_string(),
            reason: "missing column name".to_string(),
        });
    }
    Ok(FilterExpression {
        column,
        raw_value: right.trim().to_string(),
    })
}

impl FilterExpression {
    /// Binds the expression to `column`, interpreting the value according to
    /// the column's kind.
    pub fn to_spec(&self, column: &str, kind: ColumnKind, date_formats: &[String]) -> FacetResult<FilterSpec> {
        let invalid = |reason: String| FacetError::InvalidFilter {
            column: column.to_string(),
            reason,
        };
        let selection = match (kind, self.raw_value.split_once("..")) {
            (ColumnKind::Numeric, Some((lo, hi))) => Selection::Range {
                min: parse_bound(lo, |v| parse_number(v))
                    .map_err(|v| invalid(format!("'{v}' is not a number")))?,
                max: parse_bound(hi, |v| parse_number(v))
                    .map_err(|v| invalid(format!("'{v}' is not a number")))?,
                include_unknown: false,
            },
            (ColumnKind::Date, Some((lo, hi))) => Selection::DateRange {
                from: parse_bound(lo, |v| parse_date(v, date_formats))
                    .map_err(|v| invalid(format!("'{v}' is not a date")))?,
                to: parse_bound(hi, |v| parse_date(v, date_formats))
                    .map_err(|v| invalid(format!("'{v}' is not a date")))?,
                include_unknown: false,
            },
            _ => Selection::Values(
                self.raw_value
                    .split('|')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| match (unquote(v), kind) {
                        (UNKNOWN_TOKEN, _) => Ok(FilterValue::Unknown),
                        // Numeric cells are keyed by their canonical rendering.
                        (other, ColumnKind::Numeric) => parse_number(other)
                            .map(|n| FilterValue::Value(format_number(n)))
                            .ok_or_else(|| invalid(format!("'{other}' is not a number"))),
                        (other, _) => Ok(FilterValue::Value(other.to_string())),
                    })
                    .collect::<FacetResult<_>>()?,
            ),
        };
        Ok(FilterSpec::new(column, kind, selection))
    }
}

fn parse_bound<T>(raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>, String> {
    let value = unquote(raw.trim());
    if value.is_empty() {
        return Ok(None);
    }
    parse(value).map(Some).ok_or_else(|| value.to_string())
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}
