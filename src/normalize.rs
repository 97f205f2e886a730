use std::collections::{BTreeSet, HashSet};

use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::{
    config::{CoercionConfig, EngineConfig},
    data::{Value, is_placeholder, is_uuid, parse_date, parse_number},
    dataset::{Column, Dataset, RawTable},
    error::FacetResult,
    schema::{CoercionStats, ColumnDescriptor, ColumnKind, SchemaResolver, collapse_whitespace},
};

#[derive(Debug, Clone)]
pub struct Normalizer {
    coercion: CoercionConfig,
    date_formats: Vec<String>,
    artifact: Regex,
    resolver: SchemaResolver,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub dataset: Dataset,
    pub descriptors: Vec<ColumnDescriptor>,
    pub report: NormalizeReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeReport {
    pub dropped_columns: Vec<String>,
    pub renamed_duplicates: Vec<(String, String)>,
    pub coercion_losses: Vec<(String, usize)>,
    pub reverted_columns: Vec<String>,
}

impl NormalizeReport {
    pub fn total_lost_cells(&self) -> usize {
        self.coercion_losses.iter().map(|(_, lost)| lost).sum()
    }
}

#[derive(Debug, Clone, Default)]
struct KindCandidate {
    non_empty: usize,
    numeric_matches: usize,
    date_matches: usize,
    uuid_matches: usize,
}

impl KindCandidate {
    fn update(&mut self, value: &str, date_formats: &[String]) {
        if value.is_empty() || is_placeholder(value) {
            return;
        }
        self.non_empty += 1;
        if parse_number(value).is_some() {
            self.numeric_matches += 1;
        } else if parse_date(value, date_formats).is_some() {
            self.date_matches += 1;
        } else if is_uuid(value) {
            self.uuid_matches += 1;
        }
    }

    fn share(&self, matches: usize) -> f64 {
        if self.non_empty == 0 {
            0.0
        } else {
            matches as f64 / self.non_empty as f64
        }
    }

    fn decide(&self, coercion: &CoercionConfig) -> ColumnKind {
        if self.non_empty == 0 {
            return ColumnKind::Categorical;
        }
        if self.share(self.numeric_matches) >= coercion.numeric_threshold {
            ColumnKind::Numeric
        } else if self.share(self.date_matches) >= coercion.date_threshold {
            ColumnKind::Date
        } else if self.share(self.uuid_matches) >= coercion.numeric_threshold {
            ColumnKind::Identifier
        } else {
            ColumnKind::Categorical
        }
    }
}

impl Normalizer {
    pub fn new(config: &EngineConfig) -> FacetResult<Self> {
        Ok(Self {
            coercion: config.coercion.clone(),
            date_formats: config.date_formats.clone(),
            artifact: config.artifact_regex()?,
            resolver: SchemaResolver::from_config(config),
        })
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    pub fn is_artifact(&self, name: &str) -> bool {
        name.is_empty() || self.artifact.is_match(name)
    }

    pub fn normalize(&self, raw: &RawTable) -> FacetResult<Normalized> {
        let mut report = NormalizeReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut columns = Vec::new();
        let mut descriptors = Vec::new();

        for (idx, raw_name) in raw.headers.iter().enumerate() {
            let trimmed = raw_name.trim();
            if self.is_artifact(trimmed) {
                debug!("Dropping artifact column '{raw_name}'");
                report.dropped_columns.push(raw_name.clone());
                continue;
            }
            let name = unique_name(trimmed, &mut seen);
            if name != trimmed {
                report
                    .renamed_duplicates
                    .push((trimmed.to_string(), name.clone()));
            }

            let cells: Vec<&str> = raw.column_values(idx).map(str::trim).collect();
            let role = self.resolver.canonical_role(trimmed).map(str::to_string);
            let mut candidate = KindCandidate::default();
            for cell in &cells {
                candidate.update(cell, &self.date_formats);
            }
            let mut kind = candidate.decide(&self.coercion);
            if role
                .as_deref()
                .is_some_and(|r| self.resolver.is_identifier_role(r))
            {
                kind = ColumnKind::Identifier;
            }

            let (mut values, mut stats) = self.coerce(&cells, kind);
            if matches!(kind, ColumnKind::Numeric | ColumnKind::Date)
                && stats.loss_rate() > self.coercion.max_coercion_loss
            {
                warn!(
                    "Column '{name}' lost {} of {} value(s) to {kind} coercion; treating as categorical",
                    stats.lost, stats.non_empty
                );
                report.reverted_columns.push(name.clone());
                kind = ColumnKind::Categorical;
                (values, stats) = self.coerce(&cells, kind);
            } else if stats.lost > 0 {
                warn!(
                    "Column '{name}': {} value(s) could not be read as {kind} and were set to null",
                    stats.lost
                );
                report.coercion_losses.push((name.clone(), stats.lost));
            }

            let mut aliases = BTreeSet::new();
            aliases.insert(raw_name.clone());
            aliases.insert(trimmed.to_string());
            descriptors.push(ColumnDescriptor {
                name: name.clone(),
                aliases,
                kind,
                role,
                coercion: stats,
            });
            columns.push(Column::new(name, kind, values));
        }

        let dataset = Dataset::new(columns)?;
        info!(
            "Normalized {} row(s) into {} column(s) ({} artifact column(s) dropped)",
            dataset.row_count(),
            dataset.column_count(),
            report.dropped_columns.len()
        );
        Ok(Normalized {
            dataset,
            descriptors,
            report,
        })
    }

    fn coerce(&self, cells: &[&str], kind: ColumnKind) -> (Vec<Option<Value>>, CoercionStats) {
        let mut stats = CoercionStats::default();
        let values = cells
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    return None;
                }
                match kind {
                    ColumnKind::Categorical | ColumnKind::Identifier => {
                        stats.non_empty += 1;
                        stats.coerced += 1;
                        Some(Value::Text(cell.to_string()))
                    }
                    ColumnKind::Numeric | ColumnKind::Date => {
                        if is_placeholder(cell) {
                            stats.placeholders += 1;
                            return None;
                        }
                        stats.non_empty += 1;
                        let parsed = if kind == ColumnKind::Numeric {
                            parse_number(cell).map(Value::Number)
                        } else {
                            parse_date(cell, &self.date_formats).map(Value::Date)
                        };
                        match parsed {
                            Some(value) => {
                                stats.coerced += 1;
                                Some(value)
                            }
                            None => {
                                stats.lost += 1;
                                None
                            }
                        }
                    }
                }
            })
            .collect();
        (values, stats)
    }
}

fn unique_name(trimmed: &str, seen: &mut HashSet<String>) -> String {
    let key = collapse_whitespace(trimmed);
    if seen.insert(key.clone()) {
        return trimmed.to_string();
    }
    let mut suffix = 2usize;
    loop {
        let candidate = format!("{trimmed}_{suffix}");
        if seen.insert(collapse_whitespace(&candidate)) {
            return candidate;
        }
        suffix += 1;
    }
}
