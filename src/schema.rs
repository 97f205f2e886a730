use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use log::debug;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{
    config::EngineConfig,
    error::{FacetError, FacetResult},
};

const SUGGESTION_MIN_RATIO: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Categorical,
    Numeric,
    Date,
    Identifier,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Categorical => "categorical",
            ColumnKind::Numeric => "numeric",
            ColumnKind::Date => "date",
            ColumnKind::Identifier => "identifier",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-column outcome of type coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionStats {
    pub non_empty: usize,
    pub coerced: usize,
    pub lost: usize,
    /// Placeholder tokens such as `N/A` read as null in numeric or date columns.
    #[serde(default)]
    pub placeholders: usize,
}

impl CoercionStats {
    pub fn loss_rate(&self) -> f64 {
        if self.non_empty == 0 {
            0.0
        } else {
            self.lost as f64 / self.non_empty as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub aliases: BTreeSet<String>,
    pub kind: ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub coercion: CoercionStats,
}

/// Comparison key for column names: trimmed, internal whitespace collapsed.
pub fn collapse_whitespace(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Loose comparison key: whitespace collapsed, accents stripped, lowercased,
/// trailing punctuation removed.
pub fn fold_name(name: &str) -> String {
    let stripped: String = collapse_whitespace(name)
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

/// Maps logical roles to the raw header spellings they go by.
#[derive(Debug, Clone, Default)]
pub struct SchemaResolver {
    roles: BTreeMap<String, Vec<String>>,
    identifier_roles: BTreeSet<String>,
}

impl SchemaResolver {
    pub fn new(roles: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            roles,
            identifier_roles: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            roles: config.aliases.clone(),
            identifier_roles: config.identifier_roles.iter().cloned().collect(),
        }
    }

    pub fn is_identifier_role(&self, role: &str) -> bool {
        self.identifier_roles.contains(role)
    }

    /// Accepted spellings for a logical name. A name without a configured
    /// role stands for itself.
    pub fn spellings<'a>(&'a self, logical: &'a str) -> Vec<&'a str> {
        match self.roles.get(logical) {
            Some(spellings) => {
                let mut out: Vec<&str> = Vec::with_capacity(spellings.len() + 1);
                out.extend(spellings.iter().map(String::as_str));
                if !out.contains(&logical) {
                    out.push(logical);
                }
                out
            }
            None => vec![logical],
        }
    }

    /// Maps a logical name to the matching column in `columns`.
    ///
    /// Passes run from strictest to loosest: exact, case-insensitive,
    /// whitespace-trimmed, then accent/punctuation-folded. Within a pass the
    /// first spelling that matches wins.
    pub fn resolve<'c>(&self, columns: &'c [String], logical: &str) -> FacetResult<&'c str> {
        let spellings = self.spellings(logical);
        type Matcher = fn(&str, &str) -> bool;
        let passes: [(&str, Matcher); 4] = [
            ("exact", |c, s| c == s),
            ("case-insensitive", |c, s| c.to_lowercase() == s.to_lowercase()),
            ("trimmed", |c, s| {
                collapse_whitespace(c).to_lowercase() == collapse_whitespace(s).to_lowercase()
            }),
            ("folded", |c, s| fold_name(c) == fold_name(s)),
        ];
        for (pass, matches) in passes {
            for spelling in &spellings {
                if let Some(column) = columns.iter().find(|c| matches(c, spelling)) {
                    debug!("Resolved '{logical}' to column '{column}' ({pass} match on '{spelling}')");
                    return Ok(column.as_str());
                }
            }
        }
        Err(FacetError::ColumnNotFound {
            role: logical.to_string(),
            available: columns.to_vec(),
            suggestion: closest_column(columns, &spellings),
        })
    }

    /// Role whose spellings fold to the same key as `raw`, if any.
    pub fn canonical_role(&self, raw: &str) -> Option<&str> {
        let key = fold_name(raw);
        if key.is_empty() {
            return None;
        }
        self.roles
            .iter()
            .find(|(role, spellings)| {
                fold_name(role) == key || spellings.iter().any(|s| fold_name(s) == key)
            })
            .map(|(role, _)| role.as_str())
    }
}

fn closest_column(columns: &[String], spellings: &[&str]) -> Option<String> {
    let mut best: Option<(f32, &String)> = None;
    for column in columns {
        let folded_column = fold_name(column);
        for spelling in spellings {
            let folded_spelling = fold_name(spelling);
            let ratio = TextDiff::from_chars(folded_column.as_str(), folded_spelling.as_str())
                .ratio();
            if ratio >= SUGGESTION_MIN_RATIO && best.is_none_or(|(score, _)| ratio > score) {
                best = Some((ratio, column));
            }
        }
    }
    best.map(|(_, column)| column.clone())
}

/// A resolver bound to one dataset's column set. Column sets do not change
/// within a load, so both hits and misses are memoized.
#[derive(Debug)]
pub struct BoundSchema<'r> {
    resolver: &'r SchemaResolver,
    columns: Vec<String>,
    memo: RefCell<HashMap<String, Result<String, FacetError>>>,
}

impl<'r> BoundSchema<'r> {
    pub fn new(resolver: &'r SchemaResolver, columns: Vec<String>) -> Self {
        Self {
            resolver,
            columns,
            memo: RefCell::new(HashMap::new()),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn resolve(&self, logical: &str) -> FacetResult<String> {
        if let Some(cached) = self.memo.borrow().get(logical) {
            return cached.as_ref().cloned().map_err(clone_not_found);
        }
        let outcome = self
            .resolver
            .resolve(&self.columns, logical)
            .map(str::to_string);
        let returned = outcome.as_ref().cloned().map_err(clone_not_found);
        self.memo.borrow_mut().insert(logical.to_string(), outcome);
        returned
    }

    pub fn memoized(&self) -> usize {
        self.memo.borrow().len()
    }
}

fn clone_not_found(err: &FacetError) -> FacetError {
    match err {
        FacetError::ColumnNotFound {
            role,
            available,
            suggestion,
        } => FacetError::ColumnNotFound {
            role: role.clone(),
            available: available.clone(),
            suggestion: suggestion.clone(),
        },
        other => FacetError::Config(other.to_string()),
    }
}
