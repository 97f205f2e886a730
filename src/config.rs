use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FacetError, FacetResult};

pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ARTIFACT_PATTERN: &str = "^Unnamed";
pub const DEFAULT_UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoercionConfig {
    /// Minimum share of non-empty values that must parse as numbers.
    pub numeric_threshold: f64,
    /// Minimum share of non-empty values that must parse as dates.
    pub date_threshold: f64,
    /// Above this share of failed cells a numeric/date column reverts to text.
    pub max_coercion_loss: f64,
}

impl Default for CoercionConfig {
    fn default() -> Self {
        Self {
            numeric_threshold: 0.95,
            date_threshold: 0.95,
            max_coercion_loss: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub cache_ttl_secs: u64,
    pub load_timeout_secs: u64,
    pub coercion: CoercionConfig,
    pub date_formats: Vec<String>,
    pub artifact_pattern: String,
    /// Logical role -> accepted raw spellings, in priority order.
    pub aliases: BTreeMap<String, Vec<String>>,
    pub identifier_roles: Vec<String>,
    pub sources: BTreeMap<String, SourceConfig>,
    pub unknown_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            load_timeout_secs: DEFAULT_LOAD_TIMEOUT_SECS,
            coercion: CoercionConfig::default(),
            date_formats: default_date_formats(),
            artifact_pattern: DEFAULT_ARTIFACT_PATTERN.to_string(),
            aliases: default_aliases(),
            identifier_roles: Vec::new(),
            sources: BTreeMap::new(),
            unknown_label: DEFAULT_UNKNOWN_LABEL.to_string(),
        }
    }
}

fn default_date_formats() -> Vec<String> {
    [
        "%Y-%m-%d",
        "%d/%m/%Y",
        "%d-%m-%Y",
        "%Y/%m/%d",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_aliases() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        (
            "municipality",
            &[
                "MUNICÍPIOS",
                "MUNICIPIOS",
                "MUNICÍPIO",
                "MUNICIPIO",
                "MUNICÍPIOS QUE ASSINARAM O TCT",
            ],
        ),
        ("city", &["CIDADE", "CIDADES"]),
        ("sphere", &["ESFERA"]),
        ("situation", &["SITUAÇÃO GERAL", "SITUACAO GERAL", "SITUAÇÃO"]),
        (
            "status",
            &["STATUS GERAL RECEBIMENTO", "STATUS GERAL", "STATUS"],
        ),
        ("hospital", &["HOSPITAL/MATERNIDADE", "HOSPITAL"]),
        ("registry_office", &["SERVENTIA"]),
        (
            "installation_date",
            &["DATA DA INSTALAÇÃO", "DATA INSTALAÇÃO"],
        ),
    ];
    table
        .iter()
        .map(|(role, spellings)| {
            (
                role.to_string(),
                spellings.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect()
}

impl EngineConfig {
    pub fn load(path: &Path) -> FacetResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: EngineConfig = serde_yaml::from_reader(reader)
            .map_err(|err| FacetError::Config(format!("parsing {path:?}: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(input: &str) -> FacetResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(input)
            .map_err(|err| FacetError::Config(format!("parsing YAML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> FacetResult<String> {
        serde_yaml::to_string(self)
            .map_err(|err| FacetError::Config(format!("serializing YAML: {err}")))
    }

    pub fn validate(&self) -> FacetResult<()> {
        if self.cache_ttl_secs == 0 {
            return Err(FacetError::Config(
                "cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.load_timeout_secs == 0 {
            return Err(FacetError::Config(
                "load_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for (name, value) in [
            ("numeric_threshold", self.coercion.numeric_threshold),
            ("date_threshold", self.coercion.date_threshold),
            ("max_coercion_loss", self.coercion.max_coercion_loss),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FacetError::Config(format!(
                    "coercion.{name} must be within 0..=1 (got {value})"
                )));
            }
        }
        if self.date_formats.is_empty() {
            return Err(FacetError::Config(
                "date_formats must list at least one pattern".to_string(),
            ));
        }
        self.artifact_regex()?;
        for (role, spellings) in &self.aliases {
            if spellings.iter().all(|s| s.trim().is_empty()) {
                return Err(FacetError::Config(format!(
                    "alias table for role '{role}' has no spellings"
                )));
            }
        }
        Ok(())
    }

    pub fn artifact_regex(&self) -> FacetResult<Regex> {
        Regex::new(&self.artifact_pattern).map_err(|err| {
            FacetError::Config(format!(
                "invalid artifact_pattern '{}': {err}",
                self.artifact_pattern
            ))
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn source(&self, name: &str) -> FacetResult<&SourceConfig> {
        self.sources.get(name).ok_or_else(|| {
            FacetError::Config(format!(
                "unknown source '{name}'; configured sources: [{}]",
                self.sources.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }
}
