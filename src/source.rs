use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::debug;

use crate::{
    config::{EngineConfig, SourceConfig},
    dataset::RawTable,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn delimiter_from_char(value: char) -> Result<u8> {
    if value.is_ascii() {
        Ok(value as u8)
    } else {
        Err(anyhow!("Delimiter '{value}' must be ASCII"))
    }
}

/// Reads a whole delimited document. The first record is the header row.
pub fn read_delimited<R: Read>(
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<RawTable> {
    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .bom_override(true)
        .build(reader);
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(decoded);
    let headers = csv_reader
        .headers()
        .context("Reading header row")?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", row_idx + 2))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    debug!(
        "Read {} row(s) across {} header(s)",
        rows.len(),
        headers.len()
    );
    Ok(RawTable::new(headers, rows))
}

pub fn read_delimited_path(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<RawTable> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    read_delimited(reader, delimiter, encoding).with_context(|| format!("Reading {path:?}"))
}

/// A file-backed source with resolved delimiter and encoding.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl FileSource {
    pub fn new(path: PathBuf, delimiter: Option<u8>, encoding: Option<&str>) -> Result<Self> {
        let delimiter = resolve_input_delimiter(&path, delimiter);
        let encoding = resolve_encoding(encoding)?;
        Ok(Self {
            path,
            delimiter,
            encoding,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let delimiter = config.delimiter.map(delimiter_from_char).transpose()?;
        Self::new(config.path.clone(), delimiter, config.encoding.as_deref())
    }

    pub fn load(&self) -> Result<RawTable> {
        read_delimited_path(&self.path, self.delimiter, self.encoding)
    }

    /// Cache key: the canonical path when it exists, the literal path otherwise.
    pub fn key(&self) -> String {
        self.path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone())
            .display()
            .to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<(String, FileSource)>,
}

impl SourceRegistry {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let sources = config
            .sources
            .iter()
            .map(|(name, source)| {
                FileSource::from_config(source)
                    .with_context(|| format!("Configuring source '{name}'"))
                    .map(|file| (name.clone(), file))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sources })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&FileSource> {
        self.sources
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, source)| source)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
