use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::info;

use crate::{
    dataset::Dataset,
    error::{FacetError, FacetResult},
    source::is_dash,
};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    /// Only meaningful for UTF-8.
    pub bom: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            encoding: UTF_8,
            bom: true,
        }
    }
}

pub fn to_delimited_bytes(dataset: &Dataset, options: &ExportOptions) -> FacetResult<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(Vec::new());
    writer.write_record(dataset.columns().iter().map(|c| c.name.as_str()))?;
    for row in 0..dataset.row_count() {
        writer.write_record(dataset.columns().iter().map(|column| {
            column.values[row]
                .as_ref()
                .map(|value| value.as_display())
                .unwrap_or_default()
        }))?;
    }
    let utf8 = writer
        .into_inner()
        .map_err(|err| FacetError::Io(err.into_error()))?;

    if options.encoding == UTF_8 {
        if !options.bom {
            return Ok(utf8);
        }
        let mut out = Vec::with_capacity(UTF8_BOM.len() + utf8.len());
        out.extend_from_slice(UTF8_BOM);
        out.extend_from_slice(&utf8);
        return Ok(out);
    }
    let text = String::from_utf8(utf8)
        .map_err(|err| FacetError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))?;
    let (encoded, _, had_errors) = options.encoding.encode(&text);
    if had_errors {
        return Err(FacetError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Dataset contains characters not representable in {}",
                options.encoding.name()
            ),
        )));
    }
    Ok(encoded.into_owned())
}

/// Writes the export to `path`, or stdout when `path` is `None` or `-`.
pub fn write_delimited(dataset: &Dataset, path: Option<&Path>, options: &ExportOptions) -> Result<()> {
    let bytes = to_delimited_bytes(dataset, options)?;
    let mut out: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout().lock()),
    };
    out.write_all(&bytes).context("Writing export")?;
    out.flush().context("Flushing export")?;
    if let Some(p) = path.filter(|p| !is_dash(p)) {
        info!(
            "Exported {} row(s) x {} column(s) to {p:?}",
            dataset.row_count(),
            dataset.column_count()
        );
    }
    Ok(())
}
