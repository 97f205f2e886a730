use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Normalize spreadsheet exports, filter them by column, and summarize the result",
    long_about = None
)]
pub struct Cli {
    /// YAML configuration file (aliases, thresholds, named sources)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Normalize a source and report inferred column kinds and coercion losses
    Probe(ProbeArgs),
    /// Apply column filters and write the matching rows
    Filter(FilterArgs),
    /// Count distinct values per column on the filtered rows
    Frequency(FrequencyArgs),
    /// Summary statistics for numeric columns on the filtered rows
    Stats(StatsArgs),
    /// Monthly counts, moving average, and projection for a date column
    Trend(TrendArgs),
    /// List the sources defined in the configuration file
    Sources,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input file ('-' for stdin)
    #[arg(short = 'i', long = "input", conflicts_with = "source", required_unless_present = "source")]
    pub input: Option<PathBuf>,
    /// Named source from the configuration file
    #[arg(long)]
    pub source: Option<String>,
    /// Delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct FilterOptions {
    /// Filters such as `MUNICÍPIOS=Natal|Mossoró`, `index=10..20`, or
    /// `installation_date=2024-01-01..`; columns may be given by role
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Print the column descriptors as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub filter: FilterOptions,
    /// Restrict output to these columns (roles or names), in this order
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// List the filter controls derived from the data instead of filtering
    #[arg(long)]
    pub controls: bool,
    /// Output file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Delimiter for the output (defaults to ',')
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding for the output (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Omit the UTF-8 byte-order mark
    #[arg(long = "no-bom")]
    pub no_bom: bool,
    /// Render matching rows as a table instead of delimited text
    #[arg(long)]
    pub table: bool,
    /// Print the filtered rows as JSON
    #[arg(long, conflicts_with = "table")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FrequencyArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub filter: FilterOptions,
    /// Columns to count (roles or names; defaults to categorical columns)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    /// Maximum distinct values to display per column (0 = all)
    #[arg(long, default_value_t = 0)]
    pub top: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub filter: FilterOptions,
    /// Columns to profile (roles or names; defaults to numeric columns)
    #[arg(short = 'C', long = "columns", value_delimiter = ',')]
    pub columns: Vec<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TrendArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub filter: FilterOptions,
    /// Date column (role or name)
    #[arg(short = 'd', long = "date-column")]
    pub date_column: String,
    /// Months in the trailing moving average
    #[arg(long, default_value_t = 3)]
    pub window: usize,
    /// Months to project past the last observed month
    #[arg(long, default_value_t = 6)]
    pub horizon: usize,
    #[arg(long)]
    pub json: bool,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "pipe" | "|" => Ok(b'|'),
        "semicolon" | ";" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
