pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod export;
pub mod filter;
pub mod normalize;
pub mod schema;
pub mod session;
pub mod source;
pub mod summary;
pub mod table;

use std::{env, path::Path, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde::Serialize;

use crate::{
    cache::{CacheEntry, DatasetCache},
    cli::{Cli, Commands, FilterArgs, FrequencyArgs, ProbeArgs, SourceArgs, StatsArgs, TrendArgs},
    config::EngineConfig,
    data::Value,
    dataset::Dataset,
    error::FacetError,
    export::ExportOptions,
    filter::{FilterControl, parse_filter_expressions},
    normalize::{NormalizeReport, Normalizer},
    schema::{ColumnDescriptor, ColumnKind},
    session::Session,
    source::{FileSource, SourceRegistry},
    summary::{DatasetOverview, NumericSummary, SummaryView},
    table::Table,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_facets", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Sources => handle_sources(&config),
        Commands::Probe(args) => Engine::new(config)?.probe(&args),
        Commands::Filter(args) => Engine::new(config)?.filter(&args),
        Commands::Frequency(args) => Engine::new(config)?.frequency(&args),
        Commands::Stats(args) => Engine::new(config)?.stats(&args),
        Commands::Trend(args) => Engine::new(config)?.trend(&args),
    }
}

/// Process exit status for a failed run: 2 when a column could not be
/// resolved, 1 for everything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<FacetError>() {
        Some(facet) if facet.is_column_not_found() => 2,
        _ => 1,
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)
                .with_context(|| format!("Loading configuration from {path:?}"))?;
            debug!(
                "Loaded configuration with {} role(s) and {} source(s)",
                config.aliases.len(),
                config.sources.len()
            );
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn handle_sources(config: &EngineConfig) -> Result<()> {
    let registry = SourceRegistry::from_config(config)?;
    if registry.is_empty() {
        info!("No sources configured");
        return Ok(());
    }
    let mut table = Table::new(["name", "path", "delimiter", "encoding"]);
    for name in registry.names() {
        if let Some(source) = registry.get(name) {
            table.push_row(vec![
                name.to_string(),
                source.path.display().to_string(),
                printable_delimiter(source.delimiter),
                source.encoding.name().to_string(),
            ]);
        }
    }
    table.print();
    Ok(())
}

struct Engine {
    config: EngineConfig,
    cache: DatasetCache,
}

#[derive(Serialize)]
struct ProbeReport<'a> {
    overview: DatasetOverview,
    columns: &'a [ColumnDescriptor],
    report: &'a NormalizeReport,
    fingerprint: &'a str,
}

#[derive(Serialize)]
struct RowsReport<'a> {
    columns: Vec<String>,
    rows: Vec<Vec<Option<&'a Value>>>,
    matched: usize,
    total: usize,
}

impl Engine {
    fn new(config: EngineConfig) -> Result<Self> {
        let normalizer = Normalizer::new(&config).context("Preparing normalizer")?;
        let cache = DatasetCache::new(normalizer, config.load_timeout());
        Ok(Self { config, cache })
    }

    fn resolve_source(&self, args: &SourceArgs) -> Result<FileSource> {
        let mut source = match (&args.input, &args.source) {
            (Some(path), _) => {
                return Ok(FileSource::new(
                    path.clone(),
                    args.delimiter,
                    args.input_encoding.as_deref(),
                )?);
            }
            (None, Some(name)) => FileSource::from_config(self.config.source(name)?)
                .with_context(|| format!("Configuring source '{name}'"))?,
            (None, None) => bail!("Provide --input or --source"),
        };
        if let Some(delimiter) = args.delimiter {
            source.delimiter = delimiter;
        }
        if let Some(label) = args.input_encoding.as_deref() {
            source.encoding = source::resolve_encoding(Some(label))?;
        }
        Ok(source)
    }

    fn load(&self, args: &SourceArgs) -> Result<Arc<CacheEntry>> {
        let source = self.resolve_source(args)?;
        info!(
            "Loading '{}' with delimiter '{}'",
            source.path.display(),
            printable_delimiter(source.delimiter)
        );
        let key = source.key();
        let entry = self
            .cache
            .get_or_load(&key, move || source.load(), self.config.cache_ttl())?;
        Ok(entry)
    }

    fn session<'a>(&'a self, entry: &CacheEntry) -> Session<'a> {
        Session::from_entry(self.cache.normalizer().resolver(), entry)
            .with_unknown_label(self.config.unknown_label.clone())
    }

    fn apply_filter_args(&self, session: &mut Session<'_>, filters: &[String]) -> Result<()> {
        for expression in parse_filter_expressions(filters)? {
            let descriptor = session.descriptor(&expression.column)?;
            let spec =
                expression.to_spec(&descriptor.name, descriptor.kind, &self.config.date_formats)?;
            debug!("Filter {:?} on '{}'", spec.selection, spec.column);
            session.set_filter(spec);
        }
        Ok(())
    }

    /// Resolves requested columns, or falls back to every column of the given kinds.
    fn pick_columns(
        &self,
        session: &Session<'_>,
        requested: &[String],
        kinds: &[ColumnKind],
    ) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(session
                .descriptors()
                .iter()
                .filter(|d| kinds.contains(&d.kind))
                .map(|d| d.name.clone())
                .collect());
        }
        requested
            .iter()
            .map(|name| session.resolve(name.trim()).map_err(anyhow::Error::from))
            .collect()
    }

    fn probe(&self, args: &ProbeArgs) -> Result<()> {
        let entry = self.load(&args.source)?;
        if args.json {
            let report = ProbeReport {
                overview: summary::overview(&entry.dataset),
                columns: &entry.descriptors,
                report: &entry.report,
                fingerprint: &entry.fingerprint,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        let mut table = Table::new(["column", "kind", "role", "non_empty", "coerced", "lost", "placeholders"])
            .right_align(&[3, 4, 5, 6]);
        table.extend_rows(entry.descriptors.iter().map(|d| {
            vec![
                d.name.clone(),
                d.kind.to_string(),
                d.role.clone().unwrap_or_default(),
                d.coercion.non_empty.to_string(),
                d.coercion.coerced.to_string(),
                d.coercion.lost.to_string(),
                d.coercion.placeholders.to_string(),
            ]
        }));
        table.print();
        if !entry.report.dropped_columns.is_empty() {
            info!(
                "Dropped artifact column(s): {}",
                entry.report.dropped_columns.join(", ")
            );
        }
        info!(
            "Probed {} row(s) across {} column(s)",
            entry.dataset.row_count(),
            entry.dataset.column_count()
        );
        Ok(())
    }

    fn filter(&self, args: &FilterArgs) -> Result<()> {
        let entry = self.load(&args.source)?;
        let mut session = self.session(&entry);
        if args.controls {
            let controls = session.controls()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&controls)?);
            } else {
                print_controls(&controls, &self.config.unknown_label);
            }
            return Ok(());
        }
        self.apply_filter_args(&mut session, &args.filter.filters)?;
        let outcome = session.filtered()?;
        info!("Filtered {} of {} row(s)", outcome.matched, outcome.total);
        let dataset = if args.columns.is_empty() {
            outcome.dataset
        } else {
            let columns = self.pick_columns(&session, &args.columns, &[])?;
            outcome.dataset.select_columns(&columns)?
        };

        if args.json {
            let report = RowsReport {
                columns: dataset.column_names(),
                rows: (0..dataset.row_count())
                    .filter_map(|idx| dataset.row(idx))
                    .collect(),
                matched: outcome.matched,
                total: outcome.total,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else if args.table {
            dataset_table(&dataset).print();
        } else {
            let options = ExportOptions {
                delimiter: args.output_delimiter.unwrap_or(b','),
                encoding: source::resolve_encoding(args.output_encoding.as_deref())?,
                bom: !args.no_bom,
            };
            export::write_delimited(&dataset, args.output.as_deref(), &options)?;
        }
        Ok(())
    }

    fn frequency(&self, args: &FrequencyArgs) -> Result<()> {
        let entry = self.load(&args.source)?;
        let mut session = self.session(&entry);
        self.apply_filter_args(&mut session, &args.filter.filters)?;
        let columns = self.pick_columns(
            &session,
            &args.columns,
            &[ColumnKind::Categorical, ColumnKind::Identifier],
        )?;
        if columns.is_empty() {
            bail!("No categorical columns available. Supply --columns to continue.");
        }
        let outcome = session.filtered()?;
        let views = columns
            .iter()
            .map(|column| {
                summary::value_counts(&outcome.dataset, column, &self.config.unknown_label)
                    .map(|view| view.top(args.top))
            })
            .collect::<Result<Vec<SummaryView>, _>>()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            let mut table = Table::new(["column", "value", "count", "percent"]).right_align(&[2, 3]);
            for view in &views {
                table.extend_rows(view.render_rows());
            }
            table.print();
        }
        info!("Computed frequency counts for {} column(s)", views.len());
        Ok(())
    }

    fn stats(&self, args: &StatsArgs) -> Result<()> {
        let entry = self.load(&args.source)?;
        let mut session = self.session(&entry);
        self.apply_filter_args(&mut session, &args.filter.filters)?;
        let columns = self.pick_columns(&session, &args.columns, &[ColumnKind::Numeric])?;
        if columns.is_empty() {
            bail!("No numeric columns available. Supply --columns to continue.");
        }
        let outcome = session.filtered()?;
        let summaries = columns
            .iter()
            .map(|column| summary::numeric_summary(&outcome.dataset, column))
            .collect::<Result<Vec<NumericSummary>, _>>()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        } else {
            let mut table = Table::new([
                "column", "count", "min", "max", "mean", "median", "std_dev",
            ])
            .right_align(&[1, 2, 3, 4, 5, 6]);
            table.extend_rows(summaries.iter().map(NumericSummary::render_row));
            table.print();
        }
        info!("Computed summary statistics for {} column(s)", summaries.len());
        Ok(())
    }

    fn trend(&self, args: &TrendArgs) -> Result<()> {
        let entry = self.load(&args.source)?;
        let mut session = self.session(&entry);
        self.apply_filter_args(&mut session, &args.filter.filters)?;
        let trend = session.monthly_trend(&args.date_column, args.window, args.horizon)?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&trend)?);
            return Ok(());
        }
        let mut table =
            Table::new(["month", "count", "moving_avg", "series"]).right_align(&[1, 2]);
        for point in &trend.points {
            table.push_row(vec![
                point.month.clone(),
                point.count.to_string(),
                point
                    .moving_average
                    .map(|avg| format!("{avg:.2}"))
                    .unwrap_or_default(),
                "observed".to_string(),
            ]);
        }
        for point in &trend.projection {
            table.push_row(vec![
                point.month.clone(),
                point.count.to_string(),
                String::new(),
                "projected".to_string(),
            ]);
        }
        table.print();
        info!(
            "Trend for '{}' over {} month(s)",
            trend.column,
            trend.points.len()
        );
        Ok(())
    }
}

fn print_controls(controls: &[FilterControl], unknown_label: &str) {
    let mut table = Table::new(["column", "control", "options"]);
    for control in controls {
        let (kind, options) = match control {
            FilterControl::Choice { kind, options, .. } => (
                format!("choice ({kind})"),
                options
                    .iter()
                    .map(|o| o.label(unknown_label).to_string())
                    .collect::<Vec<_>>()
                    .join(" | "),
            ),
            FilterControl::Range {
                min,
                max,
                has_unknown,
                ..
            } => (
                "range".to_string(),
                format!(
                    "{}..{}{}",
                    data::format_number(*min),
                    data::format_number(*max),
                    if *has_unknown { " (+unknown)" } else { "" }
                ),
            ),
        };
        table.push_row(vec![control.column().to_string(), kind, options]);
    }
    table.print();
}

fn dataset_table(dataset: &Dataset) -> Table {
    let numeric = dataset
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == ColumnKind::Numeric)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    let mut table = Table::new(dataset.column_names()).right_align(&numeric);
    for idx in 0..dataset.row_count() {
        if let Some(row) = dataset.row(idx) {
            table.push_row(
                row.into_iter()
                    .map(|cell| cell.map(Value::as_display).unwrap_or_default())
                    .collect(),
            );
        }
    }
    table
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
