use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::{
    cache::CacheEntry,
    config::DEFAULT_UNKNOWN_LABEL,
    dataset::Dataset,
    error::{FacetError, FacetResult},
    filter::{self, FilterControl, FilterSpec, Selection},
    schema::{BoundSchema, ColumnDescriptor, SchemaResolver},
    summary::{self, DatasetOverview, NumericSummary, SummaryView, TrendView},
};

/// A filtered dataset together with how many rows survived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOutcome {
    pub dataset: Dataset,
    pub matched: usize,
    pub total: usize,
}

impl FilterOutcome {
    pub fn is_empty(&self) -> bool {
        self.matched == 0
    }
}

/// Active filters and memoized role lookups over one shared dataset.
pub struct Session<'r> {
    dataset: Arc<Dataset>,
    descriptors: Arc<Vec<ColumnDescriptor>>,
    schema: BoundSchema<'r>,
    filters: Vec<FilterSpec>,
    unknown_label: String,
}

impl<'r> Session<'r> {
    pub fn new(
        resolver: &'r SchemaResolver,
        dataset: Arc<Dataset>,
        descriptors: Arc<Vec<ColumnDescriptor>>,
    ) -> Self {
        let schema = BoundSchema::new(resolver, dataset.column_names());
        Self {
            dataset,
            descriptors,
            schema,
            filters: Vec::new(),
            unknown_label: DEFAULT_UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn from_entry(resolver: &'r SchemaResolver, entry: &CacheEntry) -> Self {
        Self::new(
            resolver,
            Arc::clone(&entry.dataset),
            Arc::clone(&entry.descriptors),
        )
    }

    pub fn with_unknown_label(mut self, label: impl Into<String>) -> Self {
        self.unknown_label = label.into();
        self
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.descriptors
    }

    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    /// Actual column name for a logical role or raw column name.
    pub fn resolve(&self, logical: &str) -> FacetResult<String> {
        self.schema.resolve(logical)
    }

    pub fn descriptor(&self, logical: &str) -> FacetResult<&ColumnDescriptor> {
        let column = self.resolve(logical)?;
        self.descriptors
            .iter()
            .find(|d| d.name == column)
            .ok_or_else(|| FacetError::ColumnNotFound {
                role: logical.to_string(),
                available: self.descriptors.iter().map(|d| d.name.clone()).collect(),
                suggestion: None,
            })
    }

    pub fn controls(&self) -> FacetResult<Vec<FilterControl>> {
        filter::build_filter_controls(&self.dataset, &self.descriptors)
    }

    /// Installs `spec`, replacing any filter already set on the same column.
    pub fn set_filter(&mut self, spec: FilterSpec) {
        debug!("Setting filter on '{}'", spec.column);
        match self.filters.iter_mut().find(|f| f.column == spec.column) {
            Some(existing) => *existing = spec,
            None => self.filters.push(spec),
        }
    }

    /// Resolves `logical` and filters its column with `selection`.
    pub fn select(&mut self, logical: &str, selection: Selection) -> FacetResult<()> {
        let descriptor = self.descriptor(logical)?;
        let spec = FilterSpec::new(descriptor.name.clone(), descriptor.kind, selection);
        self.set_filter(spec);
        Ok(())
    }

    pub fn remove_filter(&mut self, logical: &str) -> FacetResult<Option<FilterSpec>> {
        let column = self.resolve(logical)?;
        let position = self.filters.iter().position(|f| f.column == column);
        Ok(position.map(|idx| self.filters.remove(idx)))
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn filtered(&self) -> FacetResult<FilterOutcome> {
        let dataset = filter::apply(&self.dataset, &self.filters)?;
        let outcome = FilterOutcome {
            matched: dataset.row_count(),
            total: self.dataset.row_count(),
            dataset,
        };
        if outcome.is_empty() && outcome.total > 0 {
            info!("Active filters matched no rows");
        }
        Ok(outcome)
    }

    pub fn value_counts(&self, logical: &str) -> FacetResult<SummaryView> {
        let column = self.resolve(logical)?;
        summary::value_counts(&self.filtered()?.dataset, &column, &self.unknown_label)
    }

    pub fn numeric_summary(&self, logical: &str) -> FacetResult<NumericSummary> {
        let column = self.resolve(logical)?;
        summary::numeric_summary(&self.filtered()?.dataset, &column)
    }

    pub fn monthly_trend(&self, logical: &str, window: usize, horizon: usize) -> FacetResult<TrendView> {
        let column = self.resolve(logical)?;
        summary::monthly_trend(&self.filtered()?.dataset, &column, window, horizon)
    }

    pub fn overview(&self) -> FacetResult<DatasetOverview> {
        Ok(summary::overview(&self.filtered()?.dataset))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{config::EngineConfig, dataset::RawTable, normalize::Normalizer};

    fn raw() -> RawTable {
        RawTable::new(
            vec![
                "Unnamed: 0".into(),
                " MUNICÍPIOS ".into(),
                "STATUS GERAL RECEBIMENTO".into(),
                "index".into(),
            ],
            vec![
                vec!["0".into(), "Natal".into(), "Received".into(), "10".into()],
                vec!["1".into(), "Mossoró".into(), "Pending".into(), "20".into()],
                vec!["2".into(), "Natal".into(), "Received".into(), "N/A".into()],
                vec!["3".into(), "Caicó".into(), "".into(), "30".into()],
            ],
        )
    }

    fn open<'r>(resolver: &'r SchemaResolver, normalizer: &Normalizer) -> Session<'r> {
        let normalized = normalizer.normalize(&raw()).unwrap();
        Session::new(
            resolver,
            Arc::new(normalized.dataset),
            Arc::new(normalized.descriptors),
        )
    }

    #[test]
    fn selects_by_role_and_reports_outcome() {
        let normalizer = Normalizer::new(&EngineConfig::default()).unwrap();
        let resolver = normalizer.resolver().clone();
        let mut session = open(&resolver, &normalizer);
        assert_eq!(session.resolve("municipality").unwrap(), "MUNICÍPIOS");

        session
            .select("municipality", Selection::values(["Natal"]))
            .unwrap();
        let outcome = session.filtered().unwrap();
        assert_eq!((outcome.matched, outcome.total), (2, 4));

        let counts = session.value_counts("status").unwrap();
        assert_eq!(counts.count("Received"), Some(2));

        session
            .select("municipality", Selection::values(["Caicó"]))
            .unwrap();
        assert_eq!(session.filters().len(), 1);
        assert_eq!(session.value_counts("status").unwrap().count("unknown"), Some(1));
    }

    #[test]
    fn numeric_summary_follows_filters() {
        let normalizer = Normalizer::new(&EngineConfig::default()).unwrap();
        let resolver = normalizer.resolver().clone();
        let mut session = open(&resolver, &normalizer);
        let all = session.numeric_summary("index").unwrap();
        assert_eq!((all.count, all.mean), (3, Some(20.0)));

        session.select("municipality", Selection::values(["Natal"])).unwrap();
        let natal = session.numeric_summary("index").unwrap();
        assert_eq!((natal.count, natal.rows), (1, 2));

        let removed = session.remove_filter("MUNICÍPIOS").unwrap();
        assert!(removed.is_some());
        assert!(session.remove_filter("municipality").unwrap().is_none());
        assert_eq!(session.overview().unwrap().rows, 4);

        session
            .select(
                "index",
                Selection::Range {
                    min: Some(15.0),
                    max: None,
                    include_unknown: false,
                },
            )
            .unwrap();
        session.clear();
        assert!(session.filters().is_empty());
    }

    #[test]
    fn empty_selection_is_not_an_error() {
        let normalizer = Normalizer::new(&EngineConfig::default()).unwrap();
        let resolver = normalizer.resolver().clone();
        let mut session = open(&resolver, &normalizer);
        session
            .select("municipality", Selection::Values(Default::default()))
            .unwrap();
        let outcome = session.filtered().unwrap();
        assert!(outcome.is_empty());
        assert_eq!(outcome.total, 4);
    }

    #[test]
    fn unknown_role_is_reported_once_at_the_boundary() {
        let normalizer = Normalizer::new(&EngineConfig::default()).unwrap();
        let resolver = SchemaResolver::new(BTreeMap::new());
        let mut session = open(&resolver, &normalizer);
        let err = session
            .select("hospital", Selection::values(["x"]))
            .unwrap_err();
        assert!(err.is_column_not_found());
        assert!(err.to_string().contains("'MUNICÍPIOS'"));
        assert!(session.filters().is_empty());
    }
}
