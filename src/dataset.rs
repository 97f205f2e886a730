use serde::Serialize;

use crate::{
    data::Value,
    error::{FacetError, FacetResult},
    schema::ColumnKind,
};

/// Header strings and string cells as a loader hands them over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Builds a table, padding short rows with empty cells and truncating
    /// long ones so every column ends up with the same length.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { headers, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(index).map(String::as_str).unwrap_or(""))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    pub values: Vec<Option<Value>>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind, values: Vec<Option<Value>>) -> Self {
        Self {
            name: name.into(),
            kind,
            values,
        }
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// Typed, column-oriented table. Filtering and projection build new datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    columns: Vec<Column>,
    row_count: usize,
}

impl Dataset {
    pub fn new(columns: Vec<Column>) -> FacetResult<Self> {
        let row_count = columns.first().map(|c| c.values.len()).unwrap_or(0);
        for column in &columns {
            if column.values.len() != row_count {
                return Err(FacetError::Config(format!(
                    "column '{}' has {} row(s) but dataset has {}",
                    column.name,
                    column.values.len(),
                    row_count
                )));
            }
        }
        for (idx, column) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|other| other.name == column.name) {
                return Err(FacetError::Config(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, row_count })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Like [`Dataset::column`] but reports the missing name together with
    /// every available column.
    pub fn require_column(&self, name: &str) -> FacetResult<&Column> {
        self.column(name).ok_or_else(|| FacetError::ColumnNotFound {
            role: name.to_string(),
            available: self.column_names(),
            suggestion: None,
        })
    }

    pub fn row(&self, index: usize) -> Option<Vec<Option<&Value>>> {
        (index < self.row_count).then(|| {
            self.columns
                .iter()
                .map(|c| c.values[index].as_ref())
                .collect()
        })
    }

    /// New dataset holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Dataset {
        let columns = self
            .columns
            .iter()
            .map(|column| Column {
                name: column.name.clone(),
                kind: column.kind,
                values: indices
                    .iter()
                    .filter_map(|&idx| column.values.get(idx).cloned())
                    .collect(),
            })
            .collect();
        Dataset {
            columns,
            row_count: indices.iter().filter(|&&idx| idx < self.row_count).count(),
        }
    }

    /// New dataset with only the named columns, in the requested order.
    pub fn select_columns(&self, names: &[String]) -> FacetResult<Dataset> {
        let columns = names
            .iter()
            .map(|name| self.require_column(name).cloned())
            .collect::<FacetResult<Vec<_>>>()?;
        Dataset::new(columns)
    }
}
