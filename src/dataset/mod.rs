//! In-memory tabular datasets
//!
//! A [`Dataset`] is an ordered collection of named, typed columns that all hold
//! the same number of rows. Every mutation re-validates that shape, so the
//! normalizer and loader can rely on it without checking again.
//!
//! Raw sources are read through [`reader`], which is the only place where the
//! crate touches the files produced by the acquisition layer.

pub mod reader;
mod value;

use std::path::PathBuf;

pub use reader::{SourceFile, SourceFormat, parse_csv, parse_json, read_source};
pub use value::{ScalarType, Value};

/// Error type for dataset construction and reading
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// A column does not have the dataset's row count
    #[error("Column '{column}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// Two columns share a name
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    /// A named column is absent
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// A cell does not match its column's declared type
    #[error("Column '{column}' is declared {expected} but row {row} holds {found}")]
    TypeMismatch {
        column: String,
        row: usize,
        expected: ScalarType,
        found: ScalarType,
    },

    /// The source file does not exist
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    /// The source file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for dataset operations
pub type DatasetResult<T> = Result<T, DatasetError>;

/// A named, typed column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data_type: ScalarType,
    values: Vec<Value>,
}

impl Column {
    /// Create a column with a declared type, validating every cell against it
    pub fn new(
        name: impl Into<String>,
        data_type: ScalarType,
        values: Vec<Value>,
    ) -> DatasetResult<Self> {
        let name = name.into();
        for (row, value) in values.iter().enumerate() {
            if let Some(found) = value.scalar_type()
                && found != data_type
            {
                return Err(DatasetError::TypeMismatch {
                    column: name,
                    row,
                    expected: data_type,
                    found,
                });
            }
        }
        Ok(Self {
            name,
            data_type,
            values,
        })
    }

    /// Create a column whose type is inferred from its values
    ///
    /// Integer and float cells unify to float. Any other mix of kinds falls
    /// back to text, rendering each cell with its textual form. A column with
    /// no non-null cells is typed as text.
    pub fn infer(name: impl Into<String>, values: Vec<Value>) -> Self {
        let mut inferred: Option<ScalarType> = None;
        let mut mixed = false;
        for t in values.iter().filter_map(Value::scalar_type) {
            inferred = match inferred {
                None => Some(t),
                Some(current) => match current.unify(t) {
                    Some(u) => Some(u),
                    None => {
                        mixed = true;
                        break;
                    }
                },
            };
        }

        let data_type = if mixed {
            ScalarType::Text
        } else {
            inferred.unwrap_or(ScalarType::Text)
        };

        let values = values
            .into_iter()
            .map(|v| v.cast_to(data_type).unwrap_or(Value::Null))
            .collect();

        Self {
            name: name.into(),
            data_type,
            values,
        }
    }

    /// Create a column holding `len` copies of `value`
    pub fn filled(name: impl Into<String>, value: Value, len: usize) -> Self {
        let data_type = value.scalar_type().unwrap_or(ScalarType::Text);
        Self {
            name: name.into(),
            data_type,
            values: vec![value; len],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> ScalarType {
        self.data_type
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, row: usize) -> Option<&Value> {
        self.values.get(row)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Same values under a different name
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// An ordered collection of equally long, uniquely named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from columns, validating names and lengths
    pub fn from_columns(columns: Vec<Column>) -> DatasetResult<Self> {
        let mut dataset = Self::new();
        for column in columns {
            dataset.push_column(column)?;
        }
        Ok(dataset)
    }

    /// Append a column at the end
    pub fn push_column(&mut self, column: Column) -> DatasetResult<()> {
        if self.has_column(column.name()) {
            return Err(DatasetError::DuplicateColumn(column.name));
        }
        if let Some(first) = self.columns.first()
            && first.len() != column.len()
        {
            return Err(DatasetError::LengthMismatch {
                column: column.name,
                expected: first.len(),
                actual: column.values.len(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Replace the column with the same name, keeping its position
    pub fn replace_column(&mut self, column: Column) -> DatasetResult<()> {
        let row_count = self.row_count();
        let idx = self
            .position(column.name())
            .ok_or_else(|| DatasetError::ColumnNotFound(column.name.clone()))?;
        if column.len() != row_count {
            return Err(DatasetError::LengthMismatch {
                column: column.name,
                expected: row_count,
                actual: column.values.len(),
            });
        }
        self.columns[idx] = column;
        Ok(())
    }

    /// Remove and return a column
    pub fn remove_column(&mut self, name: &str) -> DatasetResult<Column> {
        let idx = self
            .position(name)
            .ok_or_else(|| DatasetError::ColumnNotFound(name.to_string()))?;
        Ok(self.columns.remove(idx))
    }

    /// Rename a column in place
    pub fn rename_column(&mut self, from: &str, to: &str) -> DatasetResult<()> {
        if from == to {
            return if self.has_column(from) {
                Ok(())
            } else {
                Err(DatasetError::ColumnNotFound(from.to_string()))
            };
        }
        if self.has_column(to) {
            return Err(DatasetError::DuplicateColumn(to.to_string()));
        }
        let idx = self
            .position(from)
            .ok_or_else(|| DatasetError::ColumnNotFound(from.to_string()))?;
        self.columns[idx].name = to.to_string();
        Ok(())
    }

    /// New dataset holding the named columns in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> DatasetResult<Dataset> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let column = self
                .column(name.as_ref())
                .ok_or_else(|| DatasetError::ColumnNotFound(name.as_ref().to_string()))?;
            columns.push(column.clone());
        }
        Dataset::from_columns(columns)
    }

    /// Keep only the rows whose flag is set
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in &mut self.columns {
            let mut flags = keep.iter();
            column
                .values
                .retain(|_| flags.next().copied().unwrap_or(false));
        }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Column::len).unwrap_or(0)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// A dataset with no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cells of one row, in column order
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        if index >= self.row_count() {
            return None;
        }
        Some(self.columns.iter().map(|c| &c.values[index]).collect())
    }

    /// Iterate over rows, in column order
    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count()).map(move |i| self.columns.iter().map(|c| &c.values[i]).collect())
    }

    /// Names of columns whose type cannot be written to the warehouse
    pub fn unloadable_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.data_type.is_loadable())
            .map(Column::name)
            .collect()
    }
}
