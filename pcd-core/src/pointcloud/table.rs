use crate::{
    classes::ClassLabel,
    error::{Error, Result},
};

pub const X_COLUMN: &str = "X";
pub const Y_COLUMN: &str = "Y";
pub const Z_COLUMN: &str = "Z";
pub const CLASSIFICATION_COLUMN: &str = "Classification";

/// Named numeric columns sharing one row count.
///
/// Row order is the order of the source file (after incomplete rows were
/// dropped) and every operation here keeps it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudTable {
    columns: Vec<String>,
    // column-major: data[column][row]
    data: Vec<Vec<f64>>,
    n_rows: usize,
}

impl PointCloudTable {
    pub fn new(columns: Vec<String>) -> Self {
        let data = vec![Vec::new(); columns.len()];
        Self {
            columns,
            data,
            n_rows: 0,
        }
    }

    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != n_rows) {
            return Err(Error::Shape(format!(
                "column '{name}' has {} rows, expected {n_rows}",
                values.len()
            )));
        }
        let (columns, data) = columns.into_iter().unzip();
        Ok(Self {
            columns,
            data,
            n_rows,
        })
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Shape(format!(
                "row has {} values, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (column, &value) in self.data.iter_mut().zip(row) {
            column.push(value);
        }
        self.n_rows += 1;
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.column_index(name).map(|i| self.data[i].as_slice())
    }

    pub fn require_column(&self, name: &str) -> Result<&[f64]> {
        self.column(name)
            .ok_or_else(|| Error::Schema(format!("required column '{name}' is missing")))
    }

    pub fn row(&self, index: usize) -> Vec<f64> {
        self.data.iter().map(|column| column[index]).collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<f64>> + '_ {
        (0..self.n_rows).map(|i| self.row(i))
    }

    /// Replaces the column if it exists, otherwise appends it.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        if values.len() != self.n_rows && !(self.columns.is_empty() && self.n_rows == 0) {
            return Err(Error::Shape(format!(
                "column '{name}' has {} rows, table has {}",
                values.len(),
                self.n_rows
            )));
        }
        if self.columns.is_empty() {
            self.n_rows = values.len();
        }
        match self.column_index(name) {
            Some(i) => self.data[i] = values,
            None => {
                self.columns.push(name.to_string());
                self.data.push(values);
            }
        }
        Ok(())
    }

    pub fn set_labels(&mut self, name: &str, labels: &[ClassLabel]) -> Result<()> {
        self.set_column(name, labels.iter().map(|l| l.as_f64()).collect())
    }

    pub fn labels(&self, name: &str) -> Result<Vec<ClassLabel>> {
        self.require_column(name)?
            .iter()
            .map(|&v| ClassLabel::from_value(v))
            .collect()
    }

    /// New table holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Self {
        let data = self
            .data
            .iter()
            .map(|column| indices.iter().map(|&i| column[i]).collect())
            .collect();
        Self {
            columns: self.columns.clone(),
            data,
            n_rows: indices.len(),
        }
    }

    /// Appends the rows of `other`, matching columns by name. `other` may carry
    /// extra columns; a column of `self` missing from `other` is an error.
    pub fn append(&mut self, other: &PointCloudTable) -> Result<()> {
        let mut sources = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let values = other.column(name).ok_or_else(|| {
                Error::Schema(format!("cannot concatenate: column '{name}' is missing"))
            })?;
            sources.push(values);
        }
        for (column, values) in self.data.iter_mut().zip(sources) {
            column.extend_from_slice(values);
        }
        self.n_rows += other.n_rows;
        Ok(())
    }
}
