use crate::error::{Error, Result};

use super::table::PointCloudTable;

/// Model input columns. The order is part of the trained model's contract.
pub const FEATURE_COLUMNS: [&str; 10] = [
    "Z",
    "R",
    "G",
    "B",
    "omnivariance_2",
    "normal_cr_2",
    "NumberOfReturns",
    "planarity_2",
    "omnivariance_1",
    "verticality_1",
];

/// Row-major numeric matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, values: Vec<f64>) -> Result<Self> {
        let width = columns.len();
        if width == 0 {
            return Err(Error::Shape("feature matrix needs at least one column".into()));
        }
        if values.len() % width != 0 {
            return Err(Error::Shape(format!(
                "{} values do not fill rows of width {width}",
                values.len()
            )));
        }
        let n_rows = values.len() / width;
        Ok(Self {
            columns,
            values,
            n_rows,
        })
    }

    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let width = columns.len();
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            return Err(Error::Shape(format!(
                "row {i} has {} values, expected {width}",
                rows[i].len()
            )));
        }
        Self::new(columns, rows.concat())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.n_cols();
        &self.values[index * width..(index + 1) * width]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.values.chunks_exact(self.n_cols())
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().skip(column).step_by(self.n_cols()).copied()
    }

    pub fn take_rows(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.n_cols());
        for &i in indices {
            values.extend_from_slice(self.row(i));
        }
        Self {
            columns: self.columns.clone(),
            values,
            n_rows: indices.len(),
        }
    }

    /// Checks that `self` has exactly the expected columns, in order.
    pub fn ensure_columns<S: AsRef<str>>(&self, expected: &[S]) -> Result<()> {
        let matches = self.columns.len() == expected.len()
            && self
                .columns
                .iter()
                .zip(expected)
                .all(|(a, b)| a == b.as_ref());
        if matches {
            Ok(())
        } else {
            Err(Error::Schema(format!(
                "feature columns {:?} do not match expected {:?}",
                self.columns,
                expected.iter().map(|s| s.as_ref()).collect::<Vec<_>>()
            )))
        }
    }
}

/// Extracts [`FEATURE_COLUMNS`] from the table, in that order.
pub fn select_features(table: &PointCloudTable) -> Result<FeatureMatrix> {
    select_columns(table, &FEATURE_COLUMNS)
}

pub fn select_columns(table: &PointCloudTable, names: &[&str]) -> Result<FeatureMatrix> {
    let missing: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| table.column(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(Error::Schema(format!(
            "missing feature column(s): {}",
            missing.join(", ")
        )));
    }

    let sources: Vec<&[f64]> = names
        .iter()
        .filter_map(|name| table.column(name))
        .collect();
    let mut values = Vec::with_capacity(table.n_rows() * names.len());
    for row in 0..table.n_rows() {
        values.extend(sources.iter().map(|column| column[row]));
    }

    FeatureMatrix::new(names.iter().map(|s| s.to_string()).collect(), values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_table(n_rows: usize) -> PointCloudTable {
        let mut columns = vec![
            ("X".to_string(), (0..n_rows).map(|i| i as f64).collect::<Vec<_>>()),
            ("Y".to_string(), vec![0.0; n_rows]),
        ];
        // reversed on purpose: selection must follow FEATURE_COLUMNS, not file order
        for (j, name) in FEATURE_COLUMNS.iter().enumerate().rev() {
            columns.push((
                name.to_string(),
                (0..n_rows).map(|i| (j * 100 + i) as f64).collect(),
            ));
        }
        PointCloudTable::from_columns(columns).unwrap()
    }

    #[test]
    fn selects_in_contract_order() {
        let m = select_features(&full_table(3)).unwrap();
        assert_eq!(m.n_rows(), 3);
        assert_eq!(m.n_cols(), 10);
        assert_eq!(m.columns()[0], "Z");
        assert_eq!(m.columns()[9], "verticality_1");
        assert_eq!(m.row(1)[0], 1.0);
        assert_eq!(m.row(1)[9], 901.0);
        m.ensure_columns(&FEATURE_COLUMNS).unwrap();
    }

    #[test]
    fn missing_column_is_schema_error() {
        let table = full_table(2);
        let kept: Vec<(String, Vec<f64>)> = table
            .column_names()
            .iter()
            .filter(|name| name.as_str() != "planarity_2")
            .map(|name| (name.clone(), table.column(name).unwrap().to_vec()))
            .collect();
        let table = PointCloudTable::from_columns(kept).unwrap();
        match select_features(&table) {
            Err(Error::Schema(message)) => assert!(message.contains("planarity_2")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn column_values_and_take_rows() {
        let m = FeatureMatrix::from_rows(
            vec!["a".into(), "b".into()],
            &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        )
        .unwrap();
        assert_eq!(m.column_values(1).collect::<Vec<_>>(), vec![2.0, 4.0, 6.0]);
        let t = m.take_rows(&[2, 0]);
        assert_eq!(t.values(), &[5.0, 6.0, 1.0, 2.0]);
        assert!(m.ensure_columns(&["b", "a"]).is_err());
    }
}
