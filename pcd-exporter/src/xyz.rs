use std::{fs, path::Path};

use csv::WriterBuilder;

use pcd_core::{
    classes::ClassLabel,
    pointcloud::table::{PointCloudTable, CLASSIFICATION_COLUMN},
    Error, Result,
};

/// Writes the table as space-delimited text with a header row, the format the
/// reader accepts. Values use the shortest representation that reads back to
/// the same `f64`.
pub fn write_point_cloud(table: &PointCloudTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut writer = WriterBuilder::new()
        .delimiter(b' ')
        .from_path(path)
        .map_err(|e| Error::io(path, e.into()))?;

    writer
        .write_record(table.column_names())
        .map_err(|e| Error::io(path, e.into()))?;
    let mut record = Vec::with_capacity(table.n_columns());
    for row in table.rows() {
        record.clear();
        record.extend(row.iter().map(f64::to_string));
        writer
            .write_record(&record)
            .map_err(|e| Error::io(path, e.into()))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;

    log::debug!("wrote {} rows to {}", table.n_rows(), path.display());
    Ok(())
}

/// Copy of `table` with the predictions in the `Classification` column,
/// replacing any existing one.
pub fn classified_cloud(table: &PointCloudTable, labels: &[ClassLabel]) -> Result<PointCloudTable> {
    let mut classified = table.clone();
    classified.set_labels(CLASSIFICATION_COLUMN, labels)?;
    Ok(classified)
}

pub fn write_classified_cloud(
    table: &PointCloudTable,
    labels: &[ClassLabel],
    path: &Path,
) -> Result<()> {
    write_point_cloud(&classified_cloud(table, labels)?, path)
}

#[cfg(test)]
mod tests {
    use pcd_parser::parsers::xyz::read_point_cloud;

    use super::*;

    fn sample_table() -> PointCloudTable {
        PointCloudTable::from_columns(vec![
            ("X".into(), vec![512_345.125, 512_346.5, -0.1]),
            ("Y".into(), vec![7_456_123.75, 7_456_124.0, 1e-7]),
            ("Z".into(), vec![12.3, 14.001, 0.0]),
            ("R".into(), vec![10.0, 255.0, 0.0]),
        ])
        .unwrap()
    }

    #[test]
    fn classified_cloud_round_trips() {
        let table = sample_table();
        let labels = [ClassLabel(1), ClassLabel(3), ClassLabel(2)];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("cloud_classified.xyz");

        write_classified_cloud(&table, &labels, &path).unwrap();
        let read = read_point_cloud(&path).unwrap();

        assert_eq!(read.column_names(), &["X", "Y", "Z", "R", "Classification"]);
        assert_eq!(read.n_rows(), 3);
        for name in ["X", "Y", "Z", "R"] {
            assert_eq!(read.column(name), table.column(name));
        }
        assert_eq!(read.labels(CLASSIFICATION_COLUMN).unwrap(), labels);
    }

    #[test]
    fn existing_classification_is_replaced() {
        let mut table = sample_table();
        table
            .set_labels(CLASSIFICATION_COLUMN, &[ClassLabel(9); 3])
            .unwrap();
        let classified = classified_cloud(&table, &[ClassLabel(2); 3]).unwrap();
        assert_eq!(classified.n_columns(), table.n_columns());
        assert_eq!(
            classified.labels(CLASSIFICATION_COLUMN).unwrap(),
            vec![ClassLabel(2); 3]
        );
    }

    #[test]
    fn label_count_must_match_rows() {
        let result = classified_cloud(&sample_table(), &[ClassLabel(1)]);
        assert!(matches!(result, Err(Error::Shape(_))));
    }

    #[test]
    fn labels_are_written_as_integers() {
        let table = PointCloudTable::from_columns(vec![("X".into(), vec![1.5])]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.xyz");
        write_classified_cloud(&table, &[ClassLabel(3)], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "X Classification\n1.5 3\n");
    }
}
