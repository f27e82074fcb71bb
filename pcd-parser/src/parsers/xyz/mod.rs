use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use rayon::iter::{IntoParallelRefIterator as _, ParallelIterator as _};

use pcd_core::{pointcloud::table::PointCloudTable, Error, Result};

use super::{extension_of, Parser, ParserProvider};

pub struct XyzParserProvider {
    pub filenames: Vec<PathBuf>,
    pub delimiter: u8,
}

impl XyzParserProvider {
    /// Provider for a single file, delimiter chosen from its extension.
    pub fn for_path(path: &Path) -> Result<Self> {
        Ok(Self {
            filenames: vec![path.to_path_buf()],
            delimiter: extension_of(path)?.delimiter(),
        })
    }
}

impl ParserProvider for XyzParserProvider {
    fn get_parser(&self) -> Box<dyn Parser> {
        Box::new(XyzParser {
            filenames: self.filenames.clone(),
            delimiter: self.delimiter,
        })
    }
}

/// Delimited text with a header row, one point per line.
///
/// Rows with an empty or non-numeric cell in any column are dropped whole.
/// Several files are concatenated in order and must share the same header.
pub struct XyzParser {
    pub filenames: Vec<PathBuf>,
    pub delimiter: u8,
}

impl Parser for XyzParser {
    fn parse(&self) -> Result<PointCloudTable> {
        let mut filenames = self.filenames.iter();
        let first = filenames
            .next()
            .ok_or_else(|| Error::parse(None, "no input file given"))?;

        let mut table = read_table(first, self.delimiter)?;
        for path in filenames {
            let next = read_table(path, self.delimiter)?;
            if next.column_names() != table.column_names() {
                return Err(Error::Schema(format!(
                    "{} has columns {:?}, expected {:?}",
                    path.display(),
                    next.column_names(),
                    table.column_names()
                )));
            }
            table.append(&next)?;
        }
        Ok(table)
    }
}

/// Reads one file, picking the delimiter from its extension.
pub fn read_point_cloud(path: &Path) -> Result<PointCloudTable> {
    XyzParserProvider::for_path(path)?.get_parser().parse()
}

fn map_csv_error(path: &Path, err: csv::Error) -> Error {
    let line = err.position().map(|p| p.line());
    match err.into_kind() {
        csv::ErrorKind::Io(e) => Error::io(path, e),
        kind => Error::parse(line, format!("{}: {:?}", path.display(), kind)),
    }
}

fn parse_header(path: &Path, headers: &StringRecord) -> Result<Vec<String>> {
    let mut columns: Vec<String> = headers.iter().map(str::to_string).collect();
    while columns.last().is_some_and(|c| c.is_empty()) {
        columns.pop();
    }

    if columns.is_empty() {
        return Err(Error::parse(
            Some(1),
            format!("{}: header row is missing", path.display()),
        ));
    }
    if let Some(blank) = columns.iter().position(|c| c.is_empty()) {
        return Err(Error::parse(
            Some(1),
            format!("{}: header field {} is empty", path.display(), blank + 1),
        ));
    }
    for (i, name) in columns.iter().enumerate() {
        if columns[..i].contains(name) {
            return Err(Error::parse(
                Some(1),
                format!("{}: duplicate column '{name}'", path.display()),
            ));
        }
    }
    Ok(columns)
}

/// `None` when any cell is empty, non-numeric or NaN.
fn parse_cells(record: &StringRecord, width: usize) -> Option<Vec<f64>> {
    let mut row = Vec::with_capacity(width);
    for cell in record.iter().take(width) {
        let value: f64 = cell.parse().ok()?;
        // "nan", "inf" and "infinity" parse as floats but count as missing
        if !value.is_finite() {
            return None;
        }
        row.push(value);
    }
    Some(row)
}

fn read_table(path: &Path, delimiter: u8) -> Result<PointCloudTable> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| map_csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| map_csv_error(path, e))?.clone();
    let columns = parse_header(path, &headers)?;
    let width = columns.len();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| map_csv_error(path, e))?;
        let line = record.position().map(|p| p.line());

        // trailing delimiters only add empty fields past the header width
        let extra_are_empty = record.iter().skip(width).all(str::is_empty);
        if record.len() < width || !extra_are_empty {
            return Err(Error::parse(
                line,
                format!(
                    "{}: row has {} fields, header has {width}",
                    path.display(),
                    record.len()
                ),
            ));
        }
        records.push(record);
    }

    let parsed: Vec<Option<Vec<f64>>> = records
        .par_iter()
        .map(|record| parse_cells(record, width))
        .collect();

    let mut table = PointCloudTable::new(columns);
    let mut dropped = 0usize;
    for row in parsed {
        match row {
            Some(row) => table.push_row(&row)?,
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        log::warn!(
            "{}: dropped {} row(s) with missing values",
            path.display(),
            dropped
        );
    }
    log::debug!(
        "{}: read {} rows x {} columns",
        path.display(),
        table.n_rows(),
        table.n_columns()
    );

    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use pcd_core::pointcloud::feature::select_features;
    use tempfile::NamedTempFile;

    use super::*;

    const HEADER: &str =
        "X Y Z R G B omnivariance_2 normal_cr_2 NumberOfReturns planarity_2 omnivariance_1 verticality_1";

    fn write_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn drops_rows_with_empty_cells() {
        let contents = format!(
            "{HEADER}\n\
             1.0 2.0 3.0 10 20 30 0.1 0.2 1 0.3 0.4 0.5\n\
             1.5 2.5 3.5 11 21  0.1 0.2 1 0.3 0.4 0.5\n\
             2.0 3.0 4.0 12 22 32 0.1 0.2 2 0.3 0.4 0.5\n"
        );
        let file = write_file(".xyz", &contents);
        let table = read_point_cloud(file.path()).unwrap();

        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.n_columns(), 12);
        assert_eq!(table.column("X").unwrap(), &[1.0, 2.0]);
        assert_eq!(select_features(&table).unwrap().n_rows(), 2);
    }

    #[test]
    fn drops_rows_with_non_numeric_cells() {
        let file = write_file(".xyz", "X Y Z\n1 2 3\n4 abc 6\n7 8 nan\n9 10 11\n");
        let table = read_point_cloud(file.path()).unwrap();
        assert_eq!(table.column("X").unwrap(), &[1.0, 9.0]);
    }

    #[test]
    fn drops_rows_with_infinite_cells() {
        let file = write_file(
            ".xyz",
            "X Y Z\n1 2 3\n4 inf 6\n7 8 -inf\n-Infinity 0 0\n9 10 11\n",
        );
        let table = read_point_cloud(file.path()).unwrap();
        assert_eq!(table.column("X").unwrap(), &[1.0, 9.0]);
        assert!(table.column("Y").unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn column_count_mismatch_is_parse_error() {
        let file = write_file(".xyz", "X Y Z\n1 2 3\n4 5 6 7\n");
        match read_point_cloud(file.path()) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, Some(3)),
            other => panic!("unexpected result: {other:?}"),
        }

        let file = write_file(".xyz", "X Y Z\n1 2\n");
        assert!(matches!(read_point_cloud(file.path()), Err(Error::Parse { .. })));
    }

    #[test]
    fn trailing_delimiter_is_tolerated() {
        let file = write_file(".xyz", "X Y Z \n1 2 3 \n4 5 6\n");
        let table = read_point_cloud(file.path()).unwrap();
        assert_eq!(table.column_names(), &["X", "Y", "Z"]);
        assert_eq!(table.n_rows(), 2);
    }

    #[test]
    fn empty_file_has_no_header() {
        let file = write_file(".xyz", "");
        assert!(matches!(read_point_cloud(file.path()), Err(Error::Parse { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = read_point_cloud(Path::new("/nonexistent/cloud.xyz"));
        assert!(matches!(result, Err(Error::Io { .. })));
    }

    #[test]
    fn csv_extension_uses_commas() {
        let file = write_file(".csv", "X,Y,Z\n1,2,3\n");
        let table = read_point_cloud(file.path()).unwrap();
        assert_eq!(table.row(0), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn multiple_files_are_concatenated() {
        let a = write_file(".xyz", "X Y\n1 2\n");
        let b = write_file(".xyz", "X Y\n3 4\n");
        let c = write_file(".xyz", "Y X\n3 4\n");

        let provider = XyzParserProvider {
            filenames: vec![a.path().to_path_buf(), b.path().to_path_buf()],
            delimiter: b' ',
        };
        let table = provider.get_parser().parse().unwrap();
        assert_eq!(table.column("X").unwrap(), &[1.0, 3.0]);

        let provider = XyzParserProvider {
            filenames: vec![a.path().to_path_buf(), c.path().to_path_buf()],
            delimiter: b' ',
        };
        assert!(matches!(
            provider.get_parser().parse(),
            Err(Error::Schema(_))
        ));
    }
}
