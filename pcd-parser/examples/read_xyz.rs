use std::path::PathBuf;

use pcd_parser::parsers::{xyz::XyzParserProvider, ParserProvider as _};

fn main() {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/3DML_urban_point_cloud.xyz"));
    let provider = XyzParserProvider::for_path(&path).unwrap();
    let parser = provider.get_parser();

    let table = parser.parse();

    println!(
        "Number of points: {num_points}",
        num_points = table.as_ref().unwrap().n_rows()
    );
    println!("Columns: {:?}", table.as_ref().unwrap().column_names());
    println!("First point: {:?}", table.as_ref().unwrap().row(0));
}
