use std::path::Path;

use pcd_core::{pointcloud::table::PointCloudTable, Error, Result};

pub mod xyz;

pub trait ParserProvider {
    fn get_parser(&self) -> Box<dyn Parser>;
}

pub trait Parser {
    fn parse(&self) -> Result<PointCloudTable>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    Xyz,
    Txt,
    Csv,
}

impl Extension {
    pub fn delimiter(self) -> u8 {
        match self {
            Extension::Xyz | Extension::Txt => b' ',
            Extension::Csv => b',',
        }
    }
}

pub fn get_extension(extension: &str) -> Option<Extension> {
    match extension.to_ascii_lowercase().as_str() {
        "xyz" => Some(Extension::Xyz),
        "txt" => Some(Extension::Txt),
        "csv" => Some(Extension::Csv),
        _ => None,
    }
}

/// Extension of `path`, defaulting to whitespace-delimited `.xyz` when the
/// file has none.
pub fn extension_of(path: &Path) -> Result<Extension> {
    match path.extension().and_then(|e| e.to_str()) {
        None => Ok(Extension::Xyz),
        Some(ext) => get_extension(ext).ok_or_else(|| {
            Error::parse(None, format!("unsupported point cloud extension '.{ext}'"))
        }),
    }
}
