pub mod classes;
pub mod error;
pub mod pointcloud;

pub use error::{Error, Result};
