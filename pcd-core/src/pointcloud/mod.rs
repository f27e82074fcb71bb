pub mod feature;
pub mod normalize;
pub mod sampling;
pub mod table;
