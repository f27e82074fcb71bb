pub mod plot;
pub mod xyz;
