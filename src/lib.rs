pub mod config;
pub mod normalize;
pub mod overpass;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod tracing;

mod utils;
