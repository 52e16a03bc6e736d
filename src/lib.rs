pub mod aggregate;
pub mod analysis;
pub mod config;
pub mod fetch;
pub mod geo;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod types;
