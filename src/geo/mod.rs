//! Geospatial time-series output.
//!
//! [`merge`] turns scored rows into one dense hourly map per target zone;
//! [`collection`] attaches those maps to a `GeoJSON` feature collection.

pub mod collection;
pub mod merge;
