//! Thin adapter over a `GeoJSON` feature collection on disk.
//!
//! Geometry and coordinate reference systems are passed through untouched;
//! this layer only reads feature ids and attaches properties.

use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue, feature::Id};
use serde_json::json;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, info};

use crate::geo::merge::HourlySeries;
use crate::types::ZoneCode;

#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON parse error: {0}")]
    Parse(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a FeatureCollection")]
    NotFeatureCollection,

    #[error("series has {series} entries but the collection has {features} features")]
    CardinalityMismatch { series: usize, features: usize },
}

/// Names written into the output so a presentation layer knows which
/// fields it is looking at.
#[derive(Debug, Clone)]
pub struct AnnotationLabels {
    /// Feature property that receives the hourly map.
    pub hour_map_property: String,
    pub value_col: String,
    pub zone_col: String,
    pub hour_col: String,
}

impl Default for AnnotationLabels {
    fn default() -> Self {
        Self {
            hour_map_property: "impact_by_hour".to_string(),
            value_col: "impact".to_string(),
            zone_col: "destination".to_string(),
            hour_col: "period".to_string(),
        }
    }
}

pub struct GeometryCollection {
    collection: FeatureCollection,
    ids: Vec<ZoneCode>,
}

impl GeometryCollection {
    /// Loads a feature collection and reads each feature's id from
    /// `id_property` (falling back to the feature id), zero-padded to
    /// `zone_width`.
    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path, id_property: &str, zone_width: usize) -> Result<Self, GeometryError> {
        let text = fs::read_to_string(path)?;
        let collection = match text.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(GeometryError::NotFeatureCollection),
        };
        let this = Self::from_collection(collection, id_property, zone_width);

        info!(features = this.len(), "Geometry collection loaded");
        Ok(this)
    }

    pub fn from_collection(
        collection: FeatureCollection,
        id_property: &str,
        zone_width: usize,
    ) -> Self {
        let ids: Vec<ZoneCode> = collection
            .features
            .iter()
            .map(|feature| {
                let from_property = feature
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(id_property))
                    .and_then(id_text);
                let from_id = || match &feature.id {
                    Some(Id::String(s)) => Some(s.trim().to_string()),
                    Some(Id::Number(n)) => id_text(&JsonValue::Number(n.clone())),
                    None => None,
                };
                from_property
                    .or_else(from_id)
                    .map_or_else(ZoneCode::invalid, |raw| ZoneCode::padded(&raw, zone_width))
            })
            .collect();

        let unusable = ids.iter().filter(|id| !id.is_valid()).count();
        if unusable > 0 {
            debug!(unusable, "Features without a usable zone id");
        }

        Self { collection, ids }
    }

    /// One id per feature, in feature order.
    pub fn ids(&self) -> &[ZoneCode] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Attaches each feature's hourly map and the collection-level
    /// metadata. `series` must have been merged against [`Self::ids`].
    pub fn annotate(
        self,
        series: &HourlySeries,
        labels: &AnnotationLabels,
    ) -> Result<FeatureCollection, GeometryError> {
        if series.len() != self.collection.features.len() {
            return Err(GeometryError::CardinalityMismatch {
                series: series.len(),
                features: self.collection.features.len(),
            });
        }

        let mut collection = self.collection;
        for (feature, (_, hours)) in collection.features.iter_mut().zip(&series.zones) {
            feature
                .properties
                .get_or_insert_with(JsonObject::new)
                .insert(labels.hour_map_property.clone(), serde_json::to_value(hours)?);
        }

        collection
            .foreign_members
            .get_or_insert_with(JsonObject::new)
            .insert(
                "properties".to_string(),
                json!({
                    "max_value": series.max_value,
                    "value_col": labels.value_col,
                    "zone_col": labels.zone_col,
                    "hour_col": labels.hour_col,
                }),
            );

        Ok(collection)
    }
}

/// Writes a feature collection as JSON, creating parent directories.
pub fn write_collection(path: &Path, collection: &FeatureCollection) -> Result<(), GeometryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(writer, collection)?;
    Ok(())
}

fn id_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => n.as_u64().map(|v| v.to_string()).or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                .map(|f| format!("{f:.0}"))
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::impact::ImpactRow;
    use crate::geo::merge::{excess_trips, merge};
    use crate::types::Period;

    const COLLECTION: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "properties": {"ID": "28079"},
             "geometry": {"type": "Point", "coordinates": [-3.7, 40.4]}},
            {"type": "Feature", "properties": {"ID": 8019},
             "geometry": {"type": "Point", "coordinates": [2.1, 41.3]}},
            {"type": "Feature", "properties": {"ID": "28079_AM"},
             "geometry": null},
            {"type": "Feature", "properties": {"name": "no id"},
             "geometry": null}
        ]
    }"#;

    fn collection() -> GeometryCollection {
        let fc = match COLLECTION.parse::<GeoJson>().unwrap() {
            GeoJson::FeatureCollection(fc) => fc,
            _ => unreachable!(),
        };
        GeometryCollection::from_collection(fc, "ID", 5)
    }

    fn row(dest: &str, hour: u8, diff_abs: f64) -> ImpactRow {
        ImpactRow {
            destination: ZoneCode::padded(dest, 5),
            period: Period(hour),
            observed: 0.0,
            n: 3,
            mean: 0.0,
            std: 0.0,
            ci_low: 0.0,
            ci_high: 0.0,
            diff_abs,
            diff_pct: 0.0,
            z: 0.0,
            significant: true,
        }
    }

    #[test]
    fn test_ids_are_padded_and_unusable_ids_are_invalid() {
        let geometry = collection();
        let ids: Vec<&str> = geometry.ids().iter().map(ZoneCode::as_str).collect();

        assert_eq!(ids[0], "28079");
        assert_eq!(ids[1], "08019");
        assert!(!geometry.ids()[2].is_valid());
        assert!(!geometry.ids()[3].is_valid());
    }

    #[test]
    fn test_annotate_keeps_cardinality_and_sets_metadata() {
        let geometry = collection();
        let series = merge(&[row("28079", 8, 42.0)], excess_trips, geometry.ids());
        let fc = geometry
            .annotate(&series, &AnnotationLabels::default())
            .unwrap();

        assert_eq!(fc.features.len(), 4);
        for feature in &fc.features {
            let hours = feature.properties.as_ref().unwrap()["impact_by_hour"]
                .as_object()
                .unwrap();
            assert_eq!(hours.len(), 24);
        }
        assert_eq!(
            fc.features[0].properties.as_ref().unwrap()["impact_by_hour"]["8"],
            42.0
        );

        let meta = &fc.foreign_members.as_ref().unwrap()["properties"];
        assert_eq!(meta["max_value"], 42.0);
        assert_eq!(meta["value_col"], "impact");
        assert_eq!(meta["hour_col"], "period");
    }

    #[test]
    fn test_annotate_rejects_foreign_series() {
        let geometry = collection();
        let series = merge(&[], excess_trips, &[ZoneCode::padded("28079", 5)]);
        assert!(matches!(
            geometry.annotate(&series, &AnnotationLabels::default()),
            Err(GeometryError::CardinalityMismatch { .. })
        ));
    }

    #[test]
    fn test_load_rejects_non_collections() {
        let path = std::env::temp_dir().join("mobility_impact_test_point.geojson");
        fs::write(&path, r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#).unwrap();

        let result = GeometryCollection::load(&path, "ID", 5);
        assert!(matches!(result, Err(GeometryError::NotFeatureCollection)));

        fs::remove_file(&path).unwrap();
    }
}
