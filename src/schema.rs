//! Registry of the column layouts accepted for daily trip extracts.
//!
//! Selection is a deterministic lookup: the first registered schema whose
//! four columns are all present in the header wins.

use csv::StringRecord;

/// A named, versioned mapping from source column names to canonical fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: &'static str,
    pub version: u8,
    pub origin: &'static str,
    pub destination: &'static str,
    pub period: &'static str,
    pub volume: &'static str,
}

/// Accepted schemas, in priority order.
pub static SCHEMAS: &[RecordSchema] = &[
    RecordSchema {
        name: "semantic",
        version: 1,
        origin: "origin",
        destination: "destination",
        period: "period",
        volume: "trips",
    },
    RecordSchema {
        name: "localized",
        version: 1,
        origin: "origen",
        destination: "destino",
        period: "periodo",
        volume: "viajes",
    },
];

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// No registered schema matches the header.
    #[error("unrecognized columns: {}", columns.join(", "))]
    Unrecognized { columns: Vec<String> },
}

/// Column positions of the canonical fields within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub schema: &'static RecordSchema,
    pub origin: usize,
    pub destination: usize,
    pub period: usize,
    pub volume: usize,
}

impl ResolvedSchema {
    /// Number of fields a row needs for every canonical column to be present.
    pub fn min_fields(&self) -> usize {
        [self.origin, self.destination, self.period, self.volume]
            .into_iter()
            .max()
            .map_or(0, |i| i + 1)
    }
}

pub fn resolve(headers: &StringRecord) -> Result<ResolvedSchema, SchemaError> {
    let columns: Vec<&str> = headers.iter().map(str::trim).collect();
    let position = |name: &str| columns.iter().position(|c| *c == name);

    for schema in SCHEMAS {
        if let (Some(origin), Some(destination), Some(period), Some(volume)) = (
            position(schema.origin),
            position(schema.destination),
            position(schema.period),
            position(schema.volume),
        ) {
            return Ok(ResolvedSchema {
                schema,
                origin,
                destination,
                period,
                volume,
            });
        }
    }

    Err(SchemaError::Unrecognized {
        columns: columns.iter().take(20).map(|c| c.to_string()).collect(),
    })
}
