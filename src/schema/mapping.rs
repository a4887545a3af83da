//! Declarative source-column to canonical-field mappings and type coercion.

use crate::trip::{Provider, TripRecord};
use chrono::{DateTime, NaiveDateTime};

/// How a raw string is cast for a canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Timestamp,
    Float,
    Integer,
}

/// A raw field after coercion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Timestamp(NaiveDateTime),
    Float(f64),
    Integer(i32),
}

impl Coercion {
    /// Casts `raw`, or `None` when it does not parse.
    pub fn cast(self, raw: &str) -> Option<Value> {
        match self {
            Coercion::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
            Coercion::Float => parse_float(raw).map(Value::Float),
            Coercion::Integer => parse_integer(raw).map(Value::Integer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    PickupTime,
    DropoffTime,
    PickupLoc,
    DropoffLoc,
    TripDistance,
    Fare,
    TotalAmount,
    CongestionSurcharge,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 8] = [
        CanonicalField::PickupTime,
        CanonicalField::DropoffTime,
        CanonicalField::PickupLoc,
        CanonicalField::DropoffLoc,
        CanonicalField::TripDistance,
        CanonicalField::Fare,
        CanonicalField::TotalAmount,
        CanonicalField::CongestionSurcharge,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::PickupTime => "pickup_time",
            CanonicalField::DropoffTime => "dropoff_time",
            CanonicalField::PickupLoc => "pickup_loc",
            CanonicalField::DropoffLoc => "dropoff_loc",
            CanonicalField::TripDistance => "trip_distance",
            CanonicalField::Fare => "fare",
            CanonicalField::TotalAmount => "total_amount",
            CanonicalField::CongestionSurcharge => "congestion_surcharge",
        }
    }

    pub fn coercion(&self) -> Coercion {
        match self {
            CanonicalField::PickupTime | CanonicalField::DropoffTime => Coercion::Timestamp,
            CanonicalField::PickupLoc | CanonicalField::DropoffLoc => Coercion::Integer,
            _ => Coercion::Float,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One entry of a layout's mapping table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source: &'static str,
    pub target: CanonicalField,
}

const fn map(source: &'static str, target: CanonicalField) -> FieldMapping {
    FieldMapping { source, target }
}

pub const YELLOW_MAPPING: &[FieldMapping] = &[
    map("tpep_pickup_datetime", CanonicalField::PickupTime),
    map("tpep_dropoff_datetime", CanonicalField::DropoffTime),
    map("PULocationID", CanonicalField::PickupLoc),
    map("DOLocationID", CanonicalField::DropoffLoc),
    map("trip_distance", CanonicalField::TripDistance),
    map("fare_amount", CanonicalField::Fare),
    map("total_amount", CanonicalField::TotalAmount),
    map("congestion_surcharge", CanonicalField::CongestionSurcharge),
];

pub const GREEN_MAPPING: &[FieldMapping] = &[
    map("lpep_pickup_datetime", CanonicalField::PickupTime),
    map("lpep_dropoff_datetime", CanonicalField::DropoffTime),
    map("PULocationID", CanonicalField::PickupLoc),
    map("DOLocationID", CanonicalField::DropoffLoc),
    map("trip_distance", CanonicalField::TripDistance),
    map("fare_amount", CanonicalField::Fare),
    map("total_amount", CanonicalField::TotalAmount),
    map("congestion_surcharge", CanonicalField::CongestionSurcharge),
];

pub fn mapping_for(provider: Provider) -> &'static [FieldMapping] {
    match provider {
        Provider::Yellow => YELLOW_MAPPING,
        Provider::Green => GREEN_MAPPING,
    }
}

/// A mapping table bound to the header of one file: for each canonical field,
/// the column index it is read from, if any.
#[derive(Debug, Clone)]
pub struct ResolvedMapping {
    columns: [Option<usize>; 8],
}

impl ResolvedMapping {
    /// Canonical fields absent from `mapping` or from `headers` stay unbound
    /// and are emitted as null.
    pub fn resolve(mapping: &[FieldMapping], headers: &csv::StringRecord) -> Self {
        let mut columns = [None; 8];
        for entry in mapping {
            columns[entry.target.index()] = headers.iter().position(|h| h.trim() == entry.source);
        }
        Self { columns }
    }

    pub fn unbound(&self) -> Vec<&'static str> {
        CanonicalField::ALL
            .iter()
            .filter(|f| self.columns[f.index()].is_none())
            .map(|f| f.name())
            .collect()
    }

    /// The bound column of `field` coerced by its rule. Bytes that are not
    /// UTF-8 read as null.
    fn value(&self, field: CanonicalField, record: &csv::ByteRecord) -> Option<Value> {
        let bytes = self.columns[field.index()].and_then(|i| record.get(i))?;
        let raw = std::str::from_utf8(bytes).ok()?;
        field.coercion().cast(raw)
    }

    fn timestamp(&self, field: CanonicalField, record: &csv::ByteRecord) -> Option<NaiveDateTime> {
        match self.value(field, record)? {
            Value::Timestamp(ts) => Some(ts),
            _ => None,
        }
    }

    fn float(&self, field: CanonicalField, record: &csv::ByteRecord) -> Option<f64> {
        match self.value(field, record)? {
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    fn zone(&self, field: CanonicalField, record: &csv::ByteRecord) -> Option<i32> {
        match self.value(field, record)? {
            Value::Integer(id) => Some(id),
            _ => None,
        }
    }

    /// Maps one raw row, or `None` when a required field is null after coercion.
    pub fn apply(&self, record: &csv::ByteRecord) -> Option<TripRecord> {
        Some(TripRecord {
            pickup_time: self.timestamp(CanonicalField::PickupTime, record)?,
            dropoff_time: self.timestamp(CanonicalField::DropoffTime, record)?,
            pickup_loc: self.zone(CanonicalField::PickupLoc, record)?,
            dropoff_loc: self.zone(CanonicalField::DropoffLoc, record)?,
            trip_distance: self.float(CanonicalField::TripDistance, record),
            fare: self.float(CanonicalField::Fare, record),
            total_amount: self.float(CanonicalField::TotalAmount, record),
            congestion_surcharge: self.float(CanonicalField::CongestionSurcharge, record),
        })
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

pub fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer cast; accepts integral floats such as `"132.0"`.
pub fn parse_integer(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    raw.parse::<i32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64)
            .map(|v| v as i32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::{ByteRecord, StringRecord};

    #[test]
    fn test_timestamp_formats() {
        let expected: NaiveDateTime = "2024-01-15T08:30:00".parse().unwrap();
        assert_eq!(parse_timestamp("2024-01-15 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("01/15/2024 08:30:00 AM"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-15T08:30:00-05:00"), Some(expected));
        assert!(parse_timestamp("2024-01-15 08:30:00.250").is_some());
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_numeric_casts() {
        assert_eq!(parse_float(" 12.5 "), Some(12.5));
        assert_eq!(parse_float("-3"), Some(-3.0));
        assert_eq!(parse_float("NaN"), None);
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_integer("132"), Some(132));
        assert_eq!(parse_integer("132.0"), Some(132));
        assert_eq!(parse_integer("132.5"), None);
        assert_eq!(parse_integer("abc"), None);
    }

    #[test]
    fn test_resolve_against_header() {
        let headers = StringRecord::from(vec![
            "VendorID",
            "tpep_pickup_datetime",
            "tpep_dropoff_datetime",
            "PULocationID",
            "DOLocationID",
            "fare_amount",
        ]);
        let resolved = ResolvedMapping::resolve(YELLOW_MAPPING, &headers);
        assert_eq!(
            resolved.unbound(),
            vec!["trip_distance", "total_amount", "congestion_surcharge"]
        );

        let row = ByteRecord::from(vec![
            "2",
            "2024-01-15 08:30:00",
            "2024-01-15 08:45:00",
            "161",
            "236",
            "14.2",
        ]);
        let trip = resolved.apply(&row).unwrap();
        assert_eq!(trip.pickup_loc, 161);
        assert_eq!(trip.fare, Some(14.2));
        assert_eq!(trip.trip_distance, None);
        assert_eq!(trip.congestion_surcharge, None);
    }

    #[test]
    fn test_missing_required_field_drops_row() {
        let headers = StringRecord::from(vec![
            "lpep_pickup_datetime",
            "lpep_dropoff_datetime",
            "PULocationID",
            "DOLocationID",
        ]);
        let resolved = ResolvedMapping::resolve(GREEN_MAPPING, &headers);

        let no_dropoff_loc = ByteRecord::from(vec![
            "2024-01-15 08:30:00",
            "2024-01-15 08:45:00",
            "74",
            "",
        ]);
        assert!(resolved.apply(&no_dropoff_loc).is_none());

        let bad_time = ByteRecord::from(vec!["not a time", "2024-01-15 08:45:00", "74", "75"]);
        assert!(resolved.apply(&bad_time).is_none());
    }

    #[test]
    fn test_coercion_per_field() {
        assert_eq!(CanonicalField::PickupLoc.coercion().cast("132.0"), Some(Value::Integer(132)));
        assert_eq!(CanonicalField::Fare.coercion().cast("7.5"), Some(Value::Float(7.5)));
        assert!(matches!(
            CanonicalField::DropoffTime.coercion().cast("2024-01-15 08:45:00"),
            Some(Value::Timestamp(_))
        ));
        assert_eq!(CanonicalField::DropoffLoc.coercion().cast("n/a"), None);
    }

    #[test]
    fn test_invalid_utf8_in_mapped_field_is_null() {
        let headers = StringRecord::from(vec![
            "lpep_pickup_datetime",
            "lpep_dropoff_datetime",
            "PULocationID",
            "DOLocationID",
            "fare_amount",
        ]);
        let resolved = ResolvedMapping::resolve(GREEN_MAPPING, &headers);

        let bytes_row = |fields: [&[u8]; 5]| {
            let mut record = ByteRecord::new();
            for field in fields {
                record.push_field(field);
            }
            record
        };

        let bad_fare = bytes_row([b"2024-01-15 08:30:00", b"2024-01-15 08:45:00", b"74", b"75", b"1\xff"]);
        let trip = resolved.apply(&bad_fare).unwrap();
        assert_eq!(trip.fare, None);

        let bad_zone = bytes_row([b"2024-01-15 08:30:00", b"2024-01-15 08:45:00", b"\xff", b"75", b"9.0"]);
        assert!(resolved.apply(&bad_zone).is_none());
    }

    #[test]
    fn test_field_order_matches_canonical_columns() {
        let names: Vec<_> = CanonicalField::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names, crate::trip::CANONICAL_COLUMNS);
    }
}
