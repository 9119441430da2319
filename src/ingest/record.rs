//! Row types flowing through the ingest pipeline.
//!
//! `RawRow` is one tab-split input line plus the header index of the file it
//! came from. `parse_row` turns it into a fully validated `TripRecord` or a
//! `DropReason`; there is no partially valid record. `TripRecord::to_row`
//! flattens a record into the positional layout of [`TRIP_COLUMNS`].

use crate::zones::ZoneCache;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Timestamp layout used by the trip files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Destination table for validated trips.
pub const TRIP_TABLE: &str = "nyc_trip";

/// Column order written by the bulk loader. Must match [`TripRecord::to_row`].
pub const TRIP_COLUMNS: [&str; 19] = [
    "vendor",
    "pickup_time",
    "dropoff_time",
    "passenger_count",
    "trip_distance",
    "pu_location_region",
    "pu_location_zone",
    "do_location_region",
    "do_location_zone",
    "payment_type",
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "improvement_surcharge",
    "total_amount",
    "congestion_surcharge",
    "airport_fee",
];

/// Input header names.
pub mod columns {
    pub const VENDOR_ID: &str = "VendorID";
    pub const PICKUP_DATETIME: &str = "tpep_pickup_datetime";
    pub const DROPOFF_DATETIME: &str = "tpep_dropoff_datetime";
    pub const PASSENGER_COUNT: &str = "passenger_count";
    pub const TRIP_DISTANCE: &str = "trip_distance";
    pub const PICKUP_LOCATION_ID: &str = "PULocationID";
    pub const DROPOFF_LOCATION_ID: &str = "DOLocationID";
    pub const PAYMENT_TYPE: &str = "payment_type";
    pub const FARE_AMOUNT: &str = "fare_amount";
    pub const EXTRA: &str = "extra";
    pub const MTA_TAX: &str = "mta_tax";
    pub const TIP_AMOUNT: &str = "tip_amount";
    pub const TOLLS_AMOUNT: &str = "tolls_amount";
    pub const IMPROVEMENT_SURCHARGE: &str = "improvement_surcharge";
    pub const TOTAL_AMOUNT: &str = "total_amount";
    pub const CONGESTION_SURCHARGE: &str = "congestion_surcharge";
    pub const AIRPORT_FEE: &str = "Airport_fee";
}

const VENDORS: &[(i64, &str)] = &[
    (1, "Creative Mobile Technologies, LLC"),
    (2, "Curb Mobility, LLC"),
    (6, "Myle Technologies Inc"),
    (7, "Helix"),
];

const PAYMENT_TYPES: &[(i64, &str)] = &[
    (0, "Flex Fare trip"),
    (1, "Credit card"),
    (2, "Cash"),
    (3, "No charge"),
    (4, "Dispute"),
    (5, "Unknown"),
    (6, "Voided trip"),
];

/// Map an enumerated id to its name; anything unmapped passes through as-is.
fn enum_name(table: &[(i64, &str)], raw: &str) -> String {
    raw.parse::<i64>()
        .ok()
        .and_then(|id| table.iter().find(|(key, _)| *key == id))
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn vendor_name(raw: &str) -> String {
    enum_name(VENDORS, raw)
}

pub fn payment_type_name(raw: &str) -> String {
    enum_name(PAYMENT_TYPES, raw)
}

/// Column name → position, built once per input file from its first line.
#[derive(Debug, Default, Clone)]
pub struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        let positions = fields
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (name.to_string(), idx))
            .collect();
        Self { positions }
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }
}

/// One data line, not yet validated.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub fields: Vec<String>,
    pub header: Arc<HeaderIndex>,
}

impl RawRow {
    pub fn new(line: &str, header: Arc<HeaderIndex>) -> Self {
        Self {
            fields: line.split('\t').map(str::to_string).collect(),
            header,
        }
    }

    /// Value of `column`, or `None` if the header lacks it or the line is short.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .position(column)
            .and_then(|idx| self.fields.get(idx))
            .map(String::as_str)
    }
}

/// Why a row was dropped. Never escapes the parser pool except as a count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    MissingColumn(&'static str),
    InvalidTimestamp(&'static str),
    InvalidInteger(&'static str),
    InvalidNumber(&'static str),
    UnknownZone(i64),
}

/// Optional monetary amounts. Absent or unparseable values stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fares {
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
}

/// A validated trip, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TripRecord {
    pub vendor: String,
    pub pickup_time: NaiveDateTime,
    pub dropoff_time: NaiveDateTime,
    pub passenger_count: i32,
    pub trip_distance: f64,
    pub pickup_region: String,
    pub pickup_zone: String,
    pub dropoff_region: String,
    pub dropoff_zone: String,
    pub payment_type: String,
    pub fares: Fares,
}

fn required<'a>(row: &'a RawRow, column: &'static str) -> Result<&'a str, DropReason> {
    row.get(column).ok_or(DropReason::MissingColumn(column))
}

fn parse_timestamp(row: &RawRow, column: &'static str) -> Result<NaiveDateTime, DropReason> {
    NaiveDateTime::parse_from_str(required(row, column)?, TIMESTAMP_FORMAT)
        .map_err(|_| DropReason::InvalidTimestamp(column))
}

fn parse_integer<T: FromStr>(row: &RawRow, column: &'static str) -> Result<T, DropReason> {
    required(row, column)?
        .parse::<T>()
        .map_err(|_| DropReason::InvalidInteger(column))
}

fn parse_number(row: &RawRow, column: &'static str) -> Result<f64, DropReason> {
    required(row, column)?
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or(DropReason::InvalidNumber(column))
}

fn parse_amount(row: &RawRow, column: &'static str) -> Option<f64> {
    row.get(column)?
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Validate and transform one row, resolving both location ids through `zones`.
pub fn parse_row(row: &RawRow, zones: &ZoneCache) -> Result<TripRecord, DropReason> {
    use columns::*;

    let vendor = vendor_name(row.get(VENDOR_ID).unwrap_or_default());
    let pickup_time = parse_timestamp(row, PICKUP_DATETIME)?;
    let dropoff_time = parse_timestamp(row, DROPOFF_DATETIME)?;
    let passenger_count = parse_integer(row, PASSENGER_COUNT)?;
    let trip_distance = parse_number(row, TRIP_DISTANCE)?;

    let pickup_id: i64 = parse_integer(row, PICKUP_LOCATION_ID)?;
    let pickup = zones
        .get(pickup_id)
        .ok_or(DropReason::UnknownZone(pickup_id))?;

    let dropoff_id: i64 = parse_integer(row, DROPOFF_LOCATION_ID)?;
    let dropoff = zones
        .get(dropoff_id)
        .ok_or(DropReason::UnknownZone(dropoff_id))?;

    let payment_type = payment_type_name(row.get(PAYMENT_TYPE).unwrap_or_default());

    let fares = Fares {
        fare_amount: parse_amount(row, FARE_AMOUNT),
        extra: parse_amount(row, EXTRA),
        mta_tax: parse_amount(row, MTA_TAX),
        tip_amount: parse_amount(row, TIP_AMOUNT),
        tolls_amount: parse_amount(row, TOLLS_AMOUNT),
        improvement_surcharge: parse_amount(row, IMPROVEMENT_SURCHARGE),
        total_amount: parse_amount(row, TOTAL_AMOUNT),
        congestion_surcharge: parse_amount(row, CONGESTION_SURCHARGE),
        airport_fee: parse_amount(row, AIRPORT_FEE),
    };

    Ok(TripRecord {
        vendor,
        pickup_time,
        dropoff_time,
        passenger_count,
        trip_distance,
        pickup_region: pickup.region.clone(),
        pickup_zone: pickup.zone.clone(),
        dropoff_region: dropoff.region.clone(),
        dropoff_zone: dropoff.zone.clone(),
        payment_type,
        fares,
    })
}

/// A single positional value in a write tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Timestamp(NaiveDateTime),
    Integer(i64),
    Float(f64),
    Null,
}

/// Positional tuple matching [`TRIP_COLUMNS`].
pub type Row = Vec<ColumnValue>;

/// Appends values in column order.
#[derive(Debug, Default)]
pub struct RowBuilder {
    values: Vec<ColumnValue>,
}

impl RowBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn text(mut self, value: &str) -> Self {
        self.values.push(ColumnValue::Text(value.to_string()));
        self
    }

    pub fn timestamp(mut self, value: NaiveDateTime) -> Self {
        self.values.push(ColumnValue::Timestamp(value));
        self
    }

    pub fn integer(mut self, value: i64) -> Self {
        self.values.push(ColumnValue::Integer(value));
        self
    }

    pub fn float(mut self, value: f64) -> Self {
        self.values.push(ColumnValue::Float(value));
        self
    }

    pub fn optional_float(mut self, value: Option<f64>) -> Self {
        self.values
            .push(value.map_or(ColumnValue::Null, ColumnValue::Float));
        self
    }

    pub fn build(self) -> Row {
        self.values
    }
}

impl TripRecord {
    pub fn to_row(&self) -> Row {
        let row = RowBuilder::with_capacity(TRIP_COLUMNS.len())
            .text(&self.vendor)
            .timestamp(self.pickup_time)
            .timestamp(self.dropoff_time)
            .integer(self.passenger_count.into())
            .float(self.trip_distance)
            .text(&self.pickup_region)
            .text(&self.pickup_zone)
            .text(&self.dropoff_region)
            .text(&self.dropoff_zone)
            .text(&self.payment_type)
            .optional_float(self.fares.fare_amount)
            .optional_float(self.fares.extra)
            .optional_float(self.fares.mta_tax)
            .optional_float(self.fares.tip_amount)
            .optional_float(self.fares.tolls_amount)
            .optional_float(self.fares.improvement_surcharge)
            .optional_float(self.fares.total_amount)
            .optional_float(self.fares.congestion_surcharge)
            .optional_float(self.fares.airport_fee)
            .build();
        debug_assert_eq!(row.len(), TRIP_COLUMNS.len());
        row
    }
}
