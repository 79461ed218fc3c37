//! Scan data types: readings, stage positions and the results table.
//!
//! # Results layout
//!
//! Each accepted measurement is stored as a [`ResultsRow`]. When addressed by
//! column index the row reads like a flat record:
//!
//! ```text
//! 0: timestamp (seconds since UNIX epoch)
//! 1: x   2: y   3: z
//! 4: quantity (the value optimised over)
//! 5..: extra columns (e.g. gain)
//! ```
//!
//! The [`ResultsTable`] keeps rows in visitation order. It is append-only
//! while a scan runs; the optimum extractors only ever borrow it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::{ScanError, ScanResult};

/// Index of the quantity column in a flat results row.
pub const QUANTITY_COLUMN: usize = 4;

/// A single sensor reading: averaged value and its estimated uncertainty.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Averaged measured value
    pub value: f64,
    /// Estimated uncertainty of `value`
    pub error: f64,
}

impl Reading {
    /// Creates a new reading.
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

impl From<(f64, f64)> for Reading {
    fn from((value, error): (f64, f64)) -> Self {
        Self { value, error }
    }
}

/// Stage axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in column order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Zero-based index of the axis within a position (`x = 0`).
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Column of this axis in a flat results row.
    pub fn column(self) -> usize {
        self.index() + 1
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

impl std::str::FromStr for Axis {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(ScanError::Configuration(format!(
                "unknown axis '{}', expected one of x, y, z",
                other
            ))),
        }
    }
}

/// A stage position in stage coordinate units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    /// Creates a new position.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Coordinate along `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Returns a copy with the coordinate along `axis` replaced.
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }

    /// Exact-value identity used for deduplication.
    ///
    /// Two positions share a key only when every coordinate has the same bit
    /// pattern; there is no tolerance.
    pub fn key(&self) -> PositionKey {
        PositionKey([self.x.to_bits(), self.y.to_bits(), self.z.to_bits()])
    }

    /// Coordinates as an array.
    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl From<[f64; 3]> for Position {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<(f64, f64, f64)> for Position {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self { x, y, z }
    }
}

impl From<&[f64; 3]> for Position {
    fn from(coords: &[f64; 3]) -> Self {
        Self::from(*coords)
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Hashable exact-value identity of a [`Position`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PositionKey([u64; 3]);

/// One accepted measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultsRow {
    /// UTC capture time
    pub timestamp: DateTime<Utc>,
    /// Stage position the reading was taken at
    pub position: Position,
    /// Scalar used for optimisation
    pub quantity: f64,
    /// Additional columns, addressed from index 5 onwards
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<f64>,
}

impl ResultsRow {
    /// Creates a row stamped with the current time.
    pub fn new(position: Position, quantity: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            position,
            quantity,
            extra: Vec::new(),
        }
    }

    /// Sets an explicit timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Appends an extra column.
    pub fn with_extra(mut self, value: f64) -> Self {
        self.extra.push(value);
        self
    }

    /// Reads a column by its flat index.
    pub fn column(&self, index: usize) -> Option<f64> {
        match index {
            0 => Some(self.timestamp.timestamp_micros() as f64 / 1e6),
            1 => Some(self.position.x),
            2 => Some(self.position.y),
            3 => Some(self.position.z),
            QUANTITY_COLUMN => Some(self.quantity),
            n => self.extra.get(n - 5).copied(),
        }
    }
}

/// Ordered, append-only table of results; insertion order is visitation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultsTable {
    rows: Vec<ResultsRow>,
}

impl ResultsTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row.
    pub fn push(&mut self, row: ResultsRow) {
        self.rows.push(row);
    }

    /// Rows in visitation order.
    pub fn rows(&self) -> &[ResultsRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterator over the recorded positions.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.rows.iter().map(|row| row.position)
    }

    /// The quantity column.
    pub fn quantities(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.quantity).collect()
    }

    /// Coordinates along `axis`, one per row.
    pub fn axis_values(&self, axis: Axis) -> Vec<f64> {
        self.rows.iter().map(|row| row.position.get(axis)).collect()
    }

    /// Returns the first axis whose coordinate changes across the table.
    pub fn scan_axis(&self) -> ScanResult<Axis> {
        let first = self.rows.first().ok_or(ScanError::EmptyResults)?.position;
        Axis::ALL
            .into_iter()
            .find(|&axis| self.positions().any(|p| p.get(axis) != first.get(axis)))
            .ok_or(ScanError::NoScanAxis)
    }
}

impl FromIterator<ResultsRow> for ResultsTable {
    fn from_iter<T: IntoIterator<Item = ResultsRow>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl Extend<ResultsRow> for ResultsTable {
    fn extend<T: IntoIterator<Item = ResultsRow>>(&mut self, iter: T) {
        self.rows.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(x: f64, y: f64, z: f64, q: f64) -> ResultsRow {
        ResultsRow::new(Position::new(x, y, z), q)
    }

    #[test]
    fn test_column_indexing() {
        let r = row(1.0, 2.0, 3.0, 4.5).with_extra(-10.0);
        assert_eq!(r.column(1), Some(1.0));
        assert_eq!(r.column(3), Some(3.0));
        assert_eq!(r.column(QUANTITY_COLUMN), Some(4.5));
        assert_eq!(r.column(5), Some(-10.0));
        assert_eq!(r.column(6), None);
    }

    #[test]
    fn test_position_key_is_exact() {
        let a = Position::new(0.1 + 0.2, 0.0, 0.0);
        let b = Position::new(0.3, 0.0, 0.0);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), Position::new(0.1 + 0.2, 0.0, 0.0).key());
    }

    #[test]
    fn test_scan_axis() {
        let table: ResultsTable = vec![row(1.0, 0.0, 5.0, 0.0), row(1.0, 0.0, 6.0, 1.0)]
            .into_iter()
            .collect();
        assert_eq!(table.scan_axis().unwrap(), Axis::Z);

        let still: ResultsTable = vec![row(1.0, 1.0, 1.0, 0.0), row(1.0, 1.0, 1.0, 2.0)]
            .into_iter()
            .collect();
        assert!(matches!(still.scan_axis(), Err(ScanError::NoScanAxis)));
        assert!(matches!(
            ResultsTable::new().scan_axis(),
            Err(ScanError::EmptyResults)
        ));
    }

    #[test]
    fn test_axis_parse() {
        assert_eq!("Y".parse::<Axis>().unwrap(), Axis::Y);
        assert!("w".parse::<Axis>().is_err());
    }
}
