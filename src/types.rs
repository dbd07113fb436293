//! Core record types shared across pipeline stages.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// How a coordinate was resolved, best tier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precision {
    /// Full street address resolved by the geocoding backend.
    Address,
    /// Neighborhood-level resolution (street query failed).
    Neighborhood,
    /// Fixed centroid from the static neighborhood table.
    Centroid,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Address => "address",
            Precision::Neighborhood => "neighborhood",
            Precision::Centroid => "centroid",
        }
    }

    /// Confidence weight used by the scoring engine (`c_geo`).
    pub fn confidence_weight(&self) -> f64 {
        match self {
            Precision::Address => 1.0,
            Precision::Neighborhood => 0.7,
            Precision::Centroid => 0.4,
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "address" | "endereco" => Ok(Precision::Address),
            "neighborhood" | "bairro" => Ok(Precision::Neighborhood),
            "centroid" | "centroide" => Ok(Precision::Centroid),
            other => Err(format!("unknown precision tier: '{other}'")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Precision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Precision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Aggregation granularity: per-street or per-neighborhood regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Street,
    Neighborhood,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Street => "street",
            Granularity::Neighborhood => "neighborhood",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Granularity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A calendar month, serialized as `YYYY-MM`.
///
/// Ordering is chronological; month arithmetic is exposed as a signed
/// distance in months so window slicing never touches day-of-month logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// Signed number of months from `earlier` to `self`.
    pub fn months_since(&self, earlier: YearMonth) -> i64 {
        i64::from(self.year - earlier.year) * 12 + i64::from(self.month) - i64::from(earlier.month)
    }

    /// The month `n` months before this one.
    pub fn minus_months(&self, n: u32) -> YearMonth {
        let total = i64::from(self.year) * 12 + i64::from(self.month) - 1 - i64::from(n);
        YearMonth {
            year: (total.div_euclid(12)) as i32,
            month: (total.rem_euclid(12) + 1) as u32,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{s}'"))?;
        let year: i32 = y.parse().map_err(|_| format!("bad year in '{s}'"))?;
        let month: u32 = m.parse().map_err(|_| format!("bad month in '{s}'"))?;
        YearMonth::new(year, month).ok_or_else(|| format!("month out of range in '{s}'"))
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// One consolidated ITBI row: a per-street, per-period transaction aggregate.
///
/// Numeric fields that failed to parse are `None`, never a sentinel zero —
/// a zero value would silently corrupt the aggregates downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub neighborhood: String,
    pub street: String,
    pub lot_area: Option<f64>,
    pub built_area: Option<f64>,
    pub private_area: Option<f64>,
    pub assessed_value: Option<f64>,
    pub transaction_value: Option<f64>,
    pub transaction_count: u32,
    pub property_type: String,
    pub legal_nature: String,
    pub year: i32,
    pub month: Option<u32>,
}

impl TransactionRecord {
    /// The record's calendar month, when the source supplied one.
    pub fn period(&self) -> Option<YearMonth> {
        self.month.and_then(|m| YearMonth::new(self.year, m))
    }
}

/// A transaction record plus its resolved coordinates.
///
/// Latitude and longitude are both present or both absent; `precision` is
/// present exactly when the coordinates are, and names the tier that
/// actually produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedRecord {
    pub record: TransactionRecord,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub precision: Option<Precision>,
}

impl GeocodedRecord {
    pub fn unresolved(record: TransactionRecord) -> Self {
        Self {
            record,
            latitude: None,
            longitude: None,
            precision: None,
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}
