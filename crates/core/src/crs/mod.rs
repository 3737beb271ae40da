//! Coordinate Reference System handling
//!
//! The engines never reproject; they only need to know whether two images
//! live in the same reference system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System, identified by EPSG code or WKT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG registry code, e.g. 32632 for UTM zone 32N
    Epsg(u32),
    /// Well-known-text definition
    Wkt(String),
}

impl Crs {
    /// CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Crs::Epsg(code)
    }

    /// CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Crs::Wkt(wkt.into())
    }

    /// Parse `EPSG:xxxx` (case-insensitive) or fall back to WKT.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let Some(code) = trimmed
            .to_ascii_uppercase()
            .strip_prefix("EPSG:")
            .and_then(|c| c.parse().ok())
        {
            return Crs::Epsg(code);
        }
        Crs::Wkt(trimmed.to_string())
    }

    /// EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Wkt(_) => None,
        }
    }

    /// Whether two CRS describe the same system.
    ///
    /// WKT strings are compared after whitespace normalisation; an EPSG code
    /// and a WKT are never considered equivalent.
    pub fn is_equivalent(&self, other: &Crs) -> bool {
        match (self, other) {
            (Crs::Epsg(a), Crs::Epsg(b)) => a == b,
            (Crs::Wkt(a), Crs::Wkt(b)) => {
                a.split_whitespace().eq(b.split_whitespace())
            }
            _ => false,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Wkt(wkt) => write!(f, "WKT:{}", wkt.chars().take(50).collect::<String>()),
        }
    }
}
