//! Unit-aware parsing of string-encoded measurements.
//!
//! Observation files and tool output encode every measurement as
//! `"<number> <unit>"` (the unit suffix may be empty for dimensionless
//! counts). The parser validates the declared unit against the dimension
//! class implied by the feature name; it never converts or rounds. Numeric
//! comparison downstream assumes same-unit operands, which callers must
//! enforce before combining cross-unit quantities.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of physical unit tags a quantity may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Micrometre (`um`).
    #[serde(rename = "um")]
    Um,
    /// Millimetre (`mm`).
    #[serde(rename = "mm")]
    Mm,
    /// Squared micrometre (`um2`).
    #[serde(rename = "um2")]
    UmSquared,
    /// Cubic micrometre (`um3`).
    #[serde(rename = "um3")]
    UmCubed,
    /// Degree of arc (`degree`).
    #[serde(rename = "degree")]
    Degree,
    /// Dimensionless count (empty unit suffix).
    #[serde(rename = "")]
    Count,
    /// Dimensionless ratio (`ratio`).
    #[serde(rename = "ratio")]
    Ratio,
}

impl Unit {
    /// The canonical suffix used when rendering a quantity back to text.
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Um => "um",
            Unit::Mm => "mm",
            Unit::UmSquared => "um2",
            Unit::UmCubed => "um3",
            Unit::Degree => "degree",
            Unit::Count => "",
            Unit::Ratio => "ratio",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Unit> {
        match suffix {
            "um" | "µm" => Some(Unit::Um),
            "mm" => Some(Unit::Mm),
            "um2" | "um**2" => Some(Unit::UmSquared),
            "um3" | "um**3" => Some(Unit::UmCubed),
            "degree" | "deg" => Some(Unit::Degree),
            "" => Some(Unit::Count),
            "ratio" => Some(Unit::Ratio),
            _ => None,
        }
    }

    /// The dimension class this unit belongs to.
    pub fn dimension(self) -> DimensionClass {
        match self {
            Unit::Um | Unit::Mm => DimensionClass::Length,
            Unit::UmSquared => DimensionClass::Area,
            Unit::UmCubed => DimensionClass::Volume,
            Unit::Degree => DimensionClass::Angle,
            Unit::Count | Unit::Ratio => DimensionClass::Dimensionless,
        }
    }
}

/// Dimension class a feature name implies for its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionClass {
    Length,
    Area,
    Volume,
    Angle,
    Dimensionless,
}

/// Feature-name substrings implying a length dimension.
const LENGTH_MARKERS: &[&str] = &[
    "length", "distance", "extent", "radius", "radii", "diameter", "height",
];

impl DimensionClass {
    /// Infer the dimension class from a feature name, case-insensitively.
    ///
    /// Unrecognized names fall back to `Dimensionless`, matching how the
    /// upstream statistics tool leaves unknown features unitless.
    pub fn of_feature(feature_name: &str) -> DimensionClass {
        let name = feature_name.to_ascii_lowercase();
        if LENGTH_MARKERS.iter().any(|m| name.contains(m)) {
            DimensionClass::Length
        } else if name.contains("area") {
            DimensionClass::Area
        } else if name.contains("volume") {
            DimensionClass::Volume
        } else if name.contains("angle") {
            DimensionClass::Angle
        } else {
            // order, number, asymmetry, rate, density and anything
            // unrecognized: the statistics tool emits these unitless.
            DimensionClass::Dimensionless
        }
    }

    /// Whether a unit tag is acceptable for this dimension class.
    pub fn accepts(self, unit: Unit) -> bool {
        unit.dimension() == self
    }
}

/// Errors from parsing a string-encoded quantity.
#[derive(Debug, Error)]
pub enum QuantityError {
    /// The numeric prefix did not parse as a float.
    #[error("malformed quantity {raw:?}: numeric prefix does not parse")]
    Format { raw: String },

    /// The unit suffix is not in the closed unit set.
    #[error("unknown unit {suffix:?} in quantity {raw:?}")]
    UnknownUnit { raw: String, suffix: String },

    /// The parsed unit does not match the expected dimension class.
    #[error("unit {unit:?} does not match expected dimension {expected:?}")]
    UnitMismatch { unit: Unit, expected: DimensionClass },
}

/// A numeric value with its physical unit tag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub number: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(number: f64, unit: Unit) -> Self {
        Self { number, unit }
    }

    /// Parse `"<number> <unit>"` and validate against `expected`.
    ///
    /// The suffix may be absent (dimensionless count). Splitting happens on
    /// the first whitespace run; the remainder is the unit suffix verbatim.
    pub fn parse(raw: &str, expected: DimensionClass) -> Result<Quantity, QuantityError> {
        let trimmed = raw.trim();
        let (number_str, suffix) = match trimmed.split_once(char::is_whitespace) {
            Some((n, rest)) => (n, rest.trim()),
            None => (trimmed, ""),
        };
        let number: f64 = number_str.parse().map_err(|_| QuantityError::Format {
            raw: raw.to_string(),
        })?;
        let unit = Unit::from_suffix(suffix).ok_or_else(|| QuantityError::UnknownUnit {
            raw: raw.to_string(),
            suffix: suffix.to_string(),
        })?;
        if !expected.accepts(unit) {
            return Err(QuantityError::UnitMismatch { unit, expected });
        }
        Ok(Quantity { number, unit })
    }

    /// Validate an already-tagged quantity against an expected dimension.
    pub fn check_dimension(self, expected: DimensionClass) -> Result<Quantity, QuantityError> {
        if !expected.accepts(self.unit) {
            return Err(QuantityError::UnitMismatch {
                unit: self.unit,
                expected,
            });
        }
        Ok(self)
    }
}

impl std::fmt::Display for Quantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let suffix = self.unit.suffix();
        if suffix.is_empty() {
            write!(f, "{}", self.number)
        } else {
            write!(f, "{} {}", self.number, suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_number_and_unit() {
        let q = Quantity::parse("12.5 um", DimensionClass::Length).unwrap();
        assert_eq!(q.number, 12.5);
        assert_eq!(q.unit, Unit::Um);
        assert_eq!(q.to_string(), "12.5 um");
    }

    #[test]
    fn parse_accepts_mm_for_length() {
        let q = Quantity::parse("0.2 mm", DimensionClass::Length).unwrap();
        assert_eq!(q.unit, Unit::Mm);
    }

    #[test]
    fn parse_bare_number_is_a_count() {
        let q = Quantity::parse("7", DimensionClass::Dimensionless).unwrap();
        assert_eq!(q.unit, Unit::Count);
        assert_eq!(q.number, 7.0);
    }

    #[test]
    fn parse_rejects_wrong_dimension() {
        let err = Quantity::parse("3.0 um", DimensionClass::Dimensionless).unwrap_err();
        assert!(matches!(err, QuantityError::UnitMismatch { .. }));
    }

    #[test]
    fn parse_rejects_unknown_unit() {
        let err = Quantity::parse("3.0 parsec", DimensionClass::Length).unwrap_err();
        assert!(matches!(err, QuantityError::UnknownUnit { .. }));
    }

    #[test]
    fn parse_rejects_non_numeric_prefix() {
        let err = Quantity::parse("three um", DimensionClass::Length).unwrap_err();
        assert!(matches!(err, QuantityError::Format { .. }));
    }

    #[test]
    fn dimension_inference_covers_the_feature_vocabulary() {
        assert_eq!(
            DimensionClass::of_feature("total_neurite_length"),
            DimensionClass::Length
        );
        assert_eq!(
            DimensionClass::of_feature("mean_soma_radii"),
            DimensionClass::Length
        );
        assert_eq!(
            DimensionClass::of_feature("total_section_area"),
            DimensionClass::Area
        );
        assert_eq!(
            DimensionClass::of_feature("total_soma_volume"),
            DimensionClass::Volume
        );
        assert_eq!(
            DimensionClass::of_feature("mean_remote_bifurcation_angle"),
            DimensionClass::Angle
        );
        assert_eq!(
            DimensionClass::of_feature("max_section_branch_order"),
            DimensionClass::Dimensionless
        );
        assert_eq!(
            DimensionClass::of_feature("total_number_of_neurites"),
            DimensionClass::Dimensionless
        );
    }
}
