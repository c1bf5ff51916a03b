//! Data models for Site Waste Management Plans.
//!
//! This module defines the fundamental data structures shared by the
//! quantity normalizer and the facility ranker:
//! - `WasteStreamPlan`: one selected waste-stream category with its quantity inputs
//! - `Facility` / `Partner`: disposal sites and the contractors operating them
//! - `OptimiserWeights`: per-run criterion weights for the facility ranker
//!
//! All wire-facing structures derive serde and utoipa schemas so they can cross
//! the HTTP boundary as plain JSON.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

/// Validation error for incoming plan, facility or weight data.
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidWeights(String),
    InvalidFacility(String),
    InvalidConfiguration(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidWeights(msg) => write!(f, "Invalid weights: {}", msg),
            ValidationError::InvalidFacility(msg) => write!(f, "Invalid facility: {}", msg),
            ValidationError::InvalidConfiguration(msg) => {
                write!(f, "Invalid configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Disposal pathway of a waste stream, ordered down the waste hierarchy.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeClass {
    Reuse,
    Recycle,
    Cleanfill,
    Landfill,
}

impl OutcomeClass {
    /// Fixed ordinal badness on the waste hierarchy, in [0, 1].
    ///
    /// 0.0 = best (Reuse), 1.0 = worst (Landfill). Used directly as the
    /// normalized "diversion" criterion value; it is a lookup, not a derived
    /// metric.
    pub fn hierarchy_badness(&self) -> f64 {
        match self {
            OutcomeClass::Reuse => 0.0,
            OutcomeClass::Recycle => 1.0 / 3.0,
            OutcomeClass::Cleanfill => 2.0 / 3.0,
            OutcomeClass::Landfill => 1.0,
        }
    }

    /// Human-readable label for explanations.
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeClass::Reuse => "reuse",
            OutcomeClass::Recycle => "recycle",
            OutcomeClass::Cleanfill => "cleanfill",
            OutcomeClass::Landfill => "landfill",
        }
    }
}

/// Unit of a manually estimated quantity.
///
/// The recognized set is closed; any other unit string is rejected during
/// deserialization before it can reach the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuantityUnit {
    Kg,
    T,
    M3,
    M2,
    Skip,
    Load,
}

/// Geographic coordinates (WGS84).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Creates a new coordinate pair.
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Checks that both components are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Destination of a stream: a catalogued facility or a free-text site.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Destination {
    Facility {
        facility_id: String,
    },
    Custom {
        name: String,
        #[serde(default)]
        address: Option<String>,
        #[serde(default)]
        location: Option<GeoPoint>,
    },
}

/// One waste-stream plan within a project.
///
/// Quantity inputs are all optional; the normalizer resolves which basis is
/// authoritative (see `normalizer::QuantityBasis`). `distance_km` and
/// `duration_min` are cached outputs of an earlier distance lookup and may be
/// absent until computed.
///
/// # Fields
/// * `category` - waste-stream catalog key, unique within a project's plan set
/// * `intended_outcome` - single disposal pathway; legacy multi-valued arrays
///   are collapsed to their first element on deserialization
/// * `manual_qty_tonnes` - pre-resolved tonnage override
/// * `estimated_qty` / `unit` / `density_kg_per_m3` / `thickness_m` - raw
///   quantity entry converted by the normalizer
/// * `forecast_qty_tonnes` - externally supplied forecast-derived tonnage,
///   added on top of the manual basis
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WasteStreamPlan {
    pub category: String,
    #[serde(deserialize_with = "deserialize_outcome")]
    #[schema(value_type = OutcomeClass)]
    pub intended_outcome: OutcomeClass,
    #[serde(default)]
    pub manual_qty_tonnes: Option<f64>,
    #[serde(default)]
    pub estimated_qty: Option<f64>,
    #[serde(default)]
    pub unit: Option<QuantityUnit>,
    #[serde(default)]
    pub density_kg_per_m3: Option<f64>,
    #[serde(default)]
    pub thickness_m: Option<f64>,
    #[serde(default)]
    pub forecast_qty_tonnes: Option<f64>,
    #[serde(default)]
    pub destination: Option<Destination>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_min: Option<f64>,
}

/// Accepts either a single outcome or a legacy multi-select array.
///
/// Persisted historical data modeled `intended_outcomes` as an array; the
/// current model is single-valued, so arrays collapse to their first element
/// and the rest is discarded. An empty array is a hard error.
fn deserialize_outcome<'de, D>(deserializer: D) -> Result<OutcomeClass, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OutcomeField {
        Single(OutcomeClass),
        Legacy(Vec<OutcomeClass>),
    }

    match OutcomeField::deserialize(deserializer)? {
        OutcomeField::Single(outcome) => Ok(outcome),
        OutcomeField::Legacy(outcomes) => outcomes
            .into_iter()
            .next()
            .ok_or_else(|| serde::de::Error::custom("intended_outcome array must not be empty")),
    }
}

/// A disposal or recycling site belonging to a partner.
///
/// Read-only from the engine's perspective; lifecycle management happens in an
/// administrative surface elsewhere.
///
/// # Fields
/// * `accepted_streams` - waste-stream categories the site can take
/// * `location` - nullable until geocoded; a facility without coordinates is
///   still eligible but scores worst on distance
/// * `gate_fee_per_tonne` / `carbon_kg_per_tonne` - optional cost and process
///   carbon metadata used by the ranker
/// * `typical_outcome` - what the site does with accepted material, feeding
///   the diversion criterion
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Facility {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub partner_id: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub accepted_streams: BTreeSet<String>,
    #[serde(default)]
    pub gate_fee_per_tonne: Option<f64>,
    #[serde(default)]
    pub carbon_kg_per_tonne: Option<f64>,
    #[serde(default)]
    pub typical_outcome: Option<OutcomeClass>,
}

impl Facility {
    /// Checks whether the facility accepts the given stream category.
    #[inline]
    pub fn accepts(&self, category: &str) -> bool {
        self.accepted_streams.contains(category)
    }

    /// Validates facility metadata that would otherwise corrupt a ranking run.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::InvalidFacility(
                "facility id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFacility(format!(
                "facility '{}' has an empty name",
                self.id
            )));
        }
        if let Some(location) = &self.location {
            if !location.is_valid() {
                return Err(ValidationError::InvalidFacility(format!(
                    "facility '{}' has out-of-range coordinates",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// A waste-contractor organization owning zero or more facilities.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Partner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub facilities: Vec<Facility>,
}

/// Per-run criterion weights for the facility ranker, each in [0, 1].
///
/// Supplied by the user with every optimiser run; never persisted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema)]
pub struct OptimiserWeights {
    pub distance: f64,
    pub cost: f64,
    pub carbon: f64,
    pub diversion: f64,
}

impl OptimiserWeights {
    /// Validates that every weight is finite and within [0, 1].
    ///
    /// Negative or out-of-range weights are programmer errors and rejected
    /// loudly at the boundary rather than silently clamped.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("distance", self.distance),
            ("cost", self.cost),
            ("carbon", self.carbon),
            ("diversion", self.diversion),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ValidationError::InvalidWeights(format!(
                    "{} weight must be within [0, 1], got: {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Sum of all four weights.
    #[inline]
    pub fn sum(&self) -> f64 {
        self.distance + self.cost + self.carbon + self.diversion
    }
}

/// A resolved distance lookup between the project site and a destination.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Leg {
    pub distance_km: f64,
    pub duration_min: f64,
}

/// Clamps a numeric input to `None` unless it is finite and non-negative.
///
/// Negative or non-finite quantities are treated as absent (not zero) so they
/// cannot silently corrupt aggregated totals.
#[inline]
pub fn finite_non_negative(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_badness_follows_waste_hierarchy() {
        assert!(
            OutcomeClass::Reuse.hierarchy_badness() < OutcomeClass::Recycle.hierarchy_badness()
        );
        assert!(
            OutcomeClass::Recycle.hierarchy_badness()
                < OutcomeClass::Cleanfill.hierarchy_badness()
        );
        assert!(
            OutcomeClass::Cleanfill.hierarchy_badness()
                < OutcomeClass::Landfill.hierarchy_badness()
        );
        assert_eq!(OutcomeClass::Reuse.hierarchy_badness(), 0.0);
        assert_eq!(OutcomeClass::Landfill.hierarchy_badness(), 1.0);
    }

    #[test]
    fn plan_parses_single_outcome() {
        let json = r#"{"category": "Timber (untreated)", "intended_outcome": "recycle"}"#;
        let plan: WasteStreamPlan = serde_json::from_str(json).expect("Should parse valid JSON");
        assert_eq!(plan.intended_outcome, OutcomeClass::Recycle);
        assert!(plan.manual_qty_tonnes.is_none());
    }

    #[test]
    fn plan_collapses_legacy_outcome_array_to_first() {
        let json = r#"{
            "category": "Mixed C&D",
            "intended_outcome": ["cleanfill", "landfill", "recycle"]
        }"#;
        let plan: WasteStreamPlan = serde_json::from_str(json).expect("Should parse valid JSON");
        assert_eq!(
            plan.intended_outcome,
            OutcomeClass::Cleanfill,
            "Legacy arrays collapse to their first element"
        );
    }

    #[test]
    fn plan_rejects_empty_outcome_array() {
        let json = r#"{"category": "Mixed C&D", "intended_outcome": []}"#;
        let result: Result<WasteStreamPlan, _> = serde_json::from_str(json);
        assert!(result.is_err(), "Empty outcome arrays must not deserialize");
    }

    #[test]
    fn plan_rejects_unknown_unit() {
        let json = r#"{
            "category": "Metals",
            "intended_outcome": "recycle",
            "estimated_qty": 3.0,
            "unit": "bales"
        }"#;
        let result: Result<WasteStreamPlan, _> = serde_json::from_str(json);
        assert!(result.is_err(), "Unknown unit strings must fail loudly");
    }

    #[test]
    fn weights_validation_rejects_negative_and_nan() {
        let valid = OptimiserWeights {
            distance: 0.5,
            cost: 0.3,
            carbon: 0.2,
            diversion: 0.0,
        };
        assert!(valid.validate().is_ok());

        let negative = OptimiserWeights {
            distance: -0.1,
            ..valid
        };
        assert!(negative.validate().is_err());

        let oversized = OptimiserWeights { cost: 1.5, ..valid };
        assert!(oversized.validate().is_err());

        let nan = OptimiserWeights {
            carbon: f64::NAN,
            ..valid
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn geo_point_validity_bounds() {
        assert!(GeoPoint::new(-36.8485, 174.7633).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn finite_non_negative_clamps_to_absent() {
        assert_eq!(finite_non_negative(Some(4.5)), Some(4.5));
        assert_eq!(finite_non_negative(Some(0.0)), Some(0.0));
        assert_eq!(finite_non_negative(Some(-1.0)), None);
        assert_eq!(finite_non_negative(Some(f64::NAN)), None);
        assert_eq!(finite_non_negative(Some(f64::INFINITY)), None);
        assert_eq!(finite_non_negative(None), None);
    }

    #[test]
    fn facility_validation_catches_bad_coordinates() {
        let facility = Facility {
            id: "f1".to_string(),
            name: "Northgate Transfer Station".to_string(),
            partner_id: "p1".to_string(),
            location: Some(GeoPoint::new(123.0, 0.0)),
            accepted_streams: BTreeSet::new(),
            gate_fee_per_tonne: None,
            carbon_kg_per_tonne: None,
            typical_outcome: None,
        };
        assert!(facility.validate().is_err());
    }
}
