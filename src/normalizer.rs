//! Quantity normalization and diversion aggregation.
//!
//! This module implements the tonnage engine for a project's waste streams:
//! - converts heterogeneous quantity inputs (mass, volume, area-with-thickness,
//!   manual override, forecast-derived tonnes) into a common tonnage basis
//! - aggregates per-outcome tonnages into diversion and landfill-avoidance
//!   percentages
//!
//! The engine is pure and synchronous: it takes an immutable snapshot of plans
//! plus a `ConversionDefaults` calibration table and returns a new summary.
//! Unresolvable quantities are soft conditions surfaced as flags, never errors.

use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{OutcomeClass, QuantityUnit, WasteStreamPlan, finite_non_negative};

/// Calibration table for unit conversion.
///
/// Contains the per-category density lookup and the skip/load average-tonnes
/// constants. These are calibration values, not physics; they are passed into
/// the normalizer explicitly so tests can override them and so category
/// lookups fall back to a documented generic default instead of silently
/// missing.
#[derive(Clone, Debug)]
pub struct ConversionDefaults {
    densities: BTreeMap<String, f64>,
    generic_density: f64,
    skip_tonnes: f64,
    load_tonnes: f64,
}

impl ConversionDefaults {
    /// Generic density in kg/m³ for categories missing from the lookup table.
    pub const DEFAULT_GENERIC_DENSITY: f64 = 500.0;
    /// Average tonnes per skip bin.
    pub const DEFAULT_SKIP_TONNES: f64 = 1.5;
    /// Average tonnes per truck load.
    pub const DEFAULT_LOAD_TONNES: f64 = 8.0;

    /// Default densities in kg/m³ per waste-stream category.
    const DEFAULT_DENSITIES: &'static [(&'static str, f64)] = &[
        ("Concrete / masonry", 2400.0),
        ("Asphalt", 2350.0),
        ("Soil / rubble", 1600.0),
        ("Timber (untreated)", 600.0),
        ("Timber (treated)", 650.0),
        ("Plasterboard", 950.0),
        ("Metals", 2700.0),
        ("Glass", 2500.0),
        ("Plastics", 300.0),
        ("Cardboard / paper", 150.0),
        ("Mixed C&D", 500.0),
    ];

    /// Creates a builder for a customized calibration table.
    pub fn builder() -> ConversionDefaultsBuilder {
        ConversionDefaultsBuilder::default()
    }

    /// Density in kg/m³ for a stream category.
    ///
    /// Unknown categories fall back to the generic default rather than
    /// returning nothing.
    pub fn density_for(&self, category: &str) -> f64 {
        self.densities
            .get(category)
            .copied()
            .unwrap_or(self.generic_density)
    }

    /// Average tonnes per skip bin.
    #[inline]
    pub fn skip_tonnes(&self) -> f64 {
        self.skip_tonnes
    }

    /// Average tonnes per truck load.
    #[inline]
    pub fn load_tonnes(&self) -> f64 {
        self.load_tonnes
    }
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            densities: Self::DEFAULT_DENSITIES
                .iter()
                .map(|(category, density)| (category.to_string(), *density))
                .collect(),
            generic_density: Self::DEFAULT_GENERIC_DENSITY,
            skip_tonnes: Self::DEFAULT_SKIP_TONNES,
            load_tonnes: Self::DEFAULT_LOAD_TONNES,
        }
    }
}

/// Builder for `ConversionDefaults`.
#[derive(Clone, Debug, Default)]
pub struct ConversionDefaultsBuilder {
    defaults: Option<ConversionDefaults>,
}

impl ConversionDefaultsBuilder {
    fn defaults(&mut self) -> &mut ConversionDefaults {
        self.defaults.get_or_insert_with(ConversionDefaults::default)
    }

    /// Overrides or adds the density for one category (kg/m³).
    pub fn density(mut self, category: impl Into<String>, kg_per_m3: f64) -> Self {
        self.defaults().densities.insert(category.into(), kg_per_m3);
        self
    }

    /// Sets the generic fallback density (kg/m³).
    pub fn generic_density(mut self, kg_per_m3: f64) -> Self {
        self.defaults().generic_density = kg_per_m3;
        self
    }

    /// Sets the average tonnes per skip bin.
    pub fn skip_tonnes(mut self, tonnes: f64) -> Self {
        self.defaults().skip_tonnes = tonnes;
        self
    }

    /// Sets the average tonnes per truck load.
    pub fn load_tonnes(mut self, tonnes: f64) -> Self {
        self.defaults().load_tonnes = tonnes;
        self
    }

    /// Builds the final calibration table.
    pub fn build(mut self) -> ConversionDefaults {
        self.defaults().clone()
    }
}

/// Which quantity input was authoritative for a stream's base tonnage.
///
/// Resolution is a single exhaustive match over the precedence rule:
/// a manual tonnes override wins, then a unit-converted estimate, then a
/// forecast-only stream, then nothing. Forecast tonnage is additive on top of
/// the manual/converted basis, so `ForecastDerived` is only reported when no
/// other basis exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuantityBasis {
    ManualTonnesOverride,
    UnitConverted,
    ForecastDerived,
    None,
}

/// Resolved tonnage for one stream, with its soft-condition flags.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct StreamTonnage {
    pub category: String,
    pub outcome: OutcomeClass,
    /// Total tonnage contributed to aggregation; never negative.
    pub tonnes: f64,
    pub basis: QuantityBasis,
    pub missing_quantity: bool,
    pub missing_thickness: bool,
}

/// Tonnage totals per disposal outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct OutcomeTotals {
    pub reuse: f64,
    pub recycle: f64,
    pub cleanfill: f64,
    pub landfill: f64,
}

impl OutcomeTotals {
    fn add(&mut self, outcome: OutcomeClass, tonnes: f64) {
        match outcome {
            OutcomeClass::Reuse => self.reuse += tonnes,
            OutcomeClass::Recycle => self.recycle += tonnes,
            OutcomeClass::Cleanfill => self.cleanfill += tonnes,
            OutcomeClass::Landfill => self.landfill += tonnes,
        }
    }

    /// Sum over all outcome buckets.
    pub fn total(&self) -> f64 {
        self.reuse + self.recycle + self.cleanfill + self.landfill
    }
}

/// Aggregated diversion metrics for a project, recomputed on demand.
///
/// Percentages are `None` when the total tonnage is zero so the caller can
/// render "—" instead of a division by zero. Values are kept at full floating
/// point precision; rounding happens at presentation time only.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct DiversionSummary {
    pub total_tonnes: f64,
    pub totals: OutcomeTotals,
    /// 100 · (Reuse + Recycle) / total, or `None` when the total is zero.
    pub diversion_reuse_recycle_pct: Option<f64>,
    /// 100 · (Reuse + Recycle + Cleanfill) / total, or `None` when the total is zero.
    pub landfill_avoidance_pct: Option<f64>,
    pub missing_quantity_streams: Vec<String>,
    pub missing_thickness_streams: Vec<String>,
    pub streams: Vec<StreamTonnage>,
}

/// Resolves a single stream plan to a canonical tonnage.
///
/// Precedence (highest first): a non-negative `manual_qty_tonnes` override,
/// then a unit-converted `estimated_qty`, otherwise zero. A non-negative
/// `forecast_qty_tonnes` is added on top of that basis, not treated as an
/// alternative. Negative and non-finite inputs count as absent.
///
/// # Parameters
/// * `plan` - the stream plan to resolve
/// * `defaults` - density and skip/load calibration table
///
/// # Returns
/// The resolved tonnage with `missing_quantity` / `missing_thickness` flags.
pub fn normalize_stream_tonnage(
    plan: &WasteStreamPlan,
    defaults: &ConversionDefaults,
) -> StreamTonnage {
    let manual = finite_non_negative(plan.manual_qty_tonnes);
    let forecast = finite_non_negative(plan.forecast_qty_tonnes);
    let estimate = finite_non_negative(plan.estimated_qty);

    let mut missing_thickness = false;

    let (base_tonnes, basis) = match (manual, estimate.zip(plan.unit)) {
        (Some(tonnes), _) => (tonnes, QuantityBasis::ManualTonnesOverride),
        (None, Some((qty, unit))) => {
            let tonnes = convert_to_tonnes(qty, unit, plan, defaults, &mut missing_thickness);
            (tonnes, QuantityBasis::UnitConverted)
        }
        (None, None) => match forecast {
            Some(_) => (0.0, QuantityBasis::ForecastDerived),
            None => (0.0, QuantityBasis::None),
        },
    };

    let missing_quantity = matches!(basis, QuantityBasis::None);
    let tonnes = base_tonnes + forecast.unwrap_or(0.0);

    StreamTonnage {
        category: plan.category.clone(),
        outcome: plan.intended_outcome,
        tonnes,
        basis,
        missing_quantity,
        missing_thickness,
    }
}

/// Converts an estimated quantity to tonnes by unit.
///
/// Area units require a thickness; without one the stream contributes zero and
/// the `missing_thickness` flag is raised (a soft warning, not an error).
fn convert_to_tonnes(
    qty: f64,
    unit: QuantityUnit,
    plan: &WasteStreamPlan,
    defaults: &ConversionDefaults,
    missing_thickness: &mut bool,
) -> f64 {
    let density = finite_non_negative(plan.density_kg_per_m3)
        .filter(|d| *d > 0.0)
        .unwrap_or_else(|| defaults.density_for(&plan.category));

    match unit {
        QuantityUnit::T => qty,
        QuantityUnit::Kg => qty / 1000.0,
        QuantityUnit::M3 => qty * density / 1000.0,
        QuantityUnit::M2 => match finite_non_negative(plan.thickness_m).filter(|t| *t > 0.0) {
            Some(thickness) => qty * thickness * density / 1000.0,
            None => {
                *missing_thickness = true;
                0.0
            }
        },
        QuantityUnit::Skip => qty * defaults.skip_tonnes(),
        QuantityUnit::Load => qty * defaults.load_tonnes(),
    }
}

/// Aggregates all stream tonnages of a project into a diversion summary.
///
/// Each stream is resolved independently; a stream without a resolvable
/// quantity contributes zero but is still listed, so one malformed record can
/// never blank out the whole summary.
///
/// # Parameters
/// * `plans` - immutable snapshot of the project's stream plans
/// * `defaults` - density and skip/load calibration table
pub fn compute_diversion_summary(
    plans: &[WasteStreamPlan],
    defaults: &ConversionDefaults,
) -> DiversionSummary {
    let mut totals = OutcomeTotals::default();
    let mut streams = Vec::with_capacity(plans.len());
    let mut missing_quantity_streams = Vec::new();
    let mut missing_thickness_streams = Vec::new();

    for plan in plans {
        let resolved = normalize_stream_tonnage(plan, defaults);
        totals.add(resolved.outcome, resolved.tonnes);
        if resolved.missing_quantity {
            missing_quantity_streams.push(resolved.category.clone());
        }
        if resolved.missing_thickness {
            missing_thickness_streams.push(resolved.category.clone());
        }
        streams.push(resolved);
    }

    let total_tonnes = totals.total();
    let pct = |part: f64| {
        if total_tonnes > 0.0 {
            Some(100.0 * part / total_tonnes)
        } else {
            None
        }
    };

    DiversionSummary {
        total_tonnes,
        diversion_reuse_recycle_pct: pct(totals.reuse + totals.recycle),
        landfill_avoidance_pct: pct(totals.reuse + totals.recycle + totals.cleanfill),
        totals,
        missing_quantity_streams,
        missing_thickness_streams,
        streams,
    }
}
