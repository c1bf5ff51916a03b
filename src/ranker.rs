//! Facility ranking for the SWMP optimiser.
//!
//! This module implements the weighted scoring engine that recommends a
//! disposal facility per waste stream, considering:
//! - eligibility (accepted stream categories, primary-contractor scoping)
//! - normalized distance, cost and carbon criteria
//! - a fixed waste-hierarchy ordinal for the diversion criterion
//! - deterministic tie-breaks and explainability metadata
//!
//! The ranker is pure and synchronous. Distances are consumed from a
//! pre-resolved leg map (see `distance`); a facility without a resolvable
//! distance stays eligible but scores worst on that criterion.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::model::{Facility, GeoPoint, Leg, OptimiserWeights, WasteStreamPlan, finite_non_negative};
use crate::normalizer::{ConversionDefaults, normalize_stream_tonnage};

/// Pre-resolved driving legs from the project site, keyed by facility id.
pub type DistanceMap = BTreeMap<String, Leg>;

/// Configuration for the ranking algorithm.
///
/// Contains the tie-break tolerance and the calibration constants that turn
/// facility metadata into raw criterion values.
#[derive(Copy, Clone, Debug)]
pub struct RankerConfig {
    /// Scores closer than this count as tied and fall through to the tie-break.
    pub score_epsilon: f64,
    /// Maximum number of runner-up facilities reported per stream.
    pub max_alternatives: usize,
    /// Transport emissions added per tonne-kilometre when a leg is known.
    pub transport_kg_per_tonne_km: f64,
}

impl RankerConfig {
    pub const DEFAULT_SCORE_EPSILON: f64 = 1e-9;
    pub const DEFAULT_MAX_ALTERNATIVES: usize = 3;
    pub const DEFAULT_TRANSPORT_KG_PER_TONNE_KM: f64 = 0.12;

    /// Creates a builder for a customized configuration.
    pub fn builder() -> RankerConfigBuilder {
        RankerConfigBuilder::default()
    }
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            score_epsilon: Self::DEFAULT_SCORE_EPSILON,
            max_alternatives: Self::DEFAULT_MAX_ALTERNATIVES,
            transport_kg_per_tonne_km: Self::DEFAULT_TRANSPORT_KG_PER_TONNE_KM,
        }
    }
}

/// Builder pattern for `RankerConfig`.
#[derive(Clone, Debug, Default)]
pub struct RankerConfigBuilder {
    config: Option<RankerConfig>,
}

impl RankerConfigBuilder {
    fn config(&mut self) -> &mut RankerConfig {
        self.config.get_or_insert_with(RankerConfig::default)
    }

    /// Sets the tie-break tolerance.
    pub fn score_epsilon(mut self, epsilon: f64) -> Self {
        self.config().score_epsilon = epsilon;
        self
    }

    /// Sets the runner-up cap.
    pub fn max_alternatives(mut self, count: usize) -> Self {
        self.config().max_alternatives = count;
        self
    }

    /// Sets the transport emissions factor (kg CO₂e per tonne-km).
    pub fn transport_kg_per_tonne_km(mut self, factor: f64) -> Self {
        self.config().transport_kg_per_tonne_km = factor;
        self
    }

    /// Builds the final configuration.
    pub fn build(mut self) -> RankerConfig {
        *self.config()
    }
}

/// Human-readable explanation of a recommendation.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct RankReason {
    /// One-sentence summary, including any fallback that was applied.
    pub primary: String,
    /// Per-criterion contribution bullets.
    pub breakdown: Vec<String>,
    /// Number of facilities that passed the eligibility filter.
    pub eligibility_count: usize,
    /// 1-based rank of the recommendation when ordering eligible facilities by
    /// raw distance alone; `None` when nothing was recommended.
    pub rank_by_distance: Option<usize>,
}

/// A runner-up facility with its own distance data.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Alternative {
    pub facility_id: String,
    pub name: String,
    pub score: f64,
    pub distance_km: Option<f64>,
    pub duration_min: Option<f64>,
}

/// Ranking outcome for one stream.
///
/// A stream with no eligible facility produces a result with
/// `recommended_facility_id = None` and an explaining reason, a per-stream
/// soft failure, never an error.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct OptimiserResult {
    pub category: String,
    pub recommended_facility_id: Option<String>,
    pub recommended_facility_name: Option<String>,
    /// Composite score in [0, 1], 1 = best; `None` without a recommendation.
    pub score: Option<f64>,
    /// Resolved stream tonnage the cost/carbon estimates are based on.
    pub tonnes: f64,
    pub distance_km: Option<f64>,
    pub duration_min: Option<f64>,
    pub estimated_cost: Option<f64>,
    pub estimated_carbon: Option<f64>,
    pub alternatives: Vec<Alternative>,
    pub used_partner_fallback: bool,
    pub used_alphabetical_fallback: bool,
    pub reason: RankReason,
}

/// Events emitted during a ranking run, enabling live visualization.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum RankEvent {
    /// A stream's eligibility filter has been evaluated.
    StreamStarted {
        category: String,
        eligibility_count: usize,
    },
    /// A stream has been ranked.
    StreamRanked {
        category: String,
        recommended_facility_id: Option<String>,
        score: Option<f64>,
        used_partner_fallback: bool,
    },
    /// Ranking finished.
    Finished { streams: usize, unmatched: usize },
}

/// Ranks the eligible facilities for a single stream.
///
/// The caller supplies the already-filtered eligible set and the stream's
/// resolved tonnage; partner scoping happens in `rank_facilities_for_project`.
///
/// # Parameters
/// * `stream` - the stream plan being ranked
/// * `tonnes` - resolved tonnage (see `normalizer::normalize_stream_tonnage`)
/// * `eligible` - facilities whose accepted streams contain the category
/// * `distances` - pre-resolved legs from the project site by facility id
/// * `project_location` - project coordinates; when absent, the distance
///   criterion is skipped for this run
/// * `weights` - per-criterion weights in [0, 1]
pub fn rank_facilities_for_stream(
    stream: &WasteStreamPlan,
    tonnes: f64,
    eligible: &[Facility],
    distances: &DistanceMap,
    project_location: Option<GeoPoint>,
    weights: &OptimiserWeights,
    config: &RankerConfig,
) -> OptimiserResult {
    rank_eligible(
        stream,
        tonnes,
        eligible,
        distances,
        project_location,
        weights,
        config,
        false,
    )
}

/// Ranks every stream of a project.
///
/// Facilities are scoped to the primary waste contractor when one is
/// designated; if that yields zero eligible facilities for a stream, the
/// filter falls back to all partners and the fallback is flagged in the
/// result. Streams are isolated from each other: one stream without any
/// eligible facility does not stop the run.
pub fn rank_facilities_for_project(
    streams: &[WasteStreamPlan],
    facilities_by_partner: &BTreeMap<String, Vec<Facility>>,
    primary_partner_id: Option<&str>,
    distances: &DistanceMap,
    project_location: Option<GeoPoint>,
    weights: &OptimiserWeights,
    defaults: &ConversionDefaults,
    config: &RankerConfig,
) -> Vec<OptimiserResult> {
    rank_facilities_for_project_with_progress(
        streams,
        facilities_by_partner,
        primary_partner_id,
        distances,
        project_location,
        weights,
        defaults,
        config,
        |_| {},
    )
}

/// Project ranking with a live progress callback.
///
/// Invokes the callback for every important step (suitable for SSE).
#[allow(clippy::too_many_arguments)]
pub fn rank_facilities_for_project_with_progress(
    streams: &[WasteStreamPlan],
    facilities_by_partner: &BTreeMap<String, Vec<Facility>>,
    primary_partner_id: Option<&str>,
    distances: &DistanceMap,
    project_location: Option<GeoPoint>,
    weights: &OptimiserWeights,
    defaults: &ConversionDefaults,
    config: &RankerConfig,
    mut on_event: impl FnMut(&RankEvent),
) -> Vec<OptimiserResult> {
    let mut results = Vec::with_capacity(streams.len());

    for stream in streams {
        let tonnes = normalize_stream_tonnage(stream, defaults).tonnes;
        let (eligible, used_partner_fallback) =
            scope_eligible(stream, facilities_by_partner, primary_partner_id);

        on_event(&RankEvent::StreamStarted {
            category: stream.category.clone(),
            eligibility_count: eligible.len(),
        });

        let result = rank_eligible(
            stream,
            tonnes,
            &eligible,
            distances,
            project_location,
            weights,
            config,
            used_partner_fallback,
        );

        on_event(&RankEvent::StreamRanked {
            category: result.category.clone(),
            recommended_facility_id: result.recommended_facility_id.clone(),
            score: result.score,
            used_partner_fallback: result.used_partner_fallback,
        });
        results.push(result);
    }

    on_event(&RankEvent::Finished {
        streams: results.len(),
        unmatched: results
            .iter()
            .filter(|r| r.recommended_facility_id.is_none())
            .count(),
    });
    results
}

/// Applies the eligibility filter with the primary-contractor fallback.
///
/// Returns the eligible facilities and whether the fallback beyond the primary
/// partner was taken.
fn scope_eligible(
    stream: &WasteStreamPlan,
    facilities_by_partner: &BTreeMap<String, Vec<Facility>>,
    primary_partner_id: Option<&str>,
) -> (Vec<Facility>, bool) {
    let all_eligible = || {
        facilities_by_partner
            .values()
            .flatten()
            .filter(|f| f.accepts(&stream.category))
            .cloned()
            .collect::<Vec<_>>()
    };

    match primary_partner_id {
        None => (all_eligible(), false),
        Some(partner_id) => {
            let primary: Vec<Facility> = facilities_by_partner
                .get(partner_id)
                .map(|facilities| {
                    facilities
                        .iter()
                        .filter(|f| f.accepts(&stream.category))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if primary.is_empty() {
                let widened = all_eligible();
                let fell_back = !widened.is_empty();
                (widened, fell_back)
            } else {
                (primary, false)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn rank_eligible(
    stream: &WasteStreamPlan,
    tonnes: f64,
    eligible: &[Facility],
    distances: &DistanceMap,
    project_location: Option<GeoPoint>,
    weights: &OptimiserWeights,
    config: &RankerConfig,
    used_partner_fallback: bool,
) -> OptimiserResult {
    debug_assert!(weights.validate().is_ok(), "weights must be validated");

    if eligible.is_empty() {
        return no_eligible_result(stream, tonnes);
    }

    let project = project_location.filter(|p| p.is_valid());
    let distance_scored = project.is_some();

    let legs: Vec<Option<Leg>> = eligible
        .iter()
        .map(|f| distances.get(&f.id).copied())
        .collect();

    let raw_distance: Vec<Option<f64>> = legs
        .iter()
        .map(|leg| leg.map(|l| l.distance_km))
        .collect();
    let raw_cost: Vec<Option<f64>> = eligible
        .iter()
        .map(|f| finite_non_negative(f.gate_fee_per_tonne).map(|fee| fee * tonnes))
        .collect();
    let raw_carbon: Vec<Option<f64>> = eligible
        .iter()
        .zip(&raw_distance)
        .map(|(f, distance)| {
            finite_non_negative(f.carbon_kg_per_tonne).map(|factor| {
                let transport = distance
                    .map(|km| config.transport_kg_per_tonne_km * tonnes * km)
                    .unwrap_or(0.0);
                factor * tonnes + transport
            })
        })
        .collect();
    let diversion_badness: Vec<f64> = eligible
        .iter()
        .map(|f| {
            f.typical_outcome
                .unwrap_or(stream.intended_outcome)
                .hierarchy_badness()
        })
        .collect();

    let norm_distance = normalize_criterion(&raw_distance);
    let norm_cost = normalize_criterion(&raw_cost);
    let norm_carbon = normalize_criterion(&raw_carbon);

    // A project without coordinates cannot compare distances; the criterion is
    // dropped for this run rather than poisoning the composite.
    let w_distance = if distance_scored { weights.distance } else { 0.0 };
    let weight_sum = w_distance + weights.cost + weights.carbon + weights.diversion;
    let alphabetical = weight_sum <= 0.0;

    let scores: Vec<f64> = if alphabetical {
        vec![1.0; eligible.len()]
    } else {
        (0..eligible.len())
            .map(|i| {
                let badness = (w_distance * norm_distance[i]
                    + weights.cost * norm_cost[i]
                    + weights.carbon * norm_carbon[i]
                    + weights.diversion * diversion_badness[i])
                    / weight_sum;
                1.0 - badness
            })
            .collect()
    };

    let mut order: Vec<usize> = (0..eligible.len()).collect();
    if alphabetical {
        order.sort_by(|&a, &b| {
            eligible[a]
                .name
                .cmp(&eligible[b].name)
                .then_with(|| eligible[a].id.cmp(&eligible[b].id))
        });
    } else {
        order.sort_by(|&a, &b| {
            match compare_with_epsilon(scores[a], scores[b], config.score_epsilon) {
                Ordering::Greater => Ordering::Less,
                Ordering::Less => Ordering::Greater,
                Ordering::Equal => {
                    let da = raw_distance[a].unwrap_or(f64::INFINITY);
                    let db = raw_distance[b].unwrap_or(f64::INFINITY);
                    da.partial_cmp(&db)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| eligible[a].id.cmp(&eligible[b].id))
                }
            }
        });
    }

    let best = order[0];
    let recommended = &eligible[best];

    let rank_by_distance = {
        let best_distance = raw_distance[best].unwrap_or(f64::INFINITY);
        let ahead = raw_distance
            .iter()
            .map(|d| d.unwrap_or(f64::INFINITY))
            .filter(|d| *d < best_distance)
            .count();
        Some(ahead + 1)
    };

    let alternatives: Vec<Alternative> = order
        .iter()
        .skip(1)
        .take(config.max_alternatives)
        .map(|&i| Alternative {
            facility_id: eligible[i].id.clone(),
            name: eligible[i].name.clone(),
            score: scores[i],
            distance_km: raw_distance[i],
            duration_min: legs[i].map(|l| l.duration_min),
        })
        .collect();

    let mut primary = if alphabetical {
        format!(
            "All criterion weights are zero; facilities for {} are ordered alphabetically by name.",
            stream.category
        )
    } else {
        format!(
            "{} ranks first of {} eligible facilities for {} (score {:.2}).",
            recommended.name,
            eligible.len(),
            stream.category,
            scores[best]
        )
    };
    if used_partner_fallback {
        primary.push_str(
            " No eligible facility from the primary contractor; the search was widened to all partners.",
        );
    }
    if !distance_scored && weights.distance > 0.0 {
        primary.push_str(" Project location is unknown, so distance was not scored.");
    }

    let breakdown = if alphabetical {
        Vec::new()
    } else {
        build_breakdown(
            weights,
            distance_scored,
            raw_distance[best],
            norm_distance[best],
            raw_cost[best],
            norm_cost[best],
            raw_carbon[best],
            norm_carbon[best],
            recommended,
            diversion_badness[best],
        )
    };

    OptimiserResult {
        category: stream.category.clone(),
        recommended_facility_id: Some(recommended.id.clone()),
        recommended_facility_name: Some(recommended.name.clone()),
        score: Some(scores[best]),
        tonnes,
        distance_km: raw_distance[best],
        duration_min: legs[best].map(|l| l.duration_min),
        estimated_cost: raw_cost[best],
        estimated_carbon: raw_carbon[best],
        alternatives,
        used_partner_fallback,
        used_alphabetical_fallback: alphabetical,
        reason: RankReason {
            primary,
            breakdown,
            eligibility_count: eligible.len(),
            rank_by_distance,
        },
    }
}

/// Normalizes raw criterion values to [0, 1] badness across the eligible set.
///
/// 0 = best, 1 = worst. Facilities without a value take the worst score; when
/// every present value ties (min == max), all present values normalize to 0.
/// A criterion with no data at all carries no signal and normalizes to 0
/// everywhere.
fn normalize_criterion(values: &[Option<f64>]) -> Vec<f64> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for value in values.iter().flatten() {
        min = min.min(*value);
        max = max.max(*value);
    }

    if !min.is_finite() {
        return vec![0.0; values.len()];
    }

    values
        .iter()
        .map(|value| match value {
            None => 1.0,
            Some(v) => {
                if max > min {
                    (v - min) / (max - min)
                } else {
                    0.0
                }
            }
        })
        .collect()
}

/// Per-criterion explanation bullets for the recommended facility.
#[allow(clippy::too_many_arguments)]
fn build_breakdown(
    weights: &OptimiserWeights,
    distance_scored: bool,
    distance: Option<f64>,
    norm_distance: f64,
    cost: Option<f64>,
    norm_cost: f64,
    carbon: Option<f64>,
    norm_carbon: f64,
    recommended: &Facility,
    diversion_badness: f64,
) -> Vec<String> {
    let mut bullets = Vec::new();

    if weights.distance > 0.0 {
        if !distance_scored {
            bullets.push("distance skipped: project location unknown".to_string());
        } else if let Some(km) = distance {
            bullets.push(format!(
                "distance: {:.1} km (normalized {:.2}, weight {:.2})",
                km, norm_distance, weights.distance
            ));
        } else {
            bullets.push(format!(
                "distance unavailable, scored worst (weight {:.2})",
                weights.distance
            ));
        }
    }

    if weights.cost > 0.0 {
        match cost {
            Some(value) => bullets.push(format!(
                "cost: {:.2} (normalized {:.2}, weight {:.2})",
                value, norm_cost, weights.cost
            )),
            None => bullets.push(format!(
                "cost unavailable, scored worst (weight {:.2})",
                weights.cost
            )),
        }
    }

    if weights.carbon > 0.0 {
        match carbon {
            Some(value) => bullets.push(format!(
                "carbon: {:.1} kg CO2e (normalized {:.2}, weight {:.2})",
                value, norm_carbon, weights.carbon
            )),
            None => bullets.push(format!(
                "carbon unavailable, scored worst (weight {:.2})",
                weights.carbon
            )),
        }
    }

    if weights.diversion > 0.0 {
        let outcome = recommended
            .typical_outcome
            .map(|o| o.label())
            .unwrap_or("per plan");
        bullets.push(format!(
            "diversion outcome {} (normalized {:.2}, weight {:.2})",
            outcome, diversion_badness, weights.diversion
        ));
    }

    bullets
}

/// Well-formed soft-failure result for a stream without eligible facilities.
fn no_eligible_result(stream: &WasteStreamPlan, tonnes: f64) -> OptimiserResult {
    OptimiserResult {
        category: stream.category.clone(),
        recommended_facility_id: None,
        recommended_facility_name: None,
        score: None,
        tonnes,
        distance_km: None,
        duration_min: None,
        estimated_cost: None,
        estimated_carbon: None,
        alternatives: Vec::new(),
        used_partner_fallback: false,
        used_alphabetical_fallback: false,
        reason: RankReason {
            primary: format!(
                "No eligible facility found for {}; add a partner or facility that accepts this stream.",
                stream.category
            ),
            breakdown: Vec::new(),
            eligibility_count: 0,
            rank_by_distance: None,
        },
    }
}

/// Compares two values with tolerance.
fn compare_with_epsilon(a: f64, b: f64, eps: f64) -> Ordering {
    if (a - b).abs() <= eps {
        Ordering::Equal
    } else if a < b {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}
