//! Driving-distance resolution between the project site and facilities.
//!
//! Wraps an optional OSRM-compatible routing service. When no service is
//! configured, or a lookup fails, the resolver falls back to the great-circle
//! estimate from `geometry` so a ranking run never blocks on routing.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;

use crate::geometry;
use crate::model::{Facility, GeoPoint, Leg};
use crate::ranker::DistanceMap;

/// Assumed average driving speed for fallback duration estimates.
pub const DEFAULT_AVG_SPEED_KMH: f64 = 45.0;

/// Concurrent in-flight routing lookups during a prefill.
const ROUTING_CONCURRENCY: usize = 4;

/// Per-request timeout so a slow routing service cannot stall a run.
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Routing configuration, typically loaded from the environment.
#[derive(Clone, Debug)]
pub struct RoutingConfig {
    /// Base URL of an OSRM-compatible routing service; `None` disables routing
    /// and every leg falls back to the great-circle estimate.
    pub base_url: Option<String>,
    /// Average speed used by the fallback duration estimate.
    pub avg_speed_kmh: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            avg_speed_kmh: DEFAULT_AVG_SPEED_KMH,
        }
    }
}

/// Resolves driving legs for ranking runs.
pub struct RoutingClient {
    client: reqwest::Client,
    config: RoutingConfig,
}

#[derive(Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Deserialize)]
struct OsrmRoute {
    /// Metres.
    distance: f64,
    /// Seconds.
    duration: f64,
}

impl RoutingClient {
    /// Creates a routing client for the given configuration.
    pub fn new(config: RoutingConfig) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                eprintln!("⚠️ Could not build routing HTTP client: {}", e);
                reqwest::Client::default()
            }
        };
        Self { client, config }
    }

    /// Resolves a single driving leg.
    ///
    /// Prefers the configured routing service; any routing failure degrades to
    /// the great-circle estimate with a console warning.
    pub async fn resolve_leg(&self, origin: GeoPoint, destination: GeoPoint) -> Leg {
        if let Some(base_url) = &self.config.base_url {
            match self.fetch_route(base_url, origin, destination).await {
                Ok(leg) => return leg,
                Err(e) => {
                    eprintln!("⚠️ Routing lookup failed, using great-circle estimate: {}", e);
                }
            }
        }
        geometry::fallback_leg(origin, destination, self.config.avg_speed_kmh)
    }

    async fn fetch_route(
        &self,
        base_url: &str,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Leg, Box<dyn std::error::Error + Send + Sync>> {
        // OSRM expects lng,lat pairs.
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}?overview=false",
            base_url.trim_end_matches('/'),
            origin.lng,
            origin.lat,
            destination.lng,
            destination.lat
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: OsrmResponse = response.json().await?;
        if body.code != "Ok" {
            return Err(format!("routing service returned code '{}'", body.code).into());
        }
        let route = body
            .routes
            .first()
            .ok_or("routing service returned no routes")?;
        Ok(Leg {
            distance_km: route.distance / 1000.0,
            duration_min: route.duration / 60.0,
        })
    }

    /// Resolves legs from the project site to every geocoded facility.
    ///
    /// Facilities without valid coordinates are skipped; they stay eligible in
    /// the ranker but score worst on the distance criterion. Lookups run
    /// concurrently with a bounded in-flight count.
    pub async fn prefill_distances(
        &self,
        project: GeoPoint,
        facilities: &[Facility],
    ) -> DistanceMap {
        let targets: Vec<_> = facilities
            .iter()
            .filter_map(|facility| {
                let location = facility.location.filter(|l| l.is_valid())?;
                Some((facility.id.clone(), location))
            })
            .collect();

        stream::iter(targets)
            .map(|(id, location)| async move { (id, self.resolve_leg(project, location).await) })
            .buffer_unordered(ROUTING_CONCURRENCY)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn facility_at(id: &str, location: Option<GeoPoint>) -> Facility {
        Facility {
            id: id.to_string(),
            name: id.to_string(),
            partner_id: "p1".to_string(),
            location,
            accepted_streams: BTreeSet::new(),
            gate_fee_per_tonne: None,
            carbon_kg_per_tonne: None,
            typical_outcome: None,
        }
    }

    #[tokio::test]
    async fn resolve_leg_without_service_uses_great_circle_fallback() {
        let client = RoutingClient::new(RoutingConfig::default());
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);

        let leg = client.resolve_leg(a, b).await;
        let expected = geometry::fallback_leg(a, b, DEFAULT_AVG_SPEED_KMH);
        assert!((leg.distance_km - expected.distance_km).abs() < 1e-9);
        assert!((leg.duration_min - expected.duration_min).abs() < 1e-9);
    }

    #[tokio::test]
    async fn prefill_skips_ungeocoded_and_invalid_facilities() {
        let client = RoutingClient::new(RoutingConfig::default());
        let project = GeoPoint::new(-36.85, 174.76);
        let facilities = vec![
            facility_at("f-geo", Some(GeoPoint::new(-36.90, 174.80))),
            facility_at("f-none", None),
            facility_at("f-bad", Some(GeoPoint::new(123.0, 0.0))),
        ];

        let distances = client.prefill_distances(project, &facilities).await;
        assert_eq!(distances.len(), 1);
        assert!(distances.contains_key("f-geo"));
        assert!(distances["f-geo"].distance_km > 0.0);
    }
}
