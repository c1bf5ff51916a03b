//! REST API for the SWMP optimisation service.
//!
//! Provides HTTP endpoints for communication with the frontend.
//! Uses Axum as the web framework and supports CORS.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::{StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use utoipa::{OpenApi, ToSchema};

use crate::config::{ApiConfig, EngineConfig};
use crate::distance::{RoutingClient, RoutingConfig};
use crate::model::{
    Destination, Facility, GeoPoint, Leg, OptimiserWeights, OutcomeClass, Partner, QuantityUnit,
    ValidationError, WasteStreamPlan,
};
use crate::normalizer::{
    ConversionDefaults, DiversionSummary, OutcomeTotals, QuantityBasis, StreamTonnage,
    compute_diversion_summary,
};
use crate::ranker::{
    Alternative, DistanceMap, OptimiserResult, RankReason, rank_facilities_for_project,
    rank_facilities_for_project_with_progress,
};

#[derive(Clone)]
struct ApiState {
    engine_config: EngineConfig,
    defaults: ConversionDefaults,
    routing: Arc<RoutingClient>,
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes verified against https://unpkg.com/swagger-ui-dist@5.17.14/ on 2025-10-29.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>swmp-optimiser API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Embedded Web Assets (HTML, CSS, JS)
#[derive(RustEmbed)]
#[folder = "web/"]
struct WebAssets;

/// Request structure for the diversion-summary endpoint.
#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "streams": [
            {
                "category": "Timber (untreated)",
                "intended_outcome": "recycle",
                "estimated_qty": 4.0,
                "unit": "m3"
            },
            {
                "category": "Mixed C&D",
                "intended_outcome": "landfill",
                "manual_qty_tonnes": 10.0
            }
        ]
    })
)]
pub struct DiversionRequest {
    pub streams: Vec<WasteStreamPlan>,
}

/// Request structure for the optimiser endpoints.
///
/// `partners` carries the full facility catalog for the run; the engine never
/// reads facilities from anywhere else.
#[derive(Deserialize, ToSchema)]
#[schema(
    example = json!({
        "streams": [
            {
                "category": "Timber (untreated)",
                "intended_outcome": "recycle",
                "manual_qty_tonnes": 10.0
            }
        ],
        "partners": [
            {
                "id": "p-green",
                "name": "Green Gorilla",
                "facilities": [
                    {
                        "id": "f-1",
                        "name": "Timber Recovery Yard",
                        "partner_id": "p-green",
                        "location": { "lat": -36.92, "lng": 174.78 },
                        "accepted_streams": ["Timber (untreated)"],
                        "gate_fee_per_tonne": 85.0,
                        "typical_outcome": "recycle"
                    }
                ]
            }
        ],
        "project_location": { "lat": -36.85, "lng": 174.76 },
        "weights": { "distance": 0.4, "cost": 0.3, "carbon": 0.2, "diversion": 0.1 }
    })
)]
pub struct OptimiseRequest {
    pub streams: Vec<WasteStreamPlan>,
    pub partners: Vec<Partner>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub primary_partner_id: Option<String>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub project_location: Option<GeoPoint>,
    pub weights: OptimiserWeights,
}

#[derive(Debug)]
struct ValidatedOptimiseRequest {
    streams: Vec<WasteStreamPlan>,
    facilities_by_partner: BTreeMap<String, Vec<Facility>>,
    primary_partner_id: Option<String>,
    project_location: Option<GeoPoint>,
    weights: OptimiserWeights,
}

impl ValidatedOptimiseRequest {
    fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn facility_count(&self) -> usize {
        self.facilities_by_partner.values().map(Vec::len).sum()
    }

    fn all_facilities(&self) -> Vec<Facility> {
        self.facilities_by_partner
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
enum OptimiseRequestValidationError {
    InvalidWeights(ValidationError),
    InvalidFacility(ValidationError),
}

impl OptimiseRequest {
    fn into_validated(self) -> Result<ValidatedOptimiseRequest, OptimiseRequestValidationError> {
        self.weights
            .validate()
            .map_err(OptimiseRequestValidationError::InvalidWeights)?;

        for partner in &self.partners {
            for facility in &partner.facilities {
                facility
                    .validate()
                    .map_err(OptimiseRequestValidationError::InvalidFacility)?;
            }
        }

        let facilities_by_partner = self
            .partners
            .into_iter()
            .map(|partner| (partner.id, partner.facilities))
            .collect();

        Ok(ValidatedOptimiseRequest {
            streams: self.streams,
            facilities_by_partner,
            primary_partner_id: self.primary_partner_id,
            project_location: self.project_location,
            weights: self.weights,
        })
    }
}

/// Response structure for a full optimiser run.
///
/// # Fields
/// * `results` - one entry per requested stream, in request order
/// * `is_complete` - whether every stream received a recommendation
#[derive(Serialize, ToSchema)]
pub struct OptimiseResponse {
    pub results: Vec<OptimiserResult>,
    pub is_complete: bool,
}

impl OptimiseResponse {
    fn from_results(results: Vec<OptimiserResult>) -> Self {
        let is_complete = results
            .iter()
            .all(|r| r.recommended_facility_id.is_some());
        Self {
            results,
            is_complete,
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn parse_optimise_request(
    payload: Result<Json<OptimiseRequest>, JsonRejection>,
) -> Result<ValidatedOptimiseRequest, Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };

    match payload.into_validated() {
        Ok(validated) => Ok(validated),
        Err(OptimiseRequestValidationError::InvalidWeights(err)) => {
            Err(validation_error(err.to_string()))
        }
        Err(OptimiseRequestValidationError::InvalidFacility(err)) => {
            Err(validation_error(err.to_string()))
        }
    }
}

/// Resolves the distance map for a validated request.
///
/// Without a valid project location the map stays empty and the ranker skips
/// the distance criterion.
async fn resolve_distances(
    routing: &RoutingClient,
    request: &ValidatedOptimiseRequest,
) -> DistanceMap {
    match request.project_location.filter(|p| p.is_valid()) {
        Some(project) => {
            routing
                .prefill_distances(project, &request.all_facilities())
                .await
        }
        None => DistanceMap::new(),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handle_diversion, handle_optimise, handle_optimise_stream),
    components(
        schemas(
            DiversionRequest,
            DiversionSummary,
            StreamTonnage,
            OutcomeTotals,
            QuantityBasis,
            OptimiseRequest,
            OptimiseResponse,
            OptimiserResult,
            Alternative,
            RankReason,
            ErrorResponse,
            WasteStreamPlan,
            Facility,
            Partner,
            OptimiserWeights,
            GeoPoint,
            OutcomeClass,
            QuantityUnit,
            Destination,
            Leg
        )
    ),
    tags((name = "swmp", description = "Endpoints for waste-plan quantity normalization and facility ranking"))
)]
struct ApiDoc;

/// Starts the API server.
///
/// Configures CORS for cross-origin requests from the frontend.
/// Blocks until the server is terminated.
pub async fn start_api_server(
    config: ApiConfig,
    engine_config: EngineConfig,
    routing_config: RoutingConfig,
) {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let state = ApiState {
        engine_config,
        defaults: ConversionDefaults::default(),
        routing: Arc::new(RoutingClient::new(routing_config)),
    };

    let app = Router::new()
        // API endpoints
        .route("/diversion", post(handle_diversion))
        .route("/optimise", post(handle_optimise))
        .route("/optimise_stream", post(handle_optimise_stream))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        // Web-UI (embedded)
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_static))
        .layer(cors)
        .with_state(state);

    let addr = config.socket_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            panic!("❌ Could not bind API server to {}: {}", addr, err);
        }
    };

    let display_host = config.display_host().to_string();
    println!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.port()
    );
    if config.binds_to_all_interfaces() && config.uses_default_host() {
        println!("💡 Local access: http://localhost:{}", config.port());
    }
    println!("♻️ API Endpoints:");
    println!("   - POST /diversion");
    println!("   - POST /optimise");
    println!("   - POST /optimise_stream");
    println!("📑 Documentation:");
    println!("   - GET /docs");
    println!("   - GET /docs/openapi.json");
    println!("🌐 Web-UI: http://{}:{}", display_host, config.port());

    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("❌ API server terminated with an error: {err}");
    }
}

/// Handler for POST /diversion endpoint.
///
/// Normalizes every stream's quantity inputs to tonnes and aggregates the
/// project's diversion percentages.
///
/// # Parameters
/// * `payload` - JSON payload with the project's waste-stream plans
///
/// # Returns
/// JSON response with per-stream tonnages and project totals
#[utoipa::path(
    post,
    path = "/diversion",
    request_body = DiversionRequest,
    responses(
        (status = 200, description = "Aggregated diversion summary", body = DiversionSummary),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request data",
            body = ErrorResponse
        )
    ),
    tag = "swmp"
)]
async fn handle_diversion(
    State(state): State<ApiState>,
    payload: Result<Json<DiversionRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(err) => return json_deserialize_error(err),
    };

    println!(
        "📥 New diversion request: {} streams",
        request.streams.len()
    );
    let summary = compute_diversion_summary(&request.streams, &state.defaults);
    println!(
        "♻️ Result: {:.1} t total, diversion {}",
        summary.total_tonnes,
        summary
            .diversion_reuse_recycle_pct
            .map(|pct| format!("{:.1}%", pct))
            .unwrap_or_else(|| "n/a".to_string())
    );

    (StatusCode::OK, Json(summary)).into_response()
}

/// Handler for POST /optimise endpoint.
///
/// Ranks the partner facilities for every stream and recommends the best one
/// per stream with an explanation.
///
/// # Parameters
/// * `payload` - JSON payload with streams, partners, weights and project location
///
/// # Returns
/// JSON response with one ranking result per stream
#[utoipa::path(
    post,
    path = "/optimise",
    request_body = OptimiseRequest,
    responses(
        (status = 200, description = "Ranked facility recommendations", body = OptimiseResponse),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request data",
            body = ErrorResponse
        )
    ),
    tag = "swmp"
)]
async fn handle_optimise(
    State(state): State<ApiState>,
    payload: Result<Json<OptimiseRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_optimise_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    println!(
        "📥 New optimise request: {} streams, {} facilities",
        request.stream_count(),
        request.facility_count()
    );

    let distances = resolve_distances(&state.routing, &request).await;
    let results = rank_facilities_for_project(
        &request.streams,
        &request.facilities_by_partner,
        request.primary_partner_id.as_deref(),
        &distances,
        request.project_location,
        &request.weights,
        &state.defaults,
        &state.engine_config.ranker_config(),
    );

    let unmatched = results
        .iter()
        .filter(|r| r.recommended_facility_id.is_none())
        .count();
    println!(
        "🏭 Result: {} streams ranked, {} without a facility",
        results.len(),
        unmatched
    );

    let response = OptimiseResponse::from_results(results);
    (StatusCode::OK, Json(response)).into_response()
}

/// Handler for POST /optimise_stream endpoint (SSE).
///
/// Streams ranking events in real-time as Server-Sent Events (text/event-stream).
/// The frontend can visualize the per-stream progress without waiting for the
/// complete result.
#[utoipa::path(
    post,
    path = "/optimise_stream",
    request_body = OptimiseRequest,
    responses(
        (
            status = 200,
            description = "Streams ranking events in real-time",
            content_type = "text/event-stream",
            body = String
        ),
        (
            status = UNPROCESSABLE_ENTITY,
            description = "Invalid request data",
            body = ErrorResponse
        )
    ),
    tag = "swmp"
)]
async fn handle_optimise_stream(
    State(state): State<ApiState>,
    payload: Result<Json<OptimiseRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match parse_optimise_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let distances = resolve_distances(&state.routing, &request).await;

    let (tx, rx) = mpsc::channel::<String>(32);

    let defaults = state.defaults.clone();
    let ranker_config = state.engine_config.ranker_config();

    tokio::task::spawn_blocking(move || {
        let ValidatedOptimiseRequest {
            streams,
            facilities_by_partner,
            primary_partner_id,
            project_location,
            weights,
        } = request;

        let _ = rank_facilities_for_project_with_progress(
            &streams,
            &facilities_by_partner,
            primary_partner_id.as_deref(),
            &distances,
            project_location,
            &weights,
            &defaults,
            &ranker_config,
            |event| {
                if let Ok(json) = serde_json::to_string(event) {
                    // Receiver may have closed the stream; remaining events are discarded.
                    let _ = tx.blocking_send(json);
                }
            },
        );
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Serves the index.html main page
async fn serve_index() -> Response {
    match WebAssets::get("index.html") {
        Some(content) => Html(content.data).into_response(),
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

/// Serves static assets (JS, CSS, etc.)
async fn serve_static(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    match WebAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref())], content.data).into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}

async fn serve_openapi_json(State(_state): State<ApiState>) -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui(State(_state): State<ApiState>) -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_optimise_json(weights: &str) -> String {
        format!(
            r#"{{
                "streams": [
                    {{"category": "Timber (untreated)", "intended_outcome": "recycle", "manual_qty_tonnes": 2.0}}
                ],
                "partners": [
                    {{
                        "id": "p1",
                        "name": "Partner One",
                        "facilities": [
                            {{
                                "id": "f-1",
                                "name": "Yard",
                                "partner_id": "p1",
                                "accepted_streams": ["Timber (untreated)"]
                            }}
                        ]
                    }}
                ],
                "weights": {}
            }}"#,
            weights
        )
    }

    #[test]
    fn openapi_doc_lists_expected_paths() {
        let doc = openapi_doc();
        let paths = &doc.paths.paths;
        assert!(
            paths.contains_key("/diversion"),
            "OpenAPI documentation is missing the /diversion path"
        );
        assert!(
            paths.contains_key("/optimise"),
            "OpenAPI documentation is missing the /optimise path"
        );
        assert!(
            paths.contains_key("/optimise_stream"),
            "OpenAPI documentation is missing the /optimise_stream path"
        );
    }

    #[test]
    fn openapi_doc_contains_key_schemas() {
        let doc = openapi_doc();
        let components = doc
            .components
            .as_ref()
            .expect("OpenAPI documentation contains no components");
        let schemas = &components.schemas;
        for name in [
            "OptimiseRequest",
            "OptimiseResponse",
            "DiversionRequest",
            "DiversionSummary",
            "ErrorResponse",
        ] {
            assert!(
                schemas.contains_key(name),
                "Expected schema '{}' is missing from OpenAPI spec",
                name
            );
        }
    }

    #[test]
    fn optimise_request_parses_and_validates() {
        let json = minimal_optimise_json(
            r#"{"distance": 0.4, "cost": 0.3, "carbon": 0.2, "diversion": 0.1}"#,
        );
        let request: OptimiseRequest =
            serde_json::from_str(&json).expect("Should parse valid JSON");
        let validated = request
            .into_validated()
            .expect("Should validate successfully");
        assert_eq!(validated.stream_count(), 1);
        assert_eq!(validated.facility_count(), 1);
        assert!(validated.primary_partner_id.is_none());
    }

    #[test]
    fn optimise_request_rejects_out_of_range_weights() {
        let json = minimal_optimise_json(
            r#"{"distance": 1.5, "cost": 0.0, "carbon": 0.0, "diversion": 0.0}"#,
        );
        let request: OptimiseRequest =
            serde_json::from_str(&json).expect("Should parse valid JSON");
        let result = request.into_validated();
        assert!(
            matches!(result, Err(OptimiseRequestValidationError::InvalidWeights(_))),
            "Weights above 1 must be rejected"
        );
    }

    #[test]
    fn optimise_request_rejects_facility_with_bad_coordinates() {
        let json = r#"{
            "streams": [],
            "partners": [
                {
                    "id": "p1",
                    "name": "Partner One",
                    "facilities": [
                        {
                            "id": "f-1",
                            "name": "Yard",
                            "partner_id": "p1",
                            "location": {"lat": 123.0, "lng": 0.0},
                            "accepted_streams": []
                        }
                    ]
                }
            ],
            "weights": {"distance": 1.0, "cost": 0.0, "carbon": 0.0, "diversion": 0.0}
        }"#;
        let request: OptimiseRequest = serde_json::from_str(json).expect("Should parse valid JSON");
        let result = request.into_validated();
        assert!(matches!(
            result,
            Err(OptimiseRequestValidationError::InvalidFacility(_))
        ));
    }

    #[test]
    fn optimise_request_accepts_legacy_outcome_arrays() {
        let json = r#"{
            "streams": [
                {"category": "Mixed C&D", "intended_outcome": ["cleanfill", "landfill"]}
            ],
            "partners": [],
            "weights": {"distance": 0.0, "cost": 0.0, "carbon": 0.0, "diversion": 1.0}
        }"#;
        let request: OptimiseRequest = serde_json::from_str(json).expect("Should parse valid JSON");
        assert_eq!(
            request.streams[0].intended_outcome,
            OutcomeClass::Cleanfill
        );
    }

    #[test]
    fn response_completeness_reflects_unmatched_streams() {
        let matched = OptimiserResult {
            category: "Timber (untreated)".to_string(),
            recommended_facility_id: Some("f-1".to_string()),
            recommended_facility_name: Some("Yard".to_string()),
            score: Some(1.0),
            tonnes: 2.0,
            distance_km: None,
            duration_min: None,
            estimated_cost: None,
            estimated_carbon: None,
            alternatives: Vec::new(),
            used_partner_fallback: false,
            used_alphabetical_fallback: false,
            reason: RankReason {
                primary: "ok".to_string(),
                breakdown: Vec::new(),
                eligibility_count: 1,
                rank_by_distance: Some(1),
            },
        };
        let mut unmatched = matched.clone();
        unmatched.recommended_facility_id = None;

        assert!(OptimiseResponse::from_results(vec![matched.clone()]).is_complete);
        assert!(!OptimiseResponse::from_results(vec![matched, unmatched]).is_complete);
    }
}
