//! Traffic data, report, prediction, and route handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::{
    base::types::{Density, FlowLevel},
    geo::{BoundingBox, Point, city_keys, find_city},
    service::{
        db::{RouteRecord, TrafficDataRecord, TrafficPredictionRecord, TrafficReportRecord, record_key},
        llm::{AnalysisContext, DetailedAnalysisContext},
    },
    runtime::Runtime,
};

use super::{ApiError, ApiResult, CurrentUser};

/// Analysis radius for summaries and the default for detailed reports, in kilometers.
const DEFAULT_RADIUS_KM: f64 = 10.0;

// Request bodies.

#[derive(Debug, Deserialize)]
pub struct CityQuery {
    #[serde(default)]
    pub city: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    pub location: String,
    #[serde(default = "default_report_type")]
    pub report_type: String,
    #[serde(default)]
    pub use_current_location: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius_km: Option<f64>,
}

fn default_report_type() -> String {
    "traffic_summary".to_string()
}

#[derive(Debug, Deserialize)]
pub struct TrafficDataBody {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub density: Density,
    #[serde(default)]
    pub flow: FlowLevel,
    pub speed: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PredictionBody {
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub predicted_density: Density,
    pub predicted_flow: FlowLevel,
    pub predicted_speed: f64,
    pub confidence: f64,
    pub prediction_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouteBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_location: String,
    pub end_location: String,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: f64,
    pub end_longitude: f64,
    pub distance: f64,
    pub estimated_time: u32,
}

#[derive(Debug, Deserialize)]
pub struct OptimizeRouteRequest {
    pub start_location: Option<String>,
    pub end_location: Option<String>,
}

// Helpers.

fn require_city(city: &str) -> Result<&'static crate::geo::CityInfo, ApiError> {
    find_city(city).ok_or_else(|| ApiError::BadRequest(format!("City {city} not supported. Available cities: {:?}", city_keys())))
}

fn report_json(report: &TrafficReportRecord) -> Value {
    json!({
        "id": record_key(&report.id),
        "title": report.title,
        "report_type": report.report_type,
        "location": report.location,
        "latitude": report.latitude,
        "longitude": report.longitude,
        "traffic_data": report.traffic_data,
        "ai_analysis": report.ai_analysis,
        "ai_recommendations": report.ai_recommendations,
        "congestion_level": report.congestion_level,
        "avg_speed": report.avg_speed,
        "incident_count": report.incident_count,
        "generated_by": report.generated_by,
        "created_at": report.created_at,
    })
}

fn traffic_data_json(data: &TrafficDataRecord) -> Value {
    json!({
        "id": record_key(&data.id),
        "location": data.location,
        "latitude": data.latitude,
        "longitude": data.longitude,
        "density": data.density,
        "flow": data.flow,
        "speed": data.speed,
        "timestamp": data.timestamp,
        "created_at": data.created_at,
    })
}

fn prediction_json(prediction: &TrafficPredictionRecord) -> Value {
    json!({
        "id": record_key(&prediction.id),
        "location": prediction.location,
        "latitude": prediction.latitude,
        "longitude": prediction.longitude,
        "predicted_density": prediction.predicted_density,
        "predicted_flow": prediction.predicted_flow,
        "predicted_speed": prediction.predicted_speed,
        "confidence": prediction.confidence,
        "prediction_time": prediction.prediction_time,
        "created_at": prediction.created_at,
    })
}

fn route_json(route: &RouteRecord) -> Value {
    json!({
        "id": record_key(&route.id),
        "name": route.name,
        "description": route.description,
        "start_location": route.start_location,
        "end_location": route.end_location,
        "start_latitude": route.start_latitude,
        "start_longitude": route.start_longitude,
        "end_latitude": route.end_latitude,
        "end_longitude": route.end_longitude,
        "distance": route.distance,
        "estimated_time": route.estimated_time,
        "created_at": route.created_at,
        "updated_at": route.updated_at,
    })
}

/// Resolve coordinates for a report request: explicit, device, geocoded, or known-city.
async fn resolve_report_coordinates(runtime: &Runtime, body: &GenerateReportRequest) -> ApiResult<Point> {
    if body.use_current_location {
        // Device geolocation is not wired up; default to the capital.
        return Ok(crate::geo::CITIES[0].center);
    }

    if let (Some(lat), Some(lon)) = (body.latitude, body.longitude) {
        return Ok(Point::new(lat, lon));
    }

    runtime
        .traffic
        .resolve_coordinates(&body.location)
        .await
        .ok_or_else(|| ApiError::BadRequest("Coordinates could not be determined for location".to_string()))
}

// Live data handlers.

/// Live flow segment data for a supported city.
#[instrument(skip_all)]
pub async fn live(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<CityQuery>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let city = require_city(&query.city)?;

    let traffic_data = match runtime.traffic.flow_segment(city.center).await {
        Ok(data) => data,
        Err(err) => {
            warn!("Error fetching live traffic data for {}: {err}", city.key);
            return Err(ApiError::Internal(anyhow::anyhow!("Failed to fetch live traffic data")));
        }
    };

    let timestamp = traffic_data
        .get("flowSegmentData")
        .and_then(|s| s.get("currentTime"))
        .cloned()
        .unwrap_or_else(|| json!(""));

    Ok(Json(json!({
        "city": city.name,
        "coordinates": [city.center.lon, city.center.lat],
        "traffic_flow": traffic_data,
        "timestamp": timestamp,
    })))
}

/// Dashboard traffic summary for a supported city.
#[instrument(skip_all)]
pub async fn summary(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<CityQuery>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let city = require_city(&query.city)?;

    let summary = runtime.traffic.city_summary(city.center, DEFAULT_RADIUS_KM).await;

    Ok(Json(serde_json::to_value(summary).map_err(anyhow::Error::from)?))
}

/// Raw live incident list for a supported city.
#[instrument(skip_all)]
pub async fn incidents(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<CityQuery>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let city = require_city(&query.city)?;
    let bbox = BoundingBox::around(city.center, DEFAULT_RADIUS_KM);

    let incidents_data = match runtime.traffic.incidents(&bbox, None).await {
        Ok(data) => data,
        Err(err) => {
            warn!("Error fetching incidents for {}: {err}", city.key);
            return Err(ApiError::Internal(anyhow::anyhow!("Failed to fetch traffic incidents")));
        }
    };

    Ok(Json(incidents_data.get("incidents").cloned().unwrap_or_else(|| json!([]))))
}

// Report handlers.

/// Generate a traffic report for a location.
#[instrument(skip_all)]
pub async fn generate_report(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<GenerateReportRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["reports:generate"])?;

    if body.location.is_empty() {
        return Err(ApiError::BadRequest("location is required".to_string()));
    }

    let point = resolve_report_coordinates(&runtime, &body).await?;

    // Upstream failures degrade to empty data; the analyzer falls back to
    // heuristics rather than failing report generation.
    let traffic_data = runtime.traffic.flow_segment(point).await.unwrap_or_else(|err| {
        warn!("Flow fetch failed for report: {err}");
        json!({})
    });
    let incidents_data = runtime.traffic.incidents(&BoundingBox::around(point, 0.0), None).await.unwrap_or_else(|err| {
        warn!("Incident fetch failed for report: {err}");
        json!({})
    });

    let analysis = runtime
        .llm
        .analyze_traffic(&AnalysisContext {
            location: body.location.clone(),
            traffic_data: traffic_data.clone(),
            incidents_data: incidents_data.clone(),
        })
        .await?;

    let report = TrafficReportRecord {
        id: None,
        title: format!("Traffic Report for {}", body.location),
        report_type: body.report_type,
        location: body.location,
        latitude: point.lat,
        longitude: point.lon,
        traffic_data,
        ai_analysis: analysis.analysis,
        ai_recommendations: analysis.recommendations,
        congestion_level: analysis.congestion_level,
        avg_speed: analysis.avg_speed,
        incident_count: analysis.incident_count,
        generated_by: Some(current.username().to_string()),
        created_at: Utc::now(),
    };
    let report = runtime.db.create_report(&report).await?;

    Ok((StatusCode::CREATED, Json(report_json(&report))))
}

/// Generate a comprehensive multi-point traffic report.
#[instrument(skip_all)]
pub async fn generate_detailed_report(
    State(runtime): State<Runtime>,
    Extension(current): Extension<CurrentUser>,
    Json(body): Json<GenerateReportRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["reports:generate"])?;

    if body.location.is_empty() {
        return Err(ApiError::BadRequest("location is required".to_string()));
    }

    let point = resolve_report_coordinates(&runtime, &body).await?;
    let radius_km = body.radius_km.unwrap_or(DEFAULT_RADIUS_KM);

    let detailed_data = runtime.traffic.detailed_traffic_report(point, radius_km).await;

    let analysis = runtime
        .llm
        .analyze_detailed_traffic(&DetailedAnalysisContext {
            location: body.location.clone(),
            detailed_data: detailed_data.clone(),
        })
        .await?;

    let sampling_points = detailed_data.get("traffic_flow_points").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);

    let report = TrafficReportRecord {
        id: None,
        title: format!("Detailed Traffic Report for {}", body.location),
        report_type: body.report_type,
        location: body.location,
        latitude: point.lat,
        longitude: point.lon,
        traffic_data: detailed_data,
        ai_analysis: analysis.analysis,
        ai_recommendations: analysis.recommendations,
        congestion_level: analysis.congestion_level,
        avg_speed: analysis.avg_speed,
        incident_count: analysis.incident_count,
        generated_by: Some(current.username().to_string()),
        created_at: Utc::now(),
    };
    let report = runtime.db.create_report(&report).await?;

    let mut response = report_json(&report);
    response["detailed_metrics"] = json!({
        "congested_areas_count": analysis.congested_areas_count,
        "major_routes_analyzed": analysis.major_routes_analyzed,
        "analysis_radius_km": radius_km,
        "sampling_points": sampling_points,
        "report_type": "detailed",
    });

    Ok((StatusCode::CREATED, Json(response)))
}

/// List stored reports. Non-admins only see their own.
#[instrument(skip_all)]
pub async fn list_reports(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["reports:read"])?;

    let owner = if current.user.roles.iter().any(|r| r == crate::auth::roles::ADMIN_ROLE) {
        None
    } else {
        Some(current.username())
    };

    let reports = runtime.db.list_reports(owner).await?;

    Ok(Json(reports.iter().map(report_json).collect()))
}

/// Fetch a stored report. Non-admins only see their own.
#[instrument(skip_all)]
pub async fn retrieve_report(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    current.require(&["reports:read"])?;

    let report = runtime.db.get_report(&id).await?.ok_or_else(|| ApiError::NotFound("Report not found".to_string()))?;

    let is_admin = current.user.roles.iter().any(|r| r == crate::auth::roles::ADMIN_ROLE);
    if !is_admin && report.generated_by.as_deref() != Some(current.username()) {
        return Err(ApiError::Forbidden);
    }

    Ok(Json(report_json(&report)))
}

// Stored traffic data handlers.

/// List stored traffic observations.
#[instrument(skip_all)]
pub async fn list_data(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let data = runtime.db.list_traffic_data().await?;

    Ok(Json(data.iter().map(traffic_data_json).collect()))
}

/// Store a traffic observation.
#[instrument(skip_all)]
pub async fn create_data(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<TrafficDataBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["control:write"])?;

    let data = TrafficDataRecord {
        id: None,
        location: body.location,
        latitude: body.latitude,
        longitude: body.longitude,
        density: body.density,
        flow: body.flow,
        speed: body.speed,
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
        created_at: Utc::now(),
    };
    let data = runtime.db.create_traffic_data(&data).await?;

    Ok((StatusCode::CREATED, Json(traffic_data_json(&data))))
}

// Prediction handlers.

/// List predictions, filterable by location.
#[instrument(skip_all)]
pub async fn list_predictions(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<LocationQuery>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let predictions = runtime.db.list_predictions(query.location.as_deref()).await?;

    Ok(Json(predictions.iter().map(prediction_json).collect()))
}

/// Store a prediction.
#[instrument(skip_all)]
pub async fn create_prediction(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<PredictionBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["control:write"])?;

    let prediction = TrafficPredictionRecord {
        id: None,
        location: body.location,
        latitude: body.latitude,
        longitude: body.longitude,
        predicted_density: body.predicted_density,
        predicted_flow: body.predicted_flow,
        predicted_speed: body.predicted_speed,
        confidence: body.confidence,
        prediction_time: body.prediction_time,
        created_at: Utc::now(),
    };
    let prediction = runtime.db.create_prediction(&prediction).await?;

    Ok((StatusCode::CREATED, Json(prediction_json(&prediction))))
}

/// Fetch a single prediction.
#[instrument(skip_all)]
pub async fn retrieve_prediction(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let prediction = runtime.db.get_prediction(&id).await?.ok_or_else(|| ApiError::NotFound("Prediction not found".to_string()))?;

    Ok(Json(prediction_json(&prediction)))
}

/// Replace a prediction.
#[instrument(skip_all)]
pub async fn update_prediction(
    State(runtime): State<Runtime>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<PredictionBody>,
) -> ApiResult<Json<Value>> {
    current.require(&["control:write"])?;

    let Some(existing) = runtime.db.get_prediction(&id).await? else {
        return Err(ApiError::NotFound("Prediction not found".to_string()));
    };

    let prediction = TrafficPredictionRecord {
        location: body.location,
        latitude: body.latitude,
        longitude: body.longitude,
        predicted_density: body.predicted_density,
        predicted_flow: body.predicted_flow,
        predicted_speed: body.predicted_speed,
        confidence: body.confidence,
        prediction_time: body.prediction_time,
        ..existing
    };
    let prediction = runtime.db.update_prediction(&id, &prediction).await?.ok_or_else(|| ApiError::NotFound("Prediction not found".to_string()))?;

    Ok(Json(prediction_json(&prediction)))
}

/// Delete a prediction.
#[instrument(skip_all)]
pub async fn destroy_prediction(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    current.require(&["control:write"])?;

    if runtime.db.delete_prediction(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Prediction not found".to_string()))
    }
}

// Route handlers.

/// List saved routes.
#[instrument(skip_all)]
pub async fn list_routes(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let routes = runtime.db.list_routes().await?;

    Ok(Json(routes.iter().map(route_json).collect()))
}

/// Save a route.
#[instrument(skip_all)]
pub async fn create_route(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<RouteBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["control:write"])?;

    let now = Utc::now();
    let route = RouteRecord {
        id: None,
        name: body.name,
        description: body.description,
        start_location: body.start_location,
        end_location: body.end_location,
        start_latitude: body.start_latitude,
        start_longitude: body.start_longitude,
        end_latitude: body.end_latitude,
        end_longitude: body.end_longitude,
        distance: body.distance,
        estimated_time: body.estimated_time,
        created_at: now,
        updated_at: now,
    };
    let route = runtime.db.create_route(&route).await?;

    Ok((StatusCode::CREATED, Json(route_json(&route))))
}

/// Fetch a single route.
#[instrument(skip_all)]
pub async fn retrieve_route(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let route = runtime.db.get_route(&id).await?.ok_or_else(|| ApiError::NotFound("Route not found".to_string()))?;

    Ok(Json(route_json(&route)))
}

/// Replace a route.
#[instrument(skip_all)]
pub async fn update_route(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>, Json(body): Json<RouteBody>) -> ApiResult<Json<Value>> {
    current.require(&["control:write"])?;

    let Some(existing) = runtime.db.get_route(&id).await? else {
        return Err(ApiError::NotFound("Route not found".to_string()));
    };

    let route = RouteRecord {
        name: body.name,
        description: body.description,
        start_location: body.start_location,
        end_location: body.end_location,
        start_latitude: body.start_latitude,
        start_longitude: body.start_longitude,
        end_latitude: body.end_latitude,
        end_longitude: body.end_longitude,
        distance: body.distance,
        estimated_time: body.estimated_time,
        updated_at: Utc::now(),
        ..existing
    };
    let route = runtime.db.update_route(&id, &route).await?.ok_or_else(|| ApiError::NotFound("Route not found".to_string()))?;

    Ok(Json(route_json(&route)))
}

/// Delete a route.
#[instrument(skip_all)]
pub async fn destroy_route(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    current.require(&["control:write"])?;

    if runtime.db.delete_route(&id).await? { Ok(StatusCode::NO_CONTENT) } else { Err(ApiError::NotFound("Route not found".to_string())) }
}

/// Suggest an optimized route between two locations.
#[instrument(skip_all)]
pub async fn optimize_route(State(_runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<OptimizeRouteRequest>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    let (Some(start_location), Some(end_location)) = (body.start_location, body.end_location) else {
        return Err(ApiError::BadRequest("Both start_location and end_location are required".to_string()));
    };

    // Static suggestion payload; real optimization is a candidate for the
    // routing API once the frontend consumes alternatives.
    Ok(Json(json!({
        "start_location": start_location,
        "end_location": end_location,
        "estimated_duration": 25,
        "distance": 15.5,
        "traffic_level": "moderate",
        "alternative_routes": [
            { "route_name": "Route A", "duration": 30, "distance": 18.2, "traffic_level": "heavy" },
            { "route_name": "Route B", "duration": 22, "distance": 14.8, "traffic_level": "light" },
        ],
    })))
}
