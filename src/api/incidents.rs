//! Incident and comment handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::{
    base::types::{IncidentStatus, IncidentType, Severity},
    geo::{BoundingBox, find_city},
    runtime::Runtime,
    service::db::{AuditLogRecord, IncidentCommentRecord, IncidentFilter, IncidentRecord, record_key},
};

use super::{ApiError, ApiResult, CurrentUser};

/// All TomTom incident categories, requested for the live feed.
const ALL_CATEGORIES: &str = "0,1,2,3,4,5,6,7,8,9,10,11,12,13,14";

// Request bodies.

#[derive(Debug, Deserialize)]
pub struct IncidentBody {
    pub title: String,
    pub description: String,
    pub incident_type: IncidentType,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub status: IncidentStatus,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct IncidentListQuery {
    pub status: Option<IncidentStatus>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub incident_id: String,
    pub comment: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentListQuery {
    pub incident_id: Option<String>,
}

// Helpers.

fn incident_json(incident: &IncidentRecord) -> Value {
    json!({
        "id": record_key(&incident.id),
        "title": incident.title,
        "description": incident.description,
        "incident_type": incident.incident_type,
        "severity": incident.severity,
        "status": incident.status,
        "location": incident.location,
        "latitude": incident.latitude,
        "longitude": incident.longitude,
        "reported_by": incident.reported_by,
        "reported_at": incident.reported_at,
        "resolved_at": incident.resolved_at,
        "created_at": incident.created_at,
        "updated_at": incident.updated_at,
    })
}

fn comment_json(comment: &IncidentCommentRecord) -> Value {
    json!({
        "id": record_key(&comment.id),
        "incident_id": comment.incident_id,
        "user": comment.username,
        "comment": comment.comment,
        "created_at": comment.created_at,
    })
}

/// A resolved incident gets its resolution timestamp exactly once.
fn apply_resolution(incident: &mut IncidentRecord) {
    if incident.status == IncidentStatus::Resolved && incident.resolved_at.is_none() {
        incident.resolved_at = Some(Utc::now());
    }
}

// Incident handlers.

/// List incidents, filterable by status and location.
#[instrument(skip_all)]
pub async fn list(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<IncidentListQuery>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:read"])?;

    let filter = IncidentFilter {
        status: query.status,
        location: query.location,
    };
    let incidents = runtime.db.list_incidents(&filter).await?;

    Ok(Json(incidents.iter().map(incident_json).collect()))
}

/// Report a new incident.
#[instrument(skip_all)]
pub async fn create(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<IncidentBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    current.require(&["incidents:manage"])?;

    if body.title.is_empty() || body.location.is_empty() {
        return Err(ApiError::BadRequest("Title and location are required".to_string()));
    }

    let now = Utc::now();
    let mut incident = IncidentRecord {
        id: None,
        title: body.title,
        description: body.description,
        incident_type: body.incident_type,
        severity: body.severity,
        status: body.status,
        location: body.location,
        latitude: body.latitude,
        longitude: body.longitude,
        reported_by: Some(current.username().to_string()),
        reported_at: now,
        resolved_at: None,
        created_at: now,
        updated_at: now,
    };
    apply_resolution(&mut incident);

    let incident = runtime.db.create_incident(&incident).await?;

    Ok((StatusCode::CREATED, Json(incident_json(&incident))))
}

/// Fetch a single incident.
#[instrument(skip_all)]
pub async fn retrieve(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:read"])?;

    let incident = runtime.db.get_incident(&id).await?.ok_or_else(|| ApiError::NotFound("Incident not found".to_string()))?;

    Ok(Json(incident_json(&incident)))
}

/// Replace an incident's editable fields.
#[instrument(skip_all)]
pub async fn update(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>, Json(body): Json<IncidentBody>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:manage"])?;

    let Some(existing) = runtime.db.get_incident(&id).await? else {
        return Err(ApiError::NotFound("Incident not found".to_string()));
    };

    let mut incident = IncidentRecord {
        title: body.title,
        description: body.description,
        incident_type: body.incident_type,
        severity: body.severity,
        status: body.status,
        location: body.location,
        latitude: body.latitude,
        longitude: body.longitude,
        updated_at: Utc::now(),
        ..existing
    };
    apply_resolution(&mut incident);

    let incident = runtime.db.update_incident(&id, &incident).await?.ok_or_else(|| ApiError::NotFound("Incident not found".to_string()))?;

    Ok(Json(incident_json(&incident)))
}

/// Delete an incident.
#[instrument(skip_all)]
pub async fn destroy(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    current.require(&["incidents:manage"])?;

    if runtime.db.delete_incident(&id).await? { Ok(StatusCode::NO_CONTENT) } else { Err(ApiError::NotFound("Incident not found".to_string())) }
}

/// Mark an incident as resolved.
#[instrument(skip_all)]
pub async fn resolve(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:manage"])?;

    let Some(mut incident) = runtime.db.get_incident(&id).await? else {
        return Err(ApiError::NotFound("Incident not found".to_string()));
    };

    incident.status = IncidentStatus::Resolved;
    incident.updated_at = Utc::now();
    apply_resolution(&mut incident);

    let incident = runtime.db.update_incident(&id, &incident).await?.ok_or_else(|| ApiError::NotFound("Incident not found".to_string()))?;

    runtime
        .db
        .add_audit_log(&AuditLogRecord {
            id: None,
            username: Some(current.username().to_string()),
            action: "incident_resolve".to_string(),
            details: json!({ "incident_id": id, "title": incident.title }),
            created_at: Utc::now(),
        })
        .await?;

    Ok(Json(incident_json(&incident)))
}

/// List all active incidents.
#[instrument(skip_all)]
pub async fn active(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:read"])?;

    let filter = IncidentFilter {
        status: Some(IncidentStatus::Active),
        location: None,
    };
    let incidents = runtime.db.list_incidents(&filter).await?;

    Ok(Json(incidents.iter().map(incident_json).collect()))
}

/// Aggregate incident statistics.
#[instrument(skip_all)]
pub async fn statistics(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>) -> ApiResult<Json<Value>> {
    current.require(&["incidents:read"])?;

    let stats = runtime.db.incident_statistics().await?;

    Ok(Json(serde_json::to_value(stats).map_err(anyhow::Error::from)?))
}

/// Fetch live incidents from the traffic API for a city.
#[instrument(skip_all)]
pub async fn live(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Query(query): Query<LiveQuery>) -> ApiResult<Json<Value>> {
    current.require(&["traffic:read"])?;

    // Unknown cities fall back to the capital rather than failing the dashboard.
    let requested = query.city.unwrap_or_else(|| "nairobi".to_string());
    let city = find_city(&requested).unwrap_or(&crate::geo::CITIES[0]);

    let bbox = BoundingBox::around(city.center, city.collection_radius_km);

    let incidents_data = match runtime.traffic.incidents(&bbox, Some(ALL_CATEGORIES)).await {
        Ok(data) => data,
        Err(err) => {
            warn!("Live incident fetch failed for {}: {err}", city.name);
            return Err(ApiError::Internal(anyhow::anyhow!("Failed to fetch live incidents")));
        }
    };

    let formatted = format_live_incidents(&incidents_data);

    Ok(Json(json!({
        "incidents": formatted,
        "total_count": formatted.len(),
        "city": city.name,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// Flatten the upstream incident payload into the shape the frontend renders.
pub fn format_live_incidents(incidents_data: &Value) -> Vec<Value> {
    let Some(incidents) = incidents_data.get("incidents").and_then(Value::as_array) else {
        return Vec::new();
    };

    incidents
        .iter()
        .map(|incident| {
            let properties = incident.get("properties").cloned().unwrap_or_default();
            let geometry = incident.get("geometry").cloned().unwrap_or_default();

            json!({
                "id": properties.get("id").cloned().unwrap_or(Value::Null),
                "type": properties.get("iconCategory").cloned().unwrap_or_else(|| json!("unknown")),
                "description": properties
                    .get("events")
                    .and_then(Value::as_array)
                    .and_then(|e| e.first())
                    .and_then(|e| e.get("description"))
                    .cloned()
                    .unwrap_or_else(|| json!("Traffic incident")),
                "severity": properties.get("magnitudeOfDelay").cloned().unwrap_or_else(|| json!(0)),
                "location": {
                    "coordinates": geometry.get("coordinates").cloned().unwrap_or_else(|| json!([])),
                    "type": geometry.get("type").cloned().unwrap_or_else(|| json!("Point")),
                },
                "start_time": properties.get("startTime").cloned().unwrap_or(Value::Null),
                "end_time": properties.get("endTime").cloned().unwrap_or(Value::Null),
                "road_numbers": properties.get("roadNumbers").cloned().unwrap_or_else(|| json!([])),
                "length": properties.get("length").cloned().unwrap_or_else(|| json!(0)),
                "delay": properties.get("delay").cloned().unwrap_or_else(|| json!(0)),
                "source": "tomtom",
            })
        })
        .collect()
}

// Comment handlers.

/// List comments, optionally restricted to one incident.
#[instrument(skip_all)]
pub async fn list_comments(State(runtime): State<Runtime>, Extension(_current): Extension<CurrentUser>, Query(query): Query<CommentListQuery>) -> ApiResult<Json<Value>> {
    let comments = runtime.db.list_comments(query.incident_id.as_deref()).await?;

    Ok(Json(comments.iter().map(comment_json).collect()))
}

/// Comment on an incident.
#[instrument(skip_all)]
pub async fn create_comment(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Json(body): Json<CommentBody>) -> ApiResult<(StatusCode, Json<Value>)> {
    if body.comment.is_empty() {
        return Err(ApiError::BadRequest("Comment is required".to_string()));
    }

    if runtime.db.get_incident(&body.incident_id).await?.is_none() {
        return Err(ApiError::BadRequest("Unknown incident".to_string()));
    }

    let comment = IncidentCommentRecord {
        id: None,
        incident_id: body.incident_id,
        username: current.username().to_string(),
        comment: body.comment,
        created_at: Utc::now(),
    };
    let comment = runtime.db.create_comment(&comment).await?;

    Ok((StatusCode::CREATED, Json(comment_json(&comment))))
}

/// Fetch a single comment.
#[instrument(skip_all)]
pub async fn retrieve_comment(State(runtime): State<Runtime>, Extension(_current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let comment = runtime.db.get_comment(&id).await?.ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    Ok(Json(comment_json(&comment)))
}

/// Delete a comment. Authors delete their own; incident managers delete any.
#[instrument(skip_all)]
pub async fn destroy_comment(State(runtime): State<Runtime>, Extension(current): Extension<CurrentUser>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    let comment = runtime.db.get_comment(&id).await?.ok_or_else(|| ApiError::NotFound("Comment not found".to_string()))?;

    if comment.username != current.username() {
        current.require(&["incidents:manage"])?;
    }

    runtime.db.delete_comment(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_live_incidents() {
        let data = json!({
            "incidents": [
                {
                    "geometry": {"type": "Point", "coordinates": [36.82, -1.29]},
                    "properties": {
                        "id": "tt-1",
                        "iconCategory": 1,
                        "magnitudeOfDelay": 2,
                        "events": [{"description": "Multi-vehicle accident", "code": 1}],
                        "roadNumbers": ["A104"],
                        "length": 350,
                        "delay": 120,
                    }
                },
                {}
            ]
        });

        let formatted = format_live_incidents(&data);

        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0]["id"], "tt-1");
        assert_eq!(formatted[0]["description"], "Multi-vehicle accident");
        assert_eq!(formatted[0]["location"]["coordinates"][0], 36.82);
        assert_eq!(formatted[0]["source"], "tomtom");

        // Sparse incidents still format with defaults.
        assert_eq!(formatted[1]["description"], "Traffic incident");
        assert_eq!(formatted[1]["type"], "unknown");
    }

    #[test]
    fn test_format_live_incidents_empty() {
        assert!(format_live_incidents(&json!({})).is_empty());
        assert!(format_live_incidents(&json!({"incidents": []})).is_empty());
    }

    #[test]
    fn test_apply_resolution_sets_timestamp_once() {
        let now = Utc::now();
        let mut incident = IncidentRecord {
            id: None,
            title: "t".to_string(),
            description: String::new(),
            incident_type: IncidentType::Accident,
            severity: Severity::Low,
            status: IncidentStatus::Resolved,
            location: "l".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            reported_by: None,
            reported_at: now,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };

        apply_resolution(&mut incident);
        let first = incident.resolved_at.unwrap();

        apply_resolution(&mut incident);
        assert_eq!(incident.resolved_at.unwrap(), first);

        // Active incidents are left alone.
        incident.status = IncidentStatus::Active;
        incident.resolved_at = None;
        apply_resolution(&mut incident);
        assert!(incident.resolved_at.is_none());
    }
}
