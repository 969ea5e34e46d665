use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::types::{CollectionStatus, CollectionType, Density, FlowLevel, IncidentStatus, IncidentType, Res, Severity};

pub mod surreal;

// Records.

/// A user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub username: String,
    pub email: String,
    /// Encoded password hash; unusable marker for OAuth accounts.
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    /// Role names; permissions derive from `auth::roles`.
    pub roles: Vec<String>,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// An opaque API token tied to a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokenRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub key: String,
    pub username: String,
    pub created: DateTime<Utc>,
}

/// A user-reported incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub title: String,
    pub description: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reported_by: Option<String>,
    pub reported_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A comment attached to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentCommentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub incident_id: String,
    pub username: String,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// A stored traffic observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficDataRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub density: Density,
    pub flow: FlowLevel,
    /// Average speed in km/h.
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A stored traffic prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficPredictionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub predicted_density: Density,
    pub predicted_flow: FlowLevel,
    /// Predicted average speed in km/h.
    pub predicted_speed: f64,
    /// Prediction confidence, 0 to 1.
    pub confidence: f64,
    /// Time this prediction is for.
    pub prediction_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An AI-generated traffic report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficReportRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub title: String,
    pub report_type: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Raw traffic data the analysis was based on.
    pub traffic_data: Value,
    pub ai_analysis: String,
    pub ai_recommendations: String,
    pub congestion_level: u32,
    pub avg_speed: f64,
    pub incident_count: usize,
    pub generated_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A saved route between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub name: String,
    pub description: String,
    pub start_location: String,
    pub end_location: String,
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub end_latitude: f64,
    pub end_longitude: f64,
    /// Distance in kilometers.
    pub distance: f64,
    /// Estimated time in minutes.
    pub estimated_time: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A live incident collected from the traffic API, keyed by the upstream incident ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveIncidentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub tomtom_incident_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_description: String,
    pub road_numbers: Vec<String>,
    pub incident_type: IncidentType,
    pub icon_category: String,
    pub severity_code: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_report_time: Option<DateTime<Utc>>,
    pub magnitude_of_delay: String,
    pub length: Option<f64>,
    pub delay: Option<f64>,
    pub probability_of_occurrence: Option<String>,
    pub number_of_reports: u32,
    /// Full upstream payload, kept for model training.
    pub raw_api_data: Value,
    pub city: String,
    pub time_of_day: String,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub is_active: bool,
    pub is_processed: bool,
    pub collected_at: DateTime<Utc>,
}

/// A traffic flow sample collected from the traffic API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlowRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub latitude: f64,
    pub longitude: f64,
    pub current_speed: f64,
    pub free_flow_speed: f64,
    pub current_travel_time: f64,
    pub free_flow_travel_time: f64,
    /// current / free-flow speed; 0 when free-flow speed is unknown.
    pub congestion_ratio: f64,
    /// current / free-flow travel time; 1 when free-flow time is unknown.
    pub delay_factor: f64,
    pub road_closure: bool,
    pub confidence: Option<f64>,
    pub city: String,
    pub time_of_day: String,
    pub day_of_week: String,
    pub is_weekend: bool,
    pub raw_api_data: Value,
    pub is_processed: bool,
    pub collected_at: DateTime<Utc>,
}

/// One background collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionLogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub collection_type: CollectionType,
    pub city: String,
    pub bbox: String,
    pub status: CollectionStatus,
    pub total_records_found: u32,
    pub new_records_created: u32,
    pub existing_records_updated: u32,
    pub errors_encountered: u32,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A recorded privileged action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub username: Option<String>,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

// Query helper types.

/// Filters for incident listing.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    /// Case-insensitive substring match on the location.
    pub location: Option<String>,
}

/// Aggregated incident counts for the statistics endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IncidentStatistics {
    pub total_incidents: usize,
    pub active_incidents: usize,
    pub resolved_incidents: usize,
    pub incident_types: std::collections::BTreeMap<String, usize>,
}

/// Aggregated collection-run counts for the reporting task and CLI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStatistics {
    pub period_hours: i64,
    pub collection_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub incidents_collected: usize,
    pub traffic_flow_collected: usize,
    pub total_records: usize,
    pub latest_collection: Option<DateTime<Utc>>,
}

/// Rows removed by a cleanup pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupCounts {
    pub incidents_deleted: usize,
    pub traffic_records_deleted: usize,
    pub logs_deleted: usize,
}

// Traits.

/// Generic database client trait that storage backends must implement.
///
/// This trait defines the persistence surface for the whole application:
/// accounts and tokens, reported incidents and comments, traffic records,
/// AI reports, collected live data, and audit logging.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    // Users and tokens.

    /// Create a user; fails if the username is already taken.
    async fn create_user(&self, user: &UserRecord) -> Res<UserRecord>;
    /// Get a user by username.
    async fn get_user(&self, username: &str) -> Res<Option<UserRecord>>;
    /// Find a user by email address.
    async fn find_user_by_email(&self, email: &str) -> Res<Option<UserRecord>>;
    /// Replace a user record, keyed by username.
    async fn update_user(&self, user: &UserRecord) -> Res<UserRecord>;
    /// Store an issued token.
    async fn store_token(&self, token: &AuthTokenRecord) -> Res<()>;
    /// Resolve a token key to its record.
    async fn get_token(&self, key: &str) -> Res<Option<AuthTokenRecord>>;
    /// Find the token currently issued to a user, if any.
    async fn find_user_token(&self, username: &str) -> Res<Option<AuthTokenRecord>>;
    /// Delete a single token.
    async fn delete_token(&self, key: &str) -> Res<()>;
    /// Delete every token issued to a user.
    async fn delete_user_tokens(&self, username: &str) -> Res<()>;

    // Incidents.

    async fn create_incident(&self, incident: &IncidentRecord) -> Res<IncidentRecord>;
    async fn get_incident(&self, id: &str) -> Res<Option<IncidentRecord>>;
    /// List incidents, newest first, honoring the filter.
    async fn list_incidents(&self, filter: &IncidentFilter) -> Res<Vec<IncidentRecord>>;
    async fn update_incident(&self, id: &str, incident: &IncidentRecord) -> Res<Option<IncidentRecord>>;
    async fn delete_incident(&self, id: &str) -> Res<bool>;
    async fn incident_statistics(&self) -> Res<IncidentStatistics>;

    // Incident comments.

    async fn create_comment(&self, comment: &IncidentCommentRecord) -> Res<IncidentCommentRecord>;
    async fn get_comment(&self, id: &str) -> Res<Option<IncidentCommentRecord>>;
    /// List comments, newest first, optionally restricted to one incident.
    async fn list_comments(&self, incident_id: Option<&str>) -> Res<Vec<IncidentCommentRecord>>;
    async fn delete_comment(&self, id: &str) -> Res<bool>;

    // Traffic data.

    async fn create_traffic_data(&self, data: &TrafficDataRecord) -> Res<TrafficDataRecord>;
    async fn list_traffic_data(&self) -> Res<Vec<TrafficDataRecord>>;

    // Traffic predictions.

    async fn create_prediction(&self, prediction: &TrafficPredictionRecord) -> Res<TrafficPredictionRecord>;
    async fn get_prediction(&self, id: &str) -> Res<Option<TrafficPredictionRecord>>;
    /// List predictions, newest first, optionally filtered by location substring.
    async fn list_predictions(&self, location: Option<&str>) -> Res<Vec<TrafficPredictionRecord>>;
    async fn update_prediction(&self, id: &str, prediction: &TrafficPredictionRecord) -> Res<Option<TrafficPredictionRecord>>;
    async fn delete_prediction(&self, id: &str) -> Res<bool>;

    // Traffic reports.

    async fn create_report(&self, report: &TrafficReportRecord) -> Res<TrafficReportRecord>;
    async fn get_report(&self, id: &str) -> Res<Option<TrafficReportRecord>>;
    /// List reports, newest first; when `owner` is set, only that user's reports.
    async fn list_reports(&self, owner: Option<&str>) -> Res<Vec<TrafficReportRecord>>;

    // Routes.

    async fn create_route(&self, route: &RouteRecord) -> Res<RouteRecord>;
    async fn get_route(&self, id: &str) -> Res<Option<RouteRecord>>;
    /// List routes ordered by name.
    async fn list_routes(&self) -> Res<Vec<RouteRecord>>;
    async fn update_route(&self, id: &str, route: &RouteRecord) -> Res<Option<RouteRecord>>;
    async fn delete_route(&self, id: &str) -> Res<bool>;

    // Collected live data.

    /// Insert or update a live incident by its upstream ID.
    ///
    /// Returns `true` when a new record was created, `false` when an existing
    /// one was updated.
    async fn upsert_live_incident(&self, incident: &LiveIncidentRecord) -> Res<bool>;
    async fn insert_traffic_flow(&self, flow: &TrafficFlowRecord) -> Res<()>;
    async fn create_collection_log(&self, log: &CollectionLogRecord) -> Res<CollectionLogRecord>;
    async fn update_collection_log(&self, log: &CollectionLogRecord) -> Res<()>;
    /// Collection statistics since the given instant.
    async fn collection_statistics(&self, since: DateTime<Utc>) -> Res<CollectionStatistics>;
    /// Delete processed collected data and logs older than the cutoff.
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Res<CleanupCounts>;

    // Audit log.

    async fn add_audit_log(&self, entry: &AuditLogRecord) -> Res<()>;
    /// List audit entries, newest first, optionally filtered by action.
    async fn list_audit_logs(&self, action: Option<&str>) -> Res<Vec<AuditLogRecord>>;
}

// Structs.

/// Database client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    pub inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}

/// Render a record ID as the raw string used in API paths.
pub fn record_key(id: &Option<surrealdb::sql::Thing>) -> String {
    id.as_ref().map(|t| t.id.to_raw()).unwrap_or_default()
}
