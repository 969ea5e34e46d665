//! SurrealDB implementation of the database client.
//!
//! Uses the `any` engine so the same code serves the in-memory engine (tests,
//! local runs) and a remote server (production), selected by endpoint URL.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
    opt::auth::Root,
};
use tracing::{info, instrument};

use crate::base::{config::Config, types::{IncidentType, Res}};

use super::{
    AuditLogRecord, AuthTokenRecord, CleanupCounts, CollectionLogRecord, CollectionStatistics, DbClient, GenericDbClient, IncidentCommentRecord, IncidentFilter, IncidentRecord,
    IncidentStatistics, LiveIncidentRecord, RouteRecord, TrafficDataRecord, TrafficFlowRecord, TrafficPredictionRecord, TrafficReportRecord, UserRecord, record_key,
};

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Create a database client from the configured endpoint.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::new(&config.db_endpoint, &config.db_username, &config.db_password).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// Create an in-memory database client, mostly useful in tests.
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::new("mem://", "", "").await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// SurrealDB-backed database client.
#[derive(Clone)]
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

/// Tables the client operates on.
const TABLES: &[&str] = &[
    "user",
    "token",
    "incident",
    "incident_comment",
    "traffic_data",
    "traffic_prediction",
    "traffic_report",
    "route",
    "live_incident",
    "traffic_flow",
    "collection_log",
    "audit_log",
];

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct TypeCountRow {
    incident_type: IncidentType,
    count: usize,
}

impl SurrealDbClient {
    /// Connect, authenticate if the endpoint requires it, and define the schema.
    #[instrument(name = "SurrealDbClient::new", skip_all)]
    pub async fn new(endpoint: &str, username: &str, password: &str) -> Res<Self> {
        let db = connect(endpoint).await?;

        // Remote engines require root credentials; the embedded ones do not.
        if !endpoint.starts_with("mem:") && !username.is_empty() {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns("movesmart").use_db("backend").await?;

        for table in TABLES {
            db.query(format!("DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS")).await?;
        }

        // Email lookups back uniqueness checks at registration time.
        db.query("DEFINE INDEX IF NOT EXISTS user_email ON user FIELDS email").await?;
        db.query("DEFINE INDEX IF NOT EXISTS live_incident_upstream ON live_incident FIELDS tomtom_incident_id").await?;

        info!("Database initialized successfully.");

        Ok(Self { db })
    }

    /// Clone a record with its ID stripped, for use as create/update content.
    fn content_of<T: Clone + IdStrip>(record: &T) -> T {
        let mut data = record.clone();
        data.strip_id();
        data
    }
}

/// Helper to strip IDs before writing content.
trait IdStrip {
    fn strip_id(&mut self);
}

macro_rules! impl_id_strip {
    ($($ty:ty),* $(,)?) => {
        $(impl IdStrip for $ty {
            fn strip_id(&mut self) {
                self.id = None;
            }
        })*
    };
}

impl_id_strip!(
    UserRecord,
    AuthTokenRecord,
    IncidentRecord,
    IncidentCommentRecord,
    TrafficDataRecord,
    TrafficPredictionRecord,
    TrafficReportRecord,
    RouteRecord,
    LiveIncidentRecord,
    TrafficFlowRecord,
    CollectionLogRecord,
    AuditLogRecord,
);

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    // Users and tokens.

    #[instrument(skip(self, user))]
    async fn create_user(&self, user: &UserRecord) -> Res<UserRecord> {
        let created: Option<UserRecord> = self.db.create(("user", user.username.as_str())).content(Self::content_of(user)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create user `{}`", user.username))
    }

    #[instrument(skip(self))]
    async fn get_user(&self, username: &str) -> Res<Option<UserRecord>> {
        Ok(self.db.select(("user", username)).await?)
    }

    #[instrument(skip(self))]
    async fn find_user_by_email(&self, email: &str) -> Res<Option<UserRecord>> {
        let mut response = self.db.query("SELECT * FROM user WHERE email = $email LIMIT 1").bind(("email", email.to_string())).await?;
        let users: Vec<UserRecord> = response.take(0)?;
        Ok(users.into_iter().next())
    }

    #[instrument(skip(self, user))]
    async fn update_user(&self, user: &UserRecord) -> Res<UserRecord> {
        let updated: Option<UserRecord> = self.db.update(("user", user.username.as_str())).content(Self::content_of(user)).await?;
        updated.ok_or_else(|| anyhow::anyhow!("User `{}` not found", user.username))
    }

    #[instrument(skip_all)]
    async fn store_token(&self, token: &AuthTokenRecord) -> Res<()> {
        let _: Option<AuthTokenRecord> = self.db.create(("token", token.key.as_str())).content(Self::content_of(token)).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn get_token(&self, key: &str) -> Res<Option<AuthTokenRecord>> {
        Ok(self.db.select(("token", key)).await?)
    }

    #[instrument(skip(self))]
    async fn find_user_token(&self, username: &str) -> Res<Option<AuthTokenRecord>> {
        let mut response = self.db.query("SELECT * FROM token WHERE username = $username LIMIT 1").bind(("username", username.to_string())).await?;
        let tokens: Vec<AuthTokenRecord> = response.take(0)?;
        Ok(tokens.into_iter().next())
    }

    #[instrument(skip_all)]
    async fn delete_token(&self, key: &str) -> Res<()> {
        let _: Option<AuthTokenRecord> = self.db.delete(("token", key)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_user_tokens(&self, username: &str) -> Res<()> {
        self.db.query("DELETE token WHERE username = $username").bind(("username", username.to_string())).await?;
        Ok(())
    }

    // Incidents.

    #[instrument(skip_all)]
    async fn create_incident(&self, incident: &IncidentRecord) -> Res<IncidentRecord> {
        let created: Option<IncidentRecord> = self.db.create("incident").content(Self::content_of(incident)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create incident"))
    }

    #[instrument(skip(self))]
    async fn get_incident(&self, id: &str) -> Res<Option<IncidentRecord>> {
        Ok(self.db.select(("incident", id)).await?)
    }

    #[instrument(skip_all)]
    async fn list_incidents(&self, filter: &IncidentFilter) -> Res<Vec<IncidentRecord>> {
        let mut clauses = Vec::new();

        if filter.status.is_some() {
            clauses.push("status = $status");
        }
        if filter.location.is_some() {
            clauses.push("string::contains(string::lowercase(location), string::lowercase($location))");
        }

        let mut sql = String::from("SELECT * FROM incident");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(status) = filter.status {
            query = query.bind(("status", status));
        }
        if let Some(location) = &filter.location {
            query = query.bind(("location", location.clone()));
        }

        Ok(query.await?.take(0)?)
    }

    #[instrument(skip(self, incident))]
    async fn update_incident(&self, id: &str, incident: &IncidentRecord) -> Res<Option<IncidentRecord>> {
        Ok(self.db.update(("incident", id)).content(Self::content_of(incident)).await?)
    }

    #[instrument(skip(self))]
    async fn delete_incident(&self, id: &str) -> Res<bool> {
        let deleted: Option<IncidentRecord> = self.db.delete(("incident", id)).await?;
        Ok(deleted.is_some())
    }

    #[instrument(skip_all)]
    async fn incident_statistics(&self) -> Res<IncidentStatistics> {
        let mut response = self
            .db
            .query("SELECT count() AS count FROM incident GROUP ALL")
            .query("SELECT count() AS count FROM incident WHERE status = 'active' GROUP ALL")
            .query("SELECT count() AS count FROM incident WHERE status = 'resolved' GROUP ALL")
            .query("SELECT incident_type, count() AS count FROM incident GROUP BY incident_type")
            .await?;

        let total: Vec<CountRow> = response.take(0)?;
        let active: Vec<CountRow> = response.take(1)?;
        let resolved: Vec<CountRow> = response.take(2)?;
        let by_type: Vec<TypeCountRow> = response.take(3)?;

        let mut incident_types = std::collections::BTreeMap::new();
        for row in by_type {
            let label = serde_json::to_value(row.incident_type)?.as_str().unwrap_or("other").to_string();
            incident_types.insert(label, row.count);
        }

        Ok(IncidentStatistics {
            total_incidents: total.first().map(|r| r.count).unwrap_or_default(),
            active_incidents: active.first().map(|r| r.count).unwrap_or_default(),
            resolved_incidents: resolved.first().map(|r| r.count).unwrap_or_default(),
            incident_types,
        })
    }

    // Incident comments.

    #[instrument(skip_all)]
    async fn create_comment(&self, comment: &IncidentCommentRecord) -> Res<IncidentCommentRecord> {
        let created: Option<IncidentCommentRecord> = self.db.create("incident_comment").content(Self::content_of(comment)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create comment"))
    }

    #[instrument(skip(self))]
    async fn get_comment(&self, id: &str) -> Res<Option<IncidentCommentRecord>> {
        Ok(self.db.select(("incident_comment", id)).await?)
    }

    #[instrument(skip(self))]
    async fn list_comments(&self, incident_id: Option<&str>) -> Res<Vec<IncidentCommentRecord>> {
        let mut sql = String::from("SELECT * FROM incident_comment");
        if incident_id.is_some() {
            sql.push_str(" WHERE incident_id = $incident_id");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(incident_id) = incident_id {
            query = query.bind(("incident_id", incident_id.to_string()));
        }

        Ok(query.await?.take(0)?)
    }

    #[instrument(skip(self))]
    async fn delete_comment(&self, id: &str) -> Res<bool> {
        let deleted: Option<IncidentCommentRecord> = self.db.delete(("incident_comment", id)).await?;
        Ok(deleted.is_some())
    }

    // Traffic data.

    #[instrument(skip_all)]
    async fn create_traffic_data(&self, data: &TrafficDataRecord) -> Res<TrafficDataRecord> {
        let created: Option<TrafficDataRecord> = self.db.create("traffic_data").content(Self::content_of(data)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create traffic data"))
    }

    #[instrument(skip_all)]
    async fn list_traffic_data(&self) -> Res<Vec<TrafficDataRecord>> {
        Ok(self.db.query("SELECT * FROM traffic_data ORDER BY timestamp DESC").await?.take(0)?)
    }

    // Traffic predictions.

    #[instrument(skip_all)]
    async fn create_prediction(&self, prediction: &TrafficPredictionRecord) -> Res<TrafficPredictionRecord> {
        let created: Option<TrafficPredictionRecord> = self.db.create("traffic_prediction").content(Self::content_of(prediction)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create prediction"))
    }

    #[instrument(skip(self))]
    async fn get_prediction(&self, id: &str) -> Res<Option<TrafficPredictionRecord>> {
        Ok(self.db.select(("traffic_prediction", id)).await?)
    }

    #[instrument(skip(self))]
    async fn list_predictions(&self, location: Option<&str>) -> Res<Vec<TrafficPredictionRecord>> {
        let mut sql = String::from("SELECT * FROM traffic_prediction");
        if location.is_some() {
            sql.push_str(" WHERE string::contains(string::lowercase(location), string::lowercase($location))");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(location) = location {
            query = query.bind(("location", location.to_string()));
        }

        Ok(query.await?.take(0)?)
    }

    #[instrument(skip(self, prediction))]
    async fn update_prediction(&self, id: &str, prediction: &TrafficPredictionRecord) -> Res<Option<TrafficPredictionRecord>> {
        Ok(self.db.update(("traffic_prediction", id)).content(Self::content_of(prediction)).await?)
    }

    #[instrument(skip(self))]
    async fn delete_prediction(&self, id: &str) -> Res<bool> {
        let deleted: Option<TrafficPredictionRecord> = self.db.delete(("traffic_prediction", id)).await?;
        Ok(deleted.is_some())
    }

    // Traffic reports.

    #[instrument(skip_all)]
    async fn create_report(&self, report: &TrafficReportRecord) -> Res<TrafficReportRecord> {
        let created: Option<TrafficReportRecord> = self.db.create("traffic_report").content(Self::content_of(report)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create report"))
    }

    #[instrument(skip(self))]
    async fn get_report(&self, id: &str) -> Res<Option<TrafficReportRecord>> {
        Ok(self.db.select(("traffic_report", id)).await?)
    }

    #[instrument(skip(self))]
    async fn list_reports(&self, owner: Option<&str>) -> Res<Vec<TrafficReportRecord>> {
        let mut sql = String::from("SELECT * FROM traffic_report");
        if owner.is_some() {
            sql.push_str(" WHERE generated_by = $owner");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(owner) = owner {
            query = query.bind(("owner", owner.to_string()));
        }

        Ok(query.await?.take(0)?)
    }

    // Routes.

    #[instrument(skip_all)]
    async fn create_route(&self, route: &RouteRecord) -> Res<RouteRecord> {
        let created: Option<RouteRecord> = self.db.create("route").content(Self::content_of(route)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create route"))
    }

    #[instrument(skip(self))]
    async fn get_route(&self, id: &str) -> Res<Option<RouteRecord>> {
        Ok(self.db.select(("route", id)).await?)
    }

    #[instrument(skip_all)]
    async fn list_routes(&self) -> Res<Vec<RouteRecord>> {
        Ok(self.db.query("SELECT * FROM route ORDER BY name ASC").await?.take(0)?)
    }

    #[instrument(skip(self, route))]
    async fn update_route(&self, id: &str, route: &RouteRecord) -> Res<Option<RouteRecord>> {
        Ok(self.db.update(("route", id)).content(Self::content_of(route)).await?)
    }

    #[instrument(skip(self))]
    async fn delete_route(&self, id: &str) -> Res<bool> {
        let deleted: Option<RouteRecord> = self.db.delete(("route", id)).await?;
        Ok(deleted.is_some())
    }

    // Collected live data.

    #[instrument(skip_all)]
    async fn upsert_live_incident(&self, incident: &LiveIncidentRecord) -> Res<bool> {
        let existing: Option<LiveIncidentRecord> = self.db.select(("live_incident", incident.tomtom_incident_id.as_str())).await?;

        let _: Option<LiveIncidentRecord> = self
            .db
            .upsert(("live_incident", incident.tomtom_incident_id.as_str()))
            .content(Self::content_of(incident))
            .await?;

        Ok(existing.is_none())
    }

    #[instrument(skip_all)]
    async fn insert_traffic_flow(&self, flow: &TrafficFlowRecord) -> Res<()> {
        let _: Option<TrafficFlowRecord> = self.db.create("traffic_flow").content(Self::content_of(flow)).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn create_collection_log(&self, log: &CollectionLogRecord) -> Res<CollectionLogRecord> {
        let created: Option<CollectionLogRecord> = self.db.create("collection_log").content(Self::content_of(log)).await?;
        created.ok_or_else(|| anyhow::anyhow!("Failed to create collection log"))
    }

    #[instrument(skip_all)]
    async fn update_collection_log(&self, log: &CollectionLogRecord) -> Res<()> {
        let key = record_key(&log.id);
        if key.is_empty() {
            return Err(anyhow::anyhow!("Collection log has no ID"));
        }

        let _: Option<CollectionLogRecord> = self.db.update(("collection_log", key.as_str())).content(Self::content_of(log)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn collection_statistics(&self, since: DateTime<Utc>) -> Res<CollectionStatistics> {
        let mut response = self
            .db
            .query("SELECT * FROM collection_log WHERE started_at >= $since ORDER BY started_at DESC")
            .bind(("since", since))
            .query("SELECT count() AS count FROM live_incident WHERE collected_at >= $since2 GROUP ALL")
            .bind(("since2", since))
            .query("SELECT count() AS count FROM traffic_flow WHERE collected_at >= $since3 GROUP ALL")
            .bind(("since3", since))
            .await?;

        let logs: Vec<CollectionLogRecord> = response.take(0)?;
        let incidents: Vec<CountRow> = response.take(1)?;
        let flows: Vec<CountRow> = response.take(2)?;

        let incidents_collected = incidents.first().map(|r| r.count).unwrap_or_default();
        let traffic_flow_collected = flows.first().map(|r| r.count).unwrap_or_default();

        Ok(CollectionStatistics {
            period_hours: (Utc::now() - since).num_hours(),
            collection_runs: logs.len(),
            successful_runs: logs.iter().filter(|l| l.status == crate::base::types::CollectionStatus::Completed).count(),
            failed_runs: logs.iter().filter(|l| l.status == crate::base::types::CollectionStatus::Failed).count(),
            incidents_collected,
            traffic_flow_collected,
            total_records: incidents_collected + traffic_flow_collected,
            latest_collection: logs.first().map(|l| l.started_at),
        })
    }

    #[instrument(skip(self))]
    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Res<CleanupCounts> {
        let mut response = self
            .db
            .query("DELETE live_incident WHERE collected_at < $cutoff AND is_processed = true RETURN BEFORE")
            .bind(("cutoff", cutoff))
            .query("DELETE traffic_flow WHERE collected_at < $cutoff2 AND is_processed = true RETURN BEFORE")
            .bind(("cutoff2", cutoff))
            .query("DELETE collection_log WHERE started_at < $cutoff3 RETURN BEFORE")
            .bind(("cutoff3", cutoff))
            .await?;

        let incidents: Vec<LiveIncidentRecord> = response.take(0)?;
        let flows: Vec<TrafficFlowRecord> = response.take(1)?;
        let logs: Vec<CollectionLogRecord> = response.take(2)?;

        Ok(CleanupCounts {
            incidents_deleted: incidents.len(),
            traffic_records_deleted: flows.len(),
            logs_deleted: logs.len(),
        })
    }

    // Audit log.

    #[instrument(skip_all)]
    async fn add_audit_log(&self, entry: &AuditLogRecord) -> Res<()> {
        let _: Option<AuditLogRecord> = self.db.create("audit_log").content(Self::content_of(entry)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_audit_logs(&self, action: Option<&str>) -> Res<Vec<AuditLogRecord>> {
        let mut sql = String::from("SELECT * FROM audit_log");
        if action.is_some() {
            sql.push_str(" WHERE action = $action");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = self.db.query(sql);
        if let Some(action) = action {
            query = query.bind(("action", action.to_string()));
        }

        Ok(query.await?.take(0)?)
    }
}

// Tests.
