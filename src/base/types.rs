use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Category of a traffic incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Accident,
    Construction,
    RoadClosure,
    Weather,
    Event,
    Breakdown,
    Other,
}

/// Severity of a reported incident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Lifecycle state of a reported incident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Active,
    Resolved,
    Pending,
}

/// Traffic density bucket for stored traffic samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Traffic flow bucket for stored traffic samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowLevel {
    #[default]
    Smooth,
    Moderate,
    Congested,
    Gridlock,
}

/// What a background collection run gathers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    Incidents,
    TrafficFlow,
    Combined,
}

/// Outcome state of a background collection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

/// Result of an AI traffic analysis, regardless of which analyzer produced it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficAnalysis {
    pub analysis: String,
    pub recommendations: String,
    pub congestion_level: u32,
    pub avg_speed: f64,
    pub incident_count: usize,
    pub congested_areas_count: usize,
    pub major_routes_analyzed: usize,
}

/// Dashboard summary for a city, formatted for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitySummary {
    pub congestion_level: u32,
    pub avg_travel_time: u32,
    pub live_incidents: usize,
    pub ai_forecast: String,
}
