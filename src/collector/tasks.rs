//! Collection task implementations.

use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::{
    base::types::{CollectionStatus, CollectionType, IncidentType, Res},
    geo::{BoundingBox, CITIES, CityInfo, Point, grid_sampling_points},
    service::{
        db::{CleanupCounts, CollectionLogRecord, DbClient, LiveIncidentRecord, TrafficFlowRecord},
        traffic::TrafficClient,
    },
};

/// Flow sampling points collected per city per run.
const FLOW_SAMPLING_POINTS: usize = 25;

/// Retries per city before a run is recorded as failed.
const MAX_RETRIES: u32 = 3;

/// Per-run counters reported by a collection pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    pub city: String,
    pub total_found: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub errors: usize,
}

/// Outcome of one city within a combined run.
#[derive(Debug, Clone, Serialize)]
pub struct CityCollectionResult {
    pub city: String,
    pub incident_stats: Option<CollectionStats>,
    pub flow_stats: Option<CollectionStats>,
    pub error: Option<String>,
}

/// Collect data for every supported city.
///
/// Each city is retried independently with a fixed backoff; a city that keeps
/// failing is reported in its result and the run moves on.
#[instrument(skip(db, traffic))]
pub async fn collect_all_cities(db: &DbClient, traffic: &TrafficClient, collection_type: CollectionType, retry_delay: Duration) -> Vec<CityCollectionResult> {
    let mut results = Vec::new();

    for city in CITIES {
        let mut result = CityCollectionResult {
            city: city.key.to_string(),
            incident_stats: None,
            flow_stats: None,
            error: None,
        };

        if matches!(collection_type, CollectionType::Incidents | CollectionType::Combined) {
            match with_retries("incident collection", retry_delay, || collect_incident_data(db, traffic, city)).await {
                Ok(stats) => result.incident_stats = Some(stats),
                Err(err) => {
                    error!("Error collecting incident data for {}: {err}", city.key);
                    result.error = Some(err.to_string());
                }
            }
        }

        if matches!(collection_type, CollectionType::TrafficFlow | CollectionType::Combined) {
            match with_retries("traffic flow collection", retry_delay, || collect_traffic_flow_data(db, traffic, city)).await {
                Ok(stats) => result.flow_stats = Some(stats),
                Err(err) => {
                    error!("Error collecting traffic flow data for {}: {err}", city.key);
                    result.error = Some(err.to_string());
                }
            }
        }

        results.push(result);
    }

    results
}

/// Collect and upsert live incident data for one city.
#[instrument(skip(db, traffic), fields(city = city.key))]
pub async fn collect_incident_data(db: &DbClient, traffic: &TrafficClient, city: &CityInfo) -> Res<CollectionStats> {
    let bbox = BoundingBox::around(city.center, city.collection_radius_km);

    let mut log = db
        .create_collection_log(&CollectionLogRecord {
            id: None,
            collection_type: CollectionType::Incidents,
            city: city.name.to_string(),
            bbox: bbox.to_query(),
            status: CollectionStatus::Running,
            total_records_found: 0,
            new_records_created: 0,
            existing_records_updated: 0,
            errors_encountered: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        })
        .await?;

    let incidents_response = match traffic.incidents(&bbox, None).await {
        Ok(response) => response,
        Err(err) => {
            log.status = CollectionStatus::Failed;
            log.error_message = Some(err.to_string());
            log.completed_at = Some(Utc::now());
            db.update_collection_log(&log).await?;
            return Err(err);
        }
    };

    let incidents = incidents_response.get("incidents").and_then(Value::as_array).cloned().unwrap_or_default();
    log.total_records_found = incidents.len() as u32;

    let mut stats = CollectionStats {
        city: city.key.to_string(),
        total_found: incidents.len(),
        ..Default::default()
    };

    for incident_data in &incidents {
        match process_incident(incident_data, city.name, Utc::now()) {
            Ok(record) => match db.upsert_live_incident(&record).await {
                Ok(true) => stats.new_records += 1,
                Ok(false) => stats.updated_records += 1,
                Err(err) => {
                    error!("Error storing incident {}: {err}", record.tomtom_incident_id);
                    stats.errors += 1;
                }
            },
            Err(err) => {
                error!("Error processing incident: {err}");
                stats.errors += 1;
            }
        }
    }

    log.new_records_created = stats.new_records as u32;
    log.existing_records_updated = stats.updated_records as u32;
    log.errors_encountered = stats.errors as u32;
    log.status = CollectionStatus::Completed;
    log.completed_at = Some(Utc::now());
    db.update_collection_log(&log).await?;

    info!(
        "Completed incident collection for {}: {} new, {} updated, {} errors",
        city.key, stats.new_records, stats.updated_records, stats.errors
    );

    Ok(stats)
}

/// Collect traffic flow samples across one city's sampling grid.
#[instrument(skip(db, traffic), fields(city = city.key))]
pub async fn collect_traffic_flow_data(db: &DbClient, traffic: &TrafficClient, city: &CityInfo) -> Res<CollectionStats> {
    let bbox = BoundingBox::around(city.center, city.collection_radius_km);
    let sampling_points = grid_sampling_points(city.center, city.collection_radius_km, FLOW_SAMPLING_POINTS);

    let mut log = db
        .create_collection_log(&CollectionLogRecord {
            id: None,
            collection_type: CollectionType::TrafficFlow,
            city: city.name.to_string(),
            bbox: bbox.to_query(),
            status: CollectionStatus::Running,
            total_records_found: sampling_points.len() as u32,
            new_records_created: 0,
            existing_records_updated: 0,
            errors_encountered: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        })
        .await?;

    let mut stats = CollectionStats {
        city: city.key.to_string(),
        total_found: sampling_points.len(),
        ..Default::default()
    };

    for point in sampling_points {
        match traffic.flow_segment(point).await {
            Ok(flow_data) => {
                if let Some(record) = process_flow(&flow_data, point, city.name, Utc::now()) {
                    match db.insert_traffic_flow(&record).await {
                        Ok(()) => stats.new_records += 1,
                        Err(err) => {
                            error!("Error storing traffic flow at ({}, {}): {err}", point.lat, point.lon);
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(err) => {
                warn!("Error fetching traffic flow at ({}, {}): {err}", point.lat, point.lon);
                stats.errors += 1;
            }
        }
    }

    log.new_records_created = stats.new_records as u32;
    log.errors_encountered = stats.errors as u32;
    log.status = CollectionStatus::Completed;
    log.completed_at = Some(Utc::now());
    db.update_collection_log(&log).await?;

    info!("Completed traffic flow collection for {}: {} new, {} errors", city.key, stats.new_records, stats.errors);

    Ok(stats)
}

/// Delete collected data older than the retention window.
#[instrument(skip(db))]
pub async fn cleanup_old_data(db: &DbClient, days_to_keep: i64) -> Res<CleanupCounts> {
    let cutoff = Utc::now() - chrono::Duration::days(days_to_keep);
    db.cleanup_older_than(cutoff).await
}

/// Retry an async operation with a fixed backoff.
async fn with_retries<T, F, Fut>(name: &str, delay: Duration, mut task: F) -> Res<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Res<T>>,
{
    let mut attempt = 0;

    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    return Err(err);
                }
                warn!("{name} failed (attempt {attempt}/{MAX_RETRIES}), retrying: {err}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// Record construction.

/// Build a live incident record from an upstream incident payload.
///
/// Validates the geometry (first pair of multi-point geometries, numeric
/// values, coordinate ranges) and derives the model-training features.
pub fn process_incident(incident_data: &Value, city: &str, now: DateTime<Utc>) -> Res<LiveIncidentRecord> {
    let properties = incident_data.get("properties").cloned().unwrap_or_default();
    let geometry = incident_data.get("geometry").cloned().unwrap_or_default();

    let coordinates = geometry.get("coordinates").and_then(Value::as_array).cloned().unwrap_or_default();
    if coordinates.is_empty() {
        return Err(anyhow::anyhow!("No coordinates found in incident data"));
    }

    // Multi-point geometries use their first pair as the representative point.
    let pair: Vec<Value> = if coordinates[0].is_array() {
        coordinates[0].as_array().cloned().unwrap_or_default()
    } else {
        coordinates.clone()
    };

    if pair.len() != 2 {
        return Err(anyhow::anyhow!("Coordinate pair must have exactly 2 elements, got: {pair:?}"));
    }

    // Upstream order is [lon, lat].
    let lon = pair[0].as_f64().ok_or_else(|| anyhow::anyhow!("Invalid longitude value: {:?}", pair[0]))?;
    let lat = pair[1].as_f64().ok_or_else(|| anyhow::anyhow!("Invalid latitude value: {:?}", pair[1]))?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err(anyhow::anyhow!("Invalid latitude value: {lat}"));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(anyhow::anyhow!("Invalid longitude value: {lon}"));
    }

    let incident_id = properties.get("id").and_then(stringify).ok_or_else(|| anyhow::anyhow!("No incident ID found"))?;

    let parse_time = |field: &str| properties.get(field).and_then(Value::as_str).and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|t| t.with_timezone(&Utc));

    let start_time = parse_time("startTime");
    let end_time = parse_time("endTime");
    let last_report_time = parse_time("lastReportTime");

    let event_codes: Vec<String> = properties
        .get("events")
        .and_then(Value::as_array)
        .map(|events| events.iter().filter_map(|e| e.get("code")).filter_map(stringify).collect())
        .unwrap_or_default();

    let location_description = properties
        .get("to")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| properties.get("from").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Ok(LiveIncidentRecord {
        id: None,
        tomtom_incident_id: incident_id,
        latitude: lat,
        longitude: lon,
        location_description,
        road_numbers: properties
            .get("roadNumbers")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(stringify).collect())
            .unwrap_or_default(),
        incident_type: categorize_incident_type(&event_codes),
        icon_category: properties.get("iconCategory").and_then(stringify).unwrap_or_default(),
        severity_code: properties.get("magnitudeOfDelay").and_then(stringify).unwrap_or_default(),
        start_time,
        end_time,
        last_report_time,
        magnitude_of_delay: properties.get("magnitudeOfDelay").and_then(stringify).unwrap_or_default(),
        length: properties.get("length").and_then(Value::as_f64),
        delay: properties.get("delay").and_then(Value::as_f64),
        probability_of_occurrence: properties.get("probabilityOfOccurrence").and_then(stringify),
        number_of_reports: properties.get("numberOfReports").and_then(Value::as_u64).unwrap_or(0) as u32,
        raw_api_data: incident_data.clone(),
        city: city.to_string(),
        time_of_day: time_of_day(now.hour()).to_string(),
        day_of_week: now.format("%A").to_string(),
        is_weekend: now.weekday().number_from_monday() >= 6,
        is_active: end_time.is_none_or(|end| end > now),
        is_processed: false,
        collected_at: now,
    })
}

/// Build a traffic flow record from an upstream flow payload.
///
/// Returns `None` when the payload has no flow segment.
pub fn process_flow(flow_data: &Value, point: Point, city: &str, now: DateTime<Utc>) -> Option<TrafficFlowRecord> {
    let segment = flow_data.get("flowSegmentData")?;

    let current_speed = segment.get("currentSpeed").and_then(Value::as_f64).unwrap_or(0.0);
    let free_flow_speed = segment.get("freeFlowSpeed").and_then(Value::as_f64).unwrap_or(0.0);
    let current_travel_time = segment.get("currentTravelTime").and_then(Value::as_f64).unwrap_or(0.0);
    let free_flow_travel_time = segment.get("freeFlowTravelTime").and_then(Value::as_f64).unwrap_or(0.0);

    Some(TrafficFlowRecord {
        id: None,
        latitude: point.lat,
        longitude: point.lon,
        current_speed,
        free_flow_speed,
        current_travel_time,
        free_flow_travel_time,
        congestion_ratio: if free_flow_speed > 0.0 { current_speed / free_flow_speed } else { 0.0 },
        delay_factor: if free_flow_travel_time > 0.0 { current_travel_time / free_flow_travel_time } else { 1.0 },
        road_closure: segment.get("roadClosure").and_then(Value::as_bool).unwrap_or(false),
        confidence: segment.get("confidence").and_then(Value::as_f64),
        city: city.to_string(),
        time_of_day: time_of_day(now.hour()).to_string(),
        day_of_week: now.format("%A").to_string(),
        is_weekend: now.weekday().number_from_monday() >= 6,
        raw_api_data: flow_data.clone(),
        is_processed: false,
        collected_at: now,
    })
}

/// Map upstream event codes onto incident categories.
pub fn categorize_incident_type(event_codes: &[String]) -> IncidentType {
    for code in event_codes {
        let category = match code.as_str() {
            "1" | "2" | "3" => Some(IncidentType::Accident),
            "4" | "5" | "6" => Some(IncidentType::Construction),
            "7" | "8" => Some(IncidentType::RoadClosure),
            "9" | "10" => Some(IncidentType::Weather),
            "11" | "12" => Some(IncidentType::Event),
            "13" | "14" => Some(IncidentType::Breakdown),
            _ => None,
        };

        if let Some(category) = category {
            return category;
        }
    }

    IncidentType::Other
}

/// Bucket an hour into the time-of-day feature.
pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        6..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    }
}

/// Render a JSON scalar as the string stored on collected records.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn sample_incident() -> Value {
        json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [36.8219, -1.2921]},
            "properties": {
                "id": "tt-incident-1",
                "iconCategory": 1,
                "magnitudeOfDelay": 2,
                "events": [{"description": "Accident", "code": 1, "iconCategory": 1}],
                "startTime": "2025-06-01T08:00:00Z",
                "endTime": "2099-06-01T10:00:00Z",
                "from": "Kenyatta Avenue",
                "to": "Haile Selassie Avenue",
                "length": 420.5,
                "delay": 180,
                "roadNumbers": ["A104"],
                "numberOfReports": 4,
            }
        })
    }

    #[test]
    fn test_process_incident_point_geometry() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap();

        let record = process_incident(&sample_incident(), "Nairobi", now).unwrap();

        assert_eq!(record.tomtom_incident_id, "tt-incident-1");
        assert_eq!(record.latitude, -1.2921);
        assert_eq!(record.longitude, 36.8219);
        assert_eq!(record.incident_type, IncidentType::Accident);
        assert_eq!(record.location_description, "Haile Selassie Avenue");
        assert_eq!(record.road_numbers, vec!["A104"]);
        assert_eq!(record.number_of_reports, 4);
        assert!(record.is_active);
        assert_eq!(record.time_of_day, "morning");
        assert_eq!(record.day_of_week, "Monday");
        assert!(!record.is_weekend);
    }

    #[test]
    fn test_process_incident_linestring_uses_first_pair() {
        let mut incident = sample_incident();
        incident["geometry"]["coordinates"] = json!([[36.80, -1.28], [36.82, -1.30]]);

        let record = process_incident(&incident, "Nairobi", Utc::now()).unwrap();

        assert_eq!(record.longitude, 36.80);
        assert_eq!(record.latitude, -1.28);
    }

    #[test]
    fn test_process_incident_rejects_bad_coordinates() {
        let mut incident = sample_incident();

        incident["geometry"]["coordinates"] = json!([]);
        assert!(process_incident(&incident, "Nairobi", Utc::now()).is_err());

        incident["geometry"]["coordinates"] = json!([200.0, -95.0]);
        assert!(process_incident(&incident, "Nairobi", Utc::now()).is_err());

        incident["geometry"]["coordinates"] = json!(["not", "numbers"]);
        assert!(process_incident(&incident, "Nairobi", Utc::now()).is_err());
    }

    #[test]
    fn test_process_incident_requires_id() {
        let mut incident = sample_incident();
        incident["properties"].as_object_mut().unwrap().remove("id");

        assert!(process_incident(&incident, "Nairobi", Utc::now()).is_err());
    }

    #[test]
    fn test_process_incident_expired_is_inactive() {
        let mut incident = sample_incident();
        incident["properties"]["endTime"] = json!("2020-01-01T00:00:00Z");

        let record = process_incident(&incident, "Nairobi", Utc::now()).unwrap();

        assert!(!record.is_active);
    }

    #[test]
    fn test_process_flow() {
        let now = Utc.with_ymd_and_hms(2025, 6, 7, 22, 0, 0).unwrap();
        let flow = json!({
            "flowSegmentData": {
                "currentSpeed": 30.0,
                "freeFlowSpeed": 60.0,
                "currentTravelTime": 120.0,
                "freeFlowTravelTime": 60.0,
                "roadClosure": false,
                "confidence": 0.95,
            }
        });

        let record = process_flow(&flow, Point::new(-1.29, 36.82), "Nairobi", now).unwrap();

        assert_eq!(record.congestion_ratio, 0.5);
        assert_eq!(record.delay_factor, 2.0);
        assert_eq!(record.confidence, Some(0.95));
        assert_eq!(record.time_of_day, "night");
        assert!(record.is_weekend);

        assert!(process_flow(&json!({}), Point::new(0.0, 0.0), "Nairobi", now).is_none());
    }

    #[test]
    fn test_categorize_incident_type() {
        let codes = |codes: &[&str]| codes.iter().map(|c| c.to_string()).collect::<Vec<_>>();

        assert_eq!(categorize_incident_type(&codes(&["2"])), IncidentType::Accident);
        assert_eq!(categorize_incident_type(&codes(&["5"])), IncidentType::Construction);
        assert_eq!(categorize_incident_type(&codes(&["8"])), IncidentType::RoadClosure);
        assert_eq!(categorize_incident_type(&codes(&["10"])), IncidentType::Weather);
        assert_eq!(categorize_incident_type(&codes(&["11"])), IncidentType::Event);
        assert_eq!(categorize_incident_type(&codes(&["14"])), IncidentType::Breakdown);
        assert_eq!(categorize_incident_type(&codes(&["99"])), IncidentType::Other);
        assert_eq!(categorize_incident_type(&codes(&[])), IncidentType::Other);

        // First recognized code wins.
        assert_eq!(categorize_incident_type(&codes(&["99", "9"])), IncidentType::Weather);
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(time_of_day(7), "morning");
        assert_eq!(time_of_day(13), "afternoon");
        assert_eq!(time_of_day(18), "evening");
        assert_eq!(time_of_day(23), "night");
        assert_eq!(time_of_day(3), "night");
    }
}
