//! Offline heuristic traffic analyzer.
//!
//! Used when no LLM credentials are configured, and as the fallback when the
//! LLM provider fails. Produces the same response shape as the LLM path so
//! report generation never depends on upstream availability.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use serde_json::Value;
use tracing::instrument;

use crate::base::types::{Res, TrafficAnalysis};

use super::{AnalysisContext, DetailedAnalysisContext, GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the heuristic implementation.

impl LlmClient {
    pub fn heuristic() -> Self {
        Self {
            inner: Arc::new(HeuristicAnalyzer),
        }
    }
}

// Metric extraction, shared with the LLM-backed analyzer.

/// Congestion percentage and current speed from raw flow segment data.
pub fn flow_metrics(traffic_data: &Value) -> (u32, f64) {
    let Some(segment) = traffic_data.get("flowSegmentData") else {
        return (0, 0.0);
    };

    let current_speed = segment.get("currentSpeed").and_then(Value::as_f64).unwrap_or(0.0);
    let free_flow_speed = segment.get("freeFlowSpeed").and_then(Value::as_f64).unwrap_or(0.0);

    let congestion = if free_flow_speed > 0.0 {
        ((1.0 - current_speed / free_flow_speed).max(0.0) * 100.0).round() as u32
    } else {
        0
    };

    (congestion, current_speed)
}

/// Number of incidents in a raw incidents payload.
pub fn count_incidents(incidents_data: &Value) -> usize {
    incidents_data.get("incidents").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0)
}

/// Aggregated metrics over a detailed multi-point payload.
#[derive(Debug, Clone, Default)]
pub struct DetailedMetrics {
    pub avg_speed: f64,
    /// Worst congestion percentage across sampled points.
    pub overall_congestion: u32,
    pub congested_areas: Vec<CongestedArea>,
    pub incident_count: usize,
    pub routes_analyzed: usize,
}

/// A sampled point with significant congestion.
#[derive(Debug, Clone)]
pub struct CongestedArea {
    pub location: String,
    pub congestion: u32,
    pub current_speed: f64,
    pub free_flow_speed: f64,
}

/// Threshold above which a sampled point counts as congested.
const CONGESTED_AREA_THRESHOLD: f64 = 40.0;

pub fn detailed_metrics(detailed_data: &Value) -> DetailedMetrics {
    let mut metrics = DetailedMetrics::default();
    let mut speeds = Vec::new();

    let flow_points = detailed_data.get("traffic_flow_points").and_then(Value::as_array).cloned().unwrap_or_default();

    for point in &flow_points {
        let Some(segment) = point.get("flowSegmentData") else { continue };

        let current_speed = segment.get("currentSpeed").and_then(Value::as_f64).unwrap_or(0.0);
        let free_flow_speed = segment.get("freeFlowSpeed").and_then(Value::as_f64).unwrap_or(0.0);

        if current_speed <= 0.0 {
            continue;
        }

        speeds.push(current_speed);

        if free_flow_speed > 0.0 {
            let congestion = (1.0 - current_speed / free_flow_speed) * 100.0;
            if congestion > CONGESTED_AREA_THRESHOLD {
                let coords = point.get("coordinates").and_then(Value::as_array).cloned().unwrap_or_default();
                let location = match (coords.first().and_then(Value::as_f64), coords.get(1).and_then(Value::as_f64)) {
                    (Some(lat), Some(lon)) => format!("Area near {lat:.4}, {lon:.4}"),
                    _ => "Sampled area".to_string(),
                };

                metrics.congested_areas.push(CongestedArea {
                    location,
                    congestion: congestion.round() as u32,
                    current_speed,
                    free_flow_speed,
                });
            }
        }
    }

    if !speeds.is_empty() {
        metrics.avg_speed = (speeds.iter().sum::<f64>() / speeds.len() as f64).round();
    }

    metrics.overall_congestion = metrics.congested_areas.iter().map(|a| a.congestion).max().unwrap_or(0);
    metrics.incident_count = count_incidents(detailed_data.get("incidents").unwrap_or(&Value::Null));
    metrics.routes_analyzed = detailed_data.get("major_routes").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);

    metrics
}

/// Time-of-day framing for analysis text.
fn time_frame(hour: u32) -> &'static str {
    match hour {
        7..=9 => "Morning rush hour",
        17..=19 => "Evening rush hour",
        12..=14 => "Midday",
        _ => "Off-peak",
    }
}

// Specific implementations.

/// Rule-based analyzer mirroring the tiers the dashboard uses.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    /// Run the standard analysis at a fixed hour, for deterministic tests.
    pub fn analyze_at_hour(&self, context: &AnalysisContext, hour: u32) -> TrafficAnalysis {
        let (congestion_level, current_speed) = flow_metrics(&context.traffic_data);
        let incident_count = count_incidents(&context.incidents_data);

        let mut analysis_parts = vec![format!("{} traffic analysis for {}.", time_frame(hour), context.location)];

        analysis_parts.push(
            match congestion_level {
                76.. => "Traffic is experiencing severe congestion with significantly reduced speeds.",
                51..=75 => "Moderate to heavy traffic congestion is currently affecting travel times.",
                26..=50 => "Light traffic congestion with minimal impact on travel times.",
                _ => "Traffic is flowing smoothly with minimal congestion.",
            }
            .to_string(),
        );

        if current_speed > 0.0 {
            analysis_parts.push(format!("Current average speed is {current_speed} km/h."));
        }

        analysis_parts.push(match incident_count {
            0 => "No major incidents reported in the area.".to_string(),
            1..=2 => format!("Low incident activity with {incident_count} reported incident(s)."),
            3..=5 => format!("Moderate incident activity with {incident_count} reported incidents."),
            _ => format!("High incident activity with {incident_count} reported incidents affecting traffic flow."),
        });

        let mut recommendations: Vec<&str> = match congestion_level {
            76.. => vec![
                "Consider delaying non-essential trips if possible",
                "Use alternative routes to avoid heavily congested areas",
                "Allow extra time for planned journeys",
                "Consider using public transportation if available",
            ],
            51..=75 => vec![
                "Plan for additional travel time",
                "Consider alternative routes for time-sensitive trips",
                "Monitor real-time traffic updates",
            ],
            26..=50 => vec!["Minor delays possible, plan accordingly", "Good time for non-urgent travel"],
            _ => vec!["Excellent conditions for travel", "Optimal time for longer journeys"],
        };

        if incident_count > 2 {
            recommendations.push("Stay alert for incident-related delays and road closures");
        }

        if matches!(hour, 7..=9 | 17..=19) {
            recommendations.push("Rush hour periods - expect increased traffic volume");
        }

        TrafficAnalysis {
            analysis: analysis_parts.join(" "),
            recommendations: recommendations.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n"),
            congestion_level,
            avg_speed: current_speed,
            incident_count,
            congested_areas_count: 0,
            major_routes_analyzed: 0,
        }
    }

    /// Run the detailed analysis at a fixed hour, for deterministic tests.
    pub fn analyze_detailed_at_hour(&self, context: &DetailedAnalysisContext, hour: u32) -> TrafficAnalysis {
        let metrics = detailed_metrics(&context.detailed_data);

        let mut analysis_parts = vec![format!("{} analysis for {}.", time_frame(hour), context.location)];

        analysis_parts.push(
            match metrics.overall_congestion {
                76.. => "Severe congestion detected: multiple areas are experiencing significant delays.",
                51..=75 => "Heavy traffic conditions: moderate to severe congestion in several areas.",
                26..=50 => "Moderate traffic: some congestion but generally manageable.",
                _ => "Good traffic conditions: smooth flow with minimal congestion.",
            }
            .to_string(),
        );

        if metrics.avg_speed > 0.0 {
            analysis_parts.push(format!("Average speed is {} km/h across monitored points.", metrics.avg_speed));
        }

        if !metrics.congested_areas.is_empty() {
            analysis_parts.push("Congested areas:".to_string());
            for area in metrics.congested_areas.iter().take(5) {
                analysis_parts.push(format!(
                    "{}: {}% congestion ({} km/h vs {} km/h normal).",
                    area.location, area.congestion, area.current_speed, area.free_flow_speed
                ));
            }
        }

        if metrics.incident_count > 0 {
            analysis_parts.push(format!("{} live incidents reported across the area.", metrics.incident_count));
        }

        if metrics.routes_analyzed > 0 {
            analysis_parts.push(format!("{} major routes analyzed.", metrics.routes_analyzed));
        }

        let recommendations: Vec<&str> = match metrics.overall_congestion {
            76.. => vec![
                "Avoid travel if possible, severe congestion citywide",
                "Use public transport where available",
                "Delay trips until after peak hours if flexible",
                "Monitor real-time updates for improvements",
            ],
            51..=75 => vec![
                "Allow extra time, expect significantly longer travel times",
                "Use alternative routes and avoid main highways",
                "Check navigation apps for real-time routing",
            ],
            26..=50 => vec!["Plan extra time, minor delays possible", "Stay flexible with route choices", "Monitor conditions for changes"],
            _ => vec!["Good time to travel, optimal conditions", "Normal routes are functioning well"],
        };

        TrafficAnalysis {
            analysis: analysis_parts.join(" "),
            recommendations: recommendations.iter().map(|r| format!("- {r}")).collect::<Vec<_>>().join("\n"),
            congestion_level: metrics.overall_congestion,
            avg_speed: metrics.avg_speed,
            incident_count: metrics.incident_count,
            congested_areas_count: metrics.congested_areas.len(),
            major_routes_analyzed: metrics.routes_analyzed,
        }
    }
}

#[async_trait]
impl GenericLlmClient for HeuristicAnalyzer {
    #[instrument(name = "HeuristicAnalyzer::analyze_traffic", skip_all)]
    async fn analyze_traffic(&self, context: &AnalysisContext) -> Res<TrafficAnalysis> {
        Ok(self.analyze_at_hour(context, Utc::now().hour()))
    }

    #[instrument(name = "HeuristicAnalyzer::analyze_detailed_traffic", skip_all)]
    async fn analyze_detailed_traffic(&self, context: &DetailedAnalysisContext) -> Res<TrafficAnalysis> {
        Ok(self.analyze_detailed_at_hour(context, Utc::now().hour()))
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn flow(current: f64, free: f64) -> Value {
        json!({"flowSegmentData": {"currentSpeed": current, "freeFlowSpeed": free}})
    }

    #[test]
    fn test_flow_metrics() {
        assert_eq!(flow_metrics(&flow(30.0, 60.0)), (50, 30.0));
        assert_eq!(flow_metrics(&flow(60.0, 60.0)), (0, 60.0));
        assert_eq!(flow_metrics(&json!({})), (0, 0.0));

        // Speeds above free flow clamp congestion to zero.
        assert_eq!(flow_metrics(&flow(80.0, 60.0)).0, 0);
    }

    #[test]
    fn test_count_incidents() {
        assert_eq!(count_incidents(&json!({"incidents": [1, 2, 3]})), 3);
        assert_eq!(count_incidents(&json!({})), 0);
        assert_eq!(count_incidents(&Value::Null), 0);
    }

    #[test]
    fn test_heavy_congestion_analysis() {
        let context = AnalysisContext {
            location: "Nairobi".to_string(),
            traffic_data: flow(10.0, 80.0),
            incidents_data: json!({"incidents": [{}, {}, {}, {}, {}, {}]}),
        };

        let result = HeuristicAnalyzer.analyze_at_hour(&context, 8);

        assert_eq!(result.congestion_level, 88);
        assert_eq!(result.incident_count, 6);
        assert!(result.analysis.contains("Morning rush hour"));
        assert!(result.analysis.contains("severe congestion"));
        assert!(result.recommendations.contains("delaying non-essential trips"));
        assert!(result.recommendations.contains("Rush hour periods"));
    }

    #[test]
    fn test_smooth_traffic_analysis() {
        let context = AnalysisContext {
            location: "Kisumu".to_string(),
            traffic_data: flow(58.0, 60.0),
            incidents_data: json!({"incidents": []}),
        };

        let result = HeuristicAnalyzer.analyze_at_hour(&context, 11);

        assert!(result.congestion_level <= 25);
        assert!(result.analysis.contains("flowing smoothly"));
        assert!(result.analysis.contains("No major incidents"));
        assert!(result.recommendations.contains("Excellent conditions"));
    }

    #[test]
    fn test_detailed_metrics_and_analysis() {
        let detailed = json!({
            "traffic_flow_points": [
                {"flowSegmentData": {"currentSpeed": 20.0, "freeFlowSpeed": 80.0}, "coordinates": [-1.29, 36.82]},
                {"flowSegmentData": {"currentSpeed": 50.0, "freeFlowSpeed": 60.0}, "coordinates": [-1.30, 36.83]},
                {"flowSegmentData": {"currentSpeed": 0.0, "freeFlowSpeed": 60.0}, "coordinates": [-1.31, 36.84]},
            ],
            "incidents": {"incidents": [{}, {}]},
            "major_routes": [{"route_name": "Uhuru Highway"}],
        });

        let metrics = detailed_metrics(&detailed);

        // The stopped point is skipped; one of the two remaining is congested.
        assert_eq!(metrics.congested_areas.len(), 1);
        assert_eq!(metrics.overall_congestion, 75);
        assert_eq!(metrics.avg_speed, 35.0);
        assert_eq!(metrics.incident_count, 2);
        assert_eq!(metrics.routes_analyzed, 1);

        let context = DetailedAnalysisContext {
            location: "Nairobi".to_string(),
            detailed_data: detailed,
        };
        let result = HeuristicAnalyzer.analyze_detailed_at_hour(&context, 18);

        assert_eq!(result.congested_areas_count, 1);
        assert_eq!(result.major_routes_analyzed, 1);
        assert!(result.analysis.contains("Evening rush hour"));
        assert!(result.analysis.contains("Congested areas"));
    }
}
