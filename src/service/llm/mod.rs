pub mod heuristic;
pub mod openai;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::base::{
    config::Config,
    types::{Res, TrafficAnalysis},
};

// Types.

/// Inputs for a standard traffic analysis.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub location: String,
    /// Raw flow data from the traffic API.
    pub traffic_data: Value,
    /// Raw incidents data from the traffic API.
    pub incidents_data: Value,
}

/// Inputs for a detailed, multi-point traffic analysis.
#[derive(Debug, Clone)]
pub struct DetailedAnalysisContext {
    pub location: String,
    /// Aggregated detailed traffic data (flow points, incidents, major routes).
    pub detailed_data: Value,
}

// Traits.

/// Generic LLM client trait that analyzers must implement.
///
/// This trait defines the core functionality for turning raw traffic data
/// into prose analysis and recommendations. Implementing this trait allows
/// different providers (or the offline heuristic) to back report generation.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Analyze flow and incident data for a single location.
    async fn analyze_traffic(&self, context: &AnalysisContext) -> Res<TrafficAnalysis>;

    /// Analyze aggregated multi-point data for a detailed report.
    async fn analyze_detailed_traffic(&self, context: &DetailedAnalysisContext) -> Res<TrafficAnalysis>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }

    /// Pick an analyzer based on configured credentials.
    ///
    /// Prefers OpenRouter, then OpenAI, then the offline heuristic analyzer.
    pub fn from_config(config: &Config) -> Self {
        if !config.openrouter_api_key.is_empty() {
            info!("Using OpenRouter with model {} for traffic analysis.", config.ai_model);
            Self::openrouter(config)
        } else if !config.openai_api_key.is_empty() {
            info!("Using OpenAI with model {} for traffic analysis.", config.openai_model);
            Self::openai(config)
        } else {
            info!("Using heuristic traffic analysis (no API key configured).");
            Self::heuristic()
        }
    }
}

// Response parsing.

/// Parse an LLM response into analysis and recommendations sections.
///
/// Looks for `ANALYSIS:` / `RECOMMENDATIONS:` markers line by line; falls back
/// to splitting on the marker words anywhere in the text, then to halving the
/// response, so a sloppy model still produces a usable report.
pub fn parse_analysis_response(response: &str) -> (String, String) {
    let mut analysis = String::new();
    let mut recommendations = String::new();

    enum Section {
        None,
        Analysis,
        Recommendations,
    }

    let mut current = Section::None;

    for line in response.lines() {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("ANALYSIS:") {
            current = Section::Analysis;
            analysis = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("RECOMMENDATIONS:") {
            current = Section::Recommendations;
            recommendations = rest.trim().to_string();
        } else if !line.is_empty() {
            match current {
                Section::Analysis => {
                    if !analysis.is_empty() {
                        analysis.push(' ');
                    }
                    analysis.push_str(line);
                }
                Section::Recommendations => {
                    if !recommendations.is_empty() {
                        recommendations.push('\n');
                    }
                    recommendations.push_str(line);
                }
                Section::None => {}
            }
        }
    }

    if analysis.is_empty() || recommendations.is_empty() {
        let upper = response.to_uppercase();

        if upper.contains("ANALYSIS") && upper.contains("RECOMMENDATIONS") {
            if let Some(idx) = upper.find("RECOMMENDATIONS") {
                let head = &response[..idx];
                let tail = &response[idx + "RECOMMENDATIONS".len()..];

                analysis = head.replace("ANALYSIS:", "").replace("ANALYSIS", "").trim().to_string();
                recommendations = tail.trim_start_matches(':').trim().to_string();
            }
        } else {
            // Last resort: split the response in half.
            let mid = response.len() / 2;
            let mid = response.char_indices().map(|(i, _)| i).min_by_key(|i| i.abs_diff(mid)).unwrap_or(0);
            analysis = response[..mid].trim().to_string();
            recommendations = response[mid..].trim().to_string();
        }
    }

    if analysis.is_empty() {
        analysis = "Traffic conditions analyzed.".to_string();
    }
    if recommendations.is_empty() {
        recommendations = "Monitor traffic conditions and plan accordingly.".to_string();
    }

    (analysis, recommendations)
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed_response() {
        let response = "ANALYSIS: Traffic is heavy on Uhuru Highway.\nRECOMMENDATIONS: Use Waiyaki Way instead.";

        let (analysis, recommendations) = parse_analysis_response(response);

        assert_eq!(analysis, "Traffic is heavy on Uhuru Highway.");
        assert_eq!(recommendations, "Use Waiyaki Way instead.");
    }

    #[test]
    fn test_parse_multiline_sections() {
        let response = "ANALYSIS: Congestion is severe.\nSpeeds are down 60%.\n\nRECOMMENDATIONS: Delay trips.\nUse public transport.";

        let (analysis, recommendations) = parse_analysis_response(response);

        assert_eq!(analysis, "Congestion is severe. Speeds are down 60%.");
        assert_eq!(recommendations, "Delay trips.\nUse public transport.");
    }

    #[test]
    fn test_parse_loose_markers() {
        let response = "Some Analysis of the situation here. Recommendations follow: avoid the CBD.";

        let (analysis, recommendations) = parse_analysis_response(response);

        assert!(!analysis.is_empty());
        assert!(!recommendations.is_empty());
        assert!(recommendations.contains("avoid the CBD"));
    }

    #[test]
    fn test_parse_garbage_still_yields_defaults() {
        let (analysis, recommendations) = parse_analysis_response("");

        assert_eq!(analysis, "Traffic conditions analyzed.");
        assert_eq!(recommendations, "Monitor traffic conditions and plan accordingly.");
    }

    #[test]
    fn test_parse_unstructured_text_splits() {
        let response = "The roads are busy today across the city. Drivers should plan extra time for their trips.";

        let (analysis, recommendations) = parse_analysis_response(response);

        assert!(!analysis.is_empty());
        assert!(!recommendations.is_empty());
    }
}
