//! System prompts for LLM traffic analysis.

/// System prompt for the standard analysis request.
pub const ANALYST_SYSTEM_PROMPT: &str = "You are a traffic analysis expert for Kenya. Analyze the provided traffic data and generate practical insights and recommendations for drivers in Kenyan cities. Focus on local context and practical advice.";

/// System prompt for the detailed, multi-point analysis request.
pub const DETAILED_ANALYST_SYSTEM_PROMPT: &str = "You are an expert traffic analyst for Kenya specializing in comprehensive traffic reports. Analyze the provided multi-point traffic data, incidents, and major route conditions. Use real data insights, local context, and provide actionable recommendations. Format the response with clear sections.";

/// Build the user prompt for the standard analysis request.
///
/// The expected response format mirrors what the response parser looks for:
/// an `ANALYSIS:` section followed by a `RECOMMENDATIONS:` section.
pub fn analysis_prompt(location: &str, traffic_data: &serde_json::Value, incidents_data: &serde_json::Value) -> String {
    format!(
        r#"Analyze the following traffic data for {location} and provide insights:

TRAFFIC DATA:
{traffic}

INCIDENTS DATA:
{incidents}

Please provide:
1. ANALYSIS: A detailed analysis of the current traffic situation
2. RECOMMENDATIONS: Practical recommendations for drivers

Format your response as:
ANALYSIS: [your analysis here]
RECOMMENDATIONS: [your recommendations here]
"#,
        traffic = serde_json::to_string_pretty(traffic_data).unwrap_or_default(),
        incidents = serde_json::to_string_pretty(incidents_data).unwrap_or_default(),
    )
}

/// Build the user prompt for the detailed analysis request.
pub fn detailed_analysis_prompt(location: &str, detailed_data: &serde_json::Value) -> String {
    format!(
        r#"Analyze the following comprehensive traffic data for {location}, covering multiple sampling points, live incidents, and major routes:

DETAILED TRAFFIC DATA:
{detailed}

Please provide:
1. ANALYSIS: A comprehensive analysis of traffic conditions across the area
2. RECOMMENDATIONS: Practical recommendations for drivers and traffic planners

Format your response as:
ANALYSIS: [your analysis here]
RECOMMENDATIONS: [your recommendations here]
"#,
        detailed = serde_json::to_string_pretty(detailed_data).unwrap_or_default(),
    )
}
