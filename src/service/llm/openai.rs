//! LLM-backed traffic analyzer.
//!
//! Wraps the OpenAI-compatible chat completions API. The same implementation
//! serves OpenAI and OpenRouter, which differ only in API base, key, and
//! model. Failed calls fall back to the heuristic analyzer so report
//! generation keeps working when the provider is down.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::base::{
    config::Config,
    prompts,
    types::{Res, TrafficAnalysis},
};

use super::{
    AnalysisContext, DetailedAnalysisContext, GenericLlmClient, LlmClient,
    heuristic::{HeuristicAnalyzer, count_incidents, detailed_metrics, flow_metrics},
    parse_analysis_response,
};

// Extra methods on `LlmClient` applied by the OpenAI-compatible implementation.

impl LlmClient {
    pub fn openrouter(config: &Config) -> Self {
        let api = OpenAIConfig::new().with_api_key(config.openrouter_api_key.clone()).with_api_base(config.openrouter_base_url.clone());
        let client = OpenAiLlmClient::new(config, api, &config.ai_model);
        Self { inner: Arc::new(client) }
    }

    pub fn openai(config: &Config) -> Self {
        let api = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());
        let client = OpenAiLlmClient::new(config, api, &config.openai_model);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// Analyzer backed by an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
    model: String,
    fallback: HeuristicAnalyzer,
}

impl OpenAiLlmClient {
    /// Create a new client against the given API config and model.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config, api: OpenAIConfig, model: &str) -> Self {
        Self {
            client: Client::with_config(api),
            config: config.clone(),
            model: model.to_string(),
            fallback: HeuristicAnalyzer,
        }
    }

    fn build_request(&self, system: &str, user: String) -> Res<CreateChatCompletionRequest> {
        Ok(CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.config.ai_temperature)
            .max_tokens(self.config.ai_max_tokens)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default().content(system).build()?.into(),
                ChatCompletionRequestUserMessageArgs::default().content(user).build()?.into(),
            ])
            .build()?)
    }

    /// Make the chat completion call with retry logic and timeout handling.
    async fn call_chat_api(&self, request: CreateChatCompletionRequest) -> Res<String> {
        const MAX_RETRIES: u32 = 3;
        const TIMEOUT: u64 = 60;
        const RETRY_DELAY_MS: u64 = 1000;

        let mut retries = 0;

        loop {
            let result = timeout(Duration::from_secs(TIMEOUT), self.client.chat().create(request.clone())).await;

            match result {
                Ok(Ok(response)) => {
                    info!("LLM API call succeeded after {} attempts", retries + 1);

                    let content = response.choices.into_iter().next().and_then(|c| c.message.content);
                    return content.filter(|c| !c.is_empty()).ok_or_else(|| anyhow::anyhow!("LLM returned an empty response"));
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("LLM API call failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("LLM API call failed, retrying {retries}/{MAX_RETRIES}: {err}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("LLM API call timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("LLM API call timed out, retrying {retries}/{MAX_RETRIES}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::analyze_traffic", skip_all)]
    async fn analyze_traffic(&self, context: &AnalysisContext) -> Res<TrafficAnalysis> {
        let prompt = prompts::analysis_prompt(&context.location, &context.traffic_data, &context.incidents_data);
        let request = self.build_request(prompts::ANALYST_SYSTEM_PROMPT, prompt)?;

        let content = match self.call_chat_api(request).await {
            Ok(content) => content,
            Err(err) => {
                warn!("Falling back to heuristic analysis: {err}");
                return self.fallback.analyze_traffic(context).await;
            }
        };

        let (analysis, recommendations) = parse_analysis_response(&content);

        // Numeric metrics come from the raw data either way; the LLM only
        // contributes the prose.
        let (congestion_level, avg_speed) = flow_metrics(&context.traffic_data);

        Ok(TrafficAnalysis {
            analysis,
            recommendations,
            congestion_level,
            avg_speed,
            incident_count: count_incidents(&context.incidents_data),
            congested_areas_count: 0,
            major_routes_analyzed: 0,
        })
    }

    #[instrument(name = "OpenAiLlmClient::analyze_detailed_traffic", skip_all)]
    async fn analyze_detailed_traffic(&self, context: &DetailedAnalysisContext) -> Res<TrafficAnalysis> {
        let prompt = prompts::detailed_analysis_prompt(&context.location, &context.detailed_data);
        let request = self.build_request(prompts::DETAILED_ANALYST_SYSTEM_PROMPT, prompt)?;

        let content = match self.call_chat_api(request).await {
            Ok(content) => content,
            Err(err) => {
                warn!("Falling back to heuristic detailed analysis: {err}");
                return self.fallback.analyze_detailed_traffic(context).await;
            }
        };

        let (analysis, recommendations) = parse_analysis_response(&content);
        let metrics = detailed_metrics(&context.detailed_data);

        Ok(TrafficAnalysis {
            analysis,
            recommendations,
            congestion_level: metrics.overall_congestion,
            avg_speed: metrics.avg_speed,
            incident_count: metrics.incident_count,
            congested_areas_count: metrics.congested_areas.len(),
            major_routes_analyzed: metrics.routes_analyzed,
        })
    }
}
