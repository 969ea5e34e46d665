//! TomTom implementation of the traffic data API.
//!
//! Thin wrapper over the TomTom flow, incidents, search, and routing
//! endpoints. All calls are authenticated by API key query parameter and
//! bounded by per-endpoint timeouts.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::{
    base::{config::Config, types::Res},
    geo::{BoundingBox, Point},
};

use super::{GenericTrafficApi, GeocodeResult, ReverseGeocodeResult, TrafficClient};

/// Field projection requested from the incidents endpoint.
const INCIDENT_FIELDS: &str = "{incidents{type,geometry{type,coordinates},properties{id,iconCategory,magnitudeOfDelay,events{description,code,iconCategory},startTime,endTime,from,to,length,delay,roadNumbers,timeValidity,probabilityOfOccurrence,numberOfReports,lastReportTime}}}";

/// Timeout for flow and search requests.
const FLOW_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the heavier incidents request.
const INCIDENTS_TIMEOUT: Duration = Duration::from_secs(15);

// Extra methods on `TrafficClient` applied by the TomTom implementation.

impl TrafficClient {
    pub fn tomtom(config: &Config) -> Self {
        let client = TomTomApiClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// TomTom traffic API client.
#[derive(Clone)]
pub struct TomTomApiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl TomTomApiClient {
    /// Create a new TomTom API client.
    #[instrument(name = "TomTomApiClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            api_key: config.tomtom_api_key.clone(),
            base_url: config.tomtom_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)], timeout: Duration) -> Res<Value> {
        let response = self.http.get(url).query(params).timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("TomTom API returned {status}: {body}"));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl GenericTrafficApi for TomTomApiClient {
    #[instrument(name = "TomTomApiClient::flow_segment", skip(self))]
    async fn flow_segment(&self, point: Point) -> Res<Value> {
        let url = format!("{}/traffic/services/4/flowSegmentData/absolute/10/json", self.base_url);

        let params = [
            ("key", self.api_key.clone()),
            ("point", format!("{},{}", point.lat, point.lon)),
            ("unit", "KMPH".to_string()),
            ("openLr", "false".to_string()),
        ];

        self.get_json(&url, &params, FLOW_TIMEOUT).await
    }

    #[instrument(name = "TomTomApiClient::incidents", skip(self))]
    async fn incidents(&self, bbox: &BoundingBox, category_filter: Option<&'static str>) -> Res<Value> {
        let url = format!("{}/traffic/services/5/incidentDetails", self.base_url);

        let mut params = vec![
            ("key", self.api_key.clone()),
            ("bbox", bbox.to_query()),
            ("fields", INCIDENT_FIELDS.to_string()),
            ("language", "en-US".to_string()),
            ("timeValidityFilter", "present".to_string()),
        ];

        if let Some(filter) = category_filter {
            params.push(("categoryFilter", filter.to_string()));
        }

        self.get_json(&url, &params, INCIDENTS_TIMEOUT).await
    }

    #[instrument(name = "TomTomApiClient::geocode", skip(self))]
    async fn geocode(&self, query: &str) -> Res<Option<GeocodeResult>> {
        let url = format!("{}/search/2/geocode/{}.json", self.base_url, query);

        let params = [("key", self.api_key.clone()), ("countrySet", "KE".to_string()), ("limit", "1".to_string())];

        let data = self.get_json(&url, &params, FLOW_TIMEOUT).await?;

        let Some(result) = data.get("results").and_then(Value::as_array).and_then(|r| r.first()) else {
            return Ok(None);
        };

        let position = result.get("position").cloned().unwrap_or_default();
        let (Some(lat), Some(lon)) = (position.get("lat").and_then(Value::as_f64), position.get("lon").and_then(Value::as_f64)) else {
            warn!("Geocode result for `{query}` has no position.");
            return Ok(None);
        };

        let address = result.get("address").cloned().unwrap_or_default();

        Ok(Some(GeocodeResult {
            latitude: lat,
            longitude: lon,
            formatted_address: address.get("freeformAddress").and_then(Value::as_str).unwrap_or(query).to_string(),
            country: address.get("country").and_then(Value::as_str).unwrap_or_default().to_string(),
            confidence: result.get("score").and_then(Value::as_f64).unwrap_or(0.0),
        }))
    }

    #[instrument(name = "TomTomApiClient::reverse_geocode", skip(self))]
    async fn reverse_geocode(&self, point: Point) -> Res<Option<ReverseGeocodeResult>> {
        let url = format!("{}/search/2/reverseGeocode/{},{}.json", self.base_url, point.lat, point.lon);

        let params = [("key", self.api_key.clone())];

        let data = self.get_json(&url, &params, FLOW_TIMEOUT).await?;

        let Some(address) = data.get("addresses").and_then(Value::as_array).and_then(|a| a.first()).and_then(|a| a.get("address")) else {
            return Ok(None);
        };

        let field = |name: &str| address.get(name).and_then(Value::as_str).unwrap_or_default().to_string();

        Ok(Some(ReverseGeocodeResult {
            formatted_address: field("freeformAddress"),
            street: field("streetName"),
            city: field("municipality"),
            country: field("country"),
            postal_code: field("postalCode"),
        }))
    }

    #[instrument(name = "TomTomApiClient::route_traffic", skip(self))]
    async fn route_traffic(&self, start: Point, end: Point) -> Res<Value> {
        let url = format!("{}/routing/1/calculateRoute/{},{}:{},{}/json", self.base_url, start.lat, start.lon, end.lat, end.lon);

        let params = [
            ("key", self.api_key.clone()),
            ("traffic", "true".to_string()),
            ("travelMode", "car".to_string()),
            ("routeType", "fastest".to_string()),
        ];

        self.get_json(&url, &params, INCIDENTS_TIMEOUT).await
    }
}
