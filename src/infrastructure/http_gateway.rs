// HTTP gateway implementation for the instance topics and metrics APIs
use crate::application::metrics_gateway::DataFetchGateway;
use crate::domain::metrics::{FetchParameters, FetchResult, TimeSeriesPoint};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};

const MAX_POINTS_PER_SERIES: u32 = 150;

#[derive(Debug, Clone)]
pub struct HttpMetricsGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct TopicListResponse {
    #[serde(default)]
    items: Vec<TopicItem>,
}

#[derive(Debug, Deserialize)]
struct TopicItem {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RangeQueryResponse {
    #[serde(default)]
    items: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    #[serde(default)]
    values: Vec<RangePoint>,
}

#[derive(Debug, Deserialize)]
struct RangePoint {
    timestamp: i64,
    value: f64,
}

impl HttpMetricsGateway {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn topics_url(&self, instance_id: &str) -> String {
        format!(
            "{}/api/v1/instances/{}/topics",
            self.base_url,
            urlencoding::encode(instance_id)
        )
    }

    fn query_range_url(&self, params: &FetchParameters) -> String {
        let mut url = format!(
            "{}/api/v1/instances/{}/metrics/query_range?duration_minutes={}&interval_seconds={}",
            self.base_url,
            urlencoding::encode(&params.instance_id),
            params.time_window_minutes,
            interval_seconds(params.time_window_minutes)
        );
        if let Some(topic) = &params.selected_topic {
            url.push_str("&topic=");
            url.push_str(&urlencoding::encode(topic));
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Request to {} failed with status {}: {}", url, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    async fn list_topics(&self, instance_id: &str) -> Result<TopicListResponse> {
        self.get_json(&self.topics_url(instance_id)).await
    }

    async fn query_range(&self, params: &FetchParameters) -> Result<RangeQueryResponse> {
        self.get_json(&self.query_range_url(params)).await
    }
}

#[async_trait]
impl DataFetchGateway for HttpMetricsGateway {
    async fn fetch(&self, params: &FetchParameters) -> Result<FetchResult> {
        tracing::debug!(
            instance_id = %params.instance_id,
            topic = ?params.selected_topic,
            window_minutes = params.time_window_minutes,
            "Fetching topics and metrics"
        );

        let (topics, metrics) =
            futures::try_join!(self.list_topics(&params.instance_id), self.query_range(params))?;

        let result = combine(topics, metrics);
        if !result.has_topics() {
            tracing::debug!("No topics reported for instance {}", params.instance_id);
        }
        tracing::debug!(
            "Fetched {} topics and {} series for instance {}",
            result.available_topics.len(),
            result.series.len(),
            params.instance_id
        );
        Ok(result)
    }
}

fn interval_seconds(window_minutes: u32) -> u32 {
    (window_minutes.saturating_mul(60) / MAX_POINTS_PER_SERIES).max(1)
}

fn combine(topics: TopicListResponse, metrics: RangeQueryResponse) -> FetchResult {
    let mut series: BTreeMap<String, Vec<TimeSeriesPoint>> = BTreeMap::new();

    for item in metrics.items {
        // Instance-wide series carry no topic label.
        let Some(topic) = item.metric.get("topic") else {
            continue;
        };

        let points = series.entry(topic.clone()).or_default();
        points.extend(
            item.values
                .into_iter()
                .map(|p| TimeSeriesPoint::new(p.timestamp, p.value)),
        );
    }

    for points in series.values_mut() {
        points.sort_by_key(|p| p.time_ms);
    }

    FetchResult::new(topics.items.into_iter().map(|t| t.name), series)
}
