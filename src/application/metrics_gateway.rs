// Gateway trait for topic and metrics data access
use crate::domain::metrics::{FetchParameters, FetchResult};
use async_trait::async_trait;

#[async_trait]
pub trait DataFetchGateway: Send + Sync {
    /// Fetch the topic list and the time series for one set of parameters.
    /// Transport, status and decode failures all surface as `Err`.
    async fn fetch(&self, params: &FetchParameters) -> anyhow::Result<FetchResult>;
}
