//! Publication channel: forecast products sent downstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::timeline::ForecastSummary;

/// Publication failure at any step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublicationError {
    #[error("Failed to build product: {0}")]
    Build(String),

    #[error("Failed to sign product: {0}")]
    Sign(String),

    #[error("Failed to send product: {0}")]
    Send(String),
}

/// A forecast product ready for transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// External id of the mainshock.
    pub event_code: String,
    pub lag: i64,
    pub is_reviewed: bool,
    pub body: serde_json::Value,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Downstream publication client.
#[async_trait]
pub trait PublicationChannel: Send + Sync {
    fn build_product(
        &self,
        forecast: &ForecastSummary,
        event_code: &str,
        is_reviewed: bool,
    ) -> Result<Product, PublicationError>;

    fn sign(&self, product: &mut Product) -> Result<(), PublicationError>;

    async fn send(&self, product: &Product) -> Result<(), PublicationError>;
}

/// Build, sign and send in one step.
pub async fn publish_forecast(
    channel: &dyn PublicationChannel,
    forecast: &ForecastSummary,
    event_code: &str,
    is_reviewed: bool,
) -> Result<Product, PublicationError> {
    let mut product = channel.build_product(forecast, event_code, is_reviewed)?;
    channel.sign(&mut product)?;
    channel.send(&product).await?;
    Ok(product)
}
