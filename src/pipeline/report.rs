//! Upstream inverter report source.
//!
//! The monitoring portal export is opaque to the pipeline: something that
//! hands back CSV text. The HTTP implementation downloads it from a fixed URL.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::PlantId;

// ---

/// Where the report subgraph gets its CSV export from.
#[async_trait]
pub trait ReportSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
}

/// Report subgraph settings.
#[derive(Clone)]
pub struct ReportSettings {
    // ---
    pub source: std::sync::Arc<dyn ReportSource>,
    /// Injected into report rows without a plant id.
    pub plant_id: Option<PlantId>,
    /// Zero-based line index of the header row in the export.
    pub header_row: usize,
}

/// Downloads the exported report with a plain GET.
#[derive(Debug, Clone)]
pub struct HttpReportSource {
    client: reqwest::Client,
    url: String,
}

impl HttpReportSource {
    // ---
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReportSource for HttpReportSource {
    // ---
    async fn fetch(&self) -> Result<String> {
        // ---
        debug!("Fetching report from: {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::UpstreamUnavailable(format!(
                "report endpoint answered {status}"
            )));
        }

        let body = response.text().await?;
        info!(bytes = body.len(), "Downloaded report");
        Ok(body)
    }
}
