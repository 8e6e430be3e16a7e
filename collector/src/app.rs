use crate::ingest::HttpTransport;
use crate::model::{ArrivalsDataset, LineSummary, StatusDataset};
use crate::pipeline::{Pipeline, RunReport};
use chrono::{DateTime, Utc};
use collector_core::backoff::TokioSleeper;
use collector_core::{Config, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct App {
    config: Config,
    pipeline: Pipeline,
}

impl App {
    #[instrument(skip(config))]
    pub fn new(config: Config) -> Result<Self> {
        info!(base_url = %config.api.base_url, "Initializing collector");

        if config.api.app_key.is_none() {
            warn!("No API key configured, requests will use the anonymous rate limit");
        }

        let transport = HttpTransport::new(config.api.app_key.clone())?;
        let pipeline = Pipeline::new(
            Arc::new(transport),
            Arc::new(TokioSleeper),
            config.clone(),
        );

        Ok(Self { config, pipeline })
    }

    pub async fn run_status(&self, capture: DateTime<Utc>) -> Result<RunReport> {
        self.pipeline.collect::<StatusDataset>(capture).await
    }

    pub async fn run_arrivals(&self, capture: DateTime<Utc>) -> Result<RunReport> {
        self.pipeline.collect::<ArrivalsDataset>(capture).await
    }

    pub async fn list_lines(&self) -> Result<Vec<LineSummary>> {
        let seed = self.config.retry.seed.unwrap_or_else(rand::random);
        self.pipeline.discover_lines(seed).await
    }
}
