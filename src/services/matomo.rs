use std::time::Duration;

use crate::config::MatomoConfig;
use crate::error::{AppError, Result};
use crate::models::RawVisit;

/// Upstream requests that take longer than this abort the current cycle.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the Matomo `Live.getLastVisitsDetails` API.
pub struct MatomoClient {
    http: reqwest::Client,
    config: MatomoConfig,
}

impl MatomoClient {
    pub fn new(config: MatomoConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Fetch visit details for the given `date` expression (`today` or
    /// `last<N>`). Non-2xx responses and bodies that are not a JSON array of
    /// visits are reported as upstream errors.
    pub async fn fetch_visits(&self, date: &str) -> Result<Vec<RawVisit>> {
        let params = [
            ("module", "API"),
            ("method", "Live.getLastVisitsDetails"),
            ("idSite", self.config.site_id.as_str()),
            ("period", "day"),
            ("date", date),
            ("format", "json"),
            ("filter_limit", self.config.filter_limit.as_str()),
            ("token_auth", self.config.token_auth.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.url)
            .form(&params)
            .send()
            .await?
            .error_for_status()?;

        let visits = response.json::<Vec<RawVisit>>().await?;
        Ok(visits)
    }
}
