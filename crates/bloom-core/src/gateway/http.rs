//! HTTP gateway against the Bloom backend REST API.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{GatewayError, PersistenceGateway, Result};
use crate::streak::{EngagementStreak, StreakCelebration, StreakMilestone};

/// Connection settings for the REST backend.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Base URL, e.g. `https://api.bloom.app`.
    pub base_url: String,
    /// Ready-to-use bearer token; token acquisition happens upstream.
    pub auth_token: String,
}

/// REST-backed [`PersistenceGateway`].
pub struct HttpGateway {
    config: HttpGatewayConfig,
    http_client: Client,
}

#[derive(Deserialize)]
struct EngagementDatesBody {
    dates: Vec<NaiveDate>,
}

impl HttpGateway {
    /// Create a new HttpGateway.
    pub fn new(config: HttpGatewayConfig) -> Self {
        Self {
            config,
            http_client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Map a non-success response to a gateway error class.
    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = format!("{status}: {body}");
        if retryable(status) {
            Err(GatewayError::Transient(message))
        } else {
            Err(GatewayError::Permanent(message))
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Permanent(format!("malformed response body: {e}")))
    }
}

/// Server-side statuses worth retrying; everything else 4xx is permanent.
fn retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Failures before a status line (DNS, connect, timeout) are transient.
fn request_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Transient(e.to_string())
}

#[async_trait]
impl PersistenceGateway for HttpGateway {
    async fn fetch_streak(&self, user_id: &str) -> Result<Option<EngagementStreak>> {
        let resp = self
            .http_client
            .get(self.url(&format!("/v1/users/{user_id}/streak")))
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(request_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        Ok(Some(Self::decode(resp).await?))
    }

    async fn upsert_streak(&self, user_id: &str, streak: &EngagementStreak) -> Result<()> {
        let resp = self
            .http_client
            .put(self.url(&format!("/v1/users/{user_id}/streak")))
            .bearer_auth(&self.config.auth_token)
            .json(streak)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_engagement_dates(
        &self,
        user_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<NaiveDate>> {
        let resp = self
            .http_client
            .get(self.url(&format!("/v1/users/{user_id}/engagements")))
            .query(&[("since", since.to_string())])
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(request_error)?;
        let resp = Self::check(resp).await?;
        let body: EngagementDatesBody = Self::decode(resp).await?;
        Ok(body.dates)
    }

    async fn fetch_milestones(&self, user_id: &str) -> Result<Vec<StreakMilestone>> {
        let resp = self
            .http_client
            .get(self.url(&format!("/v1/users/{user_id}/milestones")))
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(request_error)?;
        let resp = Self::check(resp).await?;
        Self::decode(resp).await
    }

    async fn insert_milestone(&self, user_id: &str, milestone: &StreakMilestone) -> Result<()> {
        let resp = self
            .http_client
            .post(self.url(&format!("/v1/users/{user_id}/milestones")))
            .bearer_auth(&self.config.auth_token)
            .json(milestone)
            .send()
            .await
            .map_err(request_error)?;

        // The milestone key is (user, streak_length); the backend answers
        // 409 for a replay, which is a confirmation here.
        if resp.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_pending_celebration(
        &self,
        user_id: &str,
    ) -> Result<Option<StreakCelebration>> {
        let resp = self
            .http_client
            .get(self.url(&format!("/v1/users/{user_id}/celebrations/pending")))
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(request_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        Ok(Some(Self::decode(resp).await?))
    }

    async fn insert_celebration(
        &self,
        user_id: &str,
        celebration: &StreakCelebration,
    ) -> Result<()> {
        let resp = self
            .http_client
            .put(self.url(&format!(
                "/v1/users/{user_id}/celebrations/{}",
                celebration.id
            )))
            .bearer_auth(&self.config.auth_token)
            .json(celebration)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_user_data(&self, user_id: &str) -> Result<()> {
        let resp = self
            .http_client
            .delete(self.url(&format!("/v1/users/{user_id}")))
            .bearer_auth(&self.config.auth_token)
            .send()
            .await
            .map_err(request_error)?;
        Self::check(resp).await?;
        Ok(())
    }
}
