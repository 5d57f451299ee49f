use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{LastLocation, ModuleId, ProgressSnapshot, UserId};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repository::{ProgressRecord, RemoteError, RemoteStore, SyncEvent};

#[derive(Clone, Debug)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RestConfig {
    /// Read sync settings from `QUIZ_SYNC_URL` and `QUIZ_SYNC_KEY`.
    ///
    /// Returns `None` when either is missing or blank, which leaves the
    /// store disabled: sessions then run local-only.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("QUIZ_SYNC_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let api_key = env::var("QUIZ_SYNC_KEY").ok()?;
        if api_key.trim().is_empty() {
            return None;
        }
        Some(Self { base_url, api_key })
    }
}

/// Sync backend speaking the `PostgREST` dialect.
///
/// Progress lives in a single `progress` row per user: a `snapshot` JSON
/// column plus separate resume-pointer columns, so either side can be
/// upserted without touching the other. Events append to `progress_events`.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    config: Option<RestConfig>,
}

impl RestStore {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(RestConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<RestConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    fn config(&self) -> Result<&RestConfig, RemoteError> {
        self.config.as_ref().ok_or(RemoteError::Misconfigured)
    }

    fn resource(config: &RestConfig, name: &str) -> String {
        format!("{}/{name}", config.base_url.trim_end_matches('/'))
    }

    fn authed(&self, request: RequestBuilder, config: &RestConfig) -> RequestBuilder {
        request
            .header("apikey", &config.api_key)
            .bearer_auth(&config.api_key)
    }

    async fn upsert_progress(&self, row: ProgressUpsert<'_>) -> Result<(), RemoteError> {
        let config = self.config()?;
        let response = self
            .authed(self.client.post(Self::resource(config, "progress")), config)
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn save_snapshot(
        &self,
        user: &UserId,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), RemoteError> {
        let record = ProgressRecord::from_snapshot(snapshot);
        self.upsert_progress(ProgressUpsert {
            user_id: user.as_str(),
            snapshot: Some(&record),
            last_module_id: None,
            last_question_index: None,
            location_ts: None,
            updated_at: record.last_updated,
        })
        .await
    }

    async fn load_snapshot(&self, user: &UserId) -> Result<Option<ProgressSnapshot>, RemoteError> {
        let config = self.config()?;
        let response = self
            .authed(self.client.get(Self::resource(config, "progress")), config)
            .query(&[
                ("user_id", format!("eq.{}", user.as_str())),
                ("select", "snapshot".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        let rows: Vec<SnapshotSelect> = response.json().await?;
        let Some(value) = rows.into_iter().next().and_then(|row| row.snapshot) else {
            return Ok(None);
        };

        let record: ProgressRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    user = user.as_str(),
                    %err,
                    "remote snapshot undecodable, treating as absent"
                );
                return Ok(None);
            }
        };
        match record.into_snapshot() {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                tracing::warn!(
                    user = user.as_str(),
                    %err,
                    "remote snapshot invalid, treating as absent"
                );
                Ok(None)
            }
        }
    }

    async fn clear_snapshot(&self, user: &UserId) -> Result<(), RemoteError> {
        let config = self.config()?;
        let response = self
            .authed(
                self.client.delete(Self::resource(config, "progress")),
                config,
            )
            .query(&[("user_id", format!("eq.{}", user.as_str()))])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }
        Ok(())
    }

    async fn set_last_location(
        &self,
        user: &UserId,
        location: &LastLocation,
    ) -> Result<(), RemoteError> {
        self.upsert_progress(ProgressUpsert {
            user_id: user.as_str(),
            snapshot: None,
            last_module_id: Some(location.module.value()),
            last_question_index: Some(location.question),
            location_ts: Some(location.ts),
            updated_at: location.ts,
        })
        .await
    }

    async fn last_location(&self, user: &UserId) -> Result<Option<LastLocation>, RemoteError> {
        let config = self.config()?;
        let response = self
            .authed(self.client.get(Self::resource(config, "progress")), config)
            .query(&[
                ("user_id", format!("eq.{}", user.as_str())),
                (
                    "select",
                    "last_module_id,last_question_index,location_ts".to_string(),
                ),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }

        let rows: Vec<LocationSelect> = response.json().await?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let (Some(module), Some(question), Some(ts)) =
            (row.last_module_id, row.last_question_index, row.location_ts)
        else {
            return Ok(None);
        };

        Ok(Some(LastLocation::new(
            ModuleId::new(u32_saturating(module)),
            u32_saturating(question),
            ts,
        )))
    }

    async fn append_event(&self, event: &SyncEvent) -> Result<(), RemoteError> {
        let config = self.config()?;
        let rows = [EventInsert {
            user_id: event.user_id.as_str(),
            kind: &event.kind,
            module: event.module,
            question: event.question,
            detail: event.detail.as_deref(),
            at: event.at,
        }];

        let response = self
            .authed(
                self.client.post(Self::resource(config, "progress_events")),
                config,
            )
            .header("Prefer", "return=minimal")
            .json(&rows)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status()));
        }
        Ok(())
    }
}

// Stored indexes saturate instead of failing: the locator clamps against
// the live catalog anyway.
fn u32_saturating(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}

#[derive(Debug, Serialize)]
struct ProgressUpsert<'a> {
    user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<&'a ProgressRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_module_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_question_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_ts: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct EventInsert<'a> {
    user_id: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    module: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    question: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
    at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SnapshotSelect {
    snapshot: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LocationSelect {
    last_module_id: Option<i64>,
    last_question_index: Option<i64>,
    location_ts: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_store_reports_misconfigured() {
        let store = RestStore::new(None);
        assert!(!store.enabled());

        let user = UserId::new("user-1");
        let result = store.load_snapshot(&user).await;
        assert!(matches!(result, Err(RemoteError::Misconfigured)));
    }
}
