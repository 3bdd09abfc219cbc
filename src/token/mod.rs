//! Token persistence in a shared ConfigMap
//!
//! Agent replicas coordinate incremental work (e.g. the event collection
//! cursor) through named tokens kept in a single ConfigMap. Each token is
//! stored as two data fields written together:
//! - `<token>.tokenKey` - the token value
//! - `<token>.tokenTimestamp` - when it was last written (RFC 822)
//!
//! Other replicas may write the same ConfigMap at any time; every update
//! re-reads it first.

pub mod rfc822;

use crate::k8s::api::ClusterApi;
use crate::{KubemetaError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const TOKEN_KEY: &str = "tokenKey";
const TOKEN_TIME: &str = "tokenTimestamp";

/// Data field holding the value of `token`
pub fn token_key_field(token: &str) -> String {
    format!("{}.{}", token, TOKEN_KEY)
}

/// Data field holding the last update time of `token`
pub fn token_timestamp_field(token: &str) -> String {
    format!("{}.{}", token, TOKEN_TIME)
}

#[derive(Clone)]
pub struct TokenStore {
    api: Arc<dyn ClusterApi>,
    namespace: String,
    config_map: String,
}

impl TokenStore {
    pub fn new(api: Arc<dyn ClusterApi>, namespace: String, config_map: String) -> Self {
        Self {
            api,
            namespace,
            config_map,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config_map(&self) -> &str {
        &self.config_map
    }

    /// Read `token`, requiring it to have been written less than `max_age` ago.
    ///
    /// - `NotFound`: the ConfigMap or the token value is missing
    /// - `TokenOutdated`: the value exists but is too old or has no timestamp;
    ///   the error carries the value
    /// - `TimestampFormat`: the timestamp cannot be parsed
    pub async fn get_token(&self, token: &str, max_age: Duration) -> Result<String> {
        self.get_token_at(token, max_age, Utc::now()).await
    }

    async fn get_token_at(
        &self,
        token: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let config_map = self
            .api
            .get_config_map(&self.namespace, &self.config_map)
            .await
            .inspect_err(|e| {
                debug!("Could not find the ConfigMap {}: {}", self.config_map, e);
            })?;
        info!("Found the ConfigMap {}", self.config_map);

        let data = config_map.data.unwrap_or_default();

        let key_field = token_key_field(token);
        let Some(value) = data.get(&key_field).cloned() else {
            error!("{} was not found in the ConfigMap {}", key_field, self.config_map);
            return Err(KubemetaError::NotFound(format!(
                "{} in ConfigMap {}/{}",
                key_field, self.namespace, self.config_map
            )));
        };
        info!("{} is {:?}", token, value);

        let time_field = token_timestamp_field(token);
        let Some(raw_time) = data.get(&time_field) else {
            debug!(
                "Could not find timestamp associated with {} in the ConfigMap {}. Refreshing.",
                time_field, self.config_map
            );
            return Err(KubemetaError::TokenOutdated {
                name: token.to_string(),
                value,
            });
        };

        let Some(updated_at) = rfc822::parse_timestamp(raw_time) else {
            error!(
                "Could not convert the timestamp associated with {} from the ConfigMap {}",
                token, self.config_map
            );
            return Err(KubemetaError::TimestampFormat {
                name: token.to_string(),
                value: raw_time.clone(),
            });
        };

        let age_secs = now.timestamp() - updated_at.timestamp();
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if age_secs > max_age_secs {
            debug!("The token {} is outdated, refreshing the state", token);
            return Err(KubemetaError::TokenOutdated {
                name: token.to_string(),
                value,
            });
        }

        debug!("Token {} was updated recently, using value to collect newer events", token);
        Ok(value)
    }

    /// Store `value` for `token` together with the current time.
    ///
    /// Failures to read or write the ConfigMap are returned as is; retrying is
    /// up to the caller.
    pub async fn update_token(&self, token: &str, value: &str) -> Result<()> {
        self.update_token_at(token, value, Utc::now()).await
    }

    async fn update_token_at(&self, token: &str, value: &str, now: DateTime<Utc>) -> Result<()> {
        let mut config_map = self
            .api
            .get_config_map(&self.namespace, &self.config_map)
            .await?;

        let key_field = token_key_field(token);
        let data = config_map.data.get_or_insert_with(Default::default);
        data.insert(key_field.clone(), value.to_string());
        data.insert(token_timestamp_field(token), rfc822::format_timestamp(now));

        self.api
            .replace_config_map(&self.namespace, config_map)
            .await?;

        debug!(
            "Updated {} to {} in the ConfigMap {}",
            key_field, value, self.config_map
        );
        Ok(())
    }
}
