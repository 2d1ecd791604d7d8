// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Client for the cluster's REST management endpoint.

use std::sync::Mutex;

use {
    chrono::{DateTime, Utc},
    log::debug,
    reqwest::{header::AUTHORIZATION, StatusCode},
    serde::{Deserialize, Serialize},
};

use super::{HealthError, StatusReport};
use crate::{alerts::AlertEvent, cluster::HealthState, config::Config};

#[derive(Serialize, Debug)]
struct LoginArgs<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize, Debug)]
struct NodeHealthResponse {
    data: Vec<NodeHealthEntry>,
}

#[derive(Deserialize, Debug)]
struct NodeHealthEntry {
    #[serde(alias = "resource_id")]
    node: String,
    status: String,
}

#[derive(Deserialize, Debug)]
struct AlertsResponse {
    alerts: Vec<AlertJson>,
}

#[derive(Deserialize, Debug)]
struct AlertJson {
    alert_uuid: String,
    alert_type: String,
    resource_type: String,
    #[serde(default)]
    resource_id: Option<String>,
    resolved: bool,
    /// Seconds since the epoch.
    created_time: i64,
}

/// A logged-in session against the management endpoint. The session token is fetched lazily
/// and refreshed once if a request comes back unauthorized.
#[derive(Debug)]
pub struct CsmRestClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
}

impl CsmRestClient {
    pub fn new(config: &Config) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.csm.verify_tls)
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| HealthError::Rest(e.to_string()))?;

        Ok(Self {
            base_url: format!("https://{}:{}", config.csm.mgmt_vip, config.mgmt_port()),
            username: config.csm.admin_user.clone(),
            password: config.csm.admin_password.clone(),
            client,
            token: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<String, HealthError> {
        let response = self
            .client
            .post(format!("{}/api/v2/login", self.base_url))
            .json(&LoginArgs {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await
            .map_err(|e| HealthError::Rest(format!("login request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(HealthError::Rest(format!(
                "login rejected with status {}",
                response.status()
            )));
        }

        let token = response
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| HealthError::Rest("login response had no token".to_string()))?;

        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.clone());
        }
        Ok(token)
    }

    async fn current_token(&self) -> Result<String, HealthError> {
        let cached = self.token.lock().ok().and_then(|guard| guard.clone());
        match cached {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, HealthError> {
        let url = format!("{}{path}", self.base_url);
        let mut token = self.current_token().await?;

        for attempt in 0..2 {
            debug!("GET {url}");
            let response = self
                .client
                .get(&url)
                .header(AUTHORIZATION, &token)
                .send()
                .await
                .map_err(|e| HealthError::Rest(format!("GET {path} failed: {e}")))?;

            match response.status() {
                StatusCode::OK => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| HealthError::Parse(format!("{path}: {e}")))
                }
                StatusCode::UNAUTHORIZED if attempt == 0 => token = self.login().await?,
                other => {
                    return Err(HealthError::Rest(format!("GET {path} returned {other}")));
                }
            }
        }

        Err(HealthError::Rest(format!("GET {path}: session rejected")))
    }

    pub async fn node_health(&self) -> Result<StatusReport, HealthError> {
        let response: NodeHealthResponse = self.get_json("/api/v2/system/health/node").await?;
        response
            .data
            .into_iter()
            .map(|entry| {
                let state = entry.status.parse::<HealthState>().map_err(HealthError::Parse)?;
                Ok((entry.node, state))
            })
            .collect()
    }

    pub async fn alerts(&self, since: DateTime<Utc>) -> Result<Vec<AlertEvent>, HealthError> {
        let path = format!(
            "/api/v2/alerts?sortby=created_time&dir=desc&start_date={}",
            since.timestamp()
        );
        let response: AlertsResponse = self.get_json(&path).await?;
        Ok(response
            .alerts
            .into_iter()
            .filter_map(|alert| {
                let Some(created) = DateTime::from_timestamp(alert.created_time, 0) else {
                    debug!("dropping alert {} with bad timestamp", alert.alert_uuid);
                    return None;
                };
                Some(AlertEvent {
                    id: alert.alert_uuid,
                    alert_type: alert.alert_type,
                    resource_type: alert.resource_type,
                    resource_id: alert.resource_id,
                    resolved: alert.resolved,
                    created,
                })
            })
            .collect())
    }
}
