//! HTTP client for the game backend
//!
//! The backend tracks players by session cookie. Every request carries the
//! stored cookie, and any `Set-Cookie` in a response replaces it unless the
//! cookie jar has banned that value (see `GameSession::reset_cookies`).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, SET_COOKIE};
use serde::de::DeserializeOwned;

use super::wire::{ConfigResponse, ProximityResponse, RegisterResponse};
use super::{GameApi, ProximityClient};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::storage::{CookieJar, KeyValueStorage};
use crate::types::{AggregatedReport, GameConfig, ProximityResult};

/// reqwest-backed [`GameApi`]
pub struct HttpGameApi {
    http_client: reqwest::Client,
    base_url: String,
    storage: Arc<dyn KeyValueStorage>,
    cookies: Arc<dyn CookieJar>,
}

impl HttpGameApi {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: &BackendConfig,
        storage: Arc<dyn KeyValueStorage>,
        cookies: Arc<dyn CookieJar>,
    ) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            storage,
            cookies,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path_and_query);

        let mut request = self.http_client.get(&url);
        match self.storage.cookies() {
            Ok(Some(cookie)) => request = request.header(COOKIE, cookie),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read stored cookies"),
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        self.remember_cookies(response.headers());

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Store the session cookie from a response, skipping banned values
    fn remember_cookies(&self, headers: &HeaderMap) {
        for value in headers.get_all(SET_COOKIE) {
            let Some(cookie) = value.to_str().ok().and_then(cookie_pair) else {
                continue;
            };
            let stored = self
                .cookies
                .store_cookie(cookie)
                .and_then(|accepted| {
                    if accepted {
                        self.storage.set_cookies(Some(cookie))?;
                    }
                    Ok(accepted)
                });
            match stored {
                Ok(true) => tracing::debug!("Stored session cookie"),
                Ok(false) => tracing::debug!("Backend re-issued a banned cookie"),
                Err(e) => tracing::warn!(error = %e, "Failed to store session cookie"),
            }
        }
    }
}

/// `name=value` part of a Set-Cookie header
fn cookie_pair(header: &str) -> Option<&str> {
    let pair = header.split(';').next()?.trim();
    if pair.contains('=') {
        Some(pair)
    } else {
        None
    }
}

#[async_trait]
impl ProximityClient for HttpGameApi {
    async fn report(&self, report: &AggregatedReport) -> Result<ProximityResult> {
        let beacons = report.to_query_value();
        tracing::trace!(%beacons, "Sending proximity report");

        let response: ProximityResponse = self
            .get(&format!("proximity?beacons={}", urlencoding::encode(&beacons)))
            .await?;
        Ok(response.into())
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn game_config(&self) -> Result<GameConfig> {
        let response: ConfigResponse = self.get("config").await?;
        tracing::debug!(?response, "Game config response");
        Ok(response.into())
    }

    async fn register(&self, name: &str) -> Result<Option<String>> {
        let response: RegisterResponse = self
            .get(&format!("register?name={}", urlencoding::encode(name)))
            .await?;
        tracing::debug!(?response, "Register response");
        Ok(response.message)
    }
}
