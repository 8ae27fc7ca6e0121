use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::YandexConfig;
use crate::db::ProviderTokens;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for ProviderTokens {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            // Out-of-range lifetimes are treated as non-expiring
            expires_at: response
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| Utc::now().checked_add_signed(lifetime)),
        }
    }
}

/// Profile returned by `login.yandex.ru/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct YandexProfile {
    pub login: String,
    #[serde(default)]
    pub default_email: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl YandexProfile {
    /// Falls back to `<login>@yandex.ru` when the email scope was not granted.
    #[must_use]
    pub fn email(&self) -> String {
        self.default_email
            .clone()
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| format!("{}@yandex.ru", self.login))
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.real_name
            .clone()
            .or_else(|| self.display_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.login.clone())
    }
}

#[derive(Clone)]
pub struct YandexOAuthClient {
    client: Client,
    config: YandexConfig,
}

impl YandexOAuthClient {
    #[must_use]
    pub const fn with_shared_client(client: Client, config: YandexConfig) -> Self {
        Self { client, config }
    }

    /// URL the browser is redirected to for the authorization-code grant.
    pub fn authorize_url(&self, state: &str) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{}/authorize",
            self.config.oauth_url.trim_end_matches('/')
        ))
        .context("Invalid OAuth base URL")?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state);

        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<ProviderTokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        self.token_request(&params).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<ProviderTokens> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<ProviderTokens> {
        let url = format!("{}/token", self.config.oauth_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .context("Failed to reach Yandex OAuth")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Yandex token exchange failed: status={status}, body={body}");
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .context("Failed to parse Yandex token response")?;

        debug!(
            has_refresh = tokens.refresh_token.is_some(),
            "Received Yandex OAuth tokens"
        );
        Ok(tokens.into())
    }

    pub async fn fetch_profile(&self, access_token: &str) -> Result<YandexProfile> {
        let mut url = Url::parse(&self.config.login_info_url).context("Invalid login info URL")?;
        url.query_pairs_mut().append_pair("format", "json");

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("OAuth {access_token}"))
            .send()
            .await
            .context("Failed to reach Yandex login info")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Yandex profile request failed: status={status}");
        }

        response
            .json()
            .await
            .context("Failed to parse Yandex profile")
    }
}
