//! Script acquisition for the session manager

use crate::error::DescrambleError;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Where the session manager gets the current obfuscated script body from.
/// The HTTP implementation is the production path; tests inject their own.
#[async_trait]
pub trait ScriptSource: Send + Sync + 'static {
    async fn fetch_script(&self) -> Result<String, DescrambleError>;
}

/// Player configuration embedded in the platform page
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerState {
    #[serde(rename = "STS")]
    pub signature_timestamp: u64,
    #[serde(rename = "PLAYER_JS_URL")]
    pub player_js_url: String,
}

/// Fetches the platform page, pulls the player state out of the embedded
/// config call, then fetches the player script it points at
pub struct HttpScriptSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScriptSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Extract the embedded player state from the page body
    pub async fn fetch_player_state(&self) -> Result<PlayerState, DescrambleError> {
        let page = self
            .client
            .get(&self.base_url)
            .send()
            .await?
            .text()
            .await?;

        let state_re = Regex::new(r"ytcfg\.set\((\{[\s\S]+?\})\);")?;
        let raw = state_re
            .captures(&page)
            .ok_or(DescrambleError::StateNotFound)?;
        let state: PlayerState = serde_json::from_str(&raw[1])?;

        if state.player_js_url.is_empty() {
            return Err(DescrambleError::StateFieldMissing("PLAYER_JS_URL"));
        }
        Ok(state)
    }
}

#[async_trait]
impl ScriptSource for HttpScriptSource {
    async fn fetch_script(&self) -> Result<String, DescrambleError> {
        let state = self.fetch_player_state().await?;
        let script_url = if state.player_js_url.starts_with('/') {
            format!(
                "{}{}",
                self.base_url.trim_end_matches('/'),
                state.player_js_url
            )
        } else {
            state.player_js_url.clone()
        };

        debug!(url = %script_url, "fetching player script");
        Ok(self.client.get(&script_url).send().await?.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decipher::testscript::{synthetic_script, SIG_CALLS_DEFAULT};

    #[tokio::test]
    async fn fetches_script_via_embedded_player_state() {
        let mut server = mockito::Server::new_async().await;
        let script = synthetic_script(SIG_CALLS_DEFAULT);

        let page =
            r#"<html><script>ytcfg.set({"STS":19876,"PLAYER_JS_URL":"/s/player/base.js"});</script></html>"#;
        let _page_mock = server
            .mock("GET", "/")
            .with_body(page)
            .create_async()
            .await;
        let _script_mock = server
            .mock("GET", "/s/player/base.js")
            .with_body(&script)
            .create_async()
            .await;

        let source = HttpScriptSource::new(server.url());
        let state = source.fetch_player_state().await.unwrap();
        assert_eq!(state.signature_timestamp, 19876);

        let body = source.fetch_script().await.unwrap();
        assert_eq!(body, script);
    }

    #[tokio::test]
    async fn page_without_player_state_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/")
            .with_body("<html>nothing here</html>")
            .create_async()
            .await;

        let source = HttpScriptSource::new(server.url());
        let err = source.fetch_player_state().await.unwrap_err();
        assert!(matches!(err, DescrambleError::StateNotFound));
    }
}
