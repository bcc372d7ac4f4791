use crate::{OpenAiError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Shared HTTP client for the Whisper and chat endpoints. The key always
/// comes from the platform-super tenant's settings; construction fails fast
/// when it is absent so the pipeline can mark the call failed with a config
/// error instead of a late 401.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(OpenAiError::MissingKey)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Override the endpoint, e.g. for a proxy. No trailing slash.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Cheap credential probe used by the settings screen's test button:
    /// lists models and reports whether the key is accepted.
    pub async fn test_connection(&self) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}
