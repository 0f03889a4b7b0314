use futures::future::{FutureExt, LocalBoxFuture};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::api::types::{ApiError, Preferences, PreferencesUpdate};

pub const DEFAULT_API_BASE_URL: &str = "/api";

/// Backend calls the preference context depends on.
pub trait PreferencesApi {
    fn fetch_preferences(&self) -> LocalBoxFuture<'static, Result<Preferences, ApiError>>;
    fn save_preferences(
        &self,
        update: PreferencesUpdate,
    ) -> LocalBoxFuture<'static, Result<Preferences, ApiError>>;
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_API_BASE_URL)
    }

    pub fn new_with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The session lives in an HttpOnly cookie, so browser requests must
    /// carry credentials.
    fn with_session(request: RequestBuilder) -> RequestBuilder {
        #[cfg(target_arch = "wasm32")]
        {
            request.fetch_credentials_include()
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            request
        }
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::with_session(request)
            .send()
            .await
            .map_err(|e| ApiError::request_failed(format!("Request failed: {}", e)))?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::unknown(format!("Failed to parse response: {}", e)));
        }
        match response.json::<ApiError>().await {
            Ok(error) => Err(error),
            Err(_) => Err(ApiError::unknown(format!("Request failed with status {}", status))),
        }
    }

    pub async fn get_preferences(&self) -> Result<Preferences, ApiError> {
        let request = self.client.get(self.url("/users/me/preferences"));
        Self::send_json(request).await
    }

    pub async fn update_preferences(
        &self,
        update: &PreferencesUpdate,
    ) -> Result<Preferences, ApiError> {
        let request = self
            .client
            .put(self.url("/users/me/preferences"))
            .json(update);
        Self::send_json(request).await
    }
}

impl PreferencesApi for ApiClient {
    fn fetch_preferences(&self) -> LocalBoxFuture<'static, Result<Preferences, ApiError>> {
        let client = self.clone();
        async move { client.get_preferences().await }.boxed_local()
    }

    fn save_preferences(
        &self,
        update: PreferencesUpdate,
    ) -> LocalBoxFuture<'static, Result<Preferences, ApiError>> {
        let client = self.clone();
        async move { client.update_preferences(&update).await }.boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new_with_base_url("https://api.example.com/api/");
        assert_eq!(
            client.url("/users/me/preferences"),
            "https://api.example.com/api/users/me/preferences"
        );
        assert_eq!(ApiClient::new().url("/health"), "/api/health");
    }
}
