// Builds the HTTP client used for every call to the controller.

use crate::config_store::WorkerSettings;
use crate::constants::timing;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// The User-Agent header sent by the worker.
    pub fn user_agent() -> String {
        format!("build-worker/{}", env!("CARGO_PKG_VERSION"))
    }

    /// Create a `reqwest::Client` for the controller described by `settings`.
    ///
    /// - The bearer token, when configured, is attached to every request.
    /// - `tls_no_verify` disables certificate verification (dangerous!).
    /// - HTTP(S) proxies are taken from the standard environment variables.
    pub fn create_client(settings: &WorkerSettings) -> Result<Client> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = settings.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("Worker token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(Self::user_agent())
            .timeout(timing::HTTP_TIMEOUT);

        if settings.tls_no_verify {
            tracing::warn!("TLS certificate verification is disabled for the controller");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build().context("Failed to build HTTP client")
    }
}
