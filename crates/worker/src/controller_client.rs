// Client side of the controller API used by a running build:
//   1. POST /build/{id}/log            ship a batch of log lines
//   2. POST /queue/{id}/result         report the terminal status
//   3. POST /build/{id}/artifact/{tag} upload one artifact file

use anyhow::{Context, Result};
use async_trait::async_trait;
use url::Url;
use worker_common::{HttpClientFactory, WorkerSettings};

use crate::model::{BuildStatus, LogLine};

/// Header carrying the file name of an uploaded artifact.
pub const ARTIFACT_NAME_HEADER: &str = "X-Artifact-Name";

/// The controller endpoints the worker calls.
#[async_trait]
pub trait Controller: Send + Sync {
    async fn send_logs(&self, build_id: i64, lines: &[LogLine]) -> Result<()>;

    async fn send_result(&self, build_id: i64, status: BuildStatus) -> Result<()>;

    async fn upload_artifact(
        &self,
        build_id: i64,
        tag: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<()>;
}

/// [`Controller`] over HTTP.
pub struct HttpController {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpController {
    pub fn new(base_url: Url, client: reqwest::Client) -> Self {
        Self { base_url, client }
    }

    pub fn from_settings(settings: &WorkerSettings) -> Result<Self> {
        let base_url = settings.api_base()?;
        let client = HttpClientFactory::create_client(settings)?;
        Ok(Self::new(base_url, client))
    }

    /// Join `path` onto the base URL, keeping any path prefix of the base.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Controller URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{what} failed with HTTP {status}: {body}")
    }
}

#[async_trait]
impl Controller for HttpController {
    async fn send_logs(&self, build_id: i64, lines: &[LogLine]) -> Result<()> {
        let url = self.endpoint(&["build", &build_id.to_string(), "log"])?;
        let response = self
            .client
            .post(url)
            .json(lines)
            .send()
            .await
            .context("Failed to send logs")?;
        Self::check(response, "Log upload").await
    }

    async fn send_result(&self, build_id: i64, status: BuildStatus) -> Result<()> {
        let url = self.endpoint(&["queue", &build_id.to_string(), "result"])?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .context("Failed to send build result")?;
        Self::check(response, "Result report").await
    }

    async fn upload_artifact(
        &self,
        build_id: i64,
        tag: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<()> {
        let url = self.endpoint(&["build", &build_id.to_string(), "artifact", tag])?;
        let size = content.len();
        let response = self
            .client
            .post(url)
            .header(ARTIFACT_NAME_HEADER, name)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await
            .with_context(|| format!("Failed to upload artifact {name} ({size} bytes)"))?;
        Self::check(response, "Artifact upload").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(base: &str) -> HttpController {
        HttpController::new(Url::parse(base).unwrap(), reqwest::Client::new())
    }

    #[test]
    fn endpoints_keep_base_path() {
        let c = controller("https://ci.example.com/api/");
        assert_eq!(
            c.endpoint(&["build", "42", "log"]).unwrap().as_str(),
            "https://ci.example.com/api/build/42/log"
        );

        let c = controller("http://localhost:8081");
        assert_eq!(
            c.endpoint(&["queue", "7", "result"]).unwrap().as_str(),
            "http://localhost:8081/queue/7/result"
        );
    }

    #[test]
    fn artifact_tag_is_escaped() {
        let c = controller("http://localhost:8081");
        assert_eq!(
            c.endpoint(&["build", "1", "artifact", "v1.0 rc"]).unwrap().as_str(),
            "http://localhost:8081/build/1/artifact/v1.0%20rc"
        );
    }

    #[test]
    fn from_settings_rejects_invalid_url() {
        let settings = WorkerSettings {
            api_url: "::not a url".to_string(),
            ..WorkerSettings::default()
        };
        assert!(HttpController::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let c = controller("http://127.0.0.1:9");
        let err = c.send_result(1, BuildStatus::Fail).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to send build result"));
    }
}
