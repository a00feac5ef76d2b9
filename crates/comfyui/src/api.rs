//! REST API wrapper for the ComfyUI HTTP endpoints used by the renderer.
//!
//! Covers workflow submission (`POST /prompt`), history lookup
//! (`GET /history/{id}`), queue removal and the `/system_stats` health
//! probe. Everything above the raw HTTP exchange lives in
//! [`crate::renderer`].

use serde::Deserialize;

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue. Older servers omit it.
    #[serde(default)]
    pub number: i64,
}

/// Failure of one HTTP exchange with the render server.
///
/// [`crate::error::RenderError`] converts these into the categories the
/// pipeline reports: a rejected job, an unreachable server or a reply it
/// could not read.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// No usable reply: connection refused, timeout or undecodable JSON.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status. For `/prompt` this is
    /// usually a node validation report in `body`.
    #[error("ComfyUI returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl ComfyUIApi {
    /// Create a client for `api_url` (e.g. `http://127.0.0.1:8188`).
    /// A trailing slash is stripped.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }

    /// Queue one segment's materialized job graph under `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self
            .client
            .post(self.endpoint("prompt"))
            .json(&serde_json::json!({ "prompt": workflow, "client_id": client_id }));
        read_json(request.send().await?).await
    }

    /// History entry for one job. The returned mapping is empty until the
    /// job has finished; afterwards it lists the files the job saved.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let request = self.client.get(self.endpoint(&format!("history/{prompt_id}")));
        read_json(request.send().await?).await
    }

    /// Drop a job the pipeline gave up on from the queue
    /// (`{"delete": [id]}`). A job that is already executing keeps running.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let request = self
            .client
            .post(self.endpoint("queue"))
            .json(&serde_json::json!({ "delete": [prompt_id] }));
        check_status(request.send().await?).await?;
        Ok(())
    }

    /// Server and device information, fetched only to prove the server
    /// is up before a run starts.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let request = self.client.get(self.endpoint("system_stats"));
        read_json(request.send().await?).await
    }
}

/// Turn a non-2xx reply into [`ComfyUIApiError::Status`], keeping the body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(_) => String::from("<unreadable body>"),
    };
    Err(ComfyUIApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ComfyUIApiError> {
    Ok(check_status(response).await?.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://127.0.0.1:8188/");
        assert_eq!(api.api_url(), "http://127.0.0.1:8188");
    }

    #[test]
    fn endpoints_join_without_double_slash() {
        let api = ComfyUIApi::new("http://127.0.0.1:8188/");
        assert_eq!(api.endpoint("history/abc"), "http://127.0.0.1:8188/history/abc");
    }

    #[test]
    fn submit_response_tolerates_missing_number() {
        let parsed: SubmitResponse = serde_json::from_str(r#"{"prompt_id":"abc"}"#).unwrap();
        assert_eq!(parsed.prompt_id, "abc");
        assert_eq!(parsed.number, 0);
    }
}
