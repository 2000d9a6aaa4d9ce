//! Outbound HTTP gateway for the RFP backend.
//!
//! Every call is a single attempt with uniform error translation: an explicit
//! server rejection keeps its status and `detail` message, while a request that
//! never produced a usable response becomes an [`ApiError`] with status `0`.
mod multipart;
mod service;

pub use service::{validate_password_reset, RfpBackend, RfpService};

use crate::error::ApiError;
use crate::upload::FilePart;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use ureq::http::{Response, StatusCode};
use ureq::{Agent, Body};

/// Blocking client bound to one backend and, optionally, one bearer token.
#[derive(Clone)]
pub struct ApiClient {
    agent: Agent,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str, auth_token: Option<String>) -> Self {
        let config = Agent::config_builder().http_status_as_error(false).build();
        Self {
            agent: config.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        self.auth_token.as_ref().map(|token| format!("Bearer {token}"))
    }

    /// POST a JSON body and parse a JSON response.
    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let payload = serde_json::to_vec(body)
            .map_err(|err| ApiError::network(format!("serialize request: {err}")))?;
        let start = Instant::now();
        let mut request = self
            .agent
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        let result = request.send(&payload[..]);
        let response = log_outcome("POST", path, start, result)?;
        read_json_response(response)
    }

    /// GET a JSON response.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let start = Instant::now();
        let mut request = self
            .agent
            .get(self.url(path))
            .header("Accept", "application/json");
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        let response = log_outcome("GET", path, start, request.call())?;
        read_json_response(response)
    }

    /// POST one or more files as `multipart/form-data` under `field_name`.
    pub fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        files: &[FilePart],
        field_name: &str,
    ) -> Result<T, ApiError> {
        let form = multipart::FormBody::from_files(field_name, files);
        let start = Instant::now();
        let mut request = self
            .agent
            .post(self.url(path))
            .header("Content-Type", form.content_type())
            .header("Accept", "application/json");
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        tracing::debug!(
            path,
            files = files.len(),
            body_bytes = form.body().len(),
            "multipart upload"
        );
        let result = request.send(form.body());
        let response = log_outcome("POST", path, start, result)?;
        read_json_response(response)
    }

    /// Download a binary payload into `dest_dir/suggested_filename`.
    ///
    /// The body is streamed into a temporary file beside the destination and
    /// only persisted once complete, so a failed transfer leaves nothing behind.
    /// Remote failures surface as [`ApiError`]; local disk failures do not.
    pub fn get_binary(
        &self,
        path: &str,
        dest_dir: &Path,
        suggested_filename: &str,
    ) -> anyhow::Result<PathBuf> {
        let start = Instant::now();
        let mut request = self.agent.get(self.url(path));
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        let response = log_outcome("GET", path, start, request.call())?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::new(
                status.as_u16(),
                format!("Download failed: {}", reason_phrase(status)),
            )
            .into());
        }

        std::fs::create_dir_all(dest_dir)
            .with_context(|| format!("create download dir {}", dest_dir.display()))?;
        let mut staged = tempfile::NamedTempFile::new_in(dest_dir)
            .with_context(|| format!("stage download in {}", dest_dir.display()))?;
        let mut reader = response.into_body().into_reader();
        let mut chunk = vec![0u8; 64 * 1024];
        let mut bytes = 0u64;
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ApiError::network(err).into()),
            };
            staged
                .write_all(&chunk[..read])
                .with_context(|| format!("write download to {}", dest_dir.display()))?;
            bytes += read as u64;
        }
        let dest = dest_dir.join(suggested_filename);
        staged
            .persist(&dest)
            .map_err(|err| err.error)
            .with_context(|| format!("save {}", dest.display()))?;
        tracing::info!(path, bytes, dest = %dest.display(), "download saved");
        Ok(dest)
    }
}

fn log_outcome(
    method: &str,
    path: &str,
    start: Instant,
    result: Result<Response<Body>, ureq::Error>,
) -> Result<Response<Body>, ApiError> {
    let elapsed_ms = start.elapsed().as_millis();
    match result {
        Ok(response) => {
            tracing::info!(
                method,
                path,
                status = response.status().as_u16(),
                elapsed_ms,
                "api call complete"
            );
            Ok(response)
        }
        Err(err) => {
            tracing::warn!(method, path, elapsed_ms, error = %err, "api call failed in transport");
            Err(ApiError::network(err))
        }
    }
}

fn read_json_response<T: DeserializeOwned>(mut response: Response<Body>) -> Result<T, ApiError> {
    let status = response.status();
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(ApiError::network);
    if !status.is_success() {
        let body = text.unwrap_or_default();
        return Err(error_from_body(status, &body));
    }
    let text = text?;
    serde_json::from_str(&text)
        .map_err(|err| ApiError::network(format!("invalid JSON response: {err}")))
}

/// Prefer the backend's `detail` string; otherwise fall back to the status line.
fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("detail")
                .and_then(|detail| detail.as_str())
                .map(str::to_string)
        })
        .filter(|detail| !detail.is_empty());
    let message = detail.unwrap_or_else(|| {
        format!("HTTP {}: {}", status.as_u16(), reason_phrase(status))
    });
    ApiError::new(status.as_u16(), message)
}

fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}

#[cfg(test)]
#[path = "../../tests/common/mock_backend.rs"]
mod test_server;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
