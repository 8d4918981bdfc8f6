use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use tesp_client::entities::config::PulsarConfig;
use thiserror::Error;

/// Failure taxonomy for the remote job runner. Everything the
/// client raises is one of these two, anything else escapes
/// unclassified.
#[derive(Debug, Clone, Error)]
pub enum PulsarError {
  /// Transport fault: connection refused, dns, timeout,
  /// malformed http.
  #[error("Pulsar connection error occurred [msg: {0}]")]
  Connection(String),
  /// Any other unexpected failure of a request: non-2xx,
  /// malformed body, missing field, status poll exhaustion.
  #[error("Pulsar operations error occurred [msg: {0}]")]
  Operations(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulsarIoType {
  Input,
  Output,
}

impl PulsarIoType {
  fn as_str(self) -> &'static str {
    match self {
      PulsarIoType::Input => "input",
      PulsarIoType::Output => "output",
    }
  }
}

/// The remote working area allocated for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsarJobConfig {
  /// Remote path prefix the job's output files land under.
  pub outputs_directory: String,
}

/// Result of a completed job command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulsarJobStatus {
  #[serde(default)]
  pub stdout: String,
  #[serde(default)]
  pub stderr: String,
  #[serde(deserialize_with = "string_or_i64")]
  pub returncode: i64,
}

/// Remote job client over the Pulsar REST api.
#[async_trait]
pub trait PulsarOperations: Send + Sync {
  /// Allocate the remote working area for the job.
  async fn setup_job(
    &self,
    job_id: &str,
  ) -> Result<PulsarJobConfig, PulsarError>;

  /// Register a staged file, uploading its content for inputs.
  /// For outputs the call reserves a target path only.
  /// Returns the absolute remote path of the file.
  async fn upload(
    &self,
    job_id: &str,
    io_type: PulsarIoType,
    file_path: &str,
    file_content: Option<&str>,
  ) -> Result<String, PulsarError>;

  /// Submit the command line, then poll status until the first
  /// response reporting completion.
  async fn run_job(
    &self,
    job_id: &str,
    run_command: &str,
  ) -> Result<PulsarJobStatus, PulsarError>;

  /// Fetch a file from the remote outputs area.
  async fn download_output(
    &self,
    job_id: &str,
    file_name: &str,
  ) -> Result<Vec<u8>, PulsarError>;

  /// Cancel, then delete the remote job. The cancel step may fail
  /// (the job may already be finished), only the delete surfaces.
  async fn erase_job(&self, job_id: &str)
  -> Result<(), PulsarError>;
}

pub struct PulsarRestClient {
  reqwest: reqwest::Client,
  base_url: String,
  status_poll_interval: Duration,
  status_max_polls: u32,
}

impl PulsarRestClient {
  pub fn new(config: &PulsarConfig) -> anyhow::Result<PulsarRestClient> {
    let reqwest = reqwest::Client::builder()
      .timeout(Duration::from_secs(2))
      .build()
      .context("failed to build pulsar http client")?;
    Ok(PulsarRestClient {
      reqwest,
      base_url: config.url.trim_end_matches('/').to_string(),
      status_poll_interval: Duration::from_secs(
        config.status_poll_interval,
      ),
      status_max_polls: config.status_max_polls,
    })
  }

  async fn request_bytes(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
    body: Option<String>,
  ) -> Result<Vec<u8>, PulsarError> {
    let mut req = self
      .reqwest
      .request(method, format!("{}{path}", self.base_url))
      .query(query);
    if let Some(body) = body {
      req = req.body(body);
    }
    let res = req.send().await.map_err(connection_error)?;
    let res = res.error_for_status().map_err(|e| {
      PulsarError::Operations(format!("{e}"))
    })?;
    let bytes = res.bytes().await.map_err(connection_error)?;
    Ok(bytes.to_vec())
  }

  /// Pulsar serves JSON with content-type `text/html`,
  /// so always parse from the raw body.
  async fn request_json<T: serde::de::DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
    body: Option<String>,
  ) -> Result<T, PulsarError> {
    let bytes =
      self.request_bytes(method, path, query, body).await?;
    serde_json::from_slice(&bytes).map_err(|e| {
      PulsarError::Operations(format!(
        "unexpected response body | {e}"
      ))
    })
  }
}

#[async_trait]
impl PulsarOperations for PulsarRestClient {
  #[instrument(level = "debug", skip(self))]
  async fn setup_job(
    &self,
    job_id: &str,
  ) -> Result<PulsarJobConfig, PulsarError> {
    self
      .request_json(
        Method::POST,
        "/jobs",
        &[("job_id", job_id)],
        None,
      )
      .await
  }

  #[instrument(level = "debug", skip(self, file_content))]
  async fn upload(
    &self,
    job_id: &str,
    io_type: PulsarIoType,
    file_path: &str,
    file_content: Option<&str>,
  ) -> Result<String, PulsarError> {
    #[derive(Deserialize)]
    struct UploadResponse {
      path: String,
    }
    let res: UploadResponse = self
      .request_json(
        Method::POST,
        &format!("/jobs/{job_id}/files"),
        &[("type", io_type.as_str()), ("name", file_path)],
        Some(file_content.unwrap_or_default().to_string()),
      )
      .await?;
    Ok(res.path)
  }

  #[instrument(level = "debug", skip(self))]
  async fn run_job(
    &self,
    job_id: &str,
    run_command: &str,
  ) -> Result<PulsarJobStatus, PulsarError> {
    self
      .request_bytes(
        Method::POST,
        &format!("/jobs/{job_id}/submit"),
        &[("command_line", run_command)],
        None,
      )
      .await?;
    for _ in 0..self.status_max_polls {
      tokio::time::sleep(self.status_poll_interval).await;
      let res: serde_json::Value = self
        .request_json(
          Method::GET,
          &format!("/jobs/{job_id}/status"),
          &[],
          None,
        )
        .await?;
      // The complete field is mandatory on every status
      // response. Result fields only appear once it is "true".
      let complete =
        match res.get("complete").and_then(|v| v.as_str()) {
          Some(value) => value == "true",
          None => {
            return Err(PulsarError::Operations(format!(
              "job [{job_id}] status response is missing the complete field"
            )));
          }
        };
      if complete {
        return serde_json::from_value(res).map_err(|e| {
          PulsarError::Operations(format!(
            "unexpected job status body | {e}"
          ))
        });
      }
    }
    Err(PulsarError::Operations(format!(
      "job [{job_id}] did not complete within {} status polls",
      self.status_max_polls
    )))
  }

  #[instrument(level = "debug", skip(self))]
  async fn download_output(
    &self,
    job_id: &str,
    file_name: &str,
  ) -> Result<Vec<u8>, PulsarError> {
    self
      .request_bytes(
        Method::GET,
        &format!("/jobs/{job_id}/files"),
        &[("name", file_name)],
        None,
      )
      .await
  }

  #[instrument(level = "debug", skip(self))]
  async fn erase_job(
    &self,
    job_id: &str,
  ) -> Result<(), PulsarError> {
    if let Err(e) = self
      .request_bytes(
        Method::PUT,
        &format!("/jobs/{job_id}/cancel"),
        &[],
        None,
      )
      .await
    {
      // The job may already be finished, deletion decides.
      debug!(
        "pulsar job cancel failed, continuing to delete | job id: {job_id} | {e:?}"
      );
    }
    self
      .request_bytes(
        Method::DELETE,
        &format!("/jobs/{job_id}"),
        &[],
        None,
      )
      .await?;
    Ok(())
  }
}

fn connection_error(e: reqwest::Error) -> PulsarError {
  PulsarError::Connection(format!("{e}"))
}

/// Pulsar reports `returncode` as either a bare number or a
/// string, depending on version.
fn string_or_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum StringOrI64 {
    I64(i64),
    String(String),
  }
  match StringOrI64::deserialize(deserializer)? {
    StringOrI64::I64(value) => Ok(value),
    StringOrI64::String(value) => {
      value.parse().map_err(serde::de::Error::custom)
    }
  }
}

#[cfg(test)]
mod tests {
  use axum::{
    Router,
    http::{StatusCode, header},
    routing::{delete, get, post, put},
  };
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use super::*;

  fn client(base_url: String, max_polls: u32) -> PulsarRestClient {
    PulsarRestClient {
      reqwest: Default::default(),
      base_url,
      status_poll_interval: Duration::from_millis(1),
      status_max_polls: max_polls,
    }
  }

  async fn serve(router: Router) -> String {
    let listener =
      tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
  }

  #[tokio::test]
  async fn parses_json_served_as_text_html() {
    let router = Router::new().route(
      "/jobs",
      post(|| async {
        (
          [(header::CONTENT_TYPE, "text/html")],
          r#"{"outputs_directory": "/out", "extra": 1}"#,
        )
      }),
    );
    let client = client(serve(router).await, 1);
    let config = client.setup_job("abc").await.unwrap();
    assert_eq!(config.outputs_directory, "/out");
  }

  #[tokio::test]
  async fn erase_succeeds_when_cancel_fails_but_delete_succeeds() {
    let cancels = Arc::new(AtomicUsize::new(0));
    let deletes = Arc::new(AtomicUsize::new(0));
    let (c, d) = (cancels.clone(), deletes.clone());
    let router = Router::new()
      .route(
        "/jobs/{id}/cancel",
        put(move || async move {
          c.fetch_add(1, Ordering::SeqCst);
          StatusCode::INTERNAL_SERVER_ERROR
        }),
      )
      .route(
        "/jobs/{id}",
        delete(move || async move {
          d.fetch_add(1, Ordering::SeqCst);
          StatusCode::OK
        }),
      );
    let client = client(serve(router).await, 1);
    client.erase_job("abc").await.unwrap();
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(deletes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn run_job_polls_until_complete() {
    let polls = Arc::new(AtomicUsize::new(0));
    let p = polls.clone();
    let router = Router::new()
      .route("/jobs/{id}/submit", post(|| async { "submitted" }))
      .route(
        "/jobs/{id}/status",
        get(move || async move {
          if p.fetch_add(1, Ordering::SeqCst) < 2 {
            r#"{"complete": "false"}"#
          } else {
            r#"{"complete": "true", "stdout": "hi", "stderr": "", "returncode": "0"}"#
          }
        }),
      );
    let client = client(serve(router).await, 10);
    let status = client.run_job("abc", "echo hi").await.unwrap();
    assert_eq!(status.stdout, "hi");
    assert_eq!(status.returncode, 0);
    assert_eq!(polls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn run_job_fails_fast_when_complete_is_missing() {
    let polls = Arc::new(AtomicUsize::new(0));
    let p = polls.clone();
    let router = Router::new()
      .route("/jobs/{id}/submit", post(|| async { "submitted" }))
      .route(
        "/jobs/{id}/status",
        get(move || async move {
          p.fetch_add(1, Ordering::SeqCst);
          r#"{"state": "running"}"#
        }),
      );
    let client = client(serve(router).await, 10);
    let err = client.run_job("abc", "echo hi").await.unwrap_err();
    assert!(matches!(err, PulsarError::Operations(_)));
    // Failed on the first malformed response, no retry loop.
    assert_eq!(polls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn run_job_fails_after_poll_exhaustion() {
    let router = Router::new()
      .route("/jobs/{id}/submit", post(|| async { "submitted" }))
      .route(
        "/jobs/{id}/status",
        get(|| async { r#"{"complete": "false"}"# }),
      );
    let client = client(serve(router).await, 3);
    let err = client.run_job("abc", "sleep 60").await.unwrap_err();
    assert!(matches!(err, PulsarError::Operations(_)));
  }

  #[tokio::test]
  async fn transport_faults_classify_as_connection_errors() {
    // Bind then drop, so the port is likely refusing connections.
    let listener =
      tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(format!("http://{addr}"), 1);
    let err = client.setup_job("abc").await.unwrap_err();
    assert!(matches!(err, PulsarError::Connection(_)));
  }

  #[tokio::test]
  async fn non_2xx_classifies_as_operations_error() {
    let router = Router::new().route(
      "/jobs",
      post(|| async { StatusCode::BAD_GATEWAY }),
    );
    let client = client(serve(router).await, 1);
    let err = client.setup_job("abc").await.unwrap_err();
    assert!(matches!(err, PulsarError::Operations(_)));
  }
}
