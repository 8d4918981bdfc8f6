use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::Display;

use crate::entities::MongoId;

/// A GA4GH TES task document.
///
/// Incoming create requests deserialize into this type as well,
/// the server replaces `id`, `state`, `logs` and `creation_time`
/// before the document is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesTask {
  /// The Mongo ID of the task.
  /// This field is de/serialized from/to JSON as
  /// `{ "_id": { "$oid": "..." }, ...(rest of serialized TesTask) }`
  #[serde(
    default,
    rename = "_id",
    skip_serializing_if = "String::is_empty",
    with = "bson::serde_helpers::hex_string_as_object_id"
  )]
  pub id: MongoId,

  /// User-provided task name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  /// User-provided description for documentation purposes.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  /// Input files downloaded / staged before the first executor runs.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inputs: Vec<TesInput>,

  /// Output files uploaded to long term storage after the task completes.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub outputs: Vec<TesOutput>,

  /// Advisory resource request. Not enforced by the core.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resources: Option<TesResources>,

  /// The executors, run one at a time in order.
  /// Execution stops on the first non-zero exit.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub executors: Vec<TesExecutor>,

  /// Container paths shared between executors of this task.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub volumes: Vec<String>,

  /// Free key / value annotations.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub tags: HashMap<String, String>,

  #[serde(default)]
  pub state: TesTaskState,

  /// One entry per task attempt. Retries are not implemented,
  /// so exactly one entry exists after creation.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub logs: Vec<TesTaskLog>,

  /// Server-assigned, RFC 3339.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub creation_time: Option<DateTime<Utc>>,
}

impl TesTask {
  /// Project the task for the given view, normalizing the
  /// bson `_id` into a plain TES `id` field.
  pub fn into_view(self, view: TesTaskView) -> serde_json::Value {
    match view {
      TesTaskView::Minimal => json!({
        "id": self.id,
        "state": self.state,
      }),
      TesTaskView::Basic => {
        let mut task = self;
        for input in &mut task.inputs {
          input.content = None;
        }
        for log in &mut task.logs {
          log.system_logs.clear();
          for exec_log in &mut log.logs {
            exec_log.stdout = None;
            exec_log.stderr = None;
          }
        }
        task_json_with_plain_id(&task)
      }
      TesTaskView::Full => task_json_with_plain_id(&self),
    }
  }
}

fn task_json_with_plain_id(task: &TesTask) -> serde_json::Value {
  let mut value = serde_json::to_value(task)
    .expect("TesTask serialization is infallible");
  if let Some(object) = value.as_object_mut() {
    object.remove("_id");
    object.insert("id".to_string(), json!(task.id));
  }
  value
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TesTaskState {
  #[default]
  Unknown,
  Queued,
  Initializing,
  Running,
  Paused,
  Complete,
  ExecutorError,
  SystemError,
  Canceled,
}

impl TesTaskState {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TesTaskState::Complete
        | TesTaskState::ExecutorError
        | TesTaskState::SystemError
        | TesTaskState::Canceled
    )
  }
}

/// Affects the fields included in returned task documents.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesTaskView {
  /// Only `id` and `state`.
  #[default]
  Minimal,
  /// Everything except executor stdout / stderr,
  /// input content and system logs.
  Basic,
  /// The complete document.
  Full,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TesIoType {
  File,
  Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesInput {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  /// URL in long term storage, eg `ftp://host/file1`.
  /// Required unless `content` is set.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,

  /// Absolute path of the file inside the container.
  pub path: String,

  #[serde(rename = "type")]
  pub io_type: TesIoType,

  /// File content literal. When set, `url` is ignored.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesOutput {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,

  /// URL the file is copied to after the task completes.
  pub url: String,

  /// Absolute path of the file inside the container.
  pub path: String,

  #[serde(rename = "type")]
  pub io_type: TesIoType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesResources {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu_cores: Option<i64>,

  /// Whether the task may run on preemptible compute.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub preemptible: Option<bool>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ram_gb: Option<f64>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub disk_gb: Option<f64>,

  /// Compute zones the task requests. Backend specific.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub zones: Vec<String>,
}

/// One container invocation within a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesExecutor {
  /// Name of the container image, eg `ubuntu:24.04`.
  pub image: String,

  /// Program arguments, argv[0] first.
  pub command: Vec<String>,

  /// Working directory inside the container.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workdir: Option<String>,

  /// Absolute container path piped to the executor's stdin.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stdin: Option<String>,

  /// Absolute container path the executor's stdout is written to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stdout: Option<String>,

  /// Absolute container path the executor's stderr is written to.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stderr: Option<String>,

  /// Environment variables set within the container.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesExecutorLog {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,

  /// Head of the executor's stdout, for convenience only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stdout: Option<String>,

  /// Head of the executor's stderr, for convenience only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stderr: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exit_code: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesOutputFileLog {
  /// URL of the file in storage.
  pub url: String,

  /// Absolute path of the file inside the container.
  pub path: String,

  /// Size in bytes, as a string for int64 JSON safety.
  pub size_bytes: String,
}

/// Log collected over one attempt of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesTaskLog {
  /// One entry per executor actually attempted, in order.
  #[serde(default)]
  pub logs: Vec<TesExecutorLog>,

  /// Arbitrary implementation metadata.
  #[serde(default, skip_serializing_if = "HashMap::is_empty")]
  pub metadata: HashMap<String, String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_time: Option<DateTime<Utc>>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_time: Option<DateTime<Utc>>,

  /// Information about all output files.
  #[serde(default)]
  pub outputs: Vec<TesOutputFileLog>,

  /// System logs not tied to an executor process,
  /// eg the message behind a SYSTEM_ERROR state.
  #[serde(default)]
  pub system_logs: Vec<String>,
}

impl TesTaskLog {
  /// The single empty log entry every task is created with.
  pub fn empty() -> TesTaskLog {
    TesTaskLog::default()
  }
}
