use serde::{Deserialize, Serialize};

use crate::entities::task::TesTaskView;

/// Response to `POST /v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
  /// Server-assigned task id.
  pub id: String,
}

/// Query params for `GET /v1/tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksQuery {
  /// Only include tasks whose name matches this prefix.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name_prefix: Option<String>,

  /// Number of tasks to return in one page.
  /// Must be less than 2048. Defaults to 256.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub page_size: Option<i64>,

  /// The `next_page_token` of a previous page.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub page_token: Option<String>,

  #[serde(default)]
  pub view: TesTaskView,
}

/// Query params for `GET /v1/tasks/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTaskQuery {
  #[serde(default)]
  pub view: TesTaskView,
}

/// Response to `GET /v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTasksResponse {
  /// The page of tasks, shaped by the requested view.
  pub tasks: Vec<serde_json::Value>,

  /// Pass as `page_token` to get the next page.
  /// Absent when the page was empty.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_page_token: Option<String>,
}

/// The standardized GA4GH service info document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TesServiceInfo {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub service_type: TesServiceType,
  pub description: String,
  pub organization: TesServiceOrganization,
  pub contact_url: String,
  pub documentation_url: String,
  pub created_at: String,
  pub updated_at: String,
  pub environment: String,
  pub version: String,
  /// Storage backends task io urls may point at.
  pub storage: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesServiceType {
  pub group: String,
  pub artifact: String,
  pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TesServiceOrganization {
  pub name: String,
  pub url: String,
}
