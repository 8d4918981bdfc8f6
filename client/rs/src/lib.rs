//! # Tesp Client
//!
//! Typed entities and a thin reqwest client for the Tesp
//! GA4GH Task Execution Service.

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;

use crate::{
  api::{
    CreateTaskResponse, GetTaskQuery, ListTasksQuery,
    ListTasksResponse, TesServiceInfo,
  },
  entities::task::{TesTask, TesTaskView},
};

pub mod api;
pub mod entities;

#[derive(Debug, Clone)]
pub struct TespClient {
  /// Address of the Tesp core api, eg `http://localhost:8000`.
  pub address: String,
  reqwest: reqwest::Client,
}

impl TespClient {
  pub fn new(address: impl Into<String>) -> TespClient {
    TespClient {
      address: address.into(),
      reqwest: Default::default(),
    }
  }

  pub async fn create_task(
    &self,
    task: &TesTask,
  ) -> anyhow::Result<CreateTaskResponse> {
    tracing::trace!("request | type: CreateTask");
    let req = self
      .reqwest
      .post(format!("{}/v1/tasks", self.address))
      .json(task);
    json_response(req).await
  }

  pub async fn get_task(
    &self,
    id: &str,
    view: TesTaskView,
  ) -> anyhow::Result<serde_json::Value> {
    tracing::trace!("request | type: GetTask | id: {id}");
    let query = serde_qs::to_string(&GetTaskQuery { view })
      .context("failed to serialize query string")?;
    let req = self
      .reqwest
      .get(format!("{}/v1/tasks/{id}?{query}", self.address));
    json_response(req).await
  }

  pub async fn list_tasks(
    &self,
    query: &ListTasksQuery,
  ) -> anyhow::Result<ListTasksResponse> {
    tracing::trace!("request | type: ListTasks");
    let query = serde_qs::to_string(query)
      .context("failed to serialize query string")?;
    let req = self
      .reqwest
      .get(format!("{}/v1/tasks?{query}", self.address));
    json_response(req).await
  }

  pub async fn cancel_task(&self, id: &str) -> anyhow::Result<()> {
    tracing::trace!("request | type: CancelTask | id: {id}");
    let req = self
      .reqwest
      .post(format!("{}/v1/tasks/{id}:cancel", self.address));
    let _: serde_json::Value = json_response(req).await?;
    Ok(())
  }

  pub async fn service_info(&self) -> anyhow::Result<TesServiceInfo> {
    tracing::trace!("request | type: GetServiceInfo");
    let req = self
      .reqwest
      .get(format!("{}/v1/service-info", self.address));
    json_response(req).await
  }
}

async fn json_response<T: DeserializeOwned>(
  req: reqwest::RequestBuilder,
) -> anyhow::Result<T> {
  let res =
    req.send().await.context("failed to reach tesp core api")?;
  let status = res.status();
  if !status.is_success() {
    let text = res.text().await.unwrap_or_default();
    return Err(anyhow!("{status} | {text}"));
  }
  res
    .json()
    .await
    .context("failed to parse tesp core api response body")
}
