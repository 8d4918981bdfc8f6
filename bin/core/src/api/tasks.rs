use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
};
use serde_json::json;
use serror::AddStatusCode;
use tesp_client::{
  api::{
    CreateTaskResponse, GetTaskQuery, ListTasksQuery,
    ListTasksResponse,
  },
  entities::{
    maybe_non_zero,
    task::{TesTask, TesTaskLog, TesTaskState},
    tesp_timestamp,
  },
};

use crate::{
  context::SystemContext,
  db::TaskFilter,
  events::payloads::QUEUED_TASK,
};

const DEFAULT_PAGE_SIZE: i64 = 256;

#[instrument(skip_all)]
pub async fn create_task(
  State(ctx): State<Arc<SystemContext>>,
  Json(task): Json<TesTask>,
) -> serror::Result<Json<CreateTaskResponse>> {
  validate_task(&task).status_code(StatusCode::BAD_REQUEST)?;
  let task_id = register_task(&ctx, task).await?;
  info!("task [id: {task_id}] registered and queued");
  Ok(Json(CreateTaskResponse { id: task_id }))
}

fn validate_task(task: &TesTask) -> anyhow::Result<()> {
  if task.executors.is_empty() {
    return Err(anyhow!(
      "task must define at least one executor"
    ));
  }
  for input in &task.inputs {
    if input.url.is_none() && input.content.is_none() {
      return Err(anyhow!(
        "input [{}] must provide one of url / content",
        input.path
      ));
    }
  }
  Ok(())
}

async fn register_task(
  ctx: &Arc<SystemContext>,
  mut task: TesTask,
) -> anyhow::Result<String> {
  task.id = String::new();
  task.state = TesTaskState::Queued;
  task.logs = vec![TesTaskLog::empty()];
  task.creation_time = Some(tesp_timestamp());
  let task_id = ctx
    .store
    .create_task(&task)
    .await
    .context("failed to persist task")?;
  ctx.dispatch(QUEUED_TASK, json!({ "task_id": task_id }))?;
  Ok(task_id)
}

#[instrument(skip_all)]
pub async fn get_task(
  State(ctx): State<Arc<SystemContext>>,
  Path(id): Path<String>,
  Query(query): Query<GetTaskQuery>,
) -> serror::Result<Json<serde_json::Value>> {
  let task = ctx
    .store
    .get_task(TaskFilter::id(&id))
    .await
    .context("failed to query tasks")?
    .with_context(|| format!("Task [{id}] not found"))
    .status_code(StatusCode::NOT_FOUND)?;
  Ok(Json(task.into_view(query.view)))
}

#[instrument(skip_all)]
pub async fn list_tasks(
  State(ctx): State<Arc<SystemContext>>,
  Query(query): Query<ListTasksQuery>,
) -> serror::Result<Json<ListTasksResponse>> {
  // page_size 0 means "not provided": no limit at all.
  let page_size = maybe_non_zero(
    query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
  );
  let (tasks, next_page_token) = ctx
    .store
    .list_tasks(
      page_size,
      query.page_token,
      query.name_prefix,
    )
    .await
    .context("failed to query tasks")?;
  let tasks = tasks
    .into_iter()
    .map(|task| task.into_view(query.view))
    .collect();
  Ok(Json(ListTasksResponse {
    tasks,
    next_page_token,
  }))
}

#[instrument(skip_all)]
pub async fn cancel_task(
  State(ctx): State<Arc<SystemContext>>,
  Path(id): Path<String>,
) -> serror::Result<Json<serde_json::Value>> {
  let canceled = ctx
    .store
    .cancel_task(&id)
    .await
    .context("failed to cancel task")?;
  if let Some(task_id) = canceled {
    info!("task [id: {task_id}] canceled");
    // Reverse the remote side as well, best effort. Any pipeline
    // in flight notices the state change at its next conditional
    // update and stops on its own.
    let ctx = ctx.clone();
    tokio::spawn(async move {
      if let Err(e) = ctx.pulsar.erase_job(&task_id).await {
        warn!(
          "failed to erase pulsar job after cancel | task id: {task_id} | {e:?}"
        );
      }
    });
  }
  Ok(Json(json!({})))
}
