use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tesp_client::entities::{
  task::{TesExecutorLog, TesTask, TesTaskState},
  tesp_timestamp,
};
use url::Url;

use crate::{
  context::SystemContext,
  db::{TaskFilter, TaskUpdate},
  docker::docker_run_command,
  events::{
    Event, EventRegistry,
    error::{TaskError, handle_event_error},
    payloads::{
      FINALIZE_TASK, INITIALIZE_TASK, InitializeTaskPayload,
      QUEUED_TASK, QUEUED_TASK_REST, QueuedTaskPayload, RUN_TASK,
      RunTaskPayload, TaskInputConf, TaskOutputConf,
    },
  },
  pulsar::{PulsarIoType, PulsarJobStatus},
};

pub fn register_handlers(registry: &mut EventRegistry) {
  registry.on(
    QUEUED_TASK,
    Arc::new(|event, ctx| {
      Box::pin(handle_queued_task(event, ctx))
    }),
  );
  registry.on(
    QUEUED_TASK_REST,
    Arc::new(|event, ctx| {
      Box::pin(handle_queued_task_rest(event, ctx))
    }),
  );
  registry.on(
    INITIALIZE_TASK,
    Arc::new(|event, ctx| {
      Box::pin(handle_initialize_task(event, ctx))
    }),
  );
  registry.on(
    RUN_TASK,
    Arc::new(|event, ctx| Box::pin(handle_run_task(event, ctx))),
  );
  registry.on(
    FINALIZE_TASK,
    Arc::new(|event, ctx| {
      Box::pin(handle_finalize_task(event, ctx))
    }),
  );
}

/// Hop to the configured pulsar transport flavour.
/// Only the REST transport exists.
async fn handle_queued_task(event: Event, ctx: Arc<SystemContext>) {
  if let Err(e) = ctx.dispatch(QUEUED_TASK_REST, event.payload) {
    error!("failed to dispatch {QUEUED_TASK_REST} | {e:#}");
  }
}

async fn handle_queued_task_rest(
  event: Event,
  ctx: Arc<SystemContext>,
) {
  let Some(payload) = decode_payload::<QueuedTaskPayload>(&event)
  else {
    return;
  };
  let task_id = payload.task_id.clone();
  if let Err(e) = queued_task_rest(payload, &ctx).await {
    handle_event_error(e, &task_id, &event.name, &ctx).await;
  }
}

async fn queued_task_rest(
  payload: QueuedTaskPayload,
  ctx: &Arc<SystemContext>,
) -> anyhow::Result<()> {
  let task_config = ctx.pulsar.setup_job(&payload.task_id).await?;
  ctx.dispatch(
    INITIALIZE_TASK,
    serde_json::to_value(InitializeTaskPayload {
      task_id: payload.task_id,
      task_config,
    })?,
  )?;
  Ok(())
}

async fn handle_initialize_task(
  event: Event,
  ctx: Arc<SystemContext>,
) {
  let Some(payload) =
    decode_payload::<InitializeTaskPayload>(&event)
  else {
    return;
  };
  let task_id = payload.task_id.clone();
  if let Err(e) = initialize_task(payload, &ctx).await {
    handle_event_error(e, &task_id, &event.name, &ctx).await;
  }
}

/// QUEUED -> INITIALIZING, then stage every input and reserve
/// every output on the pulsar host.
async fn initialize_task(
  payload: InitializeTaskPayload,
  ctx: &Arc<SystemContext>,
) -> anyhow::Result<()> {
  let task_id = &payload.task_id;
  let task = ctx
    .store
    .update_task(
      TaskFilter::id_in_state(task_id, TesTaskState::Queued),
      TaskUpdate::state(TesTaskState::Initializing),
    )
    .await?
    .ok_or_else(|| {
      TaskError::not_found(task_id, TesTaskState::Queued)
    })?;

  let mut input_confs = Vec::with_capacity(task.inputs.len());
  for (i, input) in task.inputs.iter().enumerate() {
    let content = match (&input.content, &input.url) {
      (Some(content), _) => Some(content.clone()),
      (None, Some(url)) => {
        let bytes = ctx.transfer.download(url).await?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
      }
      (None, None) => None,
    };
    let file_path = match &input.url {
      Some(url) => url_path(url)?,
      None => format!("input_file_{i}"),
    };
    let pulsar_path = ctx
      .pulsar
      .upload(
        task_id,
        PulsarIoType::Input,
        &file_path,
        content.as_deref(),
      )
      .await?;
    input_confs.push(TaskInputConf {
      container_path: input.path.clone(),
      pulsar_path,
    });
  }

  let mut output_confs = Vec::with_capacity(task.outputs.len());
  for output in &task.outputs {
    let pulsar_path = ctx
      .pulsar
      .upload(
        task_id,
        PulsarIoType::Output,
        &url_path(&output.url)?,
        None,
      )
      .await?;
    output_confs.push(TaskOutputConf {
      container_path: output.path.clone(),
      pulsar_path,
      url: output.url.clone(),
    });
  }

  ctx.dispatch(
    RUN_TASK,
    serde_json::to_value(RunTaskPayload {
      task_id: payload.task_id,
      task_config: payload.task_config,
      input_confs,
      output_confs,
    })?,
  )?;
  Ok(())
}

async fn handle_run_task(event: Event, ctx: Arc<SystemContext>) {
  let Some(payload) = decode_payload::<RunTaskPayload>(&event)
  else {
    return;
  };
  let task_id = payload.task_id.clone();
  if let Err(e) = run_task(payload, &ctx).await {
    handle_event_error(e, &task_id, &event.name, &ctx).await;
  }
}

/// INITIALIZING -> RUNNING, then run every executor in order.
/// The first non-zero exit stops the task.
async fn run_task(
  payload: RunTaskPayload,
  ctx: &Arc<SystemContext>,
) -> anyhow::Result<()> {
  let task_id = &payload.task_id;
  let task = ctx
    .store
    .update_task(
      TaskFilter::id_in_state(
        task_id,
        TesTaskState::Initializing,
      ),
      TaskUpdate::state(TesTaskState::Running),
    )
    .await?
    .ok_or_else(|| {
      TaskError::not_found(task_id, TesTaskState::Initializing)
    })?;

  set_last_log_start_time(
    ctx,
    task_id,
    TesTaskState::Running,
    tesp_timestamp(),
  )
  .await?;

  for executor in &task.executors {
    let run_command = docker_run_command(
      executor,
      &payload.input_confs,
      &payload.output_confs,
    )?;
    let command_start = tesp_timestamp();
    let status = ctx.pulsar.run_job(task_id, &run_command).await?;
    let command_end = tesp_timestamp();
    append_executor_log(
      ctx,
      task_id,
      TesTaskState::Running,
      command_start,
      command_end,
      &status,
    )
    .await?;
    if status.returncode != 0 {
      return Err(TaskError::ExecutorFailed.into());
    }
  }

  ctx
    .dispatch(FINALIZE_TASK, serde_json::to_value(&payload)?)?;
  Ok(())
}

async fn handle_finalize_task(
  event: Event,
  ctx: Arc<SystemContext>,
) {
  let Some(payload) = decode_payload::<RunTaskPayload>(&event)
  else {
    return;
  };
  let task_id = payload.task_id.clone();
  if let Err(e) = finalize_task(payload, &ctx).await {
    handle_event_error(e, &task_id, &event.name, &ctx).await;
  }
}

/// Deliver outputs to their destination urls, RUNNING -> COMPLETE,
/// then erase the remote job.
async fn finalize_task(
  payload: RunTaskPayload,
  ctx: &Arc<SystemContext>,
) -> anyhow::Result<()> {
  let task_id = &payload.task_id;
  let outputs_prefix =
    format!("{}/", payload.task_config.outputs_directory);

  for output_conf in &payload.output_confs {
    let file_name = output_conf
      .pulsar_path
      .strip_prefix(&outputs_prefix)
      .unwrap_or(&output_conf.pulsar_path);
    let contents =
      ctx.pulsar.download_output(task_id, file_name).await?;
    ctx.transfer.upload(&output_conf.url, contents).await?;
  }

  ctx
    .store
    .update_task(
      TaskFilter::id_in_state(task_id, TesTaskState::Running),
      TaskUpdate::state(TesTaskState::Complete),
    )
    .await?
    .ok_or_else(|| {
      TaskError::not_found(task_id, TesTaskState::Running)
    })?;

  ctx.pulsar.erase_job(task_id).await?;
  Ok(())
}

fn decode_payload<T: DeserializeOwned>(event: &Event) -> Option<T> {
  match serde_json::from_value(event.payload.clone()) {
    Ok(payload) => Some(payload),
    Err(e) => {
      error!(
        "invalid payload for event [{}] | {e:?}",
        event.name
      );
      None
    }
  }
}

/// The path component of a task io url.
fn url_path(url: &str) -> anyhow::Result<String> {
  let parsed = Url::parse(url)
    .with_context(|| format!("invalid task io url | {url}"))?;
  Ok(parsed.path().to_string())
}

/// Stamp the current attempt's start time. Read and write both
/// assert the expected state, a miss means the task was advanced
/// externally.
async fn set_last_log_start_time(
  ctx: &SystemContext,
  task_id: &str,
  state: TesTaskState,
  start_time: DateTime<Utc>,
) -> anyhow::Result<()> {
  let mut task = get_task_in_state(ctx, task_id, state).await?;
  if let Some(log) = task.logs.last_mut() {
    log.start_time = Some(start_time);
  }
  write_logs_back(ctx, task_id, state, task).await
}

/// Append one executor's result to the current attempt log.
async fn append_executor_log(
  ctx: &SystemContext,
  task_id: &str,
  state: TesTaskState,
  command_start: DateTime<Utc>,
  command_end: DateTime<Utc>,
  status: &PulsarJobStatus,
) -> anyhow::Result<()> {
  let mut task = get_task_in_state(ctx, task_id, state).await?;
  if let Some(log) = task.logs.last_mut() {
    log.end_time = Some(command_end);
    log.logs.push(TesExecutorLog {
      start_time: Some(command_start),
      end_time: Some(command_end),
      stdout: Some(status.stdout.clone()),
      stderr: Some(status.stderr.clone()),
      exit_code: Some(status.returncode),
    });
  }
  write_logs_back(ctx, task_id, state, task).await
}

async fn get_task_in_state(
  ctx: &SystemContext,
  task_id: &str,
  state: TesTaskState,
) -> anyhow::Result<TesTask> {
  let task = ctx
    .store
    .get_task(TaskFilter::id_in_state(task_id, state))
    .await?
    .ok_or_else(|| TaskError::not_found(task_id, state))?;
  Ok(task)
}

async fn write_logs_back(
  ctx: &SystemContext,
  task_id: &str,
  state: TesTaskState,
  task: TesTask,
) -> anyhow::Result<()> {
  ctx
    .store
    .update_task(
      TaskFilter::id_in_state(task_id, state),
      TaskUpdate::logs(task.logs),
    )
    .await?
    .ok_or_else(|| TaskError::not_found(task_id, state))?;
  Ok(())
}
