use tesp_client::entities::task::TesTaskState;
use thiserror::Error;

use crate::{
  context::SystemContext,
  db::{DataLayerError, TaskFilter, TaskUpdate},
  pulsar::PulsarError,
};

/// Task-level failures raised inside lifecycle handlers.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
  /// A read or conditional update missed: the task is gone or no
  /// longer in the expected state, usually because another actor
  /// (an external cancel) advanced it. Benign.
  #[error(
    "expected task not found | id: {task_id} | expected state: {state:?}"
  )]
  NotFound {
    task_id: String,
    state: Option<TesTaskState>,
  },
  /// An executor finished with a non-zero exit code.
  #[error("task executor finished with non-zero exit code")]
  ExecutorFailed,
}

impl TaskError {
  pub fn not_found(
    task_id: impl Into<String>,
    state: TesTaskState,
  ) -> TaskError {
    TaskError::NotFound {
      task_id: task_id.into(),
      state: Some(state),
    }
  }
}

/// Map a failed handler's error to its compensating actions:
/// record the terminal error state and / or erase the remote job.
/// Never fails itself, compensation is best effort and logged.
pub async fn handle_event_error(
  error: anyhow::Error,
  task_id: &str,
  event_name: &str,
  ctx: &SystemContext,
) {
  if let Some(task_error) = error.downcast_ref::<TaskError>() {
    match task_error {
      TaskError::ExecutorFailed => {
        warn!(
          "task [id: {task_id}] executor finished with error while executing event [{event_name}]. This originates from the executor itself. Will try to cancel the respective pulsar job."
        );
        update_error_state(
          ctx,
          task_id,
          TesTaskState::ExecutorError,
          None,
        )
        .await;
        erase_pulsar_job(ctx, task_id).await;
      }
      TaskError::NotFound { .. } => {
        warn!(
          "task reached unexpected state while executing event [{event_name}] | {task_error} | This might be a result of the client canceling the task. Execution will not continue."
        );
      }
    }
    return;
  }

  if error.downcast_ref::<DataLayerError>().is_some() {
    error!(
      "data layer error occurred while executing task event [{event_name}] | task id: {task_id} | Will try to request pulsar for job cancellation if possible."
    );
    erase_pulsar_job(ctx, task_id).await;
    return;
  }

  match error.downcast_ref::<PulsarError>() {
    Some(PulsarError::Connection(_)) => {
      error!(
        "pulsar connection error occurred while executing task event [{event_name}] | task id: {task_id} | {error:#}"
      );
      update_error_state(
        ctx,
        task_id,
        TesTaskState::SystemError,
        Some(String::from(
          "Connection error with underlying task executor",
        )),
      )
      .await;
    }
    Some(PulsarError::Operations(msg)) => {
      warn!(
        "pulsar operations error occurred while executing task event [{event_name}] | task id: {task_id} | {error:#}"
      );
      let system_log = format!(
        "Uncommon error occurred while working with underlying task executor. [msg: {msg}]"
      );
      erase_pulsar_job(ctx, task_id).await;
      update_error_state(
        ctx,
        task_id,
        TesTaskState::SystemError,
        Some(system_log),
      )
      .await;
    }
    None => {
      error!(
        "unknown error occurred while executing task event [{event_name}] | task id: {task_id} | {error:#} | Such error was not expected, leading to unrecoverable state."
      );
      erase_pulsar_job(ctx, task_id).await;
      update_error_state(
        ctx,
        task_id,
        TesTaskState::SystemError,
        Some(String::from(
          "Unexpected error occurred while processing/executing the task",
        )),
      )
      .await;
    }
  }
}

/// Unconditional (no expected-from assertion), so the terminal
/// error state is recorded even when the prior state is unknown.
async fn update_error_state(
  ctx: &SystemContext,
  task_id: &str,
  state: TesTaskState,
  system_log: Option<String>,
) {
  let update = TaskUpdate {
    set_state: Some(state),
    push_system_log: system_log,
    ..Default::default()
  };
  if let Err(e) =
    ctx.store.update_task(TaskFilter::id(task_id), update).await
  {
    error!(
      "failed to update task [id: {task_id}] to reflect its real state after an event error | {e:?}"
    );
  }
}

async fn erase_pulsar_job(ctx: &SystemContext, task_id: &str) {
  if let Err(e) = ctx.pulsar.erase_job(task_id).await {
    error!(
      "failed to cancel pulsar job [id: {task_id}] | {e:?} | This job future is in pulsar hands from now on."
    );
  }
}
