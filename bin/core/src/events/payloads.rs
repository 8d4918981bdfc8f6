use serde::{Deserialize, Serialize};

use crate::{events::EventRegistry, pulsar::PulsarJobConfig};

pub const QUEUED_TASK: &str = "queued_task";
pub const QUEUED_TASK_REST: &str = "queued_task_rest";
pub const INITIALIZE_TASK: &str = "initialize_task";
pub const RUN_TASK: &str = "run_task";
pub const FINALIZE_TASK: &str = "finalize_task";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTaskPayload {
  pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeTaskPayload {
  pub task_id: String,
  pub task_config: PulsarJobConfig,
}

/// Host / container binding for one staged input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInputConf {
  pub container_path: String,
  pub pulsar_path: String,
}

/// Like [TaskInputConf], plus the destination url the output is
/// delivered to during finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutputConf {
  pub container_path: String,
  pub pulsar_path: String,
  pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTaskPayload {
  pub task_id: String,
  pub task_config: PulsarJobConfig,
  pub input_confs: Vec<TaskInputConf>,
  pub output_confs: Vec<TaskOutputConf>,
}

pub fn register_schemas(registry: &mut EventRegistry) {
  registry.schema::<QueuedTaskPayload>(QUEUED_TASK);
  registry.schema::<QueuedTaskPayload>(QUEUED_TASK_REST);
  registry.schema::<InitializeTaskPayload>(INITIALIZE_TASK);
  registry.schema::<RunTaskPayload>(RUN_TASK);
  registry.schema::<RunTaskPayload>(FINALIZE_TASK);
}
