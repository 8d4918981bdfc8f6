use anyhow::{Context, anyhow};
use async_trait::async_trait;
use mungos::{
  find::find_collect,
  init::MongoBuilder,
  mongodb::{
    Collection,
    bson::{Bson, Document, doc, oid::ObjectId, to_bson},
    options::{FindOptions, ReturnDocument},
  },
};
use tesp_client::entities::{
  config::DatabaseConfig,
  task::{TesTask, TesTaskLog, TesTaskState},
};
use thiserror::Error;

#[cfg(test)]
pub mod memory;

/// A storage failure with the details scrubbed. The driver error
/// is logged where it occurs and never carried outward.
#[derive(Debug, Clone, Error)]
#[error("Database error occurred, contact system administrator")]
pub struct DataLayerError;

/// The filter language the store accepts: a task id,
/// optionally asserting the current state.
#[derive(Debug, Clone)]
pub struct TaskFilter {
  pub task_id: String,
  pub state: Option<TesTaskState>,
}

impl TaskFilter {
  pub fn id(task_id: impl Into<String>) -> TaskFilter {
    TaskFilter {
      task_id: task_id.into(),
      state: None,
    }
  }

  /// Filter asserting the task is still in the given state.
  /// The gate behind every lifecycle transition.
  pub fn id_in_state(
    task_id: impl Into<String>,
    state: TesTaskState,
  ) -> TaskFilter {
    TaskFilter {
      task_id: task_id.into(),
      state: Some(state),
    }
  }
}

/// The update language the store accepts: `$set` on `state`
/// and / or `logs`, `$push` onto every log entry's `system_logs`.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
  pub set_state: Option<TesTaskState>,
  pub set_logs: Option<Vec<TesTaskLog>>,
  pub push_system_log: Option<String>,
}

impl TaskUpdate {
  pub fn state(state: TesTaskState) -> TaskUpdate {
    TaskUpdate {
      set_state: Some(state),
      ..Default::default()
    }
  }

  pub fn logs(logs: Vec<TesTaskLog>) -> TaskUpdate {
    TaskUpdate {
      set_logs: Some(logs),
      ..Default::default()
    }
  }
}

/// Persistence contract over the task document collection.
///
/// `update_task` is observable-atomic: a transition either commits
/// fully and returns the post-update document, or does not happen.
/// Concurrent updates to the same document are serialized by the
/// store, making the state-asserting filter the core's concurrency
/// primitive.
#[async_trait]
pub trait TaskStore: Send + Sync {
  /// Insert a new task document, returns the server assigned id.
  async fn create_task(
    &self,
    task: &TesTask,
  ) -> Result<String, DataLayerError>;

  /// The single document matching the filter, if any.
  async fn get_task(
    &self,
    filter: TaskFilter,
  ) -> Result<Option<TesTask>, DataLayerError>;

  /// Page through tasks in ascending id order. `page_token` is the
  /// exclusive lower bound (the last id of the previous page),
  /// `name_prefix` matches names beginning with the prefix.
  /// The returned token is the last id of the page, or None
  /// when the page came back empty.
  async fn list_tasks(
    &self,
    page_size: Option<i64>,
    page_token: Option<String>,
    name_prefix: Option<String>,
  ) -> Result<(Vec<TesTask>, Option<String>), DataLayerError>;

  /// Atomically find-and-update, returning the post-update document
  /// or None if nothing matched the filter.
  async fn update_task(
    &self,
    filter: TaskFilter,
    update: TaskUpdate,
  ) -> Result<Option<TesTask>, DataLayerError>;

  /// Unconditionally move the task to CANCELED on id match.
  async fn cancel_task(
    &self,
    task_id: &str,
  ) -> Result<Option<String>, DataLayerError>;
}

pub struct MongoTaskStore {
  tasks: Collection<TesTask>,
}

impl MongoTaskStore {
  pub async fn new(
    config: &DatabaseConfig,
  ) -> anyhow::Result<MongoTaskStore> {
    let mut client = MongoBuilder::default().app_name(&config.app_name);

    match (
      !config.uri.is_empty(),
      !config.address.is_empty(),
      !config.username.is_empty(),
      !config.password.is_empty(),
    ) {
      (true, _, _, _) => {
        client = client.uri(&config.uri);
      }
      (_, true, true, true) => {
        client = client
          .address(&config.address)
          .username(&config.username)
          .password(&config.password);
      }
      (_, true, _, _) => {
        client = client.address(&config.address);
      }
      _ => {
        return Err(anyhow!(
          "'config.database' not configured correctly. must pass either 'config.database.uri', or 'config.database.address' + 'config.database.username' + 'config.database.password'"
        ));
      }
    }

    let client = client
      .build()
      .await
      .context("Failed to initialize database connection.")?;

    Ok(MongoTaskStore {
      tasks: client.database(&config.db_name).collection("tasks"),
    })
  }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
  async fn create_task(
    &self,
    task: &TesTask,
  ) -> Result<String, DataLayerError> {
    let res = self
      .tasks
      .insert_one(task)
      .await
      .map_err(data_layer_error)?;
    match res.inserted_id {
      Bson::ObjectId(id) => Ok(id.to_hex()),
      unexpected => {
        error!(
          "mongo returned non-ObjectId inserted id | {unexpected:?}"
        );
        Err(DataLayerError)
      }
    }
  }

  async fn get_task(
    &self,
    filter: TaskFilter,
  ) -> Result<Option<TesTask>, DataLayerError> {
    self
      .tasks
      .find_one(filter_document(&filter)?)
      .await
      .map_err(data_layer_error)
  }

  async fn list_tasks(
    &self,
    page_size: Option<i64>,
    page_token: Option<String>,
    name_prefix: Option<String>,
  ) -> Result<(Vec<TesTask>, Option<String>), DataLayerError> {
    let mut filter = Document::new();
    if let Some(token) = page_token {
      filter
        .insert("_id", doc! { "$gt": parse_object_id(&token)? });
    }
    if let Some(prefix) = name_prefix {
      filter
        .insert("name", doc! { "$regex": format!("^{prefix}") });
    }
    let options = FindOptions::builder()
      .sort(doc! { "_id": 1 })
      .limit(page_size)
      .build();
    let tasks = find_collect(&self.tasks, filter, options)
      .await
      .map_err(data_layer_error)?;
    let next_page_token = tasks.last().map(|task| task.id.clone());
    Ok((tasks, next_page_token))
  }

  async fn update_task(
    &self,
    filter: TaskFilter,
    update: TaskUpdate,
  ) -> Result<Option<TesTask>, DataLayerError> {
    self
      .tasks
      .find_one_and_update(
        filter_document(&filter)?,
        update_document(&update)?,
      )
      .return_document(ReturnDocument::After)
      .await
      .map_err(data_layer_error)
  }

  async fn cancel_task(
    &self,
    task_id: &str,
  ) -> Result<Option<String>, DataLayerError> {
    let canceled = self
      .update_task(
        TaskFilter::id(task_id),
        TaskUpdate::state(TesTaskState::Canceled),
      )
      .await?;
    Ok(canceled.map(|task| task.id))
  }
}

fn filter_document(
  filter: &TaskFilter,
) -> Result<Document, DataLayerError> {
  let mut document =
    doc! { "_id": parse_object_id(&filter.task_id)? };
  if let Some(state) = filter.state {
    document.insert("state", state.to_string());
  }
  Ok(document)
}

fn update_document(
  update: &TaskUpdate,
) -> Result<Document, DataLayerError> {
  let mut set = Document::new();
  if let Some(state) = update.set_state {
    set.insert("state", state.to_string());
  }
  if let Some(logs) = &update.set_logs {
    set.insert("logs", to_bson(logs).map_err(data_layer_error)?);
  }
  let mut document = Document::new();
  if !set.is_empty() {
    document.insert("$set", set);
  }
  if let Some(system_log) = &update.push_system_log {
    document.insert(
      "$push",
      doc! { "logs.$[].system_logs": system_log },
    );
  }
  Ok(document)
}

fn parse_object_id(id: &str) -> Result<ObjectId, DataLayerError> {
  ObjectId::parse_str(id).map_err(data_layer_error)
}

fn data_layer_error(
  e: impl std::fmt::Debug,
) -> DataLayerError {
  error!("mongo data layer error occurred | {e:?}");
  DataLayerError
}
