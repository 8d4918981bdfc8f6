use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use mungos::mongodb::bson::oid::ObjectId;
use tesp_client::entities::task::{TesTask, TesTaskState};

use super::{DataLayerError, TaskFilter, TaskStore, TaskUpdate};

/// In-memory [TaskStore] for the lifecycle tests. All access is
/// serialized behind one lock, which gives it the same
/// observable-atomic update behavior as the real store. Keyed on
/// the hex object id, so iteration order is ascending id order.
#[derive(Default)]
pub struct MemoryTaskStore {
  tasks: Mutex<BTreeMap<String, TesTask>>,
  history: Mutex<Vec<(String, TesTaskState)>>,
}

impl MemoryTaskStore {
  /// Snapshot of the current document.
  pub fn current(&self, task_id: &str) -> Option<TesTask> {
    self.tasks.lock().unwrap().get(task_id).cloned()
  }

  /// Every state the task has been observed in, in write order.
  pub fn state_history(&self, task_id: &str) -> Vec<TesTaskState> {
    self
      .history
      .lock()
      .unwrap()
      .iter()
      .filter(|(id, _)| id == task_id)
      .map(|(_, state)| *state)
      .collect()
  }

  /// Set the state directly, bypassing the update language.
  /// Stands in for an external actor racing the pipeline.
  pub fn force_state(&self, task_id: &str, state: TesTaskState) {
    if let Some(task) =
      self.tasks.lock().unwrap().get_mut(task_id)
    {
      task.state = state;
      self
        .history
        .lock()
        .unwrap()
        .push((task_id.to_string(), state));
    }
  }

  fn matches(task: &TesTask, filter: &TaskFilter) -> bool {
    task.id == filter.task_id
      && filter.state.is_none_or(|state| task.state == state)
  }

  fn apply(&self, task: &mut TesTask, update: &TaskUpdate) {
    if let Some(state) = update.set_state {
      task.state = state;
      self
        .history
        .lock()
        .unwrap()
        .push((task.id.clone(), state));
    }
    if let Some(logs) = &update.set_logs {
      task.logs = logs.clone();
    }
    if let Some(system_log) = &update.push_system_log {
      for log in &mut task.logs {
        log.system_logs.push(system_log.clone());
      }
    }
  }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
  async fn create_task(
    &self,
    task: &TesTask,
  ) -> Result<String, DataLayerError> {
    let id = ObjectId::new().to_hex();
    let mut task = task.clone();
    task.id = id.clone();
    self
      .history
      .lock()
      .unwrap()
      .push((id.clone(), task.state));
    self.tasks.lock().unwrap().insert(id.clone(), task);
    Ok(id)
  }

  async fn get_task(
    &self,
    filter: TaskFilter,
  ) -> Result<Option<TesTask>, DataLayerError> {
    let tasks = self.tasks.lock().unwrap();
    Ok(
      tasks
        .get(&filter.task_id)
        .filter(|task| Self::matches(task, &filter))
        .cloned(),
    )
  }

  async fn list_tasks(
    &self,
    page_size: Option<i64>,
    page_token: Option<String>,
    name_prefix: Option<String>,
  ) -> Result<(Vec<TesTask>, Option<String>), DataLayerError> {
    // A zero limit is no limit, as the mongo driver treats it.
    let limit = match page_size {
      Some(size) if size > 0 => size as usize,
      _ => usize::MAX,
    };
    let tasks = self.tasks.lock().unwrap();
    let page = tasks
      .values()
      .filter(|task| match &page_token {
        Some(token) => task.id.as_str() > token.as_str(),
        None => true,
      })
      .filter(|task| match &name_prefix {
        Some(prefix) => task
          .name
          .as_deref()
          .is_some_and(|name| name.starts_with(prefix.as_str())),
        None => true,
      })
      .take(limit)
      .cloned()
      .collect::<Vec<_>>();
    let next_page_token = page.last().map(|task| task.id.clone());
    Ok((page, next_page_token))
  }

  async fn update_task(
    &self,
    filter: TaskFilter,
    update: TaskUpdate,
  ) -> Result<Option<TesTask>, DataLayerError> {
    let mut tasks = self.tasks.lock().unwrap();
    let Some(task) = tasks
      .get_mut(&filter.task_id)
      .filter(|task| Self::matches(task, &filter))
    else {
      return Ok(None);
    };
    self.apply(task, &update);
    Ok(Some(task.clone()))
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

#[cfg(test)]
mod tests {
  use tesp_client::entities::{
    maybe_non_zero, task::TesTaskLog,
  };

  use super::*;

  fn queued_task(name: &str) -> TesTask {
    TesTask {
      name: Some(name.to_string()),
      state: TesTaskState::Queued,
      logs: vec![TesTaskLog::empty()],
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn pages_partition_the_task_set() {
    let store = MemoryTaskStore::default();
    let mut ids = Vec::new();
    for i in 0..5 {
      ids.push(
        store
          .create_task(&queued_task(&format!("task-{i}")))
          .await
          .unwrap(),
      );
    }

    let (page, next) =
      store.list_tasks(Some(2), None, None).await.unwrap();
    let page_ids =
      page.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    assert_eq!(page_ids, ids[0..2]);
    assert_eq!(next.as_deref(), Some(ids[1].as_str()));

    let (page, next) =
      store.list_tasks(Some(2), next, None).await.unwrap();
    let page_ids =
      page.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    assert_eq!(page_ids, ids[2..4]);
    assert_eq!(next.as_deref(), Some(ids[3].as_str()));

    let (page, next) =
      store.list_tasks(Some(2), next, None).await.unwrap();
    let page_ids =
      page.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    assert_eq!(page_ids, ids[4..5]);
    assert_eq!(next.as_deref(), Some(ids[4].as_str()));

    let (page, next) =
      store.list_tasks(Some(2), next, None).await.unwrap();
    assert!(page.is_empty());
    assert_eq!(next, None);
  }

  #[tokio::test]
  async fn zero_page_size_returns_every_task() {
    let store = MemoryTaskStore::default();
    for i in 0..5 {
      store
        .create_task(&queued_task(&format!("task-{i}")))
        .await
        .unwrap();
    }

    // The query layer lifts a zero page_size to None.
    let (page, next) = store
      .list_tasks(maybe_non_zero(0), None, None)
      .await
      .unwrap();
    assert_eq!(page.len(), 5);
    assert_eq!(next, page.last().map(|t| t.id.clone()));

    // A literal zero limit behaves the same.
    let (page, _) =
      store.list_tasks(Some(0), None, None).await.unwrap();
    assert_eq!(page.len(), 5);
  }

  #[tokio::test]
  async fn name_prefix_filters_pages() {
    let store = MemoryTaskStore::default();
    store.create_task(&queued_task("alpha-1")).await.unwrap();
    store.create_task(&queued_task("beta-1")).await.unwrap();
    store.create_task(&queued_task("alpha-2")).await.unwrap();

    let (page, _) = store
      .list_tasks(None, None, Some("alpha".to_string()))
      .await
      .unwrap();
    assert_eq!(page.len(), 2);
    assert!(
      page
        .iter()
        .all(|t| t.name.as_deref().unwrap().starts_with("alpha"))
    );
  }

  #[tokio::test]
  async fn concurrent_transition_has_exactly_one_winner() {
    let store = std::sync::Arc::new(MemoryTaskStore::default());
    let mut task = queued_task("racer");
    task.state = TesTaskState::Initializing;
    let id = store.create_task(&task).await.unwrap();

    let (a, b) = tokio::join!(
      store.update_task(
        TaskFilter::id_in_state(&id, TesTaskState::Initializing),
        TaskUpdate::state(TesTaskState::Running),
      ),
      store.update_task(
        TaskFilter::id_in_state(&id, TesTaskState::Initializing),
        TaskUpdate::state(TesTaskState::Running),
      ),
    );
    let winners =
      [a.unwrap(), b.unwrap()].iter().flatten().count();
    assert_eq!(winners, 1);
    assert_eq!(
      store.current(&id).unwrap().state,
      TesTaskState::Running
    );
  }

  #[tokio::test]
  async fn error_update_pushes_system_log_across_log_entries() {
    let store = MemoryTaskStore::default();
    let id = store.create_task(&queued_task("sys")).await.unwrap();

    let update = TaskUpdate {
      set_state: Some(TesTaskState::SystemError),
      push_system_log: Some("boom".to_string()),
      ..Default::default()
    };
    let updated = store
      .update_task(TaskFilter::id(&id), update)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(updated.state, TesTaskState::SystemError);
    assert_eq!(updated.logs[0].system_logs, vec!["boom"]);
  }
}
