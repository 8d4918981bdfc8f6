use std::sync::Arc;

use serde_json::Value;
use tesp_client::entities::config::CoreConfig;

use crate::{
  db::{MongoTaskStore, TaskStore},
  events::{Event, EventRegistry, handlers, payloads},
  pulsar::{PulsarOperations, PulsarRestClient},
  transfer::{FileTransfer, FtpTransfer},
};

/// The process-wide service container: the store, the pulsar
/// client, the transfer client and the handler registry. Built
/// once at startup and shared by the api layer and every event
/// handler.
pub struct SystemContext {
  pub store: Arc<dyn TaskStore>,
  pub pulsar: Arc<dyn PulsarOperations>,
  pub transfer: Arc<dyn FileTransfer>,
  pub events: EventRegistry,
}

impl SystemContext {
  pub async fn new(
    config: &CoreConfig,
  ) -> anyhow::Result<Arc<SystemContext>> {
    let store = MongoTaskStore::new(&config.database).await?;
    let pulsar = PulsarRestClient::new(&config.pulsar)?;
    Ok(Arc::new(SystemContext {
      store: Arc::new(store),
      pulsar: Arc::new(pulsar),
      transfer: Arc::new(FtpTransfer),
      events: default_registry(),
    }))
  }

  /// Fire and forget: every handler matching the event name is
  /// scheduled as its own background task, in registration order.
  /// Returns before any of them runs and never observes their
  /// outcome. The only failure is a payload that does not match
  /// the event's registered schema, surfaced to the caller.
  pub fn dispatch(
    self: &Arc<Self>,
    event_name: &str,
    payload: Value,
  ) -> anyhow::Result<()> {
    let payload =
      self.events.project_payload(event_name, payload)?;
    debug!("dispatching event [{event_name}]");
    for handler in self.events.handlers_for(event_name) {
      let event = Event {
        name: event_name.to_string(),
        payload: payload.clone(),
      };
      let ctx = self.clone();
      tokio::spawn(async move {
        handler(event, ctx).await;
      });
    }
    Ok(())
  }
}

/// Registry with the lifecycle handlers and payload schemas
/// in place.
pub fn default_registry() -> EventRegistry {
  let mut registry = EventRegistry::default();
  payloads::register_schemas(&mut registry);
  handlers::register_handlers(&mut registry);
  registry
}
