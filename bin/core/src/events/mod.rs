use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use wildcard::Wildcard;

use crate::context::SystemContext;

pub mod error;
pub mod handlers;
pub mod payloads;


/// A concrete event as delivered to handlers.
#[derive(Debug, Clone)]
pub struct Event {
  pub name: String,
  pub payload: Value,
}

pub type EventHandler = Arc<
  dyn Fn(Event, Arc<SystemContext>) -> BoxFuture<'static, ()>
    + Send
    + Sync,
>;

type PayloadSchema =
  Box<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Maps event name patterns to handlers. A pattern is a literal
/// name or a glob: `*` matches any run of characters, `?` one.
/// Written only during startup registration.
#[derive(Default)]
pub struct EventRegistry {
  handlers: Vec<(String, Vec<EventHandler>)>,
  schemas: HashMap<String, PayloadSchema>,
}

impl EventRegistry {
  pub fn on(
    &mut self,
    pattern: impl Into<String>,
    handler: EventHandler,
  ) {
    let pattern = pattern.into();
    match self
      .handlers
      .iter_mut()
      .find(|(registered, _)| *registered == pattern)
    {
      Some((_, handlers)) => handlers.push(handler),
      None => self.handlers.push((pattern, vec![handler])),
    }
  }

  /// Register the payload shape for an event name. Dispatched
  /// payloads are projected through it: unknown keys rejected,
  /// unset optional fields dropped.
  pub fn schema<T: DeserializeOwned + Serialize>(
    &mut self,
    event_name: impl Into<String>,
  ) {
    self.schemas.insert(
      event_name.into(),
      Box::new(|payload| {
        let typed: T = serde_json::from_value(payload)
          .context("event payload does not match registered schema")?;
        serde_json::to_value(typed)
          .context("failed to serialize projected event payload")
      }),
    );
  }

  pub fn project_payload(
    &self,
    event_name: &str,
    payload: Value,
  ) -> anyhow::Result<Value> {
    match self.schemas.get(event_name) {
      Some(schema) => schema(payload),
      None => Ok(payload),
    }
  }

  /// Every handler whose pattern matches the name, in
  /// registration order across patterns.
  pub fn handlers_for(
    &self,
    event_name: &str,
  ) -> Vec<EventHandler> {
    let mut matched = Vec::new();
    for (pattern, handlers) in &self.handlers {
      let wildcard = match Wildcard::new(pattern.as_bytes()) {
        Ok(wildcard) => wildcard,
        Err(e) => {
          warn!(
            "invalid event handler pattern '{pattern}' | {e:?}"
          );
          continue;
        }
      };
      if wildcard.is_match(event_name.as_bytes()) {
        matched.extend(handlers.iter().cloned());
      }
    }
    matched
  }
}
