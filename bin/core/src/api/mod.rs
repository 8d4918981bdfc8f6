use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use tesp_client::api::{
  TesServiceInfo, TesServiceOrganization, TesServiceType,
};

use crate::context::SystemContext;

mod tasks;

pub fn router(ctx: Arc<SystemContext>) -> Router {
  Router::new()
    .route(
      "/v1/tasks",
      post(tasks::create_task).get(tasks::list_tasks),
    )
    .route("/v1/tasks/{id}", get(tasks::get_task))
    .route("/v1/tasks/{id}:cancel", post(tasks::cancel_task))
    .route("/v1/service-info", get(service_info))
    .with_state(ctx)
}

async fn service_info() -> Json<TesServiceInfo> {
  Json(TesServiceInfo {
    id: String::from("dev.tesp.core"),
    name: String::from("Tesp"),
    service_type: TesServiceType {
      group: String::from("org.ga4gh"),
      artifact: String::from("tes"),
      version: String::from("1.0.0"),
    },
    description: String::from(
      "GA4GH TES server implementation backed by Pulsar",
    ),
    organization: TesServiceOrganization {
      name: String::from("Tesp"),
      url: String::from("https://tesp.dev"),
    },
    contact_url: String::from("https://tesp.dev"),
    documentation_url: String::from("https://tesp.dev"),
    created_at: String::from("2025-01-01T00:00:00Z"),
    updated_at: String::from("2025-01-01T00:00:00Z"),
    environment: String::from("dev"),
    version: env!("CARGO_PKG_VERSION").to_string(),
    storage: vec![String::from("ftp")],
  })
}
