use std::sync::OnceLock;

use anyhow::Context;
use colored::Colorize;
use tesp_client::entities::{
  config::{CoreConfig, DatabaseConfig, Env, PulsarConfig},
  logger::LogConfig,
};

pub fn core_config() -> &'static CoreConfig {
  static CORE_CONFIG: OnceLock<CoreConfig> = OnceLock::new();
  CORE_CONFIG.get_or_init(|| {
    let env: Env = match envy::from_env()
      .context("Failed to parse Tesp Core environment")
    {
      Ok(env) => env,
      Err(e) => {
        panic!("{e:?}");
      }
    };

    let config_path = &env.tesp_config_path;
    let config = if config_path.exists() {
      let contents = std::fs::read_to_string(config_path)
        .unwrap_or_else(|e| {
          panic!(
            "Failed to read config file at {config_path:?} | {e:?}"
          )
        });
      toml::from_str::<CoreConfig>(&contents).unwrap_or_else(|e| {
        panic!(
          "Failed to parse config file at {config_path:?} | {e:?}"
        )
      })
    } else {
      println!(
        "{}: No config file found at {config_path:?}, using default config",
        "INFO".green(),
      );
      CoreConfig::default()
    };

    // Recreating CoreConfig here makes sure all env overrides are applied.
    CoreConfig {
      port: env.tesp_port.unwrap_or(config.port),
      bind_ip: env.tesp_bind_ip.unwrap_or(config.bind_ip),
      database: DatabaseConfig {
        uri: env.tesp_database_uri.unwrap_or(config.database.uri),
        address: env
          .tesp_database_address
          .unwrap_or(config.database.address),
        username: env
          .tesp_database_username
          .unwrap_or(config.database.username),
        password: env
          .tesp_database_password
          .unwrap_or(config.database.password),
        app_name: env
          .tesp_database_app_name
          .unwrap_or(config.database.app_name),
        db_name: env
          .tesp_database_db_name
          .unwrap_or(config.database.db_name),
      },
      pulsar: PulsarConfig {
        url: env.tesp_pulsar_url.unwrap_or(config.pulsar.url),
        status_poll_interval: env
          .tesp_pulsar_status_poll_interval
          .unwrap_or(config.pulsar.status_poll_interval),
        status_max_polls: env
          .tesp_pulsar_status_max_polls
          .unwrap_or(config.pulsar.status_max_polls),
      },
      logging: LogConfig {
        level: env
          .tesp_logging_level
          .unwrap_or(config.logging.level),
        stdio: env
          .tesp_logging_stdio
          .unwrap_or(config.logging.stdio),
        pretty: env
          .tesp_logging_pretty
          .unwrap_or(config.logging.pretty),
        otlp_endpoint: env
          .tesp_logging_otlp_endpoint
          .unwrap_or(config.logging.otlp_endpoint),
        opentelemetry_service_name: config
          .logging
          .opentelemetry_service_name,
      },
    }
  })
}
