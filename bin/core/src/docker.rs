use std::fmt::Write;

use anyhow::Context;
use indexmap::IndexMap;
use tesp_client::entities::{maybe_non_empty, task::TesExecutor};

use crate::events::payloads::{TaskInputConf, TaskOutputConf};

/// Builds the `docker run` shell string for one executor.
///
/// Volumes render in insertion order, a repeated host path
/// overwrites its container binding. The `sh -c` wrapper is only
/// emitted for a non-empty argv, with stdio redirections appended
/// inside the quotes.
#[derive(Debug, Default)]
pub struct DockerRunCommandBuilder {
  image: Option<String>,
  volumes: IndexMap<String, String>,
  command: Option<String>,
}

impl DockerRunCommandBuilder {
  pub fn with_image(&mut self, image: &str) -> &mut Self {
    self.image = Some(image.to_string());
    self
  }

  pub fn with_volume(
    &mut self,
    host_path: &str,
    container_path: &str,
  ) -> &mut Self {
    self
      .volumes
      .insert(host_path.to_string(), container_path.to_string());
    self
  }

  pub fn with_command(
    &mut self,
    command: &[String],
    stdin: Option<&str>,
    stdout: Option<&str>,
    stderr: Option<&str>,
  ) -> &mut Self {
    let argv = command.join(" ");
    self.command = maybe_non_empty(&argv).map(|argv| {
      let mut wrapped = format!("sh -c \"{argv}");
      if let Some(stdin) = stdin {
        let _ = write!(wrapped, " <{stdin}");
      }
      if let Some(stdout) = stdout {
        let _ = write!(wrapped, " 1>{stdout}");
      }
      if let Some(stderr) = stderr {
        let _ = write!(wrapped, " 2>{stderr}");
      }
      wrapped.push('"');
      wrapped
    });
    self
  }

  pub fn reset(&mut self) -> &mut Self {
    self.image = None;
    self.volumes = IndexMap::new();
    self.command = None;
    self
  }

  /// The full run command. Missing image is a programmer error,
  /// fatal for the enclosing handler. Resets the builder.
  pub fn build(&mut self) -> anyhow::Result<String> {
    let volumes = self
      .volumes
      .iter()
      .map(|(host, container)| format!("-v {host}:{container}"))
      .collect::<Vec<_>>()
      .join(" ");
    let image =
      self.image.as_deref().context("Docker image is not set")?;
    let command = self.command.as_deref().unwrap_or_default();
    let run_command =
      format!("docker run {volumes} {image} {command}");
    self.reset();
    Ok(run_command)
  }
}

/// The run command for an executor, binding every input and
/// output `pulsar_path:container_path` pair as a volume.
pub fn docker_run_command(
  executor: &TesExecutor,
  input_confs: &[TaskInputConf],
  output_confs: &[TaskOutputConf],
) -> anyhow::Result<String> {
  let mut builder = DockerRunCommandBuilder::default();
  builder.with_image(&executor.image).with_command(
    &executor.command,
    executor.stdin.as_deref().and_then(maybe_non_empty),
    executor.stdout.as_deref().and_then(maybe_non_empty),
    executor.stderr.as_deref().and_then(maybe_non_empty),
  );
  for input_conf in input_confs {
    builder.with_volume(
      &input_conf.pulsar_path,
      &input_conf.container_path,
    );
  }
  for output_conf in output_confs {
    builder.with_volume(
      &output_conf.pulsar_path,
      &output_conf.container_path,
    );
  }
  builder.build()
}
