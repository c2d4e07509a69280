// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker CLI backend.
//!
//! Drives the engine through the `docker` binary, the same way the engine
//! would be driven by an operator. `DOCKER_HOST` is passed through so the
//! gateway can target a remote daemon.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::net::DEFAULT_BRIDGE_HOST;
use super::traits::*;
use crate::config::{ConfigError, env_opt, env_parse, env_secs};

/// Credentials for a private image registry.
#[derive(Clone)]
pub struct RegistryCredentials {
    /// Registry server (Docker Hub when unset).
    pub server: Option<String>,
    /// Username.
    pub username: String,
    /// Password or token. Fed to `docker login` over stdin.
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Docker CLI backend configuration
#[derive(Debug, Clone)]
pub struct DockerCliConfig {
    /// Path or name of the docker binary
    pub binary: String,
    /// Daemon address (`DOCKER_HOST`), default socket when unset
    pub docker_host: Option<String>,
    /// Address at which published ports are reachable (`DOCKER_BRIDGE_HOST`)
    pub bridge_host: String,
    /// Port the device runtime listens on inside the container
    pub container_port: u16,
    /// Grace period for `docker stop`
    pub stop_timeout: Duration,
    /// Registry login, used before pulling
    pub credentials: Option<RegistryCredentials>,
}

impl Default for DockerCliConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            docker_host: None,
            bridge_host: DEFAULT_BRIDGE_HOST.to_string(),
            container_port: 8080,
            stop_timeout: Duration::from_secs(5),
            credentials: None,
        }
    }
}

impl DockerCliConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();

        let credentials = match (
            env_opt("ZAPGATE_REGISTRY_USERNAME"),
            env_opt("ZAPGATE_REGISTRY_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                server: env_opt("ZAPGATE_REGISTRY_SERVER"),
                username,
                password,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnvVar("ZAPGATE_REGISTRY_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::MissingEnvVar("ZAPGATE_REGISTRY_USERNAME")),
        };

        Ok(Self {
            binary: env_opt("ZAPGATE_DOCKER_BIN").unwrap_or(defaults.binary),
            docker_host: env_opt("DOCKER_HOST"),
            bridge_host: env_opt("DOCKER_BRIDGE_HOST").unwrap_or(defaults.bridge_host),
            container_port: env_parse("ZAPGATE_CONTAINER_PORT", defaults.container_port)?,
            stop_timeout: env_secs("ZAPGATE_STOP_TIMEOUT_SECS", defaults.stop_timeout)?,
            credentials,
        })
    }
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InspectOutput {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    network: Option<InspectNetwork>,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "Ports", default)]
    ports: Option<HashMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
struct PortBinding {
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

/// Container runtime backed by the `docker` CLI.
pub struct DockerCli {
    config: DockerCliConfig,
    logged_in: tokio::sync::Mutex<bool>,
}

impl DockerCli {
    /// Create a new Docker CLI backend
    pub fn new(config: DockerCliConfig) -> Self {
        Self {
            config,
            logged_in: tokio::sync::Mutex::new(false),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(DockerCliConfig::from_env()?))
    }

    /// Get the configuration
    pub fn config(&self) -> &DockerCliConfig {
        &self.config
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args).kill_on_drop(true);
        if let Some(host) = &self.config.docker_host {
            cmd.env("DOCKER_HOST", host);
        }
        cmd
    }

    /// Run a docker command, returning stdout on success.
    async fn exec(&self, args: &[&str]) -> Result<String> {
        let output = self.command(args).output().await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} {}", self.config.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn login(&self, creds: &RegistryCredentials) -> Result<()> {
        let mut logged_in = self.logged_in.lock().await;
        if *logged_in {
            return Ok(());
        }

        let mut args = vec!["login", "--username", creds.username.as_str(), "--password-stdin"];
        if let Some(server) = &creds.server {
            args.push(server.as_str());
        }

        let mut cmd = self.command(&args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(creds.password.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: format!("{} login", self.config.binary),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(server = ?creds.server, username = %creds.username, "Logged in to image registry");
        *logged_in = true;
        Ok(())
    }

    fn parse_ps_line(line: &str) -> Result<ContainerSummary> {
        let ps: PsLine = serde_json::from_str(line)?;
        Ok(ContainerSummary {
            id: ps.id,
            name: ps.names,
            running: ps.state.eq_ignore_ascii_case("running"),
        })
    }

    fn parse_inspect(&self, stdout: &str) -> Result<ContainerInspect> {
        let mut outputs: Vec<InspectOutput> = serde_json::from_str(stdout)?;
        let inspect = outputs
            .pop()
            .ok_or_else(|| RuntimeError::MalformedOutput("empty inspect output".to_string()))?;

        let port_key = format!("{}/tcp", self.config.container_port);
        let host_port = inspect
            .network
            .and_then(|n| n.ports)
            .and_then(|mut ports| ports.remove(&port_key))
            .flatten()
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|b| b.host_port.parse::<u16>().ok())
            });

        Ok(ContainerInspect {
            id: inspect.id,
            running: inspect.state.running,
            host_port,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    fn host_address(&self) -> String {
        self.config.bridge_host.clone()
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self
            .exec(&["image", "inspect", "--format", "{{.Id}}", image])
            .await
            .is_ok()
        {
            debug!(image = %image, "Image present locally");
            return Ok(());
        }

        if let Some(creds) = &self.config.credentials {
            self.login(creds).await?;
        }

        info!(image = %image, "Pulling image");
        self.exec(&["pull", "--quiet", image]).await?;
        Ok(())
    }

    async fn find_by_label(&self, key: &str, value: &str) -> Result<Option<ContainerSummary>> {
        let filter = format!("label={}={}", key, value);
        let stdout = self
            .exec(&[
                "ps",
                "--all",
                "--no-trunc",
                "--filter",
                filter.as_str(),
                "--format",
                "{{json .}}",
            ])
            .await?;

        let mut found = None;
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let summary = Self::parse_ps_line(line)?;
            // Prefer a running container when several share the label.
            if summary.running {
                return Ok(Some(summary));
            }
            found.get_or_insert(summary);
        }
        Ok(found)
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let publish = format!(
            "0.0.0.0:{}:{}/tcp",
            spec.host_port, self.config.container_port
        );

        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            spec.name.clone(),
            "--publish".into(),
            publish,
        ];
        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.exec(&arg_refs).await {
            Ok(stdout) => {
                let id = stdout.trim().to_string();
                if id.is_empty() {
                    return Err(RuntimeError::MalformedOutput(
                        "docker run printed no container id".to_string(),
                    ));
                }
                Ok(id)
            }
            Err(e) => {
                // `docker run` may leave a created-but-not-started container behind.
                if let Err(cleanup) = self.exec(&["rm", "--force", spec.name.as_str()]).await
                    && !cleanup.is_idempotent_teardown()
                {
                    warn!(name = %spec.name, error = %cleanup, "Failed to clean up container after failed start");
                }
                Err(e)
            }
        }
    }

    async fn start(&self, container_id: &str) -> Result<()> {
        self.exec(&["start", container_id]).await?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerInspect> {
        match self
            .exec(&["inspect", "--type", "container", container_id])
            .await
        {
            Ok(stdout) => self.parse_inspect(&stdout),
            Err(e) if e.is_idempotent_teardown() => {
                Err(RuntimeError::ContainerNotFound(container_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        let timeout = self.config.stop_timeout.as_secs().to_string();
        self.exec(&["stop", "--time", timeout.as_str(), container_id])
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.exec(&["rm", "--force", "--volumes", container_id])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_line() {
        let line = r#"{"ID":"abc123","Names":"whats-device-5511-1","State":"exited","Status":"Exited (0)"}"#;
        let summary = DockerCli::parse_ps_line(line).unwrap();
        assert_eq!(summary.id, "abc123");
        assert_eq!(summary.name, "whats-device-5511-1");
        assert!(!summary.running);
    }

    #[test]
    fn test_parse_inspect_reads_published_port() {
        let cli = DockerCli::new(DockerCliConfig::default());
        let stdout = r#"[{
            "Id": "abc123",
            "State": {"Running": true, "Status": "running"},
            "NetworkSettings": {"Ports": {"8080/tcp": [{"HostIp": "0.0.0.0", "HostPort": "49153"}]}}
        }]"#;
        let inspect = cli.parse_inspect(stdout).unwrap();
        assert_eq!(inspect.id, "abc123");
        assert!(inspect.running);
        assert_eq!(inspect.host_port, Some(49153));
    }

    #[test]
    fn test_parse_inspect_unpublished_port() {
        let cli = DockerCli::new(DockerCliConfig::default());
        let stdout = r#"[{
            "Id": "abc123",
            "State": {"Running": false},
            "NetworkSettings": {"Ports": {"8080/tcp": null}}
        }]"#;
        let inspect = cli.parse_inspect(stdout).unwrap();
        assert!(!inspect.running);
        assert_eq!(inspect.host_port, None);
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = RegistryCredentials {
            server: None,
            username: "bot".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_default_config() {
        let config = DockerCliConfig::default();
        assert_eq!(config.binary, "docker");
        assert_eq!(config.bridge_host, "127.0.0.1");
        assert_eq!(config.container_port, 8080);
        assert_eq!(config.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_builds_cli() {
        // No registry credentials or overrides are set in the test environment.
        let cli = DockerCli::from_env().unwrap();
        assert!(!cli.config().binary.is_empty());
        assert!(cli.config().container_port > 0);
    }
}
