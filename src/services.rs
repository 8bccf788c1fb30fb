use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{error, warn};

use crate::errors::EnumerationError;

pub const SYSTEMCTL: &str = "systemctl";
pub const DOCKER: &str = "docker";
pub const CONTAINER_MARKER: &str = ".docker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOrigin {
    Native,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub identifier: String,
    pub display_name: String,
    pub origin: ServiceOrigin,
}

#[derive(Debug, Deserialize)]
struct ContainerRow {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn native_units(&self, user_scope: bool) -> Result<Vec<ServiceDescriptor>, EnumerationError>;
    async fn containers(&self) -> Result<Vec<ServiceDescriptor>, EnumerationError>;
}

/// Catalog backed by the `systemctl` and `docker` command line tools.
#[derive(Debug, Clone)]
pub struct CliServiceCatalog {
    systemctl: String,
    docker: String,
}

impl Default for CliServiceCatalog {
    fn default() -> Self {
        Self::new(SYSTEMCTL, DOCKER)
    }
}

impl CliServiceCatalog {
    pub fn new(systemctl: impl Into<String>, docker: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
            docker: docker.into(),
        }
    }
}

#[async_trait]
impl ServiceCatalog for CliServiceCatalog {
    async fn native_units(&self, user_scope: bool) -> Result<Vec<ServiceDescriptor>, EnumerationError> {
        let mut args = vec![
            "list-units",
            "--type=service",
            "--plain",
            "--no-legend",
            "--no-pager",
        ];
        if user_scope {
            args.push("--user");
        }

        let stdout = run_listing(&self.systemctl, &args).await?;
        Ok(parse_unit_rows(&stdout))
    }

    async fn containers(&self) -> Result<Vec<ServiceDescriptor>, EnumerationError> {
        let stdout = run_listing(
            &self.docker,
            &["ps", "-a", "--no-trunc", "--format", "{{json .}}"],
        )
        .await?;
        parse_container_rows(&stdout).map_err(|message| EnumerationError::Parse {
            program: self.docker.clone(),
            message,
        })
    }
}

async fn run_listing(program: &str, args: &[&str]) -> Result<String, EnumerationError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EnumerationError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EnumerationError::Failed {
            program: program.to_string(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Lists selectable services, containers first.
///
/// Never fails: a broken systemd listing yields no native units and a broken container
/// runtime yields no containers, each logged.
pub async fn list_services(
    catalog: &dyn ServiceCatalog,
    user_scope: bool,
    merge_containers: bool,
) -> Vec<ServiceDescriptor> {
    let native = catalog.native_units(user_scope).await.unwrap_or_else(|err| {
        error!(error = %err, "failed to list systemd units");
        Vec::new()
    });

    if !merge_containers {
        return native;
    }

    let mut services = catalog.containers().await.unwrap_or_else(|err| {
        warn!(error = %err, "failed to list containers, showing systemd units only");
        Vec::new()
    });
    services.extend(native);
    services
}

/// One `<identifier> <display name>` line per service.
pub fn render_service_list(services: &[ServiceDescriptor]) -> String {
    services
        .iter()
        .map(|service| format!("{} {}\n", service.identifier, service.display_name))
        .collect()
}

fn parse_unit_rows(stdout: &str) -> Vec<ServiceDescriptor> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim_start_matches(|c: char| c.is_whitespace() || c == '●' || c == '*');
            let mut columns = line.split_whitespace();
            let unit = columns.next()?;
            // LOAD ACTIVE SUB
            let description = columns.skip(3).collect::<Vec<_>>().join(" ");
            Some(ServiceDescriptor {
                identifier: unit.to_string(),
                display_name: if description.is_empty() {
                    unit.to_string()
                } else {
                    description
                },
                origin: ServiceOrigin::Native,
            })
        })
        .collect()
}

fn parse_container_rows(stdout: &str) -> Result<Vec<ServiceDescriptor>, String> {
    let mut containers = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let row: ContainerRow = serde_json::from_str(line).map_err(|err| err.to_string())?;
        let id = row.id.trim();
        if id.is_empty() {
            continue;
        }
        let name = row.names.trim();
        containers.push(ServiceDescriptor {
            identifier: format!("{id}{CONTAINER_MARKER}"),
            display_name: if name.is_empty() {
                id.to_string()
            } else {
                name.to_string()
            },
            origin: ServiceOrigin::Container,
        });
    }
    Ok(containers)
}
