//! Translation of a service selection into `journalctl` match arguments

use crate::services::CONTAINER_MARKER;

pub const BACKLOG_LINES: usize = 100;
pub const OR_SEPARATOR: &str = "+";

const SYSTEM_UNIT_FIELD: &str = "_SYSTEMD_UNIT";
const USER_UNIT_FIELD: &str = "_SYSTEMD_USER_UNIT";
const CONTAINER_ID_FIELD: &str = "CONTAINER_ID_FULL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopeMode {
    #[default]
    System,
    User,
}

impl ScopeMode {
    pub fn from_user_flag(user_scope: bool) -> Self {
        if user_scope {
            Self::User
        } else {
            Self::System
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRequest {
    pub selected_services: Vec<String>,
    pub scope_mode: ScopeMode,
    pub container_mode: bool,
}

impl StreamRequest {
    /// Builds a request from the raw `services` query value.
    ///
    /// Anything that is not a JSON array of strings yields an empty selection,
    /// which streams every unit.
    pub fn from_query(raw_services: Option<&str>, scope_mode: ScopeMode, container_mode: bool) -> Self {
        Self {
            selected_services: parse_selection(raw_services),
            scope_mode,
            container_mode,
        }
    }
}

fn parse_selection(raw_services: Option<&str>) -> Vec<String> {
    let Some(parsed) = raw_services.and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
    else {
        return Vec::new();
    };

    let mut selection: Vec<String> = Vec::with_capacity(parsed.len());
    for service in parsed {
        let service = service.trim();
        if service.is_empty() || selection.iter().any(|existing| existing == service) {
            continue;
        }
        selection.push(service.to_string());
    }
    selection
}

pub fn build_filter_args(request: &StreamRequest) -> Vec<String> {
    let mut args = vec!["-b".to_string()];
    if request.scope_mode == ScopeMode::User {
        args.push("--user".to_string());
    }

    for (index, service) in request.selected_services.iter().enumerate() {
        if index > 0 {
            args.push(OR_SEPARATOR.to_string());
        }
        args.push(match_clause(service, request));
    }

    let backlog = BACKLOG_LINES.to_string();
    args.extend(["--all", "-f", "-n", backlog.as_str(), "-o", "json"].map(str::to_string));
    args
}

fn match_clause(service: &str, request: &StreamRequest) -> String {
    if request.container_mode {
        if let Some(container_id) = service
            .strip_suffix(CONTAINER_MARKER)
            .filter(|id| !id.is_empty())
        {
            return format!("{CONTAINER_ID_FIELD}={container_id}");
        }
    }

    match request.scope_mode {
        ScopeMode::User => format!("{USER_UNIT_FIELD}={service}"),
        ScopeMode::System => format!("{SYSTEM_UNIT_FIELD}={service}"),
    }
}
