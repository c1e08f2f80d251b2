use crate::config::Config;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Serialize)]
pub struct PreflightIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct PreflightError {
    pub issues: Vec<PreflightIssue>,
}

impl PreflightError {
    pub fn new(issues: Vec<PreflightIssue>) -> Self {
        Self { issues }
    }
}

/// Checks a configuration before the listener starts: addresses parse, the
/// AGI port can be bound, and the log level is understood.
pub async fn validate_start(config: &Config) -> Result<(), PreflightError> {
    let mut issues = Vec::new();

    match value_as_ip_addr("agi.addr", &config.agi.addr) {
        Ok(ip) => {
            let addr = SocketAddr::new(ip, config.agi.port);
            if let Err(err) = TcpListener::bind(addr).await.map(drop) {
                issues.push(PreflightIssue {
                    field: "agi.port".to_string(),
                    message: format!("Address {} is unavailable ({})", addr, err),
                });
            }
        }
        Err(issue) => issues.push(issue),
    }

    if let Some(ref level) = config.log_level {
        if level.parse::<LevelFilter>().is_err() {
            issues.push(PreflightIssue {
                field: "log_level".to_string(),
                message: format!("Unknown log level `{}`", level),
            });
        }
    }

    if config.event_capacity == 0 {
        issues.push(PreflightIssue {
            field: "event_capacity".to_string(),
            message: "Event capacity must be greater than zero".to_string(),
        });
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(PreflightError::new(issues))
    }
}

fn value_as_ip_addr(field: &str, value: &str) -> Result<IpAddr, PreflightIssue> {
    value.parse::<IpAddr>().map_err(|err| PreflightIssue {
        field: field.to_string(),
        message: format!("Invalid {} `{}` ({})", field, value, err),
    })
}
