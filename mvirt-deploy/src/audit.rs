//! Audit trail for provider mutations.
//!
//! Every mutation issued against a provider account is recorded under the
//! `audit` tracing target with the objects it touched, so operators can
//! filter the trail independently of regular logs.

use tracing::Level;

use crate::model::TaskKey;

/// Audit logger for deploy events.
#[derive(Debug, Clone)]
pub struct DeployAuditLogger {
    component: String,
    enabled: bool,
}

impl DeployAuditLogger {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            enabled: true,
        }
    }

    /// Create a noop audit logger (for testing)
    pub fn new_noop() -> Self {
        Self {
            component: String::new(),
            enabled: false,
        }
    }

    pub fn created(&self, key: &TaskKey, id: &str) {
        self.log(
            Level::INFO,
            format!("Created {}", key),
            vec![key.to_string(), id.to_string()],
        );
    }

    pub fn updated(&self, key: &TaskKey, id: &str, fields: &[&str]) {
        self.log(
            Level::INFO,
            format!("Updated {} ({})", key, fields.join(", ")),
            vec![key.to_string(), id.to_string()],
        );
    }

    pub fn tagged(&self, id: &str, added: usize, removed: usize) {
        if added == 0 && removed == 0 {
            return;
        }
        self.log(
            Level::DEBUG,
            format!("Tags on {}: {} set, {} removed", id, added, removed),
            vec![id.to_string()],
        );
    }

    pub fn deleted(&self, description: &str, id: &str) {
        self.log(
            Level::INFO,
            format!("Deleted {}", description),
            vec![id.to_string()],
        );
    }

    pub fn drift(&self, key: &TaskKey, fields: &[&str]) {
        self.log(
            Level::WARN,
            format!(
                "{} differs from the account but is not managed here ({})",
                key,
                fields.join(", ")
            ),
            vec![key.to_string()],
        );
    }

    fn log(&self, level: Level, message: String, object_ids: Vec<String>) {
        if !self.enabled {
            return;
        }
        match level {
            Level::ERROR => {
                tracing::error!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            Level::WARN => {
                tracing::warn!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            Level::INFO => {
                tracing::info!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
            _ => {
                tracing::debug!(target: "audit", component = %self.component, objects = ?object_ids, "{}", message)
            }
        }
    }
}

impl Default for DeployAuditLogger {
    fn default() -> Self {
        Self::new("deploy")
    }
}
