//! Direct provider API target.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::audit::DeployAuditLogger;
use crate::cloud::{Cloud, TagScope};
use crate::config::DeployConfig;
use crate::error::Result;
use crate::gc::{system_clock, Clock};
use crate::model::Tags;
use crate::tags::{tags_to_add, tags_to_delete};
use crate::waiter::Waiter;

/// Applies changes through the provider's API.
pub struct ApiTarget {
    cloud: Arc<dyn Cloud>,
    dry_run: bool,
    clock: Clock,
}

impl ApiTarget {
    pub fn new(cloud: Arc<dyn Cloud>) -> Self {
        Self {
            cloud,
            dry_run: false,
            clock: system_clock(),
        }
    }

    /// Run finders and the differ only; never mutate.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn cloud(&self) -> &dyn Cloud {
        self.cloud.as_ref()
    }

    pub(crate) fn cloud_arc(&self) -> &Arc<dyn Cloud> {
        &self.cloud
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn waiter(&self, config: &DeployConfig) -> Waiter {
        Waiter::new(config.waiter_timeout, config.waiter_interval)
    }

    /// Bring the tags on `id` from `actual` to `desired`.
    ///
    /// Additions and changed values go through one call, removals through
    /// another; provider-reserved keys are never removed.
    pub async fn reconcile_tags(
        &self,
        audit: &DeployAuditLogger,
        scope: TagScope,
        id: &str,
        actual: Option<&Tags>,
        desired: &Tags,
    ) -> Result<()> {
        let empty = Tags::new();
        let actual = actual.unwrap_or(&empty);
        let add = tags_to_add(actual, desired);
        let delete = tags_to_delete(actual, desired);
        debug!(
            "Tags on {}: adding {:?}, removing {:?}",
            id,
            add.keys().collect::<Vec<_>>(),
            delete.keys().collect::<Vec<_>>()
        );

        let tagging = self.cloud.tagging();
        if !add.is_empty() {
            tagging.create_tags(scope, id, &add).await?;
        }
        if !delete.is_empty() {
            let keys: Vec<String> = delete.into_keys().collect();
            tagging.delete_tags(scope, id, &keys).await?;
            audit.tagged(id, add.len(), keys.len());
        } else {
            audit.tagged(id, add.len(), 0);
        }
        Ok(())
    }
}
