//! Per-run context handed to every task.

use serde_json::Value;
use tokio::sync::watch;

use super::{Task, TaskSet};
use crate::audit::DeployAuditLogger;
use crate::cloud::Filter;
use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::model::{Attr, Link, Meta, TaskKey, Tags, NAME_TAG};
use crate::target::{HclTarget, HclValue, JsonTarget, Target};

/// Everything a task may read while it runs.
///
/// `tasks` holds every task not currently running; all dependencies of a
/// running task are guaranteed to be in it and finished.
pub struct RunContext<'a> {
    pub target: &'a Target,
    pub config: &'a DeployConfig,
    pub audit: &'a DeployAuditLogger,
    tasks: &'a TaskSet,
    cancel: watch::Receiver<bool>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        target: &'a Target,
        config: &'a DeployConfig,
        audit: &'a DeployAuditLogger,
        tasks: &'a TaskSet,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            target,
            config,
            audit,
            tasks,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    fn dependency(&self, owner: &TaskKey, link: &Link) -> Result<&'a dyn Task> {
        self.tasks
            .get(&link.key())
            .ok_or_else(|| Error::UnknownDependency {
                key: owner.clone(),
                dependency: link.key(),
            })
    }

    /// Fill in a link's ID from the finished dependency.
    ///
    /// Against the live API a missing ID is an error, except in dry-run mode
    /// where a dependency that would be created has none yet. Manifest
    /// targets render references instead of IDs, so a missing ID is fine.
    pub fn resolve(&self, owner: &TaskKey, link: &mut Link) -> Result<()> {
        if link.name.is_empty() {
            return Ok(());
        }
        let dependency = self.dependency(owner, link)?;
        match dependency.attribute(Attr::Id) {
            Some(id) => {
                link.id = Some(id);
                Ok(())
            }
            None => match self.target {
                Target::Api(api) if !api.is_dry_run() => Err(Error::MissingAttribute {
                    key: link.key(),
                    attribute: Attr::Id.as_str(),
                }),
                _ => Ok(()),
            },
        }
    }

    /// A published attribute of the linked task.
    pub fn attribute(&self, link: &Link, attr: Attr) -> Result<String> {
        if attr == Attr::Id {
            if let Some(id) = link.id() {
                return Ok(id.to_string());
            }
        }
        let missing = || Error::MissingAttribute {
            key: link.key(),
            attribute: attr.as_str(),
        };
        if link.name.is_empty() {
            return Err(missing());
        }
        self.tasks
            .get(&link.key())
            .and_then(|task| task.attribute(attr))
            .ok_or_else(missing)
    }

    /// Literal value for links that are not rendered by this run.
    fn literal(&self, link: &Link, attr: Attr) -> Option<String> {
        if link.name.is_empty() {
            return self.attribute(link, attr).ok();
        }
        let task = self.tasks.get(&link.key())?;
        if task.lifecycle().is_managed() {
            None
        } else {
            task.attribute(attr)
        }
    }

    /// HCL expression for an attribute of the linked task.
    pub fn hcl_ref(&self, link: &Link, attr: Attr) -> HclValue {
        match self.literal(link, attr) {
            Some(value) => HclValue::String(value),
            None => HclTarget::reference(link.kind, &link.name, attr),
        }
    }

    /// JSON intrinsic for an attribute of the linked task.
    pub fn json_ref(&self, link: &Link, attr: Attr) -> Value {
        match self.literal(link, attr) {
            Some(value) => Value::String(value),
            None => JsonTarget::reference(link.kind, &link.name, attr),
        }
    }

    /// Tags every owned resource carries: its name and the cluster discriminator.
    pub fn owner_tags(&self, name: &str) -> Tags {
        let mut tags = self.config.cluster_tags();
        tags.insert(NAME_TAG.to_string(), name.to_string());
        tags
    }

    /// Well-known tag keys kept by finders regardless of the desired key set.
    pub fn well_known_tags(&self) -> [&str; 2] {
        [NAME_TAG, self.config.cluster_tag_key.as_str()]
    }

    /// Describe filter selecting the object owned by the task `name`.
    pub fn owner_filter(&self, name: &str) -> Filter {
        Filter::by_tags(self.owner_tags(name))
    }

    /// Describe filter for a task: by ID when known, otherwise by tags.
    ///
    /// Unmanaged resources are not required to carry the cluster tag.
    pub fn find_filter(&self, meta: &Meta) -> Filter {
        if let Some(id) = &meta.id {
            return Filter::by_id(id.clone());
        }
        if meta.lifecycle.is_managed() {
            self.owner_filter(&meta.name)
        } else {
            let mut tags = Tags::new();
            tags.insert(NAME_TAG.to_string(), meta.name.clone());
            Filter::by_tags(tags)
        }
    }
}
