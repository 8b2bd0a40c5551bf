//! Task contract and the per-task reconcile pipeline.
//!
//! Every resource kind implements [`Resource`]: a finder, an immutability
//! check and one renderer per target. The blanket [`Task`] implementation
//! turns that into the uniform find / diff / dispatch pipeline the
//! [`executor::Executor`] schedules.

pub mod context;
pub mod executor;
pub mod graph;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::model::diff::Diff;
use crate::model::{Attr, Kind, Lifecycle, Link, Meta, TaskKey, Tags};
use crate::target::{ApiTarget, HclTarget, JsonTarget, Target};

pub use context::RunContext;
pub use executor::Executor;

/// What a task did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The resource did not exist and was created.
    Created,
    /// The listed fields were changed on an existing resource.
    Updated(Vec<&'static str>),
    /// The resource exists and matches the desired record.
    Unchanged,
    /// An unmanaged resource was found; nothing was changed.
    Verified,
    /// lifecycle=ignore.
    Skipped,
    /// Emitted into a manifest.
    Rendered,
    /// Dry run: the resource would be created.
    WouldCreate,
    /// Dry run: the listed fields would be changed.
    WouldUpdate(Vec<&'static str>),
}

impl TaskOutcome {
    /// Whether the outcome is (or would be) a provider mutation.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Created
                | TaskOutcome::Updated(_)
                | TaskOutcome::WouldCreate
                | TaskOutcome::WouldUpdate(_)
        )
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Created => f.write_str("created"),
            TaskOutcome::Updated(fields) => write!(f, "updated ({})", fields.join(", ")),
            TaskOutcome::Unchanged => f.write_str("unchanged"),
            TaskOutcome::Verified => f.write_str("verified"),
            TaskOutcome::Skipped => f.write_str("skipped"),
            TaskOutcome::Rendered => f.write_str("rendered"),
            TaskOutcome::WouldCreate => f.write_str("would create"),
            TaskOutcome::WouldUpdate(fields) => write!(f, "would update ({})", fields.join(", ")),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<TaskKey, TaskOutcome>,
    /// Descriptions of deleted (or, in dry-run, deletable) resources.
    pub deletions: Vec<String>,
    /// Number of scheduling waves.
    pub waves: usize,
}

impl RunReport {
    /// Tasks whose outcome is a change, in key order.
    pub fn changes(&self) -> Vec<(&TaskKey, &TaskOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_change())
            .collect()
    }

    /// True when the run changed (or would change) nothing.
    pub fn is_unchanged(&self) -> bool {
        self.changes().is_empty() && self.deletions.is_empty()
    }

    pub fn outcome(&self, key: &TaskKey) -> Option<&TaskOutcome> {
        self.outcomes.get(key)
    }
}

/// A resource that exists in the account but is no longer wanted.
#[async_trait]
pub trait Deletion: Send + Sync + fmt::Debug {
    fn description(&self) -> String;
    fn id(&self) -> String;
    async fn delete(&self, cloud: &dyn Cloud) -> Result<()>;
}

/// A schedulable unit of work, as seen by the executor.
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug {
    fn key(&self) -> TaskKey;
    fn lifecycle(&self) -> Lifecycle;
    /// Keys of the tasks this one references, sorted and deduplicated.
    fn dependencies(&self) -> Vec<TaskKey>;
    /// An output published to dependents, once the task has run.
    fn attribute(&self, attr: Attr) -> Option<String>;
    async fn run(&mut self, ctx: &RunContext<'_>) -> Result<TaskOutcome>;
    async fn find_deletions(&self, ctx: &RunContext<'_>) -> Result<Vec<Box<dyn Deletion>>>;
}

/// Per-kind reconcile contract.
///
/// A record doubles as its own changes record: the differ produces a
/// sparse copy in which only the fields that need to change are set.
#[async_trait]
pub trait Resource: Diff + Clone + Default + fmt::Debug + Send + Sync + 'static {
    const KIND: Kind;

    fn meta(&self) -> &Meta;
    fn meta_mut(&mut self) -> &mut Meta;

    fn task_key(&self) -> TaskKey {
        TaskKey::new(Self::KIND, self.meta().name.clone())
    }

    /// References to other tasks.
    fn links(&self) -> Vec<&Link> {
        Vec::new()
    }

    fn links_mut(&mut self) -> Vec<&mut Link> {
        Vec::new()
    }

    /// The desired tag map, for kinds that carry tags.
    fn tags_mut(&mut self) -> Option<&mut Tags> {
        None
    }

    /// Attributes published to dependents. The ID is always available.
    fn output(&self, attr: Attr) -> Option<String> {
        match attr {
            Attr::Id => self.meta().id.clone(),
            _ => None,
        }
    }

    /// Copy provider-assigned outputs (ARN, DNS name, ...) from the found record.
    fn adopt(&mut self, _actual: &Self) {}

    /// Look the resource up in the account.
    ///
    /// Returns `Ok(None)` when nothing matches and [`Error::AmbiguousFind`]
    /// when more than one object does.
    async fn find(&self, ctx: &RunContext<'_>, cloud: &dyn Cloud) -> Result<Option<Self>>;

    /// Reject changes that are not allowed or records that are incomplete.
    fn check_changes(_actual: Option<&Self>, _desired: &Self, _changes: &Self) -> Result<()> {
        Ok(())
    }

    /// Create the resource when `actual` is `None`, otherwise apply `changes`.
    /// Must set the desired record's ID.
    async fn render_api(
        target: &ApiTarget,
        ctx: &RunContext<'_>,
        actual: Option<&Self>,
        desired: &mut Self,
        changes: &Self,
    ) -> Result<()>;

    async fn render_hcl(target: &HclTarget, ctx: &RunContext<'_>, desired: &Self) -> Result<()>;

    async fn render_json(target: &JsonTarget, ctx: &RunContext<'_>, desired: &Self)
        -> Result<()>;

    /// Resources owned by this task that should be removed.
    async fn deletions(&self, _ctx: &RunContext<'_>) -> Result<Vec<Box<dyn Deletion>>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<R: Resource> Task for R {
    fn key(&self) -> TaskKey {
        self.task_key()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.meta().lifecycle
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = self
            .links()
            .into_iter()
            .filter(|link| !link.name.is_empty())
            .map(Link::key)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn attribute(&self, attr: Attr) -> Option<String> {
        self.output(attr)
    }

    async fn run(&mut self, ctx: &RunContext<'_>) -> Result<TaskOutcome> {
        ctx.check_cancelled()?;
        let key = self.task_key();
        let lifecycle = self.meta().lifecycle;
        if lifecycle == Lifecycle::Ignore {
            debug!("Skipping {} (lifecycle=ignore)", key);
            return Ok(TaskOutcome::Skipped);
        }

        for link in self.links_mut() {
            ctx.resolve(&key, link)?;
        }
        if lifecycle.is_managed() {
            let owner = ctx.owner_tags(&self.meta().name);
            if let Some(tags) = self.tags_mut() {
                tags.extend(owner);
            }
        }

        match ctx.target {
            Target::Api(api) => run_api(self, api, ctx, &key).await,
            Target::Hcl(hcl) => {
                if !lifecycle.is_managed() {
                    return verify_unmanaged(self, ctx, &key).await;
                }
                let desired: &R = self;
                R::check_changes(None, desired, desired)?;
                R::render_hcl(hcl, ctx, desired).await?;
                Ok(TaskOutcome::Rendered)
            }
            Target::Json(json) => {
                if !lifecycle.is_managed() {
                    return verify_unmanaged(self, ctx, &key).await;
                }
                let desired: &R = self;
                R::check_changes(None, desired, desired)?;
                R::render_json(json, ctx, desired).await?;
                Ok(TaskOutcome::Rendered)
            }
        }
    }

    async fn find_deletions(&self, ctx: &RunContext<'_>) -> Result<Vec<Box<dyn Deletion>>> {
        if !self.meta().lifecycle.is_managed() {
            return Ok(Vec::new());
        }
        self.deletions(ctx).await
    }
}

fn missing_error(lifecycle: Lifecycle, key: &TaskKey) -> Error {
    match lifecycle {
        Lifecycle::Shared => Error::SharedNotFound { key: key.clone() },
        _ => Error::RequiredResourceMissing { key: key.clone() },
    }
}

async fn run_api<R: Resource>(
    desired: &mut R,
    api: &ApiTarget,
    ctx: &RunContext<'_>,
    key: &TaskKey,
) -> Result<TaskOutcome> {
    let lifecycle = desired.meta().lifecycle;
    let actual = desired.find(ctx, api.cloud()).await?;
    debug!("Found {}: {}", key, actual.is_some());
    if let Some(actual) = &actual {
        if desired.meta().id.is_none() {
            desired.meta_mut().id = actual.meta().id.clone();
        }
        desired.adopt(actual);
    }

    if !lifecycle.is_managed() {
        let actual = actual.ok_or_else(|| missing_error(lifecycle, key))?;
        if lifecycle == Lifecycle::ExistsOnly {
            let drift = R::diff(&actual, desired).changed_fields();
            if !drift.is_empty() {
                warn!("{} has drifted from its desired state: {}", key, drift.join(", "));
                ctx.audit.drift(key, &drift);
            }
        }
        return Ok(TaskOutcome::Verified);
    }

    let changes = match &actual {
        Some(actual) => R::diff(actual, desired),
        None => desired.clone(),
    };
    R::check_changes(actual.as_ref(), desired, &changes)?;

    let fields = changes.changed_fields();
    if actual.is_some() && fields.is_empty() {
        return Ok(TaskOutcome::Unchanged);
    }
    if api.is_dry_run() {
        return Ok(match actual {
            None => TaskOutcome::WouldCreate,
            Some(_) => TaskOutcome::WouldUpdate(fields),
        });
    }

    debug!("Changes for {}: {:?}", key, changes);
    R::render_api(api, ctx, actual.as_ref(), desired, &changes).await?;
    let id = desired.meta().id.clone().unwrap_or_default();
    match actual {
        None => {
            info!("Created {} ({})", key, id);
            ctx.audit.created(key, &id);
            Ok(TaskOutcome::Created)
        }
        Some(_) => {
            info!("Updated {} ({}): {}", key, id, fields.join(", "));
            ctx.audit.updated(key, &id, &fields);
            Ok(TaskOutcome::Updated(fields))
        }
    }
}

/// Manifest targets never create shared or exists-only resources; they
/// need the ID up front or provider access to look it up.
async fn verify_unmanaged<R: Resource>(
    desired: &mut R,
    ctx: &RunContext<'_>,
    key: &TaskKey,
) -> Result<TaskOutcome> {
    let lifecycle = desired.meta().lifecycle;
    if desired.meta().id.is_some() {
        return Ok(TaskOutcome::Verified);
    }
    let cloud = ctx
        .target
        .cloud()
        .ok_or_else(|| missing_error(lifecycle, key))?;
    let actual = desired
        .find(ctx, cloud.as_ref())
        .await?
        .ok_or_else(|| missing_error(lifecycle, key))?;
    desired.meta_mut().id = actual.meta().id.clone();
    desired.adopt(&actual);
    Ok(TaskOutcome::Verified)
}

/// The arena of tasks for one run, keyed by kind and logical name.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: BTreeMap<TaskKey, Box<dyn Task>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Task + 'static>(&mut self, task: T) -> Result<()> {
        self.insert(Box::new(task))
    }

    pub fn insert(&mut self, task: Box<dyn Task>) -> Result<()> {
        let key = task.key();
        if self.tasks.contains_key(&key) {
            return Err(Error::DuplicateTask(key));
        }
        self.tasks.insert(key, task);
        Ok(())
    }

    pub fn get(&self, key: &TaskKey) -> Option<&dyn Task> {
        self.tasks.get(key).map(|task| task.as_ref())
    }

    /// Provider ID of a task, once it has run.
    pub fn id_of(&self, key: &TaskKey) -> Option<String> {
        self.get(key).and_then(|task| task.attribute(Attr::Id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &TaskKey> {
        self.tasks.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskKey, &dyn Task)> {
        self.tasks.iter().map(|(key, task)| (key, task.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn take(&mut self, key: &TaskKey) -> Option<Box<dyn Task>> {
        self.tasks.remove(key)
    }

    pub(crate) fn put_back(&mut self, task: Box<dyn Task>) {
        self.tasks.insert(task.key(), task);
    }
}
