//! Garbage collection of superseded immutable versions.
//!
//! Launch configurations and launch templates cannot be modified in place;
//! each change creates a new object named `<logical name>-<timestamp>`. The
//! GC keeps the most recent `retain` versions and never touches a version a
//! live dependent still points at.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Source of "now" for version names and creation times.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Timestamp suffix appended to versioned names.
pub const VERSION_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const VERSION_TIMESTAMP_LEN: usize = 14;

/// Name for a new version of `base` created at `now`.
pub fn versioned_name(base: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}", base, now.format(VERSION_TIMESTAMP_FORMAT))
}

/// Whether `candidate` is a version of `base` (`base-YYYYmmddHHMMSS`).
pub fn is_version_of(base: &str, candidate: &str) -> bool {
    version_timestamp(base, candidate).is_some()
}

/// Parse the timestamp suffix of a versioned name.
pub fn version_timestamp(base: &str, candidate: &str) -> Option<DateTime<Utc>> {
    let suffix = candidate.strip_prefix(base)?.strip_prefix('-')?;
    if suffix.len() != VERSION_TIMESTAMP_LEN || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(suffix, VERSION_TIMESTAMP_FORMAT)
        .ok()
        .map(|t| t.and_utc())
}

/// One existing version of an immutable-version resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub name: String,
    pub id: String,
    pub created: DateTime<Utc>,
}

/// Pick the versions to delete: the oldest `total - retain`, minus any in use.
///
/// `in_use` may contain names or IDs.
pub fn select_for_deletion(
    mut versions: Vec<VersionRecord>,
    retain: usize,
    in_use: &HashSet<String>,
) -> Vec<VersionRecord> {
    versions.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    let excess = versions.len().saturating_sub(retain);
    versions
        .into_iter()
        .take(excess)
        .filter(|v| !in_use.contains(&v.name) && !in_use.contains(&v.id))
        .collect()
}

/// The newest version, by creation time then name.
pub fn latest(versions: &[VersionRecord]) -> Option<&VersionRecord> {
    versions
        .iter()
        .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)))
}
