//! Render back-ends.
//!
//! Every task renders through exactly one target per run: the provider API,
//! an HCL manifest, or a JSON stack document.

pub mod api;
pub mod hcl;
pub mod json;

use std::sync::Arc;

use crate::cloud::Cloud;

pub use api::ApiTarget;
pub use hcl::{HclBlock, HclTarget, HclValue};
pub use json::JsonTarget;

/// The active back-end for a run.
pub enum Target {
    Api(ApiTarget),
    Hcl(HclTarget),
    Json(JsonTarget),
}

impl Target {
    pub fn name(&self) -> &'static str {
        match self {
            Target::Api(_) => "api",
            Target::Hcl(_) => "hcl",
            Target::Json(_) => "json",
        }
    }

    /// Provider access, if any. Manifest targets only have one when shared
    /// resources must be looked up.
    pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
        match self {
            Target::Api(t) => Some(t.cloud_arc()),
            Target::Hcl(t) => t.cloud(),
            Target::Json(t) => t.cloud(),
        }
    }

    /// Whether this run may mutate the provider account.
    pub fn mutates(&self) -> bool {
        matches!(self, Target::Api(t) if !t.is_dry_run())
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Target({})", self.name())
    }
}
