//! mvirt-deploy: declarative cloud resource reconciler
//!
//! An inventory of typed resource records is reconciled against a provider
//! account, or rendered as an HCL manifest or a JSON stack document.

pub mod audit;
pub mod cloud;
pub mod config;
pub mod error;
pub mod gc;
pub mod model;
pub mod reconciler;
pub mod tags;
pub mod target;
pub mod tasks;
pub mod waiter;

pub use config::DeployConfig;
pub use error::{Error, Result};
pub use model::inventory::Inventory;
pub use reconciler::{Executor, RunReport, TaskOutcome, TaskSet};
