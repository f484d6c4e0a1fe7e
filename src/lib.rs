#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cancel;
mod config;
mod diagnostics;
mod error;
mod group;
mod handle;
#[cfg(feature = "logging")]
pub mod logging;
mod runner;
mod state;

pub use crate::cancel::CancelToken;
pub use crate::config::{DEFAULT_GRACE_PERIOD, GroupConfig, Scheduler, TaskGroupBuilder};
pub use crate::diagnostics::{Diagnostics, TaskExecution, TaskStatus};
pub use crate::error::*;
pub use crate::group::{ShutdownHandle, TaskGroup};
pub use crate::handle::{Handle, TaskId};
pub use crate::runner::TaskContext;
pub use crate::state::Outcome;
