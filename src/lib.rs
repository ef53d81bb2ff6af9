#![forbid(unsafe_code)]
//! Kamado is a small front-end build pipeline.
//!
//! A project declares *resource categories*, groups of source files matched
//! by glob patterns, and binds each one to a task that transforms the files
//! into a disjoint part of the output tree. The pipeline can clean the output
//! tree, build everything concurrently, run a single task, or watch the
//! sources and rebuild what changed while a development server reloads the
//! browser.
//!
//! ```rust,no_run
//! use kamado::{LiveServer, preset};
//!
//! let pipeline = preset::standard()?.finish()?;
//! pipeline.start(&mut LiveServer::new())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod blueprint;
mod core;
mod error;
mod executor;
#[cfg(feature = "logging")]
mod logging;
mod output;
mod pipeline;
pub mod preset;
mod resource;
mod server;
mod task;
pub mod transform;
mod utils;
mod watch;

pub use crate::blueprint::{Blueprint, CategoryDef, Resource, TaskDef};
pub use crate::core::{Environment, Mode};
pub use crate::error::*;
pub use crate::executor::{Report, TaskExecution};
#[cfg(feature = "logging")]
pub use crate::logging::init_logging;
pub use crate::output::{Output, OutputData};
pub use crate::pipeline::Pipeline;
pub use crate::resource::{Input, ResourceCategory, ResourceMap, Source};
pub use crate::server::DevServer;
#[cfg(all(feature = "live", feature = "server"))]
pub use crate::server::LiveServer;
pub use crate::task::TaskOutcome;
pub use crate::transform::ToolError;
pub use crate::watch::WatchBinding;
