use std::fs;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;

use crate::core::{Environment, Mode};
use crate::error::{CleanError, TaskError};
use crate::output::{Claims, save};
use crate::resource::ResourceCategory;
use crate::transform::{Context, Transform};

pub(crate) enum TaskKind {
    /// Erases the output tree.
    Clean,
    /// Reads a category, applies a transform, writes under a destination.
    Transform {
        category: Arc<ResourceCategory>,
        transform: Arc<dyn Transform>,
        delay: Duration,
    },
}

/// A named unit of work in the build graph.
pub(crate) struct Task {
    pub name: String,
    pub kind: TaskKind,
}

/// What a single task run did.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskOutcome {
    /// Number of matched source files.
    pub inputs: usize,
    /// Number of artifacts produced by the transform.
    pub outputs: usize,
    /// Number of files that actually changed on disk.
    pub written: usize,
}

impl Task {
    pub(crate) fn clean() -> Self {
        Self {
            name: "clean".into(),
            kind: TaskKind::Clean,
        }
    }

    /// Whether the task writes into the output tree and must wait for clean.
    pub(crate) fn writes(&self) -> bool {
        matches!(self.kind, TaskKind::Transform { .. })
    }

    pub(crate) fn category(&self) -> Option<&ResourceCategory> {
        match &self.kind {
            TaskKind::Clean => None,
            TaskKind::Transform { category, .. } => Some(category),
        }
    }

    pub(crate) fn delay(&self) -> Duration {
        match &self.kind {
            TaskKind::Clean => Duration::ZERO,
            TaskKind::Transform { delay, .. } => *delay,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match &self.kind {
            TaskKind::Clean => "clean",
            TaskKind::Transform { transform, .. } => transform.describe(),
        }
    }

    pub(crate) fn run(
        &self,
        env: &Environment,
        mode: Mode,
        claims: &Claims,
    ) -> Result<TaskOutcome, TaskError> {
        match &self.kind {
            TaskKind::Clean => {
                clean(&env.dist_dir())?;
                Ok(TaskOutcome::default())
            }
            TaskKind::Transform {
                category,
                transform,
                ..
            } => {
                let inputs = category.resolve(&env.root)?;

                let ctx = Context {
                    env,
                    mode,
                    task: &self.name,
                    category,
                };

                // Nothing is written unless the whole transform succeeds.
                let outputs = transform
                    .transform(&ctx, &inputs)
                    .map_err(TaskError::Transform)?;

                let written = save(
                    &env.dist_dir(),
                    category.destination(),
                    &outputs,
                    claims,
                    &self.name,
                )?;

                Ok(TaskOutcome {
                    inputs: inputs.len(),
                    outputs: outputs.len(),
                    written,
                })
            }
        }
    }
}

/// Deletes the entire output directory and recreates it empty.
pub(crate) fn clean(dist: &Utf8Path) -> Result<(), CleanError> {
    if fs::symlink_metadata(dist).is_ok() {
        fs::remove_dir_all(dist).map_err(|e| CleanError::Remove(dist.to_path_buf(), e))?;
    }

    fs::create_dir_all(dist).map_err(|e| CleanError::Create(dist.to_path_buf(), e))?;

    Ok(())
}
