use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KamadoError {
    #[error("Invalid pipeline definition:\n{0}")]
    Blueprint(#[from] BlueprintError),

    #[error("Error while building the project.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Dev server error:\n{0}")]
    Server(#[from] ServerError),
}

/// Problems detected while assembling a [`Blueprint`](crate::Blueprint).
#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Category '{0}' is defined more than once")]
    DuplicateCategory(String),

    #[error("Category '{category}' is already bound to task '{task}'")]
    CategoryTaken { category: String, task: String },

    #[error("Category '{0}' is not bound to any task")]
    Unbound(String),

    #[error("Category '{0}' has no entry patterns")]
    NoEntries(String),

    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),
}

/// Errors raised while matching the source files of a category.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("File not found with singular glob: {0}")]
    Missing(Utf8PathBuf),
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't read sources.\n{0}")]
    Source(#[from] SourceError),

    #[error("{0:#}")]
    Transform(anyhow::Error),

    #[error("Couldn't write '{path}'.\n{source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Output '{path}' escapes the destination '{destination}'")]
    Escape {
        path: Utf8PathBuf,
        destination: Utf8PathBuf,
    },

    #[error("Output '{path}' is already written by task '{owner}'")]
    Collision { path: Utf8PathBuf, owner: String },

    #[error("Error while clearing the output directory:\n{0}")]
    Clean(#[from] CleanError),
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("Couldn't remove '{0}'.\n{1}")]
    Remove(Utf8PathBuf, std::io::Error),

    #[error("Couldn't create '{0}'.\n{1}")]
    Create(Utf8PathBuf, std::io::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Task '{name}':\n{source}")]
    Task { name: String, source: TaskError },

    #[error("Unknown task '{name}', available tasks: {available}")]
    UnknownTask { name: String, available: String },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[cfg(feature = "live")]
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch root for '{0}'")]
    Root(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Couldn't bind {what}.\n{source}")]
    Bind {
        what: &'static str,
        source: std::io::Error,
    },

    #[error("Failed to build runtime.\n{0}")]
    Runtime(std::io::Error),
}
