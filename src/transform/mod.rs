//! Collaborators converting source files into build artifacts.
//!
//! Every collaborator implements [`Transform`]: it receives the files matched
//! by its task's category and returns the artifacts to write, relative to the
//! task destination. Transforms never touch the output tree themselves.

mod images;
mod markup;
mod passthrough;
mod scripts;
mod sprite;
mod styles;

use std::process::{Command, Stdio};

use camino::Utf8Path;
use thiserror::Error;

use crate::core::{Environment, Mode};
use crate::output::Output;
use crate::resource::{Input, ResourceCategory};

pub use images::Images;
pub use markup::Markup;
pub use passthrough::Passthrough;
pub use scripts::Scripts;
pub use sprite::Sprite;
pub use styles::Styles;

/// Everything a transform may look at besides its inputs.
pub struct Context<'a> {
    pub env: &'a Environment,
    pub mode: Mode,
    /// Name of the task running the transform.
    pub task: &'a str,
    pub category: &'a ResourceCategory,
}

pub trait Transform: Send + Sync {
    /// Short, human readable description used in logs.
    fn describe(&self) -> &'static str;

    fn transform(&self, ctx: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>>;
}

/// Errors that can occur when running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Couldn't run `{program}`, is it installed and on PATH?\n{source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` failed on '{file}':\n{stderr}")]
    Failed {
        program: String,
        file: String,
        stderr: String,
    },

    #[error("`{program}` produced invalid UTF-8: {source}")]
    Utf8 {
        program: String,
        source: std::string::FromUtf8Error,
    },
}

/// Runs `program` with `args` followed by `file`, returning its stdout.
pub(crate) fn run_tool(program: &str, args: &[&str], file: &Utf8Path) -> Result<String, ToolError> {
    let output = Command::new(program)
        .args(args)
        .arg(file.as_str())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            file: file.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|source| ToolError::Utf8 {
        program: program.to_string(),
        source,
    })
}
