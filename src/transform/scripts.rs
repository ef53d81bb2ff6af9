use camino::{Utf8Path, Utf8PathBuf};

use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform, run_tool};

/// Bundles JavaScript entries with esbuild.
///
/// Each entry produces a readable bundle and a minified one, `main.js` and
/// `main.min.js`.
///
/// **Note:** This transform requires the `esbuild` binary to be available in
/// the system PATH.
#[derive(Debug, Clone)]
pub struct Scripts {
    esbuild: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            esbuild: "esbuild".into(),
        }
    }
}

impl Scripts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the esbuild executable.
    pub fn esbuild(mut self, program: impl Into<String>) -> Self {
        self.esbuild = program.into();
        self
    }
}

fn bundle_names(rel: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    (rel.with_extension("js"), rel.with_extension("min.js"))
}

impl Transform for Scripts {
    fn describe(&self) -> &'static str {
        "esbuild"
    }

    fn transform(&self, _: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        let mut outputs = Vec::with_capacity(inputs.len() * 2);

        for input in inputs {
            let bundle = run_tool(&self.esbuild, &["--bundle"], &input.path)?;
            let minified = run_tool(&self.esbuild, &["--bundle", "--minify"], &input.path)?;

            let (plain, min) = bundle_names(&input.rel);
            outputs.push(Output::text(plain, bundle));
            outputs.push(Output::text(min, minified));
        }

        Ok(outputs)
    }
}
