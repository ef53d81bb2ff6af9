use std::fs;

use anyhow::{Context as _, anyhow, bail};
use camino::Utf8Path;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform, run_tool};

const fn version(major: u32) -> Option<u32> {
    Some(major << 16)
}

/// Compiles stylesheets and writes a prefixed and a minified artifact.
///
/// - `.less` entries go through the `lessc` executable,
/// - `.scss` and `.sass` entries through `grass`,
/// - `.css` entries are taken as they are.
///
/// The result is then run through lightningcss, which adds vendor prefixes
/// for the configured browsers. For `styles.less` the task writes
/// `styles.css` and `styles.min.css`.
#[derive(Debug, Clone)]
pub struct Styles {
    lessc: String,
    browsers: Browsers,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            lessc: "lessc".into(),
            browsers: Browsers {
                chrome: version(109),
                edge: version(109),
                firefox: version(102),
                opera: version(95),
                safari: version(15),
                ios_saf: version(15),
                samsung: version(20),
                ..Browsers::default()
            },
        }
    }
}

impl Styles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the LESS compiler executable.
    pub fn lessc(mut self, program: impl Into<String>) -> Self {
        self.lessc = program.into();
        self
    }

    /// Overrides the browsers vendor prefixes are generated for.
    pub fn browsers(mut self, browsers: Browsers) -> Self {
        self.browsers = browsers;
        self
    }

    fn compile(&self, path: &Utf8Path) -> anyhow::Result<String> {
        match path.extension() {
            Some("less") => Ok(run_tool(&self.lessc, &[], path)?),
            #[cfg(feature = "grass")]
            Some("scss" | "sass") => Ok(grass::from_path(path, &grass::Options::default())?),
            #[cfg(not(feature = "grass"))]
            Some("scss" | "sass") => bail!("'{path}' needs the `grass` feature"),
            Some("css") => {
                fs::read_to_string(path).with_context(|| format!("Couldn't read '{path}'"))
            }
            _ => bail!("Unsupported stylesheet '{path}'"),
        }
    }

    /// Returns the prefixed stylesheet and its minified version.
    fn finish(&self, css: &str, path: &Utf8Path) -> anyhow::Result<(String, String)> {
        let targets = Targets::from(self.browsers);

        let options = ParserOptions {
            filename: path.to_string(),
            ..ParserOptions::default()
        };

        let mut sheet = StyleSheet::parse(css, options).map_err(|e| anyhow!("{e}"))?;

        sheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| anyhow!("{e}"))?;

        let pretty = sheet
            .to_css(PrinterOptions {
                minify: false,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow!("{e}"))?;

        let minified = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow!("{e}"))?;

        Ok((pretty.code, minified.code))
    }
}

impl Transform for Styles {
    fn describe(&self) -> &'static str {
        "lightningcss"
    }

    fn transform(&self, _: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        let mut outputs = Vec::with_capacity(inputs.len() * 2);

        for input in inputs {
            let css = self.compile(&input.path)?;
            let (pretty, minified) = self.finish(&css, &input.path)?;

            outputs.push(Output::text(input.rel.with_extension("css"), pretty));
            outputs.push(Output::text(input.rel.with_extension("min.css"), minified));
        }

        Ok(outputs)
    }
}
