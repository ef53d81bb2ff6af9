use std::fs;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use minijinja::{UndefinedBehavior, context, path_loader};

use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform};

/// Renders HTML pages with minijinja.
///
/// Every entry is a page template. `{% include %}` and `{% extends %}` look
/// up templates in the blocks directory, which defaults to `blocks` next to
/// the pages. Pages see two variables: `mode` (`"build"` or `"watch"`) and
/// `page`, the page path relative to its base.
#[derive(Debug, Default, Clone)]
pub struct Markup {
    blocks: Option<Utf8PathBuf>,
}

impl Markup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory includes are resolved from, relative to the
    /// project root.
    pub fn blocks(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.blocks = Some(dir.into());
        self
    }
}

impl Transform for Markup {
    fn describe(&self) -> &'static str {
        "minijinja"
    }

    fn transform(&self, ctx: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        let mut outputs = Vec::with_capacity(inputs.len());

        for input in inputs {
            let blocks = match &self.blocks {
                Some(dir) => ctx.env.source(dir),
                None => input.base.join("blocks"),
            };

            let mut env = minijinja::Environment::new();
            env.set_undefined_behavior(UndefinedBehavior::Strict);
            env.set_keep_trailing_newline(true);
            env.set_loader(path_loader(blocks));

            let source = fs::read_to_string(&input.path)
                .with_context(|| format!("Couldn't read template '{}'", input.path))?;

            let html = env
                .render_named_str(
                    input.rel.as_str(),
                    &source,
                    context! {
                        mode => ctx.mode.as_str(),
                        page => input.rel.as_str(),
                    },
                )
                .with_context(|| format!("Couldn't render '{}'", input.path))?;

            outputs.push(Output::text(&input.rel, html));
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::transform::testing;

    fn setup(root: &Utf8Path) {
        fs::create_dir_all(root.join("src/html/blocks")).unwrap();
        fs::write(
            root.join("src/html/blocks/header.html"),
            "<header>{{ page }}</header>",
        )
        .unwrap();
        fs::write(
            root.join("src/html/index.html"),
            "<body>{% include \"header.html\" %}<main>{{ mode }}</main></body>\n",
        )
        .unwrap();
    }

    #[test]
    fn test_includes_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        setup(root);

        let env = testing::env(root);
        let category = testing::category("html", "src/html/*.html", "");
        let outputs = testing::run(&Markup::new(), &env, &category).unwrap();

        assert_eq!(
            outputs,
            vec![Output::text(
                "index.html",
                "<body><header>index.html</header><main>build</main></body>\n"
            )]
        );
    }

    #[test]
    fn test_custom_blocks_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("partials")).unwrap();
        fs::create_dir_all(root.join("pages")).unwrap();
        fs::write(root.join("partials/nav.html"), "<nav></nav>").unwrap();
        fs::write(root.join("pages/about.html"), "{% include \"nav.html\" %}").unwrap();

        let env = testing::env(root);
        let category = testing::category("html", "pages/*.html", "");
        let outputs = testing::run(&Markup::new().blocks("partials"), &env, &category).unwrap();

        assert_eq!(outputs, vec![Output::text("about.html", "<nav></nav>")]);
    }

    #[test]
    fn test_missing_include_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        fs::create_dir_all(root.join("src/html")).unwrap();
        fs::write(root.join("src/html/index.html"), "{% include \"missing.html\" %}").unwrap();

        let env = testing::env(root);
        let category = testing::category("html", "src/html/*.html", "");
        let err = testing::run(&Markup::new(), &env, &category).unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("index.html"), "{message}");
        assert!(message.contains("missing.html"), "{message}");
    }
}
