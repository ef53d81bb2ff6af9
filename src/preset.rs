//! Ready-made blueprints.

use std::time::Duration;

use crate::Blueprint;
use crate::error::BlueprintError;
use crate::transform::{Images, Markup, Passthrough, Scripts, Sprite, Styles};

/// Static files change in bulk, so give copies time to settle.
const DELAY_BULK: Duration = Duration::from_millis(500);

/// The standard front-end layout.
///
/// | task      | reads                                 | writes to          |
/// |-----------|---------------------------------------|--------------------|
/// | `html`    | `src/html/*.html`                     | `dist/`            |
/// | `styles`  | `src/styles/styles.less`              | `dist/styles/`     |
/// | `scripts` | `src/scripts/dev/*.js`                | `dist/scripts/`    |
/// | `vendor`  | `src/scripts/vendor/**/*.js`          | `dist/scripts/`    |
/// | `copy`    | fonts, icons, favicons, media, json, php | `dist/`, mirrored from `src/` |
/// | `images`  | `src/assets/images/**/*`              | `dist/assets/images/` |
/// | `sprite`  | `src/assets/svg-sprite/*.svg`         | `dist/assets/icons/symbols.svg` |
///
/// Pages include partials from `src/html/blocks`, which are watched but not
/// emitted. Any `.less` file under `src/styles` rebuilds the stylesheet.
///
/// The returned blueprint can be adjusted further (directories, extra
/// categories) before calling [`Blueprint::finish`].
pub fn standard() -> Result<Blueprint, BlueprintError> {
    let mut config = Blueprint::new();

    let html = config
        .category("html")
        .entry("src/html/*.html")
        .watch("src/html/**/*.html")
        .register()?;

    let styles = config
        .category("styles")
        .entry("src/styles/styles.less")
        .watch("src/styles/**/*.less")
        .destination("styles")
        .register()?;

    let scripts = config
        .category("scripts")
        .entry("src/scripts/dev/*.js")
        .watch("src/scripts/dev/**/*.js")
        .destination("scripts")
        .register()?;

    let vendor = config
        .category("vendor")
        .entry("src/scripts/vendor/**/*.js")
        .destination("scripts")
        .register()?;

    let copy = config
        .category("copy")
        .entry("src/assets/icons/**/*.*")
        .entry("src/assets/favicons/**/*.*")
        .entry("src/assets/fonts/**/*.{woff,woff2}")
        .entry("src/assets/video/**/*.{mp4,webm}")
        .entry("src/assets/audio/**/*.{mp3,ogg,wav,aac}")
        .entry("src/json/**/*.json")
        .entry("src/php/**/*.php")
        .base("src")
        .register()?;

    let images = config
        .category("images")
        .entry("src/assets/images/**/*.{png,jpg,jpeg,webp,gif,svg}")
        .destination("assets/images")
        .register()?;

    let sprite = config
        .category("sprite")
        .entry("src/assets/svg-sprite/*.svg")
        .destination("assets/icons")
        .register()?;

    config
        .task("html", html)
        .run(Markup::new().blocks("src/html/blocks"))?;
    config.task("styles", styles).run(Styles::new())?;
    config.task("scripts", scripts).run(Scripts::new())?;
    config.task("vendor", vendor).run(Passthrough)?;
    config.task("copy", copy).delay(DELAY_BULK).run(Passthrough)?;
    config.task("images", images).delay(DELAY_BULK).run(Images)?;
    config.task("sprite", sprite).run(Sprite::new())?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};

    use super::*;

    fn triggered(pipeline: &crate::Pipeline, path: &str) -> Vec<String> {
        pipeline
            .bindings()
            .iter()
            .filter(|b| b.category().matches(Utf8Path::new(path)))
            .map(|b| b.task().to_string())
            .collect()
    }

    #[test]
    fn test_standard_tasks() {
        let pipeline = standard().unwrap().finish().unwrap();

        assert_eq!(
            pipeline.task_names(),
            ["clean", "html", "styles", "scripts", "vendor", "copy", "images", "sprite"]
        );

        let delays: Vec<_> = pipeline
            .bindings()
            .iter()
            .map(|b| (b.task().to_string(), b.delay().as_millis()))
            .collect();

        assert_eq!(
            delays,
            [
                ("html".to_string(), 0),
                ("styles".to_string(), 0),
                ("scripts".to_string(), 0),
                ("vendor".to_string(), 0),
                ("copy".to_string(), 500),
                ("images".to_string(), 500),
                ("sprite".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_standard_watch_routing() {
        let pipeline = standard().unwrap().finish().unwrap();

        assert_eq!(triggered(&pipeline, "src/styles/_vars.less"), ["styles"]);
        assert_eq!(triggered(&pipeline, "src/styles/blocks/header.less"), ["styles"]);
        assert_eq!(triggered(&pipeline, "src/html/blocks/footer.html"), ["html"]);
        assert_eq!(triggered(&pipeline, "src/scripts/dev/app.js"), ["scripts"]);
        assert_eq!(triggered(&pipeline, "src/scripts/vendor/lib/x.js"), ["vendor"]);
        assert_eq!(triggered(&pipeline, "src/assets/fonts/a.woff2"), ["copy"]);
        assert_eq!(triggered(&pipeline, "src/assets/images/a/b.webp"), ["images"]);
        assert_eq!(triggered(&pipeline, "src/assets/svg-sprite/close.svg"), ["sprite"]);

        assert!(triggered(&pipeline, "src/assets/fonts/a.ttf").is_empty());
        assert!(triggered(&pipeline, "README.md").is_empty());
    }

    #[test]
    fn test_standard_static_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        for file in [
            "src/assets/fonts/inter.woff2",
            "src/assets/favicons/favicon.ico",
            "src/json/data/menu.json",
            "src/php/mail.php",
            "src/assets/fonts/skip.ttf",
        ] {
            let path = root.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, file).unwrap();
        }

        let pipeline = standard().unwrap().finish().unwrap();
        let copy = pipeline.resources().get("copy").unwrap();

        let rel: Vec<Utf8PathBuf> = copy
            .resolve(root)
            .unwrap()
            .into_iter()
            .map(|input| input.rel)
            .collect();

        assert_eq!(
            rel,
            [
                "assets/favicons/favicon.ico",
                "assets/fonts/inter.woff2",
                "json/data/menu.json",
                "php/mail.php",
            ]
        );
    }
}
