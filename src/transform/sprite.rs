use std::fmt::Write as _;
use std::fs;
use std::sync::LazyLock;

use anyhow::{Context as _, bail};
use camino::Utf8PathBuf;
use regex::Regex;

use crate::output::Output;
use crate::resource::Input;
use crate::transform::{Context, Transform};

static RE_NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>\[]*(?:\[.*?\])?\s*>|<!--.*?-->").unwrap()
});

static RE_GAPS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r">\s+<").unwrap());

static RE_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^<svg\b([^>]*?)/?>(.*?)(?:</svg>)?$").unwrap());

static RE_VIEWBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bviewBox\s*=\s*["']([^"']*)["']"#).unwrap());

static RE_WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bwidth\s*=\s*["']([\d.]+)(?:px)?["']"#).unwrap());

static RE_HEIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bheight\s*=\s*["']([\d.]+)(?:px)?["']"#).unwrap());

/// Merges SVG icons into a single sprite of `<symbol>` elements.
///
/// Each icon becomes `<symbol id="<file stem>">`, keeping its `viewBox`, and
/// can be referenced with `<use href="symbols.svg#<file stem>">`.
#[derive(Debug, Clone)]
pub struct Sprite {
    file: Utf8PathBuf,
}

impl Default for Sprite {
    fn default() -> Self {
        Self {
            file: "symbols.svg".into(),
        }
    }
}

impl Sprite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sprite file name, relative to the task destination.
    pub fn file(mut self, file: impl Into<Utf8PathBuf>) -> Self {
        self.file = file.into();
        self
    }
}

impl Transform for Sprite {
    fn describe(&self) -> &'static str {
        "svg sprite"
    }

    fn transform(&self, _: &Context<'_>, inputs: &[Input]) -> anyhow::Result<Vec<Output>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let mut symbols = String::new();
        let mut xlink = false;

        for input in inputs {
            let source = fs::read_to_string(&input.path)
                .with_context(|| format!("Couldn't read '{}'", input.path))?;
            let id = input.path.file_stem().unwrap_or_default();
            let symbol = to_symbol(id, &source)
                .with_context(|| format!("Couldn't add '{}' to the sprite", input.path))?;

            xlink |= symbol.contains("xlink:");
            symbols.push_str(&symbol);
        }

        let mut svg = String::from(r#"<svg xmlns="http://www.w3.org/2000/svg""#);
        if xlink {
            svg.push_str(r#" xmlns:xlink="http://www.w3.org/1999/xlink""#);
        }
        write!(svg, ">{symbols}</svg>")?;

        Ok(vec![Output::text(&self.file, svg)])
    }
}

/// Strips byte order mark, prolog, doctype (internal subset included),
/// comments and whitespace between tags.
fn minify(source: &str) -> String {
    let source = source.trim_start_matches('\u{feff}');
    let source = RE_NOISE.replace_all(source, "");
    RE_GAPS.replace_all(source.trim(), "><").into_owned()
}

fn to_symbol(id: &str, source: &str) -> anyhow::Result<String> {
    let svg = minify(source);

    let Some(root) = RE_ROOT.captures(&svg) else {
        bail!("not an SVG document");
    };

    let attrs = &root[1];
    let inner = &root[2];

    let view_box = match RE_VIEWBOX.captures(attrs) {
        Some(cap) => Some(cap[1].to_string()),
        None => match (RE_WIDTH.captures(attrs), RE_HEIGHT.captures(attrs)) {
            (Some(w), Some(h)) => Some(format!("0 0 {} {}", &w[1], &h[1])),
            _ => None,
        },
    };

    let mut symbol = format!(r#"<symbol id="{id}""#);
    if let Some(view_box) = view_box {
        write!(symbol, r#" viewBox="{view_box}""#)?;
    }
    write!(symbol, ">{inner}</symbol>")?;

    Ok(symbol)
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::transform::testing;

    #[test]
    fn test_to_symbol() {
        let source = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- Generator: Sketch -->
<svg xmlns="http://www.w3.org/2000/svg" width="24" height="24" viewBox="0 0 24 24">
    <path d="M0 0h24v24H0z"/>
    <circle cx="12" cy="12" r="4"/>
</svg>
"#;

        assert_eq!(
            to_symbol("arrow", source).unwrap(),
            r#"<symbol id="arrow" viewBox="0 0 24 24"><path d="M0 0h24v24H0z"/><circle cx="12" cy="12" r="4"/></symbol>"#
        );
    }

    #[test]
    fn test_to_symbol_view_box_from_size() {
        let source = r#"<svg width="16px" height="8"><rect/></svg>"#;

        assert_eq!(
            to_symbol("bar", source).unwrap(),
            r#"<symbol id="bar" viewBox="0 0 16 8"><rect/></symbol>"#
        );
    }

    #[test]
    fn test_to_symbol_byte_order_mark() {
        let source = "\u{feff}<?xml version=\"1.0\"?>\n<svg viewBox=\"0 0 2 2\"><rect/></svg>";

        assert_eq!(
            to_symbol("dot", source).unwrap(),
            r#"<symbol id="dot" viewBox="0 0 2 2"><rect/></symbol>"#
        );
    }

    #[test]
    fn test_to_symbol_doctype_subset() {
        let source = r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd" [
	<!ENTITY ns_svg "http://www.w3.org/2000/svg">
	<!ENTITY ns_xlink "http://www.w3.org/1999/xlink">
]>
<svg version="1.1" xmlns="&ns_svg;" viewBox="0 0 10 10">
<path d="M0 0"/>
</svg>"#;

        assert_eq!(
            to_symbol("logo", source).unwrap(),
            r#"<symbol id="logo" viewBox="0 0 10 10"><path d="M0 0"/></symbol>"#
        );
    }

    #[test]
    fn test_to_symbol_rejects_non_svg() {
        assert!(to_symbol("x", "<html></html>").is_err());
    }

    #[test]
    fn test_sprite_merges_sorted_icons() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let sprites = root.join("src/assets/svg-sprite");
        fs::create_dir_all(&sprites).unwrap();
        fs::write(sprites.join("close.svg"), r#"<svg viewBox="0 0 8 8"><path d="M1 1"/></svg>"#)
            .unwrap();
        fs::write(
            sprites.join("arrow.svg"),
            r##"<svg viewBox="0 0 4 4"><use xlink:href="#a"/></svg>"##,
        )
        .unwrap();

        let env = testing::env(root);
        let category = testing::category("sprite", "src/assets/svg-sprite/*.svg", "assets/icons");
        let outputs = testing::run(&Sprite::new(), &env, &category).unwrap();

        assert_eq!(
            outputs,
            vec![Output::text(
                "symbols.svg",
                concat!(
                    r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink">"#,
                    r##"<symbol id="arrow" viewBox="0 0 4 4"><use xlink:href="#a"/></symbol>"##,
                    r#"<symbol id="close" viewBox="0 0 8 8"><path d="M1 1"/></symbol>"#,
                    "</svg>"
                )
            )]
        );
    }

    #[test]
    fn test_empty_sprite_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let env = testing::env(root);
        let category = testing::category("sprite", "src/assets/svg-sprite/*.svg", "assets/icons");

        assert!(testing::run(&Sprite::new(), &env, &category).unwrap().is_empty());
    }
}
