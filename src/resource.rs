//! Source file declarations.
//!
//! A [`ResourceCategory`] groups the files of one kind: the *entries* a task
//! reads and the *watch* patterns whose changes should trigger the task
//! again. Categories are collected in a read-only [`ResourceMap`].

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

use crate::error::{BlueprintError, SourceError};

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A single matched source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    /// Path to the file, including the project root.
    pub path: Utf8PathBuf,
    /// Directory `rel` is computed from, including the project root.
    pub base: Utf8PathBuf,
    /// Path relative to `base`. This is where the file lands under the task
    /// destination, unless the transform renames it.
    pub rel: Utf8PathBuf,
}

/// An entry glob together with the directory relative paths start from.
#[derive(Debug, Clone)]
pub struct Source {
    pub pattern: String,
    pub base: Utf8PathBuf,
}

impl Source {
    /// Creates a source whose base is the static part of the pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let base = glob_base(&pattern);
        Self { pattern, base }
    }

    pub fn with_base(pattern: impl Into<String>, base: impl Into<Utf8PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            base: base.into(),
        }
    }
}

#[derive(Debug)]
pub struct ResourceCategory {
    name: String,
    entries: Vec<Source>,
    watch: Vec<String>,
    watch_patterns: Vec<Pattern>,
    destination: Utf8PathBuf,
}

impl ResourceCategory {
    pub(crate) fn new(
        name: String,
        entries: Vec<Source>,
        watch: Vec<String>,
        destination: Utf8PathBuf,
    ) -> Result<Self, BlueprintError> {
        if entries.is_empty() {
            return Err(BlueprintError::NoEntries(name));
        }

        let watch = if watch.is_empty() {
            entries.iter().map(|e| e.pattern.clone()).collect()
        } else {
            watch
        };

        let mut watch_patterns = Vec::new();
        for glob in &watch {
            for expanded in expand_braces(glob) {
                watch_patterns.push(Pattern::new(&expanded)?);
            }
        }

        for entry in &entries {
            for expanded in expand_braces(&entry.pattern) {
                Pattern::new(&expanded)?;
            }
        }

        Ok(Self {
            name,
            entries,
            watch,
            watch_patterns,
            destination,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[Source] {
        &self.entries
    }

    /// Watch globs as declared, before brace expansion.
    pub fn watch(&self) -> &[String] {
        &self.watch
    }

    /// Destination subtree, relative to the output tree.
    pub fn destination(&self) -> &Utf8Path {
        &self.destination
    }

    /// Checks whether a path relative to the project root should trigger this
    /// category. `*` stays within one directory, `**` crosses directories.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        let path = path.as_str().replace('\\', "/");
        self.watch_patterns
            .iter()
            .any(|pattern| pattern.matches_with(&path, MATCH))
    }

    /// Expands the entry patterns into the files currently on disk, sorted by
    /// path and without duplicates.
    pub fn resolve(&self, root: &Utf8Path) -> Result<Vec<Input>, SourceError> {
        let mut found = BTreeMap::new();
        let prefix = Pattern::escape(root.as_str());

        for entry in &self.entries {
            let base = root.join(&entry.base);

            for pattern in expand_braces(&entry.pattern) {
                if !has_wildcard(&pattern) {
                    let path = root.join(&pattern);
                    if !path.is_file() {
                        return Err(SourceError::Missing(pattern.into()));
                    }
                    insert_input(&mut found, path, &base);
                    continue;
                }

                let full = format!("{prefix}/{pattern}");
                for path in glob::glob_with(&full, MATCH)? {
                    let path = Utf8PathBuf::try_from(path?)?;
                    if path.is_file() {
                        insert_input(&mut found, path, &base);
                    }
                }
            }
        }

        Ok(found.into_values().collect())
    }
}

fn insert_input(found: &mut BTreeMap<Utf8PathBuf, Input>, path: Utf8PathBuf, base: &Utf8Path) {
    let rel = match path.strip_prefix(base) {
        Ok(rel) => rel.to_path_buf(),
        // Entries outside of their base keep only the file name.
        Err(_) => Utf8PathBuf::from(path.file_name().unwrap_or_default()),
    };

    found.entry(path.clone()).or_insert(Input {
        path,
        base: base.to_path_buf(),
        rel,
    });
}

/// Read-only table of all categories, in registration order.
#[derive(Debug, Default)]
pub struct ResourceMap {
    categories: Vec<Arc<ResourceCategory>>,
}

impl ResourceMap {
    pub(crate) fn push(&mut self, category: ResourceCategory) -> usize {
        self.categories.push(Arc::new(category));
        self.categories.len() - 1
    }

    pub(crate) fn at(&self, index: usize) -> &Arc<ResourceCategory> {
        &self.categories[index]
    }

    pub fn get(&self, name: &str) -> Option<&ResourceCategory> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceCategory> {
        self.categories.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

pub(crate) fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The directory part of a glob before the first wildcard. For a plain file
/// path this is its parent directory.
pub(crate) fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);

    if !has_wildcard(pattern) {
        return path.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
    }

    path.components()
        .take_while(|c| !has_wildcard(c.as_str()))
        .collect()
}

/// Expands `{a,b}` alternatives, which the glob engine does not support.
/// Groups may nest and repeat, `a/{b,c}/*.{x,y}` yields four patterns.
pub(crate) fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();

    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }

    // unbalanced, leave it to the glob engine to complain
    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let head = &pattern[..open];
    let tail = &pattern[close + 1..];

    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alt = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{head}{alt}{tail}"))
        })
        .collect()
}
