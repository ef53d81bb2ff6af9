//! Artifacts produced by transforms and how they land in the output tree.
//!
//! A transform returns [`Output`] values with paths relative to its task
//! destination. Writing checks that every path stays inside that destination
//! and that no other task wrote the same file during the current run.

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use crate::core::Hash32;
use crate::error::TaskError;

/// The content of an [`Output`] file.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum OutputData {
    /// Text content (UTF-8).
    Utf8(String),
    /// Binary content (raw bytes).
    Binary(Vec<u8>),
    /// Byte-identical copy of a source file, streamed at write time.
    Copy(Utf8PathBuf),
}

/// Represents a single file to be written under a task destination.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Output {
    /// The path of the file, relative to the task destination.
    pub path: Utf8PathBuf,
    /// The content of the file to be written.
    pub data: OutputData,
}

impl Output {
    pub fn text(path: impl Into<Utf8PathBuf>, data: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Utf8(data.into()),
        }
    }

    pub fn binary(path: impl Into<Utf8PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Binary(data.into()),
        }
    }

    pub fn copy(path: impl Into<Utf8PathBuf>, source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: OutputData::Copy(source.into()),
        }
    }
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Files written during one run of the executor, keyed by their path inside
/// the output tree.
#[derive(Debug, Default)]
pub(crate) struct Claims {
    owners: Mutex<HashMap<Utf8PathBuf, String>>,
}

impl Claims {
    fn claim(&self, path: &Utf8Path, task: &str) -> Result<(), TaskError> {
        let mut owners = self.owners.lock().unwrap();

        match owners.get(path) {
            Some(owner) if owner != task => Err(TaskError::Collision {
                path: path.to_path_buf(),
                owner: owner.clone(),
            }),
            Some(_) => Ok(()),
            None => {
                owners.insert(path.to_path_buf(), task.to_string());
                Ok(())
            }
        }
    }
}

/// Resolves the location of an output inside the output tree, rejecting
/// anything that would land outside of `destination`.
pub(crate) fn place(destination: &Utf8Path, output: &Utf8Path) -> Result<Utf8PathBuf, TaskError> {
    let escape = || TaskError::Escape {
        path: output.to_path_buf(),
        destination: destination.to_path_buf(),
    };

    if output.is_absolute() || output.as_str().is_empty() {
        return Err(escape());
    }

    let destination = normalize_path(destination);
    let path = normalize_path(&destination.join(output));

    if !path.starts_with(&destination)
        || path == destination
        || path.components().any(|c| c == Utf8Component::ParentDir)
    {
        return Err(escape());
    }

    Ok(path)
}

/// Writes all outputs of a task. Returns the number of files that actually
/// changed on disk.
pub(crate) fn save(
    dist: &Utf8Path,
    destination: &Utf8Path,
    outputs: &[Output],
    claims: &Claims,
    task: &str,
) -> Result<usize, TaskError> {
    // Check every path before touching the disk, so a bad output leaves the
    // previous artifacts alone.
    let placed = outputs
        .iter()
        .map(|output| place(destination, &output.path))
        .collect::<Result<Vec<_>, _>>()?;

    for path in &placed {
        claims.claim(path, task)?;
    }

    let mut written = 0;
    for (path, output) in placed.iter().zip(outputs) {
        let path = dist.join(path);
        let write = |source| TaskError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write)?;
        }

        if write_if_changed(&path, &output.data).map_err(write)? {
            written += 1;
        }
    }

    Ok(written)
}

fn write_if_changed(path: &Utf8Path, data: &OutputData) -> std::io::Result<bool> {
    let existing = match path.is_file() {
        true => Some(Hash32::hash_file(path)?),
        false => None,
    };

    match data {
        OutputData::Utf8(text) => {
            if existing == Some(Hash32::hash(text)) {
                return Ok(false);
            }
            fs::write(path, text)?;
        }
        OutputData::Binary(bytes) => {
            if existing == Some(Hash32::hash(bytes)) {
                return Ok(false);
            }
            fs::write(path, bytes)?;
        }
        OutputData::Copy(source) => {
            if existing.is_some() && existing == Some(Hash32::hash_file(source)?) {
                return Ok(false);
            }
            fs::copy(source, path)?;
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_inside_destination() {
        assert_eq!(
            place(Utf8Path::new("styles"), Utf8Path::new("styles.css")).unwrap(),
            Utf8Path::new("styles/styles.css")
        );
        assert_eq!(
            place(Utf8Path::new(""), Utf8Path::new("assets/icons/x.svg")).unwrap(),
            Utf8Path::new("assets/icons/x.svg")
        );
        assert_eq!(
            place(Utf8Path::new("scripts"), Utf8Path::new("./lib/../app.js")).unwrap(),
            Utf8Path::new("scripts/app.js")
        );
    }

    #[test]
    fn test_place_rejects_escape() {
        for bad in ["../styles.css", "/etc/passwd", "a/../../b", "", "."] {
            assert!(
                matches!(
                    place(Utf8Path::new("styles"), Utf8Path::new(bad)),
                    Err(TaskError::Escape { .. })
                ),
                "{bad} should be rejected"
            );
        }

        assert!(place(Utf8Path::new(""), Utf8Path::new("../x")).is_err());
    }

    #[test]
    fn test_claims_collision() {
        let claims = Claims::default();
        let path = Utf8Path::new("scripts/main.js");

        claims.claim(path, "scripts").unwrap();
        claims.claim(path, "scripts").unwrap();

        match claims.claim(path, "vendor") {
            Err(TaskError::Collision { owner, .. }) => assert_eq!(owner, "scripts"),
            other => panic!("expected collision, got {other:?}"),
        }
    }

    #[test]
    fn test_save_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8Path::from_path(dir.path()).unwrap();
        let outputs = vec![Output::text("index.html", "<p>hi</p>")];

        let written = save(dist, Utf8Path::new(""), &outputs, &Claims::default(), "html").unwrap();
        assert_eq!(written, 1);

        let written = save(dist, Utf8Path::new(""), &outputs, &Claims::default(), "html").unwrap();
        assert_eq!(written, 0);

        let outputs = vec![Output::text("index.html", "<p>bye</p>")];
        let written = save(dist, Utf8Path::new(""), &outputs, &Claims::default(), "html").unwrap();
        assert_eq!(written, 1);
        assert_eq!(fs::read_to_string(dist.join("index.html")).unwrap(), "<p>bye</p>");
    }

    #[test]
    fn test_save_escape_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dist = Utf8Path::from_path(dir.path()).unwrap();
        let outputs = vec![
            Output::text("ok.css", "a{}"),
            Output::text("../leak.css", "b{}"),
        ];

        let result = save(dist, Utf8Path::new("styles"), &outputs, &Claims::default(), "styles");

        assert!(matches!(result, Err(TaskError::Escape { .. })));
        assert!(!dist.join("styles/ok.css").exists());
        assert!(!dist.join("leak.css").exists());
    }
}
