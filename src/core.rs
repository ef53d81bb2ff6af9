use camino::{Utf8Path, Utf8PathBuf};

/// A 32-byte BLAKE3 hash used for change detection.
///
/// Serves two purposes in `kamado`:
/// 1. Skipping writes whose content already sits in the output tree, so that
///    idempotent reruns leave unchanged artifacts alone.
/// 2. Keying the image optimization cache by source content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::Watch => "watch",
        }
    }
}

/// Directories the pipeline reads from and writes to.
///
/// Every glob pattern is resolved relative to `root`. The `dist` and `cache`
/// directories are resolved relative to `root` as well, unless absolute.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Project root.
    pub root: Utf8PathBuf,
    /// Output tree, fully owned by the pipeline.
    pub dist: Utf8PathBuf,
    /// Scratch space for collaborators that cache their work.
    pub cache: Utf8PathBuf,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            dist: Utf8PathBuf::from("dist"),
            cache: Utf8PathBuf::from(".cache/kamado"),
        }
    }
}

impl Environment {
    pub fn dist_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.dist)
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.cache)
    }

    pub fn source(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex() {
        let hex = Hash32::hash(b"kamado").to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hex, Hash32::hash(b"kamado").to_hex());
        assert_ne!(hex, Hash32::hash(b"kamado!").to_hex());
    }

    #[test]
    fn test_environment_paths() {
        let env = Environment {
            root: "/project".into(),
            ..Default::default()
        };

        assert_eq!(env.dist_dir(), Utf8Path::new("/project/dist"));
        assert_eq!(env.cache_dir(), Utf8Path::new("/project/.cache/kamado"));

        let env = Environment {
            root: "/project".into(),
            dist: "/tmp/out".into(),
            ..Default::default()
        };

        // joining an absolute path replaces the root
        assert_eq!(env.dist_dir(), Utf8Path::new("/tmp/out"));
    }
}
