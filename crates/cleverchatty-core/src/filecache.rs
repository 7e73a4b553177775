//! Scoped temp-file store for binary tool payloads.
//!
//! Images and embedded resources returned by tool servers are written to
//! disk and replaced in the conversation by an opaque handle. When the LLM
//! later passes a handle back as a tool argument, the argument is swapped
//! for the file's content before dispatch.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use crate::error::{CoreError, Result};

/// Handles longer than this are never treated as file references; this
/// keeps arbitrary user base64 from being mistaken for one.
pub const MAX_HANDLE_LEN: usize = 150;

const HANDLE_PREFIX: &str = "[FILE OBJECT ";

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Create a cache rooted in a fresh per-instance temp directory.
    pub fn new() -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("cleverchatty-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store `data` and return its opaque handle.
    pub fn save_content(&self, data: &[u8], mimetype: &str) -> Result<String> {
        let name = uuid::Uuid::new_v4().to_string();
        let path = self.dir.join(&name);
        std::fs::write(&path, data)?;

        let descriptor = format!("{HANDLE_PREFIX}{name}, mimetype: {mimetype}]");
        let handle = BASE64.encode(descriptor);
        if handle.len() > MAX_HANDLE_LEN {
            // uuid + short mimetype always fit; a huge mimetype would not.
            std::fs::remove_file(&path).ok();
            return Err(CoreError::FileCache(format!(
                "handle for mimetype '{mimetype}' exceeds {MAX_HANDLE_LEN} chars"
            )));
        }
        Ok(handle)
    }

    /// If `arg` is a handle produced by this cache shape, read the backing
    /// file and return its content. Returns `None` for ordinary strings.
    pub fn resolve(&self, arg: &str) -> Result<Option<Vec<u8>>> {
        let Some(name) = Self::handle_file_name(arg) else {
            return Ok(None);
        };
        let path = self.dir.join(&name);
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(handle = %arg, error = %e, "file handle points at missing cache entry");
                Err(CoreError::FileCache(format!("unresolvable handle: {e}")))
            }
        }
    }

    /// Decode a candidate handle and extract the backing file name.
    /// `None` when the string is not a file handle at all.
    pub fn handle_file_name(arg: &str) -> Option<String> {
        if arg.is_empty() || arg.len() > MAX_HANDLE_LEN {
            return None;
        }
        let decoded = BASE64.decode(arg).ok()?;
        let text = String::from_utf8(decoded).ok()?;
        let rest = text.strip_prefix(HANDLE_PREFIX)?;
        let rest = rest.strip_suffix(']')?;
        let (name, _mimetype) = rest.split_once(", mimetype: ")?;
        // File names are uuids we generated; reject path traversal outright.
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return None;
        }
        Some(name.to_string())
    }

    /// Remove every cached file and the cache directory itself.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "file cache cleanup failed");
            }
        }
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_resolve_round_trip() {
        let cache = FileCache::new().unwrap();
        let data = b"\x89PNG fake image bytes";
        let handle = cache.save_content(data, "image/png").unwrap();

        assert!(handle.len() <= MAX_HANDLE_LEN);
        let decoded = BASE64.decode(&handle).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.starts_with(HANDLE_PREFIX));
        assert!(text.ends_with(", mimetype: image/png]"));

        let back = cache.resolve(&handle).unwrap().unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn ordinary_strings_are_not_handles() {
        let cache = FileCache::new().unwrap();
        assert!(cache.resolve("hello world").unwrap().is_none());
        // valid base64 but not our descriptor shape
        let b64 = BASE64.encode("just some text");
        assert!(cache.resolve(&b64).unwrap().is_none());
    }

    #[test]
    fn cleanup_removes_backing_files() {
        let cache = FileCache::new().unwrap();
        let handle = cache.save_content(b"bytes", "application/octet-stream").unwrap();
        cache.cleanup();
        assert!(cache.resolve(&handle).is_err());
    }

    #[test]
    fn traversal_names_are_rejected() {
        let descriptor = format!("{HANDLE_PREFIX}../etc/passwd, mimetype: text/plain]");
        let handle = BASE64.encode(descriptor);
        assert!(FileCache::handle_file_name(&handle).is_none());
    }
}
