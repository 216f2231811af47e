// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The static-file registry.
//!
//! Schema and stylesheet documents are registered at startup as URI →
//! filesystem path; content is read on demand and small files are cached.
//! Content-Type comes from the file extension.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Files at or under this size stay cached in memory.
const SMALL_FILE: u64 = 10 * 1024;

/// A loaded static file.
#[derive(Debug)]
pub struct CachedFile {
    /// Content-Type derived from the extension.
    pub content_type: &'static str,
    /// File content.
    pub bytes: Vec<u8>,
}

/// Result of a registry lookup.
#[derive(Debug)]
pub enum FileFetch {
    /// The URI was never registered; fall through to path dispatch.
    NotRegistered,
    /// Registered but unreadable; a plain 404.
    NotFound,
    /// The file.
    File(Arc<CachedFile>),
}

/// URI → path map with a small-file cache.
#[derive(Debug, Default)]
pub struct FileRegistry {
    map: HashMap<String, PathBuf>,
    cache: Mutex<HashMap<String, Arc<CachedFile>>>,
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
    {
        "xsl" => "text/xsl",
        "xml" | "xsd" => "text/xml",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

impl FileRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, or every file of a directory, under a URI.
    pub fn register(&mut self, uri: &str, path: &Path) {
        if path.is_dir() {
            let base = if uri.ends_with('/') {
                uri.to_string()
            } else {
                format!("{uri}/")
            };
            match std::fs::read_dir(path) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let entry_path = entry.path();
                        if entry_path.is_file() {
                            if let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) {
                                self.map.insert(format!("{base}{name}"), entry_path.clone());
                            }
                        }
                    }
                }
                Err(e) => log::error!("cannot register directory {}: {e}", path.display()),
            }
        } else if path.is_file() {
            self.map.insert(uri.to_string(), path.to_path_buf());
        } else {
            log::error!("cannot register file {}: not found", path.display());
        }
    }

    /// True when any file is registered under the URI.
    #[must_use]
    pub fn is_registered(&self, uri: &str) -> bool {
        self.map.contains_key(uri)
    }

    /// Fetch a file by URI, consulting and feeding the small-file cache.
    ///
    /// # Panics
    /// Panics if the cache mutex is poisoned.
    #[must_use]
    pub fn fetch(&self, uri: &str) -> FileFetch {
        let Some(path) = self.map.get(uri) else {
            return FileFetch::NotRegistered;
        };
        if let Some(cached) = self.cache.lock().unwrap().get(uri) {
            return FileFetch::File(cached.clone());
        }
        match std::fs::read(path) {
            Ok(bytes) => {
                let file = Arc::new(CachedFile {
                    content_type: content_type_for(path),
                    bytes,
                });
                if file.bytes.len() as u64 <= SMALL_FILE {
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(uri.to_string(), file.clone());
                }
                FileFetch::File(file)
            }
            Err(e) => {
                log::error!("cannot read registered file {}: {e}", path.display());
                FileFetch::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{FileFetch, FileRegistry};

    #[test]
    fn registers_and_serves_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MTConnectDevices_1.3.xsd");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"<schema/>")
            .unwrap();

        let mut registry = FileRegistry::new();
        registry.register("/schemas/MTConnectDevices_1.3.xsd", &path);
        assert!(registry.is_registered("/schemas/MTConnectDevices_1.3.xsd"));

        let FileFetch::File(file) = registry.fetch("/schemas/MTConnectDevices_1.3.xsd") else {
            panic!("expected file");
        };
        assert_eq!(file.content_type, "text/xml");
        assert_eq!(file.bytes, b"<schema/>");
    }

    #[test]
    fn registers_every_file_of_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("icon.ico"), [0u8; 4]).unwrap();

        let mut registry = FileRegistry::new();
        registry.register("/static", dir.path());
        assert!(registry.is_registered("/static/style.css"));
        assert!(registry.is_registered("/static/icon.ico"));
        assert!(matches!(
            registry.fetch("/static/other.css"),
            FileFetch::NotRegistered
        ));
    }

    #[test]
    fn missing_backing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.xml");
        std::fs::write(&path, "x").unwrap();
        let mut registry = FileRegistry::new();
        registry.register("/gone.xml", &path);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(registry.fetch("/gone.xml"), FileFetch::NotFound));
    }
}
