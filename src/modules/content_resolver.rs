//! Content Resolution
//!
//! Picks the document root for a hostname and resolves a request path to a
//! file inside it:
//! - Per-host roots: `<sites>/<hostname>` when that directory exists, the
//!   default root otherwise
//! - Path Sanitization: URL-decoded, no `..`, no hidden components
//! - Containment: the resolved file must canonicalize to a path under the root
//! - Fallback order: the file itself, `<path>/index.html`, the root's `index.html`

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::debug;

/// MIME type mappings for common file extensions
#[derive(Debug, Clone)]
pub struct MimeTypes {
    types: HashMap<&'static str, &'static str>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        let types = HashMap::from([
            ("html", "text/html; charset=utf-8"),
            ("htm", "text/html; charset=utf-8"),
            ("txt", "text/plain; charset=utf-8"),
            ("css", "text/css; charset=utf-8"),
            ("csv", "text/csv; charset=utf-8"),
            ("md", "text/markdown; charset=utf-8"),

            ("js", "application/javascript; charset=utf-8"),
            ("mjs", "application/javascript; charset=utf-8"),
            ("map", "application/json; charset=utf-8"),
            ("wasm", "application/wasm"),

            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("png", "image/png"),
            ("gif", "image/gif"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("avif", "image/avif"),
            ("ico", "image/x-icon"),

            ("woff", "font/woff"),
            ("woff2", "font/woff2"),
            ("ttf", "font/ttf"),
            ("otf", "font/otf"),

            ("pdf", "application/pdf"),
            ("json", "application/json; charset=utf-8"),
            ("xml", "application/xml; charset=utf-8"),
            ("webmanifest", "application/manifest+json"),

            ("mp4", "video/mp4"),
            ("webm", "video/webm"),
            ("mp3", "audio/mpeg"),

            ("zip", "application/zip"),
            ("gz", "application/gzip"),
            ("tgz", "application/gzip"),
            ("tar", "application/x-tar"),
        ]);

        Self { types }
    }
}

impl MimeTypes {
    /// Get MIME type for a file extension
    pub fn get_mime_type(&self, path: &Path) -> &'static str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.types.get(ext.to_ascii_lowercase().as_str()).copied())
            .unwrap_or("application/octet-stream")
    }
}

/// Where content trees live
#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Directory holding one subdirectory per hostname
    pub sites_dir: PathBuf,
    /// Tree served to hosts without their own directory
    pub default_root: PathBuf,
    /// Maximum file size to serve (in bytes)
    pub max_file_size: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            sites_dir: PathBuf::from("sites"),
            default_root: PathBuf::from("client"),
            max_file_size: 512 * 1024 * 1024,
        }
    }
}

/// A file chosen to answer a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct ContentResolver {
    config: ContentConfig,
    mime_types: Arc<MimeTypes>,
}

impl ContentResolver {
    pub fn new(config: ContentConfig) -> Self {
        Self {
            config,
            mime_types: Arc::new(MimeTypes::default()),
        }
    }

    /// Document root for a canonical hostname
    pub fn document_root(&self, hostname: &str) -> PathBuf {
        let site_root = self.config.sites_dir.join(hostname);
        if site_root.is_dir() {
            site_root
        } else {
            self.config.default_root.clone()
        }
    }

    /// Resolve `(hostname, path)` to a file, or None for 404
    ///
    /// Touches the filesystem; async callers run it on a blocking worker.
    pub fn resolve(&self, hostname: &str, request_path: &str) -> Option<ResolvedFile> {
        let root = self.document_root(hostname);
        let relative = match sanitize_path(request_path) {
            Ok(relative) => relative,
            Err(reason) => {
                debug!("Refusing {:?} for {}: {}", request_path, hostname, reason);
                return None;
            }
        };

        let candidates = [
            root.join(&relative),
            root.join(&relative).join("index.html"),
            root.join("index.html"),
        ];

        let path = candidates.into_iter().find(|p| self.is_servable(&root, p))?;
        let content_type = self.mime_types.get_mime_type(&path);
        Some(ResolvedFile { path, content_type })
    }

    /// A regular file under `root`, within the size limit, after resolving symlinks
    fn is_servable(&self, root: &Path, candidate: &Path) -> bool {
        let (Ok(root), Ok(canonical)) = (fs::canonicalize(root), fs::canonicalize(candidate)) else {
            return false;
        };
        if !canonical.starts_with(&root) {
            debug!("{} resolves outside {}", candidate.display(), root.display());
            return false;
        }
        match fs::metadata(&canonical) {
            Ok(metadata) => metadata.is_file() && metadata.len() <= self.config.max_file_size,
            Err(_) => false,
        }
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }
}

/// Turn a request path into a relative path with only normal components
pub fn sanitize_path(request_path: &str) -> Result<PathBuf, &'static str> {
    let decoded = urlencoding::decode(request_path).map_err(|_| "path is not valid UTF-8")?;

    if decoded.contains('\0') {
        return Err("path contains a NUL byte");
    }

    let mut relative = PathBuf::new();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::Normal(part) => {
                if part.to_string_lossy().starts_with('.') {
                    return Err("hidden files and directories are not served");
                }
                relative.push(part);
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err("directory traversal"),
            Component::Prefix(_) => return Err("invalid path component"),
        }
    }

    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    /// sites/a.example/{index.html, about/index.html, style.css}, client/index.html
    fn layout() -> (TempDir, ContentResolver) {
        let dir = tempdir().unwrap();
        let site = dir.path().join("sites").join("a.example");
        fs::create_dir_all(site.join("about")).unwrap();
        fs::write(site.join("index.html"), "a home").unwrap();
        fs::write(site.join("about").join("index.html"), "a about").unwrap();
        fs::write(site.join("style.css"), "body{}").unwrap();
        fs::write(site.join(".secret"), "hidden").unwrap();

        let client = dir.path().join("client");
        fs::create_dir_all(&client).unwrap();
        fs::write(client.join("index.html"), "default home").unwrap();

        let resolver = ContentResolver::new(ContentConfig {
            sites_dir: dir.path().join("sites"),
            default_root: client,
            ..ContentConfig::default()
        });
        (dir, resolver)
    }

    fn body(file: Option<ResolvedFile>) -> String {
        fs::read_to_string(file.unwrap().path).unwrap()
    }

    #[test]
    fn test_mime_types() {
        let mime_types = MimeTypes::default();
        assert_eq!(mime_types.get_mime_type(Path::new("test.html")), "text/html; charset=utf-8");
        assert_eq!(mime_types.get_mime_type(Path::new("TEST.PNG")), "image/png");
        assert_eq!(mime_types.get_mime_type(Path::new("test.wasm")), "application/wasm");
        assert_eq!(mime_types.get_mime_type(Path::new("test.unknown")), "application/octet-stream");
        assert_eq!(mime_types.get_mime_type(Path::new("Makefile")), "application/octet-stream");
    }

    #[test]
    fn test_host_with_own_tree() {
        let (_dir, resolver) = layout();
        assert_eq!(body(resolver.resolve("a.example", "/")), "a home");
        assert_eq!(body(resolver.resolve("a.example", "/about")), "a about");
        assert_eq!(body(resolver.resolve("a.example", "/about/")), "a about");

        let css = resolver.resolve("a.example", "/style.css").unwrap();
        assert_eq!(css.content_type, "text/css; charset=utf-8");
    }

    #[test]
    fn test_missing_files_fall_back_to_root_index() {
        let (_dir, resolver) = layout();
        assert_eq!(body(resolver.resolve("a.example", "/no/such/page")), "a home");
    }

    #[test]
    fn test_unknown_host_uses_default_tree() {
        let (_dir, resolver) = layout();
        assert_eq!(body(resolver.resolve("b.example", "/")), "default home");
        assert_eq!(body(resolver.resolve("b.example", "/style.css")), "default home");
    }

    #[test]
    fn test_hidden_and_traversal_are_refused() {
        let (_dir, resolver) = layout();
        assert_eq!(resolver.resolve("a.example", "/.secret"), None);
        assert_eq!(resolver.resolve("a.example", "/../client/index.html"), None);
        assert_eq!(resolver.resolve("a.example", "/%2e%2e/client/index.html"), None);
    }

    #[test]
    fn test_no_index_anywhere_is_not_found() {
        let dir = tempdir().unwrap();
        let resolver = ContentResolver::new(ContentConfig {
            sites_dir: dir.path().join("sites"),
            default_root: dir.path().join("empty"),
            ..ContentConfig::default()
        });
        assert_eq!(resolver.resolve("a.example", "/"), None);
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/a/b%20c.txt").unwrap(), PathBuf::from("a/b c.txt"));
        assert_eq!(sanitize_path("/").unwrap(), PathBuf::new());
        assert_eq!(sanitize_path("/./a").unwrap(), PathBuf::from("a"));
        assert!(sanitize_path("/a/../b").is_err());
        assert!(sanitize_path("/.git/config").is_err());
        assert!(sanitize_path("/a%00b").is_err());
    }
}
