use std::path::PathBuf;
use url::Url;

/// Schemes that point at a remote transfer service rather than a local path
pub const REMOTE_TRANSFER_SCHEMES: &[&str] = &["scp", "ftp", "gsiftp", "sftp"];

/// Resolve a `file:` URI to a local path.
///
/// Returns `None` for other schemes and for `file:` URIs that name a remote
/// host.
pub fn local_file_path(uri: &str) -> Option<PathBuf> {
    let parsed = Url::parse(uri).ok()?;
    if parsed.scheme() != "file" {
        return None;
    }
    parsed.to_file_path().ok()
}

/// Resolve a directory declaration to a local path.
///
/// Plain paths are returned as-is and `file:` URIs are stripped of their
/// scheme. Remote transfer schemes, `file:` URIs with an embedded host and any
/// other scheme yield `None`.
pub fn local_directory(declared: &str) -> Option<PathBuf> {
    match Url::parse(declared) {
        Ok(parsed) => {
            if REMOTE_TRANSFER_SCHEMES.contains(&parsed.scheme()) {
                return None;
            }
            if parsed.scheme() == "file" {
                return parsed.to_file_path().ok();
            }
            None
        }
        // no scheme at all: already a path
        Err(url::ParseError::RelativeUrlWithoutBase) => Some(PathBuf::from(declared)),
        Err(_) => None,
    }
}

/// Whether `uri` names a file on this machine: a plain path or a `file:`
/// URI without a remote host
pub fn is_local(uri: &str) -> bool {
    match Url::parse(uri) {
        Ok(parsed) => parsed.scheme() == "file" && parsed.to_file_path().is_ok(),
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

/// Last path segment of a path or URI
pub fn file_name(path_or_uri: &str) -> &str {
    let without_fragment = path_or_uri.rsplit_once("#/").map_or(path_or_uri, |(_, p)| p);
    let trimmed = without_fragment.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_file_path() {
        assert_eq!(local_file_path("file:///tmp/in.txt"), Some(PathBuf::from("/tmp/in.txt")));
        assert_eq!(local_file_path("file:/tmp/in.txt"), Some(PathBuf::from("/tmp/in.txt")));
        assert_eq!(local_file_path("file://remotehost/tmp/in.txt"), None);
        assert_eq!(local_file_path("https://example.org/in.txt"), None);
    }

    #[test]
    fn test_local_directory() {
        assert_eq!(local_directory("/data/out"), Some(PathBuf::from("/data/out")));
        assert_eq!(local_directory("file:///data/out"), Some(PathBuf::from("/data/out")));
        assert_eq!(local_directory("file://storage.example.org/data/out"), None);
        assert_eq!(local_directory("scp://storage.example.org/data/out"), None);
        assert_eq!(local_directory("gsiftp://storage.example.org/data/out"), None);
    }

    #[test]
    fn test_is_local() {
        assert!(is_local("/tmp/in.txt"));
        assert!(is_local("file:///tmp/in.txt"));
        assert!(!is_local("file://remotehost/tmp/in.txt"));
        assert!(!is_local("gsiftp://remotehost/tmp/in.txt"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/a/b/c.txt"), "c.txt");
        assert_eq!(file_name("file:///a/b/c.txt"), "c.txt");
        assert_eq!(file_name("BFT:https://host/sms#/dir/c.txt"), "c.txt");
        assert_eq!(file_name("plain.txt"), "plain.txt");
        assert_eq!(file_name("/a/dir/"), "dir");
    }
}
