//! Asset key derivation.
//!
//! A key is the last path segment of the source URL and doubles as the
//! on-disk file name. Two URLs ending in the same segment map to the same
//! key and therefore the same file; this is accepted, not disambiguated.

use std::path::{Path, PathBuf};

/// Value the upstream profile data carries when a user has no image.
pub const NO_ASSET: &str = "None";

const PARTIAL_SUFFIX: &str = ".part";

/// Whether `url` is one of the "nothing to load" placeholders.
pub fn is_sentinel(url: &str) -> bool {
    let url = url.trim();
    url.is_empty() || url == NO_ASSET
}

/// Derive the asset key for `url`: the last `/` segment, ignoring any query
/// string or fragment.
pub fn derive_key(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `key` can be used as a file name inside the cache directory
/// without escaping it. Dot-prefixed names are reserved for in-progress
/// downloads.
pub fn is_storable(key: &str) -> bool {
    !key.is_empty() && !key.starts_with('.') && !key.contains(['/', '\\', '\0'])
}

/// Whether a file name in the cache directory is an in-progress download.
pub fn is_partial_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// Whether `url` is something the fetcher can retrieve.
pub fn is_fetchable(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.has_host(),
        Err(_) => false,
    }
}

/// Location of `key` inside `dir`, or `None` when the key is not storable.
pub fn key_path(dir: &Path, key: &str) -> Option<PathBuf> {
    is_storable(key).then(|| dir.join(key))
}

/// Sibling file a download is written to before it is renamed into place.
/// The leading dot keeps it out of the key namespace.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_last_segment() {
        assert_eq!(
            derive_key("https://static-cdn.zwift.com/prod/profile/a1b2c3-large.jpg"),
            "a1b2c3-large.jpg"
        );
        assert_eq!(derive_key("avatar.png"), "avatar.png");
    }

    #[test]
    fn test_derive_key_ignores_query_and_fragment() {
        assert_eq!(derive_key("https://cdn.example.com/img/42.jpg?size=large"), "42.jpg");
        assert_eq!(derive_key("https://cdn.example.com/img/42.jpg#top"), "42.jpg");
    }

    #[test]
    fn test_derive_key_is_pure() {
        let url = "https://cdn.example.com/u/7/face.png";
        assert_eq!(derive_key(url), derive_key(url));
    }

    #[test]
    fn test_distinct_urls_can_collide() {
        // Same final segment on different hosts resolves to one key.
        assert_eq!(
            derive_key("https://a.example.com/x/photo.jpg"),
            derive_key("https://b.example.com/y/photo.jpg")
        );
    }

    #[test]
    fn test_trailing_slash_is_not_storable() {
        let key = derive_key("https://cdn.example.com/img/");
        assert_eq!(key, "");
        assert!(!is_storable(key));
    }

    #[test]
    fn test_sentinels() {
        assert!(is_sentinel(""));
        assert!(is_sentinel("  "));
        assert!(is_sentinel("None"));
        assert!(!is_sentinel("https://cdn.example.com/a.jpg"));
    }

    #[test]
    fn test_is_storable_rejects_traversal() {
        assert!(!is_storable(".."));
        assert!(!is_storable("."));
        assert!(!is_storable("a\\b.jpg"));
        assert!(!is_storable(".hidden.jpg"));
        assert!(is_storable("a.jpg"));
        assert!(is_storable("a.jpg.part"));
    }

    #[test]
    fn test_is_fetchable() {
        assert!(is_fetchable("https://cdn.example.com/a.jpg"));
        assert!(is_fetchable("http://127.0.0.1:8080/a.jpg"));
        assert!(!is_fetchable("ftp://cdn.example.com/a.jpg"));
        assert!(!is_fetchable("file:///etc/passwd"));
        assert!(!is_fetchable("None"));
        assert!(!is_fetchable("a.jpg"));
    }

    #[test]
    fn test_key_path_stays_inside_dir() {
        let dir = Path::new("/var/cache/zwi");
        assert_eq!(key_path(dir, "a.jpg"), Some(dir.join("a.jpg")));
        assert_eq!(key_path(dir, ".."), None);
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/var/cache/zwi/a.jpg")),
            PathBuf::from("/var/cache/zwi/.a.jpg.part")
        );
    }

    #[test]
    fn test_partial_name_never_a_key() {
        let partial = partial_path(Path::new("/c/a.jpg.part"));
        let name = partial.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, ".a.jpg.part.part");
        assert!(is_partial_name(name));
        assert!(!is_storable(name));
        // A key that merely ends in `.part` is an ordinary asset.
        assert!(!is_partial_name("a.jpg.part"));
    }
}
