use peervault_core::HashedKey;
use std::path::{Path, PathBuf};

/// Width of one path segment, in hex characters. 8 hex chars = 32 bits,
/// bounding directory fan-out at 2^32 worst case per level.
const SEGMENT_LEN: usize = 8;

/// Number of directory segments sliced off the front of the hashed key
/// before the leaf filename.
const NUM_SEGMENTS: usize = 5;

/// Derives the on-disk path for a blob from its [`HashedKey`]:
/// `<root>/<seg0>/<seg1>/<seg2>/<seg3>/<seg4>/<hashedKey>`, where each
/// `segN` is an 8-hex-char slice of the hash and the leaf filename is the
/// full lowercase-hex digest. Two calls with an equal `HashedKey` always
/// yield an equal path, and the path can never escape `root` because every
/// component is derived from hex digits only.
pub fn cas_path(root: &Path, hashed_key: &HashedKey) -> PathBuf {
    let hex = hashed_key.as_hex();
    debug_assert_eq!(hex.len(), NUM_SEGMENTS * SEGMENT_LEN);

    let mut path = root.to_path_buf();
    for i in 0..NUM_SEGMENTS {
        let start = i * SEGMENT_LEN;
        path.push(&hex[start..start + SEGMENT_LEN]);
    }
    path.push(hex);
    path
}

/// Derives a storage root directory name from a node's listen address:
/// unsafe filesystem characters are replaced, and an optional prefix
/// directory is applied.
pub fn storage_root_for_listen_addr(prefix: Option<&str>, listen_addr: &str) -> PathBuf {
    let sanitized: String = listen_addr
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    match prefix {
        Some(prefix) => Path::new(prefix).join(sanitized),
        None => PathBuf::from(sanitized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_hash_path() {
        // see DESIGN.md for why 8-char segments were chosen.
        let hashed = HashedKey::compute("k");
        let path = cas_path(Path::new("/root"), &hashed);
        let hex = hashed.as_hex();
        let expected = PathBuf::from(format!(
            "/root/{}/{}/{}/{}/{}/{}",
            &hex[0..8],
            &hex[8..16],
            &hex[16..24],
            &hex[24..32],
            &hex[32..40],
            hex
        ));
        assert_eq!(path, expected);
    }

    #[test]
    fn equal_keys_yield_equal_paths() {
        let a = cas_path(Path::new("/r"), &HashedKey::compute("same"));
        let b = cas_path(Path::new("/r"), &HashedKey::compute("same"));
        assert_eq!(a, b);
    }

    #[test]
    fn path_never_contains_dotdot() {
        let hashed = HashedKey::compute("../../etc/passwd");
        let path = cas_path(Path::new("/root"), &hashed);
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[test]
    fn listen_addr_is_sanitized() {
        let root = storage_root_for_listen_addr(Some("data"), ":3000");
        assert_eq!(root, PathBuf::from("data/_3000"));
    }
}
