/// Fingerprint generation for the content cache
///
/// A fingerprint covers the transform input plus every parameter that can
/// change the transform's output (the support matrix, for stylesheets). The
/// crate version is mixed in so results produced by an older transform are
/// never replayed after an upgrade.
use sha2::{Digest, Sha256};

/// Separates hashed fields so `["ab", "c"]` and `["a", "bc"]` differ.
const FIELD_SEPARATOR: &[u8] = b"\0";

/// Compute the content cache key for `content` under `params`.
///
/// Format: 64 hex characters (SHA256).
pub fn generate_key<I, S>(content: &str, params: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();

    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(FIELD_SEPARATOR);
    hasher.update(content.as_bytes());

    for param in params {
        hasher.update(FIELD_SEPARATOR);
        hasher.update(param.as_ref().as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Version fingerprint of a single piece of content.
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key_deterministic() {
        let browsers = ["chrome 120", "firefox 121"];
        let key1 = generate_key(".a { color: red; }", browsers);
        let key2 = generate_key(".a { color: red; }", browsers);

        assert_eq!(key1, key2);
        assert_eq!(key1.len(), 64);
    }

    #[test]
    fn test_generate_key_changes_with_params() {
        let content = ".a { color: red; }";
        let key1 = generate_key(content, ["chrome 120"]);
        let key2 = generate_key(content, ["chrome 120", "safari 17.2"]);
        let key3 = generate_key(content, Vec::<String>::new());

        assert_ne!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_generate_key_field_boundaries() {
        assert_ne!(
            generate_key("x", ["ab", "c"]),
            generate_key("x", ["a", "bc"])
        );
    }

    #[test]
    fn test_hash_content() {
        assert_eq!(hash_content("a"), hash_content("a"));
        assert_ne!(hash_content("a"), hash_content("b"));
    }
}
