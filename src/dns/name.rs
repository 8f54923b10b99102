//! Domain names and key normalization.

use std::fmt;

/// Normalizes a domain for use as a cache or lookup key.
///
/// Surrounding whitespace and trailing root-label dots are removed and the
/// result is lower-cased, so `" Example.COM. "` and `"example.com"` name the
/// same entry. Applying it twice yields the same string.
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_ascii_lowercase()
}

/// A domain name to resolve into IP addresses.
///
/// The hostname is normalized on construction; see [`normalize_domain`].
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl AsRef<str>) -> Self {
        Self {
            host: normalize_domain(host.as_ref()).into_boxed_str(),
        }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }

    /// Fully qualified form with the root label, as DNS questions expect.
    pub fn to_fqdn(&self) -> String {
        format!("{}.", self.host)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_variants_collide() {
        let variants = ["example.com.", "EXAMPLE.COM", " example.com ", "Example.Com.\n"];
        for v in variants {
            assert_eq!(normalize_domain(v), "example.com", "input {v:?}");
        }
    }

    #[test]
    fn test_normalize_idempotent() {
        for d in ["  WWW.Example.org. ", "a.b.c", "", ".", "localhost"] {
            let once = normalize_domain(d);
            assert_eq!(normalize_domain(&once), once);
        }
    }

    #[test]
    fn test_normalize_strips_repeated_root_dots() {
        assert_eq!(normalize_domain("example.com.."), "example.com");
        assert_eq!(normalize_domain("example.com. ."), "example.com");
    }

    #[test]
    fn test_name_normalizes() {
        let name = Name::from("API.Example.com.");
        assert_eq!(name.as_str(), "api.example.com");
        assert_eq!(name.to_string(), "api.example.com");
        assert_eq!(name.to_fqdn(), "api.example.com.");
    }

    #[test]
    fn test_name_equality() {
        assert_eq!(Name::new("example.com"), Name::new("EXAMPLE.com."));
        assert_ne!(Name::new("example.com"), Name::new("other.com"));
    }

    #[test]
    fn test_name_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Name::new("example.com"));
        set.insert(Name::new("Example.com."));

        assert_eq!(set.len(), 1);
    }
}
