use sha2::{Digest, Sha256};

use crate::index::DistributionFile;

const KEY_SEPARATOR: char = '\u{1f}';

/// Stable identity of a cache entry. Only identity data goes in: names,
/// versions, filenames, content hashes or URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    canonical: String,
}

impl CacheKey {
    pub fn distribution(file: &DistributionFile) -> Self {
        Self::from_parts(
            "dist",
            &[
                file.project.as_str(),
                file.version.as_str(),
                file.kind.label(),
                file.filename.as_str(),
                file.identity(),
            ],
        )
    }

    pub fn listing(index_url: &str, project: &str, epoch: &str) -> Self {
        Self::from_parts("listing", &[index_url.trim_end_matches('/'), project, epoch])
    }

    fn from_parts(namespace: &str, parts: &[&str]) -> Self {
        let mut canonical = String::from(namespace);
        for part in parts {
            canonical.push(KEY_SEPARATOR);
            canonical.push_str(part);
        }
        Self { canonical }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical.as_bytes()))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical.replace(KEY_SEPARATOR, "|"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::index::DistributionKind;

    fn sdist(url: &str, sha: Option<&str>) -> DistributionFile {
        DistributionFile {
            project: "pkg-b".into(),
            filename: "pkg_b-2.1.tar.gz".into(),
            url: url.into(),
            hashes: sha
                .map(|sha| BTreeMap::from([("sha256".to_string(), sha.to_string())]))
                .unwrap_or_default(),
            version: "2.1".into(),
            kind: DistributionKind::Sdist,
            requires_python: None,
            yanked: false,
        }
    }

    #[test]
    fn hashed_files_ignore_mirror_urls() {
        let a = CacheKey::distribution(&sdist("https://a.example/x", Some("ab")));
        let b = CacheKey::distribution(&sdist("https://b.example/x", Some("ab")));
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn unhashed_files_key_on_url() {
        let a = CacheKey::distribution(&sdist("https://a.example/x", None));
        let b = CacheKey::distribution(&sdist("https://b.example/x", None));
        assert_ne!(a, b);
    }

    #[test]
    fn listing_keys_depend_on_epoch_and_ignore_trailing_slash() {
        let base = CacheKey::listing("https://pypi.org/simple/", "pkg-a", "0");
        assert_eq!(base, CacheKey::listing("https://pypi.org/simple", "pkg-a", "0"));
        assert_ne!(base, CacheKey::listing("https://pypi.org/simple/", "pkg-a", "1"));
        assert_eq!(base.to_string(), "listing|https://pypi.org/simple|pkg-a|0");
    }
}
