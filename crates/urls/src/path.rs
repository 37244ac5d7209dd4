//! Mapping between URLs and cache file paths.
//!
//! A URL maps to an extension-less path relative to the cache root; callers
//! append `.html`, `.php` or `.stale.html` as needed. The mapping is
//! invertible so that the files on disk can be enumerated back into the URLs
//! that produced them.
//!
//! | URL (base `https://example.com/`) | plain         | domain-based              |
//! |-----------------------------------|---------------|---------------------------|
//! | `https://example.com/`            | `index`       | `example.com/index`       |
//! | `https://example.com/about/team/` | `about/team`  | `example.com/about/team`  |

use crate::error::{ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use std::path::Path;
use url::Url;

const INDEX: &str = "index";
/// Artifact suffixes, longest first so `.stale.html` wins over `.html`.
const ARTIFACT_SUFFIXES: [&str; 3] = [".stale.html", ".html", ".php"];

/// Converts URLs to cache paths and back for one base URL.
#[derive(Debug, Clone)]
pub struct PathMapper {
    base: Url,
    domain_based: bool,
}
impl PathMapper {
    /// Create a mapper for the site hosted at `base_url`.
    ///
    /// The base is always treated as a directory, so `https://example.com/sub`
    /// and `https://example.com/sub/` are equivalent.
    pub fn new(base_url: impl AsRef<str>, domain_based: bool) -> Result<Self> {
        let raw = base_url.as_ref();
        let mut base = Url::parse(raw).or_raise(|| ErrorKind::InvalidBase(raw.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            exn::bail!(ErrorKind::InvalidBase(raw.to_string()));
        }
        let path = format!("{}/", base.path().trim_end_matches('/'));
        base.set_path(&path);
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base, domain_based })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn domain_based(&self) -> bool {
        self.domain_based
    }

    /// Convert a URL into its cache path (without extension).
    ///
    /// Relative URLs are resolved against the base URL. URLs carrying a
    /// query string have no file representation and are rejected with
    /// [`ErrorKind::InvalidUrl`], as is anything unparsable.
    pub fn url_to_path(&self, url: impl AsRef<str>) -> Result<String> {
        let raw = url.as_ref();
        let parsed = Url::options()
            .base_url(Some(&self.base))
            .parse(raw)
            .or_raise(|| ErrorKind::InvalidUrl(raw.to_string()))?;
        if parsed.query().is_some_and(|q| !q.is_empty()) {
            exn::bail!(ErrorKind::InvalidUrl(raw.to_string()));
        }
        let host = parsed.host_str().ok_or_raise(|| ErrorKind::InvalidUrl(raw.to_string()))?;

        let path = parsed.path();
        let prefix = self.base.path().trim_end_matches('/');
        let rest = match path.get(..prefix.len()) {
            // Only strip on a segment boundary: base `/sub` must not eat `/subway`.
            Some(head)
                if head.eq_ignore_ascii_case(prefix)
                    && matches!(path.as_bytes().get(prefix.len()), None | Some(b'/')) =>
            {
                &path[prefix.len()..]
            },
            _ => path,
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.iter().any(|s| *s == "." || *s == "..") {
            exn::bail!(ErrorKind::InvalidUrl(raw.to_string()));
        }
        let filename = match segments.is_empty() {
            true => INDEX.to_string(),
            false => segments.join("/"),
        };

        Ok(match (self.domain_based, parsed.port()) {
            (false, _) => filename,
            (true, None) => format!("{host}/{filename}"),
            (true, Some(port)) => format!("{host}:{port}/{filename}"),
        })
    }

    /// Convert a cache-relative artifact path (`about/team.html`,
    /// `example.com/index.php`, ...) back into the URL that produced it.
    ///
    /// The returned URL always ends in `/`, matching the normalized form
    /// produced by [`Sanitiser`](crate::Sanitiser).
    pub fn path_to_url(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let text = path.to_str().ok_or_raise(|| ErrorKind::InvalidPath(path.display().to_string()))?;
        let relative = text.trim_start_matches('/');
        let stem = ARTIFACT_SUFFIXES
            .iter()
            .find_map(|suffix| relative.strip_suffix(suffix))
            .filter(|stem| !stem.is_empty())
            .ok_or_raise(|| ErrorKind::InvalidPath(text.to_string()))?;

        if !self.domain_based {
            return Ok(match stem {
                INDEX => self.base.to_string(),
                _ => format!("{}{stem}/", self.base),
            });
        }
        let (host, rest) = stem.split_once('/').ok_or_raise(|| ErrorKind::InvalidPath(text.to_string()))?;
        let origin = format!("{}://{host}{}", self.base.scheme(), self.base.path());
        Ok(match rest {
            INDEX => origin,
            _ => format!("{origin}{rest}/"),
        })
    }
}

/// Convert a URL into its cache path for the site hosted at `base_url`.
///
/// Convenience wrapper around [`PathMapper::url_to_path`] for one-off lookups.
pub fn url_to_path(url: impl AsRef<str>, base_url: impl AsRef<str>, domain_based: bool) -> Result<String> {
    PathMapper::new(base_url, domain_based)?.url_to_path(url)
}

/// Convert an on-disk artifact path back into a URL.
///
/// `path` may be absolute (under `dest_root`) or already relative to it.
pub fn path_to_url(
    path: impl AsRef<Path>,
    dest_root: impl AsRef<Path>,
    base_url: impl AsRef<str>,
    domain_based: bool,
) -> Result<String> {
    let path = path.as_ref();
    let relative = path.strip_prefix(dest_root.as_ref()).unwrap_or(path);
    PathMapper::new(base_url, domain_based)?.path_to_url(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sanitiser;
    use rstest::rstest;

    #[rstest]
    #[case("https://example.com/", "https://example.com/", "index")]
    #[case("https://example.com/", "https://example.com", "index")]
    #[case("https://example.com/", "https://example.com/about/", "about")]
    #[case("https://example.com/", "https://example.com/about/team", "about/team")]
    #[case("https://example.com/", "/about/team/", "about/team")]
    #[case("https://example.com/sub/", "https://example.com/sub/about/", "about")]
    #[case("https://example.com/sub/", "https://example.com/SUB/about/", "about")]
    #[case("https://example.com/sub/", "https://example.com/sub/", "index")]
    #[case("https://example.com/sub/", "https://example.com/subway/", "subway")]
    #[case("https://example.com/", "https://example.com/a//b/", "a/b")]
    fn test_url_to_path(#[case] base: &str, #[case] url: &str, #[case] expected: &str) {
        assert_eq!(url_to_path(url, base, false).unwrap(), expected);
    }

    #[rstest]
    #[case("https://example.com/", "example.com/index")]
    #[case("https://example.com/about/", "example.com/about")]
    #[case("https://other.org/about/", "other.org/about")]
    #[case("http://localhost:8080/about/", "localhost:8080/about")]
    fn test_url_to_path_domain_based(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(url_to_path(url, "https://example.com/", true).unwrap(), expected);
    }

    #[rstest]
    #[case("https://example.com/search/?q=test")]
    #[case("http://[::1")]
    fn test_url_to_path_rejects(#[case] url: &str) {
        let err = url_to_path(url, "https://example.com/", false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }

    #[rstest]
    #[case("example.com")]
    #[case("/relative/")]
    #[case("ftp://example.com/")]
    fn test_invalid_base(#[case] base: &str) {
        let err = PathMapper::new(base, false).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidBase(_)));
    }

    #[rstest]
    #[case("index.html", "https://example.com/")]
    #[case("about.html", "https://example.com/about/")]
    #[case("about/team.php", "https://example.com/about/team/")]
    #[case("about/team.stale.html", "https://example.com/about/team/")]
    #[case("/about.html", "https://example.com/about/")]
    fn test_path_to_url(#[case] path: &str, #[case] expected: &str) {
        let mapper = PathMapper::new("https://example.com/", false).unwrap();
        assert_eq!(mapper.path_to_url(path).unwrap(), expected);
    }

    #[test]
    fn test_path_to_url_strips_destination_root() {
        let url = path_to_url("/var/cache/site/about.html", "/var/cache/site", "https://example.com/", false).unwrap();
        assert_eq!(url, "https://example.com/about/");
    }

    #[rstest]
    #[case("about")]
    #[case("about.txt")]
    #[case(".html")]
    fn test_path_to_url_rejects_non_artifacts(#[case] path: &str) {
        let mapper = PathMapper::new("https://example.com/", false).unwrap();
        let err = mapper.path_to_url(path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[rstest]
    fn test_round_trip(
        #[values("https://example.com/", "https://example.com/sub/")] base: &str,
        #[values(false, true)] domain_based: bool,
        #[values("", "about", "about/team", "a/b/c/d", "index-page", "caf%C3%A9")] path: &str,
    ) {
        let mapper = PathMapper::new(base, domain_based).unwrap();
        let sanitiser = Sanitiser::default();
        let url = sanitiser.normalize(format!("{base}{path}")).unwrap();
        let cached = mapper.url_to_path(&url).unwrap();
        let restored = mapper.path_to_url(format!("{cached}.html")).unwrap();
        assert_eq!(restored, url, "round trip via `{cached}`");
    }
}
