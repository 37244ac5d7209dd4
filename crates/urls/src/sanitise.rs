//! URL normalization.
//!
//! Two spellings of the same page (`/about` and `/about/`, or a preview link
//! carrying `?stage=Stage`) must collapse onto the same cache entry, so every
//! URL passes through [`Sanitiser::normalize`] before it is queued.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use url::Url;

/// Matches a `stage=<value>` query parameter together with its leading
/// separator and, if present, the `&` that follows it.
static STAGE_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([?&])stage=[^&#]*&?").unwrap());

/// Remove every `stage=<value>` parameter from a URL, wherever it appears in
/// the query string, leaving all other parameters intact.
///
/// Works on the raw string so it also cleans up URLs that would not survive
/// strict parsing.
///
/// ```
/// use staticpub_urls::strip_stage_param;
/// assert_eq!(strip_stage_param("https://x?test1=1&stage=Stage&test2=2"), "https://x?test1=1&test2=2");
/// assert_eq!(strip_stage_param("http://x?stage=Stage"), "http://x");
/// ```
pub fn strip_stage_param(url: &str) -> String {
    let mut stripped = url.to_string();
    // Consecutive parameters share a separator, so a single pass can leave
    // one behind (`?stage=a&stage=b`). Repeat until nothing matches.
    loop {
        let next = match STAGE_PARAM.replace_all(&stripped, "$1") {
            Cow::Borrowed(_) => break,
            Cow::Owned(next) => next,
        };
        stripped = next;
    }
    let (head, fragment) = match stripped.split_once('#') {
        Some((head, fragment)) => (head, Some(fragment)),
        None => (stripped.as_str(), None),
    };
    let head = head.trim_end_matches('&').trim_end_matches('?');
    match fragment {
        Some(fragment) => format!("{head}#{fragment}"),
        None => head.to_string(),
    }
}

/// Normalizes raw URLs into the canonical form used as queue keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitiser {
    force_ssl: bool,
}
impl Sanitiser {
    pub fn new(force_ssl: bool) -> Self {
        Self { force_ssl }
    }

    /// Normalize a raw absolute URL.
    ///
    /// - `stage=<value>` parameters are removed,
    /// - the path ends in exactly one `/` (the query string is preserved),
    /// - `http://` becomes `https://` when SSL is enforced,
    /// - fragments are dropped; they never reach the server.
    ///
    /// Returns [`ErrorKind::InvalidUrl`] for anything that is not an absolute
    /// http(s) URL with a host.
    pub fn normalize(&self, raw: impl AsRef<str>) -> Result<String> {
        let raw = raw.as_ref().trim();
        let stripped = strip_stage_param(raw);
        let mut url = Url::parse(&stripped).or_raise(|| ErrorKind::InvalidUrl(raw.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            exn::bail!(ErrorKind::InvalidUrl(raw.to_string()));
        }
        if self.force_ssl && url.scheme() == "http" {
            // Infallible: switching between two "special" schemes.
            _ = url.set_scheme("https");
        }
        let path = format!("{}/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_fragment(None);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://x?test1=1&stage=Stage&test2=2", "https://x?test1=1&test2=2")]
    #[case("http://x?stage=Stage", "http://x")]
    #[case("http://x/?stage=Live&a=1", "http://x/?a=1")]
    #[case("http://x/?a=1&stage=", "http://x/?a=1")]
    #[case("http://x/?stage=a&stage=b", "http://x/")]
    #[case("http://x/?backstage=1", "http://x/?backstage=1")]
    #[case("http://x/?a=1&stage=x#frag", "http://x/?a=1#frag")]
    #[case("http://x/?stage=x#frag", "http://x/#frag")]
    #[case("http://x/path/", "http://x/path/")]
    fn test_strip_stage_param(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_stage_param(input), expected);
    }

    #[rstest]
    #[case("http://example.com", "http://example.com/")]
    #[case("http://example.com/about", "http://example.com/about/")]
    #[case("http://example.com/about///", "http://example.com/about/")]
    #[case("http://example.com/about?page=2", "http://example.com/about/?page=2")]
    #[case("http://example.com/about/?stage=Stage&page=2", "http://example.com/about/?page=2")]
    #[case("http://example.com/about#team", "http://example.com/about/")]
    #[case("  http://EXAMPLE.com/About  ", "http://example.com/About/")]
    fn test_normalize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(Sanitiser::new(false).normalize(input).unwrap(), expected);
    }

    #[test]
    fn test_normalize_forces_ssl() {
        let sanitiser = Sanitiser::new(true);
        assert_eq!(sanitiser.normalize("http://example.com/a").unwrap(), "https://example.com/a/");
        assert_eq!(sanitiser.normalize("https://example.com/a/").unwrap(), "https://example.com/a/");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let sanitiser = Sanitiser::new(false);
        let once = sanitiser.normalize("http://example.com/a/b?x=1&stage=Live").unwrap();
        assert_eq!(sanitiser.normalize(&once).unwrap(), once);
    }

    #[rstest]
    #[case("not a url")]
    #[case("/relative/path")]
    #[case("ftp://example.com/file")]
    #[case("mailto:someone@example.com")]
    fn test_normalize_rejects(#[case] input: &str) {
        let err = Sanitiser::default().normalize(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidUrl(_)));
    }
}
