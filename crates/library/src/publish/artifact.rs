//! Rendering of the files written next to each cached page.
//!
//! | file            | contents                                                   |
//! |-----------------|------------------------------------------------------------|
//! | `wrapper.php`   | status code and caching headers, followed by the raw body |
//! | `redirect.php`  | status code and `Location` header                          |
//! | `redirect.html` | meta-refresh page for servers that only serve HTML         |

use crate::error::{ErrorKind, Result};
use crate::publish::assets::Builtins;
use exn::ResultExt;
use staticpub_render::Response;
use time::UtcDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use upon::{Engine, Template, Value};

const HTTP_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

pub(crate) struct Artifacts {
    engine: Engine<'static>,
    wrapper: Template<'static>,
    redirect_php: Template<'static>,
    redirect_html: Template<'static>,
}
impl Artifacts {
    /// Compile every builtin template, failing fast on a broken one.
    pub(crate) fn load() -> Result<Self> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let compile = |name: &str| -> Result<Template<'static>> {
            engine.compile(Builtins::load(name)?).or_raise(|| ErrorKind::Template)
        };
        let wrapper = compile("wrapper.php")?;
        let redirect_php = compile("redirect.php")?;
        let redirect_html = compile("redirect.html")?;
        Ok(Self { engine, wrapper, redirect_php, redirect_html })
    }

    /// PHP front for a cached page: replays the status code and headers,
    /// then emits the body verbatim.
    pub(crate) fn php_wrapper(&self, response: &Response, max_age: u64, modified: UtcDateTime) -> Result<Vec<u8>> {
        let last_modified = modified.format(HTTP_DATE).or_raise(|| ErrorKind::Template)?;
        let etag = blake3::hash(&response.body).to_hex();
        let headers = [
            format!("Content-Type: {}", response.content_type()),
            format!("Cache-Control: public, max-age={max_age}"),
            format!("Last-Modified: {last_modified}"),
            format!("ETag: \"{etag}\""),
        ];
        let head = self
            .wrapper
            .render(&self.engine, upon::value! {
                status: i64::from(response.status),
                headers: Value::List(headers.into_iter().map(|h| Value::String(single_line(&h))).collect()),
            })
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        let mut out = head.into_bytes();
        out.extend(replace_all(&response.body, b"<?", b"<?php echo '<?'; ?>"));
        Ok(out)
    }

    pub(crate) fn redirect_php(&self, status: u16, location: &str) -> Result<Vec<u8>> {
        self.redirect_php
            .render(&self.engine, upon::value! { status: i64::from(status), location: single_line(location) })
            .to_string()
            .map(String::into_bytes)
            .or_raise(|| ErrorKind::Template)
    }

    pub(crate) fn redirect_html(&self, location: &str) -> Result<Vec<u8>> {
        self.redirect_html
            .render(&self.engine, upon::value! { location: location })
            .to_string()
            .map(String::into_bytes)
            .or_raise(|| ErrorKind::Template)
    }
}

/// Header values must not smuggle in extra header lines.
fn single_line(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Replace every occurrence of `needle` in `haystack`. Replacements are not
/// scanned again.
pub(crate) fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(at) = rest.windows(needle.len()).position(|w| w == needle) {
        out.extend_from_slice(&rest[..at]);
        out.extend_from_slice(replacement);
        rest = &rest[at + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Custom [`upon`] formatters for emitting PHP and HTML safely.
mod addons {
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Single-quoted PHP string literal.
    fn php_string(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// HTML text or double-quoted attribute value.
    fn html(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                for c in s.chars() {
                    match c {
                        '&' => f.write_str("&amp;")?,
                        '<' => f.write_str("&lt;")?,
                        '>' => f.write_str("&gt;")?,
                        '"' => f.write_str("&quot;")?,
                        '\'' => f.write_str("&#39;")?,
                        c => f.write_char(c)?,
                    }
                }
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("php_string", php_string);
        engine.add_formatter("html", html);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts() -> Artifacts {
        Artifacts::load().unwrap()
    }

    /// 2024-01-05 13:04:05 UTC
    fn friday() -> UtcDateTime {
        UtcDateTime::from_unix_timestamp(1_704_459_845).unwrap()
    }

    #[test]
    fn test_wrapper_replays_headers_and_body() {
        let response = Response::new(200, "<h1>Hi</h1>").with_header("Content-Type", "text/html; charset=utf-8");
        let php = artifacts().php_wrapper(&response, 300, friday()).unwrap();
        let php = String::from_utf8(php).unwrap();
        assert!(php.starts_with("<?php\nhttp_response_code(200);\n"));
        assert!(php.contains("header('Content-Type: text/html; charset=utf-8');"));
        assert!(php.contains("header('Cache-Control: public, max-age=300');"));
        assert!(php.contains("header('Last-Modified: Fri, 05 Jan 2024 13:04:05 GMT');"));
        assert!(php.contains("header('ETag: \"") && php.contains("\"');"));
        assert!(php.ends_with("?>\n<h1>Hi</h1>"));
    }

    #[test]
    fn test_wrapper_neutralises_open_tags_in_body() {
        let response = Response::new(404, "<?xml version=\"1.0\"?><x/>");
        let php = artifacts().php_wrapper(&response, 0, UtcDateTime::now()).unwrap();
        let php = String::from_utf8(php).unwrap();
        assert!(php.contains("http_response_code(404);"));
        assert!(php.ends_with("<?php echo '<?'; ?>xml version=\"1.0\"?><x/>"));
    }

    #[test]
    fn test_redirect_php_escapes_location() {
        let php = artifacts().redirect_php(301, "https://example.com/it's/\nEvil: 1").unwrap();
        let php = String::from_utf8(php).unwrap();
        assert!(php.contains("http_response_code(301);"));
        assert!(php.contains(r"header('Location: ' . 'https://example.com/it\'s/Evil: 1');"));
    }

    #[test]
    fn test_redirect_html_escapes_location() {
        let html = artifacts().redirect_html("https://example.com/?a=1&b=\"2\"").unwrap();
        let html = String::from_utf8(html).unwrap();
        assert!(html.contains(r#"content="0; url=https://example.com/?a=1&amp;b=&quot;2&quot;""#));
    }

    #[test]
    fn test_replace_all() {
        assert_eq!(replace_all(b"a--b--", b"--", b"+"), b"a+b+");
        assert_eq!(replace_all(b"abc", b"", b"x"), b"abc");
        assert_eq!(replace_all(b"<<?", b"<?", b"[<?]"), b"<[<?]");
    }
}
