//! Parsing of CGI-style output: header lines, a blank line, then the body.

use crate::Response;
use crate::error::{ErrorKind, Result};

fn split_head(output: &[u8]) -> Option<(&[u8], &[u8])> {
    // Whichever blank line comes first; scripts are not consistent about \r\n.
    let crlf = output.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, p + 4));
    let lf = output.windows(2).position(|w| w == b"\n\n").map(|p| (p, p + 2));
    let (end, body) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        },
        (a, b) => a.or(b)?,
    };
    Some((&output[..end], &output[body..]))
}

fn parse_status(value: &str) -> Result<u16> {
    value
        .split_whitespace()
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|code| (100..600).contains(code))
        .ok_or_else(|| exn::Exn::from(ErrorKind::MalformedOutput(format!("invalid status `{value}`"))))
}

/// Parse the output of a CGI program into a [`Response`].
///
/// - A `Status:` header sets the status code.
/// - An (NPH-style) `HTTP/1.x <code>` first line sets it too.
/// - A `Location:` header without a status means `302 Found`.
/// - Otherwise the status is `200 OK`.
pub(crate) fn parse(output: &[u8]) -> Result<Response> {
    let (head, body) =
        split_head(output).ok_or_else(|| exn::Exn::from(ErrorKind::MalformedOutput("no end of headers".to_string())))?;
    let head = std::str::from_utf8(head)
        .map_err(|_| ErrorKind::MalformedOutput("headers are not valid UTF-8".to_string()))?;

    let mut status = None;
    let mut headers = Vec::new();
    for (index, line) in head.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if index == 0
            && let Some(rest) = line.strip_prefix("HTTP/")
        {
            let code = rest.split_once(' ').map(|(_, code)| code).unwrap_or_default();
            status = Some(parse_status(code)?);
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| exn::Exn::from(ErrorKind::MalformedOutput(format!("invalid header line `{line}`"))))?;
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("Status") {
            status = Some(parse_status(value)?);
            continue;
        }
        headers.push((name.to_string(), value.to_string()));
    }

    let mut response = Response { status: 200, headers, body: body.to_vec() };
    response.status = match status {
        Some(status) => status,
        None if response.location().is_some() => 302,
        None => 200,
    };
    Ok(response)
}
