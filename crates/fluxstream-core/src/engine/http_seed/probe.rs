//! HEAD probing of web-seed URLs.

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

/// What a HEAD request tells us about one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedHead {
    pub content_length: Option<u64>,
    /// Filename from `Content-Disposition`, if sent.
    pub filename: Option<String>,
}

/// Blocking HEAD request. Call from `spawn_blocking`.
pub fn probe(url: &str, timeout: Duration) -> Result<SeedHead> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.nobody(true)?;
    easy.follow_location(true)?;
    easy.connect_timeout(timeout.min(Duration::from_secs(15)))?;
    easy.timeout(timeout)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                // A redirect starts a new header block.
                if s.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(s.trim_end().to_string());
            }
            true
        })?;
        transfer
            .perform()
            .with_context(|| format!("HEAD {}", url))?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse_headers(&headers))
}

pub(crate) fn parse_headers(lines: &[String]) -> SeedHead {
    let mut head = SeedHead::default();
    for line in lines {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            head.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("content-disposition") {
            head.filename = disposition_filename(value);
        }
    }
    head
}

/// `filename="x"` or `filename=x` from a Content-Disposition value.
fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').find_map(|param| {
        let (name, v) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let v = v.trim().trim_matches('"');
        (!v.is_empty()).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn length_and_disposition() {
        let h = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 4096",
            "Content-Disposition: attachment; filename=\"Big Buck Bunny.mp4\"",
        ]));
        assert_eq!(h.content_length, Some(4096));
        assert_eq!(h.filename.as_deref(), Some("Big Buck Bunny.mp4"));
    }

    #[test]
    fn missing_headers() {
        let h = parse_headers(&lines(&["HTTP/1.1 200 OK", "Server: x"]));
        assert_eq!(h, SeedHead::default());
    }

    #[test]
    fn bare_token_filename() {
        assert_eq!(
            disposition_filename("inline; filename=clip.webm").as_deref(),
            Some("clip.webm")
        );
        assert_eq!(disposition_filename("inline"), None);
    }
}
