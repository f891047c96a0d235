//! Magnet link parsing.
//!
//! Only the parameters the engines use are kept: info hash (`xt`), display
//! name (`dn`), exact length (`xl`) and HTTP sources (`ws`, `as`, `xs`).

use anyhow::{bail, Context, Result};
use url::Url;

/// A parsed `magnet:?` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Info hash from `xt=urn:btih:<hash>`, as written (hex or base32).
    pub info_hash: Option<String>,
    pub display_name: Option<String>,
    pub exact_length: Option<u64>,
    /// Web seeds and acceptable/exact sources, in link order, deduplicated.
    pub sources: Vec<Url>,
    /// Tracker URLs (`tr`). Carried for logging only.
    pub trackers: Vec<String>,
}

impl MagnetLink {
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input.trim()).context("parse content reference")?;
        if url.scheme() != "magnet" {
            bail!("not a magnet link: scheme {:?}", url.scheme());
        }

        let mut link = MagnetLink {
            info_hash: None,
            display_name: None,
            exact_length: None,
            sources: Vec::new(),
            trackers: Vec::new(),
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hash) = value.strip_prefix("urn:btih:") {
                        if !hash.is_empty() {
                            link.info_hash = Some(hash.to_string());
                        }
                    }
                }
                "dn" if !value.is_empty() => link.display_name = Some(value.into_owned()),
                "xl" => link.exact_length = value.parse().ok(),
                "ws" | "as" | "xs" => match Url::parse(&value) {
                    Ok(src) if matches!(src.scheme(), "http" | "https") => {
                        if !link.sources.contains(&src) {
                            link.sources.push(src);
                        }
                    }
                    _ => tracing::debug!(source = %value, "ignoring non-http magnet source"),
                },
                "tr" => link.trackers.push(value.into_owned()),
                _ => {}
            }
        }

        if link.info_hash.is_none() && link.sources.is_empty() {
            bail!("magnet link has neither an info hash nor an http source");
        }
        Ok(link)
    }

    /// Human label for logs: display name, else info hash.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.info_hash.as_deref())
            .unwrap_or("unnamed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hash_name_length_and_sources() {
        let m = MagnetLink::parse(
            "magnet:?xt=urn:btih:EXAMPLE&dn=My%20Movie&xl=1024\
             &ws=http%3A%2F%2Fseed.example%2Fmovie.mkv\
             &tr=udp%3A%2F%2Ftracker.example%3A80",
        )
        .unwrap();
        assert_eq!(m.info_hash.as_deref(), Some("EXAMPLE"));
        assert_eq!(m.display_name.as_deref(), Some("My Movie"));
        assert_eq!(m.exact_length, Some(1024));
        assert_eq!(m.sources.len(), 1);
        assert_eq!(m.sources[0].as_str(), "http://seed.example/movie.mkv");
        assert_eq!(m.trackers, ["udp://tracker.example:80"]);
        assert_eq!(m.label(), "My Movie");
    }

    #[test]
    fn hash_only_link_is_valid() {
        let m = MagnetLink::parse("magnet:?xt=urn:btih:EXAMPLE").unwrap();
        assert_eq!(m.label(), "EXAMPLE");
        assert!(m.sources.is_empty());
    }

    #[test]
    fn duplicate_and_non_http_sources_are_dropped() {
        let m = MagnetLink::parse(
            "magnet:?ws=http%3A%2F%2Fa.example%2Fx.mp4&as=http%3A%2F%2Fa.example%2Fx.mp4\
             &xs=ftp%3A%2F%2Fb.example%2Fy.mp4",
        )
        .unwrap();
        assert_eq!(m.sources.len(), 1);
    }

    #[test]
    fn rejects_other_schemes_and_empty_links() {
        assert!(MagnetLink::parse("https://example.com/file.mp4").is_err());
        assert!(MagnetLink::parse("not a url").is_err());
        assert!(MagnetLink::parse("magnet:?dn=name").is_err());
    }
}
