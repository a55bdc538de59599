//! URL canonicalization for cache keys.
//!
//! Surface variants of one source (short links, mobile hosts, tracking
//! parameters, fragments, redirect wrappers) map to one canonical URL.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use url::Url;

use super::{ItemRange, RequestError};

lazy_static! {
    static ref RANGE_SUFFIX: Regex = Regex::new(r"\*(\d+)\*(\d+)$").expect("valid regex");
}

/// Query parameters that never change what is fetched.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "igshid",
    "si",
    "feature",
    "ref",
    "ref_src",
    "pp",
];

/// Hosts whose query string is always noise.
const QUERYLESS_HOSTS: &[&str] = &["tiktok.com", "instagram.com", "vimeo.com", "twitter.com", "x.com"];

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

const MAX_REDIRECT_UNWRAP: u8 = 2;

/// Split a trailing `*start*end` range selector off user input.
pub fn split_range_suffix(input: &str) -> Result<(&str, Option<ItemRange>), RequestError> {
    let Some(caps) = RANGE_SUFFIX.captures(input) else {
        return Ok((input, None));
    };
    let bad = || RequestError::InvalidRange(caps[0].to_string());
    let start: u32 = caps[1].parse().map_err(|_| bad())?;
    let end: u32 = caps[2].parse().map_err(|_| bad())?;
    let cut = caps.get(0).map(|m| m.start()).unwrap_or(input.len());
    let range = ItemRange::span(start, end).map_err(|_| bad())?;
    Ok((&input[..cut], Some(range)))
}

/// Canonical form of `input`. `batch` keeps the playlist identity of watch URLs
/// that carry a `list` parameter; single-item requests drop it.
pub fn normalize_url(input: &str, batch: bool) -> Result<String, RequestError> {
    normalize_depth(input, batch, 0)
}

fn normalize_depth(input: &str, batch: bool, depth: u8) -> Result<String, RequestError> {
    let url = parse_loose(input)?;
    if depth < MAX_REDIRECT_UNWRAP {
        if let Some(target) = redirect_target(&url) {
            return normalize_depth(&target, batch, depth + 1);
        }
    }
    let host = url.host_str().unwrap_or_default();
    if YOUTUBE_HOSTS.contains(&host) {
        if let Some(canonical) = youtube_canonical(&url, batch) {
            return Ok(canonical);
        }
        let mut url = url;
        let _ = url.set_scheme("https");
        let _ = url.set_host(Some("www.youtube.com"));
        return Ok(normalize_generic(url));
    }
    Ok(normalize_generic(url))
}

fn parse_loose(input: &str) -> Result<Url, RequestError> {
    let trimmed = input.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|_| RequestError::InvalidUrl(input.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        _ => Err(RequestError::InvalidUrl(input.to_string())),
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.strip_suffix(domain).is_some_and(|rest| rest.ends_with('.'))
}

/// Target of a `google.*/url?q=...` redirect wrapper.
fn redirect_target(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let is_google = host == "google.com" || host.starts_with("www.google.") || host.starts_with("google.");
    if !is_google || url.path() != "/url" {
        return None;
    }
    url.query_pairs()
        .find(|(k, v)| (k == "q" || k == "url") && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn youtube_canonical(url: &Url, batch: bool) -> Option<String> {
    let params: HashMap<String, String> = url
        .query_pairs()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let list = params.get("list");

    if batch {
        if let Some(list) = list {
            return Some(playlist_url(list));
        }
    }

    let video_id = if url.host_str() == Some("youtu.be") {
        segments.first().map(|s| s.to_string())
    } else {
        match segments.as_slice() {
            ["watch"] => params.get("v").cloned(),
            ["playlist"] => return list.map(|l| playlist_url(l)),
            ["shorts" | "live" | "embed" | "v", id, ..] => Some(id.to_string()),
            _ => None,
        }
    };
    video_id.map(|id| format!("https://www.youtube.com/watch?v={id}"))
}

fn playlist_url(list: &str) -> String {
    format!("https://www.youtube.com/playlist?list={list}")
}

fn normalize_generic(mut url: Url) -> String {
    url.set_fragment(None);
    let host = url.host_str().unwrap_or_default().to_string();
    if QUERYLESS_HOSTS.iter().any(|d| host_matches(&host, d)) {
        url.set_query(None);
    } else {
        let mut kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| {
                let key = k.to_ascii_lowercase();
                !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
            })
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        kept.sort();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(url: &str) -> String {
        normalize_url(url, false).unwrap()
    }

    #[test]
    fn youtube_variants_collide() {
        let canonical = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
        for input in [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=tracking",
            "http://youtube.com/watch?v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&feature=share",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42#comments",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ?feature=share",
            "https://www.youtube.com/live/dQw4w9WgXcQ?si=1",
            "www.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1",
        ] {
            assert_eq!(single(input), canonical, "input {input}");
        }
    }

    #[test]
    fn batch_watch_with_list_becomes_playlist() {
        let url = "https://www.youtube.com/watch?v=abc&list=PLxyz&index=3";
        assert_eq!(
            normalize_url(url, true).unwrap(),
            "https://www.youtube.com/playlist?list=PLxyz"
        );
        assert_eq!(single(url), "https://www.youtube.com/watch?v=abc");
        assert_eq!(
            single("https://youtube.com/playlist?list=PLxyz&si=a"),
            "https://www.youtube.com/playlist?list=PLxyz"
        );
    }

    #[test]
    fn google_redirect_is_unwrapped() {
        let wrapped = "https://www.google.com/url?sa=t&url=https%3A%2F%2Fyoutu.be%2Fabc&q=";
        assert_eq!(single(wrapped), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn generic_urls_drop_noise_and_sort_query() {
        assert_eq!(
            single("https://example.com/video/?b=2&utm_source=x&a=1#frag"),
            "https://example.com/video?a=1&b=2"
        );
        assert_eq!(
            single("https://example.com/video?a=1&b=2"),
            single("https://example.com/video?b=2&a=1")
        );
        assert_eq!(
            single("https://www.tiktok.com/@user/video/123?is_from_webapp=1"),
            "https://www.tiktok.com/@user/video/123"
        );
    }

    #[test]
    fn invalid_urls_rejected() {
        assert!(normalize_url("ftp://example.com/file", false).is_err());
        assert!(normalize_url("https://", false).is_err());
        assert!(normalize_url("not a url at all", false).is_err());
    }

    #[test]
    fn range_suffix_split() {
        let (url, range) = split_range_suffix("https://x.com/list*2*5").unwrap();
        assert_eq!(url, "https://x.com/list");
        assert_eq!(range, Some(ItemRange::Span { start: 2, end: 5 }));
        let (url, range) = split_range_suffix("https://x.com/v").unwrap();
        assert_eq!(url, "https://x.com/v");
        assert!(range.is_none());
        assert!(split_range_suffix("https://x.com/list*5*2").is_err());
    }
}
