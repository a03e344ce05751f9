//! URL helpers: canonical comparison, internal resource links, label text.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static YOUTUBE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.)?(m\.)?(youtube(-nocookie)?\.com|youtu\.?be)/.+$")
        .expect("valid youtube regex")
});

/// Normalise a URL for identity comparison.
///
/// Drops the fragment, a leading `www.`, default ports and a trailing slash
/// on non-root paths. Returns `None` when `raw` is not an absolute URL.
pub fn canonicalize(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut out = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        out.push_str(&format!(":{port}"));
    }

    let path = url.path();
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        ""
    };
    out.push_str(path);

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

/// Whether two locations point at the same content once canonicalised.
/// Unparseable locations are compared verbatim.
pub fn same_location(a: &str, b: &str) -> bool {
    let a = canonicalize(a).unwrap_or_else(|| a.to_string());
    let b = canonicalize(b).unwrap_or_else(|| b.to_string());
    a == b
}

/// Extract the resource id from an internal link like `surf://resource/<id>`.
pub fn internal_resource_id(location: &str, scheme: &str) -> Option<String> {
    let rest = location.strip_prefix(scheme)?.strip_prefix("://resource/")?;
    let id: String = rest
        .chars()
        .take_while(|c| !matches!(c, '/' | '?' | '#'))
        .collect();
    if id.is_empty() { None } else { Some(id) }
}

/// YouTube pages need a fresh webview to extract transcripts.
pub fn is_youtube_url(location: &str) -> bool {
    YOUTUBE_RE.is_match(location)
}

/// Host of a URL without `www.`, used for favicons.
pub fn url_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

pub fn favicon_url(raw: &str) -> Option<String> {
    url_host(raw).map(|host| format!("https://www.google.com/s2/favicons?domain={host}&sz=48"))
}

/// Short display form of a URL: host plus path, capped at `max` characters.
pub fn truncate_url(raw: &str, max: usize) -> String {
    let display = match Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            let host = host.strip_prefix("www.").unwrap_or(host);
            let path = url.path().trim_end_matches('/');
            format!("{host}{path}")
        }
        Err(_) => raw.to_string(),
    };
    if display.chars().count() <= max {
        return display;
    }
    let mut short: String = display.chars().take(max.saturating_sub(3)).collect();
    short.push_str("...");
    short
}
