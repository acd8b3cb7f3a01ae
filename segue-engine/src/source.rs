//! Source url fixups
//!
//! Rewrites the url forms a caller may hand to Load/StartPreloading into the
//! form pipelines accept.

/// Url after fixup, plus anything split out of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedUrl {
    pub url: String,

    /// CD device taken from a `cdda://<device>/<track>` url
    pub cdda_device: Option<String>,
}

impl FixedUrl {
    fn unchanged(url: &str) -> Self {
        Self {
            url: url.to_string(),
            cdda_device: None,
        }
    }
}

/// Rewrite special url forms:
/// - `file://host/share/x` (remote host) becomes the UNC form `file://////host/share/x`
/// - `cdda://<device>/<track>` becomes `cdda://<track>`, keeping the device aside
/// - a bare absolute path becomes a `file://` url
pub fn fixup_url(url: &str) -> FixedUrl {
    if let Some(rest) = url.strip_prefix("file://") {
        return fixup_file(url, rest);
    }
    if let Some(rest) = url.strip_prefix("cdda://") {
        return fixup_cdda(url, rest);
    }
    if url.starts_with('/') {
        return FixedUrl {
            url: format!("file://{}", url),
            cdda_device: None,
        };
    }
    FixedUrl::unchanged(url)
}

fn fixup_file(url: &str, rest: &str) -> FixedUrl {
    let host = rest.split('/').next().unwrap_or("");
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return FixedUrl::unchanged(url);
    }
    FixedUrl {
        url: format!("file://////{}", rest),
        cdda_device: None,
    }
}

fn fixup_cdda(url: &str, rest: &str) -> FixedUrl {
    match rest.rfind('/') {
        Some(split) => {
            let device = &rest[..split];
            let track = &rest[split + 1..];
            FixedUrl {
                url: format!("cdda://{}", track),
                cdda_device: (!device.is_empty()).then(|| device.to_string()),
            }
        }
        None => FixedUrl::unchanged(url),
    }
}

/// Local filesystem path for a `file://` url or bare path, if it has one
pub fn local_path(url: &str) -> Option<std::path::PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        let path = rest.strip_prefix("localhost").unwrap_or(rest);
        if path.starts_with('/') {
            return Some(std::path::PathBuf::from(path));
        }
        return None;
    }
    if url.contains("://") {
        return None;
    }
    Some(std::path::PathBuf::from(url))
}
