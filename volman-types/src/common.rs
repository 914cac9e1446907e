// SPDX-License-Identifier: GPL-3.0-only

//! Common utility functions shared across models

use num_format::{Locale, ToFormattedString};
use url::Url;

const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

fn scale(bytes: u64) -> (f64, &'static str) {
    let mut steps = 0;
    let mut val = bytes as f64;

    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    (val, UNITS[steps])
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let (val, unit) = scale(*bytes);

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Short size label with at most one decimal (e.g., "8 GB", "7.5 GB")
pub fn size_label(bytes: u64) -> String {
    let (val, unit) = scale(bytes);
    let rounded = format!("{:.1}", val);
    let trimmed = rounded.strip_suffix(".0").unwrap_or(&rounded);
    format!("{} {}", trimmed, unit)
}

/// Fallback display name for a volume without a label (e.g., "8 GB Volume")
pub fn volume_label(bytes: u64) -> String {
    format!("{} Volume", size_label(bytes))
}

/// Local filesystem path for a `file://` URI.
///
/// Returns `None` for any other scheme or for URIs that do not parse.
pub fn file_uri_to_path(uri: &str) -> Option<String> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    url.to_file_path()
        .ok()
        .map(|p| p.to_string_lossy().to_string())
}

/// `file://` URI for an absolute local path.
pub fn path_to_file_uri(path: &str) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

/// URI scheme, lowercased (e.g., "file", "smb").
pub fn uri_scheme(uri: &str) -> Option<String> {
    Url::parse(uri).ok().map(|u| u.scheme().to_ascii_lowercase())
}
