//! Path classification: which requests skip the guard and which need the ADMIN role.

use crate::config::PathConfig;

/// How the guard treats a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    /// Public or static; forwarded without any credential check
    Bypass,
    /// Requires a resolved identity
    Normal,
}

/// Static path rules, built once from config.
#[derive(Debug, Clone)]
pub struct PathRules {
    bypass_prefixes: Vec<String>,
    bypass_exact: Vec<String>,
    admin_prefixes: Vec<String>,
    login_path: String,
    home_path: String,
}

impl PathRules {
    pub fn new(config: &PathConfig) -> Self {
        Self {
            bypass_prefixes: config.bypass_prefixes.clone(),
            bypass_exact: config.bypass_exact.clone(),
            admin_prefixes: config.admin_prefixes.clone(),
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
        }
    }

    pub fn classify(&self, path: &str) -> PathClass {
        let bypass = self.bypass_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
            || self.bypass_exact.iter().any(|exact| path == exact);

        if bypass { PathClass::Bypass } else { PathClass::Normal }
    }

    /// Plain prefix match, so `/admin` also covers `/admin/members` and `/administration`.
    pub fn is_admin_restricted(&self, path: &str) -> bool {
        self.admin_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_login(&self, path: &str) -> bool {
        path == self.login_path
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn home_path(&self) -> &str {
        &self.home_path
    }
}

/// Canonical form of a request path, as a page server would route it.
///
/// Percent-encoded unreserved characters are decoded, runs of `/` are collapsed and `.`/`..`
/// segments are resolved. Other escapes (`%2F`, non-ASCII) are left alone. A trailing slash is
/// kept.
pub fn canonical_path(path: &str) -> String {
    let decoded = decode_unreserved(path);

    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    let trailing = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");
    let mut canonical = String::with_capacity(decoded.len());
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if segments.is_empty() || trailing {
        canonical.push('/');
    }
    canonical
}

fn decode_unreserved(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut decoded = String::with_capacity(path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(hex) = path.get(i + 1..i + 3)
            && let Ok(byte) = u8::from_str_radix(hex, 16)
            && (byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~'))
        {
            decoded.push(byte as char);
            i += 3;
            continue;
        }
        // Paths in a parsed URI are ASCII, so byte-wise copying is lossless
        decoded.push(bytes[i] as char);
        i += 1;
    }
    decoded
}

impl Default for PathRules {
    fn default() -> Self {
        Self::new(&PathConfig::default())
    }
}
