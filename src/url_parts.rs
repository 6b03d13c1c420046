//! Lenient URL decomposition shared by every extractor.
//!
//! Unlike `url::Url`, nothing here normalizes the input: no default-port
//! elision, no trailing slash, no case folding of the path. Lexical features are
//! counted over exactly what the client submitted, so the split has to be
//! literal. Parsing never fails; absent components are empty strings.

/// The components of one URL string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlParts {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UrlParts {
    pub fn parse(raw: &str) -> Self {
        let mut parts = UrlParts::default();
        let mut rest = raw;

        if let Some(colon) = rest.find(':') {
            let candidate = &rest[..colon];
            let valid = candidate
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic())
                .unwrap_or(false)
                && candidate
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
            if valid {
                parts.scheme = candidate.to_ascii_lowercase();
                rest = &rest[colon + 1..];
            }
        }

        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find(&['/', '?', '#'][..]).unwrap_or(after.len());
            parts.netloc = after[..end].to_string();
            rest = &after[end..];
        }

        if let Some(hash) = rest.find('#') {
            parts.fragment = rest[hash + 1..].to_string();
            rest = &rest[..hash];
        }
        if let Some(qm) = rest.find('?') {
            parts.query = rest[qm + 1..].to_string();
            rest = &rest[..qm];
        }
        parts.path = rest.to_string();
        parts
    }

    /// Network location with any `:port` suffix removed.
    pub fn domain(&self) -> &str {
        split_port(&self.netloc).0
    }

    /// Explicit numeric port, when one is present and valid.
    pub fn port(&self) -> Option<u16> {
        split_port(&self.netloc)
            .1
            .filter(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            .and_then(|p| p.parse().ok())
    }

    /// Domain without user-info, lower-cased, IPv6 brackets removed.
    pub fn hostname(&self) -> String {
        let domain = self.domain();
        let host = domain.rsplit_once('@').map(|(_, h)| h).unwrap_or(domain);
        host.trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase()
    }

    /// Dot-separated labels of the domain. Always at least one (possibly empty) label.
    pub fn domain_labels(&self) -> Vec<&str> {
        self.domain().split('.').collect()
    }

    /// Last label of the domain, lower-cased; `None` without at least two labels.
    pub fn tld(&self) -> Option<String> {
        let labels = self.domain_labels();
        if labels.len() < 2 {
            return None;
        }
        labels.last().map(|l| l.to_ascii_lowercase())
    }

    /// Path split on `/` with empty segments discarded.
    pub fn path_segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn is_http(&self) -> bool {
        self.scheme == "http" || self.scheme == "https"
    }
}

fn split_port(netloc: &str) -> (&str, Option<&str>) {
    let host_start = netloc.rfind('@').map(|i| i + 1).unwrap_or(0);
    let hostinfo = &netloc[host_start..];

    if hostinfo.starts_with('[') {
        if let Some(end) = hostinfo.find(']') {
            let host_end = host_start + end + 1;
            return match netloc[host_end..].strip_prefix(':') {
                Some(port) => (&netloc[..host_end], Some(port)),
                None => (netloc, None),
            };
        }
        return (netloc, None);
    }

    match hostinfo.find(':') {
        Some(i) => (&netloc[..host_start + i], Some(&hostinfo[i + 1..])),
        None => (netloc, None),
    }
}
