//! Hostname allow-list for certificate issuance.

use super::error::Denied;

const DISALLOWED_HOST: &str = "disallowed host";

/// Accepts the configured domain and any of its subdomains.
///
/// Hostnames are compared lowercase with a trailing dot removed. A suffix
/// match must fall on a label boundary: with suffix `example.com`,
/// `notes.example.com` is accepted and `badexample.com` is not. This is
/// stricter than a plain string-suffix test, which would accept
/// `badexample.com` and let anyone owning such a name trigger issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPolicy {
    suffix: String,
}

impl HostPolicy {
    pub fn new(suffix: &str) -> Self {
        Self {
            suffix: suffix.trim_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Normalized hostname on success.
    pub fn check(&self, host: &str) -> Result<String, Denied> {
        let normalized = host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase();
        if !is_dns_name(&normalized) || !self.covers(&normalized) {
            return Err(Denied {
                host: host.to_string(),
                reason: DISALLOWED_HOST,
            });
        }
        Ok(normalized)
    }

    fn covers(&self, host: &str) -> bool {
        if self.suffix.is_empty() {
            return false;
        }
        match host.strip_suffix(self.suffix.as_str()) {
            Some("") => true,
            Some(rest) => rest.ends_with('.'),
            None => false,
        }
    }
}

/// Letters, digits and hyphens in non-empty labels. Also keeps the name safe
/// to use as a cache directory component.
fn is_dns_name(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}
