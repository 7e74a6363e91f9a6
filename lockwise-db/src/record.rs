use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One saved login.
///
/// Timestamps are milliseconds since the Unix epoch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CredentialRecord {
    /// Stable identifier.
    pub id: String,
    /// Origin the login belongs to, e.g. `https://example.com`.
    pub hostname: String,
    /// Origin forms submit to, when it differs from `hostname`.
    #[serde(default)]
    pub form_submit_url: Option<String>,
    /// HTTP auth realm for logins captured from an auth prompt.
    #[serde(default)]
    pub http_realm: Option<String>,
    /// Account name, if any.
    #[serde(default)]
    pub username: Option<String>,
    /// The secret.
    pub password: String,
    /// Name of the form field the username was typed into.
    #[serde(default)]
    pub username_field: String,
    /// Name of the form field the password was typed into.
    #[serde(default)]
    pub password_field: String,
    /// How many times the login was filled.
    #[serde(default)]
    pub times_used: u64,
    /// When the login was created.
    #[serde(default)]
    pub time_created: u64,
    /// When the login was last filled.
    #[serde(default)]
    pub time_last_used: u64,
    /// When the password last changed.
    #[serde(default)]
    pub time_password_changed: u64,
    /// Server-assigned revision marker, `None` until first synced.
    #[serde(default)]
    pub sync_revision: Option<String>,
}

impl CredentialRecord {
    /// Creates a login with a fresh identifier.
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        username: Option<String>,
        password: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            hostname: hostname.into(),
            form_submit_url: None,
            http_realm: None,
            username,
            password: password.into(),
            username_field: String::new(),
            password_field: String::new(),
            times_used: 0,
            time_created: now,
            time_last_used: now,
            time_password_changed: now,
            sync_revision: None,
        }
    }

    /// Hostname without the scheme or trailing slash, for notifications.
    #[must_use]
    pub fn display_name(&self) -> &str {
        let host = self
            .hostname
            .split_once("://")
            .map_or(self.hostname.as_str(), |(_, rest)| rest);
        let host = host.strip_prefix("www.").unwrap_or(host);
        host.trim_end_matches('/')
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.times_used = self.times_used.saturating_add(1);
        self.time_last_used = now;
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("times_used", &self.times_used)
            .field("time_last_used", &self.time_last_used)
            .field("sync_revision", &self.sync_revision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://www.example.com/", "example.com")]
    #[test_case("http://accounts.example.org", "accounts.example.org")]
    #[test_case("example.net", "example.net")]
    fn test_display_name(hostname: &str, expected: &str) {
        let record = CredentialRecord::new(hostname, None, "pw", 1);
        assert_eq!(record.display_name(), expected);
    }

    #[test]
    fn test_new_records_get_distinct_ids() {
        let first = CredentialRecord::new("https://a.test", None, "pw", 1);
        let second = CredentialRecord::new("https://a.test", None, "pw", 1);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_debug_redacts_password() {
        let record = CredentialRecord::new("https://a.test", None, "hunter2", 1);
        assert!(!format!("{record:?}").contains("hunter2"));
    }

    #[test]
    fn test_touch_counts_uses() {
        let mut record = CredentialRecord::new("https://a.test", None, "pw", 1);
        record.touch(50);
        record.touch(60);
        assert_eq!(record.times_used, 2);
        assert_eq!(record.time_last_used, 60);
    }
}
