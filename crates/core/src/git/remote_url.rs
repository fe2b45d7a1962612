//! Credential hints derived from a Git remote URL.
//!
//! SSH key authentication needs a user name. It is taken from the URL
//! (`ssh://git@host/repo.git` → `git`), falling back to `git` for scp-style
//! or user-less URLs.

use regex_lite::Regex;

/// User assumed when the URL does not name one.
pub const DEFAULT_SSH_USER: &str = "git";

/// Extract the user part of an `http(s)://` or `ssh://` URL.
pub fn url_user(url: &str) -> Option<String> {
    let re = Regex::new(r"(?:https?|ssh)://([^@?/:]+)@").ok()?;
    re.captures(url.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the user of an scp-style `user@host:path` remote.
fn scp_user(url: &str) -> Option<String> {
    if url.contains("://") {
        return None;
    }
    let (user, rest) = url.trim().split_once('@')?;
    if user.is_empty() || !rest.contains(':') {
        return None;
    }
    Some(user.to_string())
}

/// User name to present for SSH key authentication.
pub fn ssh_user(url: &str) -> String {
    url_user(url)
        .or_else(|| scp_user(url))
        .unwrap_or_else(|| DEFAULT_SSH_USER.to_string())
}
