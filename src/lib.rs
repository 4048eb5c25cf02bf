//! # Vondr Gate (forward-auth decision service)
//!
//! `vondr-gate` is consulted by a reverse proxy once per guarded request. It
//! answers allow or deny and, on allow, the identity headers the proxy should
//! forward upstream.
//!
//! ## Identities
//!
//! - **Interactive sessions:** a `session_token` cookie resolved through the
//!   session store into a member.
//! - **Machine-to-machine:** an application token in `x-vondr-auth` plus the
//!   acting member in `x-vondr-user-id`. The member must belong to the same
//!   organization as the application.
//!
//! ## Restrictions
//!
//! Non-system members must arrive over HTTPS, on a host derived from their
//! organization's hostname and application subdomain labels, and from a
//! country allowed by the target application (when it has country rules).
//! Members with the `system` role bypass these checks.
//!
//! Every lookup failure resolves to a denial. Browser clients get a redirect,
//! API clients get a JSON error body.

pub mod cli;
pub mod gate;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
