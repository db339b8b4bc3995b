//! How well an existing binding's host serves a target host
//!
//! Higher is more specific. Zero means the binding does not serve the host
//! at all.

use super::model::SslFlags;

/// Exact host match
pub const EXACT: i32 = 100;

/// Exact binding host covered by a wildcard target
pub const WILDCARD_TARGET: i32 = 90;

/// Wildcard binding host at the same depth as the target
pub const WILDCARD_BINDING: i32 = 50;

/// Floor for deep wildcard matches, so they still beat the catch-all
pub const WILDCARD_BINDING_MIN: i32 = 11;

/// Empty-host catch-all binding
pub const CATCH_ALL: i32 = 10;

/// Score `existing_host` against `target_host`
///
/// Comparison is case-insensitive. An empty `existing_host` is a catch-all
/// and never serves a host that needs SNI routing.
pub fn fits(existing_host: &str, target_host: &str, flags: SslFlags) -> i32 {
    let existing = existing_host.trim().to_ascii_lowercase();
    let target = target_host.trim().to_ascii_lowercase();

    if existing.is_empty() {
        return if flags.contains(SslFlags::SNI) { 0 } else { CATCH_ALL };
    }

    if existing == target {
        return EXACT;
    }

    match (existing.strip_prefix("*."), target.strip_prefix("*.")) {
        (Some(suffix), None) => {
            if !target.ends_with(&format!(".{suffix}")) {
                return 0;
            }
            let depth = labels(&target) - labels(&existing);
            (WILDCARD_BINDING - depth).clamp(WILDCARD_BINDING_MIN, WILDCARD_BINDING)
        }
        (None, Some(suffix)) => {
            if existing.ends_with(&format!(".{suffix}"))
                && labels(&existing) == labels(suffix) + 1
            {
                WILDCARD_TARGET
            } else {
                0
            }
        }
        _ => 0,
    }
}

fn labels(host: &str) -> i32 {
    host.split('.').count() as i32
}
