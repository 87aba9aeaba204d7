//! Developer token resolution.
//!
//! Every backend request carries the developer token. It is resolved
//! through a chain:
//!
//! 1. `--token <token>`: explicit per-command override
//! 2. `MAPPER_TOKEN` env var: process/session level
//! 3. `~/.mapper/prefs.json`: stored by `mapper login`

use std::env;

use crate::storage::Storage;

/// Logged when no source yields a token.
pub const TOKEN_REQUIRED: &str = "no developer token: pass --token, \
    set MAPPER_TOKEN, or run `mapper login <token>`";

/// Resolve the developer token from the tiered resolution chain.
///
/// Returns `None` when no source yields a non-empty value.
pub fn resolve_token(explicit: Option<&str>, storage: &Storage) -> Option<String> {
    // 1. Explicit --token flag.
    if let Some(token) = explicit.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    // 2. MAPPER_TOKEN environment variable.
    if let Ok(token) = env::var("MAPPER_TOKEN")
        && !token.is_empty()
    {
        return Some(token);
    }

    // 3. Stored preference.
    match storage.load_prefs() {
        Ok(prefs) => prefs.token.filter(|t| !t.is_empty()),
        Err(e) => {
            log::warn!("failed to read preferences: {e}");
            None
        }
    }
}
