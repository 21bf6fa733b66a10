//! Correlation ID resolution for request/response snapshots.

use uuid::Uuid;

/// Outcome of resolving the correlation header for one phase call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: String,
    pub minted: bool,
}

/// Generate a new correlation ID (UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Use the inbound header value when it has any non-whitespace content,
/// otherwise mint a fresh id.
///
/// The header value is returned as received, surrounding whitespace included.
pub fn resolve(header_value: Option<&str>, mint: impl FnOnce() -> String) -> Resolution {
    match header_value {
        Some(value) if !value.trim().is_empty() => Resolution {
            id: value.to_string(),
            minted: false,
        },
        _ => Resolution {
            id: mint(),
            minted: true,
        },
    }
}
