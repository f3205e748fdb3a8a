//! Common utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration from `sslmode`

pub mod tls;

pub use tls::TlsBuilder;

/// `name`, `name(p)` or `name(p,s)`.
pub(crate) fn with_args(name: &str, precision: Option<u32>, scale: Option<u32>) -> String {
    match (precision, scale) {
        (Some(p), Some(s)) => format!("{}({},{})", name, p, s),
        (Some(p), None) => format!("{}({})", name, p),
        _ => name.to_string(),
    }
}

/// Unique suffix for temporary object names.
pub(crate) fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}
