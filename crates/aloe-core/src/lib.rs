pub mod cluster;
pub mod config;
pub mod error;
pub mod hash;
pub mod mask;
pub mod normalize;
pub mod summary;
pub mod types;

pub use error::{AloeError, ErrorKind, Issue};
pub use types::*;

/// Current UTC time as RFC 3339.
pub fn now_rfc3339() -> String {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
