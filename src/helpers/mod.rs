pub mod format;
pub mod validate;

pub use format::{format_duration, format_number};
pub use validate::{REDACTED_PASSWORD, host_from_uri, redact_uri_password, validate_mongodb_uri};
