//! Request and response types for the HTTP fallback.

pub mod request;
pub mod response;

pub use request::PublishRequest;
pub use response::{PublishResponse, Stats};
