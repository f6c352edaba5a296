#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod codec;
pub mod error;
pub mod lifecycle;
pub mod patch;
pub mod rest;
pub mod sync;
pub mod types;
pub mod ws;

use serde::de::DeserializeOwned;

pub use crate::client::Client;
use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Execute an HTTP request and deserialize the JSON response body.
///
/// Non-2xx responses become [`error::Status`] errors carrying the method, path,
/// status code, and response body.
pub(crate) async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: reqwest::Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );
        return Err(Error::status(status_code, method, path, message));
    }

    Ok(response.json().await?)
}
