use reqwest::{
    Client as ReqwestClient, Method,
    header::{HeaderMap, HeaderValue},
};
use serde_json::Value;
use url::Url;

use super::types::{PublishRequest, PublishResponse, Stats};
use crate::Result;
use crate::codec;
use crate::error::Error;
use crate::types::{Entry, Mode};

/// HTTP client for the keymirror fallback API.
///
/// # Example
///
/// ```no_run
/// use keymirror_client_sdk::rest::Client;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::new("http://localhost:8880")?;
///
/// let stats = client.stats().await?;
/// println!("stored keys: {:?}", stats.keys);
///
/// let entry = client.get_single("box").await?;
/// println!("box = {:?}", entry.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    /// Creates a new fallback client for the given host URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the host URL is invalid or the HTTP client fails to
    /// build.
    pub fn new(host: &str) -> Result<Client> {
        let mut headers = HeaderMap::new();

        headers.insert("User-Agent", HeaderValue::from_static("keymirror_client_sdk"));
        headers.insert("Accept", HeaderValue::from_static("*/*"));
        headers.insert("Connection", HeaderValue::from_static("keep-alive"));
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        Ok(Self {
            host: Url::parse(host)?,
            client,
        })
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// List the keys currently stored on the server.
    pub async fn stats(&self) -> Result<Stats> {
        let request = self
            .client
            .request(Method::GET, self.host.as_str())
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Read the single document stored under `key`.
    ///
    /// The entry's `data` field arrives Base64-wrapped and is decoded before
    /// being returned.
    pub async fn get_single(&self, key: &str) -> Result<Entry> {
        let document = self.get_document(Mode::Single, key).await?;
        Ok(serde_json::from_value(document)?)
    }

    /// Read every document whose key matches `pattern`.
    ///
    /// `*` matches one key segment at any depth, e.g. `box/*/things/*`.
    pub async fn get_multi(&self, pattern: &str) -> Result<Vec<Entry>> {
        let document = self.get_document(Mode::Multi, pattern).await?;
        Ok(serde_json::from_value(document)?)
    }

    async fn get_document(&self, mode: Mode, key: &str) -> Result<Value> {
        let request = self
            .client
            .request(Method::GET, format!("{}r/{mode}/{key}", self.host))
            .build()?;

        let raw: Value = crate::request(&self.client, request).await?;
        codec::decode_document(mode, raw)
    }

    /// Write `data` under `key`, returning the server-assigned or confirmed
    /// index.
    ///
    /// Publishing to a wildcard key in [`Mode::Multi`] omits the index and
    /// lets the server pick one; pass `index` to address an existing entry.
    pub async fn publish(
        &self,
        mode: Mode,
        key: &str,
        data: &Value,
        index: Option<&str>,
    ) -> Result<String> {
        let body = PublishRequest {
            index: index.map(str::to_owned),
            data: codec::encode_payload(data),
        };
        let request = self
            .client
            .request(Method::POST, format!("{}r/{mode}/{key}", self.host))
            .json(&body)
            .build()?;

        let response: PublishResponse = crate::request(&self.client, request).await?;
        Ok(response.index)
    }

    /// Delete the document(s) stored under `key` (a key or a pattern).
    pub async fn unpublish(&self, key: &str) -> Result<()> {
        let path = format!("r/{key}");
        let request = self
            .client
            .request(Method::DELETE, format!("{}{path}", self.host))
            .build()?;

        let response = self.client.execute(request).await?;
        let status_code = response.status();
        if !status_code.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::status(status_code, Method::DELETE, path, message));
        }
        Ok(())
    }
}
