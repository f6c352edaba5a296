use serde::Deserialize;

/// Server stats: the keys currently stored.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Stats {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Confirmation of a publish: the server-assigned or echoed index.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishResponse {
    pub index: String,
}
