use serde::Serialize;

/// Body of a publish call.
///
/// `data` is the Base64-wrapped JSON payload; `index` is omitted when the
/// server assigns one (publishing to a wildcard key).
#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub data: String,
}
