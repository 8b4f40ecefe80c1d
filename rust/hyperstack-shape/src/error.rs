use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload reported by the sync client for a shape.
///
/// This crate never constructs these on its own behalf; whatever the client
/// reports is carried through to [`UseShapeResult::error`](crate::UseShapeResult)
/// unchanged.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl FetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            url: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_is_message() {
        let err = FetchError::new("Error fetching data").with_status(500);
        assert_eq!(err.to_string(), "Error fetching data");
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        let err = FetchError::new("Error fetching data");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"message": "Error fetching data"})
        );
    }

    #[test]
    fn test_deserialize_from_payload() {
        let err: FetchError = serde_json::from_value(json!({
            "message": "bad gateway",
            "status": 502,
            "details": {"retry": true}
        }))
        .unwrap();
        assert_eq!(err.status, Some(502));
        assert_eq!(err.details, Some(json!({"retry": true})));
        assert!(err.url.is_none());
    }

    #[test]
    fn test_builders_fill_optional_fields() {
        let err = FetchError::new("not found")
            .with_status(404)
            .with_url("http://localhost:3000/v1/shape?table=foo")
            .with_details(json!({"table": "foo"}));

        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({
                "message": "not found",
                "status": 404,
                "url": "http://localhost:3000/v1/shape?table=foo",
                "details": {"table": "foo"}
            })
        );
    }
}
