//! The neutral JSON envelope.
//!
//! `{status, message, data?, errorCode?, total?, headers?}`, where `data` is
//! always an array when present.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::ApiStatus;
use crate::error::{API_NOT_FOUND, INTERNAL_SERVICE_ERROR};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: ApiStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,

    /// Extra headers to set on the reply. Cleared once translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl ApiResponse {
    pub fn new(status: ApiStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::Ok, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ApiStatus::Error, message)
    }

    pub fn internal_error() -> Self {
        Self::error("There is an error, please try again later.").with_error_code(INTERNAL_SERVICE_ERROR)
    }

    pub fn not_found(method: &str, path: &str) -> Self {
        Self::new(
            ApiStatus::NotFound,
            format!("API Method/Path {} {} isn't found", method, path),
        )
        .with_error_code(API_NOT_FOUND)
    }

    /// Attach a list of items. Each item is serialized to JSON.
    pub fn with_data<T: Serialize>(mut self, items: Vec<T>) -> Self {
        let values = items
            .into_iter()
            .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
            .collect();
        self.data = Some(Value::Array(values));
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Decode the data array into typed items.
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Result<Vec<T>, serde_json::Error> {
        match &self.data {
            Some(v) => serde_json::from_value(v.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_omits_empty_fields() {
        let resp = ApiResponse::ok("fine");
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v, json!({"status": "OK", "message": "fine"}));
    }

    #[test]
    fn envelope_uses_camel_case() {
        let resp = ApiResponse::error("boom")
            .with_error_code("E1")
            .with_total(3)
            .with_data(vec![1, 2]);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["errorCode"], "E1");
        assert_eq!(v["total"], 3);
        assert_eq!(v["data"], json!([1, 2]));
    }

    #[test]
    fn decode_peer_envelope() {
        let raw = r#"{"status":"NOT_FOUND","message":"nope","errorCode":"API_NOT_FOUND"}"#;
        let resp: ApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.status, ApiStatus::NotFound);
        assert_eq!(resp.error_code.as_deref(), Some(API_NOT_FOUND));
        assert!(resp.data.is_none());
    }

    #[test]
    fn typed_data() {
        let resp = ApiResponse::ok("").with_data(vec!["a", "b"]);
        let items: Vec<String> = resp.data_as().unwrap();
        assert_eq!(items, vec!["a", "b"]);
    }
}
