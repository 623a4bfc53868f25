//! Neutral response status and its native code mapping.
//!
//! ```text
//! Ok → 200   Invalid → 400   Unauthorized → 401   Forbidden → 403
//! NotFound → 404   Existed → 409   Error → 500   anything else → 400
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ApiStatus {
    #[default]
    Ok,
    Error,
    Invalid,
    Unauthorized,
    Forbidden,
    NotFound,
    Existed,
    /// A status received from a peer that is outside the vocabulary.
    Unknown(String),
}

impl ApiStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ApiStatus::Ok => "OK",
            ApiStatus::Error => "ERROR",
            ApiStatus::Invalid => "INVALID",
            ApiStatus::Unauthorized => "UNAUTHORIZED",
            ApiStatus::Forbidden => "FORBIDDEN",
            ApiStatus::NotFound => "NOT_FOUND",
            ApiStatus::Existed => "EXISTED",
            ApiStatus::Unknown(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "OK" => ApiStatus::Ok,
            "ERROR" => ApiStatus::Error,
            "INVALID" => ApiStatus::Invalid,
            "UNAUTHORIZED" => ApiStatus::Unauthorized,
            "FORBIDDEN" => ApiStatus::Forbidden,
            "NOT_FOUND" => ApiStatus::NotFound,
            "EXISTED" => ApiStatus::Existed,
            other => ApiStatus::Unknown(other.to_string()),
        }
    }

    /// Native status code used by both transports.
    pub fn code(&self) -> u16 {
        match self {
            ApiStatus::Ok => 200,
            ApiStatus::Invalid => 400,
            ApiStatus::Unauthorized => 401,
            ApiStatus::Forbidden => 403,
            ApiStatus::NotFound => 404,
            ApiStatus::Existed => 409,
            ApiStatus::Error => 500,
            ApiStatus::Unknown(_) => 400,
        }
    }

    /// Reverse of [`ApiStatus::code`] for statuses arriving over the binary transport.
    pub fn from_code(code: i32) -> Self {
        match code {
            200 => ApiStatus::Ok,
            400 => ApiStatus::Invalid,
            401 => ApiStatus::Unauthorized,
            403 => ApiStatus::Forbidden,
            404 => ApiStatus::NotFound,
            409 => ApiStatus::Existed,
            500 => ApiStatus::Error,
            other => ApiStatus::Unknown(other.to_string()),
        }
    }

    /// Status derived from an HTTP code when the body carries none.
    pub fn from_http_code(code: u16) -> Self {
        match code {
            500.. => ApiStatus::Error,
            404 => ApiStatus::NotFound,
            403 => ApiStatus::Forbidden,
            401 => ApiStatus::Unauthorized,
            409 => ApiStatus::Existed,
            400..=499 => ApiStatus::Invalid,
            _ => ApiStatus::Ok,
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ApiStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ApiStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ApiStatus::parse(&s))
    }
}
