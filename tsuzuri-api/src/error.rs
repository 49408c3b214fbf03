use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Field {0} must not be empty")]
    EmptyText(String),

    #[error("Field {field} is longer than {max} characters")]
    TextTooLong { field: String, max: usize },

    #[error("Object {0} does not exist")]
    NotFound(Uuid),

    #[error("Comment {0} cannot be replied to from here")]
    InvalidParent(Uuid),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::EmptyText(_) => StatusCode::BAD_REQUEST,
            Error::TextTooLong { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidParent(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a user name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::EmptyText(field) => json!({
                "message": "text field must not be empty",
                "type": "empty-text",
                "field": field,
            }),
            Error::TextTooLong { field, max } => json!({
                "message": "text field is too long",
                "type": "text-too-long",
                "field": field,
                "max": max,
            }),
            Error::NotFound(u) => json!({
                "message": "not found",
                "type": "not-found",
                "uuid": u,
            }),
            Error::InvalidParent(u) => json!({
                "message": "replied-to comment is not in this post",
                "type": "invalid-parent",
                "uuid": u,
            }),
        })
        .expect("serializing error")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let get_str = |field: &str| -> anyhow::Result<String> {
            data.get(field)
                .and_then(|s| s.as_str())
                .map(String::from)
                .ok_or_else(|| anyhow!("error contents has no string field {field:?}"))
        };
        let get_uuid = || -> anyhow::Result<Uuid> {
            Uuid::from_str(&get_str("uuid")?).context("parsing uuid field of error contents")
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(get_str("message").unwrap_or_default()),
                "permission-denied" => Error::PermissionDenied,
                "conflict-uuid" => Error::UuidAlreadyUsed(get_uuid()?),
                "conflict-name" => Error::NameAlreadyUsed(get_str("name")?),
                "null-byte" => Error::NullByteInString(get_str("string")?),
                "invalid-name" => Error::InvalidName(get_str("name")?),
                "empty-text" => Error::EmptyText(get_str("field")?),
                "text-too-long" => Error::TextTooLong {
                    field: get_str("field")?,
                    max: data
                        .get("max")
                        .and_then(|m| m.as_u64())
                        .ok_or_else(|| anyhow!("text-too-long error without a max"))?
                        as usize,
                },
                "not-found" => Error::NotFound(get_uuid()?),
                "invalid-parent" => Error::InvalidParent(get_uuid()?),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
