use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized to read this thread")]
    NotAuthorized,

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotAuthorized => StatusCode::UNAUTHORIZED,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Fallback for error responses whose body could not be parsed
    pub fn from_status(status: http::StatusCode) -> Error {
        use http::StatusCode;
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Error::InvalidInput(format!("request rejected with status {status}"))
            }
            StatusCode::FORBIDDEN => Error::Forbidden,
            StatusCode::NOT_FOUND => Error::NotFound(format!("request returned status {status}")),
            StatusCode::UNAUTHORIZED => Error::NotAuthorized,
            _ => Error::Unavailable(format!("request failed with status {status}")),
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::InvalidInput(msg) => json!({
                "message": msg,
                "type": "invalid-input",
            }),
            Error::Forbidden => json!({
                "message": "forbidden",
                "type": "forbidden",
            }),
            Error::NotFound(what) => json!({
                "message": "not found",
                "type": "not-found",
                "what": what,
            }),
            Error::NotAuthorized => json!({
                "message": "not authorized",
                "type": "not-authorized",
            }),
            Error::Unavailable(msg) => json!({
                "message": msg,
                "type": "unavailable",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "invalid-input" => Error::InvalidInput(message()),
                "forbidden" => Error::Forbidden,
                "not-found" => Error::NotFound(String::from(
                    data.get("what")
                        .and_then(|w| w.as_str())
                        .ok_or_else(|| anyhow!("error is a not-found without a what"))?,
                )),
                "not-authorized" => Error::NotAuthorized,
                "unavailable" => Error::Unavailable(message()),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}
