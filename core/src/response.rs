//! Response classification and error translation.
//!
//! # Design
//! `check_status` is the single place where a response becomes either a
//! success or an `IdsError`. Non-2xx bodies are read in full and decoded as
//! `{"code": ..., "message": ...}`; when that fails, the raw body text is kept
//! as the message of an `InternalException` so nothing the server said is
//! lost. The remaining helpers materialize 2xx bodies into the scalar shape
//! each operation declares.

use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::error::{ErrorKind, IdsError};
use crate::http::HttpResponse;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Pass 2xx responses through untouched; translate anything else into an error.
pub fn check_status(mut response: HttpResponse) -> Result<HttpResponse, IdsError> {
    if response.is_success() {
        return Ok(response);
    }

    let raw = response.body.read_to_text().map_err(|e| {
        IdsError::internal(format!(
            "HTTP status {} with unreadable body: {e}",
            response.status
        ))
    })?;

    let err = translate_error(&raw);
    warn!(status = response.status, kind = %err.kind, "service reported an error");
    Err(err)
}

/// Decode an error body, falling back to an internal error holding `raw`.
pub fn translate_error(raw: &str) -> IdsError {
    match serde_json::from_str::<ErrorBody>(raw) {
        Ok(body) => IdsError::new(ErrorKind::from_code(&body.code), body.message),
        Err(_) => IdsError::internal(raw.to_string()),
    }
}

/// Read a success body as trimmed text.
pub fn read_text(response: HttpResponse) -> Result<String, IdsError> {
    let mut body = response.body;
    Ok(body.read_to_text()?.trim().to_string())
}

pub fn read_bool(response: HttpResponse) -> Result<bool, IdsError> {
    let text = read_text(response)?;
    match text.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(IdsError::internal(format!(
            "Web service call did not return a valid boolean: {other}"
        ))),
    }
}

/// Read a success body as a decimal number.
pub fn read_number<T: FromStr>(response: HttpResponse) -> Result<T, IdsError> {
    let text = read_text(response)?;
    text.parse().map_err(|_| {
        IdsError::internal(format!("Web service call did not return a valid number: {text}"))
    })
}

pub fn read_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, IdsError> {
    let text = read_text(response)?;
    serde_json::from_str(&text)
        .map_err(|e| IdsError::internal(format!("unexpected response {text}: {e}")))
}
