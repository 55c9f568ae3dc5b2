//! Token payload codec
//!
//! A session token travels as `{class_id, token}`, either inside a scannable
//! link (`{base}/{class_id}?token={token}`) or as text typed by hand
//! (`{class_id}:{token}`, `{class_id}/{token}` or `{class_id} {token}`).
//! Both forms decode to the same `ScanPayload`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("token pattern is valid"));

/// Error types for payload decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Scanned code is empty")]
    Empty,

    #[error("Malformed code: {0}")]
    Malformed(String),

    #[error("Invalid class identifier: {0}")]
    InvalidClassId(String),

    #[error("Code carries no session token")]
    MissingToken,

    #[error("Invalid session token: {0}")]
    InvalidToken(String),
}

/// Decoded attendance code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    pub class_id: i64,
    pub token: String,
}

impl ScanPayload {
    /// Decode a scanned link or a manually typed code
    pub fn parse(input: &str) -> Result<Self, PayloadError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PayloadError::Empty);
        }

        if input.contains("://") {
            return Self::parse_uri(input);
        }

        let split = input
            .char_indices()
            .find(|(_, c)| *c == ':' || *c == '/' || c.is_whitespace());
        let Some((idx, sep)) = split else {
            return Err(PayloadError::MissingToken);
        };

        let class_part = &input[..idx];
        let token_part = input[idx + sep.len_utf8()..]
            .trim_start_matches(|c: char| c == ':' || c == '/' || c.is_whitespace())
            .trim_end();
        Ok(Self {
            class_id: parse_class_id(class_part)?,
            token: check_token(token_part)?,
        })
    }

    fn parse_uri(input: &str) -> Result<Self, PayloadError> {
        let url = Url::parse(input).map_err(|e| PayloadError::Malformed(e.to_string()))?;

        let class_part = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| PayloadError::InvalidClassId(String::new()))?;
        let class_id = parse_class_id(class_part)?;

        let token = url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .ok_or(PayloadError::MissingToken)?;

        Ok(Self {
            class_id,
            token: check_token(&token)?,
        })
    }
}

fn parse_class_id(raw: &str) -> Result<i64, PayloadError> {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(PayloadError::InvalidClassId(raw.to_string())),
    }
}

fn check_token(raw: &str) -> Result<String, PayloadError> {
    if raw.is_empty() {
        return Err(PayloadError::MissingToken);
    }
    if !TOKEN_PATTERN.is_match(raw) {
        return Err(PayloadError::InvalidToken(raw.to_string()));
    }
    Ok(raw.to_string())
}

/// Builds the link and manual code for an issued token
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    base: Url,
}

impl PayloadCodec {
    /// `base` must be able to carry path segments (http, https, custom app schemes with a host)
    pub fn new(base: Url) -> Result<Self, PayloadError> {
        if base.cannot_be_a_base() {
            return Err(PayloadError::Malformed(format!(
                "link base '{}' cannot carry a path",
                base
            )));
        }
        Ok(Self { base })
    }

    /// `{base}/{class_id}?token={token}`
    pub fn to_uri(&self, class_id: i64, token: &str) -> String {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&class_id.to_string());
        }
        url.query_pairs_mut().append_pair("token", token);
        url.into()
    }

    /// Text form for manual entry
    pub fn to_manual_code(&self, class_id: i64, token: &str) -> String {
        format!("{}:{}", class_id, token)
    }
}
