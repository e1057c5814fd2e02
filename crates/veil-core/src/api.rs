//! Snippet API request/response shapes (JSON, camelCase field names)
//!
//! ```text
//! POST /api/snippets        {encryptedText, algorithm}
//!                        -> {success: true, snippetId} | {success: false, error}
//! GET  /api/snippets/{id} -> {success: true, snippet: {algorithm, encryptedText, createdAt}}
//!                          | {success: false, error}   (404)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{VeilError, VeilResult};
use crate::types::Algorithm;

/// Path segment that precedes the snippet id in a share link.
pub const SHARE_PATH: &str = "/share/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnippetRequest {
    pub encrypted_text: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSnippetResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CreateSnippetResponse {
    pub fn ok(snippet_id: impl Into<String>) -> Self {
        Self {
            success: true,
            snippet_id: Some(snippet_id.into()),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            snippet_id: None,
            error: Some(message.into()),
        }
    }

    /// Decode into the created id, rejecting inconsistent responses.
    pub fn into_result(self) -> VeilResult<String> {
        match (self.success, self.snippet_id) {
            (true, Some(id)) if !id.is_empty() => Ok(id),
            (true, _) => Err(VeilError::InvalidSnippet(
                "success response without snippetId".into(),
            )),
            (false, _) => Err(VeilError::Storage(
                self.error.unwrap_or_else(|| "snippet creation failed".into()),
            )),
        }
    }
}

/// A snippet as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SnippetBody {
    pub algorithm: String,
    pub encrypted_text: String,
    /// Unix timestamp (seconds)
    pub created_at: u64,
}

impl SnippetBody {
    /// Reject records that could not have been produced by a create call.
    pub fn validate(&self) -> VeilResult<()> {
        if self.encrypted_text.is_empty() {
            return Err(VeilError::InvalidSnippet("encryptedText is empty".into()));
        }
        let alg: Algorithm = self
            .algorithm
            .parse()
            .map_err(|_| VeilError::InvalidSnippet(format!("unknown algorithm '{}'", self.algorithm)))?;
        if !alg.is_cipher() {
            return Err(VeilError::InvalidSnippet(format!(
                "algorithm '{}' does not produce shareable ciphertext",
                self.algorithm
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSnippetResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<SnippetBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchSnippetResponse {
    pub fn ok(snippet: SnippetBody) -> Self {
        Self {
            success: true,
            snippet: Some(snippet),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            snippet: None,
            error: Some(message.into()),
        }
    }

    /// Decode into a validated snippet. Failure responses map to
    /// `SnippetNotFound`; malformed success responses to `InvalidSnippet`.
    pub fn into_result(self) -> VeilResult<SnippetBody> {
        if !self.success {
            return Err(VeilError::SnippetNotFound);
        }
        let snippet = self
            .snippet
            .ok_or_else(|| VeilError::InvalidSnippet("success response without snippet".into()))?;
        snippet.validate()?;
        Ok(snippet)
    }

    /// Parse a raw JSON response body and validate it.
    pub fn decode(body: &[u8]) -> VeilResult<SnippetBody> {
        let response: FetchSnippetResponse = serde_json::from_slice(body)
            .map_err(|e| VeilError::InvalidSnippet(format!("malformed response: {e}")))?;
        response.into_result()
    }
}

/// Build the share link for a snippet: `<base_url>/share/<id>`.
pub fn share_link(base_url: &str, snippet_id: &str) -> String {
    format!("{}{SHARE_PATH}{snippet_id}", base_url.trim_end_matches('/'))
}

/// Accept either a bare snippet id or a full share link and return the id.
///
/// Returns `None` when nothing usable remains after stripping.
pub fn extract_snippet_id(input: &str) -> Option<String> {
    let input = input.trim();
    let id = match input.find(SHARE_PATH) {
        Some(pos) => &input[pos + SHARE_PATH.len()..],
        None => input,
    };
    let id = id
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id.to_string())
    }
}
