//! Sender Adapter contract — the uniform surface a Platform Syncer uses to
//! talk to one downstream platform.
//!
//! Every call is synchronous from the syncer's point of view and every
//! non-success response is surfaced as an `Err`, since the syncer relies on
//! errors to trigger its fatal stop.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::SendError;

/// What a platform can do beyond plain sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// `edit_text` / `edit_caption` are implemented.
    pub edit: bool,
    /// `delete_message` is implemented.
    pub delete: bool,
    /// Media files are left on disk after delivery (only the record file is
    /// removed).
    pub retain_media: bool,
}

impl Capabilities {
    /// Platforms that can mutate already-sent messages track edits/deletes;
    /// the rest treat every processed id as permanently done.
    pub fn tracks_mutations(&self) -> bool {
        self.edit || self.delete
    }
}

/// Uniform response shape of every platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub ok: bool,
    pub outbound_id: Option<String>,
    pub error_message: Option<String>,
}

impl SendResult {
    /// Convert into the adapter return value, raising on `ok: false`.
    pub fn into_outbound(self, operation: &'static str) -> Result<Option<String>, SendError> {
        if self.ok {
            Ok(self.outbound_id)
        } else {
            Err(SendError::Rejected {
                operation,
                message: self
                    .error_message
                    .unwrap_or_else(|| "no description".to_string()),
            })
        }
    }
}

/// Wire shape shared by both HTTP platforms:
/// `{"ok": true, "result": {"message_id": 42}}` or
/// `{"ok": false, "description": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse {
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<ApiResponse> for SendResult {
    fn from(response: ApiResponse) -> Self {
        let outbound_id = response
            .result
            .as_ref()
            .and_then(|r| r.get("message_id"))
            .and_then(|id| match id {
                Value::Number(n) => Some(n.to_string()),
                Value::String(s) => Some(s.clone()),
                _ => None,
            });
        SendResult {
            ok: response.ok,
            outbound_id,
            error_message: response.description,
        }
    }
}

/// Thin per-platform client owned by a Platform Syncer.
pub trait SenderAdapter: Send {
    /// Platform name; also the prefix of its processed ledger file.
    fn platform(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Send a text message, returning the platform message id if any.
    fn send_text(&self, text: &str, pin: bool) -> Result<Option<String>, SendError>;

    /// Send one media file with an optional caption.
    fn send_media(
        &self,
        path: &Path,
        caption: Option<&str>,
        pin: bool,
    ) -> Result<Option<String>, SendError>;

    fn edit_text(&self, _outbound_id: &str, _text: &str) -> Result<(), SendError> {
        Err(SendError::Unsupported {
            operation: "editText",
        })
    }

    /// Edit the caption of a media message. Defaults to [`edit_text`] for
    /// platforms that do not distinguish the two.
    ///
    /// [`edit_text`]: SenderAdapter::edit_text
    fn edit_caption(&self, outbound_id: &str, caption: &str) -> Result<(), SendError> {
        self.edit_text(outbound_id, caption)
    }

    fn delete_message(&self, _outbound_id: &str) -> Result<(), SendError> {
        Err(SendError::Unsupported {
            operation: "deleteMessage",
        })
    }

    /// Startup connectivity check; an `Err` aborts the syncer before any loop starts.
    fn test_connection(&self) -> Result<(), SendError>;
}

impl<S: SenderAdapter + ?Sized> SenderAdapter for Box<S> {
    fn platform(&self) -> &str {
        (**self).platform()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    fn send_text(&self, text: &str, pin: bool) -> Result<Option<String>, SendError> {
        (**self).send_text(text, pin)
    }

    fn send_media(
        &self,
        path: &Path,
        caption: Option<&str>,
        pin: bool,
    ) -> Result<Option<String>, SendError> {
        (**self).send_media(path, caption, pin)
    }

    fn edit_text(&self, outbound_id: &str, text: &str) -> Result<(), SendError> {
        (**self).edit_text(outbound_id, text)
    }

    fn edit_caption(&self, outbound_id: &str, caption: &str) -> Result<(), SendError> {
        (**self).edit_caption(outbound_id, caption)
    }

    fn delete_message(&self, outbound_id: &str) -> Result<(), SendError> {
        (**self).delete_message(outbound_id)
    }

    fn test_connection(&self) -> Result<(), SendError> {
        (**self).test_connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_message_id_becomes_outbound_id() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"ok": true, "result": {"message_id": 42}}"#).unwrap();
        let result = SendResult::from(response);
        assert_eq!(result.outbound_id.as_deref(), Some("42"));
        assert_eq!(result.into_outbound("sendMessage").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn rejected_response_raises() {
        let response: ApiResponse =
            serde_json::from_str(r#"{"ok": false, "description": "chat not found"}"#).unwrap();
        let err = SendResult::from(response)
            .into_outbound("sendMessage")
            .unwrap_err();
        assert!(matches!(err, SendError::Rejected { .. }));
        assert!(err.to_string().contains("chat not found"));
    }

    #[test]
    fn ok_without_result_has_no_outbound_id() {
        let response: ApiResponse = serde_json::from_str(r#"{"ok": true, "result": true}"#).unwrap();
        assert_eq!(SendResult::from(response).outbound_id, None);
    }
}
