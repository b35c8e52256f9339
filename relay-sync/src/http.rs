//! HTTP sender adapters for the two supported downstream platforms.
//!
//! - [`BotApiSender`] — Bot-API style endpoint. Supports edit and delete;
//!   media files are removed after delivery.
//! - [`WebhookSender`] — generic relay endpoint. Send-only; media files are
//!   retained after delivery.
//!
//! Both speak the same response shape (see [`SendResult`]). Media uploads
//! stream the file through a `multipart/form-data` body built by the
//! `multipart` crate.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use multipart::client::lazy::{Multipart, PreparedFields};
use relay_core::MediaKind;
use serde_json::{json, Value};

use crate::error::SendError;
use crate::sender::{ApiResponse, Capabilities, SendResult, SenderAdapter};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Shared request plumbing
// ---------------------------------------------------------------------------

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

fn read_response(
    outcome: Result<ureq::Response, ureq::Error>,
    operation: &'static str,
) -> Result<SendResult, SendError> {
    // Non-2xx responses still carry the JSON `description` we want to log.
    let response = match outcome {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => {
            return Err(SendError::Http {
                operation,
                message: err.to_string(),
            })
        }
    };
    let body: ApiResponse = response
        .into_json()
        .map_err(|err| SendError::InvalidResponse {
            operation,
            message: err.to_string(),
        })?;
    Ok(body.into())
}

fn post_json(
    agent: &ureq::Agent,
    url: &str,
    operation: &'static str,
    payload: Value,
) -> Result<SendResult, SendError> {
    read_response(agent.post(url).send_json(payload), operation)
}

/// Name sent in the `filename` parameter, with quotes, backslashes and
/// control characters replaced.
pub(crate) fn upload_file_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' | '\r' | '\n' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

fn open_media(path: &Path) -> Result<File, SendError> {
    File::open(path).map_err(|source| SendError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Text fields in order, then the file under `field`.
pub(crate) fn media_form<'d>(
    fields: &[(&'static str, &'d str)],
    field: &'static str,
    path: &Path,
    file: impl Read + 'd,
) -> Result<PreparedFields<'d>, SendError> {
    let mut form = Multipart::new();
    for (name, value) in fields {
        form.add_text(*name, *value);
    }
    form.add_stream(field, file, Some(upload_file_name(path)), None);
    form.prepare().map_err(|err| SendError::Io {
        path: path.to_path_buf(),
        source: err.error,
    })
}

fn post_multipart(
    agent: &ureq::Agent,
    url: &str,
    operation: &'static str,
    form: PreparedFields<'_>,
) -> Result<SendResult, SendError> {
    let mut request = agent.post(url).set(
        "Content-Type",
        &format!("multipart/form-data; boundary={}", form.boundary()),
    );
    if let Some(len) = form.content_len() {
        request = request.set("Content-Length", &len.to_string());
    }
    read_response(request.send(form), operation)
}

// ---------------------------------------------------------------------------
// Bot API platform
// ---------------------------------------------------------------------------

/// Connection settings for [`BotApiSender`].
#[derive(Debug, Clone)]
pub struct BotApiConfig {
    pub base_url: String,
    pub token: String,
    pub chat_id: String,
    pub timeout: Duration,
}

impl BotApiConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            chat_id: chat_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Bot-API style platform: `<base>/bot<token>/<method>`.
pub struct BotApiSender {
    agent: ureq::Agent,
    config: BotApiConfig,
}

/// Bot API upload method and form field for a media kind.
pub fn bot_api_media_method(kind: MediaKind) -> (&'static str, &'static str) {
    match kind {
        MediaKind::Photo | MediaKind::WebPagePhoto => ("sendPhoto", "photo"),
        MediaKind::Video => ("sendVideo", "video"),
        MediaKind::Voice => ("sendVoice", "voice"),
        MediaKind::Document => ("sendDocument", "document"),
    }
}

impl BotApiSender {
    pub const PLATFORM: &'static str = "botapi";

    pub fn new(config: BotApiConfig) -> Self {
        Self {
            agent: build_agent(config.timeout),
            config,
        }
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.base_url.trim_end_matches('/'),
            self.config.token
        )
    }

    fn pin(&self, message_id: Option<&str>) -> Result<(), SendError> {
        let Some(message_id) = message_id else {
            return Ok(());
        };
        post_json(
            &self.agent,
            &self.url("pinChatMessage"),
            "pinChatMessage",
            json!({
                "chat_id": self.config.chat_id,
                "message_id": message_id,
                "disable_notification": true,
            }),
        )?
        .into_outbound("pinChatMessage")
        .map(|_| ())
    }
}

impl SenderAdapter for BotApiSender {
    fn platform(&self) -> &str {
        Self::PLATFORM
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            edit: true,
            delete: true,
            retain_media: false,
        }
    }

    fn send_text(&self, text: &str, pin: bool) -> Result<Option<String>, SendError> {
        let id = post_json(
            &self.agent,
            &self.url("sendMessage"),
            "sendMessage",
            json!({ "chat_id": self.config.chat_id, "text": text }),
        )?
        .into_outbound("sendMessage")?;
        if pin {
            self.pin(id.as_deref())?;
        }
        Ok(id)
    }

    fn send_media(
        &self,
        path: &Path,
        caption: Option<&str>,
        pin: bool,
    ) -> Result<Option<String>, SendError> {
        let (method, field) = bot_api_media_method(MediaKind::from_path(path));
        let file = open_media(path)?;
        let mut fields = vec![("chat_id", self.config.chat_id.as_str())];
        fields.extend(caption.map(|c| ("caption", c)));
        let form = media_form(&fields, field, path, file)?;
        let id = post_multipart(&self.agent, &self.url(method), method, form)?.into_outbound(method)?;
        if pin {
            self.pin(id.as_deref())?;
        }
        Ok(id)
    }

    fn edit_text(&self, outbound_id: &str, text: &str) -> Result<(), SendError> {
        post_json(
            &self.agent,
            &self.url("editMessageText"),
            "editMessageText",
            json!({
                "chat_id": self.config.chat_id,
                "message_id": outbound_id,
                "text": text,
            }),
        )?
        .into_outbound("editMessageText")
        .map(|_| ())
    }

    fn edit_caption(&self, outbound_id: &str, caption: &str) -> Result<(), SendError> {
        post_json(
            &self.agent,
            &self.url("editMessageCaption"),
            "editMessageCaption",
            json!({
                "chat_id": self.config.chat_id,
                "message_id": outbound_id,
                "caption": caption,
            }),
        )?
        .into_outbound("editMessageCaption")
        .map(|_| ())
    }

    fn delete_message(&self, outbound_id: &str) -> Result<(), SendError> {
        post_json(
            &self.agent,
            &self.url("deleteMessage"),
            "deleteMessage",
            json!({ "chat_id": self.config.chat_id, "message_id": outbound_id }),
        )?
        .into_outbound("deleteMessage")
        .map(|_| ())
    }

    fn test_connection(&self) -> Result<(), SendError> {
        read_response(self.agent.get(&self.url("getMe")).call(), "getMe")?
            .into_outbound("getMe")
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Webhook platform
// ---------------------------------------------------------------------------

/// Connection settings for [`WebhookSender`].
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub chat_id: String,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chat_id: chat_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Send-only relay endpoint: `<url>/sendMessage`, `<url>/sendMedia`,
/// `<url>/ping`.
pub struct WebhookSender {
    agent: ureq::Agent,
    config: WebhookConfig,
}

impl WebhookSender {
    pub const PLATFORM: &'static str = "webhook";

    pub fn new(config: WebhookConfig) -> Self {
        Self {
            agent: build_agent(config.timeout),
            config,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{method}", self.config.url.trim_end_matches('/'))
    }
}

impl SenderAdapter for WebhookSender {
    fn platform(&self) -> &str {
        Self::PLATFORM
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            edit: false,
            delete: false,
            retain_media: true,
        }
    }

    fn send_text(&self, text: &str, pin: bool) -> Result<Option<String>, SendError> {
        post_json(
            &self.agent,
            &self.url("sendMessage"),
            "sendMessage",
            json!({ "chat_id": self.config.chat_id, "text": text, "pin": pin }),
        )?
        .into_outbound("sendMessage")
    }

    fn send_media(
        &self,
        path: &Path,
        caption: Option<&str>,
        pin: bool,
    ) -> Result<Option<String>, SendError> {
        let kind = MediaKind::from_path(path);
        let file = open_media(path)?;
        let mut fields = vec![
            ("chat_id", self.config.chat_id.as_str()),
            ("kind", kind.file_prefix()),
            ("pin", if pin { "true" } else { "false" }),
        ];
        fields.extend(caption.map(|c| ("caption", c)));
        let form = media_form(&fields, "file", path, file)?;
        post_multipart(&self.agent, &self.url("sendMedia"), "sendMedia", form)?
            .into_outbound("sendMedia")
    }

    fn test_connection(&self) -> Result<(), SendError> {
        read_response(self.agent.get(&self.url("ping")).call(), "ping")?
            .into_outbound("ping")
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_form(mut form: PreparedFields<'_>) -> (String, Vec<u8>) {
        let boundary = form.boundary().to_string();
        let mut body = Vec::new();
        form.read_to_end(&mut body).unwrap();
        (boundary, body)
    }

    #[test]
    fn media_form_carries_binary_payload_and_fields() {
        let payload = [0u8, 159, 146, 150, b'\r', b'\n'];
        let form = media_form(
            &[("chat_id", "-100"), ("caption", "line one\r\nline two")],
            "photo",
            Path::new("/media/photo_1.jpg"),
            &payload[..],
        )
        .unwrap();
        let (boundary, body) = read_form(form);

        assert!(body.windows(payload.len()).any(|w| w == payload));
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains(&format!("--{boundary}--")));
        assert!(text.contains("name=\"chat_id\""));
        assert!(text.contains("line one\r\nline two"));
        assert!(text.contains("filename=\"photo_1.jpg\""));
    }

    #[test]
    fn hostile_file_name_cannot_inject_headers() {
        let path = Path::new("/media/a\"; name=\"chat_id\r\nX-Evil: 1.jpg");
        assert_eq!(
            upload_file_name(path),
            "a_; name=_chat_id__X-Evil: 1.jpg"
        );

        let form = media_form(&[("chat_id", "-100")], "document", path, &b"doc"[..]).unwrap();
        let (_, body) = read_form(form);
        let text = String::from_utf8_lossy(&body);
        assert!(!text.contains("\r\nX-Evil"));
        assert_eq!(text.matches("name=\"chat_id\"").count(), 1);
    }

    #[test]
    fn nameless_path_uploads_as_file() {
        assert_eq!(upload_file_name(Path::new("/")), "file");
    }

    #[test]
    fn bot_api_method_per_media_kind() {
        assert_eq!(bot_api_media_method(MediaKind::WebPagePhoto), ("sendPhoto", "photo"));
        assert_eq!(bot_api_media_method(MediaKind::Voice), ("sendVoice", "voice"));
        assert_eq!(
            bot_api_media_method(MediaKind::Document),
            ("sendDocument", "document")
        );
    }

    #[test]
    fn bot_api_urls_include_token() {
        let sender = BotApiSender::new(BotApiConfig::new("https://api.example.org/", "T0K", "-1"));
        assert_eq!(sender.url("getMe"), "https://api.example.org/botT0K/getMe");
        assert!(sender.capabilities().tracks_mutations());
    }

    #[test]
    fn webhook_is_send_only_and_retains_media() {
        let sender = WebhookSender::new(WebhookConfig::new("http://relay.local/hook/", "main"));
        assert_eq!(sender.url("sendMedia"), "http://relay.local/hook/sendMedia");
        let caps = sender.capabilities();
        assert!(!caps.tracks_mutations());
        assert!(caps.retain_media);
        assert!(matches!(
            sender.delete_message("1"),
            Err(SendError::Unsupported { .. })
        ));
    }

    #[test]
    fn missing_media_file_is_io_error() {
        let sender = WebhookSender::new(WebhookConfig::new("http://127.0.0.1:9", "main"));
        let err = sender
            .send_media(Path::new("/nonexistent/photo_1.jpg"), None, false)
            .unwrap_err();
        assert!(matches!(err, SendError::Io { .. }));
    }
}
