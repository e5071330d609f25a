//! Backend wire types and the response-unwrapping boundary.
//!
//! The workflow backend is reached through webhook endpoints that all share
//! one convention: the request body is JSON carrying `user_id` and the raw
//! host session token (`init_data`), and the response is either a bare JSON
//! object or the same object wrapped in a single-element array. Everything
//! that crosses that boundary goes through [`parse_json`] or
//! [`parse_generation`] so the rest of the core never sees the envelope.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::image_processing::CompressedPhoto;
use crate::modes::{MediaKind, Mode, ModeOptions, PromptUse};
use crate::{AppError, ErrorKind, SessionContext};

/// Where the core sends its requests. Provided by the shell at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Webhook base, e.g. `https://flows.example.com/webhook`.
    pub api_base: String,
    /// Optional upload microservice base. When absent, photos are inlined
    /// as base64 in the generation request instead.
    pub upload_base: Option<String>,
    /// Bot username, used to compose referral deep links.
    pub bot_name: String,
}

impl ApiConfig {
    /// Joins a path onto the webhook base, validating the result.
    pub fn endpoint(&self, path: &str) -> Result<String, AppError> {
        let joined = format!("{}/{}", self.api_base.trim_end_matches('/'), path);
        Url::parse(&joined)
            .map(|url| url.to_string())
            .map_err(|e| {
                AppError::new(ErrorKind::InvalidState, "Backend address is not configured")
                    .with_internal(format!("bad endpoint {joined}: {e}"))
            })
    }

    /// Full URL of the photo upload endpoint, if uploads are configured.
    pub fn upload_endpoint(&self) -> Option<Result<String, AppError>> {
        let base = self.upload_base.as_deref()?.trim_end_matches('/');
        let joined = format!("{base}/upload-photo");
        Some(Url::parse(&joined).map(|url| url.to_string()).map_err(|e| {
            AppError::new(ErrorKind::InvalidState, "Upload service is misconfigured")
                .with_internal(format!("bad upload endpoint {joined}: {e}"))
        }))
    }

    /// Referral deep link for the given user.
    #[must_use]
    pub fn referral_link(&self, user_id: i64) -> String {
        format!("https://t.me/{}?start=ref_{user_id}", self.bot_name)
    }
}

/// Strips the single-element-array envelope some workflow nodes add.
#[must_use]
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Array(mut items) if !items.is_empty() => items.remove(0),
        other => other,
    }
}

/// Detects the structured business-error shape `{"error": ..., "message": ...}`.
///
/// `error` may be a boolean flag or a machine-readable code string. Business
/// errors are final and never retried.
#[must_use]
pub fn business_error(value: &Value) -> Option<AppError> {
    let error = value.get("error")?;
    let code = match error {
        Value::Null | Value::Bool(false) => return None,
        Value::Bool(true) => None,
        Value::String(code) => Some(code.as_str()),
        _ => None,
    };
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("The request was rejected");
    let kind = match code {
        Some("insufficient_balance") => ErrorKind::InsufficientBalance,
        Some("access_denied") | Some("invalid_password") => ErrorKind::AccessDenied,
        Some("not_found") | Some("user_not_found") => ErrorKind::NotFound,
        Some("blocked") => ErrorKind::Blocked,
        _ => ErrorKind::Rejected,
    };
    Some(AppError::new(kind, message).with_internal(value.to_string()))
}

/// Parses a backend response body into `T`, unwrapping the envelope and
/// surfacing business errors first.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "The server sent an unreadable reply")
            .with_internal(format!("invalid json: {e}"))
    })?;
    let value = unwrap_envelope(value);
    if let Some(err) = business_error(&value) {
        return Err(err);
    }
    serde_json::from_value(value).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "The server sent an unexpected reply")
            .with_internal(format!("shape mismatch: {e}"))
    })
}

/// What a successful generation response resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GenerationOutcome {
    /// The backend returned a downloadable media URL.
    Media { media: MediaKind, url: String },
    /// The backend delivered the result to the user's chat instead.
    SentToChat,
}

/// Parses a 2xx generation response into its three-way outcome.
pub fn parse_generation(body: &[u8], expected: MediaKind) -> Result<GenerationOutcome, AppError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        AppError::new(ErrorKind::Deserialization, "The server sent an unreadable reply")
            .with_internal(format!("invalid json: {e}"))
    })?;
    let value = unwrap_envelope(value);
    if let Some(err) = business_error(&value) {
        return Err(err);
    }
    if value
        .get("sent_to_chat")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Ok(GenerationOutcome::SentToChat);
    }
    if let Some(url) = extract_media_url(&value, expected) {
        return Ok(GenerationOutcome::Media {
            media: expected,
            url,
        });
    }
    Err(
        AppError::new(ErrorKind::Deserialization, "The server reply had no result in it")
            .with_internal(format!("no media url in {value}")),
    )
}

fn extract_media_url(value: &Value, expected: MediaKind) -> Option<String> {
    let direct = match expected {
        MediaKind::Image => value
            .get("image_url")
            .or_else(|| value.get("images").and_then(|imgs| imgs.get(0)?.get("url"))),
        MediaKind::Video => value.get("video_url"),
    };
    direct
        .or_else(|| value.get("result_url"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Body fields every authenticated call carries.
#[must_use]
pub fn base_payload(session: &SessionContext) -> Value {
    json!({
        "user_id": session.user_id,
        "init_data": session.init_data,
    })
}

/// One photo as it travels in a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoPayload {
    /// Public URL produced by the upload microservice.
    Url(String),
    /// Inlined bytes, used when no upload service is configured.
    Inline { data: Vec<u8>, mime_type: String },
}

impl PhotoPayload {
    fn to_value(&self) -> Value {
        match self {
            Self::Url(url) => json!(url),
            Self::Inline { data, mime_type } => json!({
                "photo_base64": BASE64.encode(data),
                "mime_type": mime_type,
            }),
        }
    }
}

/// Fully assembled generation call, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub request_id: String,
    pub mode: Mode,
    pub photos: Vec<PhotoPayload>,
    pub prompt: String,
    pub style: Option<String>,
    pub options: ModeOptions,
}

impl GenerationRequest {
    /// Request body for this mode's endpoint. Photos stay in slot order.
    #[must_use]
    pub fn to_body(&self, session: &SessionContext) -> Value {
        let spec = self.mode.spec();
        let mut map = serde_json::Map::new();
        map.insert("user_id".into(), json!(session.user_id));
        map.insert("init_data".into(), json!(session.init_data));
        map.insert("request_id".into(), json!(self.request_id));
        map.insert("mode".into(), json!(self.mode.as_str()));

        if spec.uses_photos() {
            let photos: Vec<Value> = self.photos.iter().map(PhotoPayload::to_value).collect();
            match self.mode {
                Mode::StyleTransfer => {
                    // First slot is the subject, the rest are style references.
                    if let Some((subject, references)) = photos.split_first() {
                        map.insert("photo".into(), subject.clone());
                        map.insert("reference_photos".into(), json!(references));
                    }
                    map.insert("resolution".into(), json!(self.options.resolution.as_str()));
                }
                _ if spec.max_photos > 1 => {
                    map.insert("photos".into(), json!(photos));
                }
                _ => {
                    if let Some(photo) = photos.first() {
                        map.insert("photo".into(), photo.clone());
                    }
                }
            }
        }

        if self.mode == Mode::PhotoToVideo {
            map.insert("duration".into(), json!(self.options.duration.as_str()));
            map.insert("quality".into(), json!(self.options.quality.as_str()));
            map.insert("sound".into(), json!(self.options.sound));
            map.insert("aspect_ratio".into(), json!(self.options.aspect.as_str()));
        }

        if spec.prompt != PromptUse::Unused && !self.prompt.trim().is_empty() {
            map.insert("prompt".into(), json!(self.prompt));
        }
        if let Some(style) = &self.style {
            map.insert("style".into(), json!(style));
        }
        Value::Object(map)
    }
}

/// Upload microservice request body for one compressed photo.
#[must_use]
pub fn upload_body(photo: &CompressedPhoto, file_name: &str) -> Value {
    json!({
        "photo_base64": BASE64.encode(&photo.data),
        "mime_type": photo.mime_type,
        "file_name": file_name,
    })
}

/// Upload microservice reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub file_url: String,
}

/// `create-invoice` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceResponse {
    pub invoice_url: String,
}

/// One entry in the recent-partners list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentReferral {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default = "default_level")]
    pub level: u8,
}

fn default_level() -> u8 {
    1
}

/// Five-level partner programme statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralStats {
    #[serde(default)]
    pub total_partners: u64,
    #[serde(default)]
    pub total_earnings: u64,
    #[serde(default)]
    pub structure_turnover: u64,
    #[serde(default)]
    pub l1_count: u64,
    #[serde(default)]
    pub l2_count: u64,
    #[serde(default)]
    pub l3_count: u64,
    #[serde(default)]
    pub l4_count: u64,
    #[serde(default)]
    pub l5_count: u64,
    #[serde(default)]
    pub l1_earnings: u64,
    #[serde(default)]
    pub l2_earnings: u64,
    #[serde(default)]
    pub l3_earnings: u64,
    #[serde(default)]
    pub l4_earnings: u64,
    #[serde(default)]
    pub l5_earnings: u64,
    #[serde(default)]
    pub recent_referrals: Vec<RecentReferral>,
}

impl ReferralStats {
    /// (count, earnings) for levels 1 through 5.
    #[must_use]
    pub fn level(&self, level: u8) -> (u64, u64) {
        match level {
            1 => (self.l1_count, self.l1_earnings),
            2 => (self.l2_count, self.l2_earnings),
            3 => (self.l3_count, self.l3_earnings),
            4 => (self.l4_count, self.l4_earnings),
            5 => (self.l5_count, self.l5_earnings),
            _ => (0, 0),
        }
    }
}
