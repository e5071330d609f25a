// lib.rs - AI Avatar Studio shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod admin;
pub mod api;
pub mod capabilities;
pub mod history;
pub mod image_processing;
pub mod modes;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use crux_core::{render::Render, App as CruxApp};

use crate::admin::{
    AdminStats, AudienceFilter, BroadcastDraft, BroadcastOutcome, RecipientPreview,
};
use crate::api::{ApiConfig, GenerationOutcome, ReferralStats};
use crate::history::HistoryCache;
use crate::image_processing::{CompressedPhoto, CompressionConfig, PhotoSlot};
use crate::modes::{
    check_affordability, compute_cost, Affordability, AspectRatio, FreeKey, MediaKind, Mode,
    ModeOptions, PromptUse, Resolution, VideoDuration, VideoQuality,
};

pub const STATUS_TIMEOUT_MS: u64 = 15_000;
pub const GENERATION_TIMEOUT_MS: u64 = 120_000;
pub const LONG_GENERATION_TIMEOUT_MS: u64 = 300_000;
pub const UPLOAD_TIMEOUT_MS: u64 = 60_000;
pub const BROADCAST_TIMEOUT_MS: u64 = 120_000;

/// Star packages offered on the top-up sheet.
pub const TOP_UP_PACKAGES: &[u32] = &[50, 100, 250, 500, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    ServerError,
    Validation,
    AccessDenied,
    NotFound,
    RateLimited,
    InsufficientBalance,
    Blocked,
    /// Structured refusal from the backend without a more specific code.
    Rejected,
    Storage,
    Deserialization,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ServerError => "SERVER_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::Blocked => "BLOCKED",
            Self::Rejected => "REJECTED",
            Self::Storage => "STORAGE_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Whether another attempt at the same request could succeed. Business
    /// refusals and client errors are final.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::ServerError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    /// Raw diagnostics for logs, never shown to the user.
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request took too long. Please try again.".into(),
            ErrorKind::ServerError => {
                "The studio is overloaded right now. Please try again in a minute.".into()
            }
            ErrorKind::AccessDenied => "You don't have permission to do that.".into(),
            ErrorKind::NotFound => "The requested item could not be found.".into(),
            ErrorKind::RateLimited => "Too many requests. Please wait a moment.".into(),
            ErrorKind::InsufficientBalance => {
                "Not enough stars for this generation. Top up to continue.".into()
            }
            ErrorKind::Blocked => "Your account is blocked. Contact support.".into(),
            ErrorKind::Storage => "Unable to save data on this device.".into(),
            ErrorKind::Deserialization => {
                "The server sent an unexpected reply. Please try again.".into()
            }
            ErrorKind::InvalidState => "Something went wrong. Please reopen the app.".into(),
            // Backend refusals and validation errors arrive with their own
            // human-readable text.
            ErrorKind::Validation | ErrorKind::Rejected => self.message.clone(),
            ErrorKind::Unknown => "An unexpected error occurred. Please try again.".into(),
        }
    }

    /// Maps a non-2xx response to an error, preferring the body's `message`.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        let kind = match status {
            400 => ErrorKind::Validation,
            401 | 403 => ErrorKind::AccessDenied,
            402 => ErrorKind::InsufficientBalance,
            404 => ErrorKind::NotFound,
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        };

        let body_error = body
            .and_then(|b| serde_json::from_slice::<serde_json::Value>(b).ok())
            .map(api::unwrap_envelope)
            .as_ref()
            .and_then(api::business_error);
        match body_error {
            Some(err) => err,
            None => Self::new(kind, format!("HTTP error: {status}"))
                .with_internal(format!("status {status}")),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

impl From<capabilities::HttpTransportError> for AppError {
    fn from(e: capabilities::HttpTransportError) -> Self {
        use capabilities::HttpTransportError;
        let kind = match &e {
            HttpTransportError::Timeout { .. } => ErrorKind::Timeout,
            HttpTransportError::Network { .. } => ErrorKind::Network,
            HttpTransportError::Malformed { .. } => ErrorKind::InvalidState,
        };
        Self::new(kind, e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn current_time_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Who is using the app, as reported by the Telegram host at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: i64,
    pub username: Option<String>,
    /// Signed init payload, forwarded verbatim on every backend call. The
    /// backend, not the client, validates it.
    pub init_data: String,
    /// Deep-link start parameter, e.g. a referral code.
    pub start_param: Option<String>,
}

/// Server-owned account state. The client only displays it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    #[serde(default)]
    pub free_stylize: u32,
    #[serde(default)]
    pub free_remove_bg: u32,
    #[serde(default)]
    pub free_enhance: u32,
    #[serde(default)]
    pub star_balance: u32,
    #[serde(default)]
    pub blocked: bool,
}

impl UserStatus {
    #[must_use]
    pub const fn free_left(&self, key: FreeKey) -> u32 {
        match key {
            FreeKey::FreeStylize => self.free_stylize,
            FreeKey::FreeRemoveBg => self.free_remove_bg,
            FreeKey::FreeEnhance => self.free_enhance,
        }
    }
}

/// The single current screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Main,
    Loading,
    Result,
    Sent,
    Error,
    History,
    Referral,
}

impl Screen {
    /// Legal transitions. Side screens hang off `Main`; a generation walks
    /// `Main -> Loading -> Result | Sent | Error -> Main`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Main, Self::Loading | Self::History | Self::Referral)
                | (Self::Loading, Self::Result | Self::Sent | Self::Error)
                | (Self::Result | Self::Sent | Self::Error, Self::Main)
                | (Self::History | Self::Referral, Self::Main)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

/// Transient notice outside the screen machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToastMessage {
    pub kind: ToastKind,
    pub text: String,
}

/// What the user is composing on the main screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationDraft {
    pub mode: Mode,
    /// Fixed-length photo slots; `None` is an empty slot.
    pub slots: Vec<Option<PhotoSlot>>,
    pub prompt: String,
    /// Style preset id for stylize.
    pub style: Option<String>,
    pub options: ModeOptions,
}

impl GenerationDraft {
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            slots: vec![None; usize::from(mode.spec().max_photos)],
            prompt: String::new(),
            style: None,
            options: ModeOptions::default(),
        }
    }

    pub fn set_slot(&mut self, index: usize, photo: PhotoSlot) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(photo);
        } else {
            warn!(index, mode = self.mode.as_str(), "photo slot out of range");
        }
    }

    /// Clears a slot and compacts the remaining photos towards the front,
    /// preserving their relative order. Style transfer keeps slot 0 (the
    /// subject) fixed and compacts only the reference slots.
    pub fn clear_slot(&mut self, index: usize) {
        if index >= self.slots.len() {
            return;
        }
        self.slots[index] = None;
        let fixed = usize::from(self.mode == Mode::StyleTransfer).min(self.slots.len());
        let tail = self.slots.split_off(fixed);
        let total = tail.len();
        let mut compacted: Vec<Option<PhotoSlot>> =
            tail.into_iter().flatten().map(Some).collect();
        compacted.resize_with(total, || None);
        self.slots.append(&mut compacted);
    }

    #[must_use]
    pub fn filled_count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Filled reference slots (everything after the subject slot).
    #[must_use]
    pub fn reference_count(&self) -> u8 {
        if self.mode != Mode::StyleTransfer {
            return 0;
        }
        let count = self.slots.iter().skip(1).flatten().count();
        u8::try_from(count).unwrap_or(u8::MAX)
    }

    /// Options with derived fields (reference count) synced from the slots.
    #[must_use]
    pub fn effective_options(&self) -> ModeOptions {
        ModeOptions {
            reference_count: self.reference_count(),
            ..self.options
        }
    }

    /// Whether the draft satisfies the mode's input requirements.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let spec = self.mode.spec();
        let photos_ok = self.filled_count() >= usize::from(spec.min_photos)
            && (self.mode != Mode::StyleTransfer
                || self.slots.first().is_some_and(Option::is_some));
        let prompt_ok = match spec.prompt {
            PromptUse::Required => !self.prompt.trim().is_empty(),
            PromptUse::Optional | PromptUse::Unused => true,
        };
        photos_ok && prompt_ok
    }
}

impl Default for GenerationDraft {
    fn default() -> Self {
        Self::new(Mode::Stylize)
    }
}

/// The one generation allowed in flight, with its upload tracking table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGeneration {
    pub request_id: String,
    pub mode: Mode,
    pub options: ModeOptions,
    pub prompt: String,
    pub style: Option<String>,
    /// Compressed photos, compacted, in slot order.
    pub photos: Vec<CompressedPhoto>,
    /// Public URL per photo once its upload resolves.
    pub uploads: Vec<Option<String>>,
    /// How many photos went out uncompressed.
    pub fallback_count: usize,
}

impl PendingGeneration {
    pub fn record_upload(&mut self, index: usize, url: String) {
        if let Some(entry) = self.uploads.get_mut(index) {
            *entry = Some(url);
        } else {
            warn!(index, "upload result for unknown photo index");
        }
    }

    #[must_use]
    pub fn uploads_complete(&self) -> bool {
        self.uploads.iter().all(Option::is_some)
    }
}

/// Admin panel state. Exists only while the panel is open; closing it
/// forgets the password.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminState {
    pub open: bool,
    pub password: String,
    pub loading: bool,
    pub error: Option<String>,
    pub stats: Option<AdminStats>,
    pub search: String,
    pub selected_user: Option<i64>,
    pub note: Option<String>,
    /// User id awaiting delete confirmation.
    pub pending_delete: Option<i64>,
    /// (user id, target blocked flag) awaiting confirmation.
    pub pending_block: Option<(i64, bool)>,
    pub broadcast_open: bool,
    pub broadcast: BroadcastDraft,
    pub recipient_count: Option<u64>,
    pub counting_recipients: bool,
    pub sending_broadcast: bool,
    pub last_broadcast: Option<BroadcastOutcome>,
}

#[derive(Default)]
pub struct Model {
    pub screen: Screen,
    pub config: ApiConfig,
    pub compression: CompressionConfig,
    pub session: Option<SessionContext>,
    pub status: Option<UserStatus>,
    pub draft: GenerationDraft,
    pub pending: Option<PendingGeneration>,
    pub awaiting_status_refresh: bool,
    pub outcome: Option<GenerationOutcome>,
    pub active_error: Option<AppError>,
    pub active_toast: Option<ToastMessage>,
    pub history: HistoryCache,
    pub history_loaded: bool,
    pub referral: Option<ReferralStats>,
    pub referral_loading: bool,
    pub invoice_pending: bool,
    pub admin: AdminState,
}

impl Model {
    /// Moves to `to` if the transition is legal; ignores it with a warning
    /// otherwise.
    pub fn go_to(&mut self, to: Screen) -> bool {
        if self.screen.can_transition_to(to) {
            debug!(from = ?self.screen, to = ?to, "screen transition");
            self.screen = to;
            true
        } else {
            warn!(from = ?self.screen, to = ?to, "ignoring illegal screen transition");
            false
        }
    }

    pub fn show_toast(&mut self, kind: ToastKind, text: impl Into<String>) {
        self.active_toast = Some(ToastMessage {
            kind,
            text: text.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    // Lifecycle
    Started {
        session: SessionContext,
        config: ApiConfig,
    },
    StatusResponse(Box<capabilities::HttpResult>),

    // Draft editing
    ModeSelected(Mode),
    PhotoSelected {
        slot: usize,
        data: Vec<u8>,
        mime_type: String,
    },
    PhotoCleared {
        slot: usize,
    },
    PromptChanged(String),
    StyleSelected(Option<String>),
    DurationSelected(VideoDuration),
    QualitySelected(VideoQuality),
    SoundToggled(bool),
    AspectSelected(AspectRatio),
    ResolutionSelected(Resolution),

    // Generation
    GenerateRequested,
    UploadResponse {
        slot: usize,
        result: Box<capabilities::HttpResult>,
    },
    GenerationResponse(Box<capabilities::HttpResult>),
    NewGenerationRequested,
    ErrorDismissed,
    ShareRequested,
    OpenResultRequested,

    // Payments
    TopUpRequested {
        stars: u32,
    },
    InvoiceLinkResponse(Box<capabilities::HttpResult>),
    InvoiceClosed {
        status: capabilities::InvoiceStatus,
    },

    // History
    HistoryOpened,
    HistoryClosed,
    HistoryRestored(Box<capabilities::KvResult>),
    HistoryPersisted(Box<capabilities::KvResult>),
    HistoryItemDeleted {
        result_url: String,
    },

    // Referral
    ReferralOpened,
    ReferralClosed,
    ReferralResponse(Box<capabilities::HttpResult>),
    InviteRequested,

    // Admin
    AdminOpened {
        password: String,
    },
    AdminClosed,
    AdminRefreshRequested,
    AdminStatsResponse(Box<capabilities::HttpResult>),
    AdminSearchChanged(String),
    AdminUserSelected(Option<i64>),
    AdminAdjustBalance {
        delta: i64,
    },
    AdminBalanceResponse(Box<capabilities::HttpResult>),
    AdminBlockRequested {
        blocked: bool,
    },
    AdminBlockConfirmed,
    AdminBlockResponse(Box<capabilities::HttpResult>),
    AdminDeleteRequested,
    AdminDeleteConfirmed,
    AdminDeleteResponse(Box<capabilities::HttpResult>),
    AdminActionCancelled,

    // Broadcast
    BroadcastOpened,
    BroadcastClosed,
    BroadcastTextChanged(String),
    BroadcastPhotoChanged(String),
    BroadcastButtonAdded,
    BroadcastButtonChanged {
        index: usize,
        text: String,
        url: String,
    },
    BroadcastButtonRemoved {
        index: usize,
    },
    BroadcastFilterChanged(AudienceFilter),
    BroadcastPreviewResponse(Box<capabilities::HttpResult>),
    BroadcastScheduleChanged(Option<String>),
    BroadcastSendRequested {
        test: bool,
    },
    BroadcastSendResponse(Box<capabilities::HttpResult>),

    ToastDismissed,
}

impl Event {
    /// Stable name for logging; payloads (photo bytes, passwords) stay out
    /// of the logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::StatusResponse(_) => "status_response",
            Self::ModeSelected(_) => "mode_selected",
            Self::PhotoSelected { .. } => "photo_selected",
            Self::PhotoCleared { .. } => "photo_cleared",
            Self::PromptChanged(_) => "prompt_changed",
            Self::StyleSelected(_) => "style_selected",
            Self::DurationSelected(_) => "duration_selected",
            Self::QualitySelected(_) => "quality_selected",
            Self::SoundToggled(_) => "sound_toggled",
            Self::AspectSelected(_) => "aspect_selected",
            Self::ResolutionSelected(_) => "resolution_selected",
            Self::GenerateRequested => "generate_requested",
            Self::UploadResponse { .. } => "upload_response",
            Self::GenerationResponse(_) => "generation_response",
            Self::NewGenerationRequested => "new_generation_requested",
            Self::ErrorDismissed => "error_dismissed",
            Self::ShareRequested => "share_requested",
            Self::OpenResultRequested => "open_result_requested",
            Self::TopUpRequested { .. } => "top_up_requested",
            Self::InvoiceLinkResponse(_) => "invoice_link_response",
            Self::InvoiceClosed { .. } => "invoice_closed",
            Self::HistoryOpened => "history_opened",
            Self::HistoryClosed => "history_closed",
            Self::HistoryRestored(_) => "history_restored",
            Self::HistoryPersisted(_) => "history_persisted",
            Self::HistoryItemDeleted { .. } => "history_item_deleted",
            Self::ReferralOpened => "referral_opened",
            Self::ReferralClosed => "referral_closed",
            Self::ReferralResponse(_) => "referral_response",
            Self::InviteRequested => "invite_requested",
            Self::AdminOpened { .. } => "admin_opened",
            Self::AdminClosed => "admin_closed",
            Self::AdminRefreshRequested => "admin_refresh_requested",
            Self::AdminStatsResponse(_) => "admin_stats_response",
            Self::AdminSearchChanged(_) => "admin_search_changed",
            Self::AdminUserSelected(_) => "admin_user_selected",
            Self::AdminAdjustBalance { .. } => "admin_adjust_balance",
            Self::AdminBalanceResponse(_) => "admin_balance_response",
            Self::AdminBlockRequested { .. } => "admin_block_requested",
            Self::AdminBlockConfirmed => "admin_block_confirmed",
            Self::AdminBlockResponse(_) => "admin_block_response",
            Self::AdminDeleteRequested => "admin_delete_requested",
            Self::AdminDeleteConfirmed => "admin_delete_confirmed",
            Self::AdminDeleteResponse(_) => "admin_delete_response",
            Self::AdminActionCancelled => "admin_action_cancelled",
            Self::BroadcastOpened => "broadcast_opened",
            Self::BroadcastClosed => "broadcast_closed",
            Self::BroadcastTextChanged(_) => "broadcast_text_changed",
            Self::BroadcastPhotoChanged(_) => "broadcast_photo_changed",
            Self::BroadcastButtonAdded => "broadcast_button_added",
            Self::BroadcastButtonChanged { .. } => "broadcast_button_changed",
            Self::BroadcastButtonRemoved { .. } => "broadcast_button_removed",
            Self::BroadcastFilterChanged(_) => "broadcast_filter_changed",
            Self::BroadcastPreviewResponse(_) => "broadcast_preview_response",
            Self::BroadcastScheduleChanged(_) => "broadcast_schedule_changed",
            Self::BroadcastSendRequested { .. } => "broadcast_send_requested",
            Self::BroadcastSendResponse(_) => "broadcast_send_response",
            Self::ToastDismissed => "toast_dismissed",
        }
    }
}

/// One card on the mode picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCard {
    pub mode: Mode,
    pub name: String,
    pub emoji: String,
    pub description: String,
    /// Cost under the current options.
    pub cost: u32,
    /// Remaining free generations, for free-eligible modes.
    pub free_left: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorView {
    pub message: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItemView {
    pub mode: Mode,
    pub mode_name: String,
    pub emoji: String,
    pub media: MediaKind,
    pub result_url: String,
    pub prompt: String,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralView {
    pub link: String,
    pub loading: bool,
    pub stats: Option<ReferralStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastView {
    pub draft: BroadcastDraft,
    pub recipient_count: Option<u64>,
    pub counting: bool,
    pub sending: bool,
    pub can_send: bool,
    pub last_outcome: Option<BroadcastOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminView {
    pub loading: bool,
    pub error: Option<String>,
    pub stats: Option<AdminStats>,
    pub visible_users: Vec<admin::AdminUserRecord>,
    pub selected_user: Option<admin::AdminUserRecord>,
    pub note: Option<String>,
    /// Text of the action waiting for an explicit confirmation, if any.
    pub confirmation_prompt: Option<String>,
    pub broadcast: Option<BroadcastView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewModel {
    pub screen: Screen,
    pub username: Option<String>,
    pub star_balance: u32,
    pub blocked: bool,
    pub modes: Vec<ModeCard>,
    pub current_mode: Mode,
    pub cost: u32,
    pub free_left: Option<u32>,
    pub affordability: Option<Affordability>,
    pub can_generate: bool,
    pub needs_top_up: bool,
    pub generating: bool,
    pub filled_slots: usize,
    pub total_slots: usize,
    pub prompt: String,
    pub style: Option<String>,
    pub options: ModeOptions,
    pub top_up_packages: Vec<u32>,
    pub outcome: Option<GenerationOutcome>,
    pub error: Option<ErrorView>,
    pub toast: Option<ToastMessage>,
    pub history: Vec<HistoryItemView>,
    pub referral: Option<ReferralView>,
    pub admin: Option<AdminView>,
}

pub mod app {
    use super::*;
    use crate::admin::{BalanceAdjusted, DeleteResult};
    use crate::api::{
        GenerationRequest, InvoiceResponse, PhotoPayload, UploadResponse,
    };
    use crate::capabilities::{
        Capabilities, HapticStyle, HttpRequest, HttpResult, InvoiceStatus, KvOutput, RetryPolicy,
    };
    use crate::history::{HistoryEntry, HISTORY_STORAGE_KEY};
    use serde::de::DeserializeOwned;
    use serde_json::json;

    #[derive(Default)]
    pub struct App;

    impl App {
        /// Transport/status handling shared by every JSON endpoint.
        fn parse_response<T: DeserializeOwned>(result: HttpResult) -> AppResult<T> {
            let response = result.map_err(AppError::from)?;
            if !response.is_success() {
                return Err(AppError::from_http_status(
                    response.status,
                    Some(&response.body),
                ));
            }
            api::parse_json(&response.body)
        }

        /// Like [`Self::parse_response`] but yields the raw unwrapped value.
        fn parse_value(result: HttpResult) -> AppResult<serde_json::Value> {
            let response = result.map_err(AppError::from)?;
            if !response.is_success() {
                return Err(AppError::from_http_status(
                    response.status,
                    Some(&response.body),
                ));
            }
            let value: serde_json::Value =
                serde_json::from_slice(&response.body).map_err(|e| {
                    AppError::new(ErrorKind::Deserialization, "Unreadable server reply")
                        .with_internal(e.to_string())
                })?;
            let value = api::unwrap_envelope(value);
            if let Some(err) = api::business_error(&value) {
                return Err(err);
            }
            Ok(value)
        }

        fn request_status(model: &Model, caps: &Capabilities) {
            let Some(session) = &model.session else {
                return;
            };
            match model.config.endpoint("user-status") {
                Ok(url) => {
                    let body = api::base_payload(session);
                    let request = HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                    caps.backend.send(request, RetryPolicy::default(), |r| {
                        Event::StatusResponse(Box::new(r))
                    });
                }
                Err(e) => warn!(error = %e, "status request skipped"),
            }
        }

        fn start_generation(model: &mut Model, caps: &Capabilities) {
            if model.screen != Screen::Main || model.pending.is_some() {
                debug!("generation already in flight or wrong screen, ignoring");
                return;
            }
            let Some(status) = &model.status else {
                model.show_toast(ToastKind::Error, "Still loading your account, one moment");
                return;
            };
            if status.blocked {
                model.show_toast(ToastKind::Error, "Your account is blocked");
                return;
            }
            if !model.draft.is_ready() {
                caps.host.haptic(HapticStyle::Light);
                return;
            }
            let options = model.draft.effective_options();
            let affordability = check_affordability(model.draft.mode, &options, status);
            if !affordability.allows_submit() {
                // The view surfaces the top-up prompt; no transition happens.
                caps.host.haptic(HapticStyle::Heavy);
                return;
            }

            let photos = image_processing::compress_slots(&model.compression, &model.draft.slots);
            let fallback_count = photos.iter().filter(|p| p.fell_back).count();
            if fallback_count > 0 {
                warn!(fallback_count, total = photos.len(), "photos sent uncompressed");
            }
            let uploads = vec![None; photos.len()];
            model.pending = Some(PendingGeneration {
                request_id: new_request_id(),
                mode: model.draft.mode,
                options,
                prompt: model.draft.prompt.clone(),
                style: model.draft.style.clone(),
                photos,
                uploads,
                fallback_count,
            });
            if !model.go_to(Screen::Loading) {
                model.pending = None;
                return;
            }
            caps.host.haptic(HapticStyle::Medium);

            let has_photos = model.pending.as_ref().is_some_and(|p| !p.photos.is_empty());
            match model.config.upload_endpoint() {
                Some(Ok(upload_url)) if has_photos => {
                    if let Some(pending) = &model.pending {
                        for (slot, photo) in pending.photos.iter().enumerate() {
                            let file_name = format!("{}_{slot}.jpg", pending.request_id);
                            let body = api::upload_body(photo, &file_name);
                            let request =
                                HttpRequest::post_json(upload_url.clone(), &body, UPLOAD_TIMEOUT_MS);
                            caps.backend.send(request, RetryPolicy::default(), move |r| {
                                Event::UploadResponse {
                                    slot,
                                    result: Box::new(r),
                                }
                            });
                        }
                    }
                }
                Some(Err(e)) => Self::fail_generation(model, caps, e),
                _ => Self::send_generation(model, caps),
            }
        }

        fn send_generation(model: &mut Model, caps: &Capabilities) {
            let Some(session) = model.session.clone() else {
                return;
            };
            let Some(pending) = &model.pending else {
                return;
            };
            let photos: Vec<PhotoPayload> =
                if !pending.uploads.is_empty() && pending.uploads_complete() {
                    pending
                        .uploads
                        .iter()
                        .flatten()
                        .cloned()
                        .map(PhotoPayload::Url)
                        .collect()
                } else {
                    pending
                        .photos
                        .iter()
                        .map(|p| PhotoPayload::Inline {
                            data: p.data.clone(),
                            mime_type: p.mime_type.clone(),
                        })
                        .collect()
                };
            let request = GenerationRequest {
                request_id: pending.request_id.clone(),
                mode: pending.mode,
                photos,
                prompt: pending.prompt.clone(),
                style: pending.style.clone(),
                options: pending.options,
            };
            let spec = pending.mode.spec();
            match model.config.endpoint(spec.endpoint) {
                Ok(url) => {
                    let body = request.to_body(&session);
                    let http = HttpRequest::post_json(url, &body, spec.timeout.as_millis());
                    caps.backend.send(http, RetryPolicy::default(), |r| {
                        Event::GenerationResponse(Box::new(r))
                    });
                }
                Err(e) => Self::fail_generation(model, caps, e),
            }
        }

        fn fail_generation(model: &mut Model, caps: &Capabilities, error: AppError) {
            warn!(code = error.code(), error = %error, "generation failed");
            model.pending = None;
            model.active_error = Some(error);
            model.go_to(Screen::Error);
            caps.host.haptic(HapticStyle::Heavy);
        }

        fn parse_upload(result: HttpResult) -> AppResult<String> {
            Self::parse_response::<UploadResponse>(result).map(|u| u.file_url)
        }

        fn handle_generation_response(model: &mut Model, caps: &Capabilities, result: HttpResult) {
            let Some(pending) = model.pending.take() else {
                debug!("generation response with nothing in flight, ignoring");
                return;
            };
            let parsed = match result {
                Err(e) => Err(AppError::from(e)),
                Ok(response) if !response.is_success() => Err(AppError::from_http_status(
                    response.status,
                    Some(&response.body),
                )),
                Ok(response) => {
                    api::parse_generation(&response.body, pending.mode.spec().result_kind)
                }
            };
            match parsed {
                Ok(outcome) => {
                    let now_ms = current_time_ms();
                    if let Some(entry) =
                        HistoryEntry::from_outcome(pending.mode, &outcome, &pending.prompt, now_ms)
                    {
                        model.history.add(entry, now_ms);
                        caps.storage.set(
                            HISTORY_STORAGE_KEY,
                            model.history.to_bytes(),
                            |r| Event::HistoryPersisted(Box::new(r)),
                        );
                    }
                    let target = match &outcome {
                        GenerationOutcome::Media { .. } => Screen::Result,
                        GenerationOutcome::SentToChat => Screen::Sent,
                    };
                    model.outcome = Some(outcome);
                    model.go_to(target);
                    caps.host.haptic(HapticStyle::Medium);
                }
                Err(e) => {
                    model.active_error = Some(e);
                    model.go_to(Screen::Error);
                    caps.host.haptic(HapticStyle::Heavy);
                }
            }
            // The balance moved (or may have); refresh strictly after the
            // generation settled, never in parallel with it.
            model.awaiting_status_refresh = true;
            Self::request_status(model, caps);
        }

        fn request_admin_stats(model: &mut Model, caps: &Capabilities) {
            let Some(session) = &model.session else {
                return;
            };
            match model.config.endpoint("admin-stats") {
                Ok(url) => {
                    model.admin.loading = true;
                    let mut body = api::base_payload(session);
                    if let Some(map) = body.as_object_mut() {
                        map.insert("password".into(), json!(model.admin.password));
                    }
                    let request = HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                    caps.backend.send(request, RetryPolicy::default(), |r| {
                        Event::AdminStatsResponse(Box::new(r))
                    });
                }
                Err(e) => model.admin.error = Some(e.user_facing_message()),
            }
        }

        fn request_broadcast_preview(model: &mut Model, caps: &Capabilities) {
            match model.config.endpoint("admin-broadcast-preview") {
                Ok(url) => {
                    model.admin.counting_recipients = true;
                    model.admin.recipient_count = None;
                    let body = json!({
                        "password": model.admin.password,
                        "filter_type": model.admin.broadcast.filter.as_str(),
                    });
                    let request = HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                    caps.backend.send(request, RetryPolicy::default(), |r| {
                        Event::BroadcastPreviewResponse(Box::new(r))
                    });
                }
                Err(e) => model.admin.error = Some(e.user_facing_message()),
            }
        }

        /// Targeted admin call over a user id. The password rides along on
        /// every request; the backend is the sole authority.
        fn send_admin_user_action(
            model: &Model,
            caps: &Capabilities,
            endpoint: &str,
            extra: serde_json::Value,
            policy: RetryPolicy,
            make_event: fn(Box<HttpResult>) -> Event,
        ) {
            match model.config.endpoint(endpoint) {
                Ok(url) => {
                    let mut body = json!({ "password": model.admin.password });
                    if let (Some(map), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
                        map.extend(extra.clone());
                    }
                    let request = HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                    caps.backend
                        .send(request, policy, move |r| make_event(Box::new(r)));
                }
                Err(e) => warn!(error = %e, endpoint, "admin call skipped"),
            }
        }

        fn build_view(model: &Model) -> ViewModel {
            let options = model.draft.effective_options();
            let mode = model.draft.mode;
            let spec = mode.spec();
            let cost = compute_cost(mode, &options);
            let affordability = model
                .status
                .as_ref()
                .map(|s| check_affordability(mode, &options, s));
            let draft_ready = model.draft.is_ready();
            let busy = model.pending.is_some() || model.screen == Screen::Loading;
            let blocked = model.status.as_ref().is_some_and(|s| s.blocked);
            let can_generate = draft_ready
                && !busy
                && !blocked
                && affordability
                    .as_ref()
                    .is_some_and(Affordability::allows_submit);
            let needs_top_up =
                matches!(affordability, Some(Affordability::Insufficient { .. }));

            let free_left = spec
                .free_key
                .and_then(|key| model.status.as_ref().map(|s| s.free_left(key)));

            let modes = Mode::ALL
                .iter()
                .map(|m| {
                    let s = m.spec();
                    // Cards for other modes show their base price.
                    let card_options = if *m == mode {
                        options
                    } else {
                        ModeOptions::default()
                    };
                    ModeCard {
                        mode: *m,
                        name: s.name.to_owned(),
                        emoji: s.emoji.to_owned(),
                        description: s.description.to_owned(),
                        cost: compute_cost(*m, &card_options),
                        free_left: s
                            .free_key
                            .and_then(|key| model.status.as_ref().map(|st| st.free_left(key))),
                    }
                })
                .collect();

            let history = if model.screen == Screen::History {
                let now_ms = current_time_ms();
                model
                    .history
                    .visible(now_ms)
                    .into_iter()
                    .map(|e| HistoryItemView {
                        mode: e.mode,
                        mode_name: e.mode.spec().name.to_owned(),
                        emoji: e.mode.spec().emoji.to_owned(),
                        media: e.media,
                        result_url: e.result_url.clone(),
                        prompt: e.prompt.clone(),
                        created_at_ms: e.created_at_ms,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            let referral = (model.screen == Screen::Referral)
                .then(|| {
                    model.session.as_ref().map(|session| ReferralView {
                        link: model.config.referral_link(session.user_id),
                        loading: model.referral_loading,
                        stats: model.referral.clone(),
                    })
                })
                .flatten();

            let admin = model.admin.open.then(|| Self::build_admin_view(model));

            ViewModel {
                screen: model.screen,
                username: model
                    .session
                    .as_ref()
                    .and_then(|s| s.username.clone()),
                star_balance: model.status.as_ref().map_or(0, |s| s.star_balance),
                blocked,
                modes,
                current_mode: mode,
                cost,
                free_left,
                affordability,
                can_generate,
                needs_top_up,
                generating: busy,
                filled_slots: model.draft.filled_count(),
                total_slots: model.draft.slots.len(),
                prompt: model.draft.prompt.clone(),
                style: model.draft.style.clone(),
                options,
                top_up_packages: TOP_UP_PACKAGES.to_vec(),
                outcome: model.outcome.clone(),
                error: model.active_error.as_ref().map(|e| ErrorView {
                    message: e.user_facing_message(),
                    detail: e.internal_message.clone(),
                }),
                toast: model.active_toast.clone(),
                history,
                referral,
                admin,
            }
        }

        fn build_admin_view(model: &Model) -> AdminView {
            let admin = &model.admin;
            let visible_users = admin
                .stats
                .as_ref()
                .map(|s| s.filtered(&admin.search).into_iter().cloned().collect())
                .unwrap_or_default();
            let selected_user = admin.selected_user.and_then(|id| {
                admin
                    .stats
                    .as_ref()
                    .and_then(|s| s.find(id))
                    .cloned()
            });
            let confirmation_prompt = if let Some(id) = admin.pending_delete {
                Some(format!("Delete user {id} permanently?"))
            } else {
                admin.pending_block.map(|(id, blocked)| {
                    if blocked {
                        format!("Block user {id}?")
                    } else {
                        format!("Unblock user {id}?")
                    }
                })
            };
            let broadcast = admin.broadcast_open.then(|| BroadcastView {
                draft: admin.broadcast.clone(),
                recipient_count: admin.recipient_count,
                counting: admin.counting_recipients,
                sending: admin.sending_broadcast,
                can_send: admin.broadcast.can_send() && !admin.sending_broadcast,
                last_outcome: admin.last_broadcast.clone(),
            });
            AdminView {
                loading: admin.loading,
                error: admin.error.clone(),
                stats: admin.stats.clone(),
                visible_users,
                selected_user,
                note: admin.note.clone(),
                confirmation_prompt,
                broadcast,
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            debug!(event = event.name(), screen = ?model.screen, "update");

            match event {
                Event::Started { session, config } => {
                    model.session = Some(session);
                    model.config = config;
                    Self::request_status(model, caps);
                    caps.storage
                        .get(HISTORY_STORAGE_KEY, |r| Event::HistoryRestored(Box::new(r)));
                }

                Event::StatusResponse(result) => {
                    model.awaiting_status_refresh = false;
                    match Self::parse_response::<UserStatus>(*result) {
                        Ok(status) => model.status = Some(status),
                        Err(e) => {
                            warn!(code = e.code(), error = %e, "status fetch failed");
                            if model.status.is_none() {
                                model.show_toast(ToastKind::Error, e.user_facing_message());
                            }
                        }
                    }
                }

                Event::ModeSelected(mode) => {
                    if model.screen == Screen::Main {
                        model.draft = GenerationDraft::new(mode);
                        caps.host.haptic(HapticStyle::Light);
                    }
                }

                Event::PhotoSelected {
                    slot,
                    data,
                    mime_type,
                } => {
                    if model.screen != Screen::Main {
                        debug!("photo pick outside main screen, ignoring");
                    } else if data.len() > model.compression.max_input_bytes {
                        model.show_toast(
                            ToastKind::Error,
                            "That photo is too large. Please pick a smaller one.",
                        );
                    } else {
                        model.draft.set_slot(slot, PhotoSlot { data, mime_type });
                        caps.host.haptic(HapticStyle::Light);
                    }
                }

                Event::PhotoCleared { slot } => {
                    if model.screen == Screen::Main {
                        model.draft.clear_slot(slot);
                    }
                }

                Event::PromptChanged(prompt) => model.draft.prompt = prompt,
                Event::StyleSelected(style) => model.draft.style = style,
                Event::DurationSelected(duration) => model.draft.options.duration = duration,
                Event::QualitySelected(quality) => model.draft.options.quality = quality,
                Event::SoundToggled(sound) => model.draft.options.sound = sound,
                Event::AspectSelected(aspect) => model.draft.options.aspect = aspect,
                Event::ResolutionSelected(resolution) => {
                    model.draft.options.resolution = resolution;
                }

                Event::GenerateRequested => Self::start_generation(model, caps),

                Event::UploadResponse { slot, result } => {
                    if model.pending.is_none() {
                        debug!("upload result after flight ended, ignoring");
                    } else {
                        match Self::parse_upload(*result) {
                            Ok(url) => {
                                let mut ready = false;
                                if let Some(pending) = &mut model.pending {
                                    pending.record_upload(slot, url);
                                    ready = pending.uploads_complete();
                                }
                                if ready {
                                    Self::send_generation(model, caps);
                                }
                            }
                            Err(e) => Self::fail_generation(model, caps, e),
                        }
                    }
                }

                Event::GenerationResponse(result) => {
                    Self::handle_generation_response(model, caps, *result);
                }

                Event::NewGenerationRequested | Event::ErrorDismissed => {
                    if model.go_to(Screen::Main) {
                        model.outcome = None;
                        model.active_error = None;
                        model.draft = GenerationDraft::new(model.draft.mode);
                    }
                }

                Event::ShareRequested => {
                    if let Some(GenerationOutcome::Media { url, .. }) = &model.outcome {
                        caps.host.share(format!("Made with AI Avatar Studio: {url}"));
                        caps.host.haptic(HapticStyle::Medium);
                    }
                }

                Event::OpenResultRequested => {
                    if let Some(GenerationOutcome::Media { url, .. }) = &model.outcome {
                        caps.host.open_link(url.clone());
                    }
                }

                Event::TopUpRequested { stars } => {
                    if stars == 0 || model.invoice_pending {
                        debug!("top-up request ignored");
                    } else if let Some(session) = &model.session {
                        match model.config.endpoint("create-invoice") {
                            Ok(url) => {
                                model.invoice_pending = true;
                                let mut body = api::base_payload(session);
                                if let Some(map) = body.as_object_mut() {
                                    map.insert("stars".into(), json!(stars));
                                }
                                let request =
                                    HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                                caps.backend.send(request, RetryPolicy::default(), |r| {
                                    Event::InvoiceLinkResponse(Box::new(r))
                                });
                            }
                            Err(e) => {
                                model.show_toast(ToastKind::Error, e.user_facing_message());
                            }
                        }
                    }
                }

                Event::InvoiceLinkResponse(result) => {
                    match Self::parse_response::<InvoiceResponse>(*result) {
                        Ok(invoice) => {
                            caps.host.open_invoice(invoice.invoice_url, |status| {
                                Event::InvoiceClosed { status }
                            });
                        }
                        Err(e) => {
                            model.invoice_pending = false;
                            model.show_toast(ToastKind::Error, e.user_facing_message());
                        }
                    }
                }

                Event::InvoiceClosed { status } => {
                    model.invoice_pending = false;
                    match status {
                        InvoiceStatus::Paid => {
                            model.show_toast(ToastKind::Success, "Stars added to your balance");
                            Self::request_status(model, caps);
                        }
                        InvoiceStatus::Cancelled | InvoiceStatus::Pending => {
                            model.show_toast(ToastKind::Info, "Payment not completed");
                        }
                        InvoiceStatus::Failed => {
                            model.show_toast(ToastKind::Error, "Payment failed. Please try again.");
                        }
                    }
                }

                Event::HistoryOpened => {
                    if model.go_to(Screen::History) && !model.history_loaded {
                        caps.storage
                            .get(HISTORY_STORAGE_KEY, |r| Event::HistoryRestored(Box::new(r)));
                    }
                }

                Event::HistoryClosed | Event::ReferralClosed => {
                    model.go_to(Screen::Main);
                }

                Event::HistoryRestored(result) => {
                    model.history_loaded = true;
                    match *result {
                        Ok(KvOutput::Value(Some(bytes))) => {
                            model.history = HistoryCache::from_bytes(&bytes);
                        }
                        Ok(KvOutput::Value(None)) => model.history = HistoryCache::default(),
                        Ok(KvOutput::Done) => {
                            warn!("unexpected storage output while restoring history");
                        }
                        Err(e) => warn!(error = %e, "history restore failed"),
                    }
                }

                Event::HistoryPersisted(result) => {
                    if let Err(e) = *result {
                        warn!(error = %e, "history persist failed");
                    }
                }

                Event::HistoryItemDeleted { result_url } => {
                    model.history.remove_by_url(&result_url);
                    caps.storage.set(
                        HISTORY_STORAGE_KEY,
                        model.history.to_bytes(),
                        |r| Event::HistoryPersisted(Box::new(r)),
                    );
                }

                Event::ReferralOpened => {
                    if model.go_to(Screen::Referral) {
                        if let Some(session) = &model.session {
                            match model.config.endpoint("referral-stats") {
                                Ok(url) => {
                                    model.referral_loading = true;
                                    let body = api::base_payload(session);
                                    let request =
                                        HttpRequest::post_json(url, &body, STATUS_TIMEOUT_MS);
                                    caps.backend.send(request, RetryPolicy::default(), |r| {
                                        Event::ReferralResponse(Box::new(r))
                                    });
                                }
                                Err(e) => warn!(error = %e, "referral stats skipped"),
                            }
                        }
                    }
                }

                Event::ReferralResponse(result) => {
                    model.referral_loading = false;
                    match Self::parse_response::<ReferralStats>(*result) {
                        Ok(stats) => model.referral = Some(stats),
                        Err(e) => {
                            warn!(code = e.code(), "referral stats failed");
                            model.show_toast(ToastKind::Error, e.user_facing_message());
                        }
                    }
                }

                Event::InviteRequested => {
                    if let Some(session) = &model.session {
                        let link = model.config.referral_link(session.user_id);
                        caps.host
                            .share(format!("Create AI avatars with me! {link}"));
                        caps.host.haptic(HapticStyle::Medium);
                    }
                }

                Event::AdminOpened { password } => {
                    model.admin = AdminState {
                        open: true,
                        password,
                        ..AdminState::default()
                    };
                    Self::request_admin_stats(model, caps);
                }

                Event::AdminClosed => {
                    // Forgets the password along with everything else.
                    model.admin = AdminState::default();
                }

                Event::AdminRefreshRequested => {
                    if model.admin.open {
                        Self::request_admin_stats(model, caps);
                    }
                }

                Event::AdminStatsResponse(result) => {
                    model.admin.loading = false;
                    match Self::parse_response::<AdminStats>(*result) {
                        Ok(stats) => {
                            // Drop a selection that no longer resolves.
                            if let Some(id) = model.admin.selected_user {
                                if stats.find(id).is_none() {
                                    model.admin.selected_user = None;
                                }
                            }
                            model.admin.error = None;
                            model.admin.stats = Some(stats);
                        }
                        Err(e) => {
                            warn!(code = e.code(), "admin stats failed");
                            model.admin.error = Some(e.user_facing_message());
                        }
                    }
                }

                Event::AdminSearchChanged(query) => model.admin.search = query,

                Event::AdminUserSelected(user_id) => {
                    model.admin.selected_user = user_id;
                    model.admin.note = None;
                }

                Event::AdminAdjustBalance { delta } => {
                    if delta != 0 {
                        if let Some(user_id) = model.admin.selected_user {
                            // Not idempotent, so a single attempt only.
                            Self::send_admin_user_action(
                                model,
                                caps,
                                "admin-add-stars",
                                json!({ "user_id": user_id, "amount": delta }),
                                RetryPolicy::none(),
                                Event::AdminBalanceResponse,
                            );
                        }
                    }
                }

                Event::AdminBalanceResponse(result) => {
                    match Self::parse_response::<BalanceAdjusted>(*result) {
                        Ok(adjusted) => {
                            model.admin.note = Some(format!(
                                "Balance of {} is now {} stars",
                                adjusted
                                    .username
                                    .unwrap_or_else(|| adjusted.user_id.to_string()),
                                adjusted.star_balance
                            ));
                            Self::request_admin_stats(model, caps);
                        }
                        Err(e) => model.admin.error = Some(e.user_facing_message()),
                    }
                }

                Event::AdminBlockRequested { blocked } => {
                    if let Some(user_id) = model.admin.selected_user {
                        model.admin.pending_block = Some((user_id, blocked));
                    }
                }

                Event::AdminBlockConfirmed => {
                    if let Some((user_id, blocked)) = model.admin.pending_block.take() {
                        Self::send_admin_user_action(
                            model,
                            caps,
                            "admin-block-user",
                            json!({ "user_id": user_id, "blocked": blocked }),
                            RetryPolicy::default(),
                            Event::AdminBlockResponse,
                        );
                    }
                }

                Event::AdminBlockResponse(result) => match Self::parse_value(*result) {
                    Ok(_) => Self::request_admin_stats(model, caps),
                    Err(e) => model.admin.error = Some(e.user_facing_message()),
                },

                Event::AdminDeleteRequested => {
                    if let Some(user_id) = model.admin.selected_user {
                        model.admin.pending_delete = Some(user_id);
                    }
                }

                Event::AdminDeleteConfirmed => {
                    if let Some(user_id) = model.admin.pending_delete.take() {
                        Self::send_admin_user_action(
                            model,
                            caps,
                            "admin-delete-user",
                            json!({ "user_id": user_id }),
                            RetryPolicy::default(),
                            Event::AdminDeleteResponse,
                        );
                    }
                }

                Event::AdminDeleteResponse(result) => {
                    match Self::parse_response::<DeleteResult>(*result) {
                        Ok(outcome) => {
                            if outcome.deleted {
                                model.admin.selected_user = None;
                                model.admin.note = Some("User deleted".into());
                            } else {
                                model.admin.note = Some(
                                    outcome
                                        .message
                                        .unwrap_or_else(|| "User was not deleted".into()),
                                );
                            }
                            Self::request_admin_stats(model, caps);
                        }
                        Err(e) => model.admin.error = Some(e.user_facing_message()),
                    }
                }

                Event::AdminActionCancelled => {
                    model.admin.pending_block = None;
                    model.admin.pending_delete = None;
                }

                Event::BroadcastOpened => {
                    if model.admin.open {
                        model.admin.broadcast_open = true;
                        Self::request_broadcast_preview(model, caps);
                    }
                }

                Event::BroadcastClosed => {
                    model.admin.broadcast_open = false;
                    model.admin.last_broadcast = None;
                }

                Event::BroadcastTextChanged(text) => model.admin.broadcast.text = text,
                Event::BroadcastPhotoChanged(url) => model.admin.broadcast.photo_url = url,

                Event::BroadcastButtonAdded => {
                    if !model.admin.broadcast.add_button() {
                        model.show_toast(ToastKind::Info, "Up to three buttons are supported");
                    }
                }

                Event::BroadcastButtonChanged { index, text, url } => {
                    if let Some(button) = model.admin.broadcast.buttons.get_mut(index) {
                        button.text = text;
                        button.url = url;
                    }
                }

                Event::BroadcastButtonRemoved { index } => {
                    model.admin.broadcast.remove_button(index);
                }

                Event::BroadcastFilterChanged(filter) => {
                    model.admin.broadcast.filter = filter;
                    // The audience size is server-side knowledge; ask again.
                    Self::request_broadcast_preview(model, caps);
                }

                Event::BroadcastPreviewResponse(result) => {
                    model.admin.counting_recipients = false;
                    match Self::parse_response::<RecipientPreview>(*result) {
                        Ok(preview) => model.admin.recipient_count = Some(preview.count),
                        Err(e) => {
                            warn!(code = e.code(), "broadcast preview failed");
                            model.admin.recipient_count = None;
                        }
                    }
                }

                Event::BroadcastScheduleChanged(schedule_at) => {
                    model.admin.broadcast.schedule_at = schedule_at;
                }

                Event::BroadcastSendRequested { test } => {
                    if model.admin.broadcast.can_send() && !model.admin.sending_broadcast {
                        let test_user_id = if test {
                            model.session.as_ref().map(|s| s.user_id)
                        } else {
                            None
                        };
                        match model.config.endpoint("admin-broadcast-send") {
                            Ok(url) => {
                                model.admin.sending_broadcast = true;
                                let body = model
                                    .admin
                                    .broadcast
                                    .to_payload(&model.admin.password, test_user_id);
                                let request =
                                    HttpRequest::post_json(url, &body, BROADCAST_TIMEOUT_MS);
                                // A resend would message the audience twice.
                                caps.backend.send(request, RetryPolicy::none(), |r| {
                                    Event::BroadcastSendResponse(Box::new(r))
                                });
                            }
                            Err(e) => {
                                model.admin.error = Some(e.user_facing_message());
                            }
                        }
                    }
                }

                Event::BroadcastSendResponse(result) => {
                    model.admin.sending_broadcast = false;
                    match Self::parse_value(*result) {
                        Ok(value) => {
                            model.admin.last_broadcast =
                                Some(BroadcastOutcome::from_value(&value));
                        }
                        Err(e) => model.admin.error = Some(e.user_facing_message()),
                    }
                }

                Event::ToastDismissed => model.active_toast = None,
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            Self::build_view(model)
        }
    }
}
