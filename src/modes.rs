//! Mode registry and pricing.
//!
//! Every generation mode is described by a static [`ModeSpec`]: display
//! metadata, backend endpoint, photo slot rules, free-quota key and the cost
//! rule. All pricing is a pure table lookup with a documented fallback, so the
//! view can recompute the cost on every option change without touching I/O.

use serde::{Deserialize, Serialize};

use crate::UserStatus;

/// Cost charged when a video option combination is missing from the table.
pub const FALLBACK_VIDEO_COST: u32 = 25;

/// Cost charged when a style-transfer combination is missing from the table.
pub const FALLBACK_STYLE_TRANSFER_COST: u32 = 7;

/// A generation mode offered by the studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Stylize,
    MultiPhoto,
    StyleTransfer,
    PhotoToVideo,
    LipSync,
    RemoveBg,
    Enhance,
    TextToImage,
}

impl Mode {
    pub const ALL: [Self; 8] = [
        Self::Stylize,
        Self::MultiPhoto,
        Self::StyleTransfer,
        Self::PhotoToVideo,
        Self::LipSync,
        Self::RemoveBg,
        Self::Enhance,
        Self::TextToImage,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stylize => "stylize",
            Self::MultiPhoto => "multi_photo",
            Self::StyleTransfer => "style_transfer",
            Self::PhotoToVideo => "photo_to_video",
            Self::LipSync => "lip_sync",
            Self::RemoveBg => "remove_bg",
            Self::Enhance => "enhance",
            Self::TextToImage => "text_to_image",
        }
    }

    #[must_use]
    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == value)
    }

    /// Static descriptor for this mode.
    #[must_use]
    pub const fn spec(self) -> &'static ModeSpec {
        &MODE_SPECS[self as usize]
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of media a mode produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

/// Per-mode free-generation counter key, mirroring the backend schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeKey {
    FreeStylize,
    FreeRemoveBg,
    FreeEnhance,
}

impl FreeKey {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreeStylize => "free_stylize",
            Self::FreeRemoveBg => "free_remove_bg",
            Self::FreeEnhance => "free_enhance",
        }
    }
}

/// Whether a mode reads the prompt field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptUse {
    Unused,
    Optional,
    Required,
}

/// Coarse request deadline classes. Video and lip-sync renders take minutes,
/// status calls should fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutClass {
    Status,
    Generation,
    LongGeneration,
}

impl TimeoutClass {
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        match self {
            Self::Status => crate::STATUS_TIMEOUT_MS,
            Self::Generation => crate::GENERATION_TIMEOUT_MS,
            Self::LongGeneration => crate::LONG_GENERATION_TIMEOUT_MS,
        }
    }
}

/// Video clip duration in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoDuration {
    #[default]
    #[serde(rename = "5")]
    Seconds5,
    #[serde(rename = "10")]
    Seconds10,
}

impl VideoDuration {
    pub const ALL: [Self; 2] = [Self::Seconds5, Self::Seconds10];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds5 => "5",
            Self::Seconds10 => "10",
        }
    }
}

/// Video render quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    #[default]
    Std,
    Pro,
}

impl VideoQuality {
    pub const ALL: [Self; 2] = [Self::Std, Self::Pro];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Pro => "pro",
        }
    }
}

/// Output frame aspect ratio for video modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "1:1")]
    Square,
}

impl AspectRatio {
    pub const ALL: [Self; 3] = [Self::Portrait, Self::Landscape, Self::Square];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Portrait => "9:16",
            Self::Landscape => "16:9",
            Self::Square => "1:1",
        }
    }
}

/// Output resolution for style transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "2K")]
    R2k,
    #[serde(rename = "4K")]
    R4k,
}

impl Resolution {
    pub const ALL: [Self; 2] = [Self::R2k, Self::R4k];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::R2k => "2K",
            Self::R4k => "4K",
        }
    }
}

/// The user-adjustable knobs that influence pricing and payload assembly.
///
/// A single bag of options is kept for all modes; each mode reads only the
/// fields its cost rule and endpoint care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOptions {
    pub duration: VideoDuration,
    pub quality: VideoQuality,
    pub sound: bool,
    pub aspect: AspectRatio,
    pub resolution: Resolution,
    /// Filled reference slots, drives the style-transfer price bucket.
    pub reference_count: u8,
}

/// How a mode's cost is derived from its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostRule {
    Flat(u32),
    /// duration x quality x sound lookup, [`FALLBACK_VIDEO_COST`] otherwise.
    VideoTable,
    /// reference-count bucket x resolution, [`FALLBACK_STYLE_TRANSFER_COST`]
    /// otherwise.
    StyleTransferTable,
}

/// Static description of one generation mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSpec {
    pub mode: Mode,
    pub name: &'static str,
    pub emoji: &'static str,
    pub description: &'static str,
    /// Path appended to the webhook base URL.
    pub endpoint: &'static str,
    pub result_kind: MediaKind,
    /// `Some` only for the free-eligible modes.
    pub free_key: Option<FreeKey>,
    /// Minimum photos required before the draft is submittable.
    pub min_photos: u8,
    /// Total photo slots, reference slots included.
    pub max_photos: u8,
    /// Style transfer: trailing slots holding style references.
    pub reference_slots: u8,
    pub prompt: PromptUse,
    pub timeout: TimeoutClass,
    pub cost: CostRule,
}

// Indexed by `Mode as usize`; `Mode::spec` relies on this ordering.
static MODE_SPECS: [ModeSpec; 8] = [
    ModeSpec {
        mode: Mode::Stylize,
        name: "Stylize",
        emoji: "\u{1F3A8}",
        description: "Turn your photo into art in a chosen style",
        endpoint: "generate",
        result_kind: MediaKind::Image,
        free_key: Some(FreeKey::FreeStylize),
        min_photos: 1,
        max_photos: 1,
        reference_slots: 0,
        prompt: PromptUse::Optional,
        timeout: TimeoutClass::Generation,
        cost: CostRule::Flat(5),
    },
    ModeSpec {
        mode: Mode::MultiPhoto,
        name: "Group shot",
        emoji: "\u{1F465}",
        description: "Compose up to four photos into a single scene",
        endpoint: "generate-multi",
        result_kind: MediaKind::Image,
        free_key: None,
        min_photos: 2,
        max_photos: 4,
        reference_slots: 0,
        prompt: PromptUse::Required,
        timeout: TimeoutClass::Generation,
        cost: CostRule::Flat(10),
    },
    ModeSpec {
        mode: Mode::StyleTransfer,
        name: "Style transfer",
        emoji: "\u{1F58C}",
        description: "Repaint your photo in the style of reference images",
        endpoint: "generate-style-transfer",
        result_kind: MediaKind::Image,
        free_key: None,
        min_photos: 2,
        max_photos: 4,
        reference_slots: 3,
        prompt: PromptUse::Optional,
        timeout: TimeoutClass::Generation,
        cost: CostRule::StyleTransferTable,
    },
    ModeSpec {
        mode: Mode::PhotoToVideo,
        name: "Photo to video",
        emoji: "\u{1F3AC}",
        description: "Animate a photo into a short clip",
        endpoint: "generate-video",
        result_kind: MediaKind::Video,
        free_key: None,
        min_photos: 1,
        max_photos: 1,
        reference_slots: 0,
        prompt: PromptUse::Optional,
        timeout: TimeoutClass::LongGeneration,
        cost: CostRule::VideoTable,
    },
    ModeSpec {
        mode: Mode::LipSync,
        name: "Lip sync",
        emoji: "\u{1F3A4}",
        description: "Make a portrait speak your text",
        endpoint: "generate-lipsync",
        result_kind: MediaKind::Video,
        free_key: None,
        min_photos: 1,
        max_photos: 1,
        reference_slots: 0,
        prompt: PromptUse::Required,
        timeout: TimeoutClass::LongGeneration,
        cost: CostRule::Flat(15),
    },
    ModeSpec {
        mode: Mode::RemoveBg,
        name: "Remove background",
        emoji: "\u{2702}",
        description: "Cut the subject out on a clean background",
        endpoint: "generate-remove-bg",
        result_kind: MediaKind::Image,
        free_key: Some(FreeKey::FreeRemoveBg),
        min_photos: 1,
        max_photos: 1,
        reference_slots: 0,
        prompt: PromptUse::Unused,
        timeout: TimeoutClass::Generation,
        cost: CostRule::Flat(3),
    },
    ModeSpec {
        mode: Mode::Enhance,
        name: "Enhance",
        emoji: "\u{2728}",
        description: "Upscale and restore photo detail",
        endpoint: "generate-enhance",
        result_kind: MediaKind::Image,
        free_key: Some(FreeKey::FreeEnhance),
        min_photos: 1,
        max_photos: 1,
        reference_slots: 0,
        prompt: PromptUse::Unused,
        timeout: TimeoutClass::Generation,
        cost: CostRule::Flat(8),
    },
    ModeSpec {
        mode: Mode::TextToImage,
        name: "Text to image",
        emoji: "\u{1F4DD}",
        description: "Generate an image from a description alone",
        endpoint: "generate-text-to-image",
        result_kind: MediaKind::Image,
        free_key: None,
        min_photos: 0,
        max_photos: 0,
        reference_slots: 0,
        prompt: PromptUse::Required,
        timeout: TimeoutClass::Generation,
        cost: CostRule::Flat(6),
    },
];

/// (duration, quality, sound) -> stars.
static VIDEO_COSTS: [(VideoDuration, VideoQuality, bool, u32); 8] = [
    (VideoDuration::Seconds5, VideoQuality::Std, false, 25),
    (VideoDuration::Seconds5, VideoQuality::Std, true, 40),
    (VideoDuration::Seconds5, VideoQuality::Pro, false, 80),
    (VideoDuration::Seconds5, VideoQuality::Pro, true, 95),
    (VideoDuration::Seconds10, VideoQuality::Std, false, 50),
    (VideoDuration::Seconds10, VideoQuality::Std, true, 80),
    (VideoDuration::Seconds10, VideoQuality::Pro, false, 160),
    (VideoDuration::Seconds10, VideoQuality::Pro, true, 190),
];

/// (reference-count bucket, resolution) -> stars.
static STYLE_TRANSFER_COSTS: [(u8, Resolution, u32); 6] = [
    (1, Resolution::R2k, 7),
    (1, Resolution::R4k, 12),
    (2, Resolution::R2k, 9),
    (2, Resolution::R4k, 14),
    (3, Resolution::R2k, 11),
    (3, Resolution::R4k, 16),
];

impl ModeSpec {
    /// Pure cost lookup for this mode under the given options.
    #[must_use]
    pub fn compute_cost(&self, options: &ModeOptions) -> u32 {
        match self.cost {
            CostRule::Flat(stars) => stars,
            CostRule::VideoTable => VIDEO_COSTS
                .iter()
                .find(|(d, q, s, _)| {
                    *d == options.duration && *q == options.quality && *s == options.sound
                })
                .map_or(FALLBACK_VIDEO_COST, |(_, _, _, stars)| *stars),
            CostRule::StyleTransferTable => {
                let bucket = options.reference_count.clamp(1, 3);
                STYLE_TRANSFER_COSTS
                    .iter()
                    .find(|(refs, res, _)| *refs == bucket && *res == options.resolution)
                    .map_or(FALLBACK_STYLE_TRANSFER_COST, |(_, _, stars)| *stars)
            }
        }
    }

    #[must_use]
    pub const fn uses_photos(&self) -> bool {
        self.max_photos > 0
    }
}

/// Pure cost lookup, keyed by mode and options only.
#[must_use]
pub fn compute_cost(mode: Mode, options: &ModeOptions) -> u32 {
    mode.spec().compute_cost(options)
}

/// Outcome of the pre-submit affordability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Affordability {
    /// A free generation for this mode is available; no stars are charged.
    FreeQuota { remaining: u32 },
    /// Paid from the star balance.
    Balance { cost: u32 },
    /// Neither free quota nor sufficient balance.
    Insufficient { cost: u32, balance: u32 },
}

impl Affordability {
    #[must_use]
    pub const fn allows_submit(&self) -> bool {
        !matches!(self, Self::Insufficient { .. })
    }
}

/// Free quota is consulted first; the balance pays otherwise.
#[must_use]
pub fn check_affordability(mode: Mode, options: &ModeOptions, status: &UserStatus) -> Affordability {
    if let Some(key) = mode.spec().free_key {
        let remaining = status.free_left(key);
        if remaining > 0 {
            return Affordability::FreeQuota { remaining };
        }
    }
    let cost = compute_cost(mode, options);
    if status.star_balance >= cost {
        Affordability::Balance { cost }
    } else {
        Affordability::Insufficient {
            cost,
            balance: status.star_balance,
        }
    }
}
