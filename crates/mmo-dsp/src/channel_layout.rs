//! Channel position inference and BS.1770 channel weights
//!
//! Positions are resolved in this order:
//! - WAV `dwChannelMask`, when it names at least as many positions as channels
//! - decoder layout string (`"5.1(side)"`, `"FL+FR+FC+LFE+BL+BR"`)
//! - all-ones fallback
//!
//! Ambiguous metadata degrades precision, never correctness: the resolver
//! always returns one weight per channel. The mode token is diagnostic only.

use serde::{Deserialize, Serialize};
use std::fmt;

// ═══════════════════════════════════════════════════════════════════════════════
// SPEAKER POSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Speaker positions addressable by a WAVE_FORMAT_EXTENSIBLE channel mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    BackLeft,
    BackRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    BackCenter,
    SideLeft,
    SideRight,
}

impl SpeakerPosition {
    /// All positions in mask-bit order
    pub const ALL: [SpeakerPosition; 11] = [
        SpeakerPosition::FrontLeft,
        SpeakerPosition::FrontRight,
        SpeakerPosition::FrontCenter,
        SpeakerPosition::LowFrequency,
        SpeakerPosition::BackLeft,
        SpeakerPosition::BackRight,
        SpeakerPosition::FrontLeftOfCenter,
        SpeakerPosition::FrontRightOfCenter,
        SpeakerPosition::BackCenter,
        SpeakerPosition::SideLeft,
        SpeakerPosition::SideRight,
    ];

    /// Bit in `dwChannelMask`
    pub fn mask_bit(self) -> u32 {
        match self {
            SpeakerPosition::FrontLeft => 0x0000_0001,
            SpeakerPosition::FrontRight => 0x0000_0002,
            SpeakerPosition::FrontCenter => 0x0000_0004,
            SpeakerPosition::LowFrequency => 0x0000_0008,
            SpeakerPosition::BackLeft => 0x0000_0010,
            SpeakerPosition::BackRight => 0x0000_0020,
            SpeakerPosition::FrontLeftOfCenter => 0x0000_0040,
            SpeakerPosition::FrontRightOfCenter => 0x0000_0080,
            SpeakerPosition::BackCenter => 0x0000_0100,
            SpeakerPosition::SideLeft => 0x0000_0200,
            SpeakerPosition::SideRight => 0x0000_0400,
        }
    }

    /// Short label (`FL`, `LFE`, ...)
    pub fn label(self) -> &'static str {
        match self {
            SpeakerPosition::FrontLeft => "FL",
            SpeakerPosition::FrontRight => "FR",
            SpeakerPosition::FrontCenter => "FC",
            SpeakerPosition::LowFrequency => "LFE",
            SpeakerPosition::BackLeft => "BL",
            SpeakerPosition::BackRight => "BR",
            SpeakerPosition::FrontLeftOfCenter => "FLC",
            SpeakerPosition::FrontRightOfCenter => "FRC",
            SpeakerPosition::BackCenter => "BC",
            SpeakerPosition::SideLeft => "SL",
            SpeakerPosition::SideRight => "SR",
        }
    }

    /// Parse a lowercase FFmpeg layout token (`fl`, `lfe`, ...)
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|pos| pos.label().eq_ignore_ascii_case(token))
    }

    fn is_side(self) -> bool {
        matches!(self, SpeakerPosition::SideLeft | SpeakerPosition::SideRight)
    }

    fn is_back_pair(self) -> bool {
        matches!(self, SpeakerPosition::BackLeft | SpeakerPosition::BackRight)
    }
}

impl fmt::Display for SpeakerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

use SpeakerPosition::{
    BackCenter as BC, BackLeft as BL, BackRight as BR, FrontCenter as FC, FrontLeft as FL,
    FrontLeftOfCenter as FLC, FrontRight as FR, FrontRightOfCenter as FRC, LowFrequency as LFE,
    SideLeft as SL, SideRight as SR,
};

/// FFmpeg named layouts
const NAMED_LAYOUTS: &[(&str, &[SpeakerPosition])] = &[
    ("mono", &[FC]),
    ("stereo", &[FL, FR]),
    ("2.1", &[FL, FR, LFE]),
    ("quad", &[FL, FR, BL, BR]),
    ("4.0", &[FL, FR, FC, BC]),
    ("5.1", &[FL, FR, FC, LFE, BL, BR]),
    ("5.1(side)", &[FL, FR, FC, LFE, SL, SR]),
    ("7.1", &[FL, FR, FC, LFE, BL, BR, SL, SR]),
    ("7.1(wide)", &[FL, FR, FC, LFE, FLC, FRC, SL, SR]),
    ("3.0", &[FL, FR, FC]),
    ("3.0(back)", &[FL, FR, BC]),
    ("3.1", &[FL, FR, FC, LFE]),
    ("quad(side)", &[FL, FR, SL, SR]),
    ("4.1", &[FL, FR, FC, LFE, BC]),
    ("5.0", &[FL, FR, FC, BL, BR]),
    ("5.0(side)", &[FL, FR, FC, SL, SR]),
    ("6.0", &[FL, FR, FC, BC, SL, SR]),
    ("6.0(front)", &[FL, FR, FLC, FRC, SL, SR]),
    // 6.1 is ambiguous in the wild; kept for continuity
    ("6.1", &[FL, FR, FC, LFE, BC, SL, SR]),
    ("7.0", &[FL, FR, FC, BL, BR, SL, SR]),
    ("7.0(front)", &[FL, FR, FC, FLC, FRC, SL, SR]),
    ("7.1(wide-side)", &[FL, FR, FC, LFE, FLC, FRC, SL, SR]),
    // alias of 7.1
    ("7.1(side)", &[FL, FR, FC, LFE, BL, BR, SL, SR]),
];

/// Look up an FFmpeg named layout (already lowercased)
pub fn named_layout(name: &str) -> Option<&'static [SpeakerPosition]> {
    NAMED_LAYOUTS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, positions)| *positions)
}

/// Positions set in a channel mask, in mask-bit order (not padded to channel count)
pub fn positions_from_mask(mask: u32) -> Vec<SpeakerPosition> {
    SpeakerPosition::ALL
        .iter()
        .copied()
        .filter(|pos| mask & pos.mask_bit() != 0)
        .collect()
}

/// Turn a normalized layout name into a stable token (`5.1(side)` -> `51_side`)
pub fn sanitize_layout_token(normalized: &str) -> String {
    let mut token = normalized
        .replace('.', "")
        .replace("(side)", "_side")
        .replace("(wide)", "_wide")
        .replace('(', "_")
        .replace(')', "")
        .replace('-', "_");
    while token.contains("__") {
        token = token.replace("__", "_");
    }
    token.trim_matches('_').to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Positions from a channel mask plus the detail token
/// (`mask_missing`, `mask_underspecified`, `mask_known`, `mask_trimmed`)
pub fn positions_for_mask(
    mask: Option<u32>,
    channels: usize,
) -> (Option<Vec<SpeakerPosition>>, &'static str) {
    let mask = match mask {
        Some(mask) if mask != 0 => mask,
        _ => return (None, "mask_missing"),
    };

    let mut positions = positions_from_mask(mask);
    if positions.len() < channels {
        return (None, "mask_underspecified");
    }
    if positions.len() > channels {
        positions.truncate(channels);
        return (Some(positions), "mask_trimmed");
    }
    (Some(positions), "mask_known")
}

/// Positions from a decoder layout string plus the detail token
pub fn positions_for_layout(
    layout: &str,
    channels: usize,
) -> (Option<Vec<SpeakerPosition>>, String) {
    let normalized = layout.trim().to_lowercase();
    if normalized.is_empty() {
        return (None, "layout_missing".into());
    }
    if normalized == "unknown" {
        return (None, "layout_unknown".into());
    }

    if normalized.contains('+') {
        let mut positions = Vec::new();
        for token in normalized.split('+').filter(|t| !t.is_empty()) {
            match SpeakerPosition::from_token(token) {
                Some(pos) => positions.push(pos),
                None => return (None, "layout_unmapped".into()),
            }
        }
        if positions.is_empty() {
            return (None, "layout_unmapped".into());
        }
        if positions.len() < channels {
            return (None, "layout_list_underspecified".into());
        }
        if positions.len() > channels {
            positions.truncate(channels);
            return (Some(positions), "layout_list_trimmed".into());
        }
        return (Some(positions), "layout_list_exact".into());
    }

    let Some(known) = named_layout(&normalized) else {
        return (None, "layout_unmapped".into());
    };
    if known.len() < channels {
        return (None, "layout_list_underspecified".into());
    }
    if known.len() > channels {
        return (Some(known[..channels].to_vec()), "layout_trimmed".into());
    }
    (Some(known.to_vec()), sanitize_layout_token(&normalized))
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHANNEL WEIGHTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Weight applied to surround positions
pub const SURROUND_WEIGHT: f64 = 1.41;

/// Per-channel BS.1770 weights with the inferred order and diagnostic mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelWeights {
    /// One weight per channel
    pub weights: Vec<f64>,
    /// Inferred positions joined by `,` or `unknown`
    pub order_csv: String,
    /// How the positions were obtained
    pub mode: String,
}

impl ChannelWeights {
    /// All-ones weights
    pub fn uniform(channels: usize, mode: impl Into<String>) -> Self {
        Self {
            weights: vec![1.0; channels],
            order_csv: "unknown".into(),
            mode: mode.into(),
        }
    }

    /// Weights for a stereo pair (FL, FR)
    pub fn stereo() -> Self {
        ChannelWeightResolver::resolve(2, None, Some("stereo"))
    }

    /// Number of channels covered
    pub fn channels(&self) -> usize {
        self.weights.len()
    }

    /// True when positions came from metadata rather than the fallback
    pub fn is_inferred(&self) -> bool {
        !self.mode.starts_with("fallback_")
    }
}

/// Infers BS.1770 channel weights from a WAV mask or decoder layout
pub struct ChannelWeightResolver;

impl ChannelWeightResolver {
    /// Resolve weights for `channels` channels
    pub fn resolve(channels: usize, mask: Option<u32>, layout: Option<&str>) -> ChannelWeights {
        let (positions, mode) = Self::infer_positions(channels, mask, layout);

        let Some(positions) = positions else {
            log::debug!("channel weights fall back to uniform ({mode})");
            return ChannelWeights::uniform(channels, mode);
        };

        let order_csv = if positions.is_empty() {
            "unknown".to_string()
        } else {
            positions
                .iter()
                .map(|p| p.label())
                .collect::<Vec<_>>()
                .join(",")
        };

        ChannelWeights {
            weights: weights_for_positions(&positions),
            order_csv,
            mode,
        }
    }

    /// Positions (aligned to channel indices) and the mode token
    pub fn infer_positions(
        channels: usize,
        mask: Option<u32>,
        layout: Option<&str>,
    ) -> (Option<Vec<SpeakerPosition>>, String) {
        let (positions, mask_detail) = positions_for_mask(mask, channels);
        if let Some(positions) = positions {
            let mode = if mask_detail == "mask_trimmed" {
                "mask_known_mask_trimmed"
            } else {
                "mask_known"
            };
            return (Some(positions), mode.to_string());
        }

        let Some(layout) = layout else {
            return (None, "fallback_layout_missing".into());
        };

        match positions_for_layout(layout, channels) {
            (None, detail) => (None, format!("fallback_{detail}")),
            (Some(positions), detail) => {
                let mut mode = format!("ffmpeg_layout_known_{detail}");
                if detail == "layout_trimmed" || detail == "layout_list_trimmed" {
                    mode.push_str("_layout_trimmed");
                }
                (Some(positions), mode)
            }
        }
    }
}

/// LFE gets 0.0; side pair gets 1.41 when present, otherwise the back pair does
pub fn weights_for_positions(positions: &[SpeakerPosition]) -> Vec<f64> {
    let has_side = positions.iter().any(|p| p.is_side());

    positions
        .iter()
        .map(|&pos| {
            if pos == SpeakerPosition::LowFrequency {
                0.0
            } else if has_side && pos.is_side() {
                SURROUND_WEIGHT
            } else if !has_side && pos.is_back_pair() {
                SURROUND_WEIGHT
            } else {
                1.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_from_mask_order() {
        let positions = positions_from_mask(0x3F);
        assert_eq!(positions, vec![FL, FR, FC, LFE, BL, BR]);
    }

    #[test]
    fn test_mask_5_1_back() {
        let w = ChannelWeightResolver::resolve(6, Some(0x3F), None);
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.41, 1.41]);
        assert_eq!(w.order_csv, "FL,FR,FC,LFE,BL,BR");
        assert_eq!(w.mode, "mask_known");
    }

    #[test]
    fn test_mask_5_1_side() {
        let w = ChannelWeightResolver::resolve(6, Some(0x60F), None);
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.41, 1.41]);
        assert_eq!(w.order_csv, "FL,FR,FC,LFE,SL,SR");
    }

    #[test]
    fn test_mask_7_1_weights_side_over_back() {
        // FL FR FC LFE BL BR SL SR
        let w = ChannelWeightResolver::resolve(8, Some(0x63F), None);
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.41, 1.41]);
    }

    #[test]
    fn test_mask_trimmed() {
        let w = ChannelWeightResolver::resolve(2, Some(0x3F), None);
        assert_eq!(w.weights, vec![1.0, 1.0]);
        assert_eq!(w.mode, "mask_known_mask_trimmed");
    }

    #[test]
    fn test_mask_underspecified_falls_through_to_layout() {
        let w = ChannelWeightResolver::resolve(6, Some(0x3), Some("5.1"));
        assert_eq!(w.mode, "ffmpeg_layout_known_51");
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.41, 1.41]);
    }

    #[test]
    fn test_no_metadata_fallback() {
        let w = ChannelWeightResolver::resolve(6, None, None);
        assert_eq!(w.weights, vec![1.0; 6]);
        assert_eq!(w.order_csv, "unknown");
        assert_eq!(w.mode, "fallback_layout_missing");
        assert!(!w.is_inferred());
    }

    #[test]
    fn test_zero_mask_is_missing() {
        let (positions, detail) = positions_for_mask(Some(0), 2);
        assert!(positions.is_none());
        assert_eq!(detail, "mask_missing");
    }

    #[test]
    fn test_named_layout_modes() {
        let w = ChannelWeightResolver::resolve(6, None, Some("5.1(side)"));
        assert_eq!(w.mode, "ffmpeg_layout_known_51_side");
        assert_eq!(w.order_csv, "FL,FR,FC,LFE,SL,SR");

        let w = ChannelWeightResolver::resolve(2, None, Some(" Stereo "));
        assert_eq!(w.mode, "ffmpeg_layout_known_stereo");
    }

    #[test]
    fn test_named_layout_weights() {
        let w = ChannelWeightResolver::resolve(5, None, Some("5.0"));
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 1.41, 1.41]);

        let w = ChannelWeightResolver::resolve(8, None, Some("7.1(wide)"));
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.41, 1.41]);
        assert_eq!(w.mode, "ffmpeg_layout_known_71_wide");

        let w = ChannelWeightResolver::resolve(4, None, Some("quad(side)"));
        assert_eq!(w.weights, vec![1.0, 1.0, 1.41, 1.41]);
        assert_eq!(w.mode, "ffmpeg_layout_known_quad_side");
    }

    #[test]
    fn test_named_layout_trimmed_and_underspecified() {
        let w = ChannelWeightResolver::resolve(4, None, Some("5.1"));
        assert_eq!(w.mode, "ffmpeg_layout_known_layout_trimmed_layout_trimmed");
        assert_eq!(w.order_csv, "FL,FR,FC,LFE");

        let w = ChannelWeightResolver::resolve(8, None, Some("5.1"));
        assert_eq!(w.mode, "fallback_layout_list_underspecified");
        assert_eq!(w.weights, vec![1.0; 8]);
    }

    #[test]
    fn test_layout_list() {
        let w = ChannelWeightResolver::resolve(6, None, Some("FL+FR+FC+LFE+BL+BR"));
        assert_eq!(w.mode, "ffmpeg_layout_known_layout_list_exact");
        assert_eq!(w.weights, vec![1.0, 1.0, 1.0, 0.0, 1.41, 1.41]);

        let w = ChannelWeightResolver::resolve(2, None, Some("fl+fr+fc"));
        assert_eq!(
            w.mode,
            "ffmpeg_layout_known_layout_list_trimmed_layout_trimmed"
        );

        let w = ChannelWeightResolver::resolve(3, None, Some("fl+fr"));
        assert_eq!(w.mode, "fallback_layout_list_underspecified");
    }

    #[test]
    fn test_layout_unmapped_and_unknown() {
        let w = ChannelWeightResolver::resolve(2, None, Some("fl+xx"));
        assert_eq!(w.mode, "fallback_layout_unmapped");

        let w = ChannelWeightResolver::resolve(2, None, Some("hexadecagonal"));
        assert_eq!(w.mode, "fallback_layout_unmapped");

        let w = ChannelWeightResolver::resolve(2, None, Some("unknown"));
        assert_eq!(w.mode, "fallback_layout_unknown");

        let w = ChannelWeightResolver::resolve(2, None, Some("   "));
        assert_eq!(w.mode, "fallback_layout_missing");
    }

    #[test]
    fn test_sanitize_layout_token() {
        assert_eq!(sanitize_layout_token("5.1(side)"), "51_side");
        assert_eq!(sanitize_layout_token("7.1(wide-side)"), "71_wide_side");
        assert_eq!(sanitize_layout_token("3.0(back)"), "30_back");
        assert_eq!(sanitize_layout_token("stereo"), "stereo");
    }

    #[test]
    fn test_lfe_always_zero() {
        for (name, positions) in NAMED_LAYOUTS {
            let w = ChannelWeightResolver::resolve(positions.len(), None, Some(name));
            assert_eq!(w.channels(), positions.len());
            for (weight, pos) in w.weights.iter().zip(positions.iter()) {
                if *pos == LFE {
                    assert_eq!(*weight, 0.0, "{name}");
                }
            }
        }
    }
}
