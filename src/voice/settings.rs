//! Per-request audio settings and the remote voice catalog

use serde::{Deserialize, Serialize};

/// Voice used when a requested name is not in the catalog
pub const DEFAULT_VOICE: &str = "Charon";

/// Prebuilt voices accepted by the remote backend
pub const PREBUILT_VOICES: [&str; 30] = [
    "Achernar",
    "Achird",
    "Algenib",
    "Algieba",
    "Alnilam",
    "Aoede",
    "Autonoe",
    "Callirrhoe",
    "Charon",
    "Despina",
    "Enceladus",
    "Erinome",
    "Fenrir",
    "Gacrux",
    "Iapetus",
    "Kore",
    "Laomedeia",
    "Leda",
    "Orus",
    "Puck",
    "Pulcherrima",
    "Rasalgethi",
    "Sadachbia",
    "Sadaltager",
    "Schedar",
    "Sulafat",
    "Umbriel",
    "Vindemiatrix",
    "Zephyr",
    "Zubenelgenubi",
];

/// Pitch bounds accepted by both speech paths
const PITCH_RANGE: (f32, f32) = (0.1, 2.0);

/// Rate bounds accepted by both speech paths
const RATE_RANGE: (f32, f32) = (0.1, 10.0);

/// Voice, pitch and rate for one synthesis request
///
/// Chosen once before segmentation and never mutated while a request runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Remote voice name (normalized against [`PREBUILT_VOICES`] at call time)
    pub voice_name: String,
    /// Pitch multiplier (0.1 to 2.0)
    pub pitch: f32,
    /// Speaking rate multiplier (0.1 to 10.0)
    pub rate: f32,
    /// Preferred on-device voice identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_voice: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            voice_name: DEFAULT_VOICE.to_string(),
            pitch: 1.0,
            rate: 1.0,
            local_voice: None,
        }
    }
}

impl AudioSettings {
    /// Settings for the given voice with neutral pitch and rate
    #[must_use]
    pub fn with_voice(voice_name: impl Into<String>) -> Self {
        Self {
            voice_name: voice_name.into(),
            ..Self::default()
        }
    }

    /// Copy of these settings with pitch and rate clamped into range
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            pitch: clamp_or_default(self.pitch, PITCH_RANGE),
            rate: clamp_or_default(self.rate, RATE_RANGE),
            ..self.clone()
        }
    }
}

/// NaN falls back to 1.0 rather than poisoning the engine arguments
fn clamp_or_default(value: f32, (min, max): (f32, f32)) -> f32 {
    if value.is_nan() {
        1.0
    } else {
        value.clamp(min, max)
    }
}

/// Resolve a requested voice name to a catalog entry
///
/// Matching is case-insensitive on the trimmed name. Names that merely mention
/// `charon` or `kore` (e.g. "charon-deep") resolve to those voices; anything
/// else resolves to [`DEFAULT_VOICE`] instead of failing the call.
#[must_use]
pub fn resolve_voice(name: &str) -> &'static str {
    let normalized = name.trim().to_lowercase();

    if let Some(voice) = PREBUILT_VOICES
        .into_iter()
        .find(|v| v.to_lowercase() == normalized)
    {
        return voice;
    }

    if normalized.contains("charon") {
        return "Charon";
    }
    if normalized.contains("kore") {
        return "Kore";
    }

    DEFAULT_VOICE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_exact_names_case_insensitively() {
        assert_eq!(resolve_voice("puck"), "Puck");
        assert_eq!(resolve_voice("  ZEPHYR "), "Zephyr");
        assert_eq!(resolve_voice("Zubenelgenubi"), "Zubenelgenubi");
    }

    #[test]
    fn resolves_partial_mentions() {
        assert_eq!(resolve_voice("charon-deep"), "Charon");
        assert_eq!(resolve_voice("my kore voice"), "Kore");
    }

    #[test]
    fn unknown_voice_falls_back_to_default() {
        assert_eq!(resolve_voice("alloy"), DEFAULT_VOICE);
        assert_eq!(resolve_voice(""), DEFAULT_VOICE);
    }

    #[test]
    fn clamps_pitch_and_rate() {
        let settings = AudioSettings {
            pitch: 5.0,
            rate: 0.0,
            ..AudioSettings::default()
        }
        .clamped();
        assert!((settings.pitch - 2.0).abs() < f32::EPSILON);
        assert!((settings.rate - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn nan_settings_become_neutral() {
        let settings = AudioSettings {
            pitch: f32::NAN,
            ..AudioSettings::default()
        }
        .clamped();
        assert!((settings.pitch - 1.0).abs() < f32::EPSILON);
    }
}
