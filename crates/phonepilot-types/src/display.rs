//! Live view vs. screenshot display arbitration types.

use serde::{Deserialize, Serialize};

/// The operator's display preference for a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Prefer the live video, fall back to screenshots when it fails.
    #[default]
    Auto,
    /// Always use the live video.
    Video,
    /// Always poll screenshots.
    Screenshot,
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "video" => Ok(Self::Video),
            "screenshot" => Ok(Self::Screenshot),
            other => Err(format!("unknown display mode: {other}")),
        }
    }
}

/// Health of the live video transport for one device.
///
/// A one-way latch: once `Failed`, it stays failed for the device's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoHealth {
    #[default]
    Unknown,
    Failed,
}

/// What is actually shown for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveMode {
    Video,
    Screenshot,
}

impl EffectiveMode {
    /// Resolve the preference against the live transport's health.
    pub fn resolve(mode: DisplayMode, health: VideoHealth) -> Self {
        match (mode, health) {
            (DisplayMode::Video, _) => EffectiveMode::Video,
            (DisplayMode::Screenshot, _) => EffectiveMode::Screenshot,
            (DisplayMode::Auto, VideoHealth::Failed) => EffectiveMode::Screenshot,
            (DisplayMode::Auto, VideoHealth::Unknown) => EffectiveMode::Video,
        }
    }
}

/// Notifications from the live view back to the console.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveViewEvent {
    /// The video is unusable (connect failure, stream error, timeout).
    Fallback { reason: String },
    /// Outcome of a tap forwarded to the device.
    TapResult {
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    /// Outcome of a swipe forwarded to the device.
    SwipeResult {
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_all_combinations() {
        use DisplayMode::*;
        use VideoHealth::*;
        assert_eq!(EffectiveMode::resolve(Video, Unknown), EffectiveMode::Video);
        assert_eq!(EffectiveMode::resolve(Video, Failed), EffectiveMode::Video);
        assert_eq!(EffectiveMode::resolve(Screenshot, Unknown), EffectiveMode::Screenshot);
        assert_eq!(EffectiveMode::resolve(Screenshot, Failed), EffectiveMode::Screenshot);
        assert_eq!(EffectiveMode::resolve(Auto, Unknown), EffectiveMode::Video);
        assert_eq!(EffectiveMode::resolve(Auto, Failed), EffectiveMode::Screenshot);
    }

    #[test]
    fn display_mode_parse() {
        assert_eq!("AUTO".parse::<DisplayMode>().unwrap(), DisplayMode::Auto);
        assert_eq!("screenshot".parse::<DisplayMode>().unwrap(), DisplayMode::Screenshot);
        assert!("hologram".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn live_view_event_tagging() {
        let ev = LiveViewEvent::TapResult {
            success: false,
            message: Some("adb offline".into()),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"kind\":\"tap_result\""));
    }
}
