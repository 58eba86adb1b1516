use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Declarative channel definitions. Defaults to three channels:
    /// `roadmap`, `parallel-work`, `errors`.
    #[serde(default = "d_channels")]
    pub channels: Vec<ChannelDef>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            channels: d_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub retention: ChannelRetention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRetention {
    /// `None` = unbounded.
    #[serde(default)]
    pub max_messages: Option<u64>,
    /// Max age in seconds. `None` = unbounded.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for ChannelRetention {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_age_secs: None,
        }
    }
}

fn d_channels() -> Vec<ChannelDef> {
    vec![
        ChannelDef {
            name: "roadmap".into(),
            description: "Longer-lived plans and direction".into(),
            retention: ChannelRetention::default(),
        },
        ChannelDef {
            name: "parallel-work".into(),
            description: "In-flight coordination chatter".into(),
            retention: ChannelRetention::default(),
        },
        ChannelDef {
            name: "errors".into(),
            description: "Failures worth other agents knowing about".into(),
            retention: ChannelRetention::default(),
        },
    ]
}

/// Channel names are restricted to `[a-z0-9-]+`.
pub fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(is_valid_channel_name("roadmap"));
        assert!(is_valid_channel_name("parallel-work"));
        assert!(is_valid_channel_name("team-42"));
    }

    #[test]
    fn invalid_names() {
        assert!(!is_valid_channel_name(""));
        assert!(!is_valid_channel_name("Roadmap"));
        assert!(!is_valid_channel_name("has_underscore"));
        assert!(!is_valid_channel_name("has space"));
    }
}
