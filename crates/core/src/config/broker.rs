use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `nats://`, `tls://`, `ws://`, or `wss://`, with optional embedded
    /// credentials. Falls back to `broker_user`/`broker_pass` if unset.
    #[serde(default = "d_broker_url")]
    pub broker_url: String,
    #[serde(default)]
    pub broker_user: Option<String>,
    #[serde(default)]
    pub broker_pass: Option<String>,
    #[serde(default)]
    pub project_path_override: Option<String>,
    #[serde(default)]
    pub project_id_override: Option<String>,
    #[serde(default)]
    pub agent_id_override: Option<String>,
    #[serde(default)]
    pub subagent_type: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: d_broker_url(),
            broker_user: None,
            broker_pass: None,
            project_path_override: None,
            project_id_override: None,
            agent_id_override: None,
            subagent_type: None,
        }
    }
}

fn d_broker_url() -> String {
    "nats://127.0.0.1:4222".into()
}
