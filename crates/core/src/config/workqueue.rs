use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Work queue + DLQ
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkqueueConfig {
    #[serde(default = "d_ack_timeout_ms")]
    pub workqueue_ack_timeout_ms: u64,
    #[serde(default = "d_max_attempts")]
    pub workqueue_max_attempts: u32,
    #[serde(default = "d_dlq_ttl_ms")]
    pub workqueue_dlq_ttl_ms: u64,
}

impl Default for WorkqueueConfig {
    fn default() -> Self {
        Self {
            workqueue_ack_timeout_ms: d_ack_timeout_ms(),
            workqueue_max_attempts: d_max_attempts(),
            workqueue_dlq_ttl_ms: d_dlq_ttl_ms(),
        }
    }
}

fn d_ack_timeout_ms() -> u64 {
    5 * 60 * 1000 // 5 min default ack_wait.
}
fn d_max_attempts() -> u32 {
    3
}
fn d_dlq_ttl_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000 // 7 day DLQ retention.
}
