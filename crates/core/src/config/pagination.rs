use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "d_channels_read_max")]
    pub channels_read_max: usize,
    #[serde(default = "d_registry_discover_max")]
    pub registry_discover_max: usize,
    #[serde(default = "d_messages_read_max")]
    pub messages_read_max: usize,
    #[serde(default = "d_work_list_max")]
    pub work_list_max: usize,
    #[serde(default = "d_dlq_list_max")]
    pub dlq_list_max: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            channels_read_max: d_channels_read_max(),
            registry_discover_max: d_registry_discover_max(),
            messages_read_max: d_messages_read_max(),
            work_list_max: d_work_list_max(),
            dlq_list_max: d_dlq_list_max(),
        }
    }
}

fn d_channels_read_max() -> usize {
    1000
}
fn d_registry_discover_max() -> usize {
    1000
}
fn d_messages_read_max() -> usize {
    1000
}
fn d_work_list_max() -> usize {
    1000
}
fn d_dlq_list_max() -> usize {
    1000
}

/// Default page size when the caller omits `limit`.
pub const DEFAULT_CHANNELS_READ_LIMIT: usize = 50;
