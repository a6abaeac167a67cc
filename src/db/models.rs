use serde::{Deserialize, Serialize};

/// One server's participation in one relay category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub server_id: String,
    pub input_channel_id: String,
    pub output_channel_id: String,
    pub category: String,
}

/// Role to mention in a server for a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub server_id: String,
    pub category: String,
    pub role_id: String,
}
