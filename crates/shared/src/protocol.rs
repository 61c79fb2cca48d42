use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChannelId, GuildId, MessageId, PanelId, RoleId, UserId},
    error::ErrorCode,
};

/// Widget that produced an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    UserSelect,
    StringSelect,
    Button,
}

/// Inbound component interaction. `guild_id` is absent for interactions
/// raised outside any guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<GuildId>,
    pub operator_id: UserId,
    pub custom_id: String,
    pub kind: ComponentKind,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Private, operator-only response to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionReply {
    pub content: String,
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
}

impl InteractionReply {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
            error: None,
        }
    }

    pub fn denied(code: ErrorCode, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
            error: Some(code),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleChange {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSummary {
    pub panel_id: PanelId,
    pub display_name: String,
    pub allowed_roles: usize,
    pub staff_roles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MemberRolesUpdated {
        guild_id: GuildId,
        target_user_id: UserId,
        role_id: RoleId,
        change: RoleChange,
    },
    MessagePosted {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    },
    PanelUpdated {
        guild_id: GuildId,
        panel: PanelSummary,
    },
    PanelDeleted {
        guild_id: GuildId,
        panel_id: PanelId,
    },
}
