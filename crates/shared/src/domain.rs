use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<i64>().map($name)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(GuildId);
id_newtype!(ChannelId);
id_newtype!(MessageId);
id_newtype!(RoleId);

/// Longest panel id accepted by [`PanelId::parse`].
pub const MAX_PANEL_ID_LEN: usize = 64;

/// Creator-chosen panel key, e.g. `staff-main`.
///
/// Restricted to `[A-Za-z0-9_-]` so it can be embedded in a routing
/// identifier without ever introducing an extra `:` separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanelId(String);

impl PanelId {
    /// Surrounding whitespace is rejected rather than trimmed.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.len() > MAX_PANEL_ID_LEN {
            return None;
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Text,
    Voice,
}

/// Point-in-time view of a guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub role_id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub rank: i64,
    /// Owned by an external integration; never hand-assignable.
    pub managed: bool,
    /// The guild's implicit role held by every member.
    pub is_everyone: bool,
    /// Holding this role grants the baseline administrative capability.
    pub manage_roles: bool,
    /// Holding this role allows configuring the guild, panels included.
    #[serde(default)]
    pub manage_guild: bool,
}

/// Point-in-time view of a guild member, detached from any storage handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub username: String,
    pub role_ids: BTreeSet<RoleId>,
    pub highest_rank: i64,
    pub is_owner: bool,
    pub can_manage_roles: bool,
    #[serde(default)]
    pub can_manage_guild: bool,
}

impl MemberSnapshot {
    pub fn holds(&self, role_id: RoleId) -> bool {
        self.role_ids.contains(&role_id)
    }
}

pub const DEFAULT_PANEL_TITLE: &str = "Staff Role Assignment Panel";
pub const DEFAULT_PANEL_BODY: &str = "Pick a user + role, then assign/remove.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    pub panel_id: PanelId,
    pub guild_id: GuildId,
    pub display_name: String,
    pub title: String,
    pub body_text: String,
    /// Insertion ordered; the role picker offers the first entries.
    pub allowed_role_ids: Vec<RoleId>,
    /// Empty means no restriction beyond the base permission.
    pub staff_role_ids: Vec<RoleId>,
    pub requires_elevated_permission: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
}

impl PanelConfig {
    pub fn new(panel_id: PanelId, guild_id: GuildId, display_name: impl Into<String>) -> Self {
        Self {
            panel_id,
            guild_id,
            display_name: display_name.into(),
            title: DEFAULT_PANEL_TITLE.to_string(),
            body_text: DEFAULT_PANEL_BODY.to_string(),
            allowed_role_ids: Vec::new(),
            staff_role_ids: Vec::new(),
            requires_elevated_permission: true,
            log_channel_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Pushes `id` unless already present. Returns whether the list changed.
pub fn insert_unique(ids: &mut Vec<RoleId>, id: RoleId) -> bool {
    if ids.contains(&id) {
        return false;
    }
    ids.push(id);
    true
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
