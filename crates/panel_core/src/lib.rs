//! Staff role panels: access decisions, per-operator selection state and the
//! interaction protocol that turns component clicks into role mutations.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{
    ChannelId, GuildId, MemberSnapshot, MessageId, PanelConfig, PanelId, RoleId, RoleSnapshot,
    UserId,
};

pub mod access;
pub mod dispatcher;
pub mod error;
pub mod manage;
pub mod presentation;
pub mod routing;
pub mod selection;

pub use dispatcher::{Dispatched, Dispatcher};
pub use error::PanelError;
pub use selection::{InMemorySelectionStore, Selection, SelectionStore};

/// Durable store of panel configurations keyed by panel id.
///
/// Keys are global; callers must compare `guild_id` on every read.
#[async_trait]
pub trait PanelRegistry: Send + Sync {
    async fn get(&self, panel_id: &PanelId) -> Result<Option<PanelConfig>>;
    /// Panels of one guild in insertion order.
    async fn list(&self, guild_id: GuildId) -> Result<Vec<PanelConfig>>;
    /// Returns `false` without writing if the id is already taken.
    async fn insert(&self, panel: &PanelConfig) -> Result<bool>;
    async fn update(&self, panel: &PanelConfig) -> Result<()>;
    async fn delete(&self, panel_id: &PanelId) -> Result<bool>;
}

/// Membership and role capabilities of the hosting platform.
#[async_trait]
pub trait GuildPlatform: Send + Sync {
    async fn resolve_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<MemberSnapshot>>;
    async fn resolve_role(&self, guild_id: GuildId, role_id: RoleId)
        -> Result<Option<RoleSnapshot>>;
    /// Panels and audit notices only go to text channels of the guild.
    async fn text_channel_in_guild(&self, guild_id: GuildId, channel_id: ChannelId)
        -> Result<bool>;
    async fn add_role_to_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()>;
    async fn remove_role_from_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        justification: &str,
    ) -> Result<()>;
    async fn post_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        author_id: UserId,
        content: &str,
        components_json: Option<&str>,
    ) -> Result<MessageId>;
}

/// Capabilities shared by the dispatcher and the panel management operations.
#[derive(Clone)]
pub struct PanelContext {
    pub registry: Arc<dyn PanelRegistry>,
    pub platform: Arc<dyn GuildPlatform>,
    pub selections: Arc<dyn SelectionStore>,
    /// Service account acting on the platform; its standing caps what panels can touch.
    pub system_user_id: UserId,
}

impl PanelContext {
    /// Looks a panel up by id and drops it unless it belongs to `guild_id`.
    pub async fn scoped_panel(
        &self,
        guild_id: GuildId,
        panel_id: &PanelId,
    ) -> Result<Option<PanelConfig>> {
        let panel = self.registry.get(panel_id).await?;
        Ok(panel.filter(|panel| panel.guild_id == guild_id))
    }

    pub(crate) async fn system_member(&self, guild_id: GuildId) -> Result<MemberSnapshot, PanelError> {
        self.platform
            .resolve_member(guild_id, self.system_user_id)
            .await?
            .ok_or_else(|| PanelError::NotFound("I am not a member of this server.".into()))
    }
}

#[cfg(test)]
#[path = "tests/fakes.rs"]
pub(crate) mod fakes;
