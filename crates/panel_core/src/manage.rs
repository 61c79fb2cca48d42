//! Panel management operations. Every call is scoped to one guild and
//! requires the caller to hold the administrative capability there.

use shared::{
    domain::{
        insert_unique, ChannelId, GuildId, MemberSnapshot, MessageId, PanelConfig, PanelId,
        RoleId, UserId, MAX_PANEL_ID_LEN,
    },
    protocol::PanelSummary,
};
use tracing::info;

use crate::{
    access::{can_manage_panels, validate_panel_role},
    error::PanelError,
    presentation::{build_panel_layout, offered_role_ids, PanelLayout, MAX_ROLE_OPTIONS},
    PanelContext,
};

const MAX_DISPLAY_NAME_LEN: usize = 100;
const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct RoleListUpdate {
    pub panel: PanelConfig,
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PostedPanel {
    pub message_id: MessageId,
    pub layout: PanelLayout,
}

pub fn summarize(panel: &PanelConfig) -> PanelSummary {
    PanelSummary {
        panel_id: panel.panel_id.clone(),
        display_name: panel.display_name.clone(),
        allowed_roles: panel.allowed_role_ids.len(),
        staff_roles: panel.staff_role_ids.len(),
    }
}

pub async fn create_panel(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    raw_panel_id: &str,
    display_name: &str,
) -> Result<PanelConfig, PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    let panel_id = PanelId::parse(raw_panel_id.trim()).ok_or_else(|| {
        PanelError::Validation(format!(
            "panel_id must be 1-{MAX_PANEL_ID_LEN} characters of letters, digits, '-' or '_'"
        ))
    })?;
    let display_name = bounded_text(display_name, "name", MAX_DISPLAY_NAME_LEN)?;
    if display_name.is_empty() {
        return Err(PanelError::Validation("name must not be empty".into()));
    }

    let panel = PanelConfig::new(panel_id, guild_id, display_name);
    if !ctx.registry.insert(&panel).await? {
        return Err(PanelError::Conflict("That panel_id already exists.".into()));
    }
    info!(panel_id = %panel.panel_id, guild = %guild_id, actor = %actor_id, "panel created");
    Ok(panel)
}

pub async fn delete_panel(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
) -> Result<(), PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    load(ctx, guild_id, panel_id).await?;
    ctx.registry.delete(panel_id).await?;
    info!(%panel_id, guild = %guild_id, actor = %actor_id, "panel deleted");
    Ok(())
}

pub async fn list_panels(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
) -> Result<Vec<PanelSummary>, PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    let panels = ctx.registry.list(guild_id).await?;
    Ok(panels
        .iter()
        .filter(|panel| panel.guild_id == guild_id)
        .map(summarize)
        .collect())
}

pub async fn panel_info(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
) -> Result<PanelConfig, PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    load(ctx, guild_id, panel_id).await
}

pub async fn set_text(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    title: Option<&str>,
    body: Option<&str>,
) -> Result<PanelConfig, PanelError> {
    let title = title
        .map(|title| bounded_text(title, "title", MAX_DISPLAY_NAME_LEN))
        .transpose()?;
    let body = body
        .map(|body| bounded_text(body, "text", MAX_TEXT_LEN))
        .transpose()?;
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        if let Some(title) = title {
            panel.title = title;
        }
        if let Some(body) = body {
            panel.body_text = body;
        }
    })
    .await
}

pub async fn set_elevated(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    required: bool,
) -> Result<PanelConfig, PanelError> {
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.requires_elevated_permission = required;
    })
    .await
}

pub async fn set_log_channel(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    channel_id: Option<ChannelId>,
) -> Result<PanelConfig, PanelError> {
    if let Some(channel_id) = channel_id {
        if !ctx.platform.text_channel_in_guild(guild_id, channel_id).await? {
            return Err(PanelError::NotFound("Channel not found.".into()));
        }
    }
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.log_channel_id = channel_id;
    })
    .await
}

pub async fn allow_role(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    role_id: RoleId,
) -> Result<RoleListUpdate, PanelError> {
    let role = ctx
        .platform
        .resolve_role(guild_id, role_id)
        .await?
        .ok_or_else(|| PanelError::NotFound("Role not found.".into()))?;
    validate_panel_role(&role)?;

    let panel = edit(ctx, actor_id, guild_id, panel_id, |panel| {
        insert_unique(&mut panel.allowed_role_ids, role_id);
    })
    .await?;
    let warning = (panel.allowed_role_ids.len() > MAX_ROLE_OPTIONS).then(|| {
        format!(
            "Role pickers can only show {MAX_ROLE_OPTIONS} roles. Only the first {} will display.",
            offered_role_ids(&panel).len()
        )
    });
    Ok(RoleListUpdate { panel, warning })
}

pub async fn disallow_role(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    role_id: RoleId,
) -> Result<PanelConfig, PanelError> {
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.allowed_role_ids.retain(|id| *id != role_id);
    })
    .await
}

pub async fn clear_roles(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
) -> Result<PanelConfig, PanelError> {
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.allowed_role_ids.clear();
    })
    .await
}

pub async fn allow_staff(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    role_id: RoleId,
) -> Result<PanelConfig, PanelError> {
    ctx.platform
        .resolve_role(guild_id, role_id)
        .await?
        .ok_or_else(|| PanelError::NotFound("Role not found.".into()))?;
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        insert_unique(&mut panel.staff_role_ids, role_id);
    })
    .await
}

pub async fn disallow_staff(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    role_id: RoleId,
) -> Result<PanelConfig, PanelError> {
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.staff_role_ids.retain(|id| *id != role_id);
    })
    .await
}

pub async fn clear_staff(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
) -> Result<PanelConfig, PanelError> {
    edit(ctx, actor_id, guild_id, panel_id, |panel| {
        panel.staff_role_ids.clear();
    })
    .await
}

/// Builds the panel's controls and posts them to `channel_id` as the system account.
pub async fn post_panel(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    channel_id: ChannelId,
) -> Result<PostedPanel, PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    let panel = load(ctx, guild_id, panel_id).await?;
    if !ctx.platform.text_channel_in_guild(guild_id, channel_id).await? {
        return Err(PanelError::NotFound("Channel not found.".into()));
    }

    let mut roles = Vec::new();
    for role_id in offered_role_ids(&panel) {
        if let Some(role) = ctx.platform.resolve_role(guild_id, *role_id).await? {
            roles.push(role);
        }
    }
    let layout = build_panel_layout(&panel, &roles);
    let components = serde_json::to_string(&layout).map_err(anyhow::Error::from)?;
    let message_id = ctx
        .platform
        .post_message(
            guild_id,
            channel_id,
            ctx.system_user_id,
            &layout.message_text(),
            Some(&components),
        )
        .await?;
    info!(%panel_id, %channel_id, %message_id, "panel posted");
    Ok(PostedPanel { message_id, layout })
}

async fn authorize(
    ctx: &PanelContext,
    guild_id: GuildId,
    actor_id: UserId,
) -> Result<MemberSnapshot, PanelError> {
    ctx.platform
        .resolve_member(guild_id, actor_id)
        .await?
        .filter(can_manage_panels)
        .ok_or_else(|| PanelError::AccessDenied("You need Manage Server to manage panels.".into()))
}

async fn load(
    ctx: &PanelContext,
    guild_id: GuildId,
    panel_id: &PanelId,
) -> Result<PanelConfig, PanelError> {
    ctx.scoped_panel(guild_id, panel_id)
        .await?
        .ok_or_else(|| PanelError::NotFound("Panel not found.".into()))
}

async fn edit(
    ctx: &PanelContext,
    actor_id: UserId,
    guild_id: GuildId,
    panel_id: &PanelId,
    apply: impl FnOnce(&mut PanelConfig),
) -> Result<PanelConfig, PanelError> {
    authorize(ctx, guild_id, actor_id).await?;
    let mut panel = load(ctx, guild_id, panel_id).await?;
    apply(&mut panel);
    ctx.registry.update(&panel).await?;
    Ok(panel)
}

fn bounded_text(raw: &str, field: &str, max_len: usize) -> Result<String, PanelError> {
    let value = raw.trim();
    if value.chars().count() > max_len {
        return Err(PanelError::Validation(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
#[path = "tests/manage_tests.rs"]
mod tests;
