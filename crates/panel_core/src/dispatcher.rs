use shared::{
    domain::{GuildId, MemberSnapshot, PanelConfig, RoleId, RoleSnapshot, UserId},
    error::ErrorCode,
    protocol::{ComponentKind, InteractionEvent, InteractionReply, RoleChange, ServerEvent},
};
use tracing::{debug, error, info, warn};

use crate::{
    access::{can_operate, hierarchy_ok, role_is_assignable, validate_panel_role},
    error::{PanelError, GENERIC_FAILURE},
    routing::{Route, RouteAction},
    PanelContext,
};

const PANEL_GONE: &str = "This panel config no longer exists.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Assign,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    SelectTarget(UserId),
    SelectRole(RoleId),
    Commit(CommitKind),
}

impl Step {
    /// `None` when the widget kind does not match the routed action or the
    /// selected value is unusable; such interactions come from stale or
    /// foreign controls and are ignored.
    fn from_event(action: RouteAction, event: &InteractionEvent) -> Option<Self> {
        match (action, event.kind) {
            (RouteAction::Target, ComponentKind::UserSelect) => {
                single_value(event).map(Self::SelectTarget)
            }
            (RouteAction::Role, ComponentKind::StringSelect) => {
                single_value(event).map(Self::SelectRole)
            }
            (RouteAction::Assign, ComponentKind::Button) => Some(Self::Commit(CommitKind::Assign)),
            (RouteAction::Remove, ComponentKind::Button) => Some(Self::Commit(CommitKind::Remove)),
            _ => None,
        }
    }
}

// Both pickers are single-choice; anything else did not come from our layout.
fn single_value<T: std::str::FromStr>(event: &InteractionEvent) -> Option<T> {
    match event.values.as_slice() {
        [only] => only.parse().ok(),
        _ => None,
    }
}

/// Result of a handled interaction.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub reply: InteractionReply,
    /// Broadcastable change, present only when a role mutation happened.
    pub event: Option<ServerEvent>,
}

impl Dispatched {
    fn reply(reply: InteractionReply) -> Self {
        Self { reply, event: None }
    }
}

/// Routes component interactions through the selection state machine.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: PanelContext,
}

impl Dispatcher {
    pub fn new(ctx: PanelContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PanelContext {
        &self.ctx
    }

    /// Handles one interaction. `None` means the interaction was not ours
    /// and gets no response at all.
    pub async fn dispatch(&self, event: &InteractionEvent) -> Option<Dispatched> {
        let route = Route::parse(&event.custom_id)?;
        let Some(step) = Step::from_event(route.action, event) else {
            debug!(custom_id = %event.custom_id, kind = ?event.kind, "ignoring unusable panel interaction");
            return None;
        };

        let operator_id = event.operator_id;
        match self.handle(event.guild_id, operator_id, &route, step).await {
            Ok(dispatched) => Some(dispatched),
            Err(PanelError::Internal(err)) => {
                error!(panel_id = %route.panel_id, operator = %operator_id, error = ?err, "panel interaction failed");
                Some(Dispatched::reply(InteractionReply::denied(
                    ErrorCode::Internal,
                    GENERIC_FAILURE,
                )))
            }
            Err(err) => {
                if let PanelError::Platform(message) = &err {
                    warn!(panel_id = %route.panel_id, operator = %operator_id, %message, "platform rejected role change");
                } else {
                    debug!(panel_id = %route.panel_id, operator = %operator_id, code = ?err.code(), "panel interaction denied");
                }
                Some(Dispatched::reply(InteractionReply::denied(
                    err.code(),
                    err.operator_message(),
                )))
            }
        }
    }

    async fn handle(
        &self,
        guild_id: Option<GuildId>,
        operator_id: UserId,
        route: &Route,
        step: Step,
    ) -> Result<Dispatched, PanelError> {
        let Some(guild_id) = guild_id else {
            return Err(PanelError::NotFound(PANEL_GONE.into()));
        };
        // Fetched per event so each step sees the current configuration.
        let panel = self
            .ctx
            .scoped_panel(guild_id, &route.panel_id)
            .await?
            .ok_or_else(|| PanelError::NotFound(PANEL_GONE.into()))?;

        let operator = self
            .ctx
            .platform
            .resolve_member(guild_id, operator_id)
            .await?
            .filter(|operator| can_operate(operator, &panel))
            .ok_or_else(|| PanelError::AccessDenied("No access.".into()))?;

        match step {
            Step::SelectTarget(target) => self.select_target(&panel, &operator, target).await,
            Step::SelectRole(role_id) => self.select_role(&panel, &operator, role_id).await,
            Step::Commit(kind) => self.commit(&panel, &operator, kind).await,
        }
    }

    async fn select_target(
        &self,
        panel: &PanelConfig,
        operator: &MemberSnapshot,
        target: UserId,
    ) -> Result<Dispatched, PanelError> {
        self.ctx
            .selections
            .set_target(operator.user_id, &panel.panel_id, target)
            .await?;
        Ok(Dispatched::reply(InteractionReply::ok(format!(
            "User set: {target}"
        ))))
    }

    async fn select_role(
        &self,
        panel: &PanelConfig,
        operator: &MemberSnapshot,
        role_id: RoleId,
    ) -> Result<Dispatched, PanelError> {
        let role = self.vet_role(panel, operator, role_id).await?;

        self.ctx
            .selections
            .set_role(operator.user_id, &panel.panel_id, role_id)
            .await?;
        Ok(Dispatched::reply(InteractionReply::ok(format!(
            "Role set: {}",
            role.name
        ))))
    }

    async fn commit(
        &self,
        panel: &PanelConfig,
        operator: &MemberSnapshot,
        kind: CommitKind,
    ) -> Result<Dispatched, PanelError> {
        let guild_id = panel.guild_id;
        let selection = self.ctx.selections.get(operator.user_id).await?;
        let (target_id, role_id) = selection.ready_for(&panel.panel_id)?;

        let target = self
            .ctx
            .platform
            .resolve_member(guild_id, target_id)
            .await?
            .ok_or_else(|| PanelError::NotFound("Couldn't find that user.".into()))?;
        let role = self.vet_role(panel, operator, role_id).await?;

        let justification = format!(
            "Staff panel {} by {} ({})",
            panel.panel_id, operator.username, operator.user_id
        );
        let platform = &self.ctx.platform;
        let (mutation, change) = match kind {
            CommitKind::Assign => (
                platform
                    .add_role_to_member(guild_id, target_id, role_id, &justification)
                    .await,
                RoleChange::Added,
            ),
            CommitKind::Remove => (
                platform
                    .remove_role_from_member(guild_id, target_id, role_id, &justification)
                    .await,
                RoleChange::Removed,
            ),
        };
        mutation.map_err(|err| PanelError::Platform(err.to_string()))?;

        self.ctx.selections.clear(operator.user_id).await?;
        info!(
            panel_id = %panel.panel_id,
            operator = %operator.user_id,
            target = %target_id,
            role = %role_id,
            ?change,
            "panel role change applied"
        );

        let summary = match change {
            RoleChange::Added => format!("Added {} to {}", role.name, target.username),
            RoleChange::Removed => format!("Removed {} from {}", role.name, target.username),
        };
        self.send_audit_notice(panel, operator, &summary);

        Ok(Dispatched {
            reply: InteractionReply::ok(summary),
            event: Some(ServerEvent::MemberRolesUpdated {
                guild_id,
                target_user_id: target_id,
                role_id,
                change,
            }),
        })
    }

    /// Shared by role selection and commit. Managed and everyone roles report
    /// the hierarchy reason even when the panel does not offer them.
    async fn vet_role(
        &self,
        panel: &PanelConfig,
        operator: &MemberSnapshot,
        role_id: RoleId,
    ) -> Result<RoleSnapshot, PanelError> {
        let role = self
            .ctx
            .platform
            .resolve_role(panel.guild_id, role_id)
            .await?;
        if !role_is_assignable(panel, role_id) {
            if let Some(role) = &role {
                validate_panel_role(role)?;
            }
            return Err(PanelError::AccessDenied(
                "That role isn't allowed for this panel.".into(),
            ));
        }
        let role = role.ok_or_else(|| PanelError::NotFound("Couldn't find that role.".into()))?;
        let system = self.ctx.system_member(panel.guild_id).await?;
        hierarchy_ok(&system, operator, &role)?;
        Ok(role)
    }

    /// Best effort; delivery never affects the commit outcome.
    fn send_audit_notice(&self, panel: &PanelConfig, operator: &MemberSnapshot, summary: &str) {
        let Some(channel_id) = panel.log_channel_id else {
            return;
        };
        let platform = self.ctx.platform.clone();
        let guild_id = panel.guild_id;
        let author_id = self.ctx.system_user_id;
        let panel_id = panel.panel_id.clone();
        let notice = format!(
            "[{}] {} by {} ({})",
            panel.panel_id, summary, operator.username, operator.user_id
        );
        tokio::spawn(async move {
            if let Err(error) = platform
                .post_message(guild_id, channel_id, author_id, &notice, None)
                .await
            {
                warn!(%panel_id, %channel_id, error = %error, "failed to deliver panel audit notice");
            }
        });
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
