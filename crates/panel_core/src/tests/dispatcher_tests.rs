use std::time::Duration;

use super::*;
use crate::{
    access::HierarchyViolation,
    error::GENERIC_FAILURE,
    fakes::*,
    selection::{Selection, SelectionStore},
    PanelRegistry,
};

fn event(
    guild: GuildId,
    operator: UserId,
    custom_id: &str,
    kind: ComponentKind,
    values: &[&str],
) -> InteractionEvent {
    InteractionEvent {
        guild_id: Some(guild),
        operator_id: operator,
        custom_id: custom_id.to_string(),
        kind,
        values: values.iter().map(|v| v.to_string()).collect(),
    }
}

fn pick_target(panel: &str, target: UserId) -> InteractionEvent {
    event(
        GUILD,
        OPERATOR,
        &format!("srp:{panel}:target"),
        ComponentKind::UserSelect,
        &[&target.to_string()],
    )
}

fn pick_role(panel: &str, role: RoleId) -> InteractionEvent {
    event(
        GUILD,
        OPERATOR,
        &format!("srp:{panel}:role"),
        ComponentKind::StringSelect,
        &[&role.to_string()],
    )
}

fn press(panel: &str, action: &str) -> InteractionEvent {
    event(
        GUILD,
        OPERATOR,
        &format!("srp:{panel}:{action}"),
        ComponentKind::Button,
        &[],
    )
}

async fn reply(dispatcher: &Dispatcher, event: InteractionEvent) -> InteractionReply {
    dispatcher
        .dispatch(&event)
        .await
        .expect("interaction should be answered")
        .reply
}

#[tokio::test]
async fn assign_flow_calls_platform_once_with_justification() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    assert!(reply(&dispatcher, pick_target("staff-main", TARGET)).await.is_ok());
    assert!(reply(&dispatcher, pick_role("staff-main", HELPER)).await.is_ok());
    let outcome = dispatcher
        .dispatch(&press("staff-main", "assign"))
        .await
        .expect("answered");

    assert!(outcome.reply.is_ok(), "{:?}", outcome.reply);
    assert!(outcome.reply.ephemeral);
    assert_eq!(outcome.reply.content, "Added Helper to bob");
    let mutations = fx.platform.mutations();
    assert_eq!(mutations.len(), 1);
    assert!(mutations[0].added);
    assert_eq!(mutations[0].user_id, TARGET);
    assert_eq!(mutations[0].role_id, HELPER);
    assert!(mutations[0].justification.contains("staff-main"));
    assert!(mutations[0].justification.contains(&OPERATOR.to_string()));
    assert!(matches!(
        outcome.event,
        Some(ServerEvent::MemberRolesUpdated {
            change: RoleChange::Added,
            ..
        })
    ));
    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::Empty
    );
}

#[tokio::test]
async fn role_first_then_target_also_completes() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    let done = reply(&dispatcher, press("staff-main", "remove")).await;

    assert_eq!(done.content, "Removed Helper from bob");
    let mutations = fx.platform.mutations();
    assert_eq!(mutations.len(), 1);
    assert!(!mutations[0].added);
}

#[tokio::test]
async fn operator_without_staff_role_is_denied_on_assign() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());
    fx.selections
        .set_target(BYSTANDER, &panel_id("staff-main"), TARGET)
        .await
        .expect("seed");
    fx.selections
        .set_role(BYSTANDER, &panel_id("staff-main"), HELPER)
        .await
        .expect("seed");

    let denied = reply(
        &dispatcher,
        event(
            GUILD,
            BYSTANDER,
            "srp:staff-main:assign",
            ComponentKind::Button,
            &[],
        ),
    )
    .await;

    assert_eq!(denied.error, Some(ErrorCode::AccessDenied));
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn commit_with_only_target_is_incomplete() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    let incomplete = reply(&dispatcher, press("staff-main", "assign")).await;

    assert_eq!(incomplete.error, Some(ErrorCode::IncompleteSelection));
    assert!(fx.platform.mutations().is_empty());
    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::TargetChosen {
            panel_id: panel_id("staff-main"),
            target: TARGET,
        }
    );
}

#[tokio::test]
async fn disallowed_role_selection_leaves_state_untouched() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    let before = fx.selections.get(OPERATOR).await.expect("get");
    let rejected = reply(&dispatcher, pick_role("staff-main", UNLISTED)).await;

    assert_eq!(rejected.error, Some(ErrorCode::AccessDenied));
    assert_eq!(fx.selections.get(OPERATOR).await.expect("get"), before);
}

#[tokio::test]
async fn unknown_unlisted_role_is_reported_as_not_allowed() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let rejected = reply(&dispatcher, pick_role("staff-main", RoleId(4242))).await;

    assert_eq!(rejected.error, Some(ErrorCode::AccessDenied));
    assert_eq!(rejected.content, "That role isn't allowed for this panel.");
    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::Empty
    );
}

#[tokio::test]
async fn role_beyond_the_offered_options_is_refused() {
    let fx = Fixture::new().await;
    let mut panel = fx.panel("staff-main").await;
    panel.allowed_role_ids = (100..125).map(RoleId).collect();
    panel.allowed_role_ids.push(HELPER);
    fx.save(&panel).await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let selected = reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    assert_eq!(selected.error, Some(ErrorCode::AccessDenied));

    fx.selections
        .set_target(OPERATOR, &panel_id("staff-main"), TARGET)
        .await
        .expect("seed");
    fx.selections
        .set_role(OPERATOR, &panel_id("staff-main"), HELPER)
        .await
        .expect("seed");
    let committed = reply(&dispatcher, press("staff-main", "assign")).await;
    assert_eq!(committed.error, Some(ErrorCode::AccessDenied));
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn picker_values_must_be_a_single_exact_id() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());
    let target_id = "srp:staff-main:target";

    let unusable: [&[&str]; 3] = [&["200", "300"], &[" 200 "], &[]];
    for values in unusable {
        let picked = event(GUILD, OPERATOR, target_id, ComponentKind::UserSelect, values);
        assert!(dispatcher.dispatch(&picked).await.is_none(), "{values:?}");
    }
    let padded = event(
        GUILD,
        OPERATOR,
        "srp: staff-main :target",
        ComponentKind::UserSelect,
        &["200"],
    );
    assert!(dispatcher.dispatch(&padded).await.is_none());
    let two_roles = event(
        GUILD,
        OPERATOR,
        "srp:staff-main:role",
        ComponentKind::StringSelect,
        &["20", "40"],
    );
    assert!(dispatcher.dispatch(&two_roles).await.is_none());

    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::Empty
    );
}

#[tokio::test]
async fn selection_from_another_panel_cannot_be_committed() {
    let fx = Fixture::new().await;
    let mut other = PanelConfig::new(panel_id("staff-alt"), GUILD, "Alt");
    other.allowed_role_ids = vec![HELPER];
    fx.registry.insert(&other).await.expect("insert");
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    let crossed = reply(&dispatcher, press("staff-alt", "assign")).await;

    assert_eq!(crossed.error, Some(ErrorCode::IncompleteSelection));
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn switching_panels_mid_selection_drops_previous_choice() {
    let fx = Fixture::new().await;
    let mut other = PanelConfig::new(panel_id("staff-alt"), GUILD, "Alt");
    other.allowed_role_ids = vec![HELPER];
    fx.registry.insert(&other).await.expect("insert");
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    reply(&dispatcher, pick_target("staff-alt", TARGET)).await;
    let crossed = reply(&dispatcher, press("staff-alt", "assign")).await;

    assert_eq!(crossed.error, Some(ErrorCode::IncompleteSelection));
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn deleted_panel_yields_not_found_at_commit() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    fx.registry
        .delete(&panel_id("staff-main"))
        .await
        .expect("delete");
    let gone = reply(&dispatcher, press("staff-main", "assign")).await;

    assert_eq!(gone.error, Some(ErrorCode::NotFound));
    assert_eq!(gone.content, "This panel config no longer exists.");
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn managed_role_is_a_hierarchy_violation_when_selected_or_committed() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let selected = reply(&dispatcher, pick_role("staff-main", INTEGRATION)).await;
    assert_eq!(selected.error, Some(ErrorCode::HierarchyViolation));

    // A stale selection made before the role became integration-owned.
    fx.selections
        .set_target(OPERATOR, &panel_id("staff-main"), TARGET)
        .await
        .expect("seed");
    fx.selections
        .set_role(OPERATOR, &panel_id("staff-main"), INTEGRATION)
        .await
        .expect("seed");
    let committed = reply(&dispatcher, press("staff-main", "assign")).await;
    assert_eq!(committed.error, Some(ErrorCode::HierarchyViolation));
    assert!(fx.platform.mutations().is_empty());

    let mut panel = fx.panel("staff-main").await;
    panel.allowed_role_ids.retain(|id| *id != INTEGRATION);
    fx.save(&panel).await;
    let unlisted = reply(&dispatcher, pick_role("staff-main", INTEGRATION)).await;
    assert_eq!(unlisted.error, Some(ErrorCode::HierarchyViolation));
}

#[tokio::test]
async fn role_at_or_above_operator_is_rejected_with_reason() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let rejected = reply(&dispatcher, pick_role("staff-main", SENIOR)).await;
    assert_eq!(rejected.error, Some(ErrorCode::HierarchyViolation));
    assert_eq!(
        rejected.content,
        HierarchyViolation::NotBelowOperator.to_string()
    );
}

#[tokio::test]
async fn role_at_or_above_system_is_rejected_with_reason() {
    let fx = Fixture::new().await;
    fx.platform
        .put_member(member(GUILD, SYSTEM, "panel-bot", &[], 10, true));
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let rejected = reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    assert_eq!(rejected.error, Some(ErrorCode::HierarchyViolation));
    assert_eq!(rejected.content, HierarchyViolation::NotBelowSystem.to_string());
}

#[tokio::test]
async fn rank_change_after_selection_is_caught_at_commit() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    fx.platform.put_role(role(GUILD, HELPER, "Helper", 55));
    let rejected = reply(&dispatcher, press("staff-main", "assign")).await;

    assert_eq!(rejected.error, Some(ErrorCode::HierarchyViolation));
    assert!(fx.platform.mutations().is_empty());
    assert!(matches!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::RoleChosen { .. }
    ));
}

#[tokio::test]
async fn role_removed_from_panel_after_selection_is_denied_at_commit() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    let mut panel = fx.panel("staff-main").await;
    panel.allowed_role_ids.clear();
    fx.save(&panel).await;

    let denied = reply(&dispatcher, press("staff-main", "assign")).await;
    assert_eq!(denied.error, Some(ErrorCode::AccessDenied));
    assert!(fx.platform.mutations().is_empty());
}

#[tokio::test]
async fn panel_from_another_guild_is_not_found() {
    let fx = Fixture::new().await;
    fx.platform
        .put_member(member(OTHER_GUILD, OPERATOR, "mod-alice", &[STAFF], 50, true));
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let foreign = reply(
        &dispatcher,
        event(
            OTHER_GUILD,
            OPERATOR,
            "srp:staff-main:target",
            ComponentKind::UserSelect,
            &["200"],
        ),
    )
    .await;

    assert_eq!(foreign.error, Some(ErrorCode::NotFound));
    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::Empty
    );
}

#[tokio::test]
async fn unrecognized_interactions_get_no_response() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let ignored = [
        event(GUILD, OPERATOR, "other:staff-main:assign", ComponentKind::Button, &[]),
        event(GUILD, OPERATOR, "srp:staff-main", ComponentKind::Button, &[]),
        event(GUILD, OPERATOR, "srp:staff-main:grant", ComponentKind::Button, &[]),
        event(GUILD, OPERATOR, "srp:staff-main:assign", ComponentKind::StringSelect, &["20"]),
        event(GUILD, OPERATOR, "srp:staff-main:role", ComponentKind::StringSelect, &["nope"]),
        event(GUILD, OPERATOR, "srp:staff-main:target", ComponentKind::UserSelect, &[]),
    ];
    for interaction in ignored {
        assert!(
            dispatcher.dispatch(&interaction).await.is_none(),
            "{} should be ignored",
            interaction.custom_id
        );
    }
    assert_eq!(
        fx.selections.get(OPERATOR).await.expect("get"),
        Selection::Empty
    );
}

#[tokio::test]
async fn platform_failure_is_reported_verbatim_and_selection_kept() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());
    *fx.platform.mutation_error.lock().expect("lock") = Some("Missing Permissions".into());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    let failed = reply(&dispatcher, press("staff-main", "assign")).await;

    assert_eq!(failed.error, Some(ErrorCode::Platform));
    assert_eq!(failed.content, "Missing Permissions");
    assert!(fx
        .selections
        .get(OPERATOR)
        .await
        .expect("get")
        .ready_for(&panel_id("staff-main"))
        .is_ok());

    *fx.platform.mutation_error.lock().expect("lock") = None;
    let retried = reply(&dispatcher, press("staff-main", "assign")).await;
    assert!(retried.is_ok());
    assert_eq!(fx.platform.mutations().len(), 1);
}

#[tokio::test]
async fn audit_notice_is_posted_to_log_channel() {
    let mut fx = Fixture::new().await;
    let mut panel = fx.panel("staff-main").await;
    panel.log_channel_id = Some(LOG_CHANNEL);
    fx.save(&panel).await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    assert!(reply(&dispatcher, press("staff-main", "assign")).await.is_ok());

    let notice = tokio::time::timeout(Duration::from_secs(2), fx.posts.recv())
        .await
        .expect("notice in time")
        .expect("notice");
    assert!(notice.contains("staff-main"));
    assert!(notice.contains("Added Helper to bob"));
}

#[tokio::test]
async fn audit_notice_failure_does_not_fail_commit() {
    let fx = Fixture::new().await;
    let mut panel = fx.panel("staff-main").await;
    panel.log_channel_id = Some(LOG_CHANNEL);
    fx.save(&panel).await;
    *fx.platform.post_error.lock().expect("lock") = true;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    let done = reply(&dispatcher, press("staff-main", "assign")).await;

    assert!(done.is_ok());
    assert_eq!(fx.platform.mutations().len(), 1);
}

#[tokio::test]
async fn unexpected_fault_is_reported_generically() {
    let fx = Fixture::new().await;
    *fx.registry.fail_reads.lock().expect("lock") = true;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    let failed = reply(&dispatcher, pick_target("staff-main", TARGET)).await;
    assert_eq!(failed.error, Some(ErrorCode::Internal));
    assert_eq!(failed.content, GENERIC_FAILURE);
    assert!(!failed.content.contains("registry"));
}

#[tokio::test]
async fn missing_target_member_is_not_found() {
    let fx = Fixture::new().await;
    let dispatcher = Dispatcher::new(fx.ctx.clone());

    reply(&dispatcher, pick_target("staff-main", UserId(4242))).await;
    reply(&dispatcher, pick_role("staff-main", HELPER)).await;
    let missing = reply(&dispatcher, press("staff-main", "assign")).await;

    assert_eq!(missing.error, Some(ErrorCode::NotFound));
    assert_eq!(missing.content, "Couldn't find that user.");
}
