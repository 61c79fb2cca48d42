use serde::{Deserialize, Serialize};
use shared::domain::{PanelConfig, RoleId, RoleSnapshot};

use crate::routing::{Route, RouteAction};

/// Most options a role picker can offer.
pub const MAX_ROLE_OPTIONS: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePicker {
    pub custom_id: String,
    pub options: Vec<RoleOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonSpec {
    pub custom_id: String,
    pub label: String,
}

/// Renderer-agnostic description of a posted panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelLayout {
    pub title: String,
    pub body: String,
    pub target_picker: String,
    pub role_picker: RolePicker,
    pub assign_button: ButtonSpec,
    pub remove_button: ButtonSpec,
}

impl PanelLayout {
    pub fn message_text(&self) -> String {
        format!("**{}**\n{}", self.title, self.body)
    }
}

pub fn offered_role_ids(panel: &PanelConfig) -> &[RoleId] {
    let end = panel.allowed_role_ids.len().min(MAX_ROLE_OPTIONS);
    &panel.allowed_role_ids[..end]
}

/// `roles` supplies labels; offered roles missing from it are labelled "role".
pub fn build_panel_layout(panel: &PanelConfig, roles: &[RoleSnapshot]) -> PanelLayout {
    let route = |action| Route::new(panel.panel_id.clone(), action).custom_id();
    let options = offered_role_ids(panel)
        .iter()
        .map(|role_id| RoleOption {
            label: roles
                .iter()
                .find(|role| role.role_id == *role_id)
                .map(|role| role.name.clone())
                .unwrap_or_else(|| "role".to_string()),
            value: role_id.to_string(),
        })
        .collect();

    PanelLayout {
        title: panel.title.clone(),
        body: panel.body_text.clone(),
        target_picker: route(RouteAction::Target),
        role_picker: RolePicker {
            custom_id: route(RouteAction::Role),
            options,
        },
        assign_button: ButtonSpec {
            custom_id: route(RouteAction::Assign),
            label: "Assign".to_string(),
        },
        remove_button: ButtonSpec {
            custom_id: route(RouteAction::Remove),
            label: "Remove".to_string(),
        },
    }
}
