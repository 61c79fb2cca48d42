use std::fmt;

use shared::domain::PanelId;

/// Namespace prefix of every panel component id.
pub const NAMESPACE: &str = "srp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAction {
    Target,
    Role,
    Assign,
    Remove,
}

impl RouteAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Role => "role",
            Self::Assign => "assign",
            Self::Remove => "remove",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "target" => Some(Self::Target),
            "role" => Some(Self::Role),
            "assign" => Some(Self::Assign),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Decoded `srp:<panel_id>:<action>` component id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub panel_id: PanelId,
    pub action: RouteAction,
}

impl Route {
    pub fn new(panel_id: PanelId, action: RouteAction) -> Self {
        Self { panel_id, action }
    }

    /// `None` for anything that is not exactly one of our three-part ids.
    pub fn parse(custom_id: &str) -> Option<Self> {
        let mut parts = custom_id.split(':');
        let (Some(namespace), Some(panel_id), Some(action), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        if namespace != NAMESPACE {
            return None;
        }
        Some(Self {
            panel_id: PanelId::parse(panel_id)?,
            action: RouteAction::parse(action)?,
        })
    }

    pub fn custom_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NAMESPACE}:{}:{}", self.panel_id, self.action.as_str())
    }
}
