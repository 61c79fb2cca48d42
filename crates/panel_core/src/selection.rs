//! Per-operator, in-flight panel selections.
//!
//! A selection is bound to exactly one panel. Choosing a control of another
//! panel starts over for that panel instead of merging, so a role or target
//! picked under one panel can never be committed through another.

use std::{collections::HashMap, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{PanelId, RoleId, UserId};
use tokio::{sync::Mutex, time::Instant};

use crate::error::PanelError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    Empty,
    TargetChosen {
        panel_id: PanelId,
        target: UserId,
    },
    RoleChosen {
        panel_id: PanelId,
        target: Option<UserId>,
        role: RoleId,
    },
}

impl Selection {
    pub fn with_target(self, panel_id: PanelId, target: UserId) -> Self {
        match self {
            Self::RoleChosen {
                panel_id: bound,
                role,
                ..
            } if bound == panel_id => Self::RoleChosen {
                panel_id,
                target: Some(target),
                role,
            },
            _ => Self::TargetChosen { panel_id, target },
        }
    }

    pub fn with_role(self, panel_id: PanelId, role: RoleId) -> Self {
        let target = match self {
            Self::TargetChosen {
                panel_id: bound,
                target,
            }
            | Self::RoleChosen {
                panel_id: bound,
                target: Some(target),
                ..
            } if bound == panel_id => Some(target),
            _ => None,
        };
        Self::RoleChosen {
            panel_id,
            target,
            role,
        }
    }

    /// Target and role, provided both were chosen under `panel_id`.
    pub fn ready_for(&self, panel_id: &PanelId) -> Result<(UserId, RoleId), PanelError> {
        match self {
            Self::RoleChosen {
                panel_id: bound,
                target: Some(target),
                role,
            } if bound == panel_id => Ok((*target, *role)),
            _ => Err(PanelError::IncompleteSelection),
        }
    }
}

/// Storage for selections, keyed by operator across all panels.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// `Selection::Empty` when nothing (or only expired state) is held.
    async fn get(&self, operator: UserId) -> Result<Selection>;
    async fn set_target(&self, operator: UserId, panel_id: &PanelId, target: UserId)
        -> Result<Selection>;
    async fn set_role(&self, operator: UserId, panel_id: &PanelId, role: RoleId)
        -> Result<Selection>;
    async fn clear(&self, operator: UserId) -> Result<()>;
    /// Drops expired selections and returns how many were evicted.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug)]
struct Entry {
    selection: Selection,
    touched_at: Instant,
}

/// Process-local store. With a TTL, a selection untouched for longer than
/// the TTL reads as empty and is evicted on the next access or sweep.
#[derive(Debug, Default)]
pub struct InMemorySelectionStore {
    entries: Mutex<HashMap<UserId, Entry>>,
    ttl: Option<Duration>,
}

impl InMemorySelectionStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(entry.touched_at) > ttl)
    }

    async fn update(
        &self,
        operator: UserId,
        step: impl FnOnce(Selection) -> Selection + Send,
    ) -> Selection {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let current = match entries.remove(&operator) {
            Some(entry) if !self.is_expired(&entry, now) => entry.selection,
            _ => Selection::Empty,
        };
        let next = step(current);
        entries.insert(
            operator,
            Entry {
                selection: next.clone(),
                touched_at: now,
            },
        );
        next
    }
}

#[async_trait]
impl SelectionStore for InMemorySelectionStore {
    async fn get(&self, operator: UserId) -> Result<Selection> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(&operator) {
            None => return Ok(Selection::Empty),
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            entries.remove(&operator);
            return Ok(Selection::Empty);
        }
        Ok(entries
            .get(&operator)
            .map(|entry| entry.selection.clone())
            .unwrap_or_default())
    }

    async fn set_target(
        &self,
        operator: UserId,
        panel_id: &PanelId,
        target: UserId,
    ) -> Result<Selection> {
        let panel_id = panel_id.clone();
        Ok(self
            .update(operator, move |current| current.with_target(panel_id, target))
            .await)
    }

    async fn set_role(&self, operator: UserId, panel_id: &PanelId, role: RoleId) -> Result<Selection> {
        let panel_id = panel_id.clone();
        Ok(self
            .update(operator, move |current| current.with_role(panel_id, role))
            .await)
    }

    async fn clear(&self, operator: UserId) -> Result<()> {
        self.entries.lock().await.remove(&operator);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        if self.ttl.is_none() {
            return Ok(0);
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
