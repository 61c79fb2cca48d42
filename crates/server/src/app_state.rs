use std::sync::Arc;

use panel_core::{Dispatcher, PanelContext, SelectionStore};
use shared::{domain::UserId, protocol::ServerEvent};
use storage::Storage;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) storage: Storage,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Wires the sqlite store in as both panel registry and guild platform.
    pub(crate) fn new(
        storage: Storage,
        selections: Arc<dyn SelectionStore>,
        system_user_id: UserId,
    ) -> Self {
        let ctx = PanelContext {
            registry: Arc::new(storage.clone()),
            platform: Arc::new(storage.clone()),
            selections,
            system_user_id,
        };
        let (events, _) = broadcast::channel(256);
        Self {
            storage,
            dispatcher: Dispatcher::new(ctx),
            events,
        }
    }

    pub(crate) fn panels(&self) -> &PanelContext {
        self.dispatcher.context()
    }

    pub(crate) fn publish(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
