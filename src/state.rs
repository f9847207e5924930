use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::db::QueueStore;
use crate::dispatcher::Dispatcher;
use crate::queue::MessageQueue;
use crate::settings::SettingsStore;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QueueStore>,
    pub clock: Arc<dyn Clock>,
    pub queue: MessageQueue,
    pub settings: SettingsStore,
    pub dispatcher: Arc<Dispatcher>,
}
