//! Application-wide shared state, built once at startup and handed to
//! Rocket as managed state.

use crate::cache::Cache;
use crate::dispatcher::DispatcherHandle;
use crate::mqtt::MqttHandle;
use crate::protocol::broker::BrokerHandle;
use std::sync::Arc;

pub struct AppContext {
    pub broker: BrokerHandle,
    pub ws_cache: Arc<Cache>,
    pub mqtt_cache: Arc<Cache>,
    pub dispatcher: DispatcherHandle,
    pub mqtt: Option<MqttHandle>,
}
