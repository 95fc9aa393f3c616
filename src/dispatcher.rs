//! Event dispatcher: a single-threaded actor over (register, deregister,
//! broadcast) commands, guaranteeing FIFO delivery to each listener.

use crate::mqtt::MqttHandle;
use log::{debug, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;

pub type ListenerId = u64;
const QUEUE_CAPACITY: usize = 32;

struct Listener {
    id: ListenerId,
    tx: SyncSender<Vec<u8>>,
}

enum Cmd {
    Register(Listener),
    Deregister(ListenerId),
    Broadcast { source: String, data: Value },
}

/// Handle used by websocket connections to register/deregister, and by the
/// cache layer to broadcast change events. Cheaply cloneable.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: Sender<Cmd>,
    next_id: Arc<AtomicU64>,
}

/// Owned by one websocket connection from registration until
/// deregistration or send-buffer overflow.
pub struct ListenerHandle {
    pub id: ListenerId,
    pub rx: Receiver<Vec<u8>>,
    dispatcher: DispatcherHandle,
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.dispatcher.deregister(self.id);
    }
}

impl DispatcherHandle {
    pub fn register(&self) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let _ = self.tx.send(Cmd::Register(Listener { id, tx }));
        ListenerHandle { id, rx, dispatcher: self.clone() }
    }

    pub fn deregister(&self, id: ListenerId) {
        let _ = self.tx.send(Cmd::Deregister(id));
    }

    /// `source` beginning with `"mqtt/"` strips the prefix and publishes
    /// retained/QoS0 to MQTT (only if connected; otherwise dropped).
    /// Otherwise, serialises `{"source": ..., "data": ...}` and enqueues it
    /// onto every listener's broadcast channel.
    pub fn broadcast_event(&self, source: impl Into<String>, data: Value) {
        let _ = self.tx.send(Cmd::Broadcast { source: source.into(), data });
    }
}

pub struct Dispatcher {
    rx: Receiver<Cmd>,
    tx: Sender<Cmd>,
    next_id: Arc<AtomicU64>,
    /// Filled in after the MQTT client connects, which happens after the
    /// dispatcher is constructed (the MQTT command callbacks need the
    /// caches, which need a `DispatcherHandle` to report changes through).
    mqtt: Arc<std::sync::Mutex<Option<MqttHandle>>>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        let (tx, rx) = mpsc::channel();
        Dispatcher { rx, tx, next_id: Arc::new(AtomicU64::new(1)), mqtt: Arc::new(std::sync::Mutex::new(None)) }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle { tx: self.tx.clone(), next_id: self.next_id.clone() }
    }

    /// Shared slot the caller fills in once the MQTT client is connected.
    pub fn mqtt_slot(&self) -> Arc<std::sync::Mutex<Option<MqttHandle>>> {
        self.mqtt.clone()
    }

    /// Run the dispatcher loop. Blocks forever; intended as the body of a
    /// dedicated OS thread.
    pub fn run(self) {
        let mut listeners: Vec<Listener> = Vec::new();
        loop {
            match self.rx.recv() {
                Ok(Cmd::Register(listener)) => {
                    debug!("websocket listener {} registered", listener.id);
                    listeners.push(listener);
                }
                Ok(Cmd::Deregister(id)) => {
                    listeners.retain(|l| l.id != id);
                }
                Ok(Cmd::Broadcast { source, data }) => {
                    if let Some(topic) = source.strip_prefix("mqtt/") {
                        if let Some(mqtt) = self.mqtt.lock().unwrap().as_ref() {
                            mqtt.publish_retained(topic, stringify_for_mqtt(&data));
                        }
                        continue;
                    }
                    let event = serde_json::json!({ "source": source, "data": data });
                    let Ok(bytes) = serde_json::to_vec(&event) else { continue };
                    listeners.retain(|l| match l.tx.try_send(bytes.clone()) {
                        Ok(()) => true,
                        Err(_) => {
                            warn!("listener {} send buffer overflowed, disconnecting", l.id);
                            false
                        }
                    });
                }
                Err(_) => return,
            }
        }
    }
}

/// MQTT payloads are plain strings, not JSON-quoted scalars.
fn stringify_for_mqtt(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn broadcast_reaches_registered_listener() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        thread::spawn(move || dispatcher.run());

        let listener = handle.register();
        handle.broadcast_event("tstat", serde_json::json!({"a": 1}));

        let msg = listener.rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let parsed: Value = serde_json::from_slice(&msg).unwrap();
        assert_eq!(parsed["source"], "tstat");
    }

    #[test]
    fn slow_listener_is_dropped_on_overflow() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        thread::spawn(move || dispatcher.run());

        let listener = handle.register();
        // Fill the bounded queue past capacity without draining it.
        for i in 0..(QUEUE_CAPACITY + 5) {
            handle.broadcast_event("k", serde_json::json!(i));
        }
        thread::sleep(Duration::from_millis(50));

        // Further broadcasts must not panic or block now that it's dropped.
        handle.broadcast_event("k", serde_json::json!("after-drop"));
        drop(listener);
    }

    #[test]
    fn mqtt_prefixed_source_does_not_reach_ws_listeners() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        thread::spawn(move || dispatcher.run());

        let listener = handle.register();
        handle.broadcast_event("mqtt/infinitive/zone/1/hold", serde_json::json!("none"));
        handle.broadcast_event("tstat", serde_json::json!({"ok": true}));

        let msg = listener.rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let parsed: Value = serde_json::from_slice(&msg).unwrap();
        assert_eq!(parsed["source"], "tstat");
    }
}
