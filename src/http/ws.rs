//! Websocket feed: seeds a new connection with the current cache snapshot,
//! then streams change events for as long as the socket stays open.

use crate::app::AppContext;
use rocket::futures::{SinkExt, StreamExt};
use rocket::get;
use rocket::tokio::sync::mpsc;
use rocket::State;
use rocket_ws::{Channel, Message, WebSocket};
use std::sync::Arc;
use std::thread;

#[get("/api/ws")]
pub fn ws(socket: WebSocket, app: &State<Arc<AppContext>>) -> Channel<'static> {
    let app = app.inner().clone();
    socket.channel(move |mut stream| {
        Box::pin(async move {
            for (source, data) in app.ws_cache.dump() {
                let event = serde_json::json!({ "source": source, "data": data });
                if let Ok(text) = serde_json::to_string(&event) {
                    let _ = stream.send(Message::Text(text)).await;
                }
            }

            let listener = app.dispatcher.register();
            let (async_tx, mut async_rx) = mpsc::unbounded_channel::<Vec<u8>>();
            thread::spawn(move || {
                while let Ok(bytes) = listener.rx.recv() {
                    if async_tx.send(bytes).is_err() {
                        break;
                    }
                }
            });

            loop {
                rocket::tokio::select! {
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(_)) => break,
                            _ => {}
                        }
                    }
                    outgoing = async_rx.recv() => {
                        match outgoing {
                            Some(bytes) => {
                                let Ok(text) = String::from_utf8(bytes) else { continue };
                                if stream.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            Ok(())
        })
    })
}
