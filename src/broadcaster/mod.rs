//! Progress broadcaster (SPEC_FULL.md §4.7): fans `Generation` updates out
//! to a dynamic set of live subscribers (WebSocket observers, in this
//! crate's realization of §6).

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How often a subscriber's send loop pings its transport while idle.
pub const SUBSCRIBER_PING_INTERVAL: Duration = Duration::from_secs(1);

pub type SubscriberId = Uuid;

enum Control {
    Register {
        id: SubscriberId,
        sink: mpsc::Sender<Vec<u8>>,
    },
    Unregister {
        id: SubscriberId,
    },
    Broadcast {
        payload: Vec<u8>,
    },
    Stop,
}

/// Handle used by producers (HTTP layer, coordinator) to talk to the single
/// dispatcher task.
#[derive(Clone)]
pub struct BroadcasterHandle {
    control: mpsc::Sender<Control>,
}

impl BroadcasterHandle {
    pub fn register(&self, buffer: usize) -> (SubscriberId, mpsc::Receiver<Vec<u8>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(buffer);
        let _ = self.control.try_send(Control::Register { id, sink: tx });
        (id, rx)
    }

    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.control.try_send(Control::Unregister { id });
    }

    pub async fn broadcast(&self, payload: Vec<u8>) {
        let _ = self.control.send(Control::Broadcast { payload }).await;
    }

    pub async fn broadcast_generation(
        &self,
        g: &crate::model::Generation,
    ) -> serde_json::Result<()> {
        let payload = serde_json::to_vec(g)?;
        self.broadcast(payload).await;
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.control.send(Control::Stop).await;
    }
}

/// Runs the single serializing dispatcher task; returns a handle to control
/// it. Each registered subscriber gets its own forwarding task started here.
pub fn spawn() -> BroadcasterHandle {
    let (control_tx, mut control_rx) = mpsc::channel::<Control>(256);
    let handle = BroadcasterHandle {
        control: control_tx,
    };

    tokio::spawn(async move {
        let mut subscribers: HashMap<SubscriberId, mpsc::Sender<Vec<u8>>> = HashMap::new();
        while let Some(cmd) = control_rx.recv().await {
            match cmd {
                Control::Register { id, sink } => {
                    subscribers.insert(id, sink);
                }
                Control::Unregister { id } => {
                    subscribers.remove(&id);
                }
                Control::Broadcast { payload } => {
                    for sink in subscribers.values() {
                        let _ = sink.try_send(payload.clone());
                    }
                }
                Control::Stop => {
                    subscribers.clear();
                    break;
                }
            }
        }
    });

    handle
}

/// One subscriber's send loop: forwards outbound messages and pings the
/// transport on idle, self-stopping on write failure. `send_fn` writes one
/// frame to the observer's transport (e.g. a WebSocket sink).
pub async fn run_subscriber_send_loop<F, FFut, P, PFut>(
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut send_fn: F,
    mut ping_fn: P,
) where
    F: FnMut(Vec<u8>) -> FFut,
    FFut: std::future::Future<Output = bool>,
    P: FnMut(Vec<u8>) -> PFut,
    PFut: std::future::Future<Output = bool>,
{
    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                if !send_fn(msg).await {
                    break;
                }
            }
            _ = tokio::time::sleep(SUBSCRIBER_PING_INTERVAL) => {
                if !ping_fn(Vec::new()).await {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_subscribers_both_receive_broadcast_in_order() {
        let handle = spawn();
        let (_id_a, mut rx_a) = handle.register(8);
        let (_id_b, mut rx_b) = handle.register(8);

        handle.broadcast(b"first".to_vec()).await;
        handle.broadcast(b"second".to_vec()).await;
        // give the dispatcher a turn
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rx_a.recv().await, Some(b"first".to_vec()));
        assert_eq!(rx_a.recv().await, Some(b"second".to_vec()));
        assert_eq!(rx_b.recv().await, Some(b"first".to_vec()));
        assert_eq!(rx_b.recv().await, Some(b"second".to_vec()));
    }

    #[tokio::test]
    async fn unregistered_subscriber_stops_receiving() {
        let handle = spawn();
        let (id, mut rx) = handle.register(8);
        handle.unregister(id);
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.broadcast(b"ignored".to_vec()).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
