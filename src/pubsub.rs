use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use crate::connection::{ConnId, Outbox};
use crate::protocol::resp::{encode, Resp};

/// Channel → subscribers and connection → channels, the two mappings
/// `SUBSCRIBE`/`UNSUBSCRIBE`/`PUBLISH` operate on. Subscriber connection
/// IDs are kept in registration order per channel (FIFO-meaningful, even
/// though fan-out delivers to all of them rather than just the first).
#[derive(Default)]
pub struct PubSub {
    channels: RwLock<HashMap<Bytes, Vec<(ConnId, Outbox)>>>,
    by_connection: RwLock<HashMap<ConnId, Vec<Bytes>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` as a subscriber of `channel` (idempotent) and returns
    /// the connection's new total subscribed-channel count.
    pub fn subscribe(&self, conn: ConnId, outbox: Outbox, channel: Bytes) -> usize {
        {
            let mut channels = self.channels.write().unwrap();
            let subscribers = channels.entry(channel.clone()).or_default();
            if !subscribers.iter().any(|(id, _)| *id == conn) {
                subscribers.push((conn, outbox));
            }
        }
        let mut by_connection = self.by_connection.write().unwrap();
        let subscribed = by_connection.entry(conn).or_default();
        if !subscribed.contains(&channel) {
            subscribed.push(channel);
        }
        subscribed.len()
    }

    /// Removes `conn` from `channel`, deleting the channel if it was the
    /// last subscriber. Returns the connection's remaining subscribed
    /// count.
    pub fn unsubscribe(&self, conn: ConnId, channel: &[u8]) -> usize {
        {
            let mut channels = self.channels.write().unwrap();
            if let Some(subscribers) = channels.get_mut(channel) {
                subscribers.retain(|(id, _)| *id != conn);
                if subscribers.is_empty() {
                    channels.remove(channel);
                }
            }
        }
        let mut by_connection = self.by_connection.write().unwrap();
        match by_connection.get_mut(&conn) {
            Some(subscribed) => {
                subscribed.retain(|c| c.as_ref() != channel);
                subscribed.len()
            }
            None => 0,
        }
    }

    /// A silent full unsubscribe, as required on disconnect: no
    /// confirmation frames are sent for any of the removed channels.
    pub fn unsubscribe_all(&self, conn: ConnId) {
        let channels = self.by_connection.write().unwrap().remove(&conn).unwrap_or_default();
        let mut table = self.channels.write().unwrap();
        for channel in channels {
            if let Some(subscribers) = table.get_mut(channel.as_ref()) {
                subscribers.retain(|(id, _)| *id != conn);
                if subscribers.is_empty() {
                    table.remove(channel.as_ref());
                }
            }
        }
    }

    pub fn subscribed_channels(&self, conn: ConnId) -> Vec<Bytes> {
        self.by_connection.read().unwrap().get(&conn).cloned().unwrap_or_default()
    }

    pub fn subscription_count(&self, conn: ConnId) -> usize {
        self.by_connection.read().unwrap().get(&conn).map(Vec::len).unwrap_or(0)
    }

    /// Delivers `message` to every current subscriber of `channel`,
    /// returning the number of deliveries attempted.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let channels = self.channels.read().unwrap();
        let subscribers = match channels.get(channel) {
            Some(s) => s,
            None => return 0,
        };
        let frame = Resp::Array(vec![
            Resp::bulk(Bytes::from_static(b"message")),
            Resp::bulk(Bytes::copy_from_slice(channel)),
            Resp::bulk(Bytes::copy_from_slice(message)),
        ]);
        let bytes = encode(&frame);
        subscribers.iter().filter(|(_, outbox)| outbox.send(bytes.clone()).is_ok()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<Bytes>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn subscribe_returns_running_channel_count() {
        let hub = PubSub::new();
        let conn = ConnId::new_v4();
        let (tx, _rx) = outbox();
        assert_eq!(hub.subscribe(conn, tx.clone(), Bytes::from("a")), 1);
        assert_eq!(hub.subscribe(conn, tx, Bytes::from("b")), 2);
    }

    #[test]
    fn publish_delivers_to_all_subscribers() {
        let hub = PubSub::new();
        let conn_a = ConnId::new_v4();
        let conn_b = ConnId::new_v4();
        let (tx_a, mut rx_a) = outbox();
        let (tx_b, mut rx_b) = outbox();
        hub.subscribe(conn_a, tx_a, Bytes::from("news"));
        hub.subscribe(conn_b, tx_b, Bytes::from("news"));

        assert_eq!(hub.publish(b"news", b"hello"), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn unsubscribing_last_member_deletes_channel() {
        let hub = PubSub::new();
        let conn = ConnId::new_v4();
        let (tx, _rx) = outbox();
        hub.subscribe(conn, tx, Bytes::from("a"));
        assert_eq!(hub.unsubscribe(conn, b"a"), 0);
        assert_eq!(hub.publish(b"a", b"x"), 0);
    }

    #[test]
    fn disconnect_unsubscribes_silently_from_everything() {
        let hub = PubSub::new();
        let conn = ConnId::new_v4();
        let (tx, _rx) = outbox();
        hub.subscribe(conn, tx.clone(), Bytes::from("a"));
        hub.subscribe(conn, tx, Bytes::from("b"));
        hub.unsubscribe_all(conn);
        assert_eq!(hub.subscription_count(conn), 0);
        assert_eq!(hub.publish(b"a", b"x"), 0);
    }
}
