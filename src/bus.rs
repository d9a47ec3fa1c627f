//! Façade over the pub/sub + key-value bus (backed by Redis): publish a
//! payload to a channel, subscribe to a channel as a byte-payload stream,
//! and set a key with no expiry.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(#[source] redis::RedisError),
    #[error("bus publish error: {0}")]
    Publish(#[source] redis::RedisError),
    #[error("bus subscribe error: {0}")]
    Subscribe(#[source] redis::RedisError),
    #[error("bus kv-set error: {0}")]
    Set(#[source] redis::RedisError),
}

pub type BusResult<T> = Result<T, BusError>;

/// Publish + key-value half of the bus; cheap to clone, backed by a
/// multiplexed connection shared across callers.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<()>;
    async fn set(&self, key: &str, value: Vec<u8>) -> BusResult<()>;
}

#[derive(Clone)]
pub struct RedisBus {
    conn: MultiplexedConnection,
}

impl RedisBus {
    pub async fn connect(redis_url: &str) -> BusResult<Self> {
        let client = redis::Client::open(redis_url).map_err(BusError::Connection)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(BusError::Connection)?;
        Ok(Self { conn })
    }

    /// Separate subscriber connection: Redis pub/sub connections cannot also
    /// issue ordinary commands, so the ingress loop gets its own.
    pub async fn subscribe(
        redis_url: &str,
        channel: &str,
    ) -> BusResult<impl Stream<Item = Vec<u8>> + Send + Unpin> {
        let client = redis::Client::open(redis_url).map_err(BusError::Connection)?;
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(BusError::Connection)?;
        pubsub.subscribe(channel).await.map_err(BusError::Subscribe)?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<Vec<u8>>().ok() });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(channel, payload).await.map_err(BusError::Publish)?;
        Ok(())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(BusError::Set)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records every publish/set call for assertions; no real connection.
    #[derive(Default)]
    pub struct MemoryBus {
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub kv: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Bus for MemoryBus {
        async fn publish(&self, channel: &str, payload: Vec<u8>) -> BusResult<()> {
            self.published.lock().unwrap().push((channel.to_string(), payload));
            Ok(())
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> BusResult<()> {
            self.kv.lock().unwrap().push((key.to_string(), value));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemoryBus;
    use super::*;

    #[tokio::test]
    async fn memory_bus_records_publishes_in_order() {
        let bus = MemoryBus::default();
        bus.publish("c", b"a".to_vec()).await.unwrap();
        bus.publish("c", b"b".to_vec()).await.unwrap();
        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].1, b"a".to_vec());
        assert_eq!(published[1].1, b"b".to_vec());
    }

    #[tokio::test]
    async fn memory_bus_records_kv_sets() {
        let bus = MemoryBus::default();
        bus.set("task:t1", b"{}".to_vec()).await.unwrap();
        assert_eq!(bus.kv.lock().unwrap()[0].0, "task:t1");
    }
}
