//! Redis backed transports: lists for queues (`RPUSH` / `BLPOP`), pub/sub for
//! maintenance signals.
//!
//! Commands go through a `deadpool_redis` pool. A blocking pop holds its
//! pooled connection for as long as it waits, so concurrent readers never
//! queue behind each other's `BLPOP`. The pool drops connections that fail
//! its recycle check, so a restarted server is picked up on the next command.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ItemQueue, SignalChannel};
use crate::error::TransportError;
use crate::item::Item;

/// First and last pause between attempts to restore a lost subscription.
const RESUBSCRIBE_MIN: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(30);

/// Connections kept beyond one per blocking reader, for pushes and `LLEN`.
const SPARE_CONNECTIONS: usize = 4;

/// Pool size for a process with `readers` concurrent blocking pops.
fn pool_size(readers: usize) -> usize {
    readers * 2 + SPARE_CONNECTIONS
}

fn create_pool(url: &str, readers: usize) -> Result<Pool, TransportError> {
    let mut cfg = Config::from_url(url);
    cfg.pool = Some(PoolConfig::new(pool_size(readers)));
    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| TransportError::Setup(e.to_string()))
}

/// One redis list per queue.
pub struct RedisQueue {
    pool: Pool,
}

impl RedisQueue {
    /// Builds a pool sized for `readers` stages popping concurrently and
    /// checks that the server answers.
    pub async fn connect(url: &str, readers: usize) -> Result<Self, TransportError> {
        let pool = create_pool(url, readers)?;
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(url, pool_size = pool_size(readers), "connected to redis queue backend");
        Ok(Self { pool })
    }
}

#[async_trait]
impl ItemQueue for RedisQueue {
    async fn push(&self, queue: &str, item: &Item) -> Result<(), TransportError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(item.id())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str) -> Result<String, TransportError> {
        // Held until an item arrives: BLPOP 0 parks the whole connection.
        let mut conn = self.pool.get().await?;
        loop {
            // A nil reply can still arrive if the server drops the block, in
            // which case we wait again.
            let reply: Option<(String, String)> = redis::cmd("BLPOP")
                .arg(queue)
                .arg(0)
                .query_async(&mut conn)
                .await?;
            match reply {
                Some((_, raw)) => return Ok(raw),
                None => debug!(queue, "BLPOP returned nil, retrying"),
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<usize, TransportError> {
        let mut conn = self.pool.get().await?;
        let n: usize = redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?;
        Ok(n)
    }
}

/// Pub/sub topics. Subscriptions use their own dedicated connections.
pub struct RedisSignals {
    client: redis::Client,
    pool: Pool,
}

impl RedisSignals {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)?;
        let pool = create_pool(url, 0)?;
        Ok(Self { client, pool })
    }
}

async fn open_subscription(
    client: &redis::Client,
    topic: &str,
) -> Result<redis::aio::PubSub, TransportError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(topic).await?;
    Ok(pubsub)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RESUBSCRIBE_MAX)
}

#[async_trait]
impl SignalChannel for RedisSignals {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        let mut conn = self.pool.get().await?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!(%topic, receivers, "published signal");
        Ok(())
    }

    /// The first subscription happens before returning. After that the
    /// forwarder resubscribes with backoff whenever the connection drops, and
    /// stops once `sender`'s receiver is gone.
    async fn subscribe(
        &self,
        topic: &str,
        sender: mpsc::Sender<String>,
    ) -> Result<(), TransportError> {
        let first = open_subscription(&self.client, topic).await?;
        info!(topic, "subscribed to signal channel");

        let client = self.client.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut current = Some(first);
            let mut backoff = RESUBSCRIBE_MIN;
            loop {
                if let Some(mut pubsub) = current.take() {
                    backoff = RESUBSCRIBE_MIN;
                    let messages = pubsub.on_message();
                    tokio::pin!(messages);
                    loop {
                        tokio::select! {
                            _ = sender.closed() => {
                                debug!(%topic, "signal receiver dropped, unsubscribing");
                                return;
                            }
                            message = messages.next() => match message {
                                Some(msg) => {
                                    let payload: String = msg.get_payload().unwrap_or_default();
                                    if sender.send(payload).await.is_err() {
                                        return;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                    warn!(%topic, "signal subscription lost, resubscribing");
                }

                tokio::select! {
                    _ = sender.closed() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                match open_subscription(&client, &topic).await {
                    Ok(pubsub) => {
                        info!(%topic, "resubscribed to signal channel");
                        current = Some(pubsub);
                    }
                    Err(e) => {
                        warn!(%topic, retry_in = ?backoff, "resubscribe failed: {e}");
                        backoff = next_backoff(backoff);
                    }
                }
            }
        });
        Ok(())
    }
}
