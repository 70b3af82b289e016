//! In-memory [`Broker`] with the same FIFO, TTL, and pattern-subscribe
//! semantics as the Redis binding.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;

use candela_core::broker::{Broker, TopicMessage};
use candela_core::error::CandelaError;

// '*' matches any run of characters; that is all the fixed key layout needs.
fn glob_match(pattern: &str, topic: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == topic,
        Some((prefix, rest)) => {
            let Some(stripped) = topic.strip_prefix(prefix) else {
                return false;
            };
            if rest.is_empty() {
                return true;
            }
            (0..=stripped.len()).any(|i| glob_match(rest, &stripped[i..]))
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<String>>,
    kv: HashMap<String, (String, Instant)>,
    subscribers: Vec<(String, mpsc::Sender<TopicMessage>)>,
}

impl Inner {
    fn live_kv(&mut self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Some((value, expiry)) if *expiry > Instant::now() => Some(value.clone()),
            Some(_) => {
                self.kv.remove(key);
                None
            }
            None => None,
        }
    }
}

/// An in-process broker for tests and examples.
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    pushed: Notify,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, queue: &str, payload: &str) -> Result<(), CandelaError> {
        {
            let mut inner = self.inner.lock().expect("broker poisoned");
            inner
                .queues
                .entry(queue.to_owned())
                .or_default()
                .push_back(payload.to_owned());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CandelaError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.pop_nonblocking(queue).await? {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(deadline, self.pushed.notified()).await;
        }
    }

    async fn pop_nonblocking(&self, queue: &str) -> Result<Option<String>, CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        Ok(inner
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, CandelaError> {
        let inner = self.inner.lock().expect("broker poisoned");
        Ok(inner.queues.get(queue).map_or(0, VecDeque::len) as u64)
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), CandelaError> {
        let targets: Vec<mpsc::Sender<TopicMessage>> = {
            let mut inner = self.inner.lock().expect("broker poisoned");
            inner.subscribers.retain(|(_, tx)| !tx.is_closed());
            inner
                .subscribers
                .iter()
                .filter(|(pattern, _)| glob_match(pattern, topic))
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in targets {
            // at-most-once: a full or closed subscriber just misses the message
            let _ = tx.try_send(TopicMessage {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
            });
        }
        Ok(())
    }

    async fn pattern_subscribe(
        &self,
        pattern: &str,
    ) -> Result<mpsc::Receiver<TopicMessage>, CandelaError> {
        let (tx, rx) = mpsc::channel(64);
        let mut inner = self.inner.lock().expect("broker poisoned");
        inner.subscribers.push((pattern.to_owned(), tx));
        Ok(rx)
    }

    async fn set_kv(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        inner
            .kv
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        Ok(())
    }

    async fn get_kv(&self, key: &str) -> Result<Option<String>, CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        Ok(inner.live_kv(key))
    }

    async fn delete_kv(&self, key: &str) -> Result<bool, CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        let existed = inner.live_kv(key).is_some();
        inner.kv.remove(key);
        Ok(existed)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        let now = Instant::now();
        inner.kv.retain(|_, (_, expiry)| *expiry > now);
        let mut keys: Vec<String> = inner
            .kv
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<bool, CandelaError> {
        let mut inner = self.inner.lock().expect("broker poisoned");
        if inner.live_kv(key).is_some() {
            return Ok(false);
        }
        inner
            .kv
            .insert(key.to_owned(), ("held".to_owned(), Instant::now() + ttl));
        Ok(true)
    }

    async fn ping(&self) -> Result<(), CandelaError> {
        Ok(())
    }
}
