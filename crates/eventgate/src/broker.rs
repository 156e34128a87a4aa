//! Broker connection abstractions
//!
//! A [`Connection`] is one live transport session to a broker node. It fans
//! its closure out to every registered [`CloseListener`] exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;
use url::Url;

use crate::error::Result;

/// Reason reported when the registry goes away without an explicit close
const DROPPED: &str = "connection dropped";

/// One live broker connection
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Logical sub-channel type handed to consumers
    type Channel: Send;

    /// Open a fresh channel; fails once the transport is closed
    async fn channel(&self) -> Result<Self::Channel>;

    /// Register a listener for the connection's closure
    fn notify(&self) -> CloseListener;

    /// Deregister a listener; no-op if it already fired or was removed
    fn ignore(&self, listener: &CloseListener);

    /// Whether the transport still reports itself as connected
    fn is_open(&self) -> bool;

    /// Close the transport voluntarily
    async fn close(&self) -> Result<()>;
}

/// Opens connections to a broker node
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: Connection;

    async fn dial(&self, node: &Url) -> Result<Self::Connection>;
}

/// Receives one closure signal from a [`Connection`]
#[derive(Debug)]
pub struct CloseListener {
    id: u64,
    rx: oneshot::Receiver<String>,
    fired: Option<String>,
}

impl CloseListener {
    /// Wait for the closure reason
    ///
    /// Cancel safe. Once fired, every later call returns the same reason.
    pub async fn closed(&mut self) -> String {
        if let Some(reason) = &self.fired {
            return reason.clone();
        }
        let reason = (&mut self.rx)
            .await
            .unwrap_or_else(|_| DROPPED.to_string());
        self.fired = Some(reason.clone());
        reason
    }

    /// Non-blocking check
    pub fn try_closed(&mut self) -> Option<String> {
        if self.fired.is_none() {
            match self.rx.try_recv() {
                Ok(reason) => self.fired = Some(reason),
                Err(oneshot::error::TryRecvError::Closed) => self.fired = Some(DROPPED.to_string()),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.fired.clone()
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    active: HashMap<u64, oneshot::Sender<String>>,
    closed: Option<String>,
}

/// Listener registry shared by a connection and its closure watcher
///
/// Dispatch holds the lock across all sends. Each listener owns a one-slot
/// buffer, so a listener that is never polled cannot hold up its peers.
#[derive(Debug, Default)]
pub struct Listeners {
    inner: Mutex<Registry>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; fires immediately if the connection is already dead
    pub fn notify(&self) -> CloseListener {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.lock();
        let id = registry.next_id;
        registry.next_id += 1;

        match &registry.closed {
            Some(reason) => {
                let _ = tx.send(reason.clone());
            }
            None => {
                registry.active.insert(id, tx);
            }
        }
        CloseListener { id, rx, fired: None }
    }

    pub fn ignore(&self, listener: &CloseListener) {
        self.lock().active.remove(&listener.id);
    }

    /// Deliver the closure reason to every registered listener
    ///
    /// Only the first call has an effect; returns the number of listeners signalled.
    pub fn dispatch(&self, reason: impl Into<String>) -> usize {
        let mut registry = self.lock();
        if registry.closed.is_some() {
            return 0;
        }
        let reason = reason.into();
        registry.closed = Some(reason.clone());

        let mut signalled = 0;
        for (_, listener) in registry.active.drain() {
            if listener.send(reason.clone()).is_ok() {
                signalled += 1;
            }
        }
        signalled
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Number of listeners still waiting
    pub fn len(&self) -> usize {
        self.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        // a poisoned registry is still structurally valid
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Broker URL without credentials, for logs
pub fn sanitize(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}{}", url.path()),
        None => format!("{host}{}", url.path()),
    }
}
