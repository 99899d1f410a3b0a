//! Session lifecycle: `NONE -> INITIALIZED -> CLOSED`.
//!
//! [`SessionStore`] owns the id-to-transport mapping. A transport is fully
//! built and connected before it becomes visible in the store, and closing
//! it removes the mapping before `close` returns.
//!
//! A session ends on DELETE, when its event stream connection drops, or when
//! it sits idle with no stream open for longer than the configured timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use toolrelay_common::{SessionId, ToolRelayError};

use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::protocol::ToolServer;

/// Capacity of each session's notification channel.
const EVENT_CAPACITY: usize = 64;

type CloseHook = Box<dyn FnOnce(&SessionId) + Send>;

/// A tool server bound 1:1 to a session id.
pub struct SessionTransport {
    id: SessionId,
    server: ToolServer,
    events: broadcast::Sender<JsonRpcRequest>,
    closed: AtomicBool,
    on_close: Mutex<Option<CloseHook>>,
    last_active: Mutex<Instant>,
}

impl SessionTransport {
    /// Bind `server` to `id` and connect it to the session's notification channel.
    pub fn new(id: SessionId, mut server: ToolServer) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        server.connect(events.clone());
        Self {
            id,
            server,
            events,
            closed: AtomicBool::new(false),
            on_close: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn server(&self) -> &ToolServer {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hand a message to this session's tool server.
    pub async fn handle(
        &self,
        request: JsonRpcRequest,
    ) -> Result<Option<JsonRpcResponse>, ToolRelayError> {
        if self.is_closed() {
            return Err(ToolRelayError::SessionNotFound(self.id.to_string()));
        }
        self.touch();
        Ok(self.server.handle(request).await)
    }

    /// Server-initiated notifications for this session.
    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcRequest> {
        self.events.subscribe()
    }

    /// Number of event streams currently open on this session.
    pub fn open_streams(&self) -> usize {
        self.events.receiver_count()
    }

    /// Time since the last request was handled.
    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// A guard that closes this session when dropped. Held by the session's
    /// event stream, so a dropped connection ends the session.
    pub fn close_on_drop(self: &Arc<Self>) -> CloseOnDrop {
        CloseOnDrop {
            transport: Arc::downgrade(self),
        }
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn set_on_close(&self, hook: CloseHook) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    /// Close the transport and run the close hook. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self
            .on_close
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(hook) = hook {
            hook(&self.id);
        }
        tracing::info!(session_id = %self.id, "Session transport closed");
    }
}

/// Closes its session on drop. Does not keep the transport alive, so closing
/// the store at shutdown still drops the event channel.
pub struct CloseOnDrop {
    transport: Weak<SessionTransport>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            if !transport.is_closed() {
                tracing::info!(session_id = %transport.id(), "Event stream dropped, closing session");
                transport.close();
            }
        }
    }
}

/// Process-wide mapping of live sessions. Injected into the router state.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<SessionTransport>>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mint a fresh id, bind `server` to it and register the transport.
    pub fn create(self: &Arc<Self>, server: ToolServer) -> Arc<SessionTransport> {
        let mut sessions = self.lock();

        let mut id = SessionId::new();
        while sessions.contains_key(&id) {
            id = SessionId::new();
        }

        let transport = Arc::new(SessionTransport::new(id.clone(), server));
        let store: Weak<Self> = Arc::downgrade(self);
        transport.set_on_close(Box::new(move |id| {
            if let Some(store) = store.upgrade() {
                store.remove(id);
            }
        }));

        sessions.insert(id.clone(), Arc::clone(&transport));
        let active = sessions.len();
        drop(sessions);

        metrics::counter!("mcp.sessions.created").increment(1);
        metrics::gauge!("mcp.sessions.active").set(active as f64);
        tracing::info!(session_id = %id, active, "Session initialized");
        transport
    }

    pub fn lookup(&self, id: &SessionId) -> Option<Arc<SessionTransport>> {
        self.lock().get(id).cloned()
    }

    /// Drop the mapping for `id`. Called by the transport's close hook.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<SessionTransport>> {
        let mut sessions = self.lock();
        let removed = sessions.remove(id);
        let active = sessions.len();
        drop(sessions);

        if removed.is_some() {
            metrics::counter!("mcp.sessions.closed").increment(1);
            metrics::gauge!("mcp.sessions.active").set(active as f64);
            tracing::info!(session_id = %id, active, "Session removed");
        }
        removed
    }

    /// Close every live session. Used on shutdown.
    pub fn close_all(&self) {
        let transports: Vec<Arc<SessionTransport>> = self.lock().values().cloned().collect();
        for transport in transports {
            transport.close();
        }
    }

    /// Close sessions with no open event stream that have been idle for at
    /// least `max_idle`. Returns how many were closed.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<Arc<SessionTransport>> = self
            .lock()
            .values()
            .filter(|t| t.open_streams() == 0 && t.idle_for() >= max_idle)
            .cloned()
            .collect();
        for transport in &expired {
            tracing::info!(session_id = %transport.id(), idle_s = transport.idle_for().as_secs(), "Closing idle session");
            transport.close();
        }
        if !expired.is_empty() {
            metrics::counter!("mcp.sessions.expired").increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Run [`SessionStore::expire_idle`] periodically until the store is dropped.
    pub fn spawn_idle_sweep(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        let period = (max_idle / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.expire_idle(max_idle);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionTransport>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::methods;
    use toolrelay_tools::ToolHandlerContext;

    fn tool_server() -> ToolServer {
        ToolServer::builtin(ToolHandlerContext::new(std::env::temp_dir())).unwrap()
    }

    #[test]
    fn test_create_binds_connected_server() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());

        assert!(!transport.id().as_str().is_empty());
        assert!(transport.server().is_connected());
        let found = store.lookup(transport.id()).unwrap();
        assert!(Arc::ptr_eq(&found, &transport));
    }

    #[test]
    fn test_ids_are_unique() {
        let store = SessionStore::new();
        let a = store.create(tool_server());
        let b = store.create(tool_server());
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_close_removes_mapping_synchronously() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        let id = transport.id().clone();

        transport.close();
        assert!(transport.is_closed());
        assert!(store.lookup(&id).is_none());
        assert!(store.is_empty());

        // Idempotent.
        transport.close();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        transport.close();

        let err = transport
            .handle(JsonRpcRequest::new(1, methods::PING, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolRelayError::SessionNotFound(_)));
    }

    #[test]
    fn test_close_all() {
        let store = SessionStore::new();
        let first = store.create(tool_server());
        let second = store.create(tool_server());

        store.close_all();
        assert!(store.is_empty());
        assert!(first.is_closed() && second.is_closed());
    }

    #[test]
    fn test_transport_outliving_store_closes_cleanly() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        drop(store);
        transport.close();
        assert!(transport.is_closed());
    }

    #[test]
    fn test_dropped_stream_guard_closes_session() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        let id = transport.id().clone();

        let guard = transport.close_on_drop();
        assert_eq!(store.len(), 1);
        drop(guard);

        assert!(transport.is_closed());
        assert!(store.lookup(&id).is_none());
    }

    #[test]
    fn test_guard_does_not_keep_transport_alive() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        let guard = transport.close_on_drop();

        store.close_all();
        drop(transport);
        drop(guard);
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_idle_skips_sessions_with_open_streams() {
        let store = SessionStore::new();
        let idle = store.create(tool_server());
        let streaming = store.create(tool_server());
        let _events = streaming.subscribe();

        assert_eq!(store.expire_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.expire_idle(Duration::ZERO), 1);

        assert!(idle.is_closed());
        assert!(!streaming.is_closed());
        assert!(store.lookup(streaming.id()).is_some());
    }

    #[tokio::test]
    async fn test_requests_reset_idle_clock() {
        let store = SessionStore::new();
        let transport = store.create(tool_server());
        std::thread::sleep(Duration::from_millis(50));
        assert!(transport.idle_for() >= Duration::from_millis(50));

        transport
            .handle(JsonRpcRequest::new(1, methods::PING, None))
            .await
            .unwrap();
        assert!(transport.idle_for() < Duration::from_millis(50));
        assert_eq!(store.expire_idle(Duration::from_millis(50)), 0);
    }
}
