use crate::session::handle::SessionHandle;
use parking_lot::Mutex;

/// Live sessions keyed by remote peer id, in join order.
///
/// At most one session per peer. The lock is only held for map updates;
/// closing a displaced session is the caller's job, outside the lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle`, returning the session it displaced (if any).
    /// A re-joining peer keeps its original roster position.
    pub fn replace(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        match sessions.iter_mut().find(|s| s.id() == handle.id()) {
            Some(slot) => Some(std::mem::replace(slot, handle)),
            None => {
                sessions.push(handle);
                None
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        let index = sessions.iter().position(|s| s.id() == id)?;
        Some(sessions.remove(index))
    }

    /// Removes the session for `id` only if it is still `generation`. A
    /// session that was already replaced leaves its successor alone.
    pub fn remove_generation(&self, id: &str, generation: u64) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        let index = sessions
            .iter()
            .position(|s| s.id() == id && s.generation() == generation)?;
        Some(sessions.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().iter().find(|s| s.id() == id).cloned()
    }

    /// Empties the registry.
    pub fn drain(&self) -> Vec<SessionHandle> {
        std::mem::take(&mut *self.sessions.lock())
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::peer::types::{EncodingParameters, Role};
    use crate::session::handle::SessionContext;
    use crate::signaling::LocalRelay;
    use crate::status::StatusEmitter;
    use crate::testing::FakeFactory;
    use std::sync::Arc;

    fn context() -> SessionContext {
        let config = SessionConfig::default();
        SessionContext {
            encoding: EncodingParameters {
                max_bitrate_bps: config.max_bitrate_bps,
                ideal_width: 1280,
                ideal_height: 720,
                frame_rate: config.frame_rate,
            },
            config: Arc::new(config),
            factory: Arc::new(FakeFactory::new()),
            signaling: Arc::new(LocalRelay::new().connect()),
            status: StatusEmitter::new(),
            sink: None,
        }
    }

    #[tokio::test]
    async fn replace_keeps_one_session_per_peer_in_join_order() {
        let ctx = context();
        let registry = SessionRegistry::new();

        assert!(registry
            .replace(SessionHandle::spawn("a", Role::Host, ctx.clone()))
            .is_none());
        assert!(registry
            .replace(SessionHandle::spawn("b", Role::Host, ctx.clone()))
            .is_none());

        let fresh = SessionHandle::spawn("a", Role::Host, ctx.clone());
        let old = registry.replace(fresh.clone()).unwrap();
        assert_ne!(old.generation(), fresh.generation());
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().generation(), fresh.generation());

        assert!(registry.remove_generation("a", old.generation()).is_none());
        assert_eq!(registry.len(), 2);
        assert!(registry.remove_generation("a", fresh.generation()).is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry
            .replace(SessionHandle::spawn("a", Role::Host, ctx.clone()))
            .is_none());
        assert_eq!(registry.ids(), vec!["b", "a"]);
        assert!(registry.remove("a").is_some());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
