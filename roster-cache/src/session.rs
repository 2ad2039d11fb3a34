//! Session collaborator and the auth-loss watcher.

use roster_core::SessionId;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::manager::UserDataManager;
use crate::traits::{AuthSignal, Session};

/// Session backed by an in-process token channel.
///
/// Used by the CLI, which reads its token from configuration, and by tests
/// that drive login and logout by hand.
#[derive(Debug)]
pub struct StaticSession {
    signal: watch::Sender<AuthSignal>,
    session_id: RwLock<Option<SessionId>>,
}

impl StaticSession {
    pub fn new(token: Option<String>, session_id: Option<SessionId>) -> Self {
        let (signal, _) = watch::channel(AuthSignal::new(token, 0));
        Self {
            signal,
            session_id: RwLock::new(session_id),
        }
    }

    pub fn logged_in(token: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::new(Some(token.into()), Some(SessionId::new(session_id)))
    }

    pub fn logged_out() -> Self {
        Self::new(None, None)
    }

    /// Replace the token and session, notifying subscribers.
    pub fn login(&self, token: impl Into<String>, session_id: impl Into<String>) {
        if let Ok(mut current) = self.session_id.write() {
            *current = Some(SessionId::new(session_id));
        }
        let token = token.into();
        self.signal.send_modify(|signal| signal.token = Some(token));
    }

    /// Remove the token, notifying subscribers.
    pub fn logout(&self) {
        if let Ok(mut current) = self.session_id.write() {
            *current = None;
        }
        self.signal.send_modify(|signal| {
            signal.token = None;
            signal.logouts += 1;
        });
    }

    pub fn token(&self) -> Option<String> {
        self.signal.borrow().token.clone()
    }
}

impl Session for StaticSession {
    fn is_logged_in(&self) -> bool {
        self.signal.borrow().token.is_some()
    }

    fn session_id(&self) -> Option<SessionId> {
        if !self.is_logged_in() {
            return None;
        }
        self.session_id.read().ok().and_then(|id| id.clone())
    }

    fn subscribe(&self) -> watch::Receiver<AuthSignal> {
        self.signal.subscribe()
    }
}

/// Clear every tier whenever the token disappears or is replaced, including
/// a logout and re-login that the channel coalesced into one update. Ends
/// when the session's sender is dropped.
pub fn spawn_session_watcher(
    manager: Arc<UserDataManager>,
    mut signals: watch::Receiver<AuthSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = signals.borrow_and_update().clone();
        while signals.changed().await.is_ok() {
            let current = signals.borrow_and_update().clone();
            if previous.loses_session_to(&current) {
                info!(
                    logged_out = current.token.is_none(),
                    "Auth session ended, clearing user data"
                );
                manager.clear();
            } else {
                debug!("Auth signal changed without session loss");
            }
            previous = current;
        }
        debug!("Session watcher stopped");
    })
}
