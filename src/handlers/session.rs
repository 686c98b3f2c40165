use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::config::LoadMode;
use crate::gateway::Subscription;
use crate::handlers::auth::IdentityProvider;
use crate::models::{ProviderIdentity, User};
use crate::state::AppStore;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No provider event seen yet.
    #[default]
    Unknown,
    Authenticated(User),
    Anonymous,
}

#[derive(Default)]
struct Session {
    state: SessionState,
    subscription: Option<Subscription>,
}

/// Translates identity provider events into store state.
///
/// Each logical session triggers exactly one task load of the configured kind, however many
/// times the provider repeats the same sign-in.
pub struct SessionBridge {
    store: Arc<AppStore>,
    load_mode: LoadMode,
    session: Mutex<Session>,
}

impl SessionBridge {
    pub fn new(store: Arc<AppStore>, load_mode: LoadMode) -> Self {
        SessionBridge {
            store,
            load_mode,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    /// `false` while the session is still being determined.
    pub fn is_ready(&self) -> bool {
        self.store.snapshot().auth_checked
    }

    /// Routes the provider's session events through this bridge, in order.
    /// Releasing the returned subscription detaches the bridge.
    pub fn attach(self: &Arc<Self>, provider: &dyn IdentityProvider) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<ProviderIdentity>>();

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(identity) = rx.recv().await {
                bridge.handle_event(identity).await;
            }
            log::debug!("Session bridge detached");
        });

        provider.on_session_change(Box::new(move |identity| {
            if tx.send(identity).is_err() {
                log::warn!("Session event dropped: bridge worker is gone");
            }
        }))
    }

    pub async fn handle_event(&self, identity: Option<ProviderIdentity>) {
        match identity {
            Some(identity) => self.sign_in(User::from_identity(&identity)).await,
            None => self.signed_out(),
        }
    }

    /// Signs out of the provider and purges local session state.
    pub async fn sign_out(&self, provider: &dyn IdentityProvider) {
        provider.sign_out();
        self.handle_event(None).await;
    }

    async fn sign_in(&self, user: User) {
        let fetch = {
            let mut session = self.lock();
            let same_session = matches!(
                &session.state,
                SessionState::Authenticated(current) if current.uid == user.uid
            );

            self.store.set_user(user.clone());
            session.state = SessionState::Authenticated(user);
            self.store.mark_auth_checked();

            if same_session {
                log::debug!("Repeated sign-in event for the current session");
                return;
            }

            if let Some(previous) = session.subscription.take() {
                previous.unsubscribe();
            }
            match self.load_mode {
                LoadMode::Fetch => true,
                LoadMode::Subscribe => {
                    session.subscription = self.store.subscribe_tasks();
                    false
                }
            }
        };

        if fetch {
            self.store.fetch_tasks().await;
        }
    }

    fn signed_out(&self) {
        let mut session = self.lock();
        if let Some(subscription) = session.subscription.take() {
            subscription.unsubscribe();
        }
        self.store.logout();
        session.state = SessionState::Anonymous;
        self.store.mark_auth_checked();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
