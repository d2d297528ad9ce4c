/// Credential gate: decides whether a billable backend call may proceed and
/// parks the requested action while the user supplies a key.
use assets::ImageAsset;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::pipeline::GenerationRequest;

/// A user-supplied API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Trimmed key, or `None` when blank
    pub fn new(key: impl AsRef<str>) -> Option<Self> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The credential a backend call runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveCredential {
    /// Key held by the session
    Key(Credential),
    /// Key managed by the host environment; only the backend can read it
    HostManaged,
}

/// Session-scoped key/value storage (one session = one process)
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// Host collaborator that may hold a key the application cannot read
#[async_trait]
pub trait HostKeySelector: Send + Sync {
    async fn has_selected_api_key(&self) -> bool;
    async fn open_select_key(&self);
}

/// Host key taken from an environment variable
pub struct EnvHostKey {
    var: String,
}

impl EnvHostKey {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl HostKeySelector for EnvHostKey {
    async fn has_selected_api_key(&self) -> bool {
        std::env::var(&self.var).is_ok_and(|v| !v.trim().is_empty())
    }

    async fn open_select_key(&self) {
        info!(var = %self.var, "export the host API key in this variable to select it");
    }
}

/// Kind of action waiting on a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Image,
    Video,
}

/// Action parked while the user is asked for a key, with its inputs
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    Image(GenerationRequest),
    Video(ImageAsset),
}

impl PendingAction {
    pub fn kind(&self) -> PendingKind {
        match self {
            PendingAction::Image(_) => PendingKind::Image,
            PendingAction::Video(_) => PendingKind::Video,
        }
    }
}

/// Result of [`CredentialGate::authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Proceed(ActiveCredential),
    Suspend,
}

/// Owns the session credential and the single pending-action slot
pub struct CredentialGate {
    storage_key: String,
    store: Arc<dyn SessionStore>,
    host: Option<Arc<dyn HostKeySelector>>,
    credential: Mutex<Option<Credential>>,
    pending: Mutex<Option<PendingAction>>,
}

impl CredentialGate {
    /// Create a gate, loading any credential already in the session store
    pub fn new(storage_key: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        let storage_key = storage_key.into();
        let credential = store.get(&storage_key).and_then(Credential::new);
        if credential.is_some() {
            debug!(key = %storage_key, "loaded session credential");
        }
        Self {
            storage_key,
            store,
            host: None,
            credential: Mutex::new(credential),
            pending: Mutex::new(None),
        }
    }

    /// With a host-managed key selector
    pub fn with_host(mut self, host: Arc<dyn HostKeySelector>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn has_credential(&self) -> bool {
        self.credential.lock().is_some()
    }

    pub fn pending(&self) -> Option<PendingKind> {
        self.pending.lock().as_ref().map(PendingAction::kind)
    }

    /// Check override, session key, then host key. When none is available the
    /// requested action is parked and the caller must suspend.
    pub async fn authorize(
        &self,
        requested: &PendingAction,
        override_key: Option<&Credential>,
    ) -> Authorization {
        if let Some(key) = override_key {
            return Authorization::Proceed(ActiveCredential::Key(key.clone()));
        }
        if let Some(key) = self.credential.lock().clone() {
            return Authorization::Proceed(ActiveCredential::Key(key));
        }
        if let Some(host) = &self.host {
            if host.has_selected_api_key().await {
                return Authorization::Proceed(ActiveCredential::HostManaged);
            }
        }

        info!(action = ?requested.kind(), "no credential available, suspending");
        self.park(requested.clone());
        Authorization::Suspend
    }

    /// Park an action whose call was rejected for authorization reasons
    pub fn park(&self, action: PendingAction) {
        *self.pending.lock() = Some(action);
    }

    /// The user answered the prompt. `None` cancels and drops the pending
    /// action. A non-empty key is stored for the session. Returns the action
    /// to re-invoke together with the supplied key, if any.
    pub fn resolve(&self, supplied: Option<&str>) -> Option<(PendingAction, Option<Credential>)> {
        let Some(supplied) = supplied else {
            if let Some(dropped) = self.pending.lock().take() {
                info!(action = ?dropped.kind(), "credential prompt cancelled");
            }
            return None;
        };

        let key = Credential::new(supplied);
        if let Some(key) = &key {
            self.store.set(&self.storage_key, key.expose());
            *self.credential.lock() = Some(key.clone());
            info!("API key saved for this session");
        }

        let action = self.pending.lock().take()?;
        debug!(action = ?action.kind(), "resuming pending action");
        Some((action, key))
    }

    /// Ask the host to show its own key picker
    pub async fn open_host_selection(&self) -> bool {
        match &self.host {
            Some(host) => {
                host.open_select_key().await;
                true
            }
            None => false,
        }
    }

    /// Erase the session credential. Requires explicit confirmation.
    pub fn clear(&self, confirmed: bool) -> bool {
        if !confirmed {
            return false;
        }
        self.store.remove(&self.storage_key);
        let had_key = self.credential.lock().take().is_some();
        if had_key {
            info!("API key removed");
        }
        had_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelMode;

    struct FixedHost(bool);

    #[async_trait]
    impl HostKeySelector for FixedHost {
        async fn has_selected_api_key(&self) -> bool {
            self.0
        }

        async fn open_select_key(&self) {}
    }

    const KEY: &str = "corkbrick-user-api-key";

    fn video_action() -> PendingAction {
        PendingAction::Video(ImageAsset::from_base64("image/png", "AAAA"))
    }

    fn image_action() -> PendingAction {
        PendingAction::Image(GenerationRequest::new(
            vec![ImageAsset::from_base64("image/png", "AAAA")],
            "a loft",
            "system",
            ModelMode::Standard,
        ))
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let key = Credential::new("  secret-key ").unwrap();
        assert_eq!(key.expose(), "secret-key");
        assert_eq!(format!("{key:?}"), "Credential(***)");
        assert!(Credential::new("   ").is_none());
    }

    #[tokio::test]
    async fn test_authorize_order() {
        let store = Arc::new(MemorySessionStore::new());
        store.set(KEY, "stored");
        let gate = CredentialGate::new(KEY, store).with_host(Arc::new(FixedHost(true)));

        let over = Credential::new("override").unwrap();
        assert_eq!(
            gate.authorize(&video_action(), Some(&over)).await,
            Authorization::Proceed(ActiveCredential::Key(over))
        );
        assert_eq!(
            gate.authorize(&video_action(), None).await,
            Authorization::Proceed(ActiveCredential::Key(Credential::new("stored").unwrap()))
        );

        gate.clear(true);
        assert_eq!(
            gate.authorize(&video_action(), None).await,
            Authorization::Proceed(ActiveCredential::HostManaged)
        );
        assert_eq!(gate.pending(), None);
    }

    #[tokio::test]
    async fn test_suspend_then_resolve_resumes_same_action() {
        let store = Arc::new(MemorySessionStore::new());
        let gate = CredentialGate::new(KEY, store.clone()).with_host(Arc::new(FixedHost(false)));

        let action = image_action();
        assert_eq!(gate.authorize(&action, None).await, Authorization::Suspend);
        assert_eq!(gate.pending(), Some(PendingKind::Image));

        let (resumed, key) = gate.resolve(Some("new-key")).unwrap();
        assert_eq!(resumed, action);
        assert_eq!(key.unwrap().expose(), "new-key");
        assert_eq!(store.get(KEY).as_deref(), Some("new-key"));
        assert!(gate.has_credential());
        assert_eq!(gate.pending(), None);
    }

    #[tokio::test]
    async fn test_cancel_discards_pending() {
        let gate = CredentialGate::new(KEY, Arc::new(MemorySessionStore::new()));
        assert_eq!(gate.authorize(&video_action(), None).await, Authorization::Suspend);

        assert!(gate.resolve(None).is_none());
        assert_eq!(gate.pending(), None);
        assert!(gate.resolve(Some("late-key")).is_none());
    }

    #[tokio::test]
    async fn test_empty_key_resumes_without_storing() {
        let store = Arc::new(MemorySessionStore::new());
        let gate = CredentialGate::new(KEY, store.clone());
        gate.authorize(&video_action(), None).await;

        let (action, key) = gate.resolve(Some("  ")).unwrap();
        assert_eq!(action.kind(), PendingKind::Video);
        assert!(key.is_none());
        assert!(store.get(KEY).is_none());
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let store = Arc::new(MemorySessionStore::new());
        store.set(KEY, "stored");
        let gate = CredentialGate::new(KEY, store.clone());

        assert!(!gate.clear(false));
        assert!(gate.has_credential());
        assert!(gate.clear(true));
        assert!(!gate.has_credential());
        assert!(store.get(KEY).is_none());
    }

    #[tokio::test]
    async fn test_env_host_key_detects_variable() {
        let var = "CORKSCENE_TEST_HOST_KEY_PRESENT";
        std::env::set_var(var, "host-secret");
        assert!(EnvHostKey::new(var).has_selected_api_key().await);
        assert!(!EnvHostKey::new("CORKSCENE_TEST_HOST_KEY_ABSENT").has_selected_api_key().await);
        std::env::remove_var(var);
    }
}
