// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Global client state
//!
//! Holds the session, preferences, medical info and cached scan history.
//! Every change is written to the key-value store and published on a watch
//! channel so views can re-render from the latest [`StateSnapshot`].
//!
//! Mutating calls take `&mut self`, so at most one user action is in flight.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::Backend;
use crate::model::{HistoryItem, HistoryKind, MedicalHistory, MedicalInfo, MedicalInfoPatch, Theme, User};
use crate::store::{KvStore, StorageKey};
use crate::upload::{self, UploadCategory, UploadFile};
use crate::{MedscanError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub token: String,
    pub user: Option<User>,
}

/// Everything a view renders from
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    pub is_loading: bool,
    pub theme: Theme,
    pub high_contrast: bool,
    pub session: Option<Session>,
    pub medical_info: MedicalInfo,
    pub reports: Vec<HistoryItem>,
}

impl StateSnapshot {
    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().and_then(|s| s.user.as_ref())
    }
}

/// What happened to the remote copy after a local medical-info edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MedicalSync {
    Synced,
    /// No session, nothing sent
    LocalOnly,
    /// Saved locally; the backend call failed with this message
    Failed(String),
}

/// Analysis returned for one upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    #[serde(rename = "type")]
    pub kind: HistoryKind,
    pub response: Value,
}

pub struct GlobalState<B: Backend> {
    backend: B,
    store: KvStore,
    state: watch::Sender<StateSnapshot>,
}

impl<B: Backend> GlobalState<B> {
    /// Restore persisted state
    ///
    /// Unreadable blobs are logged and skipped; the session only comes back
    /// when both the logged-in flag and the token are present.
    pub fn load(backend: B, store: KvStore) -> Self {
        let (state, _) = watch::channel(StateSnapshot {
            is_loading: true,
            ..Default::default()
        });
        let this = Self { backend, store, state };

        let logged_in: Option<bool> = this.read(StorageKey::IsLoggedIn);
        let token: Option<String> = this.read(StorageKey::UserToken);
        let user: Option<User> = this.read(StorageKey::User);
        let theme: Option<Theme> = this.read(StorageKey::Theme);
        let high_contrast: Option<bool> = this.read(StorageKey::HighContrast);
        let medical_info: Option<MedicalInfo> = this.read(StorageKey::MedicalInfo);
        let reports: Option<Vec<HistoryItem>> = this.read(StorageKey::Reports);

        let session = match (logged_in, token) {
            (Some(true), Some(token)) if !token.is_empty() => Some(Session { token, user }),
            _ => None,
        };

        this.state.send_modify(|s| {
            s.session = session;
            s.theme = theme.unwrap_or_default();
            s.high_contrast = high_contrast.unwrap_or(false);
            s.medical_info = medical_info.unwrap_or_default();
            s.reports = reports.unwrap_or_default();
            s.is_loading = false;
        });

        debug!("State loaded (logged in: {})", this.state.borrow().is_logged_in());
        this
    }

    fn read<T: serde::de::DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to load '{}' from storage: {}", key, e);
                None
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.borrow().clone()
    }

    /// Receive a fresh snapshot on every change
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state.subscribe()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.borrow().is_logged_in()
    }

    fn token(&self) -> Option<String> {
        self.state.borrow().session.as_ref().map(|s| s.token.clone())
    }

    fn require_token(&self) -> Result<String> {
        self.token().ok_or(MedscanError::NotLoggedIn)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let reply = self.backend.login(email, password).await?;
        self.start_session(reply.access_token, User::from_email(email))?;
        info!("Logged in as {}", email);

        self.sync().await;
        Ok(())
    }

    /// Create the account, then log straight in
    pub async fn register(&mut self, email: &str, password: &str, full_name: &str) -> Result<()> {
        self.backend.register(email, password, full_name).await?;
        let reply = self.backend.login(email, password).await?;

        let user = User {
            name: full_name.to_string(),
            email: email.to_string(),
        };
        self.start_session(reply.access_token, user)?;
        info!("Registered and logged in as {}", email);

        self.sync().await;
        Ok(())
    }

    fn start_session(&mut self, token: String, user: User) -> Result<()> {
        self.store.set(StorageKey::IsLoggedIn, &true)?;
        self.store.set(StorageKey::UserToken, &token)?;
        self.store.set(StorageKey::User, &user)?;

        self.state.send_modify(|s| {
            s.session = Some(Session {
                token,
                user: Some(user),
            });
        });
        Ok(())
    }

    /// Pull history and medical info after a login; failures only logged
    pub async fn sync(&mut self) {
        if let Err(e) = self.refresh_history().await {
            warn!("Could not fetch history: {}", e);
        }
        if let Err(e) = self.sync_medical_info().await {
            debug!("Could not fetch medical info: {}", e);
        }
    }

    /// End the session locally, whatever the backend says
    ///
    /// Every session key gets its own removal attempt; one failed delete
    /// must not leave the token behind for the next `load`.
    pub async fn logout(&mut self) {
        if let Some(token) = self.token() {
            self.backend.logout(&token).await;
        }

        self.state.send_modify(|s| {
            s.session = None;
            s.reports.clear();
        });
        for key in StorageKey::session_keys() {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove '{}' from storage: {}", key, e);
            }
        }

        info!("Logged out");
    }

    pub async fn refresh_history(&mut self) -> Result<usize> {
        let token = self.require_token()?;
        let items = self.backend.history(&token).await?;

        self.store.set(StorageKey::Reports, &items)?;
        let count = items.len();
        self.state.send_modify(|s| s.reports = items);

        debug!("History refreshed: {} items", count);
        Ok(count)
    }

    pub async fn sync_medical_info(&mut self) -> Result<()> {
        let token = self.require_token()?;
        let info = MedicalInfo::from(self.backend.medical_info(&token).await?);

        self.store.set(StorageKey::MedicalInfo, &info)?;
        self.state.send_modify(|s| s.medical_info = info);
        Ok(())
    }

    /// Rename the signed-in user; `false` when there is no user to rename
    pub fn update_profile(&mut self, name: &str) -> Result<bool> {
        let updated = match self.state.borrow().user() {
            Some(user) => User {
                name: name.to_string(),
                email: user.email.clone(),
            },
            None => return Ok(false),
        };

        self.store.set(StorageKey::User, &updated)?;
        self.state.send_modify(|s| {
            if let Some(session) = s.session.as_mut() {
                session.user = Some(updated);
            }
        });
        Ok(true)
    }

    /// Save locally first, then push to the backend if logged in
    pub async fn update_medical_info(&mut self, patch: MedicalInfoPatch) -> Result<MedicalSync> {
        let updated = self.state.borrow().medical_info.merge(patch);

        self.store.set(StorageKey::MedicalInfo, &updated)?;
        self.state.send_modify(|s| s.medical_info = updated.clone());

        let token = match self.token() {
            Some(token) => token,
            None => return Ok(MedicalSync::LocalOnly),
        };

        match self
            .backend
            .update_medical_info(&token, &MedicalHistory::from(&updated))
            .await
        {
            Ok(_) => Ok(MedicalSync::Synced),
            Err(e) => {
                error!("Failed to sync medical history: {}", e);
                Ok(MedicalSync::Failed(e.to_string()))
            }
        }
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.store.set(StorageKey::Theme, &theme)?;
        self.state.send_modify(|s| s.theme = theme);
        Ok(())
    }

    pub fn set_high_contrast(&mut self, enabled: bool) -> Result<()> {
        self.store.set(StorageKey::HighContrast, &enabled)?;
        self.state.send_modify(|s| s.high_contrast = enabled);
        Ok(())
    }

    /// Classify, check and upload a file from disk
    ///
    /// The category rule is checked before the file is even read.
    pub async fn upload_path(&mut self, path: &Path, category: UploadCategory) -> Result<UploadOutcome> {
        upload::validate(category, upload::classify(path)?)?;
        let file = UploadFile::from_path(path)?;
        self.upload(&file, category).await
    }

    pub async fn upload(&mut self, file: &UploadFile, category: UploadCategory) -> Result<UploadOutcome> {
        upload::validate(category, file.kind)?;
        let token = self.require_token()?;

        info!("Uploading {} as {}", file.name, category);
        let response = match (category, file.kind) {
            (UploadCategory::Medicine, _) => self.backend.upload_medicine_image(&token, file).await?,
            (UploadCategory::Report, upload::FileKind::Pdf) => self.backend.upload_report_pdf(&token, file).await?,
            (UploadCategory::Report, upload::FileKind::Image) => {
                self.backend.upload_report_image(&token, file).await?
            }
        };

        if let Err(e) = self.refresh_history().await {
            warn!("Upload succeeded but history refresh failed: {}", e);
        }

        Ok(UploadOutcome {
            kind: category.history_kind(),
            response,
        })
    }

    /// Wipe every persisted key and reset to defaults
    pub fn clear_local_data(&mut self) -> Result<()> {
        self.store.clear()?;
        self.state.send_modify(|s| *s = StateSnapshot::default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TokenResponse;
    use crate::upload::FileKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted backend that counts what it was asked to do
    #[derive(Default)]
    struct FakeBackend {
        reject_login: Option<String>,
        fail_medical_update: bool,
        remote_history: Vec<HistoryItem>,
        remote_medical: MedicalHistory,
        calls: AtomicUsize,
        logouts: AtomicUsize,
        uploads: Mutex<Vec<&'static str>>,
        medical_updates: Mutex<Vec<MedicalHistory>>,
    }

    impl FakeBackend {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn register(&self, email: &str, _password: &str, full_name: &str) -> Result<Value> {
            self.hit();
            Ok(json!({"email": email, "full_name": full_name}))
        }

        async fn login(&self, _email: &str, _password: &str) -> Result<TokenResponse> {
            self.hit();
            match &self.reject_login {
                Some(message) => Err(MedscanError::Server {
                    status: 401,
                    message: message.clone(),
                }),
                None => Ok(TokenResponse {
                    access_token: "tok-123".to_string(),
                    token_type: Some("bearer".to_string()),
                }),
            }
        }

        async fn logout(&self, _token: &str) {
            self.hit();
            self.logouts.fetch_add(1, Ordering::SeqCst);
        }

        async fn upload_medicine_image(&self, _token: &str, _file: &UploadFile) -> Result<Value> {
            self.hit();
            self.uploads.lock().unwrap().push("medicine-image");
            Ok(json!({"drug_name": "Paracetamol"}))
        }

        async fn upload_report_image(&self, _token: &str, _file: &UploadFile) -> Result<Value> {
            self.hit();
            self.uploads.lock().unwrap().push("report-image");
            Ok(json!({"summary": "Normal CBC"}))
        }

        async fn upload_report_pdf(&self, _token: &str, _file: &UploadFile) -> Result<Value> {
            self.hit();
            self.uploads.lock().unwrap().push("report-pdf");
            Ok(json!({"summary": "Lipid profile"}))
        }

        async fn medical_info(&self, _token: &str) -> Result<MedicalHistory> {
            self.hit();
            Ok(self.remote_medical.clone())
        }

        async fn update_medical_info(&self, _token: &str, history: &MedicalHistory) -> Result<Value> {
            self.hit();
            self.medical_updates.lock().unwrap().push(history.clone());
            if self.fail_medical_update {
                return Err(MedscanError::Server {
                    status: 500,
                    message: "Failed to update medical history".to_string(),
                });
            }
            Ok(json!({"status": "ok"}))
        }

        async fn history(&self, _token: &str) -> Result<Vec<HistoryItem>> {
            self.hit();
            Ok(self.remote_history.clone())
        }
    }

    fn history_item(id: &str, kind: HistoryKind) -> HistoryItem {
        HistoryItem {
            id: id.to_string(),
            image_ref: format!("https://img.example.org/{}.jpg", id),
            date: "2024-04-01T10:00:00".to_string(),
            kind,
            response: Some(json!({"summary": "ok"})),
        }
    }

    async fn logged_in(backend: FakeBackend) -> (GlobalState<FakeBackend>, KvStore) {
        let store = KvStore::in_memory().unwrap();
        let mut state = GlobalState::load(backend, store.clone());
        state.login("asha@example.com", "secret").await.unwrap();
        (state, store)
    }

    #[tokio::test]
    async fn test_login_stores_token_and_flips_state() {
        let backend = FakeBackend {
            remote_history: vec![history_item("h1", HistoryKind::Report)],
            remote_medical: MedicalHistory {
                chronic_condition: "Diabetes".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let (state, store) = logged_in(backend).await;

        let snap = state.snapshot();
        assert!(snap.is_logged_in());
        assert_eq!(snap.user().unwrap().name, "asha");
        assert_eq!(snap.reports.len(), 1);
        assert_eq!(snap.medical_info.conditions, "Diabetes");

        assert_eq!(store.get::<bool>(StorageKey::IsLoggedIn).unwrap(), Some(true));
        assert_eq!(store.get::<String>(StorageKey::UserToken).unwrap().as_deref(), Some("tok-123"));
        assert!(store.get_raw(StorageKey::Reports).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_login_surfaces_message_and_keeps_storage() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::Theme, &Theme::Dark).unwrap();
        let before = store.entries().unwrap();

        let backend = FakeBackend {
            reject_login: Some("Incorrect email or password".to_string()),
            ..Default::default()
        };
        let mut state = GlobalState::load(backend, store.clone());

        let err = state.login("asha@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Incorrect email or password");
        assert!(!state.is_logged_in());
        assert_eq!(store.entries().unwrap(), before);
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let backend = FakeBackend {
            remote_history: vec![history_item("h1", HistoryKind::Med)],
            ..Default::default()
        };
        let (mut state, store) = logged_in(backend).await;
        state.set_theme(Theme::Light).unwrap();

        state.logout().await;

        assert!(!state.is_logged_in());
        assert!(state.snapshot().reports.is_empty());
        assert_eq!(state.backend().logouts.load(Ordering::SeqCst), 1);
        for key in StorageKey::session_keys() {
            assert!(store.get_raw(key).unwrap().is_none(), "{} should be removed", key);
        }
        // preferences survive
        assert_eq!(store.get::<Theme>(StorageKey::Theme).unwrap(), Some(Theme::Light));

        let reloaded = GlobalState::load(FakeBackend::default(), store);
        assert!(!reloaded.is_logged_in());
    }

    #[tokio::test]
    async fn test_logout_keeps_going_when_a_removal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medscan.db");
        let store = KvStore::open(&path).unwrap();
        let mut state = GlobalState::load(FakeBackend::default(), store.clone());
        state.login("asha@example.com", "secret").await.unwrap();

        // the first session key can no longer be deleted
        let other = rusqlite::Connection::open(&path).unwrap();
        other
            .execute_batch(
                "CREATE TRIGGER keep_flag BEFORE DELETE ON kv WHEN old.key = 'isLoggedIn'
                 BEGIN SELECT RAISE(ABORT, 'read-only key'); END;",
            )
            .unwrap();

        state.logout().await;

        assert!(!state.is_logged_in());
        assert_eq!(store.get::<bool>(StorageKey::IsLoggedIn).unwrap(), Some(true));
        assert!(store.get_raw(StorageKey::UserToken).unwrap().is_none());
        assert!(store.get_raw(StorageKey::User).unwrap().is_none());

        let reloaded = GlobalState::load(FakeBackend::default(), KvStore::open(&path).unwrap());
        assert!(!reloaded.is_logged_in());
    }

    #[tokio::test]
    async fn test_medicine_pdf_rejected_before_network() {
        let (mut state, _store) = logged_in(FakeBackend::default()).await;
        let calls_before = state.backend().calls();

        let pdf = UploadFile::from_bytes("rx.pdf", FileKind::Pdf, b"%PDF-1.4".to_vec());
        let err = state.upload(&pdf, UploadCategory::Medicine).await.unwrap_err();
        assert!(matches!(err, MedscanError::Validation(_)));

        let err = state
            .upload_path(Path::new("/does/not/exist/rx.pdf"), UploadCategory::Medicine)
            .await
            .unwrap_err();
        assert!(matches!(err, MedscanError::Validation(_)));

        assert_eq!(state.backend().calls(), calls_before);
    }

    #[tokio::test]
    async fn test_upload_routes_by_category_and_kind() {
        let (mut state, _store) = logged_in(FakeBackend::default()).await;

        let photo = UploadFile::from_bytes("pills.jpg", FileKind::Image, vec![0xFF, 0xD8]);
        let pdf = UploadFile::from_bytes("lipids.pdf", FileKind::Pdf, b"%PDF-1.4".to_vec());

        let outcome = state.upload(&photo, UploadCategory::Medicine).await.unwrap();
        assert_eq!(outcome.kind, HistoryKind::Med);
        assert_eq!(outcome.response["drug_name"], "Paracetamol");

        state.upload(&photo, UploadCategory::Report).await.unwrap();
        let outcome = state.upload(&pdf, UploadCategory::Report).await.unwrap();
        assert_eq!(outcome.kind, HistoryKind::Report);

        let routed = state.backend().uploads.lock().unwrap().clone();
        assert_eq!(routed, vec!["medicine-image", "report-image", "report-pdf"]);
    }

    #[tokio::test]
    async fn test_upload_requires_session() {
        let store = KvStore::in_memory().unwrap();
        let mut state = GlobalState::load(FakeBackend::default(), store);
        let photo = UploadFile::from_bytes("pills.jpg", FileKind::Image, vec![0xFF, 0xD8]);

        let err = state.upload(&photo, UploadCategory::Medicine).await.unwrap_err();
        assert!(matches!(err, MedscanError::NotLoggedIn));
        assert_eq!(state.backend().calls(), 0);
    }

    #[tokio::test]
    async fn test_medical_info_saved_locally_even_if_sync_fails() {
        let backend = FakeBackend {
            fail_medical_update: true,
            ..Default::default()
        };
        let (mut state, store) = logged_in(backend).await;

        let outcome = state
            .update_medical_info(MedicalInfoPatch {
                allergies: Some("Penicillin".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(outcome, MedicalSync::Failed(_)));
        let saved: MedicalInfo = store.get(StorageKey::MedicalInfo).unwrap().unwrap();
        assert_eq!(saved.allergies, "Penicillin");

        let pushed = state.backend().medical_updates.lock().unwrap().clone();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].allergy, "Penicillin");
    }

    #[tokio::test]
    async fn test_medical_info_offline_is_local_only() {
        let store = KvStore::in_memory().unwrap();
        let mut state = GlobalState::load(FakeBackend::default(), store.clone());

        let outcome = state
            .update_medical_info(MedicalInfoPatch {
                medications: Some("Metformin 500mg".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(outcome, MedicalSync::LocalOnly);
        assert_eq!(state.backend().calls(), 0);
        let saved: MedicalInfo = store.get(StorageKey::MedicalInfo).unwrap().unwrap();
        assert_eq!(saved.medications, "Metformin 500mg");
    }

    #[tokio::test]
    async fn test_load_restores_and_skips_bad_blobs() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::IsLoggedIn, &true).unwrap();
        store.set(StorageKey::UserToken, "tok-9").unwrap();
        store.set(StorageKey::User, &User::from_email("ravi@example.com")).unwrap();
        store.set(StorageKey::Theme, "neon").unwrap();
        store.set(StorageKey::HighContrast, &true).unwrap();

        let state = GlobalState::load(FakeBackend::default(), store);
        let snap = state.snapshot();

        assert!(!snap.is_loading);
        assert!(snap.is_logged_in());
        assert_eq!(snap.user().unwrap().name, "ravi");
        assert_eq!(snap.theme, Theme::System);
        assert!(snap.high_contrast);
    }

    #[tokio::test]
    async fn test_token_without_flag_is_not_a_session() {
        let store = KvStore::in_memory().unwrap();
        store.set(StorageKey::UserToken, "stale").unwrap();

        let state = GlobalState::load(FakeBackend::default(), store);
        assert!(!state.is_logged_in());
    }

    #[tokio::test]
    async fn test_register_uses_full_name() {
        let store = KvStore::in_memory().unwrap();
        let mut state = GlobalState::load(FakeBackend::default(), store.clone());
        state.register("ravi@example.com", "pw", "Ravi Kumar").await.unwrap();

        assert_eq!(state.snapshot().user().unwrap().name, "Ravi Kumar");
        let user: User = store.get(StorageKey::User).unwrap().unwrap();
        assert_eq!(user.name, "Ravi Kumar");
    }

    #[tokio::test]
    async fn test_observers_see_changes() {
        let store = KvStore::in_memory().unwrap();
        let mut state = GlobalState::load(FakeBackend::default(), store);
        let mut rx = state.subscribe();

        state.set_high_contrast(true).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().high_contrast);

        assert!(!state.update_profile("Someone").unwrap());
    }

    #[tokio::test]
    async fn test_update_profile_renames_user() {
        let (mut state, store) = logged_in(FakeBackend::default()).await;
        assert!(state.update_profile("Asha K").unwrap());

        let user: User = store.get(StorageKey::User).unwrap().unwrap();
        assert_eq!(user.name, "Asha K");
        assert_eq!(user.email, "asha@example.com");
    }
}
