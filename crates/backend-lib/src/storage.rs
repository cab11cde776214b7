// ============================
// crates/backend-lib/src/storage.rs
// ============================
//! Identity storage abstraction with flat-file and in-memory implementations.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashboard_common::Role;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, sync::Mutex};
use uuid::Uuid;

use crate::auth::password::{hash_password_with_cost, PasswordCost};
use crate::config::SeedSettings;
use crate::error::StoreError;

/// A user known to the dashboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    /// Unique login name (an email address)
    pub subject: String,
    /// PHC-formatted password hash
    pub credential_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(subject: impl Into<String>, credential_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            credential_hash: credential_hash.into(),
            role,
            created_at: Utc::now(),
        }
    }
}

/// Trait for identity store backends
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up an identity by its unique subject
    async fn find_by_subject(&self, subject: &str) -> Result<Option<Identity>, StoreError>;

    /// Insert a new identity, failing if the subject is taken
    async fn insert(&self, identity: Identity) -> Result<(), StoreError>;
}

/// In-memory implementation of the `UserStore` trait
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, Identity>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove an identity, returning it if present
    pub fn remove(&self, subject: &str) -> Option<Identity> {
        self.users.remove(subject).map(|(_, identity)| identity)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.users.get(subject).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, identity: Identity) -> Result<(), StoreError> {
        match self.users.entry(identity.subject.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(identity.subject)),
            Entry::Vacant(slot) => {
                slot.insert(identity);
                Ok(())
            },
        }
    }
}

/// Flat-file implementation of the `UserStore` trait.
///
/// All identities live in one `users.json` document. Every lookup re-reads
/// the file so that edits and removals take effect without a restart.
pub struct FlatFileUserStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FlatFileUserStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            path: root.join("users.json"),
            write_lock: Mutex::new(()),
        })
    }

    async fn read_all(&self) -> Result<BTreeMap<String, Identity>, StoreError> {
        if !tokio_fs::try_exists(&self.path).await? {
            return Ok(BTreeMap::new());
        }
        let content = tokio_fs::read_to_string(&self.path).await?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl UserStore for FlatFileUserStore {
    async fn find_by_subject(&self, subject: &str) -> Result<Option<Identity>, StoreError> {
        let mut users = self.read_all().await?;
        Ok(users.remove(subject))
    }

    async fn insert(&self, identity: Identity) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.read_all().await?;
        if users.contains_key(&identity.subject) {
            return Err(StoreError::Duplicate(identity.subject));
        }
        users.insert(identity.subject.clone(), identity);

        // write to a sibling file first so readers never see a torn document
        let json = serde_json::to_string_pretty(&users)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Make sure the configured admin identity exists.
///
/// Returns `true` when a new identity was created.
pub async fn seed_admin_user(
    store: &dyn UserStore,
    seed: &SeedSettings,
    cost: PasswordCost,
) -> anyhow::Result<bool> {
    let Some(email) = seed.admin_email.as_deref() else {
        return Ok(false);
    };
    if store.find_by_subject(email).await?.is_some() {
        return Ok(false);
    }

    let hash = match (&seed.admin_password_hash, &seed.admin_password) {
        (Some(hash), _) => hash.clone(),
        (None, Some(password)) => hash_password_with_cost(password, cost)?,
        (None, None) => {
            tracing::warn!(subject = email, "admin seed has no password, skipping");
            return Ok(false);
        },
    };

    store.insert(Identity::new(email, hash, seed.admin_role)).await?;
    tracing::info!(subject = email, "seeded default admin user");
    Ok(true)
}
