// src/registry/mod.rs

pub mod state;

pub use state::ApprovalStatus;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::plan::Subscription;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub first_name: String,
    pub last_name: String,
    pub registered_at: DateTime<Local>,
    #[serde(default)]
    pub status: ApprovalStatus,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub subscription: Subscription,
}

impl UserRecord {
    pub fn is_enabled(&self) -> bool {
        self.status == ApprovalStatus::Enabled
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Result of a `/start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First contact; admins must approve.
    New,
    /// Known but not enabled (pending or declined); admins are asked again.
    AwaitingApproval,
    AlreadyEnabled,
}

impl RegisterOutcome {
    pub fn needs_approval(&self) -> bool {
        !matches!(self, RegisterOutcome::AlreadyEnabled)
    }
}

type Users = BTreeMap<String, UserRecord>;

/// Users keyed by messenger id, stored as one JSON document.
pub struct UserRegistry {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process, held across
    /// the file I/O.
    write_lock: Mutex<()>,
}

impl UserRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Users, RegistryError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no user registry yet");
                return Ok(Users::new());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&text).map_err(|source| RegistryError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Write to a sibling temp file, then rename over the registry.
    async fn save(&self, users: &Users) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(users).map_err(|source| RegistryError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)
    }

    async fn update<T>(
        &self,
        f: impl FnOnce(&mut Users) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut users = self.load().await?;
        let out = f(&mut users)?;
        self.save(&users).await?;
        Ok(out)
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserRecord>, RegistryError> {
        Ok(self.load().await?.remove(user_id))
    }

    /// Create or refresh a user. A user who is not enabled goes back to
    /// `Pending`; admin flag and subscription survive.
    pub async fn register(
        &self,
        user_id: &str,
        first_name: &str,
        last_name: &str,
        now: DateTime<Local>,
    ) -> Result<(RegisterOutcome, UserRecord), RegistryError> {
        self.update(|users| {
            let outcome = match users.get(user_id) {
                None => RegisterOutcome::New,
                Some(u) if u.is_enabled() => RegisterOutcome::AlreadyEnabled,
                Some(_) => RegisterOutcome::AwaitingApproval,
            };
            let record = users
                .entry(user_id.to_string())
                .or_insert_with(|| UserRecord {
                    first_name: String::new(),
                    last_name: String::new(),
                    registered_at: now,
                    status: ApprovalStatus::Pending,
                    admin: false,
                    subscription: Subscription::default(),
                });
            record.first_name = first_name.to_string();
            record.last_name = last_name.to_string();
            record.registered_at = now;
            if !record.is_enabled() {
                record.status = ApprovalStatus::Pending;
            }
            info!(user_id, ?outcome, "user registered");
            Ok((outcome, record.clone()))
        })
        .await
    }

    /// Accept or decline `target`; only admins may do this.
    pub async fn set_status(
        &self,
        admin_id: &str,
        target: &str,
        status: ApprovalStatus,
    ) -> Result<UserRecord, RegistryError> {
        self.update(|users| {
            if !users.get(admin_id).map(|u| u.admin).unwrap_or(false) {
                warn!(admin_id, "status change by non-admin refused");
                return Err(RegistryError::NotAdmin(admin_id.to_string()));
            }
            let record = users
                .get_mut(target)
                .ok_or_else(|| RegistryError::UnknownUser(target.to_string()))?;
            record.status = status;
            info!(admin_id, target, status = status.as_str(), "approval status changed");
            Ok(record.clone())
        })
        .await
    }

    pub async fn set_admin(&self, user_id: &str, admin: bool) -> Result<(), RegistryError> {
        self.update(|users| {
            let record = users
                .get_mut(user_id)
                .ok_or_else(|| RegistryError::UnknownUser(user_id.to_string()))?;
            record.admin = admin;
            Ok(())
        })
        .await
    }

    pub async fn add_subscription<I, S>(
        &self,
        user_id: &str,
        tokens: I,
    ) -> Result<Subscription, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(|users| {
            let record = users
                .get_mut(user_id)
                .ok_or_else(|| RegistryError::NotRegistered(user_id.to_string()))?;
            record.subscription.add(tokens);
            Ok(record.subscription.clone())
        })
        .await
    }

    pub async fn remove_subscription<I, S>(
        &self,
        user_id: &str,
        tokens: I,
    ) -> Result<Subscription, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(|users| {
            let record = users
                .get_mut(user_id)
                .ok_or_else(|| RegistryError::NotRegistered(user_id.to_string()))?;
            record.subscription.remove(tokens);
            Ok(record.subscription.clone())
        })
        .await
    }

    pub async fn enabled_users(&self) -> Result<Vec<(String, UserRecord)>, RegistryError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|(_, u)| u.is_enabled())
            .collect())
    }

    pub async fn admins(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|(_, u)| u.admin)
            .map(|(id, _)| id)
            .collect())
    }
}
