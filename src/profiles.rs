// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Family profiles kept on this device
//!
//! Profiles are never synced to the backend. There is always at least one.

use chrono::Utc;
use tracing::{info, warn};

use crate::model::{Gender, Profile};
use crate::store::{KvStore, StorageKey};
use crate::{MedscanError, Result};

pub struct ProfileBook {
    store: KvStore,
    profiles: Vec<Profile>,
    current: Option<Profile>,
}

/// The profile created on first use
pub fn default_profile() -> Profile {
    Profile {
        id: "1".to_string(),
        name: "Self".to_string(),
        age: 30,
        gender: Gender::Male,
        created_at: Utc::now(),
    }
}

impl ProfileBook {
    /// Load profiles, seeding the default one when none are stored
    pub fn load(store: KvStore) -> Result<Self> {
        let stored: Option<Vec<Profile>> = store.get(StorageKey::Profiles).unwrap_or_else(|e| {
            warn!("Stored profiles unreadable, starting fresh: {}", e);
            None
        });

        let mut book = Self {
            store,
            profiles: Vec::new(),
            current: None,
        };

        match stored {
            Some(profiles) if !profiles.is_empty() => book.profiles = profiles,
            _ => {
                let profile = default_profile();
                book.profiles = vec![profile.clone()];
                book.current = Some(profile);
                book.persist()?;
            }
        }

        let saved_current: Option<Profile> = book.store.get(StorageKey::CurrentProfile).unwrap_or_else(|e| {
            warn!("Stored current profile unreadable: {}", e);
            None
        });
        if let Some(current) = saved_current {
            book.current = Some(current);
        }

        Ok(book)
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn current(&self) -> Option<&Profile> {
        self.current.as_ref()
    }

    pub fn add(&mut self, name: &str, age: u32, gender: Gender) -> Result<Profile> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MedscanError::Validation("Profile name must not be empty".to_string()));
        }

        let profile = Profile {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            age,
            gender,
            created_at: Utc::now(),
        };
        self.profiles.push(profile.clone());
        self.store.set(StorageKey::Profiles, &self.profiles)?;

        info!("Added profile {} ({})", profile.name, profile.id);
        Ok(profile)
    }

    pub fn delete(&mut self, id: &str) -> Result<()> {
        if self.profiles.len() <= 1 {
            return Err(MedscanError::Validation("You must have at least one profile".to_string()));
        }
        if !self.profiles.iter().any(|p| p.id == id) {
            return Err(MedscanError::Validation(format!("No profile with id {}", id)));
        }

        self.profiles.retain(|p| p.id != id);
        self.store.set(StorageKey::Profiles, &self.profiles)?;

        if self.current.as_ref().map(|p| p.id.as_str()) == Some(id) {
            let next = self.profiles[0].clone();
            self.store.set(StorageKey::CurrentProfile, &next)?;
            self.current = Some(next);
        }

        Ok(())
    }

    pub fn switch(&mut self, id: &str) -> Result<&Profile> {
        let profile = self
            .profiles
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| MedscanError::Validation(format!("No profile with id {}", id)))?;

        self.store.set(StorageKey::CurrentProfile, &profile)?;
        Ok(&*self.current.insert(profile))
    }

    fn persist(&self) -> Result<()> {
        self.store.set(StorageKey::Profiles, &self.profiles)?;
        match &self.current {
            Some(current) => self.store.set(StorageKey::CurrentProfile, current),
            None => self.store.remove(StorageKey::CurrentProfile),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_seeds_default() {
        let store = KvStore::in_memory().unwrap();
        let book = ProfileBook::load(store.clone()).unwrap();

        assert_eq!(book.profiles().len(), 1);
        assert_eq!(book.current().unwrap().name, "Self");

        let stored: Vec<Profile> = store.get(StorageKey::Profiles).unwrap().unwrap();
        assert_eq!(stored[0].id, "1");
        assert!(store.get_raw(StorageKey::CurrentProfile).unwrap().unwrap().contains("createdAt"));
    }

    #[test]
    fn test_add_switch_reload() {
        let store = KvStore::in_memory().unwrap();
        let mut book = ProfileBook::load(store.clone()).unwrap();
        let child = book.add("Meera", 7, Gender::Female).unwrap();
        book.switch(&child.id).unwrap();

        let reloaded = ProfileBook::load(store).unwrap();
        assert_eq!(reloaded.profiles().len(), 2);
        assert_eq!(reloaded.current().unwrap().id, child.id);
    }

    #[test]
    fn test_cannot_delete_last_profile() {
        let store = KvStore::in_memory().unwrap();
        let mut book = ProfileBook::load(store).unwrap();

        let err = book.delete("1").unwrap_err();
        assert_eq!(err.to_string(), "You must have at least one profile");
        assert_eq!(book.profiles().len(), 1);
    }

    #[test]
    fn test_deleting_current_falls_back_to_first() {
        let store = KvStore::in_memory().unwrap();
        let mut book = ProfileBook::load(store.clone()).unwrap();
        let dad = book.add("Raj", 62, Gender::Male).unwrap();
        book.switch(&dad.id).unwrap();

        book.delete(&dad.id).unwrap();
        assert_eq!(book.current().unwrap().id, "1");
        let stored: Profile = store.get(StorageKey::CurrentProfile).unwrap().unwrap();
        assert_eq!(stored.id, "1");
    }

    #[test]
    fn test_switch_unknown_id() {
        let store = KvStore::in_memory().unwrap();
        let mut book = ProfileBook::load(store).unwrap();
        assert!(book.switch("missing").is_err());
        assert!(book.add("  ", 40, Gender::Other).is_err());
    }
}
