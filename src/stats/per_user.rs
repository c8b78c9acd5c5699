//! Per-user statistics
//!
//! The set of known user ids is persisted as a list in the user store;
//! each user's collection is persisted under `user/<id>` and is only
//! loaded the first time it is needed.

use crate::error::{DbError, DbResult, Errors};
use crate::stats::StatsCollection;
use crate::store::KvStore;
use crate::types::PrefixInfo;
use std::collections::{BTreeSet, HashMap};

/// Key holding the list of known user ids
pub const USER_LIST_KEY: &str = "__userList";

/// Prefix of the keys holding per-user collections
pub const USER_STATS_KEY_PREFIX: &str = "user/";

/// Store key for the collection of user `id`
pub fn collection_key(id: &str) -> String {
    format!("{}{}", USER_STATS_KEY_PREFIX, id)
}

/// Known users and their lazily loaded collections
#[derive(Debug, Default)]
pub struct PerUserStats {
    users: BTreeSet<String>,
    collections: HashMap<String, StatsCollection>,
    /// Collections for known users are read from the store on first use
    load_persisted: bool,
}

impl PerUserStats {
    /// `load_persisted` is false when statistics are being reset
    pub fn new(load_persisted: bool) -> Self {
        Self {
            load_persisted,
            ..Default::default()
        }
    }

    /// Load the known user list from the store
    pub fn load_user_list(&mut self, store: &KvStore) -> DbResult<()> {
        if let Some(users) = store.get::<Vec<String>>(USER_LIST_KEY)? {
            self.users.extend(users);
        }
        Ok(())
    }

    fn load_collection(&self, store: &KvStore, id: &str) -> DbResult<StatsCollection> {
        if self.load_persisted && self.users.contains(id) {
            Ok(StatsCollection::load(store, &collection_key(id))?.unwrap_or_default())
        } else {
            Ok(StatsCollection::default())
        }
    }

    /// Make sure `id` is registered and has a collection in memory.
    ///
    /// If the persisted collection cannot be read an empty one takes its
    /// place and the read error is returned.
    fn ensure_loaded(&mut self, store: &KvStore, id: &str) -> DbResult<()> {
        if !self.users.contains(id) {
            self.users.insert(id.to_string());
        }
        if self.collections.contains_key(id) {
            return Ok(());
        }
        let (collection, loaded) = match self.load_collection(store, id) {
            Ok(collection) => (collection, Ok(())),
            Err(e) => (StatsCollection::default(), Err(e)),
        };
        self.collections.insert(id.to_string(), collection);
        loaded
    }

    /// Collection for `id`, registering the user if this is the first time
    /// they have been seen
    pub fn stats_for_user(&mut self, store: &KvStore, id: &str) -> DbResult<&mut StatsCollection> {
        self.ensure_loaded(store, id)?;
        Ok(self.collections.entry(id.to_string()).or_default())
    }

    /// Collection for an already known user; `UnknownUser` otherwise
    pub fn existing(&mut self, store: &KvStore, id: &str) -> DbResult<&StatsCollection> {
        if !self.users.contains(id) {
            return Err(DbError::UnknownUser(id.to_string()));
        }
        self.stats_for_user(store, id).map(|sc| &*sc)
    }

    /// Add `info` to the collection of the user it is attributed to.
    ///
    /// The update is applied even when loading that collection failed.
    pub fn update(&mut self, store: &KvStore, prefix: &str, info: &PrefixInfo) -> DbResult<()> {
        let loaded = self.ensure_loaded(store, &info.user_id);
        self.collections
            .entry(info.user_id.clone())
            .or_default()
            .update(prefix, info);
        loaded
    }

    /// Known user ids in sorted order
    pub fn user_ids(&self) -> Vec<String> {
        self.users.iter().cloned().collect()
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.users.contains(id)
    }

    /// Persist every loaded collection and the user list
    pub fn save(&self, store: &KvStore) -> DbResult<()> {
        let mut errs = Errors::new();
        for (id, collection) in &self.collections {
            errs.append(collection.save(store, &collection_key(id)));
        }
        let users = self.user_ids();
        errs.append(store.set(USER_LIST_KEY, &users));
        errs.into_result()
    }
}
