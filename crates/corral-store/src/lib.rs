//! Indexed object store with JSON file persistence.
//!
//! A `DevBox` is an ordered collection of records keyed by a numeric id the
//! store assigns on first insertion. Every mutation is written through to a
//! JSON file (when the store was opened with a path) using a temp-file +
//! rename sequence so a crash mid-write never corrupts the previous snapshot.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No record under id {0}")]
    NoSuchId(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An id-indexed record collection persisted as one JSON document.
pub struct DevBox<T> {
    path: Option<PathBuf>,
    records: BTreeMap<u64, T>,
    next_id: u64,
}

impl<T> DevBox<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open a store backed by `path`, loading any existing snapshot.
    ///
    /// A missing file starts an empty store; an unreadable or unparseable
    /// file is an error rather than silent data loss.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<u64, T> = match fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no store file at {:?}, starting fresh", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        if !records.is_empty() {
            tracing::info!("loaded {} records from {:?}", records.len(), path);
        }
        let next_id = records.keys().max().map_or(1, |m| m + 1);

        Ok(Self {
            path: Some(path),
            records,
            next_id,
        })
    }

    /// An unpersisted store. Mutations stay in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new record, returning its assigned id.
    pub async fn add(&mut self, obj: T) -> Result<u64, StoreError> {
        let id = self.next_id;
        self.next_id += 1;
        self.records.insert(id, obj);
        self.save().await?;
        Ok(id)
    }

    /// Write a record under a caller-chosen id, replacing any existing one.
    pub async fn set(&mut self, id: u64, obj: T) -> Result<u64, StoreError> {
        self.records.insert(id, obj);
        if id >= self.next_id {
            self.next_id = id + 1;
        }
        self.save().await?;
        Ok(id)
    }

    /// Look up a record by id.
    pub fn get(&self, id: u64) -> Option<&T> {
        self.records.get(&id)
    }

    /// First record matching `pred`, in id order.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<(u64, &T)> {
        self.records
            .iter()
            .find(|&(_, r)| pred(r))
            .map(|(id, r)| (*id, r))
    }

    /// Remove and return the record under `id`.
    pub async fn remove(&mut self, id: u64) -> Result<T, StoreError> {
        let obj = self.records.remove(&id).ok_or(StoreError::NoSuchId(id))?;
        self.save().await?;
        Ok(obj)
    }

    /// Persist the record under `id` (and, with this format, the rest of the
    /// snapshot). Errors when the id is unknown.
    pub async fn sync(&self, id: u64) -> Result<(), StoreError> {
        if !self.records.contains_key(&id) {
            return Err(StoreError::NoSuchId(id));
        }
        self.save().await
    }

    /// All assigned ids, ascending.
    pub fn export_all_ids(&self) -> Vec<u64> {
        self.records.keys().copied().collect()
    }

    /// All records with their ids, ascending by id.
    pub fn export_all_objs(&self) -> Vec<(u64, T)> {
        self.records.iter().map(|(id, r)| (*id, r.clone())).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Write the whole snapshot atomically.
    async fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, path).await?;
        tracing::debug!("saved {} records to {:?}", self.records.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rec {
        name: String,
        value: u32,
    }

    fn rec(name: &str, value: u32) -> Rec {
        Rec {
            name: name.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_add_assigns_increasing_ids() {
        let mut store = DevBox::in_memory();
        let a = store.add(rec("a", 1)).await.unwrap();
        let b = store.add(rec("b", 2)).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(store.get(a), Some(&rec("a", 1)));
    }

    #[tokio::test]
    async fn test_set_then_add_does_not_reuse_id() {
        let mut store = DevBox::in_memory();
        store.set(7, rec("seven", 7)).await.unwrap();
        let next = store.add(rec("eight", 8)).await.unwrap();
        assert_eq!(next, 8);
    }

    #[tokio::test]
    async fn test_find_returns_first_match_in_id_order() {
        let mut store = DevBox::in_memory();
        store.add(rec("x", 1)).await.unwrap();
        store.add(rec("y", 2)).await.unwrap();
        store.add(rec("y", 3)).await.unwrap();
        let (id, r) = store.find(|r| r.name == "y").unwrap();
        assert_eq!(id, 2);
        assert_eq!(r.value, 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_id_errors() {
        let mut store = DevBox::<Rec>::in_memory();
        assert!(matches!(
            store.remove(42).await,
            Err(StoreError::NoSuchId(42))
        ));
    }

    #[tokio::test]
    async fn test_sync_validates_the_id() {
        let mut store = DevBox::in_memory();
        let id = store.add(rec("a", 1)).await.unwrap();
        store.sync(id).await.unwrap();
        assert!(matches!(
            store.sync(id + 1).await,
            Err(StoreError::NoSuchId(_))
        ));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let mut store = DevBox::open(&path).await.unwrap();
        let id = store.add(rec("lamp", 42)).await.unwrap();
        drop(store);

        let reopened: DevBox<Rec> = DevBox::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(id), Some(&rec("lamp", 42)));
        assert_eq!(reopened.export_all_ids(), vec![id]);
    }

    #[tokio::test]
    async fn test_remove_all_leaves_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let mut store = DevBox::open(&path).await.unwrap();
        store.add(rec("a", 1)).await.unwrap();
        store.add(rec("b", 2)).await.unwrap();
        for id in store.export_all_ids() {
            store.remove(id).await.unwrap();
        }
        assert!(store.is_empty());

        let reopened: DevBox<Rec> = DevBox::open(&path).await.unwrap();
        assert!(reopened.is_empty());
    }
}
