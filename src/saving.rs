use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use crate::error::StoreError;

/// Documents grouped by `account/collection`, each stored as JSON text
pub type Documents = BTreeMap<String, BTreeMap<String, String>>;

/// Durable document store addressed by account, collection and document id
pub trait DocumentStore: Send + Sync {
    /// Insert the document, or merge its top-level fields into the
    /// existing one.
    fn upsert(
        &self,
        account: &str,
        collection: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), StoreError>;

    fn delete(&self, account: &str, collection: &str, id: &str) -> Result<(), StoreError>;

    fn list(&self, account: &str, collection: &str) -> Result<BTreeMap<String, Value>, StoreError>;
}

/// Offline string cache of the same collections
pub trait LocalMirror: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

fn collection_key(account: &str, collection: &str) -> String {
    format!("{}/{}", account, collection)
}

/// Shallow merge: top-level keys of `incoming` replace those of `existing`
pub fn merge_documents(existing: &mut Value, incoming: &Value) {
    match (existing, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, value) in new {
                old.insert(key.clone(), value.clone());
            }
        }
        (old, new) => *old = new.clone(),
    }
}

fn upsert_into(
    documents: &mut Documents,
    account: &str,
    collection: &str,
    id: &str,
    document: &Value,
) -> Result<(), StoreError> {
    let bucket = documents
        .entry(collection_key(account, collection))
        .or_default();

    let merged = match bucket.get(id) {
        Some(text) => {
            let mut existing: Value = serde_json::from_str(text)?;
            merge_documents(&mut existing, document);
            existing
        }
        None => document.clone(),
    };
    bucket.insert(id.to_string(), serde_json::to_string(&merged)?);
    Ok(())
}

fn list_from(
    documents: &Documents,
    account: &str,
    collection: &str,
) -> Result<BTreeMap<String, Value>, StoreError> {
    let mut listed = BTreeMap::new();
    if let Some(bucket) = documents.get(&collection_key(account, collection)) {
        for (id, text) in bucket {
            listed.insert(id.clone(), serde_json::from_str(text)?);
        }
    }
    Ok(listed)
}

pub fn save_documents(documents: &Documents, filename: impl AsRef<Path>) -> Result<(), StoreError> {
    let file = File::create(filename)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = std::io::BufWriter::new(encoder);

    serialize_into(&mut writer, documents)?;
    writer.into_inner().map_err(|e| e.into_error())?.finish()?;

    Ok(())
}

pub fn load_documents(filename: impl AsRef<Path>) -> Result<Documents, StoreError> {
    let file = File::open(filename)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let documents: Documents = deserialize_from(&mut reader)?;

    Ok(documents)
}

/// Document store persisted as one gzip-compressed bincode snapshot
///
/// The whole snapshot is rewritten after every mutation.
pub struct FileDocumentStore {
    path: PathBuf,
    documents: RwLock<Documents>,
}

impl FileDocumentStore {
    /// Open the store at `path`, starting empty when the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let documents = if path.exists() {
            load_documents(&path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Documents::new()
        };

        Ok(FileDocumentStore {
            path,
            documents: RwLock::new(documents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for FileDocumentStore {
    fn upsert(
        &self,
        account: &str,
        collection: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        upsert_into(&mut documents, account, collection, id, document)?;
        save_documents(&documents, &self.path)
    }

    fn delete(&self, account: &str, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = documents.get_mut(&collection_key(account, collection)) {
            bucket.remove(id);
        }
        save_documents(&documents, &self.path)
    }

    fn list(&self, account: &str, collection: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        list_from(&documents, account, collection)
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<Documents>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        MemoryDocumentStore::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn upsert(
        &self,
        account: &str,
        collection: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        upsert_into(&mut documents, account, collection, id, document)
    }

    fn delete(&self, account: &str, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(bucket) = documents.get_mut(&collection_key(account, collection)) {
            bucket.remove(id);
        }
        Ok(())
    }

    fn list(&self, account: &str, collection: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        list_from(&documents, account, collection)
    }
}

/// Mirror kept in a single JSON object file
pub struct JsonFileMirror {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl JsonFileMirror {
    /// Open the mirror; an unreadable file starts an empty cache
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();

        JsonFileMirror {
            path,
            entries: RwLock::new(entries),
        }
    }
}

impl LocalMirror for JsonFileMirror {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&*entries)?)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMirror {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        MemoryMirror::default()
    }
}

impl LocalMirror for MemoryMirror {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
