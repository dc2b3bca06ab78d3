//! Persisted state for managed objects
//!
//! One record per object, keyed by (resource type, identity). The local
//! store writes one file per object, atomically, wrapped in an envelope
//! carrying a lineage and a serial so concurrent histories can be told apart.

use crate::error::{ConvergeError, Result};
use crate::types::{Dynamic, DynamicValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Envelope version written by this build
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Last known good representation of one managed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource_type: String,
    pub identity: String,
    pub schema_version: i64,
    pub attributes: DynamicValue,
}

impl ResourceState {
    /// Fails when `attributes` still holds values not known until apply
    pub fn new(
        resource_type: impl Into<String>,
        identity: impl Into<String>,
        schema_version: i64,
        attributes: DynamicValue,
    ) -> Result<Self> {
        let state = Self {
            resource_type: resource_type.into(),
            identity: identity.into(),
            schema_version,
            attributes,
        };
        state.check_known()?;
        Ok(state)
    }

    fn check_known(&self) -> Result<()> {
        if self.attributes.value.is_wholly_known() {
            Ok(())
        } else {
            Err(ConvergeError::State(format!(
                "{} ({}) state contains unknown values",
                self.resource_type, self.identity
            )))
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Dynamic> {
        self.attributes.value.get(name)
    }
}

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns `None` if nothing is recorded for the object.
    async fn load(&self, resource_type: &str, identity: &str) -> Result<Option<ResourceState>>;

    async fn save(&self, state: &ResourceState) -> Result<()>;

    /// Removing a missing record is not an error.
    async fn remove(&self, resource_type: &str, identity: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<ResourceState>>;
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: RwLock<BTreeMap<(String, String), ResourceState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, resource_type: &str, identity: &str) -> Result<Option<ResourceState>> {
        let states = self.states.read().await;
        Ok(states
            .get(&(resource_type.to_string(), identity.to_string()))
            .cloned())
    }

    async fn save(&self, state: &ResourceState) -> Result<()> {
        state.check_known()?;
        let mut states = self.states.write().await;
        states.insert(
            (state.resource_type.clone(), state.identity.clone()),
            state.clone(),
        );
        Ok(())
    }

    async fn remove(&self, resource_type: &str, identity: &str) -> Result<()> {
        let mut states = self.states.write().await;
        states.remove(&(resource_type.to_string(), identity.to_string()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        Ok(self.states.read().await.values().cloned().collect())
    }
}

/// On-disk encoding of state records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StateCodec {
    #[default]
    Json,
    MessagePack,
}

impl StateCodec {
    fn extension(self) -> &'static str {
        match self {
            StateCodec::Json => "json",
            StateCodec::MessagePack => "msgpack",
        }
    }

    fn encode(self, record: &StateRecord) -> Result<Vec<u8>> {
        match self {
            StateCodec::Json => serde_json::to_vec_pretty(record)
                .map_err(|e| ConvergeError::Encoding(format!("json encoding failed: {}", e))),
            StateCodec::MessagePack => rmp_serde::to_vec_named(record)
                .map_err(|e| ConvergeError::Encoding(format!("msgpack encoding failed: {}", e))),
        }
    }

    fn decode(self, data: &[u8]) -> Result<StateRecord> {
        match self {
            StateCodec::Json => serde_json::from_slice(data)
                .map_err(|e| ConvergeError::Decoding(format!("json decoding failed: {}", e))),
            StateCodec::MessagePack => rmp_serde::from_slice(data)
                .map_err(|e| ConvergeError::Decoding(format!("msgpack decoding failed: {}", e))),
        }
    }
}

/// Envelope around one persisted ResourceState
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateRecord {
    pub format_version: u32,
    /// Stays the same for the whole life of the object's record
    pub lineage: Uuid,
    /// Incremented on every save
    pub serial: u64,
    pub updated_at: DateTime<Utc>,
    pub state: ResourceState,
}

/// Local file-based state store, one file per managed object
#[derive(Debug)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    codec: StateCodec,
}

impl LocalStateStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            codec: StateCodec::default(),
        }
    }

    pub fn with_codec(mut self, codec: StateCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, resource_type: &str, identity: &str) -> PathBuf {
        self.base_dir.join(format!(
            "{}--{}.{}",
            file_safe(resource_type),
            file_safe(identity),
            self.codec.extension()
        ))
    }

    /// Reads the full envelope for an object, if one exists
    pub async fn load_record(
        &self,
        resource_type: &str,
        identity: &str,
    ) -> Result<Option<StateRecord>> {
        self.read_record(&self.record_path(resource_type, identity))
            .await
    }

    async fn read_record(&self, path: &Path) -> Result<Option<StateRecord>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file does not exist: {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let record = self.codec.decode(&data).map_err(|e| {
            ConvergeError::State(format!("corrupted state file {}: {}", path.display(), e))
        })?;

        if record.format_version > STATE_FORMAT_VERSION {
            return Err(ConvergeError::State(format!(
                "state file {} has format version {}, newer than supported {}",
                path.display(),
                record.format_version,
                STATE_FORMAT_VERSION
            )));
        }

        Ok(Some(record))
    }

    async fn write_atomically(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, resource_type: &str, identity: &str) -> Result<Option<ResourceState>> {
        let Some(record) = self.load_record(resource_type, identity).await? else {
            return Ok(None);
        };
        record.state.check_known()?;
        Ok(Some(record.state))
    }

    async fn save(&self, state: &ResourceState) -> Result<()> {
        state.check_known()?;
        let path = self.record_path(&state.resource_type, &state.identity);

        let (lineage, serial) = match self.read_record(&path).await? {
            Some(previous) => (previous.lineage, previous.serial + 1),
            None => (Uuid::new_v4(), 1),
        };

        let record = StateRecord {
            format_version: STATE_FORMAT_VERSION,
            lineage,
            serial,
            updated_at: Utc::now(),
            state: state.clone(),
        };

        info!(
            resource_type = %state.resource_type,
            identity = %state.identity,
            serial,
            "Saving state to: {}",
            path.display()
        );
        let content = self.codec.encode(&record)?;
        self.write_atomically(&path, &content).await
    }

    async fn remove(&self, resource_type: &str, identity: &str) -> Result<()> {
        let path = self.record_path(resource_type, identity);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed state file: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ResourceState>> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.codec.extension()) {
                continue;
            }
            if let Some(record) = self.read_record(&path).await? {
                record.state.check_known()?;
                states.push(record.state);
            }
        }
        states.sort_by(|a, b| {
            (&a.resource_type, &a.identity).cmp(&(&b.resource_type, &b.identity))
        });
        Ok(states)
    }
}

/// Percent-escapes anything outside a conservative file name alphabet
fn file_safe(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'.' => out.push(byte as char),
            // '-' is escaped too so the "--" separator stays unambiguous
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributePath;
    use tempfile::TempDir;

    fn bucket_state(name: &str) -> ResourceState {
        let mut attributes = DynamicValue::object();
        attributes.set_string(&AttributePath::new("bucket"), name).unwrap();
        attributes.set_int(&AttributePath::new("count"), 3).unwrap();
        attributes
            .set_value(&AttributePath::new("ratio"), Dynamic::Number(1.0))
            .unwrap();
        attributes.set_bool(&AttributePath::new("force_destroy"), false).unwrap();
        ResourceState::new("aws_s3_directory_bucket", name, 0, attributes).unwrap()
    }

    #[test]
    fn resource_state_rejects_unknown_values() {
        let mut attributes = DynamicValue::object();
        attributes.mark_unknown(&AttributePath::new("arn")).unwrap();

        let result = ResourceState::new("t", "id", 0, attributes);
        assert!(matches!(result, Err(ConvergeError::State(_))));
    }

    #[test]
    fn file_names_escape_separators() {
        assert_eq!(file_safe("b--usw2-az2--x-s3"), "b%2D%2Dusw2%2Daz2%2D%2Dx%2Ds3");
        assert_eq!(file_safe("arn:aws/x"), "arn%3Aaws%2Fx");
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStateStore::new();
        let state = bucket_state("b--usw2-az2--x-s3");

        store.save(&state).await.unwrap();
        assert_eq!(
            store
                .load("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
                .await
                .unwrap(),
            Some(state)
        );

        store
            .remove("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
            .await
            .unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_survives_reopen_in_both_codecs() {
        for codec in [StateCodec::Json, StateCodec::MessagePack] {
            let temp = TempDir::new().unwrap();
            let state = bucket_state("b--usw2-az2--x-s3");

            LocalStateStore::new(temp.path())
                .with_codec(codec)
                .save(&state)
                .await
                .unwrap();

            let reopened = LocalStateStore::new(temp.path()).with_codec(codec);
            let loaded = reopened
                .load("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
                .await
                .unwrap()
                .unwrap();

            assert_eq!(loaded, state);
            assert_eq!(loaded.attribute("count"), Some(&Dynamic::Int(3)));
            assert_eq!(loaded.attribute("ratio"), Some(&Dynamic::Number(1.0)));
        }
    }

    #[tokio::test]
    async fn local_store_keeps_marker_like_strings_verbatim() {
        for codec in [StateCodec::Json, StateCodec::MessagePack] {
            let temp = TempDir::new().unwrap();
            let store = LocalStateStore::new(temp.path()).with_codec(codec);
            let mut state = bucket_state("b--usw2-az2--x-s3");
            state
                .attributes
                .set_string(&AttributePath::new("label"), "__unknown__")
                .unwrap();

            store.save(&state).await.unwrap();
            let loaded = store
                .load("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
                .await
                .unwrap()
                .unwrap();

            assert_eq!(loaded.attribute("label"), Some(&Dynamic::from("__unknown__")));
            assert_eq!(loaded, state);
        }
    }

    #[tokio::test]
    async fn local_store_keeps_lineage_and_bumps_serial() {
        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::new(temp.path());
        let state = bucket_state("b--usw2-az2--x-s3");

        store.save(&state).await.unwrap();
        let first = store
            .load_record("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
            .await
            .unwrap()
            .unwrap();

        store.save(&state).await.unwrap();
        let second = store
            .load_record("aws_s3_directory_bucket", "b--usw2-az2--x-s3")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.lineage, second.lineage);
        assert_eq!(first.serial, 1);
        assert_eq!(second.serial, 2);
        assert_eq!(second.format_version, STATE_FORMAT_VERSION);
    }

    #[tokio::test]
    async fn local_store_lists_and_removes() {
        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::new(temp.path());

        store.save(&bucket_state("b2--usw2-az2--x-s3")).await.unwrap();
        store.save(&bucket_state("b1--usw2-az2--x-s3")).await.unwrap();

        let listed = store.list().await.unwrap();
        let identities: Vec<_> = listed.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(identities, vec!["b1--usw2-az2--x-s3", "b2--usw2-az2--x-s3"]);

        store
            .remove("aws_s3_directory_bucket", "b1--usw2-az2--x-s3")
            .await
            .unwrap();
        store
            .remove("aws_s3_directory_bucket", "missing")
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_store_load_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = LocalStateStore::new(temp.path().join("not-created-yet"));

        assert!(store.load("t", "id").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }
}
