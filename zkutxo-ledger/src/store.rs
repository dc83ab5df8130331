//! Encrypted, owner-partitioned UTXO store.
//!
//! This is the only place value, blinding factor and nullifier preimage live.
//! Records are JSON (integers as decimal strings) sealed with AES-256-GCM under
//! a key derived from the operator passphrase; the storage key is bound in as
//! associated data so a ciphertext cannot be moved to another slot.
//!
//! Keys are `"{owner_lower_hex}/{utxo_id_hex}"`, so one prefix scan lists a
//! partition.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, warn};
use zkutxo_common::{
    current_timestamp, Address, PrivateUtxo, ReconciliationMeta, TxHash, UtxoError, UtxoId,
    UtxoStatus,
};

const TREE_NAME: &str = "utxos";
const NONCE_LEN: usize = 12;
const KEY_DOMAIN: &[u8] = b"zkutxo/store-key/v1";

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrong key or tampered record.
    #[error("record {0} failed to decrypt")]
    Decrypt(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("record encoding error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("utxo {id} not found for owner {owner}")]
    NotFound { owner: Address, id: UtxoId },

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("store lock poisoned")]
    Poisoned,
}

impl From<StoreError> for UtxoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => UtxoError::NotFound(err.to_string()),
            StoreError::Invalid(msg) => UtxoError::InvalidInput(msg),
            other => UtxoError::Store(other.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// AES-256 record key. `Debug` is redacted.
#[derive(Clone)]
pub struct StoreKey([u8; 32]);

impl StoreKey {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(passphrase.as_bytes());
        StoreKey(*hasher.finalize().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        StoreKey(bytes)
    }

    pub fn random() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        StoreKey(key)
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreKey(<redacted>)")
    }
}

/// What a `save` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Incoming record was unspent but the stored one is spent; stored kept.
    KeptSpent,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

enum StoreBackend {
    InMemory(Mutex<BTreeMap<Vec<u8>, Vec<u8>>>),
    Persistent { db: sled::Db, tree: sled::Tree },
}

pub struct EncryptedLocalStore {
    backend: StoreBackend,
    cipher: Aes256Gcm,
    // serializes read-modify-write cycles
    write_lock: Mutex<()>,
}

impl EncryptedLocalStore {
    pub fn in_memory(key: &StoreKey) -> Self {
        Self::with_backend(StoreBackend::InMemory(Mutex::new(BTreeMap::new())), key)
    }

    pub fn open(path: impl AsRef<Path>, key: &StoreKey) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = sled::open(path_ref)?;
        let tree = db.open_tree(TREE_NAME)?;
        info!(path = %path_ref.display(), "opened encrypted utxo store");
        Ok(Self::with_backend(StoreBackend::Persistent { db, tree }, key))
    }

    /// Sled database removed when dropped.
    pub fn temporary(key: &StoreKey) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self::with_backend(StoreBackend::Persistent { db, tree }, key))
    }

    fn with_backend(backend: StoreBackend, key: &StoreKey) -> Self {
        Self {
            backend,
            cipher: Aes256Gcm::new(&key.0.into()),
            write_lock: Mutex::new(()),
        }
    }

    // ── public operations ────────────────────────────────────────────────────

    /// Idempotent upsert by id. A spent record is never downgraded.
    pub fn save(&self, owner: &Address, utxo: &PrivateUtxo) -> Result<SaveOutcome, StoreError> {
        check_owner(owner, utxo)?;
        utxo.validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let key = storage_key(owner, &utxo.id);
        let outcome = match self.read(&key)? {
            None => SaveOutcome::Inserted,
            Some(existing) if existing == *utxo => SaveOutcome::Unchanged,
            Some(existing) if existing.is_spent && !utxo.is_spent => SaveOutcome::KeptSpent,
            Some(_) => SaveOutcome::Updated,
        };
        match outcome {
            SaveOutcome::Inserted | SaveOutcome::Updated => {
                self.write_all(&[(key, self.seal(owner, utxo)?)])?;
                debug!(owner = %owner, id = %utxo.id, ?outcome, "saved utxo");
            }
            SaveOutcome::KeptSpent => {
                warn!(owner = %owner, id = %utxo.id, "ignored save that would unspend a spent utxo");
            }
            SaveOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    pub fn get(&self, owner: &Address, id: &UtxoId) -> Result<Option<PrivateUtxo>, StoreError> {
        self.read(&storage_key(owner, id))
    }

    pub fn require(&self, owner: &Address, id: &UtxoId) -> Result<PrivateUtxo, StoreError> {
        self.get(owner, id)?.ok_or(StoreError::NotFound {
            owner: *owner,
            id: *id,
        })
    }

    /// All records in `owner`'s partition, oldest first.
    pub fn list(&self, owner: &Address) -> Result<Vec<PrivateUtxo>, StoreError> {
        let prefix = partition_prefix(owner);
        let raw: Vec<(Vec<u8>, Vec<u8>)> = match &self.backend {
            StoreBackend::InMemory(map) => {
                let guard = map.lock().map_err(|_| StoreError::Poisoned)?;
                guard
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }
            StoreBackend::Persistent { tree, .. } => tree
                .scan_prefix(&prefix)
                .map(|item| item.map(|(k, v)| (k.to_vec(), v.to_vec())))
                .collect::<Result<_, _>>()?,
        };

        let mut utxos = raw
            .iter()
            .map(|(key, value)| self.open_record(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        utxos.sort_by_key(|u| (u.created_at, u.id));
        Ok(utxos)
    }

    /// Partitions that hold at least one record.
    pub fn owners(&self) -> Result<Vec<Address>, StoreError> {
        let keys: Vec<Vec<u8>> = match &self.backend {
            StoreBackend::InMemory(map) => map
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .keys()
                .cloned()
                .collect(),
            StoreBackend::Persistent { tree, .. } => tree
                .iter()
                .keys()
                .map(|k| k.map(|k| k.to_vec()))
                .collect::<Result<_, _>>()?,
        };
        let mut owners: Vec<Address> = keys
            .iter()
            .filter_map(|k| std::str::from_utf8(k).ok())
            .filter_map(|k| k.split('/').next())
            .filter_map(|owner| owner.parse().ok())
            .collect();
        owners.dedup();
        Ok(owners)
    }

    pub fn mark_spent(
        &self,
        owner: &Address,
        id: &UtxoId,
        tx_hash: TxHash,
    ) -> Result<PrivateUtxo, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut utxo = self.read(&storage_key(owner, id))?.ok_or(StoreError::NotFound {
            owner: *owner,
            id: *id,
        })?;
        if utxo.is_spent {
            return Ok(utxo);
        }
        utxo.mark_spent(tx_hash);
        self.write_all(&[(storage_key(owner, id), self.seal(owner, &utxo)?)])?;
        info!(owner = %owner, id = %id, tx = %tx_hash, "utxo marked spent");
        Ok(utxo)
    }

    /// Writes the spent input and every created output (any partition) in one batch.
    pub fn apply_spend(
        &self,
        spent: &PrivateUtxo,
        created: &[PrivateUtxo],
    ) -> Result<(), StoreError> {
        if !spent.is_spent {
            return Err(StoreError::Invalid(format!(
                "utxo {} is not marked spent",
                spent.id
            )));
        }
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut entries = Vec::with_capacity(created.len() + 1);
        for utxo in std::iter::once(spent).chain(created) {
            utxo.validate()
                .map_err(|e| StoreError::Invalid(e.to_string()))?;
            let key = storage_key(&utxo.owner, &utxo.id);
            if let Some(existing) = self.read(&key)? {
                if existing.is_spent && !utxo.is_spent {
                    return Err(StoreError::Invalid(format!(
                        "utxo {} already spent locally",
                        utxo.id
                    )));
                }
            }
            entries.push((key, self.seal(&utxo.owner, utxo)?));
        }
        self.write_all(&entries)?;
        debug!(spent = %spent.id, created = created.len(), "applied spend batch");
        Ok(())
    }

    /// Administrative override: makes a spent record spendable again.
    pub fn recover(
        &self,
        owner: &Address,
        id: &UtxoId,
        reason: &str,
    ) -> Result<PrivateUtxo, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut utxo = self.read(&storage_key(owner, id))?.ok_or(StoreError::NotFound {
            owner: *owner,
            id: *id,
        })?;
        let previous = utxo.status;
        utxo.is_spent = false;
        utxo.status = UtxoStatus::Recovered;
        utxo.reconciliation = Some(ReconciliationMeta {
            last_checked_at: current_timestamp(),
            note: Some(format!("recovered: {reason}")),
            pending_tx_hash: None,
        });
        self.write_all(&[(storage_key(owner, id), self.seal(owner, &utxo)?)])?;
        warn!(owner = %owner, id = %id, ?previous, reason, "utxo recovered by administrative override");
        Ok(utxo)
    }

    /// Replaces a record after reconciliation. Only the reconciliation service calls this.
    pub(crate) fn overwrite(&self, utxo: &PrivateUtxo) -> Result<(), StoreError> {
        utxo.validate()
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.write_all(&[(storage_key(&utxo.owner, &utxo.id), self.seal(&utxo.owner, utxo)?)])
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        if let StoreBackend::Persistent { db, .. } = &self.backend {
            db.flush()?;
        }
        Ok(())
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn read(&self, key: &[u8]) -> Result<Option<PrivateUtxo>, StoreError> {
        let value = match &self.backend {
            StoreBackend::InMemory(map) => map
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .get(key)
                .cloned(),
            StoreBackend::Persistent { tree, .. } => tree.get(key)?.map(|v| v.to_vec()),
        };
        value.map(|v| self.open_record(key, &v)).transpose()
    }

    fn write_all(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::InMemory(map) => {
                let mut guard = map.lock().map_err(|_| StoreError::Poisoned)?;
                for (key, value) in entries {
                    guard.insert(key.clone(), value.clone());
                }
            }
            StoreBackend::Persistent { tree, .. } => {
                let mut batch = sled::Batch::default();
                for (key, value) in entries {
                    batch.insert(key.as_slice(), value.as_slice());
                }
                tree.apply_batch(batch)?;
            }
        }
        Ok(())
    }

    fn seal(&self, owner: &Address, utxo: &PrivateUtxo) -> Result<Vec<u8>, StoreError> {
        let key = storage_key(owner, &utxo.id);
        let plaintext = serde_json::to_vec(utxo)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &key,
                },
            )
            .map_err(|e| StoreError::Encrypt(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open_record(&self, key: &[u8], sealed: &[u8]) -> Result<PrivateUtxo, StoreError> {
        let label = String::from_utf8_lossy(key).into_owned();
        if sealed.len() < NONCE_LEN {
            return Err(StoreError::Decrypt(label));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key,
                },
            )
            .map_err(|_| StoreError::Decrypt(label))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn check_owner(owner: &Address, utxo: &PrivateUtxo) -> Result<(), StoreError> {
    if *owner != utxo.owner {
        return Err(StoreError::Invalid(format!(
            "utxo {} belongs to {}, not {}",
            utxo.id, utxo.owner, owner
        )));
    }
    Ok(())
}

fn partition_prefix(owner: &Address) -> Vec<u8> {
    format!("{}/", owner.to_lower_hex()).into_bytes()
}

fn storage_key(owner: &Address, id: &UtxoId) -> Vec<u8> {
    format!("{}/{}", owner.to_lower_hex(), id.to_hex()).into_bytes()
}
