use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use coffer_store::BackingStore;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{AppKeyPrompt, InitializeOptions, UnlockOptions};
use crate::crypto::{self, AppKey, KeyBundle};
use crate::envelope;
use crate::error::{Error, Result};
use crate::patch;
use crate::record::{self, HistoryEntry, Record, RecordDraft};
use crate::telemetry::{MetricEvent, MetricHook, MetricMethod};

// Backing-store key layout. Changing these breaks existing databases.
pub(crate) const KEYS_KEY: &str = "keys";
pub(crate) const SALT_KEY: &str = "salt";
pub(crate) const ITEM_PREFIX: &str = "items/";

fn item_key(id: &str) -> String {
    format!("{ITEM_PREFIX}{id}")
}

/// Lifecycle state of a datastore instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No encrypted key bundle exists yet.
    Uninitialized,
    /// A key bundle exists but is not decrypted in memory.
    Locked,
    /// The key bundle is cached in memory; records are reachable.
    Unlocked,
}

/// The encrypted credential datastore.
///
/// All operations are async and fully serialized: the instance behaves
/// as a per-instance FIFO queue, so overlapping calls observe a single
/// total order, and a `lock` issued while a mutation is in flight
/// takes effect only after that mutation completes.
pub struct Datastore {
    inner: Mutex<Inner>,
}

struct Inner {
    store: Box<dyn BackingStore>,
    state: State,
    keys: Option<KeyBundle>,
    record_metric: Option<MetricHook>,
    prompt: Option<Arc<dyn AppKeyPrompt>>,
}

impl Datastore {
    pub(crate) fn new(
        store: Box<dyn BackingStore>,
        record_metric: Option<MetricHook>,
        prompt: Option<Arc<dyn AppKeyPrompt>>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                store,
                state: State::Uninitialized,
                keys: None,
                record_metric,
                prompt,
            }),
        }
    }

    /// Detects whether an encrypted key bundle is present and sets the
    /// initial state accordingly. Idempotent; never demotes an
    /// unlocked instance.
    ///
    /// # Errors
    /// Propagates backing-store failures.
    pub async fn prepare(&self) -> Result<()> {
        self.inner.lock().await.prepare()
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Creates the key bundle and wraps it under the resolved
    /// application key, or — with `rebase: true` on an unlocked
    /// datastore — re-wraps the existing bundle under a new key,
    /// leaving every record ciphertext untouched. Ends Locked either
    /// way.
    ///
    /// # Errors
    /// `INITIALIZED` when already initialized and `rebase` was not
    /// requested; `LOCKED` when rebasing without the cached bundle;
    /// `CRYPTO` on wrap failure.
    pub async fn initialize(&self, opts: InitializeOptions) -> Result<()> {
        self.inner.lock().await.initialize(opts).await
    }

    /// Unwraps the key bundle under the resolved application key and
    /// caches it. No-op when already unlocked.
    ///
    /// # Errors
    /// `CRYPTO` when no bundle exists or authentication fails (state
    /// is unchanged); `MISSING_APP_KEY` when no key can be resolved.
    pub async fn unlock(&self, opts: UnlockOptions) -> Result<()> {
        self.inner.lock().await.unlock(opts).await
    }

    /// Drops the cached key bundle. Idempotent.
    pub async fn lock(&self) {
        self.inner.lock().await.lock();
    }

    /// Deletes the key bundle, salt and every record, returning the
    /// datastore to Uninitialized.
    ///
    /// # Errors
    /// Propagates backing-store failures.
    pub async fn reset(&self) -> Result<()> {
        self.inner.lock().await.reset()
    }

    /// Returns every stored record, keyed by id.
    ///
    /// # Errors
    /// `LOCKED` when not unlocked.
    pub async fn list(&self) -> Result<HashMap<String, Record>> {
        self.inner.lock().await.list()
    }

    /// Returns the record with the given id, if present.
    ///
    /// # Errors
    /// `LOCKED` when not unlocked.
    pub async fn get(&self, id: &str) -> Result<Option<Record>> {
        self.inner.lock().await.get(id)
    }

    /// Assigns an id and timestamps to the draft, persists it, and
    /// emits an `added` telemetry event.
    ///
    /// # Errors
    /// `LOCKED` when not unlocked; `INVALID` when the draft's entry is
    /// not a JSON object.
    pub async fn add(&self, draft: RecordDraft) -> Result<Record> {
        self.inner.lock().await.add(draft)
    }

    /// Replaces a stored record, journaling how to undo any entry
    /// change, and emits an `updated` telemetry event with the
    /// dotted-path list of changed fields.
    ///
    /// # Errors
    /// `LOCKED` when not unlocked; `MISSING` when the id is unknown;
    /// `INVALID` when the entry is not a JSON object.
    pub async fn update(&self, incoming: Record) -> Result<Record> {
        self.inner.lock().await.update(incoming)
    }

    /// Deletes a record's blob and returns the record it held. Removing
    /// an absent id returns `None` and emits nothing.
    ///
    /// # Errors
    /// `LOCKED` when not unlocked.
    pub async fn remove(&self, id: &str) -> Result<Option<Record>> {
        self.inner.lock().await.remove(id)
    }
}

impl Inner {
    fn prepare(&mut self) -> Result<()> {
        if self.state != State::Unlocked {
            self.state = if self.store.get(KEYS_KEY)?.is_some() {
                State::Locked
            } else {
                State::Uninitialized
            };
        }
        Ok(())
    }

    fn read_salt(&self) -> Result<Option<Vec<u8>>> {
        match self.store.get(SALT_KEY)? {
            Some(stored) => Ok(Some(crypto::decode_salt(&stored)?)),
            None => Ok(None),
        }
    }

    fn derive_from_passphrase(&self, passphrase: &str, salt: Option<&[u8]>) -> Result<AppKey> {
        let salt = match salt {
            Some(salt) => salt.to_vec(),
            None => self.read_salt()?.ok_or_else(|| {
                Error::missing_app_key("no salt available for passphrase derivation")
            })?,
        };
        AppKey::derive(passphrase, &salt)
    }

    // Resolution order: explicit key, explicit passphrase, host
    // prompt, fixed default key. A configured prompt is authoritative:
    // when it yields nothing the key is unresolved rather than
    // silently defaulted.
    async fn resolve_app_key(
        &self,
        explicit: Option<AppKey>,
        passphrase: Option<String>,
        salt: Option<&[u8]>,
    ) -> Result<AppKey> {
        if let Some(key) = explicit {
            return Ok(key);
        }
        if let Some(passphrase) = passphrase {
            return self.derive_from_passphrase(&passphrase, salt);
        }
        if let Some(prompt) = &self.prompt {
            let passphrase = prompt
                .passphrase()
                .await
                .ok_or_else(|| Error::missing_app_key("prompt yielded no passphrase"))?;
            return self.derive_from_passphrase(&passphrase, salt);
        }
        Ok(AppKey::zero())
    }

    async fn initialize(&mut self, opts: InitializeOptions) -> Result<()> {
        match (self.state, opts.rebase) {
            (State::Uninitialized, _) | (State::Unlocked, true) => {}
            (State::Locked, true) => return Err(Error::locked()),
            _ => return Err(Error::initialized()),
        }
        let rebase = self.state == State::Unlocked;

        let salt = match opts.salt {
            Some(salt) => salt,
            None => match self.read_salt()? {
                Some(salt) => salt,
                None => crypto::generate_salt(),
            },
        };
        let app_key = self
            .resolve_app_key(opts.app_key, opts.passphrase, Some(salt.as_slice()))
            .await?;

        let bundle = if rebase {
            self.keys.clone().ok_or_else(Error::locked)?
        } else {
            KeyBundle::generate()
        };
        let blob = envelope::seal(app_key.material(), &bundle.to_bytes()?)?;

        // salt first: a crash before the key blob lands leaves the
        // store observably uninitialized
        self.store.put(SALT_KEY, &crypto::encode_salt(&salt))?;
        self.store.put(KEYS_KEY, blob.as_bytes())?;

        self.keys = None;
        self.state = State::Locked;
        if rebase {
            info!("application key rebased");
        } else {
            info!("datastore initialized");
        }
        Ok(())
    }

    async fn unlock(&mut self, opts: UnlockOptions) -> Result<()> {
        match self.state {
            State::Unlocked => return Ok(()),
            State::Uninitialized => {
                return Err(Error::crypto("datastore has no encrypted key bundle"));
            }
            State::Locked => {}
        }
        let blob = self
            .store
            .get(KEYS_KEY)?
            .ok_or_else(|| Error::crypto("datastore has no encrypted key bundle"))?;
        let blob = String::from_utf8(blob).map_err(|_| Error::crypto("malformed envelope"))?;

        let app_key = self
            .resolve_app_key(opts.app_key, opts.passphrase, None)
            .await?;
        let bytes = envelope::open(app_key.material(), &blob)?;
        let bundle = KeyBundle::from_bytes(&bytes)?;

        self.keys = Some(bundle);
        self.state = State::Unlocked;
        info!("datastore unlocked");
        Ok(())
    }

    fn lock(&mut self) {
        if self.state == State::Unlocked {
            // KeyMaterial zeroizes on drop
            self.keys = None;
            self.state = State::Locked;
            info!("datastore locked");
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.store.clear()?;
        self.keys = None;
        self.state = State::Uninitialized;
        info!("datastore reset");
        Ok(())
    }

    fn list(&self) -> Result<HashMap<String, Record>> {
        let bundle = self.keys.as_ref().ok_or_else(Error::locked)?;
        let mut out = HashMap::new();
        for (key, blob) in self.store.scan(ITEM_PREFIX)? {
            match record::open_record(bundle.records(), &blob) {
                Ok(rec) => {
                    out.insert(rec.id.clone(), rec);
                }
                Err(err) => warn!(%key, %err, "discarding corrupt record blob"),
            }
        }
        Ok(out)
    }

    fn get(&self, id: &str) -> Result<Option<Record>> {
        let bundle = self.keys.as_ref().ok_or_else(Error::locked)?;
        let Some(blob) = self.store.get(&item_key(id))? else {
            return Ok(None);
        };
        match record::open_record(bundle.records(), &blob) {
            Ok(rec) => Ok(Some(rec)),
            Err(err) => {
                warn!(%id, %err, "discarding corrupt record blob");
                Ok(None)
            }
        }
    }

    fn add(&mut self, draft: RecordDraft) -> Result<Record> {
        let bundle = self.keys.as_ref().ok_or_else(Error::locked)?;
        record::validate_entry(&draft.entry)?;

        let rec = Record::from_draft(draft, Utc::now());
        let blob = record::seal_record(bundle.records(), &rec)?;
        self.store.put(&item_key(&rec.id), blob.as_bytes())?;

        debug!(id = %rec.id, "record added");
        self.emit(MetricEvent {
            method: MetricMethod::Added,
            id: rec.id.clone(),
            fields: None,
        });
        Ok(rec)
    }

    fn update(&mut self, incoming: Record) -> Result<Record> {
        let bundle = self.keys.as_ref().ok_or_else(Error::locked)?;
        record::validate_entry(&incoming.entry)?;

        let stored_blob = self
            .store
            .get(&item_key(&incoming.id))?
            .ok_or_else(|| Error::missing(&incoming.id))?;
        let stored = record::open_record(bundle.records(), &stored_blob).map_err(|err| {
            warn!(id = %incoming.id, %err, "stored record blob is corrupt");
            Error::missing(&incoming.id)
        })?;

        let now = Utc::now();
        let entry_patch = patch::diff(&incoming.entry, &stored.entry);
        let entry_changed = !patch::is_empty(&entry_patch);

        // id and created are immutable; they come from the stored copy
        let mut updated = Record {
            id: stored.id.clone(),
            title: incoming.title,
            entry: incoming.entry,
            origins: incoming.origins,
            tags: incoming.tags,
            created: stored.created,
            modified: stored.modified,
            last_used: incoming.last_used,
            history: stored.history.clone(),
        };
        let other_changed = updated.title != stored.title
            || updated.origins != stored.origins
            || updated.tags != stored.tags
            || updated.last_used != stored.last_used;

        if entry_changed {
            updated.history.insert(
                0,
                HistoryEntry {
                    created: now,
                    patch: entry_patch,
                },
            );
        }
        if entry_changed || other_changed {
            updated.modified = now;
        }

        let fields = record::changed_fields(&stored, &updated)?;
        let blob = record::seal_record(bundle.records(), &updated)?;
        self.store.put(&item_key(&updated.id), blob.as_bytes())?;

        debug!(id = %updated.id, "record updated");
        self.emit(MetricEvent {
            method: MetricMethod::Updated,
            id: updated.id.clone(),
            fields,
        });
        Ok(updated)
    }

    fn remove(&mut self, id: &str) -> Result<Option<Record>> {
        let bundle = self.keys.as_ref().ok_or_else(Error::locked)?;
        let Some(blob) = self.store.get(&item_key(id))? else {
            return Ok(None);
        };
        let removed = match record::open_record(bundle.records(), &blob) {
            Ok(rec) => Some(rec),
            Err(err) => {
                warn!(%id, %err, "removing corrupt record blob");
                None
            }
        };
        self.store.delete(&item_key(id))?;

        debug!(%id, "record removed");
        self.emit(MetricEvent {
            method: MetricMethod::Deleted,
            id: id.to_string(),
            fields: None,
        });
        Ok(removed)
    }

    fn emit(&self, event: MetricEvent) {
        if let Some(hook) = &self.record_metric {
            hook(&event);
        }
    }
}
