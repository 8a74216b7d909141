//! Entity reconciler: folds accepted events into the local User projection.
//!
//! Merge rules live in [`nostr_sync_core::User`] and
//! [`nostr_sync_core::plan_contact_list`]; this module loads the affected
//! rows, applies the rules and writes the rows back in one batch. Applying
//! the same event twice leaves the store unchanged.
//!
//! Rows are read and written back whole, so only one task may apply events
//! to a store. [`Reconciler::spawn`] starts that task; relay events arrive
//! on its event queue and local writes go through [`ReconcilerWorker::apply`].

use crate::config::ReconcilerConfig;
use crate::storage::{StorageError, UserFilter, UserStore};
use nostr_sync_core::{plan_contact_list, User};
use nostr_sync_types::{Event, EventId, Kind, ProfileMetadata, PublicKey};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};

/// Reconciler errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Event content could not be parsed; the event is discarded.
    #[error("malformed content in {event_id}: {reason}")]
    MalformedContent {
        /// The offending event.
        event_id: EventId,
        /// Parse error.
        reason: String,
    },

    /// The store failed; the event can be retried.
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// The persistence worker has stopped.
    #[error("reconciler stopped")]
    Stopped,
}

/// What applying one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// At least one row changed.
    Updated,
    /// A newer or equal event had already been applied.
    Stale,
    /// The kind is not projected; only the author row was ensured.
    Ignored,
}

/// Applies events to a [`UserStore`].
#[derive(Debug)]
pub struct Reconciler<S: UserStore> {
    store: Arc<S>,
    me: Option<PublicKey>,
}

impl<S: UserStore> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            me: self.me,
        }
    }
}

impl<S: UserStore> Reconciler<S> {
    /// Create a reconciler. `me` is the local identity, if known.
    pub fn new(store: Arc<S>, me: Option<PublicKey>) -> Self {
        Self { store, me }
    }

    /// Apply one verified event.
    pub async fn apply(&self, event: &Event) -> Result<Reconciled, ReconcileError> {
        match event.kind {
            Kind::METADATA => self.apply_metadata(event).await,
            Kind::CONTACT_LIST => self.apply_contact_list(event).await,
            _ => {
                if self.store.get_user(&event.pubkey).await?.is_none() {
                    self.store.upsert_user(&User::new(event.pubkey)).await?;
                }
                Ok(Reconciled::Ignored)
            }
        }
    }

    async fn load(&self, id: &PublicKey) -> Result<User, StorageError> {
        Ok(self
            .store
            .get_user(id)
            .await?
            .unwrap_or_else(|| User::new(*id)))
    }

    async fn apply_metadata(&self, event: &Event) -> Result<Reconciled, ReconcileError> {
        let metadata = ProfileMetadata::from_content(&event.content).map_err(|e| {
            ReconcileError::MalformedContent {
                event_id: event.id,
                reason: e.to_string(),
            }
        })?;

        let mut user = self.load(&event.pubkey).await?;
        if !user.apply_metadata(event.created_at, &metadata).is_applied() {
            return Ok(Reconciled::Stale);
        }
        self.store.upsert_user(&user).await?;
        Ok(Reconciled::Updated)
    }

    async fn apply_contact_list(&self, event: &Event) -> Result<Reconciled, ReconcileError> {
        let mut author = self.load(&event.pubkey).await?;
        if !author.accept_contact_list(event.created_at).is_applied() {
            return Ok(Reconciled::Stale);
        }

        let is_mine = self.me.as_ref() == Some(&event.pubkey);
        let current: BTreeSet<PublicKey> = if is_mine {
            self.store
                .list_users(UserFilter::Contacts)
                .await?
                .into_iter()
                .map(|u| u.id)
                .collect()
        } else {
            BTreeSet::new()
        };
        let changes = plan_contact_list(self.me.as_ref(), event, &current);

        let mut rows: BTreeMap<PublicKey, User> = BTreeMap::new();
        rows.insert(author.id, author);
        for pk in changes.referenced.iter().chain(&changes.removed_contacts) {
            if !rows.contains_key(pk) {
                let user = self.load(pk).await?;
                rows.insert(*pk, user);
            }
        }

        if let Some(contacts) = &changes.contacts {
            for pk in contacts {
                if let Some(user) = rows.get_mut(pk) {
                    user.contact = true;
                }
            }
            for pk in &changes.removed_contacts {
                if let Some(user) = rows.get_mut(pk) {
                    user.contact = false;
                }
            }
        }
        if let Some(follows_me) = changes.author_follows_me {
            if let Some(user) = rows.get_mut(&event.pubkey) {
                user.follower = follows_me;
            }
        }

        let rows: Vec<User> = rows.into_values().collect();
        self.store.upsert_users(&rows).await?;
        Ok(Reconciled::Updated)
    }

    /// Apply, retrying storage failures with doubling delays.
    async fn apply_with_retry(
        &self,
        event: &Event,
        config: &ReconcilerConfig,
    ) -> Result<Reconciled, ReconcileError> {
        let mut retry = 0;
        loop {
            match self.apply(event).await {
                Err(ReconcileError::Storage(e)) if retry < config.storage_retries => {
                    retry += 1;
                    tracing::warn!(
                        "Storage error applying {} (retry {}/{}): {}",
                        event.id,
                        retry,
                        config.storage_retries,
                        e
                    );
                    tokio::time::sleep(config.retry_delay(retry)).await;
                }
                other => return other,
            }
        }
    }

    /// Run as the persistence worker, consuming `events` until the sender
    /// side closes.
    ///
    /// Events whose storage keeps failing are kept in a bounded deferred
    /// queue and retried later, oldest first. Local writes are not deferred;
    /// their caller gets the error.
    pub fn spawn(
        self,
        events: mpsc::Receiver<Event>,
        config: ReconcilerConfig,
    ) -> ReconcilerWorker {
        let (local_tx, local_rx) = mpsc::channel(LOCAL_QUEUE);
        ReconcilerWorker {
            local: local_tx,
            task: tokio::spawn(self.run(events, local_rx, config)),
        }
    }

    async fn run(
        self,
        mut events: mpsc::Receiver<Event>,
        mut local: mpsc::Receiver<LocalWrite>,
        config: ReconcilerConfig,
    ) {
        let mut deferred: VecDeque<Event> = VecDeque::new();
        let idle_retry = config.retry_delay(config.storage_retries.saturating_add(1));

        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some(write) = local.recv() => {
                    self.retry_deferred(&mut deferred).await;
                    let result = self.apply_with_retry(&write.event, &config).await;
                    if let Err(e) = &result {
                        tracing::warn!("Local write {} failed: {}", write.event.id, e);
                    }
                    let _ = write.done.send(result);
                    continue;
                }
                _ = tokio::time::sleep(idle_retry), if !deferred.is_empty() => {
                    self.retry_deferred(&mut deferred).await;
                    continue;
                }
            };

            self.retry_deferred(&mut deferred).await;
            match self.apply_with_retry(&event, &config).await {
                Ok(outcome) => {
                    tracing::debug!("Applied {} ({:?}): {:?}", event.id, event.kind, outcome)
                }
                Err(ReconcileError::MalformedContent { event_id, reason }) => {
                    tracing::warn!("Discarding {}: {}", event_id, reason)
                }
                Err(ReconcileError::Storage(e)) => {
                    tracing::error!("Storage kept failing for {}, deferring: {}", event.id, e);
                    if deferred.len() >= config.deferred_capacity.max(1) {
                        if let Some(lost) = deferred.pop_front() {
                            tracing::error!("Deferred queue full, dropping {}", lost.id);
                        }
                    }
                    deferred.push_back(event);
                }
                Err(ReconcileError::Stopped) => {}
            }
        }

        self.retry_deferred(&mut deferred).await;
        if !deferred.is_empty() {
            tracing::error!("{} events were never stored", deferred.len());
        }
        tracing::debug!("Reconciler stopped");
    }

    /// Retry deferred events in order, stopping at the first storage failure.
    async fn retry_deferred(&self, deferred: &mut VecDeque<Event>) {
        while let Some(event) = deferred.front() {
            match self.apply(event).await {
                Ok(_) => {
                    tracing::debug!("Stored deferred {}", event.id);
                    deferred.pop_front();
                }
                Err(ReconcileError::MalformedContent { .. } | ReconcileError::Stopped) => {
                    deferred.pop_front();
                }
                Err(ReconcileError::Storage(_)) => return,
            }
        }
    }
}

const LOCAL_QUEUE: usize = 16;

struct LocalWrite {
    event: Event,
    done: oneshot::Sender<Result<Reconciled, ReconcileError>>,
}

/// Handle to the running persistence worker.
pub struct ReconcilerWorker {
    local: mpsc::Sender<LocalWrite>,
    task: JoinHandle<()>,
}

impl ReconcilerWorker {
    /// Apply an event through the worker, in order with relay events, and
    /// wait until it is stored.
    pub async fn apply(&self, event: Event) -> Result<Reconciled, ReconcileError> {
        let (done, result) = oneshot::channel();
        self.local
            .send(LocalWrite { event, done })
            .await
            .map_err(|_| ReconcileError::Stopped)?;
        result.await.map_err(|_| ReconcileError::Stopped)?
    }

    /// Wait for the worker to finish. It stops once the event queue's
    /// sender side is closed.
    pub async fn join(self) -> Result<(), JoinError> {
        drop(self.local);
        self.task.await
    }
}
