//! Client - the application-facing API of nostr-sync.
//!
//! [`Client`] owns a [`RelayPool`] and the reconciler worker, and turns user
//! intents (edit my profile, follow someone, show my followers) into signed
//! events and subscriptions.
//!
//! # Architecture
//!
//! ```text
//! Application → Client → RelayPool → RelayConnection × N → relays
//!                 ↓          ↓
//!             UserStore ← Reconciler (persistence worker)
//! ```
//!
//! The whole UI shares one subscription channel, [`MAIN_CHANNEL`]; moving to
//! another view replaces it.
//!
//! # Example
//!
//! ```ignore
//! use nostr_sync_client::{Client, ClientConfig, ContactsView, Keys, MemoryStore, WebSocketConnector};
//! use std::sync::Arc;
//!
//! let config = ClientConfig::default().with_relays(["wss://relay.example.com"]);
//! let client = Client::start(&config, WebSocketConnector, Arc::new(MemoryStore::new()), Keys::generate()?)?;
//!
//! client.view_contacts(ContactsView::Followers).await?;
//! ```

use crate::config::ClientConfig;
use crate::keys::{KeyError, Keys, SchnorrVerifier, Signer};
use crate::pool::{PoolError, RelayPool, SendOutcome};
use crate::reconciler::{Reconciler, ReconcilerWorker};
use crate::storage::{StorageError, UserFilter, UserStore};
use crate::transport::Connector;
use nostr_sync_core::User;
use nostr_sync_types::{
    Event, EventDraft, Filter, Kind, ProfileMetadata, ProtocolError, PublicKey, Tag,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// Subscription channel shared by every view.
pub const MAIN_CHANNEL: &str = "main-channel";

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Pool error, including aggregate publish failure.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Signing error.
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Event content could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The identity was logged out; nothing can be signed.
    #[error("no identity loaded")]
    NoIdentity,
}

/// Which side of the follow graph to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactsView {
    /// People I follow: my own contact list.
    Following,
    /// People who follow me: contact lists that reference me.
    Followers,
}

/// A running sync client for one identity.
pub struct Client<S: UserStore> {
    pool: RelayPool,
    store: Arc<S>,
    me: PublicKey,
    keys: RwLock<Option<Keys>>,
    worker: ReconcilerWorker,
}

impl<S: UserStore> Client<S> {
    /// Connect to the configured relays and start the persistence worker.
    pub fn start<C: Connector>(
        config: &ClientConfig,
        connector: C,
        store: Arc<S>,
        keys: Keys,
    ) -> Result<Self, ClientError> {
        let (events_tx, events_rx) = mpsc::channel(config.pool.event_queue.max(1));
        let pool = RelayPool::start(config, connector, Arc::new(SchnorrVerifier), events_tx)?;

        let me = keys.public_key();
        let worker = Reconciler::new(Arc::clone(&store), Some(me))
            .spawn(events_rx, config.reconciler.clone());

        tracing::info!(
            "Client started for {} with {} relays",
            me,
            config.relays.len()
        );

        Ok(Self {
            pool,
            store,
            me,
            keys: RwLock::new(Some(keys)),
            worker,
        })
    }

    /// Close every relay connection and wait for queued events to be stored.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
        if let Err(e) = self.worker.join().await {
            tracing::error!("Reconciler task failed: {}", e);
        }
        tracing::info!("Client stopped");
    }

    /// The underlying pool.
    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    /// The local User store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The identity this client was started with.
    pub fn public_key(&self) -> PublicKey {
        self.me
    }

    async fn sign(&self, draft: EventDraft) -> Result<Event, ClientError> {
        let keys = self.keys.read().await;
        let keys = keys.as_ref().ok_or(ClientError::NoIdentity)?;
        Ok(keys.sign(draft)?)
    }

    /// Publish, then fold the event into local state once a relay took it.
    ///
    /// The event is stored by the reconciler worker, after anything it
    /// already queued, and this returns once it has been applied.
    async fn publish(&self, draft: EventDraft) -> Result<SendOutcome, ClientError> {
        let event = self.sign(draft).await?;
        let outcome = self.pool.send_event(event.clone()).await?;
        let id = event.id;
        if let Err(e) = self.worker.apply(event).await {
            tracing::warn!("Published {} but could not store it: {}", id, e);
        }
        Ok(outcome)
    }

    /// Publish my profile metadata.
    pub async fn publish_profile(
        &self,
        metadata: &ProfileMetadata,
    ) -> Result<SendOutcome, ClientError> {
        let draft = EventDraft::new(self.me, Kind::METADATA, metadata.to_content()?);
        self.publish(draft).await
    }

    /// My own row, if anything is known about me yet.
    pub async fn my_profile(&self) -> Result<Option<User>, ClientError> {
        Ok(self.store.get_user(&self.me).await?)
    }

    async fn stored_contacts(&self) -> Result<BTreeSet<PublicKey>, ClientError> {
        Ok(self
            .store
            .list_users(UserFilter::Contacts)
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect())
    }

    async fn publish_contacts(
        &self,
        contacts: BTreeSet<PublicKey>,
    ) -> Result<SendOutcome, ClientError> {
        let tags = contacts.iter().map(Tag::pubkey).collect();
        let draft = EventDraft::new(self.me, Kind::CONTACT_LIST, "").with_tags(tags);
        self.publish(draft).await
    }

    /// Publish my contact list as currently stored.
    pub async fn publish_contact_list(&self) -> Result<SendOutcome, ClientError> {
        let contacts = self.stored_contacts().await?;
        self.publish_contacts(contacts).await
    }

    /// Fetch my newest contact list from the relays, collecting for `wait`.
    ///
    /// Edits build on the stored list, so call this before the first edit on
    /// a fresh store. Returns whether any list of mine is known afterwards.
    pub async fn fetch_contact_list(&self, wait: Duration) -> Result<bool, ClientError> {
        self.view_contacts(ContactsView::Following).await?;
        tokio::time::sleep(wait).await;
        self.leave_view().await?;
        let known = self
            .my_profile()
            .await?
            .is_some_and(|me| me.last_contact_at.is_some());
        tracing::debug!("Contact list of {} known: {}", self.me, known);
        Ok(known)
    }

    /// Follow `pubkey` and publish the new list.
    ///
    /// Local contacts change only once a relay accepted the list.
    pub async fn add_contact(&self, pubkey: &PublicKey) -> Result<SendOutcome, ClientError> {
        let mut contacts = self.stored_contacts().await?;
        contacts.insert(*pubkey);
        self.publish_contacts(contacts).await
    }

    /// Unfollow `pubkey` and publish the new list.
    pub async fn remove_contact(&self, pubkey: &PublicKey) -> Result<SendOutcome, ClientError> {
        let mut contacts = self.stored_contacts().await?;
        contacts.remove(pubkey);
        self.publish_contacts(contacts).await
    }

    /// Switch the main channel to one side of my follow graph.
    ///
    /// The followers view also watches the lists of followers already known,
    /// so a list that drops me clears their flag.
    pub async fn view_contacts(&self, view: ContactsView) -> Result<(), ClientError> {
        let lists = Filter::new().kind(Kind::CONTACT_LIST);
        let filters = match view {
            ContactsView::Following => vec![lists.author(self.me)],
            ContactsView::Followers => {
                let known: Vec<PublicKey> = self
                    .store
                    .list_users(UserFilter::Followers)
                    .await?
                    .into_iter()
                    .map(|user| user.id)
                    .collect();
                let mut filters = vec![lists.clone().pubkey(self.me)];
                if !known.is_empty() {
                    filters.push(lists.authors(known));
                }
                filters
            }
        };
        self.pool.unsubscribe_all().await?;
        self.pool.subscribe_filters(MAIN_CHANNEL, filters).await?;
        Ok(())
    }

    /// Read users from storage, fetching metadata for those still missing a
    /// picture.
    pub async fn load_users(&self, filter: UserFilter) -> Result<Vec<User>, ClientError> {
        let users = self.store.list_users(filter).await?;
        let missing: Vec<PublicKey> = users
            .iter()
            .filter(|user| user.needs_metadata())
            .map(|user| user.id)
            .collect();

        if !missing.is_empty() {
            tracing::debug!("Fetching metadata for {} users", missing.len());
            let filter = Filter::new().kind(Kind::METADATA).authors(missing);
            self.pool.subscribe(MAIN_CHANNEL, filter).await?;
        }
        Ok(users)
    }

    /// Drop every subscription when navigating away from a view.
    pub async fn leave_view(&self) -> Result<(), ClientError> {
        self.pool.unsubscribe_all().await?;
        Ok(())
    }

    /// Forget the identity and wipe local data.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.pool.unsubscribe_all().await?;
        self.store.wipe_all().await?;
        self.keys.write().await.take();
        tracing::info!("Logged out {}", self.me);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::keys::Verifier;
    use crate::storage::MemoryStore;
    use crate::transport::{MockConnector, MockTransport, Transport};
    use nostr_sync_types::{ClientMessage, RelayMessage};

    const WAIT: Duration = Duration::from_secs(2);
    const RELAY: &str = "wss://relay.test";

    struct Harness {
        client: Client<MemoryStore>,
        relay: MockTransport,
        store: Arc<MemoryStore>,
        keys: Keys,
    }

    async fn harness() -> Harness {
        let connector = MockConnector::new();
        let relay = connector.relay(RELAY);
        relay.respond_to_events(true, "");

        let mut config = ClientConfig::default().with_relays([RELAY]);
        config.connection = ConnectionConfig {
            backoff_initial_ms: 10,
            backoff_jitter_ms: 0,
            ..ConnectionConfig::default()
        };

        let keys = Keys::generate().unwrap();
        let store = Arc::new(MemoryStore::new());
        let client = Client::start(&config, connector, Arc::clone(&store), keys.clone()).unwrap();
        assert!(client.pool().wait_for_open(WAIT).await);
        Harness {
            client,
            relay,
            store,
            keys,
        }
    }

    fn pk(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    fn is_kind(kind: Kind) -> impl Fn(&ClientMessage) -> bool {
        move |m| matches!(m, ClientMessage::Event(e) if e.kind == kind)
    }

    fn main_req(m: &ClientMessage) -> Option<&Filter> {
        match m {
            ClientMessage::Req { channel, filters } if channel == MAIN_CHANNEL => filters.first(),
            _ => None,
        }
    }

    async fn wait_until<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !check().await {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // ===========================================
    // Publishing
    // ===========================================

    #[tokio::test]
    async fn publish_profile_sends_signed_metadata() {
        let h = harness().await;
        let metadata = ProfileMetadata {
            name: Some("alice".into()),
            picture: Some("https://pics/alice.png".into()),
            ..Default::default()
        };

        let outcome = h.client.publish_profile(&metadata).await.unwrap();
        assert_eq!(outcome.relay.as_str(), RELAY);

        let Some(ClientMessage::Event(event)) =
            h.relay.wait_for_frame(WAIT, is_kind(Kind::METADATA)).await
        else {
            panic!("no metadata published");
        };
        assert_eq!(event.pubkey, h.keys.public_key());
        assert!(SchnorrVerifier.verify(&event));
        assert_eq!(ProfileMetadata::from_content(&event.content).unwrap(), metadata);

        let me = h.client.my_profile().await.unwrap().unwrap();
        assert_eq!(me.name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn rejected_profile_leaves_local_row_alone() {
        let h = harness().await;
        h.relay.respond_to_events(false, "blocked: spam");

        let result = h
            .client
            .publish_profile(&ProfileMetadata {
                name: Some("spam".into()),
                ..Default::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(ClientError::Pool(PoolError::NoRelayAccepted { attempted: 1, .. }))
        ));
        assert!(h.client.my_profile().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_and_remove_contact_publish_lists() {
        let h = harness().await;

        h.client.add_contact(&pk(7)).await.unwrap();
        h.client.add_contact(&pk(8)).await.unwrap();
        assert!(h.store.get_user(&pk(7)).await.unwrap().unwrap().contact);

        let lists: Vec<Event> = h
            .relay
            .sent_messages()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Event(e) if e.kind == Kind::CONTACT_LIST => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[1].referenced_pubkeys(), vec![pk(7), pk(8)]);

        h.relay.clear_sent();
        h.client.remove_contact(&pk(7)).await.unwrap();
        let Some(ClientMessage::Event(list)) =
            h.relay.wait_for_frame(WAIT, is_kind(Kind::CONTACT_LIST)).await
        else {
            panic!("no contact list published");
        };
        assert_eq!(list.referenced_pubkeys(), vec![pk(8)]);
        assert!(!h.store.get_user(&pk(7)).await.unwrap().unwrap().contact);
    }

    #[tokio::test]
    async fn fetched_contact_list_is_the_base_for_edits() {
        let h = harness().await;
        let me = h.keys.public_key();
        let existing = h
            .keys
            .sign(
                EventDraft::new(me, Kind::CONTACT_LIST, "")
                    .with_tags(vec![Tag::pubkey(&pk(3))])
                    .with_created_at(10),
            )
            .unwrap();

        let relay = h.relay.clone();
        let serve = async move {
            relay
                .wait_for_frame(WAIT, |m| main_req(m).is_some_and(|f| f.authors.is_some()))
                .await
                .expect("following REQ");
            relay.push_message(&RelayMessage::Event {
                channel: MAIN_CHANNEL.into(),
                event: Box::new(existing),
            });
        };
        let (known, ()) = tokio::join!(
            h.client.fetch_contact_list(Duration::from_millis(300)),
            serve
        );
        assert!(known.unwrap());

        h.relay.clear_sent();
        h.client.add_contact(&pk(4)).await.unwrap();
        let Some(ClientMessage::Event(list)) =
            h.relay.wait_for_frame(WAIT, is_kind(Kind::CONTACT_LIST)).await
        else {
            panic!("no contact list published");
        };
        assert_eq!(list.referenced_pubkeys(), vec![pk(3), pk(4)]);
    }

    #[tokio::test]
    async fn missing_contact_list_is_reported() {
        let h = harness().await;
        let known = h
            .client
            .fetch_contact_list(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(!known);
    }

    #[tokio::test]
    async fn rejected_contact_list_keeps_local_contacts() {
        let h = harness().await;
        h.client.add_contact(&pk(7)).await.unwrap();
        h.relay.respond_to_events(false, "blocked: rate limited");

        assert!(h.client.add_contact(&pk(8)).await.is_err());
        assert!(h.client.remove_contact(&pk(7)).await.is_err());

        let contacts: Vec<PublicKey> = h
            .store
            .list_users(UserFilter::Contacts)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(contacts, vec![pk(7)]);
    }

    /// Store whose next `get_user` blocks until released.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        armed: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl UserStore for GatedStore {
        async fn get_user(&self, id: &PublicKey) -> Result<Option<User>, StorageError> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.get_user(id).await
        }

        async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
            self.inner.upsert_user(user).await
        }

        async fn upsert_users(&self, users: &[User]) -> Result<(), StorageError> {
            self.inner.upsert_users(users).await
        }

        async fn list_users(&self, filter: UserFilter) -> Result<Vec<User>, StorageError> {
            self.inner.list_users(filter).await
        }

        async fn set_contact(&self, id: &PublicKey, contact: bool) -> Result<(), StorageError> {
            self.inner.set_contact(id, contact).await
        }

        async fn wipe_all(&self) -> Result<(), StorageError> {
            self.inner.wipe_all().await
        }
    }

    #[tokio::test]
    async fn own_publish_waits_for_relay_event_in_flight() {
        let connector = MockConnector::new();
        let relay = connector.relay(RELAY);
        relay.respond_to_events(true, "");
        let store = Arc::new(GatedStore::default());
        let keys = Keys::generate().unwrap();
        let me = keys.public_key();
        let client = Client::start(
            &ClientConfig::default().with_relays([RELAY]),
            connector,
            Arc::clone(&store),
            keys,
        )
        .unwrap();
        assert!(client.pool().wait_for_open(WAIT).await);
        client.view_contacts(ContactsView::Followers).await.unwrap();
        relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some())
            .await
            .expect("REQ");

        // A follower's list naming me is being applied when I publish
        let fan = Keys::generate().unwrap();
        let list = fan
            .sign(
                EventDraft::new(fan.public_key(), Kind::CONTACT_LIST, "")
                    .with_tags(vec![Tag::pubkey(&me)])
                    .with_created_at(50),
            )
            .unwrap();
        store.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        relay.push_message(&RelayMessage::Event {
            channel: MAIN_CHANNEL.into(),
            event: Box::new(list),
        });
        tokio::time::timeout(WAIT, store.entered.notified())
            .await
            .expect("list never reached the store");

        let metadata = ProfileMetadata {
            name: Some("new".into()),
            ..Default::default()
        };
        let publish = client.publish_profile(&metadata);
        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.release.notify_one();
        };
        let (outcome, ()) = tokio::join!(publish, release);
        outcome.unwrap();

        let mine = store.get_user(&me).await.unwrap().unwrap();
        assert_eq!(mine.name.as_deref(), Some("new"));
        assert!(mine.last_metadata_at.is_some());
        let fan_row = store.get_user(&fan.public_key()).await.unwrap().unwrap();
        assert!(fan_row.follower);
    }

    // ===========================================
    // Views
    // ===========================================

    #[tokio::test]
    async fn view_contacts_targets_my_graph() {
        let h = harness().await;
        let me = h.keys.public_key();

        h.client.view_contacts(ContactsView::Following).await.unwrap();
        let req = h
            .relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some_and(|f| f.authors.is_some()))
            .await
            .expect("following REQ");
        let filter = main_req(&req).unwrap();
        assert!(filter.authors.as_ref().unwrap().contains(&me));

        h.client.view_contacts(ContactsView::Followers).await.unwrap();
        let req = h
            .relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some_and(|f| f.pubkeys.is_some()))
            .await
            .expect("followers REQ");
        let filter = main_req(&req).unwrap();
        assert!(filter.pubkeys.as_ref().unwrap().contains(&me));
        assert!(filter.kinds.as_ref().unwrap().contains(&Kind::CONTACT_LIST));
    }

    #[tokio::test]
    async fn followers_flow_into_store() {
        let h = harness().await;
        h.client.view_contacts(ContactsView::Followers).await.unwrap();
        h.relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some())
            .await
            .expect("REQ");

        let fan = Keys::generate().unwrap();
        let list = fan
            .sign(
                EventDraft::new(fan.public_key(), Kind::CONTACT_LIST, "")
                    .with_tags(vec![Tag::pubkey(&h.keys.public_key())]),
            )
            .unwrap();
        h.relay.push_message(&RelayMessage::Event {
            channel: MAIN_CHANNEL.into(),
            event: Box::new(list),
        });

        let store = Arc::clone(&h.store);
        let fan_pk = fan.public_key();
        wait_until(|| {
            let store = Arc::clone(&store);
            async move {
                matches!(store.get_user(&fan_pk).await, Ok(Some(u)) if u.follower)
            }
        })
        .await;

        let followers = h.client.load_users(UserFilter::Followers).await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].id, fan_pk);
    }

    #[tokio::test]
    async fn followers_view_watches_known_followers() {
        let h = harness().await;
        let me = h.keys.public_key();
        let fan = Keys::generate().unwrap();
        let mut row = User::new(fan.public_key());
        row.follower = true;
        h.store.upsert_user(&row).await.unwrap();

        h.client.view_contacts(ContactsView::Followers).await.unwrap();
        let req = h
            .relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some())
            .await
            .expect("followers REQ");
        let ClientMessage::Req { filters, .. } = req else {
            unreachable!()
        };
        assert_eq!(filters.len(), 2);
        assert!(filters[0].pubkeys.as_ref().unwrap().contains(&me));
        assert_eq!(
            filters[1].authors.as_ref().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![fan.public_key()]
        );

        // A newer list without me clears the flag
        let list = fan
            .sign(EventDraft::new(fan.public_key(), Kind::CONTACT_LIST, ""))
            .unwrap();
        h.relay.push_message(&RelayMessage::Event {
            channel: MAIN_CHANNEL.into(),
            event: Box::new(list),
        });

        let store = Arc::clone(&h.store);
        let fan_pk = fan.public_key();
        wait_until(|| {
            let store = Arc::clone(&store);
            async move {
                matches!(store.get_user(&fan_pk).await, Ok(Some(u)) if !u.follower)
            }
        })
        .await;
    }

    #[tokio::test]
    async fn load_users_fetches_missing_metadata() {
        let h = harness().await;
        let mut known = User::new(pk(2));
        known.contact = true;
        known.picture = Some("https://pics/2.png".into());
        let mut unknown = User::new(pk(3));
        unknown.contact = true;
        h.store.upsert_users(&[known, unknown]).await.unwrap();

        let users = h.client.load_users(UserFilter::Contacts).await.unwrap();
        assert_eq!(users.len(), 2);

        let req = h
            .relay
            .wait_for_frame(WAIT, |m| main_req(m).is_some())
            .await
            .expect("metadata REQ");
        let filter = main_req(&req).unwrap();
        assert_eq!(
            filter.authors.as_ref().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![pk(3)]
        );
        assert!(filter.kinds.as_ref().unwrap().contains(&Kind::METADATA));
    }

    #[tokio::test]
    async fn load_users_with_everything_known_subscribes_nothing() {
        let h = harness().await;
        let mut known = User::new(pk(2));
        known.picture = Some("https://pics/2.png".into());
        h.store.upsert_user(&known).await.unwrap();

        h.client.load_users(UserFilter::All).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.relay.sent_messages().iter().all(|m| main_req(m).is_none()));
    }

    #[tokio::test]
    async fn leave_view_closes_main_channel() {
        let h = harness().await;
        h.client.view_contacts(ContactsView::Following).await.unwrap();
        h.client.leave_view().await.unwrap();

        h.relay
            .wait_for_frame(
                WAIT,
                |m| matches!(m, ClientMessage::Close { channel } if channel == MAIN_CHANNEL),
            )
            .await
            .expect("CLOSE");
    }

    // ===========================================
    // Logout and shutdown
    // ===========================================

    #[tokio::test]
    async fn logout_wipes_store_and_identity() {
        let h = harness().await;
        h.client.add_contact(&pk(5)).await.unwrap();

        h.client.logout().await.unwrap();

        assert!(h.store.is_empty().await);
        assert!(matches!(
            h.client.publish_contact_list().await,
            Err(ClientError::NoIdentity)
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_pool_and_worker() {
        let h = harness().await;
        h.client.add_contact(&pk(5)).await.unwrap();

        tokio::time::timeout(WAIT, h.client.shutdown())
            .await
            .expect("shutdown hung");
        assert!(h.store.get_user(&pk(5)).await.unwrap().unwrap().contact);
        assert!(!h.relay.is_connected());
    }
}
