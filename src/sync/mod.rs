//! Polling synchronisation of one conversation's message log.
//!
//! `MessageSync` keeps a local snapshot of the remote list, refreshed on a
//! fixed cadence, and publishes every change as a [`SyncView`] on a watch
//! channel. Sending never touches the snapshot; it posts and then refreshes.

mod error;

pub use error::SyncError;

use crate::auth::AuthProvider;
use crate::models::Message;
use crate::store::MessageStore;
use chrono::{ DateTime, Utc };
use error::GENERIC_SEND_FAILURE;
use log::{ debug, error, info, warn };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError, Weak };
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_ERROR_CLEAR_AFTER: Duration = Duration::from_millis(3000);

/// How completions of overlapping refreshes are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshOrdering {
    /// Whichever refresh finishes last wins, even if it was issued first.
    #[default]
    CompletionOrder,
    /// A refresh that completes after a later-issued one has been applied is
    /// dropped.
    IssuanceOrder,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub error_clear_after: Duration,
    pub ordering: RefreshOrdering,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_clear_after: DEFAULT_ERROR_CLEAR_AFTER,
            ordering: RefreshOrdering::default(),
        }
    }
}

/// Everything a view needs to render the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncView {
    pub conversation_id: Option<String>,
    pub messages: Arc<Vec<Message>>,
    /// True from `start` until the session's first refresh completes.
    pub loading: bool,
    pub sending: bool,
    pub error: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Snapshot replaced; carries the new message count.
    Applied(usize),
    /// Fetch failed, snapshot kept, error recorded.
    Failed(SyncError),
    /// Result arrived for a stopped session or was overtaken.
    Discarded,
    /// No session to refresh.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Blank input, nothing was sent.
    Skipped,
    Sent(Message),
}

struct Session {
    conversation_id: String,
    generation: u64,
    auth: Arc<dyn AuthProvider>,
    ticker: JoinHandle<()>,
    issued: u64,
    applied: u64,
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    generation: u64,
    error_seq: u64,
    sends_in_flight: usize,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    config: SyncConfig,
    state: Mutex<State>,
    view_tx: watch::Sender<SyncView>,
}

#[derive(Clone)]
pub struct MessageSync {
    inner: Arc<Inner>,
}

impl MessageSync {
    pub fn new(store: Arc<dyn MessageStore>, config: SyncConfig) -> Self {
        let (view_tx, _) = watch::channel(SyncView::default());
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                state: Mutex::new(State::default()),
                view_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncView> {
        self.inner.view_tx.subscribe()
    }

    pub fn view(&self) -> SyncView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.inner
            .lock_state()
            .session.as_ref()
            .map(|s| s.conversation_id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Begins polling `conversation_id`, first fetch immediately.
    ///
    /// Restarting the same conversation keeps the snapshot and only resets
    /// the schedule. Switching conversations tears the old session down and
    /// starts from an empty snapshot. Must be called inside a Tokio runtime.
    pub fn start(&self, conversation_id: impl Into<String>, auth: Arc<dyn AuthProvider>) {
        let conversation_id = conversation_id.into();
        let mut state = self.inner.lock_state();

        state.generation += 1;
        let generation = state.generation;

        let previous = state.session.take();
        let same_conversation = previous
            .as_ref()
            .map_or(false, |s| s.conversation_id == conversation_id);
        if let Some(previous) = previous {
            previous.ticker.abort();
        }

        if same_conversation {
            info!("Resetting poll schedule for conversation {}", conversation_id);
        } else {
            info!(
                "Starting sync for conversation {} every {:?}",
                conversation_id,
                self.inner.config.poll_interval
            );
            let sending = state.sends_in_flight > 0;
            let id = conversation_id.clone();
            self.inner.view_tx.send_modify(|view| {
                *view = SyncView {
                    conversation_id: Some(id),
                    loading: true,
                    sending,
                    ..SyncView::default()
                };
            });
        }

        let ticker = tokio::spawn(
            Inner::poll_loop(
                Arc::downgrade(&self.inner),
                generation,
                self.inner.config.poll_interval
            )
        );

        state.session = Some(Session {
            conversation_id,
            generation,
            auth,
            ticker,
            issued: 0,
            applied: 0,
        });
    }

    /// Runs one fetch cycle. Failures are recorded in the view, never returned
    /// as `Err`.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh_session(None).await
    }

    /// Posts `text` to the active conversation, then refreshes.
    ///
    /// Blank text is skipped without a request. A missing identity is
    /// rejected locally with [`SyncError::Unauthenticated`].
    pub async fn send(
        &self,
        text: &str,
        auth: &dyn AuthProvider
    ) -> Result<SendOutcome, SyncError> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Skipped);
        }

        let (conversation_id, generation) = {
            let state = self.inner.lock_state();
            let session = state.session.as_ref().ok_or(SyncError::NotStarted)?;
            (session.conversation_id.clone(), session.generation)
        };

        let token = auth
            .current()
            .filter(|session| session.can_send())
            .and_then(|session| session.token);
        let Some(token) = token else {
            warn!("Send rejected for conversation {}: not signed in", conversation_id);
            let err = SyncError::Unauthenticated;
            self.inner.record_error(&mut self.inner.lock_state(), &err);
            return Err(err);
        };

        let sending = SendingGuard::new(&self.inner);
        let result = self.inner.store.create_message(&conversation_id, &token, text).await;
        drop(sending);

        // The session may have been stopped or switched while the POST was out.
        let still_current = self.inner.lock_state().generation == generation;

        match result {
            Ok(message) => {
                info!("Message {} posted to conversation {}", message.id, conversation_id);
                if still_current {
                    self.inner.refresh_session(Some(generation)).await;
                } else {
                    debug!("Skipping post-send refresh: {} is no longer synced", conversation_id);
                }
                Ok(SendOutcome::Sent(message))
            }
            Err(e) => {
                error!("Error sending message to conversation {}: {}", conversation_id, e);
                let err = SyncError::SendFailed(
                    e.server_message().unwrap_or(GENERIC_SEND_FAILURE).to_string()
                );
                if still_current {
                    let error_id = self.inner.record_error(&mut self.inner.lock_state(), &err);
                    self.inner.schedule_error_clear(error_id);
                }
                Err(err)
            }
        }
    }

    /// Cancels polling. Results of requests still in flight are discarded.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        state.generation += 1;
        if let Some(session) = state.session.take() {
            session.ticker.abort();
            info!("Stopped sync for conversation {}", session.conversation_id);
            self.inner.view_tx.send_modify(|view| {
                *view = SyncView::default();
            });
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn poll_loop(inner: Weak<Inner>, generation: u64, period: Duration) {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if inner.lock_state().generation != generation {
                break;
            }
            // Not awaited: a slow fetch must not hold back later ticks.
            tokio::spawn(async move {
                inner.refresh_session(Some(generation)).await;
            });
        }
    }

    /// With `only` set, refreshes nothing unless that generation is still the
    /// active session.
    async fn refresh_session(&self, only: Option<u64>) -> RefreshOutcome {
        let (conversation_id, generation, seq, auth) = {
            let mut state = self.lock_state();
            let Some(session) = state.session.as_mut() else {
                return RefreshOutcome::Idle;
            };
            if only.map_or(false, |g| g != session.generation) {
                return RefreshOutcome::Discarded;
            }
            session.issued += 1;
            (
                session.conversation_id.clone(),
                session.generation,
                session.issued,
                session.auth.clone(),
            )
        };

        let token = auth.current().and_then(|s| s.bearer().map(str::to_owned));
        let result = self.store.list_messages(&conversation_id, token.as_deref()).await;

        let mut state = self.lock_state();
        let Some(session) = state.session.as_mut().filter(|s| s.generation == generation) else {
            debug!("Dropping refresh #{} for stopped session of {}", seq, conversation_id);
            return RefreshOutcome::Discarded;
        };
        if self.config.ordering == RefreshOrdering::IssuanceOrder && seq < session.applied {
            warn!(
                "Dropping refresh #{} for {}: #{} already applied",
                seq,
                conversation_id,
                session.applied
            );
            return RefreshOutcome::Discarded;
        }
        session.applied = session.applied.max(seq);

        match result {
            Ok(messages) => {
                let count = messages.len();
                debug!("Refresh #{} for {}: {} messages", seq, conversation_id, count);
                let messages = Arc::new(messages);
                self.view_tx.send_modify(|view| {
                    view.messages = messages;
                    view.loading = false;
                    view.error = None;
                    view.last_synced = Some(Utc::now());
                });
                RefreshOutcome::Applied(count)
            }
            Err(e) => {
                warn!("Error fetching messages for {}: {}", conversation_id, e);
                let err = SyncError::FetchFailed(e.to_string());
                self.view_tx.send_modify(|view| view.loading = false);
                self.record_error(&mut state, &err);
                RefreshOutcome::Failed(err)
            }
        }
    }

    /// Shows `err` in the view and returns its id for a later conditional clear.
    fn record_error(&self, state: &mut State, err: &SyncError) -> u64 {
        state.error_seq += 1;
        let text = err.to_string();
        self.view_tx.send_modify(|view| view.error = Some(text));
        state.error_seq
    }

    fn schedule_error_clear(self: &Arc<Self>, error_id: u64) {
        let inner = Arc::downgrade(self);
        let delay = self.config.error_clear_after;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let state = inner.lock_state();
            if state.error_seq == error_id {
                inner.view_tx.send_modify(|view| view.error = None);
            }
        });
    }

    fn adjust_sending(&self, delta: isize) {
        let mut state = self.lock_state();
        state.sends_in_flight = state.sends_in_flight.saturating_add_signed(delta);
        let sending = state.sends_in_flight > 0;
        self.view_tx.send_modify(|view| view.sending = sending);
    }
}

/// Keeps `sending` raised for the life of one POST, including when the send
/// future is dropped mid-request.
struct SendingGuard<'a>(&'a Inner);

impl<'a> SendingGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        inner.adjust_sending(1);
        Self(inner)
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.adjust_sending(-1);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = state.session.take() {
            session.ticker.abort();
        }
    }
}
