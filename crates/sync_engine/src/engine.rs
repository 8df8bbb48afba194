use std::sync::{Arc, Mutex, PoisonError, Weak};

use anyhow::Result;
use chrono::Utc;
use shared::{
    domain::{
        Conversation, ConversationKey, Message, MessageBody, MessageId, SenderRole, StatusTag,
        TenantId, LOCAL_ID_PREFIX,
    },
    error::{ErrorKind, SyncError},
    protocol::{parse_realtime_frame, GatewayEnvelope},
};
use storage::{ConversationStore, StatusRowChange, StatusUpdate, Storage};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::{prepare_database_url, EngineSettings},
    context::SessionContext,
    gateway::{GatewayApi, HttpGateway, MissingGateway},
    normalizer::{normalize_envelope, NormalizedMessage},
    polling::HistoryPoller,
    preview_cache::PreviewCache,
    realtime::{
        socket_url, ConnectionStatus, RealtimeController, RealtimeSettings, STABLE_SESSION,
    },
    reconciler::{ConversationState, SelectionChange},
    scheduler::{Schedule, Scheduler, Tick},
    status::{tab_counts, ConversationFilter, StatusTransition, TabCounts},
};

const EVENT_CAPACITY: usize = 64;
const FRAME_CAPACITY: usize = 256;
const TICK_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    ConnectionChanged(ConnectionStatus),
    GatewayReachability { reachable: bool },
    SendFailed {
        key: ConversationKey,
        error: SyncError,
    },
    /// Background failure; informational only.
    Failure(SyncError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Realtime,
    Polling,
}

enum DurableOp {
    Persist {
        message: NormalizedMessage,
        is_selected: bool,
    },
    SetStatus {
        key: ConversationKey,
        status: StatusTag,
    },
    MarkClosed(ConversationKey),
    ResetUnread(ConversationKey),
    ScrollPosition {
        key: ConversationKey,
        position: i64,
    },
    Avatar {
        key: ConversationKey,
        url: String,
    },
    Flush(oneshot::Sender<()>),
}

pub struct SyncEngine {
    ctx: Arc<SessionContext>,
    settings: EngineSettings,
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn GatewayApi>,
    cache: Arc<PreviewCache>,
    state: watch::Sender<ConversationState>,
    events: broadcast::Sender<EngineEvent>,
    durable: mpsc::UnboundedSender<DurableOp>,
    poller: HistoryPoller,
    realtime: Option<Arc<RealtimeController>>,
    frames: Mutex<Option<mpsc::Receiver<GatewayEnvelope>>>,
    scheduler: Scheduler,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub async fn connect(settings: EngineSettings) -> Result<Arc<Self>> {
        let database_url = prepare_database_url(&settings.database_url)?;
        let storage = Storage::new(&database_url).await?;
        let ctx = SessionContext::resolve(&settings, &storage).await?;
        let storage = storage.tagged(format!("engine-{}", Uuid::new_v4()));
        let gateway: Arc<dyn GatewayApi> = match &ctx.gateway {
            Some(config) => Arc::new(HttpGateway::new(config.clone())),
            None => Arc::new(MissingGateway),
        };
        let cache = Arc::new(PreviewCache::load(&settings.preview_cache_path));
        Ok(Self::new(ctx, settings, Arc::new(storage), gateway, cache))
    }

    /// Spawns the durable writer; must run inside a Tokio runtime.
    pub fn new(
        ctx: Arc<SessionContext>,
        settings: EngineSettings,
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn GatewayApi>,
        cache: Arc<PreviewCache>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConversationState::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (durable, durable_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);

        let realtime = ctx.gateway.as_ref().and_then(|config| match socket_url(config) {
            Ok(url) => Some(RealtimeController::new(
                RealtimeSettings {
                    url,
                    instance: config.instance_name.clone(),
                    max_attempts: settings.connect_max_attempts,
                    subscribe_delay: settings.subscribe_delay,
                    reconnect_delay: settings.reconnect_delay,
                    stable_session: STABLE_SESSION,
                },
                frames_tx,
            )),
            Err(err) => {
                warn!(error = %err, "realtime: push channel disabled");
                None
            }
        });

        let poller = HistoryPoller::new(
            gateway.clone(),
            ctx.instance_name().map(str::to_string),
            settings.history_limit as usize,
        );
        let writer = tokio::spawn(run_durable_writer(
            store.clone(),
            ctx.tenant.clone(),
            durable_rx,
        ));

        Arc::new(Self {
            ctx,
            settings,
            store,
            gateway,
            cache,
            state,
            events,
            durable,
            poller,
            realtime,
            frames: Mutex::new(Some(frames_rx)),
            scheduler: Scheduler::default(),
            tasks: Mutex::new(vec![writer]),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let evicted = self.cache.evict_expired(Utc::now()).await;
        if evicted > 0 {
            debug!(evicted, "cache: expired entries evicted");
        }
        let restored = self.hydrate().await?;
        info!(tenant = %self.ctx.tenant, restored, "engine: hydrated from durable store");

        self.spawn_row_change_listener();
        self.spawn_frame_consumer();
        if let Some(realtime) = &self.realtime {
            self.spawn_connection_forwarder(realtime);
            realtime.start();
        } else {
            warn!("engine: no push channel, relying on history polling");
        }

        let (tick_tx, tick_rx) = mpsc::channel(TICK_CAPACITY);
        self.scheduler
            .start(Schedule::from_settings(&self.settings), tick_tx);
        self.spawn_tick_consumer(tick_rx);

        self.poll_history().await;
        Ok(())
    }

    pub async fn hydrate(&self) -> Result<usize> {
        let tenant = &self.ctx.tenant;
        let records = self.store.load_status_records(tenant).await?;
        let mut restored = Vec::with_capacity(records.len());
        for record in records {
            let history = self
                .store
                .list_messages(tenant, &record.conversation_key, self.settings.history_limit)
                .await?
                .into_iter()
                .map(|stored| stored.message)
                .collect::<Vec<_>>();
            restored.push((record, history));
        }

        let count = restored.len();
        self.state.send_modify(|state| {
            for (record, history) in &restored {
                state.restore(record, history.clone());
            }
        });

        for (record, _) in &restored {
            let key = &record.conversation_key;
            if record.last_message.is_none() {
                if let Some(preview) = self.cache.preview(key).await {
                    self.state
                        .send_if_modified(|state| state.set_preview_if_missing(key, &preview));
                }
            }
            if record.avatar_url.is_none() {
                if let Some(url) = self.cache.avatar(key).await {
                    self.state.send_if_modified(|state| state.set_avatar(key, &url));
                }
            }
        }
        Ok(count)
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.realtime
            .as_ref()
            .map(|realtime| realtime.status())
            .unwrap_or_default()
    }

    pub fn view(&self, filter: &ConversationFilter) -> Vec<Conversation> {
        let state = self.state.borrow();
        filter
            .apply(state.conversations())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn tab_counts(&self) -> TabCounts {
        tab_counts(self.state.borrow().conversations())
    }

    /// Accepts one raw push-channel frame. Malformed frames are dropped.
    /// Returns how many messages were new to the view.
    pub async fn ingest_gateway_event(&self, raw: &str) -> usize {
        match parse_realtime_frame(raw) {
            Ok(envelope) => self.ingest_envelope(&envelope).await,
            Err(err) => {
                warn!(error = %err, "normalizer: dropping malformed gateway event");
                0
            }
        }
    }

    pub async fn ingest_envelope(&self, envelope: &GatewayEnvelope) -> usize {
        let batch = normalize_envelope(envelope);
        self.ingest_normalized(batch, Source::Realtime).await
    }

    pub async fn ingest_normalized(&self, batch: Vec<NormalizedMessage>, source: Source) -> usize {
        let mut fresh = 0;
        for inbound in batch {
            let mut is_new = false;
            let mut is_selected = false;
            self.state.send_if_modified(|state| {
                is_selected = state.is_selected(&inbound.key);
                let outcome = state.merge_inbound(&inbound);
                is_new = outcome.is_new();
                outcome.changed()
            });

            if is_new {
                fresh += 1;
                self.cache
                    .put_preview(&inbound.key, &inbound.message.body.content())
                    .await;
            }
            // The store deduplicates on its own; an in-memory duplicate may
            // still be missing from the durable table.
            self.enqueue(DurableOp::Persist {
                message: inbound,
                is_selected,
            });
        }
        if fresh > 0 {
            debug!(?source, fresh, "reconciler: merged inbound messages");
        }
        fresh
    }

    pub fn select_conversation(&self, key: &ConversationKey) -> Option<SelectionChange> {
        let mut change = None;
        self.state.send_if_modified(|state| {
            change = state.select(key);
            change.is_some()
        });
        let change = change?;

        if let Some(previous) = &change.previous {
            self.enqueue(DurableOp::MarkClosed(previous.clone()));
        }
        self.enqueue(DurableOp::ResetUnread(change.current.clone()));
        info!(
            key = %change.current,
            previous = change.previous.as_ref().map(|k| k.as_str()),
            "reconciler: conversation selected"
        );
        Some(change)
    }

    /// Sends an operator message. The message shows up optimistically under a
    /// local id and is re-keyed to the gateway id on success; on failure it
    /// is withdrawn and a [`EngineEvent::SendFailed`] is emitted.
    pub async fn send_message(
        &self,
        key: &ConversationKey,
        text: &str,
    ) -> Result<MessageId, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::malformed("message text is empty"));
        }

        let local_id = MessageId(format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4()));
        let message = Message {
            id: local_id.clone(),
            sender: SenderRole::OwnSide,
            body: MessageBody::text(text),
            timestamp: Utc::now(),
            instance: self.ctx.instance_name().map(str::to_string),
        };
        self.state
            .send_modify(|state| state.append_outbound(key, message.clone()));
        self.cache.put_preview(key, text).await;

        match self.gateway.send_text(key, text).await {
            Ok(receipt) => {
                let Some(gateway_id) = receipt.message_id else {
                    debug!(key = %key, "gateway: send accepted without an id");
                    return Ok(local_id);
                };
                self.state.send_if_modified(|state| {
                    state.confirm_outbound(key, &local_id, &gateway_id)
                });
                let is_selected = self.state.borrow().is_selected(key);
                self.enqueue(DurableOp::Persist {
                    message: NormalizedMessage {
                        key: key.clone(),
                        contact_name: None,
                        message: Message {
                            id: gateway_id.clone(),
                            ..message
                        },
                    },
                    is_selected,
                });
                info!(key = %key, message_id = %gateway_id, "gateway: message sent");
                Ok(gateway_id)
            }
            Err(error) => {
                self.state
                    .send_if_modified(|state| state.discard_outbound(key, &local_id));
                warn!(key = %key, error = %error, "gateway: send failed");
                self.emit(EngineEvent::SendFailed {
                    key: key.clone(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    pub fn change_status(&self, key: &ConversationKey, status: StatusTag) -> Option<StatusTransition> {
        let mut result = None;
        self.state.send_if_modified(|state| {
            result = state.change_status(key, status);
            matches!(result, Some(StatusTransition::Changed { .. }))
        });

        match result {
            Some(StatusTransition::Changed { from, to }) => {
                self.enqueue(DurableOp::SetStatus {
                    key: key.clone(),
                    status: to,
                });
                info!(key = %key, from = %from, to = %to, "reconciler: status changed");
            }
            Some(StatusTransition::Unchanged) => {}
            None => warn!(key = %key, "reconciler: status change for unknown conversation"),
        }
        result
    }

    pub fn save_scroll_position(&self, key: &ConversationKey, position: i64) {
        self.enqueue(DurableOp::ScrollPosition {
            key: key.clone(),
            position,
        });
    }

    pub fn pin_selection(&self) -> bool {
        self.state.send_if_modified(ConversationState::pin_selection)
    }

    pub async fn refresh_avatars(&self) -> usize {
        let missing = self.state.borrow().keys_missing_avatar();
        let mut updated = 0;
        for key in missing {
            let url = match self.cache.avatar(&key).await {
                Some(url) => url,
                None => match self.gateway.fetch_profile_picture(&key).await {
                    Ok(Some(url)) => {
                        self.cache.put_avatar(&key, &url).await;
                        self.enqueue(DurableOp::Avatar {
                            key: key.clone(),
                            url: url.clone(),
                        });
                        url
                    }
                    Ok(None) => continue,
                    Err(err) if err.kind == ErrorKind::ConfigurationMissing => {
                        warn!(error = %err, "gateway: avatar refresh skipped");
                        break;
                    }
                    Err(err) => {
                        debug!(key = %key, error = %err, "gateway: avatar lookup failed");
                        continue;
                    }
                },
            };
            if self.state.send_if_modified(|state| state.set_avatar(&key, &url)) {
                updated += 1;
            }
        }
        if updated > 0 {
            self.persist_cache().await;
        }
        updated
    }

    pub async fn refresh_connection(&self) {
        match self.gateway.connection_state().await {
            Ok(reachable) => {
                debug!(reachable, "gateway: connection state checked");
                self.emit(EngineEvent::GatewayReachability { reachable });
            }
            Err(err) if err.kind == ErrorKind::ConfigurationMissing => {
                warn!(error = %err, "gateway: connection refresh skipped");
                return;
            }
            Err(err) => {
                warn!(error = %err, "gateway: connection state check failed");
                self.emit(EngineEvent::GatewayReachability { reachable: false });
            }
        }

        if let Some(realtime) = &self.realtime {
            if realtime.status().gave_up {
                realtime.restart();
            }
        }
    }

    pub async fn poll_history(&self) -> usize {
        match self.poller.poll_once().await {
            Ok(batch) => self.ingest_normalized(batch, Source::Polling).await,
            Err(err) if err.kind == ErrorKind::ConfigurationMissing => {
                warn!(error = %err, "polling: skipped");
                0
            }
            Err(err) => {
                warn!(error = %err, "polling: history fetch failed");
                self.emit(EngineEvent::Failure(err));
                0
            }
        }
    }

    /// Waits until every durable write queued so far has been applied.
    pub async fn flush_durable(&self) {
        let (tx, rx) = oneshot::channel();
        if self.durable.send(DurableOp::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn shutdown(&self) {
        if let Some(realtime) = &self.realtime {
            realtime.disconnect();
        }
        self.scheduler.stop();

        let mut previous = None;
        self.state.send_if_modified(|state| {
            previous = state.clear_selection();
            previous.is_some()
        });
        if let Some(key) = previous {
            self.enqueue(DurableOp::MarkClosed(key));
        }

        self.flush_durable().await;
        self.persist_cache().await;

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        info!(tenant = %self.ctx.tenant, "engine: shut down");
    }

    async fn persist_cache(&self) {
        if let Err(err) = self.cache.persist().await {
            warn!(error = %err, "cache: failed to persist");
        }
    }

    fn enqueue(&self, op: DurableOp) {
        if self.durable.send(op).is_err() {
            warn!("storage: durable writer stopped, dropping write");
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn apply_row_change(&self, change: &StatusRowChange) {
        if change.record.tenant_id != self.ctx.tenant {
            return;
        }
        // Our own writes were merged in memory before they were queued; the
        // echo may predate later merges.
        if change.written_by(self.store.writer()) {
            return;
        }
        let changed = self
            .state
            .send_if_modified(|state| state.apply_store_change(&change.record));
        if changed {
            debug!(key = %change.record.conversation_key, "reconciler: adopted durable row change");
        }
    }

    fn spawn_row_change_listener(self: &Arc<Self>) {
        let mut changes = self.store.subscribe_status_changes();
        let engine = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        let Some(engine) = engine.upgrade() else {
                            return;
                        };
                        engine.apply_row_change(&change);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "reconciler: row-change subscription lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    fn spawn_frame_consumer(self: &Arc<Self>) {
        let Some(mut frames) = self
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let engine = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            while let Some(envelope) = frames.recv().await {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                engine.ingest_envelope(&envelope).await;
            }
        }));
    }

    fn spawn_connection_forwarder(self: &Arc<Self>, realtime: &RealtimeController) {
        let mut status = realtime.subscribe_status();
        let engine = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                engine.emit(EngineEvent::ConnectionChanged(current));
            }
        }));
    }

    fn spawn_tick_consumer(self: &Arc<Self>, mut ticks: mpsc::Receiver<Tick>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        self.track(tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match tick {
                    Tick::SelectionPin => {
                        engine.pin_selection();
                    }
                    Tick::AvatarRefresh => {
                        engine.refresh_avatars().await;
                    }
                    Tick::ConnectionRefresh => engine.refresh_connection().await,
                    Tick::HistoryPoll => {
                        engine.poll_history().await;
                    }
                }
            }
        }));
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

async fn run_durable_writer(
    store: Arc<dyn ConversationStore>,
    tenant: TenantId,
    mut ops: mpsc::UnboundedReceiver<DurableOp>,
) {
    while let Some(op) = ops.recv().await {
        if let DurableOp::Flush(done) = op {
            let _ = done.send(());
            continue;
        }
        if let Err(err) = apply_durable(store.as_ref(), &tenant, op).await {
            // In-memory state is never rolled back.
            warn!(tenant = %tenant, error = %format!("{err:#}"), "storage: durable write failed");
        }
    }
}

async fn apply_durable(store: &dyn ConversationStore, tenant: &TenantId, op: DurableOp) -> Result<()> {
    match op {
        DurableOp::Persist {
            message,
            is_selected,
        } => {
            let outcome = store
                .save_message(
                    tenant,
                    &message.key,
                    message.contact_name.as_deref(),
                    &message.message,
                )
                .await?;
            // Redelivery must not count twice.
            if outcome.is_new() {
                store
                    .update_conversation_status(&StatusUpdate {
                        tenant: tenant.clone(),
                        key: message.key.clone(),
                        contact_name: message.contact_name.clone(),
                        preview: message.message.body.content(),
                        timestamp: message.message.timestamp,
                        is_self: message.message.sender.is_self(),
                        is_selected,
                        sector: None,
                    })
                    .await?;
            }
        }
        DurableOp::SetStatus { key, status } => store.set_status_tag(tenant, &key, status).await?,
        DurableOp::MarkClosed(key) => store.mark_closed(tenant, &key).await?,
        DurableOp::ResetUnread(key) => store.reset_unread(tenant, &key).await?,
        DurableOp::ScrollPosition { key, position } => {
            store.save_scroll_position(tenant, &key, position).await?
        }
        DurableOp::Avatar { key, url } => store.update_avatar_url(tenant, &key, &url).await?,
        DurableOp::Flush(_) => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
