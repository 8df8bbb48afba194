use std::{collections::HashMap, sync::Arc, time::Duration};

use super::*;
use crate::{gateway::SendReceipt, status::Tab};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::domain::OpenState;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
struct RecordingGateway {
    sent: AsyncMutex<Vec<(ConversationKey, String)>>,
    send_id: Option<&'static str>,
    fail_sends: bool,
    history: Value,
    avatars: HashMap<String, String>,
    avatar_lookups: AsyncMutex<u32>,
}

#[async_trait]
impl GatewayApi for RecordingGateway {
    async fn connection_state(&self) -> Result<bool, SyncError> {
        Ok(true)
    }

    async fn fetch_messages(&self) -> Result<Value, SyncError> {
        if self.history.is_null() {
            return Ok(json!([]));
        }
        Ok(self.history.clone())
    }

    async fn send_text(&self, key: &ConversationKey, text: &str) -> Result<SendReceipt, SyncError> {
        if self.fail_sends {
            return Err(SyncError::transport("gateway unreachable"));
        }
        self.sent.lock().await.push((key.clone(), text.to_string()));
        Ok(SendReceipt {
            message_id: self.send_id.map(MessageId::from),
        })
    }

    async fn fetch_profile_picture(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<String>, SyncError> {
        *self.avatar_lookups.lock().await += 1;
        Ok(self.avatars.get(key.phone()).cloned())
    }
}

const PHONE: &str = "5511999990000";

fn key(phone: &str) -> ConversationKey {
    ConversationKey::from_address(phone).expect("key")
}

fn tenant() -> TenantId {
    TenantId::from("t-1")
}

fn upsert(phone: &str, id: &str, text: &str, from_me: bool, seconds: i64) -> String {
    json!({
        "event": "messages.upsert",
        "instance": "store-01",
        "data": {
            "key": {"remoteJid": format!("{phone}@s.whatsapp.net"), "fromMe": from_me, "id": id},
            "pushName": "Maria",
            "message": {"conversation": text},
            "messageTimestamp": seconds
        }
    })
    .to_string()
}

async fn engine_with(gateway: RecordingGateway) -> (Arc<SyncEngine>, Arc<Storage>) {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    let settings = EngineSettings {
        selection_pin_interval: Duration::from_secs(3600),
        avatar_refresh_interval: Duration::from_secs(3600),
        connection_refresh_interval: Duration::from_secs(3600),
        history_poll_interval: Duration::from_secs(3600),
        ..EngineSettings::default()
    };
    let engine = SyncEngine::new(
        SessionContext::new(tenant(), None),
        settings,
        Arc::new(storage.tagged("engine")),
        Arc::new(gateway),
        Arc::new(PreviewCache::in_memory()),
    );
    (engine, storage)
}

/// Store whose message write fails for one id; everything else goes through.
struct FlakyStore {
    inner: Storage,
    fail_id: &'static str,
}

#[async_trait]
impl ConversationStore for FlakyStore {
    async fn save_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        contact_name: Option<&str>,
        message: &Message,
    ) -> anyhow::Result<storage::SaveOutcome> {
        if message.id.as_str() == self.fail_id {
            anyhow::bail!("disk full");
        }
        self.inner.save_message(tenant, key, contact_name, message).await
    }

    async fn update_conversation_status(&self, update: &StatusUpdate) -> anyhow::Result<()> {
        self.inner.update_conversation_status(update).await
    }

    async fn set_status_tag(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        status: StatusTag,
    ) -> anyhow::Result<()> {
        self.inner.set_status_tag(tenant, key, status).await
    }

    async fn mark_closed(&self, tenant: &TenantId, key: &ConversationKey) -> anyhow::Result<()> {
        self.inner.mark_closed(tenant, key).await
    }

    async fn reset_unread(&self, tenant: &TenantId, key: &ConversationKey) -> anyhow::Result<()> {
        self.inner.reset_unread(tenant, key).await
    }

    async fn save_scroll_position(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        position: i64,
    ) -> anyhow::Result<()> {
        self.inner.save_scroll_position(tenant, key, position).await
    }

    async fn update_avatar_url(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        avatar_url: &str,
    ) -> anyhow::Result<()> {
        self.inner.update_avatar_url(tenant, key, avatar_url).await
    }

    async fn load_status_records(
        &self,
        tenant: &TenantId,
    ) -> anyhow::Result<Vec<shared::domain::ConversationStatusRecord>> {
        self.inner.load_status_records(tenant).await
    }

    async fn list_messages(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        limit: u32,
    ) -> anyhow::Result<Vec<storage::StoredMessage>> {
        self.inner.list_messages(tenant, key, limit).await
    }

    fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusRowChange> {
        self.inner.subscribe_status_changes()
    }

    fn writer(&self) -> Option<&str> {
        ConversationStore::writer(&self.inner)
    }
}

async fn durable(storage: &Storage, phone: &str) -> shared::domain::ConversationStatusRecord {
    storage
        .load_status_record(&tenant(), &key(phone))
        .await
        .expect("load")
        .expect("row")
}

#[tokio::test]
async fn first_message_from_new_contact_then_selection() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;

    let fresh = engine
        .ingest_gateway_event(&json!({"event": "messages.upsert", "data": {
            "key": {"remoteJid": format!("{PHONE}@s.whatsapp.net"), "fromMe": false, "id": "M1"},
            "message": {"conversation": "Hi"}
        }}).to_string())
        .await;
    assert_eq!(fresh, 1);

    let state = engine.snapshot();
    let conversation = state.get(&key(PHONE)).expect("conversation");
    assert_eq!(conversation.unread, 1);
    assert_eq!(conversation.status, StatusTag::Waiting);
    assert_eq!(conversation.last_message_preview.as_deref(), Some("Hi"));

    engine.flush_durable().await;
    assert_eq!(durable(&storage, PHONE).await.unread_count, 1);

    let change = engine.select_conversation(&key(PHONE)).expect("selection");
    assert_eq!(change.previous, None);
    assert_eq!(engine.snapshot().get(&key(PHONE)).expect("c").unread, 0);

    engine.flush_durable().await;
    let row = durable(&storage, PHONE).await;
    assert_eq!(row.unread_count, 0);
    assert!(row.is_open);
}

#[tokio::test]
async fn redelivery_through_every_path_is_idempotent() {
    let history = json!({"messages": [{
        "key": {"remoteJid": format!("{PHONE}@s.whatsapp.net"), "fromMe": false, "id": "M1"},
        "message": {"conversation": "Hi"},
        "messageTimestamp": 1_700_000_000
    }]});
    let (engine, storage) = engine_with(RecordingGateway {
        history,
        ..RecordingGateway::default()
    })
    .await;

    let raw = upsert(PHONE, "M1", "Hi", false, 1_700_000_000);
    assert_eq!(engine.ingest_gateway_event(&raw).await, 1);
    assert_eq!(engine.ingest_gateway_event(&raw).await, 0);
    assert_eq!(engine.poll_history().await, 0);
    engine.flush_durable().await;

    let state = engine.snapshot();
    assert_eq!(state.conversations().len(), 1);
    assert_eq!(state.get(&key(PHONE)).expect("c").messages.len(), 1);
    assert_eq!(storage.count_messages(&tenant()).await.expect("count"), 1);
    assert_eq!(durable(&storage, PHONE).await.unread_count, 1);
}

#[tokio::test]
async fn self_messages_never_increment_unread() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;

    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M2", "Hello", false, 200))
        .await;
    assert_eq!(engine.snapshot().get(&key(PHONE)).expect("c").unread, 2);

    engine
        .ingest_gateway_event(&upsert(PHONE, "M3", "On it", true, 300))
        .await;
    engine.flush_durable().await;

    let conversation = engine.snapshot().get(&key(PHONE)).cloned().expect("c");
    assert_eq!(conversation.unread, 0);
    assert_eq!(conversation.last_message_preview.as_deref(), Some("On it"));
    assert_eq!(durable(&storage, PHONE).await.unread_count, 0);
}

#[tokio::test]
async fn selected_conversation_ignores_store_unread_claims() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;
    engine.start().await.expect("start");
    let mut view = engine.subscribe();

    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine.select_conversation(&key(PHONE));
    engine.flush_durable().await;

    // Another writer bumps both rows as if neither were selected.
    for phone in [PHONE, "5511888880000"] {
        storage
            .update_conversation_status(&StatusUpdate {
                tenant: tenant(),
                key: key(phone),
                contact_name: None,
                preview: "late".into(),
                timestamp: Utc::now(),
                is_self: false,
                is_selected: false,
                sector: None,
            })
            .await
            .expect("update");
    }

    let other = key("5511888880000");
    tokio::time::timeout(
        Duration::from_secs(2),
        view.wait_for(|state| state.get(&other).is_some_and(|c| c.unread == 1)),
    )
    .await
    .expect("echo in time")
    .expect("state channel");

    let state = engine.snapshot();
    let selected = state.get(&key(PHONE)).expect("selected");
    assert_eq!(selected.unread, 0);
    assert_eq!(selected.open_state, OpenState::Open);
    assert!(durable(&storage, PHONE).await.unread_count > 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn operator_status_survives_later_messages() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;

    let transition = engine.change_status(&key(PHONE), StatusTag::Attending);
    assert_eq!(
        transition,
        Some(StatusTransition::Changed {
            from: StatusTag::Waiting,
            to: StatusTag::Attending
        })
    );
    assert_eq!(
        engine.change_status(&key(PHONE), StatusTag::Attending),
        Some(StatusTransition::Unchanged)
    );
    assert_eq!(engine.change_status(&key("5511000000000"), StatusTag::Finished), None);

    engine
        .ingest_gateway_event(&upsert(PHONE, "M2", "Still there?", false, 200))
        .await;
    engine.flush_durable().await;

    assert_eq!(durable(&storage, PHONE).await.status, StatusTag::Attending);
    assert_eq!(
        engine.snapshot().get(&key(PHONE)).expect("c").status,
        StatusTag::Attending
    );
}

#[tokio::test]
async fn successful_send_is_rekeyed_and_persisted() {
    let (engine, storage) = engine_with(RecordingGateway {
        send_id: Some("GW-1"),
        ..RecordingGateway::default()
    })
    .await;
    engine.select_conversation(&key(PHONE));

    // Composition is not blocked for finished conversations.
    engine.change_status(&key(PHONE), StatusTag::Finished);
    let id = engine
        .send_message(&key(PHONE), "  hello  ")
        .await
        .expect("send");
    assert_eq!(id, MessageId::from("GW-1"));

    let state = engine.snapshot();
    let messages = &state.get(&key(PHONE)).expect("c").messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::from("GW-1"));
    assert!(messages[0].sender.is_self());

    // The realtime echo of the same send does not duplicate it.
    engine
        .ingest_gateway_event(&upsert(PHONE, "GW-1", "hello", true, Utc::now().timestamp()))
        .await;
    assert_eq!(engine.snapshot().get(&key(PHONE)).expect("c").messages.len(), 1);

    engine.flush_durable().await;
    assert_eq!(storage.count_messages(&tenant()).await.expect("count"), 1);
}

#[tokio::test]
async fn failed_send_is_withdrawn_and_reported() {
    let (engine, _storage) = engine_with(RecordingGateway {
        fail_sends: true,
        ..RecordingGateway::default()
    })
    .await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    let mut events = engine.subscribe_events();

    let err = engine
        .send_message(&key(PHONE), "reply")
        .await
        .expect_err("send fails");
    assert_eq!(err.kind, ErrorKind::Transport);

    let conversation = engine.snapshot().get(&key(PHONE)).cloned().expect("c");
    assert_eq!(conversation.messages.len(), 1);
    assert_eq!(conversation.last_message_preview.as_deref(), Some("Hi"));

    match events.recv().await.expect("event") {
        EngineEvent::SendFailed { key: failed, error } => {
            assert_eq!(failed, key(PHONE));
            assert_eq!(error.kind, ErrorKind::Transport);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let (engine, _storage) = engine_with(RecordingGateway::default()).await;
    assert_eq!(engine.ingest_gateway_event("{not json").await, 0);
    assert_eq!(
        engine
            .ingest_gateway_event(&json!({"event": "messages.upsert", "data": {"unexpected": true}}).to_string())
            .await,
        0
    );
    assert!(engine.snapshot().conversations().is_empty());
}

#[tokio::test]
async fn hydration_restores_rows_and_history() {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    {
        let engine = SyncEngine::new(
            SessionContext::new(tenant(), None),
            EngineSettings::default(),
            storage.clone(),
            Arc::new(RecordingGateway::default()),
            Arc::new(PreviewCache::in_memory()),
        );
        engine
            .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
            .await;
        engine
            .ingest_gateway_event(&upsert(PHONE, "M2", "Anyone?", false, 200))
            .await;
        engine.change_status(&key(PHONE), StatusTag::Pending);
        engine.flush_durable().await;
    }

    let engine = SyncEngine::new(
        SessionContext::new(tenant(), None),
        EngineSettings::default(),
        storage.clone(),
        Arc::new(RecordingGateway::default()),
        Arc::new(PreviewCache::in_memory()),
    );
    assert_eq!(engine.hydrate().await.expect("hydrate"), 1);

    let state = engine.snapshot();
    let conversation = state.get(&key(PHONE)).expect("restored");
    assert_eq!(conversation.unread, 2);
    assert_eq!(conversation.status, StatusTag::Pending);
    assert_eq!(conversation.display_name, "Maria");
    let ids: Vec<_> = conversation.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "M2"]);
}

#[tokio::test]
async fn avatar_refresh_fills_missing_avatars() {
    let storage = Arc::new(Storage::new("sqlite::memory:").await.expect("storage"));
    let gateway = Arc::new(RecordingGateway {
        avatars: HashMap::from([(PHONE.to_string(), "https://pps.example/a.jpg".to_string())]),
        ..RecordingGateway::default()
    });
    let engine = SyncEngine::new(
        SessionContext::new(tenant(), None),
        EngineSettings::default(),
        storage.clone(),
        gateway.clone(),
        Arc::new(PreviewCache::in_memory()),
    );
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine
        .ingest_gateway_event(&upsert("5511777770000", "M2", "Oi", false, 200))
        .await;

    assert_eq!(engine.refresh_avatars().await, 1);
    engine.flush_durable().await;

    let state = engine.snapshot();
    assert_eq!(
        state.get(&key(PHONE)).expect("c").avatar_url.as_deref(),
        Some("https://pps.example/a.jpg")
    );
    assert_eq!(state.get(&key("5511777770000")).expect("c").avatar_url, None);
    assert_eq!(
        durable(&storage, PHONE).await.avatar_url.as_deref(),
        Some("https://pps.example/a.jpg")
    );

    // A second pass only retries the conversation still missing an avatar.
    engine.refresh_avatars().await;
    assert_eq!(*gateway.avatar_lookups.lock().await, 3);
}

#[tokio::test]
async fn tab_counts_and_filtered_views() {
    let (engine, _storage) = engine_with(RecordingGateway::default()).await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine
        .ingest_gateway_event(&upsert("5511777770000", "M2", "Oi", false, 200))
        .await;
    engine.change_status(&key("5511777770000"), StatusTag::Attending);

    let counts = engine.tab_counts();
    assert_eq!(counts.for_tab(Tab::Status(StatusTag::Waiting)), 1);
    assert_eq!(counts.for_tab(Tab::Status(StatusTag::Attending)), 1);
    assert_eq!(counts.for_tab(Tab::Contacts), 2);

    let waiting = engine.view(&ConversationFilter {
        tab: Tab::Status(StatusTag::Waiting),
        ..ConversationFilter::default()
    });
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].key, key(PHONE));
}

#[tokio::test]
async fn shutdown_closes_the_selected_conversation() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;
    engine.start().await.expect("start");
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine.select_conversation(&key(PHONE));
    engine.flush_durable().await;
    assert!(durable(&storage, PHONE).await.is_open);

    engine.shutdown().await;

    assert!(!durable(&storage, PHONE).await.is_open);
    assert_eq!(engine.snapshot().selected(), None);
    assert_eq!(engine.snapshot().get(&key(PHONE)).expect("c").open_state, OpenState::Closed);
}

#[tokio::test]
async fn selecting_another_conversation_closes_the_previous_one() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine
        .ingest_gateway_event(&upsert("5511777770000", "M2", "Oi", false, 200))
        .await;

    engine.select_conversation(&key(PHONE));
    let change = engine
        .select_conversation(&key("5511777770000"))
        .expect("change");
    assert_eq!(change.previous, Some(key(PHONE)));
    assert!(engine.select_conversation(&key("5511777770000")).is_none());
    engine.save_scroll_position(&key("5511777770000"), 420);
    engine.flush_durable().await;

    assert!(!durable(&storage, PHONE).await.is_open);
    let current = durable(&storage, "5511777770000").await;
    assert!(current.is_open);
    assert_eq!(current.unread_count, 0);
    assert_eq!(current.scroll_position, Some(420));
}

#[tokio::test]
async fn own_row_echoes_never_roll_back_unread() {
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let engine = SyncEngine::new(
        SessionContext::new(tenant(), None),
        EngineSettings::default(),
        Arc::new(FlakyStore {
            inner: storage.tagged("engine"),
            fail_id: "M2",
        }),
        Arc::new(RecordingGateway::default()),
        Arc::new(PreviewCache::in_memory()),
    );
    engine.spawn_row_change_listener();
    let mut view = engine.subscribe();

    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M2", "Hello?", false, 200))
        .await;
    assert_eq!(engine.snapshot().get(&key(PHONE)).expect("c").unread, 2);
    engine.flush_durable().await;
    assert_eq!(durable(&storage, PHONE).await.unread_count, 1);

    // Row changes are delivered in order, so once a foreign write shows up
    // the echoes of our own earlier writes have been seen too.
    let other = key("5511888880000");
    storage
        .update_conversation_status(&StatusUpdate {
            tenant: tenant(),
            key: other.clone(),
            contact_name: None,
            preview: "late".into(),
            timestamp: Utc::now(),
            is_self: false,
            is_selected: false,
            sector: None,
        })
        .await
        .expect("foreign update");
    tokio::time::timeout(
        Duration::from_secs(2),
        view.wait_for(|state| state.get(&other).is_some_and(|c| c.unread == 1)),
    )
    .await
    .expect("foreign change in time")
    .expect("state channel");

    let conversation = engine.snapshot().get(&key(PHONE)).cloned().expect("c");
    assert_eq!(conversation.unread, 2);
    assert_eq!(conversation.messages.len(), 2);
}

#[tokio::test]
async fn echo_of_a_send_without_gateway_id_replaces_the_local_copy() {
    let (engine, storage) = engine_with(RecordingGateway::default()).await;
    engine
        .ingest_gateway_event(&upsert(PHONE, "M1", "Hi", false, 100))
        .await;

    let local = engine
        .send_message(&key(PHONE), "On it")
        .await
        .expect("send");
    assert!(local.is_local());

    let fresh = engine
        .ingest_gateway_event(&upsert(PHONE, "GW1", "On it", true, Utc::now().timestamp()))
        .await;
    assert_eq!(fresh, 0);

    let conversation = engine.snapshot().get(&key(PHONE)).cloned().expect("c");
    let ids: Vec<_> = conversation.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "GW1"]);
    assert_eq!(conversation.last_message_preview.as_deref(), Some("On it"));

    engine.flush_durable().await;
    assert_eq!(storage.count_messages(&tenant()).await.expect("count"), 2);
}
