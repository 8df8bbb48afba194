use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use shared::domain::{
    AudioMetadata, ConversationKey, ConversationStatusRecord, GatewayConfig, Message, MessageBody,
    MessageId, OperatorId, SenderRole, StatusTag, TenantId,
};

const STATUS_CHANGE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    status_changes: broadcast::Sender<StatusRowChange>,
    writer: Option<Arc<str>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// The (message id, tenant) pair was already stored.
    Duplicate,
    /// The full record was rejected and the required-fields record was stored.
    InsertedMinimal,
}

impl SaveOutcome {
    pub fn is_new(self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub tenant: TenantId,
    pub key: ConversationKey,
    pub contact_name: Option<String>,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
    pub is_self: bool,
    pub is_selected: bool,
    pub sector: Option<String>,
}

impl StatusUpdate {
    /// Unread accrues only for counterparty messages outside the selected conversation.
    pub fn increments_unread(&self) -> bool {
        !self.is_self && !self.is_selected
    }
}

/// Row-change notification emitted after every status row write.
#[derive(Debug, Clone)]
pub struct StatusRowChange {
    pub record: ConversationStatusRecord,
    /// Tag of the handle that wrote the row, if it had one.
    pub writer: Option<Arc<str>>,
}

impl StatusRowChange {
    pub fn written_by(&self, writer: Option<&str>) -> bool {
        writer.is_some() && self.writer.as_deref() == writer
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub conversation_key: ConversationKey,
    pub contact_name: Option<String>,
    pub message: Message,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        contact_name: Option<&str>,
        message: &Message,
    ) -> Result<SaveOutcome>;
    async fn update_conversation_status(&self, update: &StatusUpdate) -> Result<()>;
    async fn set_status_tag(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        status: StatusTag,
    ) -> Result<()>;
    async fn mark_closed(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()>;
    async fn reset_unread(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()>;
    async fn save_scroll_position(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        position: i64,
    ) -> Result<()>;
    async fn update_avatar_url(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        avatar_url: &str,
    ) -> Result<()>;
    async fn load_status_records(&self, tenant: &TenantId) -> Result<Vec<ConversationStatusRecord>>;
    async fn list_messages(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<StoredMessage>>;
    fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusRowChange>;
    /// Tag stamped on the row changes this handle publishes.
    fn writer(&self) -> Option<&str>;
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every in-memory connection is its own database.
        let max_connections = if sqlite_path(database_url).is_none() {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        let (status_changes, _) = broadcast::channel(STATUS_CHANGE_CAPACITY);
        Ok(Self {
            pool,
            status_changes,
            writer: None,
        })
    }

    /// Handle over the same pool and change feed whose writes are tagged
    /// with `writer`.
    pub fn tagged(&self, writer: impl Into<Arc<str>>) -> Self {
        Self {
            writer: Some(writer.into()),
            ..self.clone()
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn save_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        contact_name: Option<&str>,
        message: &Message,
    ) -> Result<SaveOutcome> {
        match self.insert_full_message(tenant, key, contact_name, message).await {
            Ok(0) => Ok(SaveOutcome::Duplicate),
            Ok(_) => Ok(SaveOutcome::Inserted),
            Err(err) => {
                warn!(
                    tenant = %tenant,
                    message_id = %message.id,
                    error = %err,
                    "storage: full message record rejected, retrying with required fields"
                );
                let affected = self
                    .insert_minimal_message(tenant, key, message)
                    .await
                    .with_context(|| format!("failed to persist message {}", message.id))?;
                Ok(if affected == 0 {
                    SaveOutcome::Duplicate
                } else {
                    SaveOutcome::InsertedMinimal
                })
            }
        }
    }

    async fn insert_full_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        contact_name: Option<&str>,
        message: &Message,
    ) -> Result<u64> {
        let audio = message.body.audio();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (
                message_id,
                tenant_id,
                phone,
                conversation_key,
                contact_name,
                from_me,
                content,
                message_type,
                timestamp_ms,
                instance_name,
                audio_duration_seconds,
                audio_push_to_talk,
                audio_media_url,
                audio_mime_type
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(message_id, tenant_id) DO NOTHING
            "#,
        )
        .bind(message.id.as_str())
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(key.as_str())
        .bind(contact_name)
        .bind(message.sender.is_self())
        .bind(message.body.content())
        .bind(message.body.kind())
        .bind(message.timestamp.timestamp_millis())
        .bind(message.instance.as_deref())
        .bind(audio.and_then(|a| a.duration_seconds))
        .bind(audio.map(|a| a.push_to_talk))
        .bind(audio.and_then(|a| a.media_url.as_deref()))
        .bind(audio.and_then(|a| a.mime_type.as_deref()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_minimal_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        message: &Message,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (message_id, tenant_id, phone, conversation_key, from_me, content, timestamp_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(message_id, tenant_id) DO NOTHING
            "#,
        )
        .bind(message.id.as_str())
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(key.as_str())
        .bind(message.sender.is_self())
        .bind(message.body.content())
        .bind(message.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Upserts the status row for one delivered message. The status tag and
    /// an already-set sector are never overwritten here; the preview only
    /// moves forward in time.
    pub async fn update_conversation_status(&self, update: &StatusUpdate) -> Result<()> {
        let increments = update.increments_unread();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO conversation_status (
                tenant_id,
                phone,
                conversation_key,
                contact_name,
                status,
                is_open,
                unread_count,
                last_message,
                last_message_at_ms,
                sector,
                created_at,
                updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
            ON CONFLICT(tenant_id, phone) DO UPDATE SET
                conversation_key = excluded.conversation_key,
                contact_name = COALESCE(excluded.contact_name, conversation_status.contact_name),
                is_open = CASE WHEN ?6 THEN 1 ELSE conversation_status.is_open END,
                unread_count = CASE WHEN ?12 THEN conversation_status.unread_count + 1 ELSE 0 END,
                last_message = CASE
                    WHEN conversation_status.last_message_at_ms IS NULL
                      OR excluded.last_message_at_ms >= conversation_status.last_message_at_ms
                    THEN excluded.last_message
                    ELSE conversation_status.last_message
                END,
                last_message_at_ms = MAX(COALESCE(conversation_status.last_message_at_ms, 0), excluded.last_message_at_ms),
                sector = COALESCE(conversation_status.sector, excluded.sector),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(update.tenant.as_str())
        .bind(update.key.phone())
        .bind(update.key.as_str())
        .bind(update.contact_name.as_deref())
        .bind(StatusTag::default().as_str())
        .bind(update.is_selected)
        .bind(if increments { 1_i64 } else { 0 })
        .bind(update.preview.as_str())
        .bind(update.timestamp.timestamp_millis())
        .bind(update.sector.as_deref())
        .bind(now)
        .bind(increments)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update status row for {}", update.key))?;

        self.publish_status_change(&update.tenant, &update.key).await
    }

    /// Operator-driven tag change. Creates the row when the conversation has
    /// never been persisted.
    pub async fn set_status_tag(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        status: StatusTag,
    ) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO conversation_status (tenant_id, phone, conversation_key, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(tenant_id, phone) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(key.as_str())
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to set status {status} for {key}"))?;

        debug!(tenant = %tenant, conversation = %key, status = %status, "storage: status tag saved");
        self.publish_status_change(tenant, key).await
    }

    pub async fn mark_closed(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE conversation_status SET is_open = 0, updated_at = ?3 WHERE tenant_id = ?1 AND phone = ?2",
        )
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected > 0 {
            self.publish_status_change(tenant, key).await?;
        }
        Ok(())
    }

    pub async fn reset_unread(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE conversation_status SET unread_count = 0, is_open = 1, updated_at = ?3 WHERE tenant_id = ?1 AND phone = ?2",
        )
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected > 0 {
            self.publish_status_change(tenant, key).await?;
        }
        Ok(())
    }

    pub async fn save_scroll_position(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        position: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE conversation_status SET scroll_position = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND phone = ?2",
        )
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(position)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_avatar_url(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        avatar_url: &str,
    ) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE conversation_status SET avatar_url = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND phone = ?2",
        )
        .bind(tenant.as_str())
        .bind(key.phone())
        .bind(avatar_url)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected > 0 {
            self.publish_status_change(tenant, key).await?;
        }
        Ok(())
    }

    pub async fn load_status_records(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ConversationStatusRecord>> {
        let rows = sqlx::query(&format!(
            "{STATUS_COLUMNS} WHERE tenant_id = ?1 ORDER BY COALESCE(last_message_at_ms, 0) DESC, phone ASC"
        ))
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(status_record_from_row).collect()
    }

    pub async fn load_status_record(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
    ) -> Result<Option<ConversationStatusRecord>> {
        let row = sqlx::query(&format!(
            "{STATUS_COLUMNS} WHERE tenant_id = ?1 AND phone = ?2"
        ))
        .bind(tenant.as_str())
        .bind(key.phone())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(status_record_from_row).transpose()
    }

    /// Most recent `limit` messages of a conversation, oldest first.
    pub async fn list_messages(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut rows = sqlx::query(
            r#"
            SELECT message_id, conversation_key, contact_name, from_me, content, message_type,
                   timestamp_ms, instance_name, audio_duration_seconds, audio_push_to_talk,
                   audio_media_url, audio_mime_type
            FROM messages
            WHERE tenant_id = ?1 AND conversation_key = ?2
            ORDER BY timestamp_ms DESC, message_id DESC
            LIMIT ?3
            "#,
        )
        .bind(tenant.as_str())
        .bind(key.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        rows.iter().map(stored_message_from_row).collect()
    }

    pub async fn count_messages(&self, tenant: &TenantId) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE tenant_id = ?1")
            .bind(tenant.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn gateway_config(&self, tenant: &TenantId) -> Result<Option<GatewayConfig>> {
        let row = sqlx::query(
            "SELECT base_url, socket_url, api_key, instance_name FROM gateway_configs WHERE tenant_id = ?1",
        )
        .bind(tenant.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| GatewayConfig {
            base_url: r.get::<String, _>("base_url"),
            socket_url: r.get::<Option<String>, _>("socket_url"),
            api_key: r.get::<String, _>("api_key"),
            instance_name: r.get::<String, _>("instance_name"),
        }))
    }

    pub async fn put_gateway_config(&self, tenant: &TenantId, config: &GatewayConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gateway_configs (tenant_id, base_url, socket_url, api_key, instance_name, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(tenant_id) DO UPDATE SET
                base_url = excluded.base_url,
                socket_url = excluded.socket_url,
                api_key = excluded.api_key,
                instance_name = excluded.instance_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant.as_str())
        .bind(config.base_url.as_str())
        .bind(config.socket_url.as_deref())
        .bind(config.api_key.as_str())
        .bind(config.instance_name.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn link_operator(&self, operator: &OperatorId, tenant: &TenantId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO operator_profiles (operator_id, tenant_id) VALUES (?1, ?2)
            ON CONFLICT(operator_id) DO UPDATE SET tenant_id = excluded.tenant_id
            "#,
        )
        .bind(operator.as_str())
        .bind(tenant.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolve_tenant_for_operator(
        &self,
        operator: &OperatorId,
    ) -> Result<Option<TenantId>> {
        let row = sqlx::query("SELECT tenant_id FROM operator_profiles WHERE operator_id = ?1")
            .bind(operator.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| TenantId(r.get::<String, _>(0))))
    }

    pub fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusRowChange> {
        self.status_changes.subscribe()
    }

    async fn publish_status_change(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()> {
        if self.status_changes.receiver_count() == 0 {
            return Ok(());
        }
        if let Some(record) = self.load_status_record(tenant, key).await? {
            // No live subscribers is not an error.
            let _ = self.status_changes.send(StatusRowChange {
                record,
                writer: self.writer.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for Storage {
    async fn save_message(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        contact_name: Option<&str>,
        message: &Message,
    ) -> Result<SaveOutcome> {
        Storage::save_message(self, tenant, key, contact_name, message).await
    }

    async fn update_conversation_status(&self, update: &StatusUpdate) -> Result<()> {
        Storage::update_conversation_status(self, update).await
    }

    async fn set_status_tag(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        status: StatusTag,
    ) -> Result<()> {
        Storage::set_status_tag(self, tenant, key, status).await
    }

    async fn mark_closed(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()> {
        Storage::mark_closed(self, tenant, key).await
    }

    async fn reset_unread(&self, tenant: &TenantId, key: &ConversationKey) -> Result<()> {
        Storage::reset_unread(self, tenant, key).await
    }

    async fn save_scroll_position(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        position: i64,
    ) -> Result<()> {
        Storage::save_scroll_position(self, tenant, key, position).await
    }

    async fn update_avatar_url(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        avatar_url: &str,
    ) -> Result<()> {
        Storage::update_avatar_url(self, tenant, key, avatar_url).await
    }

    async fn load_status_records(&self, tenant: &TenantId) -> Result<Vec<ConversationStatusRecord>> {
        Storage::load_status_records(self, tenant).await
    }

    async fn list_messages(
        &self,
        tenant: &TenantId,
        key: &ConversationKey,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        Storage::list_messages(self, tenant, key, limit).await
    }

    fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusRowChange> {
        Storage::subscribe_status_changes(self)
    }

    fn writer(&self) -> Option<&str> {
        self.writer.as_deref()
    }
}

const STATUS_COLUMNS: &str = "SELECT tenant_id, phone, conversation_key, contact_name, status, is_open, unread_count, last_message, last_message_at_ms, sector, scroll_position, avatar_url, created_at, updated_at FROM conversation_status";

fn status_record_from_row(r: &SqliteRow) -> Result<ConversationStatusRecord> {
    let phone = r.get::<String, _>("phone");
    let stored_key = r.get::<String, _>("conversation_key");
    let conversation_key = ConversationKey::from_address(&stored_key)
        .or_else(|| ConversationKey::from_address(&phone))
        .with_context(|| format!("status row has no usable conversation key: '{stored_key}'"))?;

    let raw_status = r.get::<String, _>("status");
    let status = raw_status.parse::<StatusTag>().unwrap_or_else(|err| {
        warn!(phone = %phone, error = %err, "storage: unknown status label, treating as waiting");
        StatusTag::default()
    });

    Ok(ConversationStatusRecord {
        tenant_id: TenantId(r.get::<String, _>("tenant_id")),
        phone,
        conversation_key,
        contact_name: r.get::<Option<String>, _>("contact_name"),
        status,
        is_open: r.get::<bool, _>("is_open"),
        unread_count: u32::try_from(r.get::<i64, _>("unread_count")).unwrap_or_default(),
        last_message: r.get::<Option<String>, _>("last_message"),
        last_message_at: r
            .get::<Option<i64>, _>("last_message_at_ms")
            .and_then(DateTime::from_timestamp_millis),
        sector: r.get::<Option<String>, _>("sector"),
        scroll_position: r.get::<Option<i64>, _>("scroll_position"),
        avatar_url: r.get::<Option<String>, _>("avatar_url"),
        created_at: r.get::<DateTime<Utc>, _>("created_at"),
        updated_at: r.get::<DateTime<Utc>, _>("updated_at"),
    })
}

fn stored_message_from_row(r: &SqliteRow) -> Result<StoredMessage> {
    let stored_key = r.get::<String, _>("conversation_key");
    let conversation_key = ConversationKey::from_address(&stored_key)
        .with_context(|| format!("message row has unusable conversation key '{stored_key}'"))?;
    let timestamp_ms = r.get::<i64, _>("timestamp_ms");
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
        .with_context(|| format!("message timestamp out of range: {timestamp_ms}"))?;

    let audio = r
        .get::<Option<bool>, _>("audio_push_to_talk")
        .map(|push_to_talk| AudioMetadata {
            duration_seconds: r
                .get::<Option<i64>, _>("audio_duration_seconds")
                .and_then(|secs| u32::try_from(secs).ok()),
            push_to_talk,
            media_url: r.get::<Option<String>, _>("audio_media_url"),
            mime_type: r.get::<Option<String>, _>("audio_mime_type"),
        });

    let content = r.get::<String, _>("content");
    let kind = r.get::<String, _>("message_type");
    Ok(StoredMessage {
        conversation_key,
        contact_name: r.get::<Option<String>, _>("contact_name"),
        message: Message {
            id: MessageId(r.get::<String, _>("message_id")),
            sender: SenderRole::from_me(r.get::<bool, _>("from_me")),
            body: MessageBody::from_stored(&kind, &content, audio),
            timestamp,
            instance: r.get::<Option<String>, _>("instance_name"),
        },
    })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
