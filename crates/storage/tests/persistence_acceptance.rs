use chrono::{TimeZone, Utc};
use shared::domain::{
    ConversationKey, Message, MessageBody, MessageId, SenderRole, StatusTag, TenantId,
};
use storage::{SaveOutcome, StatusUpdate, Storage};

#[tokio::test]
async fn operator_status_survives_reopen_of_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!(
        "sqlite://{}",
        dir.path()
            .join("console.db")
            .to_string_lossy()
            .replace('\\', "/")
    );
    let tenant = TenantId::from("tenant-a");
    let contact = ConversationKey::from_address("5511999990000@c.us").expect("key");
    let timestamp = Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts");

    {
        let storage = Storage::new(&database_url).await.expect("db");
        let message = Message {
            id: MessageId::from("3EB0A1"),
            sender: SenderRole::Counterparty,
            body: MessageBody::text("Hi"),
            timestamp,
            instance: None,
        };
        let outcome = storage
            .save_message(&tenant, &contact, Some("Maria"), &message)
            .await
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Inserted);
        storage
            .update_conversation_status(&StatusUpdate {
                tenant: tenant.clone(),
                key: contact.clone(),
                contact_name: Some("Maria".into()),
                preview: "Hi".into(),
                timestamp,
                is_self: false,
                is_selected: false,
                sector: None,
            })
            .await
            .expect("status");
        storage
            .set_status_tag(&tenant, &contact, StatusTag::Pending)
            .await
            .expect("tag");
    }

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let records = reopened.load_status_records(&tenant).await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StatusTag::Pending);
    assert_eq!(records[0].unread_count, 1);
    assert_eq!(records[0].contact_name.as_deref(), Some("Maria"));
    assert_eq!(records[0].conversation_key, contact);
}
