// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store tests.
//!
//! Require `TEST_ZAPGATE_DATABASE_URL`; skipped otherwise.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use zapgate_core::store::{DeviceStore, EventLogEntry, MessageRecord, PostgresStore, UpsertDevice};
use zapgate_core::webhook::WebhookRule;

macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_ZAPGATE_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_ZAPGATE_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_test_store() -> Option<PostgresStore> {
    let database_url = std::env::var("TEST_ZAPGATE_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    let store = PostgresStore::new(pool);
    store.migrate().await.ok()?;
    Some(store)
}

async fn cleanup(store: &PostgresStore, tenant_id: &str) {
    for table in ["devices", "device_webhooks", "messages"] {
        sqlx::query(&format!("DELETE FROM {} WHERE tenant_id = $1", table))
            .bind(tenant_id)
            .execute(store.pool())
            .await
            .ok();
    }
}

fn tenant() -> String {
    format!("test-{}", Uuid::new_v4())
}

#[tokio::test]
async fn test_device_upsert_soft_delete_and_revive() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };
    let tenant_id = tenant();

    let created = store
        .upsert_device(&UpsertDevice {
            tenant_id: tenant_id.clone(),
            number: "5511999990001".into(),
            container_id: Some("c1".into()),
            endpoint: Some("http://127.0.0.1:40000".into()),
            version: Some("1.0".into()),
        })
        .await
        .unwrap();
    assert!(!created.connected);

    assert!(store.soft_delete_device(&tenant_id, "5511999990001").await.unwrap());
    assert!(store.get_device(&tenant_id, "5511999990001").await.unwrap().is_none());
    let deleted = store.get_device_by_id(created.id).await.unwrap().unwrap();
    assert!(deleted.deleted_at.is_some());

    let revived = store
        .upsert_device(&UpsertDevice {
            tenant_id: tenant_id.clone(),
            number: "5511999990001".into(),
            version: Some("1.1".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(revived.id, created.id);
    assert_eq!(revived.container_id.as_deref(), Some("c1"));
    assert_eq!(revived.version.as_deref(), Some("1.1"));
    assert!(revived.deleted_at.is_none());

    cleanup(&store, &tenant_id).await;
}

#[tokio::test]
async fn test_session_blob_survives_disconnect() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };
    let tenant_id = tenant();

    let device = store
        .upsert_device(&UpsertDevice {
            tenant_id: tenant_id.clone(),
            number: "5511999990002".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    store
        .update_session(device.id, Some(&b"paired"[..]), true)
        .await
        .unwrap();
    store.set_connected(device.id, false).await.unwrap();

    let record = store
        .get_device(&tenant_id, "5511999990002")
        .await
        .unwrap()
        .unwrap();
    assert!(!record.connected);
    assert_eq!(record.session.as_deref(), Some(&b"paired"[..]));

    cleanup(&store, &tenant_id).await;
}

#[tokio::test]
async fn test_webhooks_are_deduplicated() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };
    let tenant_id = tenant();
    let rule = WebhookRule {
        phrase: "oi".into(),
        callback_url: "http://crm.local/hook".into(),
        method: "POST".into(),
        body: String::new(),
        number: "5511999990003".into(),
    };

    assert!(store.insert_webhook(&tenant_id, "5511999990003", &rule).await.unwrap());
    assert!(!store.insert_webhook(&tenant_id, "5511999990003", &rule).await.unwrap());
    assert_eq!(
        store.list_webhooks(&tenant_id, "5511999990003").await.unwrap(),
        vec![rule.clone()]
    );

    assert!(store.delete_webhook(&tenant_id, "5511999990003", &rule).await.unwrap());
    assert!(store.list_webhooks(&tenant_id, "5511999990003").await.unwrap().is_empty());
    // Re-adding after delete is allowed.
    assert!(store.insert_webhook(&tenant_id, "5511999990003", &rule).await.unwrap());

    cleanup(&store, &tenant_id).await;
}

#[tokio::test]
async fn test_messages_and_event_logs() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };
    let tenant_id = tenant();

    for (recipient, status) in [("a", "sent"), ("b", "failed")] {
        store
            .record_message(&MessageRecord {
                id: None,
                tenant_id: tenant_id.clone(),
                device_number: "5511999990004".into(),
                recipient: recipient.into(),
                body: "hello".into(),
                status: status.into(),
                error: None,
                message_id: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    let messages = store
        .list_messages(&tenant_id, "5511999990004", 10)
        .await
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].recipient, "b");

    let number = format!("log-{}", Uuid::new_v4());
    store
        .insert_event_log(&EventLogEntry {
            id: None,
            number: Some(number.clone()),
            ip: "10.0.0.1".into(),
            method: "POST".into(),
            endpoint: "/create".into(),
            user_agent: "test".into(),
            status_code: 201,
            request_body: Some("{}".into()),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    let logs = store.list_event_logs(Some(&number), 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status_code, 201);

    sqlx::query("DELETE FROM event_logs WHERE number = $1")
        .bind(&number)
        .execute(store.pool())
        .await
        .ok();
    cleanup(&store, &tenant_id).await;
}
