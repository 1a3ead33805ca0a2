//! Persistence tests - verify data survives database closure and reopening

use chrono::Utc;
use chatsuite_core::Database;
use chatsuite_core::models::{Chat, Message, MessageContent, MessageRole};
use chatsuite_core::parts::Part;
use uuid::Uuid;

fn temp_db_path() -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    let filename = format!("chatsuite-persistence-test-{}.db", Uuid::new_v4());
    path.push(filename);
    path
}

#[tokio::test]
async fn credits_persist_across_reopen() {
    let db_path = temp_db_path();

    // Phase 1: Create and charge
    let (user_id, token) = {
        let db = Database::open(&db_path).await.expect("open db");
        let (profile, token) = db.create_profile(Some("a@example.com"), 3).await.expect("create");
        db.try_consume_credits(&profile.id, 1).await.expect("consume");
        db.close().await;
        (profile.id, token)
    };

    // Phase 2: Reopen and verify
    {
        let db = Database::open(&db_path).await.expect("reopen db");
        let profile = db
            .profile_by_token(&token)
            .await
            .expect("lookup")
            .expect("exists");
        assert_eq!(profile.id, user_id);
        assert_eq!(profile.credits, 2);
        assert_eq!(profile.email.as_deref(), Some("a@example.com"));
        db.close().await;
    }
}

#[tokio::test]
async fn conversation_persists_across_reopen() {
    let db_path = temp_db_path();

    let user_id = {
        let db = Database::open(&db_path).await.expect("open db");
        let (profile, _) = db.create_profile(None, 0).await.expect("create");

        db.create_chat(&Chat {
            id: "persist-chat".to_string(),
            user_id: profile.id.clone(),
            title: "Trip notes".to_string(),
            created_at: Utc::now(),
        })
        .await
        .expect("create chat");

        db.insert_messages(&[
            Message {
                id: "m-1".to_string(),
                chat_id: "persist-chat".to_string(),
                role: MessageRole::User,
                content: MessageContent::Text("What should I pack?".to_string()),
                created_at: Utc::now(),
            },
            Message {
                id: "m-2".to_string(),
                chat_id: "persist-chat".to_string(),
                role: MessageRole::Assistant,
                content: MessageContent::Parts(vec![Part::text("Layers and a rain jacket.")]),
                created_at: Utc::now(),
            },
        ])
        .await
        .expect("insert messages");

        db.close().await;
        profile.id
    };

    {
        let db = Database::open(&db_path).await.expect("reopen db");

        let chat = db
            .get_chat("persist-chat")
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(chat.user_id, user_id);
        assert_eq!(chat.title, "Trip notes");

        let messages = db.get_messages("persist-chat").await.expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m-1");
        assert_eq!(messages[0].content.text(), "What should I pack?");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content.text(), "Layers and a rain jacket.");

        db.close().await;
    }
}

#[tokio::test]
async fn reopening_does_not_reset_schema() {
    let db_path = temp_db_path();

    {
        let db = Database::open(&db_path).await.expect("open db");
        db.create_profile(None, 1).await.expect("create");
        db.close().await;
    }

    for _ in 0..2 {
        let db = Database::open(&db_path).await.expect("reopen db");
        assert_eq!(db.list_profiles().await.expect("list").len(), 1);
        db.close().await;
    }
}
