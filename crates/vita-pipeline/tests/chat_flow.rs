//! Streaming chat scenarios: conversation bootstrap, persistence ordering,
//! disconnect handling.

mod common;

use common::{build_env, FakeProvider};
use vita_pipeline::chat::service::ChatFrame;
use vita_pipeline::FeedInput;

#[tokio::test]
async fn new_conversation_streams_and_persists_once() {
    let env = build_env(FakeProvider::default());
    let mut handle = env
        .chat
        .stream_message("how was my week?", None)
        .await
        .unwrap();
    assert!(handle.is_new);
    assert_eq!(handle.title, "how was my week?");
    assert!(handle.title.chars().count() <= 31);

    let mut text = String::new();
    let mut done = false;
    while let Some(frame) = handle.frames.recv().await {
        match frame {
            ChatFrame::Delta(t) => text.push_str(&t),
            ChatFrame::Done => done = true,
            ChatFrame::Failed(m) => panic!("stream failed: {m}"),
        }
    }
    assert!(done);
    assert_eq!(text, "Your week was good.");

    // Exactly one user and one assistant message in the new conversation.
    assert_eq!(
        env.chat_store
            .count_messages(&handle.conversation_id, Some("user"))
            .unwrap(),
        1
    );
    assert_eq!(
        env.chat_store
            .count_messages(&handle.conversation_id, Some("assistant"))
            .unwrap(),
        1
    );
    let messages = env.chat_store.list_messages(&handle.conversation_id).unwrap();
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].content, "Your week was good.");
}

#[tokio::test]
async fn long_first_message_gets_ellipsized_title() {
    let env = build_env(FakeProvider::default());
    let long = "please give me a very detailed breakdown of my sleep quality this month";
    let handle = env.chat.stream_message(long, None).await.unwrap();
    assert_eq!(handle.title.chars().count(), 31);
    assert!(handle.title.ends_with('…'));
}

#[tokio::test]
async fn existing_conversation_is_reused() {
    let env = build_env(FakeProvider::default());
    let first = env.chat.stream_message("hello", None).await.unwrap();
    drain(first.frames).await;

    let second = env
        .chat
        .stream_message("and my sleep?", Some(&first.conversation_id))
        .await
        .unwrap();
    assert!(!second.is_new);
    assert_eq!(second.conversation_id, first.conversation_id);
    drain(second.frames).await;

    assert_eq!(
        env.chat_store
            .count_messages(&first.conversation_id, None)
            .unwrap(),
        4
    );
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let env = build_env(FakeProvider::default());
    assert!(env
        .chat
        .stream_message("hi", Some("no-such-conversation"))
        .await
        .is_err());
    assert!(env.chat.stream_message("   ", None).await.is_err());
}

#[tokio::test]
async fn dropped_receiver_still_persists_accumulator() {
    let env = build_env(FakeProvider::default());
    let mut handle = env
        .chat
        .stream_message("how was my week?", None)
        .await
        .unwrap();

    // Take one token, then hang up like a disconnecting client.
    let first = handle.frames.recv().await;
    assert!(matches!(first, Some(ChatFrame::Delta(_))));
    drop(handle.frames);

    // The producer finishes in the background and persists the full reply.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        let n = env
            .chat_store
            .count_messages(&handle.conversation_id, Some("assistant"))
            .unwrap();
        if n == 1 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "assistant never persisted");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let messages = env.chat_store.list_messages(&handle.conversation_id).unwrap();
    let assistant = messages.iter().find(|m| m.role == "assistant").unwrap();
    assert!(!assistant.content.is_empty());
}

#[tokio::test]
async fn chat_uses_ingested_context() {
    let env = build_env(FakeProvider::default());
    env.pipeline
        .run(FeedInput {
            text: Some("just walked 5 km".into()),
            image_bytes: None,
            category_hint: None,
            client_time: Some("2026-02-05T10:00:00+08:00".into()),
        })
        .await
        .unwrap();

    let reply = env.chat.chat_once("how was my week?", &[]).await.unwrap();
    assert_eq!(reply, "Your week looked balanced.");
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<ChatFrame>) {
    while rx.recv().await.is_some() {}
}
