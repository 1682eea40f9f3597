//! 会话服务单元测试
//!
//! 覆盖单聊去重、群组创建、会话列表以及创建后加入房间。

use domain::{ChatKind, DomainError, MessageType, UserId};

use crate::error::ApplicationError;
use crate::events::ServerEvent;
use crate::services::test_support::{drain, names, Harness};
use crate::services::{CreateChatRequest, DeleteMessageRequest, SendMessageRequest};

fn text(sender_id: UserId, chat_id: domain::ChatId, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id,
        chat_id,
        content: content.into(),
        message_type: MessageType::Text,
        reply_to: None,
        attachments: Vec::new(),
        encryption_data: None,
    }
}

#[tokio::test]
async fn direct_chat_is_deduplicated_in_both_directions() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;
    let bob = h.user("+15550002").await;

    let first = h.direct(alice.id, bob.id).await;
    let second = h.direct(bob.id, alice.id).await;

    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, ChatKind::Direct);
    assert_eq!(h.repos.chats.list_for_user(alice.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn direct_chat_needs_exactly_one_other_participant() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;

    let with_self = h
        .services
        .chats
        .create_chat(CreateChatRequest {
            requester: alice.id,
            kind: ChatKind::Direct,
            name: None,
            participants: vec![alice.id],
        })
        .await;
    assert!(matches!(
        with_self,
        Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
    ));

    let with_two = h
        .services
        .chats
        .create_chat(CreateChatRequest {
            requester: alice.id,
            kind: ChatKind::Direct,
            name: None,
            participants: vec![UserId::generate(), UserId::generate()],
        })
        .await;
    assert!(matches!(
        with_two,
        Err(ApplicationError::Domain(DomainError::InvalidArgument { .. }))
    ));
}

#[tokio::test]
async fn direct_chat_with_unknown_user_is_not_found() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;

    let result = h
        .services
        .chats
        .create_chat(CreateChatRequest {
            requester: alice.id,
            kind: ChatKind::Direct,
            name: None,
            participants: vec![UserId::generate()],
        })
        .await;

    assert!(matches!(
        result,
        Err(ApplicationError::Domain(DomainError::NotFound { .. }))
    ));
    assert!(h.repos.chats.list_for_user(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn group_creator_becomes_owner_and_admin() {
    let h = Harness::new();
    let owner = h.user("+15550001").await;
    let member = h.user("+15550002").await;

    let chat = h.group(owner.id, &[member.id, owner.id]).await;

    assert_eq!(chat.participants, vec![owner.id, member.id]);
    assert_eq!(chat.admins, vec![owner.id]);
    assert_eq!(chat.owner_id, Some(owner.id));
    let link = chat.invite_link.expect("groups carry an invite link");
    assert!(link.starts_with("wa://"));
    assert!(link.len() > "wa://".len() + 8);
}

#[tokio::test]
async fn list_chats_embeds_latest_undeleted_message() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;
    let bob = h.user("+15550002").await;
    let chat = h.direct(alice.id, bob.id).await;

    let first = h.services.messages.send(text(alice.id, chat.id, "first")).await.unwrap();
    let second = h.services.messages.send(text(alice.id, chat.id, "second")).await.unwrap();
    h.services
        .messages
        .delete(DeleteMessageRequest {
            requester_id: alice.id,
            message_id: second.id,
            for_everyone: true,
        })
        .await
        .unwrap();

    let summaries = h.services.chats.list_chats(bob.id).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].chat.id, chat.id);
    assert_eq!(
        summaries[0].last_message.as_ref().map(|m| m.id),
        Some(first.id)
    );
}

#[tokio::test]
async fn participants_already_online_join_the_new_room() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;
    let bob = h.user("+15550002").await;
    let (alice_conn, mut alice_rx) = h.online(alice.id).await;
    let (bob_conn, mut bob_rx) = h.online(bob.id).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let chat = h.direct(alice.id, bob.id).await;
    assert!(h.presence.is_in_room(alice_conn, chat.id).await);
    assert!(h.presence.is_in_room(bob_conn, chat.id).await);

    let sent = h.services.messages.send(text(alice.id, chat.id, "hi")).await.unwrap();
    let events = drain(&mut bob_rx);
    assert_eq!(events, vec![ServerEvent::NewMessage(sent)]);
    assert_eq!(names(&drain(&mut alice_rx)), vec!["new_message"]);
}

#[tokio::test]
async fn get_chat_is_limited_to_participants() {
    let h = Harness::new();
    let alice = h.user("+15550001").await;
    let bob = h.user("+15550002").await;
    let eve = h.user("+15550003").await;
    let chat = h.direct(alice.id, bob.id).await;

    assert_eq!(h.services.chats.get_chat(bob.id, chat.id).await.unwrap().id, chat.id);
    assert!(matches!(
        h.services.chats.get_chat(eve.id, chat.id).await,
        Err(ApplicationError::Domain(DomainError::PermissionDenied { .. }))
    ));
    assert!(matches!(
        h.services.chats.get_chat(alice.id, domain::ChatId::generate()).await,
        Err(ApplicationError::Domain(DomainError::NotFound { .. }))
    ));
}
