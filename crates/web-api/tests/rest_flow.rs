mod support;

use reqwest::StatusCode;
use serde_json::{json, Value};

use support::TestServer;

#[tokio::test]
async fn registration_is_idempotent_per_phone() {
    let server = TestServer::start().await;

    let device = json!({"device_name": "pixel", "device_type": "android", "public_key": "pk"});
    let first = server
        .client
        .post(server.url("/api/users/register"))
        .json(&json!({"phone_number": "+15550001", "device": device}))
        .send()
        .await
        .expect("register");
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: Value = first.json().await.expect("json");

    let second = server
        .client
        .post(server.url("/api/users/register"))
        .json(&json!({"phone_number": "+15550001", "device": device}))
        .send()
        .await
        .expect("register again");
    assert_eq!(second.status(), StatusCode::OK);
    let second: Value = second.json().await.expect("json");
    assert_eq!(first["user"]["id"], second["user"]["id"]);
    assert_ne!(first["device"]["id"], second["device"]["id"]);
}

#[tokio::test]
async fn requests_without_identity_are_rejected() {
    let server = TestServer::start().await;
    let response = server
        .client
        .get(server.url("/api/chats"))
        .send()
        .await
        .expect("list chats");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn direct_chat_is_deduplicated_in_both_directions() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;
    let bob = server.register("+15550002").await;

    let first = server.create_direct_chat(&alice, &bob).await;
    let again = server.create_direct_chat(&alice, &bob).await;
    let reverse = server.create_direct_chat(&bob, &alice).await;
    assert_eq!(first, again);
    assert_eq!(first, reverse);

    let invalid = server
        .post(&alice, "/api/chats", json!({"type": "direct", "participants": []}))
        .await;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    let body: Value = invalid.json().await.expect("json");
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let ghost = server
        .post(
            &alice,
            "/api/chats",
            json!({"type": "direct", "participants": ["00000000-0000-4000-8000-000000000001"]}),
        )
        .await;
    assert_eq!(ghost.status(), StatusCode::NOT_FOUND);
    let body: Value = ghost.json().await.expect("json");
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn message_lifecycle_over_rest() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;
    let bob = server.register("+15550002").await;
    let carol = server.register("+15550003").await;
    let chat = server.create_direct_chat(&alice, &bob).await;

    let sent = server
        .post(
            &alice,
            "/api/messages",
            json!({"chat_id": chat, "content": "hi", "message_type": "text"}),
        )
        .await;
    assert_eq!(sent.status(), StatusCode::CREATED);
    let sent: Value = sent.json().await.expect("json");
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["sequence"], 1);
    let message_id = sent["id"].as_str().expect("id").to_owned();

    let history: Value = server
        .get(&bob, &format!("/api/chats/{chat}/messages?limit=10"))
        .await
        .json()
        .await
        .expect("history");
    assert_eq!(history.as_array().map(Vec::len), Some(1));
    assert_eq!(history[0]["content"], "hi");

    let outsider = server
        .get(&carol, &format!("/api/chats/{chat}/messages"))
        .await;
    assert_eq!(outsider.status(), StatusCode::FORBIDDEN);

    let foreign_edit = server
        .client
        .patch(server.url(&format!("/api/messages/{message_id}")))
        .header(web_api::USER_ID_HEADER, &bob)
        .json(&json!({"content": "hacked"}))
        .send()
        .await
        .expect("edit");
    assert_eq!(foreign_edit.status(), StatusCode::FORBIDDEN);

    for emoji in ["%F0%9F%91%8D", "%F0%9F%94%A5"] {
        let reacted = server
            .post(
                &bob,
                &format!("/api/messages/{message_id}/react?emoji={emoji}"),
                json!({}),
            )
            .await;
        assert_eq!(reacted.status(), StatusCode::OK);
    }
    let reacted: Value = server
        .get(&alice, &format!("/api/chats/{chat}/messages"))
        .await
        .json()
        .await
        .expect("history");
    assert_eq!(reacted[0]["reactions"].as_array().map(Vec::len), Some(1));
    assert_eq!(reacted[0]["reactions"][0]["emoji"], "🔥");

    let not_sender = server
        .client
        .delete(server.url(&format!(
            "/api/messages/{message_id}?delete_for_everyone=true"
        )))
        .header(web_api::USER_ID_HEADER, &bob)
        .send()
        .await
        .expect("delete");
    assert_eq!(not_sender.status(), StatusCode::FORBIDDEN);

    let deleted = server
        .client
        .delete(server.url(&format!(
            "/api/messages/{message_id}?delete_for_everyone"
        )))
        .header(web_api::USER_ID_HEADER, &alice)
        .send()
        .await
        .expect("delete");
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let after: Value = server
        .get(&bob, &format!("/api/chats/{chat}/messages"))
        .await
        .json()
        .await
        .expect("history");
    assert_eq!(after.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn delete_for_me_hides_only_for_requester() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;
    let bob = server.register("+15550002").await;
    let chat = server.create_direct_chat(&alice, &bob).await;

    let sent: Value = server
        .post(&alice, "/api/messages", json!({"chat_id": chat, "content": "hello"}))
        .await
        .json()
        .await
        .expect("json");
    let message_id = sent["id"].as_str().expect("id");

    let hidden = server
        .client
        .delete(server.url(&format!("/api/messages/{message_id}")))
        .header(web_api::USER_ID_HEADER, &bob)
        .send()
        .await
        .expect("delete for me");
    assert_eq!(hidden.status(), StatusCode::NO_CONTENT);

    let for_bob: Value = server
        .get(&bob, &format!("/api/chats/{chat}/messages"))
        .await
        .json()
        .await
        .expect("json");
    let for_alice: Value = server
        .get(&alice, &format!("/api/chats/{chat}/messages"))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(for_bob.as_array().map(Vec::len), Some(0));
    assert_eq!(for_alice.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn chat_list_embeds_last_message() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;
    let bob = server.register("+15550002").await;
    let chat = server.create_direct_chat(&alice, &bob).await;
    server
        .post(&alice, "/api/messages", json!({"chat_id": chat, "content": "latest"}))
        .await;

    let chats: Value = server
        .get(&bob, "/api/chats")
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(chats[0]["id"], chat.as_str());
    assert_eq!(chats[0]["type"], "direct");
    assert_eq!(chats[0]["last_message"]["content"], "latest");
}

#[tokio::test]
async fn profile_updates_reject_unknown_fields() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;

    let updated = server
        .client
        .patch(server.url("/api/users/me"))
        .header(web_api::USER_ID_HEADER, &alice)
        .json(&json!({"about": "Busy", "display_name": "Alice"}))
        .send()
        .await
        .expect("patch");
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: Value = updated.json().await.expect("json");
    assert_eq!(updated["about"], "Busy");

    let rejected = server
        .client
        .patch(server.url("/api/users/me"))
        .header(web_api::USER_ID_HEADER, &alice)
        .json(&json!({"phone_number": "+19990000"}))
        .send()
        .await
        .expect("patch");
    assert!(rejected.status().is_client_error());

    let found: Value = server
        .get(&alice, "/api/users/search?query=alice")
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(found[0]["id"], alice.as_str());
}

#[tokio::test]
async fn status_feed_follows_contacts() {
    let server = TestServer::start().await;
    let poster = server.register("+15550001").await;
    let friend = server.register("+15550002").await;
    let stranger = server.register("+15550003").await;

    let added = server
        .post(&friend, "/api/contacts", json!({"phone_number": "+15550001"}))
        .await;
    assert_eq!(added.status(), StatusCode::CREATED);

    let status: Value = server
        .post(
            &poster,
            "/api/status",
            json!({"content_type": "text", "content": "at the beach"}),
        )
        .await
        .json()
        .await
        .expect("json");
    let status_id = status["id"].as_str().expect("id");

    let feed: Value = server.get(&friend, "/api/status").await.json().await.expect("json");
    assert_eq!(feed[0]["id"], status_id);
    let empty: Value = server.get(&stranger, "/api/status").await.json().await.expect("json");
    assert_eq!(empty.as_array().map(Vec::len), Some(0));

    let viewed: Value = server
        .post(&friend, &format!("/api/status/{status_id}/view"), json!({}))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(viewed["viewers"], json!([friend]));

    let hidden = server
        .post(&stranger, &format!("/api/status/{status_id}/view"), json!({}))
        .await;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn call_can_be_answered_and_ended() {
    let server = TestServer::start().await;
    let alice = server.register("+15550001").await;
    let bob = server.register("+15550002").await;
    let chat = server.create_direct_chat(&alice, &bob).await;

    let call = server
        .post(&alice, "/api/calls", json!({"chat_id": chat, "call_type": "video"}))
        .await;
    assert_eq!(call.status(), StatusCode::CREATED);
    let call: Value = call.json().await.expect("json");
    assert_eq!(call["status"], "ringing");
    let call_id = call["id"].as_str().expect("id");

    let answered: Value = server
        .post(&bob, &format!("/api/calls/{call_id}/answer"), json!({}))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(answered["status"], "ongoing");

    let ended: Value = server
        .post(&alice, &format!("/api/calls/{call_id}/end"), json!({}))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(ended["status"], "ended");

    let again = server
        .post(&alice, &format!("/api/calls/{call_id}/end"), json!({}))
        .await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    let body: Value = again.json().await.expect("json");
    assert_eq!(body["code"], "FAILED_PRECONDITION");
}
