use super::{flush, ids, message, next_matching, signed_in, user, wait_for};
use crate::error::CoreError;
use crate::event::ClientEvent;
use crate::sync::SyncPhase;
use crate::transport::ChannelEvent;
use memesh_api::{Conversation, Draft};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn superseded_history_never_reaches_the_new_conversation() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("from-bob", "bob", Some("alice"), "hi", 1))
        .await;
    h.backend
        .seed_message(message("from-carol", "carol", Some("alice"), "yo", 2))
        .await;
    let bob = Conversation::Private(user("bob"));
    let gate = h.backend.hold_history(bob.clone());

    let client = h.client.clone();
    let slow = tokio::spawn({
        let bob = bob.clone();
        async move { client.activate(bob).await }
    });
    let client = h.client.clone();
    assert!(wait_for(|| client.active_conversation() == Some(bob.clone())).await);

    let count = h
        .client
        .activate(Conversation::Private(user("carol")))
        .await
        .expect("activate carol");
    assert_eq!(count, 1);

    gate.release();
    let stale = slow.await.expect("join");
    assert_eq!(stale, Err(CoreError::Superseded));
    assert_eq!(ids(&h.client.messages()), vec!["from-carol"]);
    assert_eq!(
        h.client.active_conversation(),
        Some(Conversation::Private(user("carol")))
    );
}

#[tokio::test]
async fn live_message_during_fetch_is_merged_in_order() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("m1", "bob", Some("alice"), "one", 1))
        .await;
    h.backend
        .seed_message(message("m3", "alice", Some("bob"), "three", 3))
        .await;
    let bob = Conversation::Private(user("bob"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = h.client.on_message(bob.clone(), move |m| {
        sink.lock().unwrap().push(m.id.value.clone());
    });
    let gate = h.backend.hold_history(bob.clone());

    let client = h.client.clone();
    let loading = tokio::spawn({
        let bob = bob.clone();
        async move { client.activate(bob).await }
    });
    let client = h.client.clone();
    assert!(wait_for(|| client.sync_phase() == SyncPhase::Loading).await);

    assert!(
        h.connector
            .push(ChannelEvent::NewMessage(message("m2", "bob", Some("alice"), "two", 2)))
            .await
    );
    flush(&h).await;
    assert!(h.client.messages().is_empty());

    gate.release();
    assert_eq!(loading.await.expect("join"), Ok(3));
    assert_eq!(ids(&h.client.messages()), vec!["m1", "m2", "m3"]);
    assert_eq!(h.client.sync_phase(), SyncPhase::Live);
    assert_eq!(*seen.lock().unwrap(), vec!["m2".to_string()]);
}

#[tokio::test]
async fn buffered_copy_of_a_history_message_is_dropped() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("m1", "bob", Some("alice"), "one", 1))
        .await;
    let bob = Conversation::Private(user("bob"));
    let gate = h.backend.hold_history(bob.clone());
    let client = h.client.clone();
    let loading = tokio::spawn({
        let bob = bob.clone();
        async move { client.activate(bob).await }
    });
    let client = h.client.clone();
    assert!(wait_for(|| client.sync_phase() == SyncPhase::Loading).await);
    h.connector
        .push(ChannelEvent::NewMessage(message("m1", "bob", Some("alice"), "one", 1)))
        .await;
    flush(&h).await;
    gate.release();

    assert_eq!(loading.await.expect("join"), Ok(1));
    assert_eq!(ids(&h.client.messages()), vec!["m1"]);
}

#[tokio::test]
async fn duplicate_live_message_is_applied_once() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate global");
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    let _sub = h.client.on_message(Conversation::Global, move |_| {
        *counter.lock().unwrap() += 1;
    });

    let g1 = message("g1", "bob", None, "hello room", 5);
    h.connector
        .push(ChannelEvent::NewGlobalMessage(g1.clone()))
        .await;
    h.connector.push(ChannelEvent::NewGlobalMessage(g1)).await;
    flush(&h).await;

    assert_eq!(ids(&h.client.messages()), vec!["g1"]);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn history_is_sorted_by_time_then_id() {
    let (h, _) = signed_in("alice").await;
    for m in [
        message("b", "bob", None, "second", 2),
        message("c", "carol", None, "third", 3),
        message("a", "bob", None, "tie", 2),
        message("z", "carol", None, "first", 1),
    ] {
        h.backend.seed_message(m).await;
    }
    let count = h
        .client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    assert_eq!(count, 4);
    assert_eq!(ids(&h.client.messages()), vec!["z", "a", "b", "c"]);
}

#[tokio::test]
async fn late_live_message_is_inserted_at_its_position() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("m5", "bob", None, "five", 5))
        .await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("m9", "bob", None, "nine", 9)))
        .await;
    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("m2", "carol", None, "two", 2)))
        .await;
    flush(&h).await;
    assert_eq!(ids(&h.client.messages()), vec!["m2", "m5", "m9"]);
}

#[tokio::test]
async fn messages_for_other_conversations_are_ignored() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Private(user("bob")))
        .await
        .expect("activate");
    h.connector
        .push(ChannelEvent::NewMessage(message("c1", "carol", Some("alice"), "psst", 1)))
        .await;
    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("g1", "carol", None, "all", 2)))
        .await;
    h.connector
        .push(ChannelEvent::NewMessage(message("b1", "bob", Some("alice"), "hey", 3)))
        .await;
    flush(&h).await;
    assert_eq!(ids(&h.client.messages()), vec!["b1"]);
}

#[tokio::test]
async fn confirmed_send_is_appended_without_calling_handlers() {
    let (h, me) = signed_in("alice").await;
    let bob = Conversation::Private(user("bob"));
    h.client.activate(bob.clone()).await.expect("activate");
    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    let _sub = h.client.on_message(bob.clone(), move |_| {
        *counter.lock().unwrap() += 1;
    });
    let mut rx = h.client.subscribe();

    let sent = h
        .client
        .send(&Draft::text("  hi bob  "))
        .await
        .expect("send");
    assert_eq!(sent.text(), Some("hi bob"));
    assert_eq!(sent.sender_id, me.id);
    assert_eq!(sent.receiver_id, Some(user("bob")));
    assert_eq!(h.client.messages(), vec![sent.clone()]);
    assert_eq!(h.backend.send_calls().await, 1);

    let event = next_matching(&mut rx, |e| matches!(e, ClientEvent::MessageAppended { .. }))
        .await
        .expect("appended event");
    assert_eq!(
        event,
        ClientEvent::MessageAppended {
            conversation: bob,
            message: sent.clone(),
        }
    );

    // The server echoes the message back over the link.
    h.connector.push(ChannelEvent::NewMessage(sent)).await;
    flush(&h).await;
    assert_eq!(h.client.messages().len(), 1);
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn image_only_draft_is_sent() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    let sent = h
        .client
        .send(&Draft::image("https://cdn.example/cat.png"))
        .await
        .expect("send");
    assert_eq!(sent.text(), None);
    assert_eq!(sent.body.image_ref.as_deref(), Some("https://cdn.example/cat.png"));
    assert_eq!(sent.sender_name.as_deref(), Some("alice"));
}

#[tokio::test]
async fn deactivate_keeps_sequence_and_stops_live_updates() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("g1", "bob", None, "old", 1))
        .await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    h.client.deactivate();
    assert_eq!(h.client.sync_phase(), SyncPhase::Detached);

    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("g2", "bob", None, "new", 2)))
        .await;
    flush(&h).await;
    assert_eq!(ids(&h.client.messages()), vec!["g1"]);
}

#[tokio::test]
async fn deactivate_during_fetch_discards_the_result() {
    let (h, _) = signed_in("alice").await;
    h.backend
        .seed_message(message("g1", "bob", None, "old", 1))
        .await;
    let gate = h.backend.hold_history(Conversation::Global);
    let client = h.client.clone();
    let loading = tokio::spawn(async move { client.activate(Conversation::Global).await });
    let client = h.client.clone();
    assert!(wait_for(|| client.sync_phase() == SyncPhase::Loading).await);
    h.client.deactivate();
    gate.release();

    assert_eq!(loading.await.expect("join"), Err(CoreError::Superseded));
    assert!(h.client.messages().is_empty());
    assert_eq!(h.client.sync_phase(), SyncPhase::Detached);
}

#[tokio::test]
async fn failed_fetch_still_applies_buffered_messages() {
    let (h, _) = signed_in("alice").await;
    h.backend.set_fail_history(true).await;
    let gate = h.backend.hold_history(Conversation::Global);
    let client = h.client.clone();
    let loading = tokio::spawn(async move { client.activate(Conversation::Global).await });
    let client = h.client.clone();
    assert!(wait_for(|| client.sync_phase() == SyncPhase::Loading).await);
    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("g7", "bob", None, "live", 7)))
        .await;
    flush(&h).await;
    gate.release();

    let result = loading.await.expect("join");
    assert!(matches!(result, Err(CoreError::Transport(_))));
    assert_eq!(ids(&h.client.messages()), vec!["g7"]);
    assert_eq!(h.client.sync_phase(), SyncPhase::Live);
}

#[tokio::test]
async fn replacing_a_handler_and_cancelling_the_old_handle() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    let seen = Arc::new(Mutex::new(Vec::new()));

    let first = seen.clone();
    let old = h.client.on_message(Conversation::Global, move |m| {
        first.lock().unwrap().push(format!("old:{}", m.id));
    });
    let second = seen.clone();
    let _new = h.client.on_message(Conversation::Global, move |m| {
        second.lock().unwrap().push(format!("new:{}", m.id));
    });
    old.cancel();
    assert_eq!(h.client.sync().handler_count(), 1);

    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("g1", "bob", None, "x", 1)))
        .await;
    flush(&h).await;
    assert_eq!(*seen.lock().unwrap(), vec!["new:g1".to_string()]);
}

#[tokio::test]
async fn panicking_handler_does_not_stop_later_events() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = h.client.on_message(Conversation::Global, move |m| {
        if m.id.value == "boom" {
            panic!("handler failure");
        }
        sink.lock().unwrap().push(m.id.value.clone());
    });

    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("boom", "bob", None, "x", 1)))
        .await;
    h.connector
        .push(ChannelEvent::NewGlobalMessage(message("after", "bob", None, "y", 2)))
        .await;
    flush(&h).await;

    assert_eq!(*seen.lock().unwrap(), vec!["after".to_string()]);
    assert_eq!(ids(&h.client.messages()), vec!["boom", "after"]);
}

#[tokio::test]
async fn messages_missed_while_disconnected_are_recovered() {
    let (h, _) = signed_in("alice").await;
    h.client
        .activate(Conversation::Global)
        .await
        .expect("activate global");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _sub = h.client.on_message(Conversation::Global, move |m| {
        sink.lock().unwrap().push(m.id.value.clone());
    });

    // Posted by bob while alice's link is down, so never pushed to her.
    h.backend
        .seed_message(message("g-missed", "bob", None, "while away", 5))
        .await;
    h.connector.drop_link();

    let client = h.client.clone();
    assert!(wait_for(|| ids(&client.messages()) == vec!["g-missed"]).await);
    assert_eq!(h.client.sync_phase(), SyncPhase::Live);
    assert!(wait_for(|| seen.lock().unwrap().len() == 1).await);
    assert_eq!(*seen.lock().unwrap(), vec!["g-missed".to_string()]);
}

#[tokio::test]
async fn send_confirmed_during_fetch_is_announced_after_reconcile() {
    let (h, _) = signed_in("alice").await;
    let gate = h.backend.hold_history(Conversation::Global);
    let client = h.client.clone();
    let loading = tokio::spawn(async move { client.activate(Conversation::Global).await });
    assert!(wait_for(|| gate.is_entered()).await);

    let mut rx = h.client.subscribe();
    let sent = h.client.send(&Draft::text("early")).await.expect("send");
    assert!(h.client.messages().is_empty());
    gate.release();

    assert_eq!(loading.await.expect("join"), Ok(1));
    assert_eq!(
        next_matching(&mut rx, |e| matches!(e, ClientEvent::MessageAppended { .. })).await,
        Some(ClientEvent::MessageAppended {
            conversation: Conversation::Global,
            message: sent,
        })
    );
}
