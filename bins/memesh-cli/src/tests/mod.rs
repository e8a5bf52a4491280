use super::*;
use memesh_core::backend::InMemoryBackend;
use memesh_core::config::CoreConfig;
use memesh_core::transport::MockConnector;


pub(super) async fn offline_client() -> (Client, InMemoryBackend) {
    let backend = InMemoryBackend::new();
    backend.add_account("alice-key", "alice").await;
    backend.add_account("bob-key", "bob").await;
    let client = Client::new(
        CoreConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(MockConnector::with_auto_ack()),
    );
    (client, backend)
}

#[tokio::test]
async fn login_open_and_send_through_commands() {
    let (client, backend) = offline_client().await;
    let mut roster = Vec::new();
    run_command(&client, &mut roster, Command::Login("alice-key".to_string()))
        .await
        .unwrap();
    run_command(&client, &mut roster, Command::Open(Target::Peer("BOB".to_string())))
        .await
        .unwrap();
    assert_eq!(client.active_conversation(), Some(Conversation::private("u-bob")));
    assert_eq!(roster.len(), 1);

    run_command(&client, &mut roster, Command::Send("hello".to_string()))
        .await
        .unwrap();
    assert_eq!(backend.send_calls().await, 1);
    assert_eq!(client.messages()[0].text(), Some("hello"));

    run_command(&client, &mut roster, Command::Logout).await.unwrap();
    assert!(client.current_identity().is_none());
    assert!(roster.is_empty());
}

#[tokio::test]
async fn unknown_peer_is_reported() {
    let (client, _) = offline_client().await;
    let mut roster = Vec::new();
    run_command(&client, &mut roster, Command::Login("alice-key".to_string()))
        .await
        .unwrap();
    let err = run_command(&client, &mut roster, Command::Open(Target::Peer("mallory".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::UnknownPeer(ref needle) if needle == "mallory"));
}

#[tokio::test]
async fn commands_before_login_surface_core_errors() {
    let (client, _) = offline_client().await;
    let mut roster = Vec::new();
    let err = run_command(&client, &mut roster, Command::Peers {
        online_only: false,
        query: String::new(),
    })
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::Core(CoreError::NotAuthenticated)));
    let err = run_command(&client, &mut roster, Command::Login("wrong".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::Core(CoreError::InvalidCredential)));
}

#[test]
fn labels_show_display_name_when_it_differs() {
    let mut identity = Identity {
        id: memesh_api::UserId::new("u1"),
        public_label: "anon-1".to_string(),
        display_name: "anon-1".to_string(),
        avatar_ref: None,
        created_at: None,
    };
    assert_eq!(label(&identity), "anon-1");
    identity.display_name = "Night Owl".to_string();
    assert_eq!(label(&identity), "Night Owl (anon-1)");
}
