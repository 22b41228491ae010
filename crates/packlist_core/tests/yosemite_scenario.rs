use packlist_core::{
    AcceptanceStatus, CoreConfig, EntityId, EntityKind, InMemoryRemote, Permission,
    PersistenceController, RemoteServer, Scope, UserIdentity,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Device = PersistenceController<InMemoryRemote>;

fn identity(value: &str) -> UserIdentity {
    UserIdentity::parse(value).expect("valid identity")
}

async fn device(server: &RemoteServer, user: &str) -> Device {
    let config = CoreConfig::in_memory(identity(user));
    let remote = Arc::new(server.client(identity(user)));
    PersistenceController::start(config, remote)
        .await
        .expect("controller starts")
}

async fn assert_share_state_consistent(device: &Device, id: EntityId) {
    let shared = device.is_shared(id).await;
    let grant = device.fetch_share(id).await.expect("fetch share");
    assert_eq!(shared, grant.is_some());
}

#[tokio::test]
async fn yosemite_trip_round_trip() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    bob.on_remote_change(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let accepted_roots = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&accepted_roots);
    bob.on_invitation_accepted(move |root| {
        sink.lock().expect("lock").push(root);
    });

    // Ada plans the trip privately.
    let mut tx = ada.begin();
    let list = tx.insert_root(EntityKind::PackingList, [("title", "Yosemite Trip")]);
    let gear = tx.insert_child(list, EntityKind::Category, [("name", "Gear")]);
    let tent = tx.insert_child(gear, EntityKind::Item, [("name", "Tent")]);
    ada.save(tx).expect("save trip");
    ada.sync().await.expect("ada sync");
    assert_eq!(ada.stores().store_for(tent).expect("route"), Some(Scope::Private));
    assert_share_state_consistent(&ada, list).await;

    // Sharing moves the whole aggregate.
    let grant = ada.create_share(list).await.expect("create share");
    ada.sync().await.expect("ada sync");
    for id in [list, gear, tent] {
        assert_eq!(ada.stores().store_for(id).expect("route"), Some(Scope::Shared));
    }
    assert_share_state_consistent(&ada, list).await;

    let grant = ada
        .add_participant(&grant, bob.current_user(), Permission::ReadWrite)
        .await
        .expect("invite bob");
    let payload = grant
        .invitation_for(bob.current_user())
        .expect("bob invited")
        .to_json()
        .expect("encode invitation");

    bob.accept_invitation_json(&payload)
        .await
        .expect("bob accepts");
    bob.sync().await.expect("bob sync");
    assert_eq!(*accepted_roots.lock().expect("lock"), vec![list]);
    assert!(refreshes.load(Ordering::SeqCst) > 0);

    let seen_by_bob = bob
        .fetch_share(list)
        .await
        .expect("fetch share")
        .expect("bob sees the grant");
    assert_eq!(
        seen_by_bob
            .participant(bob.current_user())
            .map(|p| p.status),
        Some(AcceptanceStatus::Accepted)
    );
    assert_eq!(
        bob.get(tent).expect("read").and_then(|e| e.text("name").map(str::to_owned)),
        Some("Tent".to_string())
    );
    assert!(bob.can_edit(tent).await);
    assert!(!bob.is_owner(list).await);
    assert_share_state_consistent(&bob, list).await;

    // Bob packs a stove; Ada sees it.
    let mut tx = bob.begin();
    let stove = tx.insert_child(gear, EntityKind::Item, [("name", "Stove")]);
    bob.save(tx).expect("bob adds stove");
    bob.sync().await.expect("bob sync");
    ada.sync().await.expect("ada sync");
    let names: Vec<String> = ada
        .stores()
        .children(gear)
        .expect("children")
        .iter()
        .filter_map(|entity| entity.text("name").map(str::to_owned))
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"Stove".to_string()));

    // Ada stops sharing; Bob loses access, Ada keeps everything.
    ada.delete_share(&grant).await.expect("stop sharing");
    ada.sync().await.expect("ada sync");
    bob.sync().await.expect("bob sync");

    assert!(bob.lists().expect("bob lists").is_empty());
    assert!(bob.get(stove).expect("read").is_none());
    assert!(!bob.is_shared(list).await);
    assert!(bob.fetch_share(list).await.expect("fetch share").is_none());
    assert_share_state_consistent(&bob, list).await;

    let lists = ada.lists().expect("ada lists");
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].0, Scope::Private);
    assert_eq!(lists[0].1.text("title"), Some("Yosemite Trip"));
    for id in [list, gear, tent, stove] {
        assert_eq!(ada.stores().store_for(id).expect("route"), Some(Scope::Private));
    }
    assert_share_state_consistent(&ada, list).await;
    assert!(server.share_for(list).await.is_none());
}
