use packlist_core::{
    AcceptanceStatus, CoreConfig, EntityId, EntityKind, FieldValue, InMemoryRemote, Permission,
    PersistenceController, RemoteError, RemoteServer, Scope, ShareError, ShareGrant, UserIdentity,
};
use std::sync::Arc;

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

async fn packing_list(device: &mut Device, title: &str) -> (EntityId, EntityId) {
    let mut tx = device.begin();
    let list = tx.insert_root(EntityKind::PackingList, [("title", title)]);
    let item = tx.insert_child(list, EntityKind::Item, [("name", "Tent")]);
    device.save(tx).expect("save list");
    device.sync().await.expect("sync list");
    (list, item)
}

/// Shares `list` with `invitee` and lets the invitee accept and sync.
async fn share_with(
    owner: &mut Device,
    invitee: &mut Device,
    list: EntityId,
    permission: Permission,
) -> ShareGrant {
    let grant = owner.create_share(list).await.expect("create share");
    owner.sync().await.expect("owner sync");
    let grant = owner
        .add_participant(&grant, invitee.current_user(), permission)
        .await
        .expect("invite");
    let invitation = grant
        .invitation_for(invitee.current_user())
        .expect("invitation for invitee");
    invitee
        .accept_invitation(&invitation)
        .await
        .expect("accept invitation");
    invitee.sync().await.expect("invitee sync");
    grant
}

#[tokio::test]
async fn create_share_promotes_the_aggregate_and_returns_an_empty_grant() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;

    let grant = ada.create_share(list).await.expect("create share");
    assert_eq!(&grant.owner, ada.current_user());
    assert!(grant.participants.is_empty());
    assert_eq!(grant.title, "Yosemite Trip");
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Shared));
    assert_eq!(ada.stores().store_for(item).expect("route"), Some(Scope::Shared));

    let fetched = ada
        .fetch_share(list)
        .await
        .expect("fetch share")
        .expect("grant exists");
    assert_eq!(fetched.owner, grant.owner);
    assert!(fetched.participants.is_empty());
    assert!(ada.is_shared(list).await);
    assert!(ada.is_owner(item).await);
}

#[tokio::test]
async fn sharing_twice_fails_and_leaves_the_grant_alone() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (list, _) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = ada.create_share(list).await.expect("create share");

    let err = ada.create_share(list).await.expect_err("second share must fail");
    assert!(matches!(err, ShareError::AlreadyShared(root) if root == list));
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Shared));
    assert_eq!(server.share_for(list).await, Some(grant));
}

#[tokio::test]
async fn only_roots_can_be_shared() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (_, item) = packing_list(&mut ada, "Yosemite Trip").await;

    let err = ada.create_share(item).await.expect_err("items are not roots");
    assert!(matches!(err, ShareError::NotAggregateRoot(id) if id == item));
}

#[tokio::test]
async fn failed_share_creation_keeps_the_aggregate_private() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;

    // The existence check goes through; saving the grant fails.
    server
        .inject_failure_after(1, RemoteError::Network("offline".to_string()))
        .await;
    let err = ada.create_share(list).await.expect_err("remote outage");
    assert!(matches!(err, ShareError::ShareOperation(RemoteError::Network(_))));

    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Private));
    assert!(ada.get(item).expect("read").is_some());
    assert!(ada.fetch_share(list).await.expect("fetch").is_none());
    assert!(server.share_for(list).await.is_none());
}

#[tokio::test]
async fn delete_share_demotes_and_keeps_owner_data() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = ada.create_share(list).await.expect("create share");
    ada.sync().await.expect("sync shared");

    ada.delete_share(&grant).await.expect("stop sharing");
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Private));
    assert!(ada.fetch_share(list).await.expect("fetch").is_none());

    ada.sync().await.expect("sync after unshare");
    let entity = ada.get(list).expect("read").expect("list kept");
    assert_eq!(entity.text("title"), Some("Yosemite Trip"));
    assert!(ada.get(item).expect("read").is_some());
    assert!(!ada.is_shared(list).await);
    assert!(!ada.is_owner(list).await);
}

#[tokio::test]
async fn failed_delete_share_restores_shared_scope() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let (list, _) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = ada.create_share(list).await.expect("create share");

    server.inject_failure(RemoteError::Unavailable).await;
    let err = ada.delete_share(&grant).await.expect_err("outage");
    assert!(matches!(err, ShareError::ShareOperation(RemoteError::Unavailable)));
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Shared));
    assert!(server.share_for(list).await.is_some());
}

#[tokio::test]
async fn add_participant_is_idempotent_and_owner_gated() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, _) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;

    let again = ada
        .add_participant(&grant, &identity("bob@example.com"), Permission::ReadOnly)
        .await
        .expect("re-adding is a no-op");
    let bob_entry = again
        .participant(&identity("bob@example.com"))
        .expect("bob listed");
    assert_eq!(bob_entry.permission, Permission::ReadWrite);
    assert_eq!(again.participants.len(), 1);

    let err = bob
        .add_participant(&grant, &identity("cy@example.com"), Permission::ReadOnly)
        .await
        .expect_err("owner-only policy");
    assert!(matches!(err, ShareError::NotOwner));
}

#[tokio::test]
async fn read_only_participant_cannot_edit_or_delete() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    share_with(&mut ada, &mut bob, list, Permission::ReadOnly).await;

    assert!(bob.is_shared(item).await);
    assert!(!bob.is_owner(item).await);
    assert!(!bob.can_edit(item).await);
    assert!(!bob.can_delete(list).await);
    assert!(ada.can_edit(item).await);
    assert!(ada.can_delete(list).await);

    let (private_list, _) = packing_list(&mut bob, "Bob's errands").await;
    assert!(bob.can_edit(private_list).await);
    assert!(!bob.is_owner(private_list).await);
}

#[tokio::test]
async fn removing_participants_never_deletes_the_grant() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, _) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;

    let err = ada
        .remove_participant(&grant, &grant.owner)
        .await
        .expect_err("owner cannot be removed");
    assert!(matches!(err, ShareError::CannotRemoveOwner));

    let updated = ada
        .remove_participant(&grant, &identity("bob@example.com"))
        .await
        .expect("remove bob");
    assert_eq!(
        updated
            .participant(&identity("bob@example.com"))
            .map(|p| p.status),
        Some(AcceptanceStatus::Removed)
    );
    assert!(server.share_for(list).await.is_some());
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Shared));

    bob.sync().await.expect("bob sync");
    assert!(bob.get(list).expect("read").is_none());
    assert!(bob.lists().expect("lists").is_empty());
    assert!(bob.fetch_share(list).await.expect("fetch").is_none());
    assert!(!bob.is_shared(list).await);
}

#[tokio::test]
async fn participant_delete_share_means_remove_me() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, _) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;
    assert!(bob.get(list).expect("read").is_some());

    bob.delete_share(&grant).await.expect("leave share");
    assert!(bob.get(list).expect("read").is_none());

    let remaining = server.share_for(list).await.expect("grant survives");
    assert_eq!(
        remaining
            .participant(&identity("bob@example.com"))
            .map(|p| p.status),
        Some(AcceptanceStatus::Removed)
    );
    ada.sync().await.expect("ada sync");
    assert_eq!(ada.stores().scope_of_root(list), Some(Scope::Shared));
}

#[tokio::test]
async fn participant_edits_reach_the_owner() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;

    let mut tx = bob.begin();
    tx.set_field(item, "packed", true);
    let canister = tx.insert_child(list, EntityKind::Item, [("name", "Bear canister")]);
    bob.save(tx).expect("bob edits");
    assert_eq!(bob.stores().store_for(canister).expect("route"), Some(Scope::Shared));
    bob.sync().await.expect("bob sync");

    ada.sync().await.expect("ada sync");
    let tent = ada.get(item).expect("read").expect("tent present");
    assert_eq!(tent.field("packed"), Some(&FieldValue::Bool(true)));
    assert!(ada.get(canister).expect("read").is_some());
}

#[tokio::test]
async fn deleting_a_shared_root_removes_it_everywhere() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;

    let mut tx = bob.begin();
    tx.delete(list);
    bob.save(tx).expect("bob deletes list");
    bob.sync().await.expect("bob sync");
    ada.sync().await.expect("ada sync");

    assert!(ada.get(list).expect("read").is_none());
    assert!(ada.get(item).expect("read").is_none());
    assert!(server.share_for(list).await.is_none());
}

#[tokio::test]
async fn read_only_edits_are_reverted_to_the_remote_copy() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    share_with(&mut ada, &mut bob, list, Permission::ReadOnly).await;

    let mut tx = bob.begin();
    tx.set_field(list, "title", "Bob was here");
    tx.delete(item);
    bob.save(tx).expect("local save succeeds");
    assert!(bob.get(item).expect("read").is_none());

    bob.sync().await.expect("bob sync");
    ada.sync().await.expect("ada sync");
    bob.sync().await.expect("bob sync again");

    for device in [&ada, &bob] {
        let entity = device.get(list).expect("read").expect("list present");
        assert_eq!(entity.text("title"), Some("Yosemite Trip"));
        assert!(device.get(item).expect("read").is_some());
    }
    assert!(bob.stores().pending_changes(Scope::Shared).expect("outbox").is_empty());
    assert_eq!(bob.stores().scope_of_root(list), Some(Scope::Shared));
    let remote_list = server.record(list).await.expect("remote list");
    assert_eq!(remote_list.text("title"), Some("Yosemite Trip"));
}

#[tokio::test]
async fn unsharing_a_list_deleted_by_a_participant_leaves_no_private_copy() {
    let server = RemoteServer::new();
    let mut ada = device(&server, "ada@example.com").await;
    let mut bob = device(&server, "bob@example.com").await;
    let (list, item) = packing_list(&mut ada, "Yosemite Trip").await;
    let grant = share_with(&mut ada, &mut bob, list, Permission::ReadWrite).await;

    let mut tx = bob.begin();
    tx.delete(list);
    bob.save(tx).expect("bob deletes list");
    bob.sync().await.expect("bob sync");

    ada.delete_share(&grant).await.expect("share already gone");
    assert!(ada.get(list).expect("read").is_none());
    assert!(ada.get(item).expect("read").is_none());

    ada.sync().await.expect("ada sync");
    ada.sync().await.expect("ada sync again");
    assert!(ada.lists().expect("lists").is_empty());
    assert!(ada.fetch_share(list).await.expect("fetch").is_none());
    assert!(server.record(list).await.is_none());
}

#[tokio::test]
async fn unsharing_from_a_second_device_keeps_the_list_private() {
    let server = RemoteServer::new();
    let mut phone = device(&server, "ada@example.com").await;
    let mut laptop = device(&server, "ada@example.com").await;
    let (list, item) = packing_list(&mut phone, "Yosemite Trip").await;
    let grant = phone.create_share(list).await.expect("create share");
    phone.sync().await.expect("phone sync");
    laptop.sync().await.expect("laptop sync");
    assert_eq!(laptop.stores().scope_of_root(list), Some(Scope::Shared));

    phone.delete_share(&grant).await.expect("phone stops sharing");
    laptop
        .delete_share(&grant)
        .await
        .expect("second unshare is not an error");

    assert_eq!(laptop.stores().scope_of_root(list), Some(Scope::Private));
    assert!(laptop.get(item).expect("read").is_some());
    laptop.sync().await.expect("laptop sync");
    let entity = laptop.get(list).expect("read").expect("list kept");
    assert_eq!(entity.text("title"), Some("Yosemite Trip"));
    assert!(!laptop.is_shared(list).await);
}

#[tokio::test]
async fn is_owner_needs_a_single_grant_fetch() {
    let server = RemoteServer::new();
    let mut phone = device(&server, "ada@example.com").await;
    let laptop = device(&server, "ada@example.com").await;
    let (list, _) = packing_list(&mut phone, "Yosemite Trip").await;
    phone.create_share(list).await.expect("create share");
    phone.sync().await.expect("phone sync");

    // The laptop has not synced: its replica is absent, the grant is visible.
    server
        .inject_failure_after(1, RemoteError::Network("offline".to_string()))
        .await;
    assert!(laptop.is_owner(list).await);
    assert!(!laptop.is_shared(list).await);
    assert!(laptop.is_shared(list).await);
}
