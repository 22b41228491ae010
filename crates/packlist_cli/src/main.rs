//! CLI smoke entry point.
//!
//! # Responsibility
//! - Walk two devices through sharing one packing list on an in-memory remote.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Pass a JSON config file as the first argument to run the first device on
//! it; its `log` section enables file logging.

use log::info;
use packlist_core::{
    CoreConfig, EntityKind, InMemoryRemote, Permission, PersistenceController, RemoteServer,
    Scope, UserIdentity,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

type Device = PersistenceController<InMemoryRemote>;

async fn device(server: &RemoteServer, config: CoreConfig) -> Result<Device, Box<dyn Error>> {
    let remote = Arc::new(server.client(config.identity.clone()));
    Ok(PersistenceController::start(config, remote).await?)
}

/// Config for the first device: from `path` when given, in memory otherwise.
fn load_config(path: Option<String>) -> Result<CoreConfig, Box<dyn Error>> {
    let Some(path) = path else {
        return Ok(CoreConfig::in_memory(UserIdentity::parse("ada@example.com")?));
    };
    let config = CoreConfig::from_file(&PathBuf::from(path))?;
    if let Some(settings) = &config.log {
        packlist_core::init_from_settings(settings)?;
    }
    Ok(config)
}

fn print_lists(device: &Device) -> Result<(), Box<dyn Error>> {
    let lists = device.lists()?;
    if lists.is_empty() {
        println!("  {}: no lists", device.current_user());
    }
    for (scope, list) in lists {
        let items = device.stores().aggregate(list.id)?.len().saturating_sub(1);
        println!(
            "  {}: [{}] {} ({} entries)",
            device.current_user(),
            scope,
            list.display_name(),
            items
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config(std::env::args().nth(1))?;
    println!("packlist_core version={}", packlist_core::core_version());

    let server = RemoteServer::new();
    let mut ada = device(&server, config).await?;
    let bob_config = CoreConfig::in_memory(UserIdentity::parse("bob@example.com")?);
    let mut bob = device(&server, bob_config).await?;

    let mut tx = ada.begin();
    let list = tx.insert_root(EntityKind::PackingList, [("title", "Yosemite Trip")]);
    let gear = tx.insert_child(list, EntityKind::Category, [("name", "Gear")]);
    tx.insert_child(gear, EntityKind::Item, [("name", "Tent")]);
    ada.save(tx)?;
    ada.sync().await?;
    println!("planned:");
    print_lists(&ada)?;

    let grant = ada.create_share(list).await?;
    let grant = ada
        .add_participant(&grant, bob.current_user(), Permission::ReadWrite)
        .await?;
    if let Some(invitation) = grant.invitation_for(bob.current_user()) {
        bob.accept_invitation_json(&invitation.to_json()?).await?;
    }
    ada.sync().await?;
    bob.sync().await?;
    info!("event=demo_share module=cli status=ok root={list}");
    println!("shared:");
    print_lists(&ada)?;
    print_lists(&bob)?;

    let mut tx = bob.begin();
    tx.insert_child(gear, EntityKind::Item, [("name", "Stove")]);
    bob.save(tx)?;
    bob.sync().await?;
    ada.sync().await?;
    println!("after bob packs:");
    print_lists(&ada)?;

    ada.delete_share(&grant).await?;
    ada.sync().await?;
    bob.sync().await?;
    println!("unshared:");
    print_lists(&ada)?;
    print_lists(&bob)?;

    let private = ada.stores().roots(Scope::Private)?.len();
    println!("ada private lists={private}");
    Ok(())
}
