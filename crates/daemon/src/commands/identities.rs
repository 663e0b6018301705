//! Identities command - lists the configured participants.

use anyhow::Result;
use pairchat_core::platform;
use pairchat_core::{remembered_login, Authenticator, SledStore, StaticRegistry};

pub async fn execute() -> Result<()> {
    let config = super::load_config(None)?;
    let registry = StaticRegistry::new(config.identities.clone())?;

    println!("Identities");
    println!("==========");
    println!();

    let identities = registry.identities();
    for identity in &identities {
        println!(
            "  {} {} ({})",
            identity.avatar, identity.display_name, identity.login_id
        );
        println!("    Address: {}", identity.network_address);
    }
    println!();
    println!("Total: {} identity(ies)", identities.len());

    let db_path = platform::chat_db_path(&config.data_dir());
    // The database is locked while a chat session is running.
    if let Some(store) = db_path.exists().then(|| SledStore::open(&db_path).ok()).flatten() {
        if let Some(last) = remembered_login(&store) {
            println!();
            println!(
                "Last login: {} at {}",
                last.login_id,
                last.logged_in_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}
