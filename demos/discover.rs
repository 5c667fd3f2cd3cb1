//! Find BluOS players and print what each one is doing
//!
//! Usage: `cargo run --example discover -- [mdns|lsdp|both] [--refresh]`

use bluos_control::{Controller, DiscoveryMethod, Freshness, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut settings = Settings::default();
    let mut refresh = false;
    for arg in std::env::args().skip(1) {
        if arg == "--refresh" {
            refresh = true;
        } else {
            settings.discovery_method = arg.parse::<DiscoveryMethod>()?;
        }
    }

    let controller = Controller::new(settings)?;
    let set = controller.devices(refresh).await?;

    match set.freshness {
        Freshness::Empty => {
            println!("No BluOS players found");
            return Ok(());
        }
        Freshness::Stale => println!("Discovery found nothing; showing last known players"),
        Freshness::Cached => println!("Using cached players (pass --refresh to rescan)"),
        Freshness::Fresh => {}
    }

    let outcomes = controller.statuses(set.devices()).await?;
    for device in set.devices() {
        print!("{:<16} {:<24}", device.address.to_string(), device.display_name());
        match outcomes.get(&device.address).map(|o| &o.result) {
            Some(Ok(status)) => {
                let role = match &status.sync_role {
                    bluos_control::SyncRole::Standalone => String::new(),
                    bluos_control::SyncRole::Master { slaves } => format!(" [master of {}]", slaves.len()),
                    bluos_control::SyncRole::Slave { master } => format!(" [slave of {}]", master),
                };
                println!(
                    " {:?} vol {}{} {} - {}{}",
                    status.state,
                    status.volume,
                    if status.mute { " (muted)" } else { "" },
                    status.artist,
                    status.title,
                    role
                );
            }
            Some(Err(e)) => println!(" error: {}", e),
            None => println!(" no result"),
        }
    }

    Ok(())
}
