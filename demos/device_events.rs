//! Example: Print device, group and scene changes as the hub reports them.

use dooz_lan_bridge::{DoozHub, HubConfig, HubEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = HubConfig::builder()
        .host("192.168.0.50")
        .login("me@example.com")
        .password("secret")
        .build();

    let mut hub = DoozHub::connect(config).await?;
    let mut events = hub.subscribe();

    println!("Listening for hub events (Ctrl+C to stop)...\n");

    let handle = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                HubEvent::DeviceChanged {
                    address,
                    new_state,
                    changed,
                    ..
                } => {
                    println!("Device {address}: {:?} -> {new_state:?}", changed.names());
                }
                HubEvent::GroupChanged { address, state } => {
                    println!("Group {address}: {state:?}");
                }
                HubEvent::SceneChanged { id, active } => {
                    println!("Scene {id}: {}", if active { "ACTIVE" } else { "idle" });
                }
                HubEvent::Disconnected => println!("Hub connection lost"),
                HubEvent::Connected => println!("Hub connected"),
                HubEvent::ProtocolError { code, message } => {
                    println!("Protocol error {code}: {message}")
                }
                other => println!("Event: {other:?}"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    handle.abort();
    hub.disconnect().await?;
    println!("Disconnected.");

    Ok(())
}
