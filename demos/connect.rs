//! Example: Connect to a Dooz hub and print the discovered mesh.

use dooz_lan_bridge::{DeviceState, DoozHub, HubConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = HubConfig::builder()
        .host("192.168.0.50")
        .port(55055)
        .login("me@example.com")
        .password("secret")
        .build();

    println!("Connecting to hub...");
    let mut hub = DoozHub::connect(config).await?;

    // Print devices
    let devices = hub.devices().await;
    println!("\n--- Devices ({}) ---", devices.len());
    for device in &devices {
        let state = match device.state {
            DeviceState::Light(l) => format!("on={} level={} brightness={}", l.on, l.level, l.brightness),
            DeviceState::Shutter(s) => {
                format!("level={} target={} {}", s.level, s.target, s.movement.as_str())
            }
            DeviceState::Heater(h) => format!(
                "mode={} setpoint={:?}",
                h.mode.map(|m| m.as_str()).unwrap_or("unknown"),
                h.target_temperature
            ),
        };
        println!(
            "  {} {:30} {:8} {}",
            device.address,
            device.display_name(),
            device.kind.description(),
            state
        );
    }

    // Print groups
    let groups = hub.groups().await;
    println!("\n--- Groups ({}) ---", groups.len());
    for group in &groups {
        let state = hub.group_state(group.address).await?;
        println!(
            "  {} {:30} {} members={} state={:?}",
            group.address,
            group.name,
            group.kind.description(),
            group.members.len(),
            state
        );
    }

    // Print scenes
    let scenes = hub.scenes().await;
    println!("\n--- Scenes ({}) ---", scenes.len());
    for scene in &scenes {
        println!("  {:3}: {}", scene.id, scene.name);
    }

    println!("\nPress Ctrl+C to disconnect...");
    tokio::signal::ctrl_c().await?;
    hub.disconnect().await?;
    println!("Disconnected.");

    Ok(())
}
