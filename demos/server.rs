use std::sync::mpsc;
use udp_discovery::logging;
use udp_discovery::{Announcement, DiscoveryEngine, DiscoveryEvent, DiscoveryRuntime, EngineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("info");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_port(8000).with_debug(true),
    };
    println!("Announcing on UDP port {}", config.port);

    let mut engine = DiscoveryEngine::new(config)?;
    engine.on_event(|event| match event {
        DiscoveryEvent::StatusChanged(status) => println!("Status: {}", status),
        DiscoveryEvent::Error(e) => eprintln!("Error: {}", e),
        DiscoveryEvent::Discovery(_) => {}
    });
    let runtime = DiscoveryRuntime::spawn(engine)?;

    // Host is filled in by the engine on every tick.
    runtime.broadcast(
        Announcement::new("my-server")
            .port(4321)
            .metadata_json(r#"{"protocol": "tcp", "other": 42}"#),
    )?;
    runtime.broadcast(
        Announcement::new("my-server")
            .port(3000)
            .metadata_json(r#"{"protocol": "ws", "other": 42}"#)
            .repeat(15),
    )?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;
    let _ = stop_rx.recv();

    println!("Shutting down");
    runtime.stop();
    Ok(())
}
