use std::sync::mpsc;
use std::time::Duration;
use udp_discovery::logging;
use udp_discovery::{DiscoveryEngine, DiscoveryEvent, DiscoveryRuntime, EngineConfig, MatchFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("info");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_port(8000).with_debug(true),
    };
    println!("Looking for my-server (ws) on UDP port {}", config.port);

    let mut engine = DiscoveryEngine::new(config)?;
    let events = engine.subscribe();
    let runtime = DiscoveryRuntime::spawn(engine)?;

    runtime.listen_once(MatchFilter::parse(r#"{"name": "my-server", "protocol": "ws"}"#))?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    loop {
        if stop_rx.try_recv().is_ok() {
            println!("Interrupted");
            break;
        }
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(DiscoveryEvent::Discovery(service)) => {
                // Connect to service.host : service.port from here
                println!("Discovered: {}", serde_json::to_string(&service)?);
                break;
            }
            Ok(_) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    runtime.stop();
    Ok(())
}
