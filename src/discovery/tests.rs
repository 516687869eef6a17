#[cfg(test)]
mod tests {
    use crate::discovery::{
        Announcement, ConnectivityStatus, DiscoveryEngine, DiscoveryEvent, InterfaceAddr, InterfaceSource,
        MatchFilter, ServiceDescriptor, StaticInterfaces,
    };
    use crate::error::{ConfigError, EngineError};
    use crate::logging::testing::MemoryLogger;
    use crate::logging::LogLevel;
    use crate::runtime::config::EngineConfig;
    use crate::transport::SocketState;
    use serde_json::json;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::sync::mpsc::Receiver;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    const INTERVAL: Duration = Duration::from_millis(1000);

    /// Interface list the test can change between ticks.
    #[derive(Clone, Default)]
    struct SharedInterfaces(Arc<Mutex<Vec<InterfaceAddr>>>);

    impl SharedInterfaces {
        fn set(&self, ifaces: Vec<InterfaceAddr>) {
            *self.0.lock().unwrap() = ifaces;
        }
    }

    impl InterfaceSource for SharedInterfaces {
        fn ipv4_interfaces(&self) -> Vec<InterfaceAddr> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Broadcast address of a /32 loopback interface is the loopback address itself.
    fn loopback_iface() -> InterfaceAddr {
        InterfaceAddr::new(Ipv4Addr::LOCALHOST, Ipv4Addr::BROADCAST)
    }

    fn free_port() -> u16 {
        UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    fn loopback_config(port: u16) -> EngineConfig {
        EngineConfig::default()
            .with_port(port)
            .with_address(Ipv4Addr::LOCALHOST)
            .with_announce_interval(INTERVAL)
    }

    fn receiver(port: u16) -> UdpSocket {
        let socket = UdpSocket::bind(("127.0.0.1", port)).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        socket
    }

    fn drain(rx: &Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        rx.try_iter().collect()
    }

    fn statuses(events: &[DiscoveryEvent]) -> Vec<ConnectivityStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::StatusChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn discoveries(events: &[DiscoveryEvent]) -> Vec<ServiceDescriptor> {
        events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::Discovery(d) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    fn send_to(port: u16, payloads: &[&str]) {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for payload in payloads {
            sender.send_to(payload.as_bytes(), ("127.0.0.1", port)).unwrap();
        }
        // Give loopback delivery a moment before polling the non-blocking socket.
        thread::sleep(Duration::from_millis(50));
    }

    fn count_datagrams(socket: &UdpSocket) -> Vec<ServiceDescriptor> {
        let mut buf = [0u8; 2048];
        let mut received = Vec::new();
        while let Ok((len, _)) = socket.recv_from(&mut buf) {
            received.push(ServiceDescriptor::from_datagram(&buf[..len]).unwrap());
        }
        received
    }

    #[test]
    fn test_new_engine_is_initializing_and_unbound() {
        let engine = DiscoveryEngine::with_interfaces(EngineConfig::default(), StaticInterfaces::default()).unwrap();
        assert_eq!(engine.status(), ConnectivityStatus::Initializing);
        assert_eq!(engine.socket_state(), SocketState::Unbound);
        assert!(engine.local_addr().is_none());
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn test_zero_interval_config_rejected() {
        // Sub-millisecond intervals truncate to zero
        let config = loopback_config(free_port()).with_announce_interval(Duration::from_micros(500));
        assert_eq!(config.announce_interval_ms, 0);
        let err = DiscoveryEngine::with_interfaces(config, StaticInterfaces(vec![loopback_iface()]))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Config(ConfigError::Invalid(_))));

        let mut config = loopback_config(free_port());
        config.retry_interval_ms = 0;
        assert!(matches!(
            DiscoveryEngine::with_interfaces(config, StaticInterfaces::default()),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_status_follows_connectivity() {
        let port = free_port();
        let _rx_socket = receiver(port);
        let ifaces = SharedInterfaces::default();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), ifaces.clone()).unwrap();
        let rx = engine.subscribe();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").port(4321)).unwrap();

        // Nothing before the first interval elapses
        engine.poll_at(start);
        assert!(drain(&rx).is_empty());

        // No interface: NOT_CONNECTED
        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        assert_eq!(statuses(&drain(&rx)), vec![ConnectivityStatus::NotConnected]);

        // Still none: no repeated notification
        engine.poll_at(start + INTERVAL * 2 + INTERVAL / 2);
        assert!(drain(&rx).is_empty());

        // Interface appears: host refresh notification, then BROADCASTING
        ifaces.set(vec![loopback_iface()]);
        engine.poll_at(start + INTERVAL * 3 + INTERVAL / 2);
        assert_eq!(
            statuses(&drain(&rx)),
            vec![ConnectivityStatus::NotConnected, ConnectivityStatus::Broadcasting]
        );
        assert_eq!(engine.status(), ConnectivityStatus::Broadcasting);

        // Same host, still sending: silent
        engine.poll_at(start + INTERVAL * 4 + INTERVAL / 2);
        assert!(drain(&rx).is_empty());

        // Link lost again
        ifaces.set(vec![]);
        engine.poll_at(start + INTERVAL * 5 + INTERVAL / 2);
        assert_eq!(statuses(&drain(&rx)), vec![ConnectivityStatus::NotConnected]);
    }

    #[test]
    fn test_first_send_refreshes_host_then_broadcasts() {
        let port = free_port();
        let socket = receiver(port);
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();
        let rx = engine.subscribe();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").port(4321)).unwrap();
        engine.poll_at(start + INTERVAL + INTERVAL / 2);

        assert_eq!(
            statuses(&drain(&rx)),
            vec![ConnectivityStatus::Initializing, ConnectivityStatus::Broadcasting]
        );

        let received = count_datagrams(&socket);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name(), Some("svc"));
        assert_eq!(received[0].host(), Some("127.0.0.1"));
        assert_eq!(received[0].port(), Some(4321));
    }

    #[test]
    fn test_interface_address_change_refreshes_host() {
        let port = free_port();
        // Wildcard bind sees datagrams for every loopback address
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).unwrap();
        socket.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let ifaces = SharedInterfaces::default();
        ifaces.set(vec![loopback_iface()]);
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), ifaces.clone()).unwrap();
        let rx = engine.subscribe();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").port(4321)).unwrap();
        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        assert_eq!(
            statuses(&drain(&rx)),
            vec![ConnectivityStatus::Initializing, ConnectivityStatus::Broadcasting]
        );

        // Address moves: one refresh notification carrying the unchanged status
        ifaces.set(vec![InterfaceAddr::new(Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::BROADCAST)]);
        engine.poll_at(start + INTERVAL * 2 + INTERVAL / 2);
        assert_eq!(statuses(&drain(&rx)), vec![ConnectivityStatus::Broadcasting]);

        // Same address again: silent
        engine.poll_at(start + INTERVAL * 3 + INTERVAL / 2);
        assert!(drain(&rx).is_empty());

        let hosts: Vec<_> = count_datagrams(&socket)
            .iter()
            .map(|d| d.host().unwrap_or_default().to_string())
            .collect();
        assert_eq!(hosts, vec!["127.0.0.1", "127.0.0.2", "127.0.0.2"]);
    }

    #[test]
    fn test_repeat_count_sends_exactly_n() {
        let port = free_port();
        let socket = receiver(port);
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").repeat(3)).unwrap();
        for tick in 1..=6 {
            engine.poll_at(start + INTERVAL * tick + INTERVAL / 2);
        }

        assert_eq!(count_datagrams(&socket).len(), 3);
        assert_eq!(engine.active_announcements(), 0);
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn test_unbounded_broadcast_runs_until_close() {
        let port = free_port();
        let socket = receiver(port);
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc")).unwrap();
        for tick in 1..=5 {
            engine.poll_at(start + INTERVAL * tick + INTERVAL / 2);
        }
        assert_eq!(count_datagrams(&socket).len(), 5);
        assert_eq!(engine.active_announcements(), 1);

        engine.close();
        for tick in 6..=8 {
            engine.poll_at(start + INTERVAL * tick + INTERVAL / 2);
        }
        assert!(count_datagrams(&socket).is_empty());
        assert_eq!(engine.active_announcements(), 0);
    }

    #[test]
    fn test_stop_single_broadcast() {
        let port = free_port();
        let socket = receiver(port);
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();

        let start = Instant::now();
        let tcp = engine.broadcast(Announcement::new("tcp-svc")).unwrap();
        engine.broadcast(Announcement::new("ws-svc")).unwrap();
        assert!(engine.stop_broadcast(tcp));
        assert!(!engine.stop_broadcast(tcp));

        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        let received = count_datagrams(&socket);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name(), Some("ws-svc"));
    }

    #[test]
    fn test_listen_reports_matches_and_drops_malformed() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        let rx = engine.subscribe();
        engine.listen("svc").unwrap();
        assert_eq!(engine.socket_state(), SocketState::Bound);

        send_to(
            port,
            &[
                "garbage",
                "42",
                "null",
                "true",
                r#"["name","svc"]"#,
                r#"{"name":"other","port":9}"#,
                r#"{"name":"svc","port":1}"#,
                r#"{"name":"svc","port":2,"extra":{"k":"v"}}"#,
            ],
        );
        engine.poll();

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        let found = discoveries(&events);
        assert_eq!(found[0].port(), Some(1));
        assert_eq!(found[1].port(), Some(2));
        assert_eq!(found[1].get("extra"), Some(&json!({"k": "v"})));
        assert_eq!(engine.socket_state(), SocketState::Bound);
    }

    #[test]
    fn test_listen_with_field_filter() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        let rx = engine.subscribe();
        engine
            .listen(r#"{"name":"my-server","protocol":"ws"}"#)
            .unwrap();

        send_to(
            port,
            &[
                r#"{"name":"my-server","protocol":"tcp","port":4321}"#,
                r#"{"name":"my-server","protocol":"ws","port":3000}"#,
            ],
        );
        engine.poll();

        let found = discoveries(&drain(&rx));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].port(), Some(3000));
    }

    #[test]
    fn test_listen_without_filter_matches_all() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        let rx = engine.subscribe();
        engine.listen(MatchFilter::All).unwrap();

        send_to(port, &[r#"{"name":"a"}"#, r#"{}"#]);
        engine.poll();
        assert_eq!(discoveries(&drain(&rx)).len(), 2);
    }

    #[test]
    fn test_listen_once_delivers_at_most_one() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        let rx = engine.subscribe();
        engine.listen_once("svc").unwrap();

        send_to(
            port,
            &[
                r#"{"name":"svc","n":1}"#,
                r#"{"name":"svc","n":2}"#,
                r#"{"name":"svc","n":3}"#,
            ],
        );
        engine.poll();
        engine.poll();

        let found = discoveries(&drain(&rx));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("n"), Some(&json!(1)));
        assert_eq!(engine.socket_state(), SocketState::Closed);
        assert!(!engine.is_listening());
    }

    #[test]
    fn test_bind_retries_until_port_is_freed() {
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let retry = Duration::from_millis(999);
        let mut engine = DiscoveryEngine::with_interfaces(
            loopback_config(port).with_retry_interval(retry),
            StaticInterfaces::default(),
        )
        .unwrap();
        let rx = engine.subscribe();

        let before = Instant::now();
        engine.listen("svc").unwrap();
        assert_eq!(engine.socket_state(), SocketState::Binding);
        let deadline = engine.next_deadline().unwrap();
        assert!(deadline >= before + retry);

        // The conflict is published as a recoverable error
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DiscoveryEvent::Error(e) => {
                assert!(matches!(**e, EngineError::AddressInUse { addr } if addr.port() == port));
                assert!(e.is_recoverable());
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Still held at the first retry
        engine.poll_at(deadline);
        assert_eq!(engine.socket_state(), SocketState::Binding);

        drop(holder);
        engine.poll_at(engine.next_deadline().unwrap());
        assert_eq!(engine.socket_state(), SocketState::Bound);
        assert_eq!(engine.local_addr().unwrap().port(), port);

        send_to(port, &[r#"{"name":"svc"}"#]);
        engine.poll();
        assert_eq!(discoveries(&drain(&rx)).len(), 1);
    }

    #[test]
    fn test_bind_other_failure_is_reported_not_retried() {
        let config = EngineConfig::default()
            .with_port(free_port())
            .with_address(Ipv4Addr::new(192, 0, 2, 1));
        let mut engine = DiscoveryEngine::with_interfaces(config, StaticInterfaces::default()).unwrap();
        let rx = engine.subscribe();

        let err = engine.listen("svc").unwrap_err();
        assert!(matches!(err, EngineError::Bind { .. }));
        assert_eq!(engine.socket_state(), SocketState::Unbound);
        assert!(engine.next_deadline().is_none());
        assert!(!engine.is_listening());

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], DiscoveryEvent::Error(e) if matches!(**e, EngineError::Bind { .. })));
    }

    #[test]
    fn test_send_failure_is_reported_and_loop_continues() {
        let port = free_port();
        let logger = Arc::new(MemoryLogger::default());
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()]))
                .unwrap()
                .with_logger(logger.clone());
        let rx = engine.subscribe();

        // Larger than any UDP datagram
        let mut meta = serde_json::Map::new();
        meta.insert("blob".into(), json!("x".repeat(70_000)));
        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").metadata(meta).repeat(1)).unwrap();

        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        engine.poll_at(start + INTERVAL * 2 + INTERVAL / 2);

        let events = drain(&rx);
        let errors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Error(err) if matches!(**err, EngineError::Send { .. })))
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(logger.count(LogLevel::Warn), 2);
        assert_eq!(logger.count(LogLevel::Error), 0);
        assert_ne!(engine.status(), ConnectivityStatus::Broadcasting);
        // Failed sends do not consume the repeat budget
        assert_eq!(engine.active_announcements(), 1);
    }

    #[test]
    fn test_broadcast_and_listen_share_socket() {
        let port = free_port();
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();
        let rx = engine.subscribe();

        engine.listen("svc").unwrap();
        let start = Instant::now();
        engine.broadcast(Announcement::new("svc").port(7000)).unwrap();
        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        assert_eq!(engine.local_addr().unwrap().port(), port);

        thread::sleep(Duration::from_millis(50));
        engine.poll_at(start + INTERVAL + INTERVAL / 2);

        let found = discoveries(&drain(&rx));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].host(), Some("127.0.0.1"));
        assert_eq!(found[0].port(), Some(7000));
    }

    #[test]
    fn test_listen_replaces_ephemeral_sender() {
        let port = free_port();
        let mut engine =
            DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces(vec![loopback_iface()])).unwrap();

        let start = Instant::now();
        engine.broadcast(Announcement::new("svc")).unwrap();
        engine.poll_at(start + INTERVAL + INTERVAL / 2);
        assert_ne!(engine.local_addr().unwrap().port(), port);

        engine.listen("svc").unwrap();
        assert_eq!(engine.local_addr().unwrap().port(), port);
    }

    #[test]
    fn test_close_is_idempotent_and_final() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        engine.listen("svc").unwrap();
        engine.broadcast(Announcement::new("svc")).unwrap();

        engine.close();
        engine.close();
        assert_eq!(engine.socket_state(), SocketState::Closed);
        assert!(engine.local_addr().is_none());
        assert!(engine.next_deadline().is_none());

        assert!(matches!(engine.listen("svc"), Err(EngineError::Closed)));
        assert!(matches!(engine.listen_once("svc"), Err(EngineError::Closed)));
        assert!(matches!(engine.broadcast(Announcement::new("svc")), Err(EngineError::Closed)));

        // Port is free again
        assert!(UdpSocket::bind(("127.0.0.1", port)).is_ok());
    }

    #[test]
    fn test_invalid_metadata_rejected_at_broadcast() {
        let mut engine = DiscoveryEngine::with_interfaces(EngineConfig::default(), StaticInterfaces::default()).unwrap();
        let err = engine
            .broadcast(Announcement::new("svc").metadata_json("not json"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMetadata(_)));
        assert_eq!(engine.active_announcements(), 0);
    }

    #[test]
    fn test_diagnostics_only_with_debug() {
        let quiet_logger = Arc::new(MemoryLogger::default());
        let mut quiet = DiscoveryEngine::with_interfaces(loopback_config(free_port()), StaticInterfaces::default())
            .unwrap()
            .with_logger(quiet_logger.clone());
        quiet.listen("svc").unwrap();
        quiet.close();
        assert_eq!(quiet_logger.count(LogLevel::Info), 0);
        assert_eq!(quiet_logger.count(LogLevel::Debug), 0);

        let loud_logger = Arc::new(MemoryLogger::default());
        let mut loud = DiscoveryEngine::with_interfaces(
            loopback_config(free_port()).with_debug(true),
            StaticInterfaces::default(),
        )
        .unwrap()
        .with_logger(loud_logger.clone());
        loud.listen_once("svc").unwrap();
        loud.close();
        assert!(loud_logger.contains("Listening (once)"));
        assert!(loud_logger.contains("Closing socket."));
    }

    #[test]
    fn test_bind_failure_logged_without_debug() {
        let logger = Arc::new(MemoryLogger::default());
        let config = EngineConfig::default().with_address(Ipv4Addr::new(192, 0, 2, 1));
        let mut engine =
            DiscoveryEngine::with_interfaces(config, StaticInterfaces::default()).unwrap().with_logger(logger.clone());
        assert!(engine.listen("svc").is_err());
        assert_eq!(logger.count(LogLevel::Error), 1);
    }

    #[test]
    fn test_callback_handlers_receive_events() {
        let port = free_port();
        let mut engine = DiscoveryEngine::with_interfaces(loopback_config(port), StaticInterfaces::default()).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));
        let names_clone = names.clone();
        engine.on_event(move |event| {
            if let DiscoveryEvent::Discovery(service) = event {
                names_clone
                    .lock()
                    .unwrap()
                    .push(service.name().unwrap_or_default().to_string());
            }
        });
        engine.listen(MatchFilter::All).unwrap();

        send_to(port, &[r#"{"name":"a"}"#, r#"{"name":"b"}"#]);
        engine.poll();
        assert_eq!(*names.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
