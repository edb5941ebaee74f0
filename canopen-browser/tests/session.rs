mod common;

use std::sync::Arc;
use std::time::Duration;

use canopen_browser::{
    classify, Address, AddressError, BusSettings, Capabilities, ConnectError, ConnectionState,
    DataTypeCategory, DisconnectError, InvalidNodeId, NodeSession, SdoError, SdoValue, TransportError,
};
use common::{test_dictionary, Call, MockTransport};

const NODE_ID: u8 = 4;

fn session_with(transport: MockTransport) -> (NodeSession<MockTransport>, Arc<MockTransport>) {
    let transport = Arc::new(transport);
    let session = NodeSession::new(test_dictionary(), NODE_ID, transport.clone()).unwrap();
    (session, transport)
}

async fn connected(transport: MockTransport) -> (NodeSession<MockTransport>, Arc<MockTransport>) {
    let (session, transport) = session_with(transport);
    session.connect("virtual", "vcan0", 500).await.unwrap();
    (session, transport)
}

#[tokio::test]
async fn test_read_only_scalar_before_and_after_connect() {
    let (session, _transport) = session_with(MockTransport::new());
    let address = Address::object(0x6000);

    let resolved = session.resolve(address).unwrap();
    let data_type = resolved.data_type().unwrap();
    assert_eq!(classify(data_type), (DataTypeCategory::Standard, Some("UNSIGNED32")));

    assert_eq!(session.action_permissions(address).unwrap(), Capabilities::new(false, false));
    session.connect("virtual", "vcan0", 500).await.unwrap();
    assert_eq!(session.action_permissions(address).unwrap(), Capabilities::new(true, false));
}

#[tokio::test]
async fn test_unresolvable_addresses() {
    let (session, _transport) = session_with(MockTransport::new());

    assert_eq!(
        session.action_permissions(Address::sub(0x1018, 5)),
        Err(AddressError::UnknownSubindex { index: 0x1018, subindex: 5 })
    );
    assert_eq!(
        session.action_permissions(Address::sub(0x6000, 1)),
        Err(AddressError::NotComposite(0x6000))
    );
    assert_eq!(
        session.action_permissions(Address::object(0x7000)),
        Err(AddressError::UnknownIndex(0x7000))
    );
}

#[tokio::test]
async fn test_permissions_false_while_disconnected() {
    let (session, _transport) = connected(MockTransport::new()).await;
    session.disconnect().await.unwrap();

    let od = session.object_dictionary();
    let mut addresses = Vec::new();
    for object in od.iter() {
        addresses.push(Address::object(object.index()));
        if let Some(composite) = object.as_composite() {
            addresses.extend(composite.subindices().map(|s| Address::sub(composite.index, s)));
        }
    }

    assert_eq!(addresses.len(), 8);
    for address in addresses {
        assert_eq!(session.action_permissions(address).unwrap(), Capabilities::NONE, "{}", address);
    }
}

#[tokio::test]
async fn test_connected_permissions_follow_access_type() {
    let (session, _transport) = connected(MockTransport::new()).await;

    assert_eq!(session.action_permissions(Address::object(0x2000)).unwrap(), Capabilities::new(true, true));
    assert_eq!(session.action_permissions(Address::object(0x2001)).unwrap(), Capabilities::new(false, true));
    assert_eq!(session.action_permissions(Address::sub(0x1018, 2)).unwrap(), Capabilities::new(true, false));
    // Composites carry no value of their own
    assert_eq!(session.action_permissions(Address::object(0x1018)).unwrap(), Capabilities::NONE);
}

#[tokio::test]
async fn test_connect_passes_bitrate_in_bits_per_second() {
    let (session, transport) = connected(MockTransport::new()).await;

    assert_eq!(session.connection_state(), ConnectionState::Connected);
    assert_eq!(
        transport.calls(),
        vec![Call::Connect(BusSettings {
            interface: "virtual".to_string(),
            channel: "vcan0".to_string(),
            bitrate: 500_000,
        })]
    );
}

#[tokio::test]
async fn test_reconnect_releases_old_handle_first() {
    let (session, transport) = connected(MockTransport::new()).await;
    session.connect("virtual", "vcan1", 250).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[0], Call::Connect(_)));
    assert_eq!(calls[1], Call::Disconnect(1));
    assert!(matches!(calls[2], Call::Connect(ref settings) if settings.channel == "vcan1"));
    assert_eq!(transport.count(|call| *call == Call::Disconnect(1)), 1);
    assert!(session.is_connected());

    // Transfers use the new handle
    let _ = session.sdo().read(Address::object(0x6000)).await;
    assert!(matches!(transport.calls().last(), Some(Call::Upload { handle: 2, .. })));
}

#[tokio::test]
async fn test_connect_failure_stays_disconnected() {
    let (session, transport) = session_with(MockTransport::new());
    transport.fail_next_connect(TransportError::Socket("No such device".to_string()));

    let err = session.connect("socketcan", "can7", 125).await.unwrap_err();
    assert_eq!(err, ConnectError::Transport("Socket error: No such device".to_string()));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Err(SdoError::NotConnected));
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (session, transport) = session_with(MockTransport::new());
    assert_eq!(session.disconnect().await, Ok(()));
    assert!(transport.calls().is_empty());

    session.connect("virtual", "vcan0", 500).await.unwrap();
    assert_eq!(session.disconnect().await, Ok(()));
    assert_eq!(session.disconnect().await, Ok(()));
    assert_eq!(transport.count(|call| matches!(call, Call::Disconnect(_))), 1);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_error_still_disconnects() {
    let (session, transport) = connected(MockTransport::new()).await;
    transport.fail_next_disconnect(TransportError::Socket("Device busy".to_string()));

    let err = session.disconnect().await.unwrap_err();
    assert_eq!(err, DisconnectError::Transport("Socket error: Device busy".to_string()));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_state_subscription() {
    let (session, _transport) = session_with(MockTransport::new());
    let mut state = session.subscribe_state();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

    session.connect("virtual", "vcan0", 500).await.unwrap();
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

    session.disconnect().await.unwrap();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_read_and_write() {
    let transport = MockTransport::new().with_value(0x1018, 1, &[0xAB, 0x00, 0x00, 0x00]);
    let (session, transport) = connected(transport).await;

    let data = session.sdo().read(Address::sub(0x1018, 1)).await.unwrap();
    assert_eq!(data, vec![0xAB, 0x00, 0x00, 0x00]);

    // Raw input goes to the device unchanged
    session.sdo().write(Address::object(0x2000), b"-5").await.unwrap();
    assert_eq!(
        transport.calls().last(),
        Some(&Call::Download {
            handle: 1,
            node_id: NODE_ID,
            index: 0x2000,
            subindex: 0,
            data: b"-5".to_vec(),
        })
    );
    assert_eq!(transport.value(0x2000, 0), Some(b"-5".to_vec()));
}

#[tokio::test]
async fn test_abort_keeps_connection() {
    let (session, _transport) = connected(MockTransport::new()).await;

    let err = session.sdo().read(Address::object(0x6000)).await.unwrap_err();
    assert_eq!(err, SdoError::SdoAbort(0x0602_0000));
    assert_eq!(
        err.abort_description().as_deref(),
        Some("Object does not exist in the object dictionary")
    );
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_transport_timeout_is_reported() {
    let (session, transport) = connected(MockTransport::new().with_value(0x6000, 0, &[1, 0, 0, 0])).await;
    transport.fail_next_transfer(TransportError::Timeout);

    let err = session.sdo().read(Address::object(0x6000)).await.unwrap_err();
    assert_eq!(err, SdoError::Transport("SDO request timeout".to_string()));
    assert!(session.is_connected());
    assert!(session.sdo().read(Address::object(0x6000)).await.is_ok());
}

#[tokio::test]
async fn test_gateway_bounds_a_hanging_transport() {
    let transport = MockTransport::new().with_value(0x6000, 0, &[1, 0, 0, 0]);
    let transport = Arc::new(transport);
    let session = NodeSession::new(test_dictionary(), NODE_ID, transport.clone())
        .unwrap()
        .with_sdo_timeout(Duration::from_millis(50));
    session.connect("virtual", "vcan0", 500).await.unwrap();
    transport.set_delay(Duration::from_millis(1200));

    let started = std::time::Instant::now();
    let err = session.sdo().read(Address::object(0x6000)).await.unwrap_err();
    assert_eq!(err, SdoError::Transport("SDO request timeout".to_string()));
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(session.is_connected());

    // The timed out request still owns the bus until the transport returns
    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Err(SdoError::Busy));
    assert_eq!(session.sdo().write(Address::object(0x2000), &[5, 0]).await, Err(SdoError::Busy));

    tokio::time::sleep(Duration::from_millis(1000)).await;
    transport.set_delay(Duration::ZERO);
    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Ok(vec![1, 0, 0, 0]));
    assert_eq!(transport.count(|call| matches!(call, Call::Upload { .. })), 2);
    assert_eq!(transport.count(|call| matches!(call, Call::Download { .. })), 0);
}

#[tokio::test]
async fn test_link_down_disconnects_session() {
    let (session, transport) = connected(MockTransport::new()).await;
    let mut state = session.subscribe_state();
    let _ = state.borrow_and_update();
    transport.fail_next_transfer(TransportError::LinkDown("bus off".to_string()));

    let err = session.sdo().read(Address::object(0x6000)).await.unwrap_err();
    assert_eq!(err, SdoError::Transport("bus off".to_string()));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(state.has_changed().unwrap());
    assert_eq!(transport.count(|call| *call == Call::Disconnect(1)), 1);

    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Err(SdoError::NotConnected));
    assert_eq!(session.action_permissions(Address::object(0x6000)).unwrap(), Capabilities::NONE);
}

#[tokio::test]
async fn test_concurrent_transfer_is_busy() {
    let transport = MockTransport::new().with_value(0x6000, 0, &[1, 0, 0, 0]);
    let (session, transport) = connected(transport).await;
    transport.set_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(
        session.sdo().read(Address::object(0x6000)),
        session.sdo().write(Address::object(0x2000), &[5, 0]),
    );
    assert_eq!(first, Ok(vec![1, 0, 0, 0]));
    assert_eq!(second, Err(SdoError::Busy));
    assert_eq!(transport.count(|call| matches!(call, Call::Download { .. })), 0);
}

#[tokio::test]
async fn test_abandoned_transfer_is_drained() {
    let transport = MockTransport::new().with_value(0x6000, 0, &[1, 0, 0, 0]);
    let (session, transport) = connected(transport).await;
    transport.set_delay(Duration::from_millis(200));

    let abandoned = tokio::time::timeout(Duration::from_millis(20), session.sdo().read(Address::object(0x6000))).await;
    assert!(abandoned.is_err());

    // The bus request is still in flight
    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Err(SdoError::Busy));

    tokio::time::sleep(Duration::from_millis(400)).await;
    transport.set_delay(Duration::ZERO);
    assert_eq!(session.sdo().read(Address::object(0x6000)).await, Ok(vec![1, 0, 0, 0]));
}

#[tokio::test]
async fn test_selection() {
    let transport = MockTransport::new().with_value(0x6000, 0, &[0x91, 0x01, 0x00, 0x00]);
    let (session, _transport) = connected(transport).await;
    let mut selection = session.subscribe_selection();
    assert_eq!(session.read_selected().await, Ok(None));

    let resolved = session.select(Address::object(0x6000)).unwrap();
    assert_eq!(resolved.name(), "Read inputs");
    assert!(selection.has_changed().unwrap());
    assert_eq!(*selection.borrow_and_update(), Some(Address::object(0x6000)));

    let attributes = session.selected_attributes().unwrap();
    assert_eq!(attributes.index, "0x6000");
    assert_eq!(attributes.data_type, "UNSIGNED32 - Standard Data Type");
    assert_eq!(session.read_selected().await, Ok(Some(SdoValue::Unsigned(0x191))));

    let sub = session.select(Address::sub(0x1018, 3)).unwrap();
    assert!(sub.is_sub_object());
    assert_eq!(session.selected_attributes().unwrap().subindex, "0x03");

    assert!(session.select(Address::sub(0x1018, 5)).is_err());
    assert_eq!(session.selection(), None);
    assert_eq!(session.selected_attributes(), None);
}

#[tokio::test]
async fn test_effective_bitrate_from_od() {
    let (session, _transport) = session_with(MockTransport::new());
    assert_eq!(session.effective_bitrate_from_od(), None);

    let mut od = test_dictionary();
    od.bitrate_kbps = Some(250);
    let session = NodeSession::new(od, NODE_ID, Arc::new(MockTransport::new())).unwrap();
    assert_eq!(session.effective_bitrate_from_od(), Some(250));
}

#[test]
fn test_node_id_must_be_in_range() {
    let transport = Arc::new(MockTransport::new());
    assert_eq!(
        NodeSession::new(test_dictionary(), 0, transport.clone()).err(),
        Some(InvalidNodeId(0))
    );
    assert_eq!(
        NodeSession::new(test_dictionary(), 200, transport.clone()).err(),
        Some(InvalidNodeId(200))
    );
    let session = NodeSession::new(test_dictionary(), 127, transport).unwrap();
    assert_eq!(session.node_id(), 127);
}
