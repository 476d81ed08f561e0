use house_core::identity::HUB_IDENTIFIER;

use crate::*;

#[tokio::test]
async fn hub_delivers_to_extension() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 4242, &[]).await.unwrap();
    let mut lights = capture(&ext, 111, 11);

    ext.connect(loopback(hub_port)).await.unwrap();
    assert!(eventually(|| hub.connectors().is_connected(4242)).await);

    hub.device().send(message(4242, 111, 11, b"on"));
    hub.device().send(message(4242, 111, 11, b"off"));
    assert_eq!(next(&mut lights).await.unwrap(), b"on");
    assert_eq!(next(&mut lights).await.unwrap(), b"off");

    ext.close().await;
    hub.close().await;
}

#[tokio::test]
async fn extension_delivers_to_hub() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 4242, &[]).await.unwrap();
    let mut reports = capture(&hub, 7, 1);

    ext.connect(loopback(hub_port)).await.unwrap();
    ext.device().send(message(HUB_IDENTIFIER, 7, 1, &[]));
    assert_eq!(next(&mut reports).await.unwrap(), Vec::<u8>::new());

    ext.close().await;
    hub.close().await;
}

#[tokio::test]
async fn hub_relays_between_extensions() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let switch = open_extension(hub_port, free_port(), 10, &[]).await.unwrap();
    let lamp = open_extension(hub_port, free_port(), 20, &[]).await.unwrap();
    let mut lamp_rx = capture(&lamp, 111, 11);

    switch.connect(loopback(hub_port)).await.unwrap();
    lamp.connect(loopback(hub_port)).await.unwrap();
    assert!(eventually(|| hub.connectors().is_connected(20)).await);

    switch.device().send(message(20, 111, 11, b"toggle"));
    assert_eq!(next(&mut lamp_rx).await.unwrap(), b"toggle");

    switch.close().await;
    lamp.close().await;
    hub.close().await;
}

#[tokio::test]
async fn message_queued_before_connection_is_delivered_once_connected() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 31, &[]).await.unwrap();
    let mut rx = capture(&hub, 2, 2);

    // No route yet: the drain backlogs the message.
    ext.device().send(message(HUB_IDENTIFIER, 2, 2, b"early"));
    assert!(eventually(|| async { ext.device().outbox.upper_bound_count() == 1 }).await);

    ext.connect(loopback(hub_port)).await.unwrap();
    // The next enqueue wakes the drain, which sends the backlog first.
    ext.device().send(message(HUB_IDENTIFIER, 2, 2, b"late"));
    assert_eq!(next(&mut rx).await.unwrap(), b"early");
    assert_eq!(next(&mut rx).await.unwrap(), b"late");

    ext.close().await;
    hub.close().await;
}

#[tokio::test]
async fn hub_reconnects_to_known_extension() {
    let hub_port = free_port();
    let extension_port = free_port();
    let hub = open_hub(hub_port, extension_port).await.unwrap();
    let ext = open_extension(hub_port, extension_port, 4242, &[]).await.unwrap();
    let mut rx = capture(&ext, 5, 5);

    ext.connect(loopback(hub_port)).await.unwrap();
    assert!(eventually(|| hub.connectors().is_connected(4242)).await);

    // Drop the live connection; the hub still knows where the extension is.
    hub.connectors().stop_all().await;
    assert!(eventually(|| async { !ext.connectors().is_connected(HUB_IDENTIFIER).await }).await);

    hub.device().send(message(4242, 5, 5, b"again"));
    assert_eq!(next(&mut rx).await.unwrap(), b"again");
    assert!(hub.connectors().is_connected(4242).await);

    ext.close().await;
    hub.close().await;
}
