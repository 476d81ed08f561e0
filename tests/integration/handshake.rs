use house_core::identity::HUB_IDENTIFIER;
use house_core::{Category, Role};

use crate::*;

#[tokio::test]
async fn extension_joins_hub() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 4242, &[Category::SwitchController])
        .await
        .unwrap();

    let response = ext.connect(loopback(hub_port)).await.unwrap();
    assert_eq!(response.peer_identifier, HUB_IDENTIFIER);
    assert_eq!(response.peer_role, Role::Hub);

    assert!(eventually(|| hub.connectors().is_connected(4242)).await);
    assert!(ext.connectors().is_connected(HUB_IDENTIFIER).await);
    assert!(eventually(|| async { !ext.is_discovering() }).await);

    ext.close().await;
    hub.close().await;
}

#[tokio::test]
async fn hub_remembers_extension_after_close() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 77, &[]).await.unwrap();

    ext.connect(loopback(hub_port)).await.unwrap();
    assert!(eventually(|| hub.connectors().is_connected(77)).await);

    hub.close().await;
    assert!(!hub.connectors().is_connected(77).await);
    assert!(hub.connectors().contains(77).await);

    ext.close().await;
}

#[tokio::test]
async fn connecting_to_an_extension_fails() {
    let hub_port = free_port();
    let a = open_extension(hub_port, free_port(), 10, &[]).await.unwrap();
    let b = open_extension(hub_port, free_port(), 11, &[]).await.unwrap();

    // Both sides wait for an initiation that never comes.
    let result = a.connect(loopback(b.local_addr().port())).await;
    assert!(result.is_err());
    assert!(!a.connectors().contains(11).await);

    a.close().await;
    b.close().await;
}
