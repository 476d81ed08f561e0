use crate::*;

#[tokio::test]
async fn joining_the_hub_stops_discovery() {
    let hub_port = free_port();
    let hub = open_hub(hub_port, free_port()).await.unwrap();
    let ext = open_extension(hub_port, free_port(), 88, &[]).await.unwrap();

    ext.connect(loopback(hub_port)).await.unwrap();
    assert!(eventually(|| async { !ext.is_discovering() }).await);

    ext.close().await;
    hub.close().await;
}

#[tokio::test]
async fn hub_never_listens_for_beacons() {
    let hub = open_hub(free_port(), free_port()).await.unwrap();
    assert!(!hub.is_discovering());
    hub.close().await;
}
