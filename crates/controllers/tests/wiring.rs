#![forbid(unsafe_code)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use riff_controllers::controllers;
use riff_kubehub::ObjectStore;
use riff_schema::build::{Container, ContainerSpec};
use riff_schema::core_deployer::{Build, Deployer, DeployerSpec};
use riff_store::MemoryStore;
use tokio_util::sync::CancellationToken;

use common::*;

async fn eventually(what: &str, f: impl Fn() -> bool) {
    for _ in 0..300 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn settings_arriving_late_unblock_the_whole_chain() {
    let store = Arc::new(MemoryStore::new());
    let ctx = common::context(&store);
    let shutdown = CancellationToken::new();
    let runs: Vec<_> = controllers(&ctx).into_iter().map(|c| tokio::spawn(c.run(1, shutdown.clone()))).collect();

    store.create(&config_map("riff-system", "riff-core-settings", &[])).await.unwrap();
    store.create(&stamp(Container::new("my-container", ContainerSpec::default()))).await.unwrap();
    store
        .create(&stamp(Deployer::new("test-deployer", DeployerSpec {
            build: Some(Build { container_ref: "my-container".into(), ..Default::default() }),
            ..Default::default()
        })))
        .await
        .unwrap();

    // Without a default image prefix the container cannot resolve.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.all::<Deployment>().is_empty());

    store.create(&config_map(NS, "riff-build", &[("default-image-prefix", "example.com/repo")])).await.unwrap();
    eventually("deployer status", || {
        store
            .peek::<Deployer>(&key("test-deployer"))
            .and_then(|d| d.status)
            .and_then(|s| s.latest_image)
            .as_deref()
            == Some("example.com/repo/my-container")
    })
    .await;
    eventually("deployment", || store.all::<Deployment>().len() == 1).await;

    shutdown.cancel();
    for r in runs {
        r.await.unwrap();
    }
}
