//! Integration tests against a real Docker daemon.
//!
//! These tests pull `alpine:3.19` and start containers.
//! Run with: cargo test --test docker_integration -- --ignored

use std::time::Duration;

use swe_testbed::error::SandboxError;
use swe_testbed::execution::{ContainerSpec, DockerClient, SandboxBackend};

const IMAGE: &str = "alpine:3.19";

async fn client() -> DockerClient {
    let client = DockerClient::new().expect("Docker client");
    client.ping().await.expect("Docker daemon reachable");
    client.ensure_image(IMAGE).await.expect("pull alpine");
    client
}

fn sh(command: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), command.to_string()]
}

#[tokio::test]
#[ignore] // Run with: cargo test --test docker_integration -- --ignored
async fn test_exec_sees_host_workdir() {
    let docker = client().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.txt"), "from host\n").unwrap();

    let spec = ContainerSpec::new("swe-testbed-it-workdir", IMAGE, dir.path())
        .with_env([("GREETING", "hello")]);
    let sandbox = docker.start(&spec).await.unwrap();

    let output = docker
        .exec(
            &sandbox,
            &sh("cat input.txt && echo \"$GREETING\" > output.txt && exit 3"),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
    docker.stop(&sandbox, true).await;

    assert_eq!(output.exit_code, 3);
    assert!(output.stdout.contains("from host"));
    let written = std::fs::read_to_string(dir.path().join("output.txt")).unwrap();
    assert_eq!(written.trim(), "hello");
}

#[tokio::test]
#[ignore]
async fn test_exec_timeout_kills_command() {
    let docker = client().await;
    let dir = tempfile::tempdir().unwrap();
    let spec = ContainerSpec::new("swe-testbed-it-timeout", IMAGE, dir.path());
    let sandbox = docker.start(&spec).await.unwrap();

    let started = std::time::Instant::now();
    let result = docker
        .exec(&sandbox, &sh("echo begin; sleep 60"), Duration::from_secs(2))
        .await;
    docker.stop(&sandbox, true).await;

    assert!(started.elapsed() < Duration::from_secs(30));
    match result {
        Err(SandboxError::Timeout { seconds, stdout, .. }) => {
            assert_eq!(seconds, 2);
            assert!(stdout.contains("begin"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn test_commit_image_and_reuse() {
    let docker = client().await;
    let dir = tempfile::tempdir().unwrap();
    let image = "swe-testbed-it/commit:latest";

    let spec = ContainerSpec::new("swe-testbed-it-commit", IMAGE, dir.path());
    let sandbox = docker.start(&spec).await.unwrap();
    docker
        .exec(&sandbox, &sh("echo built > /opt/marker"), Duration::from_secs(30))
        .await
        .unwrap();
    docker.commit_image(&sandbox, image).await.unwrap();
    docker.stop(&sandbox, true).await;
    assert!(docker.image_exists(image).await);

    let spec = ContainerSpec::new("swe-testbed-it-commit", image, dir.path());
    let sandbox = docker.start(&spec).await.unwrap();
    let output = docker
        .exec(&sandbox, &sh("cat /opt/marker"), Duration::from_secs(30))
        .await
        .unwrap();
    docker.stop(&sandbox, true).await;
    assert_eq!(output.stdout.trim(), "built");
}

#[tokio::test]
#[ignore]
async fn test_named_volume_persists_between_sandboxes() {
    let docker = client().await;
    let dir = tempfile::tempdir().unwrap();
    let volume = "swe-testbed-it-cache";
    docker.create_volume(volume).await.unwrap();
    docker.create_volume(volume).await.unwrap();

    let bind = vec![format!("{volume}:/cache:rw")];
    let spec = ContainerSpec::new("swe-testbed-it-volume", IMAGE, dir.path()).with_binds(bind.clone());
    let sandbox = docker.start(&spec).await.unwrap();
    docker
        .exec(&sandbox, &sh("echo cached > /cache/entry"), Duration::from_secs(30))
        .await
        .unwrap();
    docker.stop(&sandbox, true).await;

    let spec = ContainerSpec::new("swe-testbed-it-volume", IMAGE, dir.path()).with_binds(bind);
    let sandbox = docker.start(&spec).await.unwrap();
    let output = docker
        .exec(&sandbox, &sh("cat /cache/entry"), Duration::from_secs(30))
        .await
        .unwrap();
    docker.stop(&sandbox, true).await;
    assert_eq!(output.stdout.trim(), "cached");

    docker.remove_volume(volume).await.unwrap();
    docker.remove_volume(volume).await.unwrap();
}
