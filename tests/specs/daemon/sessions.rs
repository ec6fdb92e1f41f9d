//! Session registry and scheduler specs, including overlay delivery.

use crate::prelude::*;
use dw_daemon::{Command, ErrorCode, Response};
use tokio::io::AsyncReadExt;

fn register_body(code: &str, dir: &std::path::Path, overlay: &std::path::Path) -> Command {
    Command::new("SESSION")
        .with_sub("REGISTER")
        .with_json(&serde_json::json!({
            "code": code,
            "overlay_endpoint": overlay,
            "directory": dir,
        }))
        .unwrap()
}

#[tokio::test]
async fn register_get_heartbeat_unregister() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;
    let overlay = daemon.workdir().join("ov.sock");

    let session = json_of(
        client
            .send(&register_body("dev-1", &daemon.workdir(), &overlay))
            .await,
    );
    assert_eq!(session["code"], "dev-1");

    // Duplicate codes are rejected.
    assert!(matches!(
        client
            .send(&register_body("dev-1", &daemon.workdir(), &overlay))
            .await,
        Response::Err {
            code: ErrorCode::AlreadyExists,
            ..
        }
    ));

    let heartbeat = Command::new("SESSION").with_sub("HEARTBEAT").with_args(["dev-1"]);
    assert!(matches!(client.send(&heartbeat).await, Response::Ok { .. }));

    let got = json_of(
        client
            .send(&Command::new("SESSION").with_sub("GET").with_args(["dev-1"]))
            .await,
    );
    assert_eq!(got["code"], "dev-1");

    let unregister = Command::new("SESSION").with_sub("UNREGISTER").with_args(["dev-1"]);
    assert!(matches!(client.send(&unregister).await, Response::Ok { .. }));
    // Idempotent.
    assert!(matches!(client.send(&unregister).await, Response::Ok { .. }));

    assert!(matches!(
        client
            .send(&Command::new("SESSION").with_sub("GET").with_args(["dev-1"]))
            .await,
        Response::Err {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    daemon.stop().await;
}

#[tokio::test]
async fn generated_codes_count_up_from_the_base() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    for expected in ["claude-1", "claude-2"] {
        let register = Command::new("SESSION")
            .with_sub("REGISTER")
            .with_json(&serde_json::json!({
                "base": "claude",
                "overlay_endpoint": "/tmp/ov.sock",
                "directory": daemon.workdir(),
            }))
            .unwrap();
        let session = json_of(client.send(&register).await);
        assert_eq!(session["code"], expected);
    }

    daemon.stop().await;
}

#[tokio::test]
async fn scheduled_message_is_delivered_once() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let overlay = daemon.workdir().join("ov.sock");
    let listener = tokio::net::UnixListener::bind(&overlay).unwrap();

    client
        .send(&register_body("dev-1", &daemon.workdir(), &overlay))
        .await;

    let schedule = Command::new("SESSION")
        .with_sub("SCHEDULE")
        .with_json(&serde_json::json!({
            "session_code": "dev-1",
            "duration": "200ms",
            "message": "wake",
        }))
        .unwrap();
    let scheduled = json_of(client.send(&schedule).await);
    assert!(scheduled["task_id"].as_str().is_some());

    // The task is listed until it fires.
    let tasks = json_of(client.send(&Command::new("SESSION").with_sub("TASKS")).await);
    assert_eq!(tasks["tasks"].as_array().unwrap().len(), 1);

    // Exactly one delivery arrives within the scheduler's granularity.
    let accept = tokio::time::timeout(std::time::Duration::from_millis(800), listener.accept())
        .await
        .expect("delivery never arrived");
    let (mut stream, _) = accept.unwrap();
    let mut received = String::new();
    stream.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "wake\n");

    // Fired tasks disappear from the listing and fire only once.
    let tasks = json_of(client.send(&Command::new("SESSION").with_sub("TASKS")).await);
    assert!(tasks["tasks"].as_array().unwrap().is_empty());
    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(400), listener.accept())
            .await
            .is_err(),
        "unexpected second delivery"
    );

    daemon.stop().await;
}

#[tokio::test]
async fn canceled_task_never_fires() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let overlay = daemon.workdir().join("ov.sock");
    let listener = tokio::net::UnixListener::bind(&overlay).unwrap();

    client
        .send(&register_body("dev-1", &daemon.workdir(), &overlay))
        .await;

    let schedule = Command::new("SESSION")
        .with_sub("SCHEDULE")
        .with_json(&serde_json::json!({
            "session_code": "dev-1",
            "duration": "300ms",
            "message": "never",
        }))
        .unwrap();
    let scheduled = json_of(client.send(&schedule).await);
    let task_id = scheduled["task_id"].as_str().unwrap().to_string();

    let cancel = Command::new("SESSION").with_sub("CANCEL").with_args([task_id.as_str()]);
    assert!(matches!(client.send(&cancel).await, Response::Ok { .. }));
    // A second cancel finds nothing.
    assert!(matches!(
        client.send(&cancel).await,
        Response::Err {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    assert!(
        tokio::time::timeout(std::time::Duration::from_millis(700), listener.accept())
            .await
            .is_err(),
        "canceled task was delivered"
    );

    daemon.stop().await;
}

#[tokio::test]
async fn send_delivers_immediately() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let overlay = daemon.workdir().join("ov.sock");
    let listener = tokio::net::UnixListener::bind(&overlay).unwrap();

    client
        .send(&register_body("dev-1", &daemon.workdir(), &overlay))
        .await;

    let send = Command::new("SESSION")
        .with_sub("SEND")
        .with_json(&serde_json::json!({"code": "dev-1", "message": "hello overlay"}))
        .unwrap();
    let reply = tokio::spawn({
        let daemon_socket = daemon.socket_path();
        async move {
            let stream = tokio::net::UnixStream::connect(daemon_socket).await.unwrap();
            let mut raw = RawClient::from_stream(stream);
            raw.send(&send).await
        }
    });

    let (mut stream, _) = listener.accept().await.unwrap();
    let mut received = String::new();
    stream.read_to_string(&mut received).await.unwrap();
    assert_eq!(received, "hello overlay\n");

    assert!(matches!(reply.await.unwrap(), Response::Ok { .. }));
    daemon.stop().await;
}

#[tokio::test]
async fn find_and_attach_walk_directory_ancestors() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    client
        .send(&register_body(
            "dev-1",
            &daemon.workdir(),
            &daemon.workdir().join("ov.sock"),
        ))
        .await;

    let deep = daemon.workdir().join("src/app");
    let find = Command::new("SESSION")
        .with_sub("FIND")
        .with_json(&serde_json::json!({"directory": deep}))
        .unwrap();
    let found = json_of(client.send(&find).await);
    assert_eq!(found["code"], "dev-1");
    assert_eq!(found["attached"], false);

    let attach = Command::new("SESSION")
        .with_sub("ATTACH")
        .with_json(&serde_json::json!({"directory": deep}))
        .unwrap();
    let attached = json_of(client.send(&attach).await);
    assert_eq!(attached["attached"], true);

    let miss = Command::new("SESSION")
        .with_sub("FIND")
        .with_json(&serde_json::json!({"directory": "/somewhere/else"}))
        .unwrap();
    assert!(matches!(
        client.send(&miss).await,
        Response::Err {
            code: ErrorCode::NotFound,
            ..
        }
    ));

    daemon.stop().await;
}

#[tokio::test]
async fn lists_are_directory_scoped() {
    let daemon = TestDaemon::start();
    let mut client = RawClient::connect(&daemon).await;

    let inside = daemon.workdir().join("proj");
    std::fs::create_dir_all(&inside).unwrap();
    client
        .send(&register_body("in-1", &inside, &daemon.workdir().join("a.sock")))
        .await;
    client
        .send(&register_body(
            "out-1",
            std::path::Path::new("/somewhere/else"),
            &daemon.workdir().join("b.sock"),
        ))
        .await;

    let scoped = Command::new("SESSION")
        .with_sub("LIST")
        .with_json(&serde_json::json!({"directory": inside.join("sub")}))
        .unwrap();
    let sessions = json_of(client.send(&scoped).await);
    let codes: Vec<&str> = sessions["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["in-1"]);

    let global = Command::new("SESSION")
        .with_sub("LIST")
        .with_json(&serde_json::json!({"global": true}))
        .unwrap();
    let sessions = json_of(client.send(&global).await);
    assert_eq!(sessions["sessions"].as_array().unwrap().len(), 2);

    daemon.stop().await;
}
