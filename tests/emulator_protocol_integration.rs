//! Integration test driving a real in-process Terminal Emulator over a
//! loopback socket through the Protocol Engine client, the way the teacher's
//! `tests/integration/server_legacy.rs` drives the legacy TCP server through
//! raw socket helpers.

use std::{sync::Arc, time::Duration};

use camino::Utf8Path;
use payagent::{
    emulator::{self, NoDelay, StateCore},
    engine::{self, Timeouts},
    envelope::Envelope,
};
use tempfile::{TempDir, tempdir};
use tokio::{net::TcpListener, sync::watch};

async fn spawn_emulator() -> (std::net::SocketAddr, watch::Sender<bool>, TempDir) {
    let dir = tempdir().expect("tempdir");
    let data_file = dir.path().join("state.json");
    let data_file = Utf8Path::from_path(&data_file).expect("utf8 path").to_owned();

    let state = Arc::new(StateCore::load_or_init(&data_file, Duration::from_secs(30)).expect("load"));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(emulator::dispatch::run(listener, state, Arc::new(NoDelay), shutdown_rx));
    (addr, shutdown_tx, dir)
}

fn timeouts() -> Timeouts {
    Timeouts::new(Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(2))
}

#[tokio::test]
async fn sale_round_trips_through_a_real_emulator() {
    let (addr, _shutdown, _dir) = spawn_emulator().await;

    let envelope = Envelope::new("Sale", "ECR1", "000001")
        .with_data(serde_json::json!({"baseAmount": "25.00", "maskedPAN": "411111XXXXXX1234"}));
    let outcome = engine::send_command(addr, &envelope, timeouts()).await.expect("session succeeds");

    assert_eq!(outcome.response["message"], "MSG");
    let cmd_result = &outcome.response["data"]["cmdResult"];
    assert_eq!(cmd_result["result"], "Success");
}

#[tokio::test]
async fn sale_above_threshold_is_declined() {
    let (addr, _shutdown, _dir) = spawn_emulator().await;

    let envelope = Envelope::new("Sale", "ECR1", "000002")
        .with_data(serde_json::json!({"baseAmount": "600.00", "maskedPAN": "411111XXXXXX1234"}));
    let outcome = engine::send_command(addr, &envelope, timeouts()).await.expect("session succeeds");

    assert_eq!(outcome.response["data"]["cmdResult"]["result"], "Failed");
}

#[tokio::test]
async fn unknown_command_yields_cmd001_without_a_state_mutation() {
    let (addr, _shutdown, _dir) = spawn_emulator().await;

    let envelope = Envelope::new("NotACommand", "ECR1", "000003");
    let outcome = engine::send_command(addr, &envelope, timeouts()).await.expect("session succeeds");

    assert_eq!(outcome.response["message"], "ERR");
    assert_eq!(outcome.response["data"]["cmdResult"]["errorCode"], "CMD001");
}

#[tokio::test]
async fn ping_receives_a_prompt_acknowledged_session() {
    let (addr, _shutdown, _dir) = spawn_emulator().await;

    let envelope = Envelope::new("Ping", "ECR1", "000004");
    let outcome = engine::send_command(addr, &envelope, timeouts()).await.expect("session succeeds");

    assert!(matches!(outcome.response["message"].as_str(), Some("MSG")));
}
