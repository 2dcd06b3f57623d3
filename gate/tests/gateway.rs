//! End-to-end tests driving the gateway against the C3 emulator: OSC in
//! over UDP, C3 out over TCP, responses observed on a local UDP socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use c3_sim::C3Emulator;
use kuka_c3::{MoveGroup, Position, PositionKind};
use osc_io::{OscPacket, OscServer, OscValue};

use kuka_c3_osc_gate::bot::{AllowAllTransitions, Bot};
use kuka_c3_osc_gate::config::{BotConfig, TeamConfig};
use kuka_c3_osc_gate::errors::MoveError;
use kuka_c3_osc_gate::team::Team;

const E2E_TIMEOUT: Duration = Duration::from_secs(30);

fn axis_target(a1: f32, a2: f32, a3: f32) -> Position {
    let mut target = Position::new(PositionKind::E6Axis);
    target.set(0, a1).unwrap();
    target.set(1, a2).unwrap();
    target.set(2, a3).unwrap();
    target
}

fn plain_bot_config(name: &str, address: String) -> BotConfig {
    BotConfig {
        name: name.to_string(),
        address,
        ..BotConfig::default()
    }
}

fn cue_bot_config(name: &str, address: String, groups: Vec<MoveGroup>) -> BotConfig {
    BotConfig {
        osc_request_position_path: Some(format!("/{name}/pos")),
        osc_response_position: Some(format!("/{name}/pos/out")),
        move_groups: groups,
        ..plain_bot_config(name, address)
    }
}

async fn send_cue(osc_port: u16, path: &str, values: &[i32]) {
    let mut packet = OscPacket::new(path);
    for &value in values {
        packet.append(OscValue::Int32(value));
    }
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(&packet.to_bytes(), ("127.0.0.1", osc_port))
        .await
        .unwrap();
}

/// Receives datagrams until one parses to the wanted path, returning its
/// three int32 arguments.
async fn recv_status(socket: &UdpSocket, path: &str) -> (i32, i32, i32) {
    let mut buffer = [0u8; 1024];
    loop {
        let (n, _) = socket.recv_from(&mut buffer).await.unwrap();
        let packet = OscPacket::parse(&buffer[..n]).unwrap();
        if packet.path() != path {
            continue;
        }
        match packet.values() {
            [OscValue::Int32(status), OscValue::Int32(index), OscValue::Int32(id)] => {
                return (*status, *index, *id);
            }
            other => panic!("unexpected response payload: {other:?}"),
        }
    }
}

#[tokio::test]
async fn startup_requires_home_pose() {
    let emulator = C3Emulator::start(0).await.unwrap();
    emulator.set_axis_act(axis_target(15.0, -90.0, 90.0)).await;

    let result = Bot::up(
        plain_bot_config("kuka-a", emulator.address()),
        None,
        Arc::new(AllowAllTransitions),
    )
    .await;

    let err = result.err().expect("bot must refuse to start off HOME");
    assert!(err.to_string().contains("HOME"), "got: {err}");
    emulator.shutdown().await;
}

#[tokio::test]
async fn direct_joint_move_completes_and_clears_the_flag() {
    let emulator = C3Emulator::start(0).await.unwrap();
    let bot = Bot::up(
        plain_bot_config("kuka-a", emulator.address()),
        None,
        Arc::new(AllowAllTransitions),
    )
    .await
    .unwrap();

    // Already at HOME: succeeds without issuing any motion command.
    bot.move_to(&Position::home()).await.unwrap();
    assert_eq!(emulator.com_action().await, "1");

    let target = axis_target(10.0, -80.0, 80.0);
    timeout(E2E_TIMEOUT, bot.move_to(&target))
        .await
        .expect("move must settle")
        .unwrap();

    assert!(!bot.is_movement());
    assert!(emulator.axis_act().await.approx_eq(&target, 1e-4));
    assert_eq!(emulator.com_action().await, "2");

    bot.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn concurrent_move_is_rejected_not_queued() {
    let emulator = C3Emulator::start(0).await.unwrap();
    let bot = Bot::up(
        plain_bot_config("kuka-a", emulator.address()),
        None,
        Arc::new(AllowAllTransitions),
    )
    .await
    .unwrap();

    let first_bot = Arc::clone(&bot);
    let first_target = axis_target(10.0, -80.0, 80.0);
    let first = tokio::spawn(async move { first_bot.move_to(&first_target).await });

    // The first move needs its full debounce window; reject meanwhile.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = bot.move_to(&axis_target(5.0, -85.0, 85.0)).await;
    assert_eq!(second.unwrap_err(), MoveError::AlreadyMoving);

    timeout(E2E_TIMEOUT, first)
        .await
        .expect("first move must settle")
        .unwrap()
        .unwrap();
    assert!(!bot.is_movement());

    bot.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn position_cues_respond_exactly_once() {
    let emulator = C3Emulator::start(0).await.unwrap();

    let response_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response_addr = response_socket.local_addr().unwrap().to_string();

    let first = axis_target(10.0, -80.0, 80.0);
    let second = axis_target(20.0, -70.0, 70.0);
    let group = MoveGroup {
        id: 5,
        positions: vec![first, second.clone()],
    };

    let config = TeamConfig {
        osc_response_address: Some(response_addr),
        bots: vec![cue_bot_config("kuka-a", emulator.address(), vec![group])],
        ..TeamConfig::default()
    };

    let osc_server = OscServer::new(0);
    osc_server.listen_and_serve().await.unwrap();
    let osc_port = osc_server.local_addr().await.unwrap().port();
    let team = Team::up(config, &osc_server, Arc::new(AllowAllTransitions))
        .await
        .unwrap();

    // Unknown group: immediate Error response, no motion command issued.
    send_cue(osc_port, "/kuka-a/pos", &[999, 7, 0]).await;
    let status = timeout(E2E_TIMEOUT, recv_status(&response_socket, "/kuka-a/pos/out"))
        .await
        .expect("error response must arrive");
    assert_eq!(status, (3, 7, 999));
    assert_eq!(emulator.com_action().await, "1");

    // Named cue: both positions run in sequence, then one OK response.
    send_cue(osc_port, "/kuka-a/pos", &[5, 42, 0]).await;
    let status = timeout(E2E_TIMEOUT, recv_status(&response_socket, "/kuka-a/pos/out"))
        .await
        .expect("ok response must arrive");
    assert_eq!(status, (1, 42, 5));
    assert!(emulator.axis_act().await.approx_eq(&second, 1e-4));

    team.shutdown().await;
    osc_server.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn reserved_cue_runs_the_internal_routine() {
    let emulator = C3Emulator::start(0).await.unwrap();

    let response_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response_addr = response_socket.local_addr().unwrap().to_string();

    let config = TeamConfig {
        osc_response_address: Some(response_addr),
        bots: vec![cue_bot_config("kuka-a", emulator.address(), Vec::new())],
        ..TeamConfig::default()
    };

    let osc_server = OscServer::new(0);
    osc_server.listen_and_serve().await.unwrap();
    let osc_port = osc_server.local_addr().await.unwrap().port();
    let team = Team::up(config, &osc_server, Arc::new(AllowAllTransitions))
        .await
        .unwrap();

    send_cue(osc_port, "/kuka-a/pos", &[200, 3, 0]).await;
    let status = timeout(E2E_TIMEOUT, recv_status(&response_socket, "/kuka-a/pos/out"))
        .await
        .expect("routine response must arrive");
    assert_eq!(status, (1, 3, 200));
    assert_eq!(emulator.com_action().await, "200");
    assert!(emulator.axis_act().await.approx_eq(&Position::home(), 1e-4));

    team.shutdown().await;
    osc_server.shutdown().await;
    emulator.shutdown().await;
}

#[tokio::test]
async fn team_cue_aggregates_even_when_a_bot_lacks_the_group() {
    let emulator_a = C3Emulator::start(0).await.unwrap();
    let emulator_b = C3Emulator::start(0).await.unwrap();

    let response_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let response_addr = response_socket.local_addr().unwrap().to_string();

    let group = MoveGroup {
        id: 10,
        positions: vec![axis_target(10.0, -80.0, 80.0)],
    };

    let config = TeamConfig {
        osc_request_position_path: Some("/team/pos".to_string()),
        osc_response_address: Some(response_addr),
        osc_response_position_path: Some("/team/pos/out".to_string()),
        bots: vec![
            cue_bot_config("kuka-a", emulator_a.address(), vec![group]),
            cue_bot_config("kuka-b", emulator_b.address(), Vec::new()),
        ],
    };

    let osc_server = OscServer::new(0);
    osc_server.listen_and_serve().await.unwrap();
    let osc_port = osc_server.local_addr().await.unwrap().port();
    let team = Team::up(config, &osc_server, Arc::new(AllowAllTransitions))
        .await
        .unwrap();

    send_cue(osc_port, "/team/pos", &[10, 1]).await;
    let status = timeout(E2E_TIMEOUT, recv_status(&response_socket, "/team/pos/out"))
        .await
        .expect("team response must arrive");
    assert_eq!(status, (1, 1, 10));

    // Only bot A moved; bot B stayed at HOME.
    assert_eq!(emulator_a.com_action().await, "2");
    assert_eq!(emulator_b.com_action().await, "1");

    team.shutdown().await;
    osc_server.shutdown().await;
    emulator_a.shutdown().await;
    emulator_b.shutdown().await;
}
