//! End-to-end tests of the matrix driver against a simulated device.


use futures_util::future::join_all;
use matrix_audio::{
    Capabilities, ConnectionStatus, GroupTarget, MatrixClient, MatrixError, MatrixModel, NoPlayers,
    PlaybackCommand, Routing, ZoneRecord, ZoneUpdate,
};
use std::sync::Arc;
use test_helpers::{directory, wait_for, DeviceSim, RecordingPlayer};

const ROUTE_3_TO_5: [u8; 7] = [0xFF, 0x55, 0x04, 0x03, 0x1D, 0x02, 0x04];
const DISCONNECT_3: [u8; 7] = [0xFF, 0x55, 0x04, 0x03, 0x1D, 0x02, 0x08];

async fn connect(sim: &DeviceSim) -> MatrixClient {
    MatrixClient::connect(sim.config(), Arc::new(NoPlayers))
        .await
        .unwrap()
}

fn records(matrix: &MatrixClient) -> Vec<ZoneRecord> {
    matrix.zones().iter().filter_map(|z| z.record()).collect()
}

// ========== Connection ==========

#[tokio::test]
async fn connect_fails_when_device_is_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = matrix_audio::MatrixConfig::new("127.0.0.1", MatrixModel::Ams8);
    config.port = port;
    config.connect_timeout_ms = 500;

    let err = MatrixClient::connect(config, Arc::new(NoPlayers))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, MatrixError::Connection(_)), "got {:?}", err);
}

#[tokio::test]
async fn zones_start_off_and_stale() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;

    assert_eq!(matrix.status(), ConnectionStatus::Connected);
    assert_eq!(matrix.zones().len(), 8);
    for zone in matrix.zones() {
        assert!(!zone.is_on());
        assert!(!zone.is_available());
    }
    assert!(matrix.zone(9).is_err());
}

#[tokio::test]
async fn connection_loss_marks_zones_stale() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    matrix.refresh().await.unwrap();
    assert!(matrix.zone(1).unwrap().is_available());

    let mut updates = matrix.subscribe();
    sim.kill();
    let err = matrix.zone(1).unwrap().set_volume(20).await.unwrap_err();
    assert!(err.is_connection_error(), "got {:?}", err);

    wait_for(&mut updates, |u| matches!(u, ZoneUpdate::Connection(ConnectionStatus::Failed))).await;
    for zone in matrix.zones() {
        assert!(!zone.is_available());
    }
}

#[tokio::test]
async fn next_command_reconnects_and_refresh_clears_staleness() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    matrix.refresh().await.unwrap();

    sim.drop_connections();
    let zone = matrix.zone(1).unwrap();
    let err = zone.set_volume(20).await.unwrap_err();
    assert!(err.is_connection_error(), "got {:?}", err);
    assert!(!zone.is_available());

    zone.set_volume(20).await.unwrap();
    assert_eq!(matrix.status(), ConnectionStatus::Connected);
    assert_eq!(sim.state().volumes[0], 20);
    assert!(!zone.is_available());

    matrix.refresh().await.unwrap();
    for zone in matrix.zones() {
        assert!(zone.is_available());
    }
}

// ========== Routing and power ==========

#[tokio::test]
async fn turn_off_then_on_restores_the_last_input() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(3).unwrap();

    zone.select_source(5).await.unwrap();
    assert_eq!(zone.routing(), Routing::Connected(5));
    assert_eq!(zone.source().as_deref(), Some("Input 5"));

    zone.turn_off().await.unwrap();
    assert!(!zone.is_on());
    assert_eq!(zone.record().unwrap().last_input, Some(5));
    assert_eq!(sim.route(3), None);

    zone.turn_on().await.unwrap();
    assert_eq!(zone.routing(), Routing::Connected(5));
    assert_eq!(sim.route(3), Some(5));

    let log = sim.log();
    assert_eq!(log, vec![ROUTE_3_TO_5.to_vec(), DISCONNECT_3.to_vec(), ROUTE_3_TO_5.to_vec()]);
}

#[tokio::test]
async fn turn_on_falls_back_to_the_default_input() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.default_input = Some(4);
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();

    let zone = matrix.zone(6).unwrap();
    zone.turn_on().await.unwrap();
    assert_eq!(zone.routing(), Routing::Connected(4));
    assert_eq!(sim.route(6), Some(4));

    // already on: nothing is sent
    sim.clear_log();
    zone.turn_on().await.unwrap();
    assert!(sim.log().is_empty());
}

#[tokio::test]
async fn turn_on_without_any_source_fails_and_stays_off() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(2).unwrap();

    let err = zone.turn_on().await.unwrap_err();
    assert!(matches!(err, MatrixError::NoSourceAvailable(2)), "got {:?}", err);
    assert!(!zone.is_on());
    assert!(sim.log().is_empty());
}

#[tokio::test]
async fn selecting_an_inactive_input_is_rejected() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.active_inputs.remove(&7);
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();

    let err = matrix.zone(1).unwrap().select_source(7).await.unwrap_err();
    assert!(matches!(err, MatrixError::InvalidTarget(_)));
    assert!(sim.log().is_empty());
    assert!(!matrix.zone(1).unwrap().source_list().contains(&"Input 7".to_string()));
}

#[tokio::test]
async fn select_source_by_name_uses_configured_names() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.input_names.insert(3, "Turntable".to_string());
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();
    let zone = matrix.zone(1).unwrap();

    zone.select_source_by_name("Turntable").await.unwrap();
    assert_eq!(sim.route(1), Some(3));
    assert!(zone.select_source_by_name("Radio").await.is_err());
}

// ========== Volume and mute ==========

#[tokio::test]
async fn volume_applies_whether_on_or_off() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(4).unwrap();

    zone.set_volume(150).await.unwrap();
    assert_eq!(zone.volume(), Some(100));
    assert!(!zone.is_on());
    assert_eq!(sim.state().volumes[3], 100);

    zone.set_muted(true).await.unwrap();
    assert!(zone.is_muted());
    assert!(sim.state().mutes[3]);
}

#[tokio::test]
async fn volume_zero_is_sent_as_the_lowest_step() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(2).unwrap();

    zone.set_volume(0).await.unwrap();
    assert_eq!(sim.log().last().unwrap(), &vec![0xFF, 0x55, 0x04, 0x03, 0x1E, 0x01, 0x01]);
    assert_eq!(zone.volume(), Some(1));
}

#[tokio::test]
async fn volume_steps_read_back_the_level() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(1).unwrap();

    zone.volume_up(false).await.unwrap();
    assert_eq!(zone.volume(), Some(31));
    zone.volume_down(true).await.unwrap();
    assert_eq!(zone.volume(), Some(26));
}

#[tokio::test]
async fn audio_sense_events_are_skipped() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    sim.state().audio_sense_next = true;

    let zone = matrix.zone(2).unwrap();
    zone.set_volume(50).await.unwrap();
    zone.select_source(1).await.unwrap();
    assert_eq!(zone.volume(), Some(50));
    assert_eq!(sim.route(2), Some(1));
}

// ========== Refresh ==========

#[tokio::test]
async fn refresh_adopts_hardware_state() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    sim.set_route(7, Some(3));
    sim.set_volume(7, 55);
    sim.state().mutes[6] = true;

    matrix.refresh().await.unwrap();

    let zone = matrix.zone(7).unwrap();
    let record = zone.record().unwrap();
    assert_eq!(record.routing, Routing::Connected(3));
    assert_eq!(record.last_input, Some(3));
    assert_eq!(record.volume, Some(55));
    assert!(record.muted);
    assert!(zone.is_available());
    assert!(!matrix.zone(1).unwrap().is_on());
}

#[tokio::test]
async fn refresh_with_a_bad_frame_changes_nothing() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    sim.set_route(2, Some(2));
    matrix.refresh().await.unwrap();
    let before = records(&matrix);

    sim.set_route(1, Some(6));
    sim.set_volume(3, 90);
    sim.state().garble_source_of = Some(5);

    let err = matrix.refresh().await.unwrap_err();
    assert!(matches!(err, MatrixError::Decode(_)), "got {:?}", err);
    assert_eq!(records(&matrix), before);
}

#[tokio::test]
async fn mismatched_reply_during_refresh_changes_nothing() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    sim.set_route(4, Some(1));
    matrix.refresh().await.unwrap();
    let before = records(&matrix);

    sim.set_route(2, Some(3));
    sim.state().mismatch_source_of = Some(5);

    let err = matrix.refresh().await.unwrap_err();
    assert!(matches!(err, MatrixError::Decode(_)), "got {:?}", err);
    assert_eq!(records(&matrix), before);

    // the link is reopened and usable
    sim.state().mismatch_source_of = None;
    matrix.refresh().await.unwrap();
    assert_eq!(matrix.zone(2).unwrap().routing(), Routing::Connected(3));
}

#[tokio::test]
async fn hardware_routing_to_an_inactive_input_reads_as_off() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.active_inputs.remove(&8);
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();
    sim.set_route(1, Some(8));

    matrix.refresh().await.unwrap();
    let record = matrix.zone(1).unwrap().record().unwrap();
    assert_eq!(record.routing, Routing::Disconnected);
    assert_eq!(record.last_input, None);
}

#[tokio::test]
async fn polling_refreshes_in_the_background() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    sim.set_route(8, Some(1));
    let mut updates = matrix.subscribe();

    matrix.start_polling();
    wait_for(&mut updates, |u| {
        matches!(u, ZoneUpdate::Changed(r) if r.id == 8 && r.routing == Routing::Connected(1))
    })
    .await;
    matrix.stop_polling();

    assert!(matrix.zone(8).unwrap().is_available());
}

// ========== Queue ==========

#[tokio::test]
async fn concurrent_commands_reach_the_device_in_submission_order() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zones = matrix.zones();

    let results = join_all(
        zones
            .iter()
            .enumerate()
            .map(|(i, zone)| zone.set_volume(10 + i as u8)),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let outputs: Vec<u8> = sim.log().iter().map(|frame| frame[5]).collect();
    assert_eq!(outputs, (0..8).collect::<Vec<u8>>());
    assert_eq!(sim.state().volumes, (10..18).collect::<Vec<u8>>());
}

#[tokio::test]
async fn raw_commands_and_trigger_go_through_the_queue() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;

    let text = matrix
        .send_raw(vec![0xFF, 0x55, 0x04, 0x03, 0x1E, 0xF5, 0x00])
        .await
        .unwrap();
    assert_eq!(text, "Volume : 0x1E");

    matrix.set_trigger_zone(true).await.unwrap();
    assert_eq!(sim.log().last().unwrap(), &vec![0xFF, 0x55, 0x03, 0x05, 0x50, 0x00]);
}

#[tokio::test]
async fn shutdown_rejects_later_commands() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(1).unwrap();

    matrix.shutdown().await;
    let err = zone.set_volume(10).await.unwrap_err();
    assert!(matches!(err, MatrixError::ConnectionLost));
}

// ========== Reconcile ==========

#[tokio::test]
async fn reconcile_switches_off_zones_on_a_removed_input() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let zone = matrix.zone(2).unwrap();
    zone.select_source(6).await.unwrap();

    let mut config = sim.config();
    config.active_inputs.remove(&6);
    let report = matrix.reconcile(config).await.unwrap();

    assert_eq!(report.disconnected_zones, vec![2]);
    assert!(!zone.is_on());
    assert_eq!(zone.record().unwrap().last_input, None);
    assert_eq!(sim.route(2), None);
    assert!(!zone.source_list().contains(&"Input 6".to_string()));
}

#[tokio::test]
async fn route_queued_across_input_removal_is_undone() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.min_send_interval_ms = 100;
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();

    let busy: Vec<_> = [1, 3]
        .into_iter()
        .map(|z| {
            let zone = matrix.zone(z).unwrap();
            tokio::spawn(async move { zone.set_volume(40).await })
        })
        .collect();
    let zone = matrix.zone(2).unwrap();
    let select = {
        let zone = zone.clone();
        tokio::spawn(async move { zone.select_source(6).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut config = sim.config();
    config.active_inputs.remove(&6);
    let report = matrix.reconcile(config).await.unwrap();
    assert!(report.disconnected_zones.is_empty());

    let err = select.await.unwrap().unwrap_err();
    assert!(matches!(err, MatrixError::InvalidTarget(_)), "got {:?}", err);
    for task in busy {
        task.await.unwrap().unwrap();
    }
    assert_eq!(zone.routing(), Routing::Disconnected);
    assert_eq!(sim.route(2), None);
}

#[tokio::test]
async fn reconcile_prunes_and_adds_zones() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let mut config = sim.config();
    config.active_outputs.remove(&5);
    let matrix = MatrixClient::connect(config, Arc::new(NoPlayers)).await.unwrap();
    assert!(matrix.zone(5).is_err());

    let mut updates = matrix.subscribe();
    let mut config = sim.config();
    config.active_outputs.remove(&8);
    config.output_names.insert(1, "Patio".to_string());
    let report = matrix.reconcile(config).await.unwrap();

    assert_eq!(report.added_zones, vec![5]);
    assert_eq!(report.removed_zones, vec![8]);
    assert!(matrix.zone(8).is_err());
    assert!(!matrix.zone(5).unwrap().is_on());
    assert_eq!(matrix.zone(1).unwrap().name().as_deref(), Some("Patio"));
    wait_for(&mut updates, |u| matches!(u, ZoneUpdate::Removed(8))).await;
}

#[tokio::test]
async fn reconcile_refuses_a_different_device() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;

    let mut config = sim.config();
    config.host = "10.0.0.9".to_string();
    let err = matrix.reconcile(config).await.unwrap_err();
    assert!(matches!(err, MatrixError::Config(_)));
}

// ========== Links and grouping ==========

#[tokio::test]
async fn linked_input_proxies_metadata_and_playback() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let den = Arc::new(RecordingPlayer::new("media_player.den").playing("So What"));
    let mut config = sim.config();
    config.input_links.insert(2, "media_player.den".to_string());
    let matrix = MatrixClient::connect(config, directory(vec![den.clone()])).await.unwrap();

    let zone = matrix.zone(1).unwrap();
    zone.select_source(2).await.unwrap();
    assert_eq!(zone.metadata().and_then(|m| m.title).as_deref(), Some("So What"));
    zone.turn_off().await.unwrap();
    assert!(zone.metadata().is_none());

    let input = matrix.input(2).unwrap();
    assert_eq!(input.link().as_deref(), Some("media_player.den"));
    assert!(input.is_volume_fixed());
    input.play().await.unwrap();
    input.next_track().await.unwrap();
    assert_eq!(*den.commands.lock(), vec![PlaybackCommand::Play, PlaybackCommand::Next]);

    let err = matrix.input(1).unwrap().pause().await.unwrap_err();
    assert!(matches!(err, MatrixError::InvalidTarget(_)));
    assert_eq!(matrix.linked_inputs().len(), 1);
}

#[tokio::test]
async fn playback_needs_the_capability() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let radio = Arc::new(RecordingPlayer::new("media_player.radio").with_capabilities(Capabilities {
        join: true,
        playback_control: false,
    }));
    let mut config = sim.config();
    config.input_links.insert(1, "media_player.radio".to_string());
    let matrix = MatrixClient::connect(config, directory(vec![radio.clone()])).await.unwrap();

    let err = matrix.input(1).unwrap().stop().await.unwrap_err();
    assert!(matches!(err, MatrixError::InvalidTarget(_)));
    assert!(radio.commands.lock().is_empty());
}

#[tokio::test]
async fn join_reports_partial_failure() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let den = Arc::new(
        RecordingPlayer::new("media_player.den")
            .with_peers(&["media_player.kitchen", "media_player.den", "media_player.patio"])
            .failing_join("media_player.patio"),
    );
    let mut config = sim.config();
    config.input_links.insert(2, "media_player.den".to_string());
    let matrix = MatrixClient::connect(config, directory(vec![den.clone()])).await.unwrap();
    let input = matrix.input(2).unwrap();

    let members = input.joinable_members().await.unwrap();
    assert_eq!(members.iter().filter(|m| matches!(m, GroupTarget::Zone(_))).count(), 8);
    assert!(members.contains(&GroupTarget::External("media_player.kitchen".to_string())));
    assert!(!members.contains(&GroupTarget::External("media_player.den".to_string())));

    let kitchen = GroupTarget::External("media_player.kitchen".to_string());
    let patio = GroupTarget::External("media_player.patio".to_string());
    let report = input
        .join(&[
            GroupTarget::Zone(3),
            GroupTarget::Zone(4),
            kitchen.clone(),
            patio.clone(),
            GroupTarget::Zone(3),
        ])
        .await
        .unwrap();

    assert_eq!(report.joined, vec![GroupTarget::Zone(3), GroupTarget::Zone(4), kitchen]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, patio);
    assert!(matches!(report.failed[0].1, MatrixError::External(_)));
    assert!(!report.is_complete());

    assert_eq!(sim.route(3), Some(2));
    assert_eq!(sim.route(4), Some(2));
    assert_eq!(sim.log().len(), 2);
    assert_eq!(*den.joins.lock(), vec!["media_player.kitchen".to_string()]);

    let grouped = input.group_members().await.unwrap();
    assert!(grouped.contains(&GroupTarget::Zone(3)));
    assert!(grouped.contains(&GroupTarget::Zone(4)));
    assert!(!grouped.contains(&GroupTarget::Zone(1)));
}

#[tokio::test]
async fn unlinked_input_joins_hardware_zones_only() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let input = matrix.input(1).unwrap();

    let members = input.joinable_members().await.unwrap();
    assert_eq!(members, (1..=8).map(GroupTarget::Zone).collect::<Vec<_>>());

    let report = input
        .join(&[GroupTarget::Zone(1), GroupTarget::External("media_player.x".to_string())])
        .await
        .unwrap();
    assert_eq!(report.joined, vec![GroupTarget::Zone(1)]);
    assert!(matches!(report.failed[0].1, MatrixError::InvalidTarget(_)));
    assert_eq!(sim.route(1), Some(1));
}

#[tokio::test]
async fn peer_lookup_failure_degrades_to_hardware_zones() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let den = Arc::new(RecordingPlayer::new("media_player.den").failing_peers());
    let mut config = sim.config();
    config.input_links.insert(2, "media_player.den".to_string());
    let matrix = MatrixClient::connect(config, directory(vec![den])).await.unwrap();

    let members = matrix.input(2).unwrap().joinable_members().await.unwrap();
    assert_eq!(members.len(), 8);
    assert!(members.iter().all(|m| matches!(m, GroupTarget::Zone(_))));
}

#[tokio::test]
async fn unjoin_turns_the_zone_off() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    let input = matrix.input(4).unwrap();
    input.join(&[GroupTarget::Zone(6)]).await.unwrap();

    let zone = matrix.zone(6).unwrap();
    zone.unjoin().await.unwrap();
    assert!(!zone.is_on());
    assert_eq!(zone.record().unwrap().last_input, Some(4));
    assert!(input.group_members().await.unwrap().is_empty());
}

// ========== Diagnostics ==========

#[tokio::test]
async fn diagnostics_serialize() {
    let sim = DeviceSim::start(MatrixModel::Ams8).await;
    let matrix = connect(&sim).await;
    matrix.zone(1).unwrap().select_source(3).await.unwrap();

    let json = serde_json::to_value(matrix.diagnostics()).unwrap();
    assert!(json.get("host").is_none());
    assert_eq!(json["status"], "connected");
    assert_eq!(json["zones"].as_array().unwrap().len(), 8);
    assert_eq!(json["zones"][0]["routing"]["input"], 3);
}
