//! Track relay behaviour against in-memory rooms
//!
//! Run with: cargo test -p roombridge-server --test relay_tests

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use roombridge::error::BridgeError;
use roombridge::relay::{create_relay, RelaySettings, RelayState};
use roombridge_media::{ReassemblerConfig, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};

use common::{counting_keyframes, eventually, opus, subscribed, vp8, vp8_frame, FakeInbound, FakeSession};

fn settings(max_video_late: u16, max_audio_late: u16) -> RelaySettings {
    RelaySettings {
        reassembler: ReassemblerConfig::new(max_video_late, max_audio_late),
        unpublish_on_close: false,
    }
}

#[tokio::test]
async fn in_order_frame_is_written_once() {
    let destination = FakeSession::new("C");
    let (track, packets) = FakeInbound::video("cam");
    let (keyframes, calls) = counting_keyframes();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &RelaySettings::default(),
            CancellationToken::new(),
        )
        .await
    );
    assert_eq!(relay.state(), RelayState::Relaying);
    assert_eq!(relay.inbound_track_id(), "cam");

    packets.send(vp8(1, 9000, true, false)).unwrap();
    packets.send(vp8(2, 9000, false, false)).unwrap();
    packets.send(vp8(3, 9000, false, true)).unwrap();

    let outbound = destination.published()[0].clone();
    eventually("one frame", || outbound.frame_count() == 1).await;

    let frame = &outbound.frames()[0];
    assert_eq!(frame.packet_count(), 3);
    assert_eq!((frame.first_sequence, frame.last_sequence), (1, 3));
    assert_eq!(relay.stats().packets_received, 3);
    assert_eq!(relay.stats().frames_written, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    relay.stop();
    relay.closed().await;
}

#[tokio::test]
async fn gap_beyond_window_requests_one_keyframe() {
    let destination = FakeSession::new("C");
    let (track, packets) = FakeInbound::video("cam");
    let (keyframes, calls) = counting_keyframes();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &settings(10, 5),
            CancellationToken::new(),
        )
        .await
    );

    // 3 and 4 never arrive
    packets.send(vp8(1, 3000, true, false)).unwrap();
    packets.send(vp8(2, 3000, false, false)).unwrap();
    for sequence in 5..=20 {
        packets.send(vp8_frame(sequence)).unwrap();
    }

    let outbound = destination.published()[0].clone();
    eventually("frames after the gap", || outbound.frame_count() == 16).await;

    let frames = outbound.frames();
    assert_eq!(frames[0].first_sequence, 5);
    assert_eq!(frames[0].dropped_before, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(relay.stats().keyframe_requests, 1);
    assert_eq!(relay.stats().loss_events, 1);
}

#[tokio::test]
async fn audio_loss_never_requests_keyframes() {
    let destination = FakeSession::new("C");
    let (track, packets) = FakeInbound::audio("mic");
    let (keyframes, calls) = counting_keyframes();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &settings(10, 5),
            CancellationToken::new(),
        )
        .await
    );

    let lost = [10u16, 11, 20];
    for sequence in (1..=30).filter(|s| !lost.contains(s)) {
        packets.send(opus(sequence)).unwrap();
    }

    let outbound = destination.published()[0].clone();
    eventually("one frame per packet", || outbound.frame_count() == 27).await;

    assert!(outbound.frames().iter().all(|frame| frame.packet_count() == 1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(relay.stats().keyframe_requests, 0);
    assert_eq!(relay.stats().loss_events, 2);
}

#[tokio::test]
async fn every_supported_codec_gets_a_relay() {
    let destination = FakeSession::new("C");

    for mime_type in [MIME_TYPE_VP8, MIME_TYPE_H264, MIME_TYPE_OPUS] {
        let (track, _packets) = FakeInbound::new(mime_type, mime_type);
        let (keyframes, _) = counting_keyframes();
        assert_ok!(
            create_relay(
                subscribed(track, keyframes),
                destination.clone(),
                &RelaySettings::default(),
                CancellationToken::new(),
            )
            .await
        );
    }

    let published: Vec<String> = destination
        .published()
        .iter()
        .map(|track| track.capability.mime_type.clone())
        .collect();
    assert_eq!(published, vec![MIME_TYPE_VP8, MIME_TYPE_H264, MIME_TYPE_OPUS]);
}

#[tokio::test]
async fn unsupported_codec_publishes_nothing() {
    let destination = FakeSession::new("C");
    let (track, _packets) = FakeInbound::new("screen", "video/AV1");
    let (keyframes, _) = counting_keyframes();

    let result = create_relay(
        subscribed(track, keyframes),
        destination.clone(),
        &RelaySettings::default(),
        CancellationToken::new(),
    )
    .await;

    let err = assert_err!(result);
    assert!(matches!(err, BridgeError::UnsupportedCodec(mime) if mime == "video/AV1"));
    assert_eq!(destination.published_count(), 0);
}

#[tokio::test]
async fn publish_failure_is_reported() {
    let destination = FakeSession::new("C");
    destination.fail_publish.store(true, Ordering::SeqCst);
    let (track, _packets) = FakeInbound::video("cam");
    let (keyframes, _) = counting_keyframes();

    let result = create_relay(
        subscribed(track, keyframes),
        destination.clone(),
        &RelaySettings::default(),
        CancellationToken::new(),
    )
    .await;

    let err = assert_err!(result);
    assert!(matches!(err, BridgeError::Publish(_)));
    assert_eq!(destination.published_count(), 0);
}

#[tokio::test]
async fn write_failures_do_not_stop_the_relay() {
    let destination = FakeSession::new("C");
    destination.fail_writes.store(true, Ordering::SeqCst);
    let (track, packets) = FakeInbound::video("cam");
    let (keyframes, _) = counting_keyframes();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &RelaySettings::default(),
            CancellationToken::new(),
        )
        .await
    );

    for sequence in 1..=3 {
        packets.send(vp8_frame(sequence)).unwrap();
    }

    eventually("three failed writes", || relay.stats().write_failures == 3).await;
    assert_eq!(relay.state(), RelayState::Relaying);
    assert_eq!(relay.stats().frames_written, 0);
}

#[tokio::test]
async fn stream_end_closes_the_relay() {
    let destination = FakeSession::new("C");
    let (track, packets) = FakeInbound::video("cam");
    let (keyframes, _) = counting_keyframes();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &RelaySettings::default(),
            CancellationToken::new(),
        )
        .await
    );

    packets.send(vp8_frame(1)).unwrap();
    drop(packets);

    assert_ok!(tokio::time::timeout(Duration::from_secs(5), relay.closed()).await);
    assert_eq!(relay.state(), RelayState::Closed);
    assert_eq!(relay.stats().frames_written, 1);
    // Outbound tracks stay published unless configured otherwise
    assert!(destination.unpublished().is_empty());
}

#[tokio::test]
async fn cancellation_closes_and_unpublishes() {
    let destination = FakeSession::new("C");
    let (track, _packets) = FakeInbound::video("cam");
    let (keyframes, _) = counting_keyframes();
    let cancel = CancellationToken::new();

    let relay = assert_ok!(
        create_relay(
            subscribed(track, keyframes),
            destination.clone(),
            &RelaySettings {
                unpublish_on_close: true,
                ..Default::default()
            },
            cancel.clone(),
        )
        .await
    );

    // The relay is blocked in a read that will never complete
    cancel.cancel();

    assert_ok!(tokio::time::timeout(Duration::from_secs(5), relay.closed()).await);
    assert_eq!(relay.state(), RelayState::Closed);
    assert_eq!(destination.unpublished(), vec![relay.outbound_track().id()]);
}

#[tokio::test]
async fn concurrent_relays_are_independent() {
    let destination = FakeSession::new("C");
    let (camera, camera_packets) = FakeInbound::video("cam");
    let (screen, screen_packets) = FakeInbound::video("screen");
    let (camera_keyframes, camera_calls) = counting_keyframes();
    let (screen_keyframes, screen_calls) = counting_keyframes();
    let relay_settings = settings(10, 5);

    let (camera_relay, screen_relay) = tokio::join!(
        create_relay(
            subscribed(camera, camera_keyframes),
            destination.clone(),
            &relay_settings,
            CancellationToken::new(),
        ),
        create_relay(
            subscribed(screen, screen_keyframes),
            destination.clone(),
            &relay_settings,
            CancellationToken::new(),
        ),
    );
    let camera_relay = assert_ok!(camera_relay);
    let screen_relay = assert_ok!(screen_relay);

    assert_eq!(destination.published_count(), 2);
    assert_ne!(
        camera_relay.outbound_track().id(),
        screen_relay.outbound_track().id()
    );

    // Loss on the camera track only
    camera_packets.send(vp8(1, 3000, true, false)).unwrap();
    for sequence in 5..=20 {
        camera_packets.send(vp8_frame(sequence)).unwrap();
    }
    for sequence in 100..=102 {
        screen_packets.send(vp8_frame(sequence)).unwrap();
    }

    eventually("camera frames", || camera_relay.stats().frames_written == 16).await;
    eventually("screen frames", || screen_relay.stats().frames_written == 3).await;

    assert_eq!(camera_calls.load(Ordering::SeqCst), 1);
    assert_eq!(screen_calls.load(Ordering::SeqCst), 0);
    assert_eq!(screen_relay.stats().loss_events, 0);

    let published = destination.published();
    let total: usize = published.iter().map(|track| track.frame_count()).sum();
    assert_eq!(total, 19);
}
