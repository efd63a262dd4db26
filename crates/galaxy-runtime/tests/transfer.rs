//! Chunked file transfer between paired engines

mod common;

use std::time::Duration;

use common::{pair, payload, start_node, start_node_with, Node};
use galaxy_core::protocol::FileMetadata;
use galaxy_core::{
    AppEvent, ControlMessage, DeviceCode, Direction, FileId, GalaxyConfig, GalaxyError,
    MemoryStorage, OutgoingFile, ReceivedFile, Rendezvous, TransferError, WireFrame,
};
use galaxy_harness::MemoryRendezvous;
use tokio_test::assert_ok;

async fn paired_nodes(hub: &MemoryRendezvous) -> (Node, Node) {
    let mut a = start_node(hub).await;
    let mut b = start_node(hub).await;
    pair(&mut a, &mut b).await;
    (a, b)
}

fn received(event: AppEvent) -> ReceivedFile {
    match event {
        AppEvent::FileComplete(file) => file,
        other => panic!("expected FileComplete, got {:?}", other),
    }
}

#[tokio::test]
async fn test_file_is_chunked_and_reassembled() {
    let hub = MemoryRendezvous::new();
    let (mut a, mut b) = paired_nodes(&hub).await;
    let data = payload(150_000);

    let summary = assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![OutgoingFile::from_bytes("photo.jpg", "image/jpeg", data.clone())],
            )
            .await
    );
    assert_eq!(summary.sent.len(), 1);
    assert!(summary.failed.is_empty());

    let seen = b
        .collect_until(|e| matches!(e, AppEvent::FileComplete(_)))
        .await;

    let started: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            AppEvent::TransferStarted {
                name,
                size,
                direction,
                ..
            } => Some((name.clone(), *size, *direction)),
            _ => None,
        })
        .collect();
    assert_eq!(
        started,
        vec![("photo.jpg".to_string(), 150_000, Direction::Inbound)]
    );

    let progress: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            AppEvent::Progress {
                done,
                total,
                percent,
                ..
            } => Some((*done, *total, *percent)),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![(1, 3, 33), (2, 3, 67), (3, 3, 100)]);

    let file = received(seen.last().cloned().expect("at least one event"));
    assert_eq!(file.name, "photo.jpg");
    assert_eq!(file.mime_type, "image/jpeg");
    assert_eq!(file.size, 150_000);
    assert_eq!(file.from, a.code);
    assert_eq!(file.file_id, summary.sent[0]);
    assert_eq!(&file.payload[..], &data[..]);

    // Sender sees its own side of the transfer too
    let outbound = a
        .collect_until(|e| {
            matches!(e, AppEvent::Progress { percent: 100, direction: Direction::Outbound, .. })
        })
        .await;
    assert!(outbound.iter().any(|e| matches!(
        e,
        AppEvent::TransferStarted {
            direction: Direction::Outbound,
            ..
        }
    )));
}

fn progress_of(events: &[AppEvent], wanted: Direction) -> Vec<(u64, u64, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Progress {
                done,
                total,
                percent,
                direction,
                ..
            } if *direction == wanted => Some((*done, *total, *percent)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_empty_file_still_reaches_full_progress() {
    let hub = MemoryRendezvous::new();
    let (mut a, mut b) = paired_nodes(&hub).await;

    let summary = assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![OutgoingFile::from_bytes("empty.txt", "text/plain", Vec::new())],
            )
            .await
    );
    assert_eq!(summary.sent.len(), 1);

    let inbound = b
        .collect_until(|e| matches!(e, AppEvent::FileComplete(_)))
        .await;
    assert_eq!(progress_of(&inbound, Direction::Inbound), vec![(0, 0, 100)]);
    let started = inbound
        .iter()
        .position(|e| matches!(e, AppEvent::TransferStarted { .. }))
        .expect("transfer started");
    let progressed = inbound
        .iter()
        .position(|e| matches!(e, AppEvent::Progress { .. }))
        .expect("progress");
    assert!(started < progressed);
    assert!(received(inbound.last().cloned().expect("event")).payload.is_empty());

    let outbound = a
        .collect_until(|e| matches!(e, AppEvent::Progress { direction: Direction::Outbound, .. }))
        .await;
    assert_eq!(progress_of(&outbound, Direction::Outbound), vec![(0, 0, 100)]);
}

#[tokio::test]
async fn test_unfinished_inbound_file_is_reported_when_replaced() {
    let hub = MemoryRendezvous::new();
    let mut b = start_node(&hub).await;
    let sender: DeviceCode = "GT-WWWWWW".parse().expect("valid code");

    let channel = hub.dial(&sender, &b.code).await.expect("dial");
    let send = |message: &ControlMessage| {
        channel
            .sink
            .send(WireFrame::control(message).expect("encode"))
            .expect("send");
    };
    send(&ControlMessage::PairRequest {
        from: sender.clone(),
        claims_trusted: true,
    });

    let first = FileMetadata::new(FileId::new_unchecked("f1_0"), "first.bin", 8, "x/y", 4);
    send(&ControlMessage::file_start(&first));
    channel
        .sink
        .send(WireFrame::Binary(vec![1; 4]))
        .expect("send");

    let second = FileMetadata::new(FileId::new_unchecked("f1_1"), "second.bin", 3, "x/y", 4);
    send(&ControlMessage::file_start(&second));
    channel
        .sink
        .send(WireFrame::Binary(vec![2; 3]))
        .expect("send");
    send(&ControlMessage::FileEnd {
        file_id: second.file_id.clone(),
    });

    let seen = b
        .collect_until(|e| matches!(e, AppEvent::FileComplete(_)))
        .await;
    assert!(seen.iter().any(|e| matches!(
        e,
        AppEvent::Error { message } if message.contains("first.bin")
    )));
    let file = received(seen.last().cloned().expect("event"));
    assert_eq!(file.name, "second.bin");
    assert_eq!(&file.payload[..], &[2, 2, 2]);
}

#[tokio::test]
async fn test_batch_is_sent_in_order() {
    let hub = MemoryRendezvous::new();
    let (a, mut b) = paired_nodes(&hub).await;

    let summary = assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![
                    OutgoingFile::from_bytes("one.txt", "text/plain", payload(70_000)),
                    OutgoingFile::from_bytes("two.txt", "text/plain", payload(10)),
                    OutgoingFile::from_bytes("empty.txt", "text/plain", Vec::new()),
                ],
            )
            .await
    );
    assert_eq!(summary.sent.len(), 3);
    assert!(summary.sent[0].as_str().ends_with("_0"));
    assert!(summary.sent[2].as_str().ends_with("_2"));

    let mut names = Vec::new();
    for _ in 0..3 {
        let file = received(b.wait_for(|e| matches!(e, AppEvent::FileComplete(_))).await);
        names.push((file.name, file.payload.len()));
    }
    assert_eq!(
        names,
        vec![
            ("one.txt".to_string(), 70_000),
            ("two.txt".to_string(), 10),
            ("empty.txt".to_string(), 0),
        ]
    );
}

#[tokio::test]
async fn test_unreadable_file_is_skipped() {
    let hub = MemoryRendezvous::new();
    let (mut a, mut b) = paired_nodes(&hub).await;
    let missing = std::env::temp_dir().join(format!("galaxy-missing-{}", uuid::Uuid::new_v4()));

    let summary = assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![
                    OutgoingFile::from_path(&missing, "application/octet-stream"),
                    OutgoingFile::from_bytes("after.txt", "text/plain", payload(100)),
                ],
            )
            .await
    );
    assert_eq!(summary.sent.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert!(missing
        .to_string_lossy()
        .ends_with(summary.failed[0].name.as_str()));

    a.wait_for(|e| matches!(e, AppEvent::Error { .. })).await;
    let file = received(b.wait_for(|e| matches!(e, AppEvent::FileComplete(_))).await);
    assert_eq!(file.name, "after.txt");
}

#[tokio::test]
async fn test_file_from_disk() {
    let hub = MemoryRendezvous::new();
    let (a, mut b) = paired_nodes(&hub).await;

    let path = std::env::temp_dir().join(format!("galaxy-send-{}.bin", uuid::Uuid::new_v4()));
    let data = payload(200_000);
    tokio::fs::write(&path, &data).await.expect("write temp file");

    assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![OutgoingFile::from_path(&path, "application/octet-stream")],
            )
            .await
    );
    let file = received(b.wait_for(|e| matches!(e, AppEvent::FileComplete(_))).await);
    assert_eq!(&file.payload[..], &data[..]);

    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn test_send_requires_pairing() {
    let hub = MemoryRendezvous::new();
    let a = start_node(&hub).await;
    let b = start_node(&hub).await;

    let err = a
        .handle
        .send_files(
            &b.code,
            vec![OutgoingFile::from_bytes("x", "text/plain", payload(1))],
        )
        .await
        .expect_err("not paired");
    assert!(matches!(
        err,
        GalaxyError::Transfer(TransferError::NotPaired { .. })
    ));
}

// ----------------------------------------------------------------------------
// Flow Control
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_sender_pauses_above_high_water_mark() {
    let hub = MemoryRendezvous::new();
    let (a, mut b) = paired_nodes(&hub).await;
    let gauge = hub.gauge(&a.code, &b.code).expect("link exists");
    gauge.hold(5 * 1024 * 1024);

    let sender = a.handle.clone();
    let target = b.code.clone();
    let send = tokio::spawn(async move {
        sender
            .send_files(
                &target,
                vec![OutgoingFile::from_bytes("big.bin", "application/octet-stream", payload(300_000))],
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gauge.binary_frames_sent(), 1);
    assert!(!send.is_finished());

    gauge.release();
    let summary = assert_ok!(send.await.expect("send task panicked"));
    assert_eq!(summary.sent.len(), 1);
    assert_eq!(gauge.binary_frames_sent(), 5);

    let file = received(b.wait_for(|e| matches!(e, AppEvent::FileComplete(_))).await);
    assert_eq!(file.payload.len(), 300_000);
}

#[tokio::test]
async fn test_close_mid_transfer_fails_send_and_drops_partial_file() {
    let hub = MemoryRendezvous::new();
    let (a, mut b) = paired_nodes(&hub).await;
    let gauge = hub.gauge(&a.code, &b.code).expect("link exists");
    gauge.hold(5 * 1024 * 1024);

    let sender = a.handle.clone();
    let target = b.code.clone();
    let send = tokio::spawn(async move {
        sender
            .send_files(
                &target,
                vec![OutgoingFile::from_bytes("big.bin", "application/octet-stream", payload(300_000))],
            )
            .await
    });

    b.wait_for(|e| matches!(e, AppEvent::Progress { done: 1, .. }))
        .await;
    assert!(b.handle.disconnect(&a.code).await.expect("disconnect"));

    let err = send
        .await
        .expect("send task panicked")
        .expect_err("transfer should fail");
    assert!(err.is_connection_closed());

    let seen = b
        .collect_until(|e| matches!(e, AppEvent::Disconnected { .. }))
        .await;
    assert!(!seen.iter().any(|e| matches!(e, AppEvent::FileComplete(_))));
}

#[tokio::test]
async fn test_small_chunk_size_from_config() {
    let hub = MemoryRendezvous::new();
    let mut config = GalaxyConfig::testing();
    config.transfer.chunk_size = 1024;

    let mut a = start_node_with(&hub, config, MemoryStorage::new()).await;
    let mut b = start_node(&hub).await;
    pair(&mut a, &mut b).await;

    assert_ok!(
        a.handle
            .send_files(
                &b.code,
                vec![OutgoingFile::from_bytes("small.bin", "application/octet-stream", payload(4096))],
            )
            .await
    );
    let seen = b
        .collect_until(|e| matches!(e, AppEvent::FileComplete(_)))
        .await;
    let chunks = seen
        .iter()
        .filter(|e| matches!(e, AppEvent::Progress { .. }))
        .count();
    assert_eq!(chunks, 4);
}
