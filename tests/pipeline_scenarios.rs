use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use frame_pipeline::config::{ChannelConfig, PersistenceConfig, ProcessingConfig, ProducerConfig, StorageConfig};
use frame_pipeline::imaging::{FeatureDetector, ImageCodec, PayloadEncoding, StandardCodec};
use frame_pipeline::stages::{emit_frame, FeatureExtractor};
use frame_pipeline::storage::FrameStore;
use frame_pipeline::transport::{PullSocket, PushSocket, SendMode};
use frame_pipeline::{
    run_stage, FrameError, FrameRecord, Keypoint, PersistenceStage, ProcessingStage, ProducerStage, RawFrame, Stage,
};
use image::{DynamicImage, Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn loopback(port: u16) -> String {
    format!("tcp://127.0.0.1:{port}")
}

fn png_payload(width: u32, height: u32) -> Bytes {
    let image = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 9) as u8, (y * 13) as u8, 77])
    }));
    Bytes::from(StandardCodec.encode(&image, PayloadEncoding::Png).unwrap())
}

struct FixedDetector(usize);

impl FeatureDetector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Vec<Keypoint> {
        (0..self.0)
            .map(|i| Keypoint {
                x: i as f32,
                y: (i * 2) as f32,
                size: 7.0,
                angle: 45.0,
                response: 10.0,
                octave: 0,
            })
            .collect()
    }
}

async fn wait_for_rows(store: &FrameStore, expected: i64) -> i64 {
    let _ = tokio::time::timeout(WAIT, async {
        while store.count().await.unwrap() < expected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    store.count().await.unwrap()
}

async fn persistence_on_ephemeral_port(dir: &Path) -> PersistenceStage {
    PersistenceStage::open(
        &PersistenceConfig {
            input: ChannelConfig::bind("tcp://127.0.0.1:0"),
        },
        &StorageConfig {
            database_path: dir.join("frames.db"),
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn frame_without_processing_stage_is_dropped_not_buffered() {
    let dir = tempfile::tempdir().unwrap();
    let mut producer_output = PushSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let mut persistence = persistence_on_ephemeral_port(dir.path()).await;
    let store = persistence.store().clone();

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let stats = persistence.run(cancel).await;
            persistence.close().await;
            stats
        }
    });

    let record = FrameRecord::new(0, "a.png", 10, 10, "png", 734);
    let result = emit_frame(&mut producer_output, &record, Bytes::from(vec![0x5a; 734])).await;
    assert!(matches!(result, Err(FrameError::Backpressure)));

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.received, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn processing_forwards_keypoint_count_and_identical_payload() {
    let mut upstream = PushSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let mut downstream = PullSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();

    let config = ProcessingConfig {
        input: ChannelConfig::connect(loopback(upstream.local_addr().unwrap().port())),
        output: ChannelConfig::connect(loopback(downstream.local_addr().unwrap().port())),
        ..ProcessingConfig::default()
    };
    let mut processing = ProcessingStage::open(&config)
        .await
        .unwrap()
        .extractor(FeatureExtractor::new(Arc::new(StandardCodec), Arc::new(FixedDetector(42))));
    assert!(upstream.wait_for_peer(WAIT).await);
    assert!(processing.wait_for_downstream(WAIT).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { run_stage(&mut processing, cancel).await }
    });

    let payload = png_payload(32, 24);
    let record = FrameRecord::new(5, "f.png", 24, 32, "png", payload.len() as u64);
    emit_frame(&mut upstream, &record, payload.clone()).await.unwrap();

    let forwarded = tokio::time::timeout(WAIT, downstream.receive_frame())
        .await
        .unwrap()
        .unwrap();
    let forwarded_record = forwarded.decode().unwrap();
    assert_eq!(forwarded_record.seq_number, 5);
    assert_eq!(forwarded_record.keypoint_count, 42);
    assert_eq!(forwarded_record.keypoints.as_ref().map(Vec::len), Some(42));
    assert_eq!(forwarded_record.image_name, "f.png");
    assert_eq!(forwarded.payload, payload);

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!((stats.received, stats.completed), (1, 1));
}

#[tokio::test]
async fn processing_keeps_metadata_keys_it_does_not_know() {
    let mut upstream = PushSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let mut downstream = PullSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let config = ProcessingConfig {
        input: ChannelConfig::connect(loopback(upstream.local_addr().unwrap().port())),
        output: ChannelConfig::connect(loopback(downstream.local_addr().unwrap().port())),
        ..ProcessingConfig::default()
    };
    let mut processing = ProcessingStage::open(&config)
        .await
        .unwrap()
        .extractor(FeatureExtractor::new(Arc::new(StandardCodec), Arc::new(FixedDetector(42))));
    assert!(upstream.wait_for_peer(WAIT).await);
    assert!(processing.wait_for_downstream(WAIT).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { run_stage(&mut processing, cancel).await }
    });

    let payload = png_payload(16, 8);
    let metadata = format!(
        r#"{{"seq_number":3,"image_name":"port.png","rows":8,"cols":16,"encoding":"png","data_bytes":{},"keypoint_count":0,"camera_id":"port"}}"#,
        payload.len()
    );
    upstream
        .send_frame(
            RawFrame {
                metadata: Bytes::from(metadata),
                payload: payload.clone(),
            },
            SendMode::Blocking,
        )
        .await
        .unwrap();

    let forwarded = tokio::time::timeout(WAIT, downstream.receive_frame())
        .await
        .unwrap()
        .unwrap();
    let fields: serde_json::Value = serde_json::from_slice(&forwarded.metadata).unwrap();
    assert_eq!(fields["camera_id"], "port");
    assert_eq!(fields["keypoint_count"], 42);
    assert_eq!(fields["keypoints"].as_array().map(Vec::len), Some(42));
    assert_eq!(fields["seq_number"], 3);
    assert_eq!(forwarded.payload, payload);

    cancel.cancel();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn processing_drops_undecodable_payloads() {
    let mut upstream = PushSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let mut downstream = PullSocket::open(&ChannelConfig::bind("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let config = ProcessingConfig {
        input: ChannelConfig::connect(loopback(upstream.local_addr().unwrap().port())),
        output: ChannelConfig::connect(loopback(downstream.local_addr().unwrap().port())),
        workers: 2,
        ..ProcessingConfig::default()
    };
    let mut processing = ProcessingStage::open(&config)
        .await
        .unwrap()
        .extractor(FeatureExtractor::new(Arc::new(StandardCodec), Arc::new(FixedDetector(1))));
    assert!(upstream.wait_for_peer(WAIT).await);
    assert!(processing.wait_for_downstream(WAIT).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { processing.run(cancel).await }
    });

    let garbage = Bytes::from_static(b"definitely not an image");
    emit_frame(&mut upstream, &FrameRecord::new(1, "bad.png", 1, 1, "png", garbage.len() as u64), garbage)
        .await
        .unwrap();
    let payload = png_payload(8, 8);
    emit_frame(&mut upstream, &FrameRecord::new(2, "good.png", 8, 8, "png", payload.len() as u64), payload)
        .await
        .unwrap();

    let forwarded = tokio::time::timeout(WAIT, downstream.receive_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forwarded.decode().unwrap().seq_number, 2);

    // Let the failed worker be reaped before stopping.
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.dropped("codec"), 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn persistence_survives_malformed_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let mut persistence = persistence_on_ephemeral_port(dir.path()).await;
    let store = persistence.store().clone();
    let mut upstream = PushSocket::open(&ChannelConfig::connect(loopback(persistence.local_addr().unwrap().port())))
        .await
        .unwrap();
    assert!(upstream.wait_for_peer(WAIT).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { persistence.run(cancel).await }
    });

    let broken = RawFrame {
        metadata: Bytes::from_static(b"{\"seq_number\": 3, \"image_name\": "),
        payload: Bytes::from_static(b"abc"),
    };
    upstream.send_frame(broken, SendMode::Blocking).await.unwrap();

    let record = FrameRecord::new(4, "d.png", 2, 2, "png", 3);
    let valid = RawFrame::encode(&record, Bytes::from_static(b"xyz")).unwrap();
    upstream.send_frame(valid, SendMode::Blocking).await.unwrap();

    assert_eq!(wait_for_rows(&store, 1).await, 1);
    let rows = store.fetch_all().await.unwrap();
    assert_eq!(rows[0].seq_number, 4);
    assert_eq!(rows[0].image_name, "d.png");
    assert_eq!(rows[0].image_bytes, b"xyz".to_vec());

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.dropped("malformed_metadata"), 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn persistence_rejects_payload_length_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut persistence = persistence_on_ephemeral_port(dir.path()).await;
    let store = persistence.store().clone();
    let mut upstream = PushSocket::open(&ChannelConfig::connect(loopback(persistence.local_addr().unwrap().port())))
        .await
        .unwrap();
    assert!(upstream.wait_for_peer(WAIT).await);

    let cancel = CancellationToken::new();
    let running = tokio::spawn({
        let cancel = cancel.clone();
        async move { persistence.run(cancel).await }
    });

    let lying = RawFrame {
        metadata: Bytes::from_static(br#"{"seq_number":6,"data_bytes":1000}"#),
        payload: Bytes::from_static(b"ten bytes!"),
    };
    upstream.send_frame(lying, SendMode::Blocking).await.unwrap();
    let honest = RawFrame::encode(&FrameRecord::new(7, "g.png", 1, 1, "png", 2), Bytes::from_static(b"ok")).unwrap();
    upstream.send_frame(honest, SendMode::Blocking).await.unwrap();

    assert_eq!(wait_for_rows(&store, 1).await, 1);
    assert_eq!(store.fetch_all().await.unwrap()[0].seq_number, 7);

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.dropped("payload_size_mismatch"), 1);
}

#[tokio::test]
async fn schema_creation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.db");
    let store = FrameStore::open(&path).await.unwrap();
    store
        .append(&FrameRecord::new(0, "a.png", 1, 1, "png", 1), "{}", &[1])
        .await
        .unwrap();

    store.create_table().await.unwrap();
    let reopened = FrameStore::open(&path).await.unwrap();
    reopened.create_table().await.unwrap();

    assert_eq!(reopened.count().await.unwrap(), 1);
    assert_eq!(reopened.fetch_all().await.unwrap()[0].image_bytes, vec![1]);
}

#[tokio::test]
async fn three_stages_store_every_image() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    std::fs::create_dir(&images).unwrap();
    for (index, name) in ["a.png", "b.jpg", "c.bmp"].iter().enumerate() {
        RgbImage::from_fn(48 + index as u32 * 8, 40, |x, y| {
            if (12..30).contains(&x) && (10..28).contains(&y) {
                Rgb([250, 250, 250])
            } else {
                Rgb([5, 5, 5])
            }
        })
        .save(images.join(name))
        .unwrap();
    }

    let mut producer = ProducerStage::open(ProducerConfig {
        output: ChannelConfig::bind("tcp://127.0.0.1:0"),
        image_dir: images,
        frame_interval_ms: 5,
        peer_wait_ms: 5_000,
        ..ProducerConfig::default()
    })
    .await
    .unwrap();
    let mut processing = ProcessingStage::open(&ProcessingConfig {
        input: ChannelConfig::connect(loopback(producer.local_addr().unwrap().port())),
        output: ChannelConfig::bind("tcp://127.0.0.1:0"),
        workers: 2,
        ..ProcessingConfig::default()
    })
    .await
    .unwrap();
    let mut persistence = PersistenceStage::open(
        &PersistenceConfig {
            input: ChannelConfig::connect(loopback(processing.output_addr().unwrap().port())),
        },
        &StorageConfig {
            database_path: dir.path().join("frames.db"),
        },
    )
    .await
    .unwrap();
    let store = persistence.store().clone();
    assert!(processing.wait_for_downstream(WAIT).await);

    let cancel = CancellationToken::new();
    let persisting = tokio::spawn({
        let cancel = cancel.clone();
        async move { run_stage(&mut persistence, cancel).await }
    });
    let processing_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { run_stage(&mut processing, cancel).await }
    });

    let produced = run_stage(&mut producer, cancel.clone()).await.unwrap();
    assert_eq!(produced.completed, 3);

    assert_eq!(wait_for_rows(&store, 3).await, 3);
    cancel.cancel();
    processing_task.await.unwrap().unwrap();
    persisting.await.unwrap().unwrap();
    producer.close().await;

    let mut rows = store.fetch_all().await.unwrap();
    rows.sort_by_key(|row| row.seq_number);
    let names: Vec<&str> = rows.iter().map(|row| row.image_name.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.jpg", "c.bmp"]);
    for row in &rows {
        let record = frame_pipeline::frame::codec::decode(&row.meta_json).unwrap();
        assert_eq!(record.keypoint_count as i64, row.keypoint_count);
        assert_eq!(record.keypoints.map(|k| k.len() as i64), Some(row.keypoint_count));
        assert_eq!(record.data_bytes, row.image_bytes.len() as u64);
        assert_eq!(row.rows, 40);
    }
}
