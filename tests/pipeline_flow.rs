use std::fs;
use std::io::Cursor;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use traffic_inspector::columns::*;
use traffic_inspector::config::IngestConfig;
use traffic_inspector::{IngestError, Input, Pipeline, TrafficAggregator};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn header() -> String {
    let mut names = vec!["field"; COLUMNS_EXPECTED];
    names[TIME] = TIME_HEADER;
    names.join("\t")
}

fn row(fields: &[(usize, &str)]) -> String {
    let mut cols = vec![""; COLUMNS_EXPECTED];
    for (idx, value) in fields {
        cols[*idx] = *value;
    }
    cols.join("\t")
}

fn capture() -> String {
    let lines = [
        header(),
        row(&[
            (TIME, "1700000000.0"),
            (ETH_SRC, "11:22:33:44:55:66"),
            (ETH_DST, "aa:bb:cc:dd:ee:01"),
            (IP_SRC, "192.168.1.1"),
            (IP_DST, "192.168.1.20"),
            (UDP_SRC_PORT, "67"),
            (UDP_DST_PORT, "68"),
            (PROTOCOL, "DHCP"),
            (FRAME_LEN, "342"),
            (INFO, "DHCP ACK      - Transaction ID 0x1"),
        ]),
        row(&[
            (TIME, "1700000000.5"),
            (ETH_SRC, "aa:bb:cc:dd:ee:01"),
            (ETH_DST, "11:22:33:44:55:66"),
            (IP_SRC, "192.168.1.20"),
            (IP_DST, "192.168.1.1"),
            (UDP_DST_PORT, "53"),
            (PROTOCOL, "DNS"),
            (DNS_QRY_NAME, "example.com"),
            (FRAME_LEN, "74"),
            (INFO, "Standard query 0x0001 A example.com"),
        ]),
        row(&[
            (TIME, "1700000001.0"),
            (ETH_SRC, "aa:bb:cc:dd:ee:01"),
            (ETH_DST, "cc:dd:cc:dd:ee:02"),
            (IP_SRC, "192.168.1.20"),
            (IP_DST, "192.168.1.30"),
            (TCP_DST_PORT, "22"),
            (PROTOCOL, "SSH"),
            (FRAME_LEN, "1500"),
        ]),
        row(&[
            (TIME, "1700000001.2"),
            (ETH_SRC, "cc:dd:cc:dd:ee:02"),
            (ETH_DST, "aa:bb:cc:dd:ee:01"),
            (IP_SRC, "192.168.1.30"),
            (IP_DST, "192.168.1.20"),
            (TCP_SRC_PORT, "22"),
            (PROTOCOL, "SSH"),
            (FRAME_LEN, "500"),
        ]),
    ];
    lines.join("\n") + "\n"
}

fn write_capture(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("capture.tsv");
    fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn test_replay_builds_device_state() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &capture());

    let aggregator = Arc::new(TrafficAggregator::default());
    let mut pipeline = Pipeline::new(
        &IngestConfig::default(),
        Input::Path(input),
        aggregator.clone(),
    );
    pipeline.start().unwrap();
    pipeline.wait().await;

    let status = pipeline.status();
    assert_eq!(status.processed, 4);
    assert_eq!(status.error, 0);
    assert!(!status.live);
    assert_eq!(status.since, 1700000000.0);
    assert_eq!(status.last, 1700000001.2);
    assert_eq!(status.throughput, -1);

    assert_eq!(
        aggregator.devices(),
        vec![
            "11:22:33:44:55:66".to_string(),
            "aa:bb:cc:dd:ee:01".to_string(),
            "cc:dd:cc:dd:ee:02".to_string(),
        ]
    );
    assert_eq!(aggregator.clients(), vec!["aa:bb:cc:dd:ee:01".to_string()]);

    let client = aggregator.device_stats("aa:bb:cc:dd:ee:01", status.time).unwrap();
    assert_eq!(client.tx_bytes, 74 + 1500);
    assert_eq!(client.rx_bytes, 500);
    assert_eq!(client.dns_queries, 1);

    let peer: IpAddr = "192.168.1.30".parse().unwrap();
    let connections = aggregator
        .device_connections("aa:bb:cc:dd:ee:01", status.time)
        .unwrap();
    let ssh = &connections[&peer];
    assert_eq!(ssh.tx_bytes, 1500);
    assert_eq!(ssh.rx_bytes, 500);
    assert_eq!(ssh.tx_packets, 1);
    assert_eq!(ssh.rx_packets, 1);
}

#[tokio::test]
async fn test_one_way_transfer_has_no_rx() {
    init_logging();
    let text: String = capture().lines().take(4).map(|l| format!("{}\n", l)).collect();
    let (code, aggregator) = run_to_end(text).await;
    assert_eq!(code, 0);

    let mac = "aa:bb:cc:dd:ee:01";
    assert!(aggregator.devices().contains(&mac.to_string()));
    assert!(aggregator.clients().contains(&mac.to_string()));
    assert!(aggregator.device_stats("cc:dd:cc:dd:ee:02", 0.0).is_none());

    let peer: IpAddr = "192.168.1.30".parse().unwrap();
    let connections = aggregator.device_connections(mac, 1700000001.0).unwrap();
    assert_eq!(connections[&peer].tx_bytes, 1500);
    assert_eq!(connections[&peer].rx_bytes, 0);
    assert_eq!(connections[&peer].last_seen, 0.0);
}

#[tokio::test]
async fn test_limit_caps_processed_records() {
    init_logging();
    let aggregator = Arc::new(TrafficAggregator::default());
    let config = IngestConfig {
        limit: Some(2),
        ..IngestConfig::default()
    };
    let mut pipeline = Pipeline::new(
        &config,
        Input::Reader(Box::new(Cursor::new(capture()))),
        aggregator.clone(),
    );
    pipeline.start().unwrap();
    pipeline.wait().await;

    assert_eq!(pipeline.status().processed, 2);
    assert_eq!(aggregator.last_seen(), 1700000000.5);
}

async fn run_to_end(text: String) -> (u8, Arc<TrafficAggregator>) {
    let aggregator = Arc::new(TrafficAggregator::default());
    let mut pipeline = Pipeline::new(
        &IngestConfig::default(),
        Input::Reader(Box::new(Cursor::new(text))),
        aggregator.clone(),
    );
    pipeline.start().unwrap();
    pipeline.wait().await;
    (pipeline.status().error, aggregator)
}

#[tokio::test]
async fn test_schema_errors() {
    init_logging();
    let body: String = capture().lines().skip(1).map(|l| format!("{}\n", l)).collect();

    let (code, aggregator) = run_to_end(format!("frame.time_epoch\teth.src\n{}", body)).await;
    assert_eq!(code, IngestError::ColumnCount.code());
    assert!(aggregator.devices().is_empty());

    let (code, _) = run_to_end(format!("{}\n{}", header().replacen(TIME_HEADER, "eth.src", 1), body)).await;
    assert_eq!(code, IngestError::Header.code());

    let bad_first = row(&[(TIME, "yesterday"), (FRAME_LEN, "60")]);
    let (code, aggregator) = run_to_end(format!("{}\n{}\n{}", header(), bad_first, body)).await;
    assert_eq!(code, IngestError::FirstRecord.code());
    assert!(aggregator.devices().is_empty());
}

#[tokio::test]
async fn test_mirror_preserves_input() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = IngestConfig {
        mirror_dir: Some(dir.path().to_path_buf()),
        ..IngestConfig::default()
    };
    let text = capture();
    let mut pipeline = Pipeline::new(
        &config,
        Input::Reader(Box::new(Cursor::new(text.clone()))),
        Arc::new(TrafficAggregator::default()),
    );
    pipeline.start().unwrap();
    pipeline.wait().await;
    pipeline.stop().await;

    let mirrored: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(mirrored.len(), 1);
    let name = mirrored[0].file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("traffic-capture-"));
    assert_eq!(fs::read_to_string(&mirrored[0]).unwrap(), text);
}

#[tokio::test]
async fn test_unwritable_mirror_refuses_to_start() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = IngestConfig {
        mirror_dir: Some(dir.path().join("missing").join("nested")),
        ..IngestConfig::default()
    };
    let mut pipeline = Pipeline::new(
        &config,
        Input::Reader(Box::new(Cursor::new(capture()))),
        Arc::new(TrafficAggregator::default()),
    );
    assert_eq!(pipeline.start(), Err(IngestError::MirrorOpen));
    assert_eq!(pipeline.status().error, 11);
    assert!(!pipeline.status().live);
}

#[tokio::test]
async fn test_stop_ends_paced_replay() {
    init_logging();
    let config = IngestConfig {
        speed: 1.0,
        ..IngestConfig::default()
    };
    let text = format!(
        "{}\n{}\n{}\n",
        header(),
        row(&[(TIME, "1000"), (ETH_SRC, "aa:aa"), (FRAME_LEN, "60")]),
        row(&[(TIME, "5000"), (ETH_SRC, "aa:aa"), (FRAME_LEN, "60")]),
    );
    let aggregator = Arc::new(TrafficAggregator::default());
    let mut pipeline = Pipeline::new(
        &config,
        Input::Reader(Box::new(Cursor::new(text))),
        aggregator.clone(),
    );
    pipeline.start().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    pipeline.stop().await;
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    let status = pipeline.status();
    assert!(!status.live);
    assert_eq!(status.processed, 1);
    assert_eq!(status.throughput, -1);
}

#[tokio::test]
async fn test_missing_input_ends_with_code_4() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let aggregator = Arc::new(TrafficAggregator::default());
    let mut pipeline = Pipeline::new(
        &IngestConfig::default(),
        Input::Path(dir.path().join("absent.tsv")),
        aggregator.clone(),
    );
    pipeline.start().unwrap();
    pipeline.wait().await;

    let status = pipeline.status();
    assert_eq!(status.error, IngestError::Input.code());
    assert_eq!(status.error, 4);
    assert!(!status.live);
    assert_eq!(status.processed, 0);
    assert!(aggregator.devices().is_empty());
}

#[tokio::test]
async fn test_far_future_timestamp_does_not_hang() {
    init_logging();
    let config = IngestConfig {
        speed: 1.0,
        ..IngestConfig::default()
    };
    let text = format!(
        "{}\n{}\n{}\n",
        header(),
        row(&[(TIME, "1000"), (ETH_SRC, "aa:aa"), (FRAME_LEN, "60")]),
        row(&[(TIME, "1e300"), (ETH_SRC, "aa:aa"), (FRAME_LEN, "60")]),
    );
    let mut pipeline = Pipeline::new(
        &config,
        Input::Reader(Box::new(Cursor::new(text))),
        Arc::new(TrafficAggregator::default()),
    );
    pipeline.start().unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), pipeline.wait())
        .await
        .unwrap();

    let status = pipeline.status();
    assert!(!status.live);
    assert_eq!(status.processed, 1);
    assert_eq!(status.error, 0);
}
