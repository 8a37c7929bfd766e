//! End-to-end scenarios over a full in-process deployment.

use sheetfs_client::{CancelToken, ClientError};
use sheetfs_proto::{META_CELL_COL, META_CELL_ROW};
use sheetfs_tests::TestCluster;

fn cell_value(row: u32, col: u32) -> Vec<u8> {
    // Deliberately free of commas so envelope entries can be counted.
    format!("{{\"v\":\"r{}c{}\"}}", row, col).into_bytes()
}

#[tokio::test]
async fn test_create_then_read_empty() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("sales").await.unwrap();
    let payload = file.read(&cancel).await.unwrap();
    assert_eq!(payload, b"{\"celldata\": []}");
}

#[tokio::test]
async fn test_single_cell_round_trip() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("sales").await.unwrap();
    let written = file
        .write_at(b"this is test", 0, 0, Some(b' '), &cancel)
        .await
        .unwrap();
    assert_eq!(written, 12);

    let data = file.read_at(0, 0, &cancel).await.unwrap();
    assert_eq!(data.len(), 2048);
    assert_eq!(&data[..12], b"this is test");
    assert!(data[12..].iter().all(|&b| b == b' '));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_version_arbitration_converges() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("sales").await.unwrap();
    let (a, b) = (file.clone(), file.clone());
    let (ca, cb) = (cancel.clone(), cancel.clone());
    let w1 = tokio::spawn(async move { a.write_at(b"first writer", 0, 0, None, &ca).await });
    let w2 = tokio::spawn(async move { b.write_at(b"other writer", 0, 0, None, &cb).await });

    // The datanode accepts exactly one write per version; the loser spins
    // until its turn comes. Both must eventually land.
    assert_eq!(w1.await.unwrap().unwrap(), 12);
    assert_eq!(w2.await.unwrap().unwrap(), 12);

    let data = file.read_at(0, 0, &cancel).await.unwrap();
    let prefix = &data[..12];
    assert!(prefix == b"first writer" || prefix == b"other writer");
}

#[tokio::test]
async fn test_filled_chunks_grid() {
    let cluster = TestCluster::new();
    let master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("grid").await.unwrap();
    for row in 0..10u32 {
        for col in 0..10u32 {
            file.write_at(&cell_value(row, col), row, col, None, &cancel)
                .await
                .unwrap();
        }
    }

    // 100 cells over 4-slot chunks, no meta cell: exactly 25 chunks.
    let fd = master.file_manager.open_sheet("grid").await.unwrap();
    assert_eq!(master.file_manager.read_sheet(fd).await.unwrap().len(), 25);

    let payload = file.read(&cancel).await.unwrap();
    let text = String::from_utf8(payload).unwrap();
    assert!(text.starts_with("{\"celldata\": ["));
    assert!(text.ends_with("]}"));
    let body = &text["{\"celldata\": [".len()..text.len() - 2];
    assert_eq!(body.split(',').count(), 100);
    for row in 0..10u32 {
        for col in 0..10u32 {
            let value = String::from_utf8(cell_value(row, col)).unwrap();
            assert!(text.contains(&value), "missing {}", value);
        }
    }
}

#[tokio::test]
async fn test_meta_cell_round_trip() {
    let cluster = TestCluster::new();
    let master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("styled").await.unwrap();
    file.write_at(&cell_value(0, 0), 0, 0, None, &cancel)
        .await
        .unwrap();
    file.write_at(
        b"\"name\": \"styled sheet\"",
        META_CELL_ROW,
        META_CELL_COL,
        None,
        &cancel,
    )
    .await
    .unwrap();

    // The meta cell occupies a brand-new chunk of its own.
    let fd = master.file_manager.open_sheet("styled").await.unwrap();
    let chunks = master.file_manager.read_sheet(fd).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks.iter().filter(|c| c.holds_meta).count(), 1);

    let payload = file.read(&cancel).await.unwrap();
    let text = String::from_utf8(payload).unwrap();
    assert!(text.ends_with(",\"name\": \"styled sheet\"}"));
}

#[tokio::test]
async fn test_namespace_idempotence() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;

    client.create("doc").await.unwrap();
    client.recycle("doc").await.unwrap();

    // A recycled name still blocks creation.
    assert!(matches!(client.create("doc").await, Err(ClientError::Exists)));
    assert!(matches!(client.open("doc").await, Err(ClientError::NotFound)));

    client.resume("doc").await.unwrap();
    client.open("doc").await.unwrap();
}

#[tokio::test]
async fn test_delete_and_listing() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;

    client.create("keep").await.unwrap();
    client.create("drop").await.unwrap();
    client.delete("drop").await.unwrap();
    assert!(matches!(
        client.delete("ghost").await,
        Err(ClientError::NotFound)
    ));
    assert!(matches!(client.open("drop").await, Err(ClientError::NotFound)));

    let mut sheets = client.list_sheets().await.unwrap();
    sheets.sort_by(|a, b| a.filename.cmp(&b.filename));
    assert_eq!(sheets.len(), 2);
    assert!(sheets[0].recycled); // drop
    assert!(!sheets[1].recycled); // keep
}

#[tokio::test]
async fn test_fd_uniqueness() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;

    let f0 = client.create("a").await.unwrap();
    let f1 = client.open("a").await.unwrap();
    let f2 = client.create("b").await.unwrap();
    let mut fds = vec![f0.fd(), f1.fd(), f2.fd()];
    fds.sort_unstable();
    fds.dedup();
    assert_eq!(fds.len(), 3);
}

#[tokio::test]
async fn test_cancelled_read_reports_cancelled() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;

    let cancel = CancelToken::new();
    let file = client.create("s").await.unwrap();
    file.write_at(b"x", 0, 0, None, &cancel).await.unwrap();

    cancel.cancel();
    assert!(matches!(
        file.read_at(0, 0, &cancel).await,
        Err(ClientError::Cancelled)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_datanode_promotion_fast_forward() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let primary = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("journalled").await.unwrap();
    for col in 0..6u32 {
        file.write_at(&cell_value(0, col), 0, col, None, &cancel)
            .await
            .unwrap();
    }

    // The secondary tails the journal from offset 0, rebuilding every chunk
    // file in its own data directory, and only acks once caught up.
    let secondary = cluster.spawn_datanode("dn-g0", "d1");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    cluster.crash_datanode(primary, "dn-g0", "d0").await;
    let _promoted = secondary.await.unwrap();

    // The cached stub hits the dead primary, the client rediscovers the
    // new one through the coordinator, and every committed write is there.
    for col in 0..6u32 {
        let data = file.read_at(0, col, &cancel).await.unwrap();
        let want = cell_value(0, col);
        assert_eq!(&data[..want.len()], &want[..]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_master_promotion_keeps_namespace() {
    let cluster = TestCluster::new();
    let primary = cluster.start_master("m0").await;
    let secondary = cluster.spawn_master("m1");
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("durable").await.unwrap();
    for col in 0..3u32 {
        file.write_at(&cell_value(0, col), 0, col, None, &cancel)
            .await
            .unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    cluster.crash_master(primary, "m0").await;
    let _promoted = secondary.await.unwrap();

    // The promoted master refuses the taken name and serves the sheet; the
    // old fd space died with the old primary, so the client re-opens.
    assert!(matches!(
        client.create("durable").await,
        Err(ClientError::Exists)
    ));
    let reopened = client.open("durable").await.unwrap();
    let data = reopened.read_at(0, 2, &cancel).await.unwrap();
    let want = cell_value(0, 2);
    assert_eq!(&data[..want.len()], &want[..]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_writers_distinct_cells() {
    let cluster = TestCluster::new();
    let _master = cluster.start_master("m0").await;
    let _dn = cluster.start_datanode("dn-g0", "d0").await;
    let client = cluster.client().await;
    let cancel = CancelToken::new();

    let file = client.create("hot").await.unwrap();
    let mut writers = Vec::new();
    for row in 0..10u32 {
        for col in 0..10u32 {
            let file = file.clone();
            let cancel = cancel.clone();
            writers.push(tokio::spawn(async move {
                file.write_at(&cell_value(row, col), row, col, None, &cancel)
                    .await
            }));
        }
    }
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let payload = file.read(&cancel).await.unwrap();
    let text = String::from_utf8(payload).unwrap();
    let body = &text["{\"celldata\": [".len()..text.len() - 2];
    assert_eq!(body.split(',').count(), 100);
    for row in 0..10u32 {
        for col in 0..10u32 {
            let value = String::from_utf8(cell_value(row, col)).unwrap();
            assert!(text.contains(&value), "missing {}", value);
        }
    }
}
