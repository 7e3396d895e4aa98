//! Two communicators exchanging all four message classes over loopback.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use efl_channel::{Communicator, CommunicatorConfig};
use efl_types::ErrorKind;

fn free_addr() -> String {
    // Bind-and-release; the port stays free long enough for the test.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn pair() -> (Arc<Communicator>, Arc<Communicator>) {
    pair_with_timeout(Duration::from_secs(600))
}

fn pair_with_timeout(default_timeout: Duration) -> (Arc<Communicator>, Arc<Communicator>) {
    let addr_a = free_addr();
    let addr_b = free_addr();
    let names = vec!["emb".to_string(), "grad".to_string()];
    let datasets = vec!["train".to_string()];

    let mut config_a = CommunicatorConfig::new(addr_a.clone(), addr_b.clone());
    config_a.tensor_names = names.clone();
    config_a.dataset_names = datasets.clone();
    config_a.scanning_interval = Duration::from_millis(10);
    config_a.default_timeout = default_timeout;

    let mut config_b = CommunicatorConfig::new(addr_b, addr_a);
    config_b.tensor_names = names;
    config_b.dataset_names = datasets;
    config_b.scanning_interval = Duration::from_millis(10);
    config_b.default_timeout = default_timeout;

    (
        Arc::new(Communicator::new(config_a)),
        Arc::new(Communicator::new(config_b)),
    )
}

async fn connect(a: &Arc<Communicator>, b: &Arc<Communicator>) {
    let (ra, rb) = tokio::join!(a.request_connection(), b.respond_connection());
    ra.unwrap();
    rb.unwrap();
}

#[tokio::test]
async fn operations_require_connection() {
    let (a, _b) = pair();
    let err = a.send_tensor("emb", 0, b"x".to_vec()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    let err = a.receive_tensor("emb", 0).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn connect_send_receive_and_close() {
    let (a, b) = pair();
    connect(&a, &b).await;

    // Receiver first: parks a waiter, completed by the send.
    let receiver = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.receive_tensor("emb", 3).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.send_tensor("emb", 3, b"aaa".to_vec()).await.unwrap();
    assert_eq!(receiver.await.unwrap().unwrap(), b"aaa");

    // Sender first: the request parks server-side until claimed.
    let sender = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.send_tensor("grad", 7, b"bbb".to_vec()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.receive_tensor("grad", 7).await.unwrap(), b"bbb");
    sender.await.unwrap().unwrap();

    // A second connect attempt is a precondition error.
    let err = a.request_connection().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);

    a.close().await.unwrap();
    let err = a.close().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    let err = a.send_tensor("emb", 4, b"ccc".to_vec()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    b.close().await.unwrap();
}

#[tokio::test]
async fn step_mismatch_surfaces_data_loss_to_sender() {
    let (a, b) = pair();
    connect(&a, &b).await;

    let receiver = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.receive_tensor("emb", 4).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The peer is ahead on this rendezvous key: hard error, not a reorder.
    let err = a.send_tensor("emb", 6, b"zzz".to_vec()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::DataLoss);
    assert!(receiver.await.unwrap().is_err());

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn reader_state_and_checkpoint_version_round_trip() {
    let (a, b) = pair();
    connect(&a, &b).await;

    // B asks, A answers; whichever lands first parks.
    let asker = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.request_reader_state("train").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.respond_reader_state("train", "b1", 7).await.unwrap();
    let state = asker.await.unwrap().unwrap();
    assert_eq!(state.block_id, "b1");
    assert_eq!(state.offset, 7);

    let asker = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.request_checkpoint_version().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.respond_checkpoint_version("ckpt-42").await.unwrap();
    assert_eq!(asker.await.unwrap().unwrap(), "ckpt-42");

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn terminate_reader_signals_epoch_end() {
    let (a, b) = pair();
    connect(&a, &b).await;

    let asker = {
        let b = Arc::clone(&b);
        tokio::spawn(async move { b.request_reader_state("train").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = a.terminate_reader("train").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfRange);
    let err = asker.await.unwrap().unwrap_err();
    assert_eq!(err.kind, ErrorKind::OutOfRange);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

#[tokio::test]
async fn parked_receive_times_out_through_the_monitor() {
    // Generous enough for the connect handshake, short enough to test.
    let (a, b) = pair_with_timeout(Duration::from_millis(500));
    connect(&a, &b).await;

    let err = b.receive_tensor("emb", 1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::DeadlineExceeded);

    a.close().await.unwrap();
    b.close().await.unwrap();
}
