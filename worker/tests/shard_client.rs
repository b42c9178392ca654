use std::time::Duration;

use comms::{
    KvErr, ParameterKey, PushMode, Tensor,
    specs::{OptimizerSpec, SyncMode},
};
use parameter_server::{ServerBuilder, ServerSpec};
use scheduler::RetryPolicy;
use tokio::{net::TcpListener, sync::mpsc};
use worker::{ShardClient, WorkerErr};

const RETRY: RetryPolicy = RetryPolicy {
    max_retries: 3,
    backoff: Duration::from_millis(10),
};

fn spec() -> ServerSpec {
    ServerSpec {
        shard_id: 0,
        num_shards: 1,
        num_workers: 1,
        optimizer: OptimizerSpec::Accumulate,
        sync: SyncMode::Sync,
        step_timeout: Duration::from_secs(10),
        max_missed_steps: 3,
    }
}

/// Serves one shard, hanging up on the first `drop_first` connections.
async fn flaky_shard(drop_first: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let (dead, _) = mpsc::unbounded_channel();
    let mut server = ServerBuilder::new().build(spec(), dead);

    tokio::spawn(async move {
        for _ in 0..drop_first {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        }

        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            server.spawn(rx, tx);
        }
    });

    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_survive_a_dropped_connection() {
    let addr = flaky_shard(1).await;
    let mut client = ShardClient::connect(addr, 0, RETRY).await.unwrap();
    let key = ParameterKey::from("w");

    let tensor = Tensor::vector(vec![1., 2.]);
    assert_eq!(client.init(&key, &tensor).await.unwrap(), 0);

    let version = client
        .push(&key, &Tensor::vector(vec![1., 1.]), PushMode::Accumulate, 0)
        .await
        .unwrap();
    assert_eq!(version, 1);

    let (value, version) = client.pull(&key, 1).await.unwrap();
    assert_eq!(value.as_slice(), [2., 3.]);
    assert_eq!(version, 1);

    client.disconnect().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn contract_violations_are_not_retried() {
    let addr = flaky_shard(0).await;
    let mut client = ShardClient::connect(addr, 0, RETRY).await.unwrap();

    let err = client.pull(&"never".into(), 0).await.unwrap_err();
    assert!(matches!(err, WorkerErr::Kv(KvErr::UnknownKey { .. })));
    assert!(!err.is_transient());
}

#[tokio::test(flavor = "multi_thread")]
async fn connecting_gives_up_after_the_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let retry = RetryPolicy::new(2, Duration::from_millis(1));
    let err = ShardClient::connect(addr, 0, retry).await.err().unwrap();
    assert!(err.is_transient(), "{err}");
}
