#![cfg(test)]

use std::time::Duration;

use comms::{
    DType, KvErr, OnoReceiver, OnoSender, ParameterKey, PushMode, Rank, RemoteErr, Shape, Tensor,
    msg::{Command, Msg, Payload},
    specs::{InitHeader, OptimizerSpec, PushHeader, SyncMode},
};
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    sync::mpsc,
};

use crate::{Server, ServerBuilder, ServerSpec};

type Half = (OnoReceiver<ReadHalf<DuplexStream>>, OnoSender<WriteHalf<DuplexStream>>);

fn channel_pair() -> (Half, Half) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    (comms::channel(rx1, tx1), comms::channel(rx2, tx2))
}

/// An owned view of the server's replies.
#[derive(Debug, PartialEq)]
enum Answer {
    Ack(ParameterKey, u64),
    Value(Vec<f32>, DType, u64),
    Err(RemoteErr),
    Disconnect,
}

struct MockWorker {
    rx: OnoReceiver<ReadHalf<DuplexStream>>,
    tx: OnoSender<WriteHalf<DuplexStream>>,
    buf: Vec<u32>,
}

impl MockWorker {
    async fn connect(
        server: &mut Box<dyn Server<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>,
        rank: Rank,
    ) -> Self {
        let ((rx, tx), (sv_rx, sv_tx)) = channel_pair();
        server.spawn(sv_rx, sv_tx);

        let mut worker = Self {
            rx,
            tx,
            buf: Vec::new(),
        };
        worker.send(Msg::Control(Command::Connect { rank })).await;
        worker
    }

    async fn send(&mut self, msg: Msg<'_>) {
        self.tx.send(&msg).await.unwrap();
    }

    async fn answer(&mut self) -> Answer {
        match self.rx.recv_into(&mut self.buf).await.unwrap() {
            Msg::Control(Command::Ack { key, version }) => Answer::Ack(key, version),
            Msg::Control(Command::Disconnect) => Answer::Disconnect,
            Msg::Data(Payload::Value(header, values)) => {
                Answer::Value(values.to_f32_vec(), values.dtype(), header.version)
            }
            Msg::Err(e) => Answer::Err(e),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    async fn init(&mut self, key: &str, tensor: Tensor) -> Answer {
        let header = InitHeader {
            key: key.into(),
            shape: tensor.shape().clone(),
        };

        let encoded = tensor.encode();
        self.send(Msg::Data(Payload::Init(header, encoded.values())))
            .await;
        self.answer().await
    }

    async fn push(&mut self, key: &str, tensor: Tensor, mode: PushMode, step: u64) -> Answer {
        let header = PushHeader {
            key: key.into(),
            shape: tensor.shape().clone(),
            mode,
            step,
        };

        let encoded = tensor.encode();
        self.send(Msg::Data(Payload::Push(header, encoded.values())))
            .await;
        self.answer().await
    }

    async fn pull(&mut self, key: &str) -> Answer {
        self.send(Msg::Control(Command::Pull { key: key.into() }))
            .await;
        self.answer().await
    }
}

fn build(
    num_workers: usize,
    optimizer: OptimizerSpec,
    sync: SyncMode,
) -> (
    Box<dyn Server<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>,
    mpsc::UnboundedReceiver<Rank>,
) {
    let spec = ServerSpec {
        shard_id: 0,
        num_shards: 1,
        num_workers,
        optimizer,
        sync,
        step_timeout: Duration::from_secs(10),
        max_missed_steps: 3,
    };

    let (dead_tx, dead_rx) = mpsc::unbounded_channel();
    (ServerBuilder::new().build(spec, dead_tx), dead_rx)
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_step_through_the_barrier() {
    let sgd = OptimizerSpec::GradientDescent { learning_rate: 0.1 };
    let (mut server, _dead) = build(2, sgd, SyncMode::Sync);

    let mut first = MockWorker::connect(&mut server, 0).await;
    let mut second = MockWorker::connect(&mut server, 1).await;

    assert_eq!(
        first.init("w", Tensor::scalar(0.)).await,
        Answer::Ack("w".into(), 0)
    );
    assert_eq!(
        second.init("w", Tensor::scalar(9.)).await,
        Answer::Ack("w".into(), 0)
    );

    let (a, b) = tokio::join!(
        first.push("w", Tensor::scalar(1.), PushMode::Accumulate, 0),
        second.push("w", Tensor::scalar(2.), PushMode::Accumulate, 0),
    );
    assert_eq!(a, Answer::Ack("w".into(), 1));
    assert_eq!(b, Answer::Ack("w".into(), 1));

    let Answer::Value(values, dtype, version) = first.pull("w").await else {
        panic!("expected a value");
    };
    assert!((values[0] + 0.3).abs() < 1e-6);
    assert_eq!(dtype, DType::F32);
    assert_eq!(version, 1);

    first.send(Msg::Control(Command::Disconnect)).await;
    assert_eq!(first.answer().await, Answer::Disconnect);
    assert!(matches!(server.join_next().await, Some(Ok(()))));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_of_an_unknown_key_is_refused() {
    let (mut server, _dead) = build(1, OptimizerSpec::Accumulate, SyncMode::Sync);
    let mut worker = MockWorker::connect(&mut server, 0).await;

    let expected = RemoteErr::Kv(KvErr::UnknownKey {
        key: "ghost".into(),
    });
    assert_eq!(worker.pull("ghost").await, Answer::Err(expected));

    // The session survives a refused request.
    assert_eq!(
        worker.init("ghost", Tensor::scalar(1.)).await,
        Answer::Ack("ghost".into(), 0)
    );
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mismatched_push_leaves_the_shard_unchanged() {
    let (mut server, _dead) = build(1, OptimizerSpec::Accumulate, SyncMode::Sync);
    let mut worker = MockWorker::connect(&mut server, 0).await;

    worker.init("b", Tensor::vector(vec![1., 2.])).await;

    let grad = Tensor::vector(vec![1., 1., 1.]);
    let answer = worker.push("b", grad, PushMode::Accumulate, 0).await;
    let Answer::Err(RemoteErr::Kv(KvErr::ShapeMismatch { expected, got, .. })) = answer else {
        panic!("expected a shape mismatch, got {answer:?}");
    };
    assert_eq!(expected, (Shape::new([2]), DType::F32));
    assert_eq!(got, (Shape::new([3]), DType::F32));

    assert_eq!(
        worker.pull("b").await,
        Answer::Value(vec![1., 2.], DType::F32, 0)
    );
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overwrite_is_applied_without_waiting_for_the_others() {
    let (mut server, _dead) = build(3, OptimizerSpec::Accumulate, SyncMode::Sync);
    let mut worker = MockWorker::connect(&mut server, 2).await;

    worker.init("w", Tensor::vector(vec![0.; 2])).await;
    let answer = worker
        .push("w", Tensor::vector(vec![4., 5.]), PushMode::Overwrite, 0)
        .await;
    assert_eq!(answer, Answer::Ack("w".into(), 1));
    assert_eq!(
        worker.pull("w").await,
        Answer::Value(vec![4., 5.], DType::F32, 1)
    );

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn async_mode_applies_every_push() {
    let sgd = OptimizerSpec::GradientDescent { learning_rate: 0.5 };
    let (mut server, _dead) = build(2, sgd, SyncMode::Async);
    let mut worker = MockWorker::connect(&mut server, 0).await;

    worker.init("w", Tensor::scalar(1.)).await;
    for step in 0..2 {
        let answer = worker
            .push("w", Tensor::scalar(1.), PushMode::Accumulate, step)
            .await;
        assert_eq!(answer, Answer::Ack("w".into(), step + 1));
    }
    assert_eq!(
        worker.pull("w").await,
        Answer::Value(vec![0.], DType::F32, 2)
    );

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn half_precision_keys_travel_as_f16() {
    let (mut server, _dead) = build(1, OptimizerSpec::Accumulate, SyncMode::Sync);
    let mut worker = MockWorker::connect(&mut server, 0).await;

    let tensor = Tensor::new(Shape::new([2, 2]), DType::F16, vec![0.5, 1., 1.5, 2.]).unwrap();
    worker.init("h", tensor).await;

    let grad = Tensor::new(Shape::new([2, 2]), DType::F16, vec![0.5; 4]).unwrap();
    assert_eq!(
        worker.push("h", grad, PushMode::Accumulate, 0).await,
        Answer::Ack("h".into(), 1)
    );
    assert_eq!(
        worker.pull("h").await,
        Answer::Value(vec![1., 1.5, 2., 2.5], DType::F16, 1)
    );

    let wrong = Tensor::vector(vec![0.; 4]);
    let answer = worker.push("h", wrong, PushMode::Accumulate, 1).await;
    assert!(matches!(
        answer,
        Answer::Err(RemoteErr::Kv(KvErr::ShapeMismatch { .. }))
    ));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ranks_out_of_range_are_refused() {
    let (mut server, _dead) = build(2, OptimizerSpec::Accumulate, SyncMode::Sync);
    let mut worker = MockWorker::connect(&mut server, 2).await;

    let Answer::Err(RemoteErr::Protocol(text)) = worker.answer().await else {
        panic!("expected a protocol error");
    };
    assert!(text.contains("out of range"), "{text}");
    assert!(matches!(server.join_next().await, Some(Ok(()))));
}
