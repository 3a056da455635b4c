use std::{io, net::TcpListener as StdListener, time::Duration};

use comms::{InferenceResult, Label, Tensor};
use edge::{ClientConfig, EdgeClient, EdgeErr, connect_with_retry, exchange, request};
use machine_learning::arch::{
    NetworkGraph, Sequential, Stage,
    layers::{Conv2d, Dense, MaxPool2d, StageKind},
    weights::{MapWeights, RandomWeights},
};
use ndarray::{ArrayD, IxDyn};
use tokio::{io as tokio_io, io::AsyncWriteExt, net::TcpListener, runtime::Runtime, time::timeout};

/// A model small enough to run on 256x256 inputs in tests, it always predicts `label`.
fn toy_graph(label: usize) -> NetworkGraph {
    let mut bias = vec![0.0; 2];
    bias[label] = 10.0;

    let mut graph = NetworkGraph::new(
        "toy",
        vec![1, 1, 256, 256],
        vec![
            Stage::new("conv0", StageKind::Conv(Conv2d::new(1, 2, 3, 2, 1, false))),
            Stage::new("pool0", StageKind::PoolDownsample(MaxPool2d::new(2, 2, 0))),
            Stage::new("relu", StageKind::relu()),
            Stage::new("avgpool", StageKind::GlobalAvgPool),
            Stage::new("flatten", StageKind::Flatten),
            Stage::new("classifier", StageKind::Classifier(Dense::new(2, 2))),
        ],
    );

    graph.stages[0].load_params(&mut RandomWeights::new(9)).unwrap();
    graph.stages[5]
        .load_params(&mut MapWeights::new([
            ("classifier.weight", vec![0.0; 4]),
            ("classifier.bias", bias),
        ]))
        .unwrap();

    graph
}

fn toy_head() -> Sequential {
    let graph = toy_graph(0);
    Sequential::new("toy".to_string(), graph.input_shape, graph.stages[..2].to_vec()).unwrap()
}

fn test_config() -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        retry_delay_ms: 20,
        timeout_secs: 5,
        ..Default::default()
    }
}

#[tokio::test]
async fn exchange_decodes_the_server_answer() -> io::Result<()> {
    let (client, server) = tokio_io::duplex(4096);

    let server_task = tokio::spawn(async move {
        let (rx, tx) = tokio_io::split(server);
        let (mut rx, mut tx) = comms::channel(rx, tx);

        let activation = rx.recv().await?;
        assert_eq!(activation.shape(), &[1, 2, 2]);

        tx.send(&InferenceResult::labels_tensor(&[1])?).await
    });

    let (rx, tx) = tokio_io::split(client);
    let (mut rx, mut tx) = comms::channel(rx, tx);
    let activation = Tensor::from_f32(vec![1, 2, 2], &[0.5; 4])?;

    let res = exchange(&mut rx, &mut tx, &activation).await.unwrap();
    assert_eq!(res.label, Label::Pneumonia);
    assert_eq!(res.label.to_string(), "pneumonia");

    server_task.await.unwrap()
}

#[tokio::test]
async fn truncated_answer_is_a_protocol_error() -> io::Result<()> {
    let (client, server) = tokio_io::duplex(4096);

    tokio::spawn(async move {
        let (rx, mut tx) = tokio_io::split(server);
        let (mut rx, _) = comms::channel(rx, tokio_io::sink());
        rx.recv().await?;

        // declares 8 payload bytes and sends 3
        tx.write_all(&[0, 0, 0, 8, 1, 0, 0, 0, 1, 1, 0, 0, 0]).await?;
        tx.shutdown().await
    });

    let (rx, tx) = tokio_io::split(client);
    let (mut rx, mut tx) = comms::channel(rx, tx);
    let activation = Tensor::from_f32(vec![1], &[0.0])?;

    let res = timeout(Duration::from_secs(5), exchange(&mut rx, &mut tx, &activation))
        .await
        .expect("the exchange should fail fast");

    assert!(matches!(res, Err(EdgeErr::Protocol(_))));
    Ok(())
}

#[tokio::test]
async fn connect_is_retried_until_the_server_is_up() -> io::Result<()> {
    let addr = StdListener::bind("127.0.0.1:0")?.local_addr()?;

    let connect = tokio::spawn(async move {
        connect_with_retry(&addr.to_string(), Duration::from_millis(20)).await
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    let listener = TcpListener::bind(addr).await?;
    let (_stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("the client should have retried")?;

    assert!(connect.await.unwrap().is_ok());
    Ok(())
}

#[tokio::test]
async fn address_without_port_is_surfaced() {
    for addr in ["not an address", "localhost", ":8000", "localhost:port"] {
        let res = connect_with_retry(addr, Duration::from_millis(10)).await;
        assert!(matches!(res, Err(EdgeErr::Address { .. })), "{addr}");
    }
}

#[tokio::test]
async fn unresolvable_host_is_retried() {
    let connect = connect_with_retry("edge-server.invalid:8000", Duration::from_millis(10));
    assert!(timeout(Duration::from_millis(300), connect).await.is_err());
}

#[tokio::test]
async fn silent_server_times_out() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
        io::Result::Ok(())
    });

    let activation = Tensor::from_f32(vec![1, 4], &[0.0; 4])?;
    let res = request(
        &addr,
        &activation,
        Duration::from_millis(10),
        Some(Duration::from_millis(200)),
    )
    .await;

    match res {
        Err(EdgeErr::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
        other => panic!("expected a timeout, got {other:?}"),
    }

    server.abort();
    Ok(())
}

#[test]
fn infer_tensor_sends_the_head_output() -> io::Result<()> {
    let rt = Runtime::new()?;
    let listener = rt.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let addr = listener.local_addr()?.to_string();

    let server = rt.spawn(async move {
        let (stream, _) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        let activation = rx.recv().await?;
        tx.send(&InferenceResult::labels_tensor(&[0])?).await?;
        io::Result::Ok(activation)
    });

    let client = EdgeClient::new(test_config(), toy_head()).unwrap();
    let x = ArrayD::from_elem(IxDyn(&[1, 1, 256, 256]), 0.25);
    let res = client.infer_tensor(x, &addr).unwrap();

    assert_eq!(res.label, Label::Normal);

    let activation = rt.block_on(server).unwrap()?;
    assert_eq!(activation.shape(), client.head().output_shape());
    assert_eq!(activation.shape(), &[1, 2, 64, 64]);
    Ok(())
}

#[test]
fn infer_local_runs_the_full_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("xray.png");
    image::GrayImage::from_pixel(300, 280, image::Luma([120]))
        .save(&path)
        .unwrap();

    let client = EdgeClient::new(test_config(), toy_head()).unwrap();
    assert!(matches!(
        client.infer_local(&path),
        Err(EdgeErr::NoFullModel)
    ));

    let full = toy_graph(1).to_sequential().unwrap();
    let client = client.with_full_model(full);
    let res = client.infer_local(&path).unwrap();

    assert_eq!(res.label, Label::Pneumonia);
}

#[test]
fn forward_failures_are_compute_errors() {
    let client = EdgeClient::new(test_config(), toy_head()).unwrap();

    let x = ArrayD::from_elem(IxDyn(&[1, 1, 128, 128]), 0.0);
    assert!(matches!(
        client.infer_tensor(x, "127.0.0.1:1"),
        Err(EdgeErr::Compute(_))
    ));

    let client = client.with_full_model(toy_graph(0).to_sequential().unwrap());
    assert!(matches!(
        client.infer_local("no/such/xray.jpeg"),
        Err(EdgeErr::Compute(_))
    ));

    // params never loaded
    let graph = NetworkGraph::new(
        "bare",
        vec![1, 1, 8, 8],
        vec![Stage::new("conv0", StageKind::Conv(Conv2d::new(1, 2, 3, 1, 1, false)))],
    );
    let bare = graph.to_sequential().unwrap();
    let client = EdgeClient::new(test_config(), bare).unwrap();
    let x = ArrayD::from_elem(IxDyn(&[1, 1, 8, 8]), 0.0);
    assert!(matches!(
        client.infer_tensor(x, "127.0.0.1:1"),
        Err(EdgeErr::Compute(_))
    ));
}

#[test]
fn missing_checkpoint_and_cache_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        cache_dir: dir.path().to_path_buf(),
        ..test_config()
    };

    assert!(matches!(
        EdgeClient::from_config(config),
        Err(EdgeErr::Configuration(_))
    ));
}

#[test]
fn benchmark_times_the_head_without_a_server() {
    let head = toy_head();
    let flops = head.flops().unwrap();
    let client = EdgeClient::new(test_config(), head).unwrap();

    let bench = client.benchmark(2, 5).unwrap();

    assert_eq!(bench.timings.len(), 5);
    assert!(flops > 0);
    assert_eq!(bench.flops, flops);
    assert!(bench.gflops(Duration::from_micros(1)) >= 0.0);
}
