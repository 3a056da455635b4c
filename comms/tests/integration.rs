use comms::{DType, InferenceResult, Label, Tensor};
use tokio::io::{self, AsyncWriteExt};

fn ramp(shape: &[usize]) -> Tensor {
    let n: usize = shape.iter().product();
    let values: Vec<f32> = (0..n).map(|i| i as f32 * 0.5 - 3.0).collect();
    Tensor::from_f32(shape.to_vec(), &values).unwrap()
}

#[test]
fn encode_decode_preserves_every_bit() {
    let shapes: [&[usize]; 4] = [&[7], &[3, 10_000], &[2, 3, 4], &[1, 64, 16, 16]];

    for shape in shapes {
        let t = ramp(shape);
        let bytes = comms::encode(&t).unwrap();
        assert_eq!(comms::decode(&bytes).unwrap(), t);
    }

    let nan = Tensor::from_f32(vec![2], &[f32::NAN, -0.0]).unwrap();
    let decoded = comms::decode(&comms::encode(&nan).unwrap()).unwrap();
    assert_eq!(decoded.data(), nan.data());
}

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let t = ramp(&[1, 4, 8, 8]);

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (rx2, tx2) = io::split(two);
    let (mut rx, _) = comms::channel(rx2, tx2);

    let expected = t.clone();
    let sender = tokio::spawn(async move { tx.send(&t).await });

    let received = rx.recv().await.unwrap();
    sender.await.unwrap().unwrap();

    assert_eq!(received, expected);
}

#[tokio::test]
async fn result_round_trips_through_channel() {
    let (one, two) = io::duplex(64);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);
    let (rx2, tx2) = io::split(two);
    let (mut rx, _) = comms::channel(rx2, tx2);

    let res = InferenceResult::new(Label::Normal);
    tx.send(&res.to_tensor().unwrap()).await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.shape(), &[1]);
    assert_eq!(received.dtype(), DType::I64);
    assert_eq!(InferenceResult::try_from(received).unwrap().label, Label::Normal);
}

#[tokio::test]
async fn peer_closing_mid_payload_is_unexpected_eof() {
    let t = ramp(&[1, 16]);
    let bytes = comms::encode(&t).unwrap();

    let (mut one, two) = io::duplex(1024);
    one.write_all(&bytes[..bytes.len() / 2]).await.unwrap();
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let err = rx.recv().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn invalid_dtype_tag_is_invalid_data() {
    let t = ramp(&[2]);
    let mut bytes = comms::encode(&t).unwrap();
    // len(4) + rank(1) + one dim(4)
    bytes[9] = 9;

    let (mut one, two) = io::duplex(1024);
    one.write_all(&bytes).await.unwrap();

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let err = rx.recv().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}
