use std::borrow::Cow;

use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv_batch_then_reply() -> io::Result<()> {
    const SIZE: usize = 128;

    let (actor, learner) = io::duplex(SIZE);

    let (rx, tx) = io::split(actor);
    let (mut actor_rx, mut actor_tx) = comms::channel(rx, tx);

    let (rx, tx) = io::split(learner);
    let (mut learner_rx, mut learner_tx) = comms::channel(rx, tx);

    let bytes: Vec<u8> = (0..=255).collect();
    actor_tx.send(&Msg::Data(Payload::Batch(&bytes))).await?;

    let mut buf: Vec<u32> = Vec::new();
    let Msg::Data(Payload::Batch(got)) = learner_rx.recv_into(&mut buf).await? else {
        panic!("expected a batch");
    };
    assert_eq!(got, bytes.as_slice());

    learner_tx.send(&Msg::Control(Command::Ack)).await?;
    let msg: Msg = actor_rx.recv_into(&mut buf).await?;
    assert!(matches!(msg, Msg::Control(Command::Ack)));

    Ok(())
}

#[tokio::test]
async fn error_text_is_received() -> io::Result<()> {
    let (one, two) = io::duplex(64);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    tx.send(&Msg::Err(Cow::Borrowed("learner exploded"))).await?;

    let mut buf: Vec<u32> = Vec::new();
    match rx.recv_into(&mut buf).await? {
        Msg::Err(text) => assert_eq!(text, "learner exploded"),
        other => panic!("unexpected msg: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn closed_peer_is_an_eof() {
    let (one, two) = io::duplex(64);
    drop(two);
    let (rx, _) = io::split(one);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let mut buf: Vec<u32> = Vec::new();
    let res: std::io::Result<Msg> = rx.recv_into(&mut buf).await;
    let err = res.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}
