//! Integration tests for the writer loop: ordering, backpressure,
//! cancellation, and disconnect recovery.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use longeron_core::completion::Completion;
use longeron_core::counters::ConnectionCounters;
use longeron_core::deadline::Deadline;
use longeron_core::error::LongeronError;
use longeron_nats::command::{Command, CommandPool};
use longeron_nats::transport::mem::{pair, WriteStep};
use longeron_nats::transport::Transport;
use longeron_nats::writer::{WriterExit, WriterLoop, WriterState};

struct Rig {
    state: Arc<WriterState>,
    pool: Arc<CommandPool>,
    counters: Arc<ConnectionCounters>,
}

fn rig(queue_capacity: usize) -> Rig {
    let counters = Arc::new(ConnectionCounters::default());
    Rig {
        state: Arc::new(WriterState::new(queue_capacity, Arc::clone(&counters))),
        pool: Arc::new(CommandPool::new(16)),
        counters,
    }
}

impl Rig {
    async fn enqueue(&self, cmd: Command) {
        assert!(self.state.enqueue(cmd).await.is_ok(), "enqueue failed");
    }

    fn publish_command(&self, subject: &str, payload: &'static [u8]) -> (Command, Completion) {
        let completion = Completion::new();
        let mut cmd = self.pool.rent_publish();
        cmd.subject.push_str(subject);
        cmd.payload = Bytes::from_static(payload);
        cmd.completion = Some(completion.clone());
        (Command::Publish(cmd), completion)
    }

    fn spawn_writer(
        &self,
        transport: Box<dyn Transport>,
        budget: usize,
    ) -> (flume::Sender<()>, flume::Receiver<WriterExit>) {
        let (stop_tx, stop_rx) = flume::bounded(1);
        let (exit_tx, exit_rx) = flume::bounded(1);
        let (tx_half, _rx_half) = transport.split();
        let writer = WriterLoop::new(
            Arc::clone(&self.state),
            Arc::clone(&self.pool),
            tx_half,
            budget,
            stop_rx,
        );
        compio::runtime::spawn(async move {
            let _ = exit_tx.send(writer.run().await);
        })
        .detach();
        (stop_tx, exit_rx)
    }
}

#[compio::test]
async fn completions_resolve_in_enqueue_order() {
    let rig = rig(64);
    let (transport, peer) = pair();

    let mut completions = Vec::new();
    for i in 0..10 {
        let (cmd, completion) = rig.publish_command(&format!("t.{i}"), b"mm");
        rig.enqueue(cmd).await;
        completions.push(completion);
    }

    let (_stop, _exit) = rig.spawn_writer(Box::new(transport), 8192);

    for completion in &completions {
        completion.wait().await.unwrap();
    }
    // Exactly once: a second terminal transition must be a no-op.
    for completion in &completions {
        assert!(!completion.set_canceled());
    }

    let written = peer.written();
    let text = String::from_utf8(written).unwrap();
    let mut last = 0;
    for i in 0..10 {
        let pos = text
            .find(&format!("PUB t.{i} "))
            .unwrap_or_else(|| panic!("frame {i} missing from output"));
        assert!(pos >= last, "frame {i} written out of order");
        last = pos;
    }
    assert_eq!(rig.counters.sent_messages(), 10);
    assert_eq!(rig.counters.pending_commands(), 0);
}

#[compio::test]
async fn full_queue_blocks_fourth_producer() {
    let rig = rig(3);

    // Writer is not running: three commands fill the queue.
    let mut completions = Vec::new();
    for i in 0..3 {
        let (cmd, completion) = rig.publish_command(&format!("q.{i}"), b"x");
        rig.enqueue(cmd).await;
        completions.push(completion);
    }
    assert_eq!(rig.state.queued(), 3);

    // The fourth producer must suspend on the full queue.
    let (cmd, completion) = rig.publish_command("q.3", b"x");
    let fourth = rig.state.enqueue(cmd);
    futures::pin_mut!(fourth);
    assert!(
        compio::time::timeout(Duration::from_millis(50), &mut fourth)
            .await
            .is_err(),
        "fourth producer should block while the queue is full"
    );
    completions.push(completion);

    // Starting the writer drains slots and unblocks the producer.
    let (transport, _peer) = pair();
    let (_stop, _exit) = rig.spawn_writer(Box::new(transport), 8192);

    assert!(fourth.await.is_ok());
    for completion in &completions {
        completion.wait().await.unwrap();
    }
}

#[compio::test]
async fn expired_command_writes_no_bytes() {
    let rig = rig(16);

    let (live_cmd, live) = rig.publish_command("alive", b"ok");

    let doomed = Completion::new();
    let mut cmd = rig.pool.rent_publish();
    cmd.subject.push_str("doomed");
    cmd.payload = Bytes::from_static(b"dead");
    cmd.deadline = Deadline::after(Duration::from_millis(5));
    cmd.completion = Some(doomed.clone());

    rig.enqueue(Command::Publish(cmd)).await;
    rig.enqueue(live_cmd).await;

    // Let the deadline pass before any writer exists.
    compio::time::sleep(Duration::from_millis(20)).await;

    // Caller-side cancellation resolves the completion.
    let err = doomed.wait_until(Deadline::after(Duration::ZERO)).await;
    assert!(matches!(err, Err(LongeronError::Canceled)));

    let (transport, peer) = pair();
    let (_stop, _exit) = rig.spawn_writer(Box::new(transport), 8192);
    live.wait().await.unwrap();

    let text = String::from_utf8(peer.written()).unwrap();
    assert!(text.contains("PUB alive"), "live frame must be written");
    assert!(
        !text.contains("doomed") && !text.contains("dead"),
        "no bytes may be written for the expired command"
    );
}

#[compio::test]
async fn failed_flush_is_recovered_and_replayed_first() {
    // Five publishes; the batch budget admits only the first two, the
    // transport accepts part of the first flush then reports a closed
    // socket. Exactly those two must land in the recovery lists and be the
    // first bytes on the next transport.
    let rig = rig(16);

    let frame = |i: usize| format!("PUB r.{i} 2\r\nxx\r\n");
    let mut completions = Vec::new();
    for i in 0..5 {
        let (cmd, completion) = rig.publish_command(&format!("r.{i}"), b"xx");
        rig.enqueue(cmd).await;
        completions.push(completion);
    }

    let (transport, peer) = pair();
    peer.push_write_step(WriteStep::Accept(10));
    peer.push_write_step(WriteStep::Zero);

    // Budget below two frames' length: the first batch holds frames 0-1.
    let two_frames = frame(0).len() + frame(1).len();
    let (_stop, exit_rx) = rig.spawn_writer(Box::new(transport), two_frames - 1);

    match exit_rx.recv_async().await.unwrap() {
        WriterExit::Disconnected(_) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }

    // The recovery lists hold the two serialized commands (as unflushed
    // bytes) and both their completions.
    let (carried_bytes, carried_completions) = rig.state.carry_sizes();
    assert_eq!(carried_completions, 2);
    assert_eq!(carried_bytes, two_frames - 10);
    assert_eq!(rig.state.queued(), 3, "frames 2-4 remain queued");
    for completion in &completions {
        assert!(!completion.is_resolved(), "no completion may resolve yet");
    }

    // Simulated reconnect: a fresh writer against a fresh transport.
    let (transport2, peer2) = pair();
    let (_stop2, _exit2) = rig.spawn_writer(Box::new(transport2), 8192);

    for completion in &completions {
        completion.wait().await.unwrap();
    }

    // Every byte, across both transports, in the original order and
    // without duplication.
    let mut all = peer.written();
    all.extend_from_slice(&peer2.written());
    let expected: String = (0..5).map(frame).collect();
    assert_eq!(String::from_utf8(all).unwrap(), expected);
}

#[compio::test]
async fn priority_lane_flushes_before_queue() {
    let rig = rig(16);

    let (queued_cmd, queued) = rig.publish_command("normal", b"nn");
    rig.enqueue(queued_cmd).await;

    let mut connect = rig.pool.rent_connect();
    connect.body = Bytes::from_static(b"{}");
    rig.state.push_priority(Command::Connect(connect));

    let (transport, peer) = pair();
    let (_stop, _exit) = rig.spawn_writer(Box::new(transport), 8192);
    queued.wait().await.unwrap();

    let text = String::from_utf8(peer.written()).unwrap();
    let connect_pos = text.find("CONNECT").expect("handshake missing");
    let pub_pos = text.find("PUB normal").expect("publish missing");
    assert!(connect_pos < pub_pos, "handshake must precede queued work");
}

#[compio::test]
async fn batch_counts_frames_not_commands() {
    let rig = rig(16);

    let completion = Completion::new();
    let mut batch = rig.pool.rent_batch();
    for i in 0..3 {
        let mut entry = longeron_nats::command::PublishCommand::default();
        entry.subject.push_str(&format!("b.{i}"));
        entry.payload = Bytes::from_static(b"y");
        batch.entries.push(entry);
    }
    batch.completion = Some(completion.clone());

    rig.enqueue(Command::Batch(batch)).await;

    let (transport, peer) = pair();
    let (_stop, _exit) = rig.spawn_writer(Box::new(transport), 8192);
    completion.wait().await.unwrap();

    assert_eq!(rig.counters.sent_messages(), 3);
    let text = String::from_utf8(peer.written()).unwrap();
    assert_eq!(text.matches("PUB b.").count(), 3);
}
