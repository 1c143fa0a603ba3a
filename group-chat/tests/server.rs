use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use futures_util::StreamExt;
use group_chat::{
    codec::{LineCodec, MAX_LINE_LEN, MAX_REPLY_LEN},
    server::Server,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::FramedRead;

const WAIT: Duration = Duration::from_secs(2);

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RunningServer {
    async fn start() -> Self {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel();
        let handle = tokio::spawn(server.run_until(async {
            let _ = signal.await;
        }));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        timeout(WAIT, self.handle)
            .await
            .expect("server should stop")
            .unwrap()
            .unwrap();
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn named(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.request(&format!("name {name}"), "Connected Successfully.").await;
        client
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Next line from the server, or `None` once the connection is closed.
    async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for the server")
            .ok()
            .flatten()
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.recv().await.as_deref(), Some(expected));
    }

    async fn request(&mut self, line: &str, reply: &str) {
        self.send_line(line).await;
        self.expect(reply).await;
    }

    async fn expect_closed(&mut self) {
        assert_eq!(self.recv().await, None);
    }
}

async fn next_reply(replies: &mut FramedRead<OwnedReadHalf, LineCodec>) -> String {
    timeout(WAIT, replies.next())
        .await
        .expect("timed out waiting for the server")
        .expect("connection closed")
        .expect("reply should decode")
}

#[tokio::test]
async fn group_message_reaches_every_other_member() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut bob = TestClient::named(server.addr, "bob").await;
    let mut carl = TestClient::named(server.addr, "carl").await;

    alice
        .request(
            "create_group team bob,carl",
            "Group \"team\" was created successfully.",
        )
        .await;
    alice.request("send team hi", "Sent successfully.").await;
    bob.expect("alice: hi").await;
    carl.expect("alice: hi").await;

    // The sender is left out of its own broadcast.
    alice.request("who", "alice,bob,carl").await;

    server.stop().await;
}

#[tokio::test]
async fn direct_message_is_delivered() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut bob = TestClient::named(server.addr, "bob").await;

    bob.request("send alice good morning", "Sent successfully.")
        .await;
    alice.expect("bob: good morning").await;

    server.stop().await;
}

#[tokio::test]
async fn duplicate_name_is_rejected_and_closed() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;

    let mut impostor = TestClient::connect(server.addr).await;
    impostor
        .request("name alice", "Client name is already in use.")
        .await;
    impostor.expect_closed().await;

    alice.request("who", "alice").await;

    server.stop().await;
}

#[tokio::test]
async fn failed_requests_keep_the_connection() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut bob = TestClient::named(server.addr, "bob").await;
    let _dave = TestClient::named(server.addr, "dave").await;

    alice
        .request("create_group g alice", "ERROR: failed to create group \"g\".")
        .await;
    alice.request("send x hi", "ERROR: failed to send.").await;
    alice.request("send alice hi", "ERROR: failed to send.").await;
    alice.request("shout hi", "ERROR: Invalid input.").await;

    bob.request(
        "create_group team dave",
        "Group \"team\" was created successfully.",
    )
    .await;
    alice.request("send team hi", "ERROR: failed to send.").await;

    alice.request("who", "alice,bob,dave").await;

    server.stop().await;
}

#[tokio::test]
async fn unnamed_connection_may_only_register() {
    let server = RunningServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client.request("who", "ERROR: Invalid input.").await;
    client.request("send bob hi", "ERROR: Invalid input.").await;
    client.request("name alice", "Connected Successfully.").await;
    client.request("name bob", "ERROR: Invalid input.").await;

    server.stop().await;
}

#[tokio::test]
async fn illegal_name_is_rejected_and_closed() {
    let server = RunningServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .request("name al-ice", "Client name is already in use.")
        .await;
    client.expect_closed().await;

    let mut alice = TestClient::named(server.addr, "alice").await;
    alice.request("who", "alice").await;

    server.stop().await;
}

#[tokio::test]
async fn replies_are_flushed_after_peer_half_closes() {
    let server = RunningServer::start().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .writer
        .write_all(b"name alice\nwho\nsend alice hi\n")
        .await
        .unwrap();
    client.writer.shutdown().await.unwrap();

    client.expect("Connected Successfully.").await;
    client.expect("alice").await;
    client.expect("ERROR: failed to send.").await;
    client.expect_closed().await;

    // The half-closed peer was purged, so its name is free again.
    let mut alice = TestClient::named(server.addr, "alice").await;
    alice.request("who", "alice").await;

    server.stop().await;
}

#[tokio::test]
async fn message_too_long_for_a_line_is_refused() {
    let server = RunningServer::start().await;
    let mut charlie = TestClient::named(server.addr, "charlie").await;
    let mut b = TestClient::named(server.addr, "b").await;

    // A full-length request whose pushed form would not fit a line.
    let request = format!("send b {}", "x".repeat(MAX_LINE_LEN - 1 - "send b ".len()));
    assert_eq!(request.len(), MAX_LINE_LEN - 1);
    charlie.request(&request, "ERROR: failed to send.").await;

    let fits = "x".repeat(MAX_LINE_LEN - 1 - "charlie: ".len());
    charlie
        .request(&format!("send b {fits}"), "Sent successfully.")
        .await;
    b.expect(&format!("charlie: {fits}")).await;

    server.stop().await;
}

#[tokio::test]
async fn long_roster_is_readable_with_reply_limit() {
    let server = RunningServer::start().await;
    let mut crowd = Vec::new();
    for index in 0..30 {
        crowd.push(TestClient::named(server.addr, &format!("client{index:05}")).await);
    }

    let stream = TcpStream::connect(server.addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut replies = FramedRead::new(reader, LineCodec::with_max_length(MAX_REPLY_LEN));
    writer.write_all(b"name zed\nwho\n").await.unwrap();

    assert_eq!(next_reply(&mut replies).await, "Connected Successfully.");
    let roster = next_reply(&mut replies).await;
    assert!(roster.len() > MAX_LINE_LEN);
    assert_eq!(roster.split(',').count(), 31);
    assert!(roster.ends_with(",zed"));

    server.stop().await;
}

#[tokio::test]
async fn exit_unregisters_and_frees_the_name() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut bob = TestClient::named(server.addr, "bob").await;

    bob.request("exit", "Unregistered successfully.").await;
    bob.expect_closed().await;

    alice.request("who", "alice").await;
    alice.request("send bob hi", "ERROR: failed to send.").await;

    let mut returning = TestClient::named(server.addr, "bob").await;
    returning.request("who", "alice,bob").await;

    server.stop().await;
}

#[tokio::test]
async fn departed_member_is_dropped_from_groups() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let bob = TestClient::named(server.addr, "bob").await;
    let mut carl = TestClient::named(server.addr, "carl").await;

    alice
        .request(
            "create_group team bob,carl",
            "Group \"team\" was created successfully.",
        )
        .await;
    drop(bob);

    // Disconnects are processed in order with later requests, so poll until
    // the roster no longer lists bob.
    let mut roster = String::new();
    for _ in 0..50 {
        alice.send_line("who").await;
        roster = alice.recv().await.unwrap();
        if roster == "alice,carl" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(roster, "alice,carl");

    alice.request("send team still here", "Sent successfully.").await;
    carl.expect("alice: still here").await;

    server.stop().await;
}

#[tokio::test]
async fn oversized_line_tears_down_the_connection() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut flooder = TestClient::named(server.addr, "flood").await;

    let oversized = "a".repeat(MAX_LINE_LEN + 44);
    flooder.writer.write_all(oversized.as_bytes()).await.unwrap();
    flooder.expect_closed().await;

    alice.request("who", "alice").await;
    TestClient::named(server.addr, "flood").await;

    server.stop().await;
}

#[tokio::test]
async fn shutdown_pushes_exit_to_every_connection() {
    let server = RunningServer::start().await;
    let mut alice = TestClient::named(server.addr, "alice").await;
    let mut lurker = TestClient::connect(server.addr).await;
    // Make sure the unnamed connection is known to the server.
    lurker.request("who", "ERROR: Invalid input.").await;

    server.stop().await;

    alice.expect("exit").await;
    alice.expect_closed().await;
    lurker.expect("exit").await;
    lurker.expect_closed().await;
}
