//! Integration tests for the administration agent
//!
//! These tests run the agent components against a fake game server on a real
//! UDP socket and a real log file on disk.

use agent::{
    ChatCommand, CommandChannel, CommandDispatcher, CommandWorker, GameController, LogTailer,
    PermissionLevel, PermissionRecord, PermissionStore, SessionDirectory, SqlitePermissionStore,
    Team, WORLD_SLOT,
};
use agent::{ChannelConfig, NameMatch};
use protocol::{Endpoint, ProtocolClient, ProtocolError};
use std::io::Write;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const PASSWORD: &str = "secret";

/// Fake game server answering on its own thread. Every rcon command it
/// accepts is forwarded to the returned receiver.
fn spawn_game_server(
    respond: impl Fn(&str) -> String + Send + 'static,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("Failed to bind server socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let addr = socket.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::unbounded_channel();

    thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let rcon_prefix = format!("rcon \"{}\" ", PASSWORD);

        while let Ok((size, peer)) = socket.recv_from(&mut buf) {
            let text = String::from_utf8_lossy(&buf[4..size]).trim_end().to_string();

            let body = if text == "getstatus" {
                "statusResponse\n\\sv_hostname\\Test Server\\mapname\\ut4_casa\n0 48 \"Alice\"\n".to_string()
            } else if let Some(command) = text.strip_prefix(&rcon_prefix) {
                let _ = tx.send(command.to_string());
                format!("print\n{}", respond(command))
            } else {
                "print\nBad rconpassword.\n".to_string()
            };

            let mut reply = vec![0xff; 4];
            reply.extend_from_slice(body.as_bytes());
            let _ = socket.send_to(&reply, peer);
        }
    });

    (addr, rx)
}

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        poll_interval: Duration::from_millis(10),
        query_timeout: Duration::from_millis(200),
        max_retries: 2,
        queue_limit: None,
    }
}

async fn connect(addr: &str, password: &str) -> ProtocolClient {
    ProtocolClient::connect(Endpoint::parse(addr).unwrap(), password)
        .await
        .unwrap()
}

async fn build_controller(
    addr: &str,
    store: Arc<dyn PermissionStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
) -> (GameController, CommandWorker) {
    let client = connect(addr, PASSWORD).await;
    let (channel, worker) = CommandChannel::new(client, fast_config());
    (GameController::new(channel, store, dispatcher), worker)
}

async fn next_command(received: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(5), received.recv())
        .await
        .expect("server saw no command in time")
        .expect("server thread ended")
}

/// Records every chat command with the speaker's level at dispatch time.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(ChatCommand, Option<PermissionLevel>)>>,
}

impl CommandDispatcher for Recorder {
    fn dispatch(&self, chat: &ChatCommand, directory: &SessionDirectory, controller: &GameController) {
        let level = directory.get(chat.slot).map(|session| session.level);
        self.seen.lock().unwrap().push((chat.clone(), level));

        if chat.command == "!whoami" {
            if let Some(session) = directory.get(chat.slot) {
                controller.tell(chat.slot, &format!("You are {}", session.level));
            }
        }
    }
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests the public status query against a real socket
    #[tokio::test]
    async fn status_over_udp() {
        let (addr, _received) = spawn_game_server(|_| String::new());
        let mut client = connect(&addr, PASSWORD).await;

        let status = client.status().await.unwrap();
        assert_eq!(status.get("sv_hostname"), Some("Test Server"));
        assert_eq!(status.get("mapname"), Some("ut4_casa"));
        assert_eq!(status.players.len(), 1);
        assert_eq!(status.players[0].name, "Alice");
        assert_eq!(status.players[0].frags, 0);
        assert_eq!(status.players[0].ping, 48);
    }

    /// Tests that a rejected password is reported instead of returned as output
    #[tokio::test]
    async fn wrong_password_rejected() {
        let (addr, _received) = spawn_game_server(|_| String::new());
        let mut client = connect(&addr, "guess").await;

        match client.rcon_query("status").await {
            Err(ProtocolError::AuthenticationFailed(_)) => {}
            other => panic!("expected authentication failure, got {:?}", other),
        }
    }

    /// Tests the rcon status table as the server prints it
    #[tokio::test]
    async fn rcon_status_rows() {
        let (addr, _received) = spawn_game_server(|command| match command {
            "status" => concat!(
                "map: ut4_casa\n",
                "num score ping name            lastmsg address               qport rate\n",
                "--- ----- ---- --------------- ------- --------------------- ----- -----\n",
                "  0    12   48 Alice                 0 10.0.0.1:27960        1234 25000\n",
                "  1     3  999 Bob^7                50 10.0.0.2:27960        5678 25000\n",
            )
            .to_string(),
            _ => String::new(),
        });
        let mut client = connect(&addr, PASSWORD).await;

        let rows = client.rcon_status().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(rows[0].score, 12);
        assert_eq!(rows[1].slot, 1);
        assert_eq!(rows[1].ping, 999);
    }
}

/// LOG TO SERVER PIPELINE TESTS
mod pipeline_tests {
    use super::*;

    struct Harness {
        log: NamedTempFile,
        controller: GameController,
        recorder: Arc<Recorder>,
        received: mpsc::UnboundedReceiver<String>,
        store: Arc<SqlitePermissionStore>,
        _db_dir: TempDir,
    }

    impl Harness {
        async fn start() -> Harness {
            let (addr, received) = spawn_game_server(|command| match command {
                "dir map bsp" => "/ut4_casa.bsp\n/ut4_abbey.bsp\n".to_string(),
                _ => String::new(),
            });

            let db_dir = TempDir::new().unwrap();
            let store = Arc::new(SqlitePermissionStore::open(db_dir.path().join("data.sqlite")).unwrap());
            store
                .register(&PermissionRecord {
                    guid: "GUIDALICE".to_string(),
                    name: "Alice".to_string(),
                    address: "10.0.0.1".to_string(),
                    level: PermissionLevel::HeadAdmin,
                })
                .unwrap();

            let mut log = NamedTempFile::new().unwrap();
            writeln!(log, "  0:00 ClientUserinfo: 9 \\name\\Ghost\\cl_guid\\OLD").unwrap();
            log.flush().unwrap();

            let recorder = Arc::new(Recorder::default());
            let (controller, worker) = build_controller(&addr, store.clone(), recorder.clone()).await;
            let tailer = LogTailer::open(log.path(), Duration::from_millis(10)).await.unwrap();

            worker.spawn();
            tokio::spawn(tailer.run(controller.clone()));

            let mut harness = Harness {
                log,
                controller,
                recorder,
                received,
                store,
                _db_dir: db_dir,
            };
            harness.wait_until_live().await;
            harness
        }

        async fn wait_until_live(&mut self) {
            timeout(Duration::from_secs(5), async {
                while !self.controller.is_live() {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("agent never went live");

            // go-live lists maps and then queues a status refresh
            assert_eq!(next_command(&mut self.received).await, "dir map bsp");
            assert_eq!(next_command(&mut self.received).await, "fdir *.pk3");
            assert_eq!(next_command(&mut self.received).await, "status");
        }

        fn append(&mut self, line: &str) {
            writeln!(self.log, "{}", line).unwrap();
            self.log.flush().unwrap();
        }

        async fn wait_for_slot(&self, slot: u32, present: bool) {
            timeout(Duration::from_secs(5), async {
                while self.controller.directory().read().await.get(slot).is_some() != present {
                    sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("directory never reached the expected state");
        }
    }

    /// Tests that history written before startup is not replayed
    #[tokio::test]
    async fn history_is_skipped() {
        let harness = Harness::start().await;

        let directory = harness.controller.directory().read().await;
        assert!(directory.get(9).is_none());
        assert!(directory.is_empty());
        assert_eq!(harness.controller.maps(), vec!["ut4_abbey", "ut4_casa"]);
    }

    /// Tests connect, permission lookup, chat and disconnect end to end
    #[tokio::test]
    async fn player_lifecycle() {
        let mut harness = Harness::start().await;

        harness.append("  1:00 ClientUserinfo: 0 \\ip\\10.0.0.1:27960\\name\\^4Alice\\cl_guid\\GUIDALICE");
        harness.append("  1:01 ClientUserinfo: 1 \\ip\\10.0.0.2:27960\\name\\Bob\\cl_guid\\GUIDBOB");
        harness.wait_for_slot(1, true).await;

        {
            let directory = harness.controller.directory().read().await;
            let alice = directory.get(0).unwrap();
            assert_eq!(alice.pretty_name, "Alice");
            assert_eq!(alice.level, PermissionLevel::HeadAdmin);
            assert!(alice.registered);

            let bob = directory.get(1).unwrap();
            assert_eq!(bob.level, PermissionLevel::Guest);
            assert!(!bob.registered);

            match directory.find_by_name("bo") {
                NameMatch::Unique(session) => assert_eq!(session.slot, 1),
                _ => panic!("expected a unique match for bo"),
            }
        }

        harness.append("  1:05 say: 0 Alice: !whoami");
        assert_eq!(next_command(&mut harness.received).await, "tell 0 You are Head Admin");

        harness.append("  1:10 ClientDisconnect: 1");
        harness.wait_for_slot(1, false).await;

        let seen = harness.recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.slot, 0);
        assert_eq!(seen[0].1, Some(PermissionLevel::HeadAdmin));
    }

    /// Tests that a grant is written to the database and reflected in the session
    #[tokio::test]
    async fn grant_persists() {
        let mut harness = Harness::start().await;

        harness.append("  1:01 ClientUserinfo: 3 \\ip\\10.0.0.3:27960\\name\\Carol\\cl_guid\\GUIDCAROL");
        harness.wait_for_slot(3, true).await;

        let level = harness.controller.grant(3, PermissionLevel::Admin).await.unwrap();
        assert_eq!(level, PermissionLevel::Admin);
        assert_eq!(harness.store.lookup("GUIDCAROL").unwrap(), Some(PermissionLevel::Admin));

        // a reconnect under a new slot picks the level up from the store
        harness.append("  2:00 ClientDisconnect: 3");
        harness.append("  2:01 ClientUserinfo: 4 \\ip\\10.0.0.3:27960\\name\\Carol\\cl_guid\\GUIDCAROL");
        harness.wait_for_slot(4, true).await;

        let directory = harness.controller.directory().read().await;
        assert_eq!(directory.get(4).unwrap().level, PermissionLevel::Admin);
        assert!(directory.get(3).is_none());
    }

    /// Tests that intents reach the server in the order they were issued
    #[tokio::test]
    async fn intents_in_order() {
        let mut harness = Harness::start().await;

        harness.controller.force_team(2, Team::Blue);
        assert!(!harness.controller.kick(WORLD_SLOT));
        harness.controller.kick(2);
        harness.controller.tell(2, &"spam ".repeat(40));

        assert_eq!(next_command(&mut harness.received).await, "forceteam 2 blue");
        assert_eq!(next_command(&mut harness.received).await, "kick 2");
        assert!(next_command(&mut harness.received).await.starts_with("tell 2 spam"));
        assert!(next_command(&mut harness.received).await.starts_with("tell 2 spam"));
    }
}

/// STRESS AND ERROR HANDLING TESTS
mod stress_tests {
    use super::*;

    /// Tests many concurrent producers sharing one channel
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_keep_their_order() {
        let (addr, mut received) = spawn_game_server(|_| String::new());
        let (controller, worker) =
            build_controller(&addr, Arc::new(agent::MemoryPermissionStore::new()), Arc::new(Recorder::default()))
                .await;
        controller.channel().go_live();
        worker.spawn();

        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    for n in 0..25 {
                        controller.send_rcon(format!("say {} {}", producer, n));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let mut next = [0u32; 4];
        for _ in 0..100 {
            let command = next_command(&mut received).await;
            let mut parts = command.split(' ').skip(1);
            let producer: usize = parts.next().unwrap().parse().unwrap();
            let n: u32 = parts.next().unwrap().parse().unwrap();
            assert_eq!(n, next[producer], "producer {} out of order", producer);
            next[producer] += 1;
        }
        assert_eq!(next, [25; 4]);
    }

    /// Tests that an unreachable server does not stop the worker
    #[tokio::test]
    async fn silent_server_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap().to_string();

        let client = connect(&addr, PASSWORD).await;
        let (channel, worker) = CommandChannel::new(client, fast_config());
        channel.go_live();
        let handle = worker.spawn();

        channel.submit("say one");
        channel.submit("say two");

        match channel.query_now("say three").await {
            Err(agent::AgentError::Protocol(ProtocolError::Timeout { attempts })) => assert_eq!(attempts, 2),
            other => panic!("expected timeout, got {:?}", other),
        }

        timeout(Duration::from_secs(5), async {
            while channel.pending() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queued commands were never attempted");
        assert!(!handle.is_finished());
    }

    /// Tests the blocking entry point used by synchronous callers
    #[test]
    fn blocking_status_query() {
        let (addr, _received) = spawn_game_server(|_| String::new());

        let status = tokio_test::block_on(async {
            let mut client = connect(&addr, PASSWORD).await;
            client.status().await
        });

        assert_eq!(status.unwrap().get("mapname"), Some("ut4_casa"));
    }
}
