use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use rct::client::{ConnectionManager, ConnectionStatus, ProcessError};
use rct::command::CommandProcessor;
use rct::config::Config;
use rct::console::mock::MockConsole;
use rct::protocol::{ConsoleOperation, ConsoleRequest, LogEntry, Message};
use rct::server::RctServer;
use rct::transport::MessageSocket;

fn test_config() -> Config {
    Config {
        response_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(200),
        keepalive_send_interval: Duration::from_millis(100),
        keepalive_timeout: Duration::from_millis(2_000),
    }
}

async fn spawn_server(commands: Vec<CommandProcessor>) -> SocketAddr {
    let mut server = RctServer::new(test_config());
    for command in commands {
        server.register_command(command).unwrap();
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

fn echo_command() -> CommandProcessor {
    CommandProcessor::new(
        "echo",
        "echo [words...]",
        "print the arguments back",
        |console, command| async move {
            console.println(&command.args().join(" "));
            Ok(())
        },
    )
}

async fn connected_manager(addr: SocketAddr) -> Arc<ConnectionManager> {
    let manager = ConnectionManager::new(addr, test_config());
    manager.establish_new_connection().await.unwrap();
    manager
}

#[tokio::test]
async fn echo_round_trip_applies_output_and_completes() {
    let addr = spawn_server(vec![echo_command()]).await;
    let manager = connected_manager(addr).await;
    let console = MockConsole::new();

    manager.execute(&console, "echo hi").await.unwrap();
    assert_eq!(console.printed_text(), "hi\n");
    assert_eq!(
        console.operations(),
        vec![ConsoleOperation::Print("hi\n".to_string())]
    );
}

#[tokio::test]
async fn builtin_ping_runs_through_the_chain() {
    let addr = spawn_server(vec![]).await;
    let manager = connected_manager(addr).await;
    let console = MockConsole::new();

    manager.execute(&console, "ping").await.unwrap();
    assert_eq!(console.printed_text(), "pong\n");
}

#[tokio::test]
async fn unknown_remote_command_reports_one_line() {
    let addr = spawn_server(vec![]).await;
    let manager = connected_manager(addr).await;
    let console = MockConsole::new();

    manager.execute(&console, "subsystems").await.unwrap();
    assert!(console.printed_text().contains("not recognized"));
}

#[tokio::test]
async fn remote_input_round_trip() {
    let ask = CommandProcessor::new(
        "ask",
        "ask",
        "prompt for a line and repeat it",
        |console, _command| async move {
            let line = console.read_input_line().await?;
            console.println(&format!("you said {line}"));
            Ok(())
        },
    );
    let addr = spawn_server(vec![ask]).await;
    let manager = connected_manager(addr).await;
    let console = MockConsole::new();
    console.queue_input_line("hello");

    manager.execute(&console, "ask").await.unwrap();
    assert!(console.printed_text().contains("you said hello"));
}

#[tokio::test]
async fn has_input_ready_round_trip() {
    let poll = CommandProcessor::new(
        "poll",
        "poll",
        "report whether an input line is waiting",
        |console, _command| async move {
            let ready = console.has_input_ready().await?;
            console.println(if ready { "ready" } else { "idle" });
            Ok(())
        },
    );
    let addr = spawn_server(vec![poll]).await;
    let manager = connected_manager(addr).await;

    let console = MockConsole::new();
    manager.execute(&console, "poll").await.unwrap();
    assert_eq!(console.printed_text(), "idle\n");

    let console = MockConsole::new();
    console.queue_input_line("pending");
    manager.execute(&console, "poll").await.unwrap();
    assert_eq!(console.printed_text(), "ready\n");
}

#[tokio::test]
async fn forwarded_logs_reach_the_operator_console() {
    let server = Arc::new(RctServer::new(test_config()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
    }
    let manager = connected_manager(addr).await;
    let log_console = Arc::new(MockConsole::new());
    manager.set_log_console(log_console.clone());

    let entries = vec![
        LogEntry {
            domain: "drive".to_string(),
            text: "target velocity 2.4".to_string(),
            is_error: false,
        },
        LogEntry {
            domain: "vision".to_string(),
            text: "camera disconnected".to_string(),
            is_error: true,
        },
    ];
    // The server only has a connection once the accept loop has run, so
    // forwarding is retried until the entries show up.
    let mut text = log_console.printed_text();
    for _ in 0..50 {
        if text.contains("camera disconnected") {
            break;
        }
        server.forward_logs(entries.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        text = log_console.printed_text();
    }
    assert!(text.contains("[drive] target velocity 2.4"));
    assert!(text.contains("[vision] camera disconnected"));
    let errors_routed = log_console
        .operations()
        .iter()
        .any(|op| matches!(op, ConsoleOperation::PrintErr(line) if line.contains("camera")));
    assert!(errors_routed);
}

#[tokio::test]
async fn commands_listing_is_pushed_on_connect() {
    let addr = spawn_server(vec![echo_command()]).await;
    let manager = connected_manager(addr).await;

    let mut help = manager.remote_help();
    for _ in 0..50 {
        if !help.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        help = manager.remote_help();
    }
    assert!(help.iter().any(|h| h.usage.starts_with("echo")));
    // Builtin commands are runnable remotely, so the listing carries them too.
    assert!(help.iter().any(|h| h.usage == "ping"));
}

#[tokio::test]
async fn supersession_terminates_the_previous_process() {
    let block = CommandProcessor::new(
        "block",
        "block",
        "hold the console until terminated",
        |console, _command| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            console.println("never printed");
            Ok(())
        },
    );
    let addr = spawn_server(vec![block, echo_command()]).await;
    let manager = connected_manager(addr).await;

    let blocked_console = Arc::new(MockConsole::new());
    let blocked = {
        let manager = manager.clone();
        let console = blocked_console.clone();
        tokio::spawn(async move { manager.execute(console.as_ref(), "block").await })
    };
    // Let the first command reach the server before superseding it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let console = MockConsole::new();
    manager.execute(&console, "echo done").await.unwrap();
    assert_eq!(console.printed_text(), "done\n");

    let first = blocked.await.unwrap();
    assert!(matches!(first, Err(ProcessError::Terminated)));
    assert_eq!(blocked_console.printed_text(), "");
}

/// Drives the manager against a hand-rolled server so the raw wire traffic
/// is observable.
#[tokio::test]
async fn process_ids_are_monotonic_and_mismatched_output_is_ignored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (start_tx, mut start_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = MessageSocket::from_stream(stream);
        let sender = socket.sender();
        let (tx, mut rx) = mpsc::unbounded_channel();
        socket.spawn_receiver(
            move |message| {
                let _ = tx.send(message);
            },
            |_| {},
        );
        while let Some(message) = rx.recv().await {
            if let Message::StartCommand { process_id, .. } = message {
                let _ = start_tx.send(process_id);
                // A mismatched id first: it must neither apply nor unblock.
                let _ = sender
                    .send(&Message::CommandOutput {
                        process_id: process_id + 100,
                        terminate_command: true,
                        request: ConsoleRequest::NoRequest,
                        operations: vec![ConsoleOperation::Print("wrong\n".to_string())],
                    })
                    .await;
                let _ = sender
                    .send(&Message::CommandOutput {
                        process_id,
                        terminate_command: true,
                        request: ConsoleRequest::NoRequest,
                        operations: vec![ConsoleOperation::Print("right\n".to_string())],
                    })
                    .await;
            }
        }
    });

    let manager = connected_manager(addr).await;
    for expected_id in 0..3u32 {
        let console = MockConsole::new();
        manager.execute(&console, "anything").await.unwrap();
        assert_eq!(start_rx.recv().await.unwrap(), expected_id);
        assert_eq!(console.printed_text(), "right\n");
    }
}

#[tokio::test]
async fn status_transitions_follow_transport_health() {
    let manager = ConnectionManager::new("127.0.0.1:1".parse().unwrap(), test_config());
    assert_eq!(manager.status(), ConnectionStatus::NoConnection);
    assert_eq!(
        manager.check_server_connection().await,
        ConnectionStatus::NoConnection
    );
    assert!(manager.establish_new_connection().await.is_err());

    let addr = spawn_server(vec![]).await;
    let manager = ConnectionManager::new(addr, test_config());
    manager.establish_new_connection().await.unwrap();
    assert_eq!(
        manager.check_server_connection().await,
        ConnectionStatus::Ok
    );
    assert_eq!(manager.status(), ConnectionStatus::Ok);
}

#[tokio::test]
async fn background_loop_reconnects_after_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = ConnectionManager::new(addr, test_config());
    let poll_task = manager.start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.status(), ConnectionStatus::NoConnection);

    let server = RctServer::new(test_config());
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    let mut status = manager.status();
    for _ in 0..50 {
        if status == ConnectionStatus::Ok {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        status = manager.status();
    }
    poll_task.abort();
    assert_eq!(status, ConnectionStatus::Ok);
}
