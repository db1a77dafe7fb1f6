// End-to-end tests for `RosClient` against a fake router speaking the
// binary API over localhost TCP.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use tokio::net::{TcpListener, TcpStream};

use tikvend_api::protocol::{read_sentence, write_sentence};
use tikvend_api::{CommandSentence, Error, RosClient, RosClientConfig, command};

// ── Fake router ─────────────────────────────────────────────────────

/// Serve one login + one command per accepted connection, forever.
/// Returns the bound address and a connection counter.
async fn spawn_router(
    rows: Vec<(&'static str, &'static str)>,
) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let rows = rows.clone();

            tokio::spawn(async move {
                if serve_connection(&mut socket, &rows).await.is_err() {
                    // Peer went away mid-exchange; nothing to do.
                }
            });
        }
    });

    (address, connections)
}

async fn serve_connection(
    socket: &mut TcpStream,
    rows: &[(&str, &str)],
) -> Result<(), Error> {
    // Login exchange.
    let login = read_sentence(socket).await?;
    assert_eq!(login.words[0], "/login");
    write_sentence(socket, &["!done"]).await?;

    // Exactly one command per connection.
    let _cmd = read_sentence(socket).await?;
    for (key, value) in rows {
        write_sentence(
            socket,
            &["!re".to_owned(), format!("={key}={value}")],
        )
        .await?;
    }
    write_sentence(socket, &["!done"]).await?;
    Ok(())
}

fn client_for(address: &str) -> RosClient {
    RosClient::new(
        RosClientConfig::new(address, "admin", SecretString::from("pw".to_owned()))
            .with_connect_timeout(Duration::from_secs(2))
            .with_command_timeout(Duration::from_secs(2)),
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn execute_logs_in_and_returns_rows() {
    let (address, _connections) =
        spawn_router(vec![("user", "vch-a"), ("user", "vch-b")]).await;
    let client = client_for(&address);

    let rows = client
        .execute(&command::hotspot_active_print(None))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn every_command_gets_a_fresh_connection() {
    let (address, connections) = spawn_router(vec![]).await;
    let client = client_for(&address);

    client.execute(&command::radius_print()).await.unwrap();
    client.execute(&command::radius_print()).await.unwrap();
    client.execute(&command::radius_print()).await.unwrap();

    // Three commands must mean three TCP sessions — the connection is
    // never reused after a reply, empty or not.
    assert_eq!(connections.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_result_is_ok() {
    let (address, _connections) = spawn_router(vec![]).await;
    let client = client_for(&address);

    let rows = client
        .execute(&CommandSentence::new("/ip/hotspot/active/print"))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn probe_reports_reachable_router() {
    let (address, _connections) = spawn_router(vec![("name", "gw-lobby")]).await;
    let client = client_for(&address);
    assert!(client.probe().await);
}

#[tokio::test]
async fn probe_never_errors_on_dead_address() {
    // Bind-then-drop gives us a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = client_for(&address);
    assert!(!client.probe().await);
}

#[tokio::test]
async fn unreachable_execute_is_transient_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = client_for(&address);
    let err = client
        .execute(&command::radius_print())
        .await
        .unwrap_err();
    assert!(err.is_transient());
}
