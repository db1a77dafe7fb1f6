// RouterOS binary API client.
//
// `RosClient` opens a *fresh* TCP connection for every command: connect,
// login, one command, drain the reply, close. This is a required
// mitigation, not a style choice — this protocol family is known to
// corrupt a shared session after an empty reply, so connections are
// never pooled or reused across commands.

use std::collections::HashMap;

use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::command::{self, CommandSentence};
use crate::error::Error;
use crate::protocol::{self, ReplyKind};
use crate::transport::RosClientConfig;

/// One `!re` data row: attribute name → value.
pub type RosRow = HashMap<String, String>;

/// Client handle for a single router's binary API.
///
/// Cheap to clone; holds no socket. Every [`execute`](Self::execute)
/// call performs its own connection lifecycle.
#[derive(Debug, Clone)]
pub struct RosClient {
    config: RosClientConfig,
}

impl RosClient {
    pub fn new(config: RosClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RosClientConfig {
        &self.config
    }

    /// Execute one command on a fresh connection.
    ///
    /// Returns the `!re` rows. A `!done` with zero rows is a legitimate
    /// empty result set and yields `Ok(vec![])` — callers must never
    /// treat it as failure.
    pub async fn execute(&self, cmd: &CommandSentence) -> Result<Vec<RosRow>, Error> {
        debug!(address = %self.config.address, path = cmd.path(), "executing command");

        let mut conn = self.open().await?;
        let result = tokio::time::timeout(self.config.command_timeout, conn.run(cmd))
            .await
            .map_err(|_| Error::CommandTimeout {
                timeout: self.config.command_timeout,
            })?;

        // `conn` drops here, closing the socket.
        result
    }

    /// Bounded-time reachability probe. Never errors: any failure
    /// (connect, auth, protocol) reports the device as unreachable.
    pub async fn probe(&self) -> bool {
        let Ok(mut conn) = self.open().await else {
            return false;
        };
        tokio::time::timeout(
            self.config.connect_timeout,
            conn.run(&command::system_identity()),
        )
        .await
        .is_ok_and(|result| result.is_ok())
    }

    /// Connect and log in, bounded by the connect timeout.
    async fn open(&self) -> Result<RosConnection<TcpStream>, Error> {
        let connect = async {
            let stream = TcpStream::connect(&self.config.address).await?;
            let mut conn = RosConnection::new(stream);
            conn.login(
                &self.config.username,
                self.config.password.expose_secret(),
            )
            .await?;
            Ok(conn)
        };

        tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                timeout: self.config.connect_timeout,
            })?
    }
}

// ── Connection ───────────────────────────────────────────────────────

/// A logged-in (or about-to-log-in) API session over any byte stream.
///
/// Generic over the stream so tests can drive it with in-memory duplex
/// pipes. Exactly one command may be run per connection.
pub struct RosConnection<S> {
    stream: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RosConnection<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Perform the post-6.43 plaintext login handshake.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), Error> {
        protocol::write_sentence(
            &mut self.stream,
            &[
                "/login".to_owned(),
                format!("=name={username}"),
                format!("=password={password}"),
            ],
        )
        .await?;

        let reply = protocol::read_sentence(&mut self.stream).await?.into_reply()?;
        match reply.kind {
            ReplyKind::Done => {
                if reply.attributes.contains_key("ret") {
                    // Pre-6.43 routers answer with an MD5 challenge
                    // instead of accepting the plaintext login.
                    return Err(Error::Login {
                        message: "router requested the obsolete challenge login".into(),
                    });
                }
                Ok(())
            }
            ReplyKind::Trap => Err(Error::Login {
                message: reply.message(),
            }),
            ReplyKind::Fatal => Err(Error::Fatal {
                message: reply.message(),
            }),
            ReplyKind::Data => Err(Error::Protocol {
                message: "data reply to /login".into(),
            }),
        }
    }

    /// Send one command and collect its reply rows.
    pub async fn run(&mut self, cmd: &CommandSentence) -> Result<Vec<RosRow>, Error> {
        protocol::write_sentence(&mut self.stream, &cmd.to_words()).await?;

        let mut rows = Vec::new();
        loop {
            let reply = protocol::read_sentence(&mut self.stream).await?.into_reply()?;
            match reply.kind {
                ReplyKind::Data => rows.push(reply.attributes),
                ReplyKind::Done => return Ok(rows),
                ReplyKind::Trap => {
                    return Err(Error::Trap {
                        message: reply.message(),
                        category: reply.attributes.get("category").cloned(),
                    });
                }
                ReplyKind::Fatal => {
                    return Err(Error::Fatal {
                        message: reply.message(),
                    });
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::io::DuplexStream;

    use super::*;
    use crate::protocol::{read_sentence, write_sentence};

    /// Pair a connection with the fake-router end of a duplex pipe.
    fn pipe() -> (RosConnection<DuplexStream>, DuplexStream) {
        let (near, far) = tokio::io::duplex(4096);
        (RosConnection::new(near), far)
    }

    async fn expect_command(far: &mut DuplexStream, path: &str) {
        let sentence = read_sentence(far).await.unwrap();
        assert_eq!(sentence.words[0], path);
    }

    #[tokio::test]
    async fn login_succeeds_on_bare_done() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/login").await;
            write_sentence(&mut far, &["!done"]).await.unwrap();
            far
        });

        conn.login("admin", "pw").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn login_rejects_challenge_response() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/login").await;
            write_sentence(&mut far, &["!done", "=ret=00112233445566778899aabbccddeeff"])
                .await
                .unwrap();
        });

        let err = conn.login("admin", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Login { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn login_trap_is_auth_error() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/login").await;
            write_sentence(&mut far, &["!trap", "=message=invalid user name or password"])
                .await
                .unwrap();
        });

        let err = conn.login("admin", "wrong").await.unwrap_err();
        assert!(err.is_auth());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn run_collects_data_rows() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/ip/hotspot/active/print").await;
            write_sentence(&mut far, &["!re", "=.id=*1", "=user=vch-a"])
                .await
                .unwrap();
            write_sentence(&mut far, &["!re", "=.id=*2", "=user=vch-b"])
                .await
                .unwrap();
            write_sentence(&mut far, &["!done"]).await.unwrap();
        });

        let rows = conn
            .run(&command::hotspot_active_print(None))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("user").map(String::as_str), Some("vch-a"));
        assert_eq!(rows[1].get(".id").map(String::as_str), Some("*2"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn empty_reply_is_success_with_no_rows() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/ip/hotspot/active/print").await;
            write_sentence(&mut far, &["!done"]).await.unwrap();
        });

        let rows = conn
            .run(&command::hotspot_active_print(Some("nobody")))
            .await
            .unwrap();
        assert!(rows.is_empty(), "empty reply must be an empty Ok, not Err");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn trap_reply_is_command_error() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/ip/hotspot/active/remove").await;
            write_sentence(
                &mut far,
                &["!trap", "=category=missing", "=message=no such item"],
            )
            .await
            .unwrap();
        });

        let err = conn
            .run(&command::hotspot_active_remove("*9"))
            .await
            .unwrap_err();
        assert!(err.is_missing_item());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn fatal_reply_kills_the_command() {
        let (mut conn, mut far) = pipe();

        let server = tokio::spawn(async move {
            expect_command(&mut far, "/radius/print").await;
            write_sentence(&mut far, &["!fatal", "not logged in"])
                .await
                .unwrap();
        });

        let err = conn.run(&command::radius_print()).await.unwrap_err();
        assert!(matches!(err, Error::Fatal { .. }));
        server.await.unwrap();
    }
}
