//! Minimal IRC client session.
//!
//! This is deliberately not a full protocol implementation: the session
//! registers, keeps the link alive, writes the handful of commands the verbs
//! need, and normalizes incoming lines into the loose [`RawEvent`] shape the
//! translator consumes. Everything else on the wire flows through as
//! unclassified chatter and is dropped downstream.

use super::{BackendError, BackendHandle, BackendLink, EVENT_CHANNEL_CAPACITY, RawError, RawEvent};
use crate::creds::Credentials;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, trace, warn};

/// Prefix sigils servers put in front of names-list entries.
const NAME_SIGILS: &[char] = &['~', '&', '@', '%', '+'];

/// A backend connection stream, plaintext or TLS.
enum IrcStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for IrcStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IrcStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Upgrade a TCP stream to TLS using the system root store.
async fn upgrade_to_tls(
    tcp_stream: TcpStream,
    hostname: &str,
) -> Result<TlsStream<TcpStream>, BackendError> {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            warn!("failed to add root cert: {e}");
        }
    }
    for e in &certs.errors {
        warn!("error loading native certs: {e}");
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| BackendError::Protocol(format!("invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(BackendError::Io)?;
    info!(hostname, "TLS handshake completed");
    Ok(tls_stream)
}

/// Live IRC connection handle: formats commands onto the writer queue.
struct IrcHandle {
    writer: mpsc::Sender<String>,
}

impl IrcHandle {
    async fn write(&self, line: String) -> Result<(), BackendError> {
        trace!(line = %line, "queueing outbound line");
        self.writer.send(line).await.map_err(|_| BackendError::Closed)
    }
}

#[async_trait]
impl BackendHandle for IrcHandle {
    async fn join(&self, channel: &str) -> Result<(), BackendError> {
        self.write(format!("JOIN {channel}")).await
    }

    async fn part(&self, channel: &str, reason: Option<&str>) -> Result<(), BackendError> {
        match reason {
            Some(reason) => self.write(format!("PART {channel} :{reason}")).await,
            None => self.write(format!("PART {channel}")).await,
        }
    }

    async fn privmsg(&self, target: &str, text: &str) -> Result<(), BackendError> {
        self.write(format!("PRIVMSG {target} :{text}")).await
    }

    async fn set_nick(&self, nick: &str) -> Result<(), BackendError> {
        self.write(format!("NICK {nick}")).await
    }

    async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), BackendError> {
        self.write(format!("TOPIC {channel} :{topic}")).await
    }

    async fn names(&self, channel: &str) -> Result<(), BackendError> {
        self.write(format!("NAMES {channel}")).await
    }

    async fn quit(&self, reason: &str) -> Result<(), BackendError> {
        self.write(format!("QUIT :{reason}")).await
    }
}

/// One parsed wire line: `[:prefix] COMMAND params [:trailing]`.
#[derive(Debug, PartialEq, Eq)]
struct Line {
    prefix_nick: Option<String>,
    command: String,
    params: Vec<String>,
    trailing: Option<String>,
}

fn parse_line(raw: &str) -> Option<Line> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.is_empty() {
        return None;
    }

    let (prefix_nick, rest) = if let Some(rest) = raw.strip_prefix(':') {
        let (prefix, rest) = rest.split_once(' ')?;
        // The nick part of nick!user@host; servers keep their full name.
        let nick = prefix.split('!').next().unwrap_or(prefix).to_string();
        (Some(nick), rest)
    } else {
        (None, raw)
    };

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing.to_string())),
        None => (rest, None),
    };

    let mut words = middle.split_ascii_whitespace().map(str::to_string);
    let command = words.next()?.to_uppercase();
    let params: Vec<String> = words.collect();

    Some(Line {
        prefix_nick,
        command,
        params,
        trailing,
    })
}

/// Establish, register, and hand back a live IRC connection.
///
/// This is the handshake routine the pool invokes under its timeout; on any
/// failure the caller sees an error and nothing is left running.
pub async fn connect(credentials: Credentials) -> Result<BackendLink, BackendError> {
    let (host, port) = credentials.endpoint();
    debug!(host, port, secure = credentials.secure, "connecting to backend");

    let tcp = TcpStream::connect((host, port)).await?;
    let stream = if credentials.secure {
        IrcStream::Tls(Box::new(upgrade_to_tls(tcp, host).await?))
    } else {
        IrcStream::Plain(tcp)
    };

    let mut framed = Framed::new(stream, LinesCodec::new());
    let nick = credentials.nick.clone();

    if let Some(password) = &credentials.password {
        send_line(&mut framed, format!("PASS {password}")).await?;
    }
    send_line(&mut framed, format!("NICK {nick}")).await?;
    send_line(&mut framed, format!("USER {nick} 0 * :{nick}")).await?;

    // Drain the registration burst until the server welcomes or rejects us.
    loop {
        let raw = match framed.next().await {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => return Err(BackendError::Protocol(e.to_string())),
            None => return Err(BackendError::Closed),
        };
        let Some(line) = parse_line(&raw) else {
            continue;
        };

        match line.command.as_str() {
            "001" => {
                info!(nick = %nick, host, "registered with backend");
                break;
            }
            "PING" => {
                let token = line.trailing.or_else(|| line.params.first().cloned());
                send_line(&mut framed, format!("PONG :{}", token.unwrap_or_default())).await?;
            }
            "432" | "433" | "464" | "465" | "ERROR" => {
                let reason = line
                    .trailing
                    .unwrap_or_else(|| format!("registration rejected ({})", line.command));
                return Err(BackendError::Protocol(reason));
            }
            _ => {}
        }
    }

    let (writer_tx, writer_rx) = mpsc::channel::<String>(64);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(session_loop(framed, writer_rx, event_tx, nick));

    Ok(BackendLink {
        handle: Arc::new(IrcHandle { writer: writer_tx }),
        events: event_rx,
    })
}

/// A connector closure for [`connect`], in the shape the pool expects.
pub fn connector() -> super::Connector {
    Arc::new(|credentials| {
        Box::pin(connect(credentials))
            as super::BoxFuture<'static, Result<BackendLink, BackendError>>
    })
}

async fn send_line(
    framed: &mut Framed<IrcStream, LinesCodec>,
    line: String,
) -> Result<(), BackendError> {
    framed
        .send(line)
        .await
        .map_err(|e| BackendError::Protocol(e.to_string()))
}

/// The unified read/write loop for one live connection.
///
/// Runs until the server closes the link or the handle side is dropped; its
/// last act is a terminal connection-lost event so the adapter can evict the
/// pooled entry.
async fn session_loop(
    framed: Framed<IrcStream, LinesCodec>,
    mut writer_rx: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<RawEvent>,
    mut nick: String,
) {
    let (mut sink, mut lines) = framed.split();
    // NAMES replies arrive chunked; accumulate per channel until end-of-names.
    let mut pending_names: HashMap<String, Vec<String>> = HashMap::new();
    let mut lost_reason = "connection closed".to_string();

    loop {
        tokio::select! {
            incoming = lines.next() => {
                let raw = match incoming {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => {
                        lost_reason = e.to_string();
                        break;
                    }
                    None => break,
                };

                let Some(line) = parse_line(&raw) else { continue };

                if line.command == "PING" {
                    let token = line.trailing.clone().or_else(|| line.params.first().cloned());
                    let pong = format!("PONG :{}", token.unwrap_or_default());
                    if sink.send(pong).await.is_err() {
                        lost_reason = "write failed".to_string();
                        break;
                    }
                    continue;
                }

                if line.command == "ERROR" {
                    lost_reason = line.trailing.unwrap_or_else(|| "server error".to_string());
                    break;
                }

                // Track our own nick across renames for later attribution.
                if line.command == "NICK" && line.prefix_nick.as_deref() == Some(nick.as_str()) {
                    if let Some(new) = line.params.first().cloned().or(line.trailing.clone()) {
                        nick = new;
                    }
                }

                if let Some(event) = normalize(line, &mut pending_names) {
                    if event_tx.send(event).await.is_err() {
                        // Adapter went away; nothing left to notify.
                        return;
                    }
                }
            }

            outgoing = writer_rx.recv() => {
                match outgoing {
                    Some(line) => {
                        if let Err(e) = sink.send(line).await {
                            lost_reason = e.to_string();
                            break;
                        }
                    }
                    None => {
                        // Handle dropped: the pooled entry was released.
                        debug!("writer side closed, ending session");
                        return;
                    }
                }
            }
        }
    }

    debug!(reason = %lost_reason, "backend session ended");
    let _ = event_tx
        .send(RawEvent {
            from: Some(nick),
            reason: Some(lost_reason),
            connection_lost: true,
            ..RawEvent::default()
        })
        .await;
}

/// Normalize one parsed line into the loose event shape, or nothing for
/// traffic the gateway has no use for.
fn normalize(line: Line, pending_names: &mut HashMap<String, Vec<String>>) -> Option<RawEvent> {
    match line.command.as_str() {
        "PRIVMSG" | "NOTICE" => Some(RawEvent {
            command: Some(line.command),
            from: line.prefix_nick,
            target: line.params.first().cloned(),
            text: line.trailing,
            ..RawEvent::default()
        }),

        "JOIN" => Some(RawEvent {
            command: Some("JOIN".into()),
            from: line.prefix_nick,
            channel: line.params.first().cloned().or(line.trailing),
            ..RawEvent::default()
        }),

        "PART" => Some(RawEvent {
            command: Some("PART".into()),
            from: line.prefix_nick,
            channel: line.params.first().cloned(),
            reason: line.trailing,
            ..RawEvent::default()
        }),

        // A kick is a part performed on someone else's behalf: the kicked
        // nick is the second parameter.
        "KICK" => Some(RawEvent {
            command: Some("PART".into()),
            from: line.params.get(1).cloned(),
            channel: line.params.first().cloned(),
            reason: line.trailing,
            ..RawEvent::default()
        }),

        "QUIT" => Some(RawEvent {
            command: Some("QUIT".into()),
            from: line.prefix_nick,
            reason: line.trailing,
            ..RawEvent::default()
        }),

        "NICK" => Some(RawEvent {
            command: Some("NICK".into()),
            old_nick: line.prefix_nick,
            new_nick: line.params.first().cloned().or(line.trailing),
            ..RawEvent::default()
        }),

        "TOPIC" => Some(RawEvent {
            command: Some("TOPIC".into()),
            channel: line.params.first().cloned(),
            topic: line.trailing,
            topic_set_by: line.prefix_nick,
            ..RawEvent::default()
        }),

        // RPL_TOPIC carries no setter; it surfaces as unclassifiable chatter
        // unless a TOPIC change follows.
        "332" => Some(RawEvent {
            command: Some("332".into()),
            channel: line.params.get(1).cloned(),
            topic: line.trailing,
            ..RawEvent::default()
        }),

        // RPL_NAMREPLY: accumulate the chunk, emit nothing yet.
        "353" => {
            if let (Some(channel), Some(names)) = (line.params.last(), line.trailing) {
                let entry = pending_names.entry(channel.clone()).or_default();
                entry.extend(
                    names
                        .split_ascii_whitespace()
                        .map(|name| name.trim_start_matches(NAME_SIGILS).to_string()),
                );
            }
            None
        }

        // RPL_ENDOFNAMES: the accumulated roster becomes one snapshot event.
        "366" => {
            let channel = line.params.get(1)?.clone();
            let members = pending_names.remove(&channel).unwrap_or_default();
            Some(RawEvent {
                channel: Some(channel),
                members: Some(members),
                ..RawEvent::default()
            })
        }

        "MODE" => Some(RawEvent::command("MODE")),
        "372" | "375" | "376" => Some(RawEvent::command(line.command)),

        // Operation-level error numerics pass through as error stanzas.
        cmd if cmd.len() == 3 && cmd.starts_with(['4', '5']) => {
            let text = line.trailing.unwrap_or_else(|| format!("error {cmd}"));
            Some(RawEvent {
                error: Some(RawError {
                    text,
                    target: line.params.get(1).cloned(),
                    from: line.prefix_nick,
                    from_presence: false,
                }),
                ..RawEvent::default()
            })
        }

        _ => None,
    }
}
