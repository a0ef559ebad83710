//! Direct TCP transport: identity is the listen address; a session is one TCP stream carrying
//! length-prefixed JSON frames, introduced by a Hello frame naming the dialer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lantern_core::wire::{decode_frame, encode_frame, frame_len, LEN_SIZE};
use lantern_core::{Event, Message, SessionEvent, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An inbound stream must name itself within this long.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(200);

/// First frame on every stream: who is dialing.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    identity: String,
}

struct SessionHandle {
    outbox: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

type Sessions = Arc<Mutex<HashMap<SessionId, SessionHandle>>>;

pub struct Transport {
    identity: String,
    events: mpsc::UnboundedSender<Event>,
    sessions: Sessions,
    accept_task: JoinHandle<()>,
}

impl Transport {
    /// Bind the listener, report our identity, start accepting inbound sessions.
    pub async fn bind(addr: &str, events: mpsc::UnboundedSender<Event>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let identity = listener.local_addr()?.to_string();
        info!(identity = %identity, "transport listening");
        let _ = events.send(Event::IdentityAssigned(identity.clone()));
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(listener, sessions.clone(), events.clone()));
        Ok(Self {
            identity,
            events,
            sessions,
            accept_task,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Dial `remote`. Reports `Opened` or `Errored` for `id`, then data and close events.
    pub async fn open(&self, id: SessionId, remote: String) {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let identity = self.identity.clone();
        let sessions = self.sessions.clone();
        // Hold the lock until the handle is registered so the task cannot finish first.
        let mut guard = self.sessions.lock().await;
        let task = tokio::spawn(async move {
            let stream = match dial(&remote, identity).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(session = %id, remote = %remote, error = %e, "dial failed");
                    if sessions.lock().await.remove(&id).is_some() {
                        let _ = events.send(Event::Session {
                            session: id,
                            event: SessionEvent::Errored(e.to_string()),
                        });
                    }
                    return;
                }
            };
            let _ = events.send(Event::Session {
                session: id,
                event: SessionEvent::Opened,
            });
            pump(stream, id, outbox_rx, events, sessions).await;
        });
        guard.insert(id, SessionHandle { outbox, task });
    }

    /// Fire-and-forget send; unknown sessions are ignored.
    pub async fn send(&self, id: SessionId, message: Message) {
        if let Some(handle) = self.sessions.lock().await.get(&id) {
            let _ = handle.outbox.send(message);
        }
    }

    /// Close locally. No events are reported for a session closed this way.
    pub async fn close(&self, id: SessionId) {
        if let Some(handle) = self.sessions.lock().await.remove(&id) {
            handle.task.abort();
        }
    }

    pub async fn shutdown(&self) {
        self.accept_task.abort();
        for (_, handle) in self.sessions.lock().await.drain() {
            handle.task.abort();
        }
    }
}

async fn dial(remote: &str, identity: String) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(remote).await?;
    let hello = encode_frame(&Hello { identity })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&hello).await?;
    stream.flush().await?;
    Ok(stream)
}

async fn accept_loop(listener: TcpListener, sessions: Sessions, events: mpsc::UnboundedSender<Event>) {
    loop {
        let (mut stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                // Not tied to the chat session; keep it up and try again shortly.
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let sessions = sessions.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let hello = match read_hello(&mut stream, HANDSHAKE_TIMEOUT).await {
                Ok(Some(hello)) => hello,
                Ok(None) => return,
                Err(e) => {
                    debug!(peer = %addr, error = %e, "bad handshake");
                    return;
                }
            };
            let id = SessionId::new();
            let (outbox, outbox_rx) = mpsc::unbounded_channel();
            let mut guard = sessions.lock().await;
            let _ = events.send(Event::Incoming {
                session: id,
                remote: hello.identity,
            });
            let task = tokio::spawn(pump(stream, id, outbox_rx, events, sessions.clone()));
            guard.insert(id, SessionHandle { outbox, task });
        });
    }
}

/// Read the dialer's `Hello`, giving up after `limit`.
async fn read_hello<R>(reader: &mut R, limit: Duration) -> std::io::Result<Option<Hello>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(limit, read_frame(reader)).await {
        Ok(res) => res,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "no handshake",
        )),
    }
}

/// Run one open session: writer in its own task, reader here. Reports how the stream ended
/// unless the session was already closed locally.
async fn pump(
    stream: TcpStream,
    id: SessionId,
    outbox: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<Event>,
    sessions: Sessions,
) {
    let (mut reader, writer) = stream.into_split();
    tokio::spawn(write_loop(writer, id, outbox, events.clone(), sessions.clone()));
    let end = read_loop(&mut reader, id, &events).await;
    finish(&sessions, id, &events, end).await;
}

/// Deregister `id` and report how it ended. Only the first caller for a session reports;
/// it gets back the session task so a failing writer can stop the reader.
async fn finish(
    sessions: &Sessions,
    id: SessionId,
    events: &mpsc::UnboundedSender<Event>,
    end: SessionEvent,
) -> Option<JoinHandle<()>> {
    let handle = sessions.lock().await.remove(&id)?;
    let _ = events.send(Event::Session {
        session: id,
        event: end,
    });
    Some(handle.task)
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    id: SessionId,
    events: &mpsc::UnboundedSender<Event>,
) -> SessionEvent {
    loop {
        match read_frame::<Message, _>(reader).await {
            Ok(Some(message)) => {
                let _ = events.send(Event::Session {
                    session: id,
                    event: SessionEvent::Data(message),
                });
            }
            Ok(None) => return SessionEvent::Closed,
            Err(e) => return SessionEvent::Errored(e.to_string()),
        }
    }
}

/// Ends when the outbox sender is dropped (session closed) or a write fails.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    id: SessionId,
    mut outbox: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<Event>,
    sessions: Sessions,
) {
    while let Some(message) = outbox.recv().await {
        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %id, error = %e, "dropping unencodable message");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            let end = SessionEvent::Errored(e.to_string());
            if let Some(reader) = finish(&sessions, id, &events, end).await {
                reader.abort();
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read one frame. `Ok(None)` on a clean end of stream at a frame boundary.
async fn read_frame<T, R>(reader: &mut R) -> std::io::Result<Option<T>>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LEN_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let invalid = |e: lantern_core::FrameDecodeError| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    };
    let len = frame_len(header).map_err(invalid)?;
    let mut buf = vec![0u8; LEN_SIZE + len];
    buf[..LEN_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut buf[LEN_SIZE..]).await?;
    let (value, _) = decode_frame(&buf).map_err(invalid)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn bound() -> (Transport, mpsc::UnboundedReceiver<Event>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = Transport::bind("127.0.0.1:0", tx).await.unwrap();
        match next(&mut rx).await {
            Event::IdentityAssigned(id) => assert_eq!(id, transport.identity()),
            other => panic!("expected identity, got {other:?}"),
        }
        (transport, rx)
    }

    #[tokio::test]
    async fn dial_send_and_close() {
        let (a, mut a_rx) = bound().await;
        let (b, mut b_rx) = bound().await;

        let id = SessionId::new();
        a.open(id, b.identity().to_string()).await;
        assert!(matches!(
            next(&mut a_rx).await,
            Event::Session { session, event: SessionEvent::Opened } if session == id
        ));
        let inbound = match next(&mut b_rx).await {
            Event::Incoming { session, remote } => {
                assert_eq!(remote, a.identity());
                session
            }
            other => panic!("expected incoming, got {other:?}"),
        };

        a.send(id, Message::Text { text: "hi".into() }).await;
        match next(&mut b_rx).await {
            Event::Session {
                session,
                event: SessionEvent::Data(message),
            } => {
                assert_eq!(session, inbound);
                assert_eq!(message, Message::Text { text: "hi".into() });
            }
            other => panic!("expected data, got {other:?}"),
        }

        b.send(inbound, Message::Typing { is_typing: true }).await;
        assert!(matches!(
            next(&mut a_rx).await,
            Event::Session { event: SessionEvent::Data(Message::Typing { is_typing: true }), .. }
        ));

        a.close(id).await;
        assert!(matches!(
            next(&mut b_rx).await,
            Event::Session { session, event: SessionEvent::Closed } if session == inbound
        ));
    }

    #[tokio::test]
    async fn dial_failure_reports_error() {
        let (a, mut a_rx) = bound().await;
        // Grab a free port, then release it so nothing is listening there.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let id = SessionId::new();
        a.open(id, format!("127.0.0.1:{port}")).await;
        assert!(matches!(
            next(&mut a_rx).await,
            Event::Session { session, event: SessionEvent::Errored(_) } if session == id
        ));
    }

    #[tokio::test]
    async fn session_end_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let id = SessionId::new();
        let (outbox, _outbox_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(std::future::pending::<()>());
        sessions.lock().await.insert(id, SessionHandle { outbox, task });

        let reader = finish(&sessions, id, &tx, SessionEvent::Errored("broken pipe".into())).await;
        assert!(reader.is_some());
        assert!(sessions.lock().await.is_empty());
        assert!(finish(&sessions, id, &tx, SessionEvent::Closed).await.is_none());

        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Session { session, event: SessionEvent::Errored(_) }) if session == id
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_dialer_times_out() {
        let (mut near, _far) = tokio::io::duplex(64);
        let err = read_hello(&mut near, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn hello_read_within_limit() {
        let (mut near, mut far) = tokio::io::duplex(256);
        let frame = encode_frame(&Hello { identity: "127.0.0.1:4600".into() }).unwrap();
        far.write_all(&frame).await.unwrap();
        let hello = read_hello(&mut near, Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(hello.identity, "127.0.0.1:4600");
    }

    #[tokio::test]
    async fn send_to_unknown_session_ignored() {
        let (a, _rx) = bound().await;
        a.send(SessionId::new(), Message::Text { text: "x".into() }).await;
        a.close(SessionId::new()).await;
        a.shutdown().await;
    }
}
