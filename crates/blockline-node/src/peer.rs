use crate::config::PeerConfig;
use crate::constants::{ACCEPT_BACKOFF_MS, EVENT_CHANNEL_CAPACITY};
use crate::error::PeerError;
use blockline_core::{Block, ChainStore};
use bytes::BytesMut;
use futures::StreamExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened on a peer connection. Published on a broadcast channel so
/// tests and other observers can follow ingestion without parsing logs.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerEvent {
    Connected { peer: SocketAddr },
    Accepted { peer: SocketAddr, index: u64, chain_len: usize },
    Rejected { peer: SocketAddr, index: u64, reason: String },
    Malformed { peer: SocketAddr, error: String },
    Failed { peer: SocketAddr, error: String },
    Closed { peer: SocketAddr },
}

/// One record off the wire.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    TooLong,
    NotUtf8,
}

/// [`LinesCodec`] that yields over-long lines and lines that are not UTF-8 as
/// frames instead of failing, so the connection keeps reading after one. The
/// inner codec has already consumed the offending bytes when it reports them.
struct FrameCodec {
    lines: LinesCodec,
}

impl FrameCodec {
    fn new(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        frame(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        frame(self.lines.decode_eof(buf))
    }
}

fn frame(
    decoded: Result<Option<String>, LinesCodecError>,
) -> Result<Option<Frame>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(Frame::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::TooLong)),
        // The decoder does no I/O of its own; InvalidData is its UTF-8 check.
        Err(LinesCodecError::Io(err)) if err.kind() == std::io::ErrorKind::InvalidData => {
            Ok(Some(Frame::NotUtf8))
        }
        Err(err) => Err(err),
    }
}

/// Reads newline-delimited JSON blocks from one connection and applies them
/// to the shared chain.
pub struct PeerInbound {
    peer: SocketAddr,
    store: ChainStore,
    events: broadcast::Sender<PeerEvent>,
    max_line_bytes: usize,
}

impl PeerInbound {
    pub fn new(
        peer: SocketAddr,
        store: ChainStore,
        events: broadcast::Sender<PeerEvent>,
        max_line_bytes: usize,
    ) -> Self {
        Self {
            peer,
            store,
            events,
            max_line_bytes,
        }
    }

    /// Consume `stream` until the peer closes it, a read fails, or `shutdown`
    /// fires. Bad messages are reported and skipped.
    pub async fn run<S>(self, stream: S, shutdown: CancellationToken) -> Result<(), PeerError>
    where
        S: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(stream, FrameCodec::new(self.max_line_bytes));
        self.publish(PeerEvent::Connected { peer: self.peer });
        debug!(peer = %self.peer, "peer connected");

        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                next = frames.next() => next,
            };
            match next {
                None => break Ok(()),
                Some(Ok(Frame::Line(line))) => self.ingest(&line),
                Some(Ok(Frame::TooLong)) => {
                    self.report_malformed(&PeerError::LineTooLong(self.max_line_bytes));
                }
                Some(Ok(Frame::NotUtf8)) => self.report_malformed(&PeerError::NotUtf8),
                Some(Err(LinesCodecError::Io(err))) => break Err(PeerError::Connection(err)),
                Some(Err(err @ LinesCodecError::MaxLineLengthExceeded)) => {
                    break Err(PeerError::Connection(std::io::Error::other(err)));
                }
            }
        };

        if let Err(err) = &result {
            warn!(peer = %self.peer, %err, "peer connection failed");
            self.publish(PeerEvent::Failed {
                peer: self.peer,
                error: err.to_string(),
            });
        }
        self.publish(PeerEvent::Closed { peer: self.peer });
        debug!(peer = %self.peer, "peer disconnected");
        result
    }

    fn ingest(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let block: Block = match serde_json::from_str(line) {
            Ok(block) => block,
            Err(err) => return self.report_malformed(&PeerError::Deserialization(err)),
        };

        let index = block.index;
        match self.store.try_append(block) {
            Ok(()) => {
                let chain_len = self.store.len();
                info!(peer = %self.peer, index, chain_len, "added peer block to the chain");
                if tracing::enabled!(tracing::Level::DEBUG) {
                    match self.store.to_json_pretty() {
                        Ok(json) => debug!("chain:\n{json}"),
                        Err(err) => warn!(%err, "failed to render chain"),
                    }
                }
                self.publish(PeerEvent::Accepted {
                    peer: self.peer,
                    index,
                    chain_len,
                });
            }
            Err(err) => {
                if err.is_rejection() {
                    warn!(peer = %self.peer, index, %err, "received invalid block");
                } else {
                    error!(peer = %self.peer, %err, "chain unavailable for peer block");
                }
                self.publish(PeerEvent::Rejected {
                    peer: self.peer,
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn report_malformed(&self, err: &PeerError) {
        warn!(peer = %self.peer, %err, "dropping undecodable message");
        self.publish(PeerEvent::Malformed {
            peer: self.peer,
            error: err.to_string(),
        });
    }

    fn publish(&self, event: PeerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Accepts peer connections and runs one [`PeerInbound`] task per connection,
/// at most `max_connections` at a time.
pub struct PeerListener {
    listener: TcpListener,
    store: ChainStore,
    config: PeerConfig,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerListener {
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        store: ChainStore,
        config: PeerConfig,
    ) -> Result<Self, PeerError> {
        let listener = TcpListener::bind(addr).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            listener,
            store,
            config,
            events,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PeerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Serve connections until `shutdown` is cancelled, then wait for every
    /// connection task to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), PeerError> {
        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let mut workers = JoinSet::new();
        info!(
            addr = %self.local_addr()?,
            max_connections = self.config.max_connections,
            "listening for peers"
        );

        loop {
            while let Some(joined) = workers.try_join_next() {
                log_worker_exit(joined);
            }

            // Hold off accepting while the cap is reached; new peers queue in
            // the kernel backlog.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(%err, "failed to accept peer connection");
                        tokio::time::sleep(Duration::from_millis(ACCEPT_BACKOFF_MS)).await;
                        continue;
                    }
                },
            };

            let inbound = PeerInbound::new(
                peer,
                self.store.clone(),
                self.events.clone(),
                self.config.max_line_bytes,
            );
            let token = shutdown.child_token();
            workers.spawn(async move {
                let _permit = permit;
                inbound.run(stream, token).await
            });
        }

        info!(active = workers.len(), "peer listener shutting down");
        while let Some(joined) = workers.join_next().await {
            log_worker_exit(joined);
        }
        Ok(())
    }

    /// [`PeerListener::run`] until `signal` resolves, then cancel `shutdown`
    /// and drain. Returns early if the listener itself stops first.
    pub async fn run_until<F>(
        self,
        shutdown: CancellationToken,
        signal: F,
    ) -> Result<(), PeerError>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let run = self.run(shutdown.clone());
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => return result,
            signalled = signal => match signalled {
                Ok(()) => info!("shutdown signal received"),
                Err(err) => error!(%err, "failed to wait for shutdown signal"),
            },
        }
        shutdown.cancel();
        run.await
    }
}

fn log_worker_exit(joined: Result<Result<(), PeerError>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%err, "peer worker ended with error"),
        Err(err) => error!(%err, "peer worker panicked or was aborted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockline_core::{factory::next_block, Transaction};
    use tokio::io::AsyncWriteExt;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<PeerEvent>) -> Vec<PeerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn inbound_applies_valid_and_skips_bad_lines() {
        let store = ChainStore::with_genesis(Block::genesis()).unwrap();
        let tip = store.tip().unwrap();
        let block = next_block(&tip, vec![Transaction::new("A", "B", 10.0)], "t1".into());
        let mut input = serde_json::to_string(&block).unwrap();
        input.push_str("\r\n\n{not json}\n");
        input.push_str(&serde_json::to_string(&block).unwrap());
        input.push('\n');

        let (events, mut rx) = broadcast::channel(16);
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(input.as_bytes()).await.unwrap();
        drop(client);

        let inbound = PeerInbound::new(peer(), store.clone(), events, 1024);
        inbound.run(server, CancellationToken::new()).await.unwrap();

        assert_eq!(store.len(), 2);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], PeerEvent::Connected { peer: peer() });
        assert_eq!(
            events[1],
            PeerEvent::Accepted {
                peer: peer(),
                index: 1,
                chain_len: 2
            }
        );
        assert!(matches!(events[2], PeerEvent::Malformed { .. }));
        // The same block again is now stale.
        assert!(matches!(events[3], PeerEvent::Rejected { index: 1, .. }));
        assert_eq!(events[4], PeerEvent::Closed { peer: peer() });
    }

    #[tokio::test]
    async fn inbound_reports_over_long_line_and_continues() {
        let store = ChainStore::with_genesis(Block::genesis()).unwrap();
        let tip = store.tip().unwrap();
        let block = next_block(&tip, vec![], "t1".into());
        let mut input = "x".repeat(600);
        input.push('\n');
        input.push_str(&serde_json::to_string(&block).unwrap());
        input.push('\n');

        let (events, mut rx) = broadcast::channel(16);
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(input.as_bytes()).await.unwrap();
        drop(client);

        PeerInbound::new(peer(), store.clone(), events, 512)
            .run(server, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, PeerEvent::Malformed { error, .. } if error.contains("512"))));
        assert!(events
            .iter()
            .any(|e| matches!(e, PeerEvent::Accepted { index: 1, .. })));
    }

    #[test]
    fn frame_codec_skips_rest_of_long_line() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::from(&b"abcdefgh\nok\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::TooLong));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Line("ok".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn frame_codec_flags_non_utf8_line() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"{\"Index\":\xff\xfe}\nok\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::NotUtf8));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Line("ok".to_string()))
        );
    }

    #[tokio::test]
    async fn inbound_survives_non_utf8_line() {
        let store = ChainStore::with_genesis(Block::genesis()).unwrap();
        let tip = store.tip().unwrap();
        let block = next_block(&tip, vec![Transaction::new("A", "B", 1.0)], "t1".into());
        let mut input = b"{\"Index\":\xff\xfe}\n".to_vec();
        input.extend_from_slice(serde_json::to_string(&block).unwrap().as_bytes());
        input.push(b'\n');

        let (events, mut rx) = broadcast::channel(16);
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&input).await.unwrap();
        drop(client);

        PeerInbound::new(peer(), store.clone(), events, 1024)
            .run(server, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[1], PeerEvent::Malformed { error, .. } if error.contains("UTF-8")));
        assert!(matches!(events[2], PeerEvent::Accepted { index: 1, .. }));
        assert_eq!(events[3], PeerEvent::Closed { peer: peer() });
    }

    #[tokio::test]
    async fn inbound_stops_on_shutdown() {
        let store = ChainStore::with_genesis(Block::genesis()).unwrap();
        let (events, mut rx) = broadcast::channel(16);
        let (_client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        token.cancel();

        PeerInbound::new(peer(), store, events, 1024)
            .run(server, token)
            .await
            .unwrap();
        assert_eq!(drain(&mut rx).last(), Some(&PeerEvent::Closed { peer: peer() }));
    }
}
