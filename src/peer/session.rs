use super::bitfield::Bitfield;
use super::connection::{PeerConnection, Reaction};
use super::error::PeerError;
use super::event::PeerEvent;
use super::peer_id::PeerId;
use super::piece::BlockRequest;
use super::state::PeerState;
use crate::config::SessionConfig;
use crate::metainfo::InfoHash;
use crate::storage::PieceStore;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex, Notify};
use tracing::{debug, trace};

/// Everything a session needs from the torrent it belongs to.
#[derive(Clone)]
pub struct SessionContext {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub store: Arc<PieceStore>,
    pub config: SessionConfig,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

struct Shared {
    addr: SocketAddr,
    conn: Mutex<PeerConnection>,
    /// Held while a message is built and written, so wire order matches
    /// state order.
    writer: TokioMutex<Option<OwnedWriteHalf>>,
    store: Arc<PieceStore>,
    events: mpsc::UnboundedSender<PeerEvent>,
    disconnected: AtomicBool,
    closing: Notify,
}

/// A live connection to one peer.
///
/// Sends our handshake as soon as the TCP stream is up and then runs one
/// read task that feeds incoming bytes through a [`PeerConnection`].
/// Handles are cheap to clone; all clones drive the same connection.
///
/// # Examples
///
/// ```no_run
/// use btengine::config::SessionConfig;
/// use btengine::metainfo::Metainfo;
/// use btengine::peer::{PeerEvent, PeerId, PeerSession, SessionContext};
/// use btengine::storage::PieceStore;
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let metainfo = Metainfo::from_file("example.torrent")?;
/// let config = SessionConfig::default();
/// let store = Arc::new(PieceStore::from_metainfo(&metainfo, "./downloads".into(), config.block_size)?);
/// let (events, mut rx) = mpsc::unbounded_channel();
///
/// let ctx = SessionContext {
///     info_hash: metainfo.info_hash,
///     peer_id: PeerId::generate(),
///     store: store.clone(),
///     config,
///     events,
/// };
///
/// let session = PeerSession::connect("192.168.1.100:6881".parse()?, ctx).await?;
/// session.send_interested().await?;
///
/// while let Some(event) = rx.recv().await {
///     match event {
///         PeerEvent::StateChanged { .. } if session.state().can_request() => {
///             session.send_request(0, 0).await?;
///         }
///         PeerEvent::BlockReceived { piece, block, data, .. } => {
///             store.write_block(piece, block, &data).await?;
///         }
///         PeerEvent::Disconnected { .. } => break,
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PeerSession {
    shared: Arc<Shared>,
}

impl PeerSession {
    /// Connects to `addr` and starts the session.
    pub async fn connect(addr: SocketAddr, ctx: SessionContext) -> Result<Self, PeerError> {
        let stream = tokio::time::timeout(ctx.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Self::start(stream, addr, ctx).await
    }

    /// Starts a session on an accepted inbound stream.
    pub async fn accept(stream: TcpStream, ctx: SessionContext) -> Result<Self, PeerError> {
        let addr = stream.peer_addr()?;
        Self::start(stream, addr, ctx).await
    }

    async fn start(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: SessionContext,
    ) -> Result<Self, PeerError> {
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let conn = PeerConnection::new(
            addr,
            ctx.info_hash,
            ctx.peer_id,
            *ctx.store.geometry(),
            &ctx.config,
        );

        let session = Self {
            shared: Arc::new(Shared {
                addr,
                conn: Mutex::new(conn),
                writer: TokioMutex::new(Some(writer)),
                store: ctx.store,
                events: ctx.events,
                disconnected: AtomicBool::new(false),
                closing: Notify::new(),
            }),
        };

        session.send_with(PeerConnection::handshake).await?;
        debug!(peer = %addr, "peer session started");

        let task = session.clone();
        let read_buffer_size = ctx.config.read_buffer_size;
        tokio::spawn(async move { task.read_loop(reader, read_buffer_size).await });

        Ok(session)
    }

    async fn read_loop(self, mut reader: OwnedReadHalf, read_buffer_size: usize) {
        let addr = self.shared.addr;
        let mut buf = vec![0u8; read_buffer_size];

        loop {
            let n = tokio::select! {
                _ = self.shared.closing.notified() => break,
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        debug!(peer = %addr, "connection closed by peer");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!(peer = %addr, error = %e, "read failed");
                        break;
                    }
                },
            };

            if let Err(e) = self.process(&buf[..n]).await {
                debug!(peer = %addr, error = %e, "dropping peer");
                break;
            }
        }

        self.disconnect().await;
    }

    async fn process(&self, chunk: &[u8]) -> Result<(), PeerError> {
        let received = self.shared.conn.lock().receive(chunk);
        let failed = received.error.is_some();

        // Frames ahead of a violation were applied, so their events still go out.
        for reaction in received.reactions {
            match reaction {
                Reaction::Notify(event) => {
                    trace!(peer = %self.shared.addr, ?event, "peer event");
                    let _ = self.shared.events.send(event);
                }
                Reaction::SendBitfield if !failed => {
                    self.send_bitfield().await?;
                }
                Reaction::SendBitfield => {}
            }
        }

        match received.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Builds a message under the write lock and writes it.
    ///
    /// Returns `Ok(false)` when the builder decided nothing needs sending.
    async fn send_with<F>(&self, build: F) -> Result<bool, PeerError>
    where
        F: FnOnce(&mut PeerConnection) -> Option<Bytes>,
    {
        if self.is_disconnected() {
            return Err(PeerError::ConnectionClosed);
        }

        let mut writer = self.shared.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(PeerError::ConnectionClosed);
        };

        let frame = {
            let mut conn = self.shared.conn.lock();
            build(&mut conn)
        };
        let Some(frame) = frame else {
            return Ok(false);
        };

        let written = stream.write_all(&frame).await;
        if let Err(e) = written {
            drop(writer);
            debug!(peer = %self.shared.addr, error = %e, "write failed");
            self.disconnect().await;
            return Err(e.into());
        }
        Ok(true)
    }

    pub async fn send_keep_alive(&self) -> Result<bool, PeerError> {
        self.send_with(PeerConnection::keep_alive).await
    }

    pub async fn send_choke(&self) -> Result<bool, PeerError> {
        self.send_with(PeerConnection::choke).await
    }

    pub async fn send_unchoke(&self) -> Result<bool, PeerError> {
        self.send_with(PeerConnection::unchoke).await
    }

    pub async fn send_interested(&self) -> Result<bool, PeerError> {
        self.send_with(PeerConnection::interested).await
    }

    pub async fn send_not_interested(&self) -> Result<bool, PeerError> {
        self.send_with(PeerConnection::not_interested).await
    }

    pub async fn send_have(&self, piece: usize) -> Result<bool, PeerError> {
        self.send_with(|conn| conn.have(piece)).await
    }

    /// Announces the store's verified pieces.
    pub async fn send_bitfield(&self) -> Result<bool, PeerError> {
        let local: Bitfield = self.shared.store.bitfield();
        self.send_with(|conn| conn.bitfield(&local)).await
    }

    pub async fn send_request(&self, piece: usize, block: usize) -> Result<bool, PeerError> {
        self.send_with(|conn| conn.request(piece, block)).await
    }

    pub async fn send_cancel(&self, piece: usize, block: usize) -> Result<bool, PeerError> {
        self.send_with(|conn| conn.cancel(piece, block)).await
    }

    /// Answers a request with data read from the store.
    ///
    /// Returns `Ok(false)` if the peer cancelled the range meanwhile.
    pub async fn send_piece(&self, request: BlockRequest) -> Result<bool, PeerError> {
        let data = self
            .shared
            .store
            .read_block(request.piece as usize, request.begin, request.length)
            .await?;
        self.send_with(|conn| conn.piece(&request, data)).await
    }

    /// Closes the connection and raises [`PeerEvent::Disconnected`].
    ///
    /// Only the first call has any effect.
    pub async fn disconnect(&self) {
        if self.shared.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.closing.notify_one();
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let (downloaded, uploaded) = {
            let conn = self.shared.conn.lock();
            (conn.downloaded(), conn.uploaded())
        };
        debug!(peer = %self.shared.addr, downloaded, uploaded, "peer disconnected");

        let _ = self.shared.events.send(PeerEvent::Disconnected {
            peer: self.shared.addr,
            downloaded,
            uploaded,
        });
    }

    pub fn addr(&self) -> SocketAddr {
        self.shared.addr
    }

    pub fn remote_id(&self) -> Option<PeerId> {
        self.shared.conn.lock().remote_id()
    }

    pub fn state(&self) -> PeerState {
        self.shared.conn.lock().state()
    }

    pub fn remote_pieces(&self) -> Bitfield {
        self.shared.conn.lock().remote_pieces().clone()
    }

    pub fn downloaded(&self) -> u64 {
        self.shared.conn.lock().downloaded()
    }

    pub fn uploaded(&self) -> u64 {
        self.shared.conn.lock().uploaded()
    }

    pub fn last_active(&self) -> Instant {
        self.shared.conn.lock().last_active()
    }

    pub fn outstanding_requests(&self) -> Vec<(usize, usize)> {
        self.shared.conn.lock().outstanding_requests()
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }
}
