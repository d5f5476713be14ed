use super::*;
use crate::config::SessionConfig;
use crate::constants::MAX_REQUESTS_PER_PEER;
use crate::metainfo::{InfoHash, Metainfo, TorrentBuilder};
use crate::storage::{PieceGeometry, PieceStore};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const INFO_HASH: [u8; 20] = [0xAB; 20];
const REMOTE_ID: [u8; 20] = [0x42; 20];

fn connection(pieces: u64) -> PeerConnection {
    connection_with(pieces, &SessionConfig::default())
}

fn connection_with(pieces: u64, config: &SessionConfig) -> PeerConnection {
    let geometry = PieceGeometry::new(pieces * 16384, 16384, 16384).unwrap();
    PeerConnection::new(
        "127.0.0.1:6881".parse().unwrap(),
        InfoHash(INFO_HASH),
        PeerId::generate(),
        geometry,
        config,
    )
}

fn remote_handshake() -> Bytes {
    Handshake::new(INFO_HASH, REMOTE_ID).encode()
}

/// Feeds a connection its handshake and drops the resulting reactions.
fn handshaken(pieces: u64) -> PeerConnection {
    let mut conn = connection(pieces);
    conn.receive(&remote_handshake()).into_result().unwrap();
    conn
}

#[test]
fn test_peer_id_generate() {
    let id1 = PeerId::generate();
    let id2 = PeerId::generate();
    assert_ne!(id1, id2);
    assert_eq!(&id1.as_bytes()[..8], b"-BE0001-");
    assert_eq!(id1.client_id(), Some("BE0001"));
    assert!(PeerId::from_bytes(&[0u8; 19]).is_none());
}

#[test]
fn test_handshake_layout() {
    let encoded = Handshake::new([1u8; 20], [2u8; 20]).encode();

    assert_eq!(encoded.len(), 68);
    assert_eq!(encoded[0], 19);
    assert_eq!(&encoded[1..20], b"BitTorrent protocol");
    assert_eq!(&encoded[20..28], &[0u8; 8]);
    assert_eq!(&encoded[28..48], &[1u8; 20]);
    assert_eq!(&encoded[48..68], &[2u8; 20]);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, [1u8; 20]);
    assert_eq!(decoded.peer_id, [2u8; 20]);
}

#[test]
fn test_handshake_rejects_malformed() {
    let good = Handshake::new([1u8; 20], [2u8; 20]).encode();

    assert!(Handshake::decode(&good[..67]).is_err());

    let mut long = good.to_vec();
    long.push(0);
    assert!(Handshake::decode(&long).is_err());

    let mut wrong_len_byte = good.to_vec();
    wrong_len_byte[0] = 18;
    assert!(matches!(
        Handshake::decode(&wrong_len_byte),
        Err(PeerError::InvalidHandshake)
    ));

    let mut wrong_literal = good.to_vec();
    wrong_literal[1] = b'b';
    assert!(matches!(
        Handshake::decode(&wrong_literal),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_message_wire_bytes() {
    assert_eq!(Message::KeepAlive.encode().as_ref(), &[0, 0, 0, 0]);
    assert_eq!(Message::Unchoke.encode().as_ref(), &[0, 0, 0, 1, 1]);
    assert_eq!(
        Message::Have { piece: 0x0102 }.encode().as_ref(),
        &[0, 0, 0, 5, 4, 0, 0, 1, 2]
    );
    assert_eq!(
        Message::Request {
            index: 2,
            begin: 0,
            length: 16384
        }
        .encode()
        .as_ref(),
        &[0, 0, 0, 13, 6, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0x40, 0]
    );
    assert_eq!(
        Message::Port(6881).encode().as_ref(),
        &[0, 0, 0, 3, 9, 0x1A, 0xE1]
    );
}

#[test]
fn test_message_encode_decode() {
    let messages = vec![
        Message::KeepAlive,
        Message::Choke,
        Message::Unchoke,
        Message::Interested,
        Message::NotInterested,
        Message::Have { piece: 42 },
        Message::Bitfield(Bytes::from_static(&[0b1010_0000])),
        Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        },
        Message::Piece {
            index: 3,
            begin: 0,
            data: Bytes::from_static(b"hello world"),
        },
        Message::Cancel {
            index: 1,
            begin: 0,
            length: 16384,
        },
        Message::Port(6881),
    ];

    for msg in messages {
        let decoded = Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_message_decode_is_strict() {
    // Declared length disagrees with the frame.
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 5, 4, 0, 0, 0])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0])).is_err());

    // Unknown id.
    assert!(matches!(
        Message::decode(Bytes::from_static(&[0, 0, 0, 1, 20])),
        Err(PeerError::InvalidMessageId(20))
    ));

    // Fixed-shape messages with the wrong payload size.
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 2, 0, 0])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 4, 4, 0, 0, 1])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 6, 4, 0, 0, 0, 1, 0])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 9, 6, 0, 0, 0, 0, 0, 0, 0, 0])).is_err());
    assert!(Message::decode(Bytes::from_static(&[0, 0, 0, 5, 7, 0, 0, 0, 0])).is_err());
}

#[test]
fn test_bitfield_round_trip_sizes() {
    for piece_count in [1usize, 7, 8, 9, 64] {
        let mut bf = Bitfield::new(piece_count);
        for i in (0..piece_count).step_by(3) {
            bf.set_piece(i);
        }
        bf.set_piece(piece_count - 1);

        let payload = bf.to_bytes();
        assert_eq!(payload.len(), piece_count.div_ceil(8));

        let decoded = Bitfield::decode(&payload, piece_count).unwrap();
        assert_eq!(decoded, bf);
        for i in 0..piece_count {
            assert_eq!(decoded.has_piece(i), bf.has_piece(i), "piece {i} of {piece_count}");
        }

        let message = Message::decode(bf.encode()).unwrap();
        assert_eq!(message, Message::Bitfield(payload));
    }
}

#[test]
fn test_bitfield_msb_first() {
    let bf = Bitfield::decode(&[0x80, 0x01], 16).unwrap();
    assert!(bf.has_piece(0));
    assert!(!bf.has_piece(1));
    assert!(bf.has_piece(15));
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_bitfield_rejects_wrong_length() {
    assert!(Bitfield::decode(&[0xFF], 9).is_err());
    assert!(Bitfield::decode(&[0xFF, 0x00], 8).is_err());
    assert!(Bitfield::decode(&[], 1).is_err());
}

#[test]
fn test_bitfield_ignores_spare_bits() {
    let bf = Bitfield::decode(&[0xFF], 3).unwrap();
    assert_eq!(bf.count(), 3);
    assert!(bf.is_complete());
    assert_eq!(bf.as_bytes(), &[0b1110_0000]);
}

#[test]
fn test_bitfield_merge_only_adds() {
    let mut bf = Bitfield::decode(&[0b1000_0000], 4).unwrap();
    bf.merge(&Bitfield::decode(&[0b0010_0000], 4).unwrap());
    assert!(bf.has_piece(0));
    assert!(bf.has_piece(2));

    bf.merge(&Bitfield::new(4));
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_frame_buffer_handshake_then_prefix() {
    let mut frames = FrameBuffer::new(1024);
    assert_eq!(frames.required_len().unwrap(), Some(68));

    let hs = remote_handshake();
    frames.extend(&hs[..40]);
    assert!(frames.next_frame().unwrap().is_none());
    frames.extend(&hs[40..]);
    frames.extend(&[0, 0]);
    assert_eq!(frames.next_frame().unwrap(), Some(Frame::Handshake(hs)));

    // Two bytes of a prefix are not enough to know the length.
    assert_eq!(frames.required_len().unwrap(), None);
    frames.extend(&[0, 1, 2]);
    assert_eq!(frames.required_len().unwrap(), Some(5));
    assert_eq!(
        frames.next_frame().unwrap(),
        Some(Frame::Message(Bytes::from_static(&[0, 0, 0, 1, 2])))
    );
    assert!(frames.is_empty());
}

#[test]
fn test_frame_buffer_rejects_oversized() {
    let mut frames = FrameBuffer::new(100);
    frames.extend(&remote_handshake());
    frames.next_frame().unwrap();

    frames.extend(&[0, 0, 1, 0]);
    assert!(matches!(frames.next_frame(), Err(PeerError::Protocol(_))));
}

fn sample_stream() -> Vec<u8> {
    let mut stream = BytesMut::new();
    stream.put_slice(&remote_handshake());
    for message in [
        Message::Bitfield(Bytes::from_static(&[0b1010_0000])),
        Message::Unchoke,
        Message::Have { piece: 1 },
        Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from(vec![7u8; 16384]),
        },
        Message::KeepAlive,
        Message::Interested,
        Message::Request {
            index: 2,
            begin: 0,
            length: 16384,
        },
        Message::Cancel {
            index: 2,
            begin: 0,
            length: 16384,
        },
        Message::Port(6881),
    ] {
        stream.put_slice(&message.encode());
    }
    stream.to_vec()
}

fn dispatch_in_chunks(stream: &[u8], chunk_size: usize) -> Vec<Reaction> {
    let mut conn = connection(4);
    stream
        .chunks(chunk_size)
        .flat_map(|chunk| conn.receive(chunk).into_result().unwrap())
        .collect()
}

#[test]
fn test_framing_is_chunking_independent() {
    let stream = sample_stream();

    let whole = dispatch_in_chunks(&stream, stream.len());
    let bytewise = dispatch_in_chunks(&stream, 1);
    let odd = dispatch_in_chunks(&stream, 7);
    let large = dispatch_in_chunks(&stream, 5000);

    assert_eq!(whole.len(), 8);
    assert_eq!(whole[0], Reaction::SendBitfield);
    assert_eq!(bytewise, whole);
    assert_eq!(odd, whole);
    assert_eq!(large, whole);
}

#[test]
fn test_dispatch_updates_state() {
    let stream = sample_stream();
    let mut conn = connection(4);
    let reactions = conn.receive(&stream).into_result().unwrap();
    let peer = conn.addr();

    assert_eq!(conn.remote_id(), Some(PeerId(REMOTE_ID)));
    let state = conn.state();
    assert!(state.handshake_received);
    assert!(!state.peer_choking);
    assert!(state.peer_interested);

    let remote = conn.remote_pieces();
    assert!(remote.has_piece(0));
    assert!(remote.has_piece(1));
    assert!(remote.has_piece(2));
    assert!(!remote.has_piece(3));

    assert_eq!(conn.downloaded(), 16384);
    assert!(reactions.contains(&Reaction::Notify(PeerEvent::BlockReceived {
        peer,
        piece: 0,
        block: 0,
        data: Bytes::from(vec![7u8; 16384]),
    })));
    assert!(reactions.contains(&Reaction::Notify(PeerEvent::BlockRequested {
        peer,
        request: BlockRequest::new(2, 0, 16384),
    })));
    assert_eq!(
        reactions.last(),
        Some(&Reaction::Notify(PeerEvent::BlockCancelled {
            peer,
            request: BlockRequest::new(2, 0, 16384),
        }))
    );
}

#[test]
fn test_info_hash_mismatch() {
    let mut conn = connection(4);
    let other = Handshake::new([0u8; 20], REMOTE_ID).encode();
    assert!(matches!(
        conn.receive(&other).into_result(),
        Err(PeerError::InfoHashMismatch)
    ));
}

#[test]
fn test_invalid_handshake_is_violation() {
    let mut conn = connection(4);
    let mut bad = remote_handshake().to_vec();
    bad[0] = 0;
    assert!(matches!(
        conn.receive(&bad).into_result(),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_have_out_of_range_is_violation() {
    let mut conn = handshaken(4);
    assert!(matches!(
        conn.receive(&Message::Have { piece: 4 }.encode()).into_result(),
        Err(PeerError::Protocol(_))
    ));
}

#[test]
fn test_bitfield_wrong_size_is_violation() {
    let mut conn = handshaken(4);
    let msg = Message::Bitfield(Bytes::from_static(&[0xF0, 0x00])).encode();
    assert!(conn.receive(&msg).into_result().is_err());
}

#[test]
fn test_handshake_sent_once() {
    let mut conn = connection(4);
    let first = conn.handshake().unwrap();
    assert_eq!(first.len(), 68);
    assert!(conn.state().handshake_sent);
    assert!(conn.handshake().is_none());
}

#[test]
fn test_choke_idempotence() {
    let mut conn = handshaken(4);

    // Fresh connections already choke.
    assert!(conn.choke().is_none());

    assert_eq!(conn.unchoke().unwrap(), Message::Unchoke.encode());
    assert!(conn.unchoke().is_none());

    let sent: Vec<Bytes> = [conn.choke(), conn.choke()].into_iter().flatten().collect();
    assert_eq!(sent, vec![Message::Choke.encode()]);
    assert!(conn.state().am_choking);
}

#[test]
fn test_interest_idempotence() {
    let mut conn = handshaken(4);

    assert!(conn.not_interested().is_none());
    assert_eq!(conn.interested().unwrap(), Message::Interested.encode());
    assert!(conn.interested().is_none());
    assert_eq!(
        conn.not_interested().unwrap(),
        Message::NotInterested.encode()
    );
}

#[test]
fn test_keep_alive_rate_limited() {
    let mut conn = handshaken(4);
    assert_eq!(conn.keep_alive().unwrap(), Message::KeepAlive.encode());
    assert!(conn.keep_alive().is_none());
    assert!(conn.last_keep_alive().is_some());

    let config = SessionConfig::default().with_keep_alive_interval(Duration::ZERO);
    let mut eager = connection_with(4, &config);
    assert!(eager.keep_alive().is_some());
    assert!(eager.keep_alive().is_some());
}

#[test]
fn test_have_and_bitfield_builders() {
    let mut conn = handshaken(4);
    assert_eq!(conn.have(3).unwrap(), Message::Have { piece: 3 }.encode());
    assert!(conn.have(4).is_none());

    let mut local = Bitfield::new(4);
    local.set_piece(1);
    assert_eq!(conn.bitfield(&local).unwrap(), local.encode());
    assert!(conn.bitfield(&Bitfield::new(5)).is_none());
}

#[test]
fn test_request_tracking() {
    let mut conn = handshaken(4);

    let request = conn.request(2, 0).unwrap();
    assert_eq!(
        Message::decode(request).unwrap(),
        Message::Request {
            index: 2,
            begin: 0,
            length: 16384
        }
    );
    assert!(conn.request(2, 0).is_none());
    assert!(conn.request(9, 0).is_none());
    assert_eq!(conn.outstanding_requests(), vec![(2, 0)]);

    conn.request(3, 0).unwrap();
    assert!(conn.cancel(3, 0).is_some());
    assert!(conn.cancel(3, 0).is_none());

    let block = Message::Piece {
        index: 2,
        begin: 0,
        data: Bytes::from(vec![1u8; 16384]),
    };
    conn.receive(&block.encode()).into_result().unwrap();
    assert!(conn.outstanding_requests().is_empty());
}

fn request_frame(index: u32, begin: u32) -> Bytes {
    Message::Request {
        index,
        begin,
        length: 16384,
    }
    .encode()
}

fn cancel_frame(index: u32, begin: u32) -> Bytes {
    Message::Cancel {
        index,
        begin,
        length: 16384,
    }
    .encode()
}

#[test]
fn test_cancelled_block_not_sent() {
    let mut conn = handshaken(4);
    let request = BlockRequest::new(1, 0, 16384);
    let data = Bytes::from(vec![3u8; 16384]);

    conn.receive(&request_frame(1, 0)).into_result().unwrap();
    assert_eq!(conn.pending_uploads(), 1);
    conn.receive(&cancel_frame(1, 0)).into_result().unwrap();
    assert_eq!(conn.pending_uploads(), 0);
    assert!(conn.piece(&request, data.clone()).is_none());
    assert_eq!(conn.uploaded(), 0);

    // A new request supersedes the cancellation.
    conn.receive(&request_frame(1, 0)).into_result().unwrap();
    assert!(conn.piece(&request, data.clone()).is_some());
    assert_eq!(conn.uploaded(), 16384);

    // Answered once; a repeat is not sent.
    assert!(conn.piece(&request, data).is_none());
    assert_eq!(conn.pending_uploads(), 0);
}

#[test]
fn test_unrequested_block_not_sent() {
    let mut conn = handshaken(4);
    let data = Bytes::from(vec![3u8; 16384]);
    assert!(conn.piece(&BlockRequest::new(0, 0, 16384), data).is_none());
    assert_eq!(conn.uploaded(), 0);
}

#[test]
fn test_cancel_flood_is_not_retained() {
    let mut conn = handshaken(4);

    let mut flood = BytesMut::new();
    for i in 0..10_000u32 {
        flood.put_slice(&cancel_frame(i % 4, i * 16384));
    }
    let reactions = conn.receive(&flood).into_result().unwrap();
    assert_eq!(reactions.len(), 10_000);
    assert_eq!(conn.pending_uploads(), 0);

    // A later request for one of those ranges is served normally.
    conn.receive(&request_frame(1, 0)).into_result().unwrap();
    let request = BlockRequest::new(1, 0, 16384);
    assert!(conn
        .piece(&request, Bytes::from(vec![0u8; 16384]))
        .is_some());
}

#[test]
fn test_request_queue_is_bounded() {
    let mut conn = handshaken(4);

    let mut flood = BytesMut::new();
    for i in 0..10_000u32 {
        flood.put_slice(&request_frame(i % 4, i * 16384));
    }
    let reactions = conn.receive(&flood).into_result().unwrap();

    assert_eq!(conn.pending_uploads(), MAX_REQUESTS_PER_PEER);
    assert_eq!(reactions.len(), MAX_REQUESTS_PER_PEER);

    // Answering frees a slot for the next request.
    let first = BlockRequest::new(0, 0, 16384);
    assert!(conn.piece(&first, Bytes::from(vec![0u8; 16384])).is_some());
    let reactions = conn
        .receive(&request_frame(2, 99 * 16384))
        .into_result()
        .unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(conn.pending_uploads(), MAX_REQUESTS_PER_PEER);
}

fn stream_with_trailing_violation() -> Vec<u8> {
    let mut stream = BytesMut::new();
    stream.put_slice(&remote_handshake());
    stream.put_slice(&Message::Have { piece: 1 }.encode());
    stream.put_slice(
        &Message::Piece {
            index: 0,
            begin: 0,
            data: Bytes::from(vec![9u8; 100]),
        }
        .encode(),
    );
    // Unknown message id.
    stream.put_slice(&[0, 0, 0, 1, 99]);
    stream.to_vec()
}

/// Feeds `stream` in chunks until the first failure.
fn dispatch_until_failure(stream: &[u8], chunk_size: usize) -> (PeerConnection, Vec<Reaction>, bool) {
    let mut conn = connection(4);
    let mut reactions = Vec::new();
    for chunk in stream.chunks(chunk_size) {
        let received = conn.receive(chunk);
        reactions.extend(received.reactions);
        if received.error.is_some() {
            return (conn, reactions, true);
        }
    }
    (conn, reactions, false)
}

#[test]
fn test_violation_keeps_earlier_reactions() {
    let stream = stream_with_trailing_violation();

    let (mut whole_conn, whole, whole_failed) = dispatch_until_failure(&stream, stream.len());
    let (bytewise_conn, bytewise, bytewise_failed) = dispatch_until_failure(&stream, 1);

    assert!(whole_failed);
    assert!(bytewise_failed);
    assert_eq!(whole, bytewise);

    let peer = whole_conn.addr();
    assert_eq!(
        whole,
        vec![
            Reaction::SendBitfield,
            Reaction::Notify(PeerEvent::StateChanged { peer }),
            Reaction::Notify(PeerEvent::BlockReceived {
                peer,
                piece: 0,
                block: 0,
                data: Bytes::from(vec![9u8; 100]),
            }),
        ]
    );
    assert_eq!(whole_conn.downloaded(), 100);
    assert_eq!(bytewise_conn.downloaded(), 100);
    assert!(whole_conn.remote_pieces().has_piece(1));

    // Nothing is processed after a violation.
    let after = whole_conn.receive(&Message::Have { piece: 2 }.encode());
    assert!(after.reactions.is_empty());
    assert!(matches!(after.error, Some(PeerError::ConnectionClosed)));
    assert!(!whole_conn.remote_pieces().has_piece(2));
}

struct Side {
    session: PeerSession,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    store: Arc<PieceStore>,
    _dir: TempDir,
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for peer event")
        .expect("event channel closed")
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<PeerEvent>,
    mut pred: impl FnMut(&PeerEvent) -> bool,
) -> PeerEvent {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

fn context(store: Arc<PieceStore>, info_hash: InfoHash) -> (SessionContext, mpsc::UnboundedReceiver<PeerEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let ctx = SessionContext {
        info_hash,
        peer_id: PeerId::generate(),
        store,
        config: SessionConfig::default(),
        events,
    };
    (ctx, rx)
}

fn e2e_metainfo(content: &[u8]) -> Metainfo {
    TorrentBuilder::new("e2e.bin")
        .add_file("e2e.bin", content.to_vec())
        .piece_length(16384)
        .build()
        .unwrap()
}

async fn connected_pair(content: &[u8]) -> (Side, Side) {
    let metainfo = e2e_metainfo(content);

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    tokio::fs::write(dir_b.path().join("e2e.bin"), content)
        .await
        .unwrap();

    let store_a =
        Arc::new(PieceStore::from_metainfo(&metainfo, dir_a.path().to_path_buf(), 16384).unwrap());
    let store_b =
        Arc::new(PieceStore::from_metainfo(&metainfo, dir_b.path().to_path_buf(), 16384).unwrap());
    assert_eq!(store_b.verify_all().await, 4);

    let (ctx_a, rx_a) = context(store_a.clone(), metainfo.info_hash);
    let (ctx_b, rx_b) = context(store_b.clone(), metainfo.info_hash);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        PeerSession::accept(stream, ctx_b).await.unwrap()
    });

    let session_a = PeerSession::connect(addr, ctx_a).await.unwrap();
    let session_b = accept.await.unwrap();

    (
        Side {
            session: session_a,
            events: rx_a,
            store: store_a,
            _dir: dir_a,
        },
        Side {
            session: session_b,
            events: rx_b,
            store: store_b,
            _dir: dir_b,
        },
    )
}

#[tokio::test]
async fn test_session_block_exchange() {
    let content: Vec<u8> = (0..4 * 16384).map(|i| (i % 239) as u8).collect();
    let (mut a, mut b) = connected_pair(&content).await;

    // B announces all four pieces in reply to A's handshake.
    while a.session.remote_pieces().count() < 4 {
        wait_for(&mut a.events, |e| matches!(e, PeerEvent::StateChanged { .. })).await;
    }
    assert!(a.session.remote_pieces().is_complete());
    assert!(b.session.remote_pieces().is_empty());

    assert!(a.session.send_interested().await.unwrap());
    assert!(b.session.send_unchoke().await.unwrap());
    assert!(a.session.send_request(2, 0).await.unwrap());
    assert_eq!(a.session.outstanding_requests(), vec![(2, 0)]);

    let requested = wait_for(&mut b.events, |e| {
        matches!(e, PeerEvent::BlockRequested { .. })
    })
    .await;
    let PeerEvent::BlockRequested { request, .. } = requested else {
        unreachable!()
    };
    assert_eq!(request, BlockRequest::new(2, 0, 16384));
    assert!(b.session.send_piece(request).await.unwrap());

    let received = wait_for(&mut a.events, |e| {
        matches!(e, PeerEvent::BlockReceived { .. })
    })
    .await;
    let PeerEvent::BlockReceived {
        piece, block, data, ..
    } = received
    else {
        unreachable!()
    };
    assert_eq!((piece, block), (2, 0));
    assert_eq!(data.as_ref(), &content[2 * 16384..3 * 16384]);

    assert_eq!(a.session.downloaded(), 16384);
    assert_eq!(b.session.uploaded(), 16384);
    assert!(a.session.outstanding_requests().is_empty());
    assert!(!a.session.state().peer_choking);
    assert!(b.session.state().peer_interested);

    assert!(a.store.write_block(piece, block, &data).await.unwrap());
    assert!(a.store.is_verified(2));
    assert!(b.store.is_complete());
}

#[tokio::test]
async fn test_session_disconnect_once() {
    let content = vec![5u8; 4 * 16384];
    let (mut a, mut b) = connected_pair(&content).await;

    a.session.disconnect().await;
    a.session.disconnect().await;
    assert!(a.session.is_disconnected());

    let event = wait_for(&mut a.events, |e| {
        matches!(e, PeerEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(event.peer(), a.session.addr());

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = a.events.try_recv() {
        assert!(!matches!(event, PeerEvent::Disconnected { .. }));
    }

    // The remote side notices the closed stream.
    wait_for(&mut b.events, |e| {
        matches!(e, PeerEvent::Disconnected { .. })
    })
    .await;
    assert!(b.session.is_disconnected());

    assert!(matches!(
        a.session.send_interested().await,
        Err(PeerError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_session_rejects_unverified_upload() {
    let content = vec![5u8; 4 * 16384];
    let (a, _b) = connected_pair(&content).await;

    assert!(matches!(
        a.session.send_piece(BlockRequest::new(0, 0, 16384)).await,
        Err(PeerError::Storage(_))
    ));
    assert!(!a.session.is_disconnected());
}

/// Accepts a session on `store` for a raw socket the test drives by hand.
async fn accept_raw(
    store: Arc<PieceStore>,
    info_hash: InfoHash,
) -> (PeerSession, mpsc::UnboundedReceiver<PeerEvent>, TcpStream) {
    let (ctx, rx) = context(store, info_hash);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let raw = TcpStream::connect(addr).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let session = PeerSession::accept(stream, ctx).await.unwrap();

    (session, rx, raw)
}

/// Collects events up to and including the first `Disconnected`, then checks
/// no second one follows.
async fn events_until_disconnect(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, PeerEvent::Disconnected { .. });
        events.push(event);
        if done {
            break;
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, PeerEvent::Disconnected { .. }));
    }
    events
}

async fn assert_closed(raw: &mut TcpStream) {
    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), raw.read_to_end(&mut rest))
        .await
        .expect("socket not closed");
    // Either a clean close or a reset is fine.
    if read.is_ok() {
        assert!(rest.is_empty());
    }
}

async fn assert_pair_still_works(a: &mut Side, b: &mut Side) {
    assert!(!a.session.is_disconnected());
    assert!(!b.session.is_disconnected());
    assert!(a.session.send_interested().await.unwrap());
    while !b.session.state().peer_interested {
        wait_for(&mut b.events, |e| matches!(e, PeerEvent::StateChanged { .. })).await;
    }
    assert!(b.store.is_complete());
}

#[tokio::test]
async fn test_session_drops_wrong_info_hash() {
    let content = vec![6u8; 4 * 16384];
    let (mut a, mut b) = connected_pair(&content).await;
    let metainfo = e2e_metainfo(&content);

    let (session, mut rx, mut raw) = accept_raw(b.store.clone(), metainfo.info_hash).await;

    let mut greeting = [0u8; 68];
    raw.read_exact(&mut greeting).await.unwrap();
    assert_eq!(
        Handshake::decode(&greeting).unwrap().info_hash,
        metainfo.info_hash.0
    );

    raw.write_all(&Handshake::new([0xEE; 20], REMOTE_ID).encode())
        .await
        .unwrap();

    let events = events_until_disconnect(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert!(session.is_disconnected());
    assert!(session.remote_id().is_none());
    assert_closed(&mut raw).await;

    assert_pair_still_works(&mut a, &mut b).await;
}

#[tokio::test]
async fn test_session_drops_malformed_message() {
    let content = vec![6u8; 4 * 16384];
    let (mut a, mut b) = connected_pair(&content).await;
    let metainfo = e2e_metainfo(&content);

    let (session, mut rx, mut raw) = accept_raw(b.store.clone(), metainfo.info_hash).await;

    let mut greeting = [0u8; 68];
    raw.read_exact(&mut greeting).await.unwrap();

    let mut burst = BytesMut::new();
    burst.put_slice(&Handshake::new(metainfo.info_hash.0, REMOTE_ID).encode());
    burst.put_slice(&Message::Have { piece: 1 }.encode());
    burst.put_slice(&[0, 0, 0, 1, 99]);
    raw.write_all(&burst).await.unwrap();

    let events = events_until_disconnect(&mut rx).await;
    let peer = session.addr();
    assert_eq!(
        events.first(),
        Some(&PeerEvent::StateChanged { peer })
    );
    assert!(matches!(
        events.last(),
        Some(PeerEvent::Disconnected { .. })
    ));
    assert!(session.is_disconnected());
    assert!(session.remote_pieces().has_piece(1));
    assert_eq!(session.remote_id(), Some(PeerId(REMOTE_ID)));

    assert!(matches!(
        session.send_have(0).await,
        Err(PeerError::ConnectionClosed)
    ));

    assert_pair_still_works(&mut a, &mut b).await;
}
