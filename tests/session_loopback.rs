//! End-to-end sessions over localhost

use setu_io::protocol::{AuxArgs, LocalEndpoint, xor_checksum};
use setu_io::recorder::{BinaryLog, read_records};
use setu_io::{
    ByteOrder, Connection, Encoding, Error, PeerRegistry, RecorderOptions, RetryPolicy, Role,
    Session, SessionOptions, TransportKind,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn options(
    id: i32,
    inputs: usize,
    outputs: usize,
    encoding: Encoding,
    log_dir: Option<&Path>,
) -> SessionOptions {
    SessionOptions {
        local: LocalEndpoint {
            id,
            inputs,
            outputs,
        },
        encoding,
        aux: AuxArgs::from_named([("loop_frequency_hz", 100), ("scaling_factor", 1000)], 3),
        byte_order: ByteOrder::Little,
        registry: PeerRegistry::default(),
        read_timeout: Duration::from_millis(20),
        retry: RetryPolicy::default(),
        join_timeout: Duration::from_secs(2),
        udp_recv_buffer: None,
        recorder: log_dir.map(|dir| RecorderOptions {
            log: BinaryLog::new(dir.join("session.bin"), ByteOrder::Little),
            threshold: 5,
        }),
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn special_peer_streams_doubles_over_tcp() {
    let acceptor = Connection::bind("127.0.0.1", 0).unwrap();
    let addr = acceptor.local_addr();

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        // Only identity and counts, no encoding selector or aux args
        stream.write_all(&i32s(&[1, 20, 0])).unwrap();
        let mut reply = [0u8; 12];
        stream.read_exact(&mut reply).unwrap();

        let mut frame: Vec<u8> = (0..20).flat_map(|i| (i as f64 * 0.25).to_le_bytes()).collect();
        frame.push(xor_checksum(&frame));
        stream.write_all(&frame).unwrap();
        (reply, stream)
    });

    let mut server = Session::new(options(0, 20, 0, Encoding::Int8, None));
    server.attach(acceptor.accept().unwrap()).unwrap();
    let outcome = server.handshake().unwrap().clone();

    assert_eq!(outcome.peer_name, "Mevea");
    assert_eq!(outcome.peer_aux, None);
    assert_eq!(outcome.layout.inbound, Encoding::Float64);
    assert_eq!(outcome.layout.outbound, Encoding::Float64);
    assert_eq!(outcome.layout.recv_size(), 161);

    let (reply, _stream) = peer.join().unwrap();
    assert_eq!(reply.to_vec(), i32s(&[0, 20, 0]));

    server.start_receiver().unwrap();
    assert!(wait_until(|| server.stats().frames_received == 1));
    let values = server.latest().unwrap();
    assert_eq!(values.len(), 20);
    assert_eq!(values[4], 1.0);
    assert_eq!(server.latest(), None);

    server.stop_all().unwrap();
}

#[test]
fn count_mismatch_aborts_bring_up() {
    let acceptor = Connection::bind("127.0.0.1", 0).unwrap();
    let addr = acceptor.local_addr();

    let peer = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(&i32s(&[1, 5, 0])).unwrap();
        stream
    });

    let mut server = Session::new(options(0, 20, 0, Encoding::Float64, None));
    server.attach(acceptor.accept().unwrap()).unwrap();
    let _stream = peer.join().unwrap();

    match server.handshake() {
        Err(Error::CountMismatch {
            peer,
            peer_outputs,
            local_inputs,
            ..
        }) => {
            assert_eq!(peer, "Mevea");
            assert_eq!(peer_outputs, 5);
            assert_eq!(local_inputs, 20);
        }
        other => panic!("expected count mismatch, got {:?}", other.cloned()),
    }
    assert!(matches!(server.start_receiver(), Err(Error::HandshakeIncomplete)));
}

#[test]
fn udp_link_exchanges_and_records_frames() {
    let temp_dir = TempDir::new().unwrap();
    let acceptor = Connection::bind("127.0.0.1", 0).unwrap();
    let port = acceptor.local_addr().port();
    let accept = thread::spawn(move || acceptor.accept().unwrap());

    let mut client = Session::new(options(2, 3, 2, Encoding::Int8, None));
    client.setup("127.0.0.1", port, Role::Client).unwrap();
    let mut server = Session::new(options(0, 2, 3, Encoding::Float64, Some(temp_dir.path())));
    server.attach(accept.join().unwrap()).unwrap();

    thread::scope(|s| {
        let srv = s.spawn(|| server.handshake().cloned());
        let client_view = client.handshake().unwrap().clone();
        let server_view = srv.join().unwrap().unwrap();

        assert_eq!(server_view.peer_name, "Motion Platform");
        assert_eq!(server_view.peer_aux, Some(vec![100, 1000, 0]));
        assert_eq!(server_view.layout.inbound, Encoding::Int8);
        assert_eq!(client_view.peer_name, "Excavator");
        assert_eq!(client_view.layout.inbound, Encoding::Float64);
    });

    server.tcp_to_udp().unwrap();
    client.tcp_to_udp().unwrap();
    assert_eq!(server.transport(), Some(TransportKind::Datagram));
    assert!(matches!(server.tcp_to_udp(), Err(Error::Protocol(_))));

    server.start_receiver().unwrap();
    server.start_saver().unwrap();
    client.start_receiver().unwrap();

    // Client speaks first so the server learns its datagram address
    let sent = client.send(&[3.0, -4.0]).unwrap();
    assert_eq!(sent, vec![3, 0xFC, 3 ^ 0xFC]);
    assert!(wait_until(|| server.stats().frames_received >= 1));
    assert_eq!(server.peer_addr(), client.local_addr());
    assert_eq!(server.latest(), Some(vec![3.0, -4.0]));

    server.send(&[0.5, 1.5, 2.5]).unwrap();
    let mut reply = None;
    assert!(wait_until(|| {
        reply = reply.take().or_else(|| client.latest());
        reply.is_some()
    }));
    assert_eq!(reply, Some(vec![0.5, 1.5, 2.5]));

    for i in 0..4 {
        client.send(&[i as f64, 0.0]).unwrap();
    }
    assert!(wait_until(|| server.stats().records_written == 5));

    let log_path = server.log_path().unwrap().to_path_buf();
    let records = read_records(&log_path, 2, ByteOrder::Little).unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(records[0].values, vec![3.0, -4.0]);
    assert!(records.windows(2).all(|w| w[0].timestamp_us <= w[1].timestamp_us));

    server.stop_all().unwrap();
    client.stop_all().unwrap();
}
