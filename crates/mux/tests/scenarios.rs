//! End-to-end scenarios run over a real loopback `TcpStream` pair, one per
//! the numbered list in `spec.md` §8. Mirrors the teacher's
//! `tcp_roundtrip.rs`/`tcp_multi_client_backpressure.rs` style: plain
//! functions, `thread::spawn` client/server halves, assert on the joined
//! results.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use mux::{Config, Session};

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
    let (server, _) = listener.accept().expect("failed to accept loopback connection");
    (client.join().unwrap(), server)
}

fn client_server(config: Config) -> (Session, Session) {
    let (client_io, server_io) = loopback_pair();
    let client = Session::client(client_io, config).unwrap();
    let server = Session::server(server_io, config).unwrap();
    (client, server)
}

/// 1. Ping RTT: both peers measure a nonzero round trip with no error.
#[test]
fn ping_round_trip_both_directions() {
    let (client, server) = client_server(Config::default());

    let client_rtt = client.ping().expect("client ping failed");
    let server_rtt = server.ping().expect("server ping failed");

    assert!(client_rtt > Duration::ZERO);
    assert!(server_rtt > Duration::ZERO);

    client.close().unwrap();
    server.close().unwrap();
}

/// 2. First four streams: client- and server-originated identifiers keep
/// their own parity and the accept order on each side matches the order
/// streams were opened on the other.
#[test]
fn first_four_streams_have_correct_parity_and_accept_order() {
    let (client, server) = client_server(Config::default());

    let mut c1 = client.open().unwrap();
    let mut c2 = client.open().unwrap();
    assert_eq!(c1.stream_id(), 1);
    assert_eq!(c2.stream_id(), 3);

    let mut s1 = server.open().unwrap();
    let mut s2 = server.open().unwrap();
    assert_eq!(s1.stream_id(), 2);
    assert_eq!(s2.stream_id(), 4);

    // Nudge bytes across so each SYN actually crosses the wire.
    c1.write_all(b"c1").unwrap();
    c2.write_all(b"c2").unwrap();
    s1.write_all(b"s1").unwrap();
    s2.write_all(b"s2").unwrap();

    let mut accepted_by_server =
        vec![server.accept_stream().unwrap(), server.accept_stream().unwrap()];
    let mut accepted_by_client =
        vec![client.accept_stream().unwrap(), client.accept_stream().unwrap()];

    assert_eq!(accepted_by_server[0].stream_id(), 1);
    assert_eq!(accepted_by_server[1].stream_id(), 3);
    assert_eq!(accepted_by_client[0].stream_id(), 2);
    assert_eq!(accepted_by_client[1].stream_id(), 4);

    for s in accepted_by_server.iter_mut().chain(accepted_by_client.iter_mut()) {
        let mut buf = [0u8; 2];
        s.read_exact(&mut buf).unwrap();
    }

    client.close().unwrap();
    server.close().unwrap();
}

/// 3. Small repeated writes: a thousand 4-byte writes arrive as a thousand
/// matching 4-byte reads, then end-of-stream.
#[test]
fn small_repeated_writes_preserve_boundaries_and_order() {
    let (client, server) = client_server(Config::default());

    let writer = thread::spawn(move || {
        let mut stream = client.open().unwrap();
        for _ in 0..1000 {
            stream.write_all(b"test").unwrap();
        }
        stream.close().unwrap();
        client.close().unwrap();
    });

    let mut accepted = server.accept_stream().unwrap();
    for _ in 0..1000 {
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"test");
    }
    let mut trailing = [0u8; 1];
    assert_eq!(accepted.read(&mut trailing).unwrap(), 0, "expected end-of-stream after FIN");

    writer.join().unwrap();
    server.close().unwrap();
}

/// 4. Large single write: one 512 KiB `Write` arrives as 128 matching 4 KiB
/// reads, fragmented only by flow control, never reordered.
#[test]
fn large_single_write_round_trips_in_order() {
    let (client, server) = client_server(Config::default());

    let payload: Vec<u8> = (0..512 * 1024).map(|i| (i % 256) as u8).collect();
    let expected = payload.clone();

    let writer = thread::spawn(move || {
        let mut stream = client.open().unwrap();
        stream.write_all(&payload).unwrap();
        stream.close().unwrap();
        client.close().unwrap();
    });

    let mut accepted = server.accept_stream().unwrap();
    for chunk_index in 0..128 {
        let mut buf = [0u8; 4096];
        accepted.read_exact(&mut buf).unwrap();
        let start = chunk_index * 4096;
        assert_eq!(&buf[..], &expected[start..start + 4096]);
    }

    writer.join().unwrap();
    server.close().unwrap();
}

/// 5. GoAway: the server announces it, the client's next `Open` fails with
/// `ErrRemoteGoAway`, but a stream opened before the announcement keeps
/// working.
#[test]
fn go_away_blocks_new_opens_but_not_existing_streams() {
    let (client, server) = client_server(Config::default());

    let mut pre_existing = client.open().unwrap();
    pre_existing.write_all(b"still alive").unwrap();

    server.go_away().unwrap();
    // Let GO_AWAY cross the loopback socket before probing `open`.
    thread::sleep(Duration::from_millis(50));

    let err = client.open().unwrap_err();
    assert!(matches!(err, mux::Error::RemoteGoAway));

    let mut accepted = server.accept_stream().unwrap();
    let mut buf = [0u8; 11];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"still alive");

    client.close().unwrap();
    server.close().unwrap();
}

/// 6. Read deadline: a deadline 5ms in the future on an empty stream
/// returns `ErrTimeout` with no bytes delivered.
#[test]
fn read_deadline_times_out_with_no_bytes() {
    let (client, server) = client_server(Config::default());

    let mut opener = client.open().unwrap();
    opener.write_all(b"x").unwrap(); // forces the SYN across so accept_stream sees it
    let mut accepted = server.accept_stream().unwrap();
    let mut throwaway = [0u8; 1];
    accepted.read_exact(&mut throwaway).unwrap();

    accepted.set_read_deadline(Some(Instant::now() + Duration::from_millis(5)));
    let mut buf = [0u8; 4];
    let err = accepted.read(&mut buf).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

    client.close().unwrap();
    server.close().unwrap();
}

/// 7. Write deadline under window exhaustion: writing fixed 512-byte
/// chunks to a peer that never reads must hit `ErrTimeout` well before the
/// window's full capacity in chunks is exhausted.
#[test]
fn write_deadline_times_out_under_window_exhaustion() {
    let config = Config { max_stream_window_size: 64 * 1024, ..Config::default() };
    let (client, server) = client_server(config);

    // Accept the stream but never read from it, so the window never
    // replenishes past its initial grant.
    let writer = thread::spawn(move || {
        let mut stream = client.open().unwrap();
        stream.set_write_deadline(Some(Instant::now() + Duration::from_millis(50)));
        let chunk = [0u8; 512];
        let max_iterations = (config.max_stream_window_size as usize / 512) + 1;
        let mut iterations = 0;
        let mut timed_out = false;
        while iterations < max_iterations {
            match stream.write_all(&chunk) {
                Ok(()) => iterations += 1,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    timed_out = true;
                    break;
                }
                Err(e) => panic!("unexpected write error: {e}"),
            }
        }
        (timed_out, iterations, client)
    });

    let _accepted = server.accept_stream().unwrap();
    let (timed_out, iterations, client) = writer.join().unwrap();
    assert!(timed_out, "expected a write timeout before exhausting {iterations} iterations");
    assert!(iterations <= config.max_stream_window_size as usize / 512);

    client.close().unwrap();
    server.close().unwrap();
}

/// 8. Many concurrent streams: 50 streams in parallel, each writing a
/// distinct 8-character identifier a thousand times, all drain correctly
/// with no deadlock.
#[test]
fn fifty_concurrent_streams_round_trip_without_deadlock() {
    let (client, server) = client_server(Config::default());

    let accept_handle = thread::spawn(move || {
        let mut handles = Vec::new();
        for _ in 0..50 {
            let mut accepted = server.accept_stream().unwrap();
            handles.push(thread::spawn(move || {
                let mut label = [0u8; 8];
                accepted.read_exact(&mut label).unwrap();
                for _ in 0..999 {
                    let mut buf = [0u8; 8];
                    accepted.read_exact(&mut buf).unwrap();
                    assert_eq!(buf, label, "interleaved bytes from another stream");
                }
                let mut trailing = [0u8; 1];
                assert_eq!(accepted.read(&mut trailing).unwrap(), 0);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        server
    });

    let mut writers = Vec::new();
    for n in 0..50u32 {
        let client = &client;
        let label = format!("{n:08}").into_bytes();
        let stream = client.open().unwrap();
        writers.push(thread::spawn(move || {
            let mut stream = stream;
            for _ in 0..1000 {
                stream.write_all(&label).unwrap();
            }
            stream.close().unwrap();
        }));
    }
    for w in writers {
        w.join().unwrap();
    }

    let server = accept_handle.join().unwrap();
    client.close().unwrap();
    server.close().unwrap();
}
