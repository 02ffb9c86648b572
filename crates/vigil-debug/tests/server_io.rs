//! Wire-level tests against a real TCP connection.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vigil_debug::commands;
use vigil_debug::{DebugServer, Dispatcher, Session, WireMessage};
use vigil_runtime::Runtime;

fn start_server() -> (std::net::SocketAddr, thread::JoinHandle<()>) {
    let runtime = Arc::new(Runtime::new());
    runtime.threads().register("main", 1);
    let session = Arc::new(Session::new(runtime));
    let dispatcher = Arc::new(Dispatcher::new(session));
    let server = DebugServer::bind("127.0.0.1:0", dispatcher).unwrap();
    let addr = server.local_addr().unwrap();
    let handle = thread::spawn(move || {
        server.serve_one().unwrap();
    });
    (addr, handle)
}

fn read_frame(reader: &mut BufReader<TcpStream>) -> WireMessage {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    WireMessage::decode(line.trim_end_matches('\n')).unwrap()
}

#[test]
fn version_exchange_over_tcp() {
    let (addr, handle) = start_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    stream.write_all(b"501\t1\t\n").unwrap();
    let reply = read_frame(&mut reader);
    assert_eq!(reply.command, commands::CMD_VERSION);
    assert_eq!(reply.seq, 1);
    assert_eq!(reply.fields()[0], env!("CARGO_PKG_VERSION"));

    // Both halves must close for the server to see the disconnect.
    drop(reader);
    drop(stream);
    handle.join().unwrap();
}

#[test]
fn malformed_frames_are_dropped_without_disconnecting() {
    let (addr, handle) = start_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    // No tabs at all, then a frame that is well formed.
    stream.write_all(b"garbage\n\n102\t3\t\n").unwrap();
    let reply = read_frame(&mut reader);
    assert_eq!(reply.command, commands::CMD_LIST_THREADS);
    assert_eq!(reply.seq, 3);
    assert!(reply.fields()[0].contains("main"));

    // Both halves must close for the server to see the disconnect.
    drop(reader);
    drop(stream);
    handle.join().unwrap();
}

#[test]
fn each_request_gets_exactly_one_reply_in_order() {
    let (addr, handle) = start_server();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    stream
        .write_all(b"111\t1\tline\tjob.vg\t2\t\n111\t3\tline\tjob.vg\t4\t\n")
        .unwrap();
    let first = read_frame(&mut reader);
    let second = read_frame(&mut reader);
    assert_eq!((first.command, first.seq), (commands::CMD_RETURN, 1));
    assert_eq!((second.command, second.seq), (commands::CMD_RETURN, 3));

    // Both halves must close for the server to see the disconnect.
    drop(reader);
    drop(stream);
    handle.join().unwrap();
}
