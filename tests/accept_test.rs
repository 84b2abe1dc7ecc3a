/*!
 * Accept Tests
 * Backlog limits and lock-free accept under concurrency
 */

use libos_sockfs::substrate::Substrate;
use libos_sockfs::{AddrBuf, FsOps, MemSubstrate, SockHandle, SOCKET_BUILTIN_FS};
use nix::errno::Errno;
use nix::libc;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn substrate() -> (MemSubstrate, Arc<dyn Substrate>) {
    let memory = MemSubstrate::new();
    let shared: Arc<dyn Substrate> = Arc::new(memory.clone());
    (memory, shared)
}

/// Listening IPv4 socket and its encoded address
fn tcp_listener(substrate: &Arc<dyn Substrate>, backlog: i32) -> (SockHandle, Vec<u8>) {
    let listener =
        SockHandle::create(Arc::clone(substrate), libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    // Auto-bind to the wildcard address
    listener.listen(backlog).unwrap();

    let mut backing = [0u8; 128];
    let mut name = AddrBuf::new(&mut backing);
    listener.getsockname(&mut name).unwrap();
    let mut addr = name.as_bytes().to_vec();
    // Connect through loopback: 127.0.0.1 in sin_addr
    addr[4..8].copy_from_slice(&[127, 0, 0, 1]);
    (listener, addr)
}

fn peer_name(sock: &SockHandle) -> Vec<u8> {
    let mut backing = [0u8; 128];
    let mut out = AddrBuf::new(&mut backing);
    sock.getpeername(&mut out).unwrap();
    out.as_bytes().to_vec()
}

#[test]
fn test_backlog_bounds_concurrent_connects() {
    let (_, substrate) = substrate();
    let (listener, addr) = tcp_listener(&substrate, 2);

    const CLIENTS: usize = 8;
    let barrier = Arc::new(Barrier::new(CLIENTS));
    let workers: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let substrate = Arc::clone(&substrate);
            let addr = addr.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let client =
                    SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
                barrier.wait();
                let result = client.connect(&addr).map_err(|e| e.errno());
                (client, result)
            })
        })
        .collect();
    let outcomes: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let connected = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
    assert_eq!(connected, 2);
    for (_, result) in &outcomes {
        if let Err(errno) = result {
            assert_eq!(*errno, Errno::ECONNREFUSED);
        }
    }

    SOCKET_BUILTIN_FS
        .ops()
        .setflags(&listener, libc::O_NONBLOCK)
        .unwrap();
    listener.accept(false).unwrap();
    listener.accept(false).unwrap();
    assert_eq!(listener.accept(false).unwrap_err().errno(), Errno::EAGAIN);
}

#[test]
fn test_concurrent_acceptors_never_share_a_connection() {
    let (memory, substrate) = substrate();
    let (listener, addr) = tcp_listener(&substrate, 64);

    const CLIENTS: usize = 32;
    let clients: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let client =
                SockHandle::create(Arc::clone(&substrate), libc::AF_INET, libc::SOCK_STREAM, 0)
                    .unwrap();
            client.connect(&addr).unwrap();
            client
        })
        .collect();

    SOCKET_BUILTIN_FS
        .ops()
        .setflags(&listener, libc::O_NONBLOCK)
        .unwrap();
    let listener = Arc::new(listener);

    let acceptors: Vec<_> = (0..4)
        .map(|_| {
            let listener = Arc::clone(&listener);
            thread::spawn(move || {
                let mut peers = Vec::new();
                loop {
                    match listener.accept(false) {
                        Ok(conn) => peers.push(peer_name(&conn)),
                        Err(err) => {
                            assert_eq!(err.errno(), Errno::EAGAIN);
                            break;
                        }
                    }
                }
                peers
            })
        })
        .collect();

    let peers: Vec<Vec<u8>> = acceptors
        .into_iter()
        .flat_map(|a| a.join().unwrap())
        .collect();
    let unique: HashSet<_> = peers.iter().cloned().collect();
    assert_eq!(peers.len(), CLIENTS);
    assert_eq!(unique.len(), CLIENTS);
    assert_eq!(memory.stats().connections_accepted, CLIENTS as u64);
    drop(clients);
}

#[test]
fn test_blocking_accept_wakes_on_connect() {
    let (_, substrate) = substrate();
    let (listener, addr) = tcp_listener(&substrate, 1);
    let listener = Arc::new(listener);

    let acceptor = {
        let listener = Arc::clone(&listener);
        thread::spawn(move || listener.accept(true))
    };
    thread::sleep(Duration::from_millis(20));

    let client = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    client.connect(&addr).unwrap();

    let conn = acceptor.join().unwrap().unwrap();
    assert!(conn.is_nonblocking());

    let fs = SOCKET_BUILTIN_FS.ops();
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(&conn, &mut buf).unwrap_err().errno(), Errno::EAGAIN);
    fs.write(&client, b"ok").unwrap();
    assert_eq!(fs.read(&conn, &mut buf).unwrap(), 2);
}

#[test]
fn test_accept_on_non_listener() {
    let (_, substrate) = substrate();
    let unix =
        SockHandle::create(Arc::clone(&substrate), libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    assert_eq!(unix.accept(false).unwrap_err().errno(), Errno::EINVAL);

    let udp = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
    assert_eq!(udp.accept(false).unwrap_err().errno(), Errno::EOPNOTSUPP);
    assert_eq!(udp.listen(4).unwrap_err().errno(), Errno::EOPNOTSUPP);
}
