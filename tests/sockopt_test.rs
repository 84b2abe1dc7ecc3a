/*!
 * Backend Tests
 * Socket creation, state machine and option handling per family
 */

use libos_sockfs::socket::addr;
use libos_sockfs::substrate::{PalSocketAddr, Substrate};
use libos_sockfs::{AddrBuf, ConnState, MemSubstrate, SockHandle};
use nix::errno::Errno;
use nix::libc;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn substrate() -> (MemSubstrate, Arc<dyn Substrate>) {
    let memory = MemSubstrate::new();
    let shared: Arc<dyn Substrate> = Arc::new(memory.clone());
    (memory, shared)
}

fn get_int(sock: &SockHandle, level: i32, name: i32) -> i32 {
    let mut out = [0u8; 4];
    assert_eq!(sock.getsockopt(level, name, &mut out).unwrap(), 4);
    i32::from_ne_bytes(out)
}

fn set_int(sock: &SockHandle, level: i32, name: i32, value: i32) -> Result<(), Errno> {
    sock.setsockopt(level, name, &value.to_ne_bytes())
        .map_err(|e| e.errno())
}

#[test]
fn test_create_argument_checks() {
    let (_, substrate) = substrate();
    let create = |domain, kind, protocol| {
        SockHandle::create(Arc::clone(&substrate), domain, kind, protocol).map_err(|e| e.errno())
    };

    assert_eq!(
        create(libc::AF_PACKET, libc::SOCK_STREAM, 0).unwrap_err(),
        Errno::EAFNOSUPPORT
    );
    assert_eq!(create(libc::AF_INET, libc::SOCK_RAW, 0).unwrap_err(), Errno::EINVAL);
    assert_eq!(
        create(libc::AF_UNIX, libc::SOCK_DGRAM, 0).unwrap_err(),
        Errno::ESOCKTNOSUPPORT
    );
    assert_eq!(
        create(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_UDP).unwrap_err(),
        Errno::EPROTONOSUPPORT
    );

    let tcp = create(libc::AF_INET6, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0).unwrap();
    assert_eq!(tcp.protocol(), libc::IPPROTO_TCP);
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_PROTOCOL), libc::IPPROTO_TCP);
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_DOMAIN), libc::AF_INET6);
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_TYPE), libc::SOCK_STREAM);
}

#[test]
fn test_unix_state_machine() {
    let (_, substrate) = substrate();
    let path = addr::encode(&PalSocketAddr::Unix(b"/run/state.sock".to_vec()));

    let listener =
        SockHandle::create(Arc::clone(&substrate), libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    assert_eq!(listener.listen(1).unwrap_err().errno(), Errno::EINVAL);
    listener.bind(&path).unwrap();
    assert_eq!(listener.bind(&path).unwrap_err().errno(), Errno::EINVAL);
    listener.listen(1).unwrap();
    assert_eq!(get_int(&listener, libc::SOL_SOCKET, libc::SO_ACCEPTCONN), 1);
    assert_eq!(listener.lock().conn, ConnState::Listening);
    assert_eq!(listener.connect(&path).unwrap_err().errno(), Errno::EINVAL);

    let client =
        SockHandle::create(Arc::clone(&substrate), libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    let unnamed = addr::encode(&PalSocketAddr::Unix(Vec::new()));
    assert_eq!(client.connect(&unnamed).unwrap_err().errno(), Errno::EINVAL);

    client.connect(&path).unwrap();
    assert_eq!(client.connect(&path).unwrap_err().errno(), Errno::EISCONN);
    assert_eq!(client.disconnect().unwrap_err().errno(), Errno::EINVAL);

    let mut backing = [0u8; 128];
    let mut peer = AddrBuf::new(&mut backing);
    client.getpeername(&mut peer).unwrap();
    assert_eq!(peer.as_bytes(), path.as_slice());
}

#[test]
fn test_unix_connect_to_missing_path() {
    let (_, substrate) = substrate();
    let client = SockHandle::create(substrate, libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    let path = addr::encode(&PalSocketAddr::Unix(b"/run/absent.sock".to_vec()));
    let err = client.connect(&path).unwrap_err();
    assert!(matches!(
        err.errno(),
        Errno::ECONNREFUSED | Errno::EADDRNOTAVAIL | Errno::ENOENT
    ));
    assert_eq!(client.lock().conn, ConnState::New);
}

#[test]
fn test_unbound_names() {
    let (_, substrate) = substrate();
    let udp = SockHandle::create(Arc::clone(&substrate), libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();

    let mut backing = [0u8; 128];
    let mut name = AddrBuf::new(&mut backing);
    udp.getsockname(&mut name).unwrap();
    assert_eq!(name.len(), addr::SOCKADDR_IN_LEN);
    assert_eq!(&name.as_bytes()[2..8], &[0u8; 6]);

    let unix = SockHandle::create(substrate, libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();
    let mut backing = [0u8; 128];
    let mut name = AddrBuf::new(&mut backing);
    unix.getsockname(&mut name).unwrap();
    assert_eq!(name.len(), 2);
}

#[test]
fn test_socket_options_roundtrip() {
    let (memory, substrate) = substrate();
    let tcp = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();
    let baseline = memory.stats().attr_updates;

    set_int(&tcp, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1).unwrap();
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_REUSEADDR), 1);

    set_int(&tcp, libc::SOL_SOCKET, libc::SO_RCVBUF, 48 * 1024).unwrap();
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_RCVBUF), 96 * 1024);

    set_int(&tcp, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1).unwrap();
    assert_eq!(get_int(&tcp, libc::IPPROTO_TCP, libc::TCP_NODELAY), 1);

    // Unchanged values are not written again
    set_int(&tcp, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1).unwrap();
    assert_eq!(memory.stats().attr_updates, baseline + 3);
    assert_eq!(get_int(&tcp, libc::SOL_SOCKET, libc::SO_ERROR), 0);
}

#[test]
fn test_socket_option_errors() {
    let (_, substrate) = substrate();
    let udp6 =
        SockHandle::create(Arc::clone(&substrate), libc::AF_INET6, libc::SOCK_DGRAM, 0).unwrap();

    assert_eq!(
        set_int(&udp6, libc::SOL_SOCKET, libc::SO_TYPE, 1).unwrap_err(),
        Errno::ENOPROTOOPT
    );
    assert_eq!(
        set_int(&udp6, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1).unwrap_err(),
        Errno::ENOPROTOOPT
    );
    assert_eq!(
        set_int(&udp6, libc::SOL_SOCKET, libc::SO_PEEK_OFF, 1).unwrap_err(),
        Errno::ENOPROTOOPT
    );
    assert_eq!(
        udp6.setsockopt(libc::SOL_SOCKET, libc::SO_KEEPALIVE, &[1]).unwrap_err().errno(),
        Errno::EINVAL
    );

    set_int(&udp6, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 1).unwrap();
    assert_eq!(get_int(&udp6, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY), 1);
    udp6.bind(&addr::encode(&PalSocketAddr::wildcard(
        libos_sockfs::substrate::PalSocketDomain::Ipv6,
        0,
    )))
    .unwrap();
    assert_eq!(
        set_int(&udp6, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 0).unwrap_err(),
        Errno::EINVAL
    );

    let udp4 = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_DGRAM, 0).unwrap();
    assert_eq!(
        set_int(&udp4, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 1).unwrap_err(),
        Errno::ENOPROTOOPT
    );
}

#[test]
fn test_timeouts_and_linger() {
    let (_, substrate) = substrate();
    let tcp = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0).unwrap();

    let mut timeval = [0u8; 16];
    timeval[..8].copy_from_slice(&1i64.to_ne_bytes());
    timeval[8..].copy_from_slice(&250_000i64.to_ne_bytes());
    tcp.setsockopt(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &timeval).unwrap();

    let mut out = [0u8; 16];
    assert_eq!(
        tcp.getsockopt(libc::SOL_SOCKET, libc::SO_RCVTIMEO, &mut out).unwrap(),
        16
    );
    assert_eq!(out, timeval);

    let mut linger = [0u8; 8];
    linger[..4].copy_from_slice(&1i32.to_ne_bytes());
    linger[4..].copy_from_slice(&5i32.to_ne_bytes());
    tcp.setsockopt(libc::SOL_SOCKET, libc::SO_LINGER, &linger).unwrap();
    let mut out = [0u8; 8];
    tcp.getsockopt(libc::SOL_SOCKET, libc::SO_LINGER, &mut out).unwrap();
    assert_eq!(out, linger);
}

#[test]
fn test_unix_options_applied_at_bind() {
    let (memory, substrate) = substrate();
    let unix = SockHandle::create(substrate, libc::AF_UNIX, libc::SOCK_STREAM, 0).unwrap();

    // No transport yet: options are only cached
    set_int(&unix, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1).unwrap();
    assert_eq!(memory.stats().attr_updates, 0);

    unix.bind(&addr::encode(&PalSocketAddr::Unix(b"/run/opts.sock".to_vec())))
        .unwrap();
    assert_eq!(memory.stats().attr_updates, 1);
    assert_eq!(get_int(&unix, libc::SOL_SOCKET, libc::SO_KEEPALIVE), 1);
    assert_eq!(
        set_int(&unix, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1).unwrap_err(),
        Errno::ENOPROTOOPT
    );
}
