/*!
 * Socket Layer Demo
 *
 * Runs an echo exchange over the in-process substrate:
 * - TCP over IPv4 through the socket filesystem
 * - Unix-domain streams
 * - a checkout/checkin cycle on the live connection
 */

use anyhow::{Context, Result};
use libos_sockfs::socket::addr;
use libos_sockfs::substrate::{PalSocketAddr, Substrate};
use libos_sockfs::{init_tracing, FsOps, MemSubstrate, SockHandle, SOCKET_BUILTIN_FS};
use nix::libc;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::thread;
use tracing::info;

fn echo_server(listener: SockHandle) -> thread::JoinHandle<Result<usize>> {
    thread::spawn(move || {
        let fs = SOCKET_BUILTIN_FS.ops();
        let conn = listener.accept(false)?;
        let mut buf = [0u8; 256];
        let mut echoed = 0;
        loop {
            let n = fs.read(&conn, &mut buf)?;
            if n == 0 {
                break;
            }
            fs.write(&conn, &buf[..n])?;
            echoed += n;
        }
        fs.close(conn)?;
        fs.close(listener)?;
        Ok(echoed)
    })
}

fn round_trip(client: &SockHandle, message: &[u8]) -> Result<Vec<u8>> {
    let fs = SOCKET_BUILTIN_FS.ops();
    fs.write(client, message)?;
    let mut reply = vec![0u8; message.len()];
    let mut filled = 0;
    while filled < reply.len() {
        let n = fs.read(client, &mut reply[filled..])?;
        anyhow::ensure!(n > 0, "peer closed early");
        filled += n;
    }
    Ok(reply)
}

fn tcp_demo(substrate: Arc<dyn Substrate>) -> Result<()> {
    let fs = SOCKET_BUILTIN_FS.ops();
    let listener = SockHandle::create(Arc::clone(&substrate), libc::AF_INET, libc::SOCK_STREAM, 0)?;
    let bind_addr = PalSocketAddr::Ipv4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7000));
    listener.bind(&addr::encode(&bind_addr))?;
    listener.listen(16)?;
    let server = echo_server(listener);

    let client = SockHandle::create(substrate, libc::AF_INET, libc::SOCK_STREAM, 0)?;
    client.connect(&addr::encode(&bind_addr))?;

    let reply = round_trip(&client, b"hello over tcp")?;
    info!(reply = %String::from_utf8_lossy(&reply), "tcp echo");

    // Connection survives a checkpoint cycle
    let detached = fs.checkout(client);
    let image = detached.encode()?;
    info!(bytes = image.len(), "client checked out");
    let client = fs.checkin(detached)?;

    let reply = round_trip(&client, b"after checkin")?;
    info!(reply = %String::from_utf8_lossy(&reply), "tcp echo");

    client.disconnect()?;
    let echoed = server
        .join()
        .map_err(|_| anyhow::anyhow!("echo server panicked"))??;
    info!(echoed, "tcp server finished");
    fs.close(client)?;
    Ok(())
}

fn unix_demo(substrate: Arc<dyn Substrate>) -> Result<()> {
    let fs = SOCKET_BUILTIN_FS.ops();
    let path = PalSocketAddr::Unix(b"/run/sockfs-demo.sock".to_vec());

    let listener = SockHandle::create(Arc::clone(&substrate), libc::AF_UNIX, libc::SOCK_STREAM, 0)?;
    listener.bind(&addr::encode(&path))?;
    listener.listen(4)?;
    let server = echo_server(listener);

    let client = SockHandle::create(substrate, libc::AF_UNIX, libc::SOCK_STREAM, 0)?;
    client.connect(&addr::encode(&path))?;
    let stat = fs.hstat(&client)?;
    info!(mode = %format_args!("{:o}", stat.st_mode), "unix client stat");

    let reply = round_trip(&client, b"hello over unix")?;
    info!(reply = %String::from_utf8_lossy(&reply), "unix echo");

    fs.close(client)?;
    server
        .join()
        .map_err(|_| anyhow::anyhow!("echo server panicked"))??;
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();

    let memory = MemSubstrate::new();
    let substrate: Arc<dyn Substrate> = Arc::new(memory.clone());
    info!(substrate = substrate.name(), "socket layer demo starting");

    tcp_demo(Arc::clone(&substrate)).context("tcp demo")?;
    unix_demo(substrate).context("unix demo")?;

    let stats = memory.stats();
    info!(
        open = stats.open_sockets(),
        stats = %serde_json::to_string(&stats)?,
        "substrate statistics"
    );
    Ok(())
}
