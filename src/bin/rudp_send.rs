//! File-transfer sender: streams files to one or more receivers over RUDP.
//!
//! Usage: `rudp_send [-d] host1:port1 [host2:port2] ... file1 [file2] ...`
//!
//! Each file travels on its own socket as a BEGIN record (file name),
//! DATA records of up to 128 bytes and an END record.

use rudp::{Config, Rudp, RudpEvent, SocketHandle};
use std::{
    env, fs,
    io::{Error, ErrorKind, Result},
    net::{SocketAddr, SocketAddrV4, ToSocketAddrs},
    path::Path,
    process::exit,
};

const VS_TYPE_BEGIN: u32 = 1;
const VS_TYPE_DATA: u32 = 2;
const VS_TYPE_END: u32 = 3;
const VS_FILENAME_LENGTH: usize = 128;
const VS_MAX_DATA: usize = 128;

fn usage() -> ! {
    eprintln!("Usage: rudp_send [-d] host1:port1 [host2:port2] ... file1 [file2] ...");
    exit(1);
}

fn resolve(host_port: &str) -> Result<SocketAddrV4> {
    host_port
        .to_socket_addrs()?
        .find_map(|addr| match addr {
            SocketAddr::V4(addr) => Some(addr),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("cannot locate host {host_port}"),
            )
        })
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("-d") {
        args.remove(0);
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .init();
    }

    let split = args
        .iter()
        .position(|arg| !arg.contains(':'))
        .unwrap_or(args.len());
    let (hosts, files) = args.split_at(split);
    if hosts.is_empty() || files.is_empty() {
        usage();
    }

    let peers = hosts
        .iter()
        .map(|host| resolve(host))
        .collect::<Result<Vec<_>>>()?;

    let mut rudp = Rudp::new(Config::default())?;
    for file in files {
        send_file(&mut rudp, &peers, file)?;
    }
    rudp.run()
}

fn send_file(rudp: &mut Rudp, peers: &[SocketAddrV4], path: &str) -> Result<()> {
    let data = fs::read(path)?;
    let sock = rudp.socket(0)?;
    rudp.set_event_handler(sock, Box::new(on_event))?;

    // strip any leading path, the receiver gets the bare name
    let name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = &name.as_bytes()[..name.len().min(VS_FILENAME_LENGTH)];

    send_record(rudp, sock, peers, VS_TYPE_BEGIN, name)?;
    for chunk in data.chunks(VS_MAX_DATA) {
        send_record(rudp, sock, peers, VS_TYPE_DATA, chunk)?;
    }
    send_record(rudp, sock, peers, VS_TYPE_END, &[])?;
    eprintln!("rudp_send: queued {} ({} bytes)", path, data.len());

    rudp.close(sock)
}

fn send_record(
    rudp: &mut Rudp,
    sock: SocketHandle,
    peers: &[SocketAddrV4],
    typ: u32,
    body: &[u8],
) -> Result<()> {
    let mut record = typ.to_be_bytes().to_vec();
    record.extend_from_slice(body);
    for peer in peers {
        rudp.send_to(sock, &record, *peer)?;
    }
    Ok(())
}

fn on_event(
    _rudp: &mut rudp::RudpHandle<'_>,
    _sock: SocketHandle,
    event: RudpEvent,
    peer: SocketAddrV4,
) -> Result<()> {
    match event {
        RudpEvent::Timeout => {
            eprintln!("rudp_send: time out in communication with {peer}");
            Err(Error::new(ErrorKind::TimedOut, "receiver unreachable"))
        }
        RudpEvent::Closed => Ok(()),
    }
}
