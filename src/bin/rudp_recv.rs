//! File-transfer receiver: accepts files sent by `rudp_send`.
//!
//! Usage: `rudp_recv [-d] port`

use rudp::{Config, Rudp};
use std::{
    collections::HashMap,
    env,
    fs::File,
    io::{Result, Write},
    net::SocketAddrV4,
    path::Path,
    process::exit,
};

const VS_TYPE_BEGIN: u32 = 1;
const VS_TYPE_DATA: u32 = 2;
const VS_TYPE_END: u32 = 3;

fn usage() -> ! {
    eprintln!("Usage: rudp_recv [-d] port");
    exit(1);
}

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("-d") {
        args.remove(0);
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .init();
    }
    let [port] = args.as_slice() else { usage() };
    let Ok(port) = port.parse::<u16>() else {
        usage()
    };

    let mut rudp = Rudp::new(Config::default())?;
    let sock = rudp.socket(port)?;

    // one in-progress file per sending peer
    let mut transfers: HashMap<SocketAddrV4, File> = HashMap::new();
    rudp.set_recv_handler(
        sock,
        Box::new(move |handle, sock, peer, data| {
            if data.len() < 4 {
                eprintln!("rudp_recv: runt record from {peer}");
                return Ok(());
            }
            let mut typ = [0u8; 4];
            typ.copy_from_slice(&data[..4]);
            let body = &data[4..];

            match u32::from_be_bytes(typ) {
                VS_TYPE_BEGIN => {
                    let name = String::from_utf8_lossy(body).into_owned();
                    // refuse anything that is not a bare file name
                    let Some(name) = Path::new(&name).file_name() else {
                        eprintln!("rudp_recv: bad file name from {peer}");
                        return Ok(());
                    };
                    eprintln!("rudp_recv: receiving {} from {peer}", name.to_string_lossy());
                    transfers.insert(peer, File::create(name)?);
                }
                VS_TYPE_DATA => {
                    if let Some(file) = transfers.get_mut(&peer) {
                        file.write_all(body)?;
                    }
                }
                VS_TYPE_END => {
                    if transfers.remove(&peer).is_some() {
                        eprintln!("rudp_recv: transfer from {peer} complete");
                    }
                    if transfers.is_empty() {
                        handle.close(sock)?;
                    }
                }
                typ => eprintln!("rudp_recv: unknown record type {typ} from {peer}"),
            }
            Ok(())
        }),
    )?;

    rudp.set_event_handler(
        sock,
        Box::new(|_rudp, _sock, event, peer| {
            eprintln!("rudp_recv: {event:?} from {peer}");
            Ok(())
        }),
    )?;

    rudp.run()
}
