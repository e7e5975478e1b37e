//! Simple client for the echo server example.
//!
//! Run:
//! - cargo run -p netweave --example client
//! - cargo run -p netweave --example client -- 127.0.0.1:7777 "hello there"

use std::{env, thread, time::Duration};

use netweave::{to_ipv4, Config, Context, Message, MessageId};

fn main() {
    let mut args = env::args().skip(1);
    let target = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let text = args.next().unwrap_or_else(|| "hello".to_string());

    let (host, port) = target.split_once(':').expect("expected host:port");
    let raw_ip = to_ipv4(host);
    if raw_ip == 0 {
        eprintln!("could not resolve {}", host);
        return;
    }
    let ip = std::net::Ipv4Addr::from(raw_ip);
    let port: u16 = port.parse().expect("bad port");

    let mut ctx = Context::new(Config::default()).expect("context");
    let server = ctx.connect(ip, port, false, false);
    println!("connecting to {}:{} as {:?}", ip, port, server);

    let mut msg = Message::outgoing(server, text.len() + 1);
    msg.data_mut()[0] = MessageId::UserDefined as u8;
    msg.data_mut()[1..].copy_from_slice(text.as_bytes());
    ctx.send(msg);

    loop {
        while let Some(incoming) = ctx.recv() {
            match incoming.id().and_then(MessageId::from_u8) {
                Some(MessageId::ConnectFailed) => {
                    eprintln!("connect failed");
                    return;
                }
                Some(MessageId::LostConnection) => {
                    println!("server closed the connection");
                    return;
                }
                _ => {
                    let text = String::from_utf8_lossy(&incoming.data()[1..]);
                    println!("echo: \"{}\"", text);
                    ctx.disconnect(server, true);
                    return;
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
