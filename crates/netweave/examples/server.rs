//! Simple echo server using netweave.
//!
//! Run:
//! - cargo run -p netweave --example server
//! - cargo run -p netweave --example server -- 127.0.0.1:7777

use std::{env, thread, time::Duration};

use netweave::{Config, Context, Message, MessageId};

fn parse_bind() -> (std::net::Ipv4Addr, u16) {
    let arg = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let (ip, port) = arg.split_once(':').expect("expected ip:port");
    (ip.parse().expect("bad ip"), port.parse().expect("bad port"))
}

fn main() {
    let (ip, port) = parse_bind();
    let mut ctx = Context::new(Config::default()).expect("context");

    let listener = ctx.listen(ip, port, false, None, None);
    println!("netweave echo server listening on {}:{}", ip, port);

    loop {
        while let Some(msg) = ctx.recv() {
            match msg.id().and_then(MessageId::from_u8) {
                Some(MessageId::ListenFailed) if msg.handle() == listener => {
                    eprintln!("listen failed, exiting");
                    return;
                }
                Some(MessageId::IncomingConnection) => {
                    let (_, peer_ip, peer_port) = msg.incoming_connection_fields().unwrap();
                    println!(
                        "[connect] {}:{} -> {:?}",
                        std::net::Ipv4Addr::from(peer_ip),
                        peer_port,
                        msg.handle()
                    );
                }
                Some(MessageId::LostConnection) => {
                    println!("[disconnect] {:?}", msg.handle());
                }
                _ => {
                    let text = String::from_utf8_lossy(&msg.data()[1..]);
                    println!("[message] {:?} payload=\"{}\"", msg.handle(), text);

                    // Echo the payload back on the same connection.
                    let mut echo = Message::outgoing(msg.handle(), msg.size());
                    echo.data_mut().copy_from_slice(msg.data());
                    ctx.send(echo);
                }
            }
        }

        thread::sleep(Duration::from_millis(10));
    }
}
