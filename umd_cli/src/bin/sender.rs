use clap::Parser;
use core::{net::SocketAddr, ops::ControlFlow, time::Duration};
use std::time::Instant;
use umd_cli::{LogArgs, TallyArg, resolve_addr};
use umd_network::{SenderConfig, UmdSender};

/// Sends UMDv5 tally state to one or more clients.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Client address, as HOST:PORT. Repeat for several clients
    #[arg(short, long = "client", value_name = "HOST:PORT", required = true, value_parser = resolve_addr)]
    clients: Vec<SocketAddr>,

    /// Full refresh interval, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 300)]
    tx_interval: u64,

    /// Turn every lamp off before exiting
    #[arg(long)]
    all_off_on_close: bool,

    /// Tally to keep refreshed, as SCREEN:INDEX[=TEXT]. Repeat for several tallies
    #[arg(short, long = "tally", value_name = "SCREEN:INDEX[=TEXT]")]
    tallies: Vec<TallyArg>,

    /// Exit after this many seconds, runs forever if not given
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> Result<(), umd_network::Error> {
    let args = Args::parse();
    args.log.init();

    let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;

    let mut sender = UmdSender::new(SenderConfig {
        tx_interval: Duration::from_millis(args.tx_interval),
        all_off_on_close: args.all_off_on_close,
    });

    for client in args.clients {
        sender.add_client(client);
    }

    for tally in args.tallies {
        let created = sender.add_tally(tally.key)?;
        if let Some(text) = tally.text {
            created.set_text(text);
        }
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    sender.start(&socket, |_| match deadline {
        Some(deadline) if Instant::now() >= deadline => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    })
}
