use clap::Parser;
use core::{convert::Infallible, net::SocketAddr};
use umd_cli::LogArgs;
use umd_network::{ReceiverConfig, ReceiverEvent, ScreenEvent, UmdReceiver};

/// Listens for UMDv5 messages and logs every change.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Local address to listen on
    #[arg(short, long, value_name = "ADDR", default_value_t = ReceiverConfig::default().bind_addr)]
    bind: SocketAddr,

    #[command(flatten)]
    log: LogArgs,
}

fn main() -> std::io::Result<Infallible> {
    let args = Args::parse();
    args.log.init();

    let config = ReceiverConfig {
        bind_addr: args.bind,
    };
    let socket = config.bind()?;

    let mut receiver = UmdReceiver::new(config);

    receiver.subscribe(|event| match event {
        ReceiverEvent::ScreenAdded { screen } => log::info!("screen {screen} added"),
        ReceiverEvent::Screen(ScreenEvent::TallyAdded { key }) => log::info!("tally {key} added"),
        ReceiverEvent::Screen(ScreenEvent::TallyUpdated { key, changed }) => {
            log::info!("tally {key}: {changed} changed")
        }
        ReceiverEvent::Screen(ScreenEvent::TallyControl { key, data }) => {
            log::info!("tally {key}: control data {data:02x?}")
        }
        ReceiverEvent::Screen(ScreenEvent::Control { screen, data }) => {
            log::info!("screen {screen}: control data {data:02x?}")
        }
    });

    receiver.start(&socket)
}
