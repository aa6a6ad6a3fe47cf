mod network;

use clap::Parser;
use log::error;
use shared::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host or IPv4 address to connect to
    host: String,

    /// Server TCP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    println!("Client...");

    let addr = format!("{}:{}", args.host, args.port);
    let session = match network::Client::connect(&addr).await {
        Ok(session) => session,
        Err(e) => {
            error!("connect({}) failed: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = session.run().await {
        error!("session failed: {}", e);
        std::process::exit(1);
    }
}
