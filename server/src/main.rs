use clap::{Parser, ValueEnum};
use log::error;
use server::scheduler::ConnectionScheduler;
use server::sharded::{ShardedScheduler, DEFAULT_CONNECTIONS_PER_SHARD};
use server::thread_pool::ThreadPoolScheduler;
use server::utils;
use shared::DEFAULT_PORT;
use tokio::net::TcpListener;

/// Concurrency strategy driving connection reads.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// One reader task per connection, capped at hardware parallelism
    Hardware,
    /// Fixed worker pool polling sharded connection lists
    Async,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Concurrency strategy
    #[arg(value_enum)]
    strategy: Strategy,

    /// Interface to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connection capacity for the hardware strategy
    /// (defaults to available parallelism)
    #[arg(long)]
    capacity: Option<usize>,

    /// Worker count for the async strategy
    /// (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Connections per shard for the async strategy
    #[arg(long, default_value_t = DEFAULT_CONNECTIONS_PER_SHARD)]
    per_shard: usize,
}

/// Binds the listener and hands it to the selected scheduler. Listener-level
/// faults (bind, listen, a non-transient accept error) are the only way out.
#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("bind({}) failed: {}", address, e);
            std::process::exit(1);
        }
    };

    println!("Serving...");

    let result = match args.strategy {
        Strategy::Hardware => {
            let capacity = args.capacity.unwrap_or_else(utils::default_parallelism);
            ThreadPoolScheduler::new(capacity).run(listener).await
        }
        Strategy::Async => {
            let workers = args.workers.unwrap_or_else(utils::default_parallelism);
            ShardedScheduler::new(workers, args.per_shard).run(listener).await
        }
    };

    if let Err(e) = result {
        error!("accept(...) failed: {}", e);
        std::process::exit(1);
    }
}
