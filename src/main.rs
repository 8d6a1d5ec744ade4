//! emberdb server binary.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use emberdb::config::Config;
use emberdb::db::Database;
use emberdb::server;
use emberdb::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "emberdb", about = "Shard-per-core key/value store", version)]
struct Args {
    /// HTTP listen port
    #[arg(long, default_value_t = 10000)]
    port: u16,

    /// Data directory for the shard files
    #[arg(long, default_value = ".")]
    dir: String,

    /// Shards per tier (0 = one per core)
    #[arg(long, default_value_t = 0)]
    shards: usize,

    /// Cache records per cache shard
    #[arg(long, default_value_t = 20)]
    cache_capacity: usize,

    /// Open shard files with O_DIRECT
    #[arg(long)]
    direct_io: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::new(args.dir)
        .cache_capacity(args.cache_capacity)
        .port(args.port)
        .direct_io(args.direct_io);
    if args.shards > 0 {
        config = config.shards(args.shards);
    }

    let db = Arc::new(Database::open(config.clone())?);
    db.start().await?;
    tracing::info!(shards = config.shards, port = config.port, "emberdb started");

    server::serve(Arc::clone(&db), config.port).await?;

    db.stop().await?;
    tracing::info!("emberdb stopped");
    Ok(())
}
