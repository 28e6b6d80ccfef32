#![doc = include_str!("../README.md")]

use std::{process::exit, sync::Arc};

use clap::Parser;
use tracing::{error, info};

use galena_client::{select_api_version, Database, MemDatabase};
use galena_stack_tester::{args::Args, logging, machine};

fn main() {
    let args = Args::parse();
    logging::init_logging(args.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to build the async runtime");
            exit(1);
        }
    };

    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    let api_version = match select_api_version(args.api_version) {
        Ok(version) => version,
        Err(error) => {
            error!(%error, "unusable API version");
            exit(1);
        }
    };
    if api_version != args.api_version {
        info!(
            requested = args.api_version,
            selected = api_version,
            "API version clamped to the linked client's maximum"
        );
    }

    let db: Arc<dyn Database> = match MemDatabase::open(&args.cluster_file) {
        Ok(db) => Arc::new(db),
        Err(error) => {
            error!(%error, cluster_file = %args.cluster_file.display(), "cluster open failed");
            exit(1);
        }
    };

    machine::spawn_machine(db, args.prefix.into_bytes());
    machine::join_machines().await;
}
