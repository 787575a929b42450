//! The `hermit-proxy` binary: parses CLI flags, loads configuration and a
//! prior snapshot, starts the proxy, and persists the snapshot on shutdown.

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use hermit_proxy::{
    blob::{FsBlobStore, LruBlobStore},
    ca::CertificateAuthority,
    config,
    connect::ProxyState,
    rules::RuleSet,
    server::{self, Bind, RunConfig},
    snapshot::Snapshot,
    snapshotter::Snapshotter,
};

const BLOB_LRU_CAPACITY: usize = 4096;
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Intercepting, snapshotting forward proxy for hermetic container-image
/// builds.
#[derive(Parser, Debug)]
#[command(name = "hermit-proxy", version, about)]
struct Args {
    /// Bind a local-only UNIX socket instead of TCP.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// TCP address to listen on when `--socket` is not given.
    #[arg(long, default_value = "0.0.0.0:3128")]
    addr: String,

    /// Path to the rule configuration file. Absent means an empty rule set.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enforce the implicit hermetic profile (`[{".*": LOCKED}]`),
    /// overriding `--config`.
    #[arg(long)]
    hermetic: bool,

    /// Snapshot to load at startup (a file or a directory of files).
    #[arg(long = "index-in")]
    index_in: Option<PathBuf>,

    /// Snapshot to persist on shutdown.
    #[arg(long = "index-out")]
    index_out: Option<PathBuf>,

    /// Persist the full snapshot map on shutdown instead of only the
    /// fingerprints touched this run.
    #[arg(long)]
    snapshot_full: bool,

    /// Directory backing the filesystem blob store.
    #[arg(long, default_value = "blobs")]
    blob_dir: PathBuf,

    /// Whether request fingerprints include the query string.
    #[arg(long, default_value_t = true)]
    include_query: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hermit_proxy::tracing::init_tracing();

    let args = Args::parse();

    let rules = if args.hermetic {
        RuleSet::hermetic()
    } else {
        match &args.config {
            Some(path) => config::load_config_file(path)?,
            None => RuleSet::default(),
        }
    };

    let snapshot = match &args.index_in {
        Some(path) => Snapshot::load(path)?,
        None => Snapshot::new(),
    };

    let ca = CertificateAuthority::generate()?;
    let blobs: hermit_proxy::blob::SharedBlobStore =
        Arc::new(LruBlobStore::new(FsBlobStore::new(&args.blob_dir), BLOB_LRU_CAPACITY));
    let snapshotter = Snapshotter::new(snapshot, blobs, args.include_query);

    let state = Arc::new(ProxyState { ca, rules, snapshotter });

    let bind = match args.socket {
        Some(path) => Bind::Unix(path),
        None => Bind::Tcp(args.addr.parse().map_err(|e| anyhow::anyhow!("invalid --addr {}: {e}", args.addr))?),
    };

    server::run(
        state,
        RunConfig {
            bind,
            index_out: args.index_out,
            snapshot_full: args.snapshot_full,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        },
    )
    .await
}
