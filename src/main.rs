#![allow(clippy::format_collect)]

#[macro_use]
extern crate log;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use expanduser::expanduser;

use crate::abort::EnsureAbort;
use crate::blacklist::Blacklist;
use crate::config::Config;
use crate::dht::DhtEngine;
use crate::hex::from_hex;
use crate::intake::Intake;
use crate::metadata::WorkerPool;
use crate::model::{Clock, PeerSource, SystemClock};
use crate::persist::PersistState;
use crate::queue::WorkQueue;
use crate::ratelimit::RateLimiter;
use crate::routing::RoutingTable;
use crate::sink::{LoggingSink, Sink};
use crate::stats::{Stats, StatsTicker};
use crate::types::{InfoHash, NodeId};

mod abort;
mod bencode;
mod blacklist;
mod config;
mod dht;
mod extension;
mod feature;
mod hex;
mod intake;
mod message;
mod metadata;
mod metainfo;
mod model;
mod peer_metainfo;
mod persist;
mod piece;
mod queue;
mod ratelimit;
mod routing;
mod sink;
mod stats;
mod types;

/// Parsed command-line surface (spec.md 6). `--user`/`--password`/
/// `--database`/`--server`/`--port` describe an external Sink this core
/// doesn't implement; they're accepted and validated so a misconfigured
/// launch fails fast with exit code 1, same as the teacher's handling of
/// a malformed magnet/torrent argument.
struct Args {
    user: String,
    database: String,
    server: String,
    port: u16,
    queries: Option<u64>,
    metadata: Option<String>,
    workers: Option<usize>,
    no_bep51: bool,
    sequential: bool,
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next().with_context(|| format!("{flag} expects a value"))
}

fn parse_args() -> Result<Args> {
    let mut user = None;
    let mut password = None;
    let mut database = None;
    let mut server = "localhost".to_string();
    let mut port = 5432u16;
    let mut queries = None;
    let mut metadata = None;
    let mut workers = None;
    let mut no_bep51 = false;
    let mut sequential = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--user" => user = Some(next_value(&mut args, "--user")?),
            "--password" => password = Some(next_value(&mut args, "--password")?),
            "--database" => database = Some(next_value(&mut args, "--database")?),
            "--server" => server = next_value(&mut args, "--server")?,
            "--port" => port = next_value(&mut args, "--port")?.parse().context("--port expects a number")?,
            "--queries" => queries = Some(next_value(&mut args, "--queries")?.parse().context("--queries expects a number")?),
            "--metadata" => metadata = Some(next_value(&mut args, "--metadata")?),
            "--workers" => workers = Some(next_value(&mut args, "--workers")?.parse().context("--workers expects a number")?),
            "--no-bep51" => no_bep51 = true,
            "--sequential" => sequential = true,
            other => bail!("unrecognized argument: {other}"),
        }
    }

    let user = user.context("--user is required")?;
    let _password = password.context("--password is required")?;
    let database = database.context("--database is required")?;
    ensure!(!user.is_empty(), "--user must not be empty");
    ensure!(!database.is_empty(), "--database must not be empty");

    Ok(Args {
        user,
        database,
        server,
        port,
        queries,
        metadata,
        workers,
        no_bep51,
        sequential,
    })
}

fn main() {
    if let Err(e) = try_main() {
        error!("{e:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    let args = parse_args()?;
    debug!("sink configured for {}@{}:{}/{}", args.user, args.server, args.port, args.database);

    let mut config = Config::default();
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.sequential {
        config.workers = 1;
    }
    if args.no_bep51 {
        config.bep51_enabled = false;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().context("build tokio runtime")?;
    runtime.block_on(run(config, args))
}

async fn run(config: Config, args: Args) -> Result<()> {
    let state_path = expanduser("~/.local/state/dhtcrawl/state.json")?;
    let mut persisted = PersistState::load(&state_path).unwrap_or_else(|_| PersistState::fresh(state_path.clone(), crate::metadata::generate_peer_id()));
    let node_id = NodeId::new(persisted.node_id);

    // A real relational Sink is outside this crate's scope (spec.md 1); the
    // LoggingSink stands in as the default harness implementation.
    let sink: Arc<dyn Sink> = Arc::new(LoggingSink);
    let stats = Arc::new(Stats::new());
    let routing = Arc::new(RoutingTable::new(node_id, config.routing));
    for hint in &persisted.hints {
        routing.insert(NodeId::new(hint.id), hint.addr, Instant::now());
    }
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit, Instant::now()));
    let queue = Arc::new(WorkQueue::new(config.queue_capacity));
    let intake = Arc::new(Intake::new(Arc::clone(&queue), Arc::clone(&sink), Arc::clone(&stats)));
    let blacklist = Arc::new(Blacklist::new(config.blacklist));

    let dht = Arc::new(
        DhtEngine::bind(
            config.listen_port,
            node_id,
            Arc::clone(&routing),
            Arc::clone(&rate_limiter),
            Arc::clone(&intake),
            Arc::clone(&sink),
            Arc::clone(&stats),
            config.bep51_enabled,
        )
        .await
        .context("bind dht engine")?,
    );

    // spec.md 6: `--metadata` is "metadata-only mode -- skip discovery,
    // fetch only listed hashes", so bootstrap, the DHT reactor, and the
    // sampling tick below are all gated on discovery actually being wanted.
    let discovery_enabled = args.metadata.is_none();

    if discovery_enabled {
        info!("bootstrapping from {} routers, node_id={:?}", config.bootstrap_nodes.len(), node_id);
        let bootstrap_deadline = Instant::now() + config.bootstrap_wait;
        dht.bootstrap(&config.bootstrap_nodes).await?;
        while routing.is_empty() && Instant::now() < bootstrap_deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        info!("bootstrap settled with {} known nodes", routing.len());
    } else {
        info!("--metadata given: skipping DHT bootstrap/discovery");
    }

    let dht_reactor = discovery_enabled.then(|| {
        let dht = Arc::clone(&dht);
        tokio::spawn(async move {
            if let Err(e) = dht.run().await {
                error!("dht reactor stopped: {e:#}");
            }
        })
    });

    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&dht),
        Arc::clone(&sink),
        Arc::clone(&stats),
        Arc::clone(&blacklist),
        config.clone(),
    ));
    let workers = pool.spawn();

    if let Some(spec) = &args.metadata {
        seed_metadata_targets(spec, &intake)?;
    }

    let maintenance = {
        let dht = Arc::clone(&dht);
        let routing = Arc::clone(&routing);
        let blacklist = Arc::clone(&blacklist);
        let stats = Arc::clone(&stats);
        let sink = Arc::clone(&sink);
        let config = config.clone();
        tokio::spawn(async move {
            let clock = SystemClock;
            let ticker = StatsTicker::new(config.stats_interval, clock.now());
            let mut interval = tokio::time::interval(config.maintenance_interval);
            loop {
                interval.tick().await;
                let now = clock.now();
                dht.expire_transactions(now);
                blacklist.sweep(now);
                for id in routing.needs_ping(now) {
                    if let Some(node) = routing.get(&id) {
                        if let Err(e) = dht.send_ping(node.endpoint, id).await {
                            trace!("ping to {:?} failed: {:#}", id, e);
                        }
                    }
                }
                if discovery_enabled {
                    if let Err(e) = dht.sample_tick().await {
                        let _ = sink.record_error(crate::model::ErrorKind::Network, &format!("sample tick failed: {e:#}"));
                    }
                }
                if ticker.due(now) {
                    info!("{}", stats.snapshot(routing.len() as u64).log_line());
                }
            }
        })
    };

    let queries_cap = args.queries;
    let stop_on_query_cap = {
        let stats = Arc::clone(&stats);
        let pool = Arc::clone(&pool);
        async move {
            let Some(cap) = queries_cap else {
                return std::future::pending::<()>().await;
            };
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if stats.snapshot(0).queries_sent >= cap {
                    info!("reached --queries cap of {cap}, requesting shutdown");
                    pool.request_shutdown();
                    return;
                }
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, draining worker pool");
        }
        _ = stop_on_query_cap => {}
    }

    // spec.md 5: stop sampling immediately, but keep the DHT reactor alive
    // so it can keep serving responses to in-flight replies while workers
    // drain; only the reactor itself is torn down once they're done.
    pool.request_shutdown();
    maintenance.ensure_abort();
    for handle in workers {
        let _ = handle.await;
    }
    dht_reactor.ensure_abort();

    let _ = sink.flush();
    persisted.capture_hints(&routing, 64);
    persisted.save().context("persist crawler state on shutdown")?;

    Ok(())
}

/// `--metadata HASHES|FILE`: a comma-separated list of hex infohashes, or
/// a path to a file containing one hex infohash per line. Each is fed
/// straight to Intake with `PeerSource::Manual` so the worker pool picks
/// it up without waiting on DHT discovery.
fn seed_metadata_targets(spec: &str, intake: &Intake) -> Result<()> {
    let path = std::path::Path::new(spec);
    let lines: Vec<String> = if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading --metadata file {spec}"))?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    } else {
        spec.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    };

    ensure!(!lines.is_empty(), "--metadata did not resolve to any infohash");
    let now = Instant::now();
    for line in lines {
        let bytes = from_hex(&line).with_context(|| format!("invalid infohash `{line}`"))?;
        let info_hash = InfoHash::try_from(bytes.as_slice())?;
        intake.observe(info_hash, PeerSource::Manual, None, now);
    }
    Ok(())
}
