//! Load generator that drives random GET/SET traffic against a running
//! `kvd` server.
//!
//! Mirrors the reference implementation's `spammer`: mostly GETs against
//! keys it has already created, occasionally a SET that mints a new key.

use std::time::Duration;

use clap::Parser;
use kv_client::{Connection, LoggingDispatcher, RequestIdGenerator};
use kv_protocol::Message;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Random GET/SET load generator for kvd")]
struct Args {
    /// Address of the kvd server to connect to.
    #[clap(long, default_value = "127.0.0.1:9000")]
    addr: String,

    /// Total number of requests to send.
    #[clap(long, default_value_t = 1_000_000)]
    count: u64,

    /// Probability (1 in N) that a given request is a SET rather than a GET.
    #[clap(long, default_value_t = 100)]
    set_one_in: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "load generator exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), kv_client::Error> {
    info!(addr = %args.addr, "connecting");
    let mut conn = Connection::connect(&args.addr).await?;
    info!("connected");

    let mut rng = StdRng::from_entropy();
    let request_ids = RequestIdGenerator::new();
    let mut dispatcher = LoggingDispatcher::default();
    let mut known_keys: Vec<String> = Vec::new();

    for _ in 0..args.count {
        let is_set = rng.gen_range(0..args.set_one_in.max(1)) == 0;
        if is_set {
            let key = generate_test_string(&mut rng, "testKey");
            let value = generate_test_string(&mut rng, "testValue");
            known_keys.push(key.clone());
            conn.send(&Message::Set {
                key: key.into(),
                value: value.into(),
            })
            .await?;
        } else {
            let key = if known_keys.is_empty() {
                generate_test_string(&mut rng, "testKey")
            } else {
                let idx = rng.gen_range(0..known_keys.len());
                known_keys[idx].clone()
            };
            conn.send(&Message::Get {
                key: key.into(),
                request_id: request_ids.next_id(),
            })
            .await?;
            conn.read_responses(&mut dispatcher).await?;
        }
    }

    // Give any trailing GET responses a moment to arrive before exiting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("load generator finished");
    Ok(())
}

fn generate_test_string(rng: &mut StdRng, prefix: &str) -> String {
    let n: u32 = rng.gen_range(1..=100);
    format!("{prefix}{n}")
}
