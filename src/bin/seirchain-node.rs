#![forbid(unsafe_code)]
use clap::Parser;
use colored::*;
use rand::Rng;
use seirchain::config::load_config;
use seirchain::contract::FractalContractEngine;
use seirchain::geometry::Coordinate;
use seirchain::wallet::{verify_transaction, Wallet};
use seirchain::SeirChainCoordinator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Run a local SeirChain node", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "seirchain.toml")]
    config: PathBuf,

    /// Number of mining rounds to run. Once the root is final it stays
    /// final, so later rounds only mine content that can still commit
    #[arg(short, long, default_value_t = 1)]
    rounds: u32,

    /// Signed demo transfers to scatter across the gasket before the first round
    #[arg(long, default_value_t = 0)]
    demo_txs: u32,

    /// Deepest level demo transactions are placed at
    #[arg(long, default_value_t = 3)]
    demo_depth: u32,

    /// Deploy a demo contract at the root before mining
    #[arg(long)]
    demo_contract: bool,

    /// Override the miner thread count
    #[arg(long)]
    threads: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    let mut config = load_config(&cli.config)?;
    if let Some(threads) = cli.threads {
        config.miner.threads = threads;
    }
    let demo_depth = cli.demo_depth.min(config.ledger.max_level);

    println!("{}", "SeirChain node".bright_cyan().bold());
    println!("{}", "--------------".bright_cyan());
    println!(
        "max level {} | base difficulty {} | {} miners",
        config.ledger.max_level.to_string().bright_white(),
        config.miner.base_difficulty.to_string().bright_white(),
        config.miner.threads.to_string().bright_white()
    );

    let coordinator = SeirChainCoordinator::new(config)?;
    let sync = coordinator.start()?;

    if cli.demo_contract {
        let engine = FractalContractEngine::new(Arc::clone(coordinator.ledger()));
        engine.deploy(b"\x60\x00\x60\x00", Coordinate::root())?;
        engine.call(Coordinate::root(), "init", Vec::new())?;
    }

    let mut wallet = Wallet::new();
    let keys = [wallet.generate_key(), wallet.generate_key()];

    for i in 0..cli.demo_txs {
        let coord = random_cell(demo_depth);
        let mut tx = wallet.craft_tx(&format!("demo-{}", i), u64::from(i) + 1, coord);
        for key in keys {
            wallet.add_signature(&mut tx, key)?;
        }
        verify_transaction(&tx)?;
        coordinator.submit(tx, coord)?;
    }

    for round in 1..=cli.rounds {
        let report = coordinator.run_round()?;
        info!(round, jobs = report.jobs, "node.round");

        let status = if report.root_final {
            "FINAL".bright_green().bold()
        } else {
            "PENDING".yellow().bold()
        };
        println!();
        println!("{} {}", format!("Round {}", round).bright_cyan().underline(), status);
        println!("  levels walked   {}", report.levels);
        println!("  jobs            {}", report.jobs);
        println!("  proofs found    {}", report.found.len());
        println!("  accepted        {}", report.accepted.to_string().green());
        println!("  rejected        {}", report.rejected.to_string().red());
        println!("  superseded      {}", report.superseded);
        println!("  shards pruned   {}", report.pruned);
        println!("  elapsed         {:?}", report.elapsed);
    }

    sync.stop()?;

    let stats = coordinator.consensus().stats();
    let ledger = coordinator.ledger();
    println!();
    println!("{}", "Summary".bright_green().underline());
    println!("  transactions    {}", ledger.transaction_count());
    println!(
        "  at root         {}",
        ledger.committed_transactions(&Coordinate::root()).len()
    );
    println!("  commits         {}", stats.commits);
    println!("  reconciliations {}", stats.reconciliations);
    println!("  nonces tried    {}", coordinator.total_attempts());
    Ok(())
}

/// Walk down from the root, picking one of the three children per level.
fn random_cell(depth: u32) -> Coordinate {
    let mut rng = rand::thread_rng();
    let mut coord = Coordinate::root();
    for _ in 0..depth {
        match coord.children() {
            Some(children) => coord = children[rng.gen_range(0..3)],
            None => break,
        }
    }
    coord
}
