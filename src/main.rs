use anyhow::{Context, Result};
use clap::Parser;

use hirecs::cluster;
use hirecs::config::ClusterOptions;
use hirecs::hig::parse_hig;
use hirecs::output::{render, OutputFormat};

#[derive(Parser, Debug)]
#[clap(
    name = "hirecs",
    about = "High-resolution hierarchical clustering of an adjacency-list graph"
)]
struct Cli {
    /// Output data format: t (log text), c (CSV-like), j (JSON),
    /// je (JSON + leaf unwrap), jd (je + inter-cluster links per level)
    #[clap(short = 'o', default_value = "t")]
    output: OutputFormat,

    /// Clean links: skip link validation, trust the caller
    #[clap(short = 'c')]
    clean: bool,

    /// Fast quasi-mutual clustering; default is strictly-mutual
    #[clap(short = 'f')]
    fast: bool,

    /// Randomly reorder (shuffle) nodes and links during construction
    #[clap(short = 'r')]
    reorder: bool,

    /// Modularity profit margin for early exit, in [-1, 1];
    /// exactly -1 also skips per-pass tracing
    #[clap(short = 'm', default_value_t = -0.999, allow_hyphen_values = true)]
    margin: f64,

    /// Input adjacency file (.hig)
    input: String,

    /// Verbose logging
    #[clap(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Input: {}", args.input);

    // 1. Parse the adjacency file into a graph builder
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input))?;
    let mut graph = parse_hig(&text, args.reorder, None)?;
    let symmetric = !graph.directed();
    let nodes = graph.finalize()?;

    log::info!(
        "Loaded graph with {} nodes ({})",
        nodes.len(),
        if symmetric { "undirected" } else { "directed" }
    );

    // 2. Run the clustering engine
    let options = ClusterOptions {
        symmetric,
        validate: !args.clean,
        fast: args.fast,
        mod_profit_margin: args.margin,
    };
    let mut hier = cluster(nodes, &options)?;

    log::info!(
        "Found {} clusters over {} levels, {} roots, modularity {:.6}",
        hier.clusters().len(),
        hier.level_count(),
        hier.root().len(),
        hier.score().modularity
    );

    // 3. Render the hierarchy
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render(&mut hier, args.output, &mut out)?;

    Ok(())
}
