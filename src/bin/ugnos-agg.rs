//! Local evaluator for aggregate calls over sharded point data.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`UGNOS_AGG_*`), and CLI flags. Reads one call and a set of shards, runs the map side over
//! every shard on a thread pool, reduces the partials, and prints the result as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use config::{Config, Environment, File};
use rayon::prelude::*;
use serde::Deserialize;
use ugnos_mapreduce::registry::DEFAULT_MAX_TOP_LIMIT;
use ugnos_mapreduce::telemetry::noop_event_listener;
use ugnos_mapreduce::{
    Call, FunctionRegistry, MapOutput, MemoryIterator, Point, RegistryConfig, Timestamp,
};

// ---------- CLI ----------

/// Evaluate a map/reduce aggregate over shards of points.
#[derive(Parser, Debug)]
#[command(name = "ugnos-agg", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `ugnos-agg.toml` is loaded when it exists.
    #[arg(long, env = "UGNOS_AGG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    /// Load and validate config (file + env + CLI), print the effective values, then exit.
    #[arg(long, default_value_t = false)]
    pub validate_config: bool,

    /// JSON file holding the call, e.g. `{"name":"mean","args":[{"var_ref":"value"}]}`.
    #[arg(long, required_unless_present = "validate_config")]
    pub call: Option<PathBuf>,

    /// JSON file holding the shards: `[{"window_floor": null, "points": [...]}, ...]`.
    #[arg(long, required_unless_present = "validate_config")]
    pub shards: Option<PathBuf>,

    /// Override the largest `N` accepted by top/bottom.
    #[arg(long)]
    pub max_top_limit: Option<usize>,

    /// Worker threads for the map phase (0 = one per core).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Pretty-print the JSON result.
    #[arg(long, default_value_t = false)]
    pub pretty: bool,
}

// ---------- File/env config (all optional for partial config) ----------

/// Config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, Deserialize)]
pub struct AggFileConfig {
    pub max_top_limit: Option<usize>,
    pub threads: Option<usize>,
    pub pretty: Option<bool>,
}

/// Effective options after layering.
#[derive(Debug, Clone, PartialEq)]
pub struct AggOptions {
    pub max_top_limit: usize,
    pub threads: usize,
    pub pretty: bool,
}

impl Default for AggOptions {
    fn default() -> Self {
        Self {
            max_top_limit: DEFAULT_MAX_TOP_LIMIT,
            threads: 0,
            pretty: false,
        }
    }
}

/// One shard as read from the shards file.
#[derive(Debug, Deserialize)]
struct ShardInput {
    #[serde(default)]
    window_floor: Option<Timestamp>,
    #[serde(default)]
    points: Vec<Point>,
}

/// Load merged options. CLI overrides env, env overrides file.
fn load_options(cli: &Cli) -> Result<AggOptions, String> {
    let mut builder = Config::builder();

    if !cli.no_config {
        if let Some(ref path) = cli.config {
            if !path.exists() {
                return Err(format!("config file not found: {}", path.display()));
            }
            builder = builder.add_source(File::from(path.as_path()).required(false));
        } else {
            let default_path = PathBuf::from("ugnos-agg.toml");
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path.as_path()).required(false));
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("UGNOS_AGG")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder.build().map_err(|e| e.to_string())?;
    let partial: AggFileConfig = merged.try_deserialize().map_err(|e| e.to_string())?;

    let mut options = AggOptions::default();
    if let Some(n) = partial.max_top_limit {
        options.max_top_limit = n;
    }
    if let Some(n) = partial.threads {
        options.threads = n;
    }
    if let Some(b) = partial.pretty {
        options.pretty = b;
    }

    if let Some(n) = cli.max_top_limit {
        options.max_top_limit = n;
    }
    if let Some(n) = cli.threads {
        options.threads = n;
    }
    if cli.pretty {
        options.pretty = true;
    }

    if options.max_top_limit == 0 {
        return Err("max_top_limit must be at least 1".to_string());
    }
    Ok(options)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, what: &str) -> Result<T, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {} file {}: {}", what, path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid {} file {}: {}", what, path.display(), e))
}

/// Resolves the call, maps every shard in parallel, reduces, and renders the result.
fn evaluate(options: &AggOptions, call: &Call, shards: Vec<ShardInput>) -> Result<String, String> {
    let registry = FunctionRegistry::with_config(RegistryConfig {
        max_top_limit: options.max_top_limit,
        event_listener: noop_event_listener(),
    })
    .map_err(|e| e.to_string())?;
    let map = Arc::new(registry.initialize_map_func(call).map_err(|e| e.to_string())?);
    let reduce = registry.initialize_reduce_func(call).map_err(|e| e.to_string())?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .build()
        .map_err(|e| format!("failed to build thread pool: {}", e))?;

    let partials: Vec<Option<MapOutput>> = pool.install(|| {
        shards
            .into_par_iter()
            .map(|shard| {
                let mut itr = MemoryIterator::new(shard.points);
                if let Some(floor) = shard.window_floor {
                    itr = itr.with_window_floor(floor);
                }
                map.run(&mut itr)
            })
            .collect()
    });

    let result = reduce.run(&partials).map_err(|e| e.to_string())?;
    let body = serde_json::json!({
        "call": call.to_string(),
        "result": result,
    });
    let rendered = if options.pretty {
        serde_json::to_string_pretty(&body)
    } else {
        serde_json::to_string(&body)
    };
    rendered.map_err(|e| format!("cannot render result: {}", e))
}

// ---------- Main ----------

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let options = load_options(&cli).map_err(|e| {
        eprintln!("config error: {}", e);
        e
    })?;

    if cli.validate_config {
        println!("max_top_limit={}", options.max_top_limit);
        println!("threads={}", options.threads);
        println!("pretty={}", options.pretty);
        return Ok(());
    }

    let (Some(call_path), Some(shards_path)) = (cli.call.as_deref(), cli.shards.as_deref()) else {
        eprintln!("input error: --call and --shards are required");
        return Err("missing input".into());
    };

    let inputs = read_json::<Call>(call_path, "call").and_then(|call| {
        read_json::<Vec<ShardInput>>(shards_path, "shards").map(|shards| (call, shards))
    });
    let (call, shards) = inputs.map_err(|e| {
        eprintln!("input error: {}", e);
        e
    })?;

    let rendered = evaluate(&options, &call, shards).map_err(|e| {
        eprintln!("evaluation failed: {}", e);
        e
    })?;
    println!("{}", rendered);
    Ok(())
}
