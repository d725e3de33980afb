// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use hfm_blocks::config::{ModelConfig, SolverConfig, Strategy};
use hfm_blocks::core::BlockGrid;
use hfm_blocks::io;
use hfm_blocks::scheduler::{HfmSolver, ProgressInfo};
use hfm_blocks::scheme::{SchemeProvider, DEFAULT_COSMIN2, DEFAULT_RELAX};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelKind {
    Isotropic,
    GridGraph,
    Riemann,
    ReedsShepp,
    Dubins,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Adaptive,
    Global,
}

#[derive(Parser)]
#[command(name = "hfm-blocks", about = "Block-parallel fast marching eikonal solver")]
struct Cli {
    /// TOML configuration file; command-line options override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Grid size, comma-separated (e.g., 256,256 or 64,64,32)
    #[arg(short = 's', long)]
    size: Option<String>,

    /// Tile shape, comma-separated
    #[arg(long)]
    tile: Option<String>,

    /// Grid spacing
    #[arg(long)]
    spacing: Option<f64>,

    /// Metric model
    #[arg(short = 'm', long, value_enum)]
    model: Option<ModelKind>,

    /// Constant dual metric for the riemann model, packed as 00,10,11[,20,21,22]
    #[arg(long)]
    dual_metric: Option<String>,

    /// Per-cell dual metric for the riemann model (.npy, shape = grid shape + [3 or 6])
    #[arg(long)]
    dual_metric_file: Option<PathBuf>,

    /// Curvature scale for the reeds-shepp and dubins models
    #[arg(long)]
    xi: Option<f64>,

    /// Rotation bias for the reeds-shepp and dubins models
    #[arg(long, default_value = "0.0")]
    kappa: f64,

    /// Per-cell curvature scale for curvature models (.npy, shape nx,ny)
    #[arg(long)]
    xi_file: Option<PathBuf>,

    /// Per-cell rotation bias for curvature models (.npy, shape nx,ny)
    #[arg(long)]
    kappa_file: Option<PathBuf>,

    /// Per-cell heading in radians for curvature models (.npy, shape nx,ny)
    #[arg(long)]
    theta_file: Option<PathBuf>,

    /// Seed cell with its value, as comma-separated indices and an optional
    /// "=value" suffix (repeatable, e.g. --seed 0,0 --seed 10,4=2.5)
    #[arg(long, num_args = 1)]
    seed: Vec<String>,

    /// Point source at physical coordinates, spread over --seed-radius (repeatable)
    #[arg(long, num_args = 1)]
    source: Vec<String>,

    /// Radius used to spread --source points; defaults to two grid spacings
    #[arg(long)]
    seed_radius: Option<f64>,

    /// Cost field: "uniform:<val>", "cost-file:<path>", or "speed-file:<path>"
    #[arg(long, default_value = "uniform:1.0")]
    cost: String,

    /// Convergence tolerance
    #[arg(short = 't', long)]
    tolerance: Option<f64>,

    /// Gauss-Seidel sweeps per tile launch
    #[arg(long)]
    iterations: Option<usize>,

    /// Pass budget
    #[arg(long)]
    max_passes: Option<usize>,

    /// Tile scheduling strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Read halo values from a per-pass snapshot
    #[arg(long)]
    strict: bool,

    /// Exit with an error if the solve does not converge
    #[arg(long)]
    raise_on_non_convergence: bool,

    /// Number of Rayon worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Output file path (.npy)
    #[arg(short = 'o', long, default_value = "output.npy")]
    output: PathBuf,

    /// Log progress after every pass
    #[arg(long)]
    progress: bool,
}

fn parse_list<T: std::str::FromStr>(s: &str, what: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.split(',')
        .map(|p| p.trim().parse::<T>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("invalid {}: '{}'", what, s))
}

fn to_array<T: Copy, const N: usize>(v: &[T], what: &str) -> Result<[T; N]> {
    match <[T; N]>::try_from(v) {
        Ok(a) => Ok(a),
        Err(_) => bail!("{} has {} components but the grid has {} axes", what, v.len(), N),
    }
}

fn apply_overrides(cli: &Cli, config: &mut SolverConfig) -> Result<()> {
    if let Some(size) = &cli.size {
        config.grid.shape = parse_list(size, "--size")?;
    }
    if let Some(tile) = &cli.tile {
        config.grid.tile_shape = Some(parse_list(tile, "--tile")?);
    }
    if let Some(h) = cli.spacing {
        config.grid.spacing = h;
    }
    if let Some(tol) = cli.tolerance {
        config.solver.tolerance = tol;
    }
    if let Some(iterations) = cli.iterations {
        config.solver.iterations = iterations;
    }
    if let Some(max_passes) = cli.max_passes {
        config.solver.max_passes = max_passes;
    }
    if let Some(strategy) = cli.strategy {
        config.solver.strategy = match strategy {
            StrategyArg::Adaptive => Strategy::Adaptive,
            StrategyArg::Global => Strategy::Global,
        };
    }
    if cli.strict {
        config.solver.strict_iteration = true;
    }
    if cli.raise_on_non_convergence {
        config.solver.raise_on_non_convergence = true;
    }
    if cli.threads.is_some() {
        config.solver.threads = cli.threads;
    }

    if let Some(kind) = cli.model {
        let xi = || cli.xi.context("--xi is required for curvature models");
        config.model = match kind {
            ModelKind::Isotropic => ModelConfig::Isotropic,
            ModelKind::GridGraph => ModelConfig::GridGraph,
            ModelKind::Riemann => {
                let dual_metric = match (&cli.dual_metric, &cli.dual_metric_file) {
                    (Some(s), _) => parse_list(s, "--dual-metric")?,
                    (None, Some(path)) => load_dual_metric(path, &config.grid.shape)?,
                    (None, None) => bail!("riemann model needs --dual-metric or --dual-metric-file"),
                };
                ModelConfig::Riemann { dual_metric }
            }
            ModelKind::ReedsShepp => ModelConfig::ReedsShepp {
                xi: xi()?,
                kappa: cli.kappa,
                relax: DEFAULT_RELAX,
                cosmin2: DEFAULT_COSMIN2,
                xi_field: load_curvature_field(&cli.xi_file, &config.grid.shape)?,
                kappa_field: load_curvature_field(&cli.kappa_file, &config.grid.shape)?,
                theta_field: load_curvature_field(&cli.theta_file, &config.grid.shape)?,
            },
            ModelKind::Dubins => ModelConfig::Dubins {
                xi: xi()?,
                kappa: cli.kappa,
                relax: DEFAULT_RELAX,
                xi_field: load_curvature_field(&cli.xi_file, &config.grid.shape)?,
                kappa_field: load_curvature_field(&cli.kappa_file, &config.grid.shape)?,
                theta_field: load_curvature_field(&cli.theta_file, &config.grid.shape)?,
            },
        };
    }
    config.validate().context("invalid configuration")?;
    Ok(())
}

fn load_dual_metric(path: &Path, shape: &[usize]) -> Result<Vec<f64>> {
    let sym = shape.len() * (shape.len() + 1) / 2;
    let mut full = shape.to_vec();
    full.push(sym);
    io::load_npy_field(path, &full)
        .with_context(|| format!("cannot read dual metric from {}", path.display()))
}

fn load_curvature_field(path: &Option<PathBuf>, shape: &[usize]) -> Result<Option<Vec<f64>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if shape.len() != 3 {
        bail!("curvature models need a grid with three axes, got {:?}", shape);
    }
    io::load_npy_field(path, &shape[..2])
        .map(Some)
        .with_context(|| format!("cannot read curvature field from {}", path.display()))
}

fn build_cost_field(mode: &str, shape: &[usize]) -> Result<Vec<f64>> {
    if let Some(val_str) = mode.strip_prefix("uniform:") {
        let val: f64 = val_str.parse().context("invalid uniform cost value")?;
        if val.is_nan() || val < 0.0 {
            bail!("uniform cost must be nonnegative, got {}", val);
        }
        let num: usize = shape.iter().product();
        return Ok(vec![val; num]);
    }

    if let Some(path_str) = mode.strip_prefix("cost-file:") {
        return io::load_cost(Path::new(path_str), shape)
            .with_context(|| format!("cannot read cost field from {}", path_str));
    }

    if let Some(path_str) = mode.strip_prefix("speed-file:") {
        return io::load_speed_as_cost(Path::new(path_str), shape)
            .with_context(|| format!("cannot read speed field from {}", path_str));
    }

    bail!(
        "unknown --cost mode: '{}'. Expected 'uniform:<val>', 'cost-file:<path>', \
         or 'speed-file:<path>'",
        mode
    );
}

fn run<const N: usize>(
    cli: &Cli,
    config: &SolverConfig,
    cost: Vec<f64>,
    scheme: Arc<dyn SchemeProvider<N>>,
) -> Result<()> {
    let shape: [usize; N] = config.shape()?;
    let mut grid = BlockGrid::<N>::new(shape, config.grid.spacing, cost)?
        .with_periodic(config.periodic()?);
    if let Some(tile) = config.tile_shape::<N>()? {
        grid = grid.with_tile_shape(tile)?;
    }

    let mut solver = HfmSolver::from_config(grid, scheme, &config.solver)?;

    for seed in &cli.seed {
        let (index_str, value) = match seed.split_once('=') {
            Some((idx, val)) => (
                idx,
                val.trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid seed value in '{}'", seed))?,
            ),
            None => (seed.as_str(), 0.0),
        };
        let index: Vec<usize> = parse_list(index_str, "--seed")?;
        solver.add_seed(to_array(&index, "--seed")?, value)?;
    }

    let radius = cli.seed_radius.unwrap_or(2.0 * config.grid.spacing);
    for source in &cli.source {
        let coord: Vec<f64> = parse_list(source, "--source")?;
        solver.add_seed_radius(to_array(&coord, "--source")?, radius)?;
    }

    let progress_cb = |info: ProgressInfo| {
        info!(
            "[{:.1}s] pass={} tiles_processed={} active={}",
            info.elapsed.as_secs_f64(),
            info.pass,
            info.tiles_processed,
            info.active_list_size,
        );
    };
    let report = if cli.progress {
        solver.solve(Some(&progress_cb))?
    } else {
        solver.solve(None)?
    };
    info!(
        "passes={} tiles_processed={} converged={} elapsed={:.3?}",
        report.passes, report.tiles_processed, report.converged, report.elapsed
    );

    solver
        .save(&cli.output)
        .with_context(|| format!("cannot write {}", cli.output.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SolverConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => SolverConfig::default(),
    };
    apply_overrides(&cli, &mut config)?;

    if cli.seed.is_empty() && cli.source.is_empty() {
        bail!("at least one --seed or --source must be specified");
    }

    let cost = build_cost_field(&cli.cost, &config.grid.shape)?;

    match config.grid.shape.len() {
        2 => run::<2>(&cli, &config, cost, config.scheme_2d()?),
        3 => run::<3>(&cli, &config, cost, config.scheme_3d()?),
        n => bail!("grid must have 2 or 3 axes, got {}", n),
    }
}
