//! Tile export utility.
//!
//! Builds an octree from a point file (a flat JSON array `[x0, y0, z0, ...]`)
//! or a synthetic sphere and writes `octree_metadata.json` plus one tile
//! document per node, the layout `JsonDirTileProvider` serves.

use std::path::PathBuf;
use std::time::Instant;

use glam::Vec3;

use sdf_labeler_engine::core::{EngineConfig, logging};
use sdf_labeler_engine::points::PointSet;
use sdf_labeler_engine::streaming::{JsonDirTileProvider, OctreeBuilder};

const DEFAULT_OUTPUT_DIR: &str = "tiles";
const DEFAULT_SYNTHETIC_POINTS: usize = 200_000;

#[derive(Debug)]
struct Args {
    input: Option<PathBuf>,
    output_dir: PathBuf,
    config: Option<PathBuf>,
    synthetic: usize,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);

    let mut input = None;
    let mut output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
    let mut config = None;
    let mut synthetic = DEFAULT_SYNTHETIC_POINTS;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" | "--input" => input = args.next().map(PathBuf::from),
            "-o" | "--output-dir" => {
                if let Some(v) = args.next() {
                    output_dir = PathBuf::from(v);
                }
            }
            "-c" | "--config" => config = args.next().map(PathBuf::from),
            "-n" | "--synthetic" => {
                if let Some(v) = args.next() {
                    synthetic = v.parse().map_err(|e| format!("--synthetic {v}: {e}"))?;
                }
            }
            "-h" | "--help" | "help" => return Err("show_help".to_string()),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Args {
        input,
        output_dir,
        config,
        synthetic,
    })
}

fn print_help() {
    println!("Tile Export Utility");
    println!("===================");
    println!();
    println!("Usage: build_tiles [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -i, --input <FILE>       Flat JSON array of xyz coordinates");
    println!("  -o, --output-dir <DIR>   Output directory (default: tiles)");
    println!("  -c, --config <FILE>      Engine config JSON (builder section is used)");
    println!("  -n, --synthetic <N>      Points on a synthetic sphere when no input (default: 200000)");
    println!();
    println!("Environment:");
    println!("  SDF_LABELER_OCTREE_NODE_TARGET, SDF_LABELER_OCTREE_MAX_DEPTH, RUST_LOG");
}

/// Points spread evenly over a unit sphere
fn fibonacci_sphere(n: usize) -> PointSet {
    let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    let positions: Vec<Vec3> = (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden * i as f32;
            Vec3::new(r * theta.cos(), y, r * theta.sin())
        })
        .collect();
    PointSet::new(positions)
}

fn load_points(args: &Args) -> Result<PointSet, String> {
    match &args.input {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("{}: {e}", path.display()))?;
            let coords: Vec<f32> =
                serde_json::from_str(&text).map_err(|e| format!("{}: {e}", path.display()))?;
            if coords.len() % 3 != 0 {
                log::warn!("{} coordinates is not a multiple of 3, ignoring the tail", coords.len());
            }
            Ok(PointSet::from_flat(&coords))
        }
        None => Ok(fibonacci_sphere(args.synthetic)),
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = EngineConfig::load(args.config.as_deref()).map_err(|e| e.to_string())?;
    let points = load_points(&args)?;
    log::info!("Loaded {} points", points.len());

    let start = Instant::now();
    let built = OctreeBuilder::new(config.builder).build(&points);
    log::info!(
        "Octree built in {:.2?}: {} nodes, depth {}",
        start.elapsed(),
        built.metadata.node_count,
        built.metadata.max_depth
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;
    runtime
        .block_on(JsonDirTileProvider::export(args.output_dir.clone(), &built))
        .map_err(|e| e.to_string())?;

    println!(
        "Wrote {} tiles to {}",
        built.tiles.len(),
        args.output_dir.display()
    );
    Ok(())
}

fn main() {
    logging::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) if e == "show_help" => {
            print_help();
            return;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
