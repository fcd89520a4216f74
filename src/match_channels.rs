use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use rayon::current_num_threads;

use beadstitch::centroids::CentroidMap;
use beadstitch::input::read_centroids;
use beadstitch::matching::{filter_labels, match_channels, mean_shift, MatchParams, NCHANNELS};
use beadstitch::output::{write_centroids, write_matches};
use beadstitch::schemas::OutputFormat;
use beadstitch::stack::{read_label_stack, write_label_stack};

#[derive(Parser, Debug)]
#[command(name = "beadstitch-match")]
#[command(about = "Keep only objects that appear in all three channels, matched by nearest normalized centroid.")]
struct Args {
    /// Centroid tables (label, z, y, x), one per channel
    #[arg(num_args = 3, required = true)]
    centroids: Vec<String>,

    /// Channel names used in output file and column names
    #[arg(long, value_delimiter = ',', default_value = "a,b,c")]
    names: Vec<String>,

    #[arg(long, default_value_t = 0.1)]
    distance_threshold: f32,

    /// Per-axis weights applied before measuring distance, as z,y,x
    #[arg(long, value_delimiter = ',', default_value = "1,1,1")]
    weights: Vec<f32>,

    /// Label TIFFs, one per channel, to filter down to retained objects
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    #[arg(long, default_value = "")]
    output_prefix: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,
}

fn table_extension(fmt: OutputFormat) -> &'static str {
    match fmt {
        OutputFormat::Csv => "csv",
        OutputFormat::CsvGz | OutputFormat::Infer => "csv.gz",
        OutputFormat::Parquet => "parquet",
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.names.len() != NCHANNELS {
        bail!("--names needs {} names, got {}", NCHANNELS, args.names.len());
    }
    if args.weights.len() != 3 {
        bail!("--weights needs 3 values (z,y,x), got {}", args.weights.len());
    }
    if !args.labels.is_empty() && args.labels.len() != NCHANNELS {
        bail!("--labels needs {} label stacks, got {}", NCHANNELS, args.labels.len());
    }

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()?;
    }
    info!("Using {} threads", current_num_threads());

    let mut maps: [CentroidMap; NCHANNELS] = Default::default();
    for (map, filename) in maps.iter_mut().zip(args.centroids.iter()) {
        *map = read_centroids(filename, OutputFormat::Infer)
            .with_context(|| format!("Unable to read centroids from '{}'", filename))?;
    }

    let params = MatchParams {
        distance_threshold: args.distance_threshold,
        weights: [args.weights[0], args.weights[1], args.weights[2]],
    };
    let result = match_channels(&maps, &params);

    if result.matches.is_empty() {
        warn!("No object was found in all three channels");
    }

    for from in 0..NCHANNELS {
        for to in (from + 1)..NCHANNELS {
            if let Some(shift) = mean_shift(&maps, &result, from, to) {
                info!(
                    "Mean shift {} -> {}: z {:.4}, y {:.4}, x {:.4}",
                    args.names[from], args.names[to], shift[0], shift[1], shift[2]
                );
            }
        }
    }

    let ext = table_extension(args.output_fmt);
    for (name, retained) in args.names.iter().zip(result.retained.iter()) {
        let filename = format!("{}{}-centroids.{}", args.output_prefix, name, ext);
        write_centroids(&filename, args.output_fmt, retained)?;
    }

    let filename = format!("{}matches.{}", args.output_prefix, ext);
    write_matches(&filename, args.output_fmt, &args.names, &result.matches)?;

    for ((name, path), retained) in args.names.iter().zip(args.labels.iter()).zip(result.retained.iter()) {
        let labels = read_label_stack(path)
            .with_context(|| format!("Unable to read labels from '{}'", path))?;
        let filtered = filter_labels(&labels, retained);
        let filename = format!("{}{}-labels.tif", args.output_prefix, name);
        write_label_stack(&filename, &filtered)?;
    }

    return Ok(());
}
