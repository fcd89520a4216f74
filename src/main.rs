use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;
use rayon::current_num_threads;
use std::collections::HashMap;

use beadstitch::centroids::CentroidSet;
use beadstitch::output::{write_centroids, write_instances, write_volumes, write_voxels};
use beadstitch::reconcile::{reconcile_labels, ReconcileParams, UnmatchedPolicy};
use beadstitch::repair::{repair_volume_consistency, volume_table, AREA_TOLERANCE};
use beadstitch::schemas::OutputFormat;
use beadstitch::segment::{segment_stack, Connectivity, SegmentParams, ThresholdSegmenter};
use beadstitch::stack::{
    isolate_channel, read_tiff_stack, write_label_stack, write_tiff_stack_u16, ChannelDirectory,
};

#[derive(Parser, Debug)]
#[command(name = "beadstitch")]
#[command(about = "Segment one channel of a microscope stack slice by slice and stitch the slices into 3D objects.")]
struct Args {
    /// Multi-page TIFF export of the stack
    stack: String,

    /// XML metadata dump listing the stack's channels
    metadata: String,

    /// Dye tag of the channel to analyze, e.g. 488
    #[arg(long)]
    tag: String,

    /// Axis order of the TIFF pages, ending in YX
    #[arg(long, default_value = "CZYX")]
    axes: String,

    /// Number of channels, taken from the metadata by default
    #[arg(long, default_value = None)]
    nchannels: Option<usize>,

    #[arg(long, default_value = None)]
    nslices: Option<usize>,

    #[arg(long, default_value_t = 250)]
    min_area: u64,

    #[arg(long, default_value_t = 10000)]
    max_area: u64,

    #[arg(long, default_value_t = 5)]
    blur_size: usize,

    /// Reconcile against two slices in each direction instead of one
    #[arg(long, default_value_t = false)]
    two_layer: bool,

    /// Overrides the variant's default centroid distance, in pixels
    #[arg(long, default_value = None)]
    distance_threshold: Option<f32>,

    /// Erase instances with no counterpart in any neighboring slice
    #[arg(long, default_value_t = false)]
    drop_isolated: bool,

    #[arg(long, default_value_t = AREA_TOLERANCE)]
    repair_tolerance: f64,

    /// Fixed foreground threshold on normalized slices, Otsu's by default
    #[arg(long, default_value = None)]
    threshold: Option<f32>,

    #[arg(long, value_enum, default_value_t = Connectivity::Four)]
    connectivity: Connectivity,

    #[arg(long, default_value = None)]
    output_channel: Option<String>,

    #[arg(long, default_value = None)]
    output_reconciled_labels: Option<String>,

    #[arg(long, default_value = "labels.tif")]
    output_labels: Option<String>,

    #[arg(long, default_value = None)]
    output_instances: Option<String>,

    #[arg(long, default_value = "centroids.csv.gz")]
    output_centroids: Option<String>,

    #[arg(long, default_value = "normalized-centroids.csv.gz")]
    output_normalized_centroids: Option<String>,

    #[arg(long, default_value = "volumes.csv.gz")]
    output_volumes: Option<String>,

    #[arg(long, default_value = None)]
    output_voxels: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Infer)]
    output_fmt: OutputFormat,

    #[arg(short = 't', long, default_value = None)]
    nthreads: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(nthreads) = args.nthreads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(nthreads)
            .build_global()?;
    }
    info!("Using {} threads", current_num_threads());

    let xml = std::fs::read_to_string(&args.metadata)
        .with_context(|| format!("Unable to read metadata '{}'", args.metadata))?;
    let channels = ChannelDirectory::from_metadata_xml(&xml);
    for (tag, name) in channels.iter() {
        info!("Channel {}: {}", tag, name);
    }

    let mut extents = HashMap::new();
    if args.axes.contains('C') {
        extents.insert('C', args.nchannels.unwrap_or(channels.len()));
    }
    if let Some(nslices) = args.nslices {
        extents.insert('Z', nslices);
    }

    let stack = read_tiff_stack(&args.stack, &args.axes, &extents)
        .with_context(|| format!("Unable to read stack '{}'", args.stack))?;
    let volume = isolate_channel(&stack, &args.tag, &channels)?;
    drop(stack);

    if let Some(path) = &args.output_channel {
        write_tiff_stack_u16(path, &volume)?;
    }

    let params = SegmentParams {
        min_area: args.min_area,
        max_area: args.max_area,
        blur_size: args.blur_size,
        ..SegmentParams::default()
    };
    let mut segmenter = ThresholdSegmenter {
        threshold: args.threshold,
        connectivity: args.connectivity,
    };
    let segmented = segment_stack(&volume, &mut segmenter, &params)?;

    if let Some(path) = &args.output_instances {
        write_instances(path, args.output_fmt, &segmented.instances)?;
    }

    let mut reconcile_params = if args.two_layer {
        ReconcileParams::two_layer()
    } else {
        ReconcileParams::adjacent()
    };
    if let Some(distance_threshold) = args.distance_threshold {
        reconcile_params.distance_threshold = distance_threshold;
    }
    if args.drop_isolated {
        reconcile_params.unmatched = UnmatchedPolicy::Drop;
    }

    let reconciled = reconcile_labels(&segmented.labels, &segmented.instances, &reconcile_params);
    if let Some(path) = &args.output_reconciled_labels {
        write_label_stack(path, &reconciled.labels)?;
    }

    let (labels, _repairs) = repair_volume_consistency(&reconciled.labels, args.repair_tolerance);
    if let Some(path) = &args.output_labels {
        write_label_stack(path, &labels)?;
    }

    let centroids = CentroidSet::from_labels(&labels);
    if let Some(path) = &args.output_centroids {
        write_centroids(path, args.output_fmt, &centroids.centroids)?;
    }
    if let Some(path) = &args.output_normalized_centroids {
        write_centroids(path, args.output_fmt, &centroids.normalized)?;
    }

    if let Some(path) = &args.output_volumes {
        write_volumes(path, args.output_fmt, &volume_table(&labels))?;
    }

    if let Some(path) = &args.output_voxels {
        write_voxels(path, args.output_fmt, &labels)?;
    }

    return Ok(());
}
