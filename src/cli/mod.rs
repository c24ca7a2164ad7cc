//! Command-line interface for the grain tracking pipeline.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders;
use crate::core::writers;
use crate::processors::slip_bands::SlipTraceTable;
use crate::reader::{self, LayerArray, ReaderKind};
use crate::widgets::{GrainPlots, ImageLayer, LabelsLayer};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "grain-tracks")]
#[command(about = "Grain tracking and slip-band analysis for DIC/EBSD datasets", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link grain centroids across frames into tracks
    Track {
        /// Label grid CSVs (one per frame), a directory of them, or a dataset descriptor
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output tracks CSV
        #[arg(short, long, default_value = "tracks.csv")]
        output: PathBuf,
        /// Maximum displacement between frames, in pixels
        #[arg(long)]
        search_range: Option<f64>,
        /// Smallest search range the adaptive search may shrink to
        #[arg(long)]
        adaptive_stop: Option<f64>,
        /// Factor applied to the search range on each adaptive retry
        #[arg(long)]
        adaptive_step: Option<f64>,
        /// Frames a track may go unmatched before it ends
        #[arg(long)]
        memory: Option<usize>,
        /// Smallest non-indexed region kept, in pixels
        #[arg(long)]
        min_size: Option<usize>,
        /// Track indexed grains only, leaving non-indexed pixels unlabeled
        #[arg(long)]
        skip_non_indexed: bool,
        /// Also render the tracks to this PNG
        #[arg(long)]
        plot: Option<PathBuf>,
    },

    /// Print where a track is at a timepoint
    Focus {
        /// Tracks CSV written by `track`
        tracks: PathBuf,
        /// Track to locate
        track_id: u64,
        /// Current timepoint
        #[arg(short, long, default_value_t = 0)]
        time: u64,
        /// Number of displayed dimensions (2 drops the time coordinate)
        #[arg(long, default_value_t = 2)]
        ndisplay: usize,
    },

    /// Detect slip-band angles in one grain
    SlipBands {
        /// Max-shear grid CSV
        shear: PathBuf,
        /// Grain label grid CSV on the same pixel grid
        grains: PathBuf,
        /// Grain label to analyse
        label: i64,
        /// Timepoint of the grids, used to pick slip traces
        #[arg(short, long, default_value_t = 0)]
        time: usize,
        /// Slip traces CSV to overlay
        #[arg(long)]
        traces: Option<PathBuf>,
        /// Output profile CSV
        #[arg(short, long, default_value = "band_profile.csv")]
        output: PathBuf,
        /// Render the band-angle distribution to this PNG
        #[arg(long)]
        plot: Option<PathBuf>,
        /// Render the grain's max-shear map to this PNG
        #[arg(long)]
        shear_plot: Option<PathBuf>,
    },

    /// List the layers a dataset yields
    Layers {
        /// Dataset descriptor or single DIC/EBSD map
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::Track {
            inputs,
            output,
            search_range,
            adaptive_stop,
            adaptive_step,
            memory,
            min_size,
            skip_non_indexed,
            plot,
        } => {
            let mut config = config;
            if let Some(v) = search_range {
                config.linking.search_range = v;
            }
            if let Some(v) = adaptive_stop {
                config.linking.adaptive_stop = v;
            }
            if let Some(v) = adaptive_step {
                config.linking.adaptive_step = v;
            }
            if let Some(v) = memory {
                config.linking.memory = v;
            }
            if let Some(v) = min_size {
                config.labeling.min_size = v;
            }
            if skip_non_indexed {
                config.labeling.include_non_indexed = false;
            }
            cmd_track(&inputs, &output, plot.as_deref(), config)
        }
        Commands::Focus { tracks, track_id, time, ndisplay } => {
            cmd_focus(&tracks, track_id, time, ndisplay)
        }
        Commands::SlipBands {
            shear,
            grains,
            label,
            time,
            traces,
            output,
            plot,
            shear_plot,
        } => cmd_slip_bands(
            &shear,
            &grains,
            label,
            time,
            traces.as_deref(),
            &output,
            plot,
            shear_plot.as_deref(),
            config,
        ),
        Commands::Layers { path } => cmd_layers(&path),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Load a time-first label volume from frame CSVs, a directory or a descriptor.
fn load_volume(inputs: &[PathBuf]) -> Result<ndarray::ArrayD<i64>> {
    if let [single] = inputs {
        if single.is_dir() {
            let files = loaders::find_frame_files(single)
                .with_context(|| format!("failed to list frames in {}", single.display()))?;
            if files.is_empty() {
                bail!("no label grid CSVs found in {}", single.display());
            }
            debug!("found {} frame files in {}", files.len(), single.display());
            return Ok(loaders::load_label_stack(&files)?);
        }

        if reader::reader_for(single) == Some(ReaderKind::Descriptor) {
            let layers = reader::read_descriptor(single)
                .with_context(|| format!("failed to read descriptor {}", single.display()))?;
            return layers
                .into_iter()
                .find_map(|layer| match layer.data {
                    LayerArray::Labels(data) => Some(data),
                    LayerArray::Image(_) => None,
                })
                .ok_or_else(|| anyhow!("descriptor {} has no grain layer", single.display()));
        }
    }

    loaders::load_label_stack(inputs).context("failed to load label grids")
}

fn cmd_track(inputs: &[PathBuf], output: &Path, plot: Option<&Path>, mut config: PipelineConfig) -> Result<()> {
    use crate::processors::tracking;
    use crate::visualization;

    let start = Instant::now();

    println!("Tracking grains...");
    println!("Inputs: {}", inputs.len());
    println!("Output: {}", output.display());

    let spinner = create_spinner("Loading label grids...");
    let volume = match load_volume(inputs) {
        Ok(volume) => volume,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e);
        }
    };

    // Stacked inputs always put time first
    if config.labeling.time_axis != 0 {
        warn!(
            "ignoring time_axis {} for stacked frames, using 0",
            config.labeling.time_axis
        );
        config.labeling.time_axis = 0;
    }

    spinner.set_message("Linking centroids...");
    let table = match tracking::tracks_from_seg(&volume, &config) {
        Ok(table) => table,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).context("tracking failed");
        }
    };

    spinner.set_message("Writing tracks...");
    writers::write_tracks_csv(output, &table)
        .with_context(|| format!("failed to write {}", output.display()))?;

    if let Some(plot_path) = plot {
        visualization::plot_tracks(plot_path, &table, &config.plot)
            .with_context(|| format!("failed to plot tracks to {}", plot_path.display()))?;
    }
    spinner.finish_and_clear();

    let mut items = vec![
        ("Frames", volume.shape()[0].to_string()),
        ("Frame shape", format!("{:?}", &volume.shape()[1..])),
        ("Tracks", table.track_ids().len().to_string()),
        ("Rows", table.len().to_string()),
        ("Search range", config.linking.search_range.to_string()),
        ("Non-indexed regions", config.labeling.include_non_indexed.to_string()),
        ("Output CSV", output.display().to_string()),
    ];
    if let Some(plot_path) = plot {
        items.push(("Output PNG", plot_path.display().to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary("Tracking Complete", &items);

    Ok(())
}

fn cmd_focus(tracks: &Path, track_id: u64, time: u64, ndisplay: usize) -> Result<()> {
    let table = loaders::load_tracks_csv(tracks)
        .with_context(|| format!("failed to load tracks from {}", tracks.display()))?;

    let focus = table
        .focus_point(track_id, time)
        .ok_or_else(|| anyhow!("track {} not found in {}", track_id, tracks.display()))?;

    if focus.time != time {
        info!(
            "track {} has no point at t={}, using its last point at t={}",
            track_id, time, focus.time
        );
    }

    let center: Vec<String> = focus
        .camera_center(ndisplay)
        .iter()
        .map(|c| format!("{:.3}", c))
        .collect();

    print_summary(
        "Track Focus",
        &[
            ("Track", track_id.to_string()),
            ("Time", focus.time.to_string()),
            ("Camera center", center.join(", ")),
        ],
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_slip_bands(
    shear: &Path,
    grains: &Path,
    label: i64,
    time: usize,
    traces: Option<&Path>,
    output: &Path,
    plot: Option<PathBuf>,
    shear_plot: Option<&Path>,
    config: PipelineConfig,
) -> Result<()> {
    use crate::visualization;

    let start = Instant::now();

    let shear_grid = loaders::load_value_grid(shear)
        .with_context(|| format!("failed to load shear map {}", shear.display()))?;
    let grain_grid = loaders::load_label_grid(grains)
        .with_context(|| format!("failed to load grain map {}", grains.display()))?;

    // The grids are a single timepoint; keep only that timepoint's traces
    let mut grain_traces = SlipTraceTable::new();
    if let Some(path) = traces {
        let all = loaders::load_slip_traces(path)
            .with_context(|| format!("failed to load slip traces {}", path.display()))?;
        for trace in all.get(time, label) {
            grain_traces.insert(0, label, trace.clone());
        }
    }

    let mut labels_layer = LabelsLayer::new(grain_grid.into_dyn(), vec![1.0, 1.0]);
    labels_layer.set_selected_label(label);
    let image_layer = ImageLayer::new(shear_grid.into_dyn());

    let plot_config = config.plot.clone();
    let mut widget = GrainPlots::new(&labels_layer, &image_layer, grain_traces, config, plot)
        .context("failed to measure grains")?;

    let result = widget
        .update()?
        .cloned()
        .ok_or_else(|| anyhow!("grain {} not found in {}", label, grains.display()))?;

    writers::write_profile_csv(output, &result.profile)
        .with_context(|| format!("failed to write {}", output.display()))?;

    if let Some(path) = shear_plot {
        let grain = widget
            .grain(0, label)
            .with_context(|| format!("grain {} has no cached shear map", label))?;
        visualization::plot_grain_shear(path, grain, &plot_config)
            .with_context(|| format!("failed to plot shear map to {}", path.display()))?;
    }

    let peak = result
        .dominant_angle
        .map(|a| format!("{} deg", a))
        .unwrap_or_else(|| "none".to_string());
    let trace_angles: Vec<String> = result
        .traces
        .iter()
        .map(|t| format!("{} {:.1}", t.plane_label, t.angle_deg))
        .collect();

    print_summary(
        "Slip Band Detection Complete",
        &[
            ("Grain", label.to_string()),
            ("Area (px)", result.area.to_string()),
            ("Dominant angle", peak),
            ("Slip traces", trace_angles.join(", ")),
            ("Output CSV", output.display().to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_layers(path: &Path) -> Result<()> {
    let spinner = create_spinner("Reading dataset...");
    let layers = reader::read_path(path);
    spinner.finish_and_clear();
    let layers = layers.with_context(|| format!("failed to read {}", path.display()))?;

    for (i, layer) in layers.iter().enumerate() {
        let limits = layer
            .options
            .contrast_limits
            .map(|[lo, hi]| format!("{:.4} .. {:.4}", lo, hi))
            .unwrap_or_else(|| "-".to_string());
        print_summary(
            &format!("Layer {}", i),
            &[
                ("Kind", format!("{:?}", layer.kind)),
                ("Shape", format!("{:?}", layer.data.shape())),
                ("Scale", format!("{:?}", layer.options.scale)),
                (
                    "Colormap",
                    layer.options.colormap.clone().unwrap_or_else(|| "-".to_string()),
                ),
                ("Contrast limits", limits),
                (
                    "Grains with traces",
                    layer.options.metadata.slip_traces.len().to_string(),
                ),
            ],
        );
    }
    Ok(())
}
