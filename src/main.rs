use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidlabel::annotation::controller::AnnotationController;
use vidlabel::annotation::display::ScriptedDisplay;
use vidlabel::annotation::session::AnnotationSession;
use vidlabel::annotation::store::SampleStore;
use vidlabel::annotation::video::{init_ffmpeg, VideoFrameSource};
use vidlabel::config::ToolConfig;
use vidlabel::dataset::split::{split_corpus, DeterministicSplitter, SeedMode};
use vidlabel::dataset::Subset;

#[derive(Debug, Parser)]
#[command(
    name = "vidlabel",
    version,
    about = "Annotate video frames and split the corpus by source video"
)]
struct Cli {
    /// Optional TOML config; flags override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Step through a video and draw boxes, reading operator commands from stdin.
    Annotate(AnnotateArgs),
    /// Split an annotation corpus into train/valid/test by source video.
    Split(SplitArgs),
}

#[derive(Debug, Args)]
struct AnnotateArgs {
    /// Video file to annotate.
    #[arg(long)]
    video: PathBuf,
    /// Title used in sample names (defaults to the video file stem).
    #[arg(long)]
    title: Option<String>,
    /// Directory receiving images/ and labels/.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Ordered class list, comma separated.
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,
    /// Drop boxes smaller than this many pixels on either side (0 keeps all).
    #[arg(long)]
    min_box_size: Option<u32>,
    /// Write the current overlay to this image after every change.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SplitArgs {
    /// Directory containing images/ and labels/.
    #[arg(long)]
    annotations: Option<PathBuf>,
    /// Destination for train/, valid/ and test/.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    train: Option<f64>,
    #[arg(long)]
    val: Option<f64>,
    #[arg(long)]
    test: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum)]
    seed_mode: Option<SeedMode>,
    /// Report the assignment without copying anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidlabel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ToolConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Annotate(args) => annotate(config, args),
        Command::Split(args) => split(config, args),
    }
}

fn annotate(mut config: ToolConfig, args: AnnotateArgs) -> Result<()> {
    if let Some(classes) = args.classes {
        config.classes = classes;
    }
    let mut annotate = config.annotate;
    if let Some(output) = args.output {
        annotate.output_dir = output;
    }
    if let Some(size) = args.min_box_size {
        annotate.min_box_size = size;
    }
    if args.preview.is_some() {
        annotate.preview_path = args.preview;
    }

    let title = match args.title {
        Some(title) => title,
        None => args
            .video
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .context("Could not derive a title from the video path, pass --title")?,
    };

    let session = AnnotationSession::new(config.classes)
        .context("Invalid class list")?
        .with_min_box_size(annotate.min_box_size);

    init_ffmpeg()?;
    let source = VideoFrameSource::open(&args.video).context("Failed to open video file")?;
    let store = SampleStore::create(&annotate.output_dir)
        .context("Failed to create output directories")?;
    let display = ScriptedDisplay::new(io::stdin().lock()).with_preview(annotate.preview_path);

    tracing::info!(
        title = %title,
        classes = ?session.classes(),
        "Current class: {}",
        session.class_name()
    );

    let mut controller = AnnotationController::new(title, source, display, session, store);
    let summary = controller.run()?;

    tracing::info!(
        frames = summary.frames_visited,
        saved = summary.saved.len(),
        "annotation session finished"
    );
    Ok(())
}

fn split(config: ToolConfig, args: SplitArgs) -> Result<()> {
    let mut split = config.split;
    if let Some(dir) = args.annotations {
        split.annotations_dir = dir;
    }
    if let Some(dir) = args.output {
        split.output_dir = dir;
    }
    if let Some(v) = args.train {
        split.ratios.train = v;
    }
    if let Some(v) = args.val {
        split.ratios.val = v;
    }
    if let Some(v) = args.test {
        split.ratios.test = v;
    }
    if let Some(seed) = args.seed {
        split.seed = seed;
    }
    if let Some(mode) = args.seed_mode {
        split.seed_mode = mode;
    }

    let splitter =
        DeterministicSplitter::new(split.ratios, split.seed)?.with_seed_mode(split.seed_mode);
    let (assignment, report) =
        split_corpus(&split.annotations_dir, &split.output_dir, &splitter, args.dry_run)
            .context("Failed to split dataset")?;

    let counts = assignment.counts();
    for subset in Subset::ALL {
        tracing::info!(%subset, samples = counts.get(subset), "subset size");
    }

    if args.dry_run {
        tracing::info!("dry run, nothing copied");
    } else {
        tracing::info!(
            images = report.images_copied,
            labels = report.labels_copied,
            output = %split.output_dir.display(),
            "split written"
        );
    }
    Ok(())
}
