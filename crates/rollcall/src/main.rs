use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rollcall::{Config, Controller, FlowError, MarkOutcome, Registration, Session};
use rollcall_core::{FaceDetector, FaceSampler, HaarDetector, PixelDiffMatcher};
use rollcall_hw::{FrameSource, ImageFiles};
use rollcall_store::{AttendanceEntry, AttendanceStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-matched attendance tracker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user with a captured face sample
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        enrollment: String,
        #[arg(long)]
        college: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        section: String,
        #[command(flatten)]
        frames: FrameArgs,
    },
    /// Log in and mark today's attendance by face
    Attend {
        #[command(flatten)]
        login: LoginArgs,
        #[command(flatten)]
        frames: FrameArgs,
    },
    /// Show attendance history, most recent first
    History {
        #[command(flatten)]
        login: LoginArgs,
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the face regions detected in an image
    Detect {
        /// Image file to scan
        image: PathBuf,
    },
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    enrollment: String,
}

#[derive(Args)]
struct FrameArgs {
    /// Image file to use as a camera frame (repeatable; default: camera)
    #[arg(long = "image")]
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::History { login, json } => {
            let store = open_store(&config)?;
            let result = rollcall::history(&store, &login.name, &login.enrollment)
                .map_err(anyhow::Error::from)
                .and_then(|entries| print_history(&entries, json));
            store.close()?;
            result
        }
        Commands::Detect { image } => detect(&load_detector(&config)?, &image),
        Commands::Register {
            name,
            enrollment,
            college,
            class,
            section,
            frames,
        } => {
            let registration = Registration {
                name,
                enrollment,
                college,
                class,
                section,
            };
            // Validate the form before touching the camera.
            let missing = registration.missing_fields();
            if !missing.is_empty() {
                return Err(FlowError::Validation(missing).into());
            }
            with_controller(&config, |c| register(c, &config, &registration, &frames))
        }
        Commands::Attend { login, frames } => {
            with_controller(&config, |c| attend(c, &config, &login, &frames))
        }
    }
}

fn load_detector(config: &Config) -> Result<HaarDetector> {
    HaarDetector::load(&config.cascade_path, config.detect_params())
        .with_context(|| format!("failed to load cascade {}", config.cascade_path.display()))
}

fn open_store(config: &Config) -> Result<AttendanceStore> {
    AttendanceStore::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

/// Run `f` against a controller over the configured cascade and database.
fn with_controller<F>(config: &Config, f: F) -> Result<()>
where
    F: FnOnce(&Controller<HaarDetector>) -> Result<()>,
{
    let sampler = FaceSampler::new(load_detector(config)?)
        .with_template_size(config.template_size)
        .with_selection(config.face_selection);
    let controller = Controller::new(open_store(config)?, sampler)
        .with_matcher(PixelDiffMatcher::new(config.match_threshold))
        .with_capture_attempts(config.capture_attempts);

    let result = f(&controller);
    controller.into_store().close()?;
    result
}

fn register(
    controller: &Controller<HaarDetector>,
    config: &Config,
    registration: &Registration,
    frames: &FrameArgs,
) -> Result<()> {
    let template = controller.capture_template(frame_source(config, frames)?)?;
    let id = controller.register(registration, Some(&template))?;
    println!("Registered {} ({}) as user {id}", registration.name, registration.enrollment);
    Ok(())
}

fn attend(
    controller: &Controller<HaarDetector>,
    config: &Config,
    login: &LoginArgs,
    frames: &FrameArgs,
) -> Result<()> {
    let mut session = Session::new();
    controller.login(&mut session, &login.name, &login.enrollment)?;

    let source = frame_source(config, frames)?;
    let outcome = controller.mark_from_source(&mut session, source);
    controller.logout(&mut session);

    match outcome? {
        MarkOutcome::Marked { record, score } => println!(
            "Attendance marked for {} at {} {} (difference {score:.1})",
            login.name, record.date, record.time
        ),
        outcome @ MarkOutcome::AlreadyMarkedToday { .. } => println!(
            "Attendance already marked today for {} (difference {:.1})",
            login.name,
            outcome.score()
        ),
    }
    Ok(())
}

fn print_history(entries: &[AttendanceEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No attendance recorded");
        return Ok(());
    }
    println!(
        "{:<12} {:<10} {:<8} {:<20} {:<16} {:<8} SECTION",
        "DATE", "TIME", "STATUS", "NAME", "COLLEGE", "CLASS"
    );
    for entry in entries {
        println!(
            "{:<12} {:<10} {:<8} {:<20} {:<16} {:<8} {}",
            entry.record.date.to_string(),
            entry.record.time.to_string(),
            entry.record.status,
            entry.name,
            entry.college,
            entry.class,
            entry.section
        );
    }
    Ok(())
}

fn detect(detector: &HaarDetector, path: &Path) -> Result<()> {
    let gray = image::open(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .to_luma8();
    let params = detector.params();
    let regions = detector.detect(&gray);

    println!(
        "{}: {}x{}, {} face(s) (scale factor {}, min neighbors {})",
        path.display(),
        gray.width(),
        gray.height(),
        regions.len(),
        params.scale_factor,
        params.min_neighbors
    );
    for (i, r) in regions.iter().enumerate() {
        println!(
            "  [{i}] x={} y={} {}x{} neighbors={}",
            r.x, r.y, r.width, r.height, r.neighbors
        );
    }
    Ok(())
}

/// Frames from `--image` files, or the camera when none are given.
fn frame_source(config: &Config, frames: &FrameArgs) -> Result<Box<dyn FrameSource>> {
    if !frames.images.is_empty() {
        return Ok(Box::new(ImageFiles::new(&frames.images)));
    }
    camera(config)
}

#[cfg(feature = "v4l2")]
fn camera(config: &Config) -> Result<Box<dyn FrameSource>> {
    let camera = rollcall_hw::Camera::open(&config.camera_device)
        .with_context(|| format!("camera {} unavailable", config.camera_device))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l2"))]
fn camera(_config: &Config) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("no --image given and camera support is not built (enable the v4l2 feature)")
}
