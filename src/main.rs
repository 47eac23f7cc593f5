use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use pixelstream::control::Controller;
use pixelstream::envelope::DEFAULT_NOISE_FLOOR;
use pixelstream::pixels::PixelBuffer;
use pixelstream::sender::{FrameSender, SenderConfig, SerialConnector};
use pixelstream::server::ControlServer;
use pixelstream::source::{FrameSource, ImageWalker};
use pixelstream::streamer::Streamer;
use pixelstream::transport::DEFAULT_LISTEN_ADDR;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Status records buffered between the sender and the control server
const STATUS_QUEUE: usize = 16;

/// How long shutdown waits for the sender to drain the frame queue
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "pixelstream")]
#[command(about = "Stream image rows to an addressable LED strip over a serial link")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream frames to the LED controller
    Run(RunArgs),

    /// List the scenes available under an image root
    Scenes {
        /// Directory holding one subdirectory of images per scene
        #[arg(long, default_value = "images")]
        image_root: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Serial port of the LED controller
    #[arg(long)]
    serial_port: String,

    /// Baud rate of the serial port
    #[arg(long, default_value = "115200")]
    baud_rate: u32,

    /// Number of pixels on the strip
    #[arg(long, default_value = "2448", value_parser = clap::value_parser!(u16).range(1..=10000))]
    num_pixels: u16,

    /// Frames per second
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=1000))]
    fps: u32,

    /// Depth of the queue between the streamer and the serial sender
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u16).range(1..))]
    frame_queue: u16,

    /// Maximum LED brightness
    #[arg(long, default_value = "255", value_parser = clap::value_parser!(u8).range(1..))]
    brightness: u8,

    /// How far silence dims the strip (0 disables audio dimming)
    #[arg(long, default_value = "0")]
    audio_dimming: u8,

    /// Baseline audio amplitude (mV) below which audio is treated as noise
    #[arg(long, default_value_t = DEFAULT_NOISE_FLOOR)]
    noise_floor: i32,

    /// Directory holding one subdirectory of images per scene
    #[arg(long, default_value = "images")]
    image_root: PathBuf,

    /// Scene to start with
    #[arg(long)]
    image: Option<String>,

    /// Show a calibration pattern for these comma separated segment lengths
    #[arg(long, conflicts_with = "image")]
    segments: Option<String>,

    /// Address of the control server
    #[arg(long, default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,
}

impl RunArgs {
    fn num_pixels(&self) -> usize {
        self.num_pixels as usize
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    /// The source played at startup
    fn initial_source(&self) -> Result<Box<dyn FrameSource>> {
        if let Some(list) = &self.segments {
            let frame = PixelBuffer::from_segments(self.num_pixels(), list)
                .with_context(|| format!("Invalid --segments {:?}", list))?;
            return Ok(Box::new(frame));
        }

        let Some(scene) = &self.image else {
            bail!("Either --image or --segments must be set");
        };

        let walker = ImageWalker::open(self.image_root.join(scene))
            .with_context(|| format!("Scene {:?} contains no valid images", scene))?;
        Ok(Box::new(walker))
    }
}

async fn run(args: RunArgs) -> Result<()> {
    log::info!("Serial port: {} at {} baud", args.serial_port, args.baud_rate);
    log::info!("Pixels: {}", args.num_pixels);
    log::info!("Frame rate: {} fps, queue depth {}", args.fps, args.frame_queue);

    let initial = args.initial_source()?;

    let config = Arc::new(SenderConfig::new(
        args.num_pixels(),
        args.brightness,
        args.audio_dimming,
    ));

    let (frames_tx, frames_rx) = mpsc::channel(args.frame_queue as usize);
    let (status_tx, status_rx) = mpsc::channel(STATUS_QUEUE);

    let sender = FrameSender::new(
        SerialConnector::new(&args.serial_port, args.baud_rate),
        Arc::clone(&config),
    )
    .with_status(status_tx)
    .with_noise_floor(args.noise_floor);
    let sender_task = tokio::spawn(async move { sender.run(frames_rx).await });

    let (streamer, handle) = Streamer::new(args.frame_interval());
    let streamer_task = tokio::spawn(streamer.run(frames_tx));
    handle.set_source(initial).await?;

    let controller = Controller::new(handle.clone(), Arc::clone(&config), args.image_root.clone());
    let server = ControlServer::bind(&args.listen, controller)
        .await
        .context("Failed to start control server")?;

    tokio::select! {
        result = server.run(status_rx) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            log::info!("Shutdown signal received, stopping");
        }
    }

    // Closing the frame queue lets the sender finish on its own.
    if handle.shutdown().await.is_err() {
        log::warn!("Streamer already stopped");
    }

    // A sender stuck reconnecting never drains the queue, so the streamer
    // can stay blocked on it too.
    let tasks = [streamer_task.abort_handle(), sender_task.abort_handle()];
    let stopped = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = streamer_task.await;
        let _ = sender_task.await;
    })
    .await;

    if stopped.is_err() {
        log::warn!("Pipeline did not stop within {:?}, aborting", SHUTDOWN_GRACE);
        for task in tasks {
            task.abort();
        }
    }

    Ok(())
}

/// Scene directories under `image_root`, sorted by name
fn list_scenes(image_root: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(image_root)
        .with_context(|| format!("Failed to read {}", image_root.display()))?;

    let mut scenes = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.starts_with('_') || !entry.file_type()?.is_dir() {
            continue;
        }
        scenes.push(name);
    }

    scenes.sort();
    Ok(scenes)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Scenes { image_root } => list_scenes(&image_root).map(|scenes| {
            if scenes.is_empty() {
                println!("No scenes found in {}", image_root.display());
            }
            for scene in scenes {
                println!("{}", scene);
            }
        }),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from([
            "pixelstream",
            "run",
            "--serial-port",
            "/dev/ttyACM0",
            "--image",
            "fire",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("Wrong command");
        };
        assert_eq!(args.baud_rate, 115200);
        assert_eq!(args.num_pixels(), 2448);
        assert_eq!(args.frame_queue, 5);
        assert_eq!(args.brightness, 255);
        assert_eq!(args.audio_dimming, 0);
        assert_eq!(args.noise_floor, DEFAULT_NOISE_FLOOR);
        assert_eq!(args.listen, DEFAULT_LISTEN_ADDR);
        assert!((args.frame_interval().as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_cli_rejects_out_of_range_values() {
        for (flag, value) in [
            ("--num-pixels", "0"),
            ("--num-pixels", "10001"),
            ("--fps", "0"),
            ("--brightness", "0"),
            ("--brightness", "256"),
            ("--frame-queue", "0"),
        ] {
            let parsed = Cli::try_parse_from([
                "pixelstream",
                "run",
                "--serial-port",
                "/dev/null",
                flag,
                value,
            ]);
            assert!(parsed.is_err(), "{} {} should be rejected", flag, value);
        }
    }

    #[test]
    fn test_segments_source() {
        let cli = Cli::try_parse_from([
            "pixelstream",
            "run",
            "--serial-port",
            "/dev/null",
            "--num-pixels",
            "4",
            "--segments",
            "2,2",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Wrong command");
        };

        let mut source = args.initial_source().unwrap();
        assert_eq!(source.next_frame().len(), 12);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let cli = Cli::try_parse_from(["pixelstream", "run", "--serial-port", "/dev/null"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Wrong command");
        };
        assert!(args.initial_source().is_err());
    }

    #[test]
    fn test_list_scenes() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("rain")).unwrap();
        std::fs::create_dir(root.path().join("fire")).unwrap();
        std::fs::create_dir(root.path().join("_wip")).unwrap();
        std::fs::write(root.path().join("notes.txt"), b"").unwrap();

        assert_eq!(list_scenes(root.path()).unwrap(), vec!["fire", "rain"]);
    }
}
