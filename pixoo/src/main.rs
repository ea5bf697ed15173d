/*!
# Pixoo

Drive a Divoom Pixoo LED matrix over a Bluetooth serial channel.

## Features

- Still images, device-side animations and host-timed frame sequences
- GIF, PNG, BMP and JPEG sources, resized to the display by exact ratios
- Device settings: brightness, color, clock sync and box modes
- TOML configuration with command-line overrides

## Usage

### Show a picture
```bash
pixoo -a 11:75:58:00:00:00 -m draw_pic image.png
```

### Play a GIF, one still every 200 ms, once
```bash
pixoo -a 11:75:58:00:00:00 -m draw_gif_delay -s 200 --noloop image.gif
```

### Device settings
```bash
pixoo -a 11:75:58:00:00:00 brightness 40
pixoo -a 11:75:58:00:00:00 datetime --us
```
*/

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pixoo_codec::protocol::{box_visual, DEFAULT_SIZE};
use pixoo_codec::{Pacing, Rgb};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod display;
mod error;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
mod test_support;

use cache::FrameRef;
use config::AppConfig;
use display::Display;
use error::DisplayError;
use scheduler::{Playback, PlaybackOutcome, Scheduler};
use session::Session;
use transport::RfcommTransport;

#[derive(Parser)]
#[command(name = "pixoo")]
#[command(about = "Send pictures and animations to a Divoom Pixoo over Bluetooth")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "pixoo.toml")]
    config: PathBuf,

    /// Device MAC address, overrides the configured one
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// How the files are sent
    #[arg(short, long, value_enum, default_value_t = Mode::DrawPic)]
    mode: Mode,

    /// Frame speed in milliseconds, 0 for the source's own timing
    #[arg(short, long, default_value_t = 0)]
    speed: u16,

    /// Display size as a multiple of 16 pixels, up to 128x128
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=8))]
    scale: Option<u16>,

    /// Play sequences once instead of looping
    #[arg(long)]
    noloop: bool,

    /// Print the palette of every frame sent
    #[arg(long)]
    preview: bool,

    /// Image files to send
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
enum Mode {
    /// First frame of the first file as a still
    DrawPic,
    /// Every frame of a GIF as one animation with its own timing
    DrawGif,
    /// One frame per file as one animation
    DrawAnim,
    /// Every frame of a GIF as stills, timed by the host
    DrawGifDelay,
    /// One still per file, timed by the host
    #[value(alias = "draw_pic_delay")]
    DrawAnimDelay,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "pixoo.toml")]
        output: PathBuf,
    },

    /// List paired devices
    Devices,

    /// Set the display brightness
    Brightness {
        /// Percentage, 0 to 100
        percent: i64,
    },

    /// Fill the lamp with one color
    Color {
        #[arg(allow_negative_numbers = true)]
        r: i64,
        #[arg(allow_negative_numbers = true)]
        g: i64,
        #[arg(allow_negative_numbers = true)]
        b: i64,
    },

    /// Blank the display
    Clear,

    /// Show a temperature and weather icon
    Climate {
        /// Degrees, negative values allowed
        #[arg(allow_negative_numbers = true)]
        temperature: i64,
        weather: i64,
    },

    /// Switch between full-day modes
    Fullday { mode: i64 },

    /// Sync the device clock to local time and show it
    Datetime {
        /// 12-hour clock face
        #[arg(long)]
        us: bool,
    },

    /// Switch the box mode
    BoxMode {
        mode: u8,

        #[arg(default_value_t = 0)]
        visual: u8,

        /// Mode specific values
        #[arg(allow_negative_numbers = true)]
        extra: Vec<i64>,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
        }
    };

    // Logs go to stderr, stdout is kept for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Some(Commands::Config { output }) = &cli.command {
        return generate_config_file(output);
    }

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(address) = &cli.address {
        config.device.address = address.clone();
    }
    if let Some(scale) = cli.scale {
        config.device.size = DEFAULT_SIZE * scale as usize;
    }

    if cli.command.is_none() {
        if cli.files.is_empty() {
            return Err(DisplayError::config("no image files given").into());
        }
        if let Some(missing) = cli.files.iter().find(|p| !p.exists()) {
            return Err(DisplayError::config(format!("{} does not exist", missing.display())).into());
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the runtime")?;

    // The handler only signals, the session is closed by `drive`
    let interrupted = Arc::new(Notify::new());
    let signal = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down");
        signal.notify_one();
    })?;

    runtime.block_on(drive(cli, config, interrupted))
}

async fn drive(cli: Cli, config: AppConfig, interrupted: Arc<Notify>) -> Result<()> {
    let transport = Arc::new(RfcommTransport::new(config.transport.devices.clone()));
    let session = Session::new(transport, config.connection.clone());

    if let Some(Commands::Devices) = cli.command {
        match session.list_paired_devices().await {
            Ok(devices) => devices.iter().for_each(|d| println!("{}", d)),
            Err(e) => error!("{}", e),
        }
        return Ok(());
    }

    if config.device.address.is_empty() {
        return Err(DisplayError::config("no device address, pass -a or set device.address").into());
    }

    let mut display = Display::new(&config.device.address, session, config.device.size, config.playback.clone());
    if cli.preview {
        display.set_frame_observer(Arc::new(print_palette));
    }

    let connected = tokio::select! {
        result = display.connect() => Some(result),
        _ = interrupted.notified() => None,
    };
    match connected {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            error!("{}", e);
            return Ok(());
        }
        None => {
            display.close().await;
            return Ok(());
        }
    }

    if let Some(brightness) = config.device.brightness {
        if let Err(e) = display.set_brightness(brightness as i64).await {
            warn!("Could not apply brightness: {}", e);
        }
    }

    let result = match cli.command {
        Some(command) => {
            let result = run_command(&mut display, command).await;
            display.close().await;
            result
        }
        None => {
            let looped = !cli.noloop;
            match playback_for(&mut display, cli.mode, &cli.files, cli.speed, looped).await {
                Ok(playback) => play(display, playback, interrupted).await,
                Err(e) => {
                    display.close().await;
                    Err(e)
                }
            }
        }
    };

    // Device failures are reported but leave the exit status alone
    if let Err(e) = result {
        error!("{}", e);
    }
    Ok(())
}

async fn run_command(display: &mut Display, command: Commands) -> error::Result<()> {
    match command {
        Commands::Brightness { percent } => display.set_brightness(percent).await,
        Commands::Color { r, g, b } => display.set_color(r, g, b).await,
        Commands::Clear => display.clear_frame([0, 0, 0, 0]).await,
        Commands::Climate { temperature, weather } => display.set_climate(temperature, weather).await,
        Commands::Fullday { mode } => display.set_fullday(mode).await,
        Commands::Datetime { us } => {
            let visual = if us { box_visual::CLOCK_US } else { box_visual::CLOCK_ISO };
            display.set_datetime(&chrono::Local::now(), Some(visual)).await
        }
        Commands::BoxMode { mode, visual, extra } => display.set_box_mode(mode, visual, &extra).await,
        Commands::Config { .. } | Commands::Devices => Ok(()),
    }
}

/// Every frame of one source file
async fn source_frames(display: &mut Display, path: &Path) -> error::Result<Vec<FrameRef>> {
    let count = display.frame_count(path).await?;
    Ok((0..count).map(|i| FrameRef::new(path, i)).collect())
}

/// First frame of each file, kept apart in the cache by position
fn file_frames(files: &[PathBuf]) -> Vec<FrameRef> {
    files
        .iter()
        .enumerate()
        .map(|(i, p)| FrameRef::still(p).with_sub_index(i))
        .collect()
}

async fn playback_for(
    display: &mut Display,
    mode: Mode,
    files: &[PathBuf],
    speed: u16,
    looped: bool,
) -> error::Result<Playback> {
    let first = files
        .first()
        .ok_or_else(|| DisplayError::config("no image files given"))?;

    let playback = match mode {
        Mode::DrawPic => Playback::Still(FrameRef::still(first)),
        Mode::DrawGif => Playback::Animation {
            frames: source_frames(display, first).await?,
            speed_ms: speed,
            looped,
            pacing: Pacing::Intrinsic,
        },
        Mode::DrawAnim => Playback::Animation {
            frames: file_frames(files),
            speed_ms: speed,
            looped,
            pacing: Pacing::Fixed(0),
        },
        Mode::DrawGifDelay => Playback::Sequence {
            frames: source_frames(display, first).await?,
            interval_ms: speed as u32,
            looped,
        },
        Mode::DrawAnimDelay => Playback::Sequence {
            frames: file_frames(files),
            interval_ms: speed as u32,
            looped,
        },
    };
    Ok(playback)
}

/// Run one playback until it ends or the process is interrupted
async fn play(display: Display, playback: Playback, interrupted: Arc<Notify>) -> error::Result<()> {
    let mut scheduler = Scheduler::new(Arc::new(Mutex::new(display)));
    let completion = scheduler.play(playback);

    let outcome = tokio::select! {
        outcome = completion.wait() => outcome,
        _ = interrupted.notified() => Ok(PlaybackOutcome::Cancelled),
    };
    if scheduler.is_playing() {
        scheduler.stop();
    }

    let shared = scheduler.display();
    let mut display = shared.lock().await;
    if let Some(last) = display.last_frame() {
        debug!("Last frame: {} colors, speed {:?}", last.palette.len(), last.speed);
    }
    if display.is_connected() {
        display.close().await;
    }

    outcome.map(|_| ())
}

fn print_palette(palette: &[Rgb], pixels: &[Vec<u8>]) {
    let colors: Vec<u8> = palette.iter().flatten().copied().collect();
    println!("{} frame(s), palette {}", pixels.len(), hex::encode(colors));
}

/// Generate a default configuration file
fn generate_config_file(output_path: &Path) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(output_path)?;

    println!("Generated configuration file: {}", output_path.display());
    println!("Edit the file to set the device address, then run:");
    println!("   pixoo --config {} image.png", output_path.display());

    Ok(())
}
