//! Run command - drive the pipeline with a synthetic compositor
//!
//! Stands in for the host runtime: renders a moving test pattern into the
//! shared back buffer (or a pair of swap texture sets in direct mode),
//! presents at the configured refresh rate and streams the result to the
//! first client that announces itself.

use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{debug, info, trace, warn};
use vdisplay_core::config::{ConfigFile, DriverConfig, EncoderOptions, PipelineMode};
use vdisplay_core::gpu::{
    GpuDevice, PixelFormat, Region, SWAP_SET_SIZE, ShareMode, SharedHandle, SoftwareDevice,
    Texture, TextureDesc,
};
use vdisplay_core::performance::PipelineStats;
use vdisplay_core::types::{DriverPose, Matrix34};
use vdisplay_core::{Driver, HostRuntime, UdpTransport};

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Present path: virtual (single layer) or direct (layered)
    #[arg(short, long)]
    mode: Option<PipelineMode>,

    /// Stop after this many frames (default: run until Ctrl+C)
    #[arg(short, long)]
    frames: Option<u64>,

    /// Send to this address before a client says hello
    #[arg(short, long)]
    peer: Option<SocketAddr>,

    /// UDP listen port
    #[arg(long)]
    port: Option<u16>,

    /// Encoder option string, e.g. "-codec hevc -bitrate 20M"
    #[arg(short, long, allow_hyphen_values = true)]
    encoder: Option<EncoderOptions>,

    /// Also write the encoded stream to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stamp the encode time onto each frame
    #[arg(long)]
    debug_timestamp: bool,

    /// Seconds between stats lines
    #[arg(long, default_value = "5")]
    stats_interval: u64,

    /// Print the final stats as JSON
    #[arg(long)]
    json: bool,
}

/// Host callbacks that only log
#[derive(Default)]
struct LoggingHost {
    vsyncs: AtomicU64,
    poses: AtomicU64,
}

impl HostRuntime for LoggingHost {
    fn vsync_event(&self) {
        let count = self.vsyncs.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Vsync {}", count);
    }

    fn pose_updated(&self, pose: &DriverPose) {
        self.poses.fetch_add(1, Ordering::Relaxed);
        trace!("Pose updated: position {:?}", pose.position);
    }
}

/// What the synthetic compositor renders into
enum Scene {
    /// One shared back buffer at display size
    Single { backbuffer: Arc<Texture> },
    /// Per-eye swap sets plus the texture presents synchronize on
    Layered {
        sync: Arc<Texture>,
        left: [SharedHandle; SWAP_SET_SIZE],
        right: [SharedHandle; SWAP_SET_SIZE],
        textures: Vec<Arc<Texture>>,
        indices: [usize; 2],
    },
}

impl Scene {
    fn new(driver: &mut Driver, device: &Arc<SoftwareDevice>) -> Result<Self> {
        match driver.mode() {
            PipelineMode::Virtual => {
                let config = driver.config();
                let backbuffer = device.create_texture(
                    &TextureDesc::new(config.display_width, config.display_height, PixelFormat::Bgra8)
                        .render_target()
                        .shader_resource()
                        .shared(ShareMode::KeyedMutex),
                )?;
                Ok(Self::Single { backbuffer })
            }
            PipelineMode::Direct => {
                let (width, height) = driver.recommended_render_target_size();
                let sync = device.create_texture(
                    &TextureDesc::new(1, 1, PixelFormat::Bgra8).shared(ShareMode::KeyedMutex),
                )?;
                let direct = driver
                    .direct_mode()
                    .context("Driver is not in direct mode")?;
                let pid = std::process::id();
                let left = direct.create_swap_texture_set(pid, PixelFormat::Bgra8, width, height)?;
                let right = direct.create_swap_texture_set(pid, PixelFormat::Bgra8, width, height)?;

                let mut textures = Vec::with_capacity(SWAP_SET_SIZE * 2);
                for handle in left.iter().chain(right.iter()) {
                    textures.push(device.open_shared_texture(*handle)?);
                }
                Ok(Self::Layered {
                    sync,
                    left,
                    right,
                    textures,
                    indices: [0, 0],
                })
            }
        }
    }

    /// Render frame `n` and present it
    fn present(&mut self, driver: &mut Driver, device: &SoftwareDevice, n: u64) -> Result<bool> {
        driver.run_frame();

        match self {
            Self::Single { backbuffer } => {
                fill(device, backbuffer, pattern(n, 0))?;
                let handle = backbuffer
                    .shared_handle()
                    .context("Back buffer has no shared handle")?;
                Ok(driver.present(handle)?)
            }
            Self::Layered {
                sync,
                left,
                right,
                textures,
                indices,
            } => {
                let pose = driver.pose();
                let direct = driver
                    .direct_mode()
                    .context("Driver is not in direct mode")?;
                *indices = direct.next_swap_texture_set_index(*indices);

                fill(device, &textures[indices[0]], pattern(n, 0))?;
                fill(device, &textures[SWAP_SET_SIZE + indices[1]], pattern(n, 128))?;

                let position = pose.position.map(|v| v as f32);
                let matrix = Matrix34::from_rotation_translation(pose.rotation.to_rotation(), position);
                direct.submit_layer([left[indices[0]], right[indices[1]]], &matrix);

                let handle = sync.shared_handle().context("Sync texture has no shared handle")?;
                Ok(driver.present(handle)?)
            }
        }
    }
}

/// Slowly cycling solid color, BGRA
fn pattern(n: u64, phase: u64) -> [u8; 4] {
    let t = n + phase;
    [
        (t * 3 % 256) as u8,
        (t * 5 % 256) as u8,
        (t * 7 % 256) as u8,
        255,
    ]
}

fn fill(device: &SoftwareDevice, texture: &Texture, bgra: [u8; 4]) -> Result<()> {
    let (width, height) = (texture.width(), texture.height());
    let pixels: Vec<u8> = bgra
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 4)
        .collect();
    device.update_region(texture, Region::new(0, 0, width, height), &pixels)?;
    Ok(())
}

/// Start a synthetic session
pub async fn run(file: ConfigFile, args: RunArgs) -> Result<()> {
    let mut config = DriverConfig::from(file);
    if let Some(mode) = args.mode {
        config = config.with_mode(mode);
    }
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(encoder) = args.encoder.clone() {
        config = config.with_encoder(encoder);
    }
    if let Some(output) = &args.output {
        config = config.with_output_file(output);
    }
    if args.debug_timestamp {
        config = config.with_debug_timestamp(true);
    }
    config
        .validate_strict()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    println!("vdisplay - Starting Session\n");
    println!("Configuration:");
    println!("  Mode:        {}", config.mode);
    println!("  Render:      {}x{} per eye", config.render_width, config.render_height);
    println!("  Display:     {}x{}", config.display_width, config.display_height);
    println!("  Refresh:     {:.2} Hz", config.refresh.hz());
    println!("  Encoder:     {}", config.encoder);
    println!();

    let transport = Arc::new(
        UdpTransport::bind((config.listen_host.as_str(), config.listen_port))
            .await
            .context("Failed to bind UDP transport")?,
    );
    if let Some(peer) = args.peer {
        transport.set_peer(peer);
    }
    println!("Listening on {}", transport.local_addr()?);
    println!("Frames stream once the client sends tracking samples.");
    println!("Press Ctrl+C to stop...\n");

    let stop = Arc::new(AtomicBool::new(false));
    let mut session = tokio::task::spawn_blocking({
        let stop = stop.clone();
        let frames = args.frames;
        let stats_interval = Duration::from_secs(args.stats_interval.max(1));
        move || run_session(config, transport, stop, frames, stats_interval)
    });

    let stats = tokio::select! {
        result = &mut session => result.context("Session thread panicked")??,
        _ = signal::ctrl_c() => {
            println!("\nReceived interrupt signal...");
            stop.store(true, Ordering::SeqCst);
            session.await.context("Session thread panicked")??
        }
    };

    println!("Session stopped.\n");
    if args.json {
        println!("{}", stats.to_json());
    } else {
        println!("{}", stats.format_detailed());
    }

    Ok(())
}

fn run_session(
    config: DriverConfig,
    transport: Arc<UdpTransport>,
    stop: Arc<AtomicBool>,
    frames: Option<u64>,
    stats_interval: Duration,
) -> Result<PipelineStats> {
    let device = Arc::new(SoftwareDevice::with_name("vdisplay synthetic compositor"));
    let host = Arc::new(LoggingHost::default());
    let frame_interval = Duration::from_secs_f64(config.frame_interval());

    let mut driver = Driver::new(config, device.clone(), transport, host.clone())
        .context("Failed to start driver")?;
    let mut scene = Scene::new(&mut driver, &device)?;
    info!("Session running in {} mode", driver.mode());

    let mut frame = 0u64;
    let mut last_stats = Instant::now();
    while !stop.load(Ordering::SeqCst) && frames.is_none_or(|limit| frame < limit) {
        let start = Instant::now();

        if !scene.present(&mut driver, &device, frame)? {
            debug!("Frame {} was not staged", frame);
        }
        let timing = driver.wait_for_present();
        trace!(
            "Frame {} targets vsync {} at {:.4}s",
            frame, timing.vsync_counter, timing.last_vsync_time
        );
        frame += 1;

        if last_stats.elapsed() >= stats_interval {
            info!("{}", driver.stats().format_line());
            last_stats = Instant::now();
        }

        if let Some(remaining) = frame_interval.checked_sub(start.elapsed()) {
            std::thread::sleep(remaining);
        } else {
            trace!("Frame {} overran the refresh interval", frame);
        }
    }

    if let Err(e) = driver.shutdown() {
        warn!("Shutdown failed: {}", e);
    }
    info!(
        "Presented {} frames, {} vsyncs, {} poses",
        frame,
        host.vsyncs.load(Ordering::Relaxed),
        host.poses.load(Ordering::Relaxed)
    );
    Ok(driver.stats())
}
