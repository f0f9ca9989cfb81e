//! Volcast CLI - offline and in-process cluster volume rendering.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use volcast::cluster::{Communicator, DistributedRenderer, FixedFrameLoop, LocalCluster, LoopStats};
use volcast::config::RenderConfig;
use volcast::core::{Exhibit, ExhibitCuller};
use volcast::render::{select_backend, FrameWriter, VolumeRankRenderer};
use volcast::shader::builtin::{self, DensityShader, MipShader};
use volcast::shader::{Backend, Shader, ShaderId, ShaderRegistry};
use volcast::util::BoundingBox;
use volcast::Raycaster;

#[derive(Parser)]
#[command(name = "volcast")]
#[command(about = "Distributed volume raycaster", long_about = None)]
#[command(version, after_help = concat!("Built ", env!("VOLCAST_BUILD_DATE"), " ", env!("VOLCAST_BUILD_TIME")))]
struct Cli {
    /// Show debug output (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON render configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one image of the whole volume on this process
    Render {
        /// Output PNG
        #[arg(short, long, default_value = "volcast.png")]
        output: PathBuf,
        /// Override the configured device
        #[arg(long)]
        device: Option<BackendArg>,
    },
    /// Run N in-process ranks through the distributed frame loop
    Cluster {
        /// Number of frames
        #[arg(short, long, default_value_t = 60)]
        frames: u64,
        /// Override the configured rank count
        #[arg(short, long)]
        ranks: Option<usize>,
        /// Write every rank's frames as PNGs into this directory
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// List registered shaders
    Shaders,
}

/// `cpu` or `gpu` on the command line.
#[derive(Clone, Copy)]
struct BackendArg(Backend);

impl std::str::FromStr for BackendArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Self(Backend::Cpu)),
            "gpu" => Ok(Self(Backend::Gpu)),
            other => Err(format!("unknown device '{other}' (expected cpu or gpu)")),
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<&Path>) -> Result<RenderConfig> {
    match path {
        Some(p) => RenderConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(RenderConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = load_config(cli.config.as_deref())?;
    let registry = Arc::new(ShaderRegistry::with_builtin()?);

    match cli.command {
        Commands::Render { output, device } => {
            if let Some(device) = device {
                config.device = device.0;
            }
            config.validate()?;
            cmd_render(&config, registry, &output)
        }
        Commands::Cluster { frames, ranks, out_dir } => {
            if let Some(ranks) = ranks {
                config.ranks = ranks;
            }
            config.validate()?;
            let stats = cmd_cluster(&config, registry, frames, out_dir)?;
            for (rank, s) in stats.iter().enumerate() {
                println!("rank {rank}: {} frames, box {:?}", s.frames, s.last_bbox);
            }
            if let Some(s) = stats.first() {
                println!("z-order: {:?}", s.last_z_order);
            }
            Ok(())
        }
        Commands::Shaders => {
            for (id, meta) in registry.list() {
                let backends: Vec<String> = meta.backends().map(|b| b.to_string()).collect();
                println!("{:<20} {:<32} [{}]", id, meta.name, backends.join(", "));
            }
            Ok(())
        }
    }
}

/// Build the raycaster for the configured device, with CPU fallback.
fn make_raycaster(config: &RenderConfig, registry: Arc<ShaderRegistry>) -> Result<(Arc<Raycaster>, Backend)> {
    let (backend, gpu) = select_backend(config.device)?;
    let mut raycaster = Raycaster::new(registry).with_threads(config.threads);
    if let Some(ctx) = gpu {
        tracing::info!(adapter = ctx.adapter_name(), "using GPU backend");
        raycaster = raycaster.with_gpu(ctx);
    }
    Ok((Arc::new(raycaster), backend))
}

fn configure<S: Shader>(config: &RenderConfig, mut shader: S) -> S {
    let header = shader.header_mut();
    header.step = config.step;
    header.max_steps = config.max_steps;
    shader
}

fn cmd_render(config: &RenderConfig, registry: Arc<ShaderRegistry>, output: &Path) -> Result<()> {
    let (raycaster, backend) = make_raycaster(config, registry)?;
    let dim = config.grid();
    let exhibit = Exhibit::for_grid(dim);
    let camera = config.camera.to_camera();
    let [w, h] = config.resolution;
    let id = ShaderId::from(config.shader.as_str());
    let volume = BoundingBox::from_dim(dim);

    let start = std::time::Instant::now();
    let image = match config.shader.as_str() {
        builtin::MIP => {
            let shader = configure(config, MipShader::new(dim));
            VolumeRankRenderer::new(raycaster, exhibit, id, shader, backend, w, h)
                .with_march_passes(config.march_passes)
                .render_offline(&camera, volume)?
        }
        builtin::DENSITY => {
            let shader = configure(config, DensityShader::new(dim).with_density(config.density));
            VolumeRankRenderer::new(raycaster, exhibit, id, shader, backend, w, h)
                .with_march_passes(config.march_passes)
                .render_offline(&camera, volume)?
        }
        other => anyhow::bail!("no renderer for shader '{other}'"),
    };
    tracing::info!(elapsed = ?start.elapsed(), %backend, "rendered {}x{}", w, h);

    image
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {}", output.display());
    Ok(())
}

fn cmd_cluster(
    config: &RenderConfig,
    registry: Arc<ShaderRegistry>,
    frames: u64,
    out_dir: Option<PathBuf>,
) -> Result<Vec<LoopStats>> {
    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let (raycaster, backend) = make_raycaster(config, registry)?;
    let dim = config.grid();
    tracing::info!(ranks = config.ranks, frames, %backend, "starting cluster");

    match config.shader.as_str() {
        builtin::MIP => {
            let shader = configure(config, MipShader::new(dim));
            run_cluster(config, raycaster, backend, shader, frames, out_dir)
        }
        builtin::DENSITY => {
            let shader = configure(config, DensityShader::new(dim).with_density(config.density));
            run_cluster(config, raycaster, backend, shader, frames, out_dir)
        }
        other => anyhow::bail!("no renderer for shader '{other}'"),
    }
}

/// One thread per rank, all joined before returning.
fn run_cluster<S: Shader>(
    config: &RenderConfig,
    raycaster: Arc<Raycaster>,
    backend: Backend,
    shader: S,
    frames: u64,
    out_dir: Option<PathBuf>,
) -> Result<Vec<LoopStats>> {
    let comms = LocalCluster::new(config.ranks, config.protocol_timeout())?;
    let dim = config.grid();
    let exhibit = Exhibit::for_grid(dim);
    let camera = config.camera.to_camera();
    let [w, h] = config.resolution;
    let id = ShaderId::from(config.shader.as_str());

    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let raycaster = Arc::clone(&raycaster);
                let id = id.clone();
                let out_dir = out_dir.clone();
                s.spawn(move || -> volcast::Result<LoopStats> {
                    let rank = comm.rank();
                    let culler = ExhibitCuller::new(exhibit, BoundingBox::from_dim(dim));
                    let mut node = DistributedRenderer::new(comm, dim, culler)?;
                    let mut host = FixedFrameLoop::new(frames, &camera)
                        .with_orbit(config.orbit_degrees_per_frame);
                    let mut renderer = VolumeRankRenderer::new(raycaster, exhibit, id, shader, backend, w, h)
                        .with_march_passes(config.march_passes);
                    let mut sink = FrameWriter::new(rank);
                    if let Some(dir) = out_dir {
                        sink = sink.with_output(dir);
                    }
                    node.run(&mut host, &mut renderer, sink)
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .map_err(|_| anyhow::anyhow!("rank {rank} panicked"))?
                    .with_context(|| format!("rank {rank}"))
            })
            .collect()
    })
}
