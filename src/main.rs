//! signalpath CLI: build a small demo project, then either play it live
//! through the default audio device or bounce it to a WAV file offline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use signalpath::backend::{AudioBackend, CpalBackend, DummyBackend};
use signalpath::config::EngineConfig;
use signalpath::project_model::{ProjectModel, TrackKind, TrackSpec};
use signalpath::Engine;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "signalpath", about = "Realtime DSP routing engine demo CLI")]
struct Cli {
    /// Path to a TOML engine configuration file; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play the demo project through the default output device.
    Play {
        /// Seconds to run before stopping.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Render the demo project offline to a WAV file.
    Bounce {
        /// Output WAV path.
        #[arg(long, default_value = "bounce.wav")]
        out: PathBuf,
        /// Seconds of audio to render.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Print the compiled demo graph as Graphviz dot source.
    Dot,
    /// Print the compiled demo graph as a standalone SVG.
    Svg,
}

fn load_config(path: Option<&PathBuf>) -> CliResult<EngineConfig> {
    match path {
        Some(p) => {
            let s = std::fs::read_to_string(p)?;
            Ok(EngineConfig::from_toml_str(&s)?)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn demo_project() -> ProjectModel {
    let mut project = ProjectModel::new();
    project.add_track(TrackSpec {
        name: "drums".to_string(),
        kind: TrackKind::Audio,
        plugin: None,
        send_to_master: true,
    });
    project.add_track(TrackSpec {
        name: "synth".to_string(),
        kind: TrackKind::Instrument,
        plugin: Some("passthrough".into()),
        send_to_master: true,
    });
    project.add_track(TrackSpec {
        name: "master".to_string(),
        kind: TrackKind::Master,
        plugin: None,
        send_to_master: false,
    });
    project
}

fn build_engine(config: EngineConfig) -> CliResult<Arc<Engine>> {
    let engine = Arc::new(Engine::new(config.clone())?);
    let project = demo_project();
    let builder = signalpath::project_model::compile_project(&project, &config);
    builder.finish(&engine.graph_handle())?;
    Ok(engine)
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Dot => {
            let project = demo_project();
            let builder = signalpath::project_model::compile_project(&project, &config);
            let graph = builder.build(0)?;
            println!("{}", signalpath::graph_builder::export_dot(&graph));
        }
        Command::Svg => {
            let project = demo_project();
            let builder = signalpath::project_model::compile_project(&project, &config);
            let graph = builder.build(0)?;
            println!("{}", signalpath::graph_builder::export_svg(&graph));
        }
        Command::Play { seconds } => {
            let engine = build_engine(config)?;
            let mut backend = CpalBackend::new()?;
            engine.clone().run(&mut backend)?;
            std::thread::sleep(std::time::Duration::from_secs(seconds));
            backend.stop();
        }
        Command::Bounce { out, seconds } => {
            let engine = build_engine(config.clone())?;
            let mut backend = DummyBackend::new(config.sample_rate, 2);
            engine.clone().run(&mut backend)?;

            let spec = hound::WavSpec {
                channels: 2,
                sample_rate: config.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            let mut writer = hound::WavWriter::create(&out, spec)?;
            let total_frames = config.sample_rate as u64 * seconds;
            let mut rendered = 0u64;
            while rendered < total_frames {
                let this_block = config.block_len.min((total_frames - rendered) as usize);
                let samples = backend.pump(this_block);
                for s in samples {
                    writer.write_sample(s)?;
                }
                rendered += this_block as u64;
            }
            writer.finalize()?;
            println!("wrote {} seconds to {}", seconds, out.display());
        }
    }

    Ok(())
}
