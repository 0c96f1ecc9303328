//! accel-runtime CLI
//!
//! # Commands
//!
//! - `probe` - Print the detected host capabilities
//! - `bench` - Run the benchmark suite and print the report
//! - `compile` - Compile a local model file and print the artifact summary

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;

use accel_runtime::common::{Backend, OptimizationLevel, QuantizationType};
use accel_runtime::config::{BackendPreference, ConfigManager};
use accel_runtime::cache::CompilationTarget;
use accel_runtime::probe::CapabilityProbe;
use accel_runtime::AccelerationRuntime;

/// Capability-aware compute acceleration runtime
#[derive(Parser)]
#[command(name = "accel-runtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected host capabilities as JSON
    Probe {
        /// Advertise the custom backend
        #[arg(long)]
        custom: bool,
    },
    /// Run the benchmark suite and print the report as JSON
    Bench(BenchArgs),
    /// Compile a local model file and print the artifact summary
    ///
    /// Examples:
    ///   accel-runtime compile ./model.safetensors
    ///   accel-runtime compile ./model.gguf --backend runtime-a --level O3 --quantize int8
    Compile {
        /// Model file (.safetensors, .gguf or .onnx)
        #[arg(value_name = "MODEL")]
        model: PathBuf,

        /// Target backend
        #[arg(short, long, default_value = "native")]
        backend: Backend,

        /// Optimization level (O0, O1, O2, O3, Os)
        #[arg(short, long, default_value = "O2")]
        level: OptimizationLevel,

        /// Quantization (f16, int8, int4)
        #[arg(short, long)]
        quantize: Option<QuantizationType>,
    },
}

#[derive(Args)]
struct BenchArgs {
    /// Backends to compare, repeatable
    #[arg(short, long = "backend")]
    backends: Vec<Backend>,

    /// Timed iterations per workload
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Discarded iterations per workload
    #[arg(short, long)]
    warmup: Option<usize>,

    /// Include the stress category
    #[arg(long)]
    stress: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let mut settings = manager.settings().clone();
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    let _guard = accel_logging::init(&settings.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Probe { custom } => {
            let descriptor = CapabilityProbe::new().enable_custom_backend(custom).detect();
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Commands::Bench(args) => {
            let mut options = settings.benchmark.clone();
            if !args.backends.is_empty() {
                options.backends = args.backends;
            }
            if let Some(iterations) = args.iterations {
                options.iterations = iterations;
            }
            if let Some(warmup) = args.warmup {
                options.warmup_iterations = warmup;
            }
            options.include_stress |= args.stress;

            let runtime = AccelerationRuntime::builder().settings(settings).build()?;
            let report = runtime.benchmark(Some(&options)).await?;
            runtime.shutdown().await?;

            let rendered = report.to_json()?;
            match args.output {
                Some(path) => {
                    tokio::fs::write(&path, rendered)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Benchmark report written to {}", path.display());
                }
                None => println!("{}", rendered),
            }
        }
        Commands::Compile {
            model,
            backend,
            level,
            quantize,
        } => {
            let mut target = CompilationTarget::new(backend, level);
            if let Some(quantization) = quantize {
                target = target.quantized(quantization);
            }

            // Compilation does not need the target backend to be the preferred one
            settings.acceleration.backend = BackendPreference::Auto;
            let runtime = AccelerationRuntime::builder().settings(settings).build()?;
            let (artifact, validation) = runtime.compile_file(&model, &target).await?;
            runtime.shutdown().await?;

            let summary = json!({
                "artifact": &*artifact,
                "validation": validation,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
