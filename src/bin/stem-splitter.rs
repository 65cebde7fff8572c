use clap::{Parser, Subcommand};
use std::{path::PathBuf, process};
use stem_splitter_server::{
    server, PipelineState, ServiceConfig, StemMode, StemSpec, UploadedAsset,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stem-splitter")]
#[command(about = "Split audio into streamable stems over HTTP", long_about = None)]
#[command(version)]
struct Cli {
    /// Optional config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// HTTP bind address, e.g. 0.0.0.0:8000
        #[arg(long)]
        bind: Option<String>,

        /// Host advertised in returned URLs
        #[arg(long)]
        public_host: Option<String>,

        /// Port advertised in returned URLs
        #[arg(long)]
        public_port: Option<u16>,

        /// Stem count (2 or 4)
        #[arg(short, long)]
        stems: Option<StemMode>,
    },

    /// Run one local file through the pipeline and print the response JSON
    Split {
        #[arg(short, long)]
        input: PathBuf,

        /// Stem count (2 or 4)
        #[arg(short, long)]
        stems: Option<StemMode>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// List the stems a mode produces
    Stems {
        #[arg(short, long, default_value = "4")]
        stems: StemMode,
    },
}

fn main() {
    let cli = Cli::parse();

    let quiet = matches!(cli.command, Commands::Split { quiet: true, .. });
    init_logging(quiet);

    let result = match cli.command {
        Commands::Serve {
            bind,
            public_host,
            public_port,
            stems,
        } => load_config(cli.config.as_ref()).and_then(|mut cfg| {
            cfg.server.bind = bind.or(cfg.server.bind);
            cfg.server.public_host = public_host.or(cfg.server.public_host);
            cfg.server.public_port = public_port.or(cfg.server.public_port);
            if let Some(stems) = stems {
                cfg.separation.stems = stems;
            }
            handle_serve(cfg)
        }),
        Commands::Split {
            input,
            stems,
            quiet,
        } => load_config(cli.config.as_ref()).and_then(|mut cfg| {
            if let Some(stems) = stems {
                cfg.separation.stems = stems;
            }
            handle_split(cfg, input, quiet)
        }),
        Commands::Stems { stems } => handle_stems(stems),
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn init_logging(quiet: bool) {
    let default = if quiet {
        "warn"
    } else {
        "info,stem_splitter_server=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServiceConfig> {
    match path {
        Some(path) => ServiceConfig::load(path),
        None => Ok(ServiceConfig::default()),
    }
}

fn handle_serve(cfg: ServiceConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(cfg))
}

fn handle_split(cfg: ServiceConfig, input: PathBuf, quiet: bool) -> anyhow::Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let mut orchestrator = cfg.build_orchestrator()?;
    if !quiet {
        eprintln!("🎵 Stem Splitter");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("Input:   {}", input.display());
        eprintln!("Output:  {}", orchestrator.output_root().display());
        eprintln!("Stems:   {}", cfg.separation.stems);
        eprintln!("Engine:  {}", cfg.separation.program);
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!();
        orchestrator = orchestrator.with_progress(print_stage);
    }

    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(&input)?;

    let outcome = orchestrator.run(UploadedAsset { file_name, bytes })?;
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome.to_response_json())?
    );
    Ok(())
}

fn print_stage(state: &PipelineState) {
    let line = match state {
        PipelineState::Resetting => "🧹 Resetting workspace".to_string(),
        PipelineState::Saving => "💾 Saving upload".to_string(),
        PipelineState::Separating => "🔄 Separating stems".to_string(),
        PipelineState::Transcoding => "🎚️ Transcoding stems".to_string(),
        PipelineState::Responding => "📦 Building manifest".to_string(),
        PipelineState::Succeeded => "✅ Split completed successfully!".to_string(),
        PipelineState::Failed(reason) => format!("❌ Split failed: {reason}"),
    };
    eprintln!("{line}");
}

fn handle_stems(stems: StemMode) -> anyhow::Result<()> {
    eprintln!("📋 Stems for {}-stem mode", stems);
    eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for slot in StemSpec::for_mode(stems).slots {
        println!("{}\t{}", slot.label, slot.field);
    }
    Ok(())
}
