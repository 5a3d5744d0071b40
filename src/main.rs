use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wg_confgen::keys::{get_key_provider, KeygenBackend};

#[derive(Parser)]
#[command(name = "wg-confgen")]
#[command(about = "Generate WireGuard server and client configs from a JSON topology")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding config/ and generated/ (defaults to the executable's directory)
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// How new key pairs are generated
    #[arg(long, global = true, value_enum, default_value_t = KeygenBackend::Wg)]
    keygen: KeygenBackend,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate configs from config/config.json (the default)
    Generate,
    /// Write a default wg-confgen.toml into the work directory
    Init,
}

fn default_work_dir() -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let work_dir = match cli.work_dir {
        Some(dir) => dir,
        None => default_work_dir()?,
    };
    info!("Working directory: {}", work_dir.display());

    if let Some(Commands::Init) = cli.command {
        info!("Generating default settings...");
        let path = wg_confgen::Settings::init(&work_dir)?;
        println!("Created default config: {}", path.display());
        return Ok(());
    }

    let settings = wg_confgen::Settings::load_or_default(&work_dir)?;
    let provider = get_key_provider(cli.keygen, &settings.keygen.wg_binary);

    match wg_confgen::run(&work_dir, &settings, provider.as_ref()) {
        Ok(summary) => {
            info!(
                "Done: {} files, {} new key pairs",
                summary.files.len(),
                summary.generated_keys
            );
            Ok(())
        }
        Err(e) => {
            error!("Generation failed: {}", e);
            std::process::exit(1);
        }
    }
}
