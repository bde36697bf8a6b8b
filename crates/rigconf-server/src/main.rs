use clap::Parser;
use rigconf_core::{install_signal_handler, Manager, ManagerConfig};
use rigconf_runtime::{select_registry, ParamTree};
use rigconf_server::{ServerError, DEFAULT_PORT};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "rigconfd", about = "rigconf configuration manager daemon")]
struct Cli {
    /// Daemon settings (TOML). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Parameter tree (TOML) holding configuration definitions and
    /// controller parameters.
    #[arg(long)]
    params: PathBuf,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Resource registry backend.
    #[arg(long, default_value = "sim")]
    registry: String,
}

fn run(cli: &Cli) -> Result<(), ServerError> {
    let config = match &cli.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    let params = Arc::new(ParamTree::load(&cli.params)?);
    let registry = select_registry(&cli.registry)?;
    info!("parameters: {}", cli.params.display());

    let manager = Arc::new(Manager::new(registry, params, config)?);

    let exit = Arc::new(AtomicBool::new(false));
    install_signal_handler(Arc::clone(&exit));

    let addr = format!("{}:{}", cli.bind, cli.port);
    let server = Arc::new(rigconf_server::bind(&addr)?);
    info!("starting rigconfd on {addr}");

    let result = rigconf_server::serve_until_exit(manager, server, &exit);
    info!("rigconfd shut down");
    result
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RIGCONF_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}
