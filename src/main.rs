use clap::Parser;
use logcast::cli::{Cli, Commands};
use logcast::config::build_config;
use logcast::{logging, server, stream};
use tracing::{debug, error};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log = logging::init(cli.verbose);

    let app_config = build_config(&cli);
    log.set_verbose(app_config.verbose);
    debug!(config = ?app_config, "effective config");

    let result = match cli.command {
        Some(Commands::Stream(ref stream_args)) => {
            stream::run_stream(&app_config, stream_args).await
        }
        Some(Commands::Serve(_)) | None => server::serve(&app_config).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
