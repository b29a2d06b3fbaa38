use clap::Parser;
use std::process::ExitCode;
use tracing::info;

use poicrawl::app::App;
use poicrawl::cli::Args;
use poicrawl::logging::setup_logging;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut app = match App::new(&args.services).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("failed to initialize application: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    setup_logging(app.config(), args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) { "development" } else { "production" },
        "starting poicrawl"
    );

    app.start_services();
    app.run().await
}
