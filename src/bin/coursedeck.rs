use std::env;

use coursedeck::AppConfig;

#[tokio::main]
async fn main() -> coursedeck::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();

    #[cfg(feature = "cli")]
    {
        let command = match coursedeck::cli::parse_args(&args) {
            Ok(Some(command)) => command,
            Ok(None) => {
                coursedeck::cli::print_usage();
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!();
                coursedeck::cli::print_usage();
                std::process::exit(1);
            }
        };

        let config = AppConfig::load_or_create(&AppConfig::default_path())?.with_env_overrides();
        log::debug!("Using API at {}", config.api.base_url);
        coursedeck::cli::run(config, command).await
    }
    #[cfg(not(feature = "cli"))]
    {
        let _ = (args, AppConfig::default_path());
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}
