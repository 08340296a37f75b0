use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = aircastctl::Cli::parse();
    if let Err(err) = aircastctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
