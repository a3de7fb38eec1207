mod cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    // A file argument plays that file; without one the built-in scenarios run
    let args: Vec<String> = std::env::args().collect();
    match args.get(1) {
        Some(path) => cli::play_file(path),
        None => cli::run_scenarios(),
    }
}
