use std::process;

use vessel::cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::parse();

    if let Err(e) = cli::commands::dispatch(args) {
        eprintln!("vessel: {e:#}");
        process::exit(1);
    }
}
