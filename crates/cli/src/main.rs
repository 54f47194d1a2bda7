use env_logger::Env;

fn main() {
    env_logger::init_from_env(Env::default().default_filter_or("warn"));

    if let Err(error) = thumbnail_cache_cli::run(std::env::args_os()) {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}
