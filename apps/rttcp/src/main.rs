use rttcp_core::config::load_config;
use rttcp_core::Runtime;

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    config: PathBuf,
    #[clap(short, long, parse(from_os_str), value_name = "FILE")]
    outfile: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let mut config = load_config(&args.config);
    if let Some(outfile) = args.outfile {
        config.outfile = Some(outfile.display().to_string());
    }

    let level = match config.debug {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut runtime = Runtime::new(config).unwrap();
    runtime.run().unwrap();
}
