#[macro_use]
extern crate log;

mod db_meta;
mod logger;
mod matcher;
mod mirror;
mod reconcile;
mod reporter;
mod schema;
mod source;

use std::path::Path;
use std::thread;
use std::time::Duration;

use clap::Arg;

use mirror::MirrorSource;
use reconcile::Reconciler;
use reporter::Reporter;
use source::SourceReader;

pub const TRACKERD_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let matches = clap::App::new("trackerd")
        .version(TRACKERD_VERSION)
        .arg(
            Arg::with_name("directory")
                .long("directory")
                .help("Mirror database and change log directory")
                .default_value("~/.trackerd"),
        )
        .arg(
            Arg::with_name("source")
                .long("source")
                .help("Authoritative media library database (read-only)")
                .default_value("navidrome.db"),
        )
        .arg(
            Arg::with_name("interval")
                .long("interval")
                .help("Seconds between reconciliation passes")
                .default_value("1"),
        )
        .get_matches();

    logger::init();

    info!("{}", TRACKERD_VERSION);

    let directory = shellexpand::tilde(matches.value_of("directory").unwrap()).into_owned();
    let directory = Path::new(&directory);

    std::fs::create_dir_all(directory).expect("can't create directory");

    let interval: u64 = matches
        .value_of("interval")
        .unwrap()
        .parse()
        .expect("invalid interval");

    let mirror_source = MirrorSource::create(directory.join("wrapped.db"))
        .unwrap()
        .unwrap();

    let source = SourceReader::new(Path::new(matches.value_of("source").unwrap()).to_path_buf());
    let reporter = Reporter::new(directory.join("wrapped.log"));

    let mirror = mirror_source.get().expect("can't open mirror");

    let mut reconciler = Reconciler::new(mirror, source, reporter);

    loop {
        if let Err(e) = reconciler.run_pass() {
            error!("reconciliation pass failed: {}", e);
        }

        thread::sleep(Duration::from_secs(interval));
    }
}
