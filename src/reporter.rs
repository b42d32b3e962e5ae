use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use chrono_tz::America::New_York;

use crate::mirror::MediaRecord;

/// Narrates applied changes to stdout and an append-only log file. This is
/// the user-facing change history, separate from diagnostic logging.
pub struct Reporter {
    log_path: PathBuf,
}

impl Reporter {
    pub fn new(log_path: PathBuf) -> Reporter {
        Reporter { log_path }
    }

    pub fn report(&self, message: &str) {
        let stamp = Utc::now()
            .with_timezone(&New_York)
            .format("[%a, %B %d, %Y @ %H:%M:%S %Z] :\t ");

        let line = format!("{}{}\n", stamp, message);

        print!("{}", line);

        if let Err(e) = self.append(&line) {
            error!(
                "can't append to change log '{}': {}",
                self.log_path.to_string_lossy(),
                e
            );
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(line.as_bytes())
    }
}

pub fn metadata_block(record: &MediaRecord) -> String {
    format!(
        "\t\tTitle: {}\n\t\tArtist: {}\n\t\tAlbum: {}\n\t\tTrack Number: {}\n\t\tGenre: {}\n",
        record.title, record.artist, record.album, record.track_number, record.genre
    )
}
