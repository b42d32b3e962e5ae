use std::error::Error as StdError;

use chrono::Utc;
use chrono_tz::America::New_York;

use crate::matcher::{self, MediaChange};
use crate::mirror::{EntityType, MediaField, Mirror};
use crate::reporter::{self, Reporter};
use crate::source::{EngagementRecord, Snapshot, SourceReader};

#[derive(Debug)]
pub enum Error {
    DatabaseError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::DatabaseError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::DatabaseError(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for Error {}

pub type Result<T> = std::result::Result<T, Error>;

enum EngagementOutcome {
    Added,
    Updated,
    Unchanged,
}

/// One reconciliation pass worth of context: the mirror connection, the
/// source reader and the change reporter. No globals.
pub struct Reconciler {
    mirror: Mirror,
    source: SourceReader,
    reporter: Reporter,
}

impl Reconciler {
    pub fn new(mirror: Mirror, source: SourceReader, reporter: Reporter) -> Reconciler {
        Reconciler {
            mirror,
            source,
            reporter,
        }
    }

    /// Run one full pass: snapshot, match, update, report. A snapshot read
    /// error aborts the whole pass; errors local to one record are logged
    /// and the pass continues.
    pub fn run_pass(&mut self) -> Result<()> {
        debug!("checking for updates");

        let snapshot = match self.source.read_snapshot() {
            Ok(s) => s,
            Err(e) => {
                error!("can't read source snapshot: {}", e);
                return Err(e.into());
            }
        };

        if self.mirror.media_count()? == 0 {
            self.full_sync(&snapshot)?;
        } else {
            self.reconcile_media(&snapshot)?;
        }

        self.reconcile_engagement(&snapshot)?;

        Ok(())
    }

    fn full_sync(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.reporter
            .report("No media metadata detected, starting full sync");

        let inserted = self.mirror.insert_media_all(&snapshot.media)?;

        self.reporter
            .report(&format!("Added {} media entries", inserted));

        Ok(())
    }

    fn reconcile_media(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mirror_media = self.mirror.media()?;

        let result = matcher::classify(&mirror_media, &snapshot.media);

        for change in &result.changes {
            if let Err(e) = self.apply_media_change(snapshot, change) {
                error!(
                    "can't apply {} change '{}' -> '{}': {}",
                    change.rule.label(),
                    change.old_id,
                    change.new_id,
                    e
                );
            }
        }

        let mut added = 0;
        for record in &result.added {
            match self.mirror.insert_media(record) {
                Ok(()) => added += 1,
                Err(e) => error!("can't insert media '{}': {}", record.song_id, e),
            }
        }

        if added > 0 {
            self.reporter
                .report(&format!("Added {} new media entries", added));
        }

        Ok(())
    }

    fn apply_media_change(&mut self, snapshot: &Snapshot, change: &MediaChange) -> Result<()> {
        let new = match snapshot.media.iter().find(|r| r.song_id == change.new_id) {
            Some(r) => r,
            None => return Ok(()),
        };

        let old = match self.mirror.media_by_id(&change.old_id)? {
            Some(r) => r,
            None => return Ok(()),
        };

        let mut text = format!("Updated song metadata: {} changed", change.rule.label());
        text += &format!(
            "\n\t[{}] OLD\n{}",
            old.song_id,
            reporter::metadata_block(&old)
        );
        text += &format!(
            "\n\t[{}] NEW\n{}",
            new.song_id,
            reporter::metadata_block(new)
        );
        self.reporter.report(&text);

        // Field updates are keyed by the still-valid old id; the id update
        // comes last because it invalidates that key.
        for field in change.rule.updates(new) {
            self.mirror.update_media_field(&change.old_id, &field)?;
        }

        self.mirror
            .update_media_field(&change.old_id, &MediaField::SongId(new.song_id.clone()))?;
        self.mirror.rename_tracked(&change.old_id, &new.song_id)?;

        Ok(())
    }

    fn reconcile_engagement(&mut self, snapshot: &Snapshot) -> Result<()> {
        let today = today();

        for &entity in EntityType::ALL.iter() {
            let mut added = 0;
            let mut updated = 0;

            for record in snapshot.engagement.iter().filter(|r| r.entity == entity) {
                match self.reconcile_engagement_record(record, &today) {
                    Ok(EngagementOutcome::Added) => added += 1,
                    Ok(EngagementOutcome::Updated) => updated += 1,
                    Ok(EngagementOutcome::Unchanged) => {}
                    Err(e) => {
                        error!(
                            "can't reconcile {} '{}' for user '{}': {}",
                            entity.name(),
                            record.entity_id,
                            record.user_id,
                            e
                        );
                    }
                }
            }

            if added > 0 {
                self.reporter.report(&format!(
                    "Added {} new tracked {} entries",
                    added,
                    entity.name()
                ));
            }
            if updated > 0 {
                self.reporter.report(&format!(
                    "Updated {} tracked {} entries",
                    updated,
                    entity.name()
                ));
            }
        }

        Ok(())
    }

    fn reconcile_engagement_record(
        &mut self,
        record: &EngagementRecord,
        today: &str,
    ) -> Result<EngagementOutcome> {
        let existing = match self
            .mirror
            .tracked(record.entity, &record.entity_id, &record.user_id)?
        {
            Some(counts) => counts,
            None => {
                // First observation: mirror the absolute values, no delta.
                self.mirror.insert_tracked(
                    record.entity,
                    &record.entity_id,
                    &record.user_id,
                    record.play_count,
                    record.starred,
                    today,
                )?;
                return Ok(EngagementOutcome::Added);
            }
        };

        if existing.play_count == record.play_count && existing.starred == record.starred {
            return Ok(EngagementOutcome::Unchanged);
        }

        let delta = if record.play_count > existing.play_count {
            record.play_count - existing.play_count
        } else if record.play_count < existing.play_count {
            // Source counter reset; earlier plays are already recorded, so
            // the new absolute count is the increase.
            record.play_count
        } else {
            0
        };

        if delta > 0 {
            self.mirror.add_play_delta(
                record.entity,
                &record.entity_id,
                &record.user_id,
                today,
                delta,
            )?;
        }

        self.mirror.update_tracked(
            record.entity,
            &record.entity_id,
            &record.user_id,
            record.play_count,
            record.starred,
        )?;

        Ok(EngagementOutcome::Updated)
    }
}

fn today() -> String {
    Utc::now()
        .with_timezone(&New_York)
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use rusqlite::{params, Connection, NO_PARAMS};
    use tempfile::TempDir;

    use crate::mirror::MirrorSource;

    fn create_source_db(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE media_file (
                id TEXT PRIMARY KEY NOT NULL,
                path TEXT,
                title TEXT,
                album TEXT,
                artist TEXT,
                artist_id TEXT,
                track_number INTEGER,
                genre TEXT,
                created_at TEXT,
                album_id TEXT);
            CREATE TABLE annotation (
                item_id TEXT NOT NULL,
                item_type TEXT NOT NULL,
                user_id TEXT NOT NULL,
                play_count INTEGER,
                starred BOOL);",
        )
        .unwrap();
        conn
    }

    fn insert_source_media(
        conn: &Connection,
        id: &str,
        title: &str,
        path: &str,
        track_number: i64,
        genre: &str,
    ) {
        conn.execute(
            "INSERT INTO media_file
                (id, path, title, album, artist, artist_id, track_number,
                genre, created_at, album_id)
            VALUES (?, ?, ?, 'Album', 'Artist', 'ar1', ?, ?, '2024-01-02T10:00:00Z', 'al1')",
            params![id, path, title, track_number, genre],
        )
        .unwrap();
    }

    fn set_play_count(conn: &Connection, item_id: &str, count: i64) {
        let changed = conn
            .execute(
                "UPDATE annotation SET play_count = ? WHERE item_id = ?",
                params![count, item_id],
            )
            .unwrap();
        assert_eq!(changed, 1);
    }

    fn new_reconciler(dir: &TempDir) -> Reconciler {
        let mirror_source = MirrorSource::create(dir.path().join("wrapped.db"))
            .unwrap()
            .unwrap();

        Reconciler::new(
            mirror_source.get().unwrap(),
            SourceReader::new(dir.path().join("navidrome.db")),
            Reporter::new(dir.path().join("wrapped.log")),
        )
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, NO_PARAMS, |row| row.get(0)).unwrap()
    }

    #[test]
    fn full_sync_then_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        insert_source_media(&source, "s2", "Y", "/b", 2, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('s1', 'media_file', 'u1', 4, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM all_media"), 2);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM tracked_songs"), 1);
        // First observation records the absolute count, no delta.
        assert_eq!(count(conn, "SELECT COUNT(*) FROM media_plays"), 0);

        let before = reconciler.mirror.media().unwrap();

        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        assert_eq!(reconciler.mirror.media().unwrap(), before);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM media_plays"), 0);
        assert_eq!(
            count(conn, "SELECT play_count FROM tracked_songs WHERE song_id = 's1'"),
            4
        );
    }

    #[test]
    fn genre_change_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "a", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('a', 'media_file', 'u1', 2, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        // The source rewrites the song with a new id and a new genre.
        source
            .execute("DELETE FROM media_file WHERE id = 'a'", NO_PARAMS)
            .unwrap();
        insert_source_media(&source, "b", "X", "/a", 1, "Jazz");
        source
            .execute(
                "UPDATE annotation SET item_id = 'b' WHERE item_id = 'a'",
                NO_PARAMS,
            )
            .unwrap();

        reconciler.run_pass().unwrap();

        let record = reconciler.mirror.media_by_id("b").unwrap().unwrap();
        assert_eq!(record.genre, "Jazz");
        assert_eq!(record.title, "X");
        assert!(reconciler.mirror.media_by_id("a").unwrap().is_none());

        // Engagement history followed the rename.
        assert!(reconciler
            .mirror
            .tracked(EntityType::Song, "a", "u1")
            .unwrap()
            .is_none());
        let moved = reconciler
            .mirror
            .tracked(EntityType::Song, "b", "u1")
            .unwrap()
            .unwrap();
        assert_eq!(moved.play_count, 2);
    }

    #[test]
    fn play_count_increase_accumulates_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('s1', 'media_file', 'u1', 3, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        set_play_count(&source, "s1", 10);
        reconciler.run_pass().unwrap();

        set_play_count(&source, "s1", 12);
        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        let increase: i64 = conn
            .query_row(
                "SELECT play_increase FROM media_plays
                WHERE id = 's1' AND media_type = 'song' AND user_id = 'u1' AND date = ?",
                params![today()],
                |row| row.get(0),
            )
            .unwrap();
        // 3 -> 10 -> 12 over one day: total increase 9.
        assert_eq!(increase, 9);
        assert_eq!(
            count(conn, "SELECT play_count FROM tracked_songs WHERE song_id = 's1'"),
            12
        );
    }

    #[test]
    fn counter_reset_counts_new_absolute_value() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('s1', 'media_file', 'u1', 50, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        // Source maintenance reset the counter; history before the reset is
        // already recorded, so only the new count is an increase.
        set_play_count(&source, "s1", 5);
        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        let increase: i64 = conn
            .query_row(
                "SELECT play_increase FROM media_plays WHERE id = 's1'",
                NO_PARAMS,
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(increase, 5);
        assert_eq!(
            count(conn, "SELECT play_count FROM tracked_songs WHERE song_id = 's1'"),
            5
        );
    }

    #[test]
    fn album_and_artist_engagement_tracked_independently() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('al1', 'album', 'u1', 7, 1)",
                NO_PARAMS,
            )
            .unwrap();
        source
            .execute(
                "INSERT INTO annotation VALUES ('ar1', 'artist', 'u1', 9, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        let album = reconciler
            .mirror
            .tracked(EntityType::Album, "al1", "u1")
            .unwrap()
            .unwrap();
        assert_eq!(album.play_count, 7);
        assert!(album.starred);

        let artist = reconciler
            .mirror
            .tracked(EntityType::Artist, "ar1", "u1")
            .unwrap()
            .unwrap();
        assert_eq!(artist.play_count, 9);

        let conn = reconciler.mirror.connection();
        let song_count: i64 = conn
            .query_row(
                "SELECT song_count FROM tracked_artists WHERE artist_id = 'ar1'",
                NO_PARAMS,
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(song_count, 1);
    }

    #[test]
    fn new_media_inserted_during_diff_pass() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        insert_source_media(&source, "s2", "Y", "/b", 1, "Rock");
        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM all_media"), 2);
        assert!(reconciler.mirror.media_by_id("s2").unwrap().is_some());
    }

    #[test]
    fn bad_record_is_skipped_and_pass_continues() {
        use crate::mirror::MediaRecord;

        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        let record = |song_id: &str, title: &str| MediaRecord {
            song_id: song_id.to_string(),
            album_id: "al1".to_string(),
            artist_id: "ar1".to_string(),
            path: "/n".to_string(),
            title: title.to_string(),
            album: "Album".to_string(),
            artist: "Artist".to_string(),
            track_number: 1,
            created: "2024-01-02".to_string(),
            genre: "Rock".to_string(),
        };

        // Two new records sharing an id: the second insert violates the
        // all_media primary key and must not abort the rest of the pass.
        let snapshot = Snapshot {
            media: vec![
                reconciler.mirror.media_by_id("s1").unwrap().unwrap(),
                record("n1", "Y"),
                record("n1", "Z"),
            ],
            engagement: Vec::new(),
        };

        reconciler.reconcile_media(&snapshot).unwrap();

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM all_media"), 2);
        assert_eq!(
            reconciler.mirror.media_by_id("n1").unwrap().unwrap().title,
            "Y"
        );
    }

    #[test]
    fn unknown_annotation_type_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('p1', 'podcast', 'u1', 3, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM tracked_songs"), 0);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM tracked_albums"), 0);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM tracked_artists"), 0);
    }

    #[test]
    fn starred_change_refreshed_without_delta() {
        let dir = tempfile::tempdir().unwrap();
        let source = create_source_db(&dir.path().join("navidrome.db"));

        insert_source_media(&source, "s1", "X", "/a", 1, "Rock");
        source
            .execute(
                "INSERT INTO annotation VALUES ('s1', 'media_file', 'u1', 4, 0)",
                NO_PARAMS,
            )
            .unwrap();

        let mut reconciler = new_reconciler(&dir);
        reconciler.run_pass().unwrap();

        // Only the starred flag flips; the counter is unchanged.
        source
            .execute(
                "UPDATE annotation SET starred = 1 WHERE item_id = 's1'",
                NO_PARAMS,
            )
            .unwrap();
        reconciler.run_pass().unwrap();

        let tracked = reconciler
            .mirror
            .tracked(EntityType::Song, "s1", "u1")
            .unwrap()
            .unwrap();
        assert!(tracked.starred);
        assert_eq!(tracked.play_count, 4);

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM media_plays"), 0);
    }

    #[test]
    fn unreachable_source_aborts_pass() {
        let dir = tempfile::tempdir().unwrap();

        let mirror_source = MirrorSource::create(dir.path().join("wrapped.db"))
            .unwrap()
            .unwrap();

        let mut reconciler = Reconciler::new(
            mirror_source.get().unwrap(),
            SourceReader::new(dir.path().join("missing.db")),
            Reporter::new(dir.path().join("wrapped.log")),
        );

        assert!(reconciler.run_pass().is_err());

        let conn = reconciler.mirror.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM all_media"), 0);
    }
}
