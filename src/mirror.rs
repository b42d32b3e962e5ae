use std::error::Error as StdError;
use std::path::PathBuf;

use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Result, Row, NO_PARAMS};

use crate::db_meta;
use crate::schema;

#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub song_id: String,
    pub album_id: String,
    pub artist_id: String,
    pub path: String,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub track_number: i64,
    pub created: String,
    pub genre: String,
}

/// One updatable all_media column together with its new value.
#[derive(Debug, Clone)]
pub enum MediaField {
    SongId(String),
    AlbumId(String),
    ArtistId(String),
    Path(String),
    Title(String),
    Album(String),
    Artist(String),
    TrackNumber(i64),
    Created(String),
    Genre(String),
}

impl MediaField {
    fn column(&self) -> &'static str {
        match self {
            MediaField::SongId(_) => "song_id",
            MediaField::AlbumId(_) => "album_id",
            MediaField::ArtistId(_) => "artist_id",
            MediaField::Path(_) => "path",
            MediaField::Title(_) => "title",
            MediaField::Album(_) => "album",
            MediaField::Artist(_) => "artist",
            MediaField::TrackNumber(_) => "track_number",
            MediaField::Created(_) => "created",
            MediaField::Genre(_) => "genre",
        }
    }

    fn value(&self) -> &dyn ToSql {
        match self {
            MediaField::SongId(v)
            | MediaField::AlbumId(v)
            | MediaField::ArtistId(v)
            | MediaField::Path(v)
            | MediaField::Title(v)
            | MediaField::Album(v)
            | MediaField::Artist(v)
            | MediaField::Created(v)
            | MediaField::Genre(v) => v,
            MediaField::TrackNumber(v) => v,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EntityType {
    Song,
    Album,
    Artist,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [EntityType::Song, EntityType::Album, EntityType::Artist];

    pub fn from_item_type(item_type: &str) -> Option<EntityType> {
        match item_type {
            "media_file" => Some(EntityType::Song),
            "album" => Some(EntityType::Album),
            "artist" => Some(EntityType::Artist),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Song => "song",
            EntityType::Album => "album",
            EntityType::Artist => "artist",
        }
    }

    fn table(self) -> &'static str {
        match self {
            EntityType::Song => "tracked_songs",
            EntityType::Album => "tracked_albums",
            EntityType::Artist => "tracked_artists",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            EntityType::Song => "song_id",
            EntityType::Album => "album_id",
            EntityType::Artist => "artist_id",
        }
    }
}

/// play_count/starred of one tracked row, as last observed from the source.
#[derive(Debug, Copy, Clone)]
pub struct TrackedCounts {
    pub play_count: i64,
    pub starred: bool,
}

pub struct MirrorSource {
    db_path: PathBuf,
}

pub struct Mirror {
    conn: Connection,
}

impl MirrorSource {
    pub fn create(db_path: PathBuf) -> Result<Option<MirrorSource>> {
        info!("using '{}'", db_path.to_string_lossy());

        let source = MirrorSource { db_path };

        let mut mirror = source.get()?;
        if !db_meta::ensure_schema(&mut mirror.conn, schema::MIRROR_SCHEMA)? {
            return Ok(None);
        }

        Ok(Some(source))
    }

    pub fn get(&self) -> Result<Mirror> {
        let conn = match Connection::open(&self.db_path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    "can't open sqlite database '{}': {}",
                    self.db_path.to_string_lossy(),
                    e.description()
                );
                return Err(e);
            }
        };

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;",
        )?;

        Ok(Mirror { conn })
    }
}

impl Mirror {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn _get_media(row: &Row) -> Result<MediaRecord> {
        Ok(MediaRecord {
            song_id: row.get(0)?,
            album_id: row.get(1)?,
            artist_id: row.get(2)?,
            path: row.get(3)?,
            title: row.get(4)?,
            album: row.get(5)?,
            artist: row.get(6)?,
            track_number: row.get(7)?,
            created: row.get(8)?,
            genre: row.get(9)?,
        })
    }

    pub fn media(&self) -> Result<Vec<MediaRecord>> {
        let mut st = self.conn.prepare(
            "SELECT song_id, album_id, artist_id, path, title, album, artist,
                track_number, created, genre
            FROM all_media",
        )?;

        let mut rows = st.query(NO_PARAMS)?;

        let mut media = Vec::new();
        while let Some(row) = rows.next()? {
            media.push(Self::_get_media(row)?);
        }

        Ok(media)
    }

    pub fn media_by_id(&self, song_id: &str) -> Result<Option<MediaRecord>> {
        let mut st = self.conn.prepare(
            "SELECT song_id, album_id, artist_id, path, title, album, artist,
                track_number, created, genre
            FROM all_media
            WHERE song_id = ?",
        )?;

        let mut rows = st.query(&[song_id])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::_get_media(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn media_count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM all_media", NO_PARAMS, |row| row.get(0))
    }

    pub fn insert_media(&self, record: &MediaRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO all_media
                (song_id, album_id, artist_id, path, title, album, artist,
                track_number, created, genre)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.song_id,
                record.album_id,
                record.artist_id,
                record.path,
                record.title,
                record.album,
                record.artist,
                record.track_number,
                record.created,
                record.genre
            ],
        )?;

        Ok(())
    }

    /// Bulk insert for the initial full sync. One transaction; a bad record
    /// is logged and skipped, it must not lose the rest of the batch.
    pub fn insert_media_all(&mut self, records: &[MediaRecord]) -> Result<usize> {
        let tran = self.conn.transaction()?;

        let mut inserted = 0;

        {
            let mut st = tran.prepare(
                "INSERT INTO all_media
                    (song_id, album_id, artist_id, path, title, album, artist,
                    track_number, created, genre)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for record in records {
                let result = st.execute(params![
                    record.song_id,
                    record.album_id,
                    record.artist_id,
                    record.path,
                    record.title,
                    record.album,
                    record.artist,
                    record.track_number,
                    record.created,
                    record.genre
                ]);

                match result {
                    Ok(_) => inserted += 1,
                    Err(e) => error!("can't insert media '{}': {}", record.song_id, e),
                }
            }
        }

        tran.commit()?;

        Ok(inserted)
    }

    /// Set one all_media column, keyed by song_id. The column is dispatched
    /// from the MediaField variant.
    pub fn update_media_field(&self, song_id: &str, field: &MediaField) -> Result<()> {
        trace!("update '{}' {}", song_id, field.column());

        let sql = format!("UPDATE all_media SET {} = ? WHERE song_id = ?", field.column());
        self.conn
            .execute(&sql, &[field.value(), &song_id as &dyn ToSql])?;

        Ok(())
    }

    /// Follow a song_id reassignment in the engagement tables so history
    /// stays attached to the logical item.
    pub fn rename_tracked(&self, old_id: &str, new_id: &str) -> Result<()> {
        trace!("rename tracked '{}' -> '{}'", old_id, new_id);

        self.conn.execute(
            "UPDATE tracked_songs SET song_id = ?1 WHERE song_id = ?2",
            params![new_id, old_id],
        )?;
        self.conn.execute(
            "UPDATE media_plays SET id = ?1 WHERE id = ?2 AND media_type = 'song'",
            params![new_id, old_id],
        )?;

        Ok(())
    }

    pub fn tracked(
        &self,
        entity: EntityType,
        entity_id: &str,
        user_id: &str,
    ) -> Result<Option<TrackedCounts>> {
        let sql = format!(
            "SELECT play_count, starred FROM {} WHERE {} = ? AND user_id = ?",
            entity.table(),
            entity.id_column()
        );

        self.conn
            .query_row(&sql, &[entity_id, user_id], |row| {
                Ok(TrackedCounts {
                    play_count: row.get(0)?,
                    starred: row.get(1)?,
                })
            })
            .optional()
    }

    /// First observation of an (entity, user) pair. Names and counts are
    /// resolved from all_media where available.
    pub fn insert_tracked(
        &self,
        entity: EntityType,
        entity_id: &str,
        user_id: &str,
        play_count: i64,
        starred: bool,
        created: &str,
    ) -> Result<()> {
        let sql = match entity {
            EntityType::Song => {
                "INSERT INTO tracked_songs
                    (song_id, user_id, title, album, artist, play_count, starred, created)
                VALUES (?1, ?2,
                    (SELECT title FROM all_media WHERE song_id = ?1),
                    (SELECT album FROM all_media WHERE song_id = ?1),
                    (SELECT artist FROM all_media WHERE song_id = ?1),
                    ?3, ?4, ?5)"
            }
            EntityType::Album => {
                "INSERT INTO tracked_albums
                    (album_id, user_id, album, play_count, starred, created)
                VALUES (?1, ?2,
                    (SELECT album FROM all_media WHERE album_id = ?1 LIMIT 1),
                    ?3, ?4, ?5)"
            }
            EntityType::Artist => {
                "INSERT INTO tracked_artists
                    (artist_id, user_id, artist, album_count, song_count,
                    play_count, starred, created)
                VALUES (?1, ?2,
                    (SELECT artist FROM all_media WHERE artist_id = ?1 LIMIT 1),
                    (SELECT COUNT(DISTINCT album_id) FROM all_media WHERE artist_id = ?1),
                    (SELECT COUNT(*) FROM all_media WHERE artist_id = ?1),
                    ?3, ?4, ?5)"
            }
        };

        self.conn
            .execute(sql, params![entity_id, user_id, play_count, starred, created])?;

        Ok(())
    }

    pub fn update_tracked(
        &self,
        entity: EntityType,
        entity_id: &str,
        user_id: &str,
        play_count: i64,
        starred: bool,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET play_count = ?, starred = ? WHERE {} = ? AND user_id = ?",
            entity.table(),
            entity.id_column()
        );

        self.conn
            .execute(&sql, params![play_count, starred, entity_id, user_id])?;

        Ok(())
    }

    /// Accumulate a positive play increase into the per-day history row,
    /// creating it on first use. play_increase only ever grows within a day.
    pub fn add_play_delta(
        &self,
        entity: EntityType,
        entity_id: &str,
        user_id: &str,
        date: &str,
        amount: i64,
    ) -> Result<()> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT play_increase FROM media_plays
                WHERE id = ? AND media_type = ? AND user_id = ? AND date = ?",
                params![entity_id, entity.name(), user_id, date],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            self.conn.execute(
                "UPDATE media_plays SET play_increase = play_increase + ?
                WHERE id = ? AND media_type = ? AND user_id = ? AND date = ?",
                params![amount, entity_id, entity.name(), user_id, date],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO media_plays (id, media_type, user_id, date, play_increase)
                VALUES (?, ?, ?, ?, ?)",
                params![entity_id, entity.name(), user_id, date, amount],
            )?;
        }

        Ok(())
    }
}
