use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags, Result, NO_PARAMS};

use crate::mirror::{EntityType, MediaRecord};

#[derive(Debug, Clone)]
pub struct EngagementRecord {
    pub entity: EntityType,
    pub entity_id: String,
    pub user_id: String,
    pub play_count: i64,
    pub starred: bool,
}

/// Full read of the authoritative library at the start of a pass.
pub struct Snapshot {
    pub media: Vec<MediaRecord>,
    pub engagement: Vec<EngagementRecord>,
}

pub struct SourceReader {
    db_path: PathBuf,
}

impl SourceReader {
    pub fn new(db_path: PathBuf) -> SourceReader {
        SourceReader { db_path }
    }

    /// All-or-nothing: any read error fails the whole snapshot and the pass
    /// is retried on the next tick. The source database is never written.
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        let conn =
            Connection::open_with_flags(&self.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;

        let media = Self::read_media(&conn)?;
        let engagement = Self::read_engagement(&conn)?;

        debug!(
            "snapshot: {} media, {} engagement records",
            media.len(),
            engagement.len()
        );

        Ok(Snapshot { media, engagement })
    }

    fn read_media(conn: &Connection) -> Result<Vec<MediaRecord>> {
        let mut st = conn.prepare(
            "SELECT id, path, title, album, artist, artist_id, track_number,
                genre, created_at, album_id
            FROM media_file",
        )?;

        let mut rows = st.query(NO_PARAMS)?;

        let mut media = Vec::new();
        while let Some(row) = rows.next()? {
            let created_at: String = row.get(8)?;

            media.push(MediaRecord {
                song_id: row.get(0)?,
                path: row.get(1)?,
                title: row.get(2)?,
                album: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                artist: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                artist_id: row.get(5)?,
                track_number: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
                genre: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                // date part only, "2024-01-02T15:04:05Z" -> "2024-01-02"
                created: created_at.split('T').next().unwrap_or("").to_string(),
                album_id: row.get(9)?,
            });
        }

        Ok(media)
    }

    fn read_engagement(conn: &Connection) -> Result<Vec<EngagementRecord>> {
        let mut st = conn.prepare(
            "SELECT item_id, item_type, user_id, play_count, starred
            FROM annotation",
        )?;

        let mut rows = st.query(NO_PARAMS)?;

        let mut engagement = Vec::new();
        while let Some(row) = rows.next()? {
            let item_type: String = row.get(1)?;

            let entity = match EntityType::from_item_type(&item_type) {
                Some(e) => e,
                None => {
                    warn!("unknown annotation item_type '{}', skipping", item_type);
                    continue;
                }
            };

            engagement.push(EngagementRecord {
                entity,
                entity_id: row.get(0)?,
                user_id: row.get(2)?,
                play_count: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                starred: row.get::<_, Option<bool>>(4)?.unwrap_or(false),
            });
        }

        Ok(engagement)
    }
}
