use std::collections::HashSet;

use crate::mirror::{MediaField, MediaRecord};

/// One rule of the match cascade. Every rule requires the song_id itself to
/// differ while the fields it names stay equal, so a rule firing means the
/// source reassigned the identifier along with (at most) the named change.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum MatchRule {
    Genre,
    TrackNumber,
    Artist,
    Album,
    Path,
    IdOnly,
}

impl MatchRule {
    /// Relaxed-to-strict evaluation order. Earlier rules win; a claimed row
    /// is never offered to a later rule.
    pub const CASCADE: [MatchRule; 6] = [
        MatchRule::Genre,
        MatchRule::TrackNumber,
        MatchRule::Artist,
        MatchRule::Album,
        MatchRule::Path,
        MatchRule::IdOnly,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MatchRule::Genre => "Genre",
            MatchRule::TrackNumber => "Track Number",
            MatchRule::Artist => "Artist",
            MatchRule::Album => "Album",
            MatchRule::Path => "Path",
            MatchRule::IdOnly => "ID Only",
        }
    }

    fn matches(self, old: &MediaRecord, new: &MediaRecord) -> bool {
        if old.song_id == new.song_id || old.title != new.title {
            return false;
        }

        match self {
            MatchRule::Genre => {
                old.artist_id == new.artist_id
                    && old.album_id == new.album_id
                    && old.track_number == new.track_number
                    && old.path == new.path
                    && old.genre != new.genre
            }
            MatchRule::TrackNumber => {
                old.artist_id == new.artist_id
                    && old.album_id == new.album_id
                    && old.path == new.path
                    && old.track_number != new.track_number
            }
            MatchRule::Artist => {
                old.album_id == new.album_id
                    && old.track_number == new.track_number
                    && old.path == new.path
                    && old.artist_id != new.artist_id
            }
            MatchRule::Album => {
                old.artist_id == new.artist_id
                    && old.track_number == new.track_number
                    && old.genre == new.genre
                    && old.album_id != new.album_id
            }
            MatchRule::Path => {
                old.artist_id == new.artist_id
                    && old.album_id == new.album_id
                    && old.track_number == new.track_number
                    && old.path != new.path
            }
            MatchRule::IdOnly => {
                old.artist_id == new.artist_id
                    && old.album_id == new.album_id
                    && old.track_number == new.track_number
                    && old.genre == new.genre
                    && old.path == new.path
            }
        }
    }

    /// Columns implicated by the rule, taken from the snapshot record. The
    /// song_id update itself is applied separately, always last.
    pub fn updates(self, new: &MediaRecord) -> Vec<MediaField> {
        match self {
            MatchRule::Genre => vec![MediaField::Genre(new.genre.clone())],
            MatchRule::TrackNumber => vec![MediaField::TrackNumber(new.track_number)],
            MatchRule::Artist => vec![
                MediaField::ArtistId(new.artist_id.clone()),
                MediaField::Artist(new.artist.clone()),
            ],
            // The Album rule does not constrain path, so path is updated too.
            MatchRule::Album => vec![
                MediaField::AlbumId(new.album_id.clone()),
                MediaField::Album(new.album.clone()),
                MediaField::Path(new.path.clone()),
            ],
            MatchRule::Path => vec![MediaField::Path(new.path.clone())],
            MatchRule::IdOnly => vec![],
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaChange {
    pub old_id: String,
    pub new_id: String,
    pub rule: MatchRule,
}

#[derive(Debug)]
pub struct MatchResult {
    pub changes: Vec<MediaChange>,
    pub added: Vec<MediaRecord>,
}

/// Classify every snapshot record against the mirror. Snapshot records whose
/// song_id is already mirrored are unchanged and drop out first; the rest run
/// the cascade against mirror rows whose ids vanished from the snapshot.
/// First match wins and claims both rows, so no pair can be reported twice.
/// Whatever remains unmatched is new media.
pub fn classify(mirror: &[MediaRecord], snapshot: &[MediaRecord]) -> MatchResult {
    let mirror_ids: HashSet<&str> = mirror.iter().map(|r| r.song_id.as_str()).collect();
    let snapshot_ids: HashSet<&str> = snapshot.iter().map(|r| r.song_id.as_str()).collect();

    let mut pending: Vec<&MediaRecord> = snapshot
        .iter()
        .filter(|r| !mirror_ids.contains(r.song_id.as_str()))
        .collect();

    let mut candidates: Vec<&MediaRecord> = mirror
        .iter()
        .filter(|r| !snapshot_ids.contains(r.song_id.as_str()))
        .collect();

    let mut changes = Vec::new();

    for &rule in MatchRule::CASCADE.iter() {
        let mut i = 0;
        while i < pending.len() {
            match candidates.iter().position(|old| rule.matches(old, pending[i])) {
                Some(pos) => {
                    let old = candidates.remove(pos);
                    let new = pending.remove(i);

                    changes.push(MediaChange {
                        old_id: old.song_id.clone(),
                        new_id: new.song_id.clone(),
                        rule,
                    });
                }
                None => i += 1,
            }
        }
    }

    MatchResult {
        changes,
        added: pending.into_iter().cloned().collect(),
    }
}
