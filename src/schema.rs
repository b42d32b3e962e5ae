pub const SCHEMA_VERSION: u32 = 1;

pub const META_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Trackerd (
    key TEXT PRIMARY KEY,
    value);
";

pub const MIRROR_SCHEMA: &str = "
CREATE TABLE all_media (
    song_id TEXT PRIMARY KEY NOT NULL,
    album_id TEXT,
    artist_id TEXT,
    path TEXT,
    title TEXT,
    album TEXT,
    artist TEXT,
    track_number INTEGER,
    created DATE,
    genre TEXT);

CREATE INDEX all_media_album_id ON all_media (album_id);
CREATE INDEX all_media_artist_id ON all_media (artist_id);

CREATE TABLE tracked_songs (
    song_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    title TEXT,
    album TEXT,
    artist TEXT,
    play_count INTEGER NOT NULL,
    starred BOOL NOT NULL,
    created DATE,
    PRIMARY KEY (song_id, user_id));

CREATE TABLE tracked_albums (
    album_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    album TEXT,
    play_count INTEGER NOT NULL,
    starred BOOL NOT NULL,
    created DATE,
    PRIMARY KEY (album_id, user_id));

CREATE TABLE tracked_artists (
    artist_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    artist TEXT,
    album_count INTEGER,
    song_count INTEGER,
    play_count INTEGER NOT NULL,
    starred BOOL NOT NULL,
    created DATE,
    PRIMARY KEY (artist_id, user_id));

CREATE TABLE media_plays (
    id TEXT NOT NULL,
    media_type TEXT NOT NULL,
    user_id TEXT NOT NULL,
    date DATE NOT NULL,
    play_increase INTEGER NOT NULL,
    PRIMARY KEY (id, media_type, user_id, date));
";
