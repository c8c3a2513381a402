pub const SCHEMA: &str = r#"
-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE CHECK (url <> ''),
    title TEXT NOT NULL CHECK (title <> ''),
    description TEXT,
    link TEXT,
    sort_order INTEGER NOT NULL DEFAULT 1,
    is_bookmark INTEGER NOT NULL DEFAULT 0,
    last_checked_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feeds_sort_order ON feeds(sort_order);

-- at most one bookmark feed
CREATE UNIQUE INDEX IF NOT EXISTS idx_feeds_single_bookmark ON feeds(is_bookmark) WHERE is_bookmark = 1;

-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,
    feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    url TEXT NOT NULL UNIQUE CHECK (url <> ''),
    title TEXT NOT NULL,
    description TEXT,
    content TEXT,
    published_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_id ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);

-- digests table (one per article)
CREATE TABLE IF NOT EXISTS digests (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL UNIQUE CHECK (url <> ''),
    title TEXT,
    body TEXT,
    readed INTEGER NOT NULL DEFAULT 0,
    listened INTEGER NOT NULL DEFAULT 0,
    audio_file TEXT,
    audio_data BLOB,
    created_at TEXT NOT NULL,
    article_id TEXT UNIQUE REFERENCES articles(id) ON DELETE SET NULL,
    feed_id TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_digests_feed_id ON digests(feed_id);
CREATE INDEX IF NOT EXISTS idx_digests_listened ON digests(listened);
"#;
