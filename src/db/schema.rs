//! Database schema and migrations for feedsync.
//!
//! Migrations are applied in order when the database is opened. The
//! `schema_version` table records how many have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: owners of feeds
    r#"
CREATE TABLE users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL UNIQUE,
    email       TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    // v2: feeds and their items
    r#"
CREATE TABLE feeds (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    title           TEXT NOT NULL DEFAULT '',
    link            TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    modified_at     TEXT,                       -- change fingerprint, NULL = unknown
    updated         INTEGER NOT NULL DEFAULT 1, -- eligible for periodic sync
    last_synced_at  TEXT,
    last_error      TEXT,
    created_at      TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (url, owner_id)
);

CREATE INDEX idx_feeds_updated ON feeds(updated);
CREATE INDEX idx_feeds_owner ON feeds(owner_id);

CREATE TABLE items (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id          INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid             TEXT NOT NULL,
    title            TEXT,
    link             TEXT,
    description      TEXT,
    published_at     TEXT,
    last_updated_at  TEXT NOT NULL,
    read             INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (feed_id, guid)
);

CREATE INDEX idx_items_feed ON items(feed_id);
"#,
    // v3: outbox of failure notifications
    r#"
CREATE TABLE notifications (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    feed_id     INTEGER,
    feed_url    TEXT NOT NULL,
    subject     TEXT NOT NULL,
    body        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    sent_at     TEXT
);

CREATE INDEX idx_notifications_pending ON notifications(sent_at);
"#,
    // v4: recipient address and delivery errors of notifications
    r#"
ALTER TABLE notifications ADD COLUMN recipient TEXT;
ALTER TABLE notifications ADD COLUMN last_error TEXT;
"#,
];
