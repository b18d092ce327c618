//! Database schema definitions

/// SQL to create all tables
/// NOTE: All money amounts (IDR) stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Restaurants known to the system (coordinates drive the weather lookup)
CREATE TABLE IF NOT EXISTS restaurants (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    latitude REAL,
    longitude REAL,
    is_active INTEGER NOT NULL DEFAULT 1
);

-- Raw per-platform daily observations (one row per restaurant/day/platform)
CREATE TABLE IF NOT EXISTS platform_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    restaurant_id INTEGER NOT NULL,
    stat_date TEXT NOT NULL,
    platform TEXT NOT NULL,
    sales TEXT NOT NULL DEFAULT '0',
    orders INTEGER NOT NULL DEFAULT 0,
    ads_spend TEXT NOT NULL DEFAULT '0',
    ads_sales TEXT NOT NULL DEFAULT '0',
    impressions INTEGER NOT NULL DEFAULT 0,
    menu_visits INTEGER NOT NULL DEFAULT 0,
    add_to_cart INTEGER NOT NULL DEFAULT 0,
    ads_orders INTEGER NOT NULL DEFAULT 0,
    cancelled_orders INTEGER NOT NULL DEFAULT 0,
    preparation_time REAL,
    delivery_time REAL,
    accepting_time REAL,
    offline_minutes REAL NOT NULL DEFAULT 0,
    rating REAL,
    new_customers INTEGER NOT NULL DEFAULT 0,
    repeat_customers INTEGER NOT NULL DEFAULT 0,
    reactivated_customers INTEGER NOT NULL DEFAULT 0,
    payouts TEXT NOT NULL DEFAULT '0',
    rating_five INTEGER NOT NULL DEFAULT 0,
    rating_four INTEGER NOT NULL DEFAULT 0,
    rating_three INTEGER NOT NULL DEFAULT 0,
    rating_two INTEGER NOT NULL DEFAULT 0,
    rating_one INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER DEFAULT (strftime('%s', 'now')),
    UNIQUE (restaurant_id, stat_date, platform)
);

-- Weather observations fetched from the archive API
CREATE TABLE IF NOT EXISTS weather_cache (
    restaurant_id INTEGER NOT NULL,
    obs_date TEXT NOT NULL,
    temp REAL,
    rain REAL,
    wind REAL,
    humidity REAL,
    fetched_at INTEGER DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (restaurant_id, obs_date)
);

-- Holiday calendar entries (API + static calendar)
CREATE TABLE IF NOT EXISTS holiday_cache (
    holiday_date TEXT NOT NULL,
    name TEXT NOT NULL,
    region TEXT NOT NULL DEFAULT 'ID',
    fetched_at INTEGER DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (holiday_date, name)
);

-- Background job queue (dataset refresh after raw writes)
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    payload TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at INTEGER DEFAULT (strftime('%s', 'now')),
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_stats_restaurant_date ON platform_stats(restaurant_id, stat_date);
CREATE INDEX IF NOT EXISTS idx_stats_date ON platform_stats(stat_date);
CREATE INDEX IF NOT EXISTS idx_weather_date ON weather_cache(obs_date);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status, id)
"#;

/// ALTER TABLE migrations applied after CREATE_TABLES ("duplicate column name" is tolerated)
pub const MIGRATIONS: &[&str] = &["ALTER TABLE jobs ADD COLUMN started_at INTEGER"];
