use duckdb::Connection;

/// SQL statement to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    site_id              VARCHAR NOT NULL,
    visitor_id           VARCHAR NOT NULL,
    session_id           VARCHAR NOT NULL,
    timestamp            TIMESTAMP NOT NULL,
    date                 DATE GENERATED ALWAYS AS (CAST(timestamp AS DATE)) VIRTUAL,
    url                  VARCHAR NOT NULL,
    referrer_url         VARCHAR,
    referrer_source      VARCHAR,
    referrer_source_name VARCHAR,
    referrer_search_term VARCHAR,
    utm_source           VARCHAR,
    utm_medium           VARCHAR,
    utm_campaign         VARCHAR,
    utm_term             VARCHAR,
    utm_content          VARCHAR,
    device_type          VARCHAR,
    browser              VARCHAR,
    os                   VARCHAR,
    country_code         VARCHAR(2),
    event_type           VARCHAR NOT NULL DEFAULT 'pageview',
    custom_event_name    VARCHAR,
    custom_event_json    VARCHAR
)
";

/// Indexes supporting the per-site range scans every report performs.
pub const CREATE_EVENTS_INDEXES: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_site_time ON events (site_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_session ON events (session_id);
";

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_EVENTS_TABLE)?;
    Ok(())
}

/// Create secondary indexes on the events table.
pub fn create_indexes(conn: &Connection) -> Result<(), duckdb::Error> {
    conn.execute_batch(CREATE_EVENTS_INDEXES)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM events").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_init_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_event_type_defaults_to_pageview() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO events (site_id, visitor_id, session_id, timestamp, url)
             VALUES ('example.com', 'v1', 's1', '2024-01-15 10:30:00', '/')",
            [],
        )
        .unwrap();

        let (event_type, date): (String, String) = conn
            .query_row(
                "SELECT event_type, CAST(date AS VARCHAR) FROM events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(event_type, "pageview");
        assert_eq!(date, "2024-01-15");
    }

    #[test]
    fn test_schema_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (site_id, visitor_id, session_id, timestamp, url,
             referrer_url, referrer_source, referrer_source_name, referrer_search_term,
             utm_source, utm_medium, utm_campaign, utm_term, utm_content,
             device_type, browser, os, country_code,
             event_type, custom_event_name, custom_event_json)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                "example.com",
                "abc123",
                "sess-1",
                "2024-01-15 10:30:00",
                "/signup",
                "https://www.google.com/search?q=analytics",
                "search",
                "Google",
                "analytics",
                "google",
                "cpc",
                "winter",
                "analytics",
                "banner",
                "desktop",
                "Chrome",
                "Windows",
                "US",
                "custom",
                "signup",
                r#"{"plan":"pro"}"#
            ],
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) FROM events").unwrap();
        let count: i64 = stmt.query_row([], |row| row.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_create_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        create_indexes(&conn).unwrap();
        create_indexes(&conn).unwrap();
    }
}
