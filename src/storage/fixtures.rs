//! Event fixtures shared by the query tests.

use duckdb::Connection;

pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    crate::storage::migrations::run_migrations(&conn).unwrap();
    conn
}

/// One event row. Unset optional columns are stored as NULL.
#[derive(Debug, Clone, Copy)]
pub struct TestEvent {
    pub site_id: &'static str,
    pub visitor_id: &'static str,
    pub session_id: &'static str,
    pub timestamp: &'static str,
    pub url: &'static str,
    pub event_type: &'static str,
    pub custom_event_name: Option<&'static str>,
    pub custom_event_json: Option<&'static str>,
    pub referrer_url: Option<&'static str>,
    pub referrer_source: Option<&'static str>,
    pub referrer_source_name: Option<&'static str>,
    pub utm_source: Option<&'static str>,
    pub utm_medium: Option<&'static str>,
    pub utm_campaign: Option<&'static str>,
    pub utm_term: Option<&'static str>,
    pub utm_content: Option<&'static str>,
    pub device_type: Option<&'static str>,
    pub browser: Option<&'static str>,
    pub os: Option<&'static str>,
    pub country_code: Option<&'static str>,
}

impl Default for TestEvent {
    fn default() -> Self {
        Self {
            site_id: "test.com",
            visitor_id: "v1",
            session_id: "s1",
            timestamp: "2024-01-15 10:00:00",
            url: "/",
            event_type: "pageview",
            custom_event_name: None,
            custom_event_json: None,
            referrer_url: None,
            referrer_source: None,
            referrer_source_name: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_term: None,
            utm_content: None,
            device_type: None,
            browser: None,
            os: None,
            country_code: None,
        }
    }
}

impl TestEvent {
    /// A pageview by `visitor_id` in `session_id`.
    pub fn pageview(
        visitor_id: &'static str,
        session_id: &'static str,
        timestamp: &'static str,
        url: &'static str,
    ) -> Self {
        Self {
            visitor_id,
            session_id,
            timestamp,
            url,
            ..Self::default()
        }
    }

    pub fn insert(&self, conn: &Connection) {
        conn.execute(
            "INSERT INTO events (site_id, visitor_id, session_id, timestamp, url,
             event_type, custom_event_name, custom_event_json, referrer_url, referrer_source, referrer_source_name,
             utm_source, utm_medium, utm_campaign, utm_term, utm_content,
             device_type, browser, os, country_code)
             VALUES (?, ?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                self.site_id,
                self.visitor_id,
                self.session_id,
                self.timestamp,
                self.url,
                self.event_type,
                self.custom_event_name,
                self.custom_event_json,
                self.referrer_url,
                self.referrer_source,
                self.referrer_source_name,
                self.utm_source,
                self.utm_medium,
                self.utm_campaign,
                self.utm_term,
                self.utm_content,
                self.device_type,
                self.browser,
                self.os,
                self.country_code,
            ],
        )
        .unwrap();
    }
}

/// Midnight on the given January 2024 day, the range anchor most tests use.
pub fn jan(day: u32) -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}
