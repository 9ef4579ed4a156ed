use chrono::{DateTime, Utc};

pub fn unix_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
