use bytesize::ByteSize;
use chrono::{TimeZone, Utc};

pub fn human_bytes(b: u64) -> String {
    ByteSize::b(b).to_string_as(true)
}

/// Epoch milliseconds as `YYYY-MM-DD HH:MM`, or `-` when unknown.
pub fn human_time(millis: i64) -> String {
    if millis == 0 {
        return "-".to_string();
    }
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn times() {
        assert_eq!(human_time(0), "-");
        assert_eq!(human_time(86_400_000), "1970-01-02 00:00");
    }

    #[test]
    fn bytes() {
        assert_eq!(human_bytes(10), "10 B");
    }
}
