use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Time elapsed since `started_at`, clamped to zero when the clock skews backwards.
pub fn elapsed_since(started_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (now - started_at).to_std().unwrap_or_default()
}

pub fn format_elapsed(elapsed: std::time::Duration) -> String {
    let total = elapsed.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
