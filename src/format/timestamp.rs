use chrono::{DateTime, Datelike, Timelike, Utc};

/// Humanizes a Slack `"sec.usec"` timestamp relative to `now`. Non-numeric
/// input is returned unchanged, matching the tool-facing contract that a raw
/// Slack `ts` always round-trips even when it can't be classified.
pub fn format_relative_time(ts: &str, now: DateTime<Utc>) -> String {
    let Ok(secs) = ts.parse::<f64>() else {
        return ts.to_string();
    };
    if !secs.is_finite() {
        return ts.to_string();
    }

    let whole_secs = secs.trunc() as i64;
    let nanos = ((secs.fract()) * 1_000_000_000.0).round() as u32;
    let Some(when) = DateTime::<Utc>::from_timestamp(whole_secs, nanos) else {
        return ts.to_string();
    };

    let delta = now.signed_duration_since(when);
    let delta_secs = delta.num_seconds();

    if delta_secs < 60 && delta_secs >= 0 {
        return "just now".to_string();
    }
    if delta_secs < 3600 && delta_secs >= 0 {
        let mins = delta_secs / 60;
        return format!("{mins} min ago");
    }

    let when_date = when.date_naive();
    let now_date = now.date_naive();

    if when_date == now_date {
        return format!("today at {}", format_clock(when));
    }
    let yesterday = now_date.pred_opt().unwrap_or(now_date);
    if when_date == yesterday {
        return format!("yesterday at {}", format_clock(when));
    }

    let days_back = (now_date - when_date).num_days();
    if (0..7).contains(&days_back) {
        return format!("{} at {}", when.format("%A"), format_clock(when));
    }

    if when.year() == now.year() {
        return format!("{} at {}", when.format("%b %-d"), format_clock(when));
    }

    format!("{} at {}", when.format("%b %-d, %Y"), format_clock(when))
}

fn format_clock(when: DateTime<Utc>) -> String {
    let hour24 = when.hour();
    let minute = when.minute();
    let period = if hour24 < 12 { "AM" } else { "PM" };
    let hour12 = match hour24 % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02} {period}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn non_numeric_input_is_returned_unchanged() {
        let now = dt(2026, 1, 1, 0, 0, 0);
        assert_eq!(format_relative_time("not-a-ts", now), "not-a-ts");
    }

    #[test]
    fn under_a_minute_is_just_now() {
        let now = dt(2026, 1, 1, 12, 0, 30);
        let ts = format!("{}.0", now.timestamp() - 10);
        assert_eq!(format_relative_time(&ts, now), "just now");
    }

    #[test]
    fn under_an_hour_is_minutes_ago() {
        let now = dt(2026, 1, 1, 12, 30, 0);
        let ts = format!("{}.0", now.timestamp() - 300);
        assert_eq!(format_relative_time(&ts, now), "5 min ago");
    }

    #[test]
    fn same_day_formats_as_today() {
        let now = dt(2026, 1, 1, 15, 0, 0);
        let ts = format!("{}.0", dt(2026, 1, 1, 9, 5, 0).timestamp());
        assert_eq!(format_relative_time(&ts, now), "today at 9:05 AM");
    }

    #[test]
    fn previous_day_formats_as_yesterday() {
        let now = dt(2026, 1, 2, 15, 0, 0);
        let ts = format!("{}.0", dt(2026, 1, 1, 13, 0, 0).timestamp());
        assert_eq!(format_relative_time(&ts, now), "yesterday at 1:00 PM");
    }

    #[test]
    fn within_six_days_formats_as_weekday() {
        // 2026-01-01 is a Thursday.
        let now = dt(2026, 1, 5, 10, 0, 0);
        let ts = format!("{}.0", dt(2026, 1, 1, 13, 0, 0).timestamp());
        assert_eq!(format_relative_time(&ts, now), "Thursday at 1:00 PM");
    }

    #[test]
    fn same_year_beyond_six_days_formats_with_month_day() {
        let now = dt(2026, 3, 1, 10, 0, 0);
        let ts = format!("{}.0", dt(2026, 1, 1, 13, 0, 0).timestamp());
        assert_eq!(format_relative_time(&ts, now), "Jan 1 at 1:00 PM");
    }

    #[test]
    fn different_year_includes_year() {
        let now = dt(2026, 3, 1, 10, 0, 0);
        let ts = format!("{}.0", dt(2025, 1, 1, 0, 0, 0).timestamp());
        assert_eq!(format_relative_time(&ts, now), "Jan 1, 2025 at 12:00 AM");
    }

    #[test]
    fn noon_and_midnight_format_as_twelve() {
        let now = dt(2026, 1, 1, 23, 0, 0);
        let noon_ts = format!("{}.0", dt(2026, 1, 1, 12, 0, 0).timestamp());
        assert_eq!(format_relative_time(&noon_ts, now), "today at 12:00 PM");
        let midnight_ts = format!("{}.0", dt(2026, 1, 1, 0, 0, 0).timestamp());
        assert_eq!(format_relative_time(&midnight_ts, now), "today at 12:00 AM");
    }
}
