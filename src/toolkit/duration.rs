const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parts {
    days: u64,
    hours: u64,
    minutes: u64,
    seconds: u64,
}

impl Parts {
    fn from_seconds(seconds: f64) -> Self {
        let total = if seconds.is_finite() {
            seconds.round().max(0.0) as u64
        } else {
            0
        };

        Parts {
            days: total / SECONDS_PER_DAY,
            hours: (total % SECONDS_PER_DAY) / SECONDS_PER_HOUR,
            minutes: (total % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE,
            seconds: total % SECONDS_PER_MINUTE,
        }
    }
}

/// `HH:MM:SS`, or `DD:HH:MM:SS` once the duration reaches a full day.
pub fn seconds_to_clock(seconds: f64) -> String {
    let parts = Parts::from_seconds(seconds);
    if parts.days > 0 {
        format!(
            "{:02}:{:02}:{:02}:{:02}",
            parts.days, parts.hours, parts.minutes, parts.seconds
        )
    } else {
        format!("{:02}:{:02}:{:02}", parts.hours, parts.minutes, parts.seconds)
    }
}

pub fn millis_to_clock(millis: f64) -> String {
    seconds_to_clock(millis / 1000.0)
}

/// Compact form such as `1d 2h 51m 22s`. Zero units are left out; a zero
/// duration renders as `0s`.
pub fn seconds_to_human(seconds: f64) -> String {
    let parts = Parts::from_seconds(seconds);
    let units = [
        (parts.days, "d"),
        (parts.hours, "h"),
        (parts.minutes, "m"),
        (parts.seconds, "s"),
    ];

    let rendered: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    if rendered.is_empty() {
        "0s".to_string()
    } else {
        rendered.join(" ")
    }
}

pub fn millis_to_human(millis: f64) -> String {
    seconds_to_human(millis / 1000.0)
}

/// Stopwatch style: `1:00:22`, `21:55`, `0:00`. Days fold into the hours.
pub fn millis_to_short_clock(millis: f64) -> String {
    let parts = Parts::from_seconds(millis / 1000.0);
    let hours = parts.days * 24 + parts.hours;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, parts.minutes, parts.seconds)
    } else {
        format!("{}:{:02}", parts.minutes, parts.seconds)
    }
}
