//! Human-readable durations for rejection messages.

const SECOND: u64 = 1000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Format milliseconds in long form, e.g. `"827 ms"`, `"1 second"`, `"3 hours"`.
///
/// Values are rounded to the nearest whole unit; the unit is pluralised once
/// the value reaches one and a half units.
pub fn long_duration(ms: u64) -> String {
    if ms >= DAY {
        plural(ms, DAY, "day")
    } else if ms >= HOUR {
        plural(ms, HOUR, "hour")
    } else if ms >= MINUTE {
        plural(ms, MINUTE, "minute")
    } else if ms >= SECOND {
        plural(ms, SECOND, "second")
    } else {
        format!("{} ms", ms)
    }
}

fn plural(ms: u64, unit: u64, name: &str) -> String {
    let rounded = (ms + unit / 2) / unit;
    if ms * 2 >= unit * 3 {
        format!("{} {}s", rounded, name)
    } else {
        format!("{} {}", rounded, name)
    }
}
