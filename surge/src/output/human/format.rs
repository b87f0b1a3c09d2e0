use std::time::Duration;

/// One rounded component in us, ms or s; short enough for progress lines.
pub(crate) fn format_duration(d: Duration) -> String {
    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    let total_ns = d.as_nanos();
    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    if total_ns == 0 {
        return "0s".to_string();
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_round_to_a_single_unit() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_micros(1500)), "2ms");
        assert_eq!(format_duration(Duration::from_micros(250)), "250us");
        assert_eq!(format_duration(Duration::from_millis(90_400)), "90s");
    }

    #[test]
    fn rates_hide_non_finite_values() {
        assert_eq!(format_rate(12.6), "13");
        assert_eq!(format_rate(f64::NAN), "0");
    }
}
