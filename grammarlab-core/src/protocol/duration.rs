//! Duration payloads of `LexerTime` and `ParserTime`
//!
//! Entry points print either a clock form `[d.]hh:mm:ss[.fffffff]` (fraction in
//! units of 100ns, up to seven digits) or a number with a unit suffix such as
//! `1.25ms`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static CLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<days>\d+)\.)?(?P<hours>\d{1,2}):(?P<minutes>\d{2}):(?P<seconds>\d{2})(?:\.(?P<fraction>\d{1,7}))?$")
        .expect("clock duration pattern is valid")
});

static SUFFIXED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<value>\d+(?:\.\d+)?)\s*(?P<unit>ns|us|µs|ms|s)$")
        .expect("suffixed duration pattern is valid")
});

const NANOS_PER_TICK: u64 = 100;
const FRACTION_DIGITS: usize = 7;

pub fn parse_duration(payload: &str) -> Option<Duration> {
    let payload = payload.trim();
    parse_clock(payload).or_else(|| parse_suffixed(payload))
}

fn parse_clock(payload: &str) -> Option<Duration> {
    let caps = CLOCK.captures(payload)?;
    let number = |name: &str| -> Option<u64> {
        caps.name(name)
            .map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let (days, hours, minutes, seconds) = (
        number("days")?,
        number("hours")?,
        number("minutes")?,
        number("seconds")?,
    );
    if minutes > 59 || seconds > 59 {
        return None;
    }
    let ticks = match caps.name("fraction") {
        Some(fraction) => {
            let digits = format!("{:0<width$}", fraction.as_str(), width = FRACTION_DIGITS);
            digits.parse::<u64>().ok()?
        }
        None => 0,
    };
    let secs = ((days * 24 + hours) * 60 + minutes) * 60 + seconds;
    Some(Duration::from_secs(secs) + Duration::from_nanos(ticks * NANOS_PER_TICK))
}

fn parse_suffixed(payload: &str) -> Option<Duration> {
    let caps = SUFFIXED.captures(payload)?;
    let value: f64 = caps["value"].parse().ok()?;
    let nanos_per_unit = match &caps["unit"] {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        _ => 1e9,
    };
    let nanos = (value * nanos_per_unit).round();
    if !nanos.is_finite() || nanos >= u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}
