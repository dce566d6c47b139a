//! Maven timestamp strings.
//!
//! Repository metadata carries two UTC formats, `yyyyMMddHHmmss` (the
//! `<lastUpdated>` element) and `yyyyMMdd.HHmmss` (unique snapshot version
//! qualifiers). Both compare correctly as plain strings, which the merge
//! logic relies on; this module only validates their shape. HTTP dates are
//! the one format converted to and from epoch time.

/// Checks the `yyyyMMdd.HHmmss` shape of a snapshot qualifier.
pub fn is_snapshot_qualifier(s: &str) -> bool {
    s.len() == 15
        && s.as_bytes()[8] == b'.'
        && s[..8].bytes().all(|b| b.is_ascii_digit())
        && s[9..].bytes().all(|b| b.is_ascii_digit())
}

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

// 1970-01-01 was a Thursday.
const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];

/// Formats epoch milliseconds as an RFC 1123 HTTP date
/// (`Tue, 06 Aug 2024 12:34:56 GMT`).
pub fn format_http_date(epoch_millis: u64) -> String {
    let (y, mo, d, h, mi, s) = civil(epoch_millis);
    let days = (epoch_millis / 1000 / 86_400) as usize;
    format!(
        "{}, {:02} {} {:04} {:02}:{:02}:{:02} GMT",
        WEEKDAYS[days % 7],
        d,
        MONTHS[mo as usize - 1],
        y,
        h,
        mi,
        s
    )
}

/// Parses an RFC 1123 HTTP date to epoch milliseconds. Other historical
/// `Last-Modified` spellings (RFC 850, asctime) are not accepted.
pub fn parse_http_date(s: &str) -> Option<u64> {
    let mut parts = s.split_ascii_whitespace();
    let weekday = parts.next()?;
    if !weekday.ends_with(',') {
        return None;
    }
    let d: u32 = parts.next()?.parse().ok()?;
    let month = parts.next()?;
    let mo = MONTHS.iter().position(|m| *m == month)? as i64 + 1;
    let y: i64 = parts.next()?.parse().ok()?;
    let mut clock = parts.next()?.split(':');
    let h: u64 = clock.next()?.parse().ok()?;
    let mi: u64 = clock.next()?.parse().ok()?;
    let sec: u64 = clock.next()?.parse().ok()?;
    if clock.next().is_some() || parts.next()? != "GMT" || parts.next().is_some() {
        return None;
    }
    if d == 0 || d > 31 || h > 23 || mi > 59 || sec > 60 || y < 1970 {
        return None;
    }

    let days = days_from_civil(y, mo, d as i64);
    Some(((days as u64 * 86_400) + h * 3600 + mi * 60 + sec) * 1000)
}

/// Civil date to days-from-epoch, the inverse of [civil].
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Days-from-epoch to civil date, per Howard Hinnant's algorithm.
fn civil(epoch_millis: u64) -> (i64, u32, u32, u32, u32, u32) {
    let secs = (epoch_millis / 1000) as i64;
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = if m <= 2 { y + 1 } else { y };

    (
        y,
        m,
        d,
        (rem / 3600) as u32,
        (rem % 3600 / 60) as u32,
        (rem % 60) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("20240801.123456", true)]
    #[case::no_dot("20240801123456", false)]
    #[case::short("2024081.123456", false)]
    #[case::letter("20240801.12345x", false)]
    #[case::multibyte("20240\u{661}0.123456", false)]
    fn snapshot_qualifier_shape(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(expected, is_snapshot_qualifier(s));
    }

    #[rstest]
    #[case(0, "Thu, 01 Jan 1970 00:00:00 GMT")]
    #[case(1_722_515_696_000, "Thu, 01 Aug 2024 12:34:56 GMT")]
    #[case(784_111_777_000, "Sun, 06 Nov 1994 08:49:37 GMT")]
    fn http_date_roundtrip(#[case] millis: u64, #[case] rendered: &str) {
        assert_eq!(rendered, format_http_date(millis));
        assert_eq!(Some(millis), parse_http_date(rendered));
    }

    #[rstest]
    #[case::no_comma("Thu 01 Jan 1970 00:00:00 GMT")]
    #[case::rfc850("Sunday, 06-Nov-94 08:49:37 GMT")]
    #[case::not_gmt("Thu, 01 Jan 1970 00:00:00 UTC")]
    #[case::trailing("Thu, 01 Jan 1970 00:00:00 GMT x")]
    #[case::bad_month("Thu, 01 Foo 1970 00:00:00 GMT")]
    fn http_date_rejects(#[case] s: &str) {
        assert_eq!(None, parse_http_date(s));
    }
}
