//! Scanning of source-distribution build logs.
//!
//! The packaging tool reports missing files, unmatched manifest patterns and
//! similar problems as `warning:` lines but still exits zero. The
//! `check-sdist-log` gate turns those into a failure.

/// Return every warning line in `log`, trimmed, in order of appearance.
pub fn sdist_warnings(log: &str) -> Vec<&str> {
    log.lines()
        .map(str::trim)
        .filter(|line| is_warning(line))
        .collect()
}

fn is_warning(line: &str) -> bool {
    const PREFIX: &str = "warning:";
    line.get(..PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(PREFIX))
}
