//! Delimiter detection over a bounded sample, with a locale fallback.

/// Delimiters tried by the sniffer, in tie-break order.
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'|', b'\t'];

/// Languages whose locales write decimals with a comma. CSV files from these
/// locales conventionally use `;` as the field separator.
const COMMA_DECIMAL_LANGUAGES: &[&str] = &[
    "af", "bg", "ca", "cs", "da", "de", "el", "es", "et", "eu", "fi", "fr", "gl", "hr", "hu",
    "id", "is", "it", "lt", "lv", "nb", "nl", "nn", "no", "pl", "pt", "ro", "ru", "sk", "sl",
    "sr", "sv", "tr", "uk", "vi",
];

/// Pick the delimiter whose per-line field count is consistent across the
/// sample. Returns `None` when no candidate fits.
///
/// Only complete lines are considered unless the sample holds a single line.
/// Occurrences inside `quote`d fields are ignored.
pub fn sniff_delimiter(sample: &[u8], quote: u8) -> Option<u8> {
    let lines = complete_lines(sample, quote);
    if lines.is_empty() {
        return None;
    }

    CANDIDATE_DELIMITERS.iter().copied().find(|&delimiter| {
        let mut counts = lines.iter().map(|line| count_outside_quotes(line, delimiter, quote));
        match counts.next() {
            Some(first) if first > 0 => counts.all(|c| c == first),
            _ => false,
        }
    })
}

fn complete_lines(sample: &[u8], quote: u8) -> Vec<&[u8]> {
    // records may span lines when a quoted field contains a newline; split on
    // newlines outside quotes only
    let mut lines = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, &b) in sample.iter().enumerate() {
        match b {
            _ if b == quote => in_quotes = !in_quotes,
            b'\n' if !in_quotes => {
                let line = trim_cr(&sample[start..i]);
                if !line.is_empty() {
                    lines.push(line);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if lines.is_empty() && start < sample.len() {
        lines.push(trim_cr(&sample[start..]));
    }
    lines
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn count_outside_quotes(line: &[u8], delimiter: u8, quote: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for &b in line {
        if b == quote {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Default delimiter for a locale string such as `de_DE.UTF-8`.
pub fn delimiter_for_locale(locale: &str) -> u8 {
    let language = locale
        .split(['_', '.', '@', '-'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if COMMA_DECIMAL_LANGUAGES.contains(&language.as_str()) {
        b';'
    } else {
        b','
    }
}

/// Default delimiter for the process locale (`LC_ALL`, `LC_NUMERIC`, `LANG`).
pub fn locale_default_delimiter() -> u8 {
    let locale = ["LC_ALL", "LC_NUMERIC", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.is_empty() && v != "C" && v != "POSIX");
    match locale {
        Some(locale) => delimiter_for_locale(&locale),
        None => b',',
    }
}
