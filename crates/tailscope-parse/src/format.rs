use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use thiserror::Error;

/// Errors from compiling a date-format pattern
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("timestamp pattern contains no fields")]
    NoFields,
    #[error("unsupported pattern field '{field}' with width {count}")]
    UnsupportedField { field: char, count: usize },
    #[error("date fields present but year, month and day are not all given")]
    IncompleteDate,
    #[error("clock-hour field 'h' needs an accompanying AM/PM field 'a'")]
    MissingAmPm,
    #[error("unterminated quoted literal")]
    UnterminatedQuote,
    #[error("derived regex is invalid: {0}")]
    Regex(#[from] regex::Error),
}

/// How the matched prefix is turned into a timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParseMode {
    DateTime,
    DateOnly,
    /// The pattern has no date fields; the parsed time of day is combined
    /// with the current local date. Approximate around midnight: a line
    /// written just before it but read just after gets the wrong day.
    TimeOnly,
}

/// Regex metacharacters escaped when a pattern literal is copied
const REGEX_METACHARS: &str = r"\.+*?()|[]{}^$-";

/// A date-format pattern compiled for prefix matching and parsing
///
/// The pattern language uses the usual date-format letters (`yyyy`, `MM`,
/// `dd`, `HH`, `mm`, `ss`, `SSS`, ...). Compilation produces a regex
/// anchored at the line start, sized per field, and a parser that reads
/// English month names regardless of host locale. Single quotes delimit
/// literal text; a doubled quote is one literal quote character.
#[derive(Clone, Debug)]
pub struct TimestampFormat {
    pattern: String,
    regex: Regex,
    regex_source: String,
    chrono_format: String,
    mode: ParseMode,
}

impl TimestampFormat {
    /// Compile a date-format pattern
    pub fn compile(pattern: &str) -> Result<Self, FormatError> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut regex_source = String::new();
        let mut chrono_format = String::new();
        let mut in_quote = false;
        let mut has_year = false;
        let mut has_month = false;
        let mut has_day = false;
        let mut has_time = false;
        let mut has_clock_hour = false;
        let mut has_am_pm = false;
        let mut field_seen = false;

        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];

            // A doubled quote is one literal quote, quoted or not
            if c == '\'' {
                if chars.get(i + 1) == Some(&'\'') {
                    push_literal('\'', &mut regex_source, &mut chrono_format);
                    i += 2;
                    continue;
                }
                in_quote = !in_quote;
                i += 1;
                continue;
            }

            if in_quote || !c.is_ascii_alphabetic() {
                push_literal(c, &mut regex_source, &mut chrono_format);
                i += 1;
                continue;
            }

            // Field: a run of one repeated pattern letter
            let mut count = 1;
            while chars.get(i + count) == Some(&c) {
                count += 1;
            }
            let (regex_part, chrono_part) = field_fragments(c, count)?;
            regex_source.push_str(regex_part);
            chrono_format.push_str(chrono_part);
            match c {
                'y' | 'u' => has_year = true,
                'M' | 'L' => has_month = true,
                'd' => has_day = true,
                'H' | 'm' | 's' | 'S' => has_time = true,
                'h' => {
                    has_time = true;
                    has_clock_hour = true;
                }
                'a' => {
                    has_time = true;
                    has_am_pm = true;
                }
                _ => {}
            }
            field_seen = true;
            i += count;
        }

        if in_quote {
            return Err(FormatError::UnterminatedQuote);
        }
        if !field_seen {
            return Err(FormatError::NoFields);
        }
        let has_date = has_year || has_month || has_day;
        if has_date && !(has_year && has_month && has_day) {
            return Err(FormatError::IncompleteDate);
        }
        if has_clock_hour && !has_am_pm {
            return Err(FormatError::MissingAmPm);
        }

        let mode = if has_date && has_time {
            ParseMode::DateTime
        } else if has_date {
            ParseMode::DateOnly
        } else {
            ParseMode::TimeOnly
        };

        let regex = Regex::new(&format!("^{regex_source}"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            regex_source,
            chrono_format,
            mode,
        })
    }

    /// The original pattern text
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Derived regex source, without the line-start anchor
    pub fn regex_source(&self) -> &str {
        &self.regex_source
    }

    /// Whether the pattern carries a date component
    ///
    /// Patterns without one parse to today's date, which is wrong for
    /// lines that cross a midnight boundary.
    pub fn has_date(&self) -> bool {
        self.mode != ParseMode::TimeOnly
    }

    /// Match and parse a timestamp prefix
    ///
    /// Returns the timestamp and the rest of the line with leading
    /// whitespace trimmed, or None when the line has no matching prefix
    /// or the matched text does not parse.
    pub fn extract<'a>(&self, line: &'a str) -> Option<(NaiveDateTime, &'a str)> {
        let matched = self.regex.find(line)?;
        let timestamp = self.parse(matched.as_str())?;
        Some((timestamp, line[matched.end()..].trim_start()))
    }

    /// Parse text known to match the derived regex
    fn parse(&self, text: &str) -> Option<NaiveDateTime> {
        match self.mode {
            ParseMode::DateTime => NaiveDateTime::parse_from_str(text, &self.chrono_format).ok(),
            ParseMode::DateOnly => NaiveDate::parse_from_str(text, &self.chrono_format)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN)),
            ParseMode::TimeOnly => NaiveTime::parse_from_str(text, &self.chrono_format)
                .ok()
                .map(|time| Local::now().date_naive().and_time(time)),
        }
    }
}

/// Copy one literal character into both derived forms
fn push_literal(c: char, regex_source: &mut String, chrono_format: &mut String) {
    if REGEX_METACHARS.contains(c) {
        regex_source.push('\\');
    }
    regex_source.push(c);
    if c == '%' {
        chrono_format.push('%');
    }
    chrono_format.push(c);
}

/// Regex and parser fragments for one field run
fn field_fragments(field: char, count: usize) -> Result<(&'static str, &'static str), FormatError> {
    let pair = match (field, count) {
        ('y' | 'u', 4) => (r"\d{4}", "%Y"),
        ('y' | 'u', 2) => (r"\d{2}", "%y"),
        ('M', 2) => (r"\d{2}", "%m"),
        ('M', 1) => (r"\d{1,2}", "%m"),
        ('L', 3) => ("[A-Za-z]{3}", "%b"),
        ('d', 2) => (r"\d{2}", "%d"),
        ('d', 1) => (r"\d{1,2}", "%d"),
        ('H', 2) => (r"\d{2}", "%H"),
        ('H', 1) => (r"\d{1,2}", "%H"),
        ('h', 2) => (r"\d{2}", "%I"),
        ('h', 1) => (r"\d{1,2}", "%I"),
        ('a', 1) => ("[AaPp][Mm]", "%p"),
        ('m', 2) => (r"\d{2}", "%M"),
        ('m', 1) => (r"\d{1,2}", "%M"),
        ('s', 2) => (r"\d{2}", "%S"),
        ('s', 1) => (r"\d{1,2}", "%S"),
        ('S', 3) => (r"\d{3}", "%3f"),
        ('S', 6) => (r"\d{6}", "%6f"),
        ('S', 9) => (r"\d{9}", "%9f"),
        _ => return Err(FormatError::UnsupportedField { field, count }),
    };
    Ok(pair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_pattern_regex() {
        let format = TimestampFormat::compile("dd.MM.yy HH:mm:ss").unwrap();
        assert_eq!(
            format.regex_source(),
            r"\d{2}\.\d{2}\.\d{2} \d{2}:\d{2}:\d{2}"
        );
    }

    #[test]
    fn test_dashes_and_millis_regex() {
        let format = TimestampFormat::compile("uuuu-MM-dd HH:mm:ss,SSS").unwrap();
        assert_eq!(
            format.regex_source(),
            r"\d{4}\-\d{2}\-\d{2} \d{2}:\d{2}:\d{2},\d{3}"
        );
    }

    #[test]
    fn test_quoted_text_copied_verbatim() {
        let format = TimestampFormat::compile("yyyy-MM-dd'TTT'HH:mm:ss.SSS").unwrap();
        assert_eq!(
            format.regex_source(),
            r"\d{4}\-\d{2}\-\d{2}TTT\d{2}:\d{2}:\d{2}\.\d{3}"
        );
    }

    #[test]
    fn test_doubled_quotes_become_literal_quotes() {
        let format = TimestampFormat::compile("yyyy-MM-dd HH'h' mm'' ss'''' SSS").unwrap();
        assert_eq!(
            format.regex_source(),
            r"\d{4}\-\d{2}\-\d{2} \d{2}h \d{2}' \d{2}'' \d{3}"
        );
    }

    #[test]
    fn test_extract_timestamp_and_body() {
        let format = TimestampFormat::compile("dd.MM.yy HH:mm:ss").unwrap();
        let (timestamp, body) = format.extract("02.10.14 09:21:58 started").unwrap();
        assert_eq!(
            timestamp,
            NaiveDate::from_ymd_opt(2014, 10, 2)
                .unwrap()
                .and_hms_opt(9, 21, 58)
                .unwrap()
        );
        assert_eq!(body, "started");
    }

    #[test]
    fn test_extract_requires_line_start_match() {
        let format = TimestampFormat::compile("dd.MM.yy HH:mm:ss").unwrap();
        assert!(format.extract("pid 4711: 02.10.14 09:21:58 started").is_none());
    }

    #[test]
    fn test_round_trip_reformats_to_original_prefix() {
        let timestamp = NaiveDate::from_ymd_opt(2014, 10, 2)
            .unwrap()
            .and_hms_milli_opt(9, 21, 58, 123)
            .unwrap();
        let cases = [
            ("uuuu-MM-dd HH:mm:ss,SSS", "%Y-%m-%d %H:%M:%S,%3f"),
            ("yyyy-MM-dd HH:mm:ss.SSS", "%Y-%m-%d %H:%M:%S.%3f"),
            ("dd.MM.yy HH:mm:ss", "%d.%m.%y %H:%M:%S"),
            ("dd LLL yyyy HH:mm:ss", "%d %b %Y %H:%M:%S"),
        ];
        for (pattern, render) in cases {
            let format = TimestampFormat::compile(pattern).unwrap();
            let text = format!("{} trailing words", timestamp.format(render));
            let (parsed, body) = format.extract(&text).unwrap();
            assert_eq!(body, "trailing words", "pattern {pattern}");
            // Seconds-resolution patterns lose the millisecond part
            let expected = if pattern.contains('S') {
                timestamp
            } else {
                timestamp
                    .date()
                    .and_time(NaiveTime::from_hms_opt(9, 21, 58).unwrap())
            };
            assert_eq!(parsed, expected, "pattern {pattern}");
            assert!(text.starts_with(&parsed.format(render).to_string()));
        }
    }

    #[test]
    fn test_month_name_parses_independent_of_locale() {
        let format = TimestampFormat::compile("dd LLL yyyy HH:mm:ss").unwrap();
        let (timestamp, _) = format.extract("02 Oct 2014 09:21:58 done").unwrap();
        assert_eq!(timestamp.date(), NaiveDate::from_ymd_opt(2014, 10, 2).unwrap());
    }

    #[test]
    fn test_time_only_pattern_uses_current_date() {
        let format = TimestampFormat::compile("HH:mm:ss.SSS").unwrap();
        assert!(!format.has_date());
        let before = Local::now().date_naive();
        let (timestamp, body) = format.extract("09:21:58.123 payload").unwrap();
        let after = Local::now().date_naive();
        assert_eq!(
            timestamp.time(),
            NaiveTime::from_hms_milli_opt(9, 21, 58, 123).unwrap()
        );
        assert!(timestamp.date() == before || timestamp.date() == after);
        assert_eq!(body, "payload");
    }

    #[test]
    fn test_twelve_hour_clock_with_marker() {
        let format = TimestampFormat::compile("hh:mm:ss a").unwrap();
        let (timestamp, _) = format.extract("09:21:58 PM shutting down").unwrap();
        assert_eq!(timestamp.time(), NaiveTime::from_hms_opt(21, 21, 58).unwrap());
    }

    #[test]
    fn test_unsupported_field_is_an_error() {
        let err = TimestampFormat::compile("yyyy-MM-dd QQ").unwrap_err();
        assert!(matches!(
            err,
            FormatError::UnsupportedField { field: 'Q', count: 2 }
        ));
    }

    #[test]
    fn test_incomplete_date_is_an_error() {
        let err = TimestampFormat::compile("MM-dd HH:mm:ss").unwrap_err();
        assert!(matches!(err, FormatError::IncompleteDate));
    }

    #[test]
    fn test_clock_hour_without_marker_is_an_error() {
        let err = TimestampFormat::compile("hh:mm:ss").unwrap_err();
        assert!(matches!(err, FormatError::MissingAmPm));
    }

    #[test]
    fn test_unterminated_quote_is_an_error() {
        let err = TimestampFormat::compile("yyyy-MM-dd 'T").unwrap_err();
        assert!(matches!(err, FormatError::UnterminatedQuote));
    }

    #[test]
    fn test_literal_only_pattern_is_an_error() {
        let err = TimestampFormat::compile("'nothing here'").unwrap_err();
        assert!(matches!(err, FormatError::NoFields));
    }

    #[test]
    fn test_unparseable_match_yields_none() {
        // 99 is two digits, so the regex matches, but no month 99 exists
        let format = TimestampFormat::compile("dd.MM.yy HH:mm:ss").unwrap();
        assert!(format.extract("02.99.14 09:21:58 started").is_none());
    }
}
