use regex::Regex;

use tailscope_types::PLAIN_LEVEL;

/// Detects a record's level from its first line
///
/// Each known level name becomes a word-bounded regex; the level whose
/// match starts earliest in the first line wins, with configuration order
/// breaking ties. Continuation lines never influence the level.
pub struct RecordLevelDetector {
    patterns: Vec<(String, Regex)>,
}

impl RecordLevelDetector {
    pub fn new(known_levels: &[String]) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(known_levels.len());
        for level in known_levels {
            let regex = Regex::new(&format!(r"\b{}\b", regex::escape(level)))?;
            patterns.push((level.clone(), regex));
        }
        Ok(Self { patterns })
    }

    /// The level whose match starts earliest in the record's first line
    pub fn detect(&self, text: &str) -> Option<&str> {
        let first_line = text.lines().next().unwrap_or("");
        let mut best: Option<(usize, &str)> = None;
        for (level, regex) in &self.patterns {
            if let Some(found) = regex.find(first_line) {
                let earlier = match best {
                    Some((start, _)) => found.start() < start,
                    None => true,
                };
                if earlier {
                    best = Some((found.start(), level.as_str()));
                }
            }
        }
        best.map(|(_, level)| level)
    }

    /// Detected level name, or the plain placeholder
    pub fn level_for(&self, text: &str) -> String {
        self.detect(text).unwrap_or(PLAIN_LEVEL).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> RecordLevelDetector {
        let levels: Vec<String> = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "FATAL"]
            .into_iter()
            .map(str::to_string)
            .collect();
        RecordLevelDetector::new(&levels).unwrap()
    }

    #[test]
    fn test_detects_known_level() {
        let detector = detector();
        assert_eq!(
            detector.detect("2014-10-02 09:21:58 ERROR something broke"),
            Some("ERROR")
        );
    }

    #[test]
    fn test_earliest_match_wins() {
        let detector = detector();
        // WARN appears before ERROR on the line
        assert_eq!(
            detector.detect("09:21:58 WARN retrying after ERROR from peer"),
            Some("WARN")
        );
    }

    #[test]
    fn test_word_boundary_rejects_substrings() {
        let detector = detector();
        assert_eq!(detector.detect("MIRRORED data received"), None);
        assert_eq!(detector.detect("ERRORS=5 but fine"), None);
    }

    #[test]
    fn test_continuation_lines_are_ignored() {
        let detector = detector();
        let text = "09:21:58 processing item\n\tat handler (ERROR in trace)";
        assert_eq!(detector.detect(text), None);
        assert_eq!(detector.level_for(text), PLAIN_LEVEL);
    }

    #[test]
    fn test_custom_level_names() {
        let levels: Vec<String> = ["NOTICE", "SEVERE"].into_iter().map(str::to_string).collect();
        let detector = RecordLevelDetector::new(&levels).unwrap();
        assert_eq!(detector.detect("09:21:58 SEVERE failure"), Some("SEVERE"));
        assert_eq!(detector.detect("09:21:58 ERROR failure"), None);
    }
}
