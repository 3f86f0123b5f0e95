//! Preprocessor (§4.6): normalizes raw transcription text and detects the
//! EAM/SKYKING envelope markers before a segment enters the aggregator.

use super::types::EamMessageType;

const NUMBER_WORDS: &[(&str, &str)] = &[
    ("ZERO", "0"),
    ("ONE", "1"),
    ("TWO", "2"),
    ("THREE", "3"),
    ("FOUR", "4"),
    ("FIVE", "5"),
    ("SIX", "6"),
    ("SEVEN", "7"),
    ("EIGHT", "8"),
    ("NINER", "9"),
    ("NINE", "9"),
];

#[derive(Debug, Clone)]
pub struct DetectedEnvelope {
    pub kind: EamMessageType,
    pub header: String,
    pub body: String,
    pub codeword: Option<String>,
    pub time_code: Option<String>,
    pub authentication: Option<String>,
    /// Whether this segment, on its own, carries the closing sentinel for
    /// the message (a second announcement of the header for EAM, or the
    /// full codeword/time/authentication triple for SKYKING). A segment
    /// that only opens or continues a multi-segment transmission reports
    /// `false` here and the aggregator keeps the draft open.
    pub closes: bool,
}

pub struct Preprocessor {
    known_headers: Vec<String>,
}

impl Preprocessor {
    pub fn new(known_headers: Vec<String>) -> Self {
        Self {
            known_headers: known_headers.into_iter().map(|h| h.to_uppercase()).collect(),
        }
    }

    /// Uppercases, strips non-alphanumeric characters except spaces, and
    /// spells out digit words ("ZERO".."NINER") when they appear as
    /// standalone tokens.
    pub fn normalize_text(text: &str) -> String {
        let cleaned: String = text
            .to_uppercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();

        cleaned
            .split_whitespace()
            .map(|word| {
                NUMBER_WORDS
                    .iter()
                    .find(|(name, _)| *name == word)
                    .map(|(_, digit)| digit.to_string())
                    .unwrap_or_else(|| word.to_string())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Groups a contiguous alphanumeric body into uppercase five-character
    /// blocks, matching the canonical EAM transcription format.
    pub fn group_in_fives(body: &str) -> String {
        let stripped: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        stripped
            .as_bytes()
            .chunks(5)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Detects an EAM envelope. A single segment that contains the header
    /// twice is a complete, self-closing message (`closes: true`); a
    /// segment that mentions a known header only once opens or continues a
    /// draft the aggregator will keep open until a later segment closes it
    /// with the repeated-header sentinel.
    fn detect_eam(&self, normalized: &str) -> Option<DetectedEnvelope> {
        for header in &self.known_headers {
            let Some(start) = normalized.find(header.as_str()) else {
                continue;
            };
            let after_first = start + header.len();
            let rest = normalized[after_first..].trim();
            if rest.is_empty() {
                continue;
            }

            if let Some(end_offset) = rest.find(header.as_str()) {
                let body_raw = rest[..end_offset].trim();
                if body_raw.is_empty() {
                    continue;
                }
                return Some(DetectedEnvelope {
                    kind: EamMessageType::Eam,
                    header: header.clone(),
                    body: Self::group_in_fives(body_raw),
                    codeword: None,
                    time_code: None,
                    authentication: None,
                    closes: true,
                });
            }

            return Some(DetectedEnvelope {
                kind: EamMessageType::Eam,
                header: header.clone(),
                body: Self::group_in_fives(rest),
                codeword: None,
                time_code: None,
                authentication: None,
                closes: false,
            });
        }
        None
    }

    /// Detects a SKYKING envelope: literal `SKYKING`, a codeword, `TIME`
    /// plus a two-digit time, `AUTHENTICATION` plus a two-character code.
    fn detect_skyking(&self, normalized: &str) -> Option<DetectedEnvelope> {
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        let sk_idx = tokens.iter().position(|t| *t == "SKYKING")?;
        let codeword = tokens.get(sk_idx + 1)?.to_string();

        let time_idx = tokens.iter().position(|t| *t == "TIME")?;
        let time_code = tokens.get(time_idx + 1).filter(|t| t.len() == 2 && t.chars().all(|c| c.is_ascii_digit()))?;

        let auth_idx = tokens.iter().position(|t| *t == "AUTHENTICATION")?;
        let authentication = tokens.get(auth_idx + 1).filter(|t| t.len() == 2)?;

        Some(DetectedEnvelope {
            kind: EamMessageType::SkyKing,
            header: "SKYKING".to_string(),
            body: normalized.to_string(),
            codeword: Some(codeword),
            time_code: Some(time_code.to_string()),
            authentication: Some(authentication.to_string()),
            closes: true,
        })
    }

    pub fn detect(&self, raw_text: &str) -> Option<DetectedEnvelope> {
        let normalized = Self::normalize_text(raw_text);
        self.detect_skyking(&normalized).or_else(|| self.detect_eam(&normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_punctuation_and_number_words() {
        let out = Preprocessor::normalize_text("piano, zero one two. - break");
        assert_eq!(out, "PIANO 0 1 2 BREAK");
    }

    #[test]
    fn groups_body_into_five_character_blocks() {
        assert_eq!(Preprocessor::group_in_fives("abcdefghij"), "ABCDE FGHIJ");
    }

    #[test]
    fn detects_eam_envelope_between_repeated_header() {
        let pre = Preprocessor::new(vec!["PIANO".to_string()]);
        let text = "piano alpha bravo charlie delta echo piano";
        let envelope = pre.detect(text).unwrap();
        assert_eq!(envelope.kind, EamMessageType::Eam);
        assert_eq!(envelope.header, "PIANO");
        assert!(!envelope.body.is_empty());
    }

    #[test]
    fn detects_skyking_envelope_fields() {
        let pre = Preprocessor::new(vec!["PIANO".to_string()]);
        let text = "skyking foxtrot time 14 authentication bq";
        let envelope = pre.detect(text).unwrap();
        assert_eq!(envelope.kind, EamMessageType::SkyKing);
        assert_eq!(envelope.codeword.as_deref(), Some("FOXTROT"));
        assert_eq!(envelope.time_code.as_deref(), Some("14"));
        assert_eq!(envelope.authentication.as_deref(), Some("BQ"));
    }

    #[test]
    fn no_envelope_detected_in_plain_chatter() {
        let pre = Preprocessor::new(vec!["PIANO".to_string()]);
        assert!(pre.detect("just some routine radio check").is_none());
    }
}
