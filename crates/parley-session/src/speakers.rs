//! Speaker attribution: splitting streamed text into per-persona segments
//!
//! When personas are configured, the assistant speaks for several simulated
//! characters in one stream, switching voice with a line consisting solely
//! of `[PersonaName]`. This is a best-effort heuristic: a text line that
//! happens to equal a marker is indistinguishable from a real one.

use parley_protocol::Persona;

/// How many trailing lines to re-scan after each text delta
const TAIL_LINES: usize = 8;

/// Classification of one line of streamed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// A persona marker matching the roster exactly
    Marker(String),
    /// Ordinary text
    Text,
}

/// Classify one line against a roster of persona names
pub fn classify_line(line: &str, names: &[String]) -> LineKind {
    let trimmed = line.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        let candidate = &trimmed[1..trimmed.len() - 1];
        if names.iter().any(|n| n == candidate) {
            return LineKind::Marker(candidate.to_string());
        }
    }
    LineKind::Text
}

/// The configured persona roster for one session
#[derive(Debug, Clone, Default)]
pub struct SpeakerRoster {
    personas: Vec<Persona>,
    names: Vec<String>,
}

impl SpeakerRoster {
    pub fn new(personas: Vec<Persona>) -> Self {
        let names = personas.iter().map(|p| p.name.clone()).collect();
        Self { personas, names }
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    /// Resolve a name to its full roster entry (icon/color included)
    pub fn resolve(&self, name: &str) -> Persona {
        self.personas
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap_or_else(|| Persona::named(name))
    }

    /// Scan the most recently seen lines of accumulated text for a marker.
    ///
    /// Returns the latest marker in the tail, or `None` when the tail holds
    /// no marker (the current attribution then stays as it was).
    pub fn scan_tail(&self, text: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        text.lines()
            .rev()
            .take(TAIL_LINES)
            .find_map(|line| match classify_line(line, &self.names) {
                LineKind::Marker(name) => Some(name),
                LineKind::Text => None,
            })
    }

    /// Split a completed block of text into contiguous per-persona segments.
    ///
    /// Text preceding the first marker is attributed to no persona. Empty
    /// segments are discarded.
    pub fn segment(&self, text: &str) -> Vec<(Option<String>, String)> {
        if self.is_empty() {
            return vec![(None, text.trim().to_string())]
                .into_iter()
                .filter(|(_, t)| !t.is_empty())
                .collect();
        }

        let mut segments: Vec<(Option<String>, String)> = Vec::new();
        let mut current: Option<String> = None;
        let mut buffer: Vec<&str> = Vec::new();

        let mut flush =
            |speaker: &Option<String>, buffer: &mut Vec<&str>, out: &mut Vec<(Option<String>, String)>| {
                let joined = buffer.join("\n");
                let trimmed = joined.trim();
                if !trimmed.is_empty() {
                    out.push((speaker.clone(), trimmed.to_string()));
                }
                buffer.clear();
            };

        for line in text.lines() {
            match classify_line(line, &self.names) {
                LineKind::Marker(name) => {
                    flush(&current, &mut buffer, &mut segments);
                    current = Some(name);
                }
                LineKind::Text => buffer.push(line),
            }
        }
        flush(&current, &mut buffer, &mut segments);

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> SpeakerRoster {
        SpeakerRoster::new(vec![Persona::named("Architect"), Persona::named("Dev")])
    }

    #[test]
    fn test_two_persona_segmentation() {
        let segments = roster().segment("[Architect]\nPlan A\n[Dev]\nImplementing now");
        assert_eq!(
            segments,
            vec![
                (Some("Architect".to_string()), "Plan A".to_string()),
                (Some("Dev".to_string()), "Implementing now".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_before_first_marker_is_unattributed() {
        let segments = roster().segment("preamble\n[Dev]\ncoding");
        assert_eq!(
            segments,
            vec![
                (None, "preamble".to_string()),
                (Some("Dev".to_string()), "coding".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_segments_discarded() {
        let segments = roster().segment("[Architect]\n[Dev]\nonly dev spoke\n[Architect]\n   ");
        assert_eq!(
            segments,
            vec![(Some("Dev".to_string()), "only dev spoke".to_string())]
        );
    }

    #[test]
    fn test_unknown_marker_is_plain_text() {
        let segments = roster().segment("[Narrator]\nhello");
        assert_eq!(segments, vec![(None, "[Narrator]\nhello".to_string())]);
    }

    #[test]
    fn test_scan_tail_finds_latest_marker() {
        let r = roster();
        assert_eq!(
            r.scan_tail("[Architect]\nsome text\n[Dev]\nmore"),
            Some("Dev".to_string())
        );
        assert_eq!(r.scan_tail("no markers here"), None);
    }

    #[test]
    fn test_scan_tail_limited_to_recent_lines() {
        let mut text = "[Architect]\n".to_string();
        for _ in 0..20 {
            text.push_str("filler line\n");
        }
        // The marker scrolled out of the tail window
        assert_eq!(roster().scan_tail(&text), None);
    }

    #[test]
    fn test_empty_roster_passes_text_through() {
        let r = SpeakerRoster::default();
        assert_eq!(
            r.segment("[Architect]\nhello"),
            vec![(None, "[Architect]\nhello".to_string())]
        );
        assert!(r.segment("   ").is_empty());
    }

    #[test]
    fn test_classify_line_requires_exact_match() {
        let names = vec!["Dev".to_string()];
        assert_eq!(classify_line("[Dev]", &names), LineKind::Marker("Dev".to_string()));
        assert_eq!(classify_line("  [Dev]  ", &names), LineKind::Marker("Dev".to_string()));
        assert_eq!(classify_line("[dev]", &names), LineKind::Text);
        assert_eq!(classify_line("[Dev] said:", &names), LineKind::Text);
        assert_eq!(classify_line("Dev", &names), LineKind::Text);
    }
}
