//! The five review sections and their length targets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five fixed subdivisions of a systematic review.
///
/// The derived ordering is the order in which sections are written and concatenated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Introduction, context, and rationale.
    Background,
    /// Study design, search, and synthesis approach.
    Methods,
    /// Summary of the evidence found.
    Results,
    /// Interpretation and implications of the findings.
    Discussion,
    /// Closing summary and recommendations.
    Conclusion,
}

/// Approximate characters per word used to turn word targets into character ceilings.
pub const CHARS_PER_WORD: usize = 6;

impl Section {
    /// Every section in writing order.
    pub const ALL: [Section; 5] = [
        Section::Background,
        Section::Methods,
        Section::Results,
        Section::Discussion,
        Section::Conclusion,
    ];

    /// Label used in prompts, namespaces, and rendered output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Section::Background => "Background",
            Section::Methods => "Methods",
            Section::Results => "Results",
            Section::Discussion => "Discussion",
            Section::Conclusion => "Conclusion",
        }
    }

    /// Target word count for generated text. A ceiling, not a minimum.
    pub const fn target_words(self) -> usize {
        match self {
            Section::Background => 1200,
            Section::Methods => 1500,
            Section::Results => 2500,
            Section::Discussion => 3000,
            Section::Conclusion => 600,
        }
    }

    /// Hard character ceiling applied to the raw generation output.
    pub const fn char_ceiling(self) -> usize {
        self.target_words() * CHARS_PER_WORD
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string is not exactly one of the five section labels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown section label '{0}'")]
pub struct UnknownSection(pub String);

impl FromStr for Section {
    type Err = UnknownSection;

    /// Exact, case-sensitive match against the canonical labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| UnknownSection(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_ord() {
        let mut shuffled = vec![
            Section::Conclusion,
            Section::Background,
            Section::Discussion,
            Section::Methods,
            Section::Results,
        ];
        shuffled.sort();
        assert_eq!(shuffled, Section::ALL.to_vec());
    }

    #[test]
    fn labels_round_trip_exactly() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>(), Ok(section));
        }
        assert!("methods".parse::<Section>().is_err());
        assert!(" Methods".parse::<Section>().is_err());
    }

    #[test]
    fn ceilings_follow_word_targets() {
        assert_eq!(Section::Background.char_ceiling(), 7200);
        assert_eq!(Section::Discussion.char_ceiling(), 18000);
        assert_eq!(Section::Conclusion.char_ceiling(), 3600);
    }
}
