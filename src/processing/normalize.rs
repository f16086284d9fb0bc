//! Cleanup applied to extracted paper text before chunking.

use regex::Regex;

/// Removes extraction artifacts while keeping line and paragraph breaks.
///
/// The rules run in order:
///
/// 1. `\r\n` and lone `\r` become `\n`.
/// 2. Footnote glyphs `§ † ‡` are removed.
/// 3. Words split by a hyphen and whitespace (`immuno-\ngenic`) are merged.
/// 4. Runs of horizontal whitespace collapse to one space and every line is trimmed.
/// 5. Three or more consecutive newlines collapse into one blank line.
/// 6. The whole text is trimmed.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    footnote_glyphs: Regex,
    hyphen_split: Regex,
    horizontal_space: Regex,
    blank_runs: Regex,
}

impl TextNormalizer {
    /// Compile the cleanup patterns.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            footnote_glyphs: Regex::new(r"[§†‡]")?,
            hyphen_split: Regex::new(r"(\w)-\s+(\w)")?,
            horizontal_space: Regex::new(r"[^\S\n]+")?,
            blank_runs: Regex::new(r"\n{3,}")?,
        })
    }

    /// Apply every cleanup rule to `text`.
    pub fn normalize(&self, text: &str) -> String {
        let unified = text.replace("\r\n", "\n").replace('\r', "\n");
        let without_glyphs = self.footnote_glyphs.replace_all(&unified, "");
        let merged = self.hyphen_split.replace_all(&without_glyphs, "${1}${2}");
        let spaced = self.horizontal_space.replace_all(&merged, " ");

        let lines: Vec<&str> = spaced.split('\n').map(str::trim).collect();
        let joined = lines.join("\n");

        self.blank_runs
            .replace_all(&joined, "\n\n")
            .trim()
            .to_string()
    }
}
