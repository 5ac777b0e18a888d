use std::{borrow::Cow, sync::OnceLock};

use regex::Regex;
use tracing::instrument;

use crate::{AnalysisDocument, BoundingPolygon, Result};

/// 17 characters, letters I, O and Q excluded.
pub const VIN_PATTERN: &str = "[A-HJ-NPR-Z0-9]{17}";

const VIN_LEN: usize = 17;
const VIN_CHECK_POSITION: usize = 8;
const VIN_WEIGHTS: [u32; VIN_LEN] = [8, 7, 6, 5, 4, 3, 2, 10, 0, 9, 8, 7, 6, 5, 4, 3, 2];

fn vin_regex() -> &'static Regex {
    static VIN: OnceLock<Regex> = OnceLock::new();
    VIN.get_or_init(|| Regex::new(VIN_PATTERN).expect("VIN pattern is valid"))
}

fn vin_run_regex() -> &'static Regex {
    static VIN_RUN: OnceLock<Regex> = OnceLock::new();
    VIN_RUN.get_or_init(|| Regex::new("[A-HJ-NPR-Z0-9]{17,}").expect("VIN run pattern is valid"))
}

/// How line content is prepared before the predicate sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Normalization {
    #[default]
    Intact,
    /// Removes all whitespace, so codes split by the recogniser are matched as one.
    StripWhitespace,
}

impl Normalization {
    pub fn apply<'a>(&self, content: &'a str) -> Cow<'a, str> {
        match self {
            Normalization::StripWhitespace if content.chars().any(char::is_whitespace) => {
                Cow::Owned(content.chars().filter(|c| !c.is_whitespace()).collect())
            }
            _ => Cow::Borrowed(content),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MatchPredicate {
    /// Matches once when the literal is a substring of the content.
    Literal(String),
    /// Matches once per non-overlapping occurrence of the expression.
    Pattern(Regex),
    Vin { verify_check_digit: bool },
}

impl MatchPredicate {
    pub fn literal(literal: impl Into<String>) -> Self {
        MatchPredicate::Literal(literal.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(MatchPredicate::Pattern(Regex::new(pattern)?))
    }

    pub fn vin() -> Self {
        MatchPredicate::Vin {
            verify_check_digit: false,
        }
    }

    pub fn vin_with_check_digit() -> Self {
        MatchPredicate::Vin {
            verify_check_digit: true,
        }
    }

    /// Literals are matched against the content as recognised, patterns against the content with
    /// whitespace removed.
    pub fn default_normalization(&self) -> Normalization {
        match self {
            MatchPredicate::Literal(_) => Normalization::Intact,
            MatchPredicate::Pattern(_) | MatchPredicate::Vin { .. } => {
                Normalization::StripWhitespace
            }
        }
    }

    /// Every match in `content`, left to right.
    pub fn find<'a>(&self, content: &'a str) -> Vec<&'a str> {
        match self {
            MatchPredicate::Literal(literal) => content
                .find(literal.as_str())
                .map(|start| vec![&content[start..start + literal.len()]])
                .unwrap_or_default(),
            MatchPredicate::Pattern(regex) => regex.find_iter(content).map(|m| m.as_str()).collect(),
            MatchPredicate::Vin {
                verify_check_digit: false,
            } => vin_regex().find_iter(content).map(|m| m.as_str()).collect(),
            MatchPredicate::Vin {
                verify_check_digit: true,
            } => vin_run_regex()
                .find_iter(content)
                .flat_map(|run| checked_vins(run.as_str()))
                .collect(),
        }
    }

    pub fn is_match(&self, content: &str) -> bool {
        !self.find(content).is_empty()
    }
}

/// Slides a 17 character window over a run of VIN characters and keeps the windows whose check
/// digit is valid. Accepted windows do not overlap.
fn checked_vins(run: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut start = 0;
    while start + VIN_LEN <= run.len() {
        let candidate = &run[start..start + VIN_LEN];
        if vin_check_digit_is_valid(candidate) {
            found.push(candidate);
            start += VIN_LEN;
        } else {
            start += 1;
        }
    }
    found
}

fn transliterate(c: char) -> Option<u32> {
    let value = match c {
        '0'..='9' => c.to_digit(10)?,
        'A' | 'J' => 1,
        'B' | 'K' | 'S' => 2,
        'C' | 'L' | 'T' => 3,
        'D' | 'M' | 'U' => 4,
        'E' | 'N' | 'V' => 5,
        'F' | 'W' => 6,
        'G' | 'P' | 'X' => 7,
        'H' | 'Y' => 8,
        'R' | 'Z' => 9,
        _ => return None,
    };
    Some(value)
}

/// Validates position 9 of a North American VIN: weighted sum of the transliterated characters
/// modulo 11, with 10 written as `X`.
pub fn vin_check_digit_is_valid(vin: &str) -> bool {
    if vin.len() != VIN_LEN {
        return false;
    }
    let mut sum = 0;
    for (c, weight) in vin.chars().zip(VIN_WEIGHTS) {
        match transliterate(c) {
            Some(value) => sum += value * weight,
            None => return false,
        }
    }
    let expected = match sum % 11 {
        10 => 'X',
        remainder => char::from_digit(remainder, 10).unwrap_or('X'),
    };
    vin.chars().nth(VIN_CHECK_POSITION) == Some(expected)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineMatch {
    pub text: String,
    pub line_index: usize,
    pub bounds: BoundingPolygon,
}

/// Runs the predicate over every line in document order. A line that matches several times
/// yields one entry per match, all sharing the line's polygon.
#[instrument(level = "debug", skip(document))]
pub fn find_matches(
    document: &AnalysisDocument,
    predicate: &MatchPredicate,
    normalization: Normalization,
) -> Vec<LineMatch> {
    let mut matches = Vec::new();
    for (line_index, line) in document.lines.iter().enumerate() {
        let content = normalization.apply(&line.content);
        for text in predicate.find(&content) {
            log::trace!("Line {line_index} matched {text:?}");
            matches.push(LineMatch {
                text: text.to_string(),
                line_index,
                bounds: line.bounds,
            });
        }
    }
    log::debug!(
        "{} matches in {} lines",
        matches.len(),
        document.lines.len()
    );
    matches
}

pub fn extract(
    document: &AnalysisDocument,
    predicate: &MatchPredicate,
    normalization: Normalization,
) -> Vec<BoundingPolygon> {
    find_matches(document, predicate, normalization)
        .into_iter()
        .map(|it| it.bounds)
        .collect()
}

/// Bounds of every detected object called `name`, ignoring case.
pub fn extract_objects(document: &AnalysisDocument, name: &str) -> Vec<BoundingPolygon> {
    document
        .objects
        .iter()
        .filter(|object| object.name.eq_ignore_ascii_case(name))
        .map(|object| BoundingPolygon::from_box(object.bounds))
        .collect()
}
