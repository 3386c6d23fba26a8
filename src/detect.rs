use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::dom::{NodeKind, Tree};
use crate::error::Result;
use crate::extract::extract_text_bounded;

/// Text longer than this is never treated as a currency amount; the search
/// continues into its children instead.
pub const MAX_TEXT_CHARS: usize = 20;

const GROUPED_DIGITS: &str = r"[0-9]{1,3}(?:,[0-9]{3})+|[0-9]+";
const PLAIN_DIGITS: &str = r"[0-9]+";

// Compiled patterns, keyed by pattern source
static PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// An amount found in a piece of text, and how much of the text it covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    /// Value of the first match
    pub amount: f64,
    /// Fraction of the text's characters covered by matches, in `[0, 1]`
    pub proportion: f64,
}

/// Finds amounts written with one currency symbol.
#[derive(Debug, Clone)]
pub struct CurrencyDetector {
    symbol: String,
    pattern: Regex,
    // Same pattern without thousands groups
    plain: Regex,
}

impl CurrencyDetector {
    /// Build a detector for a literal currency symbol such as `$` or `€`.
    pub fn new(symbol: &str) -> Result<Self> {
        Ok(Self {
            symbol: symbol.to_string(),
            pattern: currency_pattern(symbol)?,
            plain: compile(symbol, PLAIN_DIGITS)?,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Detect an amount in the text of a subtree.
    pub fn detect<T: Tree>(&self, tree: &T, node: T::Node) -> Option<Detection> {
        if tree.kind(node) == NodeKind::Script {
            return None;
        }
        let text = extract_text_bounded(tree, node, MAX_TEXT_CHARS)?;
        self.detect_text(&text)
    }

    /// Detect an amount in plain text.
    ///
    /// Every non-overlapping match counts toward the proportion; only the first
    /// one supplies the amount. No match at all is `None`, not a zero proportion.
    pub fn detect_text(&self, text: &str) -> Option<Detection> {
        let length = text.chars().count();
        if length > MAX_TEXT_CHARS {
            return None;
        }

        let mut unmatched = length;
        let mut amount = None;
        let mut start = 0;
        while let Some(mut caps) = self.pattern.captures_at(text, start) {
            // "1,2345" is not a thousands group: read it without grouping
            if split_group(&caps, text) {
                let at = caps.get(0).map_or(start, |m| m.start());
                match self.plain.captures_at(text, at) {
                    Some(plain) => caps = plain,
                    None => break,
                }
            }
            let Some(whole) = caps.get(0) else { break };
            unmatched -= whole.as_str().chars().count();
            start = whole.end();

            if amount.is_none() {
                let integer = caps.get(1).map(|m| m.as_str().replace(',', "")).unwrap_or_default();
                let fraction = caps.get(2).map(|m| m.as_str()).unwrap_or("0");
                amount = format!("{}.{}", integer, fraction).parse::<f64>().ok();
            }
        }

        let amount = amount?;
        Some(Detection {
            amount,
            proportion: 1.0 - unmatched as f64 / length as f64,
        })
    }
}

/// Compile (or fetch from cache) the amount pattern for a currency symbol.
///
/// The symbol, then optional letters (`US$`, `$CAD`), an optional space, digits
/// with optional `,` thousands groups, and an optional 1-2 digit fraction after
/// `.` or `,`.
pub fn currency_pattern(symbol: &str) -> Result<Regex> {
    compile(symbol, GROUPED_DIGITS)
}

fn compile(symbol: &str, digits: &str) -> Result<Regex> {
    let source = format!(
        r"{}[A-Za-z]*\s?({})(?:[.,]([0-9]{{1,2}}))?",
        regex::escape(symbol),
        digits
    );

    let mut cache = PATTERNS.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(re) = cache.get(&source) {
        return Ok(re.clone());
    }
    let re = Regex::new(&source)?;
    cache.insert(source, re.clone());
    Ok(re)
}

/// A grouped integer part directly followed by another digit.
fn split_group(caps: &Captures<'_>, text: &str) -> bool {
    caps.get(1).is_some_and(|integer| {
        integer.as_str().contains(',')
            && text[integer.end()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
    })
}
