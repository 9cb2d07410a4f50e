use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which engine should evaluate a piece of rule source text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Full structured rule language, compiled by the remote engine.
    Structured,
    /// Line-oriented `if <field> <op> <value> then <action>` dialect,
    /// evaluated locally.
    Simple,
}

/// Natural-language surface syntax of the structured rule language.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    De,
    Es,
    Fr,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
            Self::Es => "es",
            Self::Fr => "fr",
        }
    }
}

fn structural_markers() -> &'static Vec<Regex> {
    static MARKERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MARKERS.get_or_init(|| {
        vec![
            // Module declaration opening a structured rule file.
            Regex::new(r"(?mi)^\s*(module|modul|m[oó]dulo)\s+\w").unwrap(),
            // Typed function signature, e.g. `function check(age: number)`.
            Regex::new(r"(?mi)^\s*(function|funktion|funci[oó]n|fonction)\s+\w+\s*\([^)]*:\s*\w+")
                .unwrap(),
            // Typed rule declaration with an input clause.
            Regex::new(r"(?mi)^\s*(rule|regel|regla|r[eè]gle)\s+\w+\s+(when|wenn|cuando|quand)\b")
                .unwrap(),
        ]
    })
}

/// Heuristic classification of rule source text.
///
/// Matching is deliberately conservative: a false negative only falls
/// back to the simple engine, while a false positive would send text
/// the remote engine cannot compile. Only unambiguous structural
/// markers count.
pub fn classify(source: &str) -> EngineKind {
    if structural_markers().iter().any(|m| m.is_match(source)) {
        EngineKind::Structured
    } else {
        EngineKind::Simple
    }
}

const LOCALE_KEYWORDS: &[(Locale, &[&str])] = &[
    (Locale::En, &["module", "function", "rule", "when", "then", "and", "or", "not", "if"]),
    (Locale::De, &["modul", "funktion", "regel", "wenn", "dann", "und", "oder", "nicht"]),
    (Locale::Es, &["modulo", "módulo", "función", "funcion", "regla", "cuando", "entonces", "si"]),
    (Locale::Fr, &["fonction", "règle", "regle", "quand", "alors", "et", "ou", "si"]),
];

/// Keyword-frequency guess at the source locale. Used only to select
/// the remote engine's locale profile; ties fall back to English.
pub fn detect_locale(source: &str) -> Locale {
    let lower = source.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != 'é' && c != 'ó' && c != 'è' && c != 'á')
        .filter(|w| !w.is_empty())
        .collect();

    let mut best = Locale::En;
    let mut best_count = 0usize;
    for (locale, keywords) in LOCALE_KEYWORDS {
        let count = words.iter().filter(|w| keywords.contains(*w)).count();
        if count > best_count {
            best = *locale;
            best_count = count;
        }
    }
    best
}
