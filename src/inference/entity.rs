//! Organization and person mentions.
//!
//! A value is an entity when it ends in a legal-entity suffix, or when it is a short
//! Title-Case run sitting under an entity label (a column header or key such as `Client`).
//! Mentions are grouped by a canonical key that ignores case, punctuation and suffixes;
//! keys that are nearly identical are merged.

use crate::helpers::string::collapse_whitespace;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use strsim::normalized_levenshtein;

/// Normalized Levenshtein similarity above which two canonical keys are one entity.
const MERGE_SIMILARITY: f64 = 0.9;
const MAX_WORDS: usize = 8;
const MAX_CHARS: usize = 80;

const SUFFIXES: [&str; 33] = [
    "inc", "incorporated", "llc", "ltd", "limited", "corp", "corporation", "company", "co", "group", "holdings",
    "holding", "partners", "lp", "llp", "gmbh", "ag", "sa", "plc", "pty", "nv", "bv", "trust", "fund", "bank",
    "capital", "ventures", "sarl", "srl", "spa", "oy", "ab", "kk",
];
/// Multi-word suffixes, matched on the lowercase text.
const TRAILING_PHRASES: [&str; 4] = ["& co", "& sons", "and sons", "and company"];

/// Generic words that never make an entity name on their own.
const EXCLUDED_WORDS: [&str; 46] = [
    "total", "subtotal", "net", "gross", "working", "share", "equity", "debt", "revenue", "sales", "income",
    "expense", "expenses", "cost", "costs", "profit", "loss", "cash", "balance", "asset", "assets", "liabilities",
    "tax", "interest", "operating", "other", "retained", "paid", "opening", "closing", "fixed", "current",
    "the", "a", "an", "our", "your", "this", "parent", "venture", "investment", "investments", "amount", "budget",
    "forecast", "actual",
];

/// Labels announcing entity values, with the category they imply (`None` for generic labels).
const ENTITY_LABELS: [(&str, Option<EntityCategory>); 28] = [
    ("company", Some(EntityCategory::Company)),
    ("client", None),
    ("customer", None),
    ("investor", None),
    ("counterparty", None),
    ("party", None),
    ("vendor", Some(EntityCategory::Company)),
    ("supplier", Some(EntityCategory::Company)),
    ("entity", None),
    ("borrower", None),
    ("guarantor", None),
    ("issuer", Some(EntityCategory::Company)),
    ("tenant", None),
    ("subsidiary", Some(EntityCategory::Company)),
    ("organization", None),
    ("organisation", None),
    ("firm", Some(EntityCategory::Company)),
    ("lender", Some(EntityCategory::Bank)),
    ("bank", Some(EntityCategory::Bank)),
    ("fund", Some(EntityCategory::Fund)),
    ("director", Some(EntityCategory::Person)),
    ("contact", Some(EntityCategory::Person)),
    ("signatory", Some(EntityCategory::Person)),
    ("officer", Some(EntityCategory::Person)),
    ("owner", None),
    ("shareholder", None),
    ("manager", Some(EntityCategory::Person)),
    ("employee", Some(EntityCategory::Person)),
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Person,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Company,
    Bank,
    Fund,
    Person,
    Other,
}

/// A canonical entity with its occurrences on one sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    /// Most frequent surface form
    pub name: String,
    pub canonical: String,
    pub kind: EntityKind,
    pub category: EntityCategory,
    pub count: usize,
    pub primary: bool,
}

/// One recognized value before grouping.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub kind: EntityKind,
    pub category: EntityCategory,
}

/// Returns true when a header or key announces entity values.
pub fn is_entity_label(label: &str) -> bool {
    label_category(label).is_some()
}

fn label_category(label: &str) -> Option<Option<EntityCategory>> {
    let label = label.to_lowercase();
    label
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            let singular = match word.strip_suffix("ies") {
                Some(stem) => format!("{stem}y"),
                None => word.strip_suffix('s').unwrap_or(word).to_owned(),
            };
            ENTITY_LABELS
                .iter()
                .find(|(name, _)| *name == word || *name == singular)
                .map(|(_, category)| *category)
        })
}

/// Recognizes an entity in a value, using an optional label (column header or key) as context.
pub fn recognize(text: &str, label: Option<&str>) -> Option<Candidate> {
    let name = collapse_whitespace(text.trim_matches(|character: char| character.is_whitespace() || character == ','));
    if name.is_empty() || name.chars().count() > MAX_CHARS || !name.chars().any(char::is_alphabetic) {
        return None;
    }
    let words: Vec<&str> = name.split(' ').collect();
    if words.len() > MAX_WORDS || !starts_capitalized(words[0]) {
        return None;
    }

    let lower = name.to_lowercase();
    let plain: Vec<String> = words.iter().map(|word| plain_word(word)).collect();
    let suffix = TRAILING_PHRASES
        .iter()
        .find(|phrase| lower.ends_with(*phrase))
        .map(|phrase| phrase.split(' ').count())
        .or_else(|| plain.last().filter(|word| SUFFIXES.contains(&word.as_str())).map(|_| 1));
    let bank_prefix = plain.len() >= 3 && plain[0] == "bank" && plain[1] == "of";

    if let Some(count) = suffix.or(bank_prefix.then_some(0)) {
        let stem = &plain[..plain.len().saturating_sub(count)];
        if stem.is_empty() || stem.iter().all(|word| EXCLUDED_WORDS.contains(&word.as_str())) {
            return None;
        }
        return Some(Candidate {
            name,
            kind: EntityKind::Organization,
            category: suffix_category(&plain),
        });
    }

    // Without a suffix, only short Title-Case runs under an entity label qualify
    let label = label_category(label?)?;
    if words.len() > 5
        || !words.iter().all(|word| is_title_word(word))
        || plain.iter().all(|word| EXCLUDED_WORDS.contains(&word.as_str()))
    {
        return None;
    }
    let category = label.unwrap_or(EntityCategory::Other);
    let kind = match category {
        EntityCategory::Person => EntityKind::Person,
        _ => EntityKind::Organization,
    };
    Some(Candidate { name, kind, category })
}

fn suffix_category(plain: &[String]) -> EntityCategory {
    if plain.iter().any(|word| word == "bank") {
        EntityCategory::Bank
    } else if plain
        .last()
        .map(|word| matches!(word.as_str(), "fund" | "capital" | "ventures" | "partners" | "lp" | "llp"))
        .unwrap_or(false)
    {
        EntityCategory::Fund
    } else if plain.last().map(|word| word == "trust").unwrap_or(false) {
        EntityCategory::Other
    } else {
        EntityCategory::Company
    }
}

fn plain_word(word: &str) -> String {
    word.chars()
        .filter(|character| character.is_alphanumeric() || *character == '&')
        .collect::<String>()
        .to_lowercase()
}

fn starts_capitalized(word: &str) -> bool {
    word.chars()
        .find(|character| character.is_alphanumeric())
        .map(|character| character.is_uppercase() || character.is_ascii_digit())
        .unwrap_or(false)
}

/// `Smith`, `O'Brien`, `J.`, `Jean-Luc`, or short connecting words like `of` and `and`.
fn is_title_word(word: &str) -> bool {
    if matches!(word, "of" | "and" | "&" | "de" | "van" | "von" | "la" | "du") {
        return true;
    }
    let mut characters = word.chars();
    characters.next().map(char::is_uppercase).unwrap_or(false)
        && characters.all(|character| character.is_alphabetic() || matches!(character, '.' | '-' | '\''))
}

/// Case-, punctuation- and suffix-insensitive key: `ABC Corp.` and `abc corporation` both give `abc`.
pub fn canonical_key(name: &str) -> String {
    let lower = name.to_lowercase().replace('&', " & ");
    let mut words: Vec<String> = lower
        .split(|character: char| character.is_whitespace() || character == ',')
        .map(|word| word.chars().filter(|character| character.is_alphanumeric() || *character == '&').collect::<String>())
        .filter(|word| !word.is_empty())
        .collect();
    if words.first().map(|word| word == "the").unwrap_or(false) && words.len() > 1 {
        words.remove(0);
    }
    loop {
        let trailing = match words.as_slice() {
            [.., last] if words.len() > 1 && SUFFIXES.contains(&last.as_str()) => 1,
            [.., and, sons] if words.len() > 2 && (and == "&" || and == "and") && (sons == "sons" || sons == "co") => 2,
            _ => 0,
        };
        if trailing == 0 {
            break;
        }
        words.truncate(words.len() - trailing);
    }
    words.join(" ")
}

struct Group {
    key: String,
    kind: EntityKind,
    category: EntityCategory,
    count: usize,
    /// Surface forms with their counts, in first-seen order
    forms: Vec<(String, usize)>,
}

/// Collects entity mentions over one sheet.
#[derive(Default)]
pub struct EntityDetector {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

impl EntityDetector {
    pub fn new() -> Self {
        EntityDetector::default()
    }

    /// Records the value if it is an entity; returns whether it was.
    pub fn observe(&mut self, text: &str, label: Option<&str>) -> bool {
        let Some(candidate) = recognize(text, label) else {
            return false;
        };
        let key = canonical_key(&candidate.name);
        if key.is_empty() {
            return false;
        }
        let position = match self.index.get(&key) {
            Some(position) => *position,
            None => {
                self.groups.push(Group {
                    key: key.to_owned(),
                    kind: candidate.kind,
                    category: candidate.category,
                    count: 0,
                    forms: Vec::new(),
                });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[position];
        group.count += 1;
        match group.forms.iter_mut().find(|(form, _)| *form == candidate.name) {
            Some((_, count)) => *count += 1,
            None => group.forms.push((candidate.name, 1)),
        }
        true
    }

    /// Merges near-identical keys and ranks entities by count; the first one is primary.
    pub fn finish(self) -> Vec<EntityMention> {
        let mut groups: Vec<Group> = Vec::new();
        let mut pending = self.groups;
        // Larger groups absorb smaller look-alikes
        pending.sort_by(|left, right| right.count.cmp(&left.count));
        for group in pending {
            match groups
                .iter_mut()
                .find(|existing| existing.kind == group.kind && normalized_levenshtein(&existing.key, &group.key) >= MERGE_SIMILARITY)
            {
                Some(existing) => {
                    existing.count += group.count;
                    for (form, count) in group.forms {
                        match existing.forms.iter_mut().find(|(name, _)| *name == form) {
                            Some((_, total)) => *total += count,
                            None => existing.forms.push((form, count)),
                        }
                    }
                }
                None => groups.push(group),
            }
        }

        let mut mentions: Vec<EntityMention> = groups
            .into_iter()
            .map(|group| {
                let name = group
                    .forms
                    .iter()
                    .rev()
                    .max_by_key(|(_, count)| *count)
                    .map(|(form, _)| form.to_owned())
                    .unwrap_or_else(|| group.key.to_owned());
                EntityMention {
                    name,
                    canonical: group.key,
                    kind: group.kind,
                    category: group.category,
                    count: group.count,
                    primary: false,
                }
            })
            .collect();
        mentions.sort_by(|left, right| right.count.cmp(&left.count).then_with(|| left.canonical.cmp(&right.canonical)));
        if let Some(first) = mentions.first_mut() {
            first.primary = true;
        }
        mentions
    }
}
