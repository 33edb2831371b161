// 🔑 Species Identity - SpeciesKey + Synonym Table
//
// "Scientific name is a VALUE (can be revised), SpeciesKey is IDENTITY"
//
// Problem solved:
// - "Bombus affinis Cresson, 1863", "bombus  affinis", "BOMBUS AFFINIS" → one key
// - Outdated names ("Psithyrus ashtoni") → accepted name via an injected table
// - One name listed under two accepted species → ambiguous, never guessed

use crate::error::SynonymError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

// ============================================================================
// SPECIES KEY
// ============================================================================

/// Canonical grouping identity: case-folded scientific name without authorship
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesKey(String);

impl SpeciesKey {
    /// Normalize a scientific name into a key.
    ///
    /// Keeps the genus and up to two epithets, case-folded; drops the author
    /// citation, year, subgenus in parentheses and rank markers (`subsp.`).
    pub fn from_scientific_name(name: &str) -> SpeciesKey {
        SpeciesKey(normalize_scientific_name(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Display form with the genus capitalized: "bombus affinis" → "Bombus affinis"
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for SpeciesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const RANK_MARKERS: [&str; 6] = ["subsp.", "ssp.", "var.", "f.", "subsp", "ssp"];
const AUTHOR_PARTICLES: [&str; 11] = [
    "de", "da", "van", "von", "du", "le", "la", "der", "den", "di", "del",
];
const MAX_EPITHETS: usize = 2;

/// Scientific name → key text (see `SpeciesKey::from_scientific_name`)
///
/// Epithets are recognized by case before folding: an all-lowercase or
/// all-uppercase token is an epithet, a capitalized one ("Cresson") starts the
/// author citation.
pub fn normalize_scientific_name(name: &str) -> String {
    let tokens: Vec<&str> = name.split_whitespace().collect();

    let genus = match tokens.first() {
        Some(first) => clean_token(first),
        None => return String::new(),
    };

    if genus.is_empty() || !genus.chars().all(|c| c.is_alphabetic() || c == '-') {
        // Not a Linnaean name; fall back to a plain case fold
        return tokens.join(" ").to_lowercase();
    }

    let mut parts = vec![genus.to_lowercase()];

    for raw in &tokens[1..] {
        if parts.len() > MAX_EPITHETS {
            break;
        }

        // Subgenus: "Bombus (Thoracobombus) pascuorum"
        if raw.starts_with('(') && raw.ends_with(')') && parts.len() == 1 {
            continue;
        }

        if RANK_MARKERS.contains(&raw.to_lowercase().as_str()) {
            continue;
        }

        let token = clean_token(raw);
        let folded = token.to_lowercase();

        // "CRESSON, 1863": a shouted token followed by a comma is an author
        let shouted = is_uppercase_word(&token) && !raw.ends_with(',');
        let is_epithet =
            (is_lowercase_word(&token) || shouted) && !AUTHOR_PARTICLES.contains(&folded.as_str());

        if !is_epithet {
            // Author citation or year starts here
            break;
        }

        parts.push(folded);

        if raw.ends_with(',') {
            break;
        }
    }

    parts.join(" ")
}

fn is_lowercase_word(token: &str) -> bool {
    token.chars().next().map_or(false, char::is_lowercase)
        && token.chars().all(|c| c.is_lowercase() || c == '-')
}

/// At least two letters, none lowercase ("AFFINIS"; a lone "L" is Linnaeus)
fn is_uppercase_word(token: &str) -> bool {
    token.chars().filter(|c| c.is_alphabetic()).count() > 1
        && token.chars().next().map_or(false, char::is_uppercase)
        && token.chars().all(|c| c.is_uppercase() || c == '-')
}

fn clean_token(token: &str) -> String {
    token
        .trim_matches(|c: char| c == ',' || c == ';' || c == '"' || c == '\'')
        .to_string()
}

// ============================================================================
// SYNONYM TABLE
// ============================================================================

/// One row of an external synonym list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymEntry {
    pub synonym: String,
    pub accepted: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SynonymFile {
    Entries(Vec<SynonymEntry>),
    Map(BTreeMap<String, String>),
}

/// Outcome of looking a key up in the synonym table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynonymResolution {
    /// Not listed as a synonym: the key is its own accepted name
    Accepted(SpeciesKey),

    /// Listed synonym, resolved (through any chain) to one accepted key
    Synonym(SpeciesKey),

    /// Maps to several accepted keys, or the chain loops
    Ambiguous(Vec<SpeciesKey>),
}

/// Immutable alternate-name → accepted-name mapping, loaded once per run.
///
/// Build it with `insert`/`from_*`, then share it read-only (e.g. in an Arc).
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    entries: BTreeMap<SpeciesKey, BTreeSet<SpeciesKey>>,
}

impl SynonymTable {
    pub fn new() -> Self {
        SynonymTable {
            entries: BTreeMap::new(),
        }
    }

    /// Create table from (synonym, accepted) pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut table = SynonymTable::new();
        for (synonym, accepted) in pairs {
            table.insert(synonym, accepted);
        }
        table
    }

    /// Load from JSON: `[{"synonym": .., "accepted": ..}]` or `{"synonym": "accepted"}`
    pub fn from_json_str(content: &str) -> Result<Self, SynonymError> {
        let file: SynonymFile = serde_json::from_str(content)?;
        let mut table = SynonymTable::new();
        match file {
            SynonymFile::Entries(entries) => {
                for entry in entries {
                    table.insert(&entry.synonym, &entry.accepted);
                }
            }
            SynonymFile::Map(map) => {
                for (synonym, accepted) in map {
                    table.insert(&synonym, &accepted);
                }
            }
        }
        Ok(table)
    }

    /// Load from CSV with a `synonym,accepted` header row
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, SynonymError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = SynonymTable::new();
        for result in rdr.deserialize() {
            let entry: SynonymEntry = result?;
            table.insert(&entry.synonym, &entry.accepted);
        }
        Ok(table)
    }

    /// Load from a `.json` or `.csv` file (anything else is read as JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SynonymError> {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));

        if is_csv {
            let file = fs::File::open(path)?;
            SynonymTable::from_csv_reader(file)
        } else {
            let content = fs::read_to_string(path)?;
            SynonymTable::from_json_str(&content)
        }
    }

    /// Add a synonym → accepted link. Self-links and blank names are ignored.
    pub fn insert(&mut self, synonym: &str, accepted: &str) {
        let synonym = SpeciesKey::from_scientific_name(synonym);
        let accepted = SpeciesKey::from_scientific_name(accepted);

        if synonym.is_empty() || accepted.is_empty() || synonym == accepted {
            return;
        }

        self.entries.entry(synonym).or_default().insert(accepted);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_synonym(&self, key: &SpeciesKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Resolve a key to its accepted name, following chains (A → B → C).
    pub fn resolve(&self, key: &SpeciesKey) -> SynonymResolution {
        let mut current = key.clone();
        let mut visited: BTreeSet<SpeciesKey> = BTreeSet::new();

        loop {
            let targets = match self.entries.get(&current) {
                Some(targets) => targets,
                None if &current == key => return SynonymResolution::Accepted(current),
                None => return SynonymResolution::Synonym(current),
            };

            if targets.len() > 1 {
                return SynonymResolution::Ambiguous(targets.iter().cloned().collect());
            }

            visited.insert(current.clone());

            // Non-empty by construction
            let next = match targets.iter().next() {
                Some(next) => next.clone(),
                None => return SynonymResolution::Accepted(key.clone()),
            };

            if visited.contains(&next) {
                return SynonymResolution::Ambiguous(visited.into_iter().collect());
            }

            current = next;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
