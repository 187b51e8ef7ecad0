//! Seasonal themes and prompt building
//!
//! The theme table maps each month to candidate motifs. The prompt builder
//! combines one motif with the base style text loaded from disk.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::Datelike;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Calendar month, keyed by its lowercase English name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    pub const ALL: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];

    /// Lowercase name, as used in the theme file and directory names
    pub fn name(&self) -> &'static str {
        match self {
            Month::January => "january",
            Month::February => "february",
            Month::March => "march",
            Month::April => "april",
            Month::May => "may",
            Month::June => "june",
            Month::July => "july",
            Month::August => "august",
            Month::September => "september",
            Month::October => "october",
            Month::November => "november",
            Month::December => "december",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Month> {
        let s = s.trim().to_lowercase();
        Month::ALL.into_iter().find(|m| m.name() == s)
    }

    /// Month number, 1-12
    pub fn number(&self) -> u32 {
        *self as u32 + 1
    }

    pub fn from_number(n: u32) -> Option<Month> {
        n.checked_sub(1)
            .and_then(|i| Month::ALL.get(i as usize).copied())
    }

    /// Current month by the local clock
    pub fn current() -> Month {
        let n = chrono::Local::now().month();
        Month::from_number(n).unwrap_or(Month::January)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Month -> candidate theme phrases. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct ThemeTable {
    themes: HashMap<Month, Vec<String>>,
}

impl ThemeTable {
    /// Build from raw month-name keys, requiring all twelve months with
    /// non-empty phrase lists.
    pub fn from_map(raw: HashMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut themes = HashMap::new();
        for (key, phrases) in raw {
            let month = Month::parse(&key).ok_or_else(|| ConfigError::UnknownMonth(key.clone()))?;
            let phrases: Vec<String> = phrases
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if phrases.is_empty() {
                return Err(ConfigError::EmptyThemes(month.name().to_string()));
            }
            themes.insert(month, phrases);
        }

        if let Some(missing) = Month::ALL.iter().find(|m| !themes.contains_key(m)) {
            return Err(ConfigError::MissingMonth(missing.name().to_string()));
        }

        Ok(Self { themes })
    }

    /// Parse the JSON theme file format: `{"january": ["...", ...], ...}`
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, Vec<String>> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse {
                path: "seasonal themes".to_string(),
                message: e.to_string(),
            })?;
        Self::from_map(raw)
    }

    /// Load and validate a theme file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Phrases for a month
    pub fn phrases(&self, month: Month) -> Option<&[String]> {
        self.themes.get(&month).map(Vec::as_slice)
    }

    /// Serialize back to the file format, months in calendar order
    pub fn to_json(&self) -> String {
        let mut out = serde_json::Map::new();
        for month in Month::ALL {
            if let Some(phrases) = self.themes.get(&month) {
                out.insert(month.name().to_string(), serde_json::json!(phrases));
            }
        }
        serde_json::to_string_pretty(&serde_json::Value::Object(out)).unwrap_or_default()
    }

    /// Built-in seasonal motifs, written out by `--setup`
    pub fn builtin() -> Self {
        let entries: [(Month, &[&str]); 12] = [
            (
                Month::January,
                &[
                    "a snow-covered pine forest at dawn",
                    "a frozen lake under a pale winter sky",
                    "a quiet mountain cabin in fresh snow",
                ],
            ),
            (
                Month::February,
                &[
                    "frost on red winter berries",
                    "a misty valley in late winter light",
                    "a cozy window with candles and falling snow",
                ],
            ),
            (
                Month::March,
                &[
                    "the first crocuses breaking through thawing ground",
                    "a windswept coastal meadow in early spring",
                    "budding cherry branches against a soft blue sky",
                ],
            ),
            (
                Month::April,
                &[
                    "a field of tulips after spring rain",
                    "an orchard in full blossom",
                    "a gentle stream through a green woodland",
                ],
            ),
            (
                Month::May,
                &[
                    "a wildflower meadow in golden afternoon light",
                    "lilacs beside an old stone wall",
                    "rolling green hills dotted with poppies",
                ],
            ),
            (
                Month::June,
                &[
                    "a lavender field at sunset",
                    "a calm sea with sailboats on the horizon",
                    "a lush summer garden with climbing roses",
                ],
            ),
            (
                Month::July,
                &[
                    "a sunlit beach with dunes and sea grass",
                    "sunflowers under a wide summer sky",
                    "a mountain lake on a bright summer morning",
                ],
            ),
            (
                Month::August,
                &[
                    "a golden wheat field at harvest",
                    "a lighthouse on a warm late-summer evening",
                    "a shaded forest path in midsummer",
                ],
            ),
            (
                Month::September,
                &[
                    "an apple orchard in early autumn",
                    "a vineyard at harvest time",
                    "a misty river at the turn of the season",
                ],
            ),
            (
                Month::October,
                &[
                    "a forest ablaze with autumn colors",
                    "pumpkins on a rustic farmhouse porch",
                    "a winding country road under falling leaves",
                ],
            ),
            (
                Month::November,
                &[
                    "bare trees in soft November fog",
                    "a quiet harbor under a grey autumn sky",
                    "a still pond with fallen leaves",
                ],
            ),
            (
                Month::December,
                &[
                    "a snowy village lit for the holidays",
                    "an evergreen wreath on a wooden door",
                    "a starry winter night over snowy hills",
                ],
            ),
        ];

        let themes = entries
            .into_iter()
            .map(|(month, phrases)| (month, phrases.iter().map(|p| p.to_string()).collect()))
            .collect();
        Self { themes }
    }
}

/// How a phrase is chosen when a month has several
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Shuffle-bag: no phrase repeats until all have been used
    #[default]
    Random,
    /// k-th call for a month uses phrase k mod len
    Rotation,
}

/// Builds prompts from the theme table and base style text
#[derive(Debug)]
pub struct PromptBuilder {
    table: ThemeTable,
    base: String,
    policy: SelectionPolicy,
    rng: StdRng,
    /// Remaining shuffled indices per month (Random policy)
    bags: HashMap<Month, Vec<usize>>,
    /// Calls served per month (Rotation policy)
    counters: HashMap<Month, usize>,
}

impl PromptBuilder {
    /// Create a new prompt builder. Fails if the base text is blank.
    pub fn new(
        table: ThemeTable,
        base: &str,
        policy: SelectionPolicy,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(table, base, policy, StdRng::from_rng(&mut rand::rng()))
    }

    /// Same as [`PromptBuilder::new`] with a fixed seed
    pub fn with_seed(
        table: ThemeTable,
        base: &str,
        policy: SelectionPolicy,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_rng(table, base, policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        table: ThemeTable,
        base: &str,
        policy: SelectionPolicy,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        let base = base.trim();
        if base.is_empty() {
            return Err(ConfigError::EmptyBasePrompt);
        }
        Ok(Self {
            table,
            base: base.to_string(),
            policy,
            rng,
            bags: HashMap::new(),
            counters: HashMap::new(),
        })
    }

    /// Build one prompt for the named month
    pub fn build(&mut self, month: &str) -> Result<String, ConfigError> {
        let month =
            Month::parse(month).ok_or_else(|| ConfigError::UnknownMonth(month.to_string()))?;
        self.build_for(month)
    }

    /// Build one prompt for a month
    pub fn build_for(&mut self, month: Month) -> Result<String, ConfigError> {
        let theme = self.pick(month)?;
        debug!(%month, theme = %theme, "selected theme");
        Ok(format!(
            "Generate a beautiful wall art painting of {}. {}",
            theme, self.base
        ))
    }

    /// Build `count` prompts for a month
    pub fn build_many(&mut self, month: Month, count: usize) -> Result<Vec<String>, ConfigError> {
        (0..count).map(|_| self.build_for(month)).collect()
    }

    /// Fail as [`PromptBuilder::build_for`] would, without using up a selection
    pub fn check(&self, month: Month) -> Result<(), ConfigError> {
        self.phrases_for(month).map(|_| ())
    }

    fn phrases_for(&self, month: Month) -> Result<&[String], ConfigError> {
        self.table
            .phrases(month)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingMonth(month.name().to_string()))
    }

    fn pick(&mut self, month: Month) -> Result<String, ConfigError> {
        let len = self.phrases_for(month)?.len();

        let index = match self.policy {
            SelectionPolicy::Rotation => {
                let counter = self.counters.entry(month).or_insert(0);
                let index = *counter % len;
                *counter += 1;
                index
            }
            SelectionPolicy::Random => {
                let bag = self.bags.entry(month).or_default();
                if bag.is_empty() {
                    bag.extend(0..len);
                    bag.shuffle(&mut self.rng);
                }
                bag.pop().unwrap_or(0)
            }
        };

        Ok(self.phrases_for(month)?[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const BASE: &str = "Oil painting, soft natural light, museum quality";

    fn builder(policy: SelectionPolicy) -> PromptBuilder {
        PromptBuilder::with_seed(ThemeTable::builtin(), BASE, policy, 7).unwrap()
    }

    #[test]
    fn test_month_parsing() {
        assert_eq!(Month::parse("january"), Some(Month::January));
        assert_eq!(Month::parse(" DECEMBER "), Some(Month::December));
        assert_eq!(Month::parse("smarch"), None);
        assert_eq!(Month::from_number(10), Some(Month::October));
        assert_eq!(Month::from_number(0), None);
        assert_eq!(Month::from_number(13), None);
        assert_eq!(Month::June.number(), 6);
    }

    #[test]
    fn test_every_month_yields_prompt_with_base() {
        let mut builder = builder(SelectionPolicy::Random);
        for month in Month::ALL {
            let prompt = builder.build(month.name()).unwrap();
            assert!(!prompt.is_empty());
            assert!(prompt.contains(BASE));
        }
    }

    #[test]
    fn test_unknown_month_is_config_error() {
        let mut builder = builder(SelectionPolicy::Random);
        let err = builder.build("smarch").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMonth(_)));
    }

    #[test]
    fn test_empty_base_rejected() {
        let err = PromptBuilder::new(ThemeTable::builtin(), "   ", SelectionPolicy::Random)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyBasePrompt));
    }

    #[test]
    fn test_rotation_is_deterministic() {
        let mut builder = builder(SelectionPolicy::Rotation);
        let phrases = ThemeTable::builtin()
            .phrases(Month::March)
            .unwrap()
            .to_vec();

        for round in 0..2 {
            for phrase in &phrases {
                let prompt = builder.build_for(Month::March).unwrap();
                assert!(prompt.contains(phrase.as_str()), "round {}", round);
            }
        }
    }

    #[test]
    fn test_random_covers_all_phrases_before_repeat() {
        let mut builder = builder(SelectionPolicy::Random);
        let phrases = ThemeTable::builtin()
            .phrases(Month::October)
            .unwrap()
            .to_vec();

        let prompts = builder.build_many(Month::October, phrases.len()).unwrap();
        let used: HashSet<&String> = phrases
            .iter()
            .filter(|p| prompts.iter().any(|prompt| prompt.contains(p.as_str())))
            .collect();
        assert_eq!(used.len(), phrases.len());
    }

    #[test]
    fn test_table_requires_all_months() {
        let mut raw = HashMap::new();
        raw.insert("january".to_string(), vec!["snow".to_string()]);
        let err = ThemeTable::from_map(raw).unwrap_err();
        assert!(matches!(err, ConfigError::MissingMonth(_)));
    }

    #[test]
    fn test_table_rejects_empty_list() {
        let mut raw: HashMap<String, Vec<String>> = Month::ALL
            .iter()
            .map(|m| (m.name().to_string(), vec!["motif".to_string()]))
            .collect();
        raw.insert("may".to_string(), vec!["  ".to_string()]);
        let err = ThemeTable::from_map(raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyThemes(m) if m == "may"));
    }

    #[test]
    fn test_table_rejects_unknown_key() {
        let mut raw: HashMap<String, Vec<String>> = Month::ALL
            .iter()
            .map(|m| (m.name().to_string(), vec!["motif".to_string()]))
            .collect();
        raw.insert("smarch".to_string(), vec!["motif".to_string()]);
        assert!(matches!(
            ThemeTable::from_map(raw),
            Err(ConfigError::UnknownMonth(_))
        ));
    }

    #[test]
    fn test_builtin_json_roundtrips_through_validation() {
        let json = ThemeTable::builtin().to_json();
        let table = ThemeTable::from_json(&json).unwrap();
        for month in Month::ALL {
            assert!(!table.phrases(month).unwrap().is_empty());
        }
    }

    #[test]
    fn test_selection_policy_names() {
        let parse = |s: &str| serde_json::from_str::<SelectionPolicy>(s);
        assert_eq!(parse(r#""random""#).unwrap(), SelectionPolicy::Random);
        assert_eq!(parse(r#""rotation""#).unwrap(), SelectionPolicy::Rotation);
        assert!(parse(r#""sequential""#).is_err());
    }
}
