//! Search predicates over taxon name usages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How several free-text terms combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextCombine {
    /// A usage matches if any term matches
    #[default]
    Any,
    /// A usage matches only if every term matches
    All,
}

/// Primary ranks of the taxon name epithet index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrimaryRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl PrimaryRank {
    pub const ALL: [PrimaryRank; 7] = [
        PrimaryRank::Kingdom,
        PrimaryRank::Phylum,
        PrimaryRank::Class,
        PrimaryRank::Order,
        PrimaryRank::Family,
        PrimaryRank::Genus,
        PrimaryRank::Species,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimaryRank::Kingdom => "kingdom",
            PrimaryRank::Phylum => "phylum",
            PrimaryRank::Class => "class",
            PrimaryRank::Order => "order",
            PrimaryRank::Family => "family",
            PrimaryRank::Genus => "genus",
            PrimaryRank::Species => "species",
        }
    }

    /// Column of the taxon name index holding this rank's epithet
    pub fn column(self) -> String {
        format!("tx_{}", self.name())
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|r| r.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for PrimaryRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Predicates of a usage search. Unset or blank predicates do not constrain
/// the search; a query with no predicate at all is rejected by the composer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageQuery {
    /// Substrings matched against the usage and all referenced pool contents
    #[serde(default)]
    pub full_text: Vec<String>,

    #[serde(default)]
    pub text_combine: TextCombine,

    /// Substring of the verbatim name string
    pub name_string: Option<String>,

    /// Substring of the qualified taxon name
    pub taxon_name: Option<String>,

    /// Epithet substrings per primary rank
    #[serde(default)]
    pub epithets: BTreeMap<PrimaryRank, String>,

    /// Rank of the qualified taxon name
    pub rank: Option<String>,

    /// Substring of the bibliographic reference
    pub bib_ref: Option<String>,

    pub author: Option<String>,

    /// Publication year, matched as a prefix of the reference date
    pub year: Option<String>,

    pub page_number: Option<u32>,

    /// Usage type or sub type, as code or name
    pub usage_type: Option<String>,

    /// Contributor name, matched against creating and updating user
    pub user: Option<String>,

    #[serde(default)]
    pub self_canonical_only: bool,

    pub limit: Option<usize>,
}

impl UsageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, term: impl Into<String>) -> Self {
        self.full_text.push(term.into());
        self
    }

    pub fn combine(mut self, combine: TextCombine) -> Self {
        self.text_combine = combine;
        self
    }

    pub fn name_string(mut self, value: impl Into<String>) -> Self {
        self.name_string = Some(value.into());
        self
    }

    pub fn taxon_name(mut self, value: impl Into<String>) -> Self {
        self.taxon_name = Some(value.into());
        self
    }

    pub fn epithet(mut self, rank: PrimaryRank, value: impl Into<String>) -> Self {
        self.epithets.insert(rank, value.into());
        self
    }

    pub fn rank(mut self, value: impl Into<String>) -> Self {
        self.rank = Some(value.into());
        self
    }

    pub fn bib_ref(mut self, value: impl Into<String>) -> Self {
        self.bib_ref = Some(value.into());
        self
    }

    pub fn author(mut self, value: impl Into<String>) -> Self {
        self.author = Some(value.into());
        self
    }

    pub fn year(mut self, value: impl Into<String>) -> Self {
        self.year = Some(value.into());
        self
    }

    pub fn page_number(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn usage_type(mut self, alias: impl Into<String>) -> Self {
        self.usage_type = Some(alias.into());
        self
    }

    pub fn user(mut self, value: impl Into<String>) -> Self {
        self.user = Some(value.into());
        self
    }

    pub fn self_canonical_only(mut self) -> Self {
        self.self_canonical_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Free-text terms that are not blank
    pub fn text_terms(&self) -> Vec<&str> {
        self.full_text
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Epithet predicates that are not blank, top rank first
    pub fn epithet_terms(&self) -> Vec<(PrimaryRank, &str)> {
        self.epithets
            .iter()
            .map(|(rank, value)| (*rank, value.trim()))
            .filter(|(_, value)| !value.is_empty())
            .collect()
    }
}

/// A predicate string that is set and not blank
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
