//! Usage type classification
//!
//! Closed enumerations for taxon name usage types and sub types. Every variant
//! has a two-letter code and a canonical name, and lookups accept either one
//! case-insensitively. The alias tables are built once and checked by
//! [`validate_tables`] when a bank starts up.

use crate::error::{Result, TnuError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Minimum Jaro-Winkler similarity for an alias suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Shared behaviour of the two classification enums
pub trait Classification: Copy + Eq + Hash + fmt::Debug + Sized + 'static {
    /// Human-readable name of the classification, used in errors
    const KIND: &'static str;

    fn variants() -> &'static [Self];

    /// Two-letter code, as used in composite identifiers and index columns
    fn code(self) -> &'static str;

    /// Canonical (long) name
    fn name(self) -> &'static str;

    fn aliases() -> &'static HashMap<String, Self>;

    /// Resolve a code or canonical name, ignoring case
    fn from_alias(alias: &str) -> Result<Self> {
        let key = alias.trim().to_lowercase();
        Self::aliases().get(&key).copied().ok_or_else(|| TnuError::InvalidAlias {
            kind: Self::KIND,
            alias: alias.to_string(),
            suggestion: closest_alias(&key, Self::aliases().keys()),
        })
    }
}

/// Type of a taxon name usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UsageType {
    Generic,
    Nomenclature,
    Other,
}

/// Sub type of a nomenclature usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UsageSubType {
    NameString,
    OriginalDescription,
    Redescription,
    DataDescription,
    CompiledDescription,
    Citation,
    KeyRoot,
    SeniorSynonymization,
    JuniorSynonymization,
    NewCombination,
}

lazy_static::lazy_static! {
    static ref USAGE_TYPE_ALIASES: HashMap<String, UsageType> = alias_table();
    static ref USAGE_SUB_TYPE_ALIASES: HashMap<String, UsageSubType> = alias_table();
}

impl Classification for UsageType {
    const KIND: &'static str = "usage type";

    fn variants() -> &'static [Self] {
        &[UsageType::Generic, UsageType::Nomenclature, UsageType::Other]
    }

    fn code(self) -> &'static str {
        match self {
            UsageType::Generic => "GU",
            UsageType::Nomenclature => "NU",
            UsageType::Other => "OU",
        }
    }

    fn name(self) -> &'static str {
        match self {
            UsageType::Generic => "generic usage",
            UsageType::Nomenclature => "nomenclature usage",
            UsageType::Other => "other usage",
        }
    }

    fn aliases() -> &'static HashMap<String, Self> {
        &USAGE_TYPE_ALIASES
    }
}

impl Classification for UsageSubType {
    const KIND: &'static str = "usage sub type";

    fn variants() -> &'static [Self] {
        &[
            UsageSubType::NameString,
            UsageSubType::OriginalDescription,
            UsageSubType::Redescription,
            UsageSubType::DataDescription,
            UsageSubType::CompiledDescription,
            UsageSubType::Citation,
            UsageSubType::KeyRoot,
            UsageSubType::SeniorSynonymization,
            UsageSubType::JuniorSynonymization,
            UsageSubType::NewCombination,
        ]
    }

    fn code(self) -> &'static str {
        match self {
            UsageSubType::NameString => "NS",
            UsageSubType::OriginalDescription => "OD",
            UsageSubType::Redescription => "RD",
            UsageSubType::DataDescription => "DD",
            UsageSubType::CompiledDescription => "CD",
            UsageSubType::Citation => "CI",
            UsageSubType::KeyRoot => "KR",
            UsageSubType::SeniorSynonymization => "SS",
            UsageSubType::JuniorSynonymization => "JS",
            UsageSubType::NewCombination => "NC",
        }
    }

    fn name(self) -> &'static str {
        match self {
            UsageSubType::NameString => "name string",
            UsageSubType::OriginalDescription => "original description",
            UsageSubType::Redescription => "redescription",
            UsageSubType::DataDescription => "data description",
            UsageSubType::CompiledDescription => "compiled description",
            UsageSubType::Citation => "citation",
            UsageSubType::KeyRoot => "key root",
            UsageSubType::SeniorSynonymization => "senior synonymization",
            UsageSubType::JuniorSynonymization => "junior synonymization",
            UsageSubType::NewCombination => "new combination",
        }
    }

    fn aliases() -> &'static HashMap<String, Self> {
        &USAGE_SUB_TYPE_ALIASES
    }
}

fn alias_table<C: Classification>() -> HashMap<String, C> {
    let mut table = HashMap::new();
    for &variant in C::variants() {
        table.insert(variant.code().to_lowercase(), variant);
        table.insert(variant.name().to_lowercase(), variant);
    }
    table
}

fn closest_alias<'a>(key: &str, candidates: impl Iterator<Item = &'a String>) -> Option<String> {
    candidates
        .map(|c| (strsim::jaro_winkler(key, c), c))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(a.1)))
        .map(|(_, c)| c.clone())
}

/// Either a usage type or a usage sub type, as accepted by the search filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageClass {
    Type(UsageType),
    SubType(UsageSubType),
}

impl UsageClass {
    /// Resolve an alias against the type table first, then the sub type table
    pub fn resolve(alias: &str) -> Result<Self> {
        if let Ok(t) = UsageType::from_alias(alias) {
            return Ok(UsageClass::Type(t));
        }
        match UsageSubType::from_alias(alias) {
            Ok(s) => Ok(UsageClass::SubType(s)),
            Err(_) => {
                let key = alias.trim().to_lowercase();
                let all = UsageType::aliases().keys().chain(UsageSubType::aliases().keys());
                Err(TnuError::InvalidAlias {
                    kind: "usage type or sub type",
                    alias: alias.to_string(),
                    suggestion: closest_alias(&key, all),
                })
            }
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            UsageClass::Type(t) => t.code(),
            UsageClass::SubType(s) => s.code(),
        }
    }
}

/// Check the classification tables: two-letter upper-case codes, no alias
/// shared between variants, and type codes disjoint from sub type codes.
pub fn validate_tables() -> Result<()> {
    check_table::<UsageType>()?;
    check_table::<UsageSubType>()?;

    for t in UsageType::variants() {
        if UsageSubType::aliases().contains_key(&t.code().to_lowercase()) {
            return Err(TnuError::ValidationFailed(format!(
                "usage type code '{}' is also a usage sub type alias",
                t.code()
            )));
        }
    }
    Ok(())
}

fn check_table<C: Classification>() -> Result<()> {
    let variants = C::variants();
    for &variant in variants {
        let code = variant.code();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(TnuError::ValidationFailed(format!(
                "{} code '{}' is not two upper-case letters",
                C::KIND,
                code
            )));
        }
        if variant.name().trim().is_empty() {
            return Err(TnuError::ValidationFailed(format!(
                "{} {:?} has no canonical name",
                C::KIND,
                variant
            )));
        }
        for alias in [code, variant.name()] {
            if C::from_alias(alias)? != variant {
                return Err(TnuError::ValidationFailed(format!(
                    "{} alias '{}' does not map back to {:?}",
                    C::KIND,
                    alias,
                    variant
                )));
            }
        }
    }
    // one code and one name per variant, none shared
    if C::aliases().len() != variants.len() * 2 {
        return Err(TnuError::ValidationFailed(format!(
            "{} table has colliding aliases",
            C::KIND
        )));
    }
    Ok(())
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for UsageSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for UsageType {
    type Err = TnuError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_alias(s)
    }
}

impl FromStr for UsageSubType {
    type Err = TnuError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_alias(s)
    }
}
