//! Composite usage identifier codec
//!
//! A taxon name usage is identified by the string
//!
//! ```text
//! nameId['(' qualifiedNameId ')'] '-' typeCode ['/' subTypeCode] '@' refId ':' pageNumber
//! ```
//!
//! where all ids are 32 hex characters. Decoding checks the string against
//! the two accepted shapes first and then extracts the fields left to right.

use crate::error::{Result, TnuError};
use crate::usage_type::{Classification, UsageSubType, UsageType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Length of every pool identifier
pub const ID_LENGTH: usize = 32;

/// Highest page number the encoding can carry (five digits)
pub const MAX_PAGE_NUMBER: u32 = 99_999;

const HEX_ID: &str = "[0-9a-fA-F]{32}";
const PAGE: &str = "[1-9][0-9]{0,4}";

lazy_static::lazy_static! {
    /// Any type code; a qualified name may be followed by a nomenclature sub type
    static ref GENERAL_PATTERN: Regex = {
        let types = UsageType::variants().iter().map(|t| t.code()).collect::<Vec<_>>().join("|");
        let sub_types = UsageSubType::variants()
            .iter()
            .filter(|s| **s != UsageSubType::NameString)
            .map(|s| s.code())
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"^{id}(?:\({id}\)-(?:{types})(?:/(?:{sub_types}))?|-(?:{types}))@{id}:{page}$",
            id = HEX_ID,
            types = types,
            sub_types = sub_types,
            page = PAGE,
        );
        Regex::new(&pattern).expect("general usage pattern is valid")
    };

    /// Name string usages: no qualified name, nomenclature type, optional NS marker
    static ref NAME_STRING_PATTERN: Regex = {
        let pattern = format!(
            r"^{id}-{nu}(?:/{ns})?@{id}:{page}$",
            id = HEX_ID,
            nu = UsageType::Nomenclature.code(),
            ns = UsageSubType::NameString.code(),
            page = PAGE,
        );
        Regex::new(&pattern).expect("name string usage pattern is valid")
    };
}

/// Check whether a string has the shape of a composite usage identifier
pub fn is_valid(encoded: &str) -> bool {
    GENERAL_PATTERN.is_match(encoded) || NAME_STRING_PATTERN.is_match(encoded)
}

/// Check that a token is a 32 character hex identifier
pub fn is_hex_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.chars().all(|c| c.is_ascii_hexdigit())
}

/// Identifier of a taxon name usage, referencing the three pools
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompositeUsageId {
    name_id: String,
    qualified_name_id: Option<String>,
    usage_type: UsageType,
    usage_sub_type: Option<UsageSubType>,
    ref_id: String,
    page_number: u32,
}

impl CompositeUsageId {
    /// Build a usage identifier, normalizing ids to upper case. Sub types
    /// follow [`check_classification`].
    pub fn new(
        name_id: &str,
        qualified_name_id: Option<&str>,
        usage_type: UsageType,
        usage_sub_type: Option<UsageSubType>,
        ref_id: &str,
        page_number: u32,
    ) -> Result<Self> {
        let name_id = checked_id("name string", name_id)?;
        let qualified_name_id = qualified_name_id
            .map(|id| checked_id("taxon name", id))
            .transpose()?;
        let ref_id = checked_id("bibliographic reference", ref_id)?;

        if page_number < 1 || page_number > MAX_PAGE_NUMBER {
            return Err(TnuError::ValidationFailed(format!(
                "'{}' is not a valid page number",
                page_number
            )));
        }

        let usage_sub_type =
            check_classification(usage_type, usage_sub_type, qualified_name_id.is_some())?;

        Ok(Self {
            name_id,
            qualified_name_id,
            usage_type,
            usage_sub_type,
            ref_id,
            page_number,
        })
    }

    /// Build from type and sub type aliases, as supplied by callers
    pub fn from_aliases(
        name_id: &str,
        qualified_name_id: Option<&str>,
        usage_type: &str,
        usage_sub_type: Option<&str>,
        ref_id: &str,
        page_number: u32,
    ) -> Result<Self> {
        let usage_type = UsageType::from_alias(usage_type)?;
        let usage_sub_type = usage_sub_type.map(UsageSubType::from_alias).transpose()?;
        Self::new(name_id, qualified_name_id, usage_type, usage_sub_type, ref_id, page_number)
    }

    pub fn name_id(&self) -> &str {
        &self.name_id
    }

    pub fn qualified_name_id(&self) -> Option<&str> {
        self.qualified_name_id.as_deref()
    }

    pub fn usage_type(&self) -> UsageType {
        self.usage_type
    }

    pub fn usage_sub_type(&self) -> Option<UsageSubType> {
        self.usage_sub_type
    }

    pub fn ref_id(&self) -> &str {
        &self.ref_id
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    /// Render the compact textual form
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(ID_LENGTH * 3 + 16);
        out.push_str(&self.name_id);
        if let Some(q) = &self.qualified_name_id {
            out.push('(');
            out.push_str(q);
            out.push(')');
        }
        out.push('-');
        out.push_str(self.usage_type.code());
        if let Some(s) = self.usage_sub_type {
            out.push('/');
            out.push_str(s.code());
        }
        out.push('@');
        out.push_str(&self.ref_id);
        out.push(':');
        out.push_str(&self.page_number.to_string());
        out
    }

    /// Parse the compact textual form
    pub fn decode(encoded: &str) -> Result<Self> {
        if !is_valid(encoded) {
            return Err(invalid(encoded, "does not match the usage identifier grammar"));
        }

        let mut rest = encoded;

        let name_end = rest
            .find(|c: char| c == '(' || c == '-')
            .ok_or_else(|| invalid(encoded, "missing '-' after name string id"))?;
        let name_id = &rest[..name_end];
        rest = &rest[name_end..];

        let qualified_name_id = match rest.strip_prefix('(') {
            Some(inner) => {
                let end = inner
                    .find(")-")
                    .ok_or_else(|| invalid(encoded, "missing ')-' after taxon name id"))?;
                rest = &inner[end + 2..];
                Some(&inner[..end])
            }
            None => {
                rest = &rest[1..];
                None
            }
        };

        let at = rest
            .find('@')
            .ok_or_else(|| invalid(encoded, "missing '@' before reference id"))?;
        let classification = &rest[..at];
        rest = &rest[at + 1..];
        let (type_code, sub_type_code) = match classification.split_once('/') {
            Some((t, s)) => (t, Some(s)),
            None => (classification, None),
        };

        let colon = rest
            .find(':')
            .ok_or_else(|| invalid(encoded, "missing ':' before page number"))?;
        let ref_id = &rest[..colon];
        let page_number: u32 = rest[colon + 1..]
            .parse()
            .map_err(|_| invalid(encoded, "page number is not a positive integer"))?;

        Self::from_aliases(name_id, qualified_name_id, type_code, sub_type_code, ref_id, page_number)
            .map_err(|e| invalid(encoded, &e.to_string()))
    }

    /// Structured payload of this usage; every value occurs in the encoded form
    pub fn to_structured(&self) -> Value {
        let mut payload = json!({
            "scientificNameID": self.name_id,
            "nameUsageType": self.usage_type.code(),
            "bibRefId": self.ref_id,
            "pageNumber": self.page_number.to_string(),
        });
        if let Some(q) = &self.qualified_name_id {
            payload["taxonID"] = json!(q);
        }
        if let Some(s) = self.usage_sub_type {
            payload["nameUsageSubType"] = json!(s.code());
        }
        payload
    }

    /// Rebuild a usage from its structured payload
    pub fn from_structured(payload: &Value) -> Result<Self> {
        let field = |key: &str| payload.get(key).and_then(Value::as_str);
        let required = |key: &str| {
            field(key).ok_or_else(|| {
                TnuError::ValidationFailed(format!("structured usage lacks '{}'", key))
            })
        };
        let page_number = match payload.get("pageNumber") {
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| TnuError::ValidationFailed("structured usage lacks a valid 'pageNumber'".to_string()))?;

        Self::from_aliases(
            required("scientificNameID")?,
            field("taxonID"),
            required("nameUsageType")?,
            field("nameUsageSubType"),
            required("bibRefId")?,
            page_number,
        )
    }
}

/// Apply the sub type rules to a classification, returning the sub type the
/// usage will carry:
/// - only nomenclature usages carry a sub type
/// - without a qualified name, any given sub type becomes "name string"
/// - with a qualified name, "name string" is not a valid sub type
pub fn check_classification(
    usage_type: UsageType,
    usage_sub_type: Option<UsageSubType>,
    has_qualified_name: bool,
) -> Result<Option<UsageSubType>> {
    match (usage_type, has_qualified_name, usage_sub_type) {
        (_, _, None) => Ok(None),
        (UsageType::Nomenclature, false, Some(_)) => Ok(Some(UsageSubType::NameString)),
        (UsageType::Nomenclature, true, Some(UsageSubType::NameString)) => Err(TnuError::ValidationFailed(
            "'name string' sub type is reserved for usages without a taxon name".to_string(),
        )),
        (UsageType::Nomenclature, true, Some(sub_type)) => Ok(Some(sub_type)),
        (other, _, Some(sub_type)) => Err(TnuError::ValidationFailed(format!(
            "sub type '{}' is only valid for {}, not {}",
            sub_type,
            UsageType::Nomenclature,
            other
        ))),
    }
}

fn checked_id(label: &str, id: &str) -> Result<String> {
    if is_hex_id(id) {
        Ok(id.to_ascii_uppercase())
    } else {
        Err(TnuError::ValidationFailed(format!(
            "'{}' is not a valid {} id",
            id, label
        )))
    }
}

fn invalid(encoded: &str, reason: &str) -> TnuError {
    TnuError::InvalidEncoding(format!("'{}': {}", encoded, reason))
}

impl fmt::Display for CompositeUsageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl TryFrom<String> for CompositeUsageId {
    type Error = TnuError;

    fn try_from(encoded: String) -> Result<Self> {
        Self::decode(&encoded)
    }
}

impl From<CompositeUsageId> for String {
    fn from(usage: CompositeUsageId) -> Self {
        usage.encode()
    }
}

impl FromStr for CompositeUsageId {
    type Err = TnuError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(c: char) -> String {
        std::iter::repeat(c).take(ID_LENGTH).collect()
    }

    #[test]
    fn test_encode_full_usage() {
        let usage = CompositeUsageId::new(
            &run('A'),
            Some(&run('B')),
            UsageType::Nomenclature,
            Some(UsageSubType::OriginalDescription),
            &run('C'),
            94,
        )
        .unwrap();

        let encoded = usage.encode();
        assert_eq!(encoded, format!("{}({})-NU/OD@{}:94", run('A'), run('B'), run('C')));
        assert_eq!(CompositeUsageId::decode(&encoded).unwrap(), usage);
    }

    #[test]
    fn test_round_trip_without_taxon_name() {
        let usage = CompositeUsageId::new(&run('1'), None, UsageType::Generic, None, &run('2'), 1).unwrap();
        let encoded = usage.encode();
        assert_eq!(encoded, format!("{}-GU@{}:1", run('1'), run('2')));
        assert_eq!(encoded.parse::<CompositeUsageId>().unwrap(), usage);
    }

    #[test]
    fn test_round_trip_across_classifications() {
        let types = [UsageType::Generic, UsageType::Nomenclature, UsageType::Other];
        for usage_type in types {
            for qualified in [None, Some(run('d'))] {
                let usage = CompositeUsageId::new(
                    &run('e'),
                    qualified.as_deref(),
                    usage_type,
                    None,
                    &run('f'),
                    99_999,
                )
                .unwrap();
                assert_eq!(CompositeUsageId::decode(&usage.encode()).unwrap(), usage);
            }
        }
        for &sub_type in UsageSubType::variants() {
            if sub_type == UsageSubType::NameString {
                continue;
            }
            let usage = CompositeUsageId::new(
                &run('0'),
                Some(&run('9')),
                UsageType::Nomenclature,
                Some(sub_type),
                &run('8'),
                12,
            )
            .unwrap();
            assert_eq!(CompositeUsageId::decode(&usage.encode()).unwrap(), usage);
        }
    }

    #[test]
    fn test_ids_normalize_to_upper_case() {
        let encoded = format!("{}-NU@{}:7", run('a'), run('b'));
        let usage = CompositeUsageId::decode(&encoded).unwrap();
        assert_eq!(usage.name_id(), run('A'));
        assert_eq!(usage.encode(), format!("{}-NU@{}:7", run('A'), run('B')));
    }

    #[test]
    fn test_name_string_sub_type_normalization() {
        let usage = CompositeUsageId::new(
            &run('A'),
            None,
            UsageType::Nomenclature,
            Some(UsageSubType::OriginalDescription),
            &run('C'),
            3,
        )
        .unwrap();
        assert_eq!(usage.usage_sub_type(), Some(UsageSubType::NameString));

        let encoded = usage.encode();
        assert_eq!(encoded, format!("{}-NU/NS@{}:3", run('A'), run('C')));
        assert_eq!(CompositeUsageId::decode(&encoded).unwrap(), usage);
    }

    #[test]
    fn test_constructor_rejects_invalid_combinations() {
        assert!(CompositeUsageId::new(
            &run('A'),
            Some(&run('B')),
            UsageType::Generic,
            Some(UsageSubType::Citation),
            &run('C'),
            1
        )
        .is_err());
        assert!(CompositeUsageId::new(
            &run('A'),
            Some(&run('B')),
            UsageType::Nomenclature,
            Some(UsageSubType::NameString),
            &run('C'),
            1
        )
        .is_err());
        assert!(CompositeUsageId::new(&run('A'), None, UsageType::Generic, None, &run('C'), 0).is_err());
        assert!(CompositeUsageId::new(&run('A'), None, UsageType::Generic, None, &run('C'), 100_000).is_err());
        assert!(CompositeUsageId::new("ABC", None, UsageType::Generic, None, &run('C'), 1).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed_strings() {
        let a = run('A');
        let b = run('B');
        let c = run('C');
        let bad = vec![
            String::new(),
            format!("{}({})NU/OD@{}:94", a, b, c),
            format!("{}({})-NU/OD{}:94", a, b, c),
            format!("{}({})-NU/OD@{}94", a, b, c),
            format!("{}({}-NU/OD@{}:94", a, b, c),
            format!("{}({})-NU/OD@{}:0", a, b, c),
            format!("{}({})-NU/OD@{}:-4", a, b, c),
            format!("{}({})-NU/OD@{}:094", a, b, c),
            format!("{}({})-NU/OD@{}:100000", a, b, c),
            format!("{}({})-XX@{}:94", a, b, c),
            format!("{}({})-NU/XX@{}:94", a, b, c),
            format!("{}({})-GU/OD@{}:94", a, b, c),
            format!("{}({})-NU/NS@{}:94", a, b, c),
            format!("{}-NU/OD@{}:94", a, c),
            format!("{}-GU/NS@{}:94", a, c),
            format!("{}-NU@{}:94", &a[..31], c),
            format!("{}G-NU@{}:94", &a[..31], c),
            format!("{}-NU@{}:94 ", a, c),
        ];
        for s in bad {
            match CompositeUsageId::decode(&s) {
                Err(TnuError::InvalidEncoding(_)) => {}
                other => panic!("'{}' should fail with InvalidEncoding, got {:?}", s, other),
            }
        }
    }

    #[test]
    fn test_is_valid_shapes() {
        assert!(is_valid(&format!("{}-NU/NS@{}:5", run('A'), run('C'))));
        assert!(is_valid(&format!("{}({})-OU@{}:5", run('A'), run('B'), run('C'))));
        assert!(!is_valid(&format!("{}({})-OU@{}", run('A'), run('B'), run('C'))));
    }

    #[test]
    fn test_structured_payload_round_trip() {
        let usage = CompositeUsageId::new(
            &run('A'),
            Some(&run('B')),
            UsageType::Nomenclature,
            Some(UsageSubType::Redescription),
            &run('C'),
            42,
        )
        .unwrap();
        let payload = usage.to_structured();
        assert_eq!(payload["nameUsageSubType"], "RD");
        assert_eq!(payload["pageNumber"], "42");
        assert_eq!(CompositeUsageId::from_structured(&payload).unwrap(), usage);
    }

    #[test]
    fn test_from_structured_requires_fields() {
        let payload = json!({ "scientificNameID": run('A'), "nameUsageType": "GU", "pageNumber": 3 });
        assert!(matches!(
            CompositeUsageId::from_structured(&payload),
            Err(TnuError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_classification_rules() {
        assert_eq!(
            check_classification(UsageType::Nomenclature, Some(UsageSubType::Citation), false).unwrap(),
            Some(UsageSubType::NameString)
        );
        assert_eq!(
            check_classification(UsageType::Nomenclature, Some(UsageSubType::Citation), true).unwrap(),
            Some(UsageSubType::Citation)
        );
        assert_eq!(check_classification(UsageType::Other, None, true).unwrap(), None);
        assert!(matches!(
            check_classification(UsageType::Nomenclature, Some(UsageSubType::NameString), true),
            Err(TnuError::ValidationFailed(_))
        ));
        assert!(matches!(
            check_classification(UsageType::Generic, Some(UsageSubType::OriginalDescription), true),
            Err(TnuError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_serde_uses_encoded_form() {
        let encoded = format!("{}({})-NU/OD@{}:94", "A".repeat(32), "B".repeat(32), "C".repeat(32));
        let usage = CompositeUsageId::decode(&encoded).unwrap();

        let json = serde_json::to_string(&usage).unwrap();
        assert_eq!(json, format!("\"{}\"", encoded));
        let back: CompositeUsageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, usage);

        // values the constructor would reject do not deserialize either
        let page_zero = format!("\"{}-GU@{}:0\"", "A".repeat(32), "C".repeat(32));
        assert!(serde_json::from_str::<CompositeUsageId>(&page_zero).is_err());
        let sub_type_on_generic = format!("\"{}({})-GU/OD@{}:3\"", "A".repeat(32), "B".repeat(32), "C".repeat(32));
        assert!(serde_json::from_str::<CompositeUsageId>(&sub_type_on_generic).is_err());
        assert!(serde_json::from_str::<CompositeUsageId>(r#"{"name_id":"x"}"#).is_err());
    }
}
