//! Table layout of the four pools
//!
//! Every pool owns a data table `{prefix}_data` and an index table
//! `{prefix}_index`. Both stores create the same shapes from this module, and
//! the query composer renders its joins against the same names.

use crate::codec::CompositeUsageId;
use crate::error::{Result, TnuError};
use crate::query::PrimaryRank;
use crate::record::{id_hash, to_millis, PoolKind, PooledRecord};
use crate::usage_type::Classification;
use serde_json::Value;

/// Columns read back for every record, in row order
pub const DATA_COLUMNS: [&str; 12] = [
    "id",
    "canonical_id",
    "checksum",
    "content",
    "structured_content",
    "string_type",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "local_updated_at",
    "deleted",
];

/// Bound value of an insert or update statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int(Option<i64>),
}

impl SqlValue {
    pub fn text(s: impl Into<String>) -> Self {
        SqlValue::Text(Some(s.into()))
    }

    pub fn int(i: i64) -> Self {
        SqlValue::Int(Some(i))
    }
}

/// Placeholder style of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
        }
    }
}

/// Data and index table of one pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTables {
    pub kind: PoolKind,
    pub data: String,
    pub index: String,
}

impl PoolTables {
    pub fn new(kind: PoolKind, prefix: &str) -> Self {
        Self {
            kind,
            data: format!("{}_data", prefix),
            index: format!("{}_index", prefix),
        }
    }

    /// Column definitions of the index table, after `id` and `id_hash`
    fn index_columns(&self) -> Vec<(String, &'static str)> {
        match self.kind {
            PoolKind::NameString => Vec::new(),
            PoolKind::TaxonName => PrimaryRank::ALL
                .iter()
                .map(|r| (r.column(), "TEXT"))
                .collect(),
            PoolKind::Reference => vec![
                ("doc_author".to_string(), "TEXT"),
                ("doc_date".to_string(), "TEXT"),
            ],
            PoolKind::Usage => vec![
                ("name_string_id".to_string(), "VARCHAR(32) NOT NULL"),
                ("name_string_id_hash".to_string(), "BIGINT NOT NULL"),
                ("taxon_name_id".to_string(), "VARCHAR(32)"),
                ("taxon_name_id_hash".to_string(), "BIGINT"),
                ("usage_type".to_string(), "VARCHAR(2) NOT NULL"),
                ("usage_sub_type".to_string(), "VARCHAR(2)"),
                ("bib_ref_id".to_string(), "VARCHAR(32) NOT NULL"),
                ("bib_ref_id_hash".to_string(), "BIGINT NOT NULL"),
                ("page_number".to_string(), "BIGINT NOT NULL"),
            ],
        }
    }

    /// CREATE statements for both tables and their hash indexes
    pub fn ddl(&self) -> Vec<String> {
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id VARCHAR(32) PRIMARY KEY, \
             id_hash BIGINT NOT NULL, \
             canonical_id VARCHAR(32) NOT NULL DEFAULT '', \
             canonical_id_hash BIGINT NOT NULL DEFAULT 0, \
             checksum VARCHAR(64), \
             content TEXT NOT NULL, \
             structured_content TEXT, \
             string_type VARCHAR(64), \
             created_at BIGINT NOT NULL, \
             created_by VARCHAR(64) NOT NULL, \
             updated_at BIGINT NOT NULL, \
             updated_by VARCHAR(64) NOT NULL, \
             local_updated_at BIGINT NOT NULL, \
             deleted BIGINT NOT NULL DEFAULT 0)",
            self.data
        )];
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {0}_id_hash ON {0} (id_hash)",
            self.data
        ));

        let mut index_columns = vec![
            "id VARCHAR(32) PRIMARY KEY".to_string(),
            "id_hash BIGINT NOT NULL".to_string(),
        ];
        index_columns.extend(
            self.index_columns()
                .into_iter()
                .map(|(name, ty)| format!("{} {}", name, ty)),
        );
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.index,
            index_columns.join(", ")
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {0}_id_hash ON {0} (id_hash)",
            self.index
        ));
        if self.kind == PoolKind::Usage {
            for column in ["name_string_id_hash", "taxon_name_id_hash", "bib_ref_id_hash"] {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS {0}_{1} ON {0} ({1})",
                    self.index, column
                ));
            }
        }
        statements
    }

    pub fn select_by_id_sql(&self, dialect: Dialect) -> String {
        format!(
            "SELECT {} FROM {} WHERE id_hash = {} AND id = {}",
            DATA_COLUMNS.join(", "),
            self.data,
            dialect.placeholder(1),
            dialect.placeholder(2)
        )
    }

    pub fn insert_data_sql(&self, dialect: Dialect) -> String {
        insert_sql(&self.data, &data_insert_columns(), dialect)
    }

    pub fn insert_index_sql(&self, row: &IndexRow, dialect: Dialect) -> String {
        let columns: Vec<&str> = row.columns.iter().map(|(c, _)| c.as_str()).collect();
        insert_sql(&self.index, &columns, dialect)
    }

    pub fn update_data_sql(&self, dialect: Dialect) -> String {
        let p = |n| dialect.placeholder(n);
        format!(
            "UPDATE {} SET canonical_id = {}, canonical_id_hash = {}, updated_at = {}, \
             updated_by = {}, local_updated_at = {}, deleted = {} WHERE id_hash = {} AND id = {}",
            self.data,
            p(1),
            p(2),
            p(3),
            p(4),
            p(5),
            p(6),
            p(7),
            p(8)
        )
    }
}

fn data_insert_columns() -> Vec<&'static str> {
    let mut columns = vec!["id", "id_hash", "canonical_id_hash"];
    columns.extend(DATA_COLUMNS.iter().skip(1));
    columns
}

fn insert_sql(table: &str, columns: &[&str], dialect: Dialect) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| dialect.placeholder(n)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (id) DO NOTHING",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Values of a data row, in the column order of `insert_data_sql`
pub fn data_values(record: &PooledRecord) -> Vec<SqlValue> {
    vec![
        SqlValue::text(&record.id),
        SqlValue::int(id_hash(&record.id) as i64),
        SqlValue::int(id_hash(&record.canonical_id) as i64),
        SqlValue::text(&record.canonical_id),
        SqlValue::Text(record.checksum.clone()),
        SqlValue::text(&record.content),
        SqlValue::Text(record.structured_content.clone()),
        SqlValue::Text(record.string_type.clone()),
        SqlValue::int(to_millis(record.created_at)),
        SqlValue::text(&record.created_by),
        SqlValue::int(to_millis(record.updated_at)),
        SqlValue::text(&record.updated_by),
        SqlValue::int(to_millis(record.local_updated_at)),
        SqlValue::int(record.deleted as i64),
    ]
}

/// Values of `update_data_sql`
pub fn update_values(record: &PooledRecord) -> Vec<SqlValue> {
    vec![
        SqlValue::text(&record.canonical_id),
        SqlValue::int(id_hash(&record.canonical_id) as i64),
        SqlValue::int(to_millis(record.updated_at)),
        SqlValue::text(&record.updated_by),
        SqlValue::int(to_millis(record.local_updated_at)),
        SqlValue::int(record.deleted as i64),
        SqlValue::int(id_hash(&record.id) as i64),
        SqlValue::text(&record.id),
    ]
}

/// Values of `select_by_id_sql`
pub fn id_values(id: &str) -> Vec<SqlValue> {
    vec![SqlValue::int(id_hash(id) as i64), SqlValue::text(id)]
}

/// One row of a pool's index table
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub columns: Vec<(String, SqlValue)>,
}

impl IndexRow {
    fn keyed(id: &str) -> Self {
        Self {
            columns: vec![
                ("id".to_string(), SqlValue::text(id)),
                ("id_hash".to_string(), SqlValue::int(id_hash(id) as i64)),
            ],
        }
    }

    fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push((column.into(), value));
    }

    pub fn value(&self, column: &str) -> Option<&SqlValue> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn values(&self) -> Vec<SqlValue> {
        self.columns.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Index row of a freshly accepted record
    pub fn for_record(kind: PoolKind, record: &PooledRecord) -> Result<Self> {
        let mut row = Self::keyed(&record.id);
        match kind {
            PoolKind::NameString => {}
            PoolKind::TaxonName => {
                let structured = record.structured();
                for rank in PrimaryRank::ALL {
                    let epithet = structured.as_ref().and_then(|s| lookup_text(s, &[rank.name()]));
                    row.push(rank.column(), SqlValue::Text(epithet.map(|e| e.to_lowercase())));
                }
            }
            PoolKind::Reference => {
                let structured = record.structured();
                let author = structured
                    .as_ref()
                    .and_then(|s| lookup_text(s, &["author", "authors", "docAuthor"]));
                let date = structured
                    .as_ref()
                    .and_then(|s| lookup_text(s, &["year", "date", "docDate"]));
                row.push("doc_author", SqlValue::Text(author.map(|a| a.to_lowercase())));
                row.push("doc_date", SqlValue::Text(date));
            }
            PoolKind::Usage => {
                let usage = CompositeUsageId::decode(&record.content)?;
                row.push("name_string_id", SqlValue::text(usage.name_id()));
                row.push("name_string_id_hash", SqlValue::int(id_hash(usage.name_id()) as i64));
                row.push(
                    "taxon_name_id",
                    SqlValue::Text(usage.qualified_name_id().map(str::to_string)),
                );
                row.push(
                    "taxon_name_id_hash",
                    SqlValue::Int(usage.qualified_name_id().map(|q| id_hash(q) as i64)),
                );
                row.push("usage_type", SqlValue::text(usage.usage_type().code()));
                row.push(
                    "usage_sub_type",
                    SqlValue::Text(usage.usage_sub_type().map(|s| s.code().to_string())),
                );
                row.push("bib_ref_id", SqlValue::text(usage.ref_id()));
                row.push("bib_ref_id_hash", SqlValue::int(id_hash(usage.ref_id()) as i64));
                row.push("page_number", SqlValue::int(usage.page_number() as i64));
            }
        }
        Ok(row)
    }
}

/// First textual value under any of `keys`, ignoring key case. Arrays are
/// joined with "; ".
fn lookup_text(structured: &Value, keys: &[&str]) -> Option<String> {
    let map = structured.as_object()?;
    let value = keys.iter().find_map(|key| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })?;
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

/// Table names of all four pools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub name_strings: PoolTables,
    pub taxon_names: PoolTables,
    pub references: PoolTables,
    pub usages: PoolTables,
}

impl TableLayout {
    pub fn new(name_strings: &str, taxon_names: &str, references: &str, usages: &str) -> Self {
        Self {
            name_strings: PoolTables::new(PoolKind::NameString, name_strings),
            taxon_names: PoolTables::new(PoolKind::TaxonName, taxon_names),
            references: PoolTables::new(PoolKind::Reference, references),
            usages: PoolTables::new(PoolKind::Usage, usages),
        }
    }

    pub fn tables(&self, kind: PoolKind) -> &PoolTables {
        match kind {
            PoolKind::NameString => &self.name_strings,
            PoolKind::TaxonName => &self.taxon_names,
            PoolKind::Reference => &self.references,
            PoolKind::Usage => &self.usages,
        }
    }

    pub fn all(&self) -> [&PoolTables; 4] {
        [&self.name_strings, &self.taxon_names, &self.references, &self.usages]
    }

    /// Table names are spliced into SQL, so they must be plain identifiers
    pub fn validate(&self) -> Result<()> {
        for tables in self.all() {
            for name in [&tables.data, &tables.index] {
                let mut chars = name.chars();
                let valid_start = chars.next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
                if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(TnuError::Config(format!(
                        "'{}' is not a valid table name for the {} pool",
                        name, tables.kind
                    )));
                }
            }
        }
        let mut names: Vec<&String> = self.all().iter().map(|t| &t.data).collect();
        names.sort();
        names.dedup();
        if names.len() != 4 {
            return Err(TnuError::Config("pool table prefixes must be distinct".to_string()));
        }
        Ok(())
    }

    /// Schema of all pools, data tables first
    pub fn ddl(&self) -> Vec<String> {
        self.all().iter().flat_map(|t| t.ddl()).collect()
    }
}

impl Default for TableLayout {
    fn default() -> Self {
        Self::new("bbk", "txn", "rbk", "tnu")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Upload;
    use chrono::Utc;
    use serde_json::json;

    fn record(content: &str, structured: Option<Value>) -> PooledRecord {
        let upload = Upload {
            content: content.to_string(),
            structured,
            string_type: None,
        };
        PooledRecord::accept("0123456789ABCDEF0123456789ABCDEF".to_string(), &upload, "tester", Utc::now()).unwrap()
    }

    #[test]
    fn test_default_layout_names() {
        let layout = TableLayout::default();
        assert_eq!(layout.name_strings.data, "bbk_data");
        assert_eq!(layout.references.index, "rbk_index");
        assert_eq!(layout.tables(PoolKind::Usage).data, "tnu_data");
        layout.validate().unwrap();
    }

    #[test]
    fn test_duplicate_prefixes_rejected() {
        let layout = TableLayout::new("bbk", "bbk", "rbk", "tnu");
        assert!(matches!(layout.validate(), Err(TnuError::Config(_))));
    }

    #[test]
    fn test_ddl_covers_every_table() {
        let ddl = TableLayout::default().ddl();
        for table in ["bbk_data", "bbk_index", "txn_index", "rbk_index", "tnu_index"] {
            assert!(ddl.iter().any(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS {} ", table))));
        }
        let usage_index = ddl.iter().find(|s| s.contains("CREATE TABLE IF NOT EXISTS tnu_index")).unwrap();
        assert!(usage_index.contains("page_number BIGINT NOT NULL"));
        let taxon_index = ddl.iter().find(|s| s.contains("CREATE TABLE IF NOT EXISTS txn_index")).unwrap();
        assert!(taxon_index.contains("tx_species TEXT"));
    }

    #[test]
    fn test_insert_sql_placeholders() {
        let tables = PoolTables::new(PoolKind::NameString, "bbk");
        let sqlite = tables.insert_data_sql(Dialect::Sqlite);
        assert!(sqlite.contains("?14)"));
        assert!(sqlite.ends_with("ON CONFLICT (id) DO NOTHING"));
        assert!(tables.update_data_sql(Dialect::Postgres).ends_with("id_hash = $7 AND id = $8"));
        assert_eq!(data_values(&record("Abax", None)).len(), data_insert_columns().len());
    }

    #[test]
    fn test_taxon_index_row_lowercases_epithets() {
        let rec = record("Abax parallelus", Some(json!({ "Genus": "Abax", "species": "parallelus" })));
        let row = IndexRow::for_record(PoolKind::TaxonName, &rec).unwrap();
        assert_eq!(row.value("tx_genus"), Some(&SqlValue::text("abax")));
        assert_eq!(row.value("tx_species"), Some(&SqlValue::text("parallelus")));
        assert_eq!(row.value("tx_family"), Some(&SqlValue::Text(None)));
    }

    #[test]
    fn test_reference_index_row() {
        let rec = record(
            "Smith, J. & Jones, K. 1999",
            Some(json!({ "author": ["Smith, J.", "Jones, K."], "year": 1999 })),
        );
        let row = IndexRow::for_record(PoolKind::Reference, &rec).unwrap();
        assert_eq!(row.value("doc_author"), Some(&SqlValue::text("smith, j.; jones, k.")));
        assert_eq!(row.value("doc_date"), Some(&SqlValue::text("1999")));
    }

    #[test]
    fn test_usage_index_row() {
        let a = "A".repeat(32);
        let c = "C".repeat(32);
        let rec = record(&format!("{}-NU/NS@{}:12", a, c), None);
        let row = IndexRow::for_record(PoolKind::Usage, &rec).unwrap();
        assert_eq!(row.value("name_string_id"), Some(&SqlValue::text(a.clone())));
        assert_eq!(row.value("name_string_id_hash"), Some(&SqlValue::int(id_hash(&a) as i64)));
        assert_eq!(row.value("taxon_name_id"), Some(&SqlValue::Text(None)));
        assert_eq!(row.value("usage_sub_type"), Some(&SqlValue::text("NS")));
        assert_eq!(row.value("page_number"), Some(&SqlValue::int(12)));
        assert_eq!(row.columns.len(), 11);
    }
}
