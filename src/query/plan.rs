//! Query plan: joins and filter clauses of a usage search
//!
//! The composer builds a [`QueryPlan`] first and renders SQL from it last, so
//! join decisions and clause order can be inspected without a database.

use crate::store::layout::{TableLayout, DATA_COLUMNS};
use std::fmt;

/// Tables a usage search can touch, each under a fixed alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTable {
    Usages,
    UsageIndex,
    NameStrings,
    TaxonNames,
    TaxonIndex,
    References,
    ReferenceIndex,
}

impl PoolTable {
    pub fn alias(self) -> &'static str {
        match self {
            PoolTable::Usages => "tnu",
            PoolTable::UsageIndex => "tnuidx",
            PoolTable::NameStrings => "bbk",
            PoolTable::TaxonNames => "txn",
            PoolTable::TaxonIndex => "txnidx",
            PoolTable::References => "rbk",
            PoolTable::ReferenceIndex => "rbkidx",
        }
    }

    pub fn table_name(self, layout: &TableLayout) -> &str {
        match self {
            PoolTable::Usages => &layout.usages.data,
            PoolTable::UsageIndex => &layout.usages.index,
            PoolTable::NameStrings => &layout.name_strings.data,
            PoolTable::TaxonNames => &layout.taxon_names.data,
            PoolTable::TaxonIndex => &layout.taxon_names.index,
            PoolTable::References => &layout.references.data,
            PoolTable::ReferenceIndex => &layout.references.index,
        }
    }

    /// Usage index columns holding the id (and its hash) this table is joined on
    fn foreign_key(self) -> (&'static str, &'static str) {
        match self {
            PoolTable::Usages | PoolTable::UsageIndex => ("id", "id_hash"),
            PoolTable::NameStrings => ("name_string_id", "name_string_id_hash"),
            PoolTable::TaxonNames | PoolTable::TaxonIndex => ("taxon_name_id", "taxon_name_id_hash"),
            PoolTable::References | PoolTable::ReferenceIndex => ("bib_ref_id", "bib_ref_id_hash"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Forced by a structured predicate: rows without a match are dropped
    Inner,
    /// Needed for free text only: rows without a match still qualify
    Left,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => f.write_str("INNER JOIN"),
            JoinKind::Left => f.write_str("LEFT JOIN"),
        }
    }
}

/// Which foreign tables participate in a search, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinFlags {
    pub name_strings: Option<JoinKind>,
    pub taxon_names: Option<JoinKind>,
    pub taxon_index: Option<JoinKind>,
    pub references: Option<JoinKind>,
    pub reference_index: Option<JoinKind>,
}

impl JoinFlags {
    /// Join kind of a table needed for free text and/or structured predicates
    pub fn requirement(text: bool, structured: bool) -> Option<JoinKind> {
        match (text, structured) {
            (_, true) => Some(JoinKind::Inner),
            (true, false) => Some(JoinKind::Left),
            (false, false) => None,
        }
    }

    /// Foreign joins in rendering order
    pub fn joins(&self) -> Vec<JoinSpec> {
        [
            (PoolTable::NameStrings, self.name_strings),
            (PoolTable::TaxonNames, self.taxon_names),
            (PoolTable::TaxonIndex, self.taxon_index),
            (PoolTable::References, self.references),
            (PoolTable::ReferenceIndex, self.reference_index),
        ]
        .into_iter()
        .filter_map(|(table, kind)| kind.map(|kind| JoinSpec::on_usage_index(table, kind)))
        .collect()
    }

    pub fn uses(&self, table: PoolTable) -> bool {
        match table {
            PoolTable::Usages | PoolTable::UsageIndex => true,
            PoolTable::NameStrings => self.name_strings.is_some(),
            PoolTable::TaxonNames => self.taxon_names.is_some(),
            PoolTable::TaxonIndex => self.taxon_index.is_some(),
            PoolTable::References => self.references.is_some(),
            PoolTable::ReferenceIndex => self.reference_index.is_some(),
        }
    }
}

/// Join of one table on hash equality plus exact id equality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub table: PoolTable,
    pub kind: JoinKind,
    pub left: PoolTable,
    pub left_id: &'static str,
    pub left_hash: &'static str,
}

impl JoinSpec {
    pub fn on_usage_index(table: PoolTable, kind: JoinKind) -> Self {
        let (left_id, left_hash) = table.foreign_key();
        Self {
            table,
            kind,
            left: PoolTable::UsageIndex,
            left_id,
            left_hash,
        }
    }

    fn usage_index() -> Self {
        Self {
            table: PoolTable::UsageIndex,
            kind: JoinKind::Inner,
            left: PoolTable::Usages,
            left_id: "id",
            left_hash: "id_hash",
        }
    }

    fn render(&self, layout: &TableLayout) -> String {
        let right = self.table.alias();
        let left = self.left.alias();
        format!(
            "{} {} AS {} ON {}.{} = {}.id_hash AND {}.{} = {}.id",
            self.kind,
            self.table.table_name(layout),
            right,
            left,
            self.left_hash,
            right,
            left,
            self.left_id,
            right
        )
    }
}

/// A column of one of the search tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub table: PoolTable,
    pub name: String,
}

impl Column {
    pub fn new(table: PoolTable, name: impl Into<String>) -> Self {
        Self {
            table,
            name: name.into(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table.alias(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Text(String),
    Int(i64),
}

/// Filter clause of the plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// Substring match; `fold_case` compares lower-cased column and value
    Contains {
        column: Column,
        value: String,
        fold_case: bool,
    },
    /// Prefix match
    StartsWith { column: Column, value: String },
    Equals { column: Column, value: Literal },
    Any(Vec<Clause>),
    All(Vec<Clause>),
    /// The usage is its own canonical form
    SelfCanonical,
}

impl Clause {
    pub fn contains(table: PoolTable, column: &str, value: &str) -> Self {
        Clause::Contains {
            column: Column::new(table, column),
            value: value.to_string(),
            fold_case: true,
        }
    }

    /// Tables this clause reads from
    pub fn tables(&self) -> Vec<PoolTable> {
        match self {
            Clause::Contains { column, .. }
            | Clause::StartsWith { column, .. }
            | Clause::Equals { column, .. } => vec![column.table],
            Clause::Any(clauses) | Clause::All(clauses) => clauses.iter().flat_map(Clause::tables).collect(),
            Clause::SelfCanonical => vec![PoolTable::Usages],
        }
    }

    pub fn render(&self) -> String {
        match self {
            Clause::Contains {
                column,
                value,
                fold_case: true,
            } => format!(
                "LOWER({}) LIKE '%{}%' ESCAPE '!'",
                column,
                like_escape(&value.to_lowercase())
            ),
            Clause::Contains {
                column,
                value,
                fold_case: false,
            } => format!("{} LIKE '%{}%' ESCAPE '!'", column, like_escape(value)),
            Clause::StartsWith { column, value } => {
                format!("{} LIKE '{}%' ESCAPE '!'", column, like_escape(value))
            }
            Clause::Equals {
                column,
                value: Literal::Text(s),
            } => format!("{} = '{}'", column, quote_escape(s)),
            Clause::Equals {
                column,
                value: Literal::Int(i),
            } => format!("{} = {}", column, i),
            Clause::Any(clauses) => group(clauses, " OR "),
            Clause::All(clauses) => group(clauses, " AND "),
            Clause::SelfCanonical => {
                let usage = PoolTable::Usages.alias();
                format!("({0}.canonical_id = '' OR {0}.canonical_id = {0}.id)", usage)
            }
        }
    }
}

fn group(clauses: &[Clause], separator: &str) -> String {
    let parts: Vec<String> = clauses.iter().map(|c| format!("({})", c.render())).collect();
    format!("({})", parts.join(separator))
}

/// Escape LIKE wildcards with `!`, then quotes for the string literal
pub fn like_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '!' | '%' | '_' => {
                out.push('!');
                out.push(c);
            }
            '\'' => out.push_str("''"),
            _ => out.push(c),
        }
    }
    out
}

pub fn quote_escape(value: &str) -> String {
    value.replace('\'', "''")
}

/// Joins and filter of one usage search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub flags: JoinFlags,

    /// Conjunctive filter, in application order
    pub filter: Vec<Clause>,

    pub limit: Option<usize>,
}

impl QueryPlan {
    pub fn joins(&self) -> Vec<JoinSpec> {
        let mut joins = vec![JoinSpec::usage_index()];
        joins.extend(self.flags.joins());
        joins
    }

    pub fn render(&self, layout: &TableLayout) -> String {
        let usage = PoolTable::Usages.alias();
        let columns: Vec<String> = DATA_COLUMNS.iter().map(|c| format!("{}.{}", usage, c)).collect();

        let mut sql = format!(
            "SELECT {} FROM {} AS {}",
            columns.join(", "),
            PoolTable::Usages.table_name(layout),
            usage
        );
        for join in self.joins() {
            sql.push(' ');
            sql.push_str(&join.render(layout));
        }
        if !self.filter.is_empty() {
            let clauses: Vec<String> = self.filter.iter().map(|c| format!("({})", c.render())).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }
}
