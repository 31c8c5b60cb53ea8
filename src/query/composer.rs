//! Federated query composer
//!
//! Turns a [`UsageQuery`] into a [`QueryPlan`]: decides which foreign pools
//! must be joined, then assembles the filter in a fixed order so the same
//! predicates always produce the same SQL.

use super::plan::{Clause, Column, JoinFlags, Literal, PoolTable, QueryPlan};
use super::predicates::{present, TextCombine, UsageQuery};
use crate::error::{Result, TnuError};
use crate::store::layout::TableLayout;
use crate::usage_type::UsageClass;
use tracing::debug;

pub struct QueryComposer {
    layout: TableLayout,
    default_limit: usize,
}

impl QueryComposer {
    pub fn new(layout: TableLayout) -> Self {
        Self {
            layout,
            default_limit: 0,
        }
    }

    /// Limit applied when a query sets none; 0 leaves searches unlimited
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Decide joins and build the filter
    pub fn plan(&self, query: &UsageQuery) -> Result<QueryPlan> {
        // Step 1: join requirements from predicate presence alone
        let flags = Self::join_flags(query);

        // Step 2: free text, then structured predicates in fixed order
        let mut filter = Vec::new();
        if let Some(text) = Self::text_clause(query, &flags) {
            filter.push(text);
        }
        if let Some(name) = present(&query.name_string) {
            filter.push(Clause::contains(PoolTable::NameStrings, "content", name));
        }
        if let Some(taxon) = present(&query.taxon_name) {
            filter.push(Clause::contains(PoolTable::TaxonNames, "content", taxon));
        }
        for (rank, epithet) in query.epithet_terms() {
            filter.push(Clause::contains(PoolTable::TaxonIndex, &rank.column(), epithet));
        }
        if let Some(rank) = present(&query.rank) {
            filter.push(Clause::contains(PoolTable::TaxonNames, "string_type", rank));
        }
        if let Some(bib_ref) = present(&query.bib_ref) {
            filter.push(Clause::contains(PoolTable::References, "content", bib_ref));
        }
        if let Some(author) = present(&query.author) {
            filter.push(Clause::contains(PoolTable::ReferenceIndex, "doc_author", author));
        }
        if let Some(year) = present(&query.year) {
            filter.push(Clause::StartsWith {
                column: Column::new(PoolTable::ReferenceIndex, "doc_date"),
                value: year.to_string(),
            });
        }
        if let Some(page) = query.page_number {
            filter.push(Clause::Equals {
                column: Column::new(PoolTable::UsageIndex, "page_number"),
                value: Literal::Int(page as i64),
            });
        }
        if let Some(alias) = present(&query.usage_type) {
            let code = UsageClass::resolve(alias)?.code();
            filter.push(Clause::Any(vec![
                Clause::Equals {
                    column: Column::new(PoolTable::UsageIndex, "usage_type"),
                    value: Literal::Text(code.to_string()),
                },
                Clause::Equals {
                    column: Column::new(PoolTable::UsageIndex, "usage_sub_type"),
                    value: Literal::Text(code.to_string()),
                },
            ]));
        }
        if let Some(user) = present(&query.user) {
            let by = |column: &str| Clause::Contains {
                column: Column::new(PoolTable::Usages, column),
                value: user.to_string(),
                fold_case: false,
            };
            filter.push(Clause::Any(vec![by("created_by"), by("updated_by")]));
        }

        // Step 3: nothing to filter on is not a search
        if filter.is_empty() {
            return Err(TnuError::EmptyQuery);
        }

        // Step 4: canonical restriction goes last
        if query.self_canonical_only {
            filter.push(Clause::SelfCanonical);
        }

        let limit = query
            .limit
            .or_else(|| (self.default_limit > 0).then_some(self.default_limit))
            .filter(|l| *l > 0);

        Ok(QueryPlan { flags, filter, limit })
    }

    /// Plan and render to SQL
    pub fn compile(&self, query: &UsageQuery) -> Result<String> {
        let plan = self.plan(query)?;
        let sql = plan.render(&self.layout);
        debug!(joins = plan.joins().len(), "Composed usage query: {}", sql);
        Ok(sql)
    }

    pub fn join_flags(query: &UsageQuery) -> JoinFlags {
        let text = !query.text_terms().is_empty();
        let epithets = !query.epithet_terms().is_empty();
        let reference_index = present(&query.author).is_some() || present(&query.year).is_some();

        JoinFlags {
            name_strings: JoinFlags::requirement(text, present(&query.name_string).is_some()),
            taxon_names: JoinFlags::requirement(
                text,
                present(&query.taxon_name).is_some() || present(&query.rank).is_some() || epithets,
            ),
            taxon_index: JoinFlags::requirement(false, epithets),
            references: JoinFlags::requirement(text, present(&query.bib_ref).is_some() || reference_index),
            reference_index: JoinFlags::requirement(false, reference_index),
        }
    }

    /// One group per term, matching any content of the usage or its joined pools
    fn text_clause(query: &UsageQuery, flags: &JoinFlags) -> Option<Clause> {
        let terms = query.text_terms();
        if terms.is_empty() {
            return None;
        }
        let content_tables: Vec<PoolTable> = [
            PoolTable::NameStrings,
            PoolTable::TaxonNames,
            PoolTable::References,
            PoolTable::Usages,
        ]
        .into_iter()
        .filter(|t| flags.uses(*t))
        .collect();

        let per_term: Vec<Clause> = terms
            .into_iter()
            .map(|term| {
                Clause::Any(
                    content_tables
                        .iter()
                        .map(|table| Clause::contains(*table, "content", term))
                        .collect(),
                )
            })
            .collect();

        Some(match query.text_combine {
            _ if per_term.len() == 1 => per_term.into_iter().next()?,
            TextCombine::Any => Clause::Any(per_term),
            TextCombine::All => Clause::All(per_term),
        })
    }
}
