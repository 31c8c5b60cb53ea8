use sqlparser::ast::Statement;
use sqlparser::dialect::{GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use tnu_bank::query::QueryComposer;
use tnu_bank::store::TableLayout;
use tnu_bank::{PrimaryRank, TextCombine, UsageQuery};

fn parse_query(sql: &str) -> Statement {
    for dialect in [&GenericDialect {} as &dyn sqlparser::dialect::Dialect, &PostgreSqlDialect {}, &SQLiteDialect {}] {
        let statements = Parser::parse_sql(dialect, sql).unwrap_or_else(|e| panic!("{}\n{}", e, sql));
        assert_eq!(statements.len(), 1);
    }
    Parser::parse_sql(&GenericDialect {}, sql).unwrap().remove(0)
}

fn queries() -> Vec<UsageQuery> {
    vec![
        UsageQuery::new().text("abax"),
        UsageQuery::new().text("abax").text("o'brien").combine(TextCombine::All),
        UsageQuery::new().name_string("Carabus").taxon_name("auratus"),
        UsageQuery::new()
            .epithet(PrimaryRank::Genus, "Abax")
            .epithet(PrimaryRank::Family, "Carabidae"),
        UsageQuery::new().rank("species").self_canonical_only(),
        UsageQuery::new().bib_ref("100% beetles").author("Smith_").year("1999"),
        UsageQuery::new().page_number(12).usage_type("OD").limit(25),
        UsageQuery::new().user("alice").text("europe"),
    ]
}

#[test]
fn test_composed_queries_parse() {
    let composer = QueryComposer::new(TableLayout::default());
    for query in queries() {
        let sql = composer.compile(&query).unwrap();
        assert!(matches!(parse_query(&sql), Statement::Query(_)), "{}", sql);
    }
}

#[test]
fn test_custom_prefixes_parse() {
    let layout = TableLayout::new("names", "taxa", "refs", "usages");
    let composer = QueryComposer::new(layout).with_default_limit(100);
    let sql = composer
        .compile(&UsageQuery::new().text("abax").author("smith"))
        .unwrap();
    assert!(sql.contains("FROM usages_data AS tnu"));
    assert!(sql.contains("refs_index AS rbkidx"));
    assert!(sql.ends_with(" LIMIT 100"));
    parse_query(&sql);
}

#[test]
fn test_schema_statements_parse() {
    for statement in TableLayout::default().ddl() {
        let parsed = Parser::parse_sql(&SQLiteDialect {}, &statement).unwrap_or_else(|e| panic!("{}\n{}", e, statement));
        assert!(matches!(
            parsed[0],
            Statement::CreateTable { .. } | Statement::CreateIndex { .. }
        ));
    }
}
