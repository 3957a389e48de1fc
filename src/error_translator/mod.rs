// src/error_translator/mod.rs
// Maps raw SQL engine error text to a plain-language explanation, appending
// the original message as a technical-details trailer. Rules are evaluated
// in priority order; the first rule whose needles all match wins. An
// unmatched error still gets a safe, generic explanation rather than a
// leaked stack trace.

struct Rule {
    needles: &'static [&'static str],
    friendly: &'static str,
    /// When true and the caller supplies a column list, it's appended as an
    /// "Available columns: ..." line.
    enrich_columns: bool,
}

const fn rule(needles: &'static [&'static str], friendly: &'static str) -> Rule {
    Rule { needles, friendly, enrich_columns: false }
}

const RULES: &[Rule] = &[
    // Column resolution, most specific first.
    Rule {
        needles: &["column", "does not exist"],
        friendly: "That column doesn't exist on this dataset. Check the column name.",
        enrich_columns: true,
    },
    Rule {
        needles: &["referenced column"],
        friendly: "That column doesn't exist on this dataset. Check the column name.",
        enrich_columns: true,
    },
    rule(&["ambiguous"], "The query references a column name that exists in more than one table. Qualify it with the table name, e.g. table.column."),
    rule(&["duplicate column"], "The query selects the same column name more than once. Give the duplicates distinct names with AS."),

    // Tables and datasets.
    rule(&["no such table"], "That dataset or table name doesn't exist in this conversation. Check the table name or add the dataset first."),
    rule(&["table", "does not exist"], "That dataset or table name doesn't exist in this conversation. Check the table name or add the dataset first."),

    // Unsupported constructs.
    rule(&["ilike"], "Case-insensitive pattern matching (ILIKE) isn't supported here. Try LIKE with LOWER() applied to both sides instead."),
    rule(&["regexp_matches"], "Regular-expression matching isn't supported here. Try LIKE with wildcards instead."),
    rule(&["regex"], "Regular-expression matching isn't supported here. Try LIKE with wildcards instead."),
    rule(&["interval"], "Interval arithmetic isn't supported here. Express date/time differences using explicit date functions instead."),
    rule(&["date_trunc"], "date_trunc isn't supported here. Truncate dates with an explicit CAST or date-extraction function instead."),
    rule(&["distinct on"], "DISTINCT ON isn't supported here. Use GROUP BY, or a window function such as ROW_NUMBER, to pick one row per group instead."),
    rule(&["cross join"], "CROSS JOIN isn't supported here. Use an explicit JOIN with an ON condition instead."),
    rule(&["intersect"], "INTERSECT isn't supported here. Rewrite the query using JOIN or a WHERE ... IN (...) subquery instead."),
    rule(&["except"], "EXCEPT isn't supported here. Rewrite the query using a NOT EXISTS or NOT IN subquery instead."),
    rule(&["concat"], "The CONCAT function isn't available here. Use the || operator instead, e.g. a || b."),
    rule(&["lcase"], "LCASE isn't available here. Use LOWER() instead."),
    rule(&["ucase"], "UCASE isn't available here. Use UPPER() instead."),

    // Aggregation and grouping.
    rule(&["aggregate function calls cannot be nested"], "Aggregate functions can't be nested, e.g. SUM(COUNT(x)). Compute the inner aggregate in a subquery or CTE first."),
    rule(&["must appear in the group by clause"], "Every selected column that isn't wrapped in an aggregate function must also appear in the GROUP BY clause."),
    rule(&["group by", "out of range"], "A GROUP BY position refers to a column that isn't in the SELECT list. Use the column name instead of a position number."),
    rule(&["order by", "out of range"], "An ORDER BY position refers to a column that isn't in the SELECT list. Use the column name instead of a position number."),

    // Joins and ordering.
    rule(&["join", "ambiguous"], "The query's JOIN references a column name shared by both sides. Qualify it with the table name."),
    rule(&["join"], "The query's JOIN condition couldn't be resolved. Check that the joined columns exist and have compatible types."),

    // Type and value errors.
    rule(&["could not convert string"], "A text value couldn't be converted to a number. Check for non-numeric characters in that column, or cast explicitly with TRY_CAST."),
    rule(&["like", "string"], "LIKE can only be used on text columns. Cast the column to text first, e.g. CAST(column AS VARCHAR)."),
    rule(&["boolean"], "A boolean value is being used somewhere a boolean isn't valid, such as compared to a number. Use TRUE/FALSE or an explicit comparison instead."),
    rule(&["struct"], "Accessing a nested struct field failed. Check the field name and that the column actually holds that nested shape."),
    rule(&["json"], "Accessing a JSON field failed. Check the field path and that the column actually holds JSON data."),
    rule(&["function", "does not exist"], "The query calls a function that doesn't exist. Check the function name and argument types."),
    rule(&["binder error"], "The query references a column or table that doesn't match the dataset's schema."),
    rule(&["catalog error"], "The query references a table that isn't registered in this conversation."),
    rule(&["syntax error"], "There's a SQL syntax error in the query. Check for missing commas, quotes, or parentheses."),
    rule(&["parser error"], "The SQL couldn't be parsed. Check for missing commas, quotes, or parentheses."),
    rule(&["does not exist"], "The referenced table or column doesn't exist. Check the spelling and that the dataset has been added."),
    rule(&["conversion error"], "A value in the dataset couldn't be converted to the type the query expects. Try casting the column explicitly."),
    rule(&["out of range"], "A computed value was too large to represent. Try narrowing the query or casting to a wider numeric type."),
    rule(&["division by zero"], "The query divides by zero for at least one row. Add a guard such as NULLIF(denominator, 0)."),
    rule(&["out of memory"], "The query ran out of memory. Try narrowing the result set with filters or a smaller LIMIT."),

    // DDL, reaching the translator despite the read-only guard upstream.
    rule(&["create table"], "Only SELECT queries are supported. Data-definition statements aren't allowed."),
    rule(&["drop table"], "Only SELECT queries are supported. Data-definition statements aren't allowed."),
    rule(&["alter table"], "Only SELECT queries are supported. Data-definition statements aren't allowed."),

    // Dataset file fetch/parse.
    rule(&["http"], "The dataset file couldn't be fetched over the network."),
    rule(&["permission denied"], "The dataset file couldn't be read due to a permissions error."),
    rule(&["not a valid"], "The dataset file doesn't look like the format it claims to be. Confirm the URL points to CSV, TSV, JSON, or Parquet."),
    rule(&["invalid input"], "The dataset file couldn't be parsed in its expected format."),
    rule(&["timed out"], "The query took too long to finish and was stopped."),
    rule(&["timeout"], "The query took too long to finish and was stopped."),
];

const GENERIC_FALLBACK: &str = "The query couldn't be completed.";

/// Translates a raw engine error into a friendly message followed by a
/// "Technical details: ..." trailer carrying the original text. When the
/// matched rule calls for it and `context` holds a comma-separated column
/// list, an "Available columns: ..." line is appended to the friendly half.
pub fn translate(raw: &str, context: Option<&str>) -> String {
    let lower = raw.to_ascii_lowercase();
    let matched = RULES.iter().find(|rule| rule.needles.iter().all(|n| lower.contains(n)));

    let friendly = match matched {
        Some(rule) if rule.enrich_columns => match context {
            Some(columns) if !columns.is_empty() => {
                format!("{} Available columns: {}.", rule.friendly, columns)
            }
            _ => rule.friendly.to_string(),
        },
        Some(rule) => rule.friendly.to_string(),
        None => GENERIC_FALLBACK.to_string(),
    };

    format!("{}\n\nTechnical details: {}", friendly, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_missing_table() {
        let msg = translate("Catalog Error: Table with name foo does not exist!", None);
        assert!(msg.contains("doesn't exist"));
        assert!(msg.contains("Technical details:"));
    }

    #[test]
    fn matches_syntax_error() {
        let msg = translate("Parser Error: syntax error at or near \"SELEC\"", None);
        assert!(msg.contains("syntax error") || msg.to_lowercase().contains("parsed"));
    }

    #[test]
    fn falls_back_to_generic_for_unknown_errors() {
        let msg = translate("some never before seen internal engine string", None);
        assert!(msg.starts_with(GENERIC_FALLBACK));
        assert!(msg.contains("Technical details: some never before seen internal engine string"));
    }

    #[test]
    fn match_is_case_insensitive() {
        let msg = translate("TIMED OUT waiting for lock", None);
        assert!(msg.contains("took too long"));
    }

    #[test]
    fn first_match_wins() {
        // "no such table" is a more specific, earlier rule than the generic
        // "does not exist" rule; ensure it's checked first when both apply.
        let msg = translate("no such table: foo", None);
        assert!(msg.contains("doesn't exist in this conversation"));
    }

    #[test]
    fn column_not_found_is_enriched_with_available_columns() {
        let msg = translate(
            "Binder Error: column \"revenu\" does not exist",
            Some("revenue, region, quarter"),
        );
        assert!(msg.contains("That column doesn't exist"));
        assert!(msg.contains("Available columns: revenue, region, quarter."));
    }

    #[test]
    fn column_not_found_without_context_omits_enrichment() {
        let msg = translate("Binder Error: column \"revenu\" does not exist", None);
        assert!(msg.contains("That column doesn't exist"));
        assert!(!msg.contains("Available columns"));
    }

    #[test]
    fn matches_ambiguous_column() {
        let msg = translate("Binder Error: Ambiguous reference to column \"id\"", None);
        assert!(msg.contains("exists in more than one table"));
    }

    #[test]
    fn matches_ilike_unsupported() {
        let msg = translate("Parser Error: ILIKE is not supported", None);
        assert!(msg.contains("ILIKE"));
    }

    #[test]
    fn matches_group_by_position_out_of_range() {
        let msg = translate("Binder Error: GROUP BY position 5 is not in select list, out of range", None);
        assert!(msg.contains("GROUP BY position"));
    }

    #[test]
    fn matches_aggregation_without_group_by() {
        let msg = translate(
            "Binder Error: column \"region\" must appear in the GROUP BY clause or be used in an aggregate function",
            None,
        );
        assert!(msg.contains("GROUP BY clause"));
    }

    #[test]
    fn matches_division_by_zero() {
        let msg = translate("Invalid Input Error: division by zero", None);
        assert!(msg.contains("divides by zero"));
    }

    #[test]
    fn matches_cross_join_unsupported() {
        let msg = translate("Binder Error: CROSS JOIN is not supported in this context", None);
        assert!(msg.contains("CROSS JOIN"));
    }

    #[test]
    fn matches_struct_field_access() {
        let msg = translate("Binder Error: struct field \"x\" not found", None);
        assert!(msg.contains("nested struct field"));
    }

    #[test]
    fn matches_string_to_number_conversion() {
        let msg = translate("Conversion Error: Could not convert string 'abc' to INT32", None);
        assert!(msg.contains("couldn't be converted to a number"));
    }

    #[test]
    fn matches_ddl_statement() {
        let msg = translate("Not Implemented Error: DROP TABLE users is not supported in this mode", None);
        assert!(msg.contains("Data-definition statements"));
    }
}
