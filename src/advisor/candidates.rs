//! Candidate generation from a query shape

use super::shape::{QueryShape, TableUsage};
use super::statement::{CreateIndexStatement, IndexMethod};
use std::collections::BTreeMap;

/// PostgreSQL identifier limit in bytes
pub const MAX_NAME_LEN: usize = 63;

/// Which rule produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    SingleEquality,
    CoveringWithSort,
    CompositeEquality,
    PureSort,
}

/// One proposed index before dedup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub table: String,
    pub method: IndexMethod,
    /// Key list without parentheses, e.g. `status, created_at DESC`
    pub key: String,
    pub label: String,
}

impl Candidate {
    fn new(kind: CandidateKind, table: &str, method: IndexMethod, parts: &[&str]) -> Self {
        Self {
            kind,
            table: table.to_string(),
            method,
            key: parts.join(", "),
            label: parts.iter().map(|p| slug(p)).collect::<Vec<_>>().join("_"),
        }
    }

    pub fn name(&self) -> String {
        index_name(&self.table, &self.label, self.method)
    }

    pub fn statement(&self) -> CreateIndexStatement {
        CreateIndexStatement::generated(&self.name(), &self.table, self.method, &self.key)
    }
}

/// Every applicable candidate for one table, in rule order
pub fn table_candidates(table: &str, usage: &TableUsage) -> Vec<Candidate> {
    let equality_method = if usage.where_all_eq {
        IndexMethod::Hash
    } else {
        IndexMethod::Btree
    };
    let cols: Vec<&str> = usage.where_cols.iter().map(String::as_str).collect();
    let sorts: Vec<&str> = usage.sort_exprs().map(String::as_str).collect();

    let mut out = Vec::new();
    match (cols.len(), sorts.is_empty()) {
        (0, true) => {}
        (1, true) => out.push(Candidate::new(
            CandidateKind::SingleEquality,
            table,
            equality_method,
            &cols,
        )),
        (_, true) => out.push(Candidate::new(
            CandidateKind::CompositeEquality,
            table,
            equality_method,
            &cols,
        )),
        (0, false) => {
            for expr in &sorts {
                out.push(Candidate::new(
                    CandidateKind::PureSort,
                    table,
                    IndexMethod::Btree,
                    &[*expr],
                ));
            }
        }
        (_, false) => {
            for col in &cols {
                for expr in &sorts {
                    out.push(Candidate::new(
                        CandidateKind::CoveringWithSort,
                        table,
                        IndexMethod::Btree,
                        &[*col, *expr],
                    ));
                }
            }
        }
    }
    out
}

/// Deduplicated statements for a whole shape
///
/// `existing` maps a table to the definitions of indexes it already has
/// (live indexes and stored statements alike).
pub fn generate(
    shape: &QueryShape,
    existing: &BTreeMap<String, Vec<String>>,
) -> Vec<CreateIndexStatement> {
    let mut emitted: Vec<CreateIndexStatement> = Vec::new();

    for (table, usage) in &shape.tables {
        let definitions = existing.get(table).map(Vec::as_slice).unwrap_or(&[]);

        for candidate in table_candidates(table, usage) {
            let covered = definitions
                .iter()
                .map(String::as_str)
                .chain(
                    emitted
                        .iter()
                        .filter(|statement| statement.table() == table.as_str())
                        .map(CreateIndexStatement::as_str),
                )
                .any(|definition| covers(definition, &candidate.key));

            if covered {
                tracing::debug!(
                    table = %table,
                    key = %candidate.key,
                    "Candidate already covered by an existing index"
                );
                continue;
            }
            emitted.push(candidate.statement());
        }
    }

    emitted
}

/// Whether `definition` already indexes `key`
///
/// Either the parenthesized key appears verbatim, or the key elements are a
/// leading prefix of the definition's key list, in order, ignoring sort
/// direction.
pub fn covers(definition: &str, key: &str) -> bool {
    if definition.contains(&format!("({})", key)) {
        return true;
    }

    let Some(existing) = key_list(definition) else {
        return false;
    };
    let existing: Vec<String> = split_key(&existing).map(|k| bare(&k)).collect();
    let wanted: Vec<String> = split_key(key).map(|k| bare(&k)).collect();
    !wanted.is_empty() && existing.starts_with(&wanted)
}

/// Table an index definition is on, lowercased and without schema
pub fn definition_table(definition: &str) -> Option<String> {
    let mut tokens = definition.split_whitespace();
    tokens.find(|t| t.eq_ignore_ascii_case("ON"))?;

    let mut table = tokens.next()?;
    if table.eq_ignore_ascii_case("ONLY") {
        table = tokens.next()?;
    }
    let table = table.split('(').next().unwrap_or(table);
    let table = table.rsplit('.').next().unwrap_or(table).trim_matches('"');
    (!table.is_empty()).then(|| table.to_lowercase())
}

/// Text between the first `(` after `USING`/`ON` and its matching `)`
fn key_list(definition: &str) -> Option<String> {
    let start = definition.find('(')?;
    let mut depth = 0usize;
    for (i, c) in definition[start..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(definition[start + 1..start + i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Split a key list on top-level commas
fn split_key(key: &str) -> impl Iterator<Item = String> + '_ {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in key.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty())
}

/// Key element without sort direction or null ordering, lowercased
fn bare(part: &str) -> String {
    let mut words: Vec<String> = part.split_whitespace().map(str::to_lowercase).collect();
    while matches!(
        words.last().map(String::as_str),
        Some("asc" | "desc" | "nulls" | "first" | "last")
    ) {
        words.pop();
    }
    words.join(" ")
}

/// Lowercase, runs of non-alphanumerics collapsed to `_`
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// `idx_<table>_<label>_<method>`, shortened with a CRC32 suffix when too long
pub fn index_name(table: &str, label: &str, method: IndexMethod) -> String {
    let name = format!("idx_{}_{}_{}", slug(table), label, method);
    if name.len() <= MAX_NAME_LEN {
        return name;
    }

    let checksum = crc32fast::hash(name.as_bytes());
    let mut prefix = &name[..MAX_NAME_LEN - 9];
    while let Some(stripped) = prefix.strip_suffix('_') {
        prefix = stripped;
    }
    format!("{}_{:08x}", prefix, checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(cols: &[&str], order: &[&str], all_eq: bool) -> TableUsage {
        TableUsage {
            where_cols: cols.iter().map(|s| s.to_string()).collect(),
            order_exprs: order.iter().map(|s| s.to_string()).collect(),
            group_exprs: Vec::new(),
            where_all_eq: all_eq,
        }
    }

    fn keys(candidates: &[Candidate]) -> Vec<(CandidateKind, IndexMethod, String)> {
        candidates
            .iter()
            .map(|c| (c.kind, c.method, c.key.clone()))
            .collect()
    }

    #[test]
    fn test_single_equality() {
        let c = table_candidates("users", &usage(&["email"], &[], true));
        assert_eq!(
            keys(&c),
            vec![(CandidateKind::SingleEquality, IndexMethod::Hash, "email".to_string())]
        );
        assert_eq!(c[0].name(), "idx_users_email_hash");

        let c = table_candidates("users", &usage(&["age"], &[], false));
        assert_eq!(c[0].method, IndexMethod::Btree);
    }

    #[test]
    fn test_composite_equality() {
        let c = table_candidates("orders", &usage(&["customer_id", "status"], &[], true));
        assert_eq!(
            keys(&c),
            vec![(
                CandidateKind::CompositeEquality,
                IndexMethod::Hash,
                "customer_id, status".to_string()
            )]
        );
        assert_eq!(c[0].name(), "idx_orders_customer_id_status_hash");
    }

    #[test]
    fn test_covering_pairs_and_pure_sort() {
        let c = table_candidates("events", &usage(&["kind", "user_id"], &["ts DESC"], true));
        assert_eq!(c.len(), 2);
        assert!(c.iter().all(|c| c.kind == CandidateKind::CoveringWithSort));
        assert!(c.iter().all(|c| c.method == IndexMethod::Btree));
        assert_eq!(c[1].key, "user_id, ts DESC");

        let c = table_candidates("events", &usage(&[], &["ts", "lower(name)"], true));
        assert_eq!(
            keys(&c),
            vec![
                (CandidateKind::PureSort, IndexMethod::Btree, "ts".to_string()),
                (CandidateKind::PureSort, IndexMethod::Btree, "lower(name)".to_string()),
            ]
        );
        assert_eq!(c[1].name(), "idx_events_lower_name_btree");
    }

    #[test]
    fn test_covers() {
        let def = "CREATE INDEX idx_x ON public.orders USING btree (status, created_at)";
        assert!(covers(def, "status, created_at"));
        assert!(covers(def, "status, created_at DESC"));
        assert!(covers(def, "status"));
        assert!(!covers(def, "customer_id"));
        assert!(!covers(def, "created_at"));
        assert!(!covers(def, "created_at, status"));
        assert!(!covers("not an index", "status"));
    }

    #[test]
    fn test_non_leading_column_gets_own_index() {
        let shape = crate::advisor::analyze("SELECT * FROM orders WHERE status = 'x'").unwrap();
        let mut existing = BTreeMap::new();
        existing.insert(
            "orders".to_string(),
            vec!["CREATE INDEX orders_cs ON public.orders USING btree (customer_id, status)".to_string()],
        );

        let out = generate(&shape, &existing);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].as_str(),
            "CREATE INDEX idx_orders_status_hash ON orders USING hash (status);"
        );
    }

    #[test]
    fn test_same_key_on_two_tables() {
        let shape = crate::advisor::analyze(
            "SELECT * FROM a JOIN b ON a.id = b.a_id WHERE a.status = 'x' AND b.status = 'y'",
        )
        .unwrap();

        let out: Vec<String> = generate(&shape, &BTreeMap::new())
            .into_iter()
            .map(|s| s.into_string())
            .collect();
        assert_eq!(
            out,
            vec![
                "CREATE INDEX idx_a_status_hash ON a USING hash (status);".to_string(),
                "CREATE INDEX idx_b_status_hash ON b USING hash (status);".to_string(),
            ]
        );
    }

    #[test]
    fn test_definition_table() {
        assert_eq!(
            definition_table("CREATE INDEX a ON public.Orders USING btree (x)"),
            Some("orders".to_string())
        );
        assert_eq!(
            definition_table("CREATE UNIQUE INDEX a ON ONLY orders(x)"),
            Some("orders".to_string())
        );
        assert_eq!(definition_table("CREATE INDEX a"), None);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("created_at DESC"), "created_at_desc");
        assert_eq!(slug("lower(Email)"), "lower_email");
        assert_eq!(slug("\"CreatedAt\""), "createdat");
    }

    #[test]
    fn test_long_names_are_deterministic() {
        let label = "a_very_long_column_name_that_goes_on_and_on_and_on_forever";
        let first = index_name("some_table", label, IndexMethod::Btree);
        let second = index_name("some_table", label, IndexMethod::Btree);

        assert_eq!(first, second);
        assert!(first.len() <= MAX_NAME_LEN);
        assert!(first.starts_with("idx_some_table_a_very_long"));
        assert_ne!(first, index_name("some_table", label, IndexMethod::Hash));
    }
}
