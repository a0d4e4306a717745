//! Query shape extraction
//!
//! Walks every SELECT block of a statement (set operations, CTEs, derived
//! tables and subqueries in expressions) and records, per base table, which
//! columns are filtered on and which expressions drive ORDER BY / GROUP BY.
//!
//! ```text
//! SELECT * FROM orders o WHERE o.status = 'x' ORDER BY o.created_at DESC
//!
//! orders: where_cols  = [status]
//!         order_exprs = [created_at DESC]
//!         where_all_eq = true
//! ```

use crate::error::{AdimError, AdimResult, Stage};
use sqlparser::ast::{
    visit_expressions, visit_expressions_mut, BinaryOperator, Expr, GroupByExpr, Ident,
    OrderByExpr, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;

/// Accumulated usage of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUsage {
    /// Filtered columns, first-seen order, no duplicates
    pub where_cols: Vec<String>,
    pub order_exprs: Vec<String>,
    pub group_exprs: Vec<String>,
    /// False once any filter uses an operator other than `=` or `IN`
    pub where_all_eq: bool,
}

impl Default for TableUsage {
    fn default() -> Self {
        Self {
            where_cols: Vec::new(),
            order_exprs: Vec::new(),
            group_exprs: Vec::new(),
            where_all_eq: true,
        }
    }
}

impl TableUsage {
    fn add_where(&mut self, column: String, equality: bool) {
        if !equality {
            self.where_all_eq = false;
        }
        push_unique(&mut self.where_cols, column);
    }

    pub fn has_sort(&self) -> bool {
        !self.order_exprs.is_empty() || !self.group_exprs.is_empty()
    }

    /// ORDER BY expressions followed by GROUP BY expressions
    pub fn sort_exprs(&self) -> impl Iterator<Item = &String> {
        self.order_exprs.iter().chain(&self.group_exprs)
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Why a column reference could not be attributed to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// Qualifier names no relation of the block
    UnknownQualifier,
    /// Unqualified column with several relations in scope
    Ambiguous,
}

/// A column reference that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionGap {
    pub reference: String,
    pub reason: GapReason,
}

/// Per-table usage of a whole statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryShape {
    pub tables: BTreeMap<String, TableUsage>,
    pub gaps: Vec<ResolutionGap>,
}

impl QueryShape {
    pub fn table(&self, name: &str) -> Option<&TableUsage> {
        self.tables.get(name)
    }
}

/// Parse `sql` and extract its shape
pub fn analyze(sql: &str) -> AdimResult<QueryShape> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| AdimError::parse(Stage::Advisor, None, e.to_string()))?;

    let statement = match statements.as_slice() {
        [statement] => statement,
        [] => return Err(AdimError::parse(Stage::Advisor, None, "empty statement")),
        _ => {
            return Err(AdimError::parse(
                Stage::Advisor,
                None,
                "expected a single statement",
            ))
        }
    };

    let query = match statement {
        Statement::Query(query) => query,
        other => {
            return Err(AdimError::parse(
                Stage::Advisor,
                None,
                format!("not a SELECT statement: {}", first_words(&other.to_string())),
            ))
        }
    };

    let mut builder = ShapeBuilder::default();
    builder.query(query);

    // Subqueries inside expressions are independent blocks
    let mut nested: Vec<Query> = Vec::new();
    let _ = visit_expressions(statement, |expr| {
        match expr {
            Expr::Subquery(q) | Expr::InSubquery { subquery: q, .. } | Expr::Exists { subquery: q, .. } => {
                nested.push((**q).clone())
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
    for query in &nested {
        builder.query(query);
    }

    Ok(builder.finish())
}

fn first_words(text: &str) -> String {
    text.split_whitespace().take(3).collect::<Vec<_>>().join(" ")
}

/// Identifier as PostgreSQL folds it
fn ident_name(ident: &Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnRef {
    qualifier: Option<String>,
    name: String,
}

impl ColumnRef {
    fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Identifier(ident) => Some(Self {
                qualifier: None,
                name: ident_name(ident),
            }),
            Expr::CompoundIdentifier(idents) if idents.len() >= 2 => Some(Self {
                qualifier: Some(ident_name(&idents[idents.len() - 2])),
                name: ident_name(&idents[idents.len() - 1]),
            }),
            Expr::Nested(inner) => Self::from_expr(inner),
            _ => None,
        }
    }

    fn display(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}.{}", q, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Relation {
    Table(String),
    /// Derived table, CTE reference or table function
    Derived,
}

/// Relations visible in one SELECT block, keyed by alias or table name
#[derive(Debug, Default)]
struct Scope {
    relations: Vec<(String, Relation)>,
}

impl Scope {
    fn insert(&mut self, key: String, relation: Relation) {
        if !self.relations.iter().any(|(k, _)| *k == key) {
            self.relations.push((key, relation));
        }
    }

    fn get(&self, key: &str) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, relation)| relation)
    }
}

#[derive(Debug, Default)]
struct ShapeBuilder {
    tables: BTreeMap<String, TableUsage>,
    gaps: Vec<ResolutionGap>,
    cte_names: HashSet<String>,
}

impl ShapeBuilder {
    fn finish(self) -> QueryShape {
        QueryShape {
            tables: self.tables,
            gaps: self.gaps,
        }
    }

    fn usage(&mut self, table: &str) -> &mut TableUsage {
        self.tables.entry(table.to_string()).or_default()
    }

    fn query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(ident_name(&cte.alias.name));
            }
            for cte in &with.cte_tables {
                self.query(&cte.query);
            }
        }

        let order_by: &[OrderByExpr] = query
            .order_by
            .as_ref()
            .map(|o| o.exprs.as_slice())
            .unwrap_or(&[]);
        self.set_expr(&query.body, order_by);
    }

    fn set_expr(&mut self, body: &SetExpr, order_by: &[OrderByExpr]) {
        match body {
            SetExpr::Select(select) => self.select(select, order_by),
            SetExpr::Query(query) => self.query(query),
            // ORDER BY of a set operation sorts the combined result
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, &[]);
                self.set_expr(right, &[]);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select, order_by: &[OrderByExpr]) {
        let mut scope = Scope::default();
        for from in &select.from {
            self.table_with_joins(from, &mut scope);
        }

        if let Some(selection) = &select.selection {
            self.where_expr(&scope, selection);
        }

        for order in order_by {
            if let Some(table) = self.owning_table(&scope, &order.expr) {
                let mut text = render_expr(&order.expr);
                if order.asc == Some(false) {
                    text.push_str(" DESC");
                }
                push_unique(&mut self.usage(&table).order_exprs, text);
            }
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                if let Some(table) = self.owning_table(&scope, expr) {
                    let text = render_expr(expr);
                    push_unique(&mut self.usage(&table).group_exprs, text);
                }
            }
        }
    }

    fn table_with_joins(&mut self, twj: &TableWithJoins, scope: &mut Scope) {
        self.table_factor(&twj.relation, scope);
        for join in &twj.joins {
            self.table_factor(&join.relation, scope);
        }
    }

    fn table_factor(&mut self, factor: &TableFactor, scope: &mut Scope) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let Some(last) = name.0.last() else {
                    return;
                };
                let table = ident_name(last);
                let key = alias
                    .as_ref()
                    .map(|a| ident_name(&a.name))
                    .unwrap_or_else(|| table.clone());

                let relation = if name.0.len() == 1 && self.cte_names.contains(&table) {
                    Relation::Derived
                } else {
                    Relation::Table(table)
                };
                scope.insert(key, relation);
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                self.query(subquery);
                if let Some(alias) = alias {
                    scope.insert(ident_name(&alias.name), Relation::Derived);
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.table_with_joins(table_with_joins, scope),
            other => {
                if let Some(alias) = table_factor_alias(other) {
                    scope.insert(alias, Relation::Derived);
                }
            }
        }
    }

    fn where_expr(&mut self, scope: &Scope, expr: &Expr) {
        match expr {
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And | BinaryOperator::Or => {
                    self.where_expr(scope, left);
                    self.where_expr(scope, right);
                }
                BinaryOperator::Eq => self.comparison(scope, left, Some(right.as_ref()), true),
                BinaryOperator::NotEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq => self.comparison(scope, left, Some(right.as_ref()), false),
                _ => {}
            },
            Expr::Nested(inner) => self.where_expr(scope, inner),
            Expr::UnaryOp { expr, .. } => self.where_expr(scope, expr),
            Expr::InList { expr, .. } | Expr::InSubquery { expr, .. } => {
                self.comparison(scope, expr, None, true)
            }
            _ => {}
        }
    }

    /// Record the column side of a comparison, left side preferred
    fn comparison(&mut self, scope: &Scope, left: &Expr, right: Option<&Expr>, equality: bool) {
        let column = ColumnRef::from_expr(left).or_else(|| right.and_then(ColumnRef::from_expr));
        let Some(column) = column else {
            return;
        };

        if let Some(table) = self.resolve(scope, &column) {
            self.usage(&table).add_where(column.name, equality);
        }
    }

    /// First table any column of `expr` resolves to
    fn owning_table(&mut self, scope: &Scope, expr: &Expr) -> Option<String> {
        let mut columns = Vec::new();
        let _ = visit_expressions(expr, |e| {
            if let Some(column) = ColumnRef::from_expr(e) {
                if !matches!(e, Expr::Nested(_)) {
                    columns.push(column);
                }
            }
            ControlFlow::<()>::Continue(())
        });

        let mut owner = None;
        for column in &columns {
            if let Some(table) = self.resolve(scope, column) {
                owner.get_or_insert(table);
            }
        }
        owner
    }

    fn resolve(&mut self, scope: &Scope, column: &ColumnRef) -> Option<String> {
        let relation = match &column.qualifier {
            Some(qualifier) => match scope.get(qualifier) {
                Some(relation) => relation,
                None => {
                    self.gap(column, GapReason::UnknownQualifier);
                    return None;
                }
            },
            None => match scope.relations.as_slice() {
                [] => return None,
                [(_, relation)] => relation,
                _ => {
                    self.gap(column, GapReason::Ambiguous);
                    return None;
                }
            },
        };

        match relation {
            Relation::Table(table) => Some(table.clone()),
            Relation::Derived => None,
        }
    }

    fn gap(&mut self, column: &ColumnRef, reason: GapReason) {
        let reference = column.display();
        tracing::warn!(
            stage = %Stage::Advisor,
            reference = %reference,
            reason = ?reason,
            "Column reference could not be attributed to a table"
        );
        self.gaps.push(ResolutionGap { reference, reason });
    }
}

fn table_factor_alias(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Function { alias, .. }
        | TableFactor::TableFunction { alias, .. }
        | TableFactor::UNNEST { alias, .. } => alias.as_ref().map(|a| ident_name(&a.name)),
        _ => None,
    }
}

fn fold_ident(mut ident: Ident) -> Ident {
    if ident.quote_style.is_none() {
        ident.value = ident.value.to_lowercase();
    }
    ident
}

/// Expression text with table qualifiers removed and identifiers folded
pub(crate) fn render_expr(expr: &Expr) -> String {
    let mut expr = expr.clone();
    let _ = visit_expressions_mut(&mut expr, |e| {
        if let Expr::CompoundIdentifier(idents) = e {
            if let Some(last) = idents.last().cloned() {
                *e = Expr::Identifier(fold_ident(last));
            }
        } else if let Expr::Identifier(ident) = e {
            *ident = fold_ident(ident.clone());
        }
        ControlFlow::<()>::Continue(())
    });
    expr.to_string()
}
