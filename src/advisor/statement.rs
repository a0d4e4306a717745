//! `CREATE INDEX` statement handling
//!
//! Stored index statements are plain text. The index name is always the
//! third whitespace-separated token, which is what eviction relies on.

use crate::error::{AdimError, AdimResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::fmt;

/// Index access method of a generated candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexMethod {
    Hash,
    Btree,
}

impl IndexMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMethod::Hash => "hash",
            IndexMethod::Btree => "btree",
        }
    }
}

impl fmt::Display for IndexMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A syntactically valid `CREATE INDEX <name> ON <table> ...` statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreateIndexStatement {
    text: String,
    name: String,
    table: String,
}

impl CreateIndexStatement {
    /// Build a generated candidate
    pub fn generated(name: &str, table: &str, method: IndexMethod, key: &str) -> Self {
        Self {
            text: format!(
                "CREATE INDEX {} ON {} USING {} ({});",
                name, table, method, key
            ),
            name: name.to_string(),
            table: table.to_string(),
        }
    }

    /// Validate operator-supplied text
    pub fn parse(text: &str) -> AdimResult<Self> {
        let text = text.trim();
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let prefix_ok = tokens.len() >= 5
            && tokens[0].eq_ignore_ascii_case("CREATE")
            && tokens[1].eq_ignore_ascii_case("INDEX");
        if !prefix_ok {
            return Err(AdimError::InvalidIndexStatement(format!(
                "expected `CREATE INDEX <name> ON <table> ...`, got {:?}",
                text
            )));
        }

        let name = tokens[2].trim_end_matches(';');
        if ["on", "if", "concurrently"]
            .iter()
            .any(|kw| name.eq_ignore_ascii_case(kw))
        {
            return Err(AdimError::InvalidIndexStatement(format!(
                "the index name must directly follow CREATE INDEX in {:?}",
                text
            )));
        }
        if !tokens[3].eq_ignore_ascii_case("ON") {
            return Err(AdimError::InvalidIndexStatement(format!(
                "expected ON after the index name in {:?}",
                text
            )));
        }

        let statements = Parser::parse_sql(&PostgreSqlDialect {}, text)
            .map_err(|e| AdimError::InvalidIndexStatement(format!("{}: {}", text, e)))?;

        match statements.as_slice() {
            [Statement::CreateIndex(create)] => Ok(Self {
                text: text.to_string(),
                name: name.to_string(),
                table: create.table_name.to_string(),
            }),
            _ => Err(AdimError::InvalidIndexStatement(format!(
                "not a single CREATE INDEX statement: {:?}",
                text
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn drop_statement(&self) -> String {
        drop_statement(&self.name)
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for CreateIndexStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Index name of a stored statement (its third token)
pub fn index_name(statement: &str) -> Option<&str> {
    statement
        .split_whitespace()
        .nth(2)
        .map(|name| name.trim_end_matches(';'))
        .filter(|name| !name.is_empty())
}

pub fn drop_statement(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", name)
}
