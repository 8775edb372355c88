//! Zero-row probe query construction.
//!
//! A probe embeds expressions into
//!
//! ```sql
//! SELECT <expr> AS "__PROBE_0", ... FROM <relation> WHERE 1 = 0
//! ```
//!
//! and the assembled text is re-parsed before it leaves this module: it
//! must be exactly one SELECT with no INTO and the always-false filter.
//! Anything else is refused here, whatever the validator decided earlier.

use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::{
    Dialect, DuckDbDialect, MsSqlDialect, PostgreSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use super::ProbeError;
use crate::catalog::SourceRelation;
use crate::config::Driver;

/// Alias prefix for probe projections.
pub const PROBE_ALIAS_PREFIX: &str = "__PROBE_";

const FALSE_PREDICATE: &str = "1 = 0";

/// A guarded, zero-row probe statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeQuery {
    sql: String,
    driver: Driver,
    projections: usize,
}

impl ProbeQuery {
    /// Build a probe selecting every expression from `relation`.
    pub fn zero_row<'a>(
        relation: &SourceRelation,
        driver: Driver,
        expressions: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ProbeError> {
        let projections: Vec<String> = expressions
            .into_iter()
            .enumerate()
            .map(|(i, expr)| {
                let alias = driver.quote_identifier(&format!("{PROBE_ALIAS_PREFIX}{i}"));
                format!("({expr}) AS {alias}")
            })
            .collect();

        if projections.is_empty() {
            return Err(ProbeError::Unsafe("probe has no expressions".to_string()));
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE {FALSE_PREDICATE}",
            projections.join(", "),
            relation.quoted(driver)
        );

        let query = Self {
            sql,
            driver,
            projections: projections.len(),
        };
        query.check_shape()?;
        Ok(query)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    pub fn projections(&self) -> usize {
        self.projections
    }

    fn check_shape(&self) -> Result<(), ProbeError> {
        let dialect = dialect_for(self.driver);
        let statements = Parser::parse_sql(dialect.as_ref(), &self.sql)
            .map_err(|e| ProbeError::Unsafe(format!("probe does not parse: {e}")))?;

        let [Statement::Query(query)] = statements.as_slice() else {
            return Err(ProbeError::Unsafe(format!(
                "probe must be a single SELECT, found {} statement(s)",
                statements.len()
            )));
        };

        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(ProbeError::Unsafe("probe body must be a plain SELECT".to_string()));
        };

        if select.into.is_some() {
            return Err(ProbeError::Unsafe("probe must not SELECT INTO".to_string()));
        }
        if select.projection.len() != self.projections {
            return Err(ProbeError::Unsafe(format!(
                "probe has {} projections, expected {}",
                select.projection.len(),
                self.projections
            )));
        }
        match &select.selection {
            Some(predicate) if predicate.to_string() == FALSE_PREDICATE => Ok(()),
            _ => Err(ProbeError::Unsafe(
                "probe must filter with an always-false predicate".to_string(),
            )),
        }
    }
}

fn dialect_for(driver: Driver) -> Box<dyn Dialect> {
    match driver {
        Driver::MsSql => Box::new(MsSqlDialect {}),
        Driver::DuckDb => Box::new(DuckDbDialect {}),
        Driver::Postgres => Box::new(PostgreSqlDialect {}),
        Driver::Snowflake => Box::new(SnowflakeDialect {}),
    }
}
