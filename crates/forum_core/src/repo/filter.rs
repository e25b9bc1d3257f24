//! Typed predicates and lazy queries over one entity table.
//!
//! # Responsibility
//! - Compose caller predicates into parameterized SQL.
//! - Reject malformed predicates before any store I/O.
//!
//! # Invariants
//! - Column names never reach SQL unless they belong to the entity table.
//! - Values are always bound, never interpolated.
//! - Every query AND-combines `is_deleted = 0` unless `including_deleted()`.

use super::select_columns;
use crate::error::{PersistenceError, PersistenceResult};
use crate::model::audit::AUDIT_COLUMNS;
use crate::model::entity::{Entity, IntoValue};
use crate::session::SharedSession;
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Predicate over entity columns.
///
/// Building a filter never fails; it is checked against the entity's
/// columns when handed to `Repository::query`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn all() -> Self {
        Self::All
    }

    pub fn eq(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl IntoValue) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// SQLite `LIKE` (ASCII case-insensitive, `%` and `_` wildcards).
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(column, CompareOp::Like, pattern.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn in_list<V: IntoValue>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(IntoValue::into_value).collect(),
        }
    }

    /// Conjunction of every filter in `filters`.
    pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Disjunction of every filter in `filters`.
    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            current => Self::And(vec![current, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            current => Self::Or(vec![current, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn compare(column: impl Into<String>, op: CompareOp, value: impl IntoValue) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into_value(),
        }
    }

    /// Renders this filter as a parenthesized SQL fragment for `T`.
    fn compile<T: Entity>(&self, sql: &mut String, binds: &mut Vec<Value>) -> PersistenceResult<()> {
        match self {
            Self::All => sql.push_str("1 = 1"),
            Self::Compare { column, op, value } => {
                let column = resolve_column::<T>(column)?;
                if matches!(value, Value::Null) {
                    return Err(PersistenceError::InvalidQuery(format!(
                        "comparison against NULL on `{column}`; use is_null/is_not_null"
                    )));
                }
                if *op == CompareOp::Like && !matches!(value, Value::Text(pattern) if !pattern.is_empty())
                {
                    return Err(PersistenceError::InvalidQuery(format!(
                        "LIKE on `{column}` requires a non-empty text pattern"
                    )));
                }
                binds.push(value.clone());
                sql.push_str(&format!("{column} {} ?{}", op.as_sql(), binds.len()));
            }
            Self::IsNull { column, negated } => {
                let column = resolve_column::<T>(column)?;
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
                sql.push_str(&format!("{column} {test}"));
            }
            Self::In { column, values } => {
                let column = resolve_column::<T>(column)?;
                if values.is_empty() {
                    return Err(PersistenceError::InvalidQuery(format!(
                        "IN list on `{column}` must not be empty"
                    )));
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    binds.push(value.clone());
                    placeholders.push(format!("?{}", binds.len()));
                }
                sql.push_str(&format!("{column} IN ({})", placeholders.join(", ")));
            }
            Self::And(filters) | Self::Or(filters) => {
                if filters.is_empty() {
                    return Err(PersistenceError::InvalidQuery(
                        "empty and/or group".to_string(),
                    ));
                }
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                for (index, filter) in filters.iter().enumerate() {
                    if index > 0 {
                        sql.push_str(joiner);
                    }
                    sql.push('(');
                    filter.compile::<T>(sql, binds)?;
                    sql.push(')');
                }
            }
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.compile::<T>(sql, binds)?;
                sql.push(')');
            }
        }
        Ok(())
    }
}

/// Maps a caller column name onto the entity's static column list.
fn resolve_column<T: Entity>(column: &str) -> PersistenceResult<&'static str> {
    AUDIT_COLUMNS
        .iter()
        .chain(T::COLUMNS.iter())
        .copied()
        .find(|known| *known == column)
        .ok_or_else(|| {
            PersistenceError::InvalidQuery(format!("unknown column `{column}` on `{}`", T::TABLE))
        })
}

/// Lazy, restartable query. Every terminal call re-reads the store.
pub struct Query<T> {
    session: SharedSession,
    predicate: String,
    binds: Vec<Value>,
    include_deleted: bool,
    ordering: Vec<(&'static str, Order)>,
    limit: Option<u32>,
    offset: u32,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Query<T> {
    pub(crate) fn new(session: SharedSession, filter: &Filter) -> PersistenceResult<Self> {
        let mut predicate = String::new();
        let mut binds = Vec::new();
        filter.compile::<T>(&mut predicate, &mut binds)?;
        Ok(Self {
            session,
            predicate,
            binds,
            include_deleted: false,
            ordering: Vec::new(),
            limit: None,
            offset: 0,
            _entity: PhantomData,
        })
    }

    /// Drops the default `is_deleted = 0` constraint.
    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> PersistenceResult<Self> {
        let column = resolve_column::<T>(column)?;
        self.ordering.push((column, order));
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn fetch(&self) -> PersistenceResult<Vec<T>> {
        let sql = format!(
            "SELECT {} FROM {}{}",
            select_columns::<T>(),
            T::TABLE,
            self.tail_sql()
        );
        let session = self.session.lock();
        let conn = session.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(self.binds.iter()))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(T::from_row(row)?);
        }
        Ok(entities)
    }

    pub fn first(&self) -> PersistenceResult<Option<T>> {
        let mut first = self.clone();
        first.limit = Some(self.limit.map_or(1, |limit| limit.min(1)));
        Ok(first.fetch()?.into_iter().next())
    }

    /// Number of rows `fetch` would return right now.
    pub fn count(&self) -> PersistenceResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT id FROM {}{});",
            T::TABLE,
            self.tail_sql()
        );
        let session = self.session.lock();
        let conn = session.connection()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(self.binds.iter()), |row| {
            row.get(0)
        })?;
        u64::try_from(count)
            .map_err(|_| PersistenceError::InvalidData(format!("negative row count `{count}`")))
    }

    /// WHERE, ORDER BY and LIMIT clauses shared by every terminal call.
    fn tail_sql(&self) -> String {
        let mut sql = format!(" WHERE ({})", self.predicate);
        if !self.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }

        let mut ordering: Vec<String> = self
            .ordering
            .iter()
            .map(|(column, order)| format!("{column} {}", order.as_sql()))
            .collect();
        if !self.ordering.iter().any(|(column, _)| *column == "id") {
            ordering.push("id ASC".to_string());
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&ordering.join(", "));

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if self.offset > 0 {
                sql.push_str(&format!(" OFFSET {}", self.offset));
            }
        } else if self.offset > 0 {
            sql.push_str(&format!(" LIMIT -1 OFFSET {}", self.offset));
        }
        sql
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            predicate: self.predicate.clone(),
            binds: self.binds.clone(),
            include_deleted: self.include_deleted,
            ordering: self.ordering.clone(),
            limit: self.limit,
            offset: self.offset,
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("predicate", &self.predicate)
            .field("binds", &self.binds.len())
            .field("include_deleted", &self.include_deleted)
            .field("ordering", &self.ordering)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish()
    }
}
