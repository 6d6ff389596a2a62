//! Translating operations into engine mutations.

use roomdb_protocol::{OpPayload, Operation, Scalar};
use roomdb_storage::{SqlEngine, SqlValue, StorageResult};
use std::collections::BTreeMap;
use tracing::warn;

/// Converts a wire scalar into an engine bind value.
pub(crate) fn bind_value(scalar: &Scalar) -> SqlValue {
    match scalar {
        Scalar::Null => SqlValue::Null,
        Scalar::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Scalar::Integer(i) => SqlValue::Integer(*i),
        Scalar::Real(r) => SqlValue::Real(*r),
        Scalar::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn predicate_clause(
    predicate: &BTreeMap<String, Scalar>,
    first_param: usize,
    params: &mut Vec<SqlValue>,
) -> String {
    if predicate.is_empty() {
        return String::new();
    }

    let clauses: Vec<String> = predicate
        .iter()
        .enumerate()
        .map(|(i, (column, value))| {
            params.push(bind_value(value));
            format!("{} = ?{}", quote_ident(column), first_param + i)
        })
        .collect();

    format!(" WHERE {}", clauses.join(" AND "))
}

/// Applies an operation to the engine, returning rows changed.
///
/// The generated SQL is deterministic for a given operation (column maps
/// are ordered), and the operation itself is never mutated, so replaying
/// the same operation on the same engine state yields the same result.
/// Inserts use `INSERT OR REPLACE`, making replays idempotent.
pub fn apply(engine: &dyn SqlEngine, op: &Operation) -> StorageResult<usize> {
    match &op.payload {
        OpPayload::Insert { columns } => {
            if columns.is_empty() {
                let sql = format!("INSERT OR REPLACE INTO {} DEFAULT VALUES", quote_ident(&op.table));
                return engine.execute(&sql, &[]);
            }

            let names: Vec<String> = columns.keys().map(|c| quote_ident(c)).collect();
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
            let params: Vec<SqlValue> = columns.values().map(bind_value).collect();

            let sql = format!(
                "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                quote_ident(&op.table),
                names.join(", "),
                placeholders.join(", "),
            );
            engine.execute(&sql, &params)
        }
        OpPayload::Update { set, predicate } => {
            if set.is_empty() {
                return Ok(0);
            }

            let mut params: Vec<SqlValue> = Vec::with_capacity(set.len() + predicate.len());
            let assignments: Vec<String> = set
                .iter()
                .enumerate()
                .map(|(i, (column, value))| {
                    params.push(bind_value(value));
                    format!("{} = ?{}", quote_ident(column), i + 1)
                })
                .collect();

            let where_clause = predicate_clause(predicate, set.len() + 1, &mut params);
            let sql = format!(
                "UPDATE {} SET {}{}",
                quote_ident(&op.table),
                assignments.join(", "),
                where_clause,
            );
            engine.execute(&sql, &params)
        }
        OpPayload::Delete { predicate } => {
            let mut params: Vec<SqlValue> = Vec::with_capacity(predicate.len());
            let where_clause = predicate_clause(predicate, 1, &mut params);
            let sql = format!("DELETE FROM {}{}", quote_ident(&op.table), where_clause);
            engine.execute(&sql, &params)
        }
    }
}

/// Applies an operation, logging and swallowing failures.
///
/// Used on the reconciler path: a remote operation may reference schema
/// this client has not created yet, and a failed apply must not stall
/// confirmation of the sequence.
pub fn apply_best_effort(engine: &dyn SqlEngine, op: &Operation) {
    if let Err(e) = apply(engine, op) {
        warn!(
            op_id = %op.id,
            table = %op.table,
            kind = op.kind().as_str(),
            error = %e,
            "apply failed; skipping operation"
        );
    }
}
