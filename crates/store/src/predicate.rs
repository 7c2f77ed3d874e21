//! Safe predicate layer (C2, §4.2): compiles the grammar's `Expr` AST into
//! (a) a Lance-native filter string pushed down through `only_if`/`delete`,
//! plus (b) an in-memory residual evaluator applied to a projected,
//! blob-excluded scan, working around the known `>`/`>=` bug on
//! blob-bearing tables without sacrificing pushdown in the safe cases.
//!
//! This dataset has exactly one schema and it always carries a blob column
//! (`raw_data`), so "does this table have a blob column" (§4.2 step 1) is
//! always true here — the only question is whether the predicate itself is
//! safe. A second, schema-specific hazard is the same shape as the known
//! bug: nested `relationships.*`/`custom_metadata.*` access is a row-wise
//! any-of test over a `List<Struct>` column that this engine does not trust
//! to the native predicate engine at all (see DESIGN.md) — those idents are
//! always routed to the in-memory evaluator, regardless of operator.

use contextframe_core::{CmpOp, Error, Expr, Literal, like_match};

use crate::codec::{batch_to_record, get_optional_string};
use arrow_array::RecordBatch;

/// The result of splitting a predicate (§4.2 steps 1-3).
#[derive(Debug, Clone)]
pub struct SplitPredicate {
  /// Lance filter string for the safe conjunctive prefix, `None` meaning
  /// "no native filter — scan everything and rely entirely on the residual".
  pub safe_filter: Option<String>,
  /// Sub-expressions that must be evaluated in-memory after the safe prefix
  /// has narrowed the candidate set. Empty means full pushdown.
  pub residual: Vec<Expr>,
}

fn is_nested_ident(ident: &str) -> bool {
  ident.starts_with("relationships.") || ident.starts_with("custom_metadata.")
}

/// Does `expr` contain an operator or ident this engine refuses to push
/// down to the native predicate engine?
fn is_unsafe(expr: &Expr) -> bool {
  match expr {
    Expr::Cmp { ident, op, .. } => is_nested_ident(ident) || matches!(op, CmpOp::Gt | CmpOp::Ge),
    Expr::In { ident, .. } | Expr::Like { ident, .. } | Expr::Contains { ident, .. } | Expr::NullCheck { ident, .. } => {
      is_nested_ident(ident)
    }
    Expr::And(l, r) | Expr::Or(l, r) => is_unsafe(l) || is_unsafe(r),
    Expr::Not(e) => is_unsafe(e),
  }
}

/// Flatten top-level `AND` nodes into their conjuncts; `OR`/`NOT`/leaves are
/// atomic for the purposes of the safe-prefix split (§4.2: "the safe
/// conjunctive prefix").
fn flatten_and(expr: Expr, out: &mut Vec<Expr>) {
  match expr {
    Expr::And(l, r) => {
      flatten_and(*l, out);
      flatten_and(*r, out);
    }
    other => out.push(other),
  }
}

fn literal_sql(lit: &Literal) -> String {
  match lit {
    Literal::Str(s) => format!("'{}'", s.replace('\'', "''")),
    Literal::Num(n) => {
      if n.fract() == 0.0 {
        format!("{}", *n as i64)
      } else {
        n.to_string()
      }
    }
    Literal::Bool(b) => b.to_string(),
    Literal::Null => "NULL".to_string(),
  }
}

fn cmp_op_sql(op: CmpOp) -> &'static str {
  match op {
    CmpOp::Eq => "=",
    CmpOp::Ne => "!=",
    CmpOp::Gt => ">",
    CmpOp::Ge => ">=",
    CmpOp::Lt => "<",
    CmpOp::Le => "<=",
  }
}

/// Compile an expression known to contain no unsafe leaf into a Lance
/// filter string (`only_if`/`delete` accept this directly).
fn compile_safe(expr: &Expr) -> Result<String, Error> {
  Ok(match expr {
    Expr::Cmp { ident, op, value } => format!("{} {} {}", ident, cmp_op_sql(*op), literal_sql(value)),
    Expr::NullCheck { ident, is_null } => {
      format!("{} IS {}NULL", ident, if *is_null { "" } else { "NOT " })
    }
    Expr::In { ident, values } => {
      let vals = values.iter().map(literal_sql).collect::<Vec<_>>().join(", ");
      format!("{} IN ({})", ident, vals)
    }
    Expr::Like { ident, pattern } => format!("{} LIKE '{}'", ident, pattern.replace('\'', "''")),
    Expr::Contains { ident, value } => format!("array_has({}, {})", ident, literal_sql(value)),
    Expr::And(l, r) => format!("({}) AND ({})", compile_safe(l)?, compile_safe(r)?),
    Expr::Or(l, r) => format!("({}) OR ({})", compile_safe(l)?, compile_safe(r)?),
    Expr::Not(e) => format!("NOT ({})", compile_safe(e)?),
  })
}

/// Split a parsed predicate into a pushdown-safe prefix and an in-memory
/// residual (§4.2 algorithm). Always correct: the residual list is empty
/// exactly when the whole predicate was safe to push down.
pub fn split(expr: Expr) -> Result<SplitPredicate, Error> {
  let mut conjuncts = Vec::new();
  flatten_and(expr, &mut conjuncts);

  let mut safe_parts = Vec::new();
  let mut residual = Vec::new();

  for conjunct in conjuncts {
    if is_unsafe(&conjunct) {
      residual.push(conjunct);
    } else {
      safe_parts.push(conjunct);
    }
  }

  let safe_filter = if safe_parts.is_empty() {
    None
  } else {
    let mut parts = safe_parts.iter();
    let mut sql = compile_safe(parts.next().unwrap())?;
    for p in parts {
      sql = format!("({}) AND ({})", sql, compile_safe(p)?);
    }
    Some(sql)
  };

  Ok(SplitPredicate { safe_filter, residual })
}

/// Compile a predicate for full pushdown, with no safety concerns (used
/// where the caller already knows no blob/nested column is involved, e.g.
/// `count_rows` over `record_type`/`status`). Rejects unsafe predicates
/// rather than silently mis-evaluating them.
pub fn compile_unchecked(expr: &Expr) -> Result<String, Error> {
  compile_safe(expr)
}

/// Evaluate one residual sub-expression against one row of a projected
/// (blob-excluded) batch. This is the in-memory fallback evaluator used for
/// both the residual path and the full-scan fallback path.
pub fn eval(expr: &Expr, batch: &RecordBatch, row: usize) -> Result<bool, Error> {
  Ok(match expr {
    Expr::And(l, r) => eval(l, batch, row)? && eval(r, batch, row)?,
    Expr::Or(l, r) => eval(l, batch, row)? || eval(r, batch, row)?,
    Expr::Not(e) => !eval(e, batch, row)?,
    Expr::NullCheck { ident, is_null } => {
      let is_actually_null = scalar_string(batch, ident, row).is_none() && !is_nested_ident(ident);
      is_actually_null == *is_null
    }
    Expr::Cmp { ident, op, value } => eval_cmp(ident, *op, value, batch, row)?,
    Expr::In { ident, values } => {
      if is_nested_ident(ident) {
        nested_values(batch, ident, row)?
          .iter()
          .any(|v| values.iter().any(|lit| literal_eq_str(lit, v)))
      } else {
        match scalar_string(batch, ident, row) {
          Some(v) => values.iter().any(|lit| literal_eq_str(lit, &v)),
          None => false,
        }
      }
    }
    Expr::Like { ident, pattern } => match scalar_string(batch, ident, row) {
      Some(v) => like_match(&v, pattern),
      None => false,
    },
    Expr::Contains { ident, value } => {
      let needle = literal_as_string(value);
      list_column_values(batch, ident, row)?.iter().any(|v| *v == needle)
    }
  })
}

fn literal_as_string(lit: &Literal) -> String {
  match lit {
    Literal::Str(s) => s.clone(),
    Literal::Num(n) => n.to_string(),
    Literal::Bool(b) => b.to_string(),
    Literal::Null => String::new(),
  }
}

fn literal_eq_str(lit: &Literal, value: &str) -> bool {
  literal_as_string(lit) == value
}

fn eval_cmp(ident: &str, op: CmpOp, value: &Literal, batch: &RecordBatch, row: usize) -> Result<bool, Error> {
  if is_nested_ident(ident) {
    let values = nested_values(batch, ident, row)?;
    return Ok(values.iter().any(|v| compare_str(v, op, &literal_as_string(value))));
  }
  match scalar_string(batch, ident, row) {
    Some(v) => Ok(compare_str(&v, op, &literal_as_string(value))),
    None => Ok(false), // null propagates as false through comparisons (§6.1)
  }
}

fn compare_str(lhs: &str, op: CmpOp, rhs: &str) -> bool {
  // Numeric comparison when both sides parse as f64 (custom_metadata values
  // and most scalar columns in this schema are stringly-typed numbers),
  // otherwise lexicographic string comparison.
  if let (Ok(a), Ok(b)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) {
    return match op {
      CmpOp::Eq => a == b,
      CmpOp::Ne => a != b,
      CmpOp::Gt => a > b,
      CmpOp::Ge => a >= b,
      CmpOp::Lt => a < b,
      CmpOp::Le => a <= b,
    };
  }
  match op {
    CmpOp::Eq => lhs == rhs,
    CmpOp::Ne => lhs != rhs,
    CmpOp::Gt => lhs > rhs,
    CmpOp::Ge => lhs >= rhs,
    CmpOp::Lt => lhs < rhs,
    CmpOp::Le => lhs <= rhs,
  }
}

/// Read a top-level scalar column as a string, covering the ident names
/// this engine's predicate grammar is ever evaluated against directly.
/// Numeric/date literals arrive as strings too since every comparable
/// scalar column in this schema is `Utf8` except the `Int64` timestamp
/// pair, which is read through `get_optional_i64` and stringified.
fn scalar_string(batch: &RecordBatch, ident: &str, row: usize) -> Option<String> {
  if let Some(v) = get_optional_string(batch, ident, row) {
    return Some(v);
  }
  crate::codec::get_optional_i64(batch, ident, row).map(|v| v.to_string())
}

fn list_column_values(batch: &RecordBatch, ident: &str, row: usize) -> Result<Vec<String>, Error> {
  let record = batch_to_record(batch, row).map_err(|e| Error::UnsupportedPredicate(e.to_string()))?;
  Ok(match ident {
    "tags" => record.tags,
    "contributors" => record.contributors,
    other => return Err(Error::UnsupportedPredicate(format!("`.contains()` is not supported on `{}`", other))),
  })
}

/// Row-wise any-of values for a nested `relationships.*`/`custom_metadata.*`
/// ident (§6.1: "a row-wise any-of predicate over the list-of-struct").
fn nested_values(batch: &RecordBatch, ident: &str, row: usize) -> Result<Vec<String>, Error> {
  let record = batch_to_record(batch, row).map_err(|e| Error::UnsupportedPredicate(e.to_string()))?;
  let (column, field) = ident
    .split_once('.')
    .ok_or_else(|| Error::UnknownColumn(ident.to_string()))?;

  Ok(match (column, field) {
    ("relationships", "type") => record.relationships.iter().map(|r| r.relationship_type.as_str().to_string()).collect(),
    ("relationships", "id") => record.relationships.iter().filter_map(|r| r.id.clone()).collect(),
    ("relationships", "uri") => record.relationships.iter().filter_map(|r| r.uri.clone()).collect(),
    ("relationships", "path") => record.relationships.iter().filter_map(|r| r.path.clone()).collect(),
    ("relationships", "cid") => record.relationships.iter().filter_map(|r| r.cid.clone()).collect(),
    ("relationships", "title") => record.relationships.iter().filter_map(|r| r.title.clone()).collect(),
    ("custom_metadata", "key") => record.custom_metadata.keys().cloned().collect(),
    ("custom_metadata", "value") => record.custom_metadata.values().cloned().collect(),
    _ => return Err(Error::UnknownColumn(ident.to_string())),
  })
}
