//! Heuristic chunk planning.
//!
//! A table is split into disjoint row ranges over a single indexed column so
//! that several workers can dump it concurrently. The chosen key is the
//! leading column of the primary key, then of the first unique index, then
//! (policy permitting) of the highest-cardinality index. Only integer keys
//! are supported; anything else falls back to a single unchunked job.

use anyhow::Error;
use log::warn;
use mysql::consts::ColumnType;
use mysql::prelude::Queryable;
use mysql::{Conn, Row};

use super::sql::{escape, row_text, row_text_by_name};
use crate::config::DumpConfig;

/// One row of `SHOW INDEX`, reduced to the columns the planner reads.
#[derive(Debug)]
pub struct IndexRow {
    pub index_name: String,
    pub non_unique: bool,
    pub seq_in_index: u64,
    pub column_name: String,
    pub cardinality: Option<u64>,
}

impl IndexRow {
    /// `SHOW INDEX` column positions are stable across server versions:
    /// Non_unique 1, Key_name 2, Seq_in_index 3, Column_name 4,
    /// Cardinality 6.
    fn from_row(row: &Row) -> Self {
        Self {
            non_unique: row_text(row, 1).map_or(false, |v| v == "1"),
            index_name: row_text(row, 2).unwrap_or_default(),
            seq_in_index: row_text(row, 3).and_then(|v| v.parse().ok()).unwrap_or(0),
            column_name: row_text(row, 4).unwrap_or_default(),
            cardinality: row_text(row, 6).and_then(|v| v.parse().ok()),
        }
    }

    fn is_leading(&self) -> bool {
        self.seq_in_index == 1
    }
}

/// Pick the chunking key: PRIMARY first, then the first unique index, then
/// the highest-cardinality index if the policy allows any index at all.
/// Only leading index columns qualify.
pub fn choose_chunk_key(rows: &[IndexRow], use_any_index: bool) -> Option<&str> {
    for row in rows {
        if row.is_leading() && row.index_name == "PRIMARY" {
            return Some(&row.column_name);
        }
    }

    for row in rows {
        if row.is_leading() && !row.non_unique {
            return Some(&row.column_name);
        }
    }

    if use_any_index {
        let mut field = None;
        let mut max_cardinality = 0;
        for row in rows {
            if !row.is_leading() {
                continue;
            }
            let cardinality = row.cardinality.unwrap_or(0);
            if cardinality > max_cardinality {
                max_cardinality = cardinality;
                field = Some(row.column_name.as_str());
            }
        }
        return field;
    }

    None
}

/// Build the range predicates for an integer key. The first predicate also
/// matches NULL keys; the disjunction is parenthesised so the predicate can
/// be AND-ed into a larger expression safely.
pub fn integer_chunk_predicates(
    key: &str,
    min: i64,
    max: i64,
    estimated_rows: u64,
    rows_per_chunk: u64,
) -> Vec<String> {
    let chunk_count = (estimated_rows / rows_per_chunk).max(1);
    let step = ((max as i128 - min as i128) / chunk_count as i128 + 1).min(i64::MAX as i128) as i64;

    let mut predicates = Vec::new();
    let mut cutoff = min;
    while cutoff <= max {
        let upper = cutoff.saturating_add(step);
        if predicates.is_empty() {
            predicates.push(format!(
                "(`{key}` IS NULL OR (`{key}` >= {cutoff} AND `{key}` < {upper}))",
                key = key,
                cutoff = cutoff,
                upper = upper
            ));
        } else {
            predicates.push(format!(
                "(`{key}` >= {cutoff} AND `{key}` < {upper})",
                key = key,
                cutoff = cutoff,
                upper = upper
            ));
        }
        if upper <= cutoff {
            break;
        }
        cutoff = upper;
    }
    predicates
}

pub(crate) fn build_estimate_query(
    database: &str,
    table: &str,
    key: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> String {
    let base = format!("EXPLAIN SELECT `{}` FROM `{}`.`{}`", key, database, table);
    if from.is_none() && to.is_none() {
        return base;
    }

    let mut clauses = Vec::new();
    if let Some(from) = from {
        let escaped = String::from_utf8_lossy(&escape(from.as_bytes())).into_owned();
        clauses.push(format!("`{}` >= \"{}\"", key, escaped));
    }
    if let Some(to) = to {
        let escaped = String::from_utf8_lossy(&escape(to.as_bytes())).into_owned();
        clauses.push(format!("`{}` <= \"{}\"", key, escaped));
    }
    format!("{} WHERE {}", base, clauses.join(" AND "))
}

/// EXPLAIN-based row estimate, optionally bounded to a key range. The `rows`
/// column is located by name; its position moves between server versions.
pub fn estimate_rows(
    conn: &mut Conn,
    database: &str,
    table: &str,
    key: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<u64, Error> {
    let query = build_estimate_query(database, table, key, from, to);
    let row: Option<Row> = conn.query_first(query)?;
    let count = row
        .as_ref()
        .and_then(|row| row_text_by_name(row, "rows"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    Ok(count)
}

/// Plan the chunk predicates for one table. An empty result means the table
/// is dumped as a single job: no usable index, non-integer key, missing
/// bounds, or an estimate small enough to not bother.
pub fn plan_table_chunks(
    conn: &mut Conn,
    database: &str,
    table: &str,
    config: &DumpConfig,
) -> Result<Vec<String>, Error> {
    if config.rows_per_chunk == 0 {
        return Ok(Vec::new());
    }

    let mut index_rows = Vec::new();
    let result = conn.query_iter(format!("SHOW INDEX FROM `{}`.`{}`", database, table))?;
    for row in result {
        index_rows.push(IndexRow::from_row(&row?));
    }

    let key = match choose_chunk_key(&index_rows, config.use_any_index) {
        Some(key) => key.to_string(),
        None => return Ok(Vec::new()),
    };

    let minmax: Option<Row> = conn.query_first(format!(
        "SELECT MIN(`{key}`),MAX(`{key}`) FROM `{db}`.`{table}`",
        key = key,
        db = database,
        table = table
    ))?;
    let minmax = match minmax {
        Some(row) => row,
        None => return Ok(Vec::new()),
    };

    // Integer keys only; the MIN() result carries the column type.
    match minmax.columns_ref()[0].column_type() {
        ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_INT24 => {}
        other => {
            warn!(
                "not chunking {}.{}: key `{}` has unsupported type {:?}",
                database, table, key, other
            );
            return Ok(Vec::new());
        }
    }

    let min = row_text(&minmax, 0).and_then(|v| v.parse::<i64>().ok());
    let max = row_text(&minmax, 1).and_then(|v| v.parse::<i64>().ok());
    let (min, max) = match (min, max) {
        (Some(min), Some(max)) => (min, max),
        // MIN/MAX come back NULL for an empty table.
        _ => return Ok(Vec::new()),
    };

    let estimated_rows = estimate_rows(conn, database, table, &key, None, None)?;
    if estimated_rows <= config.rows_per_chunk {
        return Ok(Vec::new());
    }

    Ok(integer_chunk_predicates(
        &key,
        min,
        max,
        estimated_rows,
        config.rows_per_chunk,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_row(
        index_name: &str,
        non_unique: bool,
        seq_in_index: u64,
        column_name: &str,
        cardinality: Option<u64>,
    ) -> IndexRow {
        IndexRow {
            index_name: index_name.to_string(),
            non_unique,
            seq_in_index,
            column_name: column_name.to_string(),
            cardinality,
        }
    }

    #[test]
    fn test_primary_key_wins() {
        let rows = vec![
            index_row("by_name", true, 1, "name", Some(5000)),
            index_row("PRIMARY", false, 1, "id", Some(100)),
        ];
        assert_eq!(choose_chunk_key(&rows, true), Some("id"));
    }

    #[test]
    fn test_primary_key_only_via_leading_column() {
        // The second column of a composite PK must not be picked.
        let rows = vec![
            index_row("PRIMARY", false, 2, "sub_id", Some(100)),
            index_row("uniq_email", false, 1, "email", Some(90)),
        ];
        assert_eq!(choose_chunk_key(&rows, true), Some("email"));
    }

    #[test]
    fn test_first_unique_index_beats_cardinality() {
        let rows = vec![
            index_row("by_name", true, 1, "name", Some(5000)),
            index_row("uniq_a", false, 1, "a", Some(10)),
            index_row("uniq_b", false, 1, "b", Some(9000)),
        ];
        assert_eq!(choose_chunk_key(&rows, true), Some("a"));
    }

    #[test]
    fn test_any_index_picks_first_highest_cardinality() {
        let rows = vec![
            index_row("idx_a", true, 1, "a", Some(10)),
            index_row("idx_b", true, 1, "b", Some(500)),
            index_row("idx_c", true, 1, "c", Some(500)),
            index_row("idx_d", true, 1, "d", None),
        ];
        assert_eq!(choose_chunk_key(&rows, true), Some("b"));
        assert_eq!(choose_chunk_key(&rows, false), None);
    }

    #[test]
    fn test_no_candidates() {
        assert_eq!(choose_chunk_key(&[], true), None);
        let rows = vec![index_row("idx_a", true, 2, "a", Some(10))];
        assert_eq!(choose_chunk_key(&rows, true), None);
    }

    #[test]
    fn test_predicates_cover_range_disjointly() {
        let predicates = integer_chunk_predicates("id", 1, 1000, 1000, 100);
        assert_eq!(predicates.len(), 10);
        assert_eq!(
            predicates[0],
            "(`id` IS NULL OR (`id` >= 1 AND `id` < 101))"
        );
        assert_eq!(predicates[1], "(`id` >= 101 AND `id` < 201)");
        assert_eq!(predicates[9], "(`id` >= 901 AND `id` < 1001)");
        // NULL handling appears exactly once.
        let nulls = predicates.iter().filter(|p| p.contains("IS NULL")).count();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn test_predicate_ranges_are_contiguous() {
        let predicates = integer_chunk_predicates("k", -50, 49, 700, 100);
        // Every chunk's upper bound is the next chunk's lower bound.
        let bounds: Vec<(i64, i64)> = predicates
            .iter()
            .map(|p| {
                let lo = p.split(">= ").nth(1).unwrap();
                let lo: i64 = lo.split(' ').next().unwrap().parse().unwrap();
                let hi = p.split("< ").nth(1).unwrap();
                let hi: i64 = hi.trim_end_matches("))").trim_end_matches(')').parse().unwrap();
                (lo, hi)
            })
            .collect();
        assert_eq!(bounds[0].0, -50);
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert!(bounds.last().unwrap().1 > 49);
    }

    #[test]
    fn test_single_chunk_estimate() {
        // estimate barely above the target still yields one chunk of the
        // whole range.
        let predicates = integer_chunk_predicates("id", 1, 10, 101, 100);
        assert_eq!(predicates.len(), 1);
        assert!(predicates[0].contains("IS NULL"));
    }

    #[test]
    fn test_build_estimate_query_unbounded() {
        assert_eq!(
            build_estimate_query("db", "t", "id", None, None),
            "EXPLAIN SELECT `id` FROM `db`.`t`"
        );
    }

    #[test]
    fn test_build_estimate_query_escapes_each_bound_with_its_own_value() {
        let query = build_estimate_query("db", "t", "id", Some("a\"b"), Some("z'x"));
        assert_eq!(
            query,
            "EXPLAIN SELECT `id` FROM `db`.`t` WHERE `id` >= \"a\\\"b\" AND `id` <= \"z\\'x\""
        );
    }

    #[test]
    fn test_build_estimate_query_single_bound() {
        assert_eq!(
            build_estimate_query("db", "t", "id", None, Some("9")),
            "EXPLAIN SELECT `id` FROM `db`.`t` WHERE `id` <= \"9\""
        );
    }
}
