//! Cache key naming and query fingerprints
//!
//! A query key has the shape `db:<tables>:<hash>`. The table segment lets a
//! resource glob such as `db:*blogs*` reach every cached query that reads from
//! `blogs`; the hash covers the normalized query text and its arguments.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use xxhash_rust::xxh3::xxh3_64;

const NAMESPACE: &str = "db";
const SEPARATOR: char = '\u{1f}';

static FROM_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bfrom\s+([^();]*?)\s*(?:\b(?:where|group|order|limit|offset|having|union|except|intersect|join|inner|left|right|full|cross|natural|returning|window|for)\b|[();]|$)",
    )
    .expect("Failed to compile FROM list regex")
});

static JOINED_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bjoin\s+([A-Za-z_"`\[][A-Za-z0-9_."`\]$]*)"#).expect("Failed to compile JOIN regex")
});

static WRITE_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*(?:insert\s+into|update|delete\s+from)\s+([A-Za-z_"`\[][A-Za-z0-9_."`\]$]*)"#)
        .expect("Failed to compile write target regex")
});

/// Builder for consistent cache key naming
pub struct CacheKey;

impl CacheKey {
    /// Fingerprint of a query and its positional arguments
    ///
    /// Equal for any two calls whose query text differs only in whitespace outside
    /// string literals and whose arguments are equal.
    pub fn query(sql: &str, args: &[JsonValue]) -> String {
        let normalized = Self::normalize(sql);

        let mut material = normalized.clone();
        for arg in args {
            material.push(SEPARATOR);
            material.push_str(&arg.to_string());
        }

        format!(
            "{}:{}:{:016x}",
            NAMESPACE,
            Self::tables_segment(&normalized),
            xxh3_64(material.as_bytes())
        )
    }

    /// Glob matching every cached query touching `resource`
    pub fn resource_pattern(resource: &str) -> String {
        format!("{}:*{}*", NAMESPACE, resource.to_lowercase())
    }

    /// Glob matching every cached query
    pub fn all() -> String {
        format!("{}:*", NAMESPACE)
    }

    /// Whether the statement is a plain read (first keyword `SELECT`)
    pub fn is_read_only(sql: &str) -> bool {
        let keyword: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        keyword.eq_ignore_ascii_case("select")
    }

    /// Table written by an `INSERT`, `UPDATE` or `DELETE`, lowercased
    pub fn write_target(sql: &str) -> Option<String> {
        WRITE_TARGET
            .captures(sql)
            .and_then(|caps| caps.get(1))
            .map(|m| clean_identifier(m.as_str()))
            .filter(|name| !name.is_empty())
    }

    /// Collapse whitespace runs outside single-quoted literals and trim the ends
    pub fn normalize(sql: &str) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut in_literal = false;
        let mut pending_space = false;

        for c in sql.trim().chars() {
            if in_literal {
                out.push(c);
                if c == '\'' {
                    in_literal = false;
                }
                continue;
            }

            if c.is_whitespace() {
                pending_space = true;
                continue;
            }

            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            if c == '\'' {
                in_literal = true;
            }
            out.push(c);
        }

        out
    }

    fn tables_segment(normalized: &str) -> String {
        // `FROM a x, b y` lists several sources before the next clause
        let listed = FROM_LIST
            .captures_iter(normalized)
            .filter_map(|caps| caps.get(1))
            .flat_map(|list| list.as_str().split(','))
            .filter_map(|source| source.split_whitespace().next());
        let joined = JOINED_TABLE
            .captures_iter(normalized)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str());

        let tables: BTreeSet<String> = listed
            .chain(joined)
            .filter(|name| is_identifier(name))
            .map(clean_identifier)
            .filter(|name| !name.is_empty())
            .collect();

        if tables.is_empty() {
            "_".to_string()
        } else {
            tables.into_iter().collect::<Vec<_>>().join(",")
        }
    }
}

fn is_identifier(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '_' | '"' | '`' | '['))
}

fn clean_identifier(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
        .collect::<String>()
        .to_lowercase()
}
