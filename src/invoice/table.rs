use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::warn;

use super::segment::PayloadSlice;
use crate::error::{Error, Result};

/// Fixed, ordered column names of one invoice layout.
#[derive(Debug, PartialEq, Eq)]
pub struct ColumnSchema {
    columns: &'static [&'static str],
}

impl ColumnSchema {
    pub const fn new(columns: &'static [&'static str]) -> Self {
        assert!(!columns.is_empty(), "a column schema needs at least one column");
        Self { columns }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        self.columns
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }
}

/// What to do with a final group shorter than the schema width.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingPolicy {
    /// Reject the whole table with `MalformedTable`.
    #[default]
    FailFast,
    /// Keep the complete rows and report how many tokens were dropped.
    DropPartial,
}

/// One product line, bound positionally to its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    schema: &'static ColumnSchema,
    values: Vec<String>,
}

impl ProductRow {
    fn bind(schema: &'static ColumnSchema, tokens: &[&str]) -> Self {
        debug_assert_eq!(tokens.len(), schema.width());
        Self {
            schema,
            values: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema
            .position(column)
            .map(|i| self.values[i].as_str())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Column value parsed as a number written with `mark` as decimal
    /// separator and the other one grouping thousands.
    pub fn decimal(&self, column: &'static str, mark: DecimalMark) -> Result<f64> {
        let raw = self.get(column).unwrap_or_default();
        parse_decimal(raw, mark).ok_or_else(|| Error::InvalidField {
            column,
            value: raw.to_string(),
        })
    }

    pub fn shape(&self, column: &str) -> NumberShape {
        number_shape(self.get(column).unwrap_or_default())
    }
}

impl Serialize for ProductRow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.schema.columns().iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ProductTable {
    rows: Vec<ProductRow>,
}

impl ProductTable {
    pub fn rows(&self) -> &[ProductRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Decimal mark settled by the values of `columns` across the whole
    /// table. `None` when no value settles it or two values disagree.
    pub fn decimal_mark(&self, columns: &[&str]) -> Option<DecimalMark> {
        let mut found = None;
        for row in &self.rows {
            for column in columns {
                if let NumberShape::Decimal(mark) = row.shape(column) {
                    match found {
                        None => found = Some(mark),
                        Some(seen) if seen != mark => {
                            warn!(column = %column, "Conflicting decimal marks in one document");
                            return None;
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        found
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub table: ProductTable,
    /// Trailing tokens dropped under `TrailingPolicy::DropPartial`.
    pub discarded: usize,
}

/// Regroup the payload's token stream into rows of `schema.width()` tokens.
pub fn reconstruct(
    payload: &PayloadSlice<'_>,
    schema: &'static ColumnSchema,
    policy: TrailingPolicy,
) -> Result<Reconstruction> {
    let tokens: Vec<&str> = payload.tokens().collect();
    let width = schema.width();
    let trailing = tokens.len() % width;

    if trailing != 0 {
        match policy {
            TrailingPolicy::FailFast => {
                return Err(Error::MalformedTable {
                    tokens: tokens.len(),
                    width,
                    trailing,
                });
            }
            TrailingPolicy::DropPartial => {
                warn!(
                    tokens = tokens.len(),
                    width,
                    discarded = trailing,
                    "Dropping incomplete trailing row"
                );
            }
        }
    }

    let rows = tokens
        .chunks_exact(width)
        .map(|group| ProductRow::bind(schema, group))
        .collect();

    Ok(Reconstruction {
        table: ProductTable { rows },
        discarded: trailing,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalMark {
    /// `1.234,56`
    Comma,
    /// `1,234.56`
    Dot,
}

impl DecimalMark {
    fn of(separator: char) -> Self {
        if separator == ',' { DecimalMark::Comma } else { DecimalMark::Dot }
    }
}

/// What a single cell says about the decimal convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberShape {
    /// Digits only.
    Integer,
    /// A number whose separators settle the decimal mark.
    Decimal(DecimalMark),
    /// One separator followed by exactly three digits, e.g. `1.000`:
    /// a thousands group or three decimals.
    Ambiguous,
    NotNumber,
}

static GROUP_THEN_THREE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}[.,]\d{3}$").expect("static regex"));

pub fn number_shape(raw: &str) -> NumberShape {
    let raw = raw.trim();
    let body = raw.strip_prefix('-').unwrap_or(raw);
    let well_formed = body.starts_with(|c: char| c.is_ascii_digit())
        && body.ends_with(|c: char| c.is_ascii_digit())
        && body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',');
    if !well_formed {
        return NumberShape::NotNumber;
    }

    let dots = body.matches('.').count();
    let commas = body.matches(',').count();
    match (dots, commas) {
        (0, 0) => NumberShape::Integer,
        // Both present: the last one is the decimal mark.
        (_, 1..) if dots > 0 => match body.rfind(['.', ',']).and_then(|i| body[i..].chars().next()) {
            Some(last) => NumberShape::Decimal(DecimalMark::of(last)),
            None => NumberShape::NotNumber,
        },
        (1, 0) | (0, 1) if GROUP_THEN_THREE.is_match(body) => NumberShape::Ambiguous,
        (1, 0) => NumberShape::Decimal(DecimalMark::Dot),
        (0, 1) => NumberShape::Decimal(DecimalMark::Comma),
        // A repeated separator only groups thousands.
        (_, 0) => NumberShape::Decimal(DecimalMark::Comma),
        _ => NumberShape::Decimal(DecimalMark::Dot),
    }
}

static COMMA_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d{1,3}(\.\d{3})+|\d+)(,\d+)?$").expect("static regex")
});

static DOT_DECIMAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?$").expect("static regex")
});

fn parse_decimal(raw: &str, mark: DecimalMark) -> Option<f64> {
    let raw = raw.trim();
    let (pattern, grouping, decimal) = match mark {
        DecimalMark::Comma => (&*COMMA_DECIMAL, '.', ','),
        DecimalMark::Dot => (&*DOT_DECIMAL, ',', '.'),
    };
    if !pattern.is_match(raw) {
        return None;
    }
    raw.replace(grouping, "")
        .replace(decimal, ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    static THREE: ColumnSchema = ColumnSchema::new(&["a", "b", "c"]);

    fn payload(text: &str) -> PayloadSlice<'_> {
        PayloadSlice::from(text)
    }

    #[test]
    fn test_exact_multiple_binds_positionally() {
        for rows in 0..5 {
            let tokens: Vec<String> = (0..rows * 3).map(|i| format!("t{i}")).collect();
            let text = tokens.join("\n");
            let out = reconstruct(&payload(&text), &THREE, TrailingPolicy::FailFast).unwrap();
            assert_eq!(out.table.len(), rows);
            assert_eq!(out.discarded, 0);
            for (r, row) in out.table.rows().iter().enumerate() {
                assert_eq!(row.values(), &tokens[r * 3..r * 3 + 3]);
                assert_eq!(row.get("a"), Some(tokens[r * 3].as_str()));
                assert_eq!(row.get("c"), Some(tokens[r * 3 + 2].as_str()));
            }
        }
    }

    #[test]
    fn test_fail_fast_rejects_every_remainder() {
        for k in 0..3 {
            for r in 1..3 {
                let text = (0..k * 3 + r).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
                let err = reconstruct(&payload(&text), &THREE, TrailingPolicy::FailFast).unwrap_err();
                match err {
                    Error::MalformedTable {
                        tokens,
                        width,
                        trailing,
                    } => {
                        assert_eq!(tokens, k * 3 + r);
                        assert_eq!(width, 3);
                        assert_eq!(trailing, r);
                    }
                    other => panic!("unexpected error {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_drop_partial_reports_every_remainder() {
        for k in 0..3 {
            for r in 1..3 {
                let text = (0..k * 3 + r).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
                let out = reconstruct(&payload(&text), &THREE, TrailingPolicy::DropPartial).unwrap();
                assert_eq!(out.table.len(), k);
                assert_eq!(out.discarded, r);
            }
        }
    }

    #[test]
    fn test_blank_lines_are_tokens() {
        let out = reconstruct(&payload("x\n\nz"), &THREE, TrailingPolicy::FailFast).unwrap();
        assert_eq!(out.table.rows()[0].get("b"), Some(""));
    }

    #[test]
    fn test_reconstruct_is_idempotent() {
        let p = payload("1\n2\n3\n4\n5\n6\n7");
        let first = reconstruct(&p, &THREE, TrailingPolicy::DropPartial).unwrap();
        let second = reconstruct(&p, &THREE, TrailingPolicy::DropPartial).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_row_serialises_in_schema_order() {
        let out = reconstruct(&payload("c1\nb1\na1"), &THREE, TrailingPolicy::FailFast).unwrap();
        let json = serde_json::to_string(&out.table).unwrap();
        assert_eq!(json, r#"[{"a":"c1","b":"b1","c":"a1"}]"#);
    }

    #[test]
    fn test_number_shapes() {
        assert_eq!(number_shape("2"), NumberShape::Integer);
        assert_eq!(number_shape("-3"), NumberShape::Integer);
        assert_eq!(number_shape("89.90"), NumberShape::Decimal(DecimalMark::Dot));
        assert_eq!(number_shape("89,90"), NumberShape::Decimal(DecimalMark::Comma));
        assert_eq!(number_shape("1.234,56"), NumberShape::Decimal(DecimalMark::Comma));
        assert_eq!(number_shape("1,234.56"), NumberShape::Decimal(DecimalMark::Dot));
        assert_eq!(number_shape("12.345.678"), NumberShape::Decimal(DecimalMark::Comma));
        assert_eq!(number_shape("1234.567"), NumberShape::Decimal(DecimalMark::Dot));
        assert_eq!(number_shape("1.000"), NumberShape::Ambiguous);
        assert_eq!(number_shape("89,900"), NumberShape::Ambiguous);
        assert_eq!(number_shape("UN"), NumberShape::NotNumber);
        assert_eq!(number_shape("1."), NumberShape::NotNumber);
        assert_eq!(number_shape(""), NumberShape::NotNumber);
    }

    #[test]
    fn test_parse_decimal_follows_mark() {
        assert_eq!(parse_decimal("89,90", DecimalMark::Comma), Some(89.90));
        assert_eq!(parse_decimal("1.234,56", DecimalMark::Comma), Some(1234.56));
        assert_eq!(parse_decimal("1.000", DecimalMark::Comma), Some(1000.0));
        assert_eq!(parse_decimal("1.000", DecimalMark::Dot), Some(1.0));
        assert_eq!(parse_decimal("89.90", DecimalMark::Dot), Some(89.90));
        assert_eq!(parse_decimal("1,234.56", DecimalMark::Dot), Some(1234.56));
        assert_eq!(parse_decimal(" 2 ", DecimalMark::Dot), Some(2.0));
        // Written in the other convention.
        assert_eq!(parse_decimal("89.90", DecimalMark::Comma), None);
        assert_eq!(parse_decimal("1.234,56", DecimalMark::Dot), None);
        assert_eq!(parse_decimal("UN", DecimalMark::Comma), None);
        assert_eq!(parse_decimal("", DecimalMark::Dot), None);
    }

    #[test]
    fn test_table_decimal_mark() {
        let out = reconstruct(&payload("2\n1.000\n89,90\n5\n1.000\n10"), &THREE, TrailingPolicy::FailFast).unwrap();
        assert_eq!(out.table.decimal_mark(&["a", "b", "c"]), Some(DecimalMark::Comma));
        assert_eq!(out.table.decimal_mark(&["a", "b"]), None);

        let mixed = reconstruct(&payload("89.90\n89,90\n1"), &THREE, TrailingPolicy::FailFast).unwrap();
        assert_eq!(mixed.table.decimal_mark(&["a", "b", "c"]), None);
    }

    #[test]
    fn test_decimal_reports_column() {
        let out = reconstruct(&payload("x\n1,5\nz"), &THREE, TrailingPolicy::FailFast).unwrap();
        let row = &out.table.rows()[0];
        assert_eq!(row.decimal("b", DecimalMark::Comma).unwrap(), 1.5);
        let err = row.decimal("a", DecimalMark::Comma).unwrap_err();
        assert!(matches!(err, Error::InvalidField { column: "a", ref value } if value == "x"));
    }
}
