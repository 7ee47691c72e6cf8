//! SQL Abstract Syntax
//!
//! A small, store-dialect AST for the statements this crate issues. Predicate
//! building is a pure function into [`Expr`]; rendering to text happens only
//! at the transport boundary through `Display`.
//!
//! ```text
//! SELECT Path FROM graphite_index
//! WHERE (Level = 3) AND (Path LIKE 'a.b.%') AND (Date >= '2024-01-01') AND (Date <= '2024-01-02')
//! GROUP BY Path ORDER BY Path
//! ```

use chrono::NaiveDate;
use std::fmt;

/// Literal value in a statement or a result row
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    StrArray(Vec<String>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{}", quote(s)),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
            Value::StrArray(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", quote(item))?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Quote a string literal, escaping backslashes and single quotes
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Escape LIKE metacharacters so `s` matches itself
pub fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Boolean predicate expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    True,
    False,
    Cmp(String, CmpOp, Value),
    In(String, Vec<Value>),
    /// `column LIKE pattern` (pattern already LIKE-escaped)
    Like(String, String),
    /// `match(column, regex)`, unanchored re2 search
    Match(String, String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    InSubquery {
        column: String,
        negated: bool,
        select: Box<Select>,
    },
}

impl Expr {
    pub fn eq(column: &str, value: Value) -> Self {
        Expr::Cmp(column.to_string(), CmpOp::Eq, value)
    }

    pub fn cmp(column: &str, op: CmpOp, value: Value) -> Self {
        Expr::Cmp(column.to_string(), op, value)
    }

    pub fn like(column: &str, pattern: impl Into<String>) -> Self {
        Expr::Like(column.to_string(), pattern.into())
    }

    pub fn regex(column: &str, regex: impl Into<String>) -> Self {
        Expr::Match(column.to_string(), regex.into())
    }

    /// `column IN (values)`; an empty list is `False`
    pub fn in_list(column: &str, mut values: Vec<Value>) -> Self {
        match values.len() {
            0 => Expr::False,
            1 => Expr::eq(column, values.remove(0)),
            _ => Expr::In(column.to_string(), values),
        }
    }

    pub fn in_subquery(column: &str, select: Select, negated: bool) -> Self {
        Expr::InSubquery {
            column: column.to_string(),
            negated,
            select: Box::new(select),
        }
    }

    /// Conjunction with flattening; `False` absorbs, `True` vanishes
    pub fn and(parts: Vec<Expr>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::True => {}
                Expr::False => return Expr::False,
                Expr::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Expr::True,
            1 => out.remove(0),
            _ => Expr::And(out),
        }
    }

    /// Disjunction with flattening; `True` absorbs, `False` vanishes
    pub fn or(parts: Vec<Expr>) -> Self {
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Expr::False => {}
                Expr::True => return Expr::True,
                Expr::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Expr::False,
            1 => out.remove(0),
            _ => Expr::Or(out),
        }
    }

    pub fn not(expr: Expr) -> Self {
        match expr {
            Expr::True => Expr::False,
            Expr::False => Expr::True,
            other => Expr::Not(Box::new(other)),
        }
    }

    /// True when the predicate can never match
    pub fn is_false(&self) -> bool {
        matches!(self, Expr::False)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::True => write!(f, "1"),
            Expr::False => write!(f, "0"),
            Expr::Cmp(col, op, v) => write!(f, "{} {} {}", col, op, v),
            Expr::In(col, values) => {
                write!(f, "{} IN (", col)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            Expr::Like(col, pattern) => write!(f, "{} LIKE {}", col, quote(pattern)),
            Expr::Match(col, re) => write!(f, "match({}, {})", col, quote(re)),
            Expr::And(parts) => write_joined(f, parts, " AND "),
            Expr::Or(parts) => write_joined(f, parts, " OR "),
            Expr::Not(inner) => write!(f, "NOT ({})", inner),
            Expr::InSubquery {
                column,
                negated,
                select,
            } => {
                let op = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{} {} ({})", column, op, select)
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, parts: &[Expr], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "({})", part)?;
    }
    Ok(())
}

/// Output column of a `SELECT`
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Column(String),
    /// Key part of a `key=value` column
    TagKey(String),
    /// Value part of a `key=value` column
    TagValue(String),
}

impl Projection {
    pub fn column(name: &str) -> Self {
        Projection::Column(name.to_string())
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Column(c) => write!(f, "{}", c),
            Projection::TagKey(c) => write!(f, "substring({c}, 1, position({c}, '=') - 1)", c = c),
            Projection::TagValue(c) => write!(f, "substring({c}, position({c}, '=') + 1)", c = c),
        }
    }
}

/// A `SELECT` statement; results are de-duplicated with `GROUP BY` over all
/// projections when `distinct` is set
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projections: Vec<Projection>,
    pub table: String,
    pub filter: Expr,
    pub distinct: bool,
    pub order_by_all: bool,
    pub limit: Option<usize>,
}

impl Select {
    pub fn new(table: &str, projections: Vec<Projection>) -> Self {
        Self {
            projections,
            table: table.to_string(),
            filter: Expr::True,
            distinct: false,
            order_by_all: false,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = filter;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.order_by_all = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cols: Vec<String> = self.projections.iter().map(|p| p.to_string()).collect();
        write!(f, "SELECT {} FROM {}", cols.join(", "), self.table)?;
        if self.filter != Expr::True {
            write!(f, " WHERE {}", self.filter)?;
        }
        if self.distinct {
            write!(f, " GROUP BY {}", cols.join(", "))?;
        }
        if self.order_by_all {
            write!(f, " ORDER BY {}", cols.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        Ok(())
    }
}

/// Any statement sent to the store
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    /// Bulk insert; rows are sent as the TabSeparated request body
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// `ALTER TABLE .. DELETE WHERE ..`
    Delete { table: String, filter: Expr },
}

impl Statement {
    /// Statement text; for inserts this is the header only
    pub fn sql(&self) -> String {
        match self {
            Statement::Select(select) => format!("{} FORMAT TabSeparated", select),
            Statement::Insert { table, columns, .. } => format!(
                "INSERT INTO {} ({}) FORMAT TabSeparated",
                table,
                columns.join(", ")
            ),
            Statement::Delete { table, filter } => {
                format!("ALTER TABLE {} DELETE WHERE {}", table, filter)
            }
        }
    }

    /// Request body for inserts (TabSeparated rows)
    pub fn body(&self) -> Option<String> {
        match self {
            Statement::Insert { rows, .. } => {
                let mut out = String::new();
                for row in rows {
                    let cells: Vec<String> = row.iter().map(tsv_cell).collect();
                    out.push_str(&cells.join("\t"));
                    out.push('\n');
                }
                Some(out)
            }
            _ => None,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }
}

/// Encode one value as a TabSeparated cell
pub fn tsv_cell(value: &Value) -> String {
    match value {
        Value::Str(s) => tsv_escape(s),
        Value::Int(i) => i.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::StrArray(_) => tsv_escape(&value.to_string()),
    }
}

/// Escape TabSeparated control characters
pub fn tsv_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote("a'b"), r"'a\'b'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("cpu_idle%"), r"cpu\_idle\%");
    }

    #[test]
    fn test_and_or_simplify() {
        let a = Expr::eq("Level", Value::Int(3));
        assert_eq!(Expr::and(vec![Expr::True, a.clone()]), a);
        assert_eq!(Expr::and(vec![a.clone(), Expr::False]), Expr::False);
        assert_eq!(Expr::or(vec![Expr::False, a.clone()]), a);
        assert_eq!(Expr::or(vec![a.clone(), Expr::True]), Expr::True);
        assert_eq!(Expr::or(vec![]), Expr::False);
        assert_eq!(Expr::in_list("Path", vec![]), Expr::False);
    }

    #[test]
    fn test_select_display() {
        let select = Select::new("graphite_index", vec![Projection::column("Path")])
            .filter(Expr::and(vec![
                Expr::eq("Level", Value::Int(3)),
                Expr::like("Path", "a.b.%"),
                Expr::regex("Path", r"^a\.b\.[^.]*$"),
            ]))
            .distinct();

        assert_eq!(
            select.to_string(),
            r"SELECT Path FROM graphite_index WHERE (Level = 3) AND (Path LIKE 'a.b.%') AND (match(Path, '^a\\.b\\.[^.]*$')) GROUP BY Path"
        );
    }

    #[test]
    fn test_subquery_display() {
        let inner = Select::new("graphite_tagged", vec![Projection::column("Path")])
            .filter(Expr::eq("Tag1", Value::str("dc=east")));
        let expr = Expr::in_subquery("Path", inner, true);
        assert_eq!(
            expr.to_string(),
            "Path NOT IN (SELECT Path FROM graphite_tagged WHERE Tag1 = 'dc=east')"
        );
    }

    #[test]
    fn test_insert_statement() {
        let stmt = Statement::Insert {
            table: "graphite_tagged".to_string(),
            columns: vec!["Date".to_string(), "Tag1".to_string(), "Tags".to_string()],
            rows: vec![vec![
                Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
                Value::str("name=cpu"),
                Value::StrArray(vec!["name=cpu".to_string(), "dc=east".to_string()]),
            ]],
        };
        assert_eq!(
            stmt.sql(),
            "INSERT INTO graphite_tagged (Date, Tag1, Tags) FORMAT TabSeparated"
        );
        assert_eq!(
            stmt.body().unwrap(),
            "2024-01-02\tname=cpu\t['name=cpu','dc=east']\n"
        );
        assert!(stmt.is_write());
    }

    #[test]
    fn test_eval_like_and_subquery() {
        use std::collections::HashMap;

        let row = |path: &str| -> eval::Row {
            HashMap::from([("Path".to_string(), Value::str(path))])
        };
        let mut tables = HashMap::new();
        tables.insert("idx".to_string(), vec![row("a_b.c"), row("axb.c")]);
        tables.insert("excl".to_string(), vec![row("axb.c")]);

        let select = Select::new("idx", vec![Projection::column("Path")])
            .filter(Expr::and(vec![
                Expr::like("Path", format!("{}%", like_escape("a_"))),
                Expr::in_subquery(
                    "Path",
                    Select::new("excl", vec![Projection::column("Path")]),
                    true,
                ),
            ]));
        let rows = eval::run(&select, &tables);
        assert_eq!(rows, vec![vec![Value::str("a_b.c")]]);
    }
}
