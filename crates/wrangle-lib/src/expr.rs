//! Engine-neutral scalar expressions.
//!
//! Every user-supplied expression and every generated predicate goes through
//! this AST. Execution lowers it to a polars `Expr`; display and SQL text are
//! rendered from it, so user values are quoted by construction and never
//! spliced into source text.

use polars::prelude::{self as pl, StrptimeOptions, TimeUnit};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::snapshot::SemanticType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// ISO `YYYY-MM-DD`.
    Date(String),
    /// ISO `YYYY-MM-DDTHH:MM:SS[.fff]`.
    Timestamp(String),
}

impl Literal {
    /// Literal from a JSON parameter value. Arrays and objects are not scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Interpret form input against the column it is compared with: numeric
    /// strings become numbers, ISO dates become temporal literals.
    pub fn coerce_for(self, target: SemanticType) -> Result<Self, String> {
        match (self, target) {
            (Self::Str(s), SemanticType::Integer) => {
                if let Ok(i) = s.trim().parse::<i64>() {
                    Ok(Self::Int(i))
                } else {
                    s.trim()
                        .parse::<f64>()
                        .map(Self::Float)
                        .map_err(|_| format!("'{}' is not a number", s))
                }
            }
            (Self::Str(s), SemanticType::Float) => s
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| format!("'{}' is not a number", s)),
            (Self::Str(s), SemanticType::Boolean) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            (Self::Str(s), SemanticType::Datetime) => parse_temporal(&s)
                .ok_or_else(|| format!("'{}' is not a date (YYYY-MM-DD[THH:MM:SS])", s)),
            (lit, _) => Ok(lit),
        }
    }

    pub fn to_polars(&self) -> pl::Expr {
        match self {
            Self::Null => pl::lit(pl::NULL),
            Self::Bool(b) => pl::lit(*b),
            Self::Int(i) => pl::lit(*i),
            Self::Float(f) => pl::lit(*f),
            Self::Str(s) => pl::lit(s.as_str()),
            Self::Date(iso) => {
                let opts = StrptimeOptions {
                    format: Some("%Y-%m-%d".into()),
                    ..Default::default()
                };
                pl::lit(iso.as_str()).str().to_date(opts)
            }
            Self::Timestamp(iso) => {
                let (format, unit) = timestamp_format(iso);
                let opts = StrptimeOptions {
                    format: Some(format.into()),
                    ..Default::default()
                };
                pl::lit(iso.as_str())
                    .str()
                    .to_datetime(Some(unit), None, opts, pl::lit("raise"))
            }
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format!("{:?}", f),
            Self::Str(s) => quote_sql_str(s),
            Self::Date(iso) => format!("CAST({} AS DATE)", quote_sql_str(iso)),
            Self::Timestamp(iso) => format!(
                "CAST({} AS TIMESTAMP)",
                quote_sql_str(&iso.replacen('T', " ", 1))
            ),
        }
    }

    pub fn to_code(&self) -> String {
        match self {
            Self::Null => "lit(NULL)".to_string(),
            Self::Bool(b) => format!("lit({})", b),
            Self::Int(i) => format!("lit({})", i),
            Self::Float(f) => format!("lit({:?})", f),
            Self::Str(s) => format!("lit({:?})", s),
            Self::Date(iso) => format!("lit({:?}).str().to_date(\"%Y-%m-%d\")", iso),
            Self::Timestamp(iso) => {
                let (format, _) = timestamp_format(iso);
                format!("lit({:?}).str().to_datetime({:?})", iso, format)
            }
        }
    }
}

fn parse_temporal(s: &str) -> Option<Literal> {
    let s = s.trim();
    if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
        return Some(Literal::Date(s.to_string()));
    }
    let normalized = s.replacen(' ', "T", 1);
    if chrono::NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f").is_ok() {
        return Some(Literal::Timestamp(normalized));
    }
    None
}

/// Strptime format and unit for an ISO timestamp, chosen by fraction digits.
fn timestamp_format(iso: &str) -> (&'static str, TimeUnit) {
    let frac = iso.split_once('.').map(|(_, f)| f.len()).unwrap_or(0);
    match frac {
        0 => ("%Y-%m-%dT%H:%M:%S", TimeUnit::Microseconds),
        1..=3 => ("%Y-%m-%dT%H:%M:%S%.3f", TimeUnit::Milliseconds),
        4..=6 => ("%Y-%m-%dT%H:%M:%S%.6f", TimeUnit::Microseconds),
        _ => ("%Y-%m-%dT%H:%M:%S%.9f", TimeUnit::Nanoseconds),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Eq => "eq",
            Self::NotEq => "neq",
            Self::Lt => "lt",
            Self::LtEq => "lt_eq",
            Self::Gt => "gt",
            Self::GtEq => "gt_eq",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Allow-listed row-wise functions. Nothing outside this list can be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Abs,
    Floor,
    Ceil,
    Upper,
    Lower,
    Length,
    Trim,
    Coalesce,
    IsNull,
    IsNotNull,
    StartsWith,
    EndsWith,
    Contains,
    /// Regular-expression search.
    Matches,
    Replace,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Weekday,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "abs" => Self::Abs,
            "floor" => Self::Floor,
            "ceil" | "ceiling" => Self::Ceil,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "len" | "length" => Self::Length,
            "trim" | "strip" => Self::Trim,
            "coalesce" => Self::Coalesce,
            "null" | "is_null" | "isnull" => Self::IsNull,
            "not_null" | "is_not_null" | "notnull" => Self::IsNotNull,
            "starts_with" | "startswith" => Self::StartsWith,
            "ends_with" | "endswith" => Self::EndsWith,
            "contains" => Self::Contains,
            "matches" | "regex" => Self::Matches,
            "replace" => Self::Replace,
            "year" => Self::Year,
            "month" => Self::Month,
            "day" => Self::Day,
            "hour" => Self::Hour,
            "minute" => Self::Minute,
            "second" => Self::Second,
            "dow" | "weekday" => Self::Weekday,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Length => "len",
            Self::Trim => "trim",
            Self::Coalesce => "coalesce",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Contains => "contains",
            Self::Matches => "matches",
            Self::Replace => "replace",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
            Self::Weekday => "weekday",
        }
    }

    /// Accepted argument counts as (min, max).
    fn arity(self) -> (usize, usize) {
        match self {
            Self::Coalesce => (2, usize::MAX),
            Self::StartsWith | Self::EndsWith | Self::Contains | Self::Matches => (2, 2),
            Self::Replace => (3, 3),
            _ => (1, 1),
        }
    }

    fn datetime_part(self) -> Option<&'static str> {
        match self {
            Self::Year => Some("YEAR"),
            Self::Month => Some("MONTH"),
            Self::Day => Some("DAY"),
            Self::Hour => Some("HOUR"),
            Self::Minute => Some("MINUTE"),
            Self::Second => Some("SECOND"),
            Self::Weekday => Some("ISODOW"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    #[serde(alias = "avg")]
    Mean,
    Min,
    Max,
    Count,
    #[serde(alias = "med")]
    Median,
    #[serde(alias = "stddev")]
    Std,
    #[serde(rename = "nunique", alias = "n_unique")]
    NUnique,
    First,
    Last,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_lowercase().as_str() {
            "sum" => Self::Sum,
            "mean" | "avg" => Self::Mean,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "median" | "med" => Self::Median,
            "std" | "stddev" => Self::Std,
            "nunique" | "n_unique" => Self::NUnique,
            "first" => Self::First,
            "last" => Self::Last,
            _ => return None,
        })
    }

    /// Suffix used in `{column}_{function}` output names.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Median => "median",
            Self::Std => "std",
            Self::NUnique => "nunique",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Whether SQL has an order-independent equivalent.
    pub fn has_sql_equivalent(self) -> bool {
        !matches!(self, Self::First | Self::Last)
    }
}

/// Cast targets offered by `astype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastTarget {
    #[serde(alias = "int", alias = "int64")]
    Integer,
    #[serde(alias = "double", alias = "float64")]
    Float,
    #[serde(alias = "str", alias = "utf8")]
    String,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    Datetime,
}

impl CastTarget {
    pub(crate) fn dtype(self) -> pl::DataType {
        match self {
            Self::Integer => pl::DataType::Int64,
            Self::Float => pl::DataType::Float64,
            Self::String => pl::DataType::String,
            Self::Boolean => pl::DataType::Boolean,
            Self::Date => pl::DataType::Date,
            Self::Datetime => pl::DataType::Datetime(TimeUnit::Microseconds, None),
        }
    }

    pub(crate) fn dtype_code(self) -> &'static str {
        match self {
            Self::Integer => "DataType::Int64",
            Self::Float => "DataType::Float64",
            Self::String => "DataType::String",
            Self::Boolean => "DataType::Boolean",
            Self::Date => "DataType::Date",
            Self::Datetime => "DataType::Datetime(TimeUnit::Microseconds, None)",
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Integer => "BIGINT",
            Self::Float => "DOUBLE",
            Self::String => "VARCHAR",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Datetime => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarExpr {
    Column(String),
    Literal(Literal),
    Binary {
        op: BinaryOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Not(Box<ScalarExpr>),
    Neg(Box<ScalarExpr>),
    Call {
        func: Function,
        args: Vec<ScalarExpr>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        to: CastTarget,
    },
    /// `arg = None` counts rows.
    Agg {
        func: AggFunc,
        arg: Option<Box<ScalarExpr>>,
    },
    InList {
        expr: Box<ScalarExpr>,
        values: Vec<Literal>,
        negated: bool,
    },
}

impl ScalarExpr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column(name.into())
    }

    pub fn lit(value: Literal) -> Self {
        Self::Literal(value)
    }

    pub fn binary(self, op: BinaryOp, right: ScalarExpr) -> Self {
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn and(self, right: ScalarExpr) -> Self {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: ScalarExpr) -> Self {
        self.binary(BinaryOp::Or, right)
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn cast(self, to: CastTarget) -> Self {
        Self::Cast {
            expr: Box::new(self),
            to,
        }
    }

    pub fn agg(func: AggFunc, arg: Option<ScalarExpr>) -> Self {
        Self::Agg {
            func,
            arg: arg.map(Box::new),
        }
    }

    /// Checked constructor for function calls.
    pub fn call(func: Function, args: Vec<ScalarExpr>) -> Result<Self, String> {
        let (min, max) = func.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else if max == usize::MAX {
                format!("at least {}", min)
            } else {
                format!("{} to {}", min, max)
            };
            return Err(format!(
                "{} expects {} argument(s), got {}",
                func.name(),
                expected,
                args.len()
            ));
        }
        Ok(Self::Call { func, args })
    }

    /// Column names referenced anywhere in the expression, in first-seen order.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Self::Column(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Self::Literal(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::Not(e) | Self::Neg(e) => e.collect_columns(out),
            Self::Cast { expr, .. } | Self::InList { expr, .. } => expr.collect_columns(out),
            Self::Call { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
            Self::Agg { arg, .. } => {
                if let Some(a) = arg {
                    a.collect_columns(out);
                }
            }
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Agg { .. } => true,
            Self::Column(_) | Self::Literal(_) => false,
            Self::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Self::Not(e) | Self::Neg(e) => e.contains_aggregate(),
            Self::Cast { expr, .. } | Self::InList { expr, .. } => expr.contains_aggregate(),
            Self::Call { args, .. } => args.iter().any(|a| a.contains_aggregate()),
        }
    }

    /// Deterministic output name: the column for a bare reference,
    /// `{column}_{function}` for a function of one column, otherwise the
    /// leftmost column (or `literal`).
    pub fn output_name(&self) -> String {
        match self {
            Self::Column(name) => name.clone(),
            Self::Call { func, args } if args.len() == 1 => {
                format!("{}_{}", args[0].output_name(), func.name())
            }
            Self::Agg { arg: None, .. } => "count".to_string(),
            _ => self
                .referenced_columns()
                .into_iter()
                .next()
                .unwrap_or_else(|| "literal".to_string()),
        }
    }

    /// Lower to a polars expression for execution.
    pub fn to_polars(&self) -> pl::Expr {
        match self {
            Self::Column(name) => pl::col(name.as_str()),
            Self::Literal(l) => l.to_polars(),
            Self::Binary { op, left, right } => {
                let (l, r) = (left.to_polars(), right.to_polars());
                match op {
                    BinaryOp::Add => l.add(r),
                    BinaryOp::Sub => l.sub(r),
                    BinaryOp::Mul => l.mul(r),
                    BinaryOp::Div => l.div(r),
                    BinaryOp::Rem => l.rem(r),
                    BinaryOp::Eq => l.eq(r),
                    BinaryOp::NotEq => l.neq(r),
                    BinaryOp::Lt => l.lt(r),
                    BinaryOp::LtEq => l.lt_eq(r),
                    BinaryOp::Gt => l.gt(r),
                    BinaryOp::GtEq => l.gt_eq(r),
                    BinaryOp::And => l.and(r),
                    BinaryOp::Or => l.or(r),
                }
            }
            Self::Not(e) => e.to_polars().not(),
            Self::Neg(e) => pl::lit(0).sub(e.to_polars()),
            Self::Call { func, args } => call_to_polars(*func, args),
            Self::Cast { expr, to } => expr.to_polars().strict_cast(to.dtype()),
            Self::Agg { func, arg } => match arg {
                None => pl::len(),
                Some(a) => {
                    let e = a.to_polars();
                    match func {
                        AggFunc::Sum => e.sum(),
                        AggFunc::Mean => e.mean(),
                        AggFunc::Min => e.min(),
                        AggFunc::Max => e.max(),
                        AggFunc::Count => e.count(),
                        AggFunc::Median => e.median(),
                        AggFunc::Std => e.std(1),
                        AggFunc::NUnique => e.drop_nulls().n_unique(),
                        AggFunc::First => e.first(),
                        AggFunc::Last => e.last(),
                    }
                }
            },
            Self::InList {
                expr,
                values,
                negated,
            } => {
                let target = expr.to_polars();
                let any = values
                    .iter()
                    .map(|v| target.clone().eq(v.to_polars()))
                    .reduce(|a, b| a.or(b))
                    .unwrap_or_else(|| pl::lit(false));
                if *negated {
                    any.not()
                } else {
                    any
                }
            }
        }
    }

    /// Render as SQL. Identifiers and strings are always quoted.
    pub fn to_sql(&self) -> String {
        match self {
            Self::Column(name) => quote_ident(name),
            Self::Literal(l) => l.to_sql(),
            Self::Binary { op, left, right } => {
                format!("({} {} {})", left.to_sql(), op.sql(), right.to_sql())
            }
            Self::Not(e) => format!("(NOT {})", e.to_sql()),
            Self::Neg(e) => format!("(-{})", e.to_sql()),
            Self::Call { func, args } => call_to_sql(*func, args),
            Self::Cast { expr, to } => format!("CAST({} AS {})", expr.to_sql(), to.sql()),
            Self::Agg { func, arg } => match arg {
                None => "COUNT(*)".to_string(),
                Some(a) => {
                    let inner = a.to_sql();
                    match func {
                        AggFunc::Sum => format!("SUM({})", inner),
                        AggFunc::Mean => format!("AVG({})", inner),
                        AggFunc::Min => format!("MIN({})", inner),
                        AggFunc::Max => format!("MAX({})", inner),
                        AggFunc::Count => format!("COUNT({})", inner),
                        AggFunc::Median => format!("MEDIAN({})", inner),
                        AggFunc::Std => format!("STDDEV({})", inner),
                        AggFunc::NUnique => format!("COUNT(DISTINCT {})", inner),
                        AggFunc::First => format!("FIRST({})", inner),
                        AggFunc::Last => format!("LAST({})", inner),
                    }
                }
            },
            // `IN ()` does not parse; an empty list matches nothing.
            Self::InList { values, negated, .. } if values.is_empty() => {
                if *negated { "TRUE" } else { "FALSE" }.to_string()
            }
            Self::InList {
                expr,
                values,
                negated,
            } => format!(
                "({} {}IN ({}))",
                expr.to_sql(),
                if *negated { "NOT " } else { "" },
                values
                    .iter()
                    .map(Literal::to_sql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    /// Render as polars Rust source, for display.
    pub fn to_code(&self) -> String {
        match self {
            Self::Column(name) => format!("col({:?})", name),
            Self::Literal(l) => l.to_code(),
            Self::Binary { op, left, right } => {
                format!("{}.{}({})", left.to_code(), op.method(), right.to_code())
            }
            Self::Not(e) => format!("{}.not()", e.to_code()),
            Self::Neg(e) => format!("lit(0).sub({})", e.to_code()),
            Self::Call { func, args } => call_to_code(*func, args),
            Self::Cast { expr, to } => {
                format!("{}.strict_cast({})", expr.to_code(), to.dtype_code())
            }
            Self::Agg { func, arg } => match arg {
                None => "len()".to_string(),
                Some(a) => {
                    let method = match func {
                        AggFunc::Std => "std(1)".to_string(),
                        AggFunc::NUnique => "drop_nulls().n_unique()".to_string(),
                        other => format!("{}()", other.name()),
                    };
                    format!("{}.{}", a.to_code(), method)
                }
            },
            Self::InList {
                expr,
                values,
                negated,
            } => {
                let target = expr.to_code();
                let any = values
                    .iter()
                    .map(|v| format!("{}.eq({})", target, v.to_code()))
                    .reduce(|a, b| format!("{}.or({})", a, b))
                    .unwrap_or_else(|| "lit(false)".to_string());
                if *negated {
                    format!("{}.not()", any)
                } else {
                    any
                }
            }
        }
    }
}

fn arg_or_null(args: &[ScalarExpr], i: usize) -> pl::Expr {
    args.get(i)
        .map(ScalarExpr::to_polars)
        .unwrap_or_else(|| pl::lit(pl::NULL))
}

fn call_to_polars(func: Function, args: &[ScalarExpr]) -> pl::Expr {
    let a = arg_or_null(args, 0);
    match func {
        Function::Abs => a.abs(),
        Function::Floor => a.floor(),
        Function::Ceil => a.ceil(),
        Function::Upper => a.str().to_uppercase(),
        Function::Lower => a.str().to_lowercase(),
        Function::Length => a.str().len_chars(),
        Function::Trim => a.str().strip_chars(pl::lit(pl::NULL)),
        Function::Coalesce => {
            let exprs: Vec<pl::Expr> = args.iter().map(ScalarExpr::to_polars).collect();
            pl::coalesce(&exprs)
        }
        Function::IsNull => a.is_null(),
        Function::IsNotNull => a.is_not_null(),
        Function::StartsWith => a.str().starts_with(arg_or_null(args, 1)),
        Function::EndsWith => a.str().ends_with(arg_or_null(args, 1)),
        Function::Contains => a.str().contains_literal(arg_or_null(args, 1)),
        Function::Matches => a.str().contains(arg_or_null(args, 1), true),
        Function::Replace => a
            .str()
            .replace_all(arg_or_null(args, 1), arg_or_null(args, 2), true),
        Function::Year => a.dt().year(),
        Function::Month => a.dt().month(),
        Function::Day => a.dt().day(),
        Function::Hour => a.dt().hour(),
        Function::Minute => a.dt().minute(),
        Function::Second => a.dt().second(),
        Function::Weekday => a.dt().weekday(),
    }
}

fn call_to_sql(func: Function, args: &[ScalarExpr]) -> String {
    let rendered: Vec<String> = args.iter().map(ScalarExpr::to_sql).collect();
    let a = rendered.first().cloned().unwrap_or_else(|| "NULL".to_string());
    if let Some(part) = func.datetime_part() {
        return format!("EXTRACT({} FROM {})", part, a);
    }
    match func {
        Function::Abs => format!("ABS({})", a),
        Function::Floor => format!("FLOOR({})", a),
        Function::Ceil => format!("CEIL({})", a),
        Function::Upper => format!("UPPER({})", a),
        Function::Lower => format!("LOWER({})", a),
        Function::Length => format!("LENGTH({})", a),
        Function::Trim => format!("TRIM({})", a),
        Function::Coalesce => format!("COALESCE({})", rendered.join(", ")),
        Function::IsNull => format!("({} IS NULL)", a),
        Function::IsNotNull => format!("({} IS NOT NULL)", a),
        Function::StartsWith => format!("STARTS_WITH({}, {})", a, rendered[1]),
        Function::EndsWith => format!("ENDS_WITH({}, {})", a, rendered[1]),
        Function::Contains => format!("(STRPOS({}, {}) > 0)", a, rendered[1]),
        Function::Matches => format!("REGEXP_LIKE({}, {})", a, rendered[1]),
        Function::Replace => format!("REPLACE({}, {}, {})", a, rendered[1], rendered[2]),
        _ => unreachable!("datetime parts handled above"),
    }
}

fn call_to_code(func: Function, args: &[ScalarExpr]) -> String {
    let rendered: Vec<String> = args.iter().map(ScalarExpr::to_code).collect();
    let a = rendered
        .first()
        .cloned()
        .unwrap_or_else(|| "lit(NULL)".to_string());
    match func {
        Function::Abs => format!("{}.abs()", a),
        Function::Floor => format!("{}.floor()", a),
        Function::Ceil => format!("{}.ceil()", a),
        Function::Upper => format!("{}.str().to_uppercase()", a),
        Function::Lower => format!("{}.str().to_lowercase()", a),
        Function::Length => format!("{}.str().len_chars()", a),
        Function::Trim => format!("{}.str().strip_chars(lit(NULL))", a),
        Function::Coalesce => format!("coalesce(&[{}])", rendered.join(", ")),
        Function::IsNull => format!("{}.is_null()", a),
        Function::IsNotNull => format!("{}.is_not_null()", a),
        Function::StartsWith => format!("{}.str().starts_with({})", a, rendered[1]),
        Function::EndsWith => format!("{}.str().ends_with({})", a, rendered[1]),
        Function::Contains => format!("{}.str().contains_literal({})", a, rendered[1]),
        Function::Matches => format!("{}.str().contains({}, true)", a, rendered[1]),
        Function::Replace => format!(
            "{}.str().replace_all({}, {}, true)",
            a, rendered[1], rendered[2]
        ),
        Function::Year => format!("{}.dt().year()", a),
        Function::Month => format!("{}.dt().month()", a),
        Function::Day => format!("{}.dt().day()", a),
        Function::Hour => format!("{}.dt().hour()", a),
        Function::Minute => format!("{}.dt().minute()", a),
        Function::Second => format!("{}.dt().second()", a),
        Function::Weekday => format!("{}.dt().weekday()", a),
    }
}

/// Double-quoted SQL identifier with embedded quotes doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quoted SQL string with embedded quotes doubled.
pub fn quote_sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gt(col: &str, v: i64) -> ScalarExpr {
        ScalarExpr::column(col).binary(BinaryOp::Gt, ScalarExpr::lit(Literal::Int(v)))
    }

    #[test]
    fn test_sql_quotes_identifiers_and_strings() {
        let e = ScalarExpr::column("we\"ird").binary(
            BinaryOp::Eq,
            ScalarExpr::lit(Literal::Str("it's; DROP TABLE x".to_string())),
        );
        assert_eq!(e.to_sql(), "(\"we\"\"ird\" = 'it''s; DROP TABLE x')");
    }

    #[test]
    fn test_code_rendering() {
        let e = gt("amount", 15).and(ScalarExpr::column("region").binary(
            BinaryOp::Eq,
            ScalarExpr::lit(Literal::Str("A".to_string())),
        ));
        assert_eq!(
            e.to_code(),
            "col(\"amount\").gt(lit(15)).and(col(\"region\").eq(lit(\"A\")))"
        );
    }

    #[test]
    fn test_float_literals_keep_decimal_point() {
        assert_eq!(ScalarExpr::lit(Literal::Float(1.0)).to_sql(), "1.0");
    }

    #[test]
    fn test_referenced_columns_dedup() {
        let e = gt("a", 1).and(gt("b", 2)).or(gt("a", 3));
        assert_eq!(e.referenced_columns(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_call_arity_checked() {
        assert!(ScalarExpr::call(Function::Upper, vec![]).is_err());
        assert!(ScalarExpr::call(Function::Coalesce, vec![ScalarExpr::column("a")]).is_err());
        assert!(ScalarExpr::call(
            Function::Replace,
            vec![
                ScalarExpr::column("a"),
                ScalarExpr::lit(Literal::Str("x".into())),
                ScalarExpr::lit(Literal::Str("y".into()))
            ]
        )
        .is_ok());
    }

    #[test]
    fn test_output_names() {
        let year = ScalarExpr::call(Function::Year, vec![ScalarExpr::column("ts")]).unwrap();
        assert_eq!(year.output_name(), "ts_year");
        assert_eq!(ScalarExpr::agg(AggFunc::Count, None).output_name(), "count");
        assert_eq!(gt("amount", 1).output_name(), "amount");
    }

    #[test]
    fn test_coerce_string_for_numeric_column() {
        let l = Literal::Str("20".to_string())
            .coerce_for(SemanticType::Integer)
            .unwrap();
        assert_eq!(l, Literal::Int(20));
        assert!(Literal::Str("abc".to_string())
            .coerce_for(SemanticType::Float)
            .is_err());
        let d = Literal::Str("2024-03-01".to_string())
            .coerce_for(SemanticType::Datetime)
            .unwrap();
        assert_eq!(d, Literal::Date("2024-03-01".to_string()));
    }

    #[test]
    fn test_in_list_sql() {
        let e = ScalarExpr::InList {
            expr: Box::new(ScalarExpr::column("r")),
            values: vec![Literal::Str("A".into()), Literal::Str("B".into())],
            negated: true,
        };
        assert_eq!(e.to_sql(), "(\"r\" NOT IN ('A', 'B'))");
    }

    #[test]
    fn test_empty_in_list_sql() {
        let isin = ScalarExpr::InList {
            expr: Box::new(ScalarExpr::column("r")),
            values: vec![],
            negated: false,
        };
        assert_eq!(isin.to_sql(), "FALSE");
        let notin = ScalarExpr::InList {
            expr: Box::new(ScalarExpr::column("r")),
            values: vec![],
            negated: true,
        };
        assert_eq!(notin.to_sql(), "TRUE");
    }
}
