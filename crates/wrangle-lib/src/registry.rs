//! Operation registry: parameter schemas, engine support and validation.
//!
//! Schemas are data. Validation walks the schema against the raw JSON so
//! every problem is reported against the field that caused it, then serde
//! builds the typed [`Operation`].

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::engine::{Engine, EngineSet};
use crate::error::{FieldError, Result, WrangleError};
use crate::operation::{FilterOperator, Operation, OperationKind, WindowFunc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    /// Text in the expression language.
    Expression,
    Integer,
    Number,
    Boolean,
    /// String, number, boolean or null.
    Scalar,
    /// A scalar, or a list of scalars for membership operators.
    ScalarOrList,
    StringList,
    BoolOrBoolList,
    StringMap,
    /// List of `{column?, function}` objects.
    AggregationList,
    /// List of `{old, new}` objects.
    RenameList,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub value_type: ValueType,
    pub required: bool,
    /// Accepted values for enum-like fields; empty means unrestricted.
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub allowed: &'static [&'static str],
    /// Lists must contain at least one entry.
    pub non_empty: bool,
}

const fn field(name: &'static str, value_type: ValueType) -> FieldSpec {
    FieldSpec {
        name,
        value_type,
        required: false,
        allowed: &[],
        non_empty: false,
    }
}

impl FieldSpec {
    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    const fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }
}

/// Cross-field rules. `when`/`is_one_of` conditions only fire when the
/// `when` field is present; an empty `is_one_of` matches any value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Constraint {
    ExactlyOneOf {
        fields: &'static [&'static str],
    },
    RequiredWhen {
        field: &'static str,
        when: &'static str,
        is_one_of: &'static [&'static str],
    },
    RequiredUnless {
        field: &'static str,
        when: &'static str,
        is_one_of: &'static [&'static str],
    },
    NonEmptyWhen {
        field: &'static str,
        when: &'static str,
        is_one_of: &'static [&'static str],
    },
    MinWhen {
        field: &'static str,
        min: i64,
        when: &'static str,
        is_one_of: &'static [&'static str],
    },
    /// `field` must be true when `when` exceeds `above`.
    TrueWhenAbove {
        field: &'static str,
        when: &'static str,
        above: f64,
    },
    RequiredTogether {
        fields: &'static [&'static str],
    },
    SameLength {
        fields: [&'static str; 2],
    },
    Positive {
        field: &'static str,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSchema {
    pub kind: OperationKind,
    pub fields: Vec<FieldSpec>,
    pub constraints: Vec<Constraint>,
    pub engines: EngineSet,
}

const AGG_FUNCS: &[&str] = &[
    "sum", "mean", "avg", "min", "max", "count", "median", "med", "std", "stddev", "nunique",
    "n_unique", "first", "last",
];
const FILTER_OPERATORS: &[&str] = &[
    "==", "=", "eq", "!=", "<>", "ne", ">", "gt", ">=", "ge", "<", "lt", "<=", "le", "contains",
    "startswith", "endswith", "regex", "isin", "notin", "isnull", "notnull",
];
const WINDOW_FUNCS: &[&str] = &[
    "row_number", "rank", "dense_rank", "cumsum", "cum_sum", "cummin", "cum_min", "cummax",
    "cum_max", "lead", "lag", "sum", "mean", "min", "max", "count",
];
const CAST_TARGETS: &[&str] = &[
    "integer", "int", "int64", "float", "double", "float64", "string", "str", "utf8", "boolean",
    "bool", "date", "datetime",
];
const STRING_OPS: &[&str] = &[
    "upper", "lower", "strip", "trim", "len", "length", "replace", "contains", "startswith",
    "starts_with", "endswith", "ends_with",
];
const DATE_PARTS: &[&str] = &[
    "year", "month", "day", "hour", "minute", "second", "weekday", "dayofweek", "dow",
];

/// Parameter schema for a kind.
pub fn describe(kind: OperationKind) -> ParameterSchema {
    use Constraint::*;
    use ValueType as T;

    let (fields, constraints) = match kind {
        OperationKind::Filter => (
            vec![
                field("column", T::String),
                field("operator", T::String).one_of(FILTER_OPERATORS),
                field("value", T::ScalarOrList),
                field("expression", T::Expression),
            ],
            vec![
                ExactlyOneOf {
                    fields: &["column", "expression"],
                },
                RequiredWhen {
                    field: "operator",
                    when: "column",
                    is_one_of: &[],
                },
                RequiredUnless {
                    field: "value",
                    when: "operator",
                    is_one_of: FilterOperator::NULLARY,
                },
            ],
        ),
        OperationKind::SelectColumns | OperationKind::DropColumns => (
            vec![field("columns", T::StringList).required().non_empty()],
            vec![],
        ),
        OperationKind::Sort => (
            vec![
                field("columns", T::StringList).required().non_empty(),
                field("ascending", T::BoolOrBoolList),
            ],
            vec![SameLength {
                fields: ["columns", "ascending"],
            }],
        ),
        OperationKind::Rename => (
            vec![field("mapping", T::StringMap).required().non_empty()],
            vec![],
        ),
        OperationKind::DropDuplicates => (
            vec![
                field("subset", T::StringList).non_empty(),
                field("keep", T::String).one_of(&["first", "last", "none"]),
            ],
            vec![],
        ),
        OperationKind::Fillna => (
            vec![
                field("value", T::Scalar),
                field("method", T::String).one_of(&["forward", "ffill", "pad", "backward", "bfill"]),
                field("columns", T::StringList).non_empty(),
            ],
            vec![ExactlyOneOf {
                fields: &["value", "method"],
            }],
        ),
        OperationKind::Dropna => (
            vec![
                field("how", T::String).one_of(&["any", "all"]),
                field("subset", T::StringList).non_empty(),
            ],
            vec![],
        ),
        OperationKind::Astype => (
            vec![
                field("column", T::String).required(),
                field("dtype", T::String).required().one_of(CAST_TARGETS),
            ],
            vec![],
        ),
        OperationKind::GroupAggregate => (
            vec![
                field("group_by", T::StringList).required(),
                field("aggregations", T::AggregationList).required().non_empty(),
            ],
            vec![],
        ),
        OperationKind::Pivot => (
            vec![
                field("index", T::StringList),
                field("columns", T::String).required(),
                field("values", T::String).required(),
                field("aggfunc", T::String).one_of(AGG_FUNCS),
            ],
            vec![],
        ),
        OperationKind::Melt => (
            vec![
                field("id_vars", T::StringList),
                field("value_vars", T::StringList).non_empty(),
                field("var_name", T::String),
                field("value_name", T::String),
            ],
            vec![],
        ),
        OperationKind::Merge => (
            vec![
                field("right", T::String).required(),
                field("how", T::String).one_of(&["inner", "left", "outer", "full"]),
                field("on", T::StringList).non_empty(),
                field("left_on", T::StringList).non_empty(),
                field("right_on", T::StringList).non_empty(),
            ],
            vec![
                ExactlyOneOf {
                    fields: &["on", "left_on"],
                },
                RequiredTogether {
                    fields: &["left_on", "right_on"],
                },
                SameLength {
                    fields: ["left_on", "right_on"],
                },
            ],
        ),
        OperationKind::Sample => (
            vec![
                field("n", T::Integer),
                field("frac", T::Number),
                field("replace", T::Boolean),
                field("seed", T::Integer),
            ],
            vec![
                ExactlyOneOf {
                    fields: &["n", "frac"],
                },
                TrueWhenAbove {
                    field: "replace",
                    when: "frac",
                    above: 1.0,
                },
                Positive { field: "frac" },
            ],
        ),
        OperationKind::Shuffle => (vec![field("seed", T::Integer)], vec![]),
        OperationKind::StringOp => (
            vec![
                field("column", T::String).required(),
                field("operation", T::String).required().one_of(STRING_OPS),
                field("pattern", T::String),
                field("replacement", T::String),
                field("new_column", T::String),
            ],
            vec![
                RequiredWhen {
                    field: "pattern",
                    when: "operation",
                    is_one_of: &[
                        "replace",
                        "contains",
                        "startswith",
                        "starts_with",
                        "endswith",
                        "ends_with",
                    ],
                },
                RequiredWhen {
                    field: "replacement",
                    when: "operation",
                    is_one_of: &["replace"],
                },
            ],
        ),
        OperationKind::DateExtract => (
            vec![
                field("column", T::String).required(),
                field("part", T::String).required().one_of(DATE_PARTS),
                field("new_column", T::String),
            ],
            vec![],
        ),
        OperationKind::CreateColumn => (
            vec![
                field("name", T::String).required(),
                field("expression", T::Expression).required(),
            ],
            vec![],
        ),
        OperationKind::WindowFunction => (
            vec![
                field("function", T::String).required().one_of(WINDOW_FUNCS),
                field("column", T::String),
                field("partition_by", T::StringList),
                field("order_by", T::StringList),
                field("ascending", T::Boolean),
                field("offset", T::Integer),
                field("new_column", T::String),
            ],
            vec![
                RequiredUnless {
                    field: "column",
                    when: "function",
                    is_one_of: WindowFunc::COLUMNLESS,
                },
                NonEmptyWhen {
                    field: "order_by",
                    when: "function",
                    is_one_of: WindowFunc::ORDERED,
                },
                MinWhen {
                    field: "offset",
                    min: 1,
                    when: "function",
                    is_one_of: WindowFunc::SHIFTING,
                },
            ],
        ),
        OperationKind::RelationalSelect => (
            vec![field("predicate", T::Expression).required()],
            vec![],
        ),
        OperationKind::RelationalProject => (
            vec![field("attributes", T::StringList).required().non_empty()],
            vec![],
        ),
        OperationKind::RelationalRename => (
            vec![
                field("mapping", T::StringMap).non_empty(),
                field("renames", T::RenameList).non_empty(),
            ],
            vec![ExactlyOneOf {
                fields: &["mapping", "renames"],
            }],
        ),
    };

    ParameterSchema {
        kind,
        fields,
        constraints,
        engines: supported_engines(kind),
    }
}

/// Engines on which a kind is defined at all.
pub fn supported_engines(kind: OperationKind) -> EngineSet {
    match kind {
        OperationKind::Pivot
        | OperationKind::Melt
        | OperationKind::Sample
        | OperationKind::Shuffle => EngineSet::ALL.without(Engine::Relational),
        _ => EngineSet::ALL,
    }
}

pub fn check_engine(kind: OperationKind, engine: Engine) -> Result<()> {
    if supported_engines(kind).contains(engine) {
        Ok(())
    } else {
        Err(WrangleError::UnsupportedCombination {
            kind: kind.to_string(),
            engine,
            reason: None,
        })
    }
}

fn is_scalar(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

fn check_type(spec: &FieldSpec, value: &Value) -> Option<String> {
    let ok = match spec.value_type {
        ValueType::String | ValueType::Expression => value.is_string(),
        ValueType::Integer => value.is_i64() || value.is_u64(),
        ValueType::Number => value.is_number(),
        ValueType::Boolean => value.is_boolean(),
        ValueType::Scalar => is_scalar(value),
        ValueType::ScalarOrList => match value {
            Value::Array(items) => items.iter().all(is_scalar),
            Value::Object(_) => false,
            _ => true,
        },
        ValueType::StringList => value
            .as_array()
            .is_some_and(|a| a.iter().all(Value::is_string)),
        ValueType::BoolOrBoolList => {
            value.is_boolean()
                || value
                    .as_array()
                    .is_some_and(|a| a.iter().all(Value::is_boolean))
        }
        ValueType::StringMap => value
            .as_object()
            .is_some_and(|m| m.values().all(Value::is_string)),
        ValueType::AggregationList => {
            return check_aggregations(value);
        }
        ValueType::RenameList => value.as_array().is_some_and(|a| {
            a.iter().all(|item| {
                item.get("old").is_some_and(Value::is_string)
                    && item.get("new").is_some_and(Value::is_string)
            })
        }),
    };
    if !ok {
        return Some(format!("expected {}", type_label(spec.value_type)));
    }
    if spec.value_type == ValueType::String || spec.value_type == ValueType::Expression {
        let s = value.as_str().unwrap_or_default();
        if s.trim().is_empty() {
            return Some("must not be empty".to_string());
        }
        if !spec.allowed.is_empty() && !spec.allowed.contains(&s) {
            return Some(format!("must be one of: {}", spec.allowed.join(", ")));
        }
    }
    if spec.non_empty {
        let empty = match value {
            Value::Array(a) => a.is_empty(),
            Value::Object(m) => m.is_empty(),
            _ => false,
        };
        if empty {
            return Some("must not be empty".to_string());
        }
    }
    None
}

fn check_aggregations(value: &Value) -> Option<String> {
    let Some(items) = value.as_array() else {
        return Some("expected a list of {column, function} objects".to_string());
    };
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return Some(format!("entry {} must be an object", i));
        };
        match obj.get("function").and_then(Value::as_str) {
            Some(f) if AGG_FUNCS.contains(&f) => {}
            Some(f) => {
                return Some(format!(
                    "entry {}: unknown function '{}'; must be one of: {}",
                    i,
                    f,
                    AGG_FUNCS.join(", ")
                ))
            }
            None => return Some(format!("entry {}: function is required", i)),
        }
        match obj.get("column") {
            None | Some(Value::Null) => {
                if obj.get("function").and_then(Value::as_str) != Some("count") {
                    return Some(format!("entry {}: column is required", i));
                }
            }
            Some(Value::String(_)) => {}
            Some(_) => return Some(format!("entry {}: column must be a string", i)),
        }
        if let Some(extra) = obj.keys().find(|k| *k != "column" && *k != "function") {
            return Some(format!("entry {}: unknown field '{}'", i, extra));
        }
    }
    None
}

fn type_label(t: ValueType) -> &'static str {
    match t {
        ValueType::String => "a string",
        ValueType::Expression => "an expression string",
        ValueType::Integer => "an integer",
        ValueType::Number => "a number",
        ValueType::Boolean => "a boolean",
        ValueType::Scalar => "a string, number, boolean or null",
        ValueType::ScalarOrList => "a scalar or a list of scalars",
        ValueType::StringList => "a list of strings",
        ValueType::BoolOrBoolList => "a boolean or a list of booleans",
        ValueType::StringMap => "an object mapping strings to strings",
        ValueType::AggregationList => "a list of {column, function} objects",
        ValueType::RenameList => "a list of {old, new} objects",
    }
}

fn present<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    params.get(name).filter(|v| !v.is_null())
}

fn condition_holds(params: &Map<String, Value>, when: &str, is_one_of: &[&str]) -> bool {
    match present(params, when) {
        None => false,
        Some(_) if is_one_of.is_empty() => true,
        Some(v) => v.as_str().is_some_and(|s| is_one_of.contains(&s)),
    }
}

fn check_constraint(c: &Constraint, params: &Map<String, Value>, errors: &mut Vec<FieldError>) {
    match c {
        Constraint::ExactlyOneOf { fields } => {
            let set: Vec<&str> = fields
                .iter()
                .copied()
                .filter(|f| present(params, f).is_some())
                .collect();
            match set.len() {
                1 => {}
                0 => errors.push(FieldError::new(
                    fields[0],
                    format!("exactly one of {} is required", fields.join(", ")),
                )),
                _ => errors.push(FieldError::new(
                    set[1],
                    format!("cannot be combined with {}", set[0]),
                )),
            }
        }
        Constraint::RequiredWhen {
            field,
            when,
            is_one_of,
        } => {
            if condition_holds(params, when, is_one_of) && present(params, field).is_none() {
                errors.push(FieldError::new(*field, describe_condition("required", when, params)));
            }
        }
        Constraint::RequiredUnless {
            field,
            when,
            is_one_of,
        } => {
            if present(params, when).is_some()
                && !condition_holds(params, when, is_one_of)
                && present(params, field).is_none()
            {
                errors.push(FieldError::new(*field, describe_condition("required", when, params)));
            }
        }
        Constraint::NonEmptyWhen {
            field,
            when,
            is_one_of,
        } => {
            let empty = match present(params, field) {
                None => true,
                Some(Value::Array(a)) => a.is_empty(),
                Some(_) => false,
            };
            if condition_holds(params, when, is_one_of) && empty {
                errors.push(FieldError::new(
                    *field,
                    describe_condition("must not be empty", when, params),
                ));
            }
        }
        Constraint::MinWhen {
            field,
            min,
            when,
            is_one_of,
        } => {
            if condition_holds(params, when, is_one_of) {
                if let Some(v) = present(params, field).and_then(Value::as_i64) {
                    if v < *min {
                        errors.push(FieldError::new(
                            *field,
                            describe_condition(&format!("must be at least {}", min), when, params),
                        ));
                    }
                }
            }
        }
        Constraint::TrueWhenAbove { field, when, above } => {
            let exceeds = present(params, when)
                .and_then(Value::as_f64)
                .is_some_and(|v| v > *above);
            let is_true = present(params, field).and_then(Value::as_bool) == Some(true);
            if exceeds && !is_true {
                errors.push(FieldError::new(
                    *field,
                    format!("must be true when {} is greater than {}", when, above),
                ));
            }
        }
        Constraint::RequiredTogether { fields } => {
            let set = fields.iter().filter(|f| present(params, f).is_some()).count();
            if set != 0 && set != fields.len() {
                for f in fields.iter().filter(|f| present(params, f).is_none()) {
                    errors.push(FieldError::new(
                        *f,
                        format!("required together with {}", fields.join(", ")),
                    ));
                }
            }
        }
        Constraint::SameLength { fields: [a, b] } => {
            let la = present(params, a).and_then(Value::as_array).map(Vec::len);
            let lb = present(params, b).and_then(Value::as_array).map(Vec::len);
            if let (Some(la), Some(lb)) = (la, lb) {
                if la != lb {
                    errors.push(FieldError::new(
                        *b,
                        format!("must have the same length as {} ({} vs {})", a, lb, la),
                    ));
                }
            }
        }
        Constraint::Positive { field } => {
            if let Some(v) = present(params, field).and_then(Value::as_f64) {
                if v <= 0.0 {
                    errors.push(FieldError::new(*field, "must be greater than 0"));
                }
            }
        }
    }
}

fn describe_condition(what: &str, when: &str, params: &Map<String, Value>) -> String {
    match present(params, when).and_then(Value::as_str) {
        Some(v) => format!("{} when {} is '{}'", what, when, v),
        None => format!("{} when {} is set", what, when),
    }
}

/// Check raw parameters against the kind's schema.
pub fn validate(kind: OperationKind, parameters: &Value) -> Result<()> {
    let empty = Map::new();
    let params = match parameters {
        Value::Object(m) => m,
        Value::Null => &empty,
        _ => return Err(WrangleError::validation("parameters", "expected an object")),
    };
    let schema = describe(kind);
    let mut errors = Vec::new();

    for name in params.keys() {
        if !schema.fields.iter().any(|f| f.name == name) {
            errors.push(FieldError::new(name.as_str(), "unknown parameter"));
        }
    }
    for spec in &schema.fields {
        match present(params, spec.name) {
            None if spec.required => errors.push(FieldError::new(spec.name, "is required")),
            None => {}
            Some(v) => {
                if let Some(reason) = check_type(spec, v) {
                    errors.push(FieldError::new(spec.name, reason));
                }
            }
        }
    }
    // Cross-field rules are only meaningful once individual fields are sound.
    if errors.is_empty() {
        for c in &schema.constraints {
            check_constraint(c, params, &mut errors);
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(WrangleError::Validation(errors))
    }
}

/// Validate, then build the typed operation.
pub fn parse(kind: OperationKind, parameters: &Value) -> Result<Operation> {
    validate(kind, parameters)?;
    let params = match parameters {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(json!({"kind": kind.as_str(), "parameters": params}))
        .map_err(|e| WrangleError::validation("parameters", e.to_string()))
}

/// Validate, parse and confirm the engine supports the kind.
pub fn resolve(kind: &str, parameters: &Value, engine: Engine) -> Result<Operation> {
    let kind: OperationKind = kind
        .parse()
        .map_err(|e: String| WrangleError::validation("kind", e))?;
    let op = parse(kind, parameters)?;
    check_engine(kind, engine)?;
    Ok(op)
}
