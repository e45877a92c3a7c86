//! The closed operation vocabulary.
//!
//! Each kind carries a typed parameter record. Values are built by
//! [`crate::registry::parse`], which validates the raw JSON first so callers
//! get field-level errors instead of serde messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::expr::{AggFunc, CastTarget, Function};

/// Seed used by `sample` and `shuffle` when none is given, so replays match.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Filter,
    SelectColumns,
    Sort,
    Rename,
    DropColumns,
    DropDuplicates,
    Fillna,
    Dropna,
    Astype,
    GroupAggregate,
    Pivot,
    Melt,
    Merge,
    Sample,
    Shuffle,
    StringOp,
    DateExtract,
    CreateColumn,
    WindowFunction,
    RelationalSelect,
    RelationalProject,
    RelationalRename,
}

impl OperationKind {
    pub const ALL: [OperationKind; 22] = [
        Self::Filter,
        Self::SelectColumns,
        Self::Sort,
        Self::Rename,
        Self::DropColumns,
        Self::DropDuplicates,
        Self::Fillna,
        Self::Dropna,
        Self::Astype,
        Self::GroupAggregate,
        Self::Pivot,
        Self::Melt,
        Self::Merge,
        Self::Sample,
        Self::Shuffle,
        Self::StringOp,
        Self::DateExtract,
        Self::CreateColumn,
        Self::WindowFunction,
        Self::RelationalSelect,
        Self::RelationalProject,
        Self::RelationalRename,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::SelectColumns => "select_columns",
            Self::Sort => "sort",
            Self::Rename => "rename",
            Self::DropColumns => "drop_columns",
            Self::DropDuplicates => "drop_duplicates",
            Self::Fillna => "fillna",
            Self::Dropna => "dropna",
            Self::Astype => "astype",
            Self::GroupAggregate => "group_aggregate",
            Self::Pivot => "pivot",
            Self::Melt => "melt",
            Self::Merge => "merge",
            Self::Sample => "sample",
            Self::Shuffle => "shuffle",
            Self::StringOp => "string_op",
            Self::DateExtract => "date_extract",
            Self::CreateColumn => "create_column",
            Self::WindowFunction => "window_function",
            Self::RelationalSelect => "relational_select",
            Self::RelationalProject => "relational_project",
            Self::RelationalRename => "relational_rename",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let s = match s.as_str() {
            "join" => "merge",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown operation kind '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "parameters", rename_all = "snake_case")]
pub enum Operation {
    Filter(FilterParams),
    SelectColumns(ColumnsParams),
    Sort(SortParams),
    Rename(RenameParams),
    DropColumns(ColumnsParams),
    DropDuplicates(DropDuplicatesParams),
    Fillna(FillnaParams),
    Dropna(DropnaParams),
    Astype(AstypeParams),
    GroupAggregate(GroupAggregateParams),
    Pivot(PivotParams),
    Melt(MeltParams),
    Merge(MergeParams),
    Sample(SampleParams),
    Shuffle(ShuffleParams),
    StringOp(StringOpParams),
    DateExtract(DateExtractParams),
    CreateColumn(CreateColumnParams),
    WindowFunction(WindowParams),
    RelationalSelect(RelationalSelectParams),
    RelationalProject(RelationalProjectParams),
    RelationalRename(RelationalRenameParams),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Filter(_) => OperationKind::Filter,
            Self::SelectColumns(_) => OperationKind::SelectColumns,
            Self::Sort(_) => OperationKind::Sort,
            Self::Rename(_) => OperationKind::Rename,
            Self::DropColumns(_) => OperationKind::DropColumns,
            Self::DropDuplicates(_) => OperationKind::DropDuplicates,
            Self::Fillna(_) => OperationKind::Fillna,
            Self::Dropna(_) => OperationKind::Dropna,
            Self::Astype(_) => OperationKind::Astype,
            Self::GroupAggregate(_) => OperationKind::GroupAggregate,
            Self::Pivot(_) => OperationKind::Pivot,
            Self::Melt(_) => OperationKind::Melt,
            Self::Merge(_) => OperationKind::Merge,
            Self::Sample(_) => OperationKind::Sample,
            Self::Shuffle(_) => OperationKind::Shuffle,
            Self::StringOp(_) => OperationKind::StringOp,
            Self::DateExtract(_) => OperationKind::DateExtract,
            Self::CreateColumn(_) => OperationKind::CreateColumn,
            Self::WindowFunction(_) => OperationKind::WindowFunction,
            Self::RelationalSelect(_) => OperationKind::RelationalSelect,
            Self::RelationalProject(_) => OperationKind::RelationalProject,
            Self::RelationalRename(_) => OperationKind::RelationalRename,
        }
    }

    /// Names of other datasets this operation reads.
    pub fn related_datasets(&self) -> Vec<String> {
        match self {
            Self::Merge(p) => vec![p.right.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==", alias = "=", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "<>", alias = "ne")]
    NotEq,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "ge")]
    GtEq,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "le")]
    LtEq,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "startswith")]
    StartsWith,
    #[serde(rename = "endswith")]
    EndsWith,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "isin")]
    IsIn,
    #[serde(rename = "notin")]
    NotIn,
    #[serde(rename = "isnull")]
    IsNull,
    #[serde(rename = "notnull")]
    NotNull,
}

impl FilterOperator {
    /// Operators that test presence and take no value.
    pub const NULLARY: &'static [&'static str] = &["isnull", "notnull"];
}

/// Either `{column, operator, value}` or a free `expression`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnsParams {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ascending {
    All(bool),
    Each(Vec<bool>),
}

impl Default for Ascending {
    fn default() -> Self {
        Self::All(true)
    }
}

impl Ascending {
    /// Per-column `descending` flags for `n` sort keys.
    pub fn descending(&self, n: usize) -> Vec<bool> {
        match self {
            Self::All(asc) => vec![!asc; n],
            Self::Each(flags) => flags.iter().map(|asc| !asc).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortParams {
    pub columns: Vec<String>,
    #[serde(default)]
    pub ascending: Ascending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameParams {
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepRow {
    #[default]
    First,
    Last,
    /// Drop every row that has a duplicate.
    #[serde(rename = "none")]
    Neither,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropDuplicatesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<Vec<String>>,
    #[serde(default)]
    pub keep: KeepRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMethod {
    #[serde(alias = "ffill", alias = "pad")]
    Forward,
    #[serde(alias = "bfill")]
    Backward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillnaParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<FillMethod>,
    /// Columns to fill; all columns when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullHow {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropnaParams {
    #[serde(default)]
    pub how: NullHow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstypeParams {
    pub column: String,
    pub dtype: CastTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub function: AggFunc,
}

impl AggregationSpec {
    /// `{column}_{function}`, or `count` for a row count.
    pub fn output_name(&self) -> String {
        match &self.column {
            Some(c) => format!("{}_{}", c, self.function.name()),
            None => "count".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregateParams {
    pub group_by: Vec<String>,
    pub aggregations: Vec<AggregationSpec>,
}

fn default_pivot_agg() -> AggFunc {
    AggFunc::Mean
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotParams {
    #[serde(default)]
    pub index: Vec<String>,
    /// Column whose values become the new column names.
    pub columns: String,
    pub values: String,
    #[serde(default = "default_pivot_agg")]
    pub aggfunc: AggFunc,
}

fn default_var_name() -> String {
    "variable".to_string()
}

fn default_value_name() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeltParams {
    #[serde(default)]
    pub id_vars: Vec<String>,
    /// Every non-id column when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_vars: Option<Vec<String>>,
    #[serde(default = "default_var_name")]
    pub var_name: String,
    #[serde(default = "default_value_name")]
    pub value_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinHow {
    #[default]
    Inner,
    Left,
    #[serde(alias = "full")]
    Outer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    /// Name of the right-hand dataset.
    pub right: String,
    #[serde(default)]
    pub how: JoinHow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_on: Option<Vec<String>>,
}

impl MergeParams {
    /// Key pairs `(left, right)` in declaration order.
    pub fn key_pairs(&self) -> Vec<(String, String)> {
        match (&self.on, &self.left_on, &self.right_on) {
            (Some(on), _, _) => on.iter().map(|k| (k.clone(), k.clone())).collect(),
            (None, Some(l), Some(r)) => l.iter().cloned().zip(r.iter().cloned()).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frac: Option<f64>,
    #[serde(default)]
    pub replace: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShuffleParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringOperation {
    Upper,
    Lower,
    #[serde(alias = "trim")]
    Strip,
    #[serde(alias = "length")]
    Len,
    Replace,
    Contains,
    #[serde(alias = "starts_with")]
    Startswith,
    #[serde(alias = "ends_with")]
    Endswith,
}

impl StringOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Strip => "strip",
            Self::Len => "len",
            Self::Replace => "replace",
            Self::Contains => "contains",
            Self::Startswith => "startswith",
            Self::Endswith => "endswith",
        }
    }

    /// Operations that produce a new value type rather than a rewritten string.
    pub fn is_predicate_or_measure(self) -> bool {
        matches!(
            self,
            Self::Len | Self::Contains | Self::Startswith | Self::Endswith
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringOpParams {
    pub column: String,
    pub operation: StringOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column: Option<String>,
}

impl StringOpParams {
    pub fn output_name(&self) -> String {
        match &self.new_column {
            Some(name) => name.clone(),
            None if self.operation.is_predicate_or_measure() => {
                format!("{}_{}", self.column, self.operation.as_str())
            }
            None => self.column.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    #[serde(alias = "dayofweek", alias = "dow")]
    Weekday,
}

impl DatePart {
    pub fn function(self) -> Function {
        match self {
            Self::Year => Function::Year,
            Self::Month => Function::Month,
            Self::Day => Function::Day,
            Self::Hour => Function::Hour,
            Self::Minute => Function::Minute,
            Self::Second => Function::Second,
            Self::Weekday => Function::Weekday,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateExtractParams {
    pub column: String,
    pub part: DatePart,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column: Option<String>,
}

impl DateExtractParams {
    pub fn output_name(&self) -> String {
        self.new_column
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.column, self.part.function().name()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateColumnParams {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    #[serde(alias = "cum_sum")]
    Cumsum,
    #[serde(alias = "cum_min")]
    Cummin,
    #[serde(alias = "cum_max")]
    Cummax,
    Lead,
    Lag,
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl WindowFunc {
    pub const ORDERED: &'static [&'static str] = &[
        "row_number",
        "rank",
        "dense_rank",
        "cumsum",
        "cummin",
        "cummax",
        "cum_sum",
        "cum_min",
        "cum_max",
        "lead",
        "lag",
    ];
    pub const COLUMNLESS: &'static [&'static str] = &["row_number", "rank", "dense_rank", "count"];
    pub const SHIFTING: &'static [&'static str] = &["lead", "lag"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RowNumber => "row_number",
            Self::Rank => "rank",
            Self::DenseRank => "dense_rank",
            Self::Cumsum => "cumsum",
            Self::Cummin => "cummin",
            Self::Cummax => "cummax",
            Self::Lead => "lead",
            Self::Lag => "lag",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    pub fn is_ordered(self) -> bool {
        Self::ORDERED.contains(&self.as_str())
    }

    /// Partition aggregate equivalent, for the unordered functions.
    pub fn partition_agg(self) -> Option<AggFunc> {
        match self {
            Self::Sum => Some(AggFunc::Sum),
            Self::Mean => Some(AggFunc::Mean),
            Self::Min => Some(AggFunc::Min),
            Self::Max => Some(AggFunc::Max),
            Self::Count => Some(AggFunc::Count),
            _ => None,
        }
    }
}

fn default_offset() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    pub function: WindowFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub partition_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default = "default_true")]
    pub ascending: bool,
    #[serde(default = "default_offset")]
    pub offset: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column: Option<String>,
}

impl WindowParams {
    pub fn output_name(&self) -> String {
        if let Some(name) = &self.new_column {
            return name.clone();
        }
        match &self.column {
            Some(c) => format!("{}_{}", c, self.function.as_str()),
            None => self.function.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalSelectParams {
    pub predicate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalProjectParams {
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenamePair {
    pub old: String,
    pub new: String,
}

/// Either a `mapping` object or an ordered `renames` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalRenameParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renames: Option<Vec<RenamePair>>,
}

impl RelationalRenameParams {
    pub fn pairs(&self) -> Vec<(String, String)> {
        match (&self.mapping, &self.renames) {
            (Some(m), _) => m.iter().map(|(o, n)| (o.clone(), n.clone())).collect(),
            (None, Some(r)) => r.iter().map(|p| (p.old.clone(), p.new.clone())).collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_serde_shape() {
        let op: Operation = serde_json::from_value(json!({
            "kind": "filter",
            "parameters": {"column": "region", "operator": "==", "value": "A"}
        }))
        .unwrap();
        assert_eq!(op.kind(), OperationKind::Filter);
        match &op {
            Operation::Filter(p) => {
                assert_eq!(p.operator, Some(FilterOperator::Eq));
                assert_eq!(p.value, Some(json!("A")));
            }
            other => panic!("unexpected {:?}", other),
        }
        let back = serde_json::to_value(&op).unwrap();
        assert_eq!(back["kind"], "filter");
    }

    #[test]
    fn test_kind_names_match_serde_tags() {
        for kind in OperationKind::ALL {
            let tag = serde_json::to_value(kind).unwrap();
            assert_eq!(tag, json!(kind.as_str()));
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert_eq!("join".parse::<OperationKind>().unwrap(), OperationKind::Merge);
    }

    #[test]
    fn test_defaults() {
        let p: WindowParams = serde_json::from_value(json!({"function": "lag", "column": "x"})).unwrap();
        assert_eq!(p.offset, 1);
        assert!(p.ascending);
        assert_eq!(p.output_name(), "x_lag");
        let d: DropDuplicatesParams = serde_json::from_value(json!({"keep": "none"})).unwrap();
        assert_eq!(d.keep, KeepRow::Neither);
    }

    #[test]
    fn test_ascending_forms() {
        let a: SortParams = serde_json::from_value(json!({"columns": ["a", "b"], "ascending": false})).unwrap();
        assert_eq!(a.ascending.descending(2), vec![true, true]);
        let b: SortParams =
            serde_json::from_value(json!({"columns": ["a", "b"], "ascending": [true, false]})).unwrap();
        assert_eq!(b.ascending.descending(2), vec![false, true]);
    }

    #[test]
    fn test_aggregation_names() {
        let spec = AggregationSpec {
            column: Some("amount".to_string()),
            function: AggFunc::Sum,
        };
        assert_eq!(spec.output_name(), "amount_sum");
        let count = AggregationSpec {
            column: None,
            function: AggFunc::Count,
        };
        assert_eq!(count.output_name(), "count");
    }
}
