//! A PromQL expression tree, its parser and its canonical rendering.
//!
//! Only parsing, inspection and rendering are supported; nothing is evaluated.
//!
//! ```
//! use prom_label_enforcer::promql;
//!
//! let expr = promql::parse(r#"rate(http_requests_total{job="api"}[90s])"#).unwrap();
//! assert_eq!(expr.to_string(), r#"rate(http_requests_total{job="api"}[1m30s])"#);
//! ```
use crate::{
    escape::Quoted,
    exposition::Float,
};
use derive_more::Constructor;
pub use parser::{
    is_valid_label_name,
    parse,
    ParseError,
};
use std::fmt::{
    Display,
    Formatter,
};

mod parser;

/// How a matcher compares a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum MatchType {
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "=~")]
    RegexMatch,
    #[strum(serialize = "!~")]
    RegexNoMatch,
}

/// A label constraint of a selector.
///
/// Example:
/// ```text
/// container=~".*apiserver.*"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Matcher {
    pub match_type: MatchType,
    pub name: String,
    /// The value, unescaped
    pub value: String,
}

impl Matcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(MatchType::Equal, name.into(), value.into())
    }

    /// Whether the matcher accepts series that do not carry the label at all.
    ///
    /// Regular expressions are not compiled, only the usual match-anything patterns are
    /// recognised.
    pub fn matches_empty(&self) -> bool {
        let matches_anything = matches!(self.value.as_str(), "" | ".*" | ".*?" | "^.*$");
        match self.match_type {
            MatchType::Equal => self.value.is_empty(),
            MatchType::NotEqual => !self.value.is_empty(),
            MatchType::RegexMatch => matches_anything,
            MatchType::RegexNoMatch => !self.value.is_empty(),
        }
    }
}

impl Display for Matcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.name, self.match_type, Quoted(&self.value))
    }
}

/// A time span with millisecond resolution, as written in `[5m]` or `offset 1h30m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    const UNITS: [(&'static str, u64, bool); 7] = [
        ("y", 365 * 24 * 60 * 60 * 1000, true),
        ("w", 7 * 24 * 60 * 60 * 1000, true),
        ("d", 24 * 60 * 60 * 1000, false),
        ("h", 60 * 60 * 1000, false),
        ("m", 60 * 1000, false),
        ("s", 1000, false),
        ("ms", 1, false),
    ];

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Display for Duration {
    /// The canonical spelling: `90s` is `1m30s`. Years and weeks are only used when they divide
    /// the duration exactly.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            return f.write_str("0s");
        }
        let mut rest = self.0;
        for (unit, millis, exact) in Self::UNITS {
            if exact && rest % millis != 0 {
                continue;
            }
            let count = rest / millis;
            if count > 0 {
                write!(f, "{count}{unit}")?;
                rest -= count * millis;
            }
        }
        Ok(())
    }
}

/// An instant vector selector.
///
/// Example:
/// ```text
/// http_requests_total{job="api",code!="200"} offset 5m
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Constructor)]
pub struct VectorSelector {
    /// The metric name written in front of the braces, if any
    pub name: Option<String>,
    pub matchers: Vec<Matcher>,
    pub offset: Option<Duration>,
}

impl VectorSelector {
    /// A selector must name a metric or carry a matcher that rejects series without the label.
    pub fn is_selective(&self) -> bool {
        self.name.is_some() || self.matchers.iter().any(|matcher| !matcher.matches_empty())
    }

    fn fmt_series(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name.as_deref() {
            f.write_str(name)?;
        }
        if self.matchers.is_empty() && self.name.is_some() {
            return Ok(());
        }
        f.write_str("{")?;
        for (idx, matcher) in self.matchers.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{matcher}")?;
        }
        f.write_str("}")
    }

    fn fmt_offset(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.offset {
            Some(offset) => write!(f, " offset {offset}"),
            None => Ok(()),
        }
    }
}

impl Display for VectorSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_series(f)?;
        self.fmt_offset(f)
    }
}

/// A range vector selector: a vector selector with a time window.
///
/// Example:
/// ```text
/// container_cpu_usage_seconds_total{namespace="kube-system"}[5m]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct MatrixSelector {
    pub selector: VectorSelector,
    pub range: Duration,
}

impl Display for MatrixSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.selector.fmt_series(f)?;
        write!(f, "[{}]", self.range)?;
        self.selector.fmt_offset(f)
    }
}

/// Aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
#[strum(serialize_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Min,
    Max,
    Avg,
    Group,
    Stddev,
    Stdvar,
    Count,
    CountValues,
    Bottomk,
    Topk,
    Quantile,
}

impl AggregateOp {
    /// Whether the operator takes a parameter before the aggregated expression
    pub fn takes_param(self) -> bool {
        matches!(
            self,
            Self::CountValues | Self::Bottomk | Self::Topk | Self::Quantile
        )
    }
}

/// The labels an aggregation groups by, or drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    By(Vec<String>),
    Without(Vec<String>),
}

impl Display for Grouping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::By(labels) => write!(f, "by({})", labels.join(", ")),
            Self::Without(labels) => write!(f, "without({})", labels.join(", ")),
        }
    }
}

/// Example:
/// ```text
/// topk by(job) (5, rate(http_requests_total[5m]))
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct AggregateExpr {
    pub op: AggregateOp,
    pub expr: Box<Expr>,
    pub param: Option<Box<Expr>>,
    pub grouping: Option<Grouping>,
}

impl Display for AggregateExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)?;
        if let Some(grouping) = &self.grouping {
            write!(f, " {grouping} ")?;
        }
        match &self.param {
            Some(param) => write!(f, "({param}, {})", self.expr),
            None => write!(f, "({})", self.expr),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "^")]
    Pow,
    #[strum(serialize = "atan2")]
    Atan2,
    #[strum(serialize = "==")]
    Eql,
    #[strum(serialize = "!=")]
    Neq,
    #[strum(serialize = "<")]
    Lss,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gtr,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "unless")]
    Unless,
}

impl BinaryOp {
    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And | Self::Unless => 2,
            Self::Eql | Self::Neq | Self::Lss | Self::Lte | Self::Gtr | Self::Gte => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div | Self::Mod | Self::Atan2 => 5,
            Self::Pow => 6,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == Self::Pow
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 3
    }
}

/// Which labels two vectors are matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelMatching {
    On(Vec<String>),
    Ignoring(Vec<String>),
}

/// A many-to-one or one-to-many match, with the labels copied from the "one" side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupModifier {
    Left(Vec<String>),
    Right(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct VectorMatching {
    pub labels: LabelMatching,
    pub group: Option<GroupModifier>,
}

impl Display for VectorMatching {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.labels {
            LabelMatching::On(labels) => write!(f, "on({})", labels.join(", "))?,
            LabelMatching::Ignoring(labels) => write!(f, "ignoring({})", labels.join(", "))?,
        }
        match &self.group {
            Some(GroupModifier::Left(labels)) => write!(f, " group_left({})", labels.join(", ")),
            Some(GroupModifier::Right(labels)) => write!(f, " group_right({})", labels.join(", ")),
            None => Ok(()),
        }
    }
}

/// Example:
/// ```text
/// a / on(instance) group_left(version) b
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    /// The `bool` modifier of comparisons
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
}

impl Display for BinaryExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.lhs, self.op)?;
        if self.return_bool {
            f.write_str(" bool")?;
        }
        if let Some(matching) = &self.matching {
            write!(f, " {matching}")?;
        }
        write!(f, " {}", self.rhs)
    }
}

/// A function call.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.func)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A node of a PromQL expression tree.
///
/// Only the two selector variants own label matchers.
#[derive(Debug, Clone, PartialEq, Eq, strum::AsRefStr)]
pub enum Expr {
    NumberLiteral(Float),
    StringLiteral(String),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    #[strum(serialize = "ParenExpr")]
    Paren(Box<Expr>),
    /// Negation. A unary `+` is dropped while parsing.
    #[strum(serialize = "UnaryExpr")]
    Unary(Box<Expr>),
    #[strum(serialize = "BinaryExpr")]
    Binary(BinaryExpr),
    #[strum(serialize = "AggregateExpr")]
    Aggregate(AggregateExpr),
    Call(Call),
}

impl Expr {
    /// The direct sub-expressions, in rendering order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::NumberLiteral(_)
            | Self::StringLiteral(_)
            | Self::VectorSelector(_)
            | Self::MatrixSelector(_) => Vec::new(),
            Self::Paren(expr) | Self::Unary(expr) => vec![&**expr],
            Self::Binary(binary) => vec![&*binary.lhs, &*binary.rhs],
            Self::Aggregate(aggregate) => {
                let mut children = Vec::with_capacity(2);
                if let Some(param) = &aggregate.param {
                    children.push(&**param);
                }
                children.push(&*aggregate.expr);
                children
            }
            Self::Call(call) => call.args.iter().collect(),
        }
    }

    /// The direct sub-expressions, mutably.
    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Self::NumberLiteral(_)
            | Self::StringLiteral(_)
            | Self::VectorSelector(_)
            | Self::MatrixSelector(_) => Vec::new(),
            Self::Paren(expr) | Self::Unary(expr) => vec![&mut **expr],
            Self::Binary(binary) => vec![&mut *binary.lhs, &mut *binary.rhs],
            Self::Aggregate(aggregate) => {
                let mut children = Vec::with_capacity(2);
                if let Some(param) = &mut aggregate.param {
                    children.push(&mut **param);
                }
                children.push(&mut *aggregate.expr);
                children
            }
            Self::Call(call) => call.args.iter_mut().collect(),
        }
    }

    /// The matchers of a selector node, `None` for any other node.
    pub fn matchers(&self) -> Option<&[Matcher]> {
        match self {
            Self::VectorSelector(selector) | Self::MatrixSelector(MatrixSelector { selector, .. }) => {
                Some(selector.matchers.as_slice())
            }
            _ => None,
        }
    }

    pub fn matchers_mut(&mut self) -> Option<&mut Vec<Matcher>> {
        match self {
            Self::VectorSelector(selector) | Self::MatrixSelector(MatrixSelector { selector, .. }) => {
                Some(&mut selector.matchers)
            }
            _ => None,
        }
    }

    /// Visit this node and then every node below it, depth first.
    pub fn walk<F: FnMut(&Expr)>(&self, visit: &mut F) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Visit this node and then every node below it, depth first, with mutable access.
    pub fn walk_mut<F: FnMut(&mut Expr)>(&mut self, visit: &mut F) {
        visit(self);
        for child in self.children_mut() {
            child.walk_mut(visit);
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NumberLiteral(number) => write!(f, "{number}"),
            Self::StringLiteral(string) => write!(f, "{}", Quoted(string)),
            Self::VectorSelector(selector) => write!(f, "{selector}"),
            Self::MatrixSelector(selector) => write!(f, "{selector}"),
            Self::Paren(expr) => write!(f, "({expr})"),
            Self::Unary(expr) => write!(f, "-{expr}"),
            Self::Binary(binary) => write!(f, "{binary}"),
            Self::Aggregate(aggregate) => write!(f, "{aggregate}"),
            Self::Call(call) => write!(f, "{call}"),
        }
    }
}

/// Renders an expression as an indented tree, one node per line:
///
/// ```text
///  |---- BinaryExpr :: a + b
///  · · · |---- VectorSelector :: a
///  · · · |---- VectorSelector :: b
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Tree<'a>(pub &'a Expr);

impl Tree<'_> {
    fn fmt_level(expr: &Expr, level: &mut String, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{level} |---- {} :: {expr}", expr.as_ref())?;
        let depth = level.len();
        level.push_str(" · · ·");
        for child in expr.children() {
            Self::fmt_level(child, level, f)?;
        }
        level.truncate(depth);
        Ok(())
    }
}

impl Display for Tree<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Self::fmt_level(self.0, &mut String::new(), f)
    }
}
