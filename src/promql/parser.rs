use super::{
    AggregateExpr,
    AggregateOp,
    BinaryExpr,
    BinaryOp,
    Call,
    Duration,
    Expr,
    GroupModifier,
    Grouping,
    LabelMatching,
    MatchType,
    MatrixSelector,
    Matcher,
    VectorMatching,
    VectorSelector,
};
use crate::{
    escape::unescape,
    exposition::Float,
};
use winnow::{
    ascii::{
        digit1,
        escaped,
        multispace0,
        Caseless,
    },
    combinator::{
        alt,
        cut_err,
        delimited,
        fail,
        not,
        opt,
        preceded,
        repeat,
        separated,
        terminated,
    },
    error::{
        ContextError,
        StrContext,
    },
    token::{
        none_of,
        one_of,
        tag,
        take_till,
        take_while,
    },
    PResult,
    Parser,
};

/// The functions a call may name.
const FUNCTIONS: &[&str] = &[
    "abs",
    "absent",
    "absent_over_time",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "exp",
    "floor",
    "histogram_quantile",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "irate",
    "label_join",
    "label_replace",
    "last_over_time",
    "ln",
    "log10",
    "log2",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "pi",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "scalar",
    "sgn",
    "sin",
    "sinh",
    "sort",
    "sort_desc",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "time",
    "timestamp",
    "vector",
    "year",
];

/// Characters that may continue an identifier
const IDENT_REST: (
    std::ops::RangeInclusive<char>,
    std::ops::RangeInclusive<char>,
    std::ops::RangeInclusive<char>,
    char,
    char,
) = ('a'..='z', 'A'..='Z', '0'..='9', '_', ':');

/// A syntax error in a PromQL expression.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor, thiserror::Error)]
#[error("invalid expression `{query}`: {reason}")]
pub struct ParseError {
    pub query: String,
    pub reason: String,
}

/// Parse a PromQL expression.
pub fn parse(query: &str) -> Result<Expr, ParseError> {
    delimited(multispace0, expr_parser, multispace0)
        .parse(query)
        .map_err(|error| ParseError::new(query.to_owned(), error.to_string()))
}

/// Whether `name` is a valid label name: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    label_name_parser.parse(name).is_ok()
}

/// A keyword, case insensitive, not followed by an identifier character.
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, &'a str, ContextError> {
    terminated(tag(Caseless(word)), not(one_of(IDENT_REST)))
}

/// Parse a metric name. Unlike label names, these may contain colons.
fn metric_name_parser(input: &mut &str) -> PResult<String> {
    let start_group = ('a'..='z', 'A'..='Z', '_', ':');
    (one_of(start_group), take_while(0.., IDENT_REST))
        .recognize()
        .map(str::to_owned)
        .parse_next(input)
}

fn label_name_parser(input: &mut &str) -> PResult<String> {
    let start_group = ('a'..='z', 'A'..='Z', '_');
    let rest_group = ('a'..='z', 'A'..='Z', '0'..='9', '_');
    (one_of(start_group), take_while(0.., rest_group))
        .recognize()
        .map(str::to_owned)
        .parse_next(input)
}

/// Parse a string literal in double quotes, single quotes or backticks. Backticks do not
/// support escapes.
///
/// Examples:
/// * `"kube-system"`
/// * `'.*apiserver.*'`
/// * `` `\d+` ``
fn string_literal_parser(input: &mut &str) -> PResult<String> {
    const ESCAPABLE: [char; 6] = ['"', '\'', '\\', 'n', 't', 'r'];
    let double_quoted = preceded(
        '"',
        cut_err(terminated(
            escaped(none_of(['"', '\\']), '\\', one_of(ESCAPABLE)),
            '"',
        )),
    );
    let single_quoted = preceded(
        '\'',
        cut_err(terminated(
            escaped(none_of(['\'', '\\']), '\\', one_of(ESCAPABLE)),
            '\'',
        )),
    );
    let raw = preceded('`', cut_err(terminated(take_till(0.., '`'), '`')));
    alt((
        double_quoted.map(|quoted: &str| unescape(quoted).into_owned()),
        single_quoted.map(|quoted: &str| unescape(quoted).into_owned()),
        raw.map(str::to_owned),
    ))
    .context(StrContext::Label("string"))
    .parse_next(input)
}

/// Parse a number literal without sign. `Inf` and `NaN` are handled with identifiers.
fn number_literal_parser(input: &mut &str) -> PResult<Float> {
    let mantissa = alt((
        (digit1, opt(('.', opt(digit1)))).void(),
        ('.', digit1).void(),
    ));
    let exponent = opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), cut_err(digit1)));
    (mantissa, exponent)
        .recognize()
        .parse_to()
        .parse_next(input)
}

/// Parse a duration, possibly made of several units.
///
/// Examples:
/// * `5m`
/// * `1h30m`
/// * `250ms`
fn duration_parser(input: &mut &str) -> PResult<Duration> {
    let unit = alt((
        tag("ms").value(1u64),
        tag("s").value(1000),
        tag("m").value(60 * 1000),
        tag("h").value(60 * 60 * 1000),
        tag("d").value(24 * 60 * 60 * 1000),
        tag("w").value(7 * 24 * 60 * 60 * 1000),
        tag("y").value(365 * 24 * 60 * 60 * 1000),
    ));
    let part = (digit1.parse_to::<u64>(), unit).map(|(count, millis)| count.saturating_mul(millis));
    let parts: Vec<u64> = repeat(1.., part)
        .context(StrContext::Label("duration"))
        .parse_next(input)?;
    Ok(Duration::from_millis(parts.into_iter().fold(0, u64::saturating_add)))
}

fn match_type_parser(input: &mut &str) -> PResult<MatchType> {
    alt((tag("=~"), tag("!~"), tag("!="), tag("=")))
        .parse_to()
        .parse_next(input)
}

/// Parse a label matcher.
///
/// Examples:
/// * `namespace="kube-system"`
/// * `container =~ ".*apiserver.*"`
fn matcher_parser(input: &mut &str) -> PResult<Matcher> {
    let name = label_name_parser.parse_next(input)?;
    let match_type = preceded(multispace0, match_type_parser).parse_next(input)?;
    let value = cut_err(preceded(multispace0, string_literal_parser)).parse_next(input)?;
    Ok(Matcher::new(match_type, name, value))
}

/// Parse the braces of a selector. A trailing comma is accepted.
///
/// Examples:
/// * `{app="",namespace="kube-system"}`
/// * `{ job = "api", }`
fn matchers_parser(input: &mut &str) -> PResult<Vec<Matcher>> {
    let separator = (multispace0, ',', multispace0);
    let list = terminated(
        separated(0.., matcher_parser, separator),
        opt((multispace0, ',')),
    );
    delimited(('{', multispace0), list, cut_err((multispace0, '}')))
        .context(StrContext::Label("label matchers"))
        .parse_next(input)
}

/// Parse a parenthesised list of label names, as used by `by`, `on` or `group_left`.
fn label_list_parser(input: &mut &str) -> PResult<Vec<String>> {
    let separator = (multispace0, ',', multispace0);
    let list = terminated(
        separated(0.., label_name_parser, separator),
        opt((multispace0, ',')),
    );
    delimited(('(', multispace0), list, cut_err((multispace0, ')')))
        .context(StrContext::Label("label list"))
        .parse_next(input)
}

fn grouping_parser(input: &mut &str) -> PResult<Grouping> {
    alt((
        preceded((keyword("by"), multispace0), cut_err(label_list_parser)).map(Grouping::By),
        preceded((keyword("without"), multispace0), cut_err(label_list_parser))
            .map(Grouping::Without),
    ))
    .parse_next(input)
}

/// Parse the arguments of a call or an aggregation: `(a, b)`
fn arguments_parser(input: &mut &str) -> PResult<Vec<Expr>> {
    let separator = (multispace0, ',', multispace0);
    delimited(
        ('(', multispace0),
        separated(0.., expr_parser, separator),
        cut_err((multispace0, ')')),
    )
    .context(StrContext::Label("arguments"))
    .parse_next(input)
}

/// Parse the rest of an aggregation once its operator is known.
///
/// Examples (after the operator):
/// * `(rate(x[5m]))`
/// * ` by (job) (x)`
/// * `(x) without (instance)`
/// * `(5, x)` for `topk`
fn aggregate_parser(op: AggregateOp, input: &mut &str) -> PResult<AggregateExpr> {
    let leading = opt(preceded(multispace0, grouping_parser)).parse_next(input)?;
    let args = preceded(multispace0, arguments_parser).parse_next(input)?;
    let grouping = match leading {
        Some(grouping) => Some(grouping),
        None => opt(preceded(multispace0, grouping_parser)).parse_next(input)?,
    };
    let mut args = args.into_iter();
    let (param, expr) = match (op.takes_param(), args.next(), args.next(), args.next()) {
        (false, Some(expr), None, None) => (None, expr),
        (true, Some(param), Some(expr), None) => (Some(Box::new(param)), expr),
        _ => {
            return cut_err(fail)
                .context(StrContext::Label("aggregation arguments"))
                .parse_next(input)
        }
    };
    Ok(AggregateExpr::new(op, Box::new(expr), param, grouping))
}

/// Parse everything that starts with an identifier: aggregations, calls, `Inf`/`NaN` and
/// selectors with a metric name.
fn identifier_expr_parser(input: &mut &str) -> PResult<Expr> {
    let name = metric_name_parser.parse_next(input)?;
    if let Ok(op) = name.parse::<AggregateOp>() {
        return cut_err(move |input: &mut &str| aggregate_parser(op, input))
            .map(Expr::Aggregate)
            .parse_next(input);
    }

    let rest = input.trim_start();
    if rest.starts_with('(') {
        *input = rest;
        if !FUNCTIONS.contains(&name.as_str()) {
            return cut_err(fail)
                .context(StrContext::Label("function name"))
                .parse_next(input);
        }
        let args = arguments_parser.parse_next(input)?;
        return Ok(Expr::Call(Call::new(name, args)));
    }

    if name.eq_ignore_ascii_case("inf") || name.eq_ignore_ascii_case("nan") {
        return Ok(Expr::NumberLiteral(Float::from(name)));
    }
    let matchers = opt(preceded(multispace0, matchers_parser))
        .parse_next(input)?
        .unwrap_or_default();
    Ok(Expr::VectorSelector(VectorSelector::new(
        Some(name),
        matchers,
        None,
    )))
}

/// Parse a selector without metric name: `{job="api"}`
fn bare_selector_parser(input: &mut &str) -> PResult<Expr> {
    matchers_parser
        .map(|matchers| VectorSelector::new(None, matchers, None))
        .verify(VectorSelector::is_selective)
        .context(StrContext::Label("selector with at least one non-empty matcher"))
        .map(Expr::VectorSelector)
        .parse_next(input)
}

fn paren_expr_parser(input: &mut &str) -> PResult<Expr> {
    delimited(
        ('(', multispace0),
        cut_err(expr_parser),
        cut_err((multispace0, ')')),
    )
    .map(|expr| Expr::Paren(Box::new(expr)))
    .parse_next(input)
}

/// Parse a range (`[5m]`) and an offset (`offset 1h`) following a selector.
fn selector_suffix_parser(expr: Expr, input: &mut &str) -> PResult<Expr> {
    let range = opt(preceded(
        multispace0,
        delimited(
            ('[', multispace0),
            cut_err(duration_parser),
            cut_err((multispace0, ']')),
        ),
    ))
    .parse_next(input)?;
    let mut expr = match (expr, range) {
        (expr, None) => expr,
        (Expr::VectorSelector(selector), Some(range)) => {
            Expr::MatrixSelector(MatrixSelector::new(selector, range))
        }
        (_, Some(_)) => {
            return cut_err(fail)
                .context(StrContext::Label("range on a vector selector"))
                .parse_next(input)
        }
    };

    let offset = opt(preceded(
        (multispace0, keyword("offset"), multispace0),
        cut_err(duration_parser),
    ))
    .parse_next(input)?;
    if let Some(offset) = offset {
        match &mut expr {
            Expr::VectorSelector(selector)
            | Expr::MatrixSelector(MatrixSelector { selector, .. }) => {
                selector.offset = Some(offset);
            }
            _ => {
                return cut_err(fail)
                    .context(StrContext::Label("offset on a selector"))
                    .parse_next(input)
            }
        }
    }
    Ok(expr)
}

/// Parse an operand of a binary expression, without sign.
fn operand_parser(input: &mut &str) -> PResult<Expr> {
    let expr = alt((
        paren_expr_parser,
        string_literal_parser.map(Expr::StringLiteral),
        number_literal_parser.map(Expr::NumberLiteral),
        identifier_expr_parser,
        bare_selector_parser,
    ))
    .parse_next(input)?;
    selector_suffix_parser(expr, input)
}

/// Parse an operand with an optional sign. The sign binds looser than `^`, so `-2 ^ 2` is
/// `-(2 ^ 2)`. A negated number is folded into the literal.
fn unary_expr_parser(input: &mut &str) -> PResult<Expr> {
    let Some(sign) = opt(terminated(one_of(['+', '-']), multispace0)).parse_next(input)? else {
        return operand_parser(input);
    };
    let expr = binary_expr_parser(input, BinaryOp::Pow.precedence())?;
    Ok(match (sign, expr) {
        ('-', Expr::NumberLiteral(number)) => Expr::NumberLiteral(number.negated()),
        ('-', expr) => Expr::Unary(Box::new(expr)),
        (_, expr) => expr,
    })
}

fn binary_op_parser(input: &mut &str) -> PResult<BinaryOp> {
    alt((
        alt((
            tag("=="),
            tag("!="),
            tag("<="),
            tag(">="),
            tag("<"),
            tag(">"),
        )),
        alt((tag("+"), tag("-"), tag("*"), tag("/"), tag("%"), tag("^"))),
        alt((
            keyword("and"),
            keyword("or"),
            keyword("unless"),
            keyword("atan2"),
        )),
    ))
    .parse_to()
    .parse_next(input)
}

/// Parse `on(...)`/`ignoring(...)`, optionally followed by `group_left(...)`/`group_right(...)`.
fn vector_matching_parser(input: &mut &str) -> PResult<VectorMatching> {
    let labels = alt((
        preceded((keyword("on"), multispace0), cut_err(label_list_parser)).map(LabelMatching::On),
        preceded((keyword("ignoring"), multispace0), cut_err(label_list_parser))
            .map(LabelMatching::Ignoring),
    ))
    .parse_next(input)?;
    let group = opt(preceded(
        multispace0,
        alt((
            preceded((keyword("group_left"), multispace0), opt(label_list_parser))
                .map(|labels| GroupModifier::Left(labels.unwrap_or_default())),
            preceded((keyword("group_right"), multispace0), opt(label_list_parser))
                .map(|labels| GroupModifier::Right(labels.unwrap_or_default())),
        )),
    ))
    .parse_next(input)?;
    Ok(VectorMatching::new(labels, group))
}

/// Precedence climbing over binary operators. Only operators binding at least as tight as
/// `min_precedence` are consumed.
fn binary_expr_parser(input: &mut &str, min_precedence: u8) -> PResult<Expr> {
    let mut lhs = unary_expr_parser(input)?;
    loop {
        let checkpoint = *input;
        let Some(op) = opt(preceded(multispace0, binary_op_parser)).parse_next(input)? else {
            break;
        };
        let precedence = op.precedence();
        if precedence < min_precedence {
            *input = checkpoint;
            break;
        }
        let return_bool = opt(preceded(multispace0, keyword("bool")))
            .parse_next(input)?
            .is_some();
        if return_bool && !op.is_comparison() {
            return cut_err(fail)
                .context(StrContext::Label("bool modifier on a comparison"))
                .parse_next(input);
        }
        let matching = opt(preceded(multispace0, vector_matching_parser)).parse_next(input)?;
        let next_precedence = match op.is_right_associative() {
            true => precedence,
            false => precedence + 1,
        };
        let rhs = preceded(
            multispace0,
            cut_err(move |input: &mut &str| binary_expr_parser(input, next_precedence)),
        )
        .parse_next(input)?;
        lhs = Expr::Binary(BinaryExpr::new(
            op,
            Box::new(lhs),
            Box::new(rhs),
            return_bool,
            matching,
        ));
    }
    Ok(lhs)
}

/// Parse a complete expression, leaving any trailing spaces in place.
fn expr_parser(input: &mut &str) -> PResult<Expr> {
    binary_expr_parser(input, 0)
}
