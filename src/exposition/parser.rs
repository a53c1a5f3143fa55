use super::{
    Float,
    Label,
    Labels,
    Metric,
    MetricFamily,
    Type,
    Value,
    ValueType,
};
use crate::escape::unescape;
use std::ops::Range;
use tracing::{
    debug,
    trace,
};
use winnow::{
    ascii::{
        digit1,
        escaped,
        newline,
        space0,
        space1,
        Caseless,
    },
    combinator::{
        alt,
        cut_err,
        delimited,
        eof,
        opt,
        preceded,
        separated,
        terminated,
    },
    stream::{
        Accumulate,
        AsChar,
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

/// Parse a valid prometheus `metric_name` or `label_name`.
fn name_parser(input: &mut &str) -> PResult<String> {
    let start_group = ('a'..='z', 'A'..='Z', '_', ':');
    let rest_group = ('a'..='z', 'A'..='Z', '0'..='9', '_', ':');
    (one_of(start_group), take_while(0.., rest_group))
        .recognize()
        .map(str::to_owned)
        .parse_next(input)
}

/// Parse a quoted label value, resolving its escapes.
///
/// Examples:
///
/// * `"Test"`
/// * `"Cannot find file:\n\"FILE.TXT\""`
fn label_value_parser(input: &mut &str) -> PResult<String> {
    let escaped = escaped(none_of(br#""\"#), '\\', one_of(br#""n\"#));
    preceded('\"', cut_err(terminated(escaped, '\"')))
        .map(|raw: &str| unescape(raw).into_owned())
        .parse_next(input)
}

/// Parse a label pair.
///
/// Examples:
///
/// * `key1="value1"`
/// * `key = "value"`
fn label_parser(input: &mut &str) -> PResult<Label> {
    let key = name_parser.parse_next(input)?;
    let _ = (space0, '=', space0).parse_next(input)?;
    let value = label_value_parser.parse_next(input)?;
    Ok(Label::new(key, value))
}

// Lets `separated` collect label pairs straight into `Labels`
impl Accumulate<Label> for Labels {
    fn initial(capacity: Option<usize>) -> Self {
        Vec::with_capacity(capacity.unwrap_or(4)).into()
    }

    fn accumulate(&mut self, label: Label) {
        self.push(label);
    }
}

/// Parses a possibly empty list of labels delimited by braces. A trailing comma is accepted.
///
/// Examples:
/// * `{key1="value1",key2="value2"}`
/// * `{ key1="value1", key2 = "value2", }`
/// * `{}`
fn labels_parser(input: &mut &str) -> PResult<Labels> {
    let separator = (space0, ',', space0);
    let list = terminated(separated(0.., label_parser, separator), opt((space0, ',')));
    let start_delimiter = ("{", space0);
    let end_delimiter = (space0, "}");
    delimited(start_delimiter, list, end_delimiter).parse_next(input)
}

/// Parse a valid Prometheus float value (+Inf, -Inf, NaN, ...)
fn float_value_parser(input: &mut &str) -> PResult<Float> {
    let number = (
        opt(one_of(['+', '-'])),
        alt((
            (digit1, opt(('.', opt(digit1)))).void(),
            ('.', digit1).void(),
        )),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), cut_err(digit1))),
    )
        .recognize();
    let nan = tag(Caseless("nan"));
    let inf = alt((tag(Caseless("inf")), tag(Caseless("+inf"))));
    let neg_inf = tag(Caseless("-inf"));
    alt((number, nan, inf, neg_inf))
        .parse_to()
        .parse_next(input)
}

/// Parse a timestamp in milliseconds
fn timestamp_parser(input: &mut &str) -> PResult<i64> {
    let prefix = opt(one_of(['+', '-']));
    (prefix, digit1).recognize().parse_to().parse_next(input)
}

/// Succeeds on a new line (consuming it) or at the end of the input
fn new_line_or_eof_parser(input: &mut &str) -> PResult<()> {
    alt((eof.void(), newline.void())).parse_next(input)
}

/// The rest of the line without its leading spaces, consuming the new line after it
fn rest_of_the_line_parser<'a>(input: &mut &'a str) -> PResult<&'a str> {
    let rest = preceded(space0, take_till(0.., AsChar::is_newline)).parse_next(input)?;
    new_line_or_eof_parser.parse_next(input)?;
    Ok(rest)
}

/// The kinds of lines in the Prometheus exposition format
#[derive(Debug, Clone)]
enum Line {
    Empty,
    Comment,
    Help {
        name: String,
        desc: String,
    },
    Type {
        name: String,
        kind: Type,
    },
    Sample {
        name: String,
        labels: Labels,
        value: Value,
    },
}

/// Parse a comment line: anything that starts with `#` and is not HELP or TYPE.
fn comment_line_parser(input: &mut &str) -> PResult<Line> {
    preceded((space0, '#'), rest_of_the_line_parser)
        .value(Line::Comment)
        .parse_next(input)
}

/// Parse a HELP line. The description may be empty. Only `\\` and `\n` are valid escapes in it,
/// anything else makes the line invalid.
///
/// Example:
/// * `# HELP http_request_duration_seconds A histogram of the request duration.`
fn help_line_parser(input: &mut &str) -> PResult<Line> {
    let ignored = (space0, '#', space1, "HELP", space1);
    let name = preceded(ignored, name_parser).parse_next(input)?;
    let text = escaped(none_of(['\\', '\n']), '\\', one_of(['\\', 'n']));
    let desc = cut_err(delimited(space0, text, new_line_or_eof_parser))
        .map(|desc: &str| unescape(desc).into_owned())
        .parse_next(input)?;
    Ok(Line::Help { name, desc })
}

/// Parse a TYPE line: one of counter, gauge, untyped, summary, histogram.
///
/// Example:
/// * `# TYPE http_request_duration_seconds histogram`
fn type_line_parser(input: &mut &str) -> PResult<Line> {
    let ignored = (space0, '#', space1, "TYPE", space1);
    let name = preceded(ignored, name_parser).parse_next(input)?;
    let kind = rest_of_the_line_parser
        .map(str::trim_end)
        .parse_to()
        .parse_next(input)?;
    Ok(Line::Type { name, kind })
}

/// Parse a sample line.
///
/// Examples:
/// * `data_sent:bytes{th_id="worker_0",type="duplex"} 1395`
/// * `metric_without_timestamp_and_labels 12.47`
/// * `metric_without_timestamp_and_labels 12.47 -1`
fn sample_line_parser(input: &mut &str) -> PResult<Line> {
    let name = name_parser.parse_next(input)?;
    let labels = preceded(space0, opt(labels_parser))
        .parse_next(input)?
        .unwrap_or_default();
    let value = preceded(space0, float_value_parser).parse_next(input)?;
    let timestamp = preceded(space0, opt(timestamp_parser)).parse_next(input)?;
    (space0, new_line_or_eof_parser).parse_next(input)?;
    // Sum and Count are only known once the family type is
    let value = Value::new(ValueType::Sample, value, timestamp);
    Ok(Line::Sample {
        name,
        labels,
        value,
    })
}

/// Parse a line made of spaces only.
fn empty_line_parser(input: &mut &str) -> PResult<Line> {
    (space0, new_line_or_eof_parser)
        .map(|_| Line::Empty)
        .parse_next(input)
}

/// Parse any single line of a scrape
fn line_parser(input: &mut &str) -> PResult<Line> {
    alt((
        help_line_parser,
        type_line_parser,
        comment_line_parser,
        sample_line_parser,
        empty_line_parser,
    ))
    .parse_next(input)
}

/// A failure to read the exposition text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A line that is not a valid exposition line. Decoding stops here.
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
    /// Valid lines that do not form a metric family. Decoding can carry on.
    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// A failure to assemble lines into a metric family.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Constructor, thiserror::Error)]
#[error("{reason} (lines {}..{})", .lines.start, .lines.end)]
pub struct MetricError {
    /// The lines involved, starting at 1
    pub lines: Range<usize>,
    pub reason: String,
}

/// The errors of a whole scrape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScrapeParseError {
    /// A line could not be parsed
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    /// Some lines could not be assembled into metric families
    #[error("failed to assemble metrics: {}", join_reasons(.0))]
    Collect(Vec<MetricError>),
}

fn join_reasons(errors: &[MetricError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Where the assembly of the current family stands
#[derive(Debug, Clone, derive_more::Display)]
enum State {
    #[display(fmt = "start")]
    Start,
    // HELP or TYPE seen, no sample yet
    #[display(fmt = "header ({_0})")]
    Header(String),
    #[display(fmt = "samples ({_0})")]
    Samples(String),
}

/// Lazily decodes exposition text into metric families.
///
/// The iterator ends (`None`) once the input is exhausted. A [`DecodeError::Syntax`] is the last
/// item it yields, while after a [`DecodeError::Metric`] it resumes with the next family.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a str,
    line_no: usize,
    /// A line read ahead that belongs to the next family
    pending: Option<(usize, Line)>,
    /// A syntax error met while completing the previous family
    deferred: Option<DecodeError>,
    finished: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            line_no: 0,
            pending: None,
            deferred: None,
            finished: false,
        }
    }

    fn next_line(&mut self) -> Result<Option<(usize, Line)>, DecodeError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        if self.input.is_empty() {
            return Ok(None);
        }
        self.line_no += 1;
        let text = self.input.lines().next().unwrap_or_default();
        match line_parser.parse_next(&mut self.input) {
            Ok(line) => Ok(Some((self.line_no, line))),
            Err(_) => Err(DecodeError::Syntax {
                line: self.line_no,
                reason: format!("invalid line `{text}`"),
            }),
        }
    }

    fn push_back(&mut self, line_no: usize, line: Line) {
        self.pending = Some((line_no, line));
    }

    /// Assemble the next family from the remaining lines
    fn assemble(&mut self) -> Result<Option<MetricFamily>, DecodeError> {
        let mut help = None;
        let mut kind = None;
        let mut metrics = Vec::new();
        let mut state = State::Start;
        let mut first_line = 0;

        loop {
            let next = match self.next_line() {
                Ok(next) => next,
                Err(error) => match state {
                    // Hand out the complete family first, the error comes next
                    State::Samples(name) => {
                        self.deferred = Some(error);
                        let family =
                            MetricFamily::new(name, help, kind.unwrap_or_default(), metrics);
                        return Ok(Some(family));
                    }
                    _ => return Err(error),
                },
            };
            let Some((line_no, line)) = next else {
                return match state {
                    State::Start => Ok(None),
                    State::Header(name) => {
                        debug!(family = %name, "Skipping metric family without samples");
                        Ok(None)
                    }
                    State::Samples(name) => Ok(Some(MetricFamily::new(
                        name,
                        help,
                        kind.unwrap_or_default(),
                        metrics,
                    ))),
                };
            };
            trace!(%state, line_no, "Assembling");
            state = match (state, line) {
                (state, Line::Empty | Line::Comment) => state,
                (State::Start, Line::Help { name, desc }) => {
                    first_line = line_no;
                    help = Some(desc);
                    State::Header(name)
                }
                (
                    State::Start,
                    Line::Type {
                        name,
                        kind: line_kind,
                    },
                ) => {
                    first_line = line_no;
                    kind = Some(line_kind);
                    State::Header(name)
                }
                (
                    State::Start,
                    Line::Sample {
                        name,
                        labels,
                        value,
                    },
                ) => {
                    first_line = line_no;
                    metrics.push(Metric::new(labels, value));
                    State::Samples(name)
                }
                // TYPE before HELP is against the format but accepted
                (State::Header(current), Line::Help { name, desc })
                    if name == current && help.is_none() =>
                {
                    help = Some(desc);
                    State::Header(current)
                }
                (
                    State::Header(current),
                    Line::Type {
                        name,
                        kind: line_kind,
                    },
                ) if name == current && kind.is_none() => {
                    kind = Some(line_kind);
                    State::Header(current)
                }
                (State::Header(current), Line::Help { name, .. }) if name == current => {
                    let reason = format!("Metric {current} HELP section appeared multiple times");
                    return Err(MetricError::new(first_line..line_no, reason).into());
                }
                (State::Header(current), Line::Type { name, .. }) if name == current => {
                    let reason = format!("Metric {current} TYPE section appeared multiple times");
                    return Err(MetricError::new(first_line..line_no, reason).into());
                }
                (State::Header(current), line @ (Line::Help { .. } | Line::Type { .. })) => {
                    // Another family starts, this one had no samples
                    debug!(family = %current, "Skipping metric family without samples");
                    self.push_back(line_no, line);
                    help = None;
                    kind = None;
                    State::Start
                }
                (
                    State::Header(current),
                    Line::Sample {
                        name,
                        labels,
                        mut value,
                    },
                ) => match sample_value_type(&current, &name, kind) {
                    Some(value_type) => {
                        value.value_type = value_type;
                        metrics.push(Metric::new(labels, value));
                        State::Samples(current)
                    }
                    None => {
                        debug!(family = %current, "Skipping metric family without samples");
                        let line = Line::Sample {
                            name,
                            labels,
                            value,
                        };
                        self.push_back(line_no, line);
                        help = None;
                        kind = None;
                        State::Start
                    }
                },
                (
                    State::Samples(current),
                    Line::Sample {
                        name,
                        labels,
                        mut value,
                    },
                ) => match sample_value_type(&current, &name, kind) {
                    Some(value_type) => {
                        value.value_type = value_type;
                        metrics.push(Metric::new(labels, value));
                        State::Samples(current)
                    }
                    None => {
                        // The start of the next family
                        let line = Line::Sample {
                            name,
                            labels,
                            value,
                        };
                        self.push_back(line_no, line);
                        let family =
                            MetricFamily::new(current, help, kind.unwrap_or_default(), metrics);
                        return Ok(Some(family));
                    }
                },
                (State::Samples(current), line) => {
                    // A HELP or TYPE line opens the next family
                    self.push_back(line_no, line);
                    let family =
                        MetricFamily::new(current, help, kind.unwrap_or_default(), metrics);
                    return Ok(Some(family));
                }
            };
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<MetricFamily, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(error) = self.deferred.take() {
            self.finished = true;
            return Some(Err(error));
        }
        match self.assemble() {
            Ok(Some(family)) => Some(Ok(family)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(error) => {
                if matches!(error, DecodeError::Syntax { .. }) {
                    self.finished = true;
                }
                Some(Err(error))
            }
        }
    }
}

/// The value type of a sample named `sample_name` within the family `family`, or `None` when
/// the sample belongs to another family.
fn sample_value_type(family: &str, sample_name: &str, kind: Option<Type>) -> Option<ValueType> {
    if family == sample_name {
        return Some(ValueType::Sample);
    }
    let suffix = sample_name.strip_prefix(family)?;
    match (kind, suffix) {
        (Some(Type::Histogram), "_bucket") => Some(ValueType::Sample),
        (Some(Type::Histogram | Type::Summary), "_sum") => Some(ValueType::Sum),
        (Some(Type::Histogram | Type::Summary), "_count") => Some(ValueType::Count),
        _ => None,
    }
}

/// Decode every family of the text, stopping at the first error of any kind.
pub fn decode(input: &str) -> Result<Vec<MetricFamily>, DecodeError> {
    Decoder::new(input).collect()
}

/// Decode a whole scrape, keeping the families that could be assembled.
///
/// A syntax error discards everything. Assembly errors are all collected.
pub fn parse_scrape(input: &str) -> (Vec<MetricFamily>, Option<ScrapeParseError>) {
    let mut families = Vec::new();
    let mut errors = Vec::new();
    for item in Decoder::new(input) {
        match item {
            Ok(family) => families.push(family),
            Err(DecodeError::Metric(metric_error)) => errors.push(metric_error),
            Err(DecodeError::Syntax { line, reason }) => {
                return (Vec::new(), Some(ScrapeParseError::Parse { line, reason }));
            }
        }
    }
    let maybe_error = (!errors.is_empty()).then_some(ScrapeParseError::Collect(errors));
    (families, maybe_error)
}

#[cfg(test)]
mod tests {
    use super::{
        comment_line_parser,
        decode,
        empty_line_parser,
        float_value_parser,
        help_line_parser,
        label_parser,
        label_value_parser,
        labels_parser,
        line_parser,
        name_parser,
        new_line_or_eof_parser,
        parse_scrape,
        sample_line_parser,
        timestamp_parser,
        type_line_parser,
        DecodeError,
        Decoder,
        Line,
        MetricError,
        ScrapeParseError,
    };
    use crate::{
        exposition::{
            Float,
            Type,
            ValueType,
        },
        tests::{
            init_test_logging,
            prepare_test_data,
            NODE_EXPORTER_01,
            PROMHTTP_01,
        },
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tracing::info;
    use winnow::Parser;

    #[test]
    fn test_name_parser() {
        init_test_logging();

        for expr in ["key1", "a:b:c", "d33", "a_233:3:"] {
            info!("Testing successful expr: '{expr}'");
            assert_eq!(name_parser.parse(expr).unwrap(), expr);
        }
        for expr in ["", "112_abc", "a-b", "test with space"] {
            info!("Testing failure expr: '{expr}'");
            assert!(name_parser.parse(expr).is_err());
        }
    }

    #[rstest]
    #[case(r#""Test""#, "Test")]
    #[case(r#""a string -1234567890 _:@#!""#, "a string -1234567890 _:@#!")]
    #[case(r#""""#, "")]
    #[case(r#""Cannot find file:\n\"FILE.TXT\"""#, "Cannot find file:\n\"FILE.TXT\"")]
    fn test_label_value_parser(#[case] expr: &str, #[case] expected: &str) {
        init_test_logging();

        assert_eq!(label_value_parser.parse(expr).unwrap(), expected);
    }

    #[rstest]
    fn test_label_value_parser_failure(#[values("", "\"", "\"some string", r#""\d""#)] expr: &str) {
        init_test_logging();

        assert!(label_value_parser.parse(expr).is_err());
    }

    #[test]
    fn test_label_parser() {
        init_test_logging();

        let success_cases = [
            (r#"key1="Test""#, ("key1", "Test")),
            (r#"key1  = "Test""#, ("key1", "Test")),
            (r#"key1="""#, ("key1", "")),
            (r#"k:_e="@!2334+~`""#, ("k:_e", "@!2334+~`")),
        ];
        for (expr, (key, value)) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let label = label_parser.parse(expr).unwrap();
            assert_eq!(label.key, key);
            assert_eq!(label.value, value);
        }
        for expr in ["", r#"key1="Test"#, r#""key1"="Test""#, "key1=", r#"key1 "Test""#] {
            info!("Testing failure expr: '{expr}'");
            assert!(label_parser.parse(expr).is_err());
        }
    }

    #[rstest]
    #[case(r#"{key1="value1",key2="value2"}"#, 2)]
    #[case(r#"{ key1  =  "value1",    key2 = "value2" }"#, 2)]
    #[case(r#"{key1="value1",}"#, 1)]
    #[case("{}", 0)]
    fn test_labels_parser(#[case] expr: &str, #[case] expected_len: usize) {
        init_test_logging();

        let labels = labels_parser.parse(expr).unwrap();
        assert_eq!(labels.len(), expected_len);
        if let Some(label) = labels.first() {
            assert_eq!(label.key, "key1");
            assert_eq!(label.value, "value1");
        }
    }

    #[test]
    fn test_labels_parser_failure() {
        init_test_logging();

        for expr in ["", "{", r#"{key1="value1",key2="value2""#] {
            info!("Testing failure expr: '{expr}'");
            assert!(labels_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_timestamp_parser() {
        init_test_logging();

        for (expr, expected) in [("0", 0), ("-1", -1), ("+1345555", 1345555)] {
            assert_eq!(timestamp_parser.parse(expr).unwrap(), expected);
        }
        for expr in ["", "b123", "1.5"] {
            assert!(timestamp_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_float_value_parser() {
        init_test_logging();

        let success_cases = [
            ("0", 0.0),
            ("-1.0", -1.0),
            ("Inf", f64::INFINITY),
            ("+Inf", f64::INFINITY),
            ("-Inf", f64::NEG_INFINITY),
            ("NaN", f64::NAN),
            ("nan", f64::NAN),
            ("-1.23e+1", -1.23e+1),
            ("4.130418363e+09", 4.130418363e+09),
            ("+.22", 0.22),
        ];
        for (expr, num) in success_cases {
            info!("Testing successful expr: '{expr}'");
            let parsed = float_value_parser.parse(expr).unwrap();
            assert_eq!(expr, *parsed);
            let value = parsed.as_f64();
            assert!(value == num || (value.is_nan() && num.is_nan()));
        }
        for expr in ["", "abc", "1e", "--1"] {
            info!("Testing failure expr: '{expr}'");
            assert!(float_value_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_new_line_or_eof_parser() {
        init_test_logging();

        for expr in ["", "\n"] {
            assert_eq!(new_line_or_eof_parser.parse(expr), Ok(()));
        }
        for expr in [" ", "\t", "abc"] {
            assert!(new_line_or_eof_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_empty_line_parser() {
        init_test_logging();

        for expr in ["\n", "   \n", "\t\n", "   "] {
            assert!(empty_line_parser.parse(expr).is_ok());
        }
        for expr in ["not-empty\n", "@\n"] {
            assert!(empty_line_parser.parse(expr).is_err());
        }
    }

    #[rstest]
    #[case(r#"data_sent:bytes{th_id="worker_0",type="duplex"} 1395 -1"#)]
    #[case("data_sent:bytes{th_id=\"worker_0\",type=\"duplex\"} 1395 -1   \n")]
    #[case(r#"data_sent:bytes { th_id = "worker_0" , type = "duplex" }   1395  -1  "#)]
    fn test_sample_line_parser(#[case] expr: &str) {
        init_test_logging();

        let Ok(Line::Sample {
            name,
            labels,
            value,
        }) = sample_line_parser.parse(expr)
        else {
            panic!("expected a sample line for '{expr}'");
        };
        assert_eq!(name, "data_sent:bytes");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].key, "th_id");
        assert_eq!(labels[0].value, "worker_0");
        assert_eq!(labels[1].key, "type");
        assert_eq!(labels[1].value, "duplex");
        assert_eq!(*value.value, "1395");
        assert_eq!(value.value_type, ValueType::Sample);
        assert_eq!(value.timestamp, Some(-1));
    }

    #[rstest]
    fn test_sample_line_parser_failure(
        #[values(
            r#"data_sent:bytes{th_id="worker_0",type="duplex"}"#,
            r#"data_sent:bytes{th_id="worker_0"} 1395 -1 some-more-text"#
        )]
        expr: &str,
    ) {
        init_test_logging();

        assert!(sample_line_parser.parse(expr).is_err());
    }

    #[test]
    fn test_comment_line_parser() {
        init_test_logging();

        for expr in ["# a comment", "  #    Something", "#", "# HELP"] {
            info!("Testing successful expr: '{expr}'");
            assert!(matches!(comment_line_parser.parse(expr), Ok(Line::Comment)));
        }
        assert!(comment_line_parser.parse("^# something").is_err());
    }

    #[rstest]
    #[case(
        "# HELP http_request_duration_seconds A histogram of the request duration.",
        "http_request_duration_seconds",
        "A histogram of the request duration."
    )]
    #[case("  # HELP name long description", "name", "long description")]
    #[case(r"# HELP name first\nsecond \\ third", "name", "first\nsecond \\ third")]
    #[case("# HELP name", "name", "")]
    fn test_help_line_parser(#[case] expr: &str, #[case] expected_name: &str, #[case] expected_desc: &str) {
        init_test_logging();

        let Ok(Line::Help { name, desc }) = help_line_parser.parse(expr) else {
            panic!("expected a HELP line for '{expr}'");
        };
        assert_eq!(name, expected_name);
        assert_eq!(desc, expected_desc);
    }

    #[rstest]
    fn test_help_line_parser_rejects_unknown_escapes(
        #[values(r"# HELP name x\ty", r#"# HELP name say \"hi\""#, r"# HELP name trailing\")] expr: &str,
    ) {
        init_test_logging();

        assert!(help_line_parser.parse(expr).is_err());
        assert!(line_parser.parse(expr).is_err());
    }

    #[test]
    fn test_help_round_trip() {
        init_test_logging();

        let input = "# HELP a C:\\\\dir\\nnext \"quoted\"\n# TYPE a gauge\na 1\n";
        let families = decode(input).unwrap();
        assert_eq!(families[0].help.as_deref(), Some("C:\\dir\nnext \"quoted\""));
        assert_eq!(families[0].to_string(), input);

        let error = decode("# HELP a x\\ty\na 1\n").unwrap_err();
        assert!(matches!(error, DecodeError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_type_line_parser() {
        init_test_logging();

        let success_cases = [
            ("# TYPE test histogram", Type::Histogram),
            ("# TYPE test summary", Type::Summary),
            ("# TYPE test counter  ", Type::Counter),
            ("# TYPE test gauge", Type::Gauge),
            ("# TYPE test Untyped", Type::Untyped),
        ];
        for (expr, expected_kind) in success_cases {
            let Ok(Line::Type { name, kind }) = type_line_parser.parse(expr) else {
                panic!("expected a TYPE line for '{expr}'");
            };
            assert_eq!(name, "test");
            assert_eq!(kind, expected_kind);
        }
        for expr in ["", "# TYPE test something", "# TYPE", "# TYPEtest counter"] {
            info!("Testing failure expr: '{expr}'");
            assert!(type_line_parser.parse(expr).is_err());
        }
    }

    #[test]
    fn test_line_parser() {
        init_test_logging();

        let cases = [
            "# TYPE test histogram",
            "# HELP http_request_duration_seconds A histogram of the request duration.",
            "# a comment",
            "# HELP",
            r#"tower:histogram_bucket{name="handler",th_id="worker_0",type="1",le="+Inf"} 0"#,
            r#"tower:histogram_sum{name="handler",th_id="worker_0",type="1"} 0"#,
            "",
        ];
        for expr in cases {
            info!("Testing successful expr: '{expr}'");
            assert!(line_parser.parse(expr).is_ok());
        }
    }

    #[test]
    fn test_decode_promhttp() {
        init_test_logging();

        let families = decode(PROMHTTP_01).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].metrics.len(), 3);
    }

    #[test]
    fn test_decode_histogram_and_summary_suffixes() {
        init_test_logging();

        let families = decode(NODE_EXPORTER_01).unwrap();
        let histogram = families
            .iter()
            .find(|family| family.kind == Type::Histogram)
            .unwrap();
        let value_types: Vec<_> = histogram
            .metrics
            .iter()
            .map(|metric| metric.value.value_type)
            .collect();
        let buckets = value_types.len() - 2;
        assert!(value_types[..buckets]
            .iter()
            .all(|value_type| *value_type == ValueType::Sample));
        assert_eq!(&value_types[buckets..], &[ValueType::Sum, ValueType::Count]);

        let summary = families
            .iter()
            .find(|family| family.kind == Type::Summary)
            .unwrap();
        assert_eq!(summary.metrics.last().unwrap().value.value_type, ValueType::Count);
    }

    #[test]
    fn test_decoder_is_lazy_and_stops_after_syntax_error() {
        init_test_logging();

        let input = prepare_test_data(
            r#"
                # TYPE first counter
                first 1
                second{ 2
                third 3
            "#,
        );
        let mut decoder = Decoder::new(&input);
        let first = decoder.next().unwrap().unwrap();
        assert_eq!(first.name, "first");
        assert_eq!(
            decoder.next(),
            Some(Err(DecodeError::Syntax {
                line: 3,
                reason: "invalid line `second{ 2`".into(),
            }))
        );
        assert_eq!(decoder.next(), None);
        assert!(decode(&input).is_err());
    }

    #[test]
    fn test_decoder_resumes_after_metric_error() {
        init_test_logging();

        let input = prepare_test_data(
            r#"
                # TYPE twice gauge
                # TYPE twice gauge
                # TYPE up gauge
                up 1
            "#,
        );
        let items: Vec<_> = Decoder::new(&input).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0],
            Err(DecodeError::Metric(MetricError::new(
                1..2,
                "Metric twice TYPE section appeared multiple times".into()
            )))
        );
        let up = items[1].as_ref().unwrap();
        assert_eq!(up.name, "up");
        assert_eq!(up.kind, Type::Gauge);
    }

    #[test]
    fn test_decoder_skips_families_without_samples() {
        init_test_logging();

        let input = prepare_test_data(
            r#"
                # HELP go_threads Number of OS threads created.
                # TYPE go_threads gauge
                # TYPE other counter
                # HELP up Whether the target is up.
                # TYPE up gauge
                up 1
                # TYPE unused histogram
                unrelated_total 3
                # HELP trailing Nothing follows.
            "#,
        );
        let families = decode(&input).unwrap();
        let names: Vec<_> = families.iter().map(|family| family.name.as_str()).collect();
        assert_eq!(names, ["up", "unrelated_total"]);
        assert_eq!(families[0].help.as_deref(), Some("Whether the target is up."));
        assert_eq!(families[0].kind, Type::Gauge);
        assert_eq!(families[1].kind, Type::Untyped);
        assert_eq!(families[1].help, None);
        assert!(decode("# TYPE up gauge\n").unwrap().is_empty());
    }

    #[test]
    fn test_scrape_success_01() {
        init_test_logging();

        let input = r#"
                # TYPE go_memstats_frees_total counter
                # HELP go_memstats_frees_total Total number of frees.
                go_memstats_frees_total 4.130418363e+09
            "#;
        let input = prepare_test_data(input);
        let (mut families, maybe_error) = parse_scrape(&input);
        assert!(maybe_error.is_none());
        assert_eq!(families.len(), 1);
        let family = families.pop().unwrap();
        assert_eq!(family.kind, Type::Counter);
        assert_eq!(family.help.as_deref(), Some("Total number of frees."));
        assert_eq!(family.name, "go_memstats_frees_total");
        assert_eq!(family.metrics[0].value.value, Float::from("4.130418363e+09"));
    }

    #[rstest]
    #[case(
        r#"
            # TYPE http_request_duration_seconds histogram
            # TYPE http_request_duration_seconds histogram
        "#,
        &["Metric http_request_duration_seconds TYPE section appeared multiple times"]
    )]
    #[case(
        r#"
            # HELP go_info Information about the Go environment.
            # HELP go_info Information about the Go environment.
        "#,
        &["Metric go_info HELP section appeared multiple times"]
    )]
    #[case(
        r#"
            # HELP go_info Information about the Go environment.
            # TYPE go_info gauge
            # TYPE go_info gauge
            go_info 1
            # HELP up Up.
            # HELP up Up.
            up 1
        "#,
        &[
            "Metric go_info TYPE section appeared multiple times",
            "Metric up HELP section appeared multiple times",
        ]
    )]
    fn test_scrape_parse_failures(#[case] input: &str, #[case] reasons: &[&str]) {
        init_test_logging();

        let input = prepare_test_data(input);
        let (_, maybe_error) = parse_scrape(&input);
        let Some(ScrapeParseError::Collect(metric_errors)) = maybe_error else {
            panic!("expected metric errors");
        };
        let found: Vec<_> = metric_errors.iter().map(|e| e.reason.as_str()).collect();
        assert_eq!(found, reasons);
    }

    #[test]
    fn test_scrape_parse_mix_01() {
        init_test_logging();

        let input = r#"
                # HELP go_info Information about the Go environment.
                go_info{version="go1.15.6"} 1
                # TYPE go_memstats_alloc_bytes gauge
                # TYPE go_memstats_alloc_bytes gauge
            "#;
        let input = prepare_test_data(input);

        let (mut families, maybe_error) = parse_scrape(&input);
        assert_eq!(families.len(), 1);
        let mut family = families.pop().unwrap();
        assert_eq!(family.name, "go_info");
        assert_eq!(family.kind, Type::Untyped);
        let metric = family.metrics.pop().unwrap();
        assert_eq!(metric.value.value, Float::from("1"));
        assert_eq!(metric.labels[0].key, "version");
        assert_eq!(metric.labels[0].value, "go1.15.6");
        let Some(ScrapeParseError::Collect(metric_errors)) = maybe_error else {
            panic!("expected metric errors");
        };
        assert_eq!(metric_errors.len(), 1);
        assert_eq!(
            metric_errors[0].reason,
            "Metric go_memstats_alloc_bytes TYPE section appeared multiple times"
        );
    }

    #[test]
    fn test_scrape_syntax_error_discards_families() {
        init_test_logging();

        let (families, maybe_error) = parse_scrape("up 1\nup{ 2\n");
        assert!(families.is_empty());
        assert_eq!(
            maybe_error,
            Some(ScrapeParseError::Parse {
                line: 2,
                reason: "invalid line `up{ 2`".into(),
            })
        );
    }
}
