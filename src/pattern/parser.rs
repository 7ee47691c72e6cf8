//! Pattern Parser
//!
//! Parses Graphite globs and `seriesByTag(...)` expressions into [`PatternNode`]s.
//!
//! # Supported Syntax
//!
//! ```text
//! segment  := token+ | '**'
//! token    := literal | '*' | '?' | '[' ['!'|'^'] class ']' | '{' option (',' option)* '}'
//! pattern  := segment ('.' segment)*
//! tagged   := 'seriesByTag(' filter (',' filter)* ')'
//! filter   := key ('=' | '!=' | '=~' | '!=~') value    (optionally quoted)
//! ```

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, map, opt, value},
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, preceded, terminated},
    IResult,
};

use crate::pattern::ast::*;
use crate::pattern::error::{CompileError, CompileResult};

/// Limits and regex policy applied while compiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Maximum number of options one segment may expand to
    pub max_alternatives: usize,
    /// Maximum length of a tag regex
    pub regex_max_len: usize,
    /// Allow `\p{..}` / `\P{..}` classes in tag regexes
    pub regex_allow_unicode_classes: bool,
    /// Allow the `(?i)` flag in tag regexes
    pub regex_allow_case_insensitive: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_alternatives: 256,
            regex_max_len: 512,
            regex_allow_unicode_classes: false,
            regex_allow_case_insensitive: true,
        }
    }
}

/// Compile a raw pattern into a canonical [`PatternNode`]
pub fn compile(raw: &str, opts: &CompileOptions) -> CompileResult<PatternNode> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(CompileError::Empty);
    }

    if input.starts_with("seriesByTag") {
        compile_tagged(input, opts).map(PatternNode::Tagged)
    } else {
        compile_glob(input, opts).map(PatternNode::Glob)
    }
}

// ---- glob ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Lit(String),
    Star,
    Question,
    Class(Vec<(char, char)>, bool),
    Brace(Vec<Vec<Token>>),
}

fn compile_glob(input: &str, opts: &CompileOptions) -> CompileResult<GlobPattern> {
    let (_, raw_segments) = all_consuming(parse_segments)(input)
        .map_err(|e| CompileError::parse(input, describe_nom_error(input, e)))?;

    let mut segments = Vec::with_capacity(raw_segments.len());
    for tokens in raw_segments {
        segments.push(lower_segment(input, tokens, opts)?);
    }

    if segments.iter().filter(|s| **s == Segment::Recurse).count() > 1 {
        return Err(CompileError::AmbiguousRecursion(input.to_string()));
    }

    Ok(GlobPattern::new(segments))
}

fn describe_nom_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len() - e.input.len();
            if e.input.is_empty() {
                "unexpected end of pattern".to_string()
            } else {
                format!("unexpected input at offset {}: '{}'", offset, e.input)
            }
        }
        nom::Err::Incomplete(_) => "incomplete pattern".to_string(),
    }
}

fn parse_segments(input: &str) -> IResult<&str, Vec<Vec<Token>>> {
    separated_list1(char('.'), many1(parse_token))(input)
}

fn parse_token(input: &str) -> IResult<&str, Token> {
    alt((
        map(is_not(".*?[{"), |s: &str| Token::Lit(s.to_string())),
        parse_wildcard,
        parse_class,
        parse_brace,
    ))(input)
}

fn parse_inner_token(input: &str) -> IResult<&str, Token> {
    alt((
        map(is_not(".*?[{,}"), |s: &str| Token::Lit(s.to_string())),
        parse_wildcard,
        parse_class,
        parse_brace,
    ))(input)
}

fn parse_wildcard(input: &str) -> IResult<&str, Token> {
    alt((value(Token::Star, char('*')), value(Token::Question, char('?'))))(input)
}

fn parse_class(input: &str) -> IResult<&str, Token> {
    let (rest, body) = delimited(char('['), take_while1(|c| c != ']' && c != '.'), char(']'))(input)?;

    let (negated, body) = match body.strip_prefix(&['!', '^'][..]) {
        Some(stripped) => (true, stripped),
        None => (false, body),
    };

    let chars: Vec<char> = body.chars().collect();
    if chars.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut ranges = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if i + 2 < chars.len() && chars[i + 1] == '-' {
            let (lo, hi) = (chars[i], chars[i + 2]);
            ranges.push(if lo <= hi { (lo, hi) } else { (hi, lo) });
            i += 3;
        } else {
            ranges.push((chars[i], chars[i]));
            i += 1;
        }
    }
    ranges.sort();
    ranges.dedup();

    Ok((rest, Token::Class(ranges, negated)))
}

fn parse_brace(input: &str) -> IResult<&str, Token> {
    map(
        delimited(
            char('{'),
            separated_list0(char(','), many0(parse_inner_token)),
            char('}'),
        ),
        Token::Brace,
    )(input)
}

fn lower_segment(pattern: &str, tokens: Vec<Token>, opts: &CompileOptions) -> CompileResult<Segment> {
    if tokens == [Token::Star, Token::Star] {
        return Ok(Segment::Recurse);
    }

    let mut options = expand(pattern, &tokens, opts.max_alternatives)?
        .into_iter()
        .map(normalize)
        .filter(|opt| !opt.is_empty())
        .collect::<Vec<_>>();

    if options.is_empty() {
        return Err(CompileError::parse(pattern, "segment expands to nothing"));
    }

    options.sort_by_cached_key(|opt| opt.iter().map(|m| m.to_string()).collect::<String>());
    options.dedup();

    if options.len() == 1 {
        Ok(Segment::Glob(options.remove(0)))
    } else {
        Ok(Segment::Alternation(options))
    }
}

/// Cross product of brace options, bounded by `limit`
fn expand(pattern: &str, tokens: &[Token], limit: usize) -> CompileResult<Vec<Vec<Matcher>>> {
    let mut acc: Vec<Vec<Matcher>> = vec![Vec::new()];

    for token in tokens {
        match token {
            Token::Brace(options) => {
                let mut expanded = Vec::new();
                for option in options {
                    expanded.extend(expand(pattern, option, limit)?);
                }
                if expanded.is_empty() {
                    expanded.push(Vec::new());
                }

                let count = acc.len() * expanded.len();
                if count > limit {
                    return Err(CompileError::TooManyAlternatives {
                        pattern: pattern.to_string(),
                        count,
                        limit,
                    });
                }

                let mut next = Vec::with_capacity(count);
                for prefix in &acc {
                    for suffix in &expanded {
                        let mut joined = prefix.clone();
                        joined.extend(suffix.iter().cloned());
                        next.push(joined);
                    }
                }
                acc = next;
            }
            Token::Lit(s) => append(&mut acc, Matcher::Literal(s.clone())),
            Token::Star => append(&mut acc, Matcher::AnyRun),
            Token::Question => append(&mut acc, Matcher::AnyOne),
            Token::Class(ranges, negated) => append(
                &mut acc,
                Matcher::AnySet {
                    ranges: ranges.clone(),
                    negated: *negated,
                },
            ),
        }
    }

    Ok(acc)
}

fn append(acc: &mut [Vec<Matcher>], matcher: Matcher) {
    for prefix in acc.iter_mut() {
        prefix.push(matcher.clone());
    }
}

/// Merge adjacent literals and collapse runs of `*`
fn normalize(matchers: Vec<Matcher>) -> Vec<Matcher> {
    let mut out: Vec<Matcher> = Vec::with_capacity(matchers.len());
    for m in matchers {
        match (out.last_mut(), m) {
            (Some(Matcher::Literal(prev)), Matcher::Literal(s)) => prev.push_str(&s),
            (Some(Matcher::AnyRun), Matcher::AnyRun) => {}
            (_, Matcher::Literal(s)) if s.is_empty() => {}
            (_, m) => out.push(m),
        }
    }
    out
}

// ---- seriesByTag ----

fn compile_tagged(input: &str, opts: &CompileOptions) -> CompileResult<TagQuery> {
    let (_, args) = all_consuming(parse_series_by_tag)(input)
        .map_err(|e| CompileError::parse(input, describe_nom_error(input, e)))?;

    if args.is_empty() {
        return Err(CompileError::parse(input, "seriesByTag needs at least one filter"));
    }

    let mut filters = Vec::with_capacity(args.len());
    for arg in args {
        let filter = parse_filter(&arg)?;
        if filter.op.is_regex() {
            validate_regex(&filter.key, &filter.value, opts)?;
        }
        filters.push(filter);
    }

    let query = TagQuery::new(filters);
    if query.positive().next().is_none() {
        return Err(CompileError::NoPositiveFilter(input.to_string()));
    }
    Ok(query)
}

fn parse_series_by_tag(input: &str) -> IResult<&str, Vec<String>> {
    preceded(
        terminated(tag_no_case("seriesByTag"), multispace0),
        delimited(
            terminated(char('('), multispace0),
            separated_list0(
                delimited(multispace0, char(','), multispace0),
                parse_argument,
            ),
            preceded(multispace0, char(')')),
        ),
    )(input)
}

fn parse_argument(input: &str) -> IResult<&str, String> {
    alt((
        map(delimited(char('\''), opt(is_not("'")), char('\'')), |s: Option<&str>| {
            s.unwrap_or_default().to_string()
        }),
        map(delimited(char('"'), opt(is_not("\"")), char('"')), |s: Option<&str>| {
            s.unwrap_or_default().to_string()
        }),
        map(is_not(",)"), |s: &str| s.trim().to_string()),
    ))(input)
}

fn parse_filter(arg: &str) -> CompileResult<TagFilter> {
    let parsed: IResult<&str, (&str, &str)> = nom::sequence::pair(
        take_while1(|c: char| c != '=' && c != '!' && c != '~'),
        alt((tag("!=~"), tag("=~"), tag("!="), tag("="))),
    )(arg);

    let (value, (key, op)) = parsed.map_err(|_| CompileError::InvalidTagFilter(arg.to_string()))?;
    let key = key.trim();
    let op = TagOp::from_str(op).ok_or_else(|| CompileError::InvalidTagFilter(arg.to_string()))?;

    if key.is_empty() || key.contains(';') {
        return Err(CompileError::InvalidTagFilter(arg.to_string()));
    }

    let key = if key == "__name__" { "name" } else { key };
    Ok(TagFilter::new(key, op, value))
}

/// Reject regex constructs the store cannot evaluate
pub fn validate_regex(key: &str, regex: &str, opts: &CompileOptions) -> CompileResult<()> {
    let reject = |reason: &str| CompileError::UnsupportedRegex {
        key: key.to_string(),
        regex: regex.to_string(),
        reason: reason.to_string(),
    };

    if regex.len() > opts.regex_max_len {
        return Err(reject(&format!("longer than {} bytes", opts.regex_max_len)));
    }

    let bytes = regex.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] != b'\\' || (i > 0 && bytes[i - 1] == b'\\') {
            continue;
        }
        match bytes[i + 1] {
            b'1'..=b'9' | b'k' => return Err(reject("backreferences are not supported")),
            b'p' | b'P' if !opts.regex_allow_unicode_classes => {
                return Err(reject("unicode classes are not allowed"))
            }
            _ => {}
        }
    }

    for look in ["(?=", "(?!", "(?<=", "(?<!"] {
        if regex.contains(look) {
            return Err(reject("lookaround is not supported"));
        }
    }

    if !opts.regex_allow_case_insensitive && regex.contains("(?i") {
        return Err(reject("case-insensitive flag is not allowed"));
    }

    regex::Regex::new(regex).map_err(|e| reject(&e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        match compile(p, &CompileOptions::default()).unwrap() {
            PatternNode::Glob(g) => g,
            other => panic!("expected glob, got {:?}", other),
        }
    }

    fn tagged(p: &str) -> TagQuery {
        match compile(p, &CompileOptions::default()).unwrap() {
            PatternNode::Tagged(t) => t,
            other => panic!("expected tagged, got {:?}", other),
        }
    }

    #[test]
    fn test_literal_pattern() {
        let g = glob("a.b.c");
        assert_eq!(g.len(), 3);
        assert!(g.is_literal());
        assert_eq!(g.to_string(), "a.b.c");
    }

    #[test]
    fn test_wildcards() {
        let g = glob("servers.web?.cpu*");
        assert_eq!(
            g.segments()[1],
            Segment::Glob(vec![Matcher::Literal("web".to_string()), Matcher::AnyOne])
        );
        assert_eq!(
            g.segments()[2],
            Segment::Glob(vec![Matcher::Literal("cpu".to_string()), Matcher::AnyRun])
        );
    }

    #[test]
    fn test_class() {
        let g = glob("host[!a-c0].x");
        assert_eq!(
            g.segments()[0],
            Segment::Glob(vec![
                Matcher::Literal("host".to_string()),
                Matcher::AnySet {
                    ranges: vec![('0', '0'), ('a', 'c')],
                    negated: true,
                },
            ])
        );
        assert!(compile("host[]", &CompileOptions::default()).is_err());
    }

    #[test]
    fn test_brace_expansion_sorted() {
        let a = glob("a.{d,b,c}.x");
        let b = glob("a.{c,b,d,b}.x");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "a.{b,c,d}.x");
        assert_eq!(
            a.segments()[1].literal_options(),
            Some(vec!["b", "c", "d"])
        );
    }

    #[test]
    fn test_nested_brace() {
        let g = glob("cpu{1,{2,3}x}");
        assert_eq!(g.to_string(), "{cpu1,cpu2x,cpu3x}");
    }

    #[test]
    fn test_single_option_brace_collapses() {
        let g = glob("a.{b}.c");
        assert!(g.is_literal());
        assert_eq!(g.to_string(), "a.b.c");
    }

    #[test]
    fn test_separator_in_brace_is_error() {
        let err = compile("a.{b.c,d}", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }

    #[test]
    fn test_recurse() {
        let g = glob("a.**.c");
        assert_eq!(g.segments()[1], Segment::Recurse);
        assert_eq!(g.recurse_position(), Some(1));

        let err = compile("**.a.**", &CompileOptions::default()).unwrap_err();
        assert_eq!(err, CompileError::AmbiguousRecursion("**.a.**".to_string()));
    }

    #[test]
    fn test_too_many_alternatives() {
        let opts = CompileOptions {
            max_alternatives: 4,
            ..Default::default()
        };
        let err = compile("{a,b,c}{d,e}", &opts).unwrap_err();
        assert!(matches!(
            err,
            CompileError::TooManyAlternatives { count: 6, limit: 4, .. }
        ));
    }

    #[test]
    fn test_empty_and_malformed() {
        let opts = CompileOptions::default();
        assert_eq!(compile("  ", &opts).unwrap_err(), CompileError::Empty);
        assert!(compile("a..b", &opts).is_err());
        assert!(compile("a.{b", &opts).is_err());
        assert!(compile("a.[bc", &opts).is_err());
    }

    #[test]
    fn test_compile_deterministic() {
        let opts = CompileOptions::default();
        for p in ["a.{x,y}.*", "**.cpu", "h[0-9]?.load", "seriesByTag('b=1','a=~x.*')"] {
            let first = compile(p, &opts).unwrap();
            let second = compile(p, &opts).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.canonical(), second.canonical());
        }
    }

    #[test]
    fn test_series_by_tag() {
        let t = tagged("seriesByTag('name=cpu', 'dc!=east', \"host=~web.*\")");
        assert_eq!(t.filters().len(), 3);
        assert_eq!(t.filters()[0], TagFilter::new("dc", TagOp::NotEq, "east"));
        assert_eq!(t.filters()[1], TagFilter::new("host", TagOp::Match, "web.*"));
        assert_eq!(t.filters()[2], TagFilter::new("name", TagOp::Eq, "cpu"));
    }

    #[test]
    fn test_series_by_tag_unquoted() {
        let t = tagged("seriesByTag(name=cpu, env!=~prod.*)");
        assert_eq!(
            t.filters(),
            &[
                TagFilter::new("env", TagOp::NotMatch, "prod.*"),
                TagFilter::new("name", TagOp::Eq, "cpu"),
            ]
        );
    }

    #[test]
    fn test_name_alias() {
        let t = tagged("seriesByTag('__name__=cpu')");
        assert_eq!(t.filters()[0].key, "name");
    }

    #[test]
    fn test_no_positive_filter() {
        let err = compile("seriesByTag('dc!=east')", &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::NoPositiveFilter(_)));

        // `k!=` means "has tag k" and counts as positive
        assert!(compile("seriesByTag('dc!=')", &CompileOptions::default()).is_ok());
    }

    #[test]
    fn test_invalid_filter() {
        let err = compile("seriesByTag('novalue')", &CompileOptions::default()).unwrap_err();
        assert_eq!(err, CompileError::InvalidTagFilter("novalue".to_string()));
    }

    #[test]
    fn test_unsupported_regex() {
        let opts = CompileOptions::default();
        let err = compile(r"seriesByTag('host=~(a)\1')", &opts).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedRegex { .. }));

        let err = compile("seriesByTag('host=~a(?=b)')", &opts).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedRegex { .. }));

        let err = compile(r"seriesByTag('host=~\p{Greek}')", &opts).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedRegex { .. }));

        let err = compile("seriesByTag('host=~(unclosed')", &opts).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedRegex { .. }));
    }

    #[test]
    fn test_regex_policy() {
        let strict = CompileOptions {
            regex_allow_case_insensitive: false,
            regex_max_len: 8,
            ..Default::default()
        };
        assert!(validate_regex("k", "(?i)web", &strict).is_err());
        assert!(validate_regex("k", "abcdefghij", &strict).is_err());
        assert!(validate_regex("k", "web.*", &strict).is_ok());
        assert!(validate_regex("k", r"a\\1", &CompileOptions::default()).is_ok());
    }
}
