use std::time::Duration;

use miette::GraphicalReportHandler;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{digit0, digit1},
    combinator::{map, map_res, opt, recognize, value},
    error::{FromExternalError, ParseError},
    multi::many1,
    sequence::{pair, preceded, tuple},
    IResult,
};
use nom_locate::LocatedSpan;
use nom_supreme::{
    error::{ErrorTree, GenericErrorTree},
    final_parser::final_parser,
};

use super::ConfigError;

type Span<'a> = LocatedSpan<&'a str>;

const NANOS_PER_MICRO: f64 = 1e3;
const NANOS_PER_MILLI: f64 = 1e6;
const NANOS_PER_SECOND: f64 = 1e9;

#[derive(thiserror::Error, Debug, miette::Diagnostic)]
#[error("invalid duration")]
#[diagnostic(help("durations look like 10s, 1m30s, 1.5h or 250ms"))]
struct BadDuration {
    #[source_code]
    src: String,

    #[label("{kind}")]
    bad_bit: miette::SourceSpan,

    kind: String,
}

/// Parses a duration such as `10s`, `1m30s` or `250ms`.
///
/// Accepts the units `ns`, `us` (`µs`), `ms`, `s`, `m` and `h`, fractional
/// amounts, an optional leading `+`, and a bare `0`.
pub fn parse_duration(src: &str) -> Result<Duration, ConfigError> {
    final_parser(parse_signed_duration::<ErrorTree<Span>>)(Span::new(src)).map_err(
        |e: ErrorTree<Span>| ConfigError::InvalidTimeout {
            input: src.to_string(),
            report: render_error(src, &e),
        },
    )
}

fn parse_signed_duration<'a, E>(i: Span<'a>) -> IResult<Span<'a>, Duration, E>
where
    E: ParseError<Span<'a>> + FromExternalError<Span<'a>, std::num::ParseFloatError>,
{
    preceded(
        opt(tag("+")),
        alt((
            map(many1(parse_component::<E>), |nanos: Vec<f64>| {
                Duration::from_nanos(nanos.iter().sum::<f64>().round() as u64)
            }),
            value(Duration::ZERO, tag("0")),
        )),
    )(i)
}

fn parse_component<'a, E>(i: Span<'a>) -> IResult<Span<'a>, f64, E>
where
    E: ParseError<Span<'a>> + FromExternalError<Span<'a>, std::num::ParseFloatError>,
{
    map(
        tuple((parse_amount::<E>, parse_unit::<E>)),
        |(amount, scale)| amount * scale,
    )(i)
}

fn parse_amount<'a, E>(i: Span<'a>) -> IResult<Span<'a>, f64, E>
where
    E: ParseError<Span<'a>> + FromExternalError<Span<'a>, std::num::ParseFloatError>,
{
    map_res(
        alt((
            recognize(pair(digit1, opt(pair(tag("."), digit0)))),
            recognize(pair(tag("."), digit1)),
        )),
        |amount: Span<'a>| amount.fragment().parse::<f64>(),
    )(i)
}

// "ms" has to be tried before "m".
fn parse_unit<'a, E: ParseError<Span<'a>>>(i: Span<'a>) -> IResult<Span<'a>, f64, E> {
    alt((
        value(1.0, tag("ns")),
        value(NANOS_PER_MICRO, tag("us")),
        value(NANOS_PER_MICRO, tag("µs")),
        value(NANOS_PER_MICRO, tag("μs")),
        value(NANOS_PER_MILLI, tag("ms")),
        value(NANOS_PER_SECOND, tag("s")),
        value(60.0 * NANOS_PER_SECOND, tag("m")),
        value(3600.0 * NANOS_PER_SECOND, tag("h")),
    ))(i)
}

fn render_error(src: &str, e: &ErrorTree<Span>) -> String {
    let (offset, kind) = furthest_error(e);
    let err = BadDuration {
        src: src.to_string(),
        bad_bit: miette::SourceSpan::new(offset.into(), 0.into()),
        kind,
    };
    let mut s = String::new();
    match GraphicalReportHandler::new_themed(miette::GraphicalTheme::unicode_nocolor())
        .render_report(&mut s, &err)
    {
        Ok(()) => s,
        Err(_) => format!("unexpected input at offset {offset}"),
    }
}

fn furthest_error(e: &ErrorTree<Span>) -> (usize, String) {
    match e {
        GenericErrorTree::Base { location, kind } => (location.location_offset(), kind.to_string()),
        GenericErrorTree::Stack { base, .. } => furthest_error(base),
        GenericErrorTree::Alt(alternatives) => alternatives
            .iter()
            .map(furthest_error)
            .max_by_key(|(offset, _)| *offset)
            .unwrap_or((0, "unexpected input".to_string())),
    }
}
