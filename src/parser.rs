use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_opt, map_res, opt},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::model::{Quality, Region, Resolution, Source};

/// Components recovered from a `{source}_{region}_{quality}_{ms}_{seq}` id.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RecordIdParts {
    pub source: Source,
    pub region: Region,
    pub quality: Quality,
    pub created_ms: u64,
    pub sequence: u64,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Selection {
    All,
    Region(Region),
    Source(Source),
    TimeRange { from: u64, to: u64 },
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Get { id: String },
    Select(Selection),
    Stats,
    Clear,
    Help,
}

// --- BASIC PARSERS ---

fn parse_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

fn parse_u64(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

/// Dimension label: lowercase words joined by '-'
fn parse_label(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')(input)
}

fn parse_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('\''), take_until("'"), char('\''))(input)
}

fn parse_value(input: &str) -> IResult<&str, &str> {
    alt((parse_quoted, take_while1(|c: char| !c.is_whitespace())))(input)
}

fn resolution(input: &str) -> IResult<&str, Resolution> {
    let (input, width) = parse_u32(input)?;
    let (input, _) = alt((char('x'), char('X')))(input)?;
    let (input, height) = parse_u32(input)?;
    Ok((input, Resolution::new(width, height)))
}

fn record_id(input: &str) -> IResult<&str, RecordIdParts> {
    let (input, source) = map_opt(parse_label, Source::from_label)(input)?;
    let (input, _) = char('_')(input)?;
    let (input, region) = map_opt(parse_label, Region::from_label)(input)?;
    let (input, _) = char('_')(input)?;
    let (input, quality) = map_opt(parse_label, Quality::from_label)(input)?;
    let (input, _) = char('_')(input)?;
    let (input, created_ms) = parse_u64(input)?;
    let (input, _) = char('_')(input)?;
    let (input, sequence) = parse_u64(input)?;
    Ok((input, RecordIdParts { source, region, quality, created_ms, sequence }))
}

/// Parses `WxH`, e.g. `800x600`.
pub fn parse_resolution(input: &str) -> Result<Resolution, String> {
    all_consuming(ws(resolution))(input)
        .map(|(_, r)| r)
        .map_err(|_| format!("Invalid resolution: '{}'", input))
}

/// `None` for ids not minted by [`crate::model::compose_record_id`].
pub fn parse_record_id(input: &str) -> Option<RecordIdParts> {
    all_consuming(record_id)(input).ok().map(|(_, parts)| parts)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_value(input)?;
    Ok((input, Command::Get { id: id.to_string() }))
}

fn parse_where_region(input: &str) -> IResult<&str, Selection> {
    let (input, _) = tuple((ws(tag_ci("REGION")), ws(char('='))))(input)?;
    map(map_opt(parse_value, Region::from_label), Selection::Region)(input)
}

fn parse_where_source(input: &str) -> IResult<&str, Selection> {
    let (input, _) = tuple((ws(tag_ci("SOURCE")), ws(char('='))))(input)?;
    map(map_opt(parse_value, Source::from_label), Selection::Source)(input)
}

fn parse_where_time(input: &str) -> IResult<&str, Selection> {
    let (input, _) = tuple((ws(tag_ci("TIME")), ws(tag_ci("BETWEEN"))))(input)?;
    let (input, from) = parse_u64(input)?;
    let (input, _) = ws(tag_ci("AND"))(input)?;
    let (input, to) = parse_u64(input)?;
    Ok((input, Selection::TimeRange { from, to }))
}

fn parse_select(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SELECT"), tag_ci("FIND")))(input)?;
    let (input, _) = opt(tuple((ws(tag_ci("FROM")), ws(tag_ci("IMAGES")))))(input)?;

    let (input, selection) = opt(preceded(
        ws(tag_ci("WHERE")),
        alt((parse_where_region, parse_where_source, parse_where_time)),
    ))(input)?;

    Ok((input, Command::Select(selection.unwrap_or(Selection::All))))
}

fn parse_stats(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("STATS")(input)?;
    Ok((input, Command::Stats))
}

fn parse_clear(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("CLEAR")(input)?;
    Ok((input, Command::Clear))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_get,
        parse_select,
        parse_stats,
        parse_clear,
        parse_help,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.len() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::compose_record_id;

    #[test]
    fn resolutions() {
        assert_eq!(parse_resolution("800x600"), Ok(Resolution::new(800, 600)));
        assert_eq!(parse_resolution(" 3200X2400 "), Ok(Resolution::new(3200, 2400)));
        assert!(parse_resolution("800x").is_err());
        assert!(parse_resolution("800x600x3").is_err());
        assert!(parse_resolution("99999999999x1").is_err());
    }

    #[test]
    fn record_ids_round_trip() {
        let id = compose_record_id(Source::Worldview, Region::GreatBarrier, Quality::Ultra, 1712345678901, 2);
        let parts = parse_record_id(&id).unwrap();
        assert_eq!(parts.source, Source::Worldview);
        assert_eq!(parts.region, Region::GreatBarrier);
        assert_eq!(parts.quality, Quality::Ultra);
        assert_eq!(parts.created_ms, 1712345678901);
        assert_eq!(parts.sequence, 2);

        assert_eq!(parse_record_id("a"), None);
        assert_eq!(parse_record_id("landsat_atlantis_high_1_2"), None);
    }

    #[test]
    fn commands() {
        assert_eq!(parse_command("get 'landsat_amazon_high_1_0'"), Ok(Command::Get { id: "landsat_amazon_high_1_0".into() }));
        assert_eq!(parse_command("GET abc"), Ok(Command::Get { id: "abc".into() }));
        assert_eq!(parse_command("SELECT FROM IMAGES"), Ok(Command::Select(Selection::All)));
        assert_eq!(
            parse_command("select from images where region = 'great-barrier'"),
            Ok(Command::Select(Selection::Region(Region::GreatBarrier)))
        );
        assert_eq!(
            parse_command("SELECT FROM IMAGES WHERE SOURCE = modis"),
            Ok(Command::Select(Selection::Source(Source::Modis)))
        );
        assert_eq!(
            parse_command("FIND WHERE TIME BETWEEN 10 AND 20"),
            Ok(Command::Select(Selection::TimeRange { from: 10, to: 20 }))
        );
        assert_eq!(parse_command("  stats "), Ok(Command::Stats));
        assert_eq!(parse_command("CLEAR"), Ok(Command::Clear));
        assert_eq!(parse_command("help"), Ok(Command::Help));
    }

    #[test]
    fn command_errors() {
        assert!(parse_command("SELECT FROM IMAGES WHERE REGION = 'atlantis'").is_err());
        assert!(parse_command("STATS now").unwrap_err().starts_with("Unexpected tokens"));
        assert!(parse_command("DROP TABLE images").unwrap_err().starts_with("Invalid syntax"));
    }
}
