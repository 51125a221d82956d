use nom::branch::alt;
use nom::bytes::complete::{tag, take_until, take_while_m_n};
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, rest, verify};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use crate::template::{ExtensionCall, Template, TemplateNode};

/// Extension calls nested deeper than this are not recognised and stay literal text.
pub const MAX_EXTENSION_DEPTH: usize = 16;

/// Parses pattern text into a [`Template`].
///
/// Never fails: a `{{` that does not open a recognised placeholder is kept as
/// literal text, so malformed or foreign brace syntax passes through untouched.
pub fn parse_template(input: &str) -> Template {
    match all_consuming(many0(parse_node)).parse(input) {
        Ok((_, nodes)) => Template { nodes: merge_literals(nodes) },
        Err(_) => Template { nodes: vec![TemplateNode::Literal(input.to_string())] },
    }
}

pub fn parse_node(input: &str) -> IResult<&str, TemplateNode> {
    alt((
        parse_placeholder,
        map(parse_literal_text, |text| TemplateNode::Literal(text.to_string())),
        map(tag("{{"), |text: &str| TemplateNode::Literal(text.to_string())),
    )).parse(input)
}

pub fn parse_placeholder(input: &str) -> IResult<&str, TemplateNode> {
    placeholder_at(input, 0)
}

fn placeholder_at(input: &str, depth: usize) -> IResult<&str, TemplateNode> {
    alt((
        map(|i| extension_call_at(i, depth), TemplateNode::Extension),
        map(parse_input, |_| TemplateNode::Input),
        map(parse_variable, |name| TemplateNode::Variable(name.to_string())),
    )).parse(input)
}

pub fn parse_literal_text(input: &str) -> IResult<&str, &str> {
    verify(
        alt((
            take_until("{{"),
            rest,
        )),
        |s: &&str| !s.is_empty(),
    ).parse(input)
}

pub fn parse_input(input: &str) -> IResult<&str, &str> {
    tag("{{input}}").parse(input)
}

pub fn parse_variable(input: &str) -> IResult<&str, &str> {
    delimited(tag("{{"), identifier, tag("}}")).parse(input)
}

pub fn parse_extension_call(input: &str) -> IResult<&str, ExtensionCall> {
    extension_call_at(input, 0)
}

fn extension_call_at(input: &str, depth: usize) -> IResult<&str, ExtensionCall> {
    if depth >= MAX_EXTENSION_DEPTH {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::TooLarge)));
    }

    map(
        delimited(
            tag("{{ext:"),
            (
                identifier,
                preceded(char(':'), identifier),
                preceded(char(':'), many0(|i| argument_node_at(i, depth + 1))),
            ),
            tag("}}"),
        ),
        |(name, operation, argument)| ExtensionCall {
            name: name.to_string(),
            operation: operation.to_string(),
            argument: merge_literals(argument),
        },
    ).parse(input)
}

fn argument_node_at(input: &str, depth: usize) -> IResult<&str, TemplateNode> {
    alt((
        |i| placeholder_at(i, depth),
        map(parse_argument_text, |text| TemplateNode::Literal(text.to_string())),
    )).parse(input)
}

// Argument text runs up to the next opening or closing braces.
fn parse_argument_text(input: &str) -> IResult<&str, &str> {
    let end = match input.find("{{") {
        Some(open) => input[..open].find("}}").unwrap_or(open),
        None => input.find("}}").unwrap_or(input.len()),
    };

    if end == 0 {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::TakeUntil)));
    }
    Ok((&input[end..], &input[..end]))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    // Limit identifiers to 1-64 characters with alphanumeric, dash, underscore
    take_while_m_n(
        1,
        64,
        |c: char| c.is_alphanumeric() || c == '-' || c == '_'
    ).parse(input)
}

fn merge_literals(nodes: Vec<TemplateNode>) -> Vec<TemplateNode> {
    let mut merged: Vec<TemplateNode> = Vec::with_capacity(nodes.len());
    for node in nodes {
        match (merged.last_mut(), node) {
            (Some(TemplateNode::Literal(previous)), TemplateNode::Literal(text)) => previous.push_str(&text),
            (_, node) => merged.push(node),
        }
    }
    merged
}
