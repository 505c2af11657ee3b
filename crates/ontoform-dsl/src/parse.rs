//! Parser for the OntoForm module language.
//!
//! The outer grammar is line-oriented: top-level headers (`module`, `schema`,
//! `theory`, `instance`) switch the scanner's current section, and body lines
//! are dispatched by keyword prefix. Multi-line forms are resolved by two
//! balanced-delimiter collectors (parens for relation declarations, braces
//! for set literals); sub-grammars (headers, relation fields, rewrite
//! variables, path expressions) are nom combinators.
//!
//! The parser is total: any input yields either a [`Module`] or a
//! line-tagged [`ParseError`].

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, multispace0, multispace1},
    combinator::{all_consuming, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, tuple},
    IResult,
};
use thiserror::Error;

use crate::ast::{
    Assignment, CarrierPair, Constraint, Equation, FieldDecl, Guard, Instance, Module, Name,
    Orientation, PathExpr, RelationDecl, RewriteRule, RewriteVar, RewriteVarType, Schema,
    SetItem, SetLiteral, SubtypeDecl, Theory,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse error on line {line}: {message}")]
    Line { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Schema(usize),
    Theory(usize),
    Instance(usize),
}

pub fn parse_module(text: &str) -> Result<Module, ParseError> {
    let mut module = Module {
        name: "Unnamed".to_string(),
        schemas: vec![],
        theories: vec![],
        instances: vec![],
    };

    let mut section = Section::None;
    let lines: Vec<&str> = text.lines().collect();

    let mut i = 0usize;
    while i < lines.len() {
        let line_no = i + 1;
        let raw = lines[i];
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            i += 1;
            continue;
        }

        // ------------------------------------------------------------------
        // Section headers
        // ------------------------------------------------------------------
        if let Some(name) = line
            .strip_prefix("module ")
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            module.name = name.to_string();
            i += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("schema ").map(str::trim) {
            let name = rest.trim_end_matches(':').trim();
            if name.is_empty() {
                return Err(ParseError::Line {
                    line: line_no,
                    message: "schema name missing".to_string(),
                });
            }
            module.schemas.push(Schema {
                name: name.to_string(),
                objects: vec![],
                subtypes: vec![],
                relations: vec![],
            });
            section = Section::Schema(module.schemas.len() - 1);
            i += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("theory ").map(str::trim) {
            let (name, schema) =
                parse_bound_header(rest, "on").map_err(|_| ParseError::Line {
                    line: line_no,
                    message: "theory header expects: `theory <Name> on <Schema>:`".to_string(),
                })?;
            module.theories.push(Theory {
                name,
                schema,
                constraints: vec![],
                equations: vec![],
                rewrite_rules: vec![],
            });
            section = Section::Theory(module.theories.len() - 1);
            i += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("instance ").map(str::trim) {
            let (name, schema) =
                parse_bound_header(rest, "of").map_err(|_| ParseError::Line {
                    line: line_no,
                    message: "instance header expects: `instance <Name> of <Schema>:`".to_string(),
                })?;
            module.instances.push(Instance {
                name,
                schema,
                assignments: vec![],
            });
            section = Section::Instance(module.instances.len() - 1);
            i += 1;
            continue;
        }

        // ------------------------------------------------------------------
        // Section bodies
        // ------------------------------------------------------------------
        match section {
            Section::Schema(schema_index) => {
                if let Some(name) = line
                    .strip_prefix("object ")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                {
                    module.schemas[schema_index].objects.push(name.to_string());
                    i += 1;
                    continue;
                }

                if let Some(rest) = line.strip_prefix("subtype ").map(str::trim) {
                    let subtype =
                        parse_subtype_decl(rest).map_err(|message| ParseError::Line {
                            line: line_no,
                            message,
                        })?;
                    module.schemas[schema_index].subtypes.push(subtype);
                    i += 1;
                    continue;
                }

                if line.starts_with("relation ") {
                    let (combined, next_index) =
                        collect_balanced_parens(lines.as_slice(), i, "relation").map_err(
                            |message| ParseError::Line {
                                line: line_no,
                                message,
                            },
                        )?;
                    let relation = parse_relation_decl(&combined).map_err(|message| {
                        ParseError::Line {
                            line: line_no,
                            message,
                        }
                    })?;
                    module.schemas[schema_index].relations.push(relation);
                    i = next_index;
                    continue;
                }

                return Err(ParseError::Line {
                    line: line_no,
                    message: format!("unrecognized schema line: {line}"),
                });
            }
            Section::Theory(theory_index) => {
                if let Some(rest) = line.strip_prefix("constraint ").map(str::trim) {
                    // A constraint with an indented continuation block is
                    // richer than any certified single-line form; it is
                    // preserved verbatim as `Unknown` regardless of prefix.
                    let (continuation, next_index) =
                        collect_indented_block(lines.as_slice(), i + 1);
                    if !continuation.is_empty() {
                        module.theories[theory_index]
                            .constraints
                            .push(Constraint::Unknown {
                                text: format!("{rest} {continuation}"),
                            });
                        i = next_index;
                        continue;
                    }

                    let constraint =
                        parse_constraint(rest).map_err(|message| ParseError::Line {
                            line: line_no,
                            message,
                        })?;
                    module.theories[theory_index].constraints.push(constraint);
                    i += 1;
                    continue;
                }

                if let Some(rest) = line.strip_prefix("equation ").map(str::trim) {
                    let equation_name = rest.trim_end_matches(':').trim();
                    if equation_name.is_empty() {
                        return Err(ParseError::Line {
                            line: line_no,
                            message: "equation name missing".to_string(),
                        });
                    }

                    let (equation_text, next_index) =
                        collect_indented_block(lines.as_slice(), i + 1);
                    let (lhs, rhs) = split_equation(&equation_text).map_err(|message| {
                        ParseError::Line {
                            line: line_no,
                            message,
                        }
                    })?;

                    module.theories[theory_index].equations.push(Equation {
                        name: equation_name.to_string(),
                        lhs,
                        rhs,
                    });

                    i = next_index;
                    continue;
                }

                if let Some(rest) = line.strip_prefix("rewrite ").map(str::trim) {
                    let rule_name = rest.trim_end_matches(':').trim();
                    if rule_name.is_empty() {
                        return Err(ParseError::Line {
                            line: line_no,
                            message: "rewrite rule name missing".to_string(),
                        });
                    }

                    let (block_lines, next_index) =
                        collect_indented_block_lines(lines.as_slice(), i + 1);
                    let rule = parse_rewrite_rule(rule_name, &block_lines).map_err(|message| {
                        ParseError::Line {
                            line: line_no,
                            message,
                        }
                    })?;
                    module.theories[theory_index].rewrite_rules.push(rule);

                    i = next_index;
                    continue;
                }

                return Err(ParseError::Line {
                    line: line_no,
                    message: format!("unrecognized theory line: {line}"),
                });
            }
            Section::Instance(instance_index) => {
                if let Some((lhs, rhs)) = split_assignment(line) {
                    let (set_text, next_index) = collect_balanced_braces(lines.as_slice(), i, rhs)
                        .map_err(|message| ParseError::Line {
                            line: line_no,
                            message,
                        })?;

                    let set_literal = parse_set_literal(&set_text).map_err(|message| {
                        ParseError::Line {
                            line: line_no,
                            message,
                        }
                    })?;

                    module.instances[instance_index]
                        .assignments
                        .push(Assignment {
                            name: lhs.to_string(),
                            value: set_literal,
                        });

                    i = next_index;
                    continue;
                }

                return Err(ParseError::Line {
                    line: line_no,
                    message: format!("unrecognized instance line: {line}"),
                });
            }
            Section::None => {
                return Err(ParseError::Line {
                    line: line_no,
                    message: "line outside any section".to_string(),
                });
            }
        }
    }

    Ok(module)
}

fn strip_comment(line: &str) -> &str {
    if let Some((before, _)) = line.split_once('#') {
        return before;
    }
    line.split_once("--").map(|(a, _)| a).unwrap_or(line)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_continue)
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

/// Parse `<Name> <keyword> <Schema>[:]`, shared by theory (`on`) and
/// instance (`of`) headers.
fn parse_bound_header(rest: &str, keyword: &'static str) -> Result<(Name, Name), String> {
    fn parser(keyword: &'static str) -> impl Fn(&str) -> IResult<&str, (Name, Name)> {
        move |input: &str| {
            let (input, name) = parse_ident(input)?;
            let (input, _) = multispace1(input)?;
            let (input, _) = tag(keyword)(input)?;
            let (input, _) = multispace1(input)?;
            let (input, schema) = parse_ident(input)?;
            let (input, _) = multispace0(input)?;
            let (input, _) = opt(pchar(':'))(input)?;
            let (input, _) = multispace0(input)?;
            Ok((input, (name.to_string(), schema.to_string())))
        }
    }

    all_consuming(parser(keyword))(rest.trim())
        .map(|(_, v)| v)
        .map_err(|_| format!("expected `<Name> {keyword} <Schema>`"))
}

fn parse_subtype_decl(rest: &str) -> Result<SubtypeDecl, String> {
    fn parser(input: &str) -> IResult<&str, SubtypeDecl> {
        let (input, sub) = parse_ident(input)?;
        let (input, _) = multispace1(input)?;
        let (input, _) = alt((tag("<:"), tag("<")))(input)?;
        let (input, _) = multispace1(input)?;
        let (input, sup) = parse_ident(input)?;
        let (input, inclusion) =
            opt(tuple((multispace1, tag("as"), multispace1, parse_ident)))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((
            input,
            SubtypeDecl {
                sub: sub.to_string(),
                sup: sup.to_string(),
                inclusion: inclusion.map(|(_, _, _, incl)| incl.to_string()),
            },
        ))
    }

    all_consuming(parser)(rest.trim())
        .map(|(_, v)| v)
        .map_err(|_| {
            "subtype expects: `subtype <Sub> <: <Sup>` (optionally `as Incl`)".to_string()
        })
}

/// Join lines starting at `start_index` until the paren depth opened on the
/// first line returns to zero. Fails if the input ends mid-span.
fn collect_balanced_parens(
    lines: &[&str],
    start_index: usize,
    keyword: &str,
) -> Result<(String, usize), String> {
    let mut depth: i32 = 0;
    let mut combined = String::new();

    let mut i = start_index;
    while i < lines.len() {
        let line = strip_comment(lines[i]).trim();
        if line.is_empty() {
            i += 1;
            continue;
        }
        if combined.is_empty() && !line.starts_with(keyword) {
            return Err(format!("expected `{keyword}` declaration"));
        }

        if !combined.is_empty() {
            combined.push(' ');
        }
        combined.push_str(line);

        for ch in line.chars() {
            if ch == '(' {
                depth += 1;
            } else if ch == ')' {
                depth -= 1;
            }
        }

        i += 1;
        if depth <= 0 {
            break;
        }
    }

    if depth != 0 {
        return Err("unclosed parenthesis block".to_string());
    }
    Ok((combined, i))
}

fn parse_relation_decl(line: &str) -> Result<RelationDecl, String> {
    fn field_decl(input: &str) -> IResult<&str, FieldDecl> {
        let (input, field) = preceded(multispace0, parse_ident)(input)?;
        let (input, _) = preceded(multispace0, pchar(':'))(input)?;
        let (input, _) = multispace0(input)?;
        let (input, ty) = parse_ident(input)?;
        Ok((
            input,
            FieldDecl {
                field: field.to_string(),
                ty: ty.to_string(),
            },
        ))
    }

    fn annotation(input: &str) -> IResult<&str, (&str, &str)> {
        let (input, _) = multispace1(input)?;
        let (input, _) = pchar('@')(input)?;
        let (input, name) = parse_ident(input)?;
        let (input, _) = multispace1(input)?;
        let (input, ty) = parse_ident(input)?;
        Ok((input, (name, ty)))
    }

    fn parser(input: &str) -> IResult<&str, RelationDecl> {
        let (input, _) = tag("relation")(input)?;
        let (input, _) = multispace1(input)?;
        let (input, name) = parse_ident(input)?;
        let (input, fields) = delimited(
            preceded(multispace0, pchar('(')),
            separated_list1(preceded(multispace0, pchar(',')), field_decl),
            preceded(multispace0, pchar(')')),
        )(input)?;
        let (input, annotations) = many0(annotation)(input)?;
        let (input, _) = multispace0(input)?;

        // `@context` / `@temporal` desugar into implicit trailing fields
        // unless a field of the same name was declared explicitly.
        let mut expanded_fields = fields;
        for (ann, ty) in annotations {
            let implicit = match ann {
                "context" => "ctx",
                "temporal" => "time",
                _ => continue,
            };
            if !expanded_fields.iter().any(|f| f.field == implicit) {
                expanded_fields.push(FieldDecl {
                    field: implicit.to_string(),
                    ty: ty.to_string(),
                });
            }
        }
        Ok((
            input,
            RelationDecl {
                name: name.to_string(),
                fields: expanded_fields,
            },
        ))
    }

    all_consuming(parser)(line.trim())
        .map(|(_, v)| v)
        .map_err(|_| {
            "relation expects: `relation Name(field: Ty, ...)` (optionally followed by `@context Ty` / `@temporal Ty`)".to_string()
        })
}

#[derive(Debug)]
enum ClosureClause {
    On(CarrierPair),
    Param(Vec<Name>),
}

/// Peel one trailing `on (...)` or `param (...)` clause, rightmost first.
fn peel_closure_clause(rest: &str) -> Result<Option<(String, ClosureClause)>, String> {
    let trimmed = rest.trim_end();
    if !trimmed.ends_with(')') {
        return Ok(None);
    }

    let on_idx = trimmed.rfind(" on ");
    let param_idx = trimmed.rfind(" param ");

    let (kind, idx) = match (on_idx, param_idx) {
        (None, None) => return Ok(None),
        (Some(i), None) => ("on", i),
        (None, Some(i)) => ("param", i),
        (Some(i1), Some(i2)) => {
            if i1 > i2 {
                ("on", i1)
            } else {
                ("param", i2)
            }
        }
    };

    let (base, clause) = trimmed.split_at(idx);
    let clause = clause
        .trim_start()
        .strip_prefix(kind)
        .unwrap_or(clause)
        .trim();
    if !clause.starts_with('(') || !clause.ends_with(')') {
        return Ok(None);
    }
    let fields: Vec<&str> = clause[1..clause.len() - 1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    match kind {
        "on" => {
            if fields.len() != 2 {
                return Err("carrier fields clause expects: `on (field0, field1)`".to_string());
            }
            Ok(Some((
                base.trim().to_string(),
                ClosureClause::On(CarrierPair {
                    left: fields[0].to_string(),
                    right: fields[1].to_string(),
                }),
            )))
        }
        _ => {
            if fields.is_empty() {
                return Err(
                    "param fields clause expects: `param (field0, field1, ...)`".to_string()
                );
            }
            Ok(Some((
                base.trim().to_string(),
                ClosureClause::Param(fields.iter().map(|s| (*s).to_string()).collect()),
            )))
        }
    }
}

fn split_closure_clauses(
    rest: &str,
) -> Result<(String, Option<CarrierPair>, Option<Vec<Name>>), String> {
    let mut base = rest.trim().to_string();
    let mut carriers: Option<CarrierPair> = None;
    let mut params: Option<Vec<Name>> = None;

    while let Some((b, clause)) = peel_closure_clause(&base)? {
        match clause {
            ClosureClause::On(c) => {
                if carriers.is_some() {
                    return Err("duplicate `on (...)` clause in constraint".to_string());
                }
                carriers = Some(c);
            }
            ClosureClause::Param(p) => {
                if params.is_some() {
                    return Err("duplicate `param (...)` clause in constraint".to_string());
                }
                params = Some(p);
            }
        }
        base = b;
    }

    Ok((base, carriers, params))
}

/// Parse a `constraint ...` line body (the text after the `constraint `
/// keyword).
///
/// The parser is deliberately robust: unrecognized forms come back as
/// [`Constraint::Unknown`] rather than failing the whole module. Structural
/// mistakes in otherwise-recognized forms (duplicate clauses, misplaced
/// clauses, malformed carrier lists) are hard errors.
pub fn parse_constraint(rest: &str) -> Result<Constraint, String> {
    let original = rest.trim();
    let unknown = || Constraint::Unknown {
        text: original.to_string(),
    };

    let (base, carriers, params) = split_closure_clauses(original)?;
    let base = base.trim().to_string();
    if (carriers.is_some() || params.is_some())
        && !(base.starts_with("symmetric ") || base.starts_with("transitive "))
    {
        return Err(
            "`on (...)` / `param (...)` are only supported for symmetric/transitive constraints"
                .to_string(),
        );
    }

    if let Some(after) = base.strip_prefix("functional ").map(str::trim) {
        let parts: Vec<&str> = after.split("->").collect();
        if parts.len() == 2 {
            if let (Some((rel1, src_field)), Some((rel2, dst_field))) = (
                split_rel_field(parts[0].trim()),
                split_rel_field(parts[1].trim()),
            ) {
                if rel1 == rel2 {
                    return Ok(Constraint::Functional {
                        relation: rel1,
                        src_field,
                        dst_field,
                    });
                }
            }
        }
        return Ok(unknown());
    }

    if let Some(after) = base.strip_prefix("typing ").map(str::trim) {
        if let Some((relation, rule)) = after.split_once(':') {
            let relation = relation.trim();
            let rule = rule.trim();
            if is_ident(relation) && is_ident(rule) {
                return Ok(Constraint::Typing {
                    relation: relation.to_string(),
                    rule: rule.to_string(),
                });
            }
        }
        return Ok(unknown());
    }

    if let Some(after) = base.strip_prefix("symmetric ").map(str::trim) {
        if after.is_empty() {
            return Err("symmetric expects a relation name".to_string());
        }
        return Ok(match split_guarded_relation(after) {
            Some((relation, guard)) => Constraint::Symmetric {
                relation,
                carriers,
                guard,
                params,
            },
            None => unknown(),
        });
    }

    if let Some(after) = base.strip_prefix("transitive ").map(str::trim) {
        if after.is_empty() {
            return Err("transitive expects a relation name".to_string());
        }
        return Ok(match split_guarded_relation(after) {
            Some((relation, guard)) => Constraint::Transitive {
                relation,
                carriers,
                guard,
                params,
            },
            None => unknown(),
        });
    }

    if let Some(after) = base.strip_prefix("key ").map(str::trim) {
        let Some(open) = after.find('(') else {
            return Ok(unknown());
        };
        let Some(close) = after.rfind(')').filter(|close| *close > open) else {
            return Ok(unknown());
        };
        let relation = after[..open].trim();
        let fields: Vec<String> = after[open + 1..close]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !is_ident(relation) || fields.is_empty() {
            return Ok(unknown());
        }
        return Ok(Constraint::Key {
            relation: relation.to_string(),
            fields,
        });
    }

    Ok(unknown())
}

/// Split `Rel [where Rel.field in {A, ...}]` into the relation name and an
/// optional guard. Returns `None` when the text is not of this shape (the
/// caller preserves it as `Unknown`).
///
/// The guard accepts both the canonical `Rel.field` form (the qualifier must
/// match the constrained relation) and a bare `field` shorthand.
fn split_guarded_relation(after: &str) -> Option<(Name, Option<Guard>)> {
    let Some((relation, guard_text)) = after.split_once(" where ") else {
        let relation = after.trim();
        return is_ident(relation).then(|| (relation.to_string(), None));
    };

    let relation = relation.trim();
    if !is_ident(relation) {
        return None;
    }

    let (lhs, rhs) = guard_text.trim().split_once(" in ")?;
    let lhs = lhs.trim();
    let field = match lhs.split_once('.') {
        Some((qualifier, field)) => {
            if qualifier.trim() != relation {
                return None;
            }
            field.trim().to_string()
        }
        None => lhs.to_string(),
    };
    if !is_ident(&field) {
        return None;
    }

    let values = parse_name_set(rhs.trim())?;
    Some((
        relation.to_string(),
        Some(Guard { field, values }),
    ))
}

fn split_rel_field(s: &str) -> Option<(Name, Name)> {
    let (rel, field) = s.split_once('.')?;
    let rel = rel.trim();
    let field = field.trim();
    (is_ident(rel) && is_ident(field)).then(|| (rel.to_string(), field.to_string()))
}

fn parse_name_set(s: &str) -> Option<Vec<Name>> {
    let inner = s.strip_prefix('{')?.strip_suffix('}')?.trim();
    let values: Vec<Name> = inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if values.is_empty() || !values.iter().all(|v| is_ident(v)) {
        return None;
    }
    Some(values)
}

/// Collect the non-empty lines following a block header until the next
/// top-level keyword, joined with single spaces.
fn collect_indented_block(lines: &[&str], start_index: usize) -> (String, usize) {
    let (out_lines, next) = collect_indented_block_lines(lines, start_index);
    (out_lines.join(" "), next)
}

fn collect_indented_block_lines(lines: &[&str], start_index: usize) -> (Vec<String>, usize) {
    let mut out_lines: Vec<String> = Vec::new();
    let mut i = start_index;
    while i < lines.len() {
        let trimmed = strip_comment(lines[i]).trim();
        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        if is_section_keyword(trimmed) {
            break;
        }

        out_lines.push(trimmed.to_string());
        i += 1;
    }
    (out_lines, i)
}

fn is_section_keyword(trimmed: &str) -> bool {
    trimmed.starts_with("module ")
        || trimmed.starts_with("schema ")
        || trimmed.starts_with("theory ")
        || trimmed.starts_with("instance ")
        || trimmed.starts_with("constraint ")
        || trimmed.starts_with("equation ")
        || trimmed.starts_with("rewrite ")
}

fn split_equation(equation_text: &str) -> Result<(String, String), String> {
    let Some((lhs, rhs)) = equation_text.split_once('=') else {
        return Err("equation body must contain `=`".to_string());
    };
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if lhs.is_empty() || rhs.is_empty() {
        return Err("equation must have non-empty lhs and rhs".to_string());
    }
    Ok((lhs.to_string(), rhs.to_string()))
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (lhs, rhs) = line.split_once('=')?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if lhs.is_empty() || rhs.is_empty() {
        return None;
    }
    Some((lhs, rhs))
}

fn parse_rewrite_rule(rule_name: &str, lines: &[String]) -> Result<RewriteRule, String> {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Field {
        None,
        Vars,
        Lhs,
        Rhs,
        Orientation,
    }

    let mut current = Field::None;
    let mut vars_lines: Vec<String> = Vec::new();
    let mut lhs_lines: Vec<String> = Vec::new();
    let mut rhs_lines: Vec<String> = Vec::new();
    let mut orientation: Option<Orientation> = None;

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("vars:") {
            current = Field::Vars;
            let rest = rest.trim();
            if !rest.is_empty() {
                vars_lines.push(rest.to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("lhs:") {
            current = Field::Lhs;
            let rest = rest.trim();
            if !rest.is_empty() {
                lhs_lines.push(rest.to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("rhs:") {
            current = Field::Rhs;
            let rest = rest.trim();
            if !rest.is_empty() {
                rhs_lines.push(rest.to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("orientation:") {
            current = Field::Orientation;
            let rest = rest.trim();
            if !rest.is_empty() {
                orientation = Some(parse_orientation(rest)?);
                current = Field::None;
            }
            continue;
        }

        match current {
            Field::Vars => vars_lines.push(line.to_string()),
            Field::Lhs => lhs_lines.push(line.to_string()),
            Field::Rhs => rhs_lines.push(line.to_string()),
            Field::Orientation => {
                orientation = Some(parse_orientation(line)?);
                current = Field::None;
            }
            Field::None => {
                return Err(format!(
                    "rewrite `{rule_name}`: unexpected line (expected vars/lhs/rhs): `{line}`"
                ));
            }
        }
    }

    let mut vars: Vec<RewriteVar> = Vec::new();
    for line in vars_lines {
        vars.extend(parse_rewrite_vars(&line)?);
    }

    let lhs_text = lhs_lines.join(" ");
    let rhs_text = rhs_lines.join(" ");
    if lhs_text.trim().is_empty() {
        return Err(format!("rewrite `{rule_name}`: missing `lhs:`"));
    }
    if rhs_text.trim().is_empty() {
        return Err(format!("rewrite `{rule_name}`: missing `rhs:`"));
    }

    let lhs = parse_path_expr(&lhs_text)?;
    let rhs = parse_path_expr(&rhs_text)?;

    Ok(RewriteRule {
        name: rule_name.to_string(),
        orientation: orientation.unwrap_or_default(),
        vars,
        lhs,
        rhs,
    })
}

fn parse_orientation(s: &str) -> Result<Orientation, String> {
    match s.trim() {
        "forward" => Ok(Orientation::Forward),
        "backward" => Ok(Orientation::Backward),
        "bidirectional" | "both" => Ok(Orientation::Bidirectional),
        other => Err(format!(
            "unknown rewrite orientation `{other}` (expected forward|backward|bidirectional)"
        )),
    }
}

/// Parse a comma-separated list of rewrite-rule variable declarations, e.g.
/// `x: Person, y: Person, p: Path(x, y)`.
pub fn parse_rewrite_vars(line: &str) -> Result<Vec<RewriteVar>, String> {
    fn comma(input: &str) -> IResult<&str, ()> {
        let (input, _) = multispace0(input)?;
        let (input, _) = pchar(',')(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, ()))
    }

    fn var_type(input: &str) -> IResult<&str, RewriteVarType> {
        let (input, _) = multispace0(input)?;
        let (rest, head) = parse_ident(input)?;
        if head != "Path" {
            return Ok((
                rest,
                RewriteVarType::Object {
                    ty: head.to_string(),
                },
            ));
        }

        // `Path(x, y)` or `Path x y`
        let (rest, _) = multispace0(rest)?;
        if let Ok((rest, _)) = pchar::<&str, nom::error::Error<&str>>('(')(rest) {
            let (rest, from) = preceded(multispace0, parse_ident)(rest)?;
            let (rest, _) = tuple((multispace0, pchar(','), multispace0))(rest)?;
            let (rest, to) = parse_ident(rest)?;
            let (rest, _) = preceded(multispace0, pchar(')'))(rest)?;
            Ok((
                rest,
                RewriteVarType::Path {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            ))
        } else {
            let (rest, from) = parse_ident(rest)?;
            let (rest, to) = preceded(multispace1, parse_ident)(rest)?;
            Ok((
                rest,
                RewriteVarType::Path {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            ))
        }
    }

    fn var_decl(input: &str) -> IResult<&str, RewriteVar> {
        let (input, name) = preceded(multispace0, parse_ident)(input)?;
        let (input, _) = preceded(multispace0, pchar(':'))(input)?;
        let (input, ty) = var_type(input)?;
        Ok((
            input,
            RewriteVar {
                name: name.to_string(),
                ty,
            },
        ))
    }

    fn parser(input: &str) -> IResult<&str, Vec<RewriteVar>> {
        let (input, decls) = separated_list1(comma, var_decl)(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, decls))
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    all_consuming(parser)(trimmed).map(|(_, v)| v).map_err(|_| {
        format!("invalid rewrite vars line: `{trimmed}` (expected `x: Ty, p: Path(x,y)` etc)")
    })
}

/// Parse a path expression: `p`, `refl(e)` (alias `id(e)`),
/// `step(from, rel, to)`, `trans(p, q)`, `inv(p)`, arbitrarily nested.
pub fn parse_path_expr(text: &str) -> Result<PathExpr, String> {
    fn comma(input: &str) -> IResult<&str, ()> {
        let (input, _) = multispace0(input)?;
        let (input, _) = pchar(',')(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, ()))
    }

    fn parens<'a, O>(
        mut inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
    ) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
        move |input: &'a str| {
            let (input, _) = multispace0(input)?;
            let (input, _) = pchar('(')(input)?;
            let (input, out) = inner(input)?;
            let (input, _) = multispace0(input)?;
            let (input, _) = pchar(')')(input)?;
            Ok((input, out))
        }
    }

    fn expr(input: &str) -> IResult<&str, PathExpr> {
        preceded(
            multispace0,
            alt((refl_expr, step_expr, seq_expr, inv_expr, var_expr)),
        )(input)
    }

    fn var_expr(input: &str) -> IResult<&str, PathExpr> {
        let (input, name) = parse_ident(input)?;
        Ok((
            input,
            PathExpr::Var {
                name: name.to_string(),
            },
        ))
    }

    fn refl_expr(input: &str) -> IResult<&str, PathExpr> {
        let (input, _) = alt((tag("refl"), tag("id")))(input)?;
        let (input, entity) = parens(preceded(multispace0, parse_ident))(input)?;
        Ok((
            input,
            PathExpr::Reflexive {
                entity: entity.to_string(),
            },
        ))
    }

    fn step_expr(input: &str) -> IResult<&str, PathExpr> {
        let (input, _) = tag("step")(input)?;
        let (input, (from, rel, to)) = parens(tuple((
            preceded(multispace0, parse_ident),
            preceded(comma, parse_ident),
            preceded(comma, parse_ident),
        )))(input)?;
        Ok((
            input,
            PathExpr::Step {
                from: from.to_string(),
                rel: rel.to_string(),
                to: to.to_string(),
            },
        ))
    }

    fn seq_expr(input: &str) -> IResult<&str, PathExpr> {
        let (input, _) = tag("trans")(input)?;
        let (input, (left, right)) = parens(tuple((expr, preceded(comma, expr))))(input)?;
        Ok((
            input,
            PathExpr::Seq {
                left: Box::new(left),
                right: Box::new(right),
            },
        ))
    }

    fn inv_expr(input: &str) -> IResult<&str, PathExpr> {
        let (input, _) = tag("inv")(input)?;
        let (input, path) = parens(expr)(input)?;
        Ok((
            input,
            PathExpr::Inverse {
                path: Box::new(path),
            },
        ))
    }

    all_consuming(expr)(text.trim())
        .map(|(_, v)| v)
        .map_err(|_| format!("invalid path expression: `{}`", text.trim()))
}

/// Join lines until the brace depth opened by the assignment's right-hand
/// side returns to zero. Fails if the input ends mid-span.
fn collect_balanced_braces(
    lines: &[&str],
    start_index: usize,
    first_rhs: &str,
) -> Result<(String, usize), String> {
    fn brace_depth_delta(s: &str) -> i32 {
        let mut delta = 0;
        for ch in s.chars() {
            if ch == '{' {
                delta += 1;
            } else if ch == '}' {
                delta -= 1;
            }
        }
        delta
    }

    let rhs = strip_comment(first_rhs).trim();
    let mut combined = rhs.to_string();
    let mut depth = brace_depth_delta(rhs);

    let mut i = start_index + 1;
    while i < lines.len() && depth > 0 {
        let line = strip_comment(lines[i]).trim();
        if !line.is_empty() {
            combined.push(' ');
            combined.push_str(line);
            depth += brace_depth_delta(line);
        }
        i += 1;
    }

    if depth != 0 {
        return Err("unclosed `{ ... }` block".to_string());
    }
    Ok((combined, i))
}

fn parse_set_literal(text: &str) -> Result<SetLiteral, String> {
    let text = text.trim();
    if !text.starts_with('{') || !text.ends_with('}') {
        return Err("expected set literal `{ ... }`".to_string());
    }
    let inner = text[1..text.len() - 1].trim();
    let items = split_top_level_commas(inner)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_set_item)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SetLiteral { items })
}

/// Split on commas that are not nested inside parens (tuple items contain
/// their own commas).
fn split_top_level_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut paren_depth: i32 = 0;
    for (idx, ch) in s.char_indices() {
        match ch {
            '(' => paren_depth += 1,
            ')' => paren_depth -= 1,
            ',' if paren_depth == 0 => {
                parts.push(&s[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_set_item(item: &str) -> Result<SetItem, String> {
    let trimmed = item.trim();
    if trimmed.starts_with('(') && trimmed.ends_with(')') {
        let inner = trimmed[1..trimmed.len() - 1].trim();
        let mut fields = Vec::new();
        for part in split_top_level_commas(inner) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((k, v)) = part.split_once('=') else {
                return Err(format!("tuple field missing `=`: `{part}`"));
            };
            fields.push((k.trim().to_string(), v.trim().to_string()));
        }
        return Ok(SetItem::Tuple { fields });
    }
    Ok(SetItem::Ident {
        name: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_module_with_all_sections() {
        let text = r#"
module FlowDemo

# commissioned schema
schema Economy:
  object Agent
  object Bank
  subtype Bank <: Agent as bankAsAgent
  relation Flow(from: Agent, to: Agent) @context Market

theory FlowRules on Economy:
  constraint key Flow(from, to, ctx)
  constraint symmetric Flow on (from, to) param (ctx)
  equation SelfFlow:
    refl(a) = trans(p, inv(p))
  rewrite cancel_inverse:
    vars: a: Agent, p: Path(a, a)
    lhs: trans(p, inv(p))
    rhs: refl(a)
    orientation: forward

instance Spring of Economy:
  Agent = {alice, bob}
  Flow = {
    (from=alice, to=bob, ctx=open),
    (from=bob, to=alice, ctx=open)
  }
"#;
        let module = parse_module(text).expect("parse");
        assert_eq!(module.name, "FlowDemo");
        assert_eq!(module.schemas.len(), 1);
        assert_eq!(module.schemas[0].subtypes.len(), 1);
        assert_eq!(
            module.schemas[0].subtypes[0].inclusion.as_deref(),
            Some("bankAsAgent")
        );
        // @context desugars into a trailing `ctx` field.
        let flow = &module.schemas[0].relations[0];
        assert_eq!(
            flow.fields.iter().map(|f| f.field.as_str()).collect::<Vec<_>>(),
            vec!["from", "to", "ctx"]
        );
        assert_eq!(module.theories[0].constraints.len(), 2);
        assert_eq!(module.theories[0].equations.len(), 1);
        assert_eq!(module.theories[0].rewrite_rules.len(), 1);
        assert_eq!(module.instances[0].assignments.len(), 2);
    }

    #[test]
    fn defaults_module_name_when_header_missing() {
        let module = parse_module("schema S:\n  object A\n").expect("parse");
        assert_eq!(module.name, "Unnamed");
    }

    #[test]
    fn reports_line_numbers_on_errors() {
        let text = "module M\n\nschema S:\n  objekt A\n";
        let err = parse_module(text).expect_err("should fail");
        let ParseError::Line { line, message } = err;
        assert_eq!(line, 4);
        assert!(message.contains("unrecognized schema line"));
    }

    #[test]
    fn rejects_unclosed_relation_parens_at_eof() {
        let text = "module M\nschema S:\n  relation R(a: A,\n";
        let err = parse_module(text).expect_err("should fail");
        assert!(err.to_string().contains("unclosed parenthesis block"));
    }

    #[test]
    fn rejects_unclosed_set_literal_at_eof() {
        let text = "module M\nschema S:\n  object A\ninstance I of S:\n  A = {x,\n";
        let err = parse_module(text).expect_err("should fail");
        assert!(err.to_string().contains("unclosed `{ ... }` block"));
    }

    #[test]
    fn folds_constraint_with_continuation_into_unknown() {
        let text = r#"
module M

schema S:
  object A
  relation R(from: A, to: A)

theory T on S:
  constraint key R(from, to)
    severity: warning
  constraint key R(from, to)
"#;
        let module = parse_module(text).expect("parse");
        let constraints = &module.theories[0].constraints;
        assert_eq!(constraints.len(), 2);
        assert!(
            matches!(&constraints[0], Constraint::Unknown { text }
                if text.contains("key R(from, to)") && text.contains("severity: warning")),
            "got {:?}",
            constraints[0]
        );
        assert!(matches!(&constraints[1], Constraint::Key { .. }));
    }

    #[test]
    fn folds_named_constraint_block_into_unknown() {
        let text = r#"
module M

schema S:
  object A

theory T on S:
  constraint FutureRule:
    every A eventually reaches a fixed point
"#;
        let module = parse_module(text).expect("parse");
        assert!(matches!(
            &module.theories[0].constraints[0],
            Constraint::Unknown { text } if text.starts_with("FutureRule:")
        ));
    }

    #[test]
    fn parses_deeply_nested_path_expr() {
        let expr = parse_path_expr("trans(inv(trans(p, step(a, R, b))), refl(c))").expect("parse");
        assert_eq!(
            expr.to_string(),
            "trans(inv(trans(p,step(a,R,b))),refl(c))"
        );
    }

    #[test]
    fn accepts_id_alias_for_reflexive_paths() {
        assert_eq!(
            parse_path_expr("id(x)").expect("parse"),
            PathExpr::Reflexive {
                entity: "x".to_string()
            }
        );
    }

    #[test]
    fn parses_space_form_path_var_type() {
        let vars = parse_rewrite_vars("p: Path a b").expect("parse");
        assert_eq!(
            vars[0].ty,
            RewriteVarType::Path {
                from: "a".to_string(),
                to: "b".to_string()
            }
        );
    }
}
