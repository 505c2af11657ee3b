//! Checking for the certified subset of theory constraints.
//!
//! Supported constraint kinds:
//! - `constraint key Rel(field, ...)`
//! - `constraint functional Rel.field -> Rel.field`
//! - `constraint symmetric Rel [where ...] [on (...)] [param (...)]`
//! - `constraint transitive Rel [where ...] [on (...)] [param (...)]`
//! - `constraint typing Rel: rule_name` (small builtin rule set)
//!
//! Symmetric/transitive constraints are checked as *closure compatibility*:
//! the derived closure over the carrier pair (within each param fiber) must
//! still satisfy every key/functional constraint declared on the same
//! relation. No inverse or composite tuples are ever materialized into the
//! instance.
//!
//! Not certified: global entailment/inference, relational algebra beyond
//! uniqueness checks. Modules carrying constraints outside the subset are
//! refused up front (fail-closed), never silently skipped.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use ontoform_dsl::ast::{CarrierPair, Constraint, Guard, Instance, Module, Name, SetItem};

use crate::typing_rules::check_typing_constraint;

/// Count summary produced by a successful constraint check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintSummary {
    pub module_name: String,
    /// Number of declared constraints within the certified subset.
    pub constraint_count: u32,
    /// Number of instances visited (by schema match).
    pub instance_count: u32,
    /// Number of (constraint × instance) checks performed.
    pub check_count: u32,
}

/// Check that a module satisfies every declared constraint in the certified
/// subset, across every instance of the constrained schemas.
pub fn check_constraints(module: &Module) -> Result<ConstraintSummary> {
    refuse_unknown_constraints(module)?;

    let schema_names: HashSet<&str> = module.schemas.iter().map(|s| s.name.as_str()).collect();
    for th in &module.theories {
        if !schema_names.contains(th.schema.as_str()) {
            return Err(anyhow!(
                "theory `{}` references unknown schema `{}`",
                th.name,
                th.schema
            ));
        }
    }

    let constraints = schema_constraints(module);
    let field_index = RelationFieldIndex::from_module(module);
    let mut check_count: u32 = 0;

    for inst in &module.instances {
        for &(schema, constraint) in constraints
            .iter()
            .filter(|(schema, _)| *schema == inst.schema.as_str())
        {
            check_count += 1;
            match constraint {
                Constraint::Key { relation, fields } => {
                    let declared = field_index.relation_fields(&inst.schema, relation)?;
                    let rows = collect_rows(inst, relation, declared)?;
                    check_key_on_rows(&inst.name, relation, declared, rows.into_iter(), fields)?;
                }
                Constraint::Functional {
                    relation,
                    src_field,
                    dst_field,
                } => {
                    let declared = field_index.relation_fields(&inst.schema, relation)?;
                    let rows = collect_rows(inst, relation, declared)?;
                    check_functional_on_rows(
                        &inst.name,
                        relation,
                        declared,
                        rows.into_iter(),
                        src_field,
                        dst_field,
                    )?;
                }
                Constraint::Symmetric {
                    relation,
                    carriers,
                    guard,
                    params,
                } => {
                    let declared = field_index.relation_fields(&inst.schema, relation)?;
                    check_symmetric_closure(
                        inst,
                        schema,
                        relation,
                        declared,
                        carriers,
                        guard,
                        params,
                        &constraints,
                    )?;
                }
                Constraint::Transitive {
                    relation,
                    carriers,
                    guard,
                    params,
                } => {
                    let declared = field_index.relation_fields(&inst.schema, relation)?;
                    check_transitive_closure(
                        inst,
                        schema,
                        relation,
                        declared,
                        carriers,
                        guard,
                        params,
                        &constraints,
                    )?;
                }
                Constraint::Typing { relation, rule } => {
                    check_typing_constraint(inst, &inst.schema, relation, rule, &field_index)?;
                }
                // Unreachable past the fail-closed gate.
                Constraint::Unknown { .. } => {}
            }
        }
    }

    Ok(ConstraintSummary {
        module_name: module.name.clone(),
        constraint_count: constraints.len() as u32,
        instance_count: module.instances.len() as u32,
        check_count,
    })
}

/// Fail-closed gate: refuse the whole module if any theory carries a
/// constraint the checker does not understand, even when the known subset
/// would pass. Offenders are aggregated (up to 8, plus a remainder count)
/// rather than reported one at a time.
fn refuse_unknown_constraints(module: &Module) -> Result<()> {
    let unknown: Vec<(&str, &str)> = module
        .theories
        .iter()
        .flat_map(|th| {
            th.constraints.iter().filter_map(move |c| match c {
                Constraint::Unknown { text } => Some((th.name.as_str(), text.as_str())),
                _ => None,
            })
        })
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }

    let mut msg = String::new();
    msg.push_str("constraint checking refused: unknown/unsupported theory constraints found.\n");
    msg.push_str("Rewrite them into certified structured forms before requesting checking.\n");
    msg.push_str("Unknown constraints:\n");
    for (i, (th_name, text)) in unknown.iter().take(8).enumerate() {
        msg.push_str(&format!("  {i}: theory `{th_name}`: {text}\n"));
    }
    if unknown.len() > 8 {
        msg.push_str(&format!("  ... ({} more)\n", unknown.len() - 8));
    }
    Err(anyhow!(msg.trim_end().to_string()))
}

/// Every declared constraint paired with the schema its theory is bound to.
fn schema_constraints(module: &Module) -> Vec<(&str, &Constraint)> {
    module
        .theories
        .iter()
        .flat_map(|th| th.constraints.iter().map(move |c| (th.schema.as_str(), c)))
        .collect()
}

/// Map `schema -> relation -> ordered declared field names`.
#[derive(Debug, Clone, Default)]
pub(crate) struct RelationFieldIndex {
    fields_by_schema_relation: HashMap<String, HashMap<String, Vec<String>>>,
}

impl RelationFieldIndex {
    fn from_module(module: &Module) -> Self {
        let mut fields_by_schema_relation: HashMap<String, HashMap<String, Vec<String>>> =
            HashMap::new();
        for s in &module.schemas {
            let rels = fields_by_schema_relation.entry(s.name.clone()).or_default();
            for r in &s.relations {
                let field_names = r.fields.iter().map(|f| f.field.clone()).collect::<Vec<_>>();
                rels.insert(r.name.clone(), field_names);
            }
        }
        Self {
            fields_by_schema_relation,
        }
    }

    pub(crate) fn relation_fields(&self, schema: &str, relation: &str) -> Result<&[String]> {
        let Some(rels) = self.fields_by_schema_relation.get(schema) else {
            return Err(anyhow!("unknown schema `{schema}`"));
        };
        let Some(fields) = rels.get(relation) else {
            return Err(anyhow!("unknown relation `{relation}` in schema `{schema}`"));
        };
        Ok(fields.as_slice())
    }
}

pub(crate) fn relation_tuples<'a>(
    inst: &'a Instance,
    relation_name: &'a str,
) -> impl Iterator<Item = &'a Vec<(Name, Name)>> + 'a {
    inst.assignments
        .iter()
        .filter(move |a| a.name == relation_name)
        .flat_map(|a| a.value.items.iter())
        .filter_map(|it| match it {
            SetItem::Tuple { fields } => Some(fields),
            _ => None,
        })
}

/// Order an unordered tuple's values by the declared field order.
fn tuple_values_in_order(
    inst_name: &str,
    relation_name: &str,
    tuple: &[(Name, Name)],
    ordered_fields: &[String],
) -> Result<Vec<String>> {
    let mut map: HashMap<&str, &str> = HashMap::new();
    for (k, v) in tuple {
        if map.insert(k.as_str(), v.as_str()).is_some() {
            return Err(anyhow!(
                "instance `{inst_name}` relation `{relation_name}`: duplicate field `{k}` in tuple",
            ));
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(ordered_fields.len());
    for f in ordered_fields {
        let Some(v) = map.get(f.as_str()) else {
            return Err(anyhow!(
                "instance `{inst_name}` relation `{relation_name}`: missing field `{f}` in tuple"
            ));
        };
        out.push((*v).to_string());
    }
    Ok(out)
}

fn collect_rows(
    inst: &Instance,
    relation_name: &str,
    declared_fields: &[String],
) -> Result<Vec<Vec<String>>> {
    relation_tuples(inst, relation_name)
        .map(|t| tuple_values_in_order(&inst.name, relation_name, t, declared_fields))
        .collect()
}

fn check_key_on_rows(
    inst_name: &str,
    relation_name: &str,
    row_fields: &[String],
    rows: impl Iterator<Item = Vec<String>>,
    key_fields: &[String],
) -> Result<()> {
    if key_fields.is_empty() {
        return Ok(());
    }

    let mut key_positions: Vec<usize> = Vec::with_capacity(key_fields.len());
    for f in key_fields {
        let Some(idx) = row_fields.iter().position(|x| x == f) else {
            return Err(anyhow!(
                "instance `{inst_name}` relation `{relation_name}`: key field `{f}` is not a declared field",
            ));
        };
        key_positions.push(idx);
    }

    let mut seen: HashMap<Vec<String>, usize> = HashMap::new();
    for (i, row) in rows.enumerate() {
        let key: Vec<String> = key_positions.iter().map(|idx| row[*idx].clone()).collect();
        if let Some(prev) = seen.insert(key, i) {
            return Err(anyhow!(
                "key violation in instance `{inst_name}` on `{relation_name}({})`: duplicate key at tuples {prev} and {i}",
                key_fields.join(", ")
            ));
        }
    }
    Ok(())
}

fn check_functional_on_rows(
    inst_name: &str,
    relation_name: &str,
    row_fields: &[String],
    rows: impl Iterator<Item = Vec<String>>,
    src_field: &str,
    dst_field: &str,
) -> Result<()> {
    let Some(src_idx) = row_fields.iter().position(|x| x == src_field) else {
        return Err(anyhow!(
            "instance `{inst_name}` relation `{relation_name}`: functional src field `{src_field}` is not a declared field",
        ));
    };
    let Some(dst_idx) = row_fields.iter().position(|x| x == dst_field) else {
        return Err(anyhow!(
            "instance `{inst_name}` relation `{relation_name}`: functional dst field `{dst_field}` is not a declared field",
        ));
    };

    let mut map: HashMap<String, String> = HashMap::new();
    for (i, row) in rows.enumerate() {
        let src = row[src_idx].clone();
        let dst = row[dst_idx].clone();
        if let Some(prev) = map.get(&src) {
            if prev != &dst {
                return Err(anyhow!(
                    "functional violation in instance `{inst_name}` on `{relation_name}`.{src_field} -> `{relation_name}`.{dst_field}: src `{src}` maps to both `{prev}` and `{dst}` (tuple {i})",
                ));
            }
        } else {
            map.insert(src, dst);
        }
    }
    Ok(())
}

/// Field layout of derived closure rows: `[carrier0, carrier1, params...]`.
struct ClosureLayout {
    carrier_positions: (usize, usize),
    param_positions: Vec<usize>,
    /// Closure row field names, carrier pair first.
    row_fields: Vec<String>,
}

impl ClosureLayout {
    fn project(&self, tuple_values: &[String]) -> Vec<String> {
        let (left, right) = self.carrier_positions;
        let mut row = Vec::with_capacity(2 + self.param_positions.len());
        row.push(tuple_values[left].clone());
        row.push(tuple_values[right].clone());
        for p in &self.param_positions {
            row.push(tuple_values[*p].clone());
        }
        row
    }
}

fn field_position(declared_fields: &[String], field: &str) -> Option<usize> {
    declared_fields.iter().position(|f| f == field)
}

/// Resolve and validate the carrier/param layout of a closure constraint.
///
/// Carriers default to the relation's first two declared fields. Param
/// fields must be declared, pairwise distinct, and disjoint from the
/// carriers.
fn closure_layout(
    inst_name: &str,
    relation_name: &str,
    declared_fields: &[String],
    carriers: &Option<CarrierPair>,
    params: &Option<Vec<Name>>,
    kind: &str,
) -> Result<ClosureLayout> {
    if declared_fields.len() < 2 {
        return Err(anyhow!(
            "instance `{inst_name}` relation `{relation_name}`: {kind} constraint requires at least 2 fields",
        ));
    }

    let (left, right) = match carriers {
        Some(c) => {
            let left = field_position(declared_fields, &c.left).ok_or_else(|| {
                anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: carrier field `{}` is not a declared field",
                    c.left
                )
            })?;
            let right = field_position(declared_fields, &c.right).ok_or_else(|| {
                anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: carrier field `{}` is not a declared field",
                    c.right
                )
            })?;
            if left == right {
                return Err(anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: carrier fields must be distinct",
                ));
            }
            (left, right)
        }
        None => (0, 1),
    };

    let mut param_positions: Vec<usize> = Vec::new();
    let mut row_fields = vec![
        declared_fields[left].clone(),
        declared_fields[right].clone(),
    ];
    if let Some(params) = params {
        for p in params {
            let pos = field_position(declared_fields, p).ok_or_else(|| {
                anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: param field `{p}` is not a declared field",
                )
            })?;
            if pos == left || pos == right {
                return Err(anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: param field `{p}` must not be a carrier field",
                ));
            }
            if param_positions.contains(&pos) {
                return Err(anyhow!(
                    "instance `{inst_name}` relation `{relation_name}`: duplicate param field `{p}`",
                ));
            }
            param_positions.push(pos);
            row_fields.push(p.clone());
        }
    }

    Ok(ClosureLayout {
        carrier_positions: (left, right),
        param_positions,
        row_fields,
    })
}

fn guard_position(
    inst_name: &str,
    relation_name: &str,
    declared_fields: &[String],
    guard: &Guard,
    kind: &str,
) -> Result<usize> {
    field_position(declared_fields, &guard.field).ok_or_else(|| {
        anyhow!(
            "instance `{inst_name}` relation `{relation_name}`: {kind} guard field `{}` is not a declared field",
            guard.field
        )
    })
}

enum Recheck<'a> {
    Key(&'a [Name]),
    Functional { src: &'a str, dst: &'a str },
}

/// Collect the key/functional constraints declared on `relation_name` that
/// must hold over the derived closure. A constraint mentioning any field
/// outside the closure fields (carriers ∪ params) has no unambiguous
/// meaning on the closure and is rejected outright.
fn closure_rechecks<'a>(
    schema_name: &str,
    relation_name: &str,
    row_fields: &[String],
    all_constraints: &'a [(&'a str, &'a Constraint)],
    kind: &str,
) -> Result<Vec<Recheck<'a>>> {
    let mut out: Vec<Recheck<'a>> = Vec::new();
    for &(schema, c) in all_constraints {
        if schema != schema_name {
            continue;
        }
        match c {
            Constraint::Key { relation, fields } if relation == relation_name => {
                for f in fields {
                    if !row_fields.contains(f) {
                        return Err(anyhow!(
                            "{kind} `{schema_name}.{relation_name}`: key constraint mentions field `{f}` outside the closure fields ({}); only carrier and param fields are supported",
                            row_fields.join(", ")
                        ));
                    }
                }
                out.push(Recheck::Key(fields.as_slice()));
            }
            Constraint::Functional {
                relation,
                src_field,
                dst_field,
            } if relation == relation_name => {
                for f in [src_field, dst_field] {
                    if !row_fields.contains(f) {
                        return Err(anyhow!(
                            "{kind} `{schema_name}.{relation_name}`: functional constraint mentions field `{f}` outside the closure fields ({}); only carrier and param fields are supported",
                            row_fields.join(", ")
                        ));
                    }
                }
                out.push(Recheck::Functional {
                    src: src_field,
                    dst: dst_field,
                });
            }
            _ => {}
        }
    }
    Ok(out)
}

fn run_rechecks(
    inst_name: &str,
    relation_name: &str,
    row_fields: &[String],
    rows: &[Vec<String>],
    rechecks: &[Recheck<'_>],
) -> Result<()> {
    for rc in rechecks {
        match rc {
            Recheck::Key(fields) => {
                check_key_on_rows(inst_name, relation_name, row_fields, rows.iter().cloned(), fields)?
            }
            Recheck::Functional { src, dst } => check_functional_on_rows(
                inst_name,
                relation_name,
                row_fields,
                rows.iter().cloned(),
                src,
                dst,
            )?,
        }
    }
    Ok(())
}

fn guard_admits(guard_pos: &Option<(usize, &[Name])>, tuple_values: &[String]) -> bool {
    match guard_pos {
        None => true,
        Some((idx, values)) => values.iter().any(|v| v == &tuple_values[*idx]),
    }
}

/// Symmetric closure compatibility: the tuples projected onto
/// carriers ∪ params, together with the carrier-swapped image of every
/// guarded tuple (within its param fiber), must satisfy every key/functional
/// constraint on the relation.
#[allow(clippy::too_many_arguments)]
fn check_symmetric_closure(
    inst: &Instance,
    schema_name: &str,
    relation_name: &str,
    declared_fields: &[String],
    carriers: &Option<CarrierPair>,
    guard: &Option<Guard>,
    params: &Option<Vec<Name>>,
    all_constraints: &[(&str, &Constraint)],
) -> Result<()> {
    let layout = closure_layout(
        &inst.name,
        relation_name,
        declared_fields,
        carriers,
        params,
        "symmetric",
    )?;
    let guard_pos = match guard {
        Some(g) => Some((
            guard_position(&inst.name, relation_name, declared_fields, g, "symmetric")?,
            g.values.as_slice(),
        )),
        None => None,
    };
    let rechecks = closure_rechecks(
        schema_name,
        relation_name,
        &layout.row_fields,
        all_constraints,
        "symmetric",
    )?;
    if rechecks.is_empty() {
        // Nothing is validated against the closure; the constraint only
        // reserves the relation's symmetric reading.
        return Ok(());
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    for tuple in relation_tuples(inst, relation_name) {
        let vals = tuple_values_in_order(&inst.name, relation_name, tuple, declared_fields)?;
        let row = layout.project(&vals);
        if seen.insert(row.clone()) {
            rows.push(row.clone());
        }

        if guard_admits(&guard_pos, &vals) {
            let mut swapped = row;
            swapped.swap(0, 1);
            if seen.insert(swapped.clone()) {
                rows.push(swapped);
            }
        }
    }

    run_rechecks(&inst.name, relation_name, &layout.row_fields, &rows, &rechecks)
}

/// Transitive closure compatibility: reachability over the carrier pair,
/// computed independently per param fiber, must satisfy every key/functional
/// constraint on the relation. With no such constraint the check is a
/// semantic no-op beyond layout validation.
#[allow(clippy::too_many_arguments)]
fn check_transitive_closure(
    inst: &Instance,
    schema_name: &str,
    relation_name: &str,
    declared_fields: &[String],
    carriers: &Option<CarrierPair>,
    guard: &Option<Guard>,
    params: &Option<Vec<Name>>,
    all_constraints: &[(&str, &Constraint)],
) -> Result<()> {
    let layout = closure_layout(
        &inst.name,
        relation_name,
        declared_fields,
        carriers,
        params,
        "transitive",
    )?;
    let guard_pos = match guard {
        Some(g) => Some((
            guard_position(&inst.name, relation_name, declared_fields, g, "transitive")?,
            g.values.as_slice(),
        )),
        None => None,
    };
    let rechecks = closure_rechecks(
        schema_name,
        relation_name,
        &layout.row_fields,
        all_constraints,
        "transitive",
    )?;
    if rechecks.is_empty() {
        return Ok(());
    }

    // Adjacency over the carrier pair, one graph per param fiber.
    let mut adjacency: HashMap<Vec<String>, HashMap<String, Vec<String>>> = HashMap::new();
    for tuple in relation_tuples(inst, relation_name) {
        let vals = tuple_values_in_order(&inst.name, relation_name, tuple, declared_fields)?;
        if !guard_admits(&guard_pos, &vals) {
            continue;
        }
        let row = layout.project(&vals);
        let src = row[0].clone();
        let dst = row[1].clone();
        let fiber = row[2..].to_vec();
        adjacency
            .entry(fiber)
            .or_default()
            .entry(src)
            .or_default()
            .push(dst);
    }

    // Reachability per fiber via an explicit worklist. Fibers and sources
    // are visited in sorted order so duplicate reports are stable across
    // runs.
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut fibers: Vec<&Vec<String>> = adjacency.keys().collect();
    fibers.sort();
    for fiber in fibers {
        let adj = &adjacency[fiber];
        let mut sources: Vec<&String> = adj.keys().collect();
        sources.sort();
        for src in sources {
            let mut visited: HashSet<&String> = HashSet::new();
            let mut queue: VecDeque<&String> = adj[src].iter().collect();
            while let Some(next) = queue.pop_front() {
                if !visited.insert(next) {
                    continue;
                }
                let mut row = vec![src.clone(), next.clone()];
                row.extend(fiber.iter().cloned());
                rows.push(row);
                if let Some(more) = adj.get(next) {
                    queue.extend(more.iter());
                }
            }
        }
    }

    run_rechecks(&inst.name, relation_name, &layout.row_fields, &rows, &rechecks)
}
