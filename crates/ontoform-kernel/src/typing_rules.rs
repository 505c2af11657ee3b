//! Builtin catalog of typing rules for `constraint typing Rel: rule`.
//!
//! The rules are decision procedures over differential-form degrees. Typing
//! judgments are ordinary auxiliary relations in the instance:
//!
//! - `FormOn(form, manifold)`: which manifold a form lives on,
//! - `FormDegree(form, degree)`: a form's degree as a `NatN` constant,
//! - `MetricOn(metric, manifold)`: which manifold a metric lives on,
//! - `ManifoldDimension(manifold, dim)`: a manifold's dimension.
//!
//! Checking is open-world: a judgment missing for an *output* form is
//! inferred (and held consistent across the tuples of one constraint check);
//! a declared judgment that contradicts the rule is an error; a judgment
//! missing for an *input* is an error, because the rule cannot fire without
//! it.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use ontoform_dsl::ast::{Instance, Name};

use crate::constraints::{relation_tuples, RelationFieldIndex};

const FORM_ON: &str = "FormOn";
const FORM_DEGREE: &str = "FormDegree";
const METRIC_ON: &str = "MetricOn";
const MANIFOLD_DIMENSION: &str = "ManifoldDimension";

pub(crate) fn check_typing_constraint(
    inst: &Instance,
    schema_name: &str,
    relation_name: &str,
    rule: &str,
    field_index: &RelationFieldIndex,
) -> Result<()> {
    let context = format!("typing {relation_name}");
    match rule {
        "preserves_manifold_and_increments_degree" => {
            field_index.relation_fields(schema_name, FORM_ON)?;
            field_index.relation_fields(schema_name, FORM_DEGREE)?;
            let rel_fields = field_index.relation_fields(schema_name, relation_name)?;

            let form_on = binary_relation_map(inst, FORM_ON, "form", "manifold")?;
            let form_degree = binary_relation_map(inst, FORM_DEGREE, "form", "degree")?;
            let mut derived_on: HashMap<String, String> = HashMap::new();
            let mut derived_degree: HashMap<String, String> = HashMap::new();

            for tuple in relation_tuples(inst, relation_name) {
                let tmap = tuple_map(tuple);
                let input = tuple_field(&context, rel_fields, &tmap, "input")?;
                let output = tuple_field(&context, rel_fields, &tmap, "output")?;

                let manifold =
                    require_judgment(&context, &form_on, FORM_ON, "form", "manifold", input)?;
                record_output(&context, output, manifold, &form_on, &mut derived_on, "manifold")?;

                let degree = require_nat(
                    &context,
                    require_judgment(&context, &form_degree, FORM_DEGREE, "form", "degree", input)?,
                )?;
                let out_degree = nat_const(degree + 1)
                    .ok_or_else(|| anyhow!("{context}: degree overflow"))?;
                record_output(
                    &context,
                    output,
                    &out_degree,
                    &form_degree,
                    &mut derived_degree,
                    "degree",
                )?;
            }
            Ok(())
        }
        "preserves_manifold_and_adds_degree" => {
            field_index.relation_fields(schema_name, FORM_ON)?;
            field_index.relation_fields(schema_name, FORM_DEGREE)?;
            let rel_fields = field_index.relation_fields(schema_name, relation_name)?;

            let form_on = binary_relation_map(inst, FORM_ON, "form", "manifold")?;
            let form_degree = binary_relation_map(inst, FORM_DEGREE, "form", "degree")?;
            let mut derived_on: HashMap<String, String> = HashMap::new();
            let mut derived_degree: HashMap<String, String> = HashMap::new();

            for tuple in relation_tuples(inst, relation_name) {
                let tmap = tuple_map(tuple);
                let left = tuple_field(&context, rel_fields, &tmap, "left")?;
                let right = tuple_field(&context, rel_fields, &tmap, "right")?;
                let out = tuple_field(&context, rel_fields, &tmap, "out")?;

                let m_left =
                    require_judgment(&context, &form_on, FORM_ON, "form", "manifold", left)?;
                let m_right =
                    require_judgment(&context, &form_on, FORM_ON, "form", "manifold", right)?;
                if m_left != m_right {
                    return Err(anyhow!(
                        "{context}: forms `{left}` and `{right}` live on different manifolds (`{m_left}` vs `{m_right}`)"
                    ));
                }
                record_output(&context, out, m_left, &form_on, &mut derived_on, "manifold")?;

                let k_left = require_nat(
                    &context,
                    require_judgment(&context, &form_degree, FORM_DEGREE, "form", "degree", left)?,
                )?;
                let k_right = require_nat(
                    &context,
                    require_judgment(&context, &form_degree, FORM_DEGREE, "form", "degree", right)?,
                )?;
                let out_degree = nat_const(k_left + k_right)
                    .ok_or_else(|| anyhow!("{context}: degree overflow"))?;
                record_output(
                    &context,
                    out,
                    &out_degree,
                    &form_degree,
                    &mut derived_degree,
                    "degree",
                )?;
            }
            Ok(())
        }
        "depends_on_metric_and_dualizes_degree" => {
            field_index.relation_fields(schema_name, METRIC_ON)?;
            field_index.relation_fields(schema_name, MANIFOLD_DIMENSION)?;
            field_index.relation_fields(schema_name, FORM_ON)?;
            field_index.relation_fields(schema_name, FORM_DEGREE)?;
            let rel_fields = field_index.relation_fields(schema_name, relation_name)?;

            let metric_on = binary_relation_map(inst, METRIC_ON, "metric", "manifold")?;
            let manifold_dim =
                binary_relation_map(inst, MANIFOLD_DIMENSION, "manifold", "dim")?;
            let form_on = binary_relation_map(inst, FORM_ON, "form", "manifold")?;
            let form_degree = binary_relation_map(inst, FORM_DEGREE, "form", "degree")?;
            let mut derived_on: HashMap<String, String> = HashMap::new();
            let mut derived_degree: HashMap<String, String> = HashMap::new();

            for tuple in relation_tuples(inst, relation_name) {
                let tmap = tuple_map(tuple);
                let metric = tuple_field(&context, rel_fields, &tmap, "metric")?;
                let input = tuple_field(&context, rel_fields, &tmap, "input")?;
                let output = tuple_field(&context, rel_fields, &tmap, "output")?;

                let manifold =
                    require_judgment(&context, &metric_on, METRIC_ON, "metric", "manifold", metric)?;
                let m_in =
                    require_judgment(&context, &form_on, FORM_ON, "form", "manifold", input)?;
                if m_in != manifold {
                    return Err(anyhow!(
                        "{context}: metric `{metric}` is on `{manifold}`, but input form `{input}` is on `{m_in}`"
                    ));
                }
                record_output(&context, output, manifold, &form_on, &mut derived_on, "manifold")?;

                let dim = require_nat(
                    &context,
                    require_judgment(
                        &context,
                        &manifold_dim,
                        MANIFOLD_DIMENSION,
                        "manifold",
                        "dim",
                        manifold,
                    )?,
                )?;
                let degree = require_nat(
                    &context,
                    require_judgment(&context, &form_degree, FORM_DEGREE, "form", "degree", input)?,
                )?;
                let out_degree = nat_const(dim - degree).ok_or_else(|| {
                    anyhow!("{context}: cannot compute n-k with n=Nat{dim} and k=Nat{degree}")
                })?;
                record_output(
                    &context,
                    output,
                    &out_degree,
                    &form_degree,
                    &mut derived_degree,
                    "degree",
                )?;
            }
            Ok(())
        }
        _ => Err(anyhow!(
            "unsupported typing constraint rule `{rule}` for relation `{relation_name}`",
        )),
    }
}

fn tuple_map(fields: &[(Name, Name)]) -> HashMap<&str, &str> {
    let mut map: HashMap<&str, &str> = HashMap::new();
    for (k, v) in fields {
        map.insert(k.as_str(), v.as_str());
    }
    map
}

fn tuple_field<'a>(
    context: &str,
    expected_fields: &[String],
    tmap: &HashMap<&'a str, &'a str>,
    field: &str,
) -> Result<&'a str> {
    tmap.get(field).copied().ok_or_else(|| {
        anyhow!(
            "{context}: missing field `{field}` in tuple (expected fields: {})",
            expected_fields.join(", ")
        )
    })
}

fn require_judgment<'a>(
    context: &str,
    judgments: &'a HashMap<String, String>,
    judgment_relation: &str,
    key_field: &str,
    value_field: &str,
    key: &str,
) -> Result<&'a String> {
    judgments.get(key).ok_or_else(|| {
        anyhow!("{context}: missing {judgment_relation}({key_field}={key}, {value_field}=...)")
    })
}

/// Validate or infer a judgment for an output form: a declared judgment must
/// match `expected`, and two tuples must not infer conflicting judgments.
fn record_output(
    context: &str,
    output: &str,
    expected: &str,
    declared: &HashMap<String, String>,
    derived: &mut HashMap<String, String>,
    what: &str,
) -> Result<()> {
    if let Some(existing) = declared.get(output) {
        if existing != expected {
            return Err(anyhow!(
                "{context}: output form `{output}` has {what} `{existing}`, expected `{expected}`"
            ));
        }
    }
    if let Some(prev) = derived.insert(output.to_string(), expected.to_string()) {
        if prev != expected {
            return Err(anyhow!(
                "{context}: output form `{output}` inferred conflicting {what}s: `{prev}` vs `{expected}`"
            ));
        }
    }
    Ok(())
}

fn parse_nat_const(name: &str) -> Option<i64> {
    let rest = name.strip_prefix("Nat")?;
    if rest.is_empty() {
        return None;
    }
    rest.parse::<i64>().ok()
}

fn nat_const(n: i64) -> Option<String> {
    if n < 0 {
        return None;
    }
    Some(format!("Nat{n}"))
}

fn require_nat(context: &str, name: &str) -> Result<i64> {
    parse_nat_const(name).ok_or_else(|| {
        anyhow!("{context}: unsupported Nat constant `{name}` (expected Nat0, Nat1, ...)")
    })
}

/// Read a binary judgment relation as a `key -> value` map; a key mapped to
/// two distinct values is an error.
fn binary_relation_map(
    inst: &Instance,
    relation_name: &str,
    key_field: &str,
    value_field: &str,
) -> Result<HashMap<String, String>> {
    let mut out: HashMap<String, String> = HashMap::new();
    for tuple in relation_tuples(inst, relation_name) {
        let map = tuple_map(tuple);
        let Some(k) = map.get(key_field) else {
            continue;
        };
        let Some(v) = map.get(value_field) else {
            continue;
        };
        if let Some(prev) = out.get(*k) {
            if prev != v {
                return Err(anyhow!(
                    "instance `{}` relation `{relation_name}`: `{key_field}` `{k}` maps to both `{prev}` and `{v}`",
                    inst.name
                ));
            }
        } else {
            out.insert((*k).to_string(), (*v).to_string());
        }
    }
    Ok(out)
}
