//! Well-typedness checking for parsed modules.
//!
//! The checker validates that a module is self-contained with respect to its
//! declared schemas:
//!
//! - instances reference declared schemas,
//! - object assignments reference declared object types,
//! - relation assignments reference declared relations,
//! - each relation tuple has exactly the declared fields, and
//! - every identifier resolves to a single entity under subtype-aware
//!   lookup (relations may introduce entities implicitly, but name reuse
//!   across the hierarchy must stay unambiguous).
//!
//! Constraints are ignored here; they are checked by `crate::constraints`
//! once well-typedness holds.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use ontoform_dsl::ast::{Instance, Module, SetItem};

use crate::schema_index::SchemaIndex;

/// Count summary produced by a successful well-typedness check.
///
/// This record is the kernel's half of the external certificate contract:
/// the certificate layer anchors it next to the module text, and an
/// independent verifier re-derives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WellTypedSummary {
    pub module_name: String,
    pub schema_count: u32,
    pub theory_count: u32,
    pub instance_count: u32,
    pub assignment_count: u32,
    pub tuple_count: u32,
}

/// A module packaged together with its well-typedness evidence.
///
/// Construction is checked: the only way to obtain a `CheckedModule` is
/// through [`CheckedModule::new`], which runs the full checker. Downstream
/// code accepting a `CheckedModule` instead of a raw [`Module`] cannot
/// forget to typecheck its input.
#[derive(Debug, Clone)]
pub struct CheckedModule {
    module: Module,
    summary: WellTypedSummary,
}

impl CheckedModule {
    /// Validate and wrap a parsed module.
    pub fn new(module: Module) -> Result<Self> {
        let summary = check_well_typed(&module)?;
        Ok(Self { module, summary })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn summary(&self) -> &WellTypedSummary {
        &self.summary
    }

    pub fn into_parts(self) -> (Module, WellTypedSummary) {
        (self.module, self.summary)
    }
}

pub fn check_well_typed(module: &Module) -> Result<WellTypedSummary> {
    let mut indices: HashMap<String, SchemaIndex> = HashMap::new();
    for schema in &module.schemas {
        if indices.contains_key(&schema.name) {
            return Err(anyhow!("duplicate schema `{}` in module", schema.name));
        }
        for st in &schema.subtypes {
            for ty in [&st.sub, &st.sup] {
                if !schema.objects.contains(ty) {
                    return Err(anyhow!(
                        "schema `{}`: subtype declaration `{} <: {}` references undeclared object type `{}`",
                        schema.name,
                        st.sub,
                        st.sup,
                        ty
                    ));
                }
            }
        }
        indices.insert(schema.name.clone(), SchemaIndex::from_schema(schema));
    }

    for inst in &module.instances {
        check_instance(inst, &indices)?;
    }

    let assignment_count: u32 = module
        .instances
        .iter()
        .map(|i| i.assignments.len() as u32)
        .sum();
    let tuple_count: u32 = module
        .instances
        .iter()
        .flat_map(|i| i.assignments.iter())
        .flat_map(|a| a.value.items.iter())
        .filter(|it| matches!(it, SetItem::Tuple { .. }))
        .count() as u32;

    Ok(WellTypedSummary {
        module_name: module.name.clone(),
        schema_count: module.schemas.len() as u32,
        theory_count: module.theories.len() as u32,
        instance_count: module.instances.len() as u32,
        assignment_count,
        tuple_count,
    })
}

fn check_instance(instance: &Instance, indices: &HashMap<String, SchemaIndex>) -> Result<()> {
    let Some(index) = indices.get(&instance.schema) else {
        return Err(anyhow!(
            "instance `{}` references unknown schema `{}`",
            instance.name,
            instance.schema
        ));
    };

    // Classify every assignment before touching the entity universe, so the
    // error for a malformed assignment is independent of resolution order.
    for assignment in &instance.assignments {
        let all_idents = assignment
            .value
            .items
            .iter()
            .all(|it| matches!(it, SetItem::Ident { .. }));
        let all_tuples = assignment
            .value
            .items
            .iter()
            .all(|it| matches!(it, SetItem::Tuple { .. }));

        if !(all_idents || all_tuples) {
            return Err(anyhow!(
                "instance `{}` assignment `{}` mixes identifiers and tuples",
                instance.name,
                assignment.name
            ));
        }

        if all_idents && !index.object_types.contains(&assignment.name) {
            if index.relations.contains_key(&assignment.name) {
                return Err(anyhow!(
                    "instance `{}` assignment `{}` contains identifiers but `{}` is declared as a relation",
                    instance.name,
                    assignment.name,
                    assignment.name
                ));
            }
            return Err(anyhow!(
                "instance `{}` assignment `{}` contains identifiers but `{}` is not a declared object type",
                instance.name,
                assignment.name,
                assignment.name
            ));
        }
    }

    // The working entity universe for this instance: `(type, name)` pairs.
    // Relation tuples may introduce entities implicitly, but subtyping-based
    // name reuse must resolve to exactly one representative.
    let mut universe: HashSet<(String, String)> = HashSet::new();

    for assignment in &instance.assignments {
        let all_idents = assignment
            .value
            .items
            .iter()
            .all(|it| matches!(it, SetItem::Ident { .. }));

        if all_idents {
            for it in &assignment.value.items {
                let SetItem::Ident { name } = it else {
                    continue;
                };
                resolve_entity(index, &mut universe, &assignment.name, name)?;
            }
            continue;
        }

        let Some(rel_decl) = index.relations.get(&assignment.name) else {
            return Err(anyhow!(
                "instance `{}` assignment `{}` contains tuples but `{}` is not a declared relation in schema `{}`",
                instance.name,
                assignment.name,
                assignment.name,
                instance.schema
            ));
        };

        for it in &assignment.value.items {
            let SetItem::Tuple { fields } = it else {
                continue;
            };

            let mut field_values: HashMap<&str, &str> = HashMap::new();
            for (field_name, value_name) in fields {
                if field_values
                    .insert(field_name.as_str(), value_name.as_str())
                    .is_some()
                {
                    return Err(anyhow!(
                        "instance `{}` relation `{}`: duplicate field `{}` in tuple",
                        instance.name,
                        assignment.name,
                        field_name
                    ));
                }
                if !rel_decl.fields.iter().any(|f| f.field == *field_name) {
                    return Err(anyhow!(
                        "instance `{}` relation `{}`: unknown field `{}`",
                        instance.name,
                        assignment.name,
                        field_name
                    ));
                }
            }

            for f in &rel_decl.fields {
                let Some(value_name) = field_values.get(f.field.as_str()).copied() else {
                    return Err(anyhow!(
                        "instance `{}` relation `{}`: missing field `{}` in tuple",
                        instance.name,
                        assignment.name,
                        f.field
                    ));
                };

                if !index.object_types.contains(&f.ty) {
                    return Err(anyhow!(
                        "instance `{}` relation `{}`: field `{}` expects unknown object type `{}`",
                        instance.name,
                        assignment.name,
                        f.field,
                        f.ty
                    ));
                }

                resolve_entity(index, &mut universe, &f.ty, value_name)?;
            }
        }
    }

    Ok(())
}

/// Subtype-aware lookup of `name` at `desired_type`.
///
/// The search window is the declared type's ancestors and descendants. Two
/// or more candidates are ambiguous (the universe never holds two *related*
/// entries for one name (upgrades collapse them), so multiple candidates
/// sit at mutually unrelated types). A single candidate at a proper
/// supertype is upgraded to the more specific declared type; otherwise the
/// existing representative is reused. No candidate registers a new entity.
fn resolve_entity(
    index: &SchemaIndex,
    universe: &mut HashSet<(String, String)>,
    desired_type: &str,
    name: &str,
) -> Result<String> {
    let mut candidates: Vec<String> = index
        .related_types(desired_type)
        .into_iter()
        .filter(|related| universe.contains(&(related.clone(), name.to_string())))
        .collect();
    candidates.dedup();

    if candidates.len() > 1 {
        return Err(anyhow!(
            "ambiguous element `{}`: multiple entities exist across related types for `{}`: {:?}",
            name,
            desired_type,
            candidates
        ));
    }

    if let Some(existing_type) = candidates.pop() {
        if index.is_subtype(desired_type, &existing_type) && desired_type != existing_type {
            // Upgrade to the more-specific type.
            universe.remove(&(existing_type, name.to_string()));
            universe.insert((desired_type.to_string(), name.to_string()));
            return Ok(desired_type.to_string());
        }
        return Ok(existing_type);
    }

    universe.insert((desired_type.to_string(), name.to_string()));
    Ok(desired_type.to_string())
}
