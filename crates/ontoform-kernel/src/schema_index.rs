//! Derived lookup tables for one schema declaration.
//!
//! The index is pure: rebuilding it from the same schema AST yields an
//! identical index. Subtype closures are computed by iterative worklist
//! traversal with explicit visited sets, so deep hierarchies never risk
//! stack depth.

use std::collections::{HashMap, HashSet};

use ontoform_dsl::ast::{RelationDecl, Schema, SubtypeDecl};

#[derive(Debug, Clone)]
pub struct SchemaIndex {
    pub object_types: HashSet<String>,
    pub relations: HashMap<String, RelationDecl>,
    /// Reflexive-transitive supertype closure per declared object type.
    pub supertypes_of: HashMap<String, HashSet<String>>,
    /// Reflexive-transitive subtype closure per declared object type.
    pub subtypes_of: HashMap<String, HashSet<String>>,
}

impl SchemaIndex {
    pub fn from_schema(schema: &Schema) -> Self {
        let object_types: HashSet<String> = schema.objects.iter().cloned().collect();
        let relations: HashMap<String, RelationDecl> = schema
            .relations
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();

        let direct_supers = direct_edges(&schema.subtypes, |st| (&st.sub, &st.sup));
        let direct_subs = direct_edges(&schema.subtypes, |st| (&st.sup, &st.sub));

        Self {
            supertypes_of: reflexive_transitive_closure(&object_types, &direct_supers),
            subtypes_of: reflexive_transitive_closure(&object_types, &direct_subs),
            object_types,
            relations,
        }
    }

    /// `sub` is reflexively-transitively a subtype of `sup`.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        self.supertypes_of
            .get(sub)
            .map(|s| s.contains(sup))
            .unwrap_or(sub == sup)
    }

    /// All ancestors and descendants of `ty`, including `ty` itself, in
    /// sorted order. This is the search window for subtype-aware entity
    /// lookup.
    pub fn related_types(&self, ty: &str) -> Vec<String> {
        let mut out: Vec<String> = vec![ty.to_string()];
        if let Some(supers) = self.supertypes_of.get(ty) {
            out.extend(supers.iter().cloned());
        }
        if let Some(subs) = self.subtypes_of.get(ty) {
            out.extend(subs.iter().cloned());
        }
        out.sort();
        out.dedup();
        out
    }
}

fn direct_edges<'a>(
    subtype_decls: &'a [SubtypeDecl],
    edge: impl Fn(&'a SubtypeDecl) -> (&'a String, &'a String),
) -> HashMap<String, Vec<String>> {
    let mut direct: HashMap<String, Vec<String>> = HashMap::new();
    for st in subtype_decls {
        let (from, to) = edge(st);
        direct.entry(from.clone()).or_default().push(to.clone());
    }
    direct
}

fn reflexive_transitive_closure(
    object_types: &HashSet<String>,
    direct: &HashMap<String, Vec<String>>,
) -> HashMap<String, HashSet<String>> {
    let mut closure: HashMap<String, HashSet<String>> = HashMap::new();
    for ty in object_types {
        let mut reached = HashSet::new();
        reached.insert(ty.clone());
        let mut worklist: Vec<String> = direct.get(ty).cloned().unwrap_or_default();
        while let Some(next) = worklist.pop() {
            if reached.insert(next.clone()) {
                if let Some(more) = direct.get(&next) {
                    worklist.extend(more.iter().cloned());
                }
            }
        }
        closure.insert(ty.clone(), reached);
    }
    closure
}
