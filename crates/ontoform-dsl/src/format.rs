//! Canonical rendering of structured constraints back to surface syntax.
//!
//! `parse_constraint(format_constraint(c).strip_prefix("constraint "))`
//! round-trips for every recognized constraint; `Unknown` re-emits its raw
//! text unchanged.

use crate::ast::{CarrierPair, Constraint, Guard, Name};

pub fn format_constraint(constraint: &Constraint) -> String {
    fn on_clause(carriers: &Option<CarrierPair>) -> String {
        match carriers {
            Some(c) => format!(" on ({}, {})", c.left, c.right),
            None => String::new(),
        }
    }
    fn param_clause(params: &Option<Vec<Name>>) -> String {
        match params {
            Some(p) if !p.is_empty() => format!(" param ({})", p.join(", ")),
            _ => String::new(),
        }
    }
    fn where_clause(relation: &str, guard: &Option<Guard>) -> String {
        match guard {
            Some(g) => format!(
                " where {relation}.{} in {{{}}}",
                g.field,
                g.values.join(", ")
            ),
            None => String::new(),
        }
    }

    match constraint {
        Constraint::Key { relation, fields } => {
            format!("constraint key {relation}({})", fields.join(", "))
        }
        Constraint::Functional {
            relation,
            src_field,
            dst_field,
        } => format!("constraint functional {relation}.{src_field} -> {relation}.{dst_field}"),
        Constraint::Symmetric {
            relation,
            carriers,
            guard,
            params,
        } => format!(
            "constraint symmetric {relation}{}{}{}",
            where_clause(relation, guard),
            on_clause(carriers),
            param_clause(params)
        ),
        Constraint::Transitive {
            relation,
            carriers,
            guard,
            params,
        } => format!(
            "constraint transitive {relation}{}{}{}",
            where_clause(relation, guard),
            on_clause(carriers),
            param_clause(params)
        ),
        Constraint::Typing { relation, rule } => {
            format!("constraint typing {relation}: {rule}")
        }
        Constraint::Unknown { text } => format!("constraint {text}"),
    }
}
