use ontoform_dsl::parse::parse_module;
use ontoform_kernel::schema_index::SchemaIndex;
use ontoform_kernel::verify_text;
use proptest::prelude::*;

const TYPE_NAMES: [&str; 6] = ["T0", "T1", "T2", "T3", "T4", "T5"];

fn schema_text(subtype_edges: &[(usize, usize)]) -> String {
    let mut text = String::from("module Closure\n\nschema S:\n");
    for ty in TYPE_NAMES {
        text.push_str(&format!("  object {ty}\n"));
    }
    for (sub, sup) in subtype_edges {
        text.push_str(&format!(
            "  subtype {} <: {}\n",
            TYPE_NAMES[*sub], TYPE_NAMES[*sup]
        ));
    }
    text
}

fn index_for(subtype_edges: &[(usize, usize)]) -> SchemaIndex {
    let module = parse_module(&schema_text(subtype_edges)).expect("parse");
    SchemaIndex::from_schema(&module.schemas[0])
}

fn edges() -> impl Strategy<Value = Vec<(usize, usize)>> {
    proptest::collection::vec((0..TYPE_NAMES.len(), 0..TYPE_NAMES.len()), 0..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn subtype_closure_is_reflexive(subtype_edges in edges()) {
        let index = index_for(&subtype_edges);
        for ty in TYPE_NAMES {
            prop_assert!(index.is_subtype(ty, ty), "{ty} must be its own supertype");
        }
    }

    #[test]
    fn subtype_closure_is_transitive(subtype_edges in edges()) {
        let index = index_for(&subtype_edges);
        for a in TYPE_NAMES {
            for b in TYPE_NAMES {
                for c in TYPE_NAMES {
                    if index.is_subtype(a, b) && index.is_subtype(b, c) {
                        prop_assert!(
                            index.is_subtype(a, c),
                            "{a} <: {b} and {b} <: {c} but not {a} <: {c}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn supertype_and_subtype_closures_mirror_each_other(subtype_edges in edges()) {
        let index = index_for(&subtype_edges);
        for a in TYPE_NAMES {
            for b in TYPE_NAMES {
                let a_below_b = index.supertypes_of[a].contains(b);
                let b_above_a = index.subtypes_of[b].contains(a);
                prop_assert_eq!(a_below_b, b_above_a, "closures disagree on {} <: {}", a, b);
            }
        }
    }
}

fn flow_pairs() -> impl Strategy<Value = Vec<(u8, u8)>> {
    proptest::collection::vec((0u8..5, 0u8..5), 1..8)
}

fn flow_module(pairs: &[(u8, u8)]) -> String {
    let tuples = pairs
        .iter()
        .map(|(a, b)| format!("(from=e{a}, to=e{b})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
module FlowDeterminism

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

theory T on S:
  constraint symmetric Flow
  constraint transitive Flow
  constraint key Flow(from, to)

instance I of S:
  Flow = {{{tuples}}}
"#
    )
}

fn outcome(text: &str) -> String {
    match verify_text(text) {
        Ok(verified) => serde_json::to_string(verified.summary()).expect("serialize summary"),
        Err(err) => err.to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn verification_is_deterministic(pairs in flow_pairs()) {
        // Accept or reject, the result (including error text) must be
        // byte-identical across repeated runs on the same input.
        let text = flow_module(&pairs);
        let first = outcome(&text);
        let second = outcome(&text);
        prop_assert_eq!(first, second);
    }
}
