use ontoform_dsl::ast::{CarrierPair, Constraint, Guard};
use ontoform_dsl::format::format_constraint;
use ontoform_dsl::parse::parse_constraint;
use proptest::prelude::*;

fn ident() -> impl Strategy<Value = String> {
    // Keep identifiers small and readable (and compatible with the parser).
    proptest::string::string_regex("[A-Za-z][A-Za-z0-9_]{0,10}").unwrap()
}

fn ident_list(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(ident(), min..=max)
}

fn carriers_opt() -> impl Strategy<Value = Option<CarrierPair>> {
    proptest::option::of(
        (ident(), ident())
            .prop_filter("carriers must be distinct", |(a, b)| a != b)
            .prop_map(|(a, b)| CarrierPair { left: a, right: b }),
    )
}

fn params_opt() -> impl Strategy<Value = Option<Vec<String>>> {
    proptest::option::of(ident_list(1, 4))
}

fn guard_opt() -> impl Strategy<Value = Option<Guard>> {
    proptest::option::of((ident(), ident_list(1, 5)).prop_map(|(field, values)| Guard {
        field,
        values,
    }))
}

fn constraint() -> impl Strategy<Value = Constraint> {
    prop_oneof![
        (ident(), ident_list(1, 4)).prop_map(|(relation, fields)| Constraint::Key {
            relation,
            fields,
        }),
        (ident(), ident(), ident()).prop_map(|(relation, src_field, dst_field)| {
            Constraint::Functional {
                relation,
                src_field,
                dst_field,
            }
        }),
        (ident(), carriers_opt(), guard_opt(), params_opt()).prop_map(
            |(relation, carriers, guard, params)| Constraint::Symmetric {
                relation,
                carriers,
                guard,
                params,
            }
        ),
        (ident(), carriers_opt(), guard_opt(), params_opt()).prop_map(
            |(relation, carriers, guard, params)| Constraint::Transitive {
                relation,
                carriers,
                guard,
                params,
            }
        ),
        (ident(), ident()).prop_map(|(relation, rule)| Constraint::Typing { relation, rule }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn constraints_roundtrip_parse_and_format(c in constraint()) {
        let formatted = format_constraint(&c);
        let rest = formatted
            .strip_prefix("constraint ")
            .expect("formatter should prefix with `constraint `");
        let parsed = parse_constraint(rest).expect("parse");
        prop_assert_eq!(parsed, c);
    }

    #[test]
    fn parse_constraint_is_total_over_printable_text(text in "[ -~]{0,60}") {
        // Any single-line body either parses to a structured constraint, is
        // preserved as `Unknown`, or reports a clause-shape error; it never
        // panics.
        let _ = parse_constraint(&text);
    }
}
