use ontoform_dsl::parse::parse_module;
use ontoform_kernel::{parse_summary, verify_text, VerifyError};

#[test]
fn verifies_minimal_flow_module() {
    let verified = verify_text(
        r#"
module Flows

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

instance I of S:
  Flow = {(from=a, to=b)}
"#,
    )
    .expect("verify");

    let summary = verified.summary();
    assert_eq!(summary.well_typed.module_name, "Flows");
    assert_eq!(summary.well_typed.tuple_count, 1);
    assert_eq!(summary.constraints.constraint_count, 0);
    assert_eq!(summary.constraints.check_count, 0);
}

#[test]
fn parse_failures_surface_with_line_numbers() {
    let err = verify_text("module M\nwat\n").expect_err("should fail");
    match err {
        VerifyError::Parse(parse_err) => {
            assert!(parse_err.to_string().contains("line 2"), "err={parse_err}");
        }
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn well_typedness_failures_carry_instance_context() {
    let err = verify_text(
        r#"
module M

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

instance I of S:
  Flow = {(from=a)}
"#,
    )
    .expect_err("should fail");
    match err {
        VerifyError::WellTypedness(inner) => {
            let msg = inner.to_string();
            assert!(
                msg.contains("instance `I`") && msg.contains("missing field `to`"),
                "err={msg}"
            );
        }
        other => panic!("expected well-typedness error, got {other}"),
    }
}

#[test]
fn constraint_failures_arrive_after_well_typedness_passes() {
    let err = verify_text(
        r#"
module M

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

theory T on S:
  constraint key Flow(from, to)

instance I of S:
  Flow = {(from=a, to=b), (from=a, to=b)}
"#,
    )
    .expect_err("should fail");
    match err {
        VerifyError::Constraints(inner) => {
            assert!(inner.to_string().contains("key violation"), "err={inner}");
        }
        other => panic!("expected constraint error, got {other}"),
    }
}

#[test]
fn unknown_constraints_fail_verification_but_not_well_typedness() {
    let text = r#"
module M

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

theory T on S:
  constraint custom foo

instance I of S:
  Flow = {(from=a, to=b)}
"#;

    // Well-typedness alone accepts the module.
    let module = parse_module(text).expect("parse");
    ontoform_kernel::check_well_typed(&module).expect("well-typed");

    // Full verification refuses it at the constraint gate.
    let err = verify_text(text).expect_err("should fail");
    assert!(matches!(err, VerifyError::Constraints(_)), "got {err}");
    assert!(err.to_string().contains("custom foo"), "err={err}");
}

#[test]
fn parse_summary_reports_section_counts() {
    let module = parse_module(
        r#"
module M

schema A:
  object X

schema B:
  object Y

theory T on A:
  constraint key R(f)

instance I of B:
  Y = {y0}
"#,
    )
    .expect("parse");
    let summary = parse_summary(&module);
    assert_eq!(summary.module_name, "M");
    assert_eq!(summary.schema_count, 2);
    assert_eq!(summary.theory_count, 1);
    assert_eq!(summary.instance_count, 1);
}

#[test]
fn verified_module_exposes_module_and_summary() {
    let text = r#"
module M

schema S:
  object Agent

instance I of S:
  Agent = {a}
"#;
    let verified = verify_text(text).expect("verify");
    assert_eq!(verified.module().name, "M");
    let (module, summary) = verified.into_parts();
    assert_eq!(module.instances.len(), 1);
    assert_eq!(summary.well_typed.instance_count, 1);
}

#[test]
fn repeated_verification_is_byte_identical() {
    let text = r#"
module M

schema S:
  object Agent
  relation Flow(from: Agent, to: Agent)

theory T on S:
  constraint symmetric Flow
  constraint key Flow(from, to)

instance I of S:
  Flow = {(from=a, to=b), (from=b, to=c)}
"#;
    let first = serde_json::to_string(verify_text(text).expect("verify").summary())
        .expect("serialize");
    let second = serde_json::to_string(verify_text(text).expect("verify").summary())
        .expect("serialize");
    assert_eq!(first, second);
}

#[test]
fn repeated_failures_produce_identical_messages() {
    let text = r#"
module M

schema S:
  object Dog
  object Cat
  object Animal
  subtype Dog <: Animal
  subtype Cat <: Animal

instance I of S:
  Dog = {rex}
  Cat = {rex}
  Animal = {rex}
"#;
    let first = verify_text(text).expect_err("should fail").to_string();
    let second = verify_text(text).expect_err("should fail").to_string();
    assert_eq!(first, second);
    assert!(first.contains("ambiguous element `rex`"), "err={first}");
}
