//! OntoForm verification kernel
//!
//! The trusted core of the OntoForm toolchain: given a parsed module (or raw
//! module text), decide whether it may be certified.
//!
//! Three ordered phases, each a pure function of its inputs:
//!
//! 1. parsing (`ontoform-dsl`),
//! 2. well-typedness: instance data is checked against its declared schema
//!    with subtype-aware entity resolution (`well_typed`),
//! 3. constraint checking: a fixed, certified subset of theory constraints
//!    (keys, functionals, fibered symmetric/transitive closure
//!    compatibility, builtin typing rules), guarded by a fail-closed refusal
//!    of anything the checker does not understand (`constraints`).
//!
//! The kernel performs no I/O and holds no state across calls; results are
//! byte-for-byte reproducible so an external verifier can re-derive them.

pub mod constraints;
pub mod schema_index;
mod typing_rules;
pub mod verify;
pub mod well_typed;

pub use constraints::{check_constraints, ConstraintSummary};
pub use schema_index::SchemaIndex;
pub use verify::{
    parse_summary, verify_module, verify_text, ModuleSummary, ParseSummary, VerifiedModule,
    VerifyError,
};
pub use well_typed::{check_well_typed, CheckedModule, WellTypedSummary};
