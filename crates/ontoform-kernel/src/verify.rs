//! Three-phase verification pipeline: parse → well-typedness → constraints.
//!
//! Each phase is a pure function of its inputs; repeated runs over identical
//! text produce identical results. The external certificate layer anchors
//! the resulting [`ModuleSummary`] (or the failure) next to the module text.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use ontoform_dsl::ast::Module;
use ontoform_dsl::parse::{parse_module, ParseError};

use crate::constraints::{check_constraints, ConstraintSummary};
use crate::well_typed::{check_well_typed, WellTypedSummary};

/// Verification failure, tagged by the phase that rejected the module.
///
/// The unknown-constraint refusal surfaces through [`VerifyError::Constraints`]
/// as a single aggregated message listing the offending constraints.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("well-typedness check failed: {0}")]
    WellTypedness(anyhow::Error),
    #[error("constraint check failed: {0}")]
    Constraints(anyhow::Error),
}

/// Counts visible after parsing alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseSummary {
    pub module_name: String,
    pub schema_count: u32,
    pub theory_count: u32,
    pub instance_count: u32,
}

pub fn parse_summary(module: &Module) -> ParseSummary {
    ParseSummary {
        module_name: module.name.clone(),
        schema_count: module.schemas.len() as u32,
        theory_count: module.theories.len() as u32,
        instance_count: module.instances.len() as u32,
    }
}

/// Combined summary of a fully verified module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleSummary {
    pub well_typed: WellTypedSummary,
    pub constraints: ConstraintSummary,
}

/// A module that passed both semantic phases.
///
/// The constructor is private to this module: holding a `VerifiedModule`
/// means the value came out of [`verify_module`] (or [`verify_text`]); the
/// wrapper is the evidence, downstream code cannot forge one around an
/// unchecked AST.
#[derive(Debug, Clone)]
pub struct VerifiedModule {
    module: Module,
    summary: ModuleSummary,
}

impl VerifiedModule {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn summary(&self) -> &ModuleSummary {
        &self.summary
    }

    pub fn into_parts(self) -> (Module, ModuleSummary) {
        (self.module, self.summary)
    }
}

/// Run well-typedness and constraint checking over a parsed module.
///
/// Constraint checking only ever sees a module that already passed
/// well-typedness; "error" in either phase means "do not certify".
pub fn verify_module(module: Module) -> Result<VerifiedModule, VerifyError> {
    let well_typed = check_well_typed(&module).map_err(VerifyError::WellTypedness)?;
    debug!(
        module = %well_typed.module_name,
        instances = well_typed.instance_count,
        tuples = well_typed.tuple_count,
        "well-typedness ok"
    );

    let constraints = check_constraints(&module).map_err(VerifyError::Constraints)?;
    debug!(
        module = %constraints.module_name,
        checks = constraints.check_count,
        "constraints ok"
    );

    Ok(VerifiedModule {
        module,
        summary: ModuleSummary {
            well_typed,
            constraints,
        },
    })
}

/// Parse and verify module text in one call.
pub fn verify_text(text: &str) -> Result<VerifiedModule, VerifyError> {
    let module = parse_module(text)?;
    debug!(module = %module.name, "parse ok");
    verify_module(module)
}
