//! Typed AST for OntoForm modules.
//!
//! A module is parsed once and never mutated afterwards; every checker in
//! `ontoform-kernel` consumes these values by shared reference. All types are
//! serde-serializable so downstream tooling (certificate emission, REPLs) can
//! anchor results to the exact structure the kernel checked.

use serde::{Deserialize, Serialize};

pub type Name = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    pub name: Name,
    pub schemas: Vec<Schema>,
    pub theories: Vec<Theory>,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    pub name: Name,
    pub objects: Vec<Name>,
    pub subtypes: Vec<SubtypeDecl>,
    pub relations: Vec<RelationDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubtypeDecl {
    pub sub: Name,
    pub sup: Name,
    /// Optional explicit inclusion morphism name (`subtype A <: B as incl`).
    pub inclusion: Option<Name>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationDecl {
    pub name: Name,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDecl {
    pub field: Name,
    pub ty: Name,
}

/// Carrier-field pair for closure-style constraints (symmetric/transitive).
///
/// By default the *first two* declared fields of a relation are the carrier
/// pair. When a relation has extra fields (context, time, witnesses) authors
/// name the endpoints explicitly:
///
/// - `constraint symmetric Rel on (from, to)`
/// - `constraint transitive Rel on (from, to)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarrierPair {
    pub left: Name,
    pub right: Name,
}

/// Membership guard on a closure constraint:
/// `... where Rel.field in {A, B, ...}`.
///
/// Only tuples whose `field` value is in `values` participate in the closure
/// (are swapped for symmetric, contribute edges for transitive). The guard
/// language is intentionally small: membership in a finite set of
/// constructor-like names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guard {
    pub field: Name,
    pub values: Vec<Name>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Theory {
    pub name: Name,
    pub schema: Name,
    pub constraints: Vec<Constraint>,
    pub equations: Vec<Equation>,
    pub rewrite_rules: Vec<RewriteRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Constraint {
    Key {
        relation: Name,
        fields: Vec<Name>,
    },
    Functional {
        relation: Name,
        src_field: Name,
        dst_field: Name,
    },
    Symmetric {
        relation: Name,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        carriers: Option<CarrierPair>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard: Option<Guard>,
        /// Optional "fiber" parameter fields: the closure operates on the
        /// carrier pair within each fixed assignment of these fields (e.g.
        /// `ctx`, `time`) rather than globally.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Name>>,
    },
    Transitive {
        relation: Name,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        carriers: Option<CarrierPair>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guard: Option<Guard>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Name>>,
    },
    /// A first-class typing-rule annotation: `constraint typing Rel: rule`.
    ///
    /// Rule names come from a small builtin catalog checked by the kernel;
    /// an unrecognized rule name is a checking error, not a parse error.
    Typing {
        relation: Name,
        rule: Name,
    },
    /// Opaque constraint text the parser does not recognize, preserved
    /// verbatim. The constraint checker refuses modules containing these;
    /// a richer structure must never be certified as its bare prefix.
    Unknown {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Equation {
    pub name: Name,
    pub lhs: String,
    pub rhs: String,
}

/// Orientation of a rewrite rule. Rules are stored as directed rules;
/// `bidirectional` marks both directions as intended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Forward,
    Backward,
    Bidirectional,
}

impl Default for Orientation {
    fn default() -> Self {
        Self::Forward
    }
}

/// Typed variable declaration for rewrite rules.
///
/// Kept small and first-order: object variables range over schema object
/// types, path variables range over `(start, end)` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteVar {
    pub name: Name,
    pub ty: RewriteVarType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum RewriteVarType {
    Object { ty: Name },
    Path { from: Name, to: Name },
}

/// Path expression language for rewrite rules.
///
/// Five constructors, arbitrarily nested: a metavariable, the reflexive path
/// at an entity, a single labeled step, sequential composition, and formal
/// inverse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PathExpr {
    Var {
        name: Name,
    },
    Reflexive {
        entity: Name,
    },
    Step {
        from: Name,
        rel: Name,
        to: Name,
    },
    Seq {
        left: Box<PathExpr>,
        right: Box<PathExpr>,
    },
    Inverse {
        path: Box<PathExpr>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteRule {
    pub name: Name,
    #[serde(default)]
    pub orientation: Orientation,
    pub vars: Vec<RewriteVar>,
    pub lhs: PathExpr,
    pub rhs: PathExpr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub name: Name,
    pub schema: Name,
    pub assignments: Vec<Assignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pub name: Name,
    pub value: SetLiteral,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetLiteral {
    pub items: Vec<SetItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum SetItem {
    Ident { name: Name },
    Tuple { fields: Vec<(Name, Name)> },
}

impl std::fmt::Display for RewriteVarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteVarType::Object { ty } => write!(f, "{ty}"),
            RewriteVarType::Path { from, to } => write!(f, "Path({from},{to})"),
        }
    }
}

impl std::fmt::Display for RewriteVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.ty)
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathExpr::Var { name } => write!(f, "{name}"),
            PathExpr::Reflexive { entity } => write!(f, "refl({entity})"),
            PathExpr::Step { from, rel, to } => write!(f, "step({from},{rel},{to})"),
            PathExpr::Seq { left, right } => write!(f, "trans({left},{right})"),
            PathExpr::Inverse { path } => write!(f, "inv({path})"),
        }
    }
}
