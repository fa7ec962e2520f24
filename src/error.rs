use thiserror::Error;

use crate::validate::ValidationIssue;
use crate::view_state::GeometryKind;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid parent: {0}")]
    InvalidParent(String),
    #[error("edge {edge} references unknown endpoint {endpoint}")]
    UnknownEndpoint { edge: String, endpoint: String },
    #[error("duplicate id: {0}")]
    DuplicateId(String),
    #[error("cannot move {node} under its own descendant {parent}")]
    CyclicReparent { node: String, parent: String },
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("unknown edge: {0}")]
    UnknownEdge(String),
    #[error("node {0} is not a group")]
    NotAGroup(String),
    #[error("the root node cannot be {0}")]
    RootImmutable(&'static str),
    #[error("group {0} must contain at least one node")]
    EmptyGroup(String),
    #[error("graph validation failed: {}", format_issues(.0))]
    GraphValidationFailed(Vec<ValidationIssue>),
    #[error("routing degraded for edge {edge}: {reason}")]
    RoutingDegraded { edge: String, reason: String },
    #[error("missing {kind} geometry for {id}")]
    MissingGeometry { kind: GeometryKind, id: String },
    #[error("geometry for {id} does not fit the {kind} namespace")]
    GeometryMismatch { kind: GeometryKind, id: String },
    #[error("malformed document: {0}")]
    Document(String),
    #[error("layout task aborted: {0}")]
    LayoutTask(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
