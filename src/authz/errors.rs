use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(stockroom::authz::invalid_policy),
        help("Policies need a subject, a resource pattern, an action and an effect of `allow` or `deny`")
    )]
    InvalidPolicy(String),

    #[error("Invalid grouping edge `{member} -> {role}`: {reason}")]
    #[diagnostic(
        code(stockroom::authz::invalid_edge),
        help("Role memberships must not form a cycle; check the existing groups of the target role")
    )]
    InvalidEdge {
        member: String,
        role: String,
        reason: String,
    },

    #[error("Failed to parse policy line {line}: {reason}")]
    #[diagnostic(
        code(stockroom::authz::policy_parse),
        help("Expected `p, subject, pattern, action, effect` or `g, member, role`")
    )]
    PolicyParse { line: usize, reason: String },

    #[error("Policy store unavailable: {0}")]
    #[diagnostic(
        code(stockroom::authz::store_unavailable),
        help("The change was rolled back; check that the policy file is writable")
    )]
    StoreUnavailable(String),

    #[error("Enforcement unavailable: {0}")]
    #[diagnostic(
        code(stockroom::authz::enforcement_unavailable),
        help("All requests are denied until the policy store can be read again")
    )]
    EnforcementUnavailable(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(stockroom::authz::io))]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthzError::InvalidPolicy(_)
            | AuthzError::InvalidEdge { .. }
            | AuthzError::PolicyParse { .. } => StatusCode::BAD_REQUEST,
            AuthzError::StoreUnavailable(_) | AuthzError::EnforcementUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AuthzError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
