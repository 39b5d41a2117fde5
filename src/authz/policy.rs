use crate::authz::errors::AuthzError;
use crate::authz::types::*;

const POLICY_TAG: &str = "p";
const GROUPING_TAG: &str = "g";

/// Parse the flat policy format into typed records.
///
/// ```text
/// # comment
/// p, alice, /products/{productId}, GET, allow
/// g, alice, admin
/// ```
///
/// A `p` record without an effect column is an `allow`.
pub fn parse_policy_text(source: &str) -> Result<Vec<PolicyLine>, AuthzError> {
    let mut lines = Vec::new();

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        let parsed = match fields.as_slice() {
            [POLICY_TAG, subject, pattern, action] => {
                PolicyTuple::new(subject, pattern, action, Effect::Allow).map(PolicyLine::Policy)
            }
            [POLICY_TAG, subject, pattern, action, effect] => effect
                .parse::<Effect>()
                .and_then(|effect| PolicyTuple::new(subject, pattern, action, effect))
                .map(PolicyLine::Policy),
            [GROUPING_TAG, member, role] => {
                GroupingEdge::new(member, role).map(PolicyLine::Grouping)
            }
            [POLICY_TAG, ..] => Err(AuthzError::InvalidPolicy(format!(
                "policy records take 4 or 5 fields, found {}",
                fields.len()
            ))),
            [GROUPING_TAG, ..] => Err(AuthzError::InvalidPolicy(format!(
                "grouping records take 3 fields, found {}",
                fields.len()
            ))),
            [tag, ..] => Err(AuthzError::InvalidPolicy(format!(
                "unknown record tag `{tag}`"
            ))),
            [] => continue,
        };

        let record = parsed.map_err(|e| AuthzError::PolicyParse {
            line: line_no,
            reason: e.to_string(),
        })?;
        lines.push(record);
    }

    Ok(lines)
}

/// Render records back to text, groupings after policies.
pub fn render_policy_text(policies: &[PolicyTuple], groupings: &[GroupingEdge]) -> String {
    let mut out = String::new();
    for p in policies {
        out.push_str(&format!("{POLICY_TAG}, {p}\n"));
    }
    for g in groupings {
        out.push_str(&format!("{GROUPING_TAG}, {}, {}\n", g.member, g.role));
    }
    out
}
