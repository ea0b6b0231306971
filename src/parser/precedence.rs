//! Boolean operator precedence over the flat term stream the clause parser
//! produces.
//!
//! `not` binds tightest (to the single operand following it), then `and`,
//! then `or`. Each pass rewrites the stream in place until one operand is
//! left. Resolving the rightmost `not` first means `not not x` stays a
//! double negation in the tree.

use crate::ast::ConditionNode;
use crate::error::{Error, Result};

/// One term of an unresolved condition stream. Parenthesized groups arrive
/// already reduced to a single `Operand`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CondTerm {
    Operand(ConditionNode),
    And,
    Or,
    Not,
}

/// Reduce a term stream to a single condition tree.
pub(crate) fn resolve(mut terms: Vec<CondTerm>, pos: usize) -> Result<ConditionNode> {
    let malformed = || Error::syntax("Malformed condition", pos);

    // NOT: rightmost first, so stacked negations nest instead of collapsing.
    while let Some(idx) = terms.iter().rposition(|t| matches!(t, CondTerm::Not)) {
        match terms.get(idx + 1) {
            Some(CondTerm::Operand(_)) => {
                let CondTerm::Operand(inner) = terms.remove(idx + 1) else {
                    unreachable!()
                };
                terms[idx] = CondTerm::Operand(ConditionNode::Not(Box::new(inner)));
            }
            _ => return Err(malformed()),
        }
    }

    // AND, then OR, each left-to-right.
    for join in [CondTerm::And, CondTerm::Or] {
        while let Some(idx) = terms.iter().position(|t| *t == join) {
            if idx == 0 || idx + 1 >= terms.len() {
                return Err(malformed());
            }
            let (CondTerm::Operand(_), CondTerm::Operand(_)) = (&terms[idx - 1], &terms[idx + 1])
            else {
                return Err(malformed());
            };
            let CondTerm::Operand(rhs) = terms.remove(idx + 1) else {
                unreachable!()
            };
            let CondTerm::Operand(lhs) = terms.remove(idx - 1) else {
                unreachable!()
            };
            let node = if join == CondTerm::And {
                ConditionNode::And(Box::new(lhs), Box::new(rhs))
            } else {
                ConditionNode::Or(Box::new(lhs), Box::new(rhs))
            };
            terms[idx - 1] = CondTerm::Operand(node);
        }
    }

    match (terms.len(), terms.pop()) {
        (1, Some(CondTerm::Operand(node))) => Ok(node),
        _ => Err(malformed()),
    }
}
