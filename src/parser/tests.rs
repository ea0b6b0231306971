use super::*;
use crate::ast::{
    ComparisonOp, ConditionNode, Direction, Expression, FieldSpec, Literal, NullsOrder, Operand,
};

fn field(path: &[&str]) -> Expression {
    Expression::Field(path.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_minimal_query() {
    let q = parse("select id from contacts").unwrap();
    assert_eq!(q.select.len(), 1);
    assert_eq!(
        q.select[0].spec,
        FieldSpec::Field(vec!["id".to_string()])
    );
    assert_eq!(q.from.len(), 1);
    assert_eq!(q.from[0].path, vec!["contacts".to_string()]);
    assert!(q.where_clause.is_none());
    assert!(q.group_by.is_empty());
    assert!(q.order_by.is_empty());
    assert_eq!(q.limit, None);
}

#[test]
fn test_case_insensitive_keywords() {
    assert!(parse("SELECT id FROM contacts").is_ok());
    assert!(parse("Select id From contacts Where id = 1").is_ok());
}

#[test]
fn test_select_list_aliases() {
    let q = parse("select id, name full_name, \"odd name\" n from contacts").unwrap();
    assert_eq!(q.select[0].alias, None);
    assert_eq!(q.select[1].alias, Some("full_name".to_string()));
    assert_eq!(
        q.select[2].spec,
        FieldSpec::Field(vec!["odd name".to_string()])
    );
    assert_eq!(q.select[2].alias, Some("n".to_string()));
}

#[test]
fn test_relationship_path_in_select() {
    let q = parse("select id, account.name from contacts").unwrap();
    assert_eq!(
        q.select[1].spec,
        FieldSpec::Field(vec!["account".to_string(), "name".to_string()])
    );
}

#[test]
fn test_function_call_in_select() {
    let q = parse("select count(), min(amount) smallest from opportunities group by stage")
        .unwrap();
    assert_eq!(
        q.select[0].spec,
        FieldSpec::FunctionCall {
            name: "count".to_string(),
            args: vec![],
        }
    );
    assert_eq!(
        q.select[1].spec,
        FieldSpec::FunctionCall {
            name: "min".to_string(),
            args: vec![field(&["amount"])],
        }
    );
    assert_eq!(q.select[1].alias, Some("smallest".to_string()));
    assert_eq!(q.group_by, vec![vec!["stage".to_string()]]);
}

#[test]
fn test_nested_subquery_in_select() {
    let q = parse("select id, (select name from contacts) from accounts").unwrap();
    let FieldSpec::Subquery(sub) = &q.select[1].spec else {
        panic!("expected subquery");
    };
    assert_eq!(sub.from[0].path, vec!["contacts".to_string()]);
}

#[test]
fn test_from_alias_declaration() {
    let q = parse("select id from contacts c, c.account a").unwrap();
    assert_eq!(q.from[0].alias, Some("c".to_string()));
    assert_eq!(
        q.from[1].path,
        vec!["c".to_string(), "account".to_string()]
    );
    assert_eq!(q.from[1].alias, Some("a".to_string()));
}

#[test]
fn test_where_comparison_operators() {
    let q = parse("select id from t where a = 1 and b <> 2 and c != 3 and d >= 4").unwrap();
    let mut ops = Vec::new();
    fn walk(node: &ConditionNode, ops: &mut Vec<ComparisonOp>) {
        match node {
            ConditionNode::Comparison { op, .. } => ops.push(*op),
            ConditionNode::And(l, r) | ConditionNode::Or(l, r) => {
                walk(l, ops);
                walk(r, ops);
            }
            ConditionNode::Not(inner) => walk(inner, ops),
        }
    }
    walk(q.where_clause.as_ref().unwrap(), &mut ops);
    assert_eq!(
        ops,
        vec![
            ComparisonOp::Eq,
            ComparisonOp::Ne,
            ComparisonOp::Ne,
            ComparisonOp::Ge,
        ]
    );
}

#[test]
fn test_where_precedence() {
    // a = 1 or b = 2 and c = 3  =>  a=1 or (b=2 and c=3)
    let q = parse("select id from t where a = 1 or b = 2 and c = 3").unwrap();
    let ConditionNode::Or(_, rhs) = q.where_clause.unwrap() else {
        panic!("expected or at the root");
    };
    assert!(matches!(*rhs, ConditionNode::And(_, _)));
}

#[test]
fn test_where_parentheses_override_precedence() {
    let q = parse("select id from t where (a = 1 or b = 2) and c = 3").unwrap();
    let ConditionNode::And(lhs, _) = q.where_clause.unwrap() else {
        panic!("expected and at the root");
    };
    assert!(matches!(*lhs, ConditionNode::Or(_, _)));
}

#[test]
fn test_where_not_forms() {
    let q = parse("select id from t where not a = 1").unwrap();
    assert!(matches!(q.where_clause.unwrap(), ConditionNode::Not(_)));

    let q = parse("select id from t where not not a = 1").unwrap();
    let ConditionNode::Not(inner) = q.where_clause.unwrap() else {
        panic!();
    };
    assert!(matches!(*inner, ConditionNode::Not(_)));

    let q = parse("select id from t where name not like 'A%'").unwrap();
    let ConditionNode::Comparison { op, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(op, ComparisonOp::NotLike);

    let q = parse("select id from t where id not in (1, 2)").unwrap();
    let ConditionNode::Comparison { op, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(op, ComparisonOp::NotIn);
}

#[test]
fn test_in_list_and_subquery() {
    let q = parse("select id from t where status in ('open', 'won')").unwrap();
    let ConditionNode::Comparison { op, right, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(op, ComparisonOp::In);
    assert_eq!(
        right,
        Operand::List(vec![
            Literal::String("open".to_string()),
            Literal::String("won".to_string()),
        ])
    );

    let q = parse("select id from t where owner_id in (select id from users)").unwrap();
    let ConditionNode::Comparison { right, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert!(matches!(right, Operand::Subquery(_)));
}

#[test]
fn test_includes_excludes() {
    let q = parse("select id from t where tags includes ('a;b', 'c')").unwrap();
    let ConditionNode::Comparison { op, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(op, ComparisonOp::Includes);

    let q = parse("select id from t where tags excludes ('a')").unwrap();
    let ConditionNode::Comparison { op, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(op, ComparisonOp::Excludes);
}

#[test]
fn test_literal_forms_in_where() {
    let q = parse(
        "select id from t where a = 'it\\'s' and b = true and c = null \
         and d = 2024-03-15 and e = 2024-03-15T10:30:00Z and f = 0x1F and g = -2.5e3",
    );
    assert!(q.is_ok());
}

#[test]
fn test_order_by_directions_and_nulls() {
    let q = parse("select id from t order by a, b desc, c asc nulls last").unwrap();
    assert_eq!(q.order_by.len(), 3);
    assert_eq!(q.order_by[0].direction, Direction::Asc);
    assert_eq!(q.order_by[0].nulls, NullsOrder::First);
    assert_eq!(q.order_by[1].direction, Direction::Desc);
    assert_eq!(q.order_by[2].nulls, NullsOrder::Last);
}

#[test]
fn test_limit_offset() {
    let q = parse("select id from t limit 10 offset 20").unwrap();
    assert_eq!(q.limit, Some(10));
    assert_eq!(q.offset, Some(20));

    assert!(parse("select id from t limit -1").is_err());
    assert!(parse("select id from t limit 1.5").is_err());
}

#[test]
fn test_limit_from_param() {
    let mut params = Params::new();
    params.insert("n".to_string(), Literal::Number(5.0));
    let q = parse_with_params("select id from t limit @n", &params).unwrap();
    assert_eq!(q.limit, Some(5));
}

#[test]
fn test_for_clause() {
    let q = parse("select id from t for update").unwrap();
    assert_eq!(q.for_clause, vec!["update".to_string()]);

    let q = parse("select id from t for view, reference").unwrap();
    assert_eq!(
        q.for_clause,
        vec!["view".to_string(), "reference".to_string()]
    );

    assert!(parse("select id from t for delete").is_err());
}

#[test]
fn test_params_resolved_at_parse() {
    let mut params = Params::new();
    params.insert("name".to_string(), Literal::String("Acme".to_string()));
    let q = parse_with_params("select id from t where name = @name", &params).unwrap();
    let ConditionNode::Comparison { right, .. } = q.where_clause.unwrap() else {
        panic!();
    };
    assert_eq!(
        right,
        Operand::Expr(Expression::Literal(Literal::String("Acme".to_string())))
    );

    let err = parse_with_params("select id from t where name = @missing", &params).unwrap_err();
    assert!(err.to_string().contains("Unknown parameter"));
}

#[test]
fn test_param_with_bad_temporal_payload() {
    let mut params = Params::new();
    params.insert("d".to_string(), Literal::Date("2024-13-99".to_string()));
    assert!(parse_with_params("select id from t where a = @d", &params).is_err());
}

#[test]
fn test_unsafe_identifiers_rejected() {
    assert!(parse("select __proto__ from t").is_err());
    assert!(parse("select \"constructor\" from t").is_err());
    assert!(parse("select id from prototype").is_err());
    assert!(parse("select a.PROTOTYPE from t").is_err());
}

#[test]
fn test_soft_keywords_usable_as_names() {
    let q = parse("select first, last from t where first = 'x' order by last").unwrap();
    assert_eq!(q.select[0].spec, FieldSpec::Field(vec!["first".to_string()]));
    assert_eq!(q.select[1].spec, FieldSpec::Field(vec!["last".to_string()]));
}

#[test]
fn test_having_clause() {
    let q = parse("select stage, count() from opportunities group by stage having count() > 1")
        .unwrap();
    let ConditionNode::Comparison { left, .. } = q.having.unwrap() else {
        panic!();
    };
    assert_eq!(
        left,
        Operand::Expr(Expression::FunctionCall {
            name: "count".to_string(),
            args: vec![],
        })
    );
}

#[test]
fn test_comments_ignored() {
    let q = parse(
        "select id -- trailing words\nfrom /* block\n comment */ contacts where id = 1",
    );
    assert!(q.is_ok());
}

#[test]
fn test_syntax_errors() {
    assert!(parse("").is_err());
    assert!(parse("select").is_err());
    assert!(parse("select id").is_err());
    assert!(parse("select from t").is_err());
    assert!(parse("select id from t where").is_err());
    assert!(parse("select id from t where a = ").is_err());
    assert!(parse("select id from t where a = 1 and").is_err());
    assert!(parse("select id from t garbage garbage").is_err());
    assert!(parse("select id from t where not a").is_err());
}

#[test]
fn test_error_carries_position() {
    let err = parse("select id from t where a = ").unwrap_err();
    let Error::Syntax { position, .. } = err else {
        panic!("expected syntax error");
    };
    assert!(position >= 26);
}
