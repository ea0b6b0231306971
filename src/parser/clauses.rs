//! Clause-level grammar rules: select list, from list, conditions,
//! group by / having, order by, limit/offset and locking hints.

use super::precedence::{self, CondTerm};
use super::{is_unsafe_name, Parser};
use crate::ast::{
    ComparisonOp, ConditionNode, Direction, Expression, FieldPath, FieldSpec, FromEntry, Literal,
    NullsOrder, Operand, OrderSpec, Query, SelectItem,
};
use crate::error::{Error, Result};
use crate::lexer::Token;

impl Parser<'_> {
    pub(crate) fn parse_query(&mut self) -> Result<Query> {
        self.expect(Token::Select)?;

        let mut select = vec![self.parse_select_item()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            select.push(self.parse_select_item()?);
        }

        self.expect(Token::From)?;
        let mut from = vec![self.parse_from_entry()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            from.push(self.parse_from_entry()?);
        }

        let where_clause = if matches!(self.current_token(), Token::Where) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        let group_by = if matches!(self.current_token(), Token::Group) {
            self.advance();
            self.expect(Token::By)?;
            let mut keys = vec![self.parse_field_path()?];
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                keys.push(self.parse_field_path()?);
            }
            keys
        } else {
            Vec::new()
        };

        let having = if matches!(self.current_token(), Token::Having) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        let order_by = if matches!(self.current_token(), Token::Order) {
            self.advance();
            self.expect(Token::By)?;
            let mut specs = vec![self.parse_order_spec()?];
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                specs.push(self.parse_order_spec()?);
            }
            specs
        } else {
            Vec::new()
        };

        let limit = if matches!(self.current_token(), Token::Limit) {
            self.advance();
            Some(self.parse_count("limit")?)
        } else {
            None
        };

        let offset = if matches!(self.current_token(), Token::Offset) {
            self.advance();
            Some(self.parse_count("offset")?)
        } else {
            None
        };

        let for_clause = if matches!(self.current_token(), Token::For) {
            self.advance();
            let mut hints = vec![self.parse_lock_hint()?];
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                hints.push(self.parse_lock_hint()?);
            }
            hints
        } else {
            Vec::new()
        };

        Ok(Query {
            select,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
            for_clause,
        })
    }

    /// One identifier segment: a bare identifier (soft keywords allowed), or
    /// a double-quoted name. Unsafe names fail the parse outright.
    pub(crate) fn parse_identifier(&mut self) -> Result<String> {
        let pos = self.current_pos();
        let name = match self.current_token() {
            Token::Quoted(s) => s.clone(),
            tok => match tok.as_soft_identifier() {
                Some(s) => s.to_string(),
                None => {
                    return Err(Error::syntax(
                        format!("Expected identifier, got {:?}", tok),
                        pos,
                    ))
                }
            },
        };
        if is_unsafe_name(&name) {
            return Err(Error::syntax(format!("Unsafe identifier: {}", name), pos));
        }
        self.advance();
        Ok(name)
    }

    pub(crate) fn parse_field_path(&mut self) -> Result<FieldPath> {
        let mut path = vec![self.parse_identifier()?];
        while matches!(self.current_token(), Token::Dot) {
            self.advance();
            path.push(self.parse_identifier()?);
        }
        Ok(path)
    }

    /// Optional output alias: a plain or quoted identifier directly after a
    /// select/from entry. Soft keywords are not accepted here so that
    /// `from t limit 2` keeps `limit` as a clause.
    fn try_parse_alias(&mut self) -> Result<Option<String>> {
        match self.current_token() {
            Token::Identifier(_) | Token::Quoted(_) => Ok(Some(self.parse_identifier()?)),
            _ => Ok(None),
        }
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        // Nested relationship subquery
        if matches!(self.current_token(), Token::LParen)
            && matches!(self.peek_token(1), Token::Select)
        {
            self.advance();
            let query = self.parse_query()?;
            self.expect(Token::RParen)?;
            let alias = self.try_parse_alias()?;
            return Ok(SelectItem {
                spec: FieldSpec::Subquery(Box::new(query)),
                alias,
            });
        }

        let name = self.parse_identifier()?;
        if matches!(self.current_token(), Token::LParen) {
            let args = self.parse_call_args()?;
            let alias = self.try_parse_alias()?;
            return Ok(SelectItem {
                spec: FieldSpec::FunctionCall { name, args },
                alias,
            });
        }

        let mut path = vec![name];
        while matches!(self.current_token(), Token::Dot) {
            self.advance();
            path.push(self.parse_identifier()?);
        }
        let alias = self.try_parse_alias()?;
        Ok(SelectItem {
            spec: FieldSpec::Field(path),
            alias,
        })
    }

    fn parse_from_entry(&mut self) -> Result<FromEntry> {
        let path = self.parse_field_path()?;
        let alias = self.try_parse_alias()?;
        Ok(FromEntry { path, alias })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expression>> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.current_token(), Token::RParen) {
            args.push(self.parse_expression()?);
            while matches!(self.current_token(), Token::Comma) {
                self.advance();
                args.push(self.parse_expression()?);
            }
        }
        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// A literal, dotted field path, or nested function call.
    pub(crate) fn parse_expression(&mut self) -> Result<Expression> {
        if let Some(lit) = self.try_parse_literal()? {
            return Ok(Expression::Literal(lit));
        }

        let name = self.parse_identifier()?;
        if matches!(self.current_token(), Token::LParen) {
            let args = self.parse_call_args()?;
            return Ok(Expression::FunctionCall { name, args });
        }

        let mut path = vec![name];
        while matches!(self.current_token(), Token::Dot) {
            self.advance();
            path.push(self.parse_identifier()?);
        }
        Ok(Expression::Field(path))
    }

    fn try_parse_literal(&mut self) -> Result<Option<Literal>> {
        let pos = self.current_pos();
        let lit = match self.current_token() {
            Token::Str(s) => Literal::String(s.clone()),
            Token::Number(n) => Literal::Number(*n),
            Token::Date(s) => Literal::Date(s.clone()),
            Token::DateTime(s) => Literal::DateTime(s.clone()),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Null => Literal::Null,
            Token::Param(name) => {
                let name = name.clone();
                let value = self.resolve_param(&name, pos)?;
                // Re-validate tagged temporal payloads supplied from outside.
                match &value {
                    Literal::Date(s) => {
                        Literal::date(s.clone()).map_err(|_| {
                            Error::syntax(format!("Invalid date value for @{}: {}", name, s), pos)
                        })?;
                    }
                    Literal::DateTime(s) => {
                        Literal::datetime(s.clone()).map_err(|_| {
                            Error::syntax(
                                format!("Invalid datetime value for @{}: {}", name, s),
                                pos,
                            )
                        })?;
                    }
                    _ => {}
                }
                value
            }
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(lit))
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let pos = self.current_pos();
        self.try_parse_literal()?.ok_or_else(|| {
            Error::syntax(
                format!("Expected literal value, got {:?}", self.current_token()),
                pos,
            )
        })
    }

    fn parse_literal_list(&mut self) -> Result<Vec<Literal>> {
        self.expect(Token::LParen)?;
        let mut items = vec![self.parse_literal()?];
        while matches!(self.current_token(), Token::Comma) {
            self.advance();
            items.push(self.parse_literal()?);
        }
        self.expect(Token::RParen)?;
        Ok(items)
    }

    /// Parse one `where`/`having` level: collect the flat operand/operator
    /// stream, then hand it to the precedence resolver.
    pub(crate) fn parse_condition(&mut self) -> Result<ConditionNode> {
        let pos = self.current_pos();
        let mut terms: Vec<CondTerm> = Vec::new();

        loop {
            while matches!(self.current_token(), Token::Not) {
                terms.push(CondTerm::Not);
                self.advance();
            }

            if matches!(self.current_token(), Token::LParen)
                && !matches!(self.peek_token(1), Token::Select)
            {
                // Parenthesized sub-group, pre-reduced to a single operand so
                // explicit grouping always wins over implicit precedence.
                self.advance();
                let inner = self.parse_condition()?;
                self.expect(Token::RParen)?;
                terms.push(CondTerm::Operand(inner));
            } else {
                terms.push(CondTerm::Operand(self.parse_comparison()?));
            }

            match self.current_token() {
                Token::And => {
                    terms.push(CondTerm::And);
                    self.advance();
                }
                Token::Or => {
                    terms.push(CondTerm::Or);
                    self.advance();
                }
                _ => break,
            }
        }

        precedence::resolve(terms, pos)
    }

    fn parse_comparison(&mut self) -> Result<ConditionNode> {
        let left = Operand::Expr(self.parse_expression()?);
        let pos = self.current_pos();

        let (op, right) = match self.current_token() {
            Token::Eq => {
                self.advance();
                (ComparisonOp::Eq, Operand::Expr(self.parse_expression()?))
            }
            Token::Ne => {
                self.advance();
                (ComparisonOp::Ne, Operand::Expr(self.parse_expression()?))
            }
            Token::Lt => {
                self.advance();
                (ComparisonOp::Lt, Operand::Expr(self.parse_expression()?))
            }
            Token::Le => {
                self.advance();
                (ComparisonOp::Le, Operand::Expr(self.parse_expression()?))
            }
            Token::Gt => {
                self.advance();
                (ComparisonOp::Gt, Operand::Expr(self.parse_expression()?))
            }
            Token::Ge => {
                self.advance();
                (ComparisonOp::Ge, Operand::Expr(self.parse_expression()?))
            }
            Token::Like => {
                self.advance();
                (ComparisonOp::Like, Operand::Expr(self.parse_expression()?))
            }
            Token::In => {
                self.advance();
                (ComparisonOp::In, self.parse_in_rhs()?)
            }
            Token::Includes => {
                self.advance();
                (
                    ComparisonOp::Includes,
                    Operand::List(self.parse_literal_list()?),
                )
            }
            Token::Excludes => {
                self.advance();
                (
                    ComparisonOp::Excludes,
                    Operand::List(self.parse_literal_list()?),
                )
            }
            Token::Not => {
                self.advance();
                match self.current_token() {
                    Token::Like => {
                        self.advance();
                        (
                            ComparisonOp::NotLike,
                            Operand::Expr(self.parse_expression()?),
                        )
                    }
                    Token::In => {
                        self.advance();
                        (ComparisonOp::NotIn, self.parse_in_rhs()?)
                    }
                    tok => {
                        return Err(Error::syntax(
                            format!("Expected LIKE or IN after NOT, got {:?}", tok),
                            self.current_pos(),
                        ))
                    }
                }
            }
            tok => {
                return Err(Error::syntax(
                    format!("Expected comparison operator, got {:?}", tok),
                    pos,
                ))
            }
        };

        Ok(ConditionNode::Comparison { op, left, right })
    }

    /// Right-hand side of `in`/`not in`: a literal list or a subquery.
    fn parse_in_rhs(&mut self) -> Result<Operand> {
        if matches!(self.current_token(), Token::LParen)
            && matches!(self.peek_token(1), Token::Select)
        {
            self.advance();
            let query = self.parse_query()?;
            self.expect(Token::RParen)?;
            return Ok(Operand::Subquery(Box::new(query)));
        }
        Ok(Operand::List(self.parse_literal_list()?))
    }

    fn parse_order_spec(&mut self) -> Result<OrderSpec> {
        let target = self.parse_expression()?;

        let direction = match self.current_token() {
            Token::Asc => {
                self.advance();
                Direction::Asc
            }
            Token::Desc => {
                self.advance();
                Direction::Desc
            }
            _ => Direction::Asc,
        };

        let nulls = if matches!(self.current_token(), Token::Nulls) {
            self.advance();
            match self.current_token() {
                Token::First => {
                    self.advance();
                    NullsOrder::First
                }
                Token::Last => {
                    self.advance();
                    NullsOrder::Last
                }
                tok => {
                    return Err(Error::syntax(
                        format!("Expected FIRST or LAST after NULLS, got {:?}", tok),
                        self.current_pos(),
                    ))
                }
            }
        } else {
            NullsOrder::First
        };

        Ok(OrderSpec {
            target,
            direction,
            nulls,
        })
    }

    fn parse_count(&mut self, what: &str) -> Result<usize> {
        let pos = self.current_pos();
        let lit = self.parse_literal()?;
        match lit {
            Literal::Number(n) if n >= 0.0 && n.fract() == 0.0 && n.is_finite() => Ok(n as usize),
            other => Err(Error::syntax(
                format!("Expected non-negative integer for {}, got {:?}", what, other),
                pos,
            )),
        }
    }

    fn parse_lock_hint(&mut self) -> Result<String> {
        let pos = self.current_pos();
        let hint = self.parse_identifier()?.to_lowercase();
        match hint.as_str() {
            "update" | "view" | "reference" => Ok(hint),
            other => Err(Error::syntax(format!("Unknown locking hint: {}", other), pos)),
        }
    }
}
