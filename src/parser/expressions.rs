//! Expression parsing implementation
//!
//! This module handles parsing of tune script expressions using precedence
//! climbing for binary operators and recursive descent for everything else.
//!
//! # Supported Expressions
//!
//! - Literals: integers, strings, `true`, `false`, `null`
//! - Identifiers and variables
//! - Binary operators: arithmetic, comparison, logical, bitwise
//! - Unary operators: `-`, `+`, `!`, `~`, `++`, `--`
//! - Postfix: `[]`, `()`, `++`, `--`
//! - Ternary: `? :`
//! - Assignment: `=`, `+=`, `-=`, `*=`, `/=`, `%=`
//!
//! # Precedence (lowest first)
//!
//! ```text
//! ||   &&   |   ^   &   == !=   < <= > >=   << >>   + -   * / %
//! ```

use crate::parser::ast::*;
use crate::parser::lexer::Token;
use crate::parser::parse::{ParseError, Parser};

/// Binary operator levels, lowest precedence first. All are left-associative.
const BINARY_LEVELS: &[&[BinOp]] = &[
    &[BinOp::Or],
    &[BinOp::And],
    &[BinOp::BitOr],
    &[BinOp::BitXor],
    &[BinOp::BitAnd],
    &[BinOp::Eq, BinOp::Ne],
    &[BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge],
    &[BinOp::BitShl, BinOp::BitShr],
    &[BinOp::Add, BinOp::Sub],
    &[BinOp::Mul, BinOp::Div, BinOp::Mod],
];

/// Map a token to the binary operator it spells, if any
fn binary_op_of(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::OrOr(_) => BinOp::Or,
        Token::AndAnd(_) => BinOp::And,
        Token::Pipe(_) => BinOp::BitOr,
        Token::Caret(_) => BinOp::BitXor,
        Token::Amp(_) => BinOp::BitAnd,
        Token::EqEq(_) => BinOp::Eq,
        Token::NotEq(_) => BinOp::Ne,
        Token::Lt(_) => BinOp::Lt,
        Token::Le(_) => BinOp::Le,
        Token::Gt(_) => BinOp::Gt,
        Token::Ge(_) => BinOp::Ge,
        Token::LtLt(_) => BinOp::BitShl,
        Token::GtGt(_) => BinOp::BitShr,
        Token::Plus(_) => BinOp::Add,
        Token::Minus(_) => BinOp::Sub,
        Token::Star(_) => BinOp::Mul,
        Token::Slash(_) => BinOp::Div,
        Token::Percent(_) => BinOp::Mod,
        _ => return None,
    })
}

impl Parser {
    /// Parse expression (top-level entry point)
    pub(crate) fn parse_expression(&mut self) -> Result<AstNode, ParseError> {
        self.nested(Self::parse_assignment)
    }

    /// Parse assignment or ternary (right-associative)
    fn parse_assignment(&mut self) -> Result<AstNode, ParseError> {
        let expr = self.parse_ternary()?;

        let loc = self.current_location();
        if self.match_token(&Token::Eq(loc)) {
            self.require_assignable(&expr, "=")?;
            let rhs = Box::new(self.nested(Self::parse_assignment)?);
            return Ok(AstNode::Assignment {
                lhs: Box::new(expr),
                rhs,
                location: loc,
            });
        }

        let compound_op = if self.match_token(&Token::PlusEq(loc)) {
            Some(BinOp::Add)
        } else if self.match_token(&Token::MinusEq(loc)) {
            Some(BinOp::Sub)
        } else if self.match_token(&Token::StarEq(loc)) {
            Some(BinOp::Mul)
        } else if self.match_token(&Token::SlashEq(loc)) {
            Some(BinOp::Div)
        } else if self.match_token(&Token::PercentEq(loc)) {
            Some(BinOp::Mod)
        } else {
            None
        };

        if let Some(op) = compound_op {
            self.require_assignable(&expr, &format!("{}=", op.symbol()))?;
            let rhs = Box::new(self.nested(Self::parse_assignment)?);
            return Ok(AstNode::CompoundAssignment {
                lhs: Box::new(expr),
                op,
                rhs,
                location: loc,
            });
        }

        Ok(expr)
    }

    fn require_assignable(&self, target: &AstNode, op: &str) -> Result<(), ParseError> {
        if target.is_assignable() {
            Ok(())
        } else {
            Err(ParseError {
                message: format!("Left side of '{op}' must be a variable or array element"),
                location: target.location(),
            })
        }
    }

    /// Parse ternary: condition ? true_expr : false_expr
    fn parse_ternary(&mut self) -> Result<AstNode, ParseError> {
        let expr = self.parse_binary(0)?;

        if self.match_token(&Token::Question(self.current_location())) {
            let loc = self.previous_location();
            let true_expr = Box::new(self.parse_expression()?);
            self.expect_token(
                &Token::Colon(self.current_location()),
                "Expected ':' in ternary expression",
            )?;
            let false_expr = Box::new(self.nested(Self::parse_ternary)?);

            return Ok(AstNode::TernaryOp {
                condition: Box::new(expr),
                true_expr,
                false_expr,
                location: loc,
            });
        }

        Ok(expr)
    }

    /// Parse binary operators from `level` upward in [`BINARY_LEVELS`]
    fn parse_binary(&mut self, level: usize) -> Result<AstNode, ParseError> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.parse_unary();
        };

        // Every operator in a chain makes the tree one level deeper
        let entry_depth = self.depth();
        let result = self.parse_binary_chain(level, ops);
        self.restore_depth(entry_depth);
        result
    }

    fn parse_binary_chain(&mut self, level: usize, ops: &[BinOp]) -> Result<AstNode, ParseError> {
        let mut left = self.parse_binary(level + 1)?;

        loop {
            let loc = self.current_location();
            let op = match binary_op_of(self.peek()) {
                Some(op) if ops.contains(&op) => op,
                _ => break,
            };
            self.deepen()?;
            self.advance();

            let right = Box::new(self.parse_binary(level + 1)?);
            left = AstNode::BinaryOp {
                op,
                left: Box::new(left),
                right,
                location: loc,
            };
        }

        Ok(left)
    }

    /// Parse unary (! ~ - + ++ --)
    fn parse_unary(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.current_location();

        let op = if self.match_token(&Token::Bang(loc)) {
            UnOp::Not
        } else if self.match_token(&Token::Tilde(loc)) {
            UnOp::BitNot
        } else if self.match_token(&Token::Minus(loc)) {
            UnOp::Neg
        } else if self.match_token(&Token::PlusPlus(loc)) {
            UnOp::PreInc
        } else if self.match_token(&Token::MinusMinus(loc)) {
            UnOp::PreDec
        } else if self.match_token(&Token::Plus(loc)) {
            // Unary plus: just return the operand
            return self.nested(Self::parse_unary);
        } else {
            return self.parse_postfix();
        };

        let operand = self.nested(Self::parse_unary)?;
        if matches!(op, UnOp::PreInc | UnOp::PreDec) && !operand.is_assignable() {
            return Err(ParseError {
                message: "Operand of prefix increment/decrement must be assignable".to_string(),
                location: operand.location(),
            });
        }

        // Negated literals stay literals
        if let (UnOp::Neg, AstNode::IntLiteral(n, _)) = (op, &operand) {
            if let Some(neg) = n.checked_neg() {
                return Ok(AstNode::IntLiteral(neg, loc));
            }
        }

        Ok(AstNode::UnaryOp {
            op,
            operand: Box::new(operand),
            location: loc,
        })
    }

    /// Parse postfix (++ -- [] ())
    fn parse_postfix(&mut self) -> Result<AstNode, ParseError> {
        let entry_depth = self.depth();
        let result = self.parse_postfix_chain();
        self.restore_depth(entry_depth);
        result
    }

    fn parse_postfix_chain(&mut self) -> Result<AstNode, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            let loc = self.current_location();

            if self.check(&Token::PlusPlus(loc)) || self.check(&Token::MinusMinus(loc)) {
                if !expr.is_assignable() {
                    return Err(ParseError {
                        message: "Operand of postfix increment/decrement must be assignable"
                            .to_string(),
                        location: expr.location(),
                    });
                }
                let op = if self.match_token(&Token::PlusPlus(loc)) {
                    UnOp::PostInc
                } else {
                    self.advance();
                    UnOp::PostDec
                };
                expr = AstNode::UnaryOp {
                    op,
                    operand: Box::new(expr),
                    location: loc,
                };
            } else if self.match_token(&Token::LBracket(loc)) {
                self.deepen()?;
                let index = Box::new(self.parse_expression()?);
                self.expect_token(
                    &Token::RBracket(self.current_location()),
                    "Expected ']' after array index",
                )?;
                expr = AstNode::Index {
                    target: Box::new(expr),
                    index,
                    location: loc,
                };
            } else if self.match_token(&Token::LParen(loc)) {
                let args = self.parse_argument_list()?;
                self.expect_rparen("after function arguments")?;

                let name = if let AstNode::Variable(n, _) = expr {
                    n
                } else {
                    return Err(ParseError {
                        message: "Only named functions can be called".to_string(),
                        location: loc,
                    });
                };

                expr = AstNode::FunctionCall {
                    name,
                    args,
                    location: loc,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse argument list: (expr, expr, ...)
    fn parse_argument_list(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut args = Vec::new();

        if self.check(&Token::RParen(self.current_location())) {
            return Ok(args);
        }

        loop {
            args.push(self.parse_expression()?);

            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }

        Ok(args)
    }

    /// Parse primary (literals, variables, parenthesized expressions)
    fn parse_primary(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.current_location();

        match self.peek_token() {
            Token::IntLiteral(n, loc) => {
                self.advance();
                Ok(AstNode::IntLiteral(n, loc))
            }
            Token::StringLiteral(s, loc) => {
                self.advance();
                Ok(AstNode::StringLiteral(s, loc))
            }
            Token::True(loc) => {
                self.advance();
                Ok(AstNode::IntLiteral(1, loc))
            }
            Token::False(loc) => {
                self.advance();
                Ok(AstNode::IntLiteral(0, loc))
            }
            Token::Null(loc) => {
                self.advance();
                Ok(AstNode::Null { location: loc })
            }
            Token::Ident(name, loc) => {
                self.advance();
                Ok(AstNode::Variable(name, loc))
            }
            Token::LParen(_) => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_rparen("after expression")?;
                Ok(expr)
            }
            other => Err(ParseError {
                message: format!("Unexpected token: {}", other),
                location: loc,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    fn parse_expr(source: &str) -> AstNode {
        let program = Parser::new(&format!("{source};"))
            .unwrap()
            .parse_program()
            .unwrap();
        match program.body.into_iter().next() {
            Some(AstNode::ExpressionStatement { expr, .. }) => *expr,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_left_associative_subtraction() {
        match parse_expr("a - b - c") {
            AstNode::BinaryOp {
                op: BinOp::Sub,
                left,
                ..
            } => assert!(matches!(*left, AstNode::BinaryOp { op: BinOp::Sub, .. })),
            other => panic!("Expected subtraction, got {:?}", other),
        }
    }

    #[test]
    fn test_logical_binds_looser_than_comparison() {
        match parse_expr("a < 1 && b == 2 || c") {
            AstNode::BinaryOp {
                op: BinOp::Or,
                left,
                ..
            } => assert!(matches!(*left, AstNode::BinaryOp { op: BinOp::And, .. })),
            other => panic!("Expected ||, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_right_associative() {
        match parse_expr("a = b = 3") {
            AstNode::Assignment { rhs, .. } => {
                assert!(matches!(*rhs, AstNode::Assignment { .. }))
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_index_and_call_chain() {
        match parse_expr("items[len(items) - 1]") {
            AstNode::Index { target, index, .. } => {
                assert!(matches!(*target, AstNode::Variable(ref n, _) if n == "items"));
                assert!(matches!(*index, AstNode::BinaryOp { op: BinOp::Sub, .. }));
            }
            other => panic!("Expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_booleans_become_integers() {
        assert!(matches!(parse_expr("true"), AstNode::IntLiteral(1, _)));
        assert!(matches!(parse_expr("false"), AstNode::IntLiteral(0, _)));
    }

    #[test]
    fn test_negative_literal_is_folded() {
        assert!(matches!(parse_expr("-5"), AstNode::IntLiteral(-5, _)));
    }

    #[test]
    fn test_compound_assignment() {
        assert!(matches!(
            parse_expr("total *= 2"),
            AstNode::CompoundAssignment { op: BinOp::Mul, .. }
        ));
    }

    #[test]
    fn test_assign_to_literal_rejected() {
        let err = Parser::new("3 = x;").unwrap().parse_program().unwrap_err();
        assert!(err.message.contains("'='"));
    }

    #[test]
    fn test_increment_requires_assignable() {
        assert!(Parser::new("5++;").unwrap().parse_program().is_err());
        assert!(Parser::new("++f();").unwrap().parse_program().is_err());
    }

    #[test]
    fn test_call_on_non_identifier_rejected() {
        assert!(Parser::new("a[0](1);").unwrap().parse_program().is_err());
    }

    fn nesting_error(source: &str) -> String {
        Parser::new(source)
            .unwrap()
            .parse_program()
            .unwrap_err()
            .message
    }

    #[test]
    fn test_deep_parentheses_rejected() {
        let source = format!("{}1{};", "(".repeat(100_000), ")".repeat(100_000));
        assert!(nesting_error(&source).contains("Nesting too deep"));
    }

    #[test]
    fn test_deep_prefix_operators_rejected() {
        assert!(nesting_error(&format!("{}x;", "-".repeat(50_000))).contains("Nesting too deep"));
        assert!(nesting_error(&format!("{}x;", "!".repeat(50_000))).contains("Nesting too deep"));
    }

    #[test]
    fn test_long_chains_rejected() {
        let sum = format!("{}1;", "1 + ".repeat(50_000));
        assert!(nesting_error(&sum).contains("Nesting too deep"));
        let index = format!("a{};", "[0]".repeat(50_000));
        assert!(nesting_error(&index).contains("Nesting too deep"));
        let assign = format!("{}1;", "a = ".repeat(50_000));
        assert!(nesting_error(&assign).contains("Nesting too deep"));
    }

    #[test]
    fn test_moderate_nesting_accepted() {
        let source = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert!(matches!(parse_expr(&source), AstNode::IntLiteral(1, _)));
        let sum = format!("{}1", "1 + ".repeat(50));
        assert!(matches!(parse_expr(&sum), AstNode::BinaryOp { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_depth_resets_between_statements() {
        // Each statement nests 40 deep; together they would exceed the limit
        let line = format!("{}1{};\n", "(".repeat(40), ")".repeat(40));
        let program = Parser::new(&line.repeat(10)).unwrap().parse_program().unwrap();
        assert_eq!(program.body.len(), 10);
    }
}
