//! Statement parsing implementation
//!
//! This module handles parsing of all tune script statement types:
//!
//! - Declarations: `var x = 42;`, `func name(a, b) { ... }`
//! - Control flow: `if`, `while`, `for`, `do-while`
//! - Jump statements: `return`, `break`, `continue`
//! - Compound statements: `{ ... }`
//! - Expression statements: function calls, assignments
//!
//! # Grammar
//!
//! ```text
//! statement ::= var_decl | func_def | if_stmt | while_stmt | for_stmt
//!             | do_while_stmt | return_stmt | break_stmt | continue_stmt
//!             | block | expr_stmt
//! ```
//!
//! All parsing methods are implemented as `pub(crate)` methods on the [`Parser`] struct.

use crate::parser::ast::*;
use crate::parser::lexer::Token;
use crate::parser::parse::{ParseError, Parser};

impl Parser {
    /// Parse block statements (inside braces, excluding the braces themselves)
    pub(crate) fn parse_block_statements(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut statements = Vec::new();

        while !self.check(&Token::RBrace(self.current_location())) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }

        Ok(statements)
    }

    /// Parse a statement
    pub(crate) fn parse_statement(&mut self) -> Result<AstNode, ParseError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.current_location();

        if self.match_token(&Token::Var(loc)) {
            let decl = self.parse_var_declaration(loc)?;
            self.expect_semicolon("after variable declaration")?;
            return Ok(decl);
        }

        if self.match_token(&Token::Func(loc)) {
            return self.parse_function_definition(loc);
        }

        if self.match_token(&Token::Return(loc)) {
            return self.parse_return_statement();
        }

        if self.match_token(&Token::If(loc)) {
            return self.parse_if_statement();
        }

        if self.match_token(&Token::While(loc)) {
            return self.parse_while_statement();
        }

        if self.match_token(&Token::Do(loc)) {
            return self.parse_do_while_statement();
        }

        if self.match_token(&Token::For(loc)) {
            return self.parse_for_statement();
        }

        if self.match_token(&Token::Break(loc)) {
            self.expect_semicolon("after 'break'")?;
            return Ok(AstNode::Break { location: loc });
        }

        if self.match_token(&Token::Continue(loc)) {
            self.expect_semicolon("after 'continue'")?;
            return Ok(AstNode::Continue { location: loc });
        }

        if self.match_token(&Token::LBrace(loc)) {
            let statements = self.parse_block_statements()?;
            self.expect_rbrace("after block")?;
            return Ok(AstNode::Block {
                statements,
                location: loc,
            });
        }

        // Stray semicolon is an empty statement
        if self.match_token(&Token::Semicolon(loc)) {
            return Ok(AstNode::Block {
                statements: Vec::new(),
                location: loc,
            });
        }

        // Expression statement
        let expr = self.parse_expression()?;
        self.expect_semicolon("after expression")?;
        Ok(AstNode::ExpressionStatement {
            expr: Box::new(expr),
            location: loc,
        })
    }

    /// Parse the body of a control-flow construct: either a braced block or a
    /// single statement
    fn parse_body(&mut self) -> Result<Vec<AstNode>, ParseError> {
        if self.match_token(&Token::LBrace(self.current_location())) {
            let statements = self.parse_block_statements()?;
            self.expect_rbrace("after block")?;
            Ok(statements)
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_return_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();

        let expr = if self.check(&Token::Semicolon(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };

        self.expect_semicolon("after return statement")?;

        Ok(AstNode::Return {
            expr,
            location: loc,
        })
    }

    fn parse_if_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();
        self.expect_lparen("after 'if'")?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_rparen("after if condition")?;

        let then_branch = self.parse_body()?;

        let else_branch = if self.match_token(&Token::Else(self.current_location())) {
            Some(self.parse_body()?)
        } else {
            None
        };

        Ok(AstNode::If {
            condition,
            then_branch,
            else_branch,
            location: loc,
        })
    }

    fn parse_while_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();
        self.expect_lparen("after 'while'")?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_rparen("after while condition")?;

        let body = self.parse_body()?;

        Ok(AstNode::While {
            condition,
            body,
            location: loc,
        })
    }

    fn parse_do_while_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();
        let body = self.parse_body()?;

        self.expect_token(
            &Token::While(self.current_location()),
            "Expected 'while' after do body",
        )?;
        self.expect_lparen("after 'while'")?;
        let condition = Box::new(self.parse_expression()?);
        self.expect_rparen("after do-while condition")?;
        self.expect_semicolon("after do-while statement")?;

        Ok(AstNode::DoWhile {
            body,
            condition,
            location: loc,
        })
    }

    fn parse_for_statement(&mut self) -> Result<AstNode, ParseError> {
        let loc = self.previous_location();
        self.expect_lparen("after 'for'")?;

        // Init: `var` declaration, expression, or nothing
        let init = if self.match_token(&Token::Semicolon(self.current_location())) {
            None
        } else {
            let init_loc = self.current_location();
            let node = if self.match_token(&Token::Var(init_loc)) {
                self.parse_var_declaration(init_loc)?
            } else {
                let expr = self.parse_expression()?;
                AstNode::ExpressionStatement {
                    expr: Box::new(expr),
                    location: init_loc,
                }
            };
            self.expect_semicolon("after for loop initializer")?;
            Some(Box::new(node))
        };

        let condition = if self.check(&Token::Semicolon(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect_semicolon("after for loop condition")?;

        let increment = if self.check(&Token::RParen(self.current_location())) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        self.expect_rparen("after for clauses")?;

        let body = self.parse_body()?;

        Ok(AstNode::For {
            init,
            condition,
            increment,
            body,
            location: loc,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    fn parse_body(source: &str) -> Vec<AstNode> {
        Parser::new(source).unwrap().parse_program().unwrap().body
    }

    #[test]
    fn test_for_with_var_init() {
        let body = parse_body("for (var i = 0; i < 10; i++) { print(i); }");
        match &body[0] {
            AstNode::For {
                init: Some(init),
                condition: Some(_),
                increment: Some(_),
                body,
                ..
            } => {
                assert!(matches!(init.as_ref(), AstNode::VarDecl { .. }));
                assert_eq!(body.len(), 1);
            }
            other => panic!("Expected for loop, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_empty_clauses() {
        let body = parse_body("for (;;) break;");
        assert!(matches!(
            &body[0],
            AstNode::For {
                init: None,
                condition: None,
                increment: None,
                ..
            }
        ));
    }

    #[test]
    fn test_do_while() {
        let body = parse_body("var i = 0; do { i += 1; } while (i < 3);");
        assert_eq!(body.len(), 2);
        assert!(matches!(body[1], AstNode::DoWhile { .. }));
    }

    #[test]
    fn test_missing_semicolon() {
        let err = Parser::new("var x = 1\nvar y = 2;")
            .unwrap()
            .parse_program()
            .unwrap_err();
        assert!(err.message.contains("';'"));
        assert_eq!(err.location.line, 2);
    }

    #[test]
    fn test_bare_return() {
        let body = parse_body("return;");
        assert!(matches!(body[0], AstNode::Return { expr: None, .. }));
    }

    #[test]
    fn test_deep_blocks_rejected() {
        let source = format!("{}{}", "{".repeat(100_000), "}".repeat(100_000));
        let err = Parser::new(&source).unwrap().parse_program().unwrap_err();
        assert!(err.message.contains("Nesting too deep"));
    }

    #[test]
    fn test_deep_bodies_rejected() {
        let source = format!("{}x = 1;", "while (x) ".repeat(20_000));
        let err = Parser::new(&source).unwrap().parse_program().unwrap_err();
        assert!(err.message.contains("Nesting too deep"));
    }
}
