//! Declaration parsing implementation
//!
//! This module handles parsing of declarations in tune script:
//!
//! - Function definitions: `func name(a, b) { ... }`
//! - Variable declarations: `var x = expr`
//!
//! # Grammar
//!
//! ```text
//! func_def ::= "func" identifier "(" params ")" "{" statements "}"
//! params   ::= (identifier ("," identifier)*)?
//! var_decl ::= "var" identifier ("=" expression)?
//! ```
//!
//! Function definitions are accepted anywhere a statement is; the semantic
//! pass rejects the ones that are not at the top level of the script.

use crate::parser::ast::*;
use crate::parser::lexer::Token;
use crate::parser::parse::{ParseError, Parser};

impl Parser {
    /// Parse function definition after the `func` keyword
    pub(crate) fn parse_function_definition(
        &mut self,
        loc: SourceLocation,
    ) -> Result<AstNode, ParseError> {
        let name = self.expect_identifier()?;

        self.expect_lparen("after function name")?;
        let params = self.parse_parameter_list()?;
        self.expect_rparen("after parameters")?;
        self.expect_lbrace("before function body")?;

        let body = self.parse_block_statements()?;

        self.expect_rbrace("after function body")?;

        Ok(AstNode::FunctionDef(FunctionDef {
            name,
            params,
            body,
            location: loc,
        }))
    }

    /// Parse parameter list: name, name, ...
    fn parse_parameter_list(&mut self) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();

        if self.check(&Token::RParen(self.current_location())) {
            return Ok(params);
        }

        loop {
            params.push(self.expect_identifier()?);

            if !self.match_token(&Token::Comma(self.current_location())) {
                break;
            }
        }

        Ok(params)
    }

    /// Parse variable declaration after the `var` keyword, without the
    /// trailing semicolon
    pub(crate) fn parse_var_declaration(
        &mut self,
        loc: SourceLocation,
    ) -> Result<AstNode, ParseError> {
        let name = self.expect_identifier()?;

        let init = if self.match_token(&Token::Eq(self.current_location())) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        Ok(AstNode::VarDecl {
            name,
            init,
            location: loc,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::ast::*;
    use crate::parser::parse::Parser;

    #[test]
    fn test_function_without_params() {
        let program = Parser::new("func noop() { }").unwrap().parse_program().unwrap();
        assert_eq!(program.functions[0].name, "noop");
        assert!(program.functions[0].params.is_empty());
        assert!(program.functions[0].body.is_empty());
    }

    #[test]
    fn test_nested_function_stays_in_body() {
        // Only top-level definitions are hoisted
        let program = Parser::new("func outer() { func inner() { } }")
            .unwrap()
            .parse_program()
            .unwrap();
        assert_eq!(program.functions.len(), 1);
        assert!(matches!(
            program.functions[0].body[0],
            AstNode::FunctionDef(_)
        ));
    }

    #[test]
    fn test_var_without_initializer() {
        let program = Parser::new("var x;").unwrap().parse_program().unwrap();
        assert!(matches!(
            &program.body[0],
            AstNode::VarDecl { name, init: None, .. } if name == "x"
        ));
    }

    #[test]
    fn test_trailing_comma_in_params_rejected() {
        assert!(Parser::new("func f(a,) { }")
            .unwrap()
            .parse_program()
            .is_err());
    }
}
