use crate::ast::*;
use crate::error::{HaversError, HaversResult};
use crate::token::{Token, TokenKind};

/// The parser - turns tokens intae an AST
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    /// Expects the token stream tae end wi' an Eof, as `lex` produces
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.kind), Some(TokenKind::Eof)) {
            let line = tokens.last().map(|t| t.line).unwrap_or(1);
            tokens.push(Token::eof(line));
        }
        Parser { tokens, current: 0 }
    }

    pub fn parse(&mut self) -> HaversResult<Program> {
        let mut statements = Vec::new();

        self.skip_newlines();

        while !self.is_at_end() {
            statements.push(self.declaration()?);
            self.skip_newlines();
        }

        Ok(Program::new(statements))
    }

    // === Declaration parsing ===

    fn declaration(&mut self) -> HaversResult<Stmt> {
        if self.check(&TokenKind::Ken) {
            self.var_declaration()
        } else if self.check(&TokenKind::Dae) {
            self.function_declaration()
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'ken'

        let name = self.expect_identifier("variable name")?;

        let initializer = if self.match_token(&TokenKind::Equals) {
            Some(self.expression()?)
        } else {
            None
        };

        self.expect_statement_end()?;

        Ok(Stmt::VarDecl {
            name,
            initializer,
            span,
        })
    }

    fn function_declaration(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'dae'

        let name = self.expect_identifier("function name")?;
        self.expect(&TokenKind::LeftParen, "(")?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let param = self.expect_identifier("parameter name")?;
                if params.contains(&param) {
                    return Err(HaversError::ParseError {
                        message: format!("Parameter '{}' is named twice", param),
                        line: span.line,
                    });
                }
                params.push(param);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightParen, ")")?;
        self.skip_newlines();
        self.expect(&TokenKind::LeftBrace, "{")?;
        let body = self.block_statements()?;

        Ok(Stmt::Function {
            name,
            params,
            body,
            span,
        })
    }

    // === Statement parsing ===

    fn statement(&mut self) -> HaversResult<Stmt> {
        if self.check(&TokenKind::Gin) {
            self.if_statement()
        } else if self.check(&TokenKind::Whiles) {
            self.while_statement()
        } else if self.check(&TokenKind::Gie) {
            self.return_statement()
        } else if self.check(&TokenKind::Blether) {
            self.print_statement()
        } else if self.check(&TokenKind::LeftBrace) {
            self.block()
        } else {
            self.expression_statement()
        }
    }

    fn if_statement(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'gin'

        let condition = self.expression()?;
        self.skip_newlines();
        let then_branch = Box::new(self.block()?);

        let else_branch = if self.match_token(&TokenKind::Ither) {
            self.skip_newlines();
            if self.check(&TokenKind::Gin) {
                Some(Box::new(self.if_statement()?))
            } else {
                Some(Box::new(self.block()?))
            }
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    fn while_statement(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'whiles'

        let condition = self.expression()?;
        self.skip_newlines();
        let body = Box::new(self.block()?);

        Ok(Stmt::While {
            condition,
            body,
            span,
        })
    }

    fn return_statement(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'gie'

        let value = if self.check(&TokenKind::Newline)
            || self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression()?)
        };

        self.expect_statement_end()?;

        Ok(Stmt::Return { value, span })
    }

    fn print_statement(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.advance(); // consume 'blether'

        let value = self.expression()?;
        self.expect_statement_end()?;

        Ok(Stmt::Print { value, span })
    }

    fn block(&mut self) -> HaversResult<Stmt> {
        let span = self.current_span();
        self.expect(&TokenKind::LeftBrace, "{")?;
        let statements = self.block_statements()?;
        Ok(Stmt::Block { statements, span })
    }

    fn block_statements(&mut self) -> HaversResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        self.skip_newlines();

        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration()?);
            self.skip_newlines();
        }

        self.expect(&TokenKind::RightBrace, "}")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> HaversResult<Stmt> {
        let expr = self.expression()?;
        let span = expr.span();
        self.expect_statement_end()?;
        Ok(Stmt::Expression { expr, span })
    }

    // === Expression parsing (precedence climbing) ===

    fn expression(&mut self) -> HaversResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> HaversResult<Expr> {
        let expr = self.or()?;

        if self.match_token(&TokenKind::Equals) {
            let span = self.previous_span();
            let value = self.assignment()?;

            return match expr {
                Expr::Variable { name, .. } => Ok(Expr::Assign {
                    name,
                    value: Box::new(value),
                    span,
                }),
                _ => Err(HaversError::ParseError {
                    message: "Invalid assignment target".to_string(),
                    line: span.line,
                }),
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> HaversResult<Expr> {
        let mut expr = self.and()?;

        while self.match_token(&TokenKind::Or) {
            let span = self.previous_span();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> HaversResult<Expr> {
        let mut expr = self.equality()?;

        while self.match_token(&TokenKind::An) {
            let span = self.previous_span();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> HaversResult<Expr> {
        let mut expr = self.comparison()?;

        loop {
            let op = if self.match_token(&TokenKind::EqualsEquals) {
                BinaryOp::Equal
            } else if self.match_token(&TokenKind::BangEquals) {
                BinaryOp::NotEqual
            } else {
                break;
            };

            let span = self.previous_span();
            let right = self.comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator: op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> HaversResult<Expr> {
        let mut expr = self.term()?;

        loop {
            let op = if self.match_token(&TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(&TokenKind::LessEquals) {
                BinaryOp::LessEqual
            } else if self.match_token(&TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(&TokenKind::GreaterEquals) {
                BinaryOp::GreaterEqual
            } else {
                break;
            };

            let span = self.previous_span();
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator: op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> HaversResult<Expr> {
        let mut expr = self.factor()?;

        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Subtract
            } else {
                break;
            };

            let span = self.previous_span();
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator: op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> HaversResult<Expr> {
        let mut expr = self.unary()?;

        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Multiply
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Divide
            } else if self.match_token(&TokenKind::Percent) {
                BinaryOp::Modulo
            } else {
                break;
            };

            let span = self.previous_span();
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                operator: op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> HaversResult<Expr> {
        if self.match_token(&TokenKind::Minus) {
            let span = self.previous_span();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Negate,
                operand: Box::new(operand),
                span,
            });
        }

        // `nae` on its own is false, `nae x` is a negation
        if self.check(&TokenKind::Nae) && self.is_nae_followed_by_operand() {
            self.advance();
            let span = self.previous_span();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }

        if self.match_token(&TokenKind::Bang) {
            let span = self.previous_span();
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                operator: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }

        self.call()
    }

    fn is_nae_followed_by_operand(&self) -> bool {
        match self.tokens.get(self.current + 1) {
            Some(next) => matches!(
                next.kind,
                TokenKind::Integer(_)
                    | TokenKind::Float(_)
                    | TokenKind::String(_)
                    | TokenKind::Identifier(_)
                    | TokenKind::LeftParen
                    | TokenKind::Bang
                    | TokenKind::Aye
                    | TokenKind::Nae
                    | TokenKind::Naething
            ),
            None => false,
        }
    }

    fn call(&mut self) -> HaversResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_token(&TokenKind::Dot) {
                let span = self.previous_span();
                let property = self.expect_identifier("property name")?;
                expr = Expr::Get {
                    object: Box::new(expr),
                    property,
                    span,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> HaversResult<Expr> {
        let span = callee.span();
        let mut arguments = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                arguments.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightParen, ")")?;

        Ok(Expr::Call {
            callee: Box::new(callee),
            arguments,
            span,
        })
    }

    fn primary(&mut self) -> HaversResult<Expr> {
        let token = self.peek().clone();
        let span = Span::new(token.line, token.column);

        let literal = match &token.kind {
            TokenKind::Integer(n) => Literal::Integer(*n),
            TokenKind::Float(n) => Literal::Float(*n),
            TokenKind::String(s) => Literal::String(process_escapes(s)),
            TokenKind::Aye => Literal::Bool(true),
            TokenKind::Nae => Literal::Bool(false),
            TokenKind::Naething => Literal::Nil,
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                return Ok(Expr::Variable { name, span });
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RightParen, ")")?;
                return Ok(Expr::Grouping {
                    expr: Box::new(expr),
                    span,
                });
            }
            _ => {
                return Err(HaversError::ParseError {
                    message: format!("Unexpected token: {}", token.kind),
                    line: token.line,
                })
            }
        };

        self.advance();
        Ok(Expr::Literal {
            value: literal,
            span,
        })
    }

    // === Helper methods ===

    fn peek(&self) -> &Token {
        // `new` guarantees a trailing Eof
        let last = self.tokens.len() - 1;
        &self.tokens[self.current.min(last)]
    }

    fn previous_span(&self) -> Span {
        match self.current.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => Span::new(t.line, t.column),
            None => self.current_span(),
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.current += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            false
        } else {
            std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> HaversResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(HaversError::UnexpectedToken {
                expected: expected.to_string(),
                found: self.peek().kind.to_string(),
                line: self.peek().line,
            })
        }
    }

    fn expect_identifier(&mut self, context: &str) -> HaversResult<String> {
        let token = self.peek().clone();
        if let TokenKind::Identifier(name) = token.kind {
            self.advance();
            Ok(name)
        } else {
            Err(HaversError::UnexpectedToken {
                expected: context.to_string(),
                found: token.kind.to_string(),
                line: token.line,
            })
        }
    }

    fn expect_statement_end(&mut self) -> HaversResult<()> {
        if self.is_at_end() || self.check(&TokenKind::RightBrace) {
            return Ok(());
        }

        if self.match_token(&TokenKind::Newline) {
            return Ok(());
        }

        if self.match_token(&TokenKind::Semicolon) {
            self.skip_newlines();
            return Ok(());
        }

        // Be lenient - if the next token starts a new statement, that's fine
        if matches!(
            self.peek().kind,
            TokenKind::Ken
                | TokenKind::Dae
                | TokenKind::Gin
                | TokenKind::Whiles
                | TokenKind::Gie
                | TokenKind::Blether
        ) {
            return Ok(());
        }

        Err(HaversError::UnexpectedToken {
            expected: "newline or ';'".to_string(),
            found: self.peek().kind.to_string(),
            line: self.peek().line,
        })
    }

    fn skip_newlines(&mut self) {
        while self.match_token(&TokenKind::Newline) || self.match_token(&TokenKind::Semicolon) {}
    }

    fn current_span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.column)
    }
}

fn process_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('"') => result.push('"'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

/// Convenience function tae parse source code
pub fn parse(source: &str) -> HaversResult<Program> {
    let tokens = crate::lexer::lex(source)?;
    let mut parser = Parser::new(tokens);
    parser.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_declaration() {
        let program = parse("ken x = 5").unwrap();
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(program.statements[0], Stmt::VarDecl { .. }));
    }

    #[test]
    fn test_function_declaration() {
        let program =
            parse("dae fib(x) {\n  ken engine = recurrence()\n  gie engine.get(x)\n}").unwrap();
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::Function { name, params, body, .. } => {
                assert_eq!(name, "fib");
                assert_eq!(params, &vec!["x".to_string()]);
                assert_eq!(body.len(), 2);
                assert!(matches!(body[1], Stmt::Return { value: Some(_), .. }));
            }
            other => panic!("expected a function, got {:?}", other),
        }
    }

    #[test]
    fn test_semicolon_separated_unit() {
        let program = parse("dae calc(x) { gie recurrence().get(x) }; ken a = calc(p)").unwrap();
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0], Stmt::Function { .. }));
        assert!(matches!(program.statements[1], Stmt::VarDecl { .. }));
    }

    #[test]
    fn test_method_call_chain() {
        let program = parse("recurrence().get(10)").unwrap();
        match &program.statements[0] {
            Stmt::Expression {
                expr: Expr::Call { callee, arguments, .. },
                ..
            } => {
                assert_eq!(arguments.len(), 1);
                assert!(matches!(**callee, Expr::Get { ref property, .. } if property == "get"));
            }
            other => panic!("expected a call, got {:?}", other),
        }
    }

    #[test]
    fn test_if_and_while() {
        let program = parse(
            "ken i = 0\nwhiles i < 3 {\n  i = i + 1\n}\ngin i == 3 {\n  blether \"aye\"\n} ither {\n  blether \"nae\"\n}",
        )
        .unwrap();
        assert_eq!(program.statements.len(), 3);
        assert!(matches!(program.statements[1], Stmt::While { .. }));
        assert!(matches!(program.statements[2], Stmt::If { else_branch: Some(_), .. }));
    }

    #[test]
    fn test_nae_as_literal_and_operator() {
        let program = parse("ken a = nae\nken b = nae a").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { initializer: Some(Expr::Literal { value, .. }), .. } => {
                assert_eq!(*value, Literal::Bool(false));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            program.statements[1],
            Stmt::VarDecl { initializer: Some(Expr::Unary { operator: UnaryOp::Not, .. }), .. }
        ));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse("5 = x").unwrap_err();
        assert!(matches!(err, HaversError::ParseError { .. }));
    }

    #[test]
    fn test_missing_brace() {
        let err = parse("dae fib(x) {\n gie x\n").unwrap_err();
        assert!(matches!(err, HaversError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_duplicate_param() {
        assert!(parse("dae f(a, a) { gie a }").is_err());
    }

    #[test]
    fn test_string_escapes() {
        let program = parse(r#"blether "a\tb\n""#).unwrap();
        match &program.statements[0] {
            Stmt::Print { value: Expr::Literal { value, .. }, .. } => {
                assert_eq!(*value, Literal::String("a\tb\n".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
