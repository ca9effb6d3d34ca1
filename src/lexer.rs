use logos::Logos;

use crate::error::{HaversError, HaversResult};
use crate::token::{Token, TokenKind};

/// The lexer - turns script source intae tokens wi' line an' column info
pub struct Lexer<'source> {
    source: &'source str,
    logos: logos::Lexer<'source, TokenKind>,
    line: usize,
    column: usize,
    cursor: usize,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lexer {
            source,
            logos: TokenKind::lexer(source),
            line: 1,
            column: 1,
            cursor: 0,
        }
    }

    // Columns count chars, no' bytes
    fn advance_to(&mut self, pos: usize) {
        for ch in self.source[self.cursor..pos].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.cursor = pos;
    }

    pub fn tokenize(&mut self) -> HaversResult<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(result) = self.logos.next() {
            let span = self.logos.span();
            self.advance_to(span.start);
            let (line, column) = (self.line, self.column);
            let lexeme = self.logos.slice().to_string();

            match result {
                Ok(kind) => tokens.push(Token::new(kind, lexeme, line, column)),
                Err(_) => {
                    // An integer that overflows i64 fails its callback
                    if lexeme.chars().all(|c| c.is_ascii_digit()) {
                        return Err(HaversError::InvalidNumber {
                            value: lexeme,
                            line,
                        });
                    }
                    if lexeme.starts_with('"') {
                        return Err(HaversError::UnterminatedString { line });
                    }
                    return Err(HaversError::UnkentToken {
                        lexeme,
                        line,
                        column,
                    });
                }
            }

            self.advance_to(span.end);
        }

        tokens.push(Token::eof(self.line));
        Ok(tokens)
    }
}

/// Convenience function tae lex a string
pub fn lex(source: &str) -> HaversResult<Vec<Token>> {
    Lexer::new(source).tokenize()
}
