use crate::ast::{Ast, AstTag, Literal};
use crate::diagnostics::ContextualError;
use crate::forest::NodeId;
use crate::lex::{lex, Keyword, Token, TokenKind};
use crate::pc::{transform_if, PState};
use crate::src_map::{SrcId, SrcRef};
use crate::types::{Type, TypeGraph};

/// Type-annotation sites the caller must bind during name resolution:
/// leaf nodes created for a name, paired with where the name was written.
pub type TypeSrcs = Vec<(Type, SrcRef)>;

pub type ParseResult = Result<(NodeId, TypeSrcs), Vec<ContextualError>>;

struct Parser<'a, 'tok> {
    ast: &'a mut Ast,
    tg: &'a mut TypeGraph,
    text: &'a str,
    src: SrcId,
    state: PState<'tok, Token>,
    type_srcs: TypeSrcs,
    // Errors detected while converting literal text, reported eagerly.
    literal_errors: Vec<ContextualError>,
}

fn join(a: SrcRef, b: SrcRef) -> SrcRef {
    debug_assert_eq!(a.src, b.src);
    SrcRef {
        src: a.src,
        slice: crate::src_map::Slice {
            begin: a.slice.begin.min(b.slice.begin),
            end: a.slice.end.max(b.slice.end),
        },
    }
}

impl<'a, 'tok> Parser<'a, 'tok> {
    fn token_text(&self, token: Token) -> &'a str {
        &self.text[token.src.slice.begin as usize..token.src.slice.end as usize]
    }

    fn eat(&mut self, expected: &str, kind: TokenKind) -> Option<Token> {
        transform_if(expected, move |t: &Token| (t.kind == kind).then_some(*t))(&mut self.state)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.state.peek().map(|t| t.kind)
    }

    fn peek_is_ident(&self, text: &str) -> bool {
        match self.state.peek() {
            Some(t) if t.kind == TokenKind::Ident => {
                &self.text[t.src.slice.begin as usize..t.src.slice.end as usize] == text
            }
            _ => false,
        }
    }

    fn node(&mut self, tag: AstTag, src: SrcRef, ty: Type, children: &[NodeId]) -> NodeId {
        self.ast.append(tag, src, ty, children)
    }

    // type := '_' | name | '&' type | '(' type,* ')' | 'fn' '(' type,* ')' '->' type
    fn type_ref(&mut self) -> Option<Type> {
        match self.peek_kind() {
            Some(TokenKind::Ident) => {
                let token = self.eat("type name", TokenKind::Ident)?;
                if self.token_text(token) == "_" {
                    Some(self.tg.floating(token.src))
                } else {
                    let t = self.tg.named_leaf(token.src);
                    self.type_srcs.push((t, token.src));
                    Some(t)
                }
            }
            Some(TokenKind::Amp) => {
                self.eat("&", TokenKind::Amp)?;
                let inner = self.type_ref()?;
                Some(self.tg.borrow(inner))
            }
            Some(TokenKind::LParen) => {
                let children = self.type_list()?;
                Some(self.tg.tuple(children))
            }
            Some(TokenKind::Keyword(Keyword::Fn)) => {
                self.eat("fn", TokenKind::Keyword(Keyword::Fn))?;
                let input = self.type_list()?;
                let input = self.tg.tuple(input);
                self.eat("->", TokenKind::Arrow)?;
                let output = self.type_ref()?;
                Some(self.tg.fn_type(input, output))
            }
            _ => {
                self.state.fail("type");
                None
            }
        }
    }

    fn type_list(&mut self) -> Option<Vec<Type>> {
        self.eat("(", TokenKind::LParen)?;
        let mut out = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                out.push(self.type_ref()?);
                if self.eat(",", TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.state.errors.pop();
        }
        self.eat(")", TokenKind::RParen)?;
        Some(out)
    }

    // pattern := ('_' | ident | '(' pattern,* ')') (':' type)?
    fn pattern(&mut self) -> Option<NodeId> {
        let id = self.pattern_term()?;
        if self.peek_kind() == Some(TokenKind::Colon) {
            self.eat(":", TokenKind::Colon)?;
            let annotation = self.type_ref()?;
            self.ast.set_ty(id, annotation);
        }
        Some(id)
    }

    fn pattern_term(&mut self) -> Option<NodeId> {
        match self.peek_kind() {
            Some(TokenKind::Ident) => {
                let token = self.eat("pattern", TokenKind::Ident)?;
                let ty = self.tg.floating(token.src);
                let tag = if self.token_text(token) == "_" {
                    AstTag::PatternWildCard
                } else {
                    AstTag::PatternIdent
                };
                Some(self.node(tag, token.src, ty, &[]))
            }
            Some(TokenKind::LParen) => {
                let open = self.eat("(", TokenKind::LParen)?;
                let mut children = Vec::new();
                if self.peek_kind() != Some(TokenKind::RParen) {
                    loop {
                        children.push(self.pattern()?);
                        if self.eat(",", TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                    self.state.errors.pop();
                }
                let close = self.eat(")", TokenKind::RParen)?;
                let src = join(open.src, close.src);
                let ty = self.tg.floating(src);
                Some(self.node(AstTag::PatternTuple, src, ty, &children))
            }
            _ => {
                self.state.fail("pattern");
                None
            }
        }
    }

    fn literal(&mut self) -> Option<NodeId> {
        let token = *self.state.peek()?;
        let (value, type_id) = match token.kind {
            TokenKind::Int | TokenKind::Float => {
                self.state.pos += 1;
                match parse_number(self.token_text(token), token.kind == TokenKind::Float) {
                    Some(pair) => pair,
                    None => {
                        self.literal_errors
                            .push(ContextualError::new(token.src, "invalid literal"));
                        return None;
                    }
                }
            }
            TokenKind::Str => {
                self.state.pos += 1;
                let text = self.token_text(token);
                let value = text[1..text.len() - 1].to_string();
                (Literal::String(value), std::any::TypeId::of::<String>())
            }
            TokenKind::Ident if self.peek_is_ident("true") => {
                self.state.pos += 1;
                (Literal::Bool(true), std::any::TypeId::of::<bool>())
            }
            TokenKind::Ident if self.peek_is_ident("false") => {
                self.state.pos += 1;
                (Literal::Bool(false), std::any::TypeId::of::<bool>())
            }
            _ => {
                self.state.fail("literal");
                return None;
            }
        };

        let ty = self.tg.leaf(type_id);
        let id = self.node(AstTag::ExprLiteral, token.src, ty, &[]);
        self.ast.literals.insert(id, value);
        Some(id)
    }

    // expr := primary ('(' expr,* ')')*
    fn expr(&mut self) -> Option<NodeId> {
        let mut callee = self.primary_expr()?;
        while self.peek_kind() == Some(TokenKind::LParen) {
            let args = self.paren_exprs()?;
            let src = join(self.ast.src(callee), self.ast.src(args));
            let ty = self.tg.floating(src);
            callee = self.node(AstTag::ExprCall, src, ty, &[callee, args]);
        }
        Some(callee)
    }

    // '(' expr,* ')' as an ExprTuple
    fn paren_exprs(&mut self) -> Option<NodeId> {
        let open = self.eat("(", TokenKind::LParen)?;
        let mut children = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                children.push(self.expr()?);
                if self.eat(",", TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.state.errors.pop();
        }
        let close = self.eat(")", TokenKind::RParen)?;
        let src = join(open.src, close.src);
        let ty = self.tg.floating(src);
        Some(self.node(AstTag::ExprTuple, src, ty, &children))
    }

    fn primary_expr(&mut self) -> Option<NodeId> {
        match self.peek_kind() {
            Some(TokenKind::Amp) => {
                let amp = self.eat("&", TokenKind::Amp)?;
                let inner = self.expr()?;
                let src = join(amp.src, self.ast.src(inner));
                let ty = self.tg.floating(src);
                Some(self.node(AstTag::ExprBorrow, src, ty, &[inner]))
            }
            Some(TokenKind::LParen) => self.paren_exprs(),
            Some(TokenKind::LBrace) => self.scope_expr(),
            Some(TokenKind::Keyword(Keyword::Select)) => self.select_expr(),
            Some(TokenKind::Int) | Some(TokenKind::Float) | Some(TokenKind::Str) => self.literal(),
            Some(TokenKind::Ident) => {
                if self.peek_is_ident("true") || self.peek_is_ident("false") {
                    return self.literal();
                }
                let token = self.eat("identifier", TokenKind::Ident)?;
                let ty = self.tg.floating(token.src);
                Some(self.node(AstTag::ExprIdent, token.src, ty, &[]))
            }
            _ => {
                self.state.fail("expression");
                None
            }
        }
    }

    // '{' (assignment ';')* expr '}' desugared to nested with-expressions
    fn scope_expr(&mut self) -> Option<NodeId> {
        let open = self.eat("{", TokenKind::LBrace)?;
        let mut assignments = Vec::new();
        while self.peek_kind() == Some(TokenKind::Keyword(Keyword::Let)) {
            assignments.push(self.assignment()?);
            self.eat(";", TokenKind::SemiColon)?;
        }
        let mut result = self.expr()?;
        let close = self.eat("}", TokenKind::RBrace)?;
        let src = join(open.src, close.src);

        for assignment in assignments.into_iter().rev() {
            let ty = self.ast.ty(result);
            result = self.node(AstTag::ExprWith, src, ty, &[assignment, result]);
        }
        Some(result)
    }

    // 'select' expr '{' expr '}' 'else' '{' expr '}'
    fn select_expr(&mut self) -> Option<NodeId> {
        let kw = self.eat("select", TokenKind::Keyword(Keyword::Select))?;
        let cond = self.expr()?;
        self.eat("{", TokenKind::LBrace)?;
        let if_expr = self.expr()?;
        self.eat("}", TokenKind::RBrace)?;
        self.eat("else", TokenKind::Keyword(Keyword::Else))?;
        self.eat("{", TokenKind::LBrace)?;
        let else_expr = self.expr()?;
        let close = self.eat("}", TokenKind::RBrace)?;

        let src = join(kw.src, close.src);
        let ty = self.tg.floating(src);
        Some(self.node(AstTag::ExprSelect, src, ty, &[cond, if_expr, else_expr]))
    }

    // 'let' pattern '=' expr
    fn assignment(&mut self) -> Option<NodeId> {
        let kw = self.eat("let", TokenKind::Keyword(Keyword::Let))?;
        let pattern = self.pattern()?;
        self.eat("=", TokenKind::Equals)?;
        let expr = self.expr()?;
        let src = join(kw.src, self.ast.src(expr));
        let ty = self.tg.unit();
        Some(self.node(AstTag::Assignment, src, ty, &[pattern, expr]))
    }

    // 'fn' name '(' pattern,* ')' '->' type ('=' expr | scope)
    fn function(&mut self) -> Option<NodeId> {
        let kw = self.eat("fn", TokenKind::Keyword(Keyword::Fn))?;
        let name = self.eat("function name", TokenKind::Ident)?;

        let open = self.eat("(", TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                params.push(self.pattern()?);
                if self.eat(",", TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.state.errors.pop();
        }
        let close = self.eat(")", TokenKind::RParen)?;

        let pattern_src = join(open.src, close.src);
        let pattern_ty = self.tg.floating(pattern_src);
        let pattern = self.node(AstTag::PatternTuple, pattern_src, pattern_ty, &params);

        self.eat("->", TokenKind::Arrow)?;
        let return_ty = self.type_ref()?;

        let body = if self.peek_kind() == Some(TokenKind::LBrace) {
            self.scope_expr()?
        } else {
            self.eat("=", TokenKind::Equals)?;
            self.expr()?
        };

        let fn_src = join(kw.src, self.ast.src(body));
        let fn_ty = self.tg.fn_type(pattern_ty, return_ty);
        let fn_node = self.node(AstTag::Fn, fn_src, fn_ty, &[pattern, body]);

        let name_node = self.node(AstTag::PatternIdent, name.src, fn_ty, &[]);
        Some(self.node(AstTag::RootFn, fn_src, fn_ty, &[name_node, fn_node]))
    }

    // function*
    fn module(&mut self) -> Option<NodeId> {
        let mut fns = Vec::new();
        while self.peek_kind() == Some(TokenKind::Keyword(Keyword::Fn)) {
            fns.push(self.function()?);
        }
        let src = SrcRef::new(self.src, 0, self.text.len());
        let ty = self.tg.floating(SrcRef::NONE);
        Some(self.node(AstTag::Module, src, ty, &fns))
    }

    // assignment | expr
    fn repl(&mut self) -> Option<NodeId> {
        if self.peek_kind() == Some(TokenKind::Keyword(Keyword::Let)) {
            self.assignment()
        } else {
            self.expr()
        }
    }
}

fn parse_number(text: &str, is_float: bool) -> Option<(Literal, std::any::TypeId)> {
    use std::any::TypeId;

    let suffix_at = text
        .char_indices()
        .find(|&(i, c)| matches!(c, 'i' | 'u' | 'f') && i > 0)
        .map(|(i, _)| i);
    let (digits, suffix) = match suffix_at {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };

    match (suffix, is_float) {
        ("i8", _) => Some((Literal::I8(digits.parse().ok()?), TypeId::of::<i8>())),
        ("i16", _) => Some((Literal::I16(digits.parse().ok()?), TypeId::of::<i16>())),
        ("i32", _) => Some((Literal::I32(digits.parse().ok()?), TypeId::of::<i32>())),
        ("i64", _) => Some((Literal::I64(digits.parse().ok()?), TypeId::of::<i64>())),
        ("u8", _) => Some((Literal::U8(digits.parse().ok()?), TypeId::of::<u8>())),
        ("u16", _) => Some((Literal::U16(digits.parse().ok()?), TypeId::of::<u16>())),
        ("u32", _) => Some((Literal::U32(digits.parse().ok()?), TypeId::of::<u32>())),
        ("u64", _) => Some((Literal::U64(digits.parse().ok()?), TypeId::of::<u64>())),
        ("f32", _) => Some((Literal::F32(digits.parse().ok()?), TypeId::of::<f32>())),
        ("f64", _) => Some((Literal::F64(digits.parse().ok()?), TypeId::of::<f64>())),
        ("", true) => Some((Literal::F32(digits.parse().ok()?), TypeId::of::<f32>())),
        ("", false) => Some((Literal::I32(digits.parse().ok()?), TypeId::of::<i32>())),
        _ => None,
    }
}

fn run_parser(
    ast: &mut Ast,
    tg: &mut TypeGraph,
    src: SrcId,
    text: &str,
    f: impl FnOnce(&mut Parser) -> Option<NodeId>,
) -> ParseResult {
    let tokens = lex(src, text).map_err(|e| vec![e])?;

    let mut parser = Parser {
        ast,
        tg,
        text,
        src,
        state: PState::new(&tokens),
        type_srcs: Vec::new(),
        literal_errors: Vec::new(),
    };

    let root = f(&mut parser);
    if !parser.literal_errors.is_empty() {
        return Err(parser.literal_errors);
    }

    match root {
        Some(root) if parser.state.remaining() == 0 => Ok((root, parser.type_srcs)),
        _ => {
            if parser.state.remaining() > 0 && root.is_some() {
                parser.state.fail("end of input");
            }
            let (pos, expected) = parser.state.furthest_errors();
            let src_ref = tokens
                .get(pos)
                .map(|t| t.src)
                .unwrap_or_else(|| SrcRef::new(src, text.len(), text.len()));
            Err(vec![ContextualError::new(
                src_ref,
                format!("expected {}", expected.join(" or ")),
            )])
        }
    }
}

pub fn parse_expr(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.expr())
}

pub fn parse_repl(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.repl())
}

pub fn parse_function(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.function())
}

pub fn parse_assignment(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.assignment())
}

pub fn parse_pattern(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.pattern())
}

pub fn parse_binding(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.pattern())
}

/// Parses a module: a sequence of function definitions.
pub fn parse_module(ast: &mut Ast, tg: &mut TypeGraph, src: SrcId, text: &str) -> ParseResult {
    run_parser(ast, tg, src, text, |p| p.module())
}

/// Parses a bare type, returning the handle alongside the annotation
/// sites.
pub fn parse_type(
    ast: &mut Ast,
    tg: &mut TypeGraph,
    src: SrcId,
    text: &str,
) -> Result<(Type, TypeSrcs), Vec<ContextualError>> {
    let tokens = lex(src, text).map_err(|e| vec![e])?;
    let mut parser = Parser {
        ast,
        tg,
        text,
        src,
        state: PState::new(&tokens),
        type_srcs: Vec::new(),
        literal_errors: Vec::new(),
    };
    match parser.type_ref() {
        Some(t) if parser.state.remaining() == 0 => Ok((t, parser.type_srcs)),
        _ => {
            let (pos, expected) = parser.state.furthest_errors();
            let src_ref = tokens
                .get(pos)
                .map(|t| t.src)
                .unwrap_or_else(|| SrcRef::new(src, text.len(), text.len()));
            let expected = if expected.is_empty() {
                vec!["end of input".to_string()]
            } else {
                expected
            };
            Err(vec![ContextualError::new(
                src_ref,
                format!("expected {}", expected.join(" or ")),
            )])
        }
    }
}
