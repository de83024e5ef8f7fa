// Parser for .axm module files.
//
// Parses a token stream (from the lexer) into a `SourceModule`: the input
// table entries plus value/trait declarations. Uses chumsky combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns a module plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::{DeclKind, Declaration, Expr, ExprKind, FieldPath, InputDecl, Literal, SourceModule};
use crate::axes::Axes;
use crate::lexer::Token;
use crate::types::DType;

/// Result of parsing: module plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<SourceModule>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a module source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(lex_result.tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser(source);
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| Rich::custom(e.span, e.message))
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

enum Stmt {
    Input(InputDecl),
    Decl(Declaration),
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser` so the `source`
// reference is captured once and shared by every combinator that needs an
// identifier's text.

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, SourceModule, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        (source[span.start..span.end].to_string(), span)
    });

    let name = ident.clone().map(|(name, _)| name);

    // ── Paths, axes, dtypes ──

    // Path segments may spell a keyword: `orders.value` is a field name.
    let segment = choice((
        just(Token::Ident),
        just(Token::Input),
        just(Token::Value),
        just(Token::Trait),
        just(Token::Select),
        just(Token::Reduce),
        just(Token::True),
        just(Token::False),
    ))
    .map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start..span.end].to_string()
    });

    let path = segment
        .separated_by(just(Token::Dot))
        .at_least(1)
        .collect::<Vec<_>>()
        .map(FieldPath::new);

    let axes = name
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map(Axes::from_names);

    let dtype = ident.clone().try_map(|(name, _), span| {
        DType::from_name(&name).ok_or_else(|| {
            Rich::custom(
                span,
                format!(
                    "expected dtype (integer, float, string, boolean), found '{}'",
                    name
                ),
            )
        })
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let literal = select! {
            Token::Int(n) => Literal::Integer(n),
            Token::Float(x) => Literal::Float(x),
            Token::Str(s) => Literal::String(s),
            Token::True => Literal::Boolean(true),
            Token::False => Literal::Boolean(false),
        }
        .map_with(|lit, e| Expr::new(ExprKind::Constant(lit), e.span()));

        let input_ref = just(Token::Input)
            .ignore_then(just(Token::Dot))
            .ignore_then(path.clone())
            .map_with(|p, e| Expr::new(ExprKind::Input(p), e.span()));

        let select = just(Token::Select)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((cond, on_true), on_false), e| {
                Expr::new(
                    ExprKind::Select {
                        cond: Box::new(cond),
                        on_true: Box::new(on_true),
                        on_false: Box::new(on_false),
                    },
                    e.span(),
                )
            });

        // reduce(op, arg) or reduce(op, arg, [over])
        let reduce = just(Token::Reduce)
            .ignore_then(
                name.clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .then(just(Token::Comma).ignore_then(axes.clone()).or_not())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((op, arg), over), e| {
                Expr::new(
                    ExprKind::Reduce {
                        op,
                        over,
                        arg: Box::new(arg),
                    },
                    e.span(),
                )
            });

        // A single parenthesized expression is grouping; two or more is a tuple.
        let paren = expr
            .clone()
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map_with(|mut elems, e| {
                if elems.len() == 1 {
                    elems.remove(0)
                } else {
                    Expr::new(ExprKind::Tuple(elems), e.span())
                }
            });

        let call_or_ref = name
            .clone()
            .then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .map_with(|(func, args), e| match args {
                Some(args) => Expr::new(ExprKind::Call { func, args }, e.span()),
                None => Expr::new(ExprKind::DeclRef(func), e.span()),
            });

        choice((literal, input_ref, select, reduce, paren, call_or_ref))
    });

    // ── Statements ──

    let input_stmt = just(Token::Input)
        .ignore_then(path)
        .then_ignore(just(Token::Colon))
        .then(axes)
        .then(dtype)
        .map_with(|((path, axes), dtype), e| {
            Stmt::Input(InputDecl {
                path,
                axes,
                dtype,
                span: e.span(),
            })
        });

    let decl_kind = just(Token::Value)
        .to(DeclKind::Value)
        .or(just(Token::Trait).to(DeclKind::Trait));

    let decl_stmt = decl_kind
        .then(name)
        .then_ignore(just(Token::Equals))
        .then(expr)
        .map_with(|((kind, name), body), e| {
            Stmt::Decl(Declaration {
                name,
                kind,
                body,
                span: e.span(),
            })
        });

    // ── Module ──

    input_stmt
        .or(decl_stmt)
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map_with(|stmts, e| {
            let mut inputs = Vec::new();
            let mut declarations = Vec::new();
            for stmt in stmts {
                match stmt {
                    Stmt::Input(i) => inputs.push(i),
                    Stmt::Decl(d) => declarations.push(d),
                }
            }
            SourceModule {
                inputs,
                declarations,
                span: e.span(),
            }
        })
}

// ── Tests ──
