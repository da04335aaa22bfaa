//! IR builder: walks the surface AST, queries a dtype resolver, constructs
//! the typed IR, and enforces the structural invariants of §4.1.
//!
//! Never leaks partial IR on failure — `build()` returns either a complete
//! `IrProgram` or a `BuildError`; there is no intermediate state visible to
//! the caller either way.

use crate::ast::{AstElif, AstExpr, AstProgram, AstStmt};
use crate::dtype::Dtype;
use crate::ir::expr::IrExpr;
use crate::ir::program::{IrProgram, Param};
use crate::ir::stmt::{Block, ElifArm, IrStmt, Pos};
use crate::ir::symtab::{Symbol, SymbolTable};

/// A structured build-time rejection: `(line, column, message)`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct BuildError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl BuildError {
    fn new(pos: Pos, message: impl Into<String>) -> Self {
        BuildError {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }
}

fn pos_of(span: crate::ast::Span) -> Pos {
    Pos::new(span.line, span.column)
}

/// Caller-supplied dtype resolver. Invoked exactly where the builder needs
/// a type for an expression node (§4.1, §6).
pub trait DtypeResolver {
    fn resolve(&mut self, expr: &AstExpr) -> Result<Dtype, String>;
}

/// A resolver backed by a plain closure, for callers who don't need a
/// stateful `DtypeResolver` impl.
pub struct FnResolver<F>(pub F);

impl<F: FnMut(&AstExpr) -> Result<Dtype, String>> DtypeResolver for FnResolver<F> {
    fn resolve(&mut self, expr: &AstExpr) -> Result<Dtype, String> {
        (self.0)(expr)
    }
}

/// Whether `text` contains a comma outside of any bracket/paren nesting and
/// outside of string literals — a rough test that excludes
/// `range(start, stop[, step])` forms per §4.1.
fn has_top_level_comma(text: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_str: Option<char> = None;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = in_str {
            if c == '\\' {
                chars.next();
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_str = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

struct BuilderState<'r> {
    symtab: SymbolTable,
    resolver: &'r mut dyn DtypeResolver,
}

impl<'r> BuilderState<'r> {
    fn resolve(&mut self, expr: &AstExpr) -> Result<Dtype, BuildError> {
        self.resolver
            .resolve(expr)
            .map_err(|msg| BuildError::new(pos_of(expr.span), msg))
    }

    fn lower_expr(&mut self, expr: &AstExpr) -> Result<IrExpr, BuildError> {
        let dtype = self.resolve(expr)?;
        if !dtype.is_jit_supported() {
            return Err(BuildError::new(
                pos_of(expr.span),
                format!("unsupported dtype for JIT: {dtype:?}"),
            ));
        }
        Ok(IrExpr::new(expr.text.clone(), dtype))
    }

    fn lower_block(&mut self, stmts: &[AstStmt], in_loop: bool) -> Result<Block, BuildError> {
        let mut block = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            block.push(self.lower_stmt(stmt, in_loop)?);
        }
        Ok(block)
    }

    fn lower_elif(&mut self, elif: &AstElif, in_loop: bool) -> Result<ElifArm, BuildError> {
        let cond = self.lower_expr(&elif.cond)?;
        let block = self.lower_block(&elif.block, in_loop)?;
        Ok(ElifArm { cond, block })
    }

    fn lower_stmt(&mut self, stmt: &AstStmt, in_loop: bool) -> Result<IrStmt, BuildError> {
        match stmt {
            AstStmt::Assign { span, name, value } => {
                let pos = pos_of(*span);
                if let Some(existing) = self.symtab.get(name) {
                    if existing.is_param {
                        return Err(BuildError::new(
                            pos,
                            format!("cannot assign to parameter `{name}`"),
                        ));
                    }
                }
                let value = self.lower_expr(value)?;
                match self.symtab.get(name) {
                    Some(existing) if existing.dtype != value.dtype => {
                        return Err(BuildError::new(
                            pos,
                            format!(
                                "`{name}` reassigned with dtype {:?}, previously {:?}",
                                value.dtype, existing.dtype
                            ),
                        ));
                    }
                    Some(_) => {}
                    None => self.symtab.insert(
                        name.clone(),
                        Symbol {
                            dtype: value.dtype,
                            is_param: false,
                        },
                    ),
                }
                Ok(IrStmt::Assign {
                    pos,
                    name: name.clone(),
                    dtype: value.dtype,
                    value,
                })
            }
            AstStmt::Return { span, value } => {
                let pos = pos_of(*span);
                let value = self.lower_expr(value)?;
                Ok(IrStmt::Return { pos, value })
            }
            AstStmt::If {
                span,
                cond,
                then_block,
                elifs,
                else_block,
            } => {
                let pos = pos_of(*span);
                let cond = self.lower_expr(cond)?;
                let then_block = self.lower_block(then_block, in_loop)?;
                let mut lowered_elifs = Vec::with_capacity(elifs.len());
                for elif in elifs {
                    lowered_elifs.push(self.lower_elif(elif, in_loop)?);
                }
                let else_block = else_block
                    .as_ref()
                    .map(|b| self.lower_block(b, in_loop))
                    .transpose()?;
                Ok(IrStmt::If {
                    pos,
                    cond,
                    then_block,
                    elifs: lowered_elifs,
                    else_block,
                })
            }
            AstStmt::For {
                span,
                var,
                limit,
                body,
            } => {
                let pos = pos_of(*span);
                if self.symtab.contains(var) {
                    return Err(BuildError::new(
                        pos,
                        format!("for-loop variable `{var}` shadows an existing name"),
                    ));
                }
                if has_top_level_comma(&limit.text) {
                    return Err(BuildError::new(
                        pos,
                        "multi-argument range() is not supported in JIT IR",
                    ));
                }
                let limit = self.lower_expr(limit)?;
                self.symtab.insert(
                    var.clone(),
                    Symbol {
                        dtype: Dtype::Int64,
                        is_param: false,
                    },
                );
                let body = self.lower_block(body, true)?;
                Ok(IrStmt::For {
                    pos,
                    var: var.clone(),
                    limit,
                    body,
                })
            }
            AstStmt::Break { span, cond } => {
                let pos = pos_of(*span);
                if !in_loop {
                    return Err(BuildError::new(pos, "`break` outside of a loop"));
                }
                if cond.is_some() {
                    return Err(BuildError::new(
                        pos,
                        "conditional `break` is not supported in JIT IR",
                    ));
                }
                Ok(IrStmt::Break { pos })
            }
            AstStmt::Continue { span, cond } => {
                let pos = pos_of(*span);
                if !in_loop {
                    return Err(BuildError::new(pos, "`continue` outside of a loop"));
                }
                if cond.is_some() {
                    return Err(BuildError::new(
                        pos,
                        "conditional `continue` is not supported in JIT IR",
                    ));
                }
                Ok(IrStmt::Continue { pos })
            }
            AstStmt::ExprStmt { span, .. } => Err(BuildError::new(
                pos_of(*span),
                "expression-statements are not supported in JIT IR",
            )),
            AstStmt::PrintStmt { span, .. } => Err(BuildError::new(
                pos_of(*span),
                "print-statements are not supported in JIT IR",
            )),
        }
    }
}

/// Build a typed IR program from a surface AST program.
///
/// `params` is ordered host-provided parameter metadata `(name, dtype)`.
/// `resolver` is invoked for every expression node encountered during the
/// walk.
pub fn build(
    ast: &AstProgram,
    params: Vec<(String, Dtype)>,
    resolver: &mut dyn DtypeResolver,
) -> Result<IrProgram, BuildError> {
    let origin = Pos::default();

    let mut seen = std::collections::HashSet::new();
    for (name, _) in &params {
        if !seen.insert(name.clone()) {
            return Err(BuildError::new(
                origin,
                format!("duplicate parameter name `{name}`"),
            ));
        }
    }
    for (name, dtype) in &params {
        if !dtype.is_jit_supported() {
            return Err(BuildError::new(
                origin,
                format!("parameter `{name}` has unsupported dtype {dtype:?}"),
            ));
        }
    }

    let mut symtab = SymbolTable::new();
    for (name, dtype) in &params {
        symtab.insert(
            name.clone(),
            Symbol {
                dtype: *dtype,
                is_param: true,
            },
        );
    }

    let mut state = BuilderState {
        symtab,
        resolver,
    };
    let body = state.lower_block(&ast.block, false)?;

    Ok(IrProgram {
        name: ast.name.clone().unwrap_or_else(|| "kernel".to_string()),
        dialect: ast.dialect,
        fp_mode: ast.fp_mode,
        parameters: params
            .into_iter()
            .map(|(name, dtype)| Param { name, dtype })
            .collect(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    fn sp() -> Span {
        Span { line: 1, column: 1 }
    }

    fn expr(text: &str) -> AstExpr {
        AstExpr::new(text, sp())
    }

    struct AlwaysType(Dtype);
    impl DtypeResolver for AlwaysType {
        fn resolve(&mut self, _expr: &AstExpr) -> Result<Dtype, String> {
            Ok(self.0)
        }
    }

    fn prog(block: Vec<AstStmt>) -> AstProgram {
        AstProgram {
            name: Some("k".into()),
            dialect: crate::dtype::Dialect::Vector,
            fp_mode: crate::dtype::FpMode::Strict,
            params: vec!["x".into()],
            block,
        }
    }

    #[test]
    fn rejects_assign_to_parameter() {
        let ast = prog(vec![AstStmt::Assign {
            span: sp(),
            name: "x".into(),
            value: expr("1"),
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("parameter"));
    }

    #[test]
    fn rejects_duplicate_parameters() {
        let ast = prog(vec![]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(
            &ast,
            vec![("x".into(), Dtype::Int32), ("x".into(), Dtype::Int32)],
            &mut r,
        )
        .unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn rejects_expr_stmt() {
        let ast = prog(vec![AstStmt::ExprStmt {
            span: sp(),
            expr: expr("x"),
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("expression-statement"));
    }

    #[test]
    fn rejects_print_stmt() {
        let ast = prog(vec![AstStmt::PrintStmt {
            span: sp(),
            call_text: "print(x)".into(),
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("print-statement"));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let ast = prog(vec![AstStmt::Break {
            span: sp(),
            cond: None,
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("break"));
    }

    #[test]
    fn rejects_conditional_break() {
        let ast = prog(vec![AstStmt::For {
            span: sp(),
            var: "i".into(),
            limit: expr("4"),
            body: vec![AstStmt::Break {
                span: sp(),
                cond: Some(expr("i == 1")),
            }],
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("conditional"));
    }

    #[test]
    fn rejects_multi_arg_range() {
        let ast = prog(vec![AstStmt::For {
            span: sp(),
            var: "j".into(),
            limit: expr("1, 10, 2"),
            body: vec![],
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("multi-argument"));
    }

    #[test]
    fn rejects_loop_var_shadow() {
        let ast = prog(vec![AstStmt::For {
            span: sp(),
            var: "x".into(),
            limit: expr("4"),
            body: vec![],
        }]);
        let mut r = AlwaysType(Dtype::Int32);
        let err = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r).unwrap_err();
        assert!(err.message.contains("shadow"));
    }

    #[test]
    fn accepts_well_formed_program() {
        let ast = prog(vec![
            AstStmt::Assign {
                span: sp(),
                name: "acc".into(),
                value: expr("x"),
            },
            AstStmt::For {
                span: sp(),
                var: "i".into(),
                limit: expr("4"),
                body: vec![
                    AstStmt::Continue {
                        span: sp(),
                        cond: None,
                    },
                    AstStmt::Break {
                        span: sp(),
                        cond: None,
                    },
                ],
            },
            AstStmt::Return {
                span: sp(),
                value: expr("acc"),
            },
        ]);
        let mut r = AlwaysType(Dtype::Int32);
        let result = build(&ast, vec![("x".into(), Dtype::Int32)], &mut r);
        assert!(result.is_ok());
        let program = result.unwrap();
        assert_eq!(program.parameters.len(), 1);
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn top_level_comma_detection() {
        assert!(has_top_level_comma("1, 10"));
        assert!(!has_top_level_comma("f(1, 2)"));
        assert!(has_top_level_comma("f(1, 2), 3"));
        assert!(!has_top_level_comma("\"a,b\""));
    }
}
