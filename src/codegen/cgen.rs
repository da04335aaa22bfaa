//! The C code generator (§4.4): lowers a typed IR program into a single
//! re-entrant kernel function with the fixed ABI
//! `int <symbol>(const void **inputs, void *output, int64_t nitems)`.

use thiserror::Error;

use crate::dtype::Dtype;
use crate::ir::program::IrProgram;
use crate::ir::stmt::{collect_locals, Block, ElifArm, IrStmt, Pos};
use crate::rewrite::rewrite_logical_keywords;

use super::tokens::scan_forbidden;

pub const DEFAULT_SYMBOL: &str = "me_dsl_jit_kernel";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{line}:{column}: {message}")]
pub struct CodegenError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl CodegenError {
    fn at(pos: Pos, message: impl Into<String>) -> Self {
        CodegenError {
            line: pos.line,
            column: pos.column,
            message: message.into(),
        }
    }
}

/// Generator options (§4.4 input: "generator options").
#[derive(Debug, Clone)]
pub struct CodegenOptions<'a> {
    pub symbol_name: Option<&'a str>,
}

impl Default for CodegenOptions<'_> {
    fn default() -> Self {
        CodegenOptions { symbol_name: None }
    }
}

/// Generate the C source for `program`, targeting `output_dtype`.
pub fn generate(
    program: &IrProgram,
    output_dtype: Dtype,
    options: &CodegenOptions<'_>,
) -> Result<String, CodegenError> {
    check_return_agreement(&program.body, output_dtype)?;
    validate_tokens(&program.body)?;

    let symbol = options.symbol_name.unwrap_or(DEFAULT_SYMBOL);
    let locals = collect_locals(&program.body);

    let mut out = String::new();
    out.push_str("#include <stdint.h>\n#include <stdbool.h>\n#include <stddef.h>\n\n");
    out.push_str(&format!(
        "int {}(const void **inputs, void *output, int64_t nitems) {{\n",
        symbol
    ));
    out.push_str("    if (output == NULL || nitems < 0) return -1;\n");
    if !program.parameters.is_empty() {
        out.push_str("    if (inputs == NULL) return -1;\n");
    }
    out.push_str(&format!(
        "    {} *out = ({} *)output;\n",
        output_dtype.c_type(),
        output_dtype.c_type()
    ));
    for (k, p) in program.parameters.iter().enumerate() {
        out.push_str(&format!(
            "    const {} *in_{} = (const {} *)inputs[{}];\n",
            p.dtype.c_type(),
            p.name,
            p.dtype.c_type(),
            k
        ));
    }
    out.push('\n');
    out.push_str("    for (int64_t idx = 0; idx < nitems; idx++) {\n");
    for p in &program.parameters {
        out.push_str(&format!(
            "        {} {} = in_{}[idx];\n",
            p.dtype.c_type(),
            p.name,
            p.name
        ));
    }
    for (name, dtype) in &locals {
        out.push_str(&format!(
            "        {} {} = ({})0;\n",
            dtype.c_type(),
            name,
            dtype.c_type()
        ));
    }
    out.push_str(&format!(
        "        {} __me_out = ({})0;\n",
        output_dtype.c_type(),
        output_dtype.c_type()
    ));

    write_block(&mut out, &program.body, output_dtype, 2);

    out.push_str("        __me_return_idx: out[idx] = __me_out;\n");
    out.push_str("    }\n\n");
    out.push_str("    return 0;\n}\n");
    Ok(out)
}

fn check_return_agreement(body: &Block, output_dtype: Dtype) -> Result<(), CodegenError> {
    let mut returns = Vec::new();
    collect_returns(body, &mut returns);
    if returns.is_empty() {
        return Err(CodegenError::at(
            Pos::default(),
            "program body contains no return statement",
        ));
    }
    for (pos, dtype) in &returns {
        if *dtype != output_dtype {
            return Err(CodegenError::at(
                *pos,
                format!(
                    "return dtype {} does not match requested output dtype {}",
                    dtype, output_dtype
                ),
            ));
        }
    }
    Ok(())
}

fn collect_returns(block: &Block, out: &mut Vec<(Pos, Dtype)>) {
    for stmt in block {
        match stmt {
            IrStmt::Return { pos, value } => out.push((*pos, value.dtype)),
            IrStmt::If {
                then_block,
                elifs,
                else_block,
                ..
            } => {
                collect_returns(then_block, out);
                for arm in elifs {
                    collect_returns(&arm.block, out);
                }
                if let Some(else_block) = else_block {
                    collect_returns(else_block, out);
                }
            }
            IrStmt::For { body, .. } => collect_returns(body, out),
            IrStmt::Assign { .. } | IrStmt::Break { .. } | IrStmt::Continue { .. } => {}
        }
    }
}

fn validate_tokens(block: &Block) -> Result<(), CodegenError> {
    for stmt in block {
        match stmt {
            IrStmt::Assign { pos, value, .. } => check_expr(*pos, &value.text, value.dtype)?,
            IrStmt::Return { pos, value } => check_expr(*pos, &value.text, value.dtype)?,
            IrStmt::If {
                pos,
                cond,
                then_block,
                elifs,
                else_block,
            } => {
                check_expr(*pos, &cond.text, cond.dtype)?;
                validate_tokens(then_block)?;
                for arm in elifs {
                    check_expr(*pos, &arm.cond.text, arm.cond.dtype)?;
                    validate_tokens(&arm.block)?;
                }
                if let Some(else_block) = else_block {
                    validate_tokens(else_block)?;
                }
            }
            IrStmt::For { pos, limit, body, .. } => {
                check_expr(*pos, &limit.text, Dtype::Int64)?;
                validate_tokens(body)?;
            }
            IrStmt::Break { .. } | IrStmt::Continue { .. } => {}
        }
    }
    Ok(())
}

fn check_expr(pos: Pos, text: &str, dtype: Dtype) -> Result<(), CodegenError> {
    if let Some(tok) = scan_forbidden(text, dtype) {
        return Err(CodegenError::at(
            pos,
            format!("token `{}` is not representable in expression `{}`", tok.token, text),
        ));
    }
    Ok(())
}

fn write_block(out: &mut String, block: &Block, output_dtype: Dtype, depth: usize) {
    for stmt in block {
        write_stmt(out, stmt, output_dtype, depth);
    }
}

fn pad(depth: usize) -> String {
    "    ".repeat(depth)
}

fn write_stmt(out: &mut String, stmt: &IrStmt, output_dtype: Dtype, depth: usize) {
    let ind = pad(depth);
    match stmt {
        IrStmt::Assign { name, dtype, value, .. } => {
            out.push_str(&format!(
                "{}{} = ({})({});\n",
                ind,
                name,
                dtype.c_type(),
                rewrite_logical_keywords(&value.text)
            ));
        }
        IrStmt::Return { value, .. } => {
            out.push_str(&format!(
                "{}__me_out = ({})({});\n",
                ind,
                output_dtype.c_type(),
                rewrite_logical_keywords(&value.text)
            ));
            out.push_str(&format!("{}goto __me_return_idx;\n", ind));
        }
        IrStmt::If {
            cond,
            then_block,
            elifs,
            else_block,
            ..
        } => {
            out.push_str(&format!(
                "{}if ((({})({})) != ({})0) {{\n",
                ind,
                cond.dtype.c_type(),
                rewrite_logical_keywords(&cond.text),
                cond.dtype.c_type()
            ));
            write_block(out, then_block, output_dtype, depth + 1);
            out.push_str(&format!("{}}}\n", ind));
            for arm in elifs {
                write_elif(out, arm, output_dtype, depth);
            }
            if let Some(else_block) = else_block {
                out.push_str(&format!("{}else {{\n", ind));
                write_block(out, else_block, output_dtype, depth + 1);
                out.push_str(&format!("{}}}\n", ind));
            }
        }
        IrStmt::For { var, limit, body, .. } => {
            out.push_str(&format!(
                "{}{{\n{}    int64_t __me_limit = (int64_t)({});\n",
                ind,
                ind,
                rewrite_logical_keywords(&limit.text)
            ));
            out.push_str(&format!("{}    if (__me_limit > 0) {{\n", ind));
            out.push_str(&format!(
                "{}        for (int64_t {} = 0; {} < __me_limit; {}++) {{\n",
                ind, var, var, var
            ));
            write_block(out, body, output_dtype, depth + 3);
            out.push_str(&format!("{}        }}\n", ind));
            out.push_str(&format!("{}    }}\n", ind));
            out.push_str(&format!("{}}}\n", ind));
        }
        IrStmt::Break { .. } => out.push_str(&format!("{}break;\n", ind)),
        IrStmt::Continue { .. } => out.push_str(&format!("{}continue;\n", ind)),
    }
}

fn write_elif(out: &mut String, arm: &ElifArm, output_dtype: Dtype, depth: usize) {
    let ind = pad(depth);
    out.push_str(&format!(
        "{}else if ((({})({})) != ({})0) {{\n",
        ind,
        arm.cond.dtype.c_type(),
        rewrite_logical_keywords(&arm.cond.text),
        arm.cond.dtype.c_type()
    ));
    write_block(out, &arm.block, output_dtype, depth + 1);
    out.push_str(&format!("{}}}\n", ind));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{Dialect, FpMode};
    use crate::ir::expr::IrExpr;
    use crate::ir::program::Param;

    fn simple_return(text: &str, dtype: Dtype) -> IrProgram {
        IrProgram {
            name: "kernel".into(),
            dialect: Dialect::Vector,
            fp_mode: FpMode::Strict,
            parameters: vec![Param {
                name: "x".into(),
                dtype: Dtype::Int32,
            }],
            body: vec![IrStmt::Return {
                pos: Pos::new(1, 1),
                value: IrExpr::new(text, dtype),
            }],
        }
    }

    #[test]
    fn emits_expected_abi_signature() {
        let p = simple_return("x", Dtype::Int32);
        let src = generate(&p, Dtype::Int32, &CodegenOptions::default()).unwrap();
        assert!(src.contains("int me_dsl_jit_kernel(const void **inputs, void *output, int64_t nitems)"));
        assert!(src.contains("in_x[idx]"));
        assert!(src.contains("out[idx] = __me_out;"));
    }

    #[test]
    fn rejects_mismatched_return_dtype() {
        let p = simple_return("x", Dtype::Int32);
        let err = generate(&p, Dtype::Float64, &CodegenOptions::default()).unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn rejects_no_return() {
        let p = IrProgram {
            name: "kernel".into(),
            dialect: Dialect::Vector,
            fp_mode: FpMode::Strict,
            parameters: vec![],
            body: vec![],
        };
        let err = generate(&p, Dtype::Int32, &CodegenOptions::default()).unwrap_err();
        assert!(err.message.contains("no return"));
    }

    #[test]
    fn rejects_power_operator() {
        let p = simple_return("x ** 2", Dtype::Int32);
        let err = generate(&p, Dtype::Int32, &CodegenOptions::default()).unwrap_err();
        assert!(err.message.contains("**"));
    }

    #[test]
    fn rejects_modulo_on_float() {
        let p = simple_return("x", Dtype::Float64);
        let mut p = p;
        p.body = vec![IrStmt::Return {
            pos: Pos::new(1, 1),
            value: IrExpr::new("x % 2.0", Dtype::Float64),
        }];
        let err = generate(&p, Dtype::Float64, &CodegenOptions::default()).unwrap_err();
        assert!(err.message.contains("%"));
    }

    #[test]
    fn rewrites_logical_keywords_in_condition() {
        let p = IrProgram {
            name: "kernel".into(),
            dialect: Dialect::Vector,
            fp_mode: FpMode::Strict,
            parameters: vec![Param {
                name: "x".into(),
                dtype: Dtype::Bool,
            }],
            body: vec![IrStmt::If {
                pos: Pos::new(1, 1),
                cond: IrExpr::new("x and not x", Dtype::Bool),
                then_block: vec![IrStmt::Return {
                    pos: Pos::new(2, 1),
                    value: IrExpr::new("1", Dtype::Int32),
                }],
                elifs: vec![],
                else_block: Some(vec![IrStmt::Return {
                    pos: Pos::new(3, 1),
                    value: IrExpr::new("0", Dtype::Int32),
                }]),
            }],
        };
        let src = generate(&p, Dtype::Int32, &CodegenOptions::default()).unwrap();
        assert!(src.contains("x && !x"));
    }

    #[test]
    fn custom_symbol_name() {
        let p = simple_return("x", Dtype::Int32);
        let opts = CodegenOptions {
            symbol_name: Some("my_kernel"),
        };
        let src = generate(&p, Dtype::Int32, &opts).unwrap();
        assert!(src.contains("int my_kernel("));
    }
}
