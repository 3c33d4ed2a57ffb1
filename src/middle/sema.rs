//! The semantic analyzer.
//!
//! Validates an AST in place: it never rewrites or lowers anything, it only
//! accepts or rejects. A program that analyzes clean is guaranteed to carry
//! well-typed expressions and well-scoped names into the translator, which
//! is free to assume both without re-checking.

use derive_more::Display;

use crate::common::Id;
use crate::front::ast::*;

use super::symtab::{Scope, Symbol, SymbolKind};

#[derive(Debug, Display, PartialEq)]
pub enum SemaError {
    #[display("{_0} redeclared in the same scope")]
    Redeclared(Id),
    #[display("{_0} is not declared")]
    Undeclared(Id),
    #[display("expected type {expected}, found {found}")]
    TypeMismatch { expected: Type, found: Type },
    #[display("void may only be used as a function return type")]
    VoidMisuse,
    #[display("{_0} is an array and must be indexed")]
    ArrayWithoutIndex(Id),
    #[display("array index must be int, found {_0}")]
    ArrayIndexNotInt(Type),
    #[display("return used outside of a function body")]
    ReturnOutsideFunction,
    #[display("expected return type {expected}, found {found}")]
    ReturnTypeMismatch { expected: Type, found: Type },
    #[display("void function cannot return a value")]
    VoidReturnValue,
    #[display("{_0} is not a function")]
    CallToNonFunction(Id),
    #[display("{name} expects {expected} argument(s), found {found}")]
    ArgCountMismatch { name: Id, expected: usize, found: usize },
    #[display("{_0} is a built-in constant and cannot be assigned to")]
    ConstAssignment(Id),
}

impl std::error::Error for SemaError {}

pub struct Analyzer {
    scope: Scope,
    current_return_ty: Option<Type>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer { scope: Scope::new(), current_return_ty: None }
    }
}

pub fn analyze(program: &Program) -> Result<(), SemaError> {
    let mut analyzer = Analyzer::default();
    analyzer.analyze_program(program)
}

impl Analyzer {
    fn analyze_program(&mut self, program: &Program) -> Result<(), SemaError> {
        // Pre-pass: every function's signature is visible to every other
        // function (and to the top-level block) regardless of order.
        for item in &program.items {
            if let Item::Function(f) = item {
                self.declare_function(f)?;
            }
        }
        for item in &program.items {
            match item {
                Item::Function(f) => self.analyze_function(f)?,
                Item::Block(b) => self.analyze_block(b)?,
            }
        }
        Ok(())
    }

    fn declare_function(&mut self, f: &Function) -> Result<(), SemaError> {
        let params = f.params.iter().map(|p| p.ty).collect();
        let sym = Symbol {
            name: f.name,
            kind: SymbolKind::Function { params, ret: f.ret, is_builtin: false },
        };
        if !self.scope.declare(sym) {
            return Err(SemaError::Redeclared(f.name));
        }
        Ok(())
    }

    fn analyze_function(&mut self, f: &Function) -> Result<(), SemaError> {
        self.scope.push();
        for param in &f.params {
            if param.ty.base == BaseType::Void {
                return Err(SemaError::VoidMisuse);
            }
            let sym = Symbol { name: param.name, kind: SymbolKind::Variable { ty: param.ty } };
            if !self.scope.declare(sym) {
                return Err(SemaError::Redeclared(param.name));
            }
        }
        let prev_return = self.current_return_ty.replace(f.ret);
        let result = self.analyze_block(&f.body);
        self.current_return_ty = prev_return;
        self.scope.pop();
        result
    }

    fn analyze_block(&mut self, block: &Block) -> Result<(), SemaError> {
        self.scope.push();
        for stmt in &block.stmts {
            self.analyze_stmt(stmt)?;
        }
        self.scope.pop();
        Ok(())
    }

    fn analyze_stmt(&mut self, stmt: &Stmt) -> Result<(), SemaError> {
        match stmt {
            Stmt::VarDecl { name, ty, init, .. } => {
                if ty.base == BaseType::Void {
                    return Err(SemaError::VoidMisuse);
                }
                if let Some(expr) = init {
                    let found = self.infer_scalar_rhs(expr, *ty)?;
                    if found != *ty {
                        return Err(SemaError::TypeMismatch { expected: *ty, found });
                    }
                }
                let sym = Symbol { name: *name, kind: SymbolKind::Variable { ty: *ty } };
                if !self.scope.declare(sym) {
                    return Err(SemaError::Redeclared(*name));
                }
                Ok(())
            }
            Stmt::ArrayDecl { name, elem_ty, size, .. } => {
                if *elem_ty == BaseType::Void {
                    return Err(SemaError::VoidMisuse);
                }
                let sym = Symbol { name: *name, kind: SymbolKind::Array { elem_ty: *elem_ty, size: *size } };
                if !self.scope.declare(sym) {
                    return Err(SemaError::Redeclared(*name));
                }
                Ok(())
            }
            Stmt::Assign { target, value, .. } => self.analyze_assign(target, value),
            Stmt::If { cond, then_block, else_block, .. } => {
                self.expect_bool(cond)?;
                self.analyze_block(then_block)?;
                if let Some(else_block) = else_block {
                    self.analyze_block(else_block)?;
                }
                Ok(())
            }
            Stmt::While { cond, body, .. } => {
                self.expect_bool(cond)?;
                self.analyze_block(body)
            }
            Stmt::For { init, cond, update, body, .. } => {
                self.scope.push();
                if let Some(init) = init {
                    self.analyze_stmt(init)?;
                }
                self.expect_bool(cond)?;
                if let Some(update) = update {
                    self.analyze_stmt(update)?;
                }
                for s in &body.stmts {
                    self.analyze_stmt(s)?;
                }
                self.scope.pop();
                Ok(())
            }
            Stmt::Return(expr, _) => self.analyze_return(expr.as_ref()),
            Stmt::Exec { name, args, .. } => self.analyze_call(*name, args).map(|_| ()),
        }
    }

    fn analyze_assign(&mut self, target: &Target, value: &Expr) -> Result<(), SemaError> {
        match target {
            Target::Id(name) => {
                // A whole-array assignment (`a = [1, 2, 3];`) also parses as
                // `Target::Id`, so an array-kind symbol needs its own
                // expected type here rather than going through
                // `lookup_variable_type`, which exists for scalar reads and
                // rejects `Array` outright (spec.md §4.1: "if target is an
                // array name and value is an ArrayLiteral, require every
                // element to be a scalar whose base type equals the
                // array's").
                let expected = match self.scope.lookup(*name).map(|s| s.kind.clone()) {
                    Some(SymbolKind::Const { .. }) => return Err(SemaError::ConstAssignment(*name)),
                    Some(SymbolKind::Array { elem_ty, size }) => Type::array(elem_ty, size),
                    Some(SymbolKind::Variable { ty }) => ty,
                    Some(SymbolKind::Function { .. }) | None => return Err(SemaError::Undeclared(*name)),
                };
                let found = self.infer_rhs(value, expected)?;
                if found != expected {
                    return Err(SemaError::TypeMismatch { expected, found });
                }
                Ok(())
            }
            Target::IndexedId(name, index) => {
                let elem_ty = self.lookup_array_elem_type(*name)?;
                let index_ty = self.infer_expr(index)?;
                if index_ty.base != BaseType::Int || index_ty.is_array {
                    return Err(SemaError::ArrayIndexNotInt(index_ty));
                }
                let found = self.infer_expr(value)?;
                let expected = Type::scalar(elem_ty);
                if found != expected {
                    return Err(SemaError::TypeMismatch { expected, found });
                }
                Ok(())
            }
        }
    }

    /// A scalar declaration's right-hand side may legally be a one-element
    /// array literal (spec.md §4.1: "An initializer may legally be a
    /// one-element array literal; unwrap it and treat its single element
    /// as the scalar initializer"), mirroring `codegen::lower_scalar_rhs`.
    /// More than one element is a type mismatch against the declared
    /// scalar type, same as any other non-scalar initializer.
    fn infer_scalar_rhs(&mut self, expr: &Expr, expected: Type) -> Result<Type, SemaError> {
        if let Expr::ArrayLiteral(elems, _) = expr {
            if elems.len() == 1 {
                return self.infer_expr(&elems[0]);
            }
            let elem_base = match elems.first() {
                Some(e) => self.infer_expr(e)?.base,
                None => expected.base,
            };
            return Err(SemaError::TypeMismatch { expected, found: Type::array(elem_base, elems.len() as i64) });
        }
        self.infer_expr(expr)
    }

    /// The right-hand side of a declaration/assignment may be an array
    /// literal, which is only meaningful in context of the target's type
    /// (it has no standalone type of its own).
    fn infer_rhs(&mut self, value: &Expr, expected: Type) -> Result<Type, SemaError> {
        if let Expr::ArrayLiteral(elems, _) = value {
            if !expected.is_array {
                return Err(SemaError::TypeMismatch {
                    expected,
                    found: Type::array(expected.base, elems.len() as i64),
                });
            }
            for elem in elems {
                let found = self.infer_expr(elem)?;
                let want = Type::scalar(expected.base);
                if found != want {
                    return Err(SemaError::TypeMismatch { expected: want, found });
                }
            }
            return Ok(expected);
        }
        self.infer_expr(value)
    }

    fn analyze_return(&mut self, expr: Option<&Expr>) -> Result<(), SemaError> {
        let expected = self.current_return_ty.ok_or(SemaError::ReturnOutsideFunction)?;
        match (expected.base, expr) {
            (BaseType::Void, None) => Ok(()),
            (BaseType::Void, Some(_)) => Err(SemaError::VoidReturnValue),
            (_, None) => Err(SemaError::ReturnTypeMismatch { expected, found: Type::scalar(BaseType::Void) }),
            (_, Some(e)) => {
                let found = self.infer_expr(e)?;
                if found != expected {
                    return Err(SemaError::ReturnTypeMismatch { expected, found });
                }
                Ok(())
            }
        }
    }

    fn expect_bool(&mut self, expr: &Expr) -> Result<(), SemaError> {
        let found = self.infer_expr(expr)?;
        let expected = Type::scalar(BaseType::Bool);
        if found != expected {
            return Err(SemaError::TypeMismatch { expected, found });
        }
        Ok(())
    }

    fn lookup_variable_type(&self, name: Id) -> Result<Type, SemaError> {
        match self.scope.lookup(name) {
            Some(Symbol { kind: SymbolKind::Variable { ty }, .. }) => Ok(*ty),
            Some(Symbol { kind: SymbolKind::Const { ty, .. }, .. }) => Ok(*ty),
            Some(Symbol { kind: SymbolKind::Array { .. }, .. }) => Err(SemaError::ArrayWithoutIndex(name)),
            Some(Symbol { kind: SymbolKind::Function { .. }, .. }) => Err(SemaError::Undeclared(name)),
            None => Err(SemaError::Undeclared(name)),
        }
    }

    fn lookup_array_elem_type(&self, name: Id) -> Result<BaseType, SemaError> {
        match self.scope.lookup(name) {
            Some(Symbol { kind: SymbolKind::Array { elem_ty, .. }, .. }) => Ok(*elem_ty),
            Some(_) => Err(SemaError::Undeclared(name)),
            None => Err(SemaError::Undeclared(name)),
        }
    }

    fn analyze_call(&mut self, name: Id, args: &[Expr]) -> Result<Type, SemaError> {
        let (params, ret) = match self.scope.lookup(name) {
            Some(Symbol { kind: SymbolKind::Function { params, ret, .. }, .. }) => (params.clone(), *ret),
            Some(_) => return Err(SemaError::CallToNonFunction(name)),
            None => return Err(SemaError::Undeclared(name)),
        };
        if args.len() != params.len() {
            return Err(SemaError::ArgCountMismatch { name, expected: params.len(), found: args.len() });
        }
        for (arg, expected) in args.iter().zip(&params) {
            let found = self.infer_expr(arg)?;
            if found != *expected {
                return Err(SemaError::TypeMismatch { expected: *expected, found });
            }
        }
        Ok(ret)
    }

    fn infer_expr(&mut self, expr: &Expr) -> Result<Type, SemaError> {
        match expr {
            Expr::IntLit(..) => Ok(Type::scalar(BaseType::Int)),
            Expr::FloatLit(..) => Ok(Type::scalar(BaseType::Double)),
            Expr::CharLit(..) => Ok(Type::scalar(BaseType::Char)),
            Expr::BoolLit(..) => Ok(Type::scalar(BaseType::Bool)),
            Expr::ArrayLiteral(elems, _) => {
                // Only reachable for a literal used as a general sub-expression
                // (e.g. nested), which this language never needs: array
                // literals are only valid as a whole declaration/assignment
                // right-hand side, handled by `infer_rhs` before we get here.
                if elems.is_empty() {
                    return Err(SemaError::VoidMisuse);
                }
                let elem_ty = self.infer_expr(&elems[0])?;
                for e in &elems[1..] {
                    let found = self.infer_expr(e)?;
                    if found != elem_ty {
                        return Err(SemaError::TypeMismatch { expected: elem_ty, found });
                    }
                }
                Ok(Type::array(elem_ty.base, elems.len() as i64))
            }
            Expr::Id(name, _) => self.lookup_variable_type(*name),
            Expr::IndexedId(name, index, _) => {
                let elem_ty = self.lookup_array_elem_type(*name)?;
                let index_ty = self.infer_expr(index)?;
                if index_ty.base != BaseType::Int || index_ty.is_array {
                    return Err(SemaError::ArrayIndexNotInt(index_ty));
                }
                Ok(Type::scalar(elem_ty))
            }
            Expr::BinOp { op, lhs, rhs, .. } => self.infer_binop(*op, lhs, rhs),
            Expr::UnOp { op, operand, .. } => self.infer_unop(*op, operand),
            Expr::Exec { name, args, .. } => self.analyze_call(*name, args),
        }
    }

    fn infer_binop(&mut self, op: BOp, lhs: &Expr, rhs: &Expr) -> Result<Type, SemaError> {
        let lt = self.infer_expr(lhs)?;
        let rt = self.infer_expr(rhs)?;
        let bool_ty = Type::scalar(BaseType::Bool);
        match op {
            BOp::And | BOp::Or => {
                if lt != bool_ty {
                    return Err(SemaError::TypeMismatch { expected: bool_ty, found: lt });
                }
                if rt != bool_ty {
                    return Err(SemaError::TypeMismatch { expected: bool_ty, found: rt });
                }
                Ok(bool_ty)
            }
            BOp::Eq | BOp::Ne => {
                if lt != rt {
                    return Err(SemaError::TypeMismatch { expected: lt, found: rt });
                }
                if lt.is_array {
                    return Err(SemaError::ArrayWithoutIndex(match lhs {
                        Expr::Id(name, _) => *name,
                        _ => Id::new("<expr>".to_string()),
                    }));
                }
                Ok(bool_ty)
            }
            // Ordering comparisons are numeric-only (spec.md §4.1:
            // "LT, LE, GT, GE: numeric (INT or DOUBLE), operand base types
            // must match"), unlike EQ/NE which accept any matching base.
            BOp::Lt | BOp::Le | BOp::Gt | BOp::Ge => {
                if lt != rt {
                    return Err(SemaError::TypeMismatch { expected: lt, found: rt });
                }
                if lt.is_array {
                    return Err(SemaError::ArrayWithoutIndex(match lhs {
                        Expr::Id(name, _) => *name,
                        _ => Id::new("<expr>".to_string()),
                    }));
                }
                if lt.base != BaseType::Int && lt.base != BaseType::Double {
                    return Err(SemaError::TypeMismatch { expected: Type::scalar(BaseType::Int), found: lt });
                }
                Ok(bool_ty)
            }
            BOp::Add | BOp::Sub | BOp::Mul | BOp::Div | BOp::Mod => {
                if lt != rt {
                    return Err(SemaError::TypeMismatch { expected: lt, found: rt });
                }
                if lt.base != BaseType::Int && lt.base != BaseType::Double {
                    return Err(SemaError::TypeMismatch { expected: Type::scalar(BaseType::Int), found: lt });
                }
                if op == BOp::Mod && lt.base != BaseType::Int {
                    return Err(SemaError::TypeMismatch { expected: Type::scalar(BaseType::Int), found: lt });
                }
                Ok(lt)
            }
        }
    }

    fn infer_unop(&mut self, op: UOp, operand: &Expr) -> Result<Type, SemaError> {
        let ty = self.infer_expr(operand)?;
        match op {
            UOp::Not => {
                let bool_ty = Type::scalar(BaseType::Bool);
                if ty != bool_ty {
                    return Err(SemaError::TypeMismatch { expected: bool_ty, found: ty });
                }
                Ok(bool_ty)
            }
            UOp::Neg => {
                if ty.base != BaseType::Int && ty.base != BaseType::Double {
                    return Err(SemaError::TypeMismatch { expected: Type::scalar(BaseType::Int), found: ty });
                }
                Ok(ty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::front::parse::parse;

    fn check(src: &str) -> Result<(), SemaError> {
        let program = parse(src).unwrap();
        analyze(&program)
    }

    #[test]
    fn accepts_well_typed_program() {
        assert!(check("start int a = 1; int b = 2; int c = a + b; end").is_ok());
    }

    #[test]
    fn rejects_redeclaration() {
        let err = check("start int a = 1; int a = 2; end").unwrap_err();
        assert!(matches!(err, SemaError::Redeclared(_)));
    }

    #[test]
    fn rejects_undeclared_name() {
        let err = check("start int a = b; end").unwrap_err();
        assert!(matches!(err, SemaError::Undeclared(_)));
    }

    #[test]
    fn rejects_condition_type_mismatch() {
        let err = check("start if (1 + 2) start int z = 1; end end").unwrap_err();
        assert!(matches!(err, SemaError::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_array_used_without_index() {
        let err = check("start int a[3]; int b = a; end").unwrap_err();
        assert!(matches!(err, SemaError::ArrayWithoutIndex(_)));
    }

    #[test]
    fn rejects_return_outside_function() {
        let err = check("start return 1; end").unwrap_err();
        assert!(matches!(err, SemaError::ReturnOutsideFunction));
    }

    #[test]
    fn rejects_wrong_argument_count() {
        let err = check(
            "int add(int x, int y) start return x + y; end \
             start int r = exec add(1); end",
        )
        .unwrap_err();
        assert!(matches!(err, SemaError::ArgCountMismatch { .. }));
    }

    #[test]
    fn accepts_exec_of_builtin_with_pin_constants() {
        assert!(check("start exec pinMode(13, OUTPUT); exec digitalWrite(13, HIGH); end").is_ok());
    }

    #[test]
    fn rejects_assignment_to_a_builtin_constant() {
        let err = check("start int x = HIGH; HIGH = 0; end").unwrap_err();
        assert!(matches!(err, SemaError::ConstAssignment(_)));
    }

    #[test]
    fn accepts_one_element_array_literal_as_scalar_initializer() {
        assert!(check("start int x = [5]; end").is_ok());
    }

    #[test]
    fn rejects_multi_element_array_literal_as_scalar_initializer() {
        let err = check("start int x = [5, 6]; end").unwrap_err();
        assert!(matches!(err, SemaError::TypeMismatch { .. }));
    }

    #[test]
    fn accepts_whole_array_literal_assignment() {
        assert!(check("start int a[4]; a = [10, 20, 30, 40]; end").is_ok());
    }

    #[test]
    fn rejects_ordering_comparison_of_non_numeric_operands() {
        let err = check("start bool a = true; bool b = false; bool c = a < b; end").unwrap_err();
        assert!(matches!(err, SemaError::TypeMismatch { .. }));
    }

    #[test]
    fn accepts_equality_comparison_of_non_numeric_operands() {
        assert!(check("start bool a = true; bool b = false; bool c = a == b; end").is_ok());
    }

    #[test]
    fn accepts_mutual_function_visibility() {
        assert!(check(
            "int is_even(int n) start if (n == 0) start return 1; end return exec is_odd(n - 1); end \
             int is_odd(int n) start if (n == 0) start return 0; end return exec is_even(n - 1); end \
             start int r = exec is_even(4); end"
        )
        .is_ok());
    }
}
