//! The translator: lowers a semantically valid AST to the register
//! machine's bytecode.
//!
//! This is the densest module in the crate, so a design overview is worth
//! writing down once instead of scattering it across method doc comments.
//!
//! # Register and heap environments
//!
//! The translator never consults the semantic analyzer's symbol table — it
//! builds its own, per spec.md §2 ("the translator maintains its own
//! independent name→register and name→heap-address environments because
//! the register machine's addressing model is coarser than the source
//! scope structure"). Concretely: every declared scalar gets a register
//! from the LOW end (1, 2, 3, ... — register 0 is the reserved
//! accumulator), every array gets a byte range in a function-local heap,
//! and both environments are entirely reset at function boundaries. There
//! is no block-level scoping on the translator side: a variable declared
//! inside an `if` body keeps its register for the rest of the enclosing
//! function, exactly like the original C translator (`examples/
//! original_source/language/translator.c`), which has no notion of nested
//! scope at all.
//!
//! # Temporaries
//!
//! Intermediate expression values are given registers from the HIGH end
//! (7, 6, 5, ...), tracked by a single 8-bit "used" mask shared with named
//! variables. A temporary is released the moment the expression node that
//! introduced it is done with it — there is no cross-statement liveness
//! tracking beyond the usual stack discipline of recursive descent.
//!
//! # The two-instruction arithmetic idiom
//!
//! Every arithmetic/logical/NOT opcode leaves its result in the
//! accumulator `R[0]`; the translator follows it with `LOAD <dst>, R[0]`
//! to copy that result into the register it wants to keep using (usually
//! the left operand's own register, so a chain like `a + b + c` keeps
//! reusing `a`'s register without consuming extra temporaries). This
//! mirrors `translate_binary_arith`'s `emit_instruction(..., OP_LOAD, lhs.
//! reg, 0); /* copy R0 into lhs */` in the original C exactly.
//!
//! # Forward references between functions
//!
//! The original C translator resolves a `CALL` target only if the callee
//! was already translated earlier in program order (a single forward pass
//! that patches nothing): a function that calls one defined later in the
//! source fails to translate even though spec.md's semantic analyzer
//! explicitly pre-registers every top-level function so mutual references
//! type-check in either order. This translator closes that gap: function
//! signatures (name, parameter count) are pre-scanned before any code is
//! emitted, parameter registers are therefore known immediately (they are
//! always positional — the i-th parameter always lands in register i+1,
//! since every function resets its register environment the same way), and
//! a `CALL` to a not-yet-translated function is emitted with a placeholder
//! target and patched once every function has been translated — the same
//! "emit with a placeholder, patch later" discipline already used for
//! conditional and unconditional jumps. See `DESIGN.md` for why this is a
//! deliberate redesign rather than a transcription bug.

use crate::common::{Id, Map};
use crate::front::ast::*;
use crate::middle::symtab::{BUILTIN_CONSTANTS, BUILTIN_FUNCTIONS};

use super::asm::{BytecodeBuffer, Opcode};

use derive_more::Display;

/// Register file size: `R[0]` is the accumulator, `R[1..=7]` are general
/// purpose (spec.md §3's "eight registers with one reserved accumulator").
pub const NUM_REGISTERS: u8 = 8;

/// Hard cap on cumulative array storage across a single function's arrays,
/// per spec.md §3 ("the translator rejects a program whose cumulative
/// layout exceeds 256 bytes").
pub const MAX_HEAP_BYTES: u16 = 256;

#[derive(Debug, Display, PartialEq)]
pub enum TranslateError {
    #[display("register limit reached (max 7 user registers)")]
    RegisterLimitReached,
    #[display("too many variables for the translator's register file")]
    TooManyVariables,
    #[display("function {_0} has more parameters than available registers (max 7)")]
    TooManyParameters(Id),
    #[display("out of registers for temporaries")]
    OutOfRegisters,
    #[display("array size must be positive")]
    ArraySizeMustBePositive,
    #[display("array size exceeds supported limit (255 elements)")]
    ArrayTooLarge,
    #[display("array allocations exceed available heap address space (256 bytes)")]
    HeapExhausted,
    #[display("{_0} redeclared")]
    Redeclared(Id),
    #[display("use of undeclared variable {_0}")]
    UndeclaredVariable(Id),
    #[display("use of undeclared array {_0}")]
    UndeclaredArray(Id),
    #[display("call to unknown function {_0}")]
    UnknownFunction(Id),
    #[display("argument count mismatch calling {_0}")]
    ArgCountMismatch(Id),
    #[display("immediate {_0} out of supported range (0..=255)")]
    ImmediateOutOfRange(i64),
    #[display("array index must be a compile-time integer literal")]
    NonLiteralArrayIndex,
    #[display("array index out of bounds")]
    ArrayIndexOutOfBounds,
    #[display("array address exceeds the 8-bit immediate range")]
    ArrayAddressOutOfRange,
    #[display("array literal has more elements than the declared array")]
    ArrayLiteralTooLong,
    #[display("scalar initialization/assignment from an array literal requires exactly one element")]
    ScalarFromMultiElementArrayLiteral,
    #[display("return used outside of a function")]
    ReturnOutsideFunction,
    #[display("{_0}")]
    UnsupportedConstruct(String),
}

impl std::error::Error for TranslateError {}

/// The register (and possibly temp-ness) an expression's value ended up
/// in. `is_temp` tells the caller whether it owns this register and must
/// release it once done, or whether it's a named variable's permanent
/// register that must be left alone.
#[derive(Clone, Copy)]
struct RegVal {
    reg: u8,
    is_temp: bool,
}

#[derive(Clone, Copy)]
struct ArrayBinding {
    base: u16,
    length: u16,
}

#[derive(Clone)]
struct FunctionEntry {
    param_regs: Vec<u8>,
    start_offset: Option<u16>,
}

/// Lowers a whole, semantically valid `Program` to a byte-identical-across-
/// runs bytecode stream (spec.md §4.2: "Deterministic: the same input
/// yields byte-identical output").
pub fn translate(program: &Program) -> Result<Vec<u8>, TranslateError> {
    let mut cg = Codegen::new();
    cg.prescan_functions(program)?;

    let has_functions = !cg.functions.is_empty();
    let jmp_to_main = has_functions.then(|| cg.code.emit_placeholder_jump(Opcode::Jmp));

    for item in &program.items {
        if let Item::Function(f) = item {
            cg.translate_function(f)?;
        }
    }
    cg.patch_pending_calls()?;

    if let Some(pos) = jmp_to_main {
        let main_addr = cg.code.here();
        cg.code.patch_address(pos, main_addr);
    }

    cg.reset_function_scope();
    for item in &program.items {
        if let Item::Block(b) = item {
            cg.lower_block(b)?;
        }
    }

    cg.code.emit(Opcode::Halt, 0, 0);
    Ok(cg.code.data)
}

struct Codegen {
    code: BytecodeBuffer,
    vars: Map<Id, u8>,
    next_var_reg: u8,
    used_regs_mask: u8,
    arrays: Map<Id, ArrayBinding>,
    heap_top: u16,
    functions: Map<Id, FunctionEntry>,
    pending_calls: Vec<(usize, Id)>,
    in_function: bool,
}

impl Codegen {
    fn new() -> Self {
        Codegen {
            code: BytecodeBuffer::new(),
            vars: Map::new(),
            next_var_reg: 1,
            used_regs_mask: 1, // R0 is always considered used (the accumulator)
            arrays: Map::new(),
            heap_top: 0,
            functions: Map::new(),
            pending_calls: vec![],
            in_function: false,
        }
    }

    fn reset_function_scope(&mut self) {
        self.vars.clear();
        self.arrays.clear();
        self.next_var_reg = 1;
        self.used_regs_mask = 1;
        self.heap_top = 0;
    }

    // ---- function table -------------------------------------------------

    fn prescan_functions(&mut self, program: &Program) -> Result<(), TranslateError> {
        for item in &program.items {
            let Item::Function(f) = item else { continue };
            if self.functions.contains_key(&f.name) {
                return Err(TranslateError::Redeclared(f.name));
            }
            if f.ret.base == BaseType::Double || f.params.iter().any(|p| p.ty.base == BaseType::Double) {
                return Err(TranslateError::UnsupportedConstruct(
                    "double arithmetic is not lowerable by the register-machine backend".to_string(),
                ));
            }
            if f.params.len() > NUM_REGISTERS as usize - 1 {
                return Err(TranslateError::TooManyParameters(f.name));
            }
            let param_regs = (1..=f.params.len() as u8).collect();
            self.functions.insert(f.name, FunctionEntry { param_regs, start_offset: None });
        }
        Ok(())
    }

    fn patch_pending_calls(&mut self) -> Result<(), TranslateError> {
        for (offset, name) in std::mem::take(&mut self.pending_calls) {
            let target = self
                .functions
                .get(&name)
                .and_then(|f| f.start_offset)
                .ok_or(TranslateError::UnknownFunction(name))?;
            self.code.patch_address(offset, target);
        }
        Ok(())
    }

    fn translate_function(&mut self, f: &Function) -> Result<(), TranslateError> {
        self.reset_function_scope();
        let start_offset = self.code.here();
        self.functions.get_mut(&f.name).expect("pre-scanned above").start_offset = Some(start_offset);

        for param in &f.params {
            self.register_var(param.name)?;
        }

        let was_in_function = self.in_function;
        self.in_function = true;
        self.lower_block(&f.body)?;
        self.in_function = was_in_function;

        self.ensure_trailing_ret();
        Ok(())
    }

    fn ensure_trailing_ret(&mut self) {
        let data = &self.code.data;
        let ends_in_ret = data.len() >= 3 && data[data.len() - 3] == Opcode::Ret.byte();
        if !ends_in_ret {
            self.code.emit(Opcode::Ret, 0, 0);
        }
    }

    // ---- register/array allocation ---------------------------------------

    fn register_var(&mut self, name: Id) -> Result<u8, TranslateError> {
        if self.vars.contains_key(&name) {
            return Err(TranslateError::Redeclared(name));
        }
        if self.vars.len() >= NUM_REGISTERS as usize - 1 {
            return Err(TranslateError::TooManyVariables);
        }
        if self.used_regs_mask & (1 << self.next_var_reg) != 0 {
            return Err(TranslateError::RegisterLimitReached);
        }
        let reg = self.next_var_reg;
        self.used_regs_mask |= 1 << reg;
        self.next_var_reg += 1;
        self.vars.insert(name, reg);
        Ok(reg)
    }

    fn register_array(&mut self, name: Id, elem_ty: BaseType, size: i64) -> Result<(), TranslateError> {
        if elem_ty == BaseType::Double {
            return Err(TranslateError::UnsupportedConstruct(
                "double arithmetic is not lowerable by the register-machine backend".to_string(),
            ));
        }
        if size <= 0 {
            return Err(TranslateError::ArraySizeMustBePositive);
        }
        if size > 255 {
            return Err(TranslateError::ArrayTooLarge);
        }
        if self.vars.contains_key(&name) || self.arrays.contains_key(&name) {
            return Err(TranslateError::Redeclared(name));
        }
        if self.heap_top as i64 + size > MAX_HEAP_BYTES as i64 {
            return Err(TranslateError::HeapExhausted);
        }
        let base = self.heap_top;
        self.heap_top += size as u16;
        self.arrays.insert(name, ArrayBinding { base, length: size as u16 });
        Ok(())
    }

    fn alloc_temp(&mut self) -> Result<u8, TranslateError> {
        for reg in (0..NUM_REGISTERS).rev() {
            if self.used_regs_mask & (1 << reg) == 0 {
                self.used_regs_mask |= 1 << reg;
                return Ok(reg);
            }
        }
        Err(TranslateError::OutOfRegisters)
    }

    fn release_temp(&mut self, reg: u8) {
        self.used_regs_mask &= !(1 << reg);
    }

    fn release_if_temp(&mut self, v: RegVal) {
        if v.is_temp {
            self.release_temp(v.reg);
        }
    }

    // ---- emission helpers -------------------------------------------------

    fn emit_move(&mut self, dst: u8, src: u8) {
        if dst != src {
            self.code.emit(Opcode::Load, dst, src);
        }
    }

    fn emit_load_const(&mut self, dst: u8, value: i64) -> Result<(), TranslateError> {
        if !(0..=255).contains(&value) {
            return Err(TranslateError::ImmediateOutOfRange(value));
        }
        self.code.emit(Opcode::LoadI, dst, value as u8);
        Ok(())
    }

    fn load_const_temp(&mut self, value: i64) -> Result<RegVal, TranslateError> {
        let reg = self.alloc_temp()?;
        self.emit_load_const(reg, value)?;
        Ok(RegVal { reg, is_temp: true })
    }

    fn emit_abs_jump(&mut self, op: Opcode, target: u16) {
        let [lo, hi] = target.to_le_bytes();
        self.code.emit(op, lo, hi);
    }

    /// `CMP reg, 0` followed by a placeholder `JZ`, used by every
    /// structured control-flow construct to branch past its body when the
    /// condition register holds zero (false).
    fn emit_jump_if_zero(&mut self, reg: u8) -> Result<usize, TranslateError> {
        let zero = self.alloc_temp()?;
        self.emit_load_const(zero, 0)?;
        self.code.emit(Opcode::Cmp, reg, zero);
        self.release_temp(zero);
        Ok(self.code.emit_placeholder_jump(Opcode::Jz))
    }

    // ---- statements ---------------------------------------------------------

    fn lower_block(&mut self, block: &Block) -> Result<(), TranslateError> {
        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), TranslateError> {
        match stmt {
            Stmt::VarDecl { name, ty, init, .. } => self.lower_var_decl(*name, *ty, init.as_ref()),
            Stmt::ArrayDecl { name, elem_ty, size, .. } => self.register_array(*name, *elem_ty, *size),
            Stmt::Assign { target, value, .. } => self.lower_assign(target, value),
            Stmt::If { cond, then_block, else_block, .. } => self.lower_if(cond, then_block, else_block.as_ref()),
            Stmt::While { cond, body, .. } => self.lower_while(cond, body),
            Stmt::For { init, cond, update, body, .. } => {
                self.lower_for(init.as_deref(), cond, update.as_deref(), body)
            }
            Stmt::Return(expr, _) => self.lower_return(expr.as_ref()),
            Stmt::Exec { name, args, .. } => self.translate_call(*name, args).map(|_| ()),
        }
    }

    fn lower_var_decl(&mut self, name: Id, ty: Type, init: Option<&Expr>) -> Result<(), TranslateError> {
        if ty.base == BaseType::Double {
            return Err(TranslateError::UnsupportedConstruct(
                "double arithmetic is not lowerable by the register-machine backend".to_string(),
            ));
        }
        let reg = self.register_var(name)?;
        match init {
            None => self.emit_load_const(reg, 0)?,
            Some(expr) => {
                let value = self.lower_scalar_rhs(expr)?;
                self.emit_move(reg, value.reg);
                self.release_if_temp(value);
            }
        }
        Ok(())
    }

    /// A scalar declaration/assignment's right-hand side may legally be a
    /// one-element array literal (spec.md §4.1: "An initializer may
    /// legally be a one-element array literal; unwrap it"). Anything else
    /// goes through ordinary expression lowering.
    fn lower_scalar_rhs(&mut self, expr: &Expr) -> Result<RegVal, TranslateError> {
        if let Expr::ArrayLiteral(elems, _) = expr {
            if elems.len() != 1 {
                return Err(TranslateError::ScalarFromMultiElementArrayLiteral);
            }
            return self.lower_expr(&elems[0]);
        }
        self.lower_expr(expr)
    }

    fn lower_assign(&mut self, target: &Target, value: &Expr) -> Result<(), TranslateError> {
        match target {
            Target::Id(name) => {
                if let Some(&reg) = self.vars.get(name) {
                    let v = self.lower_scalar_rhs(value)?;
                    self.emit_move(reg, v.reg);
                    self.release_if_temp(v);
                    Ok(())
                } else if self.arrays.contains_key(name) {
                    self.lower_array_assignment(*name, value)
                } else {
                    Err(TranslateError::UndeclaredVariable(*name))
                }
            }
            Target::IndexedId(name, index) => {
                let binding = *self.arrays.get(name).ok_or(TranslateError::UndeclaredArray(*name))?;
                let addr = self.literal_array_address(binding, index)?;
                let value = self.lower_expr(value)?;
                let addr_reg = self.alloc_temp()?;
                self.emit_load_const(addr_reg, addr as i64)?;
                self.code.emit(Opcode::Store, addr_reg, value.reg);
                self.release_temp(addr_reg);
                self.release_if_temp(value);
                Ok(())
            }
        }
    }

    fn lower_array_assignment(&mut self, name: Id, value: &Expr) -> Result<(), TranslateError> {
        let binding = *self.arrays.get(&name).expect("checked by caller");
        let Expr::ArrayLiteral(elems, _) = value else {
            return Err(TranslateError::UnsupportedConstruct(
                "arrays can only be assigned from an array literal".to_string(),
            ));
        };
        if elems.len() as u16 > binding.length {
            return Err(TranslateError::ArrayLiteralTooLong);
        }
        for (i, elem) in elems.iter().enumerate() {
            let value = self.lower_expr(elem)?;
            self.store_array_element(binding, i as u16, value.reg)?;
            self.release_if_temp(value);
        }
        if (elems.len() as u16) < binding.length {
            let zero = self.alloc_temp()?;
            self.emit_load_const(zero, 0)?;
            for i in elems.len() as u16..binding.length {
                self.store_array_element(binding, i, zero)?;
            }
            self.release_temp(zero);
        }
        Ok(())
    }

    fn store_array_element(&mut self, binding: ArrayBinding, index: u16, value_reg: u8) -> Result<(), TranslateError> {
        let addr = binding.base + index;
        let addr_reg = self.alloc_temp()?;
        self.emit_load_const(addr_reg, addr as i64)?;
        self.code.emit(Opcode::Store, addr_reg, value_reg);
        self.release_temp(addr_reg);
        Ok(())
    }

    /// Resolves `name[index]` to an absolute heap address, requiring
    /// `index` to be a compile-time integer literal (spec.md §4.2: "Only
    /// compile-time integer literal indices are supported").
    fn literal_array_address(&mut self, binding: ArrayBinding, index: &Expr) -> Result<u16, TranslateError> {
        let Expr::IntLit(i, _) = index else {
            return Err(TranslateError::NonLiteralArrayIndex);
        };
        if *i < 0 || *i as u16 >= binding.length {
            return Err(TranslateError::ArrayIndexOutOfBounds);
        }
        let absolute = binding.base + *i as u16;
        if absolute > 255 {
            return Err(TranslateError::ArrayAddressOutOfRange);
        }
        Ok(absolute)
    }

    fn lower_if(&mut self, cond: &Expr, then_block: &Block, else_block: Option<&Block>) -> Result<(), TranslateError> {
        let cond_val = self.lower_expr(cond)?;
        let jump_false = self.emit_jump_if_zero(cond_val.reg)?;
        self.release_if_temp(cond_val);

        self.lower_block(then_block)?;

        let jump_end = else_block.map(|_| self.code.emit_placeholder_jump(Opcode::Jmp));
        let false_addr = self.code.here();
        self.code.patch_address(jump_false, false_addr);

        if let Some(else_block) = else_block {
            self.lower_block(else_block)?;
            let end_addr = self.code.here();
            self.code.patch_address(jump_end.expect("set above"), end_addr);
        }
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &Block) -> Result<(), TranslateError> {
        let loop_start = self.code.here();
        let cond_val = self.lower_expr(cond)?;
        let exit_jump = self.emit_jump_if_zero(cond_val.reg)?;
        self.release_if_temp(cond_val);

        self.lower_block(body)?;
        self.emit_abs_jump(Opcode::Jmp, loop_start);

        let exit_addr = self.code.here();
        self.code.patch_address(exit_jump, exit_addr);
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: &Expr,
        update: Option<&Stmt>,
        body: &Block,
    ) -> Result<(), TranslateError> {
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }
        let loop_start = self.code.here();
        let cond_val = self.lower_expr(cond)?;
        let exit_jump = self.emit_jump_if_zero(cond_val.reg)?;
        self.release_if_temp(cond_val);

        self.lower_block(body)?;
        if let Some(update) = update {
            self.lower_stmt(update)?;
        }
        self.emit_abs_jump(Opcode::Jmp, loop_start);

        let exit_addr = self.code.here();
        self.code.patch_address(exit_jump, exit_addr);
        Ok(())
    }

    fn lower_return(&mut self, expr: Option<&Expr>) -> Result<(), TranslateError> {
        if !self.in_function {
            return Err(TranslateError::ReturnOutsideFunction);
        }
        match expr {
            Some(expr) => {
                let value = self.lower_expr(expr)?;
                self.emit_move(0, value.reg);
                self.release_if_temp(value);
            }
            None => self.emit_load_const(0, 0)?,
        }
        self.code.emit(Opcode::Ret, 0, 0);
        Ok(())
    }

    // ---- expressions ----------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> Result<RegVal, TranslateError> {
        match expr {
            Expr::IntLit(v, _) => self.load_const_temp(*v),
            Expr::FloatLit(..) => Err(TranslateError::UnsupportedConstruct(
                "double arithmetic is not lowerable by the register-machine backend".to_string(),
            )),
            Expr::CharLit(b, _) => self.load_const_temp(*b as i64),
            Expr::BoolLit(b, _) => self.load_const_temp(if *b { 1 } else { 0 }),
            Expr::ArrayLiteral(..) => Err(TranslateError::UnsupportedConstruct(
                "an array literal is only valid as a declaration or assignment right-hand side".to_string(),
            )),
            Expr::Id(name, _) => self.lower_id(*name),
            Expr::IndexedId(name, index, _) => self.lower_indexed_read(*name, index),
            Expr::BinOp { op, lhs, rhs, .. } => self.lower_binop(*op, lhs, rhs),
            Expr::UnOp { op, operand, .. } => self.lower_unop(*op, operand),
            Expr::Exec { name, args, .. } => {
                self.translate_call(*name, args)?;
                // Copy the call's result out of the accumulator into an
                // owned temporary right away: R[0] is clobbered by the
                // very next call (e.g. the other operand of a binary
                // expression that also calls a function), so nothing
                // downstream may assume it survives past this point.
                let dst = self.alloc_temp()?;
                self.emit_move(dst, 0);
                Ok(RegVal { reg: dst, is_temp: true })
            }
        }
    }

    fn lower_id(&mut self, name: Id) -> Result<RegVal, TranslateError> {
        if let Some(&reg) = self.vars.get(&name) {
            return Ok(RegVal { reg, is_temp: false });
        }
        if self.arrays.contains_key(&name) {
            return Err(TranslateError::UnsupportedConstruct(format!(
                "{name} is an array and must be indexed"
            )));
        }
        if let Some((_, value)) = BUILTIN_CONSTANTS.iter().find(|(n, _)| name.as_str() == *n) {
            return self.load_const_temp(*value);
        }
        Err(TranslateError::UndeclaredVariable(name))
    }

    fn lower_indexed_read(&mut self, name: Id, index: &Expr) -> Result<RegVal, TranslateError> {
        let binding = *self.arrays.get(&name).ok_or(TranslateError::UndeclaredArray(name))?;
        let addr = self.literal_array_address(binding, index)?;
        let addr_reg = self.alloc_temp()?;
        self.emit_load_const(addr_reg, addr as i64)?;
        let dst = self.alloc_temp()?;
        self.code.emit(Opcode::LoadM, dst, addr_reg);
        self.release_temp(addr_reg);
        Ok(RegVal { reg: dst, is_temp: true })
    }

    fn lower_binop(&mut self, op: BOp, lhs: &Expr, rhs: &Expr) -> Result<RegVal, TranslateError> {
        match op {
            BOp::Add => self.lower_arith(Opcode::Add, lhs, rhs),
            BOp::Sub => self.lower_arith(Opcode::Sub, lhs, rhs),
            BOp::Mul => self.lower_arith(Opcode::Mul, lhs, rhs),
            BOp::Div => self.lower_arith(Opcode::Div, lhs, rhs),
            BOp::Mod => self.lower_arith(Opcode::Mod, lhs, rhs),
            // Strict/eager: both operands are always evaluated, no
            // branch-around-rhs (spec.md §9's resolved "Boolean
            // short-circuit" open question — see SPEC_FULL.md).
            BOp::And => self.lower_arith(Opcode::And, lhs, rhs),
            BOp::Or => self.lower_arith(Opcode::Or, lhs, rhs),
            BOp::Eq => self.lower_cmp(Opcode::Jz, lhs, rhs),
            BOp::Ne => self.lower_cmp(Opcode::Jnz, lhs, rhs),
            BOp::Lt => self.lower_cmp(Opcode::Jlt, lhs, rhs),
            BOp::Le => self.lower_cmp(Opcode::Jle, lhs, rhs),
            BOp::Gt => self.lower_cmp(Opcode::Jgt, lhs, rhs),
            BOp::Ge => self.lower_cmp(Opcode::Jge, lhs, rhs),
        }
    }

    /// The shared idiom for every non-comparison binary operator: lower
    /// both sides, emit the op (its result lands in `R[0]`), then copy
    /// `R[0]` back into a register the caller owns and reuse that
    /// register as the result.
    ///
    /// The destination is the left operand's own register ONLY when that
    /// register is already a temporary this expression owns (the chain
    /// `a + b + c` keeps reusing the `a + b` temp without consuming extra
    /// registers, exactly as the module doc above describes). When the
    /// left operand is a named variable or parameter, its register is
    /// copied into a fresh temp first: a named register is a live binding
    /// other statements still read, and spec.md §8's worked examples
    /// (e.g. `int c = a + b;` leaving `a` and `b` unchanged) require that
    /// evaluating an expression never mutates the variables it reads.
    fn lower_arith(&mut self, op: Opcode, lhs: &Expr, rhs: &Expr) -> Result<RegVal, TranslateError> {
        let lhs = self.lower_expr(lhs)?;
        let rhs = self.lower_expr(rhs)?;
        let dst = self.temp_dest_for(lhs)?;
        self.code.emit(op, dst, rhs.reg);
        self.code.emit(Opcode::Load, dst, 0);
        self.release_if_temp(rhs);
        Ok(RegVal { reg: dst, is_temp: true })
    }

    /// Returns a register this expression owns and may freely overwrite:
    /// `v`'s own register if it's already a temp, or a fresh temp loaded
    /// with `v`'s value otherwise (see `lower_arith`'s doc comment).
    fn temp_dest_for(&mut self, v: RegVal) -> Result<u8, TranslateError> {
        if v.is_temp {
            return Ok(v.reg);
        }
        let dst = self.alloc_temp()?;
        self.emit_move(dst, v.reg);
        Ok(dst)
    }

    /// `CMP`, then a forward conditional branch of the requested kind:
    /// `LOADI dst, 0`, an unconditional skip to the end, the true-branch
    /// target's `LOADI dst, 1`, patching both jumps once the end is known
    /// (spec.md §4.2's documented comparison idiom).
    fn lower_cmp(&mut self, jump_if_true: Opcode, lhs: &Expr, rhs: &Expr) -> Result<RegVal, TranslateError> {
        let lhs = self.lower_expr(lhs)?;
        let rhs = self.lower_expr(rhs)?;
        let dst = self.alloc_temp()?;

        self.code.emit(Opcode::Cmp, lhs.reg, rhs.reg);
        let jump_true = self.code.emit_placeholder_jump(jump_if_true);
        self.emit_load_const(dst, 0)?;
        let jump_end = self.code.emit_placeholder_jump(Opcode::Jmp);
        let true_addr = self.code.here();
        self.code.patch_address(jump_true, true_addr);
        self.emit_load_const(dst, 1)?;
        let end_addr = self.code.here();
        self.code.patch_address(jump_end, end_addr);

        self.release_if_temp(rhs);
        self.release_if_temp(lhs);
        Ok(RegVal { reg: dst, is_temp: true })
    }

    fn lower_unop(&mut self, op: UOp, operand: &Expr) -> Result<RegVal, TranslateError> {
        match op {
            UOp::Not => {
                let v = self.lower_expr(operand)?;
                let dst = self.temp_dest_for(v)?;
                // Operands are always `Bool` (0 or 1) here, so the result
                // is computed as canonical 0/1 rather than a raw bitwise
                // complement of the whole word — see DESIGN.md.
                self.code.emit(Opcode::Not, dst, 0);
                self.code.emit(Opcode::Load, dst, 0);
                Ok(RegVal { reg: dst, is_temp: true })
            }
            UOp::Neg => {
                let v = self.lower_expr(operand)?;
                let dst = self.temp_dest_for(v)?;
                let zero = self.alloc_temp()?;
                self.emit_load_const(zero, 0)?;
                self.code.emit(Opcode::Sub, zero, dst);
                self.code.emit(Opcode::Load, dst, 0);
                self.release_temp(zero);
                Ok(RegVal { reg: dst, is_temp: true })
            }
        }
    }

    // ---- calls ------------------------------------------------------------

    /// Lowers a call's arguments and caller-saves-all ABI; the callee's
    /// return value, if any, is left in `R[0]` by its `RETURN`/auto-`RET`.
    fn translate_call(&mut self, name: Id, args: &[Expr]) -> Result<(), TranslateError> {
        if BUILTIN_FUNCTIONS.iter().any(|(n, _, _)| name.as_str() == *n) {
            return Err(TranslateError::UnsupportedConstruct(format!(
                "exec of builtin `{name}` has no register-machine opcode; only user-defined functions lower"
            )));
        }
        let entry = self.functions.get(&name).ok_or(TranslateError::UnknownFunction(name))?.clone();
        if args.len() != entry.param_regs.len() {
            return Err(TranslateError::ArgCountMismatch(name));
        }

        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
            arg_vals.push(self.lower_expr(arg)?);
        }

        for reg in 1..NUM_REGISTERS {
            self.code.emit(Opcode::Push, reg, 0);
        }
        for (&dst, value) in entry.param_regs.iter().zip(&arg_vals) {
            self.emit_move(dst, value.reg);
        }
        for value in arg_vals {
            self.release_if_temp(value);
        }

        match entry.start_offset {
            Some(offset) => self.emit_abs_jump(Opcode::Call, offset),
            None => {
                let pos = self.code.emit_placeholder_jump(Opcode::Call);
                self.pending_calls.push((pos, name));
            }
        }
        for reg in (1..NUM_REGISTERS).rev() {
            self.code.emit(Opcode::Pop, reg, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::asm::disassemble;
    use crate::front::parse::parse;

    fn compile(src: &str) -> Vec<u8> {
        let program = parse(src).unwrap();
        crate::middle::analyze(&program).unwrap();
        translate(&program).unwrap()
    }

    #[test]
    fn addition_program_ends_in_halt() {
        let code = compile("start int a = 10; int b = 20; int c = a + b; end");
        assert_eq!(code.len() % 3, 0);
        assert_eq!(&code[code.len() - 3..], &[Opcode::Halt.byte(), 0, 0]);
    }

    #[test]
    fn function_body_ends_in_ret() {
        let code = compile(
            "int add(int x, int y) start return x + y; end \
             start int r = exec add(7, 8); end",
        );
        let text = disassemble(&code);
        assert!(text.contains("RET"));
    }

    #[test]
    fn array_of_256_is_rejected_but_255_succeeds() {
        let program = parse("start int a[256]; end").unwrap();
        let err = translate(&program).unwrap_err();
        assert_eq!(err, TranslateError::ArrayTooLarge);

        let program = parse("start int a[255]; end").unwrap();
        assert!(translate(&program).is_ok());
    }

    #[test]
    fn eight_parameters_is_rejected() {
        let src = "int f(int a, int b, int c, int d, int e, int g, int h, int i) start return a; end \
                   start int r = exec f(1,2,3,4,5,6,7,8); end";
        let program = parse(src).unwrap();
        assert_eq!(translate(&program).unwrap_err(), TranslateError::TooManyParameters(Id::new("f".to_string())));
    }

    #[test]
    fn immediate_of_256_is_a_translation_error_not_a_runtime_wrap() {
        // Not directly expressible as a literal > 255 through the parser's
        // grammar path that reaches a register, so this is exercised via
        // array indexing/heap addresses elsewhere; arithmetic results are
        // always held in registers, never re-encoded as immediates, so the
        // `ImmediateOutOfRange` path is reached only for literal constants.
        let program = parse("start int a = 256; end").unwrap();
        assert_eq!(translate(&program).unwrap_err(), TranslateError::ImmediateOutOfRange(256));
    }

    #[test]
    fn exec_of_a_builtin_is_an_unsupported_construct() {
        let program = parse("start exec pinMode(13, OUTPUT); end").unwrap();
        assert!(matches!(translate(&program).unwrap_err(), TranslateError::UnsupportedConstruct(_)));
    }

    #[test]
    fn mutually_recursive_functions_translate() {
        let src = "int is_even(int n) start if (n == 0) start return 1; end return exec is_odd(n - 1); end \
                   int is_odd(int n) start if (n == 0) start return 0; end return exec is_even(n - 1); end \
                   start int r = exec is_even(4); end";
        let program = parse(src).unwrap();
        assert!(translate(&program).is_ok());
    }

    #[test]
    fn translating_twice_is_byte_identical() {
        let src = "start int a = 1; while (a < 10) start a = a + 1; end end";
        let program = parse(src).unwrap();
        let first = translate(&program).unwrap();
        let second = translate(&program).unwrap();
        assert_eq!(first, second);
    }
}
