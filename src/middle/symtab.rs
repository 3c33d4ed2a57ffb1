//! The symbol table.
//!
//! A chain of scopes, innermost first, each a map from name to symbol. This
//! mirrors a textbook scope-chain rather than a single flat table: entering a
//! block pushes a frame, leaving it pops one, and lookup walks outward until
//! it finds a binding or runs out of frames.

use crate::common::{Id, Map};
pub use crate::front::ast::{BaseType, Type};

/// What kind of thing a name is bound to.
#[derive(Clone, Debug, PartialEq)]
pub enum SymbolKind {
    Variable { ty: Type },
    Array { elem_ty: BaseType, size: i64 },
    Function { params: Vec<Type>, ret: Type, is_builtin: bool },
    /// A compile-time integer constant (the Arduino `INPUT`/`OUTPUT`/`HIGH`/
    /// `LOW` style `#define`s): has a type for the analyzer but no register,
    /// since the translator substitutes its value directly as an immediate.
    Const { ty: Type, value: i64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    pub name: Id,
    pub kind: SymbolKind,
}

impl Symbol {
    /// The type a use of this symbol as a value expression would carry.
    /// Functions have no value type of their own; callers ask for `ret`.
    pub fn value_type(&self) -> Option<Type> {
        match &self.kind {
            SymbolKind::Variable { ty } => Some(*ty),
            SymbolKind::Array { elem_ty, size } => Some(Type::array(*elem_ty, *size)),
            SymbolKind::Function { .. } => None,
            SymbolKind::Const { ty, .. } => Some(*ty),
        }
    }
}

/// A single lexical scope frame.
#[derive(Debug, Default)]
struct Frame {
    names: Map<Id, Symbol>,
}

/// The scope chain, innermost frame at the end of `frames`.
#[derive(Debug)]
pub struct Scope {
    frames: Vec<Frame>,
}

impl Default for Scope {
    fn default() -> Self {
        let mut scope = Scope { frames: vec![] };
        scope.push();
        seed_builtins(&mut scope);
        scope
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Declare `sym` in the innermost frame. Returns `false` if a symbol
    /// with this name already exists in *that same frame* (shadowing an
    /// outer frame is fine; redeclaring within one frame is not).
    pub fn declare(&mut self, sym: Symbol) -> bool {
        let frame = self.frames.last_mut().expect("scope chain is never empty");
        if frame.names.contains_key(&sym.name) {
            false
        } else {
            frame.names.insert(sym.name, sym);
            true
        }
    }

    /// Look up a name, walking outward from the innermost frame.
    pub fn lookup(&self, name: Id) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|f| f.names.get(&name))
    }

    /// Is `name` already bound in the innermost frame specifically?
    pub fn declared_in_current(&self, name: Id) -> bool {
        self.frames.last().expect("scope chain is never empty").names.contains_key(&name)
    }
}

/// Names of the built-in actuator/sensor functions, paired with their
/// parameter count (every parameter and the one non-void return type are
/// always `Int` — matching the Arduino pin-I/O convention the original
/// source's Arduino backend assumes, see `examples/original_source/
/// arduino_vm.c`). Exposed so `back::codegen` can recognize a call to one
/// of these names without re-running semantic analysis: the translator
/// keeps its own independent name environment rather than reaching back
/// into the analyzer's symbol table.
pub const BUILTIN_FUNCTIONS: &[(&str, usize, bool)] = &[
    ("digitalRead", 1, true),
    ("digitalWrite", 2, false),
    ("analogRead", 1, true),
    ("pwmWrite", 2, false),
    ("pinMode", 2, false),
    ("print", 1, false),
    ("forward_ms", 1, false),
    ("back_ms", 1, false),
    ("turnLeft_ms", 1, false),
    ("turnRight_ms", 1, false),
    ("readLeftSensor", 0, true),
    ("readRightSensor", 0, true),
    ("setSpeed", 1, false),
    ("stopMotors", 0, false),
    ("delay", 1, false),
];

/// Pin-mode/level constants, Arduino's own `#define`-as-int convention
/// (`examples/original_source/vm.c`'s `mode == ARD_OUTPUT ? "OUTPUT" :
/// "INPUT"`). Exposed for the same reason as `BUILTIN_FUNCTIONS` above.
pub const BUILTIN_CONSTANTS: &[(&str, i64)] = &[("INPUT", 0), ("OUTPUT", 1), ("HIGH", 1), ("LOW", 0)];

/// Built-in actuator/sensor functions and pin-mode constants seeded into the
/// outermost scope before analysis begins, per spec.md §3. These are the
/// primitives `exec` invokes on the host; they have no bytecode body of
/// their own — see `back::codegen`'s handling of `Symbol::is_builtin` for
/// why `exec`ing one in the register-machine backend is a translation-time
/// error, not a semantic one.
fn seed_builtins(scope: &mut Scope) {
    let int = Type::scalar(BaseType::Int);
    let void = Type::scalar(BaseType::Void);
    for (name, param_count, returns_int) in BUILTIN_FUNCTIONS {
        let params = vec![int; *param_count];
        let ret = if *returns_int { int } else { void };
        scope.declare(Symbol {
            name: Id::new((*name).to_string()),
            kind: SymbolKind::Function { params, ret, is_builtin: true },
        });
    }

    for (name, value) in BUILTIN_CONSTANTS {
        scope.declare(Symbol {
            name: Id::new((*name).to_string()),
            kind: SymbolKind::Const { ty: int, value: *value },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_visible_from_the_start() {
        let scope = Scope::new();
        let sym = scope.lookup(Id::new("digitalRead".to_string())).unwrap();
        assert!(matches!(sym.kind, SymbolKind::Function { is_builtin: true, .. }));
    }

    #[test]
    fn pin_constants_are_seeded() {
        let scope = Scope::new();
        let sym = scope.lookup(Id::new("HIGH".to_string())).unwrap();
        assert_eq!(sym.kind, SymbolKind::Const { ty: Type::scalar(BaseType::Int), value: 1 });
    }

    #[test]
    fn redeclaration_in_the_same_frame_is_rejected() {
        let mut scope = Scope::new();
        let sym = Symbol {
            name: Id::new("x".to_string()),
            kind: SymbolKind::Variable { ty: Type::scalar(BaseType::Int) },
        };
        assert!(scope.declare(sym.clone()));
        assert!(!scope.declare(sym));
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut scope = Scope::new();
        scope.declare(Symbol {
            name: Id::new("x".to_string()),
            kind: SymbolKind::Variable { ty: Type::scalar(BaseType::Int) },
        });
        scope.push();
        scope.declare(Symbol {
            name: Id::new("x".to_string()),
            kind: SymbolKind::Array { elem_ty: BaseType::Int, size: 4 },
        });
        assert!(matches!(
            scope.lookup(Id::new("x".to_string())).unwrap().kind,
            SymbolKind::Array { .. }
        ));
        scope.pop();
        assert!(matches!(
            scope.lookup(Id::new("x".to_string())).unwrap().kind,
            SymbolKind::Variable { .. }
        ));
    }
}
