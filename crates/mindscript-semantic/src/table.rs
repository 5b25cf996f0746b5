//! Lexically nested symbol table.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::Type;

/// Signature of a declared or builtin function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub args: Vec<Type>,
    pub return_type: Type,
}

#[derive(Debug, Default)]
struct Scope {
    variables: FxHashMap<SmolStr, Type>,
    functions: FxHashMap<SmolStr, FunctionSignature>,
}

/// A stack of scopes. The global scope is pushed at construction and can
/// never be popped. Declarations land in the innermost scope; lookups walk
/// outward to the global scope.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Current nesting depth; 1 means only the global scope is open.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() == 1 {
            panic!("cannot pop the global scope");
        }
        self.scopes.pop();
    }

    /// Declare a variable in the current scope. Returns false if the name
    /// already exists in this scope.
    pub fn declare_variable(&mut self, name: &SmolStr, ty: Type) -> bool {
        let scope = self.scopes.last_mut().unwrap();
        if scope.variables.contains_key(name) {
            return false;
        }
        scope.variables.insert(name.clone(), ty);
        true
    }

    /// Declare a function in the current scope. Returns false if the name
    /// already exists in this scope.
    pub fn declare_function(&mut self, name: &SmolStr, signature: FunctionSignature) -> bool {
        let scope = self.scopes.last_mut().unwrap();
        if scope.functions.contains_key(name) {
            return false;
        }
        scope.functions.insert(name.clone(), signature);
        true
    }

    /// Look up a variable's type, walking outward to the global scope.
    pub fn variable_type(&self, name: &str) -> Option<Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name).copied())
    }

    /// Look up a function signature, walking outward to the global scope.
    pub fn function_signature(&self, name: &str) -> Option<&FunctionSignature> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.functions.get(name))
    }

    /// Install the builtin functions into the global scope. Idempotent, so
    /// a table shared across programs can be re-analyzed freely.
    pub fn register_builtins(&mut self) {
        let global = &mut self.scopes[0];
        global.functions.insert(
            SmolStr::new("log"),
            FunctionSignature {
                args: vec![Type::Str],
                return_type: Type::Void,
            },
        );
        global.functions.insert(
            SmolStr::new("syscall"),
            FunctionSignature {
                args: vec![Type::Str, Type::Str],
                return_type: Type::Void,
            },
        );
        global.functions.insert(
            SmolStr::new("exec"),
            FunctionSignature {
                args: vec![Type::Str, Type::Str],
                return_type: Type::Str,
            },
        );
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
