//! Native "C function" registry.
//!
//! Bytecode declares external functions with `cfunc`; at run time each name
//! must be bound to a native callback before `CCALL` reaches it. Callbacks
//! receive the VM, pop their arguments in their documented order, and may
//! push a single return value.

use crate::vm::Spyre;

/// A native callback. Errors abort execution like any other runtime error.
pub type NativeFn = fn(&mut Spyre) -> Result<(), String>;

impl Spyre {
    /// Bind `name` to a native callback. Later registrations shadow
    /// earlier ones.
    pub fn register_cfunc(&mut self, name: &str, func: NativeFn) {
        self.cfuncs.insert(name, func);
    }

    /// Dispatch a `CCALL` by name.
    pub(crate) fn call_cfunc(&mut self, name: &str) -> Result<(), String> {
        let func = self
            .cfuncs
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown cfunc '{}' at CCALL", name))?;
        func(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_seven(vm: &mut Spyre) -> Result<(), String> {
        vm.push_int(7);
        Ok(())
    }

    #[test]
    fn test_register_and_dispatch() {
        let mut vm = Spyre::new();
        vm.register_cfunc("seven", push_seven);
        vm.call_cfunc("seven").unwrap();
        assert_eq!(vm.stack_top_int(), Some(7));
    }

    #[test]
    fn test_missing_cfunc_is_error() {
        let mut vm = Spyre::new();
        let err = vm.call_cfunc("absent").unwrap_err();
        assert!(err.contains("unknown cfunc"));
    }
}
