//! Standard I/O bindings.
//!
//! Registers the `print` cfunc: pops one integer and writes it, followed by
//! a newline, to the VM's output sink.

use crate::vm::Spyre;

fn native_print(vm: &mut Spyre) -> Result<(), String> {
    let value = vm.pop_int()?;
    vm.write_int_line(value)
}

/// Register the I/O callbacks on a VM.
pub fn register_io(vm: &mut Spyre) {
    vm.register_cfunc("print", native_print);
}
