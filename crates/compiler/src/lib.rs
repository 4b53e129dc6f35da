//! Spyre compiler library.
//!
//! Compiles Spyre source to textual Spyre assembly in four stages:
//! lex -> parse -> typecheck -> emit. The result also carries the record
//! layouts of every user struct so a host can register them with the
//! virtual machine's type registry before executing the assembled image
//! (the GC needs member layouts to trace the heap).
//!
//! ```no_run
//! let output = spyrec::compile_file(std::path::Path::new("program.spy"))?;
//! println!("{}", output.assembly);
//! # Ok::<(), String>(())
//! ```

pub mod ast;
pub mod codegen;
pub mod parser;
pub mod typechecker;
pub mod types;

pub use ast::Module;
pub use parser::Parser;
pub use typechecker::TypeChecker;
pub use types::{Builtins, Datatype, Declaration, FunctionDescriptor, StructInfo};

use std::path::Path;

/// One member of a record layout: name, member type name, and byte offset
/// inside the segment payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMember {
    pub name: String,
    pub type_name: String,
    pub offset: usize,
}

/// The runtime-facing layout of one user struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: String,
    pub members: Vec<RecordMember>,
}

/// Result of a successful compile: the assembly text plus the record
/// layouts the VM needs for allocation and garbage collection.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub assembly: String,
    pub records: Vec<RecordLayout>,
}

/// Compile in-memory source through the full front end.
pub fn compile_source(source: &str, filename: &str) -> Result<CompileOutput, String> {
    let mut module = parser::parse_source(source, filename)?;
    typechecker::check_module(&mut module)?;
    let assembly = codegen::generate(&mut module)?;
    Ok(CompileOutput {
        assembly,
        records: record_layouts(&module),
    })
}

/// Compile a source file.
pub fn compile_file(path: &Path) -> Result<CompileOutput, String> {
    let filename = path.display().to_string();
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("couldn't open '{}' for reading: {}", filename, e))?;
    compile_source(&source, &filename)
}

/// Extract the record layouts of every user struct, members in declaration
/// order at 8-byte slots.
pub fn record_layouts(module: &Module) -> Vec<RecordLayout> {
    let mut layouts = Vec::new();
    module.usertypes.foreach(|name, info| {
        let members = info
            .members_in_order()
            .into_iter()
            .map(|decl| RecordMember {
                name: decl.name.clone(),
                type_name: decl
                    .dt
                    .type_name
                    .clone()
                    .unwrap_or_default(),
                offset: decl.index * 8,
            })
            .collect();
        layouts.push(RecordLayout {
            name: name.to_string(),
            members,
        });
    });
    layouts
}
