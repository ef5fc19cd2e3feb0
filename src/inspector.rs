//! Artifact inspection
//!
//! Both dumps are pure functions of their inputs, so repeated calls return
//! identical text.

use crate::compiler::il::Module;
use crate::error::InspectionUnavailable;
use crate::jit::NativeCode;

/// IL listing; available as soon as the module exists
pub fn dump_il(module: &Module) -> String {
    module.disassemble()
}

/// Native code listing; needs code from an ahead-of-time compile or a run
pub fn dump_asm(native: Option<&NativeCode>) -> Result<String, InspectionUnavailable> {
    native
        .map(NativeCode::render)
        .ok_or(InspectionUnavailable {
            what: "native code",
            reason: "methods are lowered when first executed; run the artifact first",
        })
}
