//! Machine code for the `future()` forwarding stub.
//!
//! A dispatch table slot can only hold a plain function pointer, but the
//! interception handler needs to know which driver it serves. The stub
//! shifts the three `future()` arguments one register to the right, loads
//! the bound context into the first argument register and tail-jumps into
//! the handler:
//!
//! ```text
//! mov r9, r8          ; params
//! mov r8, rdx         ; selector
//! mov rdx, rcx        ; this
//! mov rcx, imm64      ; context
//! mov rax, imm64      ; handler
//! jmp rax
//! ```
//!
//! Only the x64 Windows calling convention is supported.

/// Length of an encoded stub in bytes.
pub const TRAMPOLINE_LEN: usize = 31;

const CONTEXT_OFFSET: usize = 11;
const HANDLER_OFFSET: usize = 21;

/// Encode a stub that calls `handler(context, this, selector, params)`.
#[must_use]
pub fn encode(context: usize, handler: usize) -> [u8; TRAMPOLINE_LEN] {
    let mut code = [
        0x4D, 0x89, 0xC1, // mov r9, r8
        0x49, 0x89, 0xD0, // mov r8, rdx
        0x48, 0x89, 0xCA, // mov rdx, rcx
        0x48, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0, // mov rcx, imm64
        0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0, // mov rax, imm64
        0xFF, 0xE0, // jmp rax
    ];
    code[CONTEXT_OFFSET..CONTEXT_OFFSET + 8].copy_from_slice(&(context as u64).to_le_bytes());
    code[HANDLER_OFFSET..HANDLER_OFFSET + 8].copy_from_slice(&(handler as u64).to_le_bytes());
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_exact() {
        let code = encode(0x1122_3344_5566_7788, 0x0102_0304_0506_0708);
        assert_eq!(
            code,
            [
                0x4D, 0x89, 0xC1, 0x49, 0x89, 0xD0, 0x48, 0x89, 0xCA, //
                0x48, 0xB9, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11, //
                0x48, 0xB8, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, //
                0xFF, 0xE0,
            ]
        );
    }

    #[test]
    fn test_operands_land_on_immediates() {
        let code = encode(usize::MAX, 0);
        assert!(code[CONTEXT_OFFSET..CONTEXT_OFFSET + 8].iter().all(|b| *b == 0xFF));
        assert!(code[HANDLER_OFFSET..HANDLER_OFFSET + 8].iter().all(|b| *b == 0));
        assert_eq!(code[CONTEXT_OFFSET - 2..CONTEXT_OFFSET], [0x48, 0xB9]);
        assert_eq!(code[HANDLER_OFFSET - 2..HANDLER_OFFSET], [0x48, 0xB8]);
    }
}
