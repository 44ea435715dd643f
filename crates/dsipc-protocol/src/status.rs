//! Status codes carried as the `u32` payload of Server replies.

pub const S_OK: u32 = 0x0000_0000;
pub const E_BAD_ENCODING: u32 = 0x8013_1384;
pub const E_UNKNOWN_COMMAND: u32 = 0x8013_1385;
pub const E_UNKNOWN_MAGIC: u32 = 0x8013_1386;
pub const E_NOTSUPPORTED: u32 = 0x8013_1515;
pub const E_FAIL: u32 = 0x8000_4005;
pub const E_NOT_YET_AVAILABLE: u32 = 0x8013_135B;
pub const E_RUNTIME_UNINITIALIZED: u32 = 0x8013_1371;
pub const E_INVALIDARG: u32 = 0x8007_0057;
pub const E_INSUFFICIENT_BUFFER: u32 = 0x8007_007A;
pub const E_ENVVAR_NOT_FOUND: u32 = 0x8000_00CB;

/// Symbolic name of a status code.
pub fn status_name(code: u32) -> &'static str {
    match code {
        S_OK => "S_OK",
        E_BAD_ENCODING => "E_BAD_ENCODING",
        E_UNKNOWN_COMMAND => "E_UNKNOWN_COMMAND",
        E_UNKNOWN_MAGIC => "E_UNKNOWN_MAGIC",
        E_NOTSUPPORTED => "E_NOTSUPPORTED",
        E_FAIL => "E_FAIL",
        E_NOT_YET_AVAILABLE => "E_NOT_YET_AVAILABLE",
        E_RUNTIME_UNINITIALIZED => "E_RUNTIME_UNINITIALIZED",
        E_INVALIDARG => "E_INVALIDARG",
        E_INSUFFICIENT_BUFFER => "E_INSUFFICIENT_BUFFER",
        E_ENVVAR_NOT_FOUND => "E_ENVVAR_NOT_FOUND",
        _ => "UNKNOWN",
    }
}

/// HRESULT-style failure bit.
pub fn is_failure(code: u32) -> bool {
    code & 0x8000_0000 != 0
}
