//! Java Debug Wire Protocol client.
//!
//! This module provides the pieces needed to drive a subject JVM over a
//! `dt_socket` transport:
//! - Packet framing and payload codecs (`packet`)
//! - A blocking connection that separates replies from asynchronous events (`connection`)
//! - Decoding of composite event packets (`event`)
//! - Typed wrappers for the commands the tracer issues (`vm`)

pub mod connection;
pub mod event;
pub mod packet;
pub mod vm;

pub use connection::Connection;
pub use event::{Event, EventSet};
pub use vm::Vm;

use std::fmt;
use thiserror::Error;

pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;
pub type RequestId = i32;

/// Errors raised while talking to the subject VM.
#[derive(Debug, Error)]
pub enum JdwpError {
    #[error("I/O error on debug connection: {0}")]
    Io(#[from] std::io::Error),

    #[error("JDWP handshake failed: {0}")]
    Handshake(String),

    #[error("malformed JDWP packet: {0}")]
    Malformed(String),

    #[error("command {command_set}.{command} failed with JDWP error {code}")]
    Reply {
        command_set: u8,
        command: u8,
        code: ErrorCode,
    },

    #[error("invoked method threw an exception in the subject process")]
    InvocationException,

    #[error("no reply from the subject process within {0:?}")]
    Timeout(std::time::Duration),

    #[error("debug connection closed by the subject process")]
    Disconnected,
}

/// A JDWP error code as carried in reply packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    pub const INVALID_THREAD: ErrorCode = ErrorCode(10);
    pub const THREAD_NOT_SUSPENDED: ErrorCode = ErrorCode(13);
    pub const INVALID_OBJECT: ErrorCode = ErrorCode(20);
    pub const INVALID_FRAMEID: ErrorCode = ErrorCode(30);
    pub const ABSENT_INFORMATION: ErrorCode = ErrorCode(101);
    pub const VM_DEAD: ErrorCode = ErrorCode(112);

    pub fn name(&self) -> &'static str {
        match self.0 {
            10 => "INVALID_THREAD",
            13 => "THREAD_NOT_SUSPENDED",
            20 => "INVALID_OBJECT",
            21 => "INVALID_CLASS",
            23 => "INVALID_METHODID",
            24 => "INVALID_LOCATION",
            25 => "INVALID_FIELDID",
            30 => "INVALID_FRAMEID",
            35 => "INVALID_SLOT",
            41 => "NOT_FOUND",
            99 => "NOT_IMPLEMENTED",
            101 => "ABSENT_INFORMATION",
            102 => "INVALID_EVENT_TYPE",
            112 => "VM_DEAD",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// A code position inside the subject VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub type_tag: u8,
    pub class: ReferenceTypeId,
    pub method: MethodId,
    pub index: u64,
}

/// A value read from the subject VM.
///
/// Object-typed values are split by their tag so callers can treat strings and
/// arrays as leaves or containers without another round trip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    String(ObjectId),
    Array(ObjectId),
    Object(ObjectId),
}

/// Value tags as defined by the protocol.
pub mod tag {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';

    /// True for tags whose values are object references.
    pub fn is_object(tag: u8) -> bool {
        matches!(
            tag,
            ARRAY | OBJECT | STRING | THREAD | THREAD_GROUP | CLASS_LOADER | CLASS_OBJECT
        )
    }
}

/// Convert a JNI type signature (`Lbank/Customer;`) to a Java type name (`bank.Customer`).
pub fn signature_to_name(signature: &str) -> String {
    let mut dims = 0;
    let mut rest = signature;
    while let Some(stripped) = rest.strip_prefix('[') {
        dims += 1;
        rest = stripped;
    }

    let base = match rest {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        other => other
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(other)
            .replace('/', "."),
    };

    let mut name = base;
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}

/// Convert a Java class name (`bank.Customer`) to its JNI signature (`Lbank/Customer;`).
pub fn name_to_signature(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_to_name_class() {
        assert_eq!(signature_to_name("Lbank/Customer;"), "bank.Customer");
        assert_eq!(signature_to_name("Lbank/Outer$Inner;"), "bank.Outer$Inner");
    }

    #[test]
    fn test_signature_to_name_arrays_and_primitives() {
        assert_eq!(signature_to_name("I"), "int");
        assert_eq!(signature_to_name("[I"), "int[]");
        assert_eq!(signature_to_name("[[Ljava/lang/String;"), "java.lang.String[][]");
    }

    #[test]
    fn test_name_to_signature() {
        assert_eq!(name_to_signature("bank.BankTest"), "Lbank/BankTest;");
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            ErrorCode::ABSENT_INFORMATION.to_string(),
            "101 (ABSENT_INFORMATION)"
        );
        assert_eq!(ErrorCode(7).to_string(), "7 (UNKNOWN)");
    }

    #[test]
    fn test_object_tags() {
        assert!(tag::is_object(tag::STRING));
        assert!(tag::is_object(tag::ARRAY));
        assert!(!tag::is_object(tag::INT));
        assert!(!tag::is_object(tag::VOID));
    }
}
