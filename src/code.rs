//! Packed 32-bit return codes.
//!
//! Every fallible operation in this crate reports its outcome through a
//! [`Code`]: a 32-bit value packing `{origin: 1, severity: 2, module: 13,
//! code: 16}` from the most significant bit down. Full success is the absence
//! of a code (`Ok(())`); everything else travels in the `Err` arm of a
//! `Result` and is classified by its severity:
//!
//! - **Info**: the operation succeeded, but carries a state the caller may
//!   need to inspect (a timed-out wait, a busy try-lock). Only used where the
//!   caller is expected to handle nuanced state.
//! - **Warn**: the operation partially succeeded, and the caller should check
//!   how it impacts them (a worker batch that spawned incompletely).
//! - **Error**: the operation failed, and the caller needs to check what went
//!   wrong.
//! - **Fatal**: the operation failed, and the caller needs to clean up and
//!   shut down.
//!
//! Library-defined codes have the origin bit set, which makes them negative
//! as `i32`; positive values are reserved for users of the embedding system
//! and are unregulated.

use core::fmt;

const WIDTH: u32 = 32;

const ORIGIN_WIDTH: u32 = 1;
const SEVERITY_WIDTH: u32 = 2;
const MODULE_WIDTH: u32 = 13;
const CODE_WIDTH: u32 = 16;

const ORIGIN_SHIFT: u32 = WIDTH - ORIGIN_WIDTH;
const SEVERITY_SHIFT: u32 = ORIGIN_SHIFT - SEVERITY_WIDTH;
const MODULE_SHIFT: u32 = SEVERITY_SHIFT - MODULE_WIDTH;
const CODE_SHIFT: u32 = MODULE_SHIFT - CODE_WIDTH;

const ORIGIN_MASK: u32 = (1 << ORIGIN_WIDTH) - 1;
const SEVERITY_MASK: u32 = (1 << SEVERITY_WIDTH) - 1;
const MODULE_MASK: u32 = (1 << MODULE_WIDTH) - 1;
const CODE_MASK: u32 = (1 << CODE_WIDTH) - 1;

static_assertions::const_assert_eq!(CODE_SHIFT, 0);
static_assertions::const_assert_eq!(
    ORIGIN_WIDTH + SEVERITY_WIDTH + MODULE_WIDTH + CODE_WIDTH,
    WIDTH
);

/// Originator of a code: the library itself, or the embedding user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Positive codes, reserved for the embedding system.
    User = 0,
    /// Negative codes, defined by this library.
    Library = 1,
}

/// Severity class of a code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Success with a state the caller may need to inspect.
    Info = 0,
    /// Partial success the caller should evaluate.
    Warn = 1,
    /// Failure the caller can recover from.
    Error = 2,
    /// Failure requiring shutdown.
    Fatal = 3,
}

/// Subsystem a code originates from (13-bit field).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Module {
    Core = 0x01,
    Allocator = 0x02,
    Threading = 0x03,
    Logging = 0x04,
}

/// A packed 32-bit return code.
///
/// `Code` values compare by their packed representation; two codes are equal
/// iff origin, severity, module and code number all match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(i32);

const fn pack(origin: Origin, severity: Severity, module: Module, code: u32) -> Code {
    Code(
        (((origin as u32 & ORIGIN_MASK) << ORIGIN_SHIFT)
            | ((severity as u32 & SEVERITY_MASK) << SEVERITY_SHIFT)
            | ((module as u32 & MODULE_MASK) << MODULE_SHIFT)
            | ((code & CODE_MASK) << CODE_SHIFT)) as i32,
    )
}

const fn info(module: Module, code: u32) -> Code {
    pack(Origin::Library, Severity::Info, module, code)
}

const fn warn(module: Module, code: u32) -> Code {
    pack(Origin::Library, Severity::Warn, module, code)
}

const fn error(module: Module, code: u32) -> Code {
    pack(Origin::Library, Severity::Error, module, code)
}

const fn fatal(module: Module, code: u32) -> Code {
    pack(Origin::Library, Severity::Fatal, module, code)
}

macro_rules! codes {
    ($($(#[$doc:meta])* $name:ident = $value:expr, $message:expr;)+) => {
        impl Code {
            $($(#[$doc])* pub const $name: Code = $value;)+

            /// Returns the constant's identifier, or `"UNKNOWN"` for a code
            /// not defined by this library.
            pub fn name(self) -> &'static str {
                match self {
                    $(Code::$name => stringify!($name),)+
                    _ => "UNKNOWN",
                }
            }

            /// Returns a short human-readable description of the code.
            pub fn message(self) -> &'static str {
                match self {
                    $(Code::$name => $message,)+
                    _ => "Unrecognized code",
                }
            }
        }
    };
}

codes! {
    /// Generic error.
    ERROR_GENERIC = error(Module::Core, 0x00), "Generic error";
    /// Unknown error.
    ERROR_UNKNOWN = error(Module::Core, 0x01), "Unknown error";
    /// Operation is forbidden, usually from the calling thread.
    ERROR_FORBIDDEN = error(Module::Core, 0x02), "Operation is forbidden";
    /// Operation is unsupported on this platform.
    ERROR_UNSUPPORTED = error(Module::Core, 0x03), "Operation is unsupported";
    /// A required pointer argument is absent. Part of the stable code
    /// surface for embedders; references make it unproducible from safe
    /// callers of this crate.
    ERROR_NULL = error(Module::Core, 0x05), "Operation received null pointer where a non-null pointer is required";
    /// Operation received invalid parameter(s).
    ERROR_INVALID = error(Module::Core, 0x06), "Operation received invalid parameter(s)";
    /// Operation is forbidden on an initialized object.
    ERROR_INIT = error(Module::Core, 0x07), "Operation is forbidden on initialized object";
    /// Operation is not valid in the current state.
    ERROR_STATE = error(Module::Core, 0x09), "Operation is not valid in current state";
    /// Failed to allocate memory.
    ERROR_MEMORY = error(Module::Core, 0x0A), "Failed to allocate memory";
    /// Numeric or buffer overflow occurred.
    ERROR_OVERFLOW = error(Module::Core, 0x0B), "Numeric or buffer overflow occurred";
    /// Uncontrollable failure at the OS level.
    ERROR_OS = error(Module::Core, 0x0D), "Uncontrollable failure at the OS level";

    /// Information was truncated.
    WARN_TRUNCATION = warn(Module::Core, 0x01), "Information was truncated";
    /// Batch operation was incomplete.
    WARN_INCOMPLETE = warn(Module::Core, 0x02), "Operation was incomplete";

    /// Generic fatal event.
    FATAL_GENERIC = fatal(Module::Core, 0x00), "Generic fatal event";
    /// No sufficiently monotonic timer exists.
    FATAL_TIMER = fatal(Module::Core, 0x02), "No sufficient timer exists";

    /// Synchronization unavailable without contention.
    THREAD_INFO_BUSY = info(Module::Threading, 0x00), "Synchronization unavailable without contention";
    /// Synchronization wait timed out.
    THREAD_INFO_TIMEOUT = info(Module::Threading, 0x01), "Synchronization wait timed out";

    /// Operation results in a deadlock.
    THREAD_ERROR_DEADLOCK = error(Module::Threading, 0x03), "Operation results in a deadlock";
    /// Thread handle does not refer to a managed thread.
    THREAD_ERROR_HANDLE_INVALID = error(Module::Threading, 0x04), "Thread handle is invalid";
    /// Thread handle refers to a slot that has since been recycled.
    THREAD_ERROR_HANDLE_CLOSED = error(Module::Threading, 0x05), "Thread handle is closed";
    /// Thread handle refers to a detached thread.
    THREAD_ERROR_HANDLE_DETACHED = error(Module::Threading, 0x06), "Thread handle is detached";
    /// The OS could not create a thread.
    THREAD_ERROR_OS_CREATE = error(Module::Threading, 0x07), "OS could not create thread";
    /// The OS could not join a thread.
    THREAD_ERROR_OS_JOIN = error(Module::Threading, 0x08), "OS could not join thread";
    /// The OS could not detach a thread.
    THREAD_ERROR_OS_DETACH = error(Module::Threading, 0x09), "OS could not detach thread";
}

impl Code {
    /// Reconstructs a code from its packed representation.
    pub const fn from_raw(raw: i32) -> Code {
        Code(raw)
    }

    /// Returns the packed representation.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Returns the origin field.
    pub fn origin(self) -> Origin {
        if (self.0 as u32 >> ORIGIN_SHIFT) & ORIGIN_MASK == 0 {
            Origin::User
        } else {
            Origin::Library
        }
    }

    /// Returns the severity field.
    pub fn severity(self) -> Severity {
        match (self.0 as u32 >> SEVERITY_SHIFT) & SEVERITY_MASK {
            0 => Severity::Info,
            1 => Severity::Warn,
            2 => Severity::Error,
            _ => Severity::Fatal,
        }
    }

    /// Returns the raw 13-bit module field.
    pub const fn module_id(self) -> u32 {
        (self.0 as u32 >> MODULE_SHIFT) & MODULE_MASK
    }

    /// Returns the raw 16-bit code field.
    pub const fn code_id(self) -> u32 {
        (self.0 as u32 >> CODE_SHIFT) & CODE_MASK
    }

    /// True if the code is informational.
    pub fn is_info(self) -> bool {
        self.severity() == Severity::Info
    }

    /// True if the code is a warning.
    pub fn is_warning(self) -> bool {
        self.severity() == Severity::Warn
    }

    /// True if the code is an error.
    pub fn is_error(self) -> bool {
        self.severity() == Severity::Error
    }

    /// True if the code is fatal.
    pub fn is_fatal(self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// True if the operation completed with expected state (info or better).
    pub fn is_successful(self) -> bool {
        self.severity() <= Severity::Info
    }

    /// True if the operation completed with a state that can be accepted or
    /// rejected (warning or better).
    pub fn is_acceptable(self) -> bool {
        self.severity() <= Severity::Warn
    }

    /// True if the operation failed with a state that can be recovered from
    /// (anything but fatal).
    pub fn is_recoverable(self) -> bool {
        self.severity() <= Severity::Error
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({}, {:#010X})", self.name(), self.0 as u32)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

impl std::error::Error for Code {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn library_codes_are_negative() {
        assert!(Code::ERROR_INVALID.raw() < 0);
        assert!(Code::THREAD_INFO_TIMEOUT.raw() < 0);
        assert!(Code::FATAL_TIMER.raw() < 0);
    }

    #[test]
    fn fields_round_trip() {
        let c = Code::THREAD_ERROR_DEADLOCK;
        assert_eq!(c.origin(), Origin::Library);
        assert_eq!(c.severity(), Severity::Error);
        assert_eq!(c.module_id(), Module::Threading as u32);
        assert_eq!(c.code_id(), 0x03);
    }

    #[test]
    fn severity_predicates() {
        assert!(Code::THREAD_INFO_BUSY.is_info());
        assert!(Code::THREAD_INFO_BUSY.is_successful());
        assert!(Code::WARN_INCOMPLETE.is_warning());
        assert!(Code::WARN_INCOMPLETE.is_acceptable());
        assert!(!Code::WARN_INCOMPLETE.is_successful());
        assert!(Code::ERROR_STATE.is_error());
        assert!(Code::ERROR_STATE.is_recoverable());
        assert!(Code::FATAL_TIMER.is_fatal());
        assert!(!Code::FATAL_TIMER.is_recoverable());
    }

    #[test]
    fn names_and_messages() {
        assert_eq!(Code::THREAD_INFO_TIMEOUT.name(), "THREAD_INFO_TIMEOUT");
        assert_eq!(Code::from_raw(0x1234).name(), "UNKNOWN");
        assert!(!Code::ERROR_OS.message().is_empty());
    }
}
