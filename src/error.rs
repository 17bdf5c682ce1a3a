use std::fmt;

pub type PsResult<T> = anyhow::Result<T>;

/*
postscript spec page 523

configurationerror setpagedevice or setdevparams request cannot be satisfied
dictfull No more room in dictionary
dictstackoverflow Too many begin operators
dictstackunderflow Too many end operators
execstackoverflow Executive stack nesting too deep
handleerror Called to report error information
interrupt External interrupt request (for example, Control-C)
invalidaccess Attempt to violate access attribute
invalidexit exit not in loop
invalidfileaccess Unacceptable access string
invalidfont Invalid Font resource name or font or CIDFont dictionary
invalidrestore Improper restore
ioerror Input/output error
limitcheck Implementation limit exceeded
nocurrentpoint Current point undefined
rangecheck Operand out of bounds
stackoverflow Operand stack overflow
stackunderflow Operand stack underflow
syntaxerror PostScript language syntax error
timeout Time limit exceeded
typecheck Operand of wrong type
undefined Name not known
undefinedfilename File not found
undefinedresource Resource instance not found
undefinedresult Overflow, underflow, or meaningless result
unmatchedmark Expected mark not on stack
unregistered Internal error
VMerror Virtual memory exhausted
*/

/// The closed set of PostScript error names. Every failing operator raises
/// exactly one of these; the engine resolves the name through `errordict`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    VmError,
    ConfigurationError,
    DictFull,
    DictStackOverflow,
    DictStackUnderflow,
    ExecStackOverflow,
    HandleError,
    Interrupt,
    InvalidAccess,
    InvalidContext,
    InvalidExit,
    InvalidFileAccess,
    InvalidFont,
    InvalidRestore,
    IoError,
    LimitCheck,
    NoCurrentPoint,
    RangeCheck,
    StackOverflow,
    StackUnderflow,
    SyntaxError,
    Timeout,
    TypeCheck,
    Undefined,
    UndefinedFilename,
    UndefinedResource,
    UndefinedResult,
    UnmatchedMark,
    Unregistered,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 29] = [
        ErrorKind::VmError,
        ErrorKind::ConfigurationError,
        ErrorKind::DictFull,
        ErrorKind::DictStackOverflow,
        ErrorKind::DictStackUnderflow,
        ErrorKind::ExecStackOverflow,
        ErrorKind::HandleError,
        ErrorKind::Interrupt,
        ErrorKind::InvalidAccess,
        ErrorKind::InvalidContext,
        ErrorKind::InvalidExit,
        ErrorKind::InvalidFileAccess,
        ErrorKind::InvalidFont,
        ErrorKind::InvalidRestore,
        ErrorKind::IoError,
        ErrorKind::LimitCheck,
        ErrorKind::NoCurrentPoint,
        ErrorKind::RangeCheck,
        ErrorKind::StackOverflow,
        ErrorKind::StackUnderflow,
        ErrorKind::SyntaxError,
        ErrorKind::Timeout,
        ErrorKind::TypeCheck,
        ErrorKind::Undefined,
        ErrorKind::UndefinedFilename,
        ErrorKind::UndefinedResource,
        ErrorKind::UndefinedResult,
        ErrorKind::UnmatchedMark,
        ErrorKind::Unregistered,
    ];

    /// The public PostScript name, as it appears in `errordict` and `$error`
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::VmError => "VMerror",
            ErrorKind::ConfigurationError => "configurationerror",
            ErrorKind::DictFull => "dictfull",
            ErrorKind::DictStackOverflow => "dictstackoverflow",
            ErrorKind::DictStackUnderflow => "dictstackunderflow",
            ErrorKind::ExecStackOverflow => "execstackoverflow",
            ErrorKind::HandleError => "handleerror",
            ErrorKind::Interrupt => "interrupt",
            ErrorKind::InvalidAccess => "invalidaccess",
            ErrorKind::InvalidContext => "invalidcontext",
            ErrorKind::InvalidExit => "invalidexit",
            ErrorKind::InvalidFileAccess => "invalidfileaccess",
            ErrorKind::InvalidFont => "invalidfont",
            ErrorKind::InvalidRestore => "invalidrestore",
            ErrorKind::IoError => "ioerror",
            ErrorKind::LimitCheck => "limitcheck",
            ErrorKind::NoCurrentPoint => "nocurrentpoint",
            ErrorKind::RangeCheck => "rangecheck",
            ErrorKind::StackOverflow => "stackoverflow",
            ErrorKind::StackUnderflow => "stackunderflow",
            ErrorKind::SyntaxError => "syntaxerror",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TypeCheck => "typecheck",
            ErrorKind::Undefined => "undefined",
            ErrorKind::UndefinedFilename => "undefinedfilename",
            ErrorKind::UndefinedResource => "undefinedresource",
            ErrorKind::UndefinedResult => "undefinedresult",
            ErrorKind::UnmatchedMark => "unmatchedmark",
            ErrorKind::Unregistered => "unregistered",
        }
    }
}

/// A recoverable interpreter error. The engine catches these at the main
/// loop, restores popped operands, and funnels the name through `errordict`
#[derive(Debug)]
pub struct Tilted {
    pub kind: ErrorKind,
    pub info: Option<String>,
}

impl Tilted {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, info: None }
    }

    pub fn with_info(kind: ErrorKind, info: String) -> Self {
        Self {
            kind,
            info: Some(info),
        }
    }
}

impl fmt::Display for Tilted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            Some(info) => write!(f, "{}: {}", self.kind.name(), info),
            None => write!(f, "{}", self.kind.name()),
        }
    }
}

impl std::error::Error for Tilted {}

/// A host-visible termination. Not routed through `errordict`: the engine
/// returns control to the embedding program, which maps `status` onto the
/// process exit code. `quit` carries 0; an unhandled `stop` carries 1
#[derive(Debug, Clone, Copy)]
pub struct FatalTilt {
    pub status: i32,
}

impl fmt::Display for FatalTilt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "interpreter terminated with status {}", self.status)
    }
}

impl std::error::Error for FatalTilt {}

/// Raise a named PostScript error, optionally with diagnostic detail
macro_rules! tilt {
    ($kind:ident) => {
        anyhow::bail!($crate::error::Tilted::new($crate::error::ErrorKind::$kind))
    };
    ($kind:ident, $($arg:tt)*) => {
        anyhow::bail!($crate::error::Tilted::with_info(
            $crate::error::ErrorKind::$kind,
            format!($($arg)*),
        ))
    };
}

pub(crate) use tilt;
