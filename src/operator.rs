/// A built-in operator. Each variant is registered into `systemdict` under
/// its public PostScript name, which may differ from the variant name
/// (`[`, `]`, `=`, `.error`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    // Operand stack
    Pop,
    Dup,
    Exch,

    /// performs two entirely different functions, depending on the type of
    /// the topmost operand.
    ///
    /// In the first form, where the top element is a nonnegative integer n,
    /// copy pops n and duplicates the top n elements. This form operates only
    /// on the objects themselves, not on the values of composite objects.
    ///
    /// In the other forms, copy copies all the elements of the first
    /// composite object into the second, and returns the initial subarray or
    /// substring of the second operand into which the elements were copied.
    /// Copying is one level deep: composite elements end up shared.
    ///
    /// any1 … anyn n `copy` any1 … anyn any1 … anyn
    /// array1 array2 `copy` subarray2
    /// string1 string2 `copy` substring2
    /// dict1 dict2 `copy` dict2
    Copy,
    Index,

    /// performs a circular shift of the objects anyn−1 through any0 on the
    /// operand stack by the amount j. Positive j indicates upward motion on
    /// the stack, whereas negative j indicates downward motion.
    ///
    /// anyn−1 … any0 n j `roll` any(j−1) mod n … any0 anyn−1 … anyj mod n
    Roll,
    Clear,
    ClearToMark,
    Count,
    CountToMark,
    Mark,

    /// creates a new array of n elements (n ≥ 0), whose objects are the
    /// topmost n objects above the mark, and pushes it after removing the
    /// mark. Resolved from the executable name `]`, so array construction
    /// rides the ordinary execution mechanism
    EndArray,

    // Arithmetic
    /// returns the sum of num1 and num2. If both operands are integers and
    /// the result is within integer range, the result is an integer;
    /// otherwise, the result is a real number
    ///
    /// num1 num2 `add` sum
    Add,
    Sub,
    Mul,

    /// divides num1 by num2, producing a result that is always a real number
    /// even if both operands are integers
    ///
    /// num1 num2 `div` quotient
    Div,

    /// divides int1 by int2 and returns the integer part of the quotient,
    /// with any fractional part discarded. Both operands must be integers
    ///
    /// int1 int2 `idiv` quotient
    IDiv,

    /// returns the remainder of int1 divided by int2. The sign of the result
    /// is the sign of the dividend
    ///
    /// int1 int2 `mod` remainder
    Mod,
    Neg,
    Abs,
    Ceiling,
    Floor,

    /// returns the integer value nearest to num1. If num1 is equally close
    /// to its two nearest integers, the result is the greater of the two.
    /// The type of the result is the type of the operand
    ///
    /// num1 `round` num2
    Round,
    Truncate,
    Sqrt,

    /// raises base to the exponent power. The result is always a real number
    ///
    /// base exponent `exp` real
    Exp,
    Ln,
    Log,
    Sin,
    Cos,

    /// returns the angle (in degrees between 0 and 360) whose tangent is
    /// num/den. Either operand may be zero, but not both
    ///
    /// num den `atan` angle
    Atan,
    Rand,
    SRand,
    RRand,

    // Relational, boolean, bitwise
    /// pops two objects and pushes true if they are equal. Integers and real
    /// numbers compare by mathematical value; strings and names compare
    /// freely by their character sequences; other composite objects are
    /// equal only if they share the same storage
    ///
    /// any1 any2 `eq` bool
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,

    /// logical conjunction for booleans, bitwise "and" for integers
    ///
    /// bool1 bool2 `and` bool3
    /// int1 int2 `and` int3
    And,
    Or,
    Xor,
    Not,

    // Control
    If,
    IfElse,

    /// executes proc repeatedly, passing it a sequence of values from
    /// initial by steps of increment to limit. Before each repetition the
    /// control variable is pushed on the operand stack. If increment is
    /// positive, for terminates when the control variable becomes greater
    /// than limit; if negative, when it becomes less than limit. If proc
    /// executes the exit operator, for terminates prematurely
    ///
    /// initial increment limit proc `for` –
    For,
    Forall,
    Repeat,
    Loop,
    Exit,
    Stop,

    /// executes any, which is typically, but not necessarily, a procedure.
    /// If any runs to completion normally, stopped returns false. If any
    /// terminates prematurely by executing stop, stopped returns true
    ///
    /// any `stopped` bool
    Stopped,
    Quit,
    Exec,

    // Arrays, dicts, strings
    Array,
    Length,
    Get,
    GetInterval,
    Put,
    PutInterval,
    ALoad,
    AStore,
    Dict,
    Begin,
    End,

    /// associates key with value in the current dictionary, the one on the
    /// top of the dictionary stack
    ///
    /// key value `def` –
    Def,
    Load,

    /// like def, but stores into the topmost dictionary in which key is
    /// already defined, falling back to the current dictionary
    ///
    /// key value `store` –
    Store,
    Known,
    Where,
    Undef,
    CurrentDict,
    CountDictStack,
    ClearDictStack,
    MaxLength,
    String,

    /// reads a token from string, interpreting it according to the
    /// PostScript syntax. Pushes the substring beyond the token, the token
    /// itself, and true; or just false if no token was found
    ///
    /// string `token` post any true
    /// string `token` false
    Token,

    /// looks for the first occurrence of seek within string. On success
    /// pushes the portion after the match, the match, the portion before it,
    /// and true; on failure pushes the original string and false
    ///
    /// string seek `search` post match pre true
    /// string seek `search` string false
    Search,
    AnchorSearch,

    // Types, attributes, conversions
    Type,
    Cvi,
    Cvlit,
    Cvn,
    Cvr,

    /// converts num to a string in the designated radix, overwriting the
    /// beginning of string and returning the substring actually used. With
    /// radix 10 the result is the same as cvs; otherwise num is treated as a
    /// 32-bit value and rendered with digits 0-9 and A-Z
    ///
    /// num radix string `cvrs` substring
    Cvrs,
    Cvs,
    Cvx,
    XCheck,

    // Virtual memory
    /// creates a snapshot of the current state of composite-object memory
    /// and returns a save object representing it. Also saves the graphics
    /// state as if by gsave
    ///
    /// `save` save
    Save,

    /// resets composite-object memory to the snapshot represented by save,
    /// invalidating it along with any save objects created more recently. If
    /// the operand or dictionary stack holds composite objects newer than
    /// the snapshot, invalidrestore is raised and nothing changes
    ///
    /// save `restore` –
    Restore,

    // Output
    EqPrint,
    EqEqPrint,
    Print,
    PStack,
    Stack,

    // Errors
    /// the default errordict handler: records the error name and offending
    /// object in `$error`, then executes stop
    ErrorDefault,
    HandleError,

    // Constants and miscellany
    True,
    False,
    Null,

    /// replaces executable operator names in proc by the operators
    /// themselves, recursively in nested procedures. Names that are not
    /// defined, or whose values are not operators, are left alone
    ///
    /// proc `bind` proc
    Bind,
    UserTime,

    // Graphics boundary
    GSave,
    GRestore,
    NewPath,
    MoveTo,
    LineTo,
    CurveTo,
    ClosePath,
    CurrentPoint,
    PathForall,
    Clip,
    ShowPage,
    SetLineWidth,
    SetLineCap,
    SetLineJoin,
    SetMiterLimit,
    SetDash,
    SetGray,
    SetRgbColor,
}

/// Registration table: public PostScript name to operator, used to build
/// `systemdict` and to render `--name--` print forms
pub(crate) const REGISTRY: &[(&str, Operator)] = &[
    ("pop", Operator::Pop),
    ("dup", Operator::Dup),
    ("exch", Operator::Exch),
    ("copy", Operator::Copy),
    ("index", Operator::Index),
    ("roll", Operator::Roll),
    ("clear", Operator::Clear),
    ("cleartomark", Operator::ClearToMark),
    ("count", Operator::Count),
    ("counttomark", Operator::CountToMark),
    ("mark", Operator::Mark),
    ("[", Operator::Mark),
    ("]", Operator::EndArray),
    ("add", Operator::Add),
    ("sub", Operator::Sub),
    ("mul", Operator::Mul),
    ("div", Operator::Div),
    ("idiv", Operator::IDiv),
    ("mod", Operator::Mod),
    ("neg", Operator::Neg),
    ("abs", Operator::Abs),
    ("ceiling", Operator::Ceiling),
    ("floor", Operator::Floor),
    ("round", Operator::Round),
    ("truncate", Operator::Truncate),
    ("sqrt", Operator::Sqrt),
    ("exp", Operator::Exp),
    ("ln", Operator::Ln),
    ("log", Operator::Log),
    ("sin", Operator::Sin),
    ("cos", Operator::Cos),
    ("atan", Operator::Atan),
    ("rand", Operator::Rand),
    ("srand", Operator::SRand),
    ("rrand", Operator::RRand),
    ("eq", Operator::Eq),
    ("ne", Operator::Ne),
    ("ge", Operator::Ge),
    ("gt", Operator::Gt),
    ("le", Operator::Le),
    ("lt", Operator::Lt),
    ("and", Operator::And),
    ("or", Operator::Or),
    ("xor", Operator::Xor),
    ("not", Operator::Not),
    ("if", Operator::If),
    ("ifelse", Operator::IfElse),
    ("for", Operator::For),
    ("forall", Operator::Forall),
    ("repeat", Operator::Repeat),
    ("loop", Operator::Loop),
    ("exit", Operator::Exit),
    ("stop", Operator::Stop),
    ("stopped", Operator::Stopped),
    ("quit", Operator::Quit),
    ("exec", Operator::Exec),
    ("array", Operator::Array),
    ("length", Operator::Length),
    ("get", Operator::Get),
    ("getinterval", Operator::GetInterval),
    ("put", Operator::Put),
    ("putinterval", Operator::PutInterval),
    ("aload", Operator::ALoad),
    ("astore", Operator::AStore),
    ("dict", Operator::Dict),
    ("begin", Operator::Begin),
    ("end", Operator::End),
    ("def", Operator::Def),
    ("load", Operator::Load),
    ("store", Operator::Store),
    ("known", Operator::Known),
    ("where", Operator::Where),
    ("undef", Operator::Undef),
    ("currentdict", Operator::CurrentDict),
    ("countdictstack", Operator::CountDictStack),
    ("cleardictstack", Operator::ClearDictStack),
    ("maxlength", Operator::MaxLength),
    ("string", Operator::String),
    ("token", Operator::Token),
    ("search", Operator::Search),
    ("anchorsearch", Operator::AnchorSearch),
    ("type", Operator::Type),
    ("cvi", Operator::Cvi),
    ("cvlit", Operator::Cvlit),
    ("cvn", Operator::Cvn),
    ("cvr", Operator::Cvr),
    ("cvrs", Operator::Cvrs),
    ("cvs", Operator::Cvs),
    ("cvx", Operator::Cvx),
    ("xcheck", Operator::XCheck),
    ("save", Operator::Save),
    ("restore", Operator::Restore),
    ("=", Operator::EqPrint),
    ("==", Operator::EqEqPrint),
    ("print", Operator::Print),
    ("pstack", Operator::PStack),
    ("stack", Operator::Stack),
    (".error", Operator::ErrorDefault),
    ("handleerror", Operator::HandleError),
    ("true", Operator::True),
    ("false", Operator::False),
    ("null", Operator::Null),
    ("bind", Operator::Bind),
    ("usertime", Operator::UserTime),
    ("gsave", Operator::GSave),
    ("grestore", Operator::GRestore),
    ("newpath", Operator::NewPath),
    ("moveto", Operator::MoveTo),
    ("lineto", Operator::LineTo),
    ("curveto", Operator::CurveTo),
    ("closepath", Operator::ClosePath),
    ("currentpoint", Operator::CurrentPoint),
    ("pathforall", Operator::PathForall),
    ("clip", Operator::Clip),
    ("showpage", Operator::ShowPage),
    ("setlinewidth", Operator::SetLineWidth),
    ("setlinecap", Operator::SetLineCap),
    ("setlinejoin", Operator::SetLineJoin),
    ("setmiterlimit", Operator::SetMiterLimit),
    ("setdash", Operator::SetDash),
    ("setgray", Operator::SetGray),
    ("setrgbcolor", Operator::SetRgbColor),
];

impl Operator {
    /// The name this operator was registered under, for `--name--` output.
    /// `Mark` is registered twice; the spelled-out name wins
    pub fn name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|&&(_, op)| op == self)
            .map(|&(name, _)| name)
            .unwrap_or("unknown")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_names_are_unique() {
        for (i, (a, _)) in REGISTRY.iter().enumerate() {
            for (b, _) in &REGISTRY[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(Operator::Add.name(), "add");
        assert_eq!(Operator::Mark.name(), "mark");
        assert_eq!(Operator::EndArray.name(), "]");
        assert_eq!(Operator::ErrorDefault.name(), ".error");
    }
}
