use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Scots error messages fer the wee script runtime - gie the user a guid tellin' aff!
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HaversError {
    #[error("Och! Ah dinnae ken whit '{lexeme}' is at line {line}, column {column}")]
    UnkentToken {
        lexeme: String,
        line: usize,
        column: usize,
    },

    #[error("Haud yer wheesht! Unexpected '{found}' at line {line} - ah wis expectin' {expected}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },

    #[error("Awa' an bile yer heid! '{name}' hasnae been defined yet at line {line}")]
    UndefinedVariable { name: String, line: usize },

    #[error("Ye numpty! Tryin' tae divide by zero at line {line}")]
    DivisionByZero { line: usize },

    #[error("That's pure mince! Type error at line {line}: {message}")]
    TypeError { message: String, line: usize },

    #[error("Whit's aw this aboot? '{name}' isnae a function at line {line}")]
    NotCallable { name: String, line: usize },

    #[error("Yer bum's oot the windae! Function '{name}' expects {expected} arguments but ye gave it {got} at line {line}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
        line: usize,
    },

    #[error("Yer code's a richt guddle! Parser gave up at line {line}: {message}")]
    ParseError { message: String, line: usize },

    #[error("Jings! Something went awfy wrang: {0}")]
    InternalError(String),

    #[error(
        "Stack's fair puggled! Too many nested calls at line {line} - yer recursion's gone radge!"
    )]
    StackOverflow { line: usize },

    #[error("That string's no' finished! Missin' closing quote at line {line}")]
    UnterminatedString { line: usize },

    #[error("Yer number's aw wrang at line {line}: {value}")]
    InvalidNumber { value: String, line: usize },

    #[error("Whit are ye playin' at? '{name}' isnae an object at line {line}")]
    NotAnObject { name: String, line: usize },

    #[error("Och away! '{property}' doesnae exist on this object at line {line}")]
    UndefinedProperty { property: String, line: usize },

    #[error("Ye've fair scunnered it! Return statement ootside a function at line {line}")]
    ReturnOutsideFunction { line: usize },

    #[error("Wheesht! Yer number's too muckle at line {line} - it's overflowed!")]
    IntegerOverflow { line: usize },

    #[error("Hoachin'! Index {index} is ootwith the recurrence cache (capacity {capacity}) at line {line}")]
    OutOfRange {
        index: i64,
        capacity: usize,
        line: usize,
    },
}

impl HaversError {
    pub fn line(&self) -> Option<usize> {
        match self {
            HaversError::UnkentToken { line, .. } => Some(*line),
            HaversError::UnexpectedToken { line, .. } => Some(*line),
            HaversError::UndefinedVariable { line, .. } => Some(*line),
            HaversError::DivisionByZero { line } => Some(*line),
            HaversError::TypeError { line, .. } => Some(*line),
            HaversError::NotCallable { line, .. } => Some(*line),
            HaversError::WrongArity { line, .. } => Some(*line),
            HaversError::ParseError { line, .. } => Some(*line),
            HaversError::StackOverflow { line } => Some(*line),
            HaversError::UnterminatedString { line } => Some(*line),
            HaversError::InvalidNumber { line, .. } => Some(*line),
            HaversError::NotAnObject { line, .. } => Some(*line),
            HaversError::UndefinedProperty { line, .. } => Some(*line),
            HaversError::ReturnOutsideFunction { line } => Some(*line),
            HaversError::IntegerOverflow { line } => Some(*line),
            HaversError::OutOfRange { line, .. } => Some(*line),
            HaversError::InternalError(_) => None,
        }
    }

    /// Stamp a line on errors raised by native code that didnae ken where it wis called
    pub fn with_line_if_zero(self, at: usize) -> Self {
        match self {
            HaversError::OutOfRange {
                index,
                capacity,
                line: 0,
            } => HaversError::OutOfRange {
                index,
                capacity,
                line: at,
            },
            HaversError::TypeError { message, line: 0 } => {
                HaversError::TypeError { message, line: at }
            }
            HaversError::UndefinedProperty { property, line: 0 } => {
                HaversError::UndefinedProperty { property, line: at }
            }
            other => other,
        }
    }
}

pub type HaversResult<T> = Result<T, HaversError>;

/// Recurrence input ootwith the cache
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Index {index} is ootwith the cache - it only hauds 0..{capacity}")]
pub struct RangeError {
    pub index: i64,
    pub capacity: usize,
}

impl From<RangeError> for HaversError {
    fn from(err: RangeError) -> Self {
        HaversError::OutOfRange {
            index: err.index,
            capacity: err.capacity,
            line: 0,
        }
    }
}

/// Failures at the script executor boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("The executor's no' available: {0}")]
    Unavailable(String),

    #[error("The executor widnae compile yon unit: {0}")]
    Compile(HaversError),

    #[error("Callin' '{routine}' went wrang: {source}")]
    Invoke {
        routine: String,
        source: HaversError,
    },

    #[error("Evaluatin' the unit went wrang: {0}")]
    Eval(HaversError),

    #[error("Nae binding called '{name}' efter evaluation")]
    MissingBinding { name: String },

    #[error("The unit doesnae define a routine called '{name}'")]
    MissingRoutine { name: String },

    #[error("Wantit {expected} but got {found} back fae the executor")]
    UnexpectedType { expected: String, found: String },
}

impl ExecutorError {
    /// The script error underneath, if there is wan
    pub fn script_error(&self) -> Option<&HaversError> {
        match self {
            ExecutorError::Compile(e) | ExecutorError::Eval(e) => Some(e),
            ExecutorError::Invoke { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Whit can go wrang while preparin' or invokin' a strategy
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Executor(ExecutorError),

    #[error("Result's aff! Expected {expected} but got {got}")]
    Mismatch { expected: i64, got: i64 },
}

impl From<ExecutorError> for StrategyError {
    /// A recurrence range failure raised inside a script is still a range failure
    fn from(err: ExecutorError) -> Self {
        if let Some(HaversError::OutOfRange {
            index, capacity, ..
        }) = err.script_error()
        {
            return StrategyError::Range(RangeError {
                index: *index,
                capacity: *capacity,
            });
        }
        StrategyError::Executor(err)
    }
}

/// Which step o' a strategy's pass fell ower
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Validate,
    Invoke,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Validate => write!(f, "validate"),
            Phase::Invoke => write!(f, "invoke"),
        }
    }
}

/// A strategy that got dropped fae the results, an' why
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Strategy '{strategy}' fell ower durin' {phase}: {error}")]
pub struct StrategyFailure {
    pub strategy: String,
    pub phase: Phase,
    pub error: StrategyError,
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Cannae read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Couldnae make sense o' {what}")]
    Parse { what: String },

    #[error("Memory counters urnae available on this platform")]
    Unsupported,
}

/// Errors that stop a whole benchmark run
#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Run count must be at least 1, ye gave {count}")]
    InvalidCount { count: usize },

    #[error("A strategy called '{name}' is awready registered")]
    DuplicateStrategy { name: String },

    #[error("Snapshot failed, the run cannae continue: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Config '{}' is mince: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

pub type BenchResult<T> = Result<T, BenchError>;

/// Scots phrases fer random error decoration
pub fn random_scots_exclamation() -> &'static str {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);

    const PHRASES: &[&str] = &[
        "Och naw!",
        "Jings crivvens!",
        "Haud yer wheesht!",
        "Michty me!",
        "Help ma boab!",
        "Whit a scunner!",
        "Dearie me!",
        "Whit a fankle!",
        "Sufferin' sporrans!",
        "Yer benchmark's gone doolally!",
        "Whit's aw the stooshie?",
        "Cannae believe ma een!",
    ];

    PHRASES[seed % PHRASES.len()]
}
