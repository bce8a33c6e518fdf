//! Wire protocol for the tree service session
//!
//! The client drives six fixed tasks. Every request starts with the task
//! code, optionally followed by one text argument. The shape of the reply
//! depends entirely on which task was sent; there is no envelope and no
//! correlation id, so both sides track the protocol state themselves.
//!
//! # Wire Format
//!
//! Every value travels as one typed unit, a single `\n`-terminated line:
//!
//! ```text
//! int <decimal>
//! str <escaped text>
//! list <escaped>\t<escaped>...
//! list
//! ```
//!
//! Text escapes `\\`, `\n`, `\t` and `\r` so tree renders and prompts can
//! span several lines without breaking the framing.
//!
//! ## Prediction sub-protocol
//! ```text
//! C: int 6
//! S: str QUERY
//! S: str <prompt>
//! S: int <branch count>
//! C: int <choice>
//! ...
//! S: str OK
//! S: str <predicted value>
//! ```

use std::fmt;

/// Tag announcing an internal node during prediction
pub const QUERY_TAG: &str = "QUERY";

/// Tag announcing that a leaf was reached during prediction
pub const TERMINAL_TAG: &str = "OK";

/// Task codes understood by the tree service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCode {
    /// List training tables in the database
    GetTablesFromDb,
    /// List serialized trees in the archive
    GetFilesFromArchive,
    /// Learn a tree from a database table
    LearnTreeFromDb,
    /// Load a previously serialized tree
    GetTreeFromFile,
    /// Render the active tree as text
    PrintTree,
    /// Walk the active tree interactively
    PredictTree,
}

impl TaskCode {
    pub const ALL: [TaskCode; 6] = [
        TaskCode::GetTablesFromDb,
        TaskCode::GetFilesFromArchive,
        TaskCode::LearnTreeFromDb,
        TaskCode::GetTreeFromFile,
        TaskCode::PrintTree,
        TaskCode::PredictTree,
    ];

    /// Integer sent as the first unit of a request
    pub fn code(self) -> i64 {
        match self {
            TaskCode::GetTablesFromDb => 1,
            TaskCode::GetFilesFromArchive => 2,
            TaskCode::LearnTreeFromDb => 3,
            TaskCode::GetTreeFromFile => 4,
            TaskCode::PrintTree => 5,
            TaskCode::PredictTree => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    /// Whether the task code is followed by a text argument
    pub fn takes_argument(self) -> bool {
        matches!(self, TaskCode::LearnTreeFromDb | TaskCode::GetTreeFromFile)
    }
}

impl fmt::Display for TaskCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskCode::GetTablesFromDb => "get-tables-from-db",
            TaskCode::GetFilesFromArchive => "get-files-from-archive",
            TaskCode::LearnTreeFromDb => "learn-tree-from-db",
            TaskCode::GetTreeFromFile => "get-tree-from-file",
            TaskCode::PrintTree => "print-tree",
            TaskCode::PredictTree => "predict-tree",
        };
        f.write_str(name)
    }
}

/// Reserved reply values carrying a successful but negative outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultSentinel {
    Ok,
    DataError,
    TableNotFound,
    FileNotFound,
    NoTablesFound,
    NoFilesFound,
}

impl ResultSentinel {
    pub const ALL: [ResultSentinel; 6] = [
        ResultSentinel::Ok,
        ResultSentinel::DataError,
        ResultSentinel::TableNotFound,
        ResultSentinel::FileNotFound,
        ResultSentinel::NoTablesFound,
        ResultSentinel::NoFilesFound,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultSentinel::Ok => "ok",
            ResultSentinel::DataError => "dataError",
            ResultSentinel::TableNotFound => "tableNotFound",
            ResultSentinel::FileNotFound => "fileNotFound",
            ResultSentinel::NoTablesFound => "NoTablesFound",
            ResultSentinel::NoFilesFound => "NoFilesFound",
        }
    }

    /// Match a text payload against the sentinel set
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl fmt::Display for ResultSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed value on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl Unit {
    pub fn text(s: impl Into<String>) -> Self {
        Unit::Text(s.into())
    }

    /// Name of the unit's type, as used in the line prefix
    pub fn kind(&self) -> &'static str {
        match self {
            Unit::Int(_) => "int",
            Unit::Text(_) => "str",
            Unit::List(_) => "list",
        }
    }

    /// Encode the unit as a single newline-terminated line
    pub fn encode(&self) -> String {
        match self {
            Unit::Int(n) => format!("int {n}\n"),
            Unit::Text(s) => format!("str {}\n", escape(s)),
            Unit::List(items) if items.is_empty() => "list\n".to_string(),
            Unit::List(items) => {
                let fields: Vec<String> = items.iter().map(|i| escape(i)).collect();
                format!("list {}\n", fields.join("\t"))
            }
        }
    }

    /// Decode a unit from one line (trailing newline optional)
    pub fn decode(line: &str) -> Result<Self, String> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        let (kind, payload) = match line.split_once(' ') {
            Some((kind, payload)) => (kind, Some(payload)),
            None => (line, None),
        };

        match (kind, payload) {
            ("int", Some(p)) => p
                .parse()
                .map(Unit::Int)
                .map_err(|e| format!("invalid integer {p:?}: {e}")),
            ("int", None) => Err("integer unit without a value".to_string()),
            ("str", p) => unescape(p.unwrap_or("")).map(Unit::Text),
            ("list", None) => Ok(Unit::List(Vec::new())),
            ("list", Some(p)) => p
                .split('\t')
                .map(unescape)
                .collect::<Result<Vec<_>, _>>()
                .map(Unit::List),
            _ => Err(format!("unknown unit type: {kind}")),
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Int(n) => write!(f, "{n}"),
            Unit::Text(s) => f.write_str(s),
            Unit::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String, String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("invalid escape sequence: \\{other}")),
            None => return Err("dangling escape at end of field".to_string()),
        }
    }
    Ok(out)
}

/// Reply to a listing task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    /// Nothing to choose from
    Empty,
    /// Selectable table or file names
    Items(Vec<String>),
}

impl Listing {
    /// Interpret a listing reply, folding every form of "nothing" into `Empty`.
    ///
    /// The service signals emptiness either with a bare sentinel, a list
    /// holding only the sentinel, or an empty list. Sentinels mixed into a
    /// longer list are dropped so they can never be picked as names.
    pub fn from_unit(unit: Unit, empty: ResultSentinel) -> Result<Self, String> {
        let items = match unit {
            Unit::Text(s) if s == empty.as_str() => return Ok(Listing::Empty),
            Unit::Text(s) => vec![s],
            Unit::List(items) => items,
            Unit::Int(n) => return Err(format!("expected a name list, got integer {n}")),
        };

        let items: Vec<String> = items
            .into_iter()
            .filter(|i| ResultSentinel::parse(i) != Some(empty))
            .collect();

        if items.is_empty() {
            Ok(Listing::Empty)
        } else {
            Ok(Listing::Items(items))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Listing::Empty => false,
            Listing::Items(items) => items.iter().any(|i| i == name),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Listing::Empty)
    }
}

/// Outcome of learning a tree from a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// Tree built and held by the server for this session
    Learned,
    /// Training data was malformed; server tree state is undefined
    DataError,
    /// No such table; another name may be tried
    TableNotFound,
}

/// Outcome of loading a serialized tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    FileNotFound,
}

/// One step of the prediction sub-protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionTurn {
    /// Internal node: the operator picks one of `branch_count` children
    Query { prompt: String, branch_count: u32 },
    /// Leaf node carrying the predicted value
    Terminal { value: String },
}
