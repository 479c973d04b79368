use std::fmt;
use std::rc::Rc;

use super::value::Value;

pub type PyResult<T> = Result<T, PyException>;

/// Source of one execution. Functions defined in it keep it alive so a
/// traceback raised long after the defining execution can still quote lines.
#[derive(Debug)]
pub struct SourceText {
    pub name: String,
    lines: Vec<String>,
}

impl SourceText {
    pub fn new(name: impl Into<String>, text: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            lines: text.lines().map(str::to_string).collect(),
        })
    }

    /// 1-based line lookup.
    pub fn line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
    }
}

/// A parse failure. `column` is 1-based and counted in characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub source_line: String,
    pub filename: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            source_line: String::new(),
            filename: String::new(),
        }
    }

    /// Attaches the file name and offending line text.
    pub fn located(mut self, source: &SourceText) -> Self {
        self.filename = source.name.clone();
        self.source_line = source.line(self.line).unwrap_or_default().to_string();
        self
    }

    /// Renders the error the way the console shows it: header, offending
    /// line, caret, message.
    pub fn format(&self) -> String {
        let mut out = format!("  File \"{}\", line {}\n", self.filename, self.line);
        let trimmed = self.source_line.trim_start();
        if !trimmed.trim_end().is_empty() {
            let indent = self.source_line.chars().count() - trimmed.chars().count();
            let caret = self.column.saturating_sub(1).saturating_sub(indent);
            out.push_str(&format!("    {}\n", trimmed.trim_end()));
            out.push_str(&format!("    {}^\n", " ".repeat(caret)));
        }
        out.push_str(&format!("SyntaxError: {}\n", self.message));
        out
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.line, self.column
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Built-in exception classes. The hierarchy is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    Exception,
    ArithmeticError,
    ZeroDivisionError,
    OverflowError,
    LookupError,
    IndexError,
    KeyError,
    AssertionError,
    AttributeError,
    EOFError,
    ImportError,
    ModuleNotFoundError,
    MemoryError,
    NameError,
    UnboundLocalError,
    OSError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    StopIteration,
    TypeError,
    ValueError,
}

impl ExcType {
    pub const ALL: &'static [ExcType] = &[
        ExcType::BaseException,
        ExcType::SystemExit,
        ExcType::KeyboardInterrupt,
        ExcType::Exception,
        ExcType::ArithmeticError,
        ExcType::ZeroDivisionError,
        ExcType::OverflowError,
        ExcType::LookupError,
        ExcType::IndexError,
        ExcType::KeyError,
        ExcType::AssertionError,
        ExcType::AttributeError,
        ExcType::EOFError,
        ExcType::ImportError,
        ExcType::ModuleNotFoundError,
        ExcType::MemoryError,
        ExcType::NameError,
        ExcType::UnboundLocalError,
        ExcType::OSError,
        ExcType::RuntimeError,
        ExcType::NotImplementedError,
        ExcType::RecursionError,
        ExcType::StopIteration,
        ExcType::TypeError,
        ExcType::ValueError,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExcType::BaseException => "BaseException",
            ExcType::SystemExit => "SystemExit",
            ExcType::KeyboardInterrupt => "KeyboardInterrupt",
            ExcType::Exception => "Exception",
            ExcType::ArithmeticError => "ArithmeticError",
            ExcType::ZeroDivisionError => "ZeroDivisionError",
            ExcType::OverflowError => "OverflowError",
            ExcType::LookupError => "LookupError",
            ExcType::IndexError => "IndexError",
            ExcType::KeyError => "KeyError",
            ExcType::AssertionError => "AssertionError",
            ExcType::AttributeError => "AttributeError",
            ExcType::EOFError => "EOFError",
            ExcType::ImportError => "ImportError",
            ExcType::ModuleNotFoundError => "ModuleNotFoundError",
            ExcType::MemoryError => "MemoryError",
            ExcType::NameError => "NameError",
            ExcType::UnboundLocalError => "UnboundLocalError",
            ExcType::OSError => "OSError",
            ExcType::RuntimeError => "RuntimeError",
            ExcType::NotImplementedError => "NotImplementedError",
            ExcType::RecursionError => "RecursionError",
            ExcType::StopIteration => "StopIteration",
            ExcType::TypeError => "TypeError",
            ExcType::ValueError => "ValueError",
        }
    }

    pub fn parent(self) -> Option<ExcType> {
        use ExcType::*;
        match self {
            BaseException => None,
            SystemExit | KeyboardInterrupt | Exception => Some(BaseException),
            ZeroDivisionError | OverflowError => Some(ArithmeticError),
            IndexError | KeyError => Some(LookupError),
            ModuleNotFoundError => Some(ImportError),
            UnboundLocalError => Some(NameError),
            NotImplementedError | RecursionError => Some(RuntimeError),
            _ => Some(Exception),
        }
    }

    pub fn is_subclass_of(self, other: ExcType) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn from_name(name: &str) -> Option<ExcType> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

/// An exception instance as seen by user code.
#[derive(Debug)]
pub struct ExceptionValue {
    pub kind: ExcType,
    pub args: Vec<Value>,
}

impl ExceptionValue {
    pub fn new(kind: ExcType, args: Vec<Value>) -> Self {
        Self { kind, args }
    }

    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] if self.kind == ExcType::KeyError => single.repr(),
            [single] => single.to_str(),
            many => Value::tuple(many.to_vec()).repr(),
        }
    }

    pub fn repr(&self) -> String {
        let args: Vec<String> = self.args.iter().map(Value::repr).collect();
        format!("{}({})", self.kind.name(), args.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub name: Rc<str>,
    pub line: usize,
    pub source: Rc<SourceText>,
}

/// A raised exception travelling up the interpreter's call stack. Frames
/// are appended as the exception leaves each user function, so the
/// innermost frame is pushed first.
#[derive(Debug, Clone)]
pub struct PyException {
    pub value: Rc<ExceptionValue>,
    traceback: Vec<TraceEntry>,
}

impl PyException {
    pub fn new(kind: ExcType, message: impl Into<String>) -> Self {
        let message: String = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::str(&message)]
        };
        Self::from_value(Rc::new(ExceptionValue::new(kind, args)))
    }

    pub fn from_value(value: Rc<ExceptionValue>) -> Self {
        Self {
            value,
            traceback: Vec::new(),
        }
    }

    pub fn kind(&self) -> ExcType {
        self.value.kind
    }

    pub fn message(&self) -> String {
        self.value.message()
    }

    pub fn push_frame(&mut self, name: Rc<str>, line: usize, source: Rc<SourceText>) {
        self.traceback.push(TraceEntry { name, line, source });
    }

    pub fn frames(&self) -> impl Iterator<Item = &TraceEntry> {
        self.traceback.iter().rev()
    }

    /// The last line of a traceback: `Kind: message`, or just `Kind`.
    pub fn summary(&self) -> String {
        let message = self.message();
        if message.is_empty() {
            self.kind().name().to_string()
        } else {
            format!("{}: {}", self.kind().name(), message)
        }
    }

    pub fn format(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for entry in self.frames() {
            out.push_str(&format!(
                "  File \"{}\", line {}, in {}\n",
                entry.source.name, entry.line, entry.name
            ));
            if let Some(text) = entry.source.line(entry.line) {
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&format!("    {}\n", text));
                }
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }
}

impl fmt::Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

pub fn type_error<T>(message: impl Into<String>) -> PyResult<T> {
    Err(PyException::new(ExcType::TypeError, message))
}

pub fn value_error<T>(message: impl Into<String>) -> PyResult<T> {
    Err(PyException::new(ExcType::ValueError, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy() {
        assert!(ExcType::ZeroDivisionError.is_subclass_of(ExcType::ArithmeticError));
        assert!(ExcType::KeyError.is_subclass_of(ExcType::Exception));
        assert!(!ExcType::KeyboardInterrupt.is_subclass_of(ExcType::Exception));
        assert!(ExcType::KeyboardInterrupt.is_subclass_of(ExcType::BaseException));
        assert_eq!(ExcType::from_name("ValueError"), Some(ExcType::ValueError));
        assert_eq!(ExcType::from_name("Nope"), None);
    }

    #[test]
    fn test_syntax_error_caret() {
        let source = SourceText::new("<console>", "x = 1\n    y = (1 +\n");
        let err = SyntaxError::new("invalid syntax", 2, 12).located(&source);
        let text = err.format();
        assert!(text.starts_with("  File \"<console>\", line 2\n"));
        assert!(text.contains("    y = (1 +\n"));
        assert!(text.contains("           ^\n"));
        assert!(text.ends_with("SyntaxError: invalid syntax\n"));
    }

    #[test]
    fn test_traceback_layout() {
        let source = SourceText::new("<console>", "def f():\n    raise ValueError('boom')\nf()");
        let mut exc = PyException::new(ExcType::ValueError, "boom");
        exc.push_frame(Rc::from("f"), 2, source.clone());
        exc.push_frame(Rc::from("<module>"), 3, source);
        let text = exc.format();
        let expected = "Traceback (most recent call last):\n  File \"<console>\", line 3, in <module>\n    f()\n  File \"<console>\", line 2, in f\n    raise ValueError('boom')\nValueError: boom\n";
        assert_eq!(text, expected);
    }
}
