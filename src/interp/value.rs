use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::ast::FunctionDef;
use super::error::{type_error, value_error, ExcType, ExceptionValue, PyException, PyResult};
use super::eval::Interpreter;

pub type Scope = Rc<RefCell<IndexMap<String, Value>>>;

/// Largest string or sequence a single operation may build.
pub const MAX_ALLOC_LEN: usize = 1 << 26;

/// Refuses to build a `len`-item result past `MAX_ALLOC_LEN`.
pub fn check_alloc(len: usize, what: &str) -> PyResult<()> {
    if len > MAX_ALLOC_LEN {
        return Err(PyException::new(
            ExcType::MemoryError,
            format!("{} is too large", what),
        ));
    }
    Ok(())
}

const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// The integer equal to `f`, if it is integral and fits in 64 bits.
pub fn exact_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f)).then_some(f as i64)
}

/// Truncates toward zero, raising instead of saturating.
pub fn float_to_int(f: f64) -> PyResult<i64> {
    if f.is_nan() {
        return value_error("cannot convert float NaN to integer");
    }
    if f.is_infinite() {
        return Err(PyException::new(
            ExcType::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    exact_int(f.trunc()).ok_or_else(|| {
        PyException::new(
            ExcType::OverflowError,
            "cannot convert float to integer: out of 64-bit range",
        )
    })
}

/// A length as a script-visible int.
pub fn len_to_int(len: usize) -> PyResult<i64> {
    i64::try_from(len).map_err(|_| {
        PyException::new(
            ExcType::OverflowError,
            "cannot fit 'int' into an index-sized integer",
        )
    })
}

/// Signature shared by builtin and host-provided callables.
pub type NativeFn = dyn Fn(&mut Interpreter, Args) -> PyResult<Value>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Function(Rc<Function>),
    Builtin(&'static Builtin),
    Native(Rc<NativeFunction>),
    Method(Rc<BoundMethod>),
    Module(Rc<Module>),
    Type(TypeTag),
    Exception(Rc<ExceptionValue>),
    Host(Rc<HostObject>),
}

/// Containers nested deeper than this cannot be rendered or hashed.
pub const MAX_NESTED_DEPTH: usize = 1000;

fn too_deep(doing: &str) -> PyException {
    PyException::new(
        ExcType::RecursionError,
        format!("maximum recursion depth exceeded while {}", doing),
    )
}

// Children of uniquely owned containers are moved onto a work list, so
// releasing `[[[...]]]` never recurses.
impl Drop for Value {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_children(self, &mut pending);
        while let Some(mut value) = pending.pop() {
            take_children(&mut value, &mut pending);
        }
    }
}

fn take_children(value: &mut Value, pending: &mut Vec<Value>) {
    match value {
        Value::List(items) => {
            if let Some(cell) = Rc::get_mut(items) {
                pending.append(cell.get_mut());
            }
        }
        Value::Tuple(items) => {
            if let Some(items) = Rc::get_mut(items) {
                pending.append(items);
            }
        }
        Value::Dict(dict) => {
            if let Some(cell) = Rc::get_mut(dict) {
                cell.get_mut().drain_into(pending);
            }
        }
        _ => {}
    }
}

/// Builtin types and exception classes, as first-class values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Range,
    Function,
    BuiltinFunction,
    Method,
    Module,
    Type,
    Host,
    Exc(ExcType),
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::NoneType => "NoneType",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Str => "str",
            TypeTag::List => "list",
            TypeTag::Tuple => "tuple",
            TypeTag::Dict => "dict",
            TypeTag::Range => "range",
            TypeTag::Function => "function",
            TypeTag::BuiltinFunction => "builtin_function_or_method",
            TypeTag::Method => "method",
            TypeTag::Module => "module",
            TypeTag::Type => "type",
            TypeTag::Host => "object",
            TypeTag::Exc(kind) => kind.name(),
        }
    }

    /// Types reachable by name from user code.
    pub fn from_builtin_name(name: &str) -> Option<TypeTag> {
        let tag = match name {
            "bool" => TypeTag::Bool,
            "int" => TypeTag::Int,
            "float" => TypeTag::Float,
            "str" => TypeTag::Str,
            "list" => TypeTag::List,
            "tuple" => TypeTag::Tuple,
            "dict" => TypeTag::Dict,
            "range" => TypeTag::Range,
            "type" => TypeTag::Type,
            "object" => TypeTag::Host,
            _ => return None,
        };
        Some(tag)
    }
}

pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub globals: Namespace,
    pub closure: Vec<Scope>,
}

pub struct Builtin {
    pub name: &'static str,
    pub call: fn(&mut Interpreter, Args) -> PyResult<Value>,
}

pub struct NativeFunction {
    pub name: String,
    pub call: Box<NativeFn>,
}

impl NativeFunction {
    pub fn value(
        name: impl Into<String>,
        call: impl Fn(&mut Interpreter, Args) -> PyResult<Value> + 'static,
    ) -> Value {
        Value::Native(Rc::new(Self {
            name: name.into(),
            call: Box::new(call),
        }))
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

pub struct Module {
    pub name: String,
    pub attrs: RefCell<IndexMap<String, Value>>,
}

impl Module {
    pub fn value(name: &str, attrs: IndexMap<String, Value>) -> Value {
        Value::Module(Rc::new(Self {
            name: name.to_string(),
            attrs: RefCell::new(attrs),
        }))
    }
}

/// An opaque object owned by the embedding application. User code sees its
/// attributes; assigning an attribute mutates the object for every holder.
pub struct HostObject {
    pub type_name: String,
    pub attrs: RefCell<IndexMap<String, Value>>,
    pub repr: Option<String>,
}

impl HostObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attrs: RefCell::new(IndexMap::new()),
            repr: None,
        }
    }

    pub fn with_attr(self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.borrow_mut().insert(name.into(), value);
        self
    }

    pub fn with_repr(mut self, repr: impl Into<String>) -> Self {
        self.repr = Some(repr.into());
        self
    }

    pub fn into_value(self) -> Value {
        Value::Host(Rc::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let len = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let value = self.start as i128 + self.step as i128 * index as i128;
        i64::try_from(value).ok()
    }

    /// `self[lo:hi:step]`, computed without materialising the positions.
    pub fn slice(&self, lo: Option<i64>, hi: Option<i64>, step: Option<i64>) -> PyResult<RangeValue> {
        let step = step.unwrap_or(1);
        if step == 0 {
            return value_error("slice step cannot be zero");
        }
        let (first, end) = slice_bounds(self.len(), lo, hi, step);
        let stride = (step as i128).abs();
        let span = if step > 0 { end - first } else { first - end };
        let count = (span.max(0) + stride - 1) / stride;
        let new_step = self.step as i128 * step as i128;
        let start = self.start as i128 + self.step as i128 * first;
        let stop = start + new_step * count;
        // Elements fit in i64 and the stop only has to lie past the last
        // one, so clamping keeps the slice exact.
        let clamp = |v: i128| v.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        let step = i64::try_from(new_step).map_err(|_| {
            PyException::new(
                ExcType::OverflowError,
                "range slice step does not fit in 64-bit integers",
            )
        })?;
        let start = clamp(start);
        let stop = if count == 0 { start } else { clamp(stop) };
        Ok(RangeValue { start, stop, step })
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value as i128 - self.start as i128) % self.step as i128 == 0
    }
}

/// Dictionary key. Equal numbers hash alike, so `1`, `1.0` and `True` are
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Type(&'static str),
    Identity(usize),
}

impl HashKey {
    pub fn from_value(value: &Value) -> PyResult<HashKey> {
        Self::nested(value, 0)
    }

    fn nested(value: &Value, depth: usize) -> PyResult<HashKey> {
        if depth > MAX_NESTED_DEPTH {
            return Err(too_deep("hashing an object"));
        }
        let key = match value {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(*b as i64),
            Value::Int(i) => HashKey::Int(*i),
            Value::Float(f) => match exact_int(*f) {
                Some(i) => HashKey::Int(i),
                None => HashKey::Float(f.to_bits()),
            },
            Value::Str(s) => HashKey::Str(s.clone()),
            Value::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(|item| HashKey::nested(item, depth + 1))
                    .collect::<PyResult<_>>()?,
            ),
            Value::Range(r) => HashKey::Tuple(vec![
                HashKey::Type("range"),
                HashKey::Int(r.start),
                HashKey::Int(r.stop),
                HashKey::Int(r.step),
            ]),
            Value::Type(tag) => HashKey::Type(tag.name()),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as *const () as usize),
            Value::Builtin(b) => HashKey::Identity(*b as *const Builtin as usize),
            Value::Native(n) => HashKey::Identity(Rc::as_ptr(n) as *const () as usize),
            Value::Module(m) => HashKey::Identity(Rc::as_ptr(m) as *const () as usize),
            Value::Host(h) => HashKey::Identity(Rc::as_ptr(h) as *const () as usize),
            Value::Exception(e) => HashKey::Identity(Rc::as_ptr(e) as *const () as usize),
            Value::List(_) | Value::Dict(_) | Value::Method(_) => {
                return type_error(format!("unhashable type: '{}'", value.type_name()))
            }
        };
        Ok(key)
    }
}

/// Insertion-ordered mapping. The original key value is kept next to the
/// stored value so iteration yields keys as they were written.
#[derive(Default, Clone)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> PyResult<Option<Value>> {
        let hash = HashKey::from_value(key)?;
        Ok(self.entries.get(&hash).map(|(_, v)| v.clone()))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> PyResult<()> {
        let hash = HashKey::from_value(&key)?;
        match self.entries.get_mut(&hash) {
            Some(entry) => entry.1 = value,
            None => {
                self.entries.insert(hash, (key, value));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> PyResult<Option<Value>> {
        let hash = HashKey::from_value(key)?;
        Ok(self.entries.shift_remove(&hash).map(|(_, v)| v))
    }

    pub fn contains(&self, key: &Value) -> PyResult<bool> {
        Ok(self.entries.contains_key(&HashKey::from_value(key)?))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        for (_, (key, value)) in self.entries.drain(..) {
            out.push(key);
            out.push(value);
        }
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.values().cloned().collect()
    }
}

/// The module-level scope of one tab. Cloning shares the same underlying
/// mapping; identity is preserved across executions.
#[derive(Clone, Default)]
pub struct Namespace(Scope);

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Drops every binding. Functions hold their defining namespace, so a
    /// namespace that is going away must be cleared to free them.
    pub fn clear(&self) {
        let drained: Vec<Value> = self.0.borrow_mut().drain(..).map(|(_, v)| v).collect();
        drop(drained);
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn to_dict(&self) -> Dict {
        let mut dict = Dict::default();
        for (name, value) in self.0.borrow().iter() {
            let _ = dict.insert(Value::str(name), value.clone());
        }
        dict
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Call arguments after `*`/`**` expansion.
#[derive(Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let index = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(index).1)
    }

    pub fn reject_keywords(&self, function: &str) -> PyResult<()> {
        match self.keywords.first() {
            Some((name, _)) => type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            )),
            None => Ok(()),
        }
    }

    /// Checks the positional count and that no keywords remain.
    pub fn check(&self, function: &str, min: usize, max: usize) -> PyResult<()> {
        self.reject_keywords(function)?;
        let given = self.positional.len();
        if min == max && given != min {
            let noun = if min == 1 { "argument" } else { "arguments" };
            return type_error(format!(
                "{}() takes exactly {} {} ({} given)",
                function, min, noun, given
            ));
        }
        if given < min {
            return type_error(format!(
                "{}() expected at least {} arguments, got {}",
                function, min, given
            ));
        }
        if given > max {
            return type_error(format!(
                "{}() expected at most {} arguments, got {}",
                function, max, given
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Lazily produced items of an iterable value. Containers are snapshotted
/// when iteration starts.
pub enum PyIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for PyIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            PyIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = match current.checked_add(*step) {
                    Some(n) => n,
                    None => *stop,
                };
                Some(Value::Int(current))
            }
            PyIter::Items(items) => items.next(),
        }
    }
}

impl Value {
    pub fn str(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::None => TypeTag::NoneType,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::Dict(_) => TypeTag::Dict,
            Value::Range(_) => TypeTag::Range,
            Value::Function(_) => TypeTag::Function,
            Value::Builtin(_) | Value::Native(_) => TypeTag::BuiltinFunction,
            Value::Method(_) => TypeTag::Method,
            Value::Module(_) => TypeTag::Module,
            Value::Type(_) => TypeTag::Type,
            Value::Exception(e) => TypeTag::Exc(e.kind),
            Value::Host(_) => TypeTag::Host,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Host(host) => &host.type_name,
            other => other.type_tag().name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    pub fn as_num(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Integer view used for indexing; `bool` counts as an integer.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn expect_int(&self) -> PyResult<i64> {
        self.as_index().ok_or_else(|| {
            PyException::new(
                ExcType::TypeError,
                format!(
                    "'{}' object cannot be interpreted as an integer",
                    self.type_name()
                ),
            )
        })
    }

    pub fn expect_str(&self, what: &str) -> PyResult<Rc<str>> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            other => type_error(format!(
                "{} must be str, not {}",
                what,
                other.type_name()
            )),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Builtin(_)
                | Value::Native(_)
                | Value::Method(_)
                | Value::Type(_)
        )
    }

    pub fn iter(&self) -> PyResult<PyIter> {
        let items = match self {
            Value::Range(r) => {
                return Ok(PyIter::Range {
                    next: r.start,
                    stop: r.stop,
                    step: r.step,
                })
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Dict(dict) => dict.borrow().keys(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))).collect(),
            other => {
                return type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                ))
            }
        };
        Ok(PyIter::Items(items.into_iter()))
    }

    /// `str()` conversion.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message(),
            other => other.repr(),
        }
    }

    /// Best-effort rendering for messages and debugging. Containers nested
    /// past [`MAX_NESTED_DEPTH`] are cut short with `...`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        if self.repr_into(&mut out, &mut Vec::new(), 0).is_err() {
            out.push_str("...");
        }
        out
    }

    /// `repr()` as user code sees it: too deep a value is a `RecursionError`.
    pub fn try_repr(&self) -> PyResult<String> {
        let mut out = String::new();
        self.repr_into(&mut out, &mut Vec::new(), 0)?;
        Ok(out)
    }

    /// `str()` as user code sees it.
    pub fn try_to_str(&self) -> PyResult<String> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            Value::Exception(e) => Ok(e.message()),
            other => other.try_repr(),
        }
    }

    fn repr_into(&self, out: &mut String, seen: &mut Vec<usize>, depth: usize) -> PyResult<()> {
        if depth > MAX_NESTED_DEPTH {
            return Err(too_deep("getting the repr of an object"));
        }
        let depth = depth + 1;
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&repr_str(s)),
            Value::List(items) => {
                let id = Rc::as_ptr(items) as *const () as usize;
                if seen.contains(&id) {
                    out.push_str("[...]");
                    return Ok(());
                }
                seen.push(id);
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, seen, depth)?;
                }
                out.push(']');
                seen.pop();
            }
            Value::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, seen, depth)?;
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as *const () as usize;
                if seen.contains(&id) {
                    out.push_str("{...}");
                    return Ok(());
                }
                seen.push(id);
                out.push('{');
                for (i, (key, value)) in dict.borrow().items().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.repr_into(out, seen, depth)?;
                    out.push_str(": ");
                    value.repr_into(out, seen, depth)?;
                }
                out.push('}');
                seen.pop();
            }
            Value::Range(r) => {
                if r.step == 1 {
                    out.push_str(&format!("range({}, {})", r.start, r.stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Value::Native(n) => out.push_str(&format!("<built-in function {}>", n.name)),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::Module(m) => out.push_str(&format!("<module '{}' (built-in)>", m.name)),
            Value::Type(tag) => out.push_str(&format!("<class '{}'>", tag.name())),
            Value::Exception(e) => out.push_str(&e.repr()),
            Value::Host(h) => match &h.repr {
                Some(repr) => out.push_str(repr),
                None => out.push_str(&format!("<{} object>", h.type_name)),
            },
        }
        Ok(())
    }

    /// `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => x == y,
                _ => a.to_f64() == b.to_f64(),
            };
        }
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.items().iter().all(|(key, value)| {
                        matches!(b.get(key), Ok(Some(other)) if other.py_eq(value))
                    })
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => self.is_same(other),
        }
    }

    /// `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. `None` means unordered (NaN).
    pub fn partial_order(&self, other: &Value, op: &str) -> PyResult<Option<Ordering>> {
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return Ok(match (a, b) {
                (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
                _ => a.to_f64().partial_cmp(&b.to_f64()),
            });
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            (Value::List(a), Value::List(b)) => seq_order(&a.borrow(), &b.borrow(), op),
            (Value::Tuple(a), Value::Tuple(b)) => seq_order(a, b, op),
            _ => type_error(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op,
                self.type_name(),
                other.type_name()
            )),
        }
    }

    /// `item in self`.
    pub fn contains(&self, item: &Value) -> PyResult<bool> {
        match self {
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_ref())),
                other => type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )),
            },
            Value::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
            Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Value::Dict(dict) => dict.borrow().contains(item),
            Value::Range(r) => Ok(match item {
                Value::Float(f) => exact_int(*f).is_some_and(|i| r.contains(i)),
                other => other.as_index().is_some_and(|i| r.contains(i)),
            }),
            other => type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            )),
        }
    }

    pub fn len(&self) -> PyResult<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(items) => Ok(items.borrow().len()),
            Value::Tuple(items) => Ok(items.len()),
            Value::Dict(dict) => Ok(dict.borrow().len()),
            Value::Range(r) => Ok(r.len()),
            other => type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )),
        }
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_order(a: &[Value], b: &[Value], op: &str) -> PyResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.partial_order(y, op);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::str(value)
    }
}

/// Shortest round-tripping float text, with the exponent style used by
/// the console (`1e+16`, `1.5e-05`).
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        if let Some((mantissa, exponent)) = text.split_once('e') {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            return format!("{}e{}{:0>2}", mantissa, sign, digits);
        }
        return text;
    }
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Resolves slice bounds against a sequence length, returning the selected
/// positions in order.
pub fn slice_indices(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> PyResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return value_error("slice step cannot be zero");
    }
    let (start, stop) = slice_bounds(len, start, stop, step);
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step as i128;
    }
    Ok(out)
}

/// Clamped `(start, stop)` positions of a slice. Wide enough for ranges
/// longer than `i64::MAX`.
fn slice_bounds(len: usize, start: Option<i64>, stop: Option<i64>, step: i64) -> (i128, i128) {
    let len = len as i128;
    let adjust = |bound: Option<i64>, default: i128| -> i128 {
        match bound {
            None => default,
            Some(v) => {
                let mut v = v as i128;
                if v < 0 {
                    v += len;
                    if v < 0 {
                        v = if step < 0 { -1 } else { 0 };
                    }
                } else if v >= len {
                    v = if step < 0 { len - 1 } else { len };
                }
                v
            }
        }
    };
    if step > 0 {
        (adjust(start, 0), adjust(stop, len))
    } else {
        (adjust(start, len - 1), adjust(stop, -1))
    }
}

/// Normalises a possibly negative index. `None` when out of range.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i128;
    let index = if index < 0 { index as i128 + len } else { index as i128 };
    (0..len).contains(&index).then_some(index as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_format() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr() {
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
    }

    #[test]
    fn test_deep_nesting_is_cut_short() {
        let mut nested = Value::list(Vec::new());
        for _ in 0..100_000 {
            nested = Value::list(vec![nested]);
        }
        assert!(nested.repr().ends_with("..."));
        assert_eq!(nested.try_repr().unwrap_err().kind(), ExcType::RecursionError);
        drop(nested);
    }

    #[test]
    fn test_numeric_keys_collapse() {
        let mut dict = Dict::default();
        dict.insert(Value::Int(1), Value::str("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("float")).unwrap();
        dict.insert(Value::Bool(true), Value::str("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.keys()[0].repr(), "1");
        assert_eq!(dict.values()[0].repr(), "'bool'");
        assert!(dict.insert(Value::list(vec![]), Value::None).is_err());
    }

    #[test]
    fn test_slices() {
        assert_eq!(slice_indices(5, Some(1), Some(3), None).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(3, Some(10), Some(20), None).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_range() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(9));
        assert!(!r.contains(10));
        let r = RangeValue { start: 5, stop: 0, step: -2 };
        assert_eq!(r.len(), 3);
        assert_eq!(r.get(2), Some(1));
    }
}
