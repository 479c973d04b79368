//! Builtin functions, type constructors, methods of builtin types and the
//! importable modules.

use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

use super::ast::BinOp;
use super::error::{type_error, value_error, ExcType, ExceptionValue, PyException, PyResult};
use super::eval::Interpreter;
use super::format::str_format;
use super::ops;
use super::value::{
    check_alloc, float_to_int, len_to_int, normalize_index, Args, Builtin, Dict, HostObject,
    Module, NativeFunction, Num, RangeValue, TypeTag, Value,
};
use crate::redirect::{self, Stream};

static BUILTINS: &[Builtin] = &[
    Builtin { name: "abs", call: builtin_abs },
    Builtin { name: "all", call: builtin_all },
    Builtin { name: "any", call: builtin_any },
    Builtin { name: "callable", call: builtin_callable },
    Builtin { name: "chr", call: builtin_chr },
    Builtin { name: "dir", call: builtin_dir },
    Builtin { name: "enumerate", call: builtin_enumerate },
    Builtin { name: "getattr", call: builtin_getattr },
    Builtin { name: "globals", call: builtin_globals },
    Builtin { name: "hasattr", call: builtin_hasattr },
    Builtin { name: "input", call: builtin_input },
    Builtin { name: "isinstance", call: builtin_isinstance },
    Builtin { name: "len", call: builtin_len },
    Builtin { name: "max", call: builtin_max },
    Builtin { name: "min", call: builtin_min },
    Builtin { name: "ord", call: builtin_ord },
    Builtin { name: "print", call: builtin_print },
    Builtin { name: "repr", call: builtin_repr },
    Builtin { name: "reversed", call: builtin_reversed },
    Builtin { name: "round", call: builtin_round },
    Builtin { name: "setattr", call: builtin_setattr },
    Builtin { name: "sorted", call: builtin_sorted },
    Builtin { name: "sum", call: builtin_sum },
    Builtin { name: "zip", call: builtin_zip },
];

const TYPE_NAMES: &[&str] = &[
    "bool", "dict", "float", "int", "list", "object", "range", "str", "tuple", "type",
];

/// Resolves a name in the builtin scope.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(builtin) = BUILTINS.iter().find(|b| b.name == name) {
        return Some(Value::Builtin(builtin));
    }
    if let Some(tag) = TypeTag::from_builtin_name(name) {
        return Some(Value::Type(tag));
    }
    ExcType::from_name(name).map(|kind| Value::Type(TypeTag::Exc(kind)))
}

/// Every builtin name, sorted.
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTINS.iter().map(|b| b.name).collect();
    names.extend(TYPE_NAMES);
    names.extend(ExcType::ALL.iter().map(|kind| kind.name()));
    names.sort_unstable();
    names
}

/// The `__builtins__` module seeded into every namespace.
pub fn builtins_module() -> Value {
    let attrs = names()
        .into_iter()
        .filter_map(|name| lookup(name).map(|value| (name.to_string(), value)))
        .collect();
    Module::value("builtins", attrs)
}

fn single<'a>(args: &'a Args, function: &str) -> PyResult<&'a Value> {
    args.check(function, 1, 1)?;
    args.get(0)
        .ok_or_else(|| PyException::new(ExcType::TypeError, format!("{}() missing argument", function)))
}

fn call1(interp: &mut Interpreter, func: &Value, arg: Value) -> PyResult<Value> {
    interp.call(func, Args::new(vec![arg]))
}

fn builtin_print(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let sep = args.take_keyword("sep");
    let end = args.take_keyword("end");
    let file = args.take_keyword("file");
    let _flush = args.take_keyword("flush");
    args.reject_keywords("print")?;

    let text_option = |value: Option<Value>, default: &str, what: &str| -> PyResult<String> {
        match value.as_ref() {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => type_error(format!(
                "{} must be None or a string, not {}",
                what,
                other.type_name()
            )),
        }
    };
    let sep = text_option(sep, " ", "sep")?;
    let end = text_option(end, "\n", "end")?;
    let mut text = args
        .positional
        .iter()
        .map(Value::try_to_str)
        .collect::<PyResult<Vec<_>>>()?
        .join(&sep);
    text.push_str(&end);

    match file {
        None | Some(Value::None) => redirect::write(Stream::Stdout, &text),
        Some(target) => {
            let write = interp.get_attr(&target, "write")?;
            interp.call(&write, Args::new(vec![Value::str(&text)]))?;
        }
    }
    Ok(Value::None)
}

fn builtin_input(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("input", 0, 1)?;
    let prompt = args.get(0).map(Value::to_str).unwrap_or_default();
    match redirect::read_line(&prompt) {
        Ok(Some(line)) => Ok(Value::str(line.trim_end_matches(['\n', '\r']))),
        Ok(None) => Err(PyException::new(ExcType::EOFError, "EOF when reading a line")),
        Err(e) => Err(PyException::new(ExcType::OSError, e.to_string())),
    }
}

fn builtin_len(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    Ok(Value::Int(len_to_int(single(&args, "len")?.len()?)?))
}

fn builtin_repr(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    Ok(Value::str(&single(&args, "repr")?.try_repr()?))
}

fn builtin_abs(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let value = single(&args, "abs")?;
    match value.as_num() {
        Some(Num::Int(i)) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| PyException::new(ExcType::OverflowError, "integer overflow")),
        Some(Num::Float(f)) => Ok(Value::Float(f.abs())),
        None => type_error(format!(
            "bad operand type for abs(): '{}'",
            value.type_name()
        )),
    }
}

fn builtin_all(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let mut items = single(&args, "all")?.iter()?;
    Ok(Value::Bool(items.all(|v| v.truthy())))
}

fn builtin_any(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let mut items = single(&args, "any")?.iter()?;
    Ok(Value::Bool(items.any(|v| v.truthy())))
}

fn builtin_callable(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    Ok(Value::Bool(single(&args, "callable")?.is_callable()))
}

fn builtin_chr(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let code = single(&args, "chr")?.expect_int()?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
        .ok_or_else(|| PyException::new(ExcType::ValueError, "chr() arg not in range(0x110000)"))
}

fn builtin_ord(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let text = single(&args, "ord")?.expect_str("ord() argument")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        )),
    }
}

fn builtin_dir(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("dir", 0, 1)?;
    let mut names: Vec<String> = match args.get(0) {
        None => interp.scope_names(),
        Some(Value::Module(m)) => m.attrs.borrow().keys().cloned().collect(),
        Some(Value::Host(h)) => h.attrs.borrow().keys().cloned().collect(),
        Some(other) => method_names(other).iter().map(|s| s.to_string()).collect(),
    };
    names.sort();
    Ok(Value::list(names.iter().map(|n| Value::str(n)).collect()))
}

fn builtin_enumerate(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let start = args.take_keyword("start");
    args.check("enumerate", 1, 2)?;
    let start = match start.as_ref().or(args.get(1)) {
        Some(value) => value.expect_int()?,
        None => 0,
    };
    let items = args.positional[0]
        .iter()?
        .enumerate()
        .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
        .collect();
    Ok(Value::list(items))
}

fn builtin_zip(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.reject_keywords("zip")?;
    let columns: Vec<Vec<Value>> = args
        .positional
        .iter()
        .map(|v| v.iter().map(|items| items.collect::<Vec<Value>>()))
        .collect::<PyResult<_>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..len)
        .map(|i| Value::tuple(columns.iter().map(|col| col[i].clone()).collect()))
        .collect();
    Ok(Value::list(rows))
}

fn builtin_reversed(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    let value = single(&args, "reversed")?;
    if matches!(value, Value::Dict(_)) {
        return type_error("'dict' object is not reversible");
    }
    let mut items: Vec<Value> = value.iter()?.collect();
    items.reverse();
    Ok(Value::list(items))
}

fn builtin_getattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("getattr", 2, 3)?;
    let name = args.positional[1].expect_str("attribute name")?;
    match interp.get_attr(&args.positional[0], &name) {
        Err(e) if e.kind() == ExcType::AttributeError && args.len() == 3 => {
            Ok(args.positional[2].clone())
        }
        other => other,
    }
}

fn builtin_setattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("setattr", 3, 3)?;
    let name = args.positional[1].expect_str("attribute name")?;
    interp.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn builtin_hasattr(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("hasattr", 2, 2)?;
    let name = args.positional[1].expect_str("attribute name")?;
    match interp.get_attr(&args.positional[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(e) if e.kind() == ExcType::AttributeError => Ok(Value::Bool(false)),
        Err(e) => Err(e),
    }
}

fn builtin_globals(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("globals", 0, 0)?;
    Ok(Value::dict(interp.globals().to_dict()))
}

fn is_instance(value: &Value, tag: TypeTag) -> bool {
    match (value, tag) {
        (Value::Bool(_), TypeTag::Int) => true,
        (Value::Exception(e), TypeTag::Exc(kind)) => e.kind.is_subclass_of(kind),
        (_, TypeTag::Host) => true,
        _ => value.type_tag() == tag,
    }
}

fn builtin_isinstance(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("isinstance", 2, 2)?;
    let value = &args.positional[0];
    let classes: Vec<Value> = match &args.positional[1] {
        Value::Tuple(items) => items.as_ref().clone(),
        other => vec![other.clone()],
    };
    for class in &classes {
        match class {
            Value::Type(tag) => {
                if is_instance(value, *tag) {
                    return Ok(Value::Bool(true));
                }
            }
            _ => {
                return type_error(
                    "isinstance() arg 2 must be a type, a tuple of types, or a union",
                )
            }
        }
    }
    Ok(Value::Bool(false))
}

fn extremum(interp: &mut Interpreter, mut args: Args, name: &str, want: Ordering) -> PyResult<Value> {
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let default = args.take_keyword("default");
    args.reject_keywords(name)?;
    let items: Vec<Value> = match args.positional.len() {
        0 => {
            return type_error(format!(
                "{} expected at least 1 argument, got 0",
                name
            ))
        }
        1 => args.positional[0].iter()?.collect(),
        _ => args.positional,
    };
    if items.is_empty() {
        return match default {
            Some(value) => Ok(value),
            None => value_error(format!("{}() iterable argument is empty", name)),
        };
    }
    let op = if want == Ordering::Greater { ">" } else { "<" };
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let item_key = match &key {
            Some(func) => call1(interp, func, item.clone())?,
            None => item.clone(),
        };
        best = match best {
            Some((best_key, best_item)) => {
                if item_key.partial_order(&best_key, op)? == Some(want) {
                    Some((item_key, item))
                } else {
                    Some((best_key, best_item))
                }
            }
            None => Some((item_key, item)),
        };
    }
    Ok(best.map(|(_, item)| item).unwrap_or(Value::None))
}

fn builtin_max(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    extremum(interp, args, "max", Ordering::Greater)
}

fn builtin_min(interp: &mut Interpreter, args: Args) -> PyResult<Value> {
    extremum(interp, args, "min", Ordering::Less)
}

fn builtin_sum(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let start = args.take_keyword("start");
    args.check("sum", 1, 2)?;
    let mut total = start.or_else(|| args.get(1).cloned()).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return type_error("sum() can't sum strings [use ''.join(seq) instead]");
    }
    for item in args.positional[0].iter()? {
        total = ops::binary(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

/// Stable merge sort over `(key, item)` pairs with a fallible comparison.
fn merge_sort(mut items: Vec<(Value, Value)>, reverse: bool) -> PyResult<Vec<(Value, Value)>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, reverse)?;
    let right = merge_sort(right, reverse)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                let order = if reverse {
                    l.0.partial_order(&r.0, "<")?
                } else {
                    r.0.partial_order(&l.0, "<")?
                };
                order == Some(Ordering::Less)
            }
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    Ok(out)
}

/// Sorts values the way `sorted()` and `list.sort()` do.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> PyResult<Vec<Value>> {
    let mut pairs = Vec::with_capacity(items.len());
    for item in items {
        let item_key = match &key {
            Some(func) => call1(interp, func, item.clone())?,
            None => item.clone(),
        };
        pairs.push((item_key, item));
    }
    Ok(merge_sort(pairs, reverse)?
        .into_iter()
        .map(|(_, item)| item)
        .collect())
}

fn sort_options(args: &mut Args, name: &str) -> PyResult<(Option<Value>, bool)> {
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let reverse = args.take_keyword("reverse").is_some_and(|v| v.truthy());
    args.reject_keywords(name)?;
    Ok((key, reverse))
}

fn builtin_sorted(interp: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let (key, reverse) = sort_options(&mut args, "sorted")?;
    let items: Vec<Value> = single(&args, "sorted")?.iter()?.collect();
    Ok(Value::list(sort_values(interp, items, key, reverse)?))
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn builtin_round(_: &mut Interpreter, mut args: Args) -> PyResult<Value> {
    let ndigits = args.take_keyword("ndigits");
    args.check("round", 1, 2)?;
    let ndigits = match ndigits.or_else(|| args.get(1).cloned()) {
        None | Some(Value::None) => None,
        Some(value) => Some(value.expect_int()?),
    };
    match (args.positional[0].as_num(), ndigits) {
        (Some(Num::Int(i)), _) => Ok(Value::Int(i)),
        (Some(Num::Float(f)), None) => {
            if !f.is_finite() {
                return Err(PyException::new(
                    ExcType::OverflowError,
                    "cannot convert float infinity or NaN to integer",
                ));
            }
            Ok(Value::Int(float_to_int(round_half_even(f))?))
        }
        (Some(Num::Float(f)), Some(digits)) => {
            let scale = 10f64.powi(digits.clamp(-308, 308) as i32);
            Ok(Value::Float(round_half_even(f * scale) / scale))
        }
        (None, _) => type_error(format!(
            "type {} doesn't define __round__ method",
            args.positional[0].type_name()
        )),
    }
}

// Constructors.

fn parse_int(text: &str, base: u32) -> PyResult<Value> {
    let cleaned = text.trim().replace('_', "");
    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let digits = match base {
        16 => digits.trim_start_matches("0x").trim_start_matches("0X"),
        8 => digits.trim_start_matches("0o").trim_start_matches("0O"),
        2 => digits.trim_start_matches("0b").trim_start_matches("0B"),
        _ => digits,
    };
    i64::from_str_radix(&format!("{}{}", sign, digits), base)
        .map(Value::Int)
        .map_err(|_| {
            PyException::new(
                ExcType::ValueError,
                format!(
                    "invalid literal for int() with base {}: {}",
                    base,
                    Value::str(text).repr()
                ),
            )
        })
}

fn parse_float(text: &str) -> PyResult<f64> {
    text.trim()
        .replace('_', "")
        .parse::<f64>()
        .map_err(|_| {
            PyException::new(
                ExcType::ValueError,
                format!(
                    "could not convert string to float: {}",
                    Value::str(text).repr()
                ),
            )
        })
}

fn range_from_args(args: &Args) -> PyResult<Value> {
    args.check("range", 1, 3)?;
    let ints: Vec<i64> = args
        .positional
        .iter()
        .map(Value::expect_int)
        .collect::<PyResult<_>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => (0, 0, 1),
    };
    if step == 0 {
        return value_error("range() arg 3 must not be zero");
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn dict_from_args(args: Args) -> PyResult<Value> {
    if args.len() > 1 {
        return type_error(format!(
            "dict expected at most 1 argument, got {}",
            args.len()
        ));
    }
    let mut dict = Dict::default();
    match args.get(0) {
        None => {}
        Some(Value::Dict(source)) => {
            for (key, value) in source.borrow().items() {
                dict.insert(key, value)?;
            }
        }
        Some(iterable) => {
            for (i, item) in iterable.iter()?.enumerate() {
                let pair: Vec<Value> = item.iter()?.collect();
                let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
                    PyException::new(
                        ExcType::ValueError,
                        format!(
                            "dictionary update sequence element #{} has length {}; 2 is required",
                            i,
                            pair.len()
                        ),
                    )
                })?;
                dict.insert(key, value)?;
            }
        }
    }
    for (name, value) in args.keywords {
        dict.insert(Value::str(&name), value)?;
    }
    Ok(Value::dict(dict))
}

/// Calling a type object.
pub fn construct(_: &mut Interpreter, tag: TypeTag, mut args: Args) -> PyResult<Value> {
    match tag {
        TypeTag::Int => {
            let base = args.take_keyword("base");
            args.check("int", 0, 2)?;
            let base = match base.or_else(|| args.get(1).cloned()) {
                Some(value) => Some(value.expect_int()?),
                None => None,
            };
            if let Some(b) = base {
                if !(2..=36).contains(&b) {
                    return value_error("int() base must be >= 2 and <= 36");
                }
            }
            match (args.get(0), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => parse_int(s, base.unwrap_or(10) as u32),
                (Some(_), Some(_)) => type_error("int() can't convert non-string with explicit base"),
                (Some(Value::Float(f)), None) => Ok(Value::Int(float_to_int(*f)?)),
                (Some(other), None) => other.as_index().map(Value::Int).ok_or_else(|| {
                    PyException::new(
                        ExcType::TypeError,
                        format!(
                            "int() argument must be a string or a real number, not '{}'",
                            other.type_name()
                        ),
                    )
                }),
            }
        }
        TypeTag::Float => {
            args.check("float", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => Ok(Value::Float(parse_float(s)?)),
                Some(other) => other
                    .as_num()
                    .map(|n| Value::Float(n.to_f64()))
                    .ok_or_else(|| {
                        PyException::new(
                            ExcType::TypeError,
                            format!(
                                "float() argument must be a string or a real number, not '{}'",
                                other.type_name()
                            ),
                        )
                    }),
            }
        }
        TypeTag::Str => {
            args.check("str", 0, 1)?;
            let text = match args.get(0) {
                Some(value) => value.try_to_str()?,
                None => String::new(),
            };
            Ok(Value::str(&text))
        }
        TypeTag::Bool => {
            args.check("bool", 0, 1)?;
            Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
        }
        TypeTag::List => {
            args.check("list", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(collect_items(value)?)),
            }
        }
        TypeTag::Tuple => {
            args.check("tuple", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
                Some(value) => Ok(Value::tuple(collect_items(value)?)),
            }
        }
        TypeTag::Dict => dict_from_args(args),
        TypeTag::Range => range_from_args(&args),
        TypeTag::Type => {
            args.check("type", 1, 1)?;
            Ok(Value::Type(args.positional[0].type_tag()))
        }
        TypeTag::Host => {
            args.check("object", 0, 0)?;
            Ok(HostObject::new("object").into_value())
        }
        TypeTag::Exc(kind) => {
            args.reject_keywords(kind.name())?;
            Ok(Value::Exception(Rc::new(ExceptionValue::new(
                kind,
                args.positional,
            ))))
        }
        other => type_error(format!("cannot create '{}' instances", other.name())),
    }
}

/// Materialises an iterable. Ranges are sized up front so a huge one fails
/// cleanly instead of exhausting memory.
fn collect_items(value: &Value) -> PyResult<Vec<Value>> {
    if let Value::Range(range) = value {
        check_alloc(range.len(), "range")?;
    }
    Ok(value.iter()?.collect())
}

// Methods of builtin types.

const STR_METHODS: &[&str] = &[
    "capitalize", "center", "count", "endswith", "find", "format", "index", "isalnum",
    "isalpha", "isdigit", "islower", "isspace", "isupper", "join", "ljust", "lower", "lstrip",
    "replace", "rfind", "rjust", "rstrip", "split", "splitlines", "startswith", "strip",
    "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];

pub fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => &[],
    }
}

pub fn has_method(value: &Value, name: &str) -> bool {
    method_names(value).contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> PyResult<Value> {
    match receiver {
        Value::Str(s) => str_method(s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Tuple(items) => sequence_method(items, name, args, "tuple"),
        Value::Dict(_) => dict_method(receiver, name, args),
        other => Err(PyException::new(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn optional_str(args: &Args, index: usize, what: &str) -> PyResult<Option<Rc<str>>> {
    match args.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(value) => value.expect_str(what).map(Some),
    }
}

fn affixes(value: &Value, method: &str) -> PyResult<Vec<Rc<str>>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Tuple(items) => items
            .iter()
            .map(|item| item.expect_str(&format!("{} first arg", method)))
            .collect(),
        other => type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            method,
            other.type_name()
        )),
    }
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    parts
}

fn justify(s: &str, args: &Args, method: &str) -> PyResult<String> {
    args.check(method, 1, 2)?;
    let width = args.positional[0].expect_int()?.max(0) as usize;
    check_alloc(width, "padded string")?;
    let fill = match optional_str(args, 1, "fill character")? {
        Some(f) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
        Some(_) => return type_error("The fill character must be exactly one character long"),
        None => ' ',
    };
    let len = s.chars().count();
    let pad = width.saturating_sub(len);
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match method {
        "ljust" => format!("{}{}", s, fill_str(pad)),
        "rjust" => format!("{}{}", fill_str(pad), s),
        _ => {
            let left = pad / 2 + (pad & width & 1);
            format!("{}{}{}", fill_str(left), s, fill_str(pad - left))
        }
    })
}

fn str_method(s: &Rc<str>, name: &str, mut args: Args) -> PyResult<Value> {
    let text: &str = s;
    let result = match name {
        "upper" => {
            args.check(name, 0, 0)?;
            Value::str(&text.to_uppercase())
        }
        "lower" => {
            args.check(name, 0, 0)?;
            Value::str(&text.to_lowercase())
        }
        "capitalize" => {
            args.check(name, 0, 0)?;
            let mut chars = text.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                None => String::new(),
            };
            Value::str(&capitalized)
        }
        "title" => {
            args.check(name, 0, 0)?;
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Value::str(&out)
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1)?;
            let chars = optional_str(&args, 0, "strip arg")?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            };
            Value::str(stripped)
        }
        "split" => {
            let sep = args.take_keyword("sep");
            let maxsplit = args.take_keyword("maxsplit");
            args.check(name, 0, 2)?;
            let sep = match sep.or_else(|| args.get(0).cloned()) {
                None | Some(Value::None) => None,
                Some(value) => Some(value.expect_str("separator")?),
            };
            let maxsplit = match maxsplit.or_else(|| args.get(1).cloned()) {
                Some(value) => value.expect_int()?,
                None => -1,
            };
            let parts: Vec<String> = match sep.as_deref() {
                None => split_whitespace(text, maxsplit),
                Some("") => return value_error("empty separator"),
                Some(sep) if maxsplit < 0 => text.split(sep).map(String::from).collect(),
                Some(sep) => text
                    .splitn(maxsplit as usize + 1, sep)
                    .map(String::from)
                    .collect(),
            };
            Value::list(parts.iter().map(|p| Value::str(p)).collect())
        }
        "splitlines" => {
            args.check(name, 0, 0)?;
            Value::list(text.lines().map(Value::str).collect())
        }
        "join" => {
            let items: Vec<Value> = single(&args, "join")?.iter()?.collect();
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.to_string()),
                    other => {
                        return type_error(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        ))
                    }
                }
            }
            Value::str(&parts.join(text))
        }
        "replace" => {
            args.check(name, 2, 3)?;
            let old = args.positional[0].expect_str("replace() argument 1")?;
            let new = args.positional[1].expect_str("replace() argument 2")?;
            let count = match args.get(2) {
                Some(value) => value.expect_int()?,
                None => -1,
            };
            if count < 0 {
                Value::str(&text.replace(old.as_ref(), &new))
            } else {
                Value::str(&text.replacen(old.as_ref(), &new, count as usize))
            }
        }
        "startswith" | "endswith" => {
            let affix = affixes(single(&args, name)?, name)?;
            let found = affix.iter().any(|a| {
                if name == "startswith" {
                    text.starts_with(a.as_ref())
                } else {
                    text.ends_with(a.as_ref())
                }
            });
            Value::Bool(found)
        }
        "find" | "rfind" | "index" => {
            let needle = single(&args, name)?.expect_str("substring")?;
            let found = if name == "rfind" {
                text.rfind(needle.as_ref())
            } else {
                text.find(needle.as_ref())
            };
            match (found, name) {
                (Some(byte), _) => Value::Int(char_index(text, byte)),
                (None, "index") => return value_error("substring not found"),
                (None, _) => Value::Int(-1),
            }
        }
        "count" => {
            let needle = single(&args, name)?.expect_str("substring")?;
            let count = if needle.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(needle.as_ref()).count()
            };
            Value::Int(count as i64)
        }
        "format" => {
            let formatted = str_format(text, &args.positional, &args.keywords)?;
            Value::str(&formatted)
        }
        "isdigit" | "isalpha" | "isalnum" | "isspace" => {
            args.check(name, 0, 0)?;
            let test: fn(char) -> bool = match name {
                "isdigit" => |c| c.is_ascii_digit(),
                "isalpha" => char::is_alphabetic,
                "isalnum" => char::is_alphanumeric,
                _ => char::is_whitespace,
            };
            Value::Bool(!text.is_empty() && text.chars().all(test))
        }
        "islower" | "isupper" => {
            args.check(name, 0, 0)?;
            let mut cased = text.chars().filter(|c| c.is_alphabetic()).peekable();
            let any = cased.peek().is_some();
            let all = if name == "islower" {
                cased.all(|c| !c.is_uppercase())
            } else {
                cased.all(|c| !c.is_lowercase())
            };
            Value::Bool(any && all)
        }
        "ljust" | "rjust" | "center" => Value::str(&justify(text, &args, name)?),
        "zfill" => {
            let width = single(&args, name)?.expect_int()?.max(0) as usize;
            check_alloc(width, "padded string")?;
            let len = text.chars().count();
            if len >= width {
                Value::str(text)
            } else {
                let (sign, digits) = match text.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &text[1..]),
                    _ => (String::new(), text),
                };
                Value::str(&format!("{}{}{}", sign, "0".repeat(width - len), digits))
            }
        }
        _ => {
            return Err(PyException::new(
                ExcType::AttributeError,
                format!("'str' object has no attribute '{}'", name),
            ))
        }
    };
    Ok(result)
}

fn sequence_method(items: &[Value], name: &str, args: Args, type_name: &str) -> PyResult<Value> {
    let needle = single(&args, name)?;
    match name {
        "count" => Ok(Value::Int(
            items.iter().filter(|v| v.py_eq(needle)).count() as i64,
        )),
        "index" => match items.iter().position(|v| v.py_eq(needle)) {
            Some(i) => Ok(Value::Int(i as i64)),
            None => value_error(format!("{}.index(x): x not in {}", type_name, type_name)),
        },
        _ => Err(PyException::new(
            ExcType::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, name),
        )),
    }
}

fn list_method(interp: &mut Interpreter, receiver: &Value, name: &str, mut args: Args) -> PyResult<Value> {
    let Value::List(list) = receiver else {
        return type_error("descriptor requires a 'list' object");
    };
    match name {
        "append" => {
            let item = single(&args, name)?.clone();
            list.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            let extra: Vec<Value> = single(&args, name)?.iter()?.collect();
            list.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            args.check(name, 2, 2)?;
            let index = args.positional[0].expect_int()?;
            let item = args.positional[1].clone();
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(position as usize, item);
            Ok(Value::None)
        }
        "pop" => {
            args.check(name, 0, 1)?;
            let index = match args.get(0) {
                Some(value) => value.expect_int()?,
                None => -1,
            };
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(PyException::new(ExcType::IndexError, "pop from empty list"));
            }
            let position = normalize_index(index, items.len())
                .ok_or_else(|| PyException::new(ExcType::IndexError, "pop index out of range"))?;
            Ok(items.remove(position))
        }
        "remove" => {
            let needle = single(&args, name)?;
            let position = list.borrow().iter().position(|v| v.py_eq(needle));
            match position {
                Some(i) => {
                    list.borrow_mut().remove(i);
                    Ok(Value::None)
                }
                None => value_error("list.remove(x): x not in list"),
            }
        }
        "index" | "count" => {
            let items = list.borrow().clone();
            sequence_method(&items, name, args, "list")
        }
        "reverse" => {
            args.check(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            args.check(name, 0, 0)?;
            let old = std::mem::take(&mut *list.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "sort" => {
            let (key, reverse) = sort_options(&mut args, "sort")?;
            args.check(name, 0, 0)?;
            let items = list.borrow().clone();
            let sorted = sort_values(interp, items, key, reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        _ => Err(PyException::new(
            ExcType::AttributeError,
            format!("'list' object has no attribute '{}'", name),
        )),
    }
}

fn key_error(key: &Value) -> PyException {
    PyException::from_value(Rc::new(ExceptionValue::new(
        ExcType::KeyError,
        vec![key.clone()],
    )))
}

fn dict_method(receiver: &Value, name: &str, mut args: Args) -> PyResult<Value> {
    let Value::Dict(dict) = receiver else {
        return type_error("descriptor requires a 'dict' object");
    };
    match name {
        "keys" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.borrow().keys()))
        }
        "values" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(dict.borrow().values()))
        }
        "items" => {
            args.check(name, 0, 0)?;
            let items = dict
                .borrow()
                .items()
                .into_iter()
                .map(|(k, v)| Value::tuple(vec![k, v]))
                .collect();
            Ok(Value::list(items))
        }
        "get" => {
            args.check(name, 1, 2)?;
            let found = dict.borrow().get(&args.positional[0])?;
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "pop" => {
            args.check(name, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args.positional[0])?;
            match (removed, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(&args.positional[0])),
            }
        }
        "setdefault" => {
            args.check(name, 1, 2)?;
            let key = args.positional[0].clone();
            let existing = dict.borrow().get(&key)?;
            match existing {
                Some(value) => Ok(value),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Value::None);
                    dict.borrow_mut().insert(key, default.clone())?;
                    Ok(default)
                }
            }
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            let mut incoming: Vec<(Value, Value)> = Vec::new();
            match args.get(0) {
                None => {}
                Some(Value::Dict(other)) => incoming.extend(other.borrow().items()),
                Some(iterable) => {
                    for item in iterable.iter()? {
                        let pair: Vec<Value> = item.iter()?.collect();
                        if let [key, value] = pair.as_slice() {
                            incoming.push((key.clone(), value.clone()));
                        } else {
                            return value_error("dictionary update sequence element has wrong length; 2 is required");
                        }
                    }
                }
            }
            incoming.extend(keywords.into_iter().map(|(k, v)| (Value::str(&k), v)));
            let mut target = dict.borrow_mut();
            for (key, value) in incoming {
                target.insert(key, value)?;
            }
            Ok(Value::None)
        }
        "clear" => {
            args.check(name, 0, 0)?;
            let old = std::mem::take(&mut *dict.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => Err(PyException::new(
            ExcType::AttributeError,
            format!("'dict' object has no attribute '{}'", name),
        )),
    }
}

// Modules.

pub fn import_module(name: &str) -> PyResult<Value> {
    match name {
        "sys" => Ok(sys_module()),
        "math" => Ok(math_module()),
        "time" => Ok(time_module()),
        _ => Err(PyException::new(
            ExcType::ModuleNotFoundError,
            format!("No module named '{}'", name),
        )),
    }
}

/// A file-like object writing to one of the process-wide channels.
pub fn stream_object(stream: Stream) -> Value {
    let label = match stream {
        Stream::Stdout => "<stdout>",
        Stream::Stderr => "<stderr>",
    };
    HostObject::new("TextIOWrapper")
        .with_repr(format!("<_io.TextIOWrapper name='{}'>", label))
        .with_attr("name", Value::str(label))
        .with_attr(
            "write",
            NativeFunction::value("write", move |_, args| {
                let text = single(&args, "write")?.expect_str("write() argument")?;
                redirect::write(stream, &text);
                Ok(Value::Int(text.chars().count() as i64))
            }),
        )
        .with_attr(
            "flush",
            NativeFunction::value("flush", |_, _| Ok(Value::None)),
        )
        .into_value()
}

fn sys_exit(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("exit", 0, 1)?;
    Err(PyException::from_value(Rc::new(ExceptionValue::new(
        ExcType::SystemExit,
        args.positional,
    ))))
}

static SYS_EXIT: Builtin = Builtin { name: "exit", call: sys_exit };

fn sys_module() -> Value {
    let mut attrs = IndexMap::new();
    attrs.insert("stdout".to_string(), stream_object(Stream::Stdout));
    attrs.insert("stderr".to_string(), stream_object(Stream::Stderr));
    attrs.insert(
        "version".to_string(),
        Value::str(concat!("dcc-console ", env!("CARGO_PKG_VERSION"))),
    );
    attrs.insert("argv".to_string(), Value::list(vec![Value::str("")]));
    attrs.insert("platform".to_string(), Value::str(std::env::consts::OS));
    attrs.insert("maxsize".to_string(), Value::Int(i64::MAX));
    attrs.insert(
        "exit".to_string(),
        Value::Builtin(&SYS_EXIT),
    );
    Module::value("sys", attrs)
}

fn real_arg(args: &Args, function: &str, index: usize) -> PyResult<f64> {
    match args.get(index).and_then(Value::as_num) {
        Some(n) => Ok(n.to_f64()),
        None => type_error(format!(
            "{}() argument must be a real number, not '{}'",
            function,
            args.get(index).map(Value::type_name).unwrap_or("NoneType")
        )),
    }
}

fn domain_error<T>() -> PyResult<T> {
    value_error("math domain error")
}

fn math_sqrt(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("sqrt", 1, 1)?;
    let x = real_arg(&args, "sqrt", 0)?;
    if x < 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.sqrt()))
}

fn math_floor(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("floor", 1, 1)?;
    Ok(Value::Int(float_to_int(real_arg(&args, "floor", 0)?.floor())?))
}

fn math_ceil(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("ceil", 1, 1)?;
    Ok(Value::Int(float_to_int(real_arg(&args, "ceil", 0)?.ceil())?))
}

fn math_fabs(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("fabs", 1, 1)?;
    Ok(Value::Float(real_arg(&args, "fabs", 0)?.abs()))
}

fn math_exp(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("exp", 1, 1)?;
    Ok(Value::Float(real_arg(&args, "exp", 0)?.exp()))
}

fn math_log(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("log", 1, 2)?;
    let x = real_arg(&args, "log", 0)?;
    if x <= 0.0 {
        return domain_error();
    }
    match args.get(1) {
        Some(_) => {
            let base = real_arg(&args, "log", 1)?;
            if base <= 0.0 || base == 1.0 {
                return domain_error();
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
        None => Ok(Value::Float(x.ln())),
    }
}

fn math_log10(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("log10", 1, 1)?;
    let x = real_arg(&args, "log10", 0)?;
    if x <= 0.0 {
        return domain_error();
    }
    Ok(Value::Float(x.log10()))
}

fn math_pow(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("pow", 2, 2)?;
    Ok(Value::Float(
        real_arg(&args, "pow", 0)?.powf(real_arg(&args, "pow", 1)?),
    ))
}

fn math_sin(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("sin", 1, 1)?;
    Ok(Value::Float(real_arg(&args, "sin", 0)?.sin()))
}

fn math_cos(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("cos", 1, 1)?;
    Ok(Value::Float(real_arg(&args, "cos", 0)?.cos()))
}

fn math_tan(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("tan", 1, 1)?;
    Ok(Value::Float(real_arg(&args, "tan", 0)?.tan()))
}

fn math_isnan(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("isnan", 1, 1)?;
    Ok(Value::Bool(real_arg(&args, "isnan", 0)?.is_nan()))
}

fn math_isinf(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("isinf", 1, 1)?;
    Ok(Value::Bool(real_arg(&args, "isinf", 0)?.is_infinite()))
}

static MATH_FUNCTIONS: &[Builtin] = &[
    Builtin { name: "ceil", call: math_ceil },
    Builtin { name: "cos", call: math_cos },
    Builtin { name: "exp", call: math_exp },
    Builtin { name: "fabs", call: math_fabs },
    Builtin { name: "floor", call: math_floor },
    Builtin { name: "isinf", call: math_isinf },
    Builtin { name: "isnan", call: math_isnan },
    Builtin { name: "log", call: math_log },
    Builtin { name: "log10", call: math_log10 },
    Builtin { name: "pow", call: math_pow },
    Builtin { name: "sin", call: math_sin },
    Builtin { name: "sqrt", call: math_sqrt },
    Builtin { name: "tan", call: math_tan },
];

fn math_module() -> Value {
    let mut attrs: IndexMap<String, Value> = MATH_FUNCTIONS
        .iter()
        .map(|f| (f.name.to_string(), Value::Builtin(f)))
        .collect();
    attrs.insert("pi".to_string(), Value::Float(std::f64::consts::PI));
    attrs.insert("e".to_string(), Value::Float(std::f64::consts::E));
    attrs.insert("tau".to_string(), Value::Float(std::f64::consts::TAU));
    attrs.insert("inf".to_string(), Value::Float(f64::INFINITY));
    attrs.insert("nan".to_string(), Value::Float(f64::NAN));
    Module::value("math", attrs)
}

fn time_time(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("time", 0, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::Float(now.as_secs_f64()))
}

fn time_perf_counter(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    args.check("perf_counter", 0, 0)?;
    let origin = ORIGIN.get_or_init(Instant::now);
    Ok(Value::Float(origin.elapsed().as_secs_f64()))
}

fn time_sleep(_: &mut Interpreter, args: Args) -> PyResult<Value> {
    args.check("sleep", 1, 1)?;
    let seconds = real_arg(&args, "sleep", 0)?;
    if seconds < 0.0 || !seconds.is_finite() {
        return value_error("sleep length must be non-negative");
    }
    std::thread::sleep(Duration::from_secs_f64(seconds));
    Ok(Value::None)
}

static TIME_FUNCTIONS: &[Builtin] = &[
    Builtin { name: "perf_counter", call: time_perf_counter },
    Builtin { name: "sleep", call: time_sleep },
    Builtin { name: "time", call: time_time },
];

fn time_module() -> Value {
    let attrs = TIME_FUNCTIONS
        .iter()
        .map(|f| (f.name.to_string(), Value::Builtin(f)))
        .collect();
    Module::value("time", attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(matches!(lookup("print"), Some(Value::Builtin(_))));
        assert!(matches!(lookup("int"), Some(Value::Type(TypeTag::Int))));
        assert!(matches!(
            lookup("ValueError"),
            Some(Value::Type(TypeTag::Exc(ExcType::ValueError)))
        ));
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int(" 42 ", 10).unwrap().repr(), "42");
        assert_eq!(parse_int("-0xff", 16).unwrap().repr(), "-255");
        let err = parse_int("abc", 10).unwrap_err();
        assert_eq!(err.summary(), "ValueError: invalid literal for int() with base 10: 'abc'");
    }

    #[test]
    fn test_split_whitespace() {
        assert_eq!(split_whitespace("  a b  c ", -1), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b  c ", 1), vec!["a", "b  c "]);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.6), 3.0);
    }

    #[test]
    fn test_unknown_module() {
        let err = import_module("numpy").unwrap_err();
        assert_eq!(err.kind(), ExcType::ModuleNotFoundError);
    }
}
