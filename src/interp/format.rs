//! String formatting: `%` interpolation, `str.format` fields and the
//! format-spec mini language shared with f-strings.

use super::error::{type_error, value_error, ExcType, PyException, PyResult};
use super::value::{check_alloc, float_to_int, format_float, Num, Value};

struct Spec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> PyResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut parsed = Spec {
        fill: ' ',
        align: None,
        sign: None,
        zero: false,
        width: 0,
        grouping: false,
        precision: None,
        kind: None,
    };
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = chars[0];
        parsed.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c @ ('+' | '-' | ' ')) = chars.get(i) {
        parsed.sign = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
        parsed.width = push_digit(parsed.width, d)?;
        i += 1;
    }
    check_alloc(parsed.width, "format width")?;
    if chars.get(i) == Some(&',') {
        parsed.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let mut precision = 0usize;
        let start = i;
        while let Some(d) = chars.get(i).and_then(|c| c.to_digit(10)) {
            precision = push_digit(precision, d)?;
            i += 1;
        }
        if i == start {
            return value_error("Format specifier missing precision");
        }
        check_alloc(precision, "format precision")?;
        parsed.precision = Some(precision);
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return value_error("Invalid format specifier");
    }
    Ok(parsed)
}

fn push_digit(value: usize, digit: u32) -> PyResult<usize> {
    value
        .checked_mul(10)
        .and_then(|v| v.checked_add(digit as usize))
        .ok_or_else(|| PyException::new(ExcType::ValueError, "Too many decimal digits in format string"))
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find('.') {
        Some(dot) => digits.split_at(dot),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// Applies a format spec such as `>8`, `.2f` or `,d` to a value.
pub fn format_value(value: &Value, spec: &str) -> PyResult<String> {
    if spec.is_empty() {
        return value.try_to_str();
    }
    let spec = parse_spec(spec)?;
    let numeric = value.as_num();

    let (negative, body) = match (spec.kind, numeric) {
        (Some('s'), _) | (None, None) => {
            let mut text = value.try_to_str()?;
            if let Some(p) = spec.precision {
                text = text.chars().take(p).collect();
            }
            (false, text)
        }
        (Some(kind @ ('d' | 'x' | 'X' | 'o' | 'b')), Some(Num::Int(i))) => {
            let magnitude = i.unsigned_abs();
            let text = match kind {
                'x' => format!("{:x}", magnitude),
                'X' => format!("{:X}", magnitude),
                'o' => format!("{:o}", magnitude),
                'b' => format!("{:b}", magnitude),
                _ => magnitude.to_string(),
            };
            (i < 0, text)
        }
        (Some(kind @ ('f' | 'F' | 'e' | 'E' | '%' | 'g')), Some(num)) => {
            let mut f = num.to_f64();
            if kind == '%' {
                f *= 100.0;
            }
            let precision = spec.precision.unwrap_or(6);
            let text = match kind {
                'e' | 'E' => {
                    let raw = format!("{:.*e}", precision, f.abs());
                    let text = match raw.split_once('e') {
                        Some((mantissa, exp)) => {
                            let (sign, digits) = match exp.strip_prefix('-') {
                                Some(d) => ('-', d),
                                None => ('+', exp),
                            };
                            format!("{}e{}{:0>2}", mantissa, sign, digits)
                        }
                        None => raw,
                    };
                    if kind == 'E' {
                        text.to_uppercase()
                    } else {
                        text
                    }
                }
                'g' => format_float(f.abs()),
                '%' => format!("{:.*}%", precision, f.abs()),
                _ => format!("{:.*}", precision, f.abs()),
            };
            (f.is_sign_negative() && f != 0.0, text)
        }
        (None, Some(Num::Int(i))) => (i < 0, i.unsigned_abs().to_string()),
        (None, Some(Num::Float(f))) => {
            let text = match spec.precision {
                Some(p) => format!("{:.*}", p, f.abs()),
                None => format_float(f.abs()),
            };
            (f.is_sign_negative() && f != 0.0, text)
        }
        (Some(kind), _) => {
            return value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                kind,
                value.type_name()
            ))
        }
    };

    let is_number = numeric.is_some() && spec.kind != Some('s');
    let body = if spec.grouping && is_number {
        group_thousands(&body)
    } else {
        body
    };
    let sign = match (negative, spec.sign) {
        (true, _) => "-",
        (false, Some('+')) if is_number => "+",
        (false, Some(' ')) if is_number => " ",
        _ => "",
    };

    let len = sign.chars().count() + body.chars().count();
    let pad = spec.width.saturating_sub(len);
    let default_align = if is_number { '>' } else { '<' };
    let (fill, align) = if spec.zero && spec.align.is_none() {
        ('0', '=')
    } else {
        (spec.fill, spec.align.unwrap_or(default_align))
    };
    let padding = |n: usize| fill.to_string().repeat(n);
    Ok(match align {
        '<' => format!("{}{}{}", sign, body, padding(pad)),
        '^' => format!(
            "{}{}{}{}",
            padding(pad / 2),
            sign,
            body,
            padding(pad - pad / 2)
        ),
        '=' => format!("{}{}{}", sign, padding(pad), body),
        _ => format!("{}{}{}", padding(pad), sign, body),
    })
}

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> PyResult<String> {
    let positional: Vec<Value> = match args {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::Dict(_) => Vec::new(),
        other => vec![other.clone()],
    };
    let mapping = match args {
        Value::Dict(dict) => Some(dict.clone()),
        _ => None,
    };

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut next = 0usize;
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }

        let mut value = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ')')
                .map(|p| p + i)
                .ok_or_else(|| PyException::new(ExcType::ValueError, "incomplete format key"))?;
            let key: String = chars[i + 1..close].iter().collect();
            let Some(dict) = &mapping else {
                return type_error("format requires a mapping");
            };
            let found = dict.borrow().get(&Value::str(&key))?;
            value = Some(found.ok_or_else(|| {
                PyException::from_value(std::rc::Rc::new(super::error::ExceptionValue::new(
                    ExcType::KeyError,
                    vec![Value::str(&key)],
                )))
            })?);
            i = close + 1;
        }

        let mut spec = String::new();
        while let Some(&c) = chars.get(i) {
            if matches!(c, '-' | '+' | ' ' | '0' | '.') || c.is_ascii_digit() {
                spec.push(c);
                i += 1;
            } else {
                break;
            }
        }
        let Some(&conversion) = chars.get(i) else {
            return value_error("incomplete format");
        };
        i += 1;

        let value = match value {
            Some(v) => v,
            None => {
                let v = positional.get(next).cloned().ok_or_else(|| {
                    PyException::new(ExcType::TypeError, "not enough arguments for format string")
                })?;
                next += 1;
                v
            }
        };

        let left = spec.starts_with('-');
        let spec = spec.trim_start_matches('-');
        let mut std_spec = String::new();
        if left {
            std_spec.push('<');
        } else if !spec.starts_with('0') {
            std_spec.push('>');
        }
        std_spec.push_str(spec);
        let text = match conversion {
            's' => format_value(&Value::str(&value.try_to_str()?), &std_spec)?,
            'r' => format_value(&Value::str(&value.try_repr()?), &std_spec)?,
            'd' | 'i' => {
                let int = match value.as_num() {
                    Some(Num::Int(i)) => i,
                    Some(Num::Float(f)) => float_to_int(f)?,
                    None => {
                        return type_error(format!(
                            "%{} format: a real number is required, not {}",
                            conversion,
                            value.type_name()
                        ))
                    }
                };
                format_value(&Value::Int(int), &format!("{}d", std_spec))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'x' | 'X' | 'o' => {
                if value.as_num().is_none() {
                    return type_error(format!(
                        "%{} format: a real number is required, not {}",
                        conversion,
                        value.type_name()
                    ));
                }
                format_value(&value, &format!("{}{}", std_spec, conversion))?
            }
            other => {
                return value_error(format!(
                    "unsupported format character '{}' (0x{:x})",
                    other, other as u32
                ))
            }
        };
        out.push_str(&text);
    }
    if mapping.is_none() && next < positional.len() {
        return type_error("not all arguments converted during string formatting");
    }
    Ok(out)
}

/// `template.format(*args, **kwargs)`.
pub fn str_format(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> PyResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto_index = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                out.push('}');
                i += 2;
                continue;
            }
            return value_error("Single '}' encountered in format string");
        }
        if c != '{' {
            out.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'{') {
            out.push('{');
            i += 2;
            continue;
        }
        let close = chars[i..]
            .iter()
            .position(|&c| c == '}')
            .map(|p| p + i)
            .ok_or_else(|| PyException::new(ExcType::ValueError, "Single '{' encountered in format string"))?;
        let field: String = chars[i + 1..close].iter().collect();
        i = close + 1;

        let (head, spec) = match field.split_once(':') {
            Some((head, spec)) => (head, spec),
            None => (field.as_str(), ""),
        };
        let (name, conversion) = match head.split_once('!') {
            Some((name, conv)) => (name, conv.chars().next()),
            None => (head, None),
        };
        let value = if name.is_empty() {
            let v = args.get(auto_index).cloned();
            auto_index += 1;
            v.ok_or_else(|| {
                PyException::new(
                    ExcType::IndexError,
                    format!("Replacement index {} out of range for positional args tuple", auto_index - 1),
                )
            })?
        } else if let Ok(index) = name.parse::<usize>() {
            args.get(index).cloned().ok_or_else(|| {
                PyException::new(
                    ExcType::IndexError,
                    format!("Replacement index {} out of range for positional args tuple", index),
                )
            })?
        } else {
            kwargs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    PyException::from_value(std::rc::Rc::new(super::error::ExceptionValue::new(
                        ExcType::KeyError,
                        vec![Value::str(name)],
                    )))
                })?
        };
        out.push_str(&convert_and_format(&value, conversion, spec)?);
    }
    Ok(out)
}

/// Shared tail of `str.format` fields and f-string fields.
pub fn convert_and_format(value: &Value, conversion: Option<char>, spec: &str) -> PyResult<String> {
    match conversion {
        Some('r') => format_value(&Value::str(&value.try_repr()?), spec),
        Some('s') | None => format_value(value, spec),
        Some(other) => value_error(format!(
            "Unknown conversion specifier {}",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec() {
        assert_eq!(format_value(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_value(&Value::Int(42), ">5").unwrap(), "   42");
        assert_eq!(format_value(&Value::Int(-42), "05d").unwrap(), "-0042");
        assert_eq!(format_value(&Value::str("ab"), "*^6").unwrap(), "**ab**");
        assert_eq!(format_value(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_value(&Value::Int(255), "x").unwrap(), "ff");
        assert_eq!(format_value(&Value::Float(0.25), ".0%").unwrap(), "25%");
    }

    #[test]
    fn test_percent() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(0.5)]);
        assert_eq!(percent_format("%s=%d (%.2f) 100%%", &args).unwrap(), "x=3 (0.50) 100%");
        assert_eq!(percent_format("[%5s|%-3d]", &Value::tuple(vec![Value::str("a"), Value::Int(7)])).unwrap(), "[    a|7  ]");
        assert_eq!(percent_format("%r", &Value::str("q")).unwrap(), "'q'");
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_huge_width_is_refused() {
        let err = percent_format("%1000000000000d", &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind(), ExcType::MemoryError);
        let err = format_value(&Value::Float(1.0), ".1000000000000f").unwrap_err();
        assert_eq!(err.kind(), ExcType::MemoryError);
        let err = format_value(&Value::Int(1), "99999999999999999999999d").unwrap_err();
        assert_eq!(err.kind(), ExcType::ValueError);
    }

    #[test]
    fn test_percent_d_rejects_out_of_range_float() {
        let err = percent_format("%d", &Value::Float(1e300)).unwrap_err();
        assert_eq!(err.kind(), ExcType::OverflowError);
        assert_eq!(percent_format("%d", &Value::Float(-2.7)).unwrap(), "-2");
    }

    #[test]
    fn test_str_format() {
        let args = vec![Value::Int(1), Value::str("two")];
        let kwargs = vec![("name".to_string(), Value::str("x"))];
        assert_eq!(
            str_format("{} {} {0} {name!r} {{}}", &args, &kwargs).unwrap(),
            "1 two 1 'x' {}"
        );
        assert!(str_format("{5}", &args, &kwargs).is_err());
    }
}
