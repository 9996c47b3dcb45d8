//! The runtime library as seen from the VM. Behavior follows the C runtime
//! byte for byte on ASCII strings.

use std::{
    io::{BufRead, Write},
    path::Path,
};

use hashbrown::HashMap;

use super::{FaultKind, value::Value};
use crate::runtime::RuntimeFunction;

/// Bytes trimmed by `std.string.trim`
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0c' | '\r')
}

fn string(value: &Value) -> Result<&str, FaultKind> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(FaultKind::invalid("string", other)),
    }
}

fn int(value: &Value) -> Result<i64, FaultKind> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(FaultKind::invalid("int", other)),
    }
}

fn float(value: &Value) -> Result<f64, FaultKind> {
    match value {
        Value::Float(v) => Ok(*v),
        other => Err(FaultKind::invalid("float", other)),
    }
}

fn boolean(value: &Value) -> Result<bool, FaultKind> {
    match value {
        Value::Bool(v) => Ok(*v),
        other => Err(FaultKind::invalid("bool", other)),
    }
}

fn bool_text(v: bool) -> &'static str {
    if v { "true" } else { "false" }
}

fn bytes_to_string(bytes: &[u8]) -> Value {
    Value::string(&String::from_utf8_lossy(bytes))
}

fn output_error(error: std::io::Error) -> FaultKind {
    FaultKind::Output(error.to_string())
}

#[derive(Debug, Default, Clone, Copy)]
struct Suite {
    total: i64,
    failed: i64,
}

/// What a running program can reach outside the VM: standard streams,
/// program arguments and the state behind `std.testing` suite handles.
pub struct Host<'a> {
    input: &'a mut dyn BufRead,
    output: &'a mut dyn Write,
    args: Vec<String>,
    suites: HashMap<i64, Suite>,
    suite_counter: i64,
}

impl<'a> Host<'a> {
    pub fn new(input: &'a mut dyn BufRead, output: &'a mut dyn Write) -> Self {
        Self {
            input,
            output,
            args: Vec::new(),
            suites: HashMap::new(),
            suite_counter: 0,
        }
    }

    /// Arguments seen by `std.os.args`, without the program name
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.output.flush()
    }

    /// Unknown handles get a fresh suite
    fn suite(&mut self, id: i64) -> &mut Suite {
        self.suites.entry(id).or_default()
    }

    fn record(&mut self, id: i64, name: &str, passed: bool, message: &str) -> Result<Value, FaultKind> {
        let mark = if passed { "\u{2713}" } else { "\u{2717}" };
        let verdict = if passed { "PASSED" } else { "FAILED" };
        writeln!(self.output, "Running test: {name}").map_err(output_error)?;
        writeln!(self.output, "{mark} {name} {verdict}").map_err(output_error)?;
        if !passed && !message.is_empty() {
            writeln!(self.output, "  {message}").map_err(output_error)?;
        }

        let suite = self.suite(id);
        suite.total += 1;
        if !passed {
            suite.failed += 1;
        }
        Ok(Value::Int(id))
    }

    fn assertion_failed(&mut self, message: &str, values: Option<(&str, &str)>) -> Result<Value, FaultKind> {
        match values {
            Some((expected, actual)) => writeln!(
                self.output,
                "  ASSERTION FAILED: {message} (expected: {expected}, actual: {actual})"
            ),
            None => writeln!(self.output, "  ASSERTION FAILED: {message}"),
        }
        .map_err(output_error)?;
        Ok(Value::Void)
    }
}

pub fn call(function: RuntimeFunction, arguments: &[Value], host: &mut Host) -> Result<Value, FaultKind> {
    if arguments.len() != function.parameters().len() {
        return Err(FaultKind::Malformed(format!(
            "{function} takes {} arguments, got {}",
            function.parameters().len(),
            arguments.len()
        )));
    }
    let argument = |index: usize| &arguments[index];

    Ok(match function {
        /* io */
        RuntimeFunction::IoPrint => {
            write!(host.output, "{}", string(argument(0))?).map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::IoPrintln => {
            writeln!(host.output, "{}", string(argument(0))?).map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::IoPrintInt => {
            write!(host.output, "{}", int(argument(0))?).map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::IoPrintlnInt => {
            writeln!(host.output, "{}", int(argument(0))?).map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::IoReadLine => {
            host.output.flush().map_err(output_error)?;
            let mut line = Vec::new();
            host.input
                .read_until(b'\n', &mut line)
                .map_err(|error| FaultKind::Input(error.to_string()))?;
            while line.last().is_some_and(|b| matches!(b, b'\n' | b'\r')) {
                line.pop();
            }
            bytes_to_string(&line)
        }

        /* conversions */
        RuntimeFunction::IntToString => Value::string(&int(argument(0))?.to_string()),
        RuntimeFunction::BoolToString => Value::string(bool_text(boolean(argument(0))?)),
        RuntimeFunction::FloatToString => Value::string(&format_general(float(argument(0))?)),
        RuntimeFunction::StringToInt => {
            Value::Int(string(argument(0))?.parse::<i64>().unwrap_or_default())
        }
        RuntimeFunction::StringToFloat => {
            let s = string(argument(0))?;
            Value::Float(if is_decimal(s) { s.parse().unwrap_or_default() } else { 0.0 })
        }
        RuntimeFunction::StringToBool => Value::Bool(string(argument(0))? == "true"),

        /* string */
        RuntimeFunction::StringLength => Value::Int(string(argument(0))?.len() as i64),
        RuntimeFunction::StringConcat => {
            Value::string(&format!("{}{}", string(argument(0))?, string(argument(1))?))
        }
        RuntimeFunction::StringSubstring => {
            let s = string(argument(0))?;
            let (start, end) = (int(argument(1))?, int(argument(2))?);
            let length = s.len() as i64;
            if start < 0 || end < start || end > length {
                return Err(FaultKind::SubstringOutOfBounds { start, end, length });
            }
            bytes_to_string(&s.as_bytes()[start as usize..end as usize])
        }
        RuntimeFunction::StringCharAt => {
            let s = string(argument(0))?;
            let index = int(argument(1))?;
            let length = s.len() as i64;
            if index < 0 || index >= length {
                return Err(FaultKind::CharIndexOutOfBounds { index, length });
            }
            Value::Int(i64::from(s.as_bytes()[index as usize]))
        }
        RuntimeFunction::StringContains => {
            Value::Bool(string(argument(0))?.contains(string(argument(1))?))
        }
        RuntimeFunction::StringStartsWith => {
            Value::Bool(string(argument(0))?.starts_with(string(argument(1))?))
        }
        RuntimeFunction::StringEndsWith => {
            Value::Bool(string(argument(0))?.ends_with(string(argument(1))?))
        }
        RuntimeFunction::StringIndexOf => Value::Int(
            string(argument(0))?
                .find(string(argument(1))?)
                .map_or(-1, |i| i as i64),
        ),
        RuntimeFunction::StringLastIndexOf => Value::Int(
            string(argument(0))?
                .rfind(string(argument(1))?)
                .map_or(-1, |i| i as i64),
        ),
        RuntimeFunction::StringEquals => Value::Bool(string(argument(0))? == string(argument(1))?),
        RuntimeFunction::StringCompare => {
            Value::Int(string(argument(0))?.as_bytes().cmp(string(argument(1))?.as_bytes()) as i64)
        }
        RuntimeFunction::StringToUpper => Value::string(&string(argument(0))?.to_ascii_uppercase()),
        RuntimeFunction::StringToLower => Value::string(&string(argument(0))?.to_ascii_lowercase()),
        RuntimeFunction::StringTrim => Value::string(string(argument(0))?.trim_matches(is_space)),

        /* math */
        RuntimeFunction::MathAbs => Value::Int(int(argument(0))?.wrapping_abs()),
        RuntimeFunction::MathMax => Value::Int(int(argument(0))?.max(int(argument(1))?)),
        RuntimeFunction::MathMin => Value::Int(int(argument(0))?.min(int(argument(1))?)),
        RuntimeFunction::MathPow => Value::Int(pow(int(argument(0))?, int(argument(1))?)),
        RuntimeFunction::MathGcd => Value::Int(gcd(int(argument(0))?, int(argument(1))?)),
        RuntimeFunction::MathLcm => Value::Int(lcm(int(argument(0))?, int(argument(1))?)),
        RuntimeFunction::MathFactorial => Value::Int(factorial(int(argument(0))?)),
        RuntimeFunction::MathIsPrime => Value::Bool(is_prime(int(argument(0))?)),
        RuntimeFunction::MathSqrt => Value::Float(float(argument(0))?.sqrt()),
        RuntimeFunction::MathAbsFloat => {
            let v = float(argument(0))?;
            Value::Float(if v < 0.0 { -v } else { v })
        }
        RuntimeFunction::MathMaxFloat => {
            let (a, b) = (float(argument(0))?, float(argument(1))?);
            Value::Float(if a > b { a } else { b })
        }
        RuntimeFunction::MathMinFloat => {
            let (a, b) = (float(argument(0))?, float(argument(1))?);
            Value::Float(if a < b { a } else { b })
        }

        /* array and map */
        RuntimeFunction::ArrayLength => match argument(0) {
            Value::Array(elements) => Value::Int(elements.borrow().len() as i64),
            other => return Err(FaultKind::invalid("array", other)),
        },
        RuntimeFunction::ArrayPush => match argument(0) {
            Value::Array(elements) => {
                elements.borrow_mut().push(argument(1).clone());
                Value::Void
            }
            other => return Err(FaultKind::invalid("array", other)),
        },
        RuntimeFunction::MapSize => match argument(0) {
            Value::Map(entries) => Value::Int(entries.borrow().len() as i64),
            other => return Err(FaultKind::invalid("map", other)),
        },
        RuntimeFunction::MapContains => match argument(0) {
            Value::Map(entries) => Value::Bool(entries.borrow().contains_key(string(argument(1))?)),
            other => return Err(FaultKind::invalid("map", other)),
        },

        /* file */
        RuntimeFunction::FileExists => Value::Bool(Path::new(string(argument(0))?).exists()),
        RuntimeFunction::FileRead => {
            let path = string(argument(0))?;
            let contents =
                std::fs::read(path).map_err(|_| FaultKind::FileRead(path.to_string()))?;
            bytes_to_string(&contents)
        }
        RuntimeFunction::FileWrite => {
            let path = string(argument(0))?;
            std::fs::write(path, string(argument(1))?)
                .map_err(|_| FaultKind::FileWrite(path.to_string()))?;
            Value::Void
        }

        /* os */
        RuntimeFunction::OsArgs => {
            Value::array(host.args.iter().map(|arg| Value::string(arg)).collect())
        }
        RuntimeFunction::OsArgsCount => Value::Int(host.args.len() as i64),
        RuntimeFunction::OsGetenv => Value::string(
            &std::env::var_os(string(argument(0))?)
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        RuntimeFunction::OsExit => return Err(FaultKind::Exit(int(argument(0))?)),

        /* assertions and tests */
        RuntimeFunction::Assert => {
            if !boolean(argument(0))? {
                return host.assertion_failed(string(argument(1))?, None);
            }
            Value::Void
        }
        RuntimeFunction::AssertTrue => {
            if !boolean(argument(0))? {
                return host.assertion_failed(string(argument(1))?, Some(("true", "false")));
            }
            Value::Void
        }
        RuntimeFunction::AssertFalse => {
            if boolean(argument(0))? {
                return host.assertion_failed(string(argument(1))?, Some(("false", "true")));
            }
            Value::Void
        }
        RuntimeFunction::AssertEqInt => {
            let (expected, actual) = (int(argument(0))?, int(argument(1))?);
            if expected != actual {
                let (expected, actual) = (expected.to_string(), actual.to_string());
                return host.assertion_failed(string(argument(2))?, Some((&expected, &actual)));
            }
            Value::Void
        }
        RuntimeFunction::AssertEqFloat => {
            let (expected, actual) = (float(argument(0))?, float(argument(1))?);
            if expected != actual {
                let (expected, actual) = (format_general(expected), format_general(actual));
                return host.assertion_failed(string(argument(2))?, Some((&expected, &actual)));
            }
            Value::Void
        }
        RuntimeFunction::AssertEqBool => {
            let (expected, actual) = (boolean(argument(0))?, boolean(argument(1))?);
            if expected != actual {
                let values = (bool_text(expected), bool_text(actual));
                return host.assertion_failed(string(argument(2))?, Some(values));
            }
            Value::Void
        }
        RuntimeFunction::AssertEqString => {
            let (expected, actual) = (string(argument(0))?, string(argument(1))?);
            if expected != actual {
                return host.assertion_failed(string(argument(2))?, Some((expected, actual)));
            }
            Value::Void
        }
        RuntimeFunction::TestStart => {
            writeln!(host.output, "Running test: {}", string(argument(0))?).map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::TestEnd => {
            let name = string(argument(0))?;
            if boolean(argument(1))? {
                writeln!(host.output, "\u{2713} {name} PASSED")
            } else {
                writeln!(host.output, "\u{2717} {name} FAILED")
            }
            .map_err(output_error)?;
            Value::Void
        }
        RuntimeFunction::TestSummary => {
            writeln!(host.output, "\nTest Summary: All tests completed").map_err(output_error)?;
            Value::Int(0)
        }

        /* testing suites */
        RuntimeFunction::TestingSuite => {
            host.suite_counter += 1;
            let id = host.suite_counter;
            host.suite(id);
            Value::Int(id)
        }
        RuntimeFunction::TestingExpect => {
            let passed = boolean(argument(2))?;
            return host.record(int(argument(0))?, string(argument(1))?, passed, "");
        }
        RuntimeFunction::TestingPass => {
            return host.record(int(argument(0))?, string(argument(1))?, true, "");
        }
        RuntimeFunction::TestingFail => {
            let message = string(argument(2))?;
            return host.record(int(argument(0))?, string(argument(1))?, false, message);
        }
        RuntimeFunction::TestingEqualInt => {
            let (expected, actual) = (int(argument(2))?, int(argument(3))?);
            let message = format!("expected {expected}, got {actual}");
            return host.record(int(argument(0))?, string(argument(1))?, expected == actual, &message);
        }
        RuntimeFunction::TestingEqualBool => {
            let (expected, actual) = (boolean(argument(2))?, boolean(argument(3))?);
            let message = format!("expected {}, got {}", bool_text(expected), bool_text(actual));
            return host.record(int(argument(0))?, string(argument(1))?, expected == actual, &message);
        }
        RuntimeFunction::TestingEqualString => {
            let (expected, actual) = (string(argument(2))?, string(argument(3))?);
            let message = format!("expected \"{expected}\", got \"{actual}\"");
            return host.record(int(argument(0))?, string(argument(1))?, expected == actual, &message);
        }
        RuntimeFunction::TestingEqualFloat | RuntimeFunction::TestingEqualFloatPrecision => {
            let (expected, actual) = (float(argument(2))?, float(argument(3))?);
            let precision = match function {
                RuntimeFunction::TestingEqualFloatPrecision => int(argument(4))?,
                _ => 6,
            };
            let (passed, message) = float_check(expected, actual, precision);
            return host.record(int(argument(0))?, string(argument(1))?, passed, &message);
        }
        RuntimeFunction::TestingTotal => Value::Int(host.suite(int(argument(0))?).total),
        RuntimeFunction::TestingFailures => Value::Int(host.suite(int(argument(0))?).failed),
        RuntimeFunction::TestingPassed => Value::Bool(host.suite(int(argument(0))?).failed == 0),
        RuntimeFunction::TestingSummary => {
            let Suite { total, failed } = *host.suite(int(argument(0))?);
            writeln!(
                host.output,
                "\nTest Summary: {total} total, {} passed, {failed} failed",
                total - failed
            )
            .map_err(output_error)?;
            Value::Int(failed)
        }
        RuntimeFunction::TestingExit => {
            return Err(FaultKind::Exit(host.suite(int(argument(0))?).failed));
        }
    })
}

/// Wrapping exponentiation by squaring. Negative exponents give 0.
fn pow(base: i64, mut exponent: i64) -> i64 {
    if exponent < 0 {
        return 0;
    }

    let mut result = 1i64;
    let mut factor = base;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result.wrapping_mul(factor);
        }
        exponent >>= 1;
        factor = factor.wrapping_mul(factor);
    }
    result
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut x, mut y) = (a.unsigned_abs(), b.unsigned_abs());
    while y != 0 {
        (x, y) = (y, x % y);
    }
    x as i64
}

fn lcm(a: i64, b: i64) -> i64 {
    let divisor = gcd(a, b) as u64;
    if divisor == 0 {
        return 0;
    }
    ((a.unsigned_abs() / divisor).wrapping_mul(b.unsigned_abs())) as i64
}

/// Wrapping. Negative inputs give 0.
fn factorial(n: i64) -> i64 {
    // 66! is a multiple of 2^64
    if !(0..66).contains(&n) {
        return 0;
    }
    (2..=n as u64).fold(1u64, u64::wrapping_mul) as i64
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut i = 3;
    while i <= n / i {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

fn nan_text(v: f64) -> String {
    if v.is_sign_negative() { "-nan" } else { "nan" }.into()
}

/// C's `%g`: six significant digits, trailing zeros dropped, exponent form
/// outside `1e-4 <= |v| < 1e6`.
fn format_general(v: f64) -> String {
    if v.is_nan() {
        return nan_text(v);
    }
    if v.is_infinite() {
        return if v < 0.0 { "-inf" } else { "inf" }.into();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0" } else { "0" }.into();
    }

    let scientific = format!("{v:.5e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or_default();

    if (-4..6).contains(&exponent) {
        let digits = (5 - exponent) as usize;
        strip_fraction_zeros(&format!("{v:.digits$}")).to_string()
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            strip_fraction_zeros(mantissa),
            exponent.unsigned_abs()
        )
    }
}

fn strip_fraction_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// `[sign] digits [. digits] [e [sign] digits]` with at least one mantissa
/// digit. Rejects the `inf`/`nan` spellings `str::parse` would take.
fn is_decimal(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let integer_end = digits_from(i);
    let mut digits = integer_end > i;
    i = integer_end;
    if bytes.get(i) == Some(&b'.') {
        let fraction_end = digits_from(i + 1);
        digits |= fraction_end > i + 1;
        i = fraction_end;
    }
    if !digits {
        return false;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exponent_end = digits_from(i);
        if exponent_end == i {
            return false;
        }
        i = exponent_end;
    }
    i == bytes.len()
}

/// Tolerance `10^-precision` with 6 for negative precisions. Returns the
/// verdict and the failure message.
fn float_check(expected: f64, actual: f64, precision: i64) -> (bool, String) {
    let precision = if precision < 0 { 6 } else { precision.min(1074) };
    let mut tolerance = 10f64.powf(-(precision as f64));
    if tolerance == 0.0 {
        tolerance = f64::from_bits(1);
    }

    let fixed = |v: f64| {
        if v.is_nan() {
            nan_text(v)
        } else {
            format!("{:.*}", precision as usize, v)
        }
    };
    let message = format!("expected {}, got {}", fixed(expected), fixed(actual));
    ((expected - actual).abs() <= tolerance, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(function: RuntimeFunction, arguments: &[Value]) -> Result<Value, FaultKind> {
        call(function, arguments, &mut Host::new(&mut std::io::empty(), &mut Vec::new()))
    }

    fn output_of(calls: &[(RuntimeFunction, Vec<Value>)]) -> String {
        let mut output = Vec::new();
        let mut input = std::io::empty();
        let mut host = Host::new(&mut input, &mut output);
        for (function, arguments) in calls {
            call(*function, arguments, &mut host).unwrap();
        }
        drop(host);
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn println_writes_to_the_sink() {
        let output = output_of(&[
            (RuntimeFunction::IoPrintln, vec![Value::string("hi")]),
            (RuntimeFunction::IoPrintInt, vec![Value::Int(-3)]),
        ]);
        assert_eq!(output, "hi\n-3");
    }

    #[test]
    fn read_line_strips_the_line_ending() {
        let mut input: &[u8] = b"first\r\nsecond";
        let mut output = Vec::new();
        let mut host = Host::new(&mut input, &mut output);

        let mut read = || call(RuntimeFunction::IoReadLine, &[], &mut host);
        assert_eq!(read(), Ok(Value::string("first")));
        assert_eq!(read(), Ok(Value::string("second")));
        assert_eq!(read(), Ok(Value::string("")));
    }

    #[test]
    fn substring_checks_its_range() {
        assert_eq!(
            run(
                RuntimeFunction::StringSubstring,
                &[Value::string("kiln"), Value::Int(1), Value::Int(3)]
            ),
            Ok(Value::string("il"))
        );
        assert_eq!(
            run(
                RuntimeFunction::StringSubstring,
                &[Value::string("kiln"), Value::Int(2), Value::Int(9)]
            ),
            Err(FaultKind::SubstringOutOfBounds {
                start: 2,
                end: 9,
                length: 4,
            })
        );
    }

    #[test]
    fn string_helpers() {
        assert_eq!(
            run(RuntimeFunction::StringTrim, &[Value::string(" \tx y\n")]),
            Ok(Value::string("x y"))
        );
        assert_eq!(
            run(RuntimeFunction::StringIndexOf, &[Value::string("abc"), Value::string("z")]),
            Ok(Value::Int(-1))
        );
        assert_eq!(
            run(RuntimeFunction::StringLastIndexOf, &[Value::string("abcabc"), Value::string("bc")]),
            Ok(Value::Int(4))
        );
        assert_eq!(
            run(RuntimeFunction::StringLastIndexOf, &[Value::string("abc"), Value::string("")]),
            Ok(Value::Int(3))
        );
        assert_eq!(
            run(RuntimeFunction::StringCompare, &[Value::string("B"), Value::string("a")]),
            Ok(Value::Int(-1))
        );
        assert_eq!(
            run(RuntimeFunction::StringCompare, &[Value::string("ab"), Value::string("a")]),
            Ok(Value::Int(1))
        );
        assert_eq!(
            run(RuntimeFunction::StringCharAt, &[Value::string("A"), Value::Int(0)]),
            Ok(Value::Int(65))
        );
    }

    #[test]
    fn conversions() {
        assert_eq!(
            run(RuntimeFunction::StringToInt, &[Value::string("12x")]),
            Ok(Value::Int(0))
        );
        assert_eq!(
            run(RuntimeFunction::StringToInt, &[Value::string("-42")]),
            Ok(Value::Int(-42))
        );
        assert_eq!(
            run(RuntimeFunction::StringToFloat, &[Value::string("-2.5e1")]),
            Ok(Value::Float(-25.0))
        );
        assert_eq!(
            run(RuntimeFunction::StringToFloat, &[Value::string("inf")]),
            Ok(Value::Float(0.0))
        );
        assert_eq!(
            run(RuntimeFunction::StringToBool, &[Value::string("True")]),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            run(RuntimeFunction::BoolToString, &[Value::Bool(true)]),
            Ok(Value::string("true"))
        );
    }

    #[test]
    fn decimal_syntax() {
        for accepted in ["1", "+1.", ".5", "-0.25e-3", "7E+2"] {
            assert!(is_decimal(accepted), "{accepted}");
        }
        for rejected in ["", ".", "-", "1e", "1e+", "nan", "0x10", " 1", "1.2.3"] {
            assert!(!is_decimal(rejected), "{rejected}");
        }
    }

    #[test]
    fn floats_print_like_percent_g() {
        let cases = [
            (0.0, "0"),
            (1.5, "1.5"),
            (100.0, "100"),
            (1.0 / 3.0, "0.333333"),
            (123456.0, "123456"),
            (1234567.0, "1.23457e+06"),
            (0.0001, "0.0001"),
            (0.00001, "1e-05"),
            (-2.5e300, "-2.5e+300"),
            (999999.5, "1e+06"),
            (f64::INFINITY, "inf"),
        ];
        for (value, text) in cases {
            assert_eq!(format_general(value), text, "{value}");
        }
    }

    #[test]
    fn math_helpers() {
        assert_eq!(pow(2, 10), 1024);
        assert_eq!(pow(2, 64), 0);
        assert_eq!(pow(3, -1), 0);
        assert_eq!(gcd(-12, 18), 6);
        assert_eq!(gcd(0, 0), 0);
        assert_eq!(lcm(-4, 6), 12);
        assert_eq!(lcm(0, 0), 0);
        assert_eq!(factorial(5), 120);
        assert_eq!(factorial(-1), 0);
        assert_eq!(factorial(20), 2_432_902_008_176_640_000);
        assert_eq!(factorial(66), 0);
        assert!(is_prime(2) && is_prime(97) && is_prime(7919));
        assert!(!is_prime(1) && !is_prime(-7) && !is_prime(91));
        assert_eq!(
            run(RuntimeFunction::MathAbs, &[Value::Int(i64::MIN)]),
            Ok(Value::Int(i64::MIN))
        );
        assert_eq!(
            run(RuntimeFunction::MathMaxFloat, &[Value::Float(1.5), Value::Float(-2.0)]),
            Ok(Value::Float(1.5))
        );
    }

    #[test]
    fn push_is_visible_through_every_reference() {
        let array = Value::array(Vec::new());
        run(RuntimeFunction::ArrayPush, &[array.clone(), Value::Int(7)]).unwrap();
        assert_eq!(run(RuntimeFunction::ArrayLength, &[array]), Ok(Value::Int(1)));
    }

    #[test]
    fn args_skip_nothing_the_host_was_given() {
        let mut output = Vec::new();
        let mut input = std::io::empty();
        let mut host =
            Host::new(&mut input, &mut output).with_args(vec!["a".into(), "b c".into()]);

        assert_eq!(call(RuntimeFunction::OsArgsCount, &[], &mut host), Ok(Value::Int(2)));
        let args = call(RuntimeFunction::OsArgs, &[], &mut host).unwrap();
        assert_eq!(args, Value::array(vec![Value::string("a"), Value::string("b c")]));
    }

    #[test]
    fn exit_stops_with_its_status() {
        assert_eq!(run(RuntimeFunction::OsExit, &[Value::Int(3)]), Err(FaultKind::Exit(3)));
    }

    #[test]
    fn assertions_report_only_failures() {
        let output = output_of(&[
            (RuntimeFunction::Assert, vec![Value::Bool(true), Value::string("quiet")]),
            (RuntimeFunction::Assert, vec![Value::Bool(false), Value::string("plain")]),
            (RuntimeFunction::AssertFalse, vec![Value::Bool(true), Value::string("flag")]),
            (
                RuntimeFunction::AssertEqInt,
                vec![Value::Int(1), Value::Int(2), Value::string("sum")],
            ),
            (
                RuntimeFunction::AssertEqString,
                vec![Value::string("a"), Value::string("a"), Value::string("same")],
            ),
        ]);
        assert_eq!(
            output,
            "  ASSERTION FAILED: plain\n\
             \x20 ASSERTION FAILED: flag (expected: false, actual: true)\n\
             \x20 ASSERTION FAILED: sum (expected: 1, actual: 2)\n"
        );
    }

    #[test]
    fn suites_count_and_summarize() {
        let mut output = Vec::new();
        let mut input = std::io::empty();
        let mut host = Host::new(&mut input, &mut output);
        let suite = call(RuntimeFunction::TestingSuite, &[], &mut host).unwrap();
        let name = Value::string;

        call(RuntimeFunction::TestingPass, &[suite.clone(), name("ok")], &mut host).unwrap();
        call(
            RuntimeFunction::TestingEqualInt,
            &[suite.clone(), name("sum"), Value::Int(4), Value::Int(5)],
            &mut host,
        )
        .unwrap();
        call(
            RuntimeFunction::TestingEqualFloatPrecision,
            &[suite.clone(), name("pi"), Value::Float(3.14159), Value::Float(3.1416), Value::Int(3)],
            &mut host,
        )
        .unwrap();

        assert_eq!(call(RuntimeFunction::TestingTotal, &[suite.clone()], &mut host), Ok(Value::Int(3)));
        assert_eq!(
            call(RuntimeFunction::TestingPassed, &[suite.clone()], &mut host),
            Ok(Value::Bool(false))
        );
        assert_eq!(call(RuntimeFunction::TestingSummary, &[suite.clone()], &mut host), Ok(Value::Int(1)));
        assert_eq!(call(RuntimeFunction::TestingExit, &[suite], &mut host), Err(FaultKind::Exit(1)));
        drop(host);

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Running test: ok\n\u{2713} ok PASSED\n\
             Running test: sum\n\u{2717} sum FAILED\n  expected 4, got 5\n\
             Running test: pi\n\u{2713} pi PASSED\n\
             \nTest Summary: 3 total, 2 passed, 1 failed\n"
        );
    }

    #[test]
    fn float_checks_use_the_precision_tolerance() {
        assert_eq!(
            float_check(1.0, 1.5, 2),
            (false, "expected 1.00, got 1.50".to_string())
        );
        assert!(float_check(1.0, 1.0000001, -1).0);
        assert!(!float_check(0.1, 0.2, 2000).0);
    }
}
