//! The runtime support library ABI. Library functions are the operations a
//! program may call by name (`std.io.println`); support functions are the
//! helpers native code uses to implement aggregates and faults. Both are
//! implemented by the VM and by the C runtime embedded below.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::middle::mir::Type;

/// Header of the C runtime, included by emitted C code
pub const C_HEADER: &str = include_str!("kiln_rt.h");
/// Implementation of the C runtime, linked into every native executable
pub const C_SOURCE: &str = include_str!("kiln_rt.c");

pub const C_HEADER_NAME: &str = "kiln_rt.h";
pub const C_SOURCE_NAME: &str = "kiln_rt.c";

/// Process exit status of a program stopped by a runtime fault
pub const FAULT_EXIT_STATUS: u8 = 70;

/// How a value crosses the runtime boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiType {
    Void,
    Int,
    Float,
    Bool,
    String,
    /// Any `array<T>`
    Array,
    /// `array<string>`
    StringArray,
    /// Any `map<string,V>`
    Map,
    /// The element type of the preceding array argument
    Element,
    /// Raw untyped pointer (structs, closures, function addresses)
    Pointer,
    /// An 8-byte slot holding any value's bit pattern
    Bits,
}

macro_rules! runtime_functions {
    (@fallible fallible) => { true };
    (@fallible) => { false };
    ($(
        $variant:ident => $name:literal ($($param:ident),*) -> $ret:ident $(, $fallible:ident)?;
    )*) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Display,
            EnumString,
            EnumIter,
            IntoStaticStr,
            Serialize,
            Deserialize,
        )]
        pub enum RuntimeFunction {
            $(
                #[strum(serialize = $name)]
                #[serde(rename = $name)]
                $variant,
            )*
        }

        impl RuntimeFunction {
            /// Native symbol implementing the function
            pub fn symbol(self) -> &'static str {
                match self {
                    $(Self::$variant => paste::paste! { stringify!([<kiln_ $variant:snake>]) },)*
                }
            }

            pub fn parameters(self) -> &'static [AbiType] {
                match self {
                    $(Self::$variant => &[$(AbiType::$param),*],)*
                }
            }

            pub fn returns(self) -> AbiType {
                match self {
                    $(Self::$variant => AbiType::$ret,)*
                }
            }

            /// Fallible functions receive the calling function's name and
            /// block as two trailing arguments in native code, so a fault can
            /// be reported at its location.
            pub fn can_fault(self) -> bool {
                match self {
                    $(Self::$variant => runtime_functions!(@fallible $($fallible)?),)*
                }
            }
        }
    };
}

runtime_functions! {
    IoPrint => "std.io.print" (String) -> Void;
    IoPrintln => "std.io.println" (String) -> Void;
    IoPrintInt => "std.io.print_int" (Int) -> Void;
    IoPrintlnInt => "std.io.println_int" (Int) -> Void;
    IoReadLine => "std.io.read_line" () -> String;

    IntToString => "std.int_to_string" (Int) -> String;
    BoolToString => "std.bool_to_string" (Bool) -> String;
    FloatToString => "std.float_to_string" (Float) -> String;
    StringToInt => "std.string_to_int" (String) -> Int;
    StringToFloat => "std.string_to_float" (String) -> Float;
    StringToBool => "std.string_to_bool" (String) -> Bool;

    StringLength => "std.string.length" (String) -> Int;
    StringConcat => "std.string.concat" (String, String) -> String;
    StringSubstring => "std.string.substring" (String, Int, Int) -> String, fallible;
    StringCharAt => "std.string.char_at" (String, Int) -> Int, fallible;
    StringContains => "std.string.contains" (String, String) -> Bool;
    StringStartsWith => "std.string.starts_with" (String, String) -> Bool;
    StringEndsWith => "std.string.ends_with" (String, String) -> Bool;
    StringIndexOf => "std.string.index_of" (String, String) -> Int;
    StringLastIndexOf => "std.string.last_index_of" (String, String) -> Int;
    StringEquals => "std.string.equals" (String, String) -> Bool;
    StringCompare => "std.string.compare" (String, String) -> Int;
    StringToUpper => "std.string.to_upper" (String) -> String;
    StringToLower => "std.string.to_lower" (String) -> String;
    StringTrim => "std.string.trim" (String) -> String;

    MathAbs => "std.math.abs" (Int) -> Int;
    MathMax => "std.math.max" (Int, Int) -> Int;
    MathMin => "std.math.min" (Int, Int) -> Int;
    MathPow => "std.math.pow" (Int, Int) -> Int;
    MathGcd => "std.math.gcd" (Int, Int) -> Int;
    MathLcm => "std.math.lcm" (Int, Int) -> Int;
    MathFactorial => "std.math.factorial" (Int) -> Int;
    MathIsPrime => "std.math.is_prime" (Int) -> Bool;
    MathSqrt => "std.math.sqrt" (Float) -> Float;
    MathAbsFloat => "std.math.abs_float" (Float) -> Float;
    MathMaxFloat => "std.math.max_float" (Float, Float) -> Float;
    MathMinFloat => "std.math.min_float" (Float, Float) -> Float;

    ArrayLength => "std.array.length" (Array) -> Int;
    ArrayPush => "std.array.push" (Array, Element) -> Void;

    MapSize => "std.map.size" (Map) -> Int;
    MapContains => "std.map.contains" (Map, String) -> Bool;

    FileExists => "std.file.exists" (String) -> Bool;
    FileRead => "std.file.read" (String) -> String, fallible;
    FileWrite => "std.file.write" (String, String) -> Void, fallible;

    OsArgs => "std.os.args" () -> StringArray;
    OsArgsCount => "std.os.args_count" () -> Int;
    OsGetenv => "std.os.getenv" (String) -> String;
    OsExit => "std.os.exit" (Int) -> Void;

    Assert => "std.assert" (Bool, String) -> Void;
    AssertTrue => "std.assert.true" (Bool, String) -> Void;
    AssertFalse => "std.assert.false" (Bool, String) -> Void;
    AssertEqInt => "std.assert.eq(int)" (Int, Int, String) -> Void;
    AssertEqFloat => "std.assert.eq(float)" (Float, Float, String) -> Void;
    AssertEqBool => "std.assert.eq(bool)" (Bool, Bool, String) -> Void;
    AssertEqString => "std.assert.eq(string)" (String, String, String) -> Void;

    TestStart => "std.test.start" (String) -> Void;
    TestEnd => "std.test.end" (String, Bool) -> Void;
    TestSummary => "std.test.summary" () -> Int;

    TestingSuite => "std.testing.suite" () -> Int;
    TestingExpect => "std.testing.expect" (Int, String, Bool) -> Int;
    TestingPass => "std.testing.pass" (Int, String) -> Int;
    TestingFail => "std.testing.fail" (Int, String, String) -> Int;
    TestingEqualInt => "std.testing.equal_int" (Int, String, Int, Int) -> Int;
    TestingEqualBool => "std.testing.equal_bool" (Int, String, Bool, Bool) -> Int;
    TestingEqualString => "std.testing.equal_string" (Int, String, String, String) -> Int;
    TestingEqualFloat => "std.testing.equal_float" (Int, String, Float, Float) -> Int;
    TestingEqualFloatPrecision => "std.testing.equal_float_precision" (Int, String, Float, Float, Int) -> Int;
    TestingTotal => "std.testing.total" (Int) -> Int;
    TestingFailures => "std.testing.failures" (Int) -> Int;
    TestingPassed => "std.testing.passed" (Int) -> Bool;
    TestingSummary => "std.testing.summary" (Int) -> Int;
    TestingExit => "std.testing.exit" (Int) -> Void;
}

impl RuntimeFunction {
    /// The library name programs call and coverage counts under. Overloads
    /// of one name share it.
    pub fn name(self) -> &'static str {
        let name: &'static str = self.into();
        name.split_once('(').map_or(name, |(name, _)| name)
    }

    /// Resolves a call by library name. Overloaded names pick the variant
    /// for the type of the first argument.
    pub fn lookup(name: &str, arguments: &[Type]) -> Option<Self> {
        if let Ok(function) = name.parse::<Self>() {
            return (!function.is_overload()).then_some(function);
        }
        let first = arguments.first()?;
        format!("{name}({first})").parse().ok()
    }

    fn is_overload(self) -> bool {
        let name: &'static str = self.into();
        name.ends_with(')')
    }
}

/// Signature of a support routine used by native code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportSignature {
    pub parameters: &'static [AbiType],
    pub returns: AbiType,
    /// The routine never returns
    pub diverges: bool,
}

const fn routine(parameters: &'static [AbiType], returns: AbiType) -> SupportSignature {
    SupportSignature {
        parameters,
        returns,
        diverges: false,
    }
}

const fn fault(parameters: &'static [AbiType]) -> SupportSignature {
    SupportSignature {
        parameters,
        returns: AbiType::Void,
        diverges: true,
    }
}

pub mod support {
    pub const ARRAY_NEW: &str = "kiln_rt_array_new";
    pub const ARRAY_GET: &str = "kiln_rt_array_get";
    pub const ARRAY_SET: &str = "kiln_rt_array_set";
    pub const ARRAY_LEN: &str = "kiln_rt_array_len";
    pub const STRUCT_NEW: &str = "kiln_rt_struct_new";
    pub const STRUCT_COPY: &str = "kiln_rt_struct_copy";
    pub const MAP_NEW: &str = "kiln_rt_map_new";
    pub const MAP_GET: &str = "kiln_rt_map_get";
    pub const MAP_PUT: &str = "kiln_rt_map_put";
    pub const CLOSURE_NEW: &str = "kiln_rt_closure_new";
    pub const STR_CONCAT: &str = "kiln_rt_str_concat";
    pub const STR_COMPARE: &str = "kiln_rt_str_compare";
    pub const FLOAT_REM: &str = "kiln_rt_float_rem";
    pub const PRINT_RESULT: &str = "kiln_rt_print_result";
    pub const INIT: &str = "kiln_rt_init";
    pub const FAULT_DIVISION: &str = "kiln_rt_fault_division";
    pub const FAULT_REMAINDER: &str = "kiln_rt_fault_remainder";
}

/// Every support routine of the C runtime with its signature
pub static SUPPORT_FUNCTIONS: Lazy<BTreeMap<&'static str, SupportSignature>> = Lazy::new(|| {
    use AbiType::*;

    BTreeMap::from([
        (support::ARRAY_NEW, routine(&[Int], Array)),
        (support::ARRAY_GET, routine(&[Array, Int, String, Int], Bits)),
        (support::ARRAY_SET, routine(&[Array, Int, Bits, String, Int], Void)),
        (support::ARRAY_LEN, routine(&[Array], Int)),
        (support::STRUCT_NEW, routine(&[Int], Pointer)),
        (support::STRUCT_COPY, routine(&[Pointer, Int], Pointer)),
        (support::MAP_NEW, routine(&[], Map)),
        (support::MAP_GET, routine(&[Map, String, Int, String, Int], Bits)),
        (support::MAP_PUT, routine(&[Map, String, Bits], Void)),
        (support::CLOSURE_NEW, routine(&[Pointer, Int], Pointer)),
        (support::STR_CONCAT, routine(&[String, String], String)),
        (support::STR_COMPARE, routine(&[String, String], Int)),
        (support::FLOAT_REM, routine(&[Float, Float], Float)),
        (support::PRINT_RESULT, routine(&[String], Void)),
        (support::INIT, routine(&[Int, Pointer], Void)),
        (support::FAULT_DIVISION, fault(&[String, Int])),
        (support::FAULT_REMAINDER, fault(&[String, Int])),
    ])
});

/// How `map.get` behaves for a key that is not present, passed to the
/// runtime as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum MissingKey {
    /// All-zero bits: `0`, `0.0` or `false`
    Zero = 0,
    EmptyString = 1,
    Fault = 2,
}

impl MissingKey {
    pub fn for_value_type(ty: &Type) -> Self {
        match ty {
            Type::Int | Type::Float | Type::Bool => MissingKey::Zero,
            Type::String => MissingKey::EmptyString,
            _ => MissingKey::Fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn names_round_trip() {
        for function in RuntimeFunction::iter() {
            let arguments = [function.parameters().first().map_or(Type::Void, |abi| match abi {
                AbiType::Float => Type::Float,
                AbiType::Bool => Type::Bool,
                AbiType::String => Type::String,
                _ => Type::Int,
            })];
            assert_eq!(RuntimeFunction::lookup(function.name(), &arguments), Some(function));
        }
        assert_eq!(RuntimeFunction::lookup("std.io.nope", &[]), None);
    }

    #[test]
    fn overloads_resolve_by_the_first_argument() {
        assert_eq!(
            RuntimeFunction::lookup("std.assert.eq", &[Type::String, Type::String, Type::String]),
            Some(RuntimeFunction::AssertEqString)
        );
        assert_eq!(
            RuntimeFunction::lookup("std.assert.eq", &[Type::Float]),
            Some(RuntimeFunction::AssertEqFloat)
        );
        assert_eq!(RuntimeFunction::AssertEqInt.name(), "std.assert.eq");
        assert_eq!(RuntimeFunction::lookup("std.assert.eq", &[]), None);
        assert_eq!(RuntimeFunction::lookup("std.assert.eq(int)", &[Type::Int]), None);
        assert_eq!(
            RuntimeFunction::lookup("std.assert.eq", &[Type::array_of(Type::Int)]),
            None
        );
    }

    #[test]
    fn conversions_keep_their_library_names() {
        assert_eq!(
            RuntimeFunction::lookup("std.int_to_string", &[Type::Int]),
            Some(RuntimeFunction::IntToString)
        );
        assert_eq!(RuntimeFunction::StringToFloat.symbol(), "kiln_string_to_float");
    }

    #[test]
    fn symbols_follow_variant_names() {
        assert_eq!(RuntimeFunction::IoPrintlnInt.symbol(), "kiln_io_println_int");
        assert_eq!(RuntimeFunction::StringCharAt.symbol(), "kiln_string_char_at");
        assert_eq!(RuntimeFunction::MathGcd.symbol(), "kiln_math_gcd");
    }

    #[test]
    fn c_runtime_defines_every_symbol() {
        let symbols = RuntimeFunction::iter()
            .map(RuntimeFunction::symbol)
            .chain(SUPPORT_FUNCTIONS.keys().copied());

        for symbol in symbols {
            let declaration = format!("{symbol}(");
            assert!(C_HEADER.contains(&declaration), "{symbol} missing from {C_HEADER_NAME}");
            assert!(C_SOURCE.contains(&declaration), "{symbol} missing from {C_SOURCE_NAME}");
        }
    }

    #[test]
    fn c_runtime_fault_status_matches() {
        assert!(C_HEADER.contains(&format!("#define KILN_FAULT_EXIT_STATUS {FAULT_EXIT_STATUS}")));
    }

    #[test]
    fn serde_uses_library_names() {
        let json = serde_json::to_string(&RuntimeFunction::StringLength).unwrap();
        assert_eq!(json, "\"std.string.length\"");
    }
}
