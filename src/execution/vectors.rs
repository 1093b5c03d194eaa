//! Argument and environment vectors
//!
//! Both vectors are fully built before fork: the child only ever reads the
//! NULL-terminated pointer arrays prepared here.

use crate::errors::{ExecError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use std::ptr;

/// Maximum number of caller-supplied arguments (`_POSIX_ARG_MAX`)
pub const POSIX_ARG_MAX: usize = 4096;

/// A primitive accepted as an argument or environment value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            // Integral floats keep a fractional digit so they stay distinguishable from integers
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{:.1}", n)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = ExecError;

    fn try_from(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => Ok(n
                .as_i64()
                .map(Value::Integer)
                .unwrap_or_else(|| Value::Number(n.as_f64().unwrap_or(f64::NAN)))),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(ExecError::TypeMismatch(format!(
                "value must be string, number or boolean, got {}",
                json_type_name(other)
            ))),
        }
    }
}

fn json_type_name(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

pub(crate) fn to_cstring(s: &str, what: &str) -> Result<CString> {
    CString::new(s)
        .map_err(|_| ExecError::InvalidArgument(format!("{} contains a nul byte: {:?}", what, s)))
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// NULL-terminated `argv` array
///
/// The pointers reference the heap buffers of `args`, which never move
/// while the vector is alive.
#[derive(Debug)]
pub struct ArgumentVector {
    args: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl ArgumentVector {
    /// The default vector: `[path]`
    pub fn new(path: &str) -> Result<Self> {
        Self::from_cstrings(vec![to_cstring(path, "path")?])
    }

    /// Build from a complete argument list (argv[0] included).
    ///
    /// An empty list falls back to `[path]`. More than `POSIX_ARG_MAX`
    /// entries is rejected before anything is allocated for the child.
    pub fn with_args<I, V>(path: &str, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = args.into_iter().map(Into::into).collect();
        check_arg_count(values.len())?;
        Self::from_values(path, &values)
    }

    /// Build from a marshaled sequence.
    ///
    /// Arrays are taken as the complete argv. Objects must have integer
    /// keys: key `"0"` supplies an explicit argv[0], otherwise `path` is
    /// used and the remaining entries follow in ascending index order.
    pub fn from_json(path: &str, json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Self::new(path),
            serde_json::Value::Array(items) => {
                check_arg_count(items.len())?;
                let values = items
                    .iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>>>()?;
                Self::with_args(path, values)
            }
            serde_json::Value::Object(map) => {
                check_arg_count(map.len())?;
                let mut indexed = BTreeMap::new();
                for (key, value) in map {
                    let index: u32 = key.parse().map_err(|_| {
                        ExecError::TypeMismatch(format!("index must be integer, got {:?}", key))
                    })?;
                    indexed.insert(index, Value::try_from(value)?);
                }

                // The limit applies to caller entries; a prepended path is extra
                let mut values = Vec::with_capacity(indexed.len() + 1);
                if !indexed.contains_key(&0) {
                    values.push(Value::from(path));
                }
                values.extend(indexed.into_values());
                Self::from_values(path, &values)
            }
            other => Err(ExecError::TypeMismatch(format!(
                "argv must be a sequence, got {}",
                json_type_name(other)
            ))),
        }
    }

    fn from_values(path: &str, values: &[Value]) -> Result<Self> {
        if values.is_empty() {
            return Self::new(path);
        }

        let args = values
            .iter()
            .map(|v| to_cstring(&v.to_string(), "argument"))
            .collect::<Result<Vec<_>>>()?;
        Self::from_cstrings(args)
    }

    fn from_cstrings(args: Vec<CString>) -> Result<Self> {
        let ptrs = null_terminated(&args);
        Ok(Self { args, ptrs })
    }

    /// Number of arguments, excluding the terminating NULL
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.args.iter().map(CString::as_c_str)
    }

    /// Pointer to the NULL-terminated array, valid while `self` is alive
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }
}

fn check_arg_count(count: usize) -> Result<()> {
    if count > POSIX_ARG_MAX {
        return Err(ExecError::ArgumentListTooLong {
            count,
            limit: POSIX_ARG_MAX,
        });
    }
    Ok(())
}

/// NULL-terminated `envp` array of `NAME=value` entries
///
/// Entries are ordered by name; a name given twice keeps its last value.
#[derive(Debug)]
pub struct EnvironmentVector {
    entries: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl EnvironmentVector {
    pub fn new<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut merged = BTreeMap::new();
        for (name, value) in vars {
            let name = name.into();
            if name.is_empty() || name.contains('=') {
                return Err(ExecError::InvalidArgument(format!(
                    "invalid environment variable name: {:?}",
                    name
                )));
            }
            merged.insert(name, value.into().to_string());
        }

        let entries = merged
            .iter()
            .map(|(name, value)| to_cstring(&format!("{}={}", name, value), "environment entry"))
            .collect::<Result<Vec<_>>>()?;
        let ptrs = null_terminated(&entries);
        Ok(Self { entries, ptrs })
    }

    /// Build from a marshaled name-to-value mapping
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => {
                let vars = map
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), Value::try_from(value)?)))
                    .collect::<Result<Vec<_>>>()?;
                Self::new(vars)
            }
            other => Err(ExecError::TypeMismatch(format!(
                "env must be a mapping, got {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CStr> {
        self.entries.iter().map(CString::as_c_str)
    }

    /// Pointer to the NULL-terminated array, valid while `self` is alive
    pub fn as_ptr(&self) -> *const *const c_char {
        self.ptrs.as_ptr()
    }

    /// Entry pointers without the terminator, for `putenv`
    pub(crate) fn entry_ptrs(&self) -> &[*const c_char] {
        &self.ptrs[..self.entries.len()]
    }
}
