//! Enumerated runtime flag schema.
//!
//! Each tunable is one [`FlagSpec`] row: a name, a value kind, a default and
//! a setter that writes the parsed value into a configuration struct. A
//! [`Flags`] parser walks the table; there is no global flag state.
//!
//! ```ignore
//! static SCHEMA: &[FlagSpec<MyConfig>] = &[FlagSpec {
//!     name: "use_slow_path",
//!     kind: FlagKind::Bool,
//!     default: FlagValue::Bool(false),
//!     help: "Always take runtime slow paths",
//!     setter: |c, v| c.use_slow_path = v.as_bool().unwrap_or(false),
//! }];
//!
//! let mut config = MyConfig::default();
//! let rest = Flags::new(SCHEMA).parse(["--use-slow-path", "main.vsp"], &mut config)?;
//! ```

use std::fmt;

use thiserror::Error;

/// Errors produced while parsing flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlagError {
    #[error("unknown flag `--{0}`")]
    Unknown(String),

    #[error("flag `--{0}` requires a value")]
    MissingValue(String),

    #[error("invalid value `{value}` for flag `--{name}` (expected {expected})")]
    InvalidValue {
        name: String,
        value: String,
        expected: FlagKind,
    },
}

/// The value type of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Bool,
    Int,
    Str,
}

impl fmt::Display for FlagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlagKind::Bool => "a boolean",
            FlagKind::Int => "an integer",
            FlagKind::Str => "a string",
        })
    }
}

/// A parsed or default flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagValue<'a> {
    Bool(bool),
    Int(i64),
    Str(&'a str),
}

impl<'a> FlagValue<'a> {
    pub fn kind(&self) -> FlagKind {
        match self {
            FlagValue::Bool(_) => FlagKind::Bool,
            FlagValue::Int(_) => FlagKind::Int,
            FlagValue::Str(_) => FlagKind::Str,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            FlagValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            FlagValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            FlagValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// One row of a flag schema.
pub struct FlagSpec<C> {
    /// Canonical name using underscores; dashes are accepted on input.
    pub name: &'static str,
    pub kind: FlagKind,
    pub default: FlagValue<'static>,
    pub help: &'static str,
    /// Writes a value of `kind` into the configuration.
    pub setter: fn(&mut C, FlagValue<'_>),
}

impl<C> fmt::Debug for FlagSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlagSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .finish()
    }
}

// =============================================================================
// Parser
// =============================================================================

/// Parser over a static flag schema.
#[derive(Debug, Clone, Copy)]
pub struct Flags<C: 'static> {
    schema: &'static [FlagSpec<C>],
}

impl<C> Flags<C> {
    pub const fn new(schema: &'static [FlagSpec<C>]) -> Self {
        Flags { schema }
    }

    pub fn schema(&self) -> &'static [FlagSpec<C>] {
        self.schema
    }

    /// Find a flag by name, accepting `-` in place of `_`.
    pub fn find(&self, name: &str) -> Option<&'static FlagSpec<C>> {
        self.schema
            .iter()
            .find(|spec| names_match(spec.name, name))
    }

    /// Write every default into `config`.
    pub fn apply_defaults(&self, config: &mut C) {
        for spec in self.schema {
            (spec.setter)(config, spec.default);
        }
    }

    /// Apply every `--flag` argument and return the remaining arguments.
    ///
    /// Parsing stops applying flags after a bare `--`.
    pub fn parse<'a, I>(&self, args: I, config: &mut C) -> Result<Vec<&'a str>, FlagError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut rest = Vec::new();
        let mut flags_done = false;
        for arg in args {
            if flags_done {
                rest.push(arg);
            } else if arg == "--" {
                flags_done = true;
            } else if !self.parse_one(arg, config)? {
                rest.push(arg);
            }
        }
        Ok(rest)
    }

    /// Apply a single argument. Returns `false` if it is not a flag.
    pub fn parse_one(&self, arg: &str, config: &mut C) -> Result<bool, FlagError> {
        let Some(body) = arg.strip_prefix("--") else {
            return Ok(false);
        };
        let (name, value) = match body.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (body, None),
        };

        if let Some(spec) = self.find(name) {
            let parsed = parse_value(spec, value)?;
            (spec.setter)(config, parsed);
            return Ok(true);
        }

        // `--no-name` negates a boolean flag.
        if let Some(negated) = name.strip_prefix("no-").or_else(|| name.strip_prefix("no_")) {
            if let Some(spec) = self.find(negated).filter(|s| s.kind == FlagKind::Bool) {
                if let Some(value) = value {
                    return Err(FlagError::InvalidValue {
                        name: name.to_string(),
                        value: value.to_string(),
                        expected: FlagKind::Bool,
                    });
                }
                (spec.setter)(config, FlagValue::Bool(false));
                return Ok(true);
            }
        }

        Err(FlagError::Unknown(name.to_string()))
    }

    /// One line per flag: name, default and help text.
    pub fn usage(&self) -> String {
        let mut out = String::new();
        for spec in self.schema {
            let default = match spec.default {
                FlagValue::Bool(b) => b.to_string(),
                FlagValue::Int(i) => i.to_string(),
                FlagValue::Str(s) => format!("\"{s}\""),
            };
            out.push_str(&format!("  --{:<28} {} (default: {})\n", spec.name, spec.help, default));
        }
        out
    }
}

fn names_match(canonical: &str, given: &str) -> bool {
    canonical.len() == given.len()
        && canonical
            .bytes()
            .zip(given.bytes())
            .all(|(a, b)| a == b || (a == b'_' && b == b'-'))
}

fn parse_value<'a, C>(
    spec: &FlagSpec<C>,
    value: Option<&'a str>,
) -> Result<FlagValue<'a>, FlagError> {
    let invalid = |value: &str| FlagError::InvalidValue {
        name: spec.name.to_string(),
        value: value.to_string(),
        expected: spec.kind,
    };
    match (spec.kind, value) {
        (FlagKind::Bool, None) => Ok(FlagValue::Bool(true)),
        (FlagKind::Bool, Some("true" | "1" | "yes")) => Ok(FlagValue::Bool(true)),
        (FlagKind::Bool, Some("false" | "0" | "no")) => Ok(FlagValue::Bool(false)),
        (FlagKind::Bool, Some(other)) => Err(invalid(other)),
        (FlagKind::Int, Some(v)) => v.parse().map(FlagValue::Int).map_err(|_| invalid(v)),
        (FlagKind::Str, Some(v)) => Ok(FlagValue::Str(v)),
        (FlagKind::Int | FlagKind::Str, None) => {
            Err(FlagError::MissingValue(spec.name.to_string()))
        }
    }
}
