//! Assembler configuration.
//!
//! Every switch that changes which instructions are emitted lives here and is
//! passed to `Assembler::new`; there is no global flag state. The same
//! switches are exposed as command-line flags through [`ASSEMBLER_FLAGS`].

use vesper_core::{FlagError, FlagKind, FlagSpec, FlagValue, Flags};

use crate::backend::x64::buffer::DEFAULT_CAPACITY;

/// Configuration for code emission.
///
/// # Example
///
/// ```ignore
/// use vesper_jit::AssemblerConfig;
///
/// // Route every safepoint transition through the runtime stubs.
/// let config = AssemblerConfig {
///     use_slow_path: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    // =========================================================================
    // Runtime Paths
    // =========================================================================
    /// Always take the runtime stub in safepoint transitions.
    ///
    /// The inline compare-and-swap is still emitted so the sequence has the
    /// same instruction count either way.
    ///
    /// Default: false
    pub use_slow_path: bool,

    /// Generated code runs under ThreadSanitizer. Implies the slow path for
    /// safepoint transitions.
    ///
    /// Default: false
    pub thread_sanitizer: bool,

    /// Emit inline bump-pointer allocation. When off, every allocation
    /// jumps straight to the failure label.
    ///
    /// Default: true
    pub inline_alloc: bool,

    /// Consult the per-class allocation-tracing table before allocating
    /// inline.
    ///
    /// Default: true
    pub allocation_tracing: bool,

    // =========================================================================
    // Checking
    // =========================================================================
    /// When leaving native code without exiting the safepoint, check that
    /// the thread really is at a full safepoint and trap otherwise.
    ///
    /// Default: false
    pub verify_safepoint_state: bool,

    /// Trap when a value promised not to be a small integer is one.
    ///
    /// Default: false
    pub verify_smi_values: bool,

    // =========================================================================
    // Output
    // =========================================================================
    /// Record textual comments alongside the generated code.
    ///
    /// Default: false
    pub code_comments: bool,

    /// Allow constants to be loaded from the object pool. When off,
    /// constants are materialized as immediates.
    ///
    /// Default: true
    pub constant_pool_allowed: bool,

    /// Initial size of the instruction buffer in bytes.
    ///
    /// Default: 4KB
    pub initial_buffer_capacity: usize,
}

impl AssemblerConfig {
    /// Whether safepoint transitions must always call the runtime.
    #[inline]
    pub fn force_slow_path(&self) -> bool {
        self.use_slow_path || self.thread_sanitizer
    }

    /// Build a configuration from command-line style flags, returning the
    /// arguments that were not flags.
    pub fn from_args<'a, I>(args: I) -> Result<(Self, Vec<&'a str>), FlagError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = AssemblerConfig::default();
        let rest = Flags::new(ASSEMBLER_FLAGS).parse(args, &mut config)?;
        Ok((config, rest))
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            use_slow_path: false,
            thread_sanitizer: false,
            inline_alloc: true,
            allocation_tracing: true,
            verify_safepoint_state: false,
            verify_smi_values: false,
            code_comments: false,
            constant_pool_allowed: true,
            initial_buffer_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Flag schema for [`AssemblerConfig`].
pub static ASSEMBLER_FLAGS: &[FlagSpec<AssemblerConfig>] = &[
    FlagSpec {
        name: "use_slow_path",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(false),
        help: "Always call the runtime in safepoint transitions",
        setter: |c, v| c.use_slow_path = v.as_bool().unwrap_or(false),
    },
    FlagSpec {
        name: "thread_sanitizer",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(false),
        help: "Generate code for a ThreadSanitizer runtime",
        setter: |c, v| c.thread_sanitizer = v.as_bool().unwrap_or(false),
    },
    FlagSpec {
        name: "inline_alloc",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(true),
        help: "Allocate objects inline in generated code",
        setter: |c, v| c.inline_alloc = v.as_bool().unwrap_or(true),
    },
    FlagSpec {
        name: "allocation_tracing",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(true),
        help: "Check per-class allocation tracing before inline allocation",
        setter: |c, v| c.allocation_tracing = v.as_bool().unwrap_or(true),
    },
    FlagSpec {
        name: "verify_safepoint_state",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(false),
        help: "Trap if native code returns without holding the safepoint",
        setter: |c, v| c.verify_safepoint_state = v.as_bool().unwrap_or(false),
    },
    FlagSpec {
        name: "verify_smi_values",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(false),
        help: "Trap on small integers where heap objects are expected",
        setter: |c, v| c.verify_smi_values = v.as_bool().unwrap_or(false),
    },
    FlagSpec {
        name: "code_comments",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(false),
        help: "Record comments in generated code",
        setter: |c, v| c.code_comments = v.as_bool().unwrap_or(false),
    },
    FlagSpec {
        name: "constant_pool_allowed",
        kind: FlagKind::Bool,
        default: FlagValue::Bool(true),
        help: "Load constants from the object pool",
        setter: |c, v| c.constant_pool_allowed = v.as_bool().unwrap_or(true),
    },
    FlagSpec {
        name: "initial_buffer_capacity",
        kind: FlagKind::Int,
        default: FlagValue::Int(DEFAULT_CAPACITY as i64),
        help: "Initial instruction buffer size in bytes",
        setter: |c, v| {
            c.initial_buffer_capacity =
                usize::try_from(v.as_int().unwrap_or(0)).unwrap_or(DEFAULT_CAPACITY)
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_schema() {
        let mut from_schema = AssemblerConfig {
            inline_alloc: false,
            constant_pool_allowed: false,
            initial_buffer_capacity: 1,
            ..Default::default()
        };
        Flags::new(ASSEMBLER_FLAGS).apply_defaults(&mut from_schema);
        assert_eq!(from_schema, AssemblerConfig::default());
    }

    #[test]
    fn test_from_args() {
        let (config, rest) =
            AssemblerConfig::from_args(["--use-slow-path", "--no-inline_alloc", "stub"]).unwrap();
        assert!(config.use_slow_path);
        assert!(config.force_slow_path());
        assert!(!config.inline_alloc);
        assert_eq!(rest, vec!["stub"]);
    }

    #[test]
    fn test_tsan_forces_slow_path() {
        let config = AssemblerConfig {
            thread_sanitizer: true,
            ..Default::default()
        };
        assert!(config.force_slow_path());
        assert!(!AssemblerConfig::default().force_slow_path());
    }

    #[test]
    fn test_bad_flag() {
        assert!(matches!(
            AssemblerConfig::from_args(["--initial-buffer-capacity=big"]),
            Err(FlagError::InvalidValue { .. })
        ));
    }
}
