//! Value representations.

use std::fmt;

/// How an IR value is represented in a machine location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Representation {
    /// No value (e.g. instructions without output).
    NoRepresentation,
    /// A tagged object pointer or small integer, visible to the GC.
    #[default]
    Tagged,
    /// A raw machine word the GC must not trace.
    Untagged,
    UnboxedDouble,
    UnboxedFloat,
    UnboxedInt8,
    UnboxedUint8,
    UnboxedInt16,
    UnboxedUint16,
    UnboxedInt32,
    UnboxedUint32,
    UnboxedInt64,
    UnboxedUint64,
    Float32x4,
    Int32x4,
    Float64x2,
    /// Two tagged values held in a pair location.
    PairOfTagged,
}

impl Representation {
    /// Size of the unboxed value in bytes.
    pub const fn value_size(self) -> usize {
        match self {
            Representation::NoRepresentation => 0,
            Representation::UnboxedInt8 | Representation::UnboxedUint8 => 1,
            Representation::UnboxedInt16 | Representation::UnboxedUint16 => 2,
            Representation::UnboxedInt32
            | Representation::UnboxedUint32
            | Representation::UnboxedFloat => 4,
            Representation::Tagged
            | Representation::Untagged
            | Representation::UnboxedDouble
            | Representation::UnboxedInt64
            | Representation::UnboxedUint64 => 8,
            Representation::Float32x4
            | Representation::Int32x4
            | Representation::Float64x2
            | Representation::PairOfTagged => 16,
        }
    }

    pub const fn is_unboxed_integer(self) -> bool {
        matches!(
            self,
            Representation::UnboxedInt8
                | Representation::UnboxedUint8
                | Representation::UnboxedInt16
                | Representation::UnboxedUint16
                | Representation::UnboxedInt32
                | Representation::UnboxedUint32
                | Representation::UnboxedInt64
                | Representation::UnboxedUint64
        )
    }

    pub const fn is_unsigned(self) -> bool {
        matches!(
            self,
            Representation::UnboxedUint8
                | Representation::UnboxedUint16
                | Representation::UnboxedUint32
                | Representation::UnboxedUint64
        )
    }

    pub const fn is_simd(self) -> bool {
        matches!(
            self,
            Representation::Float32x4 | Representation::Int32x4 | Representation::Float64x2
        )
    }

    /// Whether values of this representation live in XMM registers.
    pub const fn is_fpu(self) -> bool {
        matches!(self, Representation::UnboxedDouble | Representation::UnboxedFloat)
            || self.is_simd()
    }

    /// Short name used in IL listings.
    pub const fn name(self) -> &'static str {
        match self {
            Representation::NoRepresentation => "none",
            Representation::Tagged => "tagged",
            Representation::Untagged => "untagged",
            Representation::UnboxedDouble => "double",
            Representation::UnboxedFloat => "float",
            Representation::UnboxedInt8 => "int8",
            Representation::UnboxedUint8 => "uint8",
            Representation::UnboxedInt16 => "int16",
            Representation::UnboxedUint16 => "uint16",
            Representation::UnboxedInt32 => "int32",
            Representation::UnboxedUint32 => "uint32",
            Representation::UnboxedInt64 => "int64",
            Representation::UnboxedUint64 => "uint64",
            Representation::Float32x4 => "float32x4",
            Representation::Int32x4 => "int32x4",
            Representation::Float64x2 => "float64x2",
            Representation::PairOfTagged => "tagged_pair",
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Representation::Tagged.value_size(), 8);
        assert_eq!(Representation::UnboxedUint16.value_size(), 2);
        assert_eq!(Representation::UnboxedFloat.value_size(), 4);
        assert_eq!(Representation::Float64x2.value_size(), 16);
    }

    #[test]
    fn test_classification() {
        assert!(Representation::UnboxedInt32.is_unboxed_integer());
        assert!(!Representation::Untagged.is_unboxed_integer());
        assert!(Representation::UnboxedUint64.is_unsigned());
        assert!(!Representation::UnboxedInt64.is_unsigned());
        assert!(Representation::UnboxedDouble.is_fpu());
        assert!(Representation::Int32x4.is_fpu());
        assert!(!Representation::Tagged.is_fpu());
        assert_eq!(Representation::PairOfTagged.to_string(), "tagged_pair");
    }
}
