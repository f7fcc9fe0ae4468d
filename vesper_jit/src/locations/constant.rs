//! Constants referenced from locations.
//!
//! A constant location does not embed the value; it names an entry in the
//! compilation's `ConstantTable`.

use crate::backend::x64::encoder::Immediate;
use crate::runtime::Object;

/// Index of a constant in its `ConstantTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Object(Object),
    /// An unboxed double materialized directly into an XMM register.
    Double(f64),
}

/// A constant defined by the IR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant {
    pub id: ConstantId,
    pub value: ConstantValue,
}

impl Constant {
    /// Small-integer value, if this is a small integer.
    pub fn smi_value(&self) -> Option<i64> {
        match self.value {
            ConstantValue::Object(Object::Smi(value)) => Some(value),
            _ => None,
        }
    }

    /// A small integer whose tagged form fits in a 32-bit immediate.
    pub fn is_safe_smi(&self) -> bool {
        match self.value {
            ConstantValue::Object(object) => {
                object.smi_raw().is_some_and(|raw| Immediate(raw).is_int32())
            }
            ConstantValue::Double(_) => false,
        }
    }

    /// Whether the constant can be used directly as an instruction operand.
    /// Small integers must fit in an immediate; everything else goes
    /// through the pool.
    pub fn is_safe(&self) -> bool {
        self.smi_value().is_none() || self.is_safe_smi()
    }
}

/// Constants of one compilation.
#[derive(Debug, Clone, Default)]
pub struct ConstantTable {
    constants: Vec<Constant>,
}

impl ConstantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` and return its id. Ids must fit in a location payload.
    pub fn add(&mut self, value: ConstantValue) -> ConstantId {
        let id = ConstantId(u32::try_from(self.constants.len()).unwrap_or(u32::MAX));
        assert!(id.0 < super::location::MAX_CONSTANT_ID, "too many constants");
        self.constants.push(Constant { id, value });
        id
    }

    pub fn get(&self, id: ConstantId) -> Option<&Constant> {
        self.constants.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}
