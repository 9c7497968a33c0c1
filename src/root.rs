//! Interned compile-time constants.
//!
//! The front-end's literals are interned into a per-unit root table. `put`
//! returns the `ScopeSlot::Immediate` identity of the constant; GVN treats
//! two `Literal` instructions as congruent exactly when their root slots are
//! equal, so interning doubles as the literal congruence relation.

use crate::scope::ScopeSlot;
use rustc_hash::FxHashMap;
use std::fmt;

/// A constant value produced by the front-end.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Constant {
    /// `nil`.
    Nil,
    /// `true`.
    True,
    /// `false`.
    False,
    /// A number, stored as raw IEEE bits so constants can be hash-interned.
    Number(u64),
    /// A string literal.
    Str(String),
    /// A property-name literal used as a member key.
    Property(String),
}

impl Constant {
    /// Make a number constant.
    pub fn number(value: f64) -> Self {
        Constant::Number(value.to_bits())
    }

    /// The numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Constant::Number(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }

    /// True when the runtime tags this value directly in a machine word
    /// instead of boxing it on the heap.
    pub fn is_immediate(&self) -> bool {
        match *self {
            Constant::Nil | Constant::True | Constant::False => true,
            Constant::Number(bits) => {
                let v = f64::from_bits(bits);
                v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64
            }
            Constant::Str(_) | Constant::Property(_) => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Constant::Nil => write!(f, "nil"),
            Constant::True => write!(f, "true"),
            Constant::False => write!(f, "false"),
            Constant::Number(bits) => {
                let v = f64::from_bits(bits);
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{}", v as i64)
                } else {
                    write!(f, "{v}")
                }
            }
            Constant::Str(ref s) | Constant::Property(ref s) => write!(f, "{s}"),
        }
    }
}

/// The constant interner of one compilation unit.
pub struct Root {
    constants: Vec<Constant>,
    index: FxHashMap<Constant, u32>,
}

impl Root {
    /// Make an empty root table.
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Intern `constant` and return its slot identity.
    pub fn put(&mut self, constant: Constant) -> ScopeSlot {
        if let Some(&index) = self.index.get(&constant) {
            return ScopeSlot::Immediate { index };
        }
        let index = self.constants.len() as u32;
        self.constants.push(constant.clone());
        self.index.insert(constant, index);
        ScopeSlot::Immediate { index }
    }

    /// The constant behind an immediate slot.
    pub fn get(&self, slot: ScopeSlot) -> &Constant {
        match slot {
            ScopeSlot::Immediate { index } => &self.constants[index as usize],
            _ => panic!("not an immediate slot: {slot:?}"),
        }
    }

    /// True when the slot holds a number the runtime can tag as a small
    /// integer.
    pub fn is_smi(&self, slot: ScopeSlot) -> bool {
        let constant = self.get(slot);
        matches!(constant, Constant::Number(_)) && constant.is_immediate()
    }

    /// Number of interned constants.
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes() {
        let mut root = Root::new();
        let a = root.put(Constant::number(1.0));
        let b = root.put(Constant::number(1.0));
        let c = root.put(Constant::number(2.0));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(root.len(), 2);
    }

    #[test]
    fn smi_tagging() {
        let mut root = Root::new();
        let small = root.put(Constant::number(41.0));
        let heap = root.put(Constant::number(0.5));
        let huge = root.put(Constant::number(1e18));
        let truthy = root.put(Constant::True);
        assert!(root.is_smi(small));
        assert!(!root.is_smi(heap));
        assert!(!root.is_smi(huge));
        assert!(!root.is_smi(truthy));
    }
}
