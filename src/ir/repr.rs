//! Value representation lattice.

use bitflags::bitflags;

bitflags! {
    /// Bit-set approximation of the runtime class of a value.
    ///
    /// Subset relations are encoded bitwise so that `a & b` computes the
    /// meet of two representations: a phi's representation is the meet of
    /// its inputs, and arithmetic narrowing falls out of mask operations.
    /// The empty set is "unknown".
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    pub struct Representation: u16 {
        /// `nil`.
        const NIL         = 0x001;
        /// Any number.
        const NUMBER      = 0x002;
        /// Small integer, tagged in a machine word.
        const SMI         = 0x006;
        /// Heap-boxed double.
        const HEAP_NUMBER = 0x00A;
        /// String.
        const STRING      = 0x010;
        /// Boolean.
        const BOOLEAN     = 0x020;
        /// Dense numeric-keyed map, the common part of objects and arrays.
        const NUM_MAP     = 0x040;
        /// Object.
        const OBJECT      = 0x0C0;
        /// Array.
        const ARRAY       = 0x140;
        /// Function.
        const FUNCTION    = 0x200;
        /// Every value shape.
        const ANY         = 0x2FF;
        /// Not yet computed; never a real value shape.
        const HOLE        = 0x300;
    }
}

impl Representation {
    /// The unknown representation.
    pub fn unknown() -> Self {
        Representation::empty()
    }

    /// Could this value be a number?
    pub fn is_number(self) -> bool {
        self.intersects(Representation::NUMBER)
    }

    /// Is this value certainly a small integer?
    pub fn is_smi(self) -> bool {
        self.contains(Representation::SMI)
    }

    /// Is this value certainly a heap number?
    pub fn is_heap_number(self) -> bool {
        self.contains(Representation::HEAP_NUMBER)
    }

    /// Is this value certainly a string?
    pub fn is_string(self) -> bool {
        self.contains(Representation::STRING)
    }

    /// Is this value certainly a boolean?
    pub fn is_boolean(self) -> bool {
        self.contains(Representation::BOOLEAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meet_is_intersection() {
        assert_eq!(
            Representation::SMI & Representation::HEAP_NUMBER,
            Representation::NUMBER
        );
        assert_eq!(
            Representation::OBJECT & Representation::ARRAY,
            Representation::NUM_MAP
        );
        assert_eq!(
            Representation::STRING & Representation::BOOLEAN,
            Representation::unknown()
        );
    }

    #[test]
    fn subset_encoding() {
        assert!(Representation::SMI.is_number());
        assert!(Representation::HEAP_NUMBER.is_number());
        assert!(!Representation::STRING.is_number());
        assert!(Representation::ARRAY.contains(Representation::NUM_MAP));
        assert!(Representation::OBJECT.contains(Representation::NUM_MAP));
    }
}
