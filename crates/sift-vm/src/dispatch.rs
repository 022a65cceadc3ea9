use sift_core::Kind;

/// One entry of the typed-dispatch table.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TypedSignature {
    pub params: &'static [Kind],
    pub result: Kind,
}

/// The fixed table of monomorphic call signatures.
///
/// The compiler selects `CallTyped` with an index into this table when a
/// callee's signature matches an entry exactly; extending the language
/// with new typed fast paths means adding rows here and rebuilding.
pub const TABLE: &[TypedSignature] = &[
    TypedSignature { params: &[Kind::Int], result: Kind::Int },
    TypedSignature { params: &[Kind::Int], result: Kind::Bool },
    TypedSignature { params: &[Kind::Float], result: Kind::Float },
    TypedSignature { params: &[Kind::Float], result: Kind::Bool },
    TypedSignature { params: &[Kind::String], result: Kind::String },
    TypedSignature { params: &[Kind::String], result: Kind::Bool },
    TypedSignature { params: &[Kind::Int, Kind::Int], result: Kind::Int },
    TypedSignature { params: &[Kind::Int, Kind::Int], result: Kind::Bool },
    TypedSignature { params: &[Kind::Float, Kind::Float], result: Kind::Float },
    TypedSignature { params: &[Kind::String, Kind::String], result: Kind::String },
    TypedSignature { params: &[Kind::String, Kind::String], result: Kind::Bool },
];

/// Find the table index for an exact (params, result) signature.
pub fn index_of(params: &[Kind], result: Kind) -> Option<usize> {
    TABLE
        .iter()
        .position(|sig| sig.params == params && sig.result == result)
}

/// The arity of a table entry.
pub fn arity(index: usize) -> Option<usize> {
    TABLE.get(index).map(|sig| sig.params.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_signature() {
        let idx = index_of(&[Kind::Int, Kind::Int], Kind::Int).unwrap();
        assert_eq!(arity(idx), Some(2));
        assert_eq!(TABLE[idx].result, Kind::Int);
    }

    #[test]
    fn lookup_unknown_signature() {
        assert_eq!(index_of(&[Kind::Map], Kind::Map), None);
        assert_eq!(index_of(&[Kind::Int, Kind::Int, Kind::Int], Kind::Int), None);
    }

    #[test]
    fn arity_out_of_range() {
        assert_eq!(arity(TABLE.len()), None);
    }
}
