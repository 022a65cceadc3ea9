use std::collections::BTreeMap;
use std::sync::Arc;

use sift_core::Kind;
use sift_vm::{Function, Signature};

/// A declared field of a map- or struct-shaped nature.
///
/// `alias` is an alternative expression-visible name; member access
/// through the alias resolves to the declared field.
#[derive(Clone, Debug)]
pub struct Field {
    pub nature: Nature,
    pub alias: Option<String>,
}

/// Signature data of a function-natured expression.
#[derive(Clone, Debug, Default)]
pub struct FuncNature {
    pub params: Vec<Nature>,
    pub result: Box<Nature>,
    pub variadic: bool,
    /// Method receivers shift parameter indices by one.
    pub method: bool,
    pub method_index: usize,
}

/// The semantic type record attached to every AST node.
///
/// A plain struct over `Kind`: arrays carry their element nature, maps
/// their known fields (with a strict flag and optional default value
/// nature), functions their signature, and resolved member chains their
/// field index path. Registered functions hang their descriptor off
/// `builtin` so call checking can reach the full signature set.
#[derive(Clone, Debug, Default)]
pub struct Nature {
    pub kind: Kind,
    /// Element nature of an array.
    pub elem: Option<Box<Nature>>,
    /// Known fields, sorted by name; the position in the sorted order
    /// is the field's stable index.
    pub fields: Option<Arc<BTreeMap<String, Field>>>,
    /// Unknown keys are errors on strict maps and structs.
    pub strict: bool,
    /// Nature of values behind undeclared keys of a non-strict map.
    pub default_value: Option<Box<Nature>>,
    /// Function signature, when `kind` is `Func`.
    pub func: Option<Box<FuncNature>>,
    /// Descriptor of the registered function behind an identifier.
    pub builtin: Option<Arc<Function>>,
    /// Field index path of a statically resolved member chain.
    pub field_index: Vec<usize>,
    /// Out nature; only set on predicate nodes.
    pub predicate_out: Option<Box<Nature>>,
    /// The expression is the literal nil.
    pub nil: bool,
}

impl Nature {
    pub fn of(kind: Kind) -> Self {
        Nature {
            kind,
            ..Default::default()
        }
    }

    pub fn unknown() -> Self {
        Nature::of(Kind::Unknown)
    }

    pub fn any() -> Self {
        Nature::of(Kind::Any)
    }

    pub fn nil() -> Self {
        Nature {
            kind: Kind::Nil,
            nil: true,
            ..Default::default()
        }
    }

    pub fn bool() -> Self {
        Nature::of(Kind::Bool)
    }

    pub fn int() -> Self {
        Nature::of(Kind::Int)
    }

    pub fn float() -> Self {
        Nature::of(Kind::Float)
    }

    pub fn string() -> Self {
        Nature::of(Kind::String)
    }

    pub fn time() -> Self {
        Nature::of(Kind::Time)
    }

    pub fn duration() -> Self {
        Nature::of(Kind::Duration)
    }

    pub fn array_of(elem: Nature) -> Self {
        Nature {
            kind: Kind::Array,
            elem: Some(Box::new(elem)),
            ..Default::default()
        }
    }

    pub fn map_of(fields: BTreeMap<String, Field>, strict: bool) -> Self {
        Nature {
            kind: Kind::Map,
            fields: Some(Arc::new(fields)),
            strict,
            ..Default::default()
        }
    }

    pub fn func_of(params: Vec<Nature>, result: Nature, variadic: bool) -> Self {
        Nature {
            kind: Kind::Func,
            func: Some(Box::new(FuncNature {
                params,
                result: Box::new(result),
                variadic,
                method: false,
                method_index: 0,
            })),
            ..Default::default()
        }
    }

    /// The nature of a registered function identifier.
    pub fn of_function(descriptor: Arc<Function>) -> Self {
        let func = descriptor.signatures().first().map(|sig| {
            Box::new(FuncNature {
                params: sig.params.iter().map(|k| Nature::of(*k)).collect(),
                result: Box::new(Nature::of(sig.result)),
                variadic: sig.variadic,
                method: false,
                method_index: 0,
            })
        });
        Nature {
            kind: Kind::Func,
            func,
            builtin: Some(descriptor),
            ..Default::default()
        }
    }

    /// Nature from a plain signature.
    pub fn of_signature(sig: &Signature) -> Self {
        Nature::func_of(
            sig.params.iter().map(|k| Nature::of(*k)).collect(),
            Nature::of(sig.result),
            sig.variadic,
        )
    }

    /// Statically undetermined: anything goes.
    pub fn is_open(&self) -> bool {
        self.kind.is_open()
    }

    pub fn is_numeric(&self) -> bool {
        self.kind.is_numeric()
    }

    pub fn is_integer(&self) -> bool {
        self.kind.is_integer()
    }

    pub fn is_nil(&self) -> bool {
        self.kind == Kind::Nil
    }

    /// The element nature of an array, or the default value nature of a
    /// map; open natures yield open elements.
    pub fn elem(&self) -> Nature {
        match self.kind {
            Kind::Array => self
                .elem
                .as_deref()
                .cloned()
                .unwrap_or_else(Nature::any),
            Kind::Map => self
                .default_value
                .as_deref()
                .cloned()
                .unwrap_or_else(Nature::any),
            _ => Nature::any(),
        }
    }

    /// Resolve a declared field by name or alias.
    ///
    /// Returns the storage name, the stable field index and the field's
    /// nature.
    pub fn get(&self, name: &str) -> Option<(String, usize, Nature)> {
        let fields = self.fields.as_ref()?;
        if let Some((index, (storage, field))) = fields
            .iter()
            .enumerate()
            .find(|(_, (storage, _))| storage.as_str() == name)
        {
            return Some((storage.clone(), index, field.nature.clone()));
        }
        fields
            .iter()
            .enumerate()
            .find(|(_, (_, field))| field.alias.as_deref() == Some(name))
            .map(|(index, (storage, field))| (storage.clone(), index, field.nature.clone()))
    }

    /// Loose assignability for argument and operand checking.
    ///
    /// Open natures are assignable in both directions; nil is
    /// assignable to open targets; the integer kinds assign to each
    /// other.
    pub fn assignable_to(&self, target: &Nature) -> bool {
        if self.is_open() || target.is_open() {
            return true;
        }
        if self.is_nil() {
            return target.kind == Kind::Nil;
        }
        if self.kind == target.kind {
            return true;
        }
        self.kind.is_integer() && target.kind.is_integer()
    }

    /// Kinds that can be compared for ordering with each other.
    pub fn comparable_with(&self, other: &Nature) -> bool {
        if self.is_open() || other.is_open() {
            return true;
        }
        if self.is_numeric() && other.is_numeric() {
            return true;
        }
        self.kind == other.kind && self.kind.is_ordered()
    }
}

/// Build the fields table of a map or struct nature.
pub fn fields_of(entries: Vec<(&str, Nature)>) -> BTreeMap<String, Field> {
    entries
        .into_iter()
        .map(|(name, nature)| {
            (
                name.to_string(),
                Field {
                    nature,
                    alias: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_by_name() {
        let n = Nature::map_of(
            fields_of(vec![("age", Nature::int()), ("name", Nature::string())]),
            true,
        );
        let (storage, index, nature) = n.get("name").unwrap();
        assert_eq!(storage, "name");
        assert_eq!(index, 1); // sorted order: age, name
        assert_eq!(nature.kind, Kind::String);
        assert!(n.get("missing").is_none());
    }

    #[test]
    fn field_lookup_by_alias() {
        let mut fields = fields_of(vec![("user_name", Nature::string())]);
        fields.get_mut("user_name").unwrap().alias = Some("username".to_string());
        let n = Nature::map_of(fields, true);

        let (storage, _, nature) = n.get("username").unwrap();
        assert_eq!(storage, "user_name");
        assert_eq!(nature.kind, Kind::String);
    }

    #[test]
    fn array_elem() {
        let n = Nature::array_of(Nature::int());
        assert_eq!(n.elem().kind, Kind::Int);
        assert_eq!(Nature::of(Kind::Array).elem().kind, Kind::Any);
    }

    #[test]
    fn assignability() {
        assert!(Nature::int().assignable_to(&Nature::int()));
        assert!(Nature::int().assignable_to(&Nature::of(Kind::Uint)));
        assert!(!Nature::int().assignable_to(&Nature::float()));
        assert!(Nature::unknown().assignable_to(&Nature::string()));
        assert!(Nature::string().assignable_to(&Nature::any()));
        assert!(Nature::nil().assignable_to(&Nature::any()));
        assert!(!Nature::nil().assignable_to(&Nature::int()));
    }

    #[test]
    fn comparability() {
        assert!(Nature::int().comparable_with(&Nature::float()));
        assert!(Nature::string().comparable_with(&Nature::string()));
        assert!(Nature::time().comparable_with(&Nature::time()));
        assert!(!Nature::string().comparable_with(&Nature::int()));
        assert!(!Nature::bool().comparable_with(&Nature::bool()));
        assert!(Nature::any().comparable_with(&Nature::bool()));
    }

    #[test]
    fn function_nature_from_descriptor() {
        let f = Arc::new(
            Function::new("len").signature(&[Kind::Array], Kind::Int),
        );
        let n = Nature::of_function(f);
        assert_eq!(n.kind, Kind::Func);
        let func = n.func.as_ref().unwrap();
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.result.kind, Kind::Int);
        assert!(n.builtin.is_some());
    }
}
