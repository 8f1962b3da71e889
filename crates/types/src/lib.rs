use std::cmp::Ordering;

/// Declared type of a table column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Uint,
    Float,
    Text,
}

/// A single column value.
///
/// `Array` never appears inside a stored row; it is the shape of a bind
/// argument consumed by `in` / `!in` comparisons.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check a value against a declared column type.
    pub fn conforms(&self, ty: ValueType, nullable: bool) -> bool {
        match self {
            Value::Null => nullable,
            Value::Bool(_) => ty == ValueType::Bool,
            Value::Int(_) => ty == ValueType::Int,
            Value::Uint(_) => ty == ValueType::Uint,
            Value::Float(_) => ty == ValueType::Float,
            Value::Text(_) => ty == ValueType::Text,
            Value::Array(_) => false,
        }
    }

    /// Promoted comparison.
    ///
    /// Numeric operands widen before comparing: signed against unsigned goes
    /// through `i128` so no 64-bit value is truncated, and anything against a
    /// float compares with `total_cmp`, which orders by the widened bit
    /// representation (`-0.0 < 0.0`, NaN sorts deterministically). Null
    /// compares higher than every non-null value. Returns `None` for operand
    /// types with no common domain.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) => Some(Ordering::Greater),
            (_, Null) => Some(Ordering::Less),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Int(a), Int(b)) => Some(a.cmp(b)),
            (Uint(a), Uint(b)) => Some(a.cmp(b)),
            (Int(a), Uint(b)) => Some((*a as i128).cmp(&(*b as i128))),
            (Uint(a), Int(b)) => Some((*a as i128).cmp(&(*b as i128))),
            (Float(a), Float(b)) => Some(a.total_cmp(b)),
            (Int(a), Float(b)) => Some((*a as f64).total_cmp(b)),
            (Float(a), Int(b)) => Some(a.total_cmp(&(*b as f64))),
            (Uint(a), Float(b)) => Some((*a as f64).total_cmp(b)),
            (Float(a), Uint(b)) => Some(a.total_cmp(&(*b as f64))),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality under the filter rules: mixed nullness is false, two nulls
    /// are equal, everything else defers to the promoted comparison.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }
}

// Float slots compare bitwise so that Value can be Eq without lying about
// NaN; this matches the filter evaluator's total ordering.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Uint(a), Uint(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Uint(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Array(vs) => vs.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn same_type_comparisons() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Less));
        assert_eq!(
            Value::Text("a".into()).compare(&Value::Text("a".into())),
            Some(Equal)
        );
        assert_eq!(Value::Bool(true).compare(&Value::Bool(false)), Some(Greater));
        assert_eq!(Value::Int(1).compare(&Value::Text("1".into())), None);
    }

    #[test]
    fn signed_unsigned_widen_through_i128() {
        assert_eq!(Value::Int(-1).compare(&Value::Uint(0)), Some(Less));
        assert_eq!(
            Value::Uint(u64::MAX).compare(&Value::Int(i64::MAX)),
            Some(Greater)
        );
        assert_eq!(Value::Int(7).compare(&Value::Uint(7)), Some(Equal));
    }

    #[test]
    fn floats_use_total_order() {
        assert_eq!(Value::Float(-0.0).compare(&Value::Float(0.0)), Some(Less));
        assert_eq!(
            Value::Float(f64::NAN).compare(&Value::Float(f64::NAN)),
            Some(Equal)
        );
        assert_eq!(Value::Int(1).compare(&Value::Float(1.5)), Some(Less));
    }

    #[test]
    fn null_compares_highest() {
        assert_eq!(Value::Null.compare(&Value::Int(i64::MAX)), Some(Greater));
        assert_eq!(Value::Int(i64::MAX).compare(&Value::Null), Some(Less));
        assert_eq!(Value::Null.compare(&Value::Null), Some(Equal));
    }

    #[test]
    fn equality_on_mixed_nullness_is_false() {
        assert!(!Value::Null.equals(&Value::Int(0)));
        assert!(!Value::Int(0).equals(&Value::Null));
        assert!(Value::Null.equals(&Value::Null));
        assert!(Value::Int(3).equals(&Value::Uint(3)));
    }

    #[test]
    fn conforms_checks_type_and_nullability() {
        assert!(Value::Int(1).conforms(ValueType::Int, false));
        assert!(!Value::Int(1).conforms(ValueType::Text, false));
        assert!(Value::Null.conforms(ValueType::Int, true));
        assert!(!Value::Null.conforms(ValueType::Int, false));
        assert!(!Value::Array(vec![]).conforms(ValueType::Int, true));
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Int(-42),
            Value::Uint(42),
            Value::Text("Ada".into()),
            Value::Bool(true),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        // Order antisymmetry over the promoted numeric domain
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), u in any::<u64>()) {
            let a = Value::Int(i);
            let b = Value::Uint(u);
            let ord1 = a.compare(&b).unwrap();
            let ord2 = b.compare(&a).unwrap();
            prop_assert_eq!(ord1, ord2.reverse());
        }

        // Every value equals itself, including NaN payloads
        #[test]
        fn eq_reflexive(bits in any::<u64>()) {
            let v = Value::Float(f64::from_bits(bits));
            prop_assert!(v.equals(&v));
        }

        // Text comparison agrees with the standard String ordering
        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.compare(&vb), Some(a.cmp(&b)));
        }
    }
}
