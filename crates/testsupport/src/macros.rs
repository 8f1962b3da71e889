//! Row and value construction macros.

/// Creates a `common::Row` from typed values.
///
/// # Syntax
///
/// ```text
/// row![Value1, Value2, ...]      // Mixed values
/// row![int: 1, 2, 3]             // All integers
/// row![text: "alice", "bob"]     // All text
/// ```
///
/// # Examples
///
/// ```
/// use testsupport::row;
/// use types::Value;
///
/// let r = row![Value::Int(1), Value::Null];
/// assert_eq!(r.values.len(), 2);
///
/// let r = row![int: 1, 2, 3];
/// assert_eq!(r.values[2], Value::Int(3));
///
/// let r = row![text: "alice", "bob"];
/// assert_eq!(r.values.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    // Mixed values
    [$($val:expr),+ $(,)?] => {
        ::common::Row::new(vec![$($val),+])
    };

    // All integers
    [int: $($val:expr),+ $(,)?] => {
        ::common::Row::new(vec![$(::types::Value::Int($val)),+])
    };

    // All text
    [text: $($val:expr),+ $(,)?] => {
        ::common::Row::new(vec![$(::types::Value::Text($val.to_string())),+])
    };
}

/// Creates a `Vec<types::Value>` argument array.
///
/// ```
/// use testsupport::args;
/// use types::Value;
///
/// let a = args![Value::Int(1), Value::Null];
/// assert_eq!(a.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    [$($val:expr),* $(,)?] => {
        vec![$($val),*] as Vec<::types::Value>
    };
}
