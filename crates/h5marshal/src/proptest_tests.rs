//! Property-based tests for escaping and value round-trips.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use proptest::prelude::*;

use crate::model::{shape_size, ArrayData, NdArray, Value};
use crate::options::Options;
use crate::pathesc::{escape, unescape};
use crate::session::Session;
use crate::storage::{MemoryFile, Storage};

fn roundtrip(options: &Options, value: &Value) -> Value {
    let mut file = MemoryFile::new();
    let root = file.root();
    let mut session = Session::new(&mut file, options);
    session.write_data(root, "v", value).unwrap();
    session.read_data(root, "v").unwrap()
}

/// Text without NUL, which fixed-width storage uses as padding.
fn arb_text() -> impl Strategy<Value = String> {
    any::<String>().prop_map(|s| s.replace('\0', ""))
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<f64>().prop_map(Value::Float),
        (any::<f64>(), any::<f64>()).prop_map(|(re, im)| Value::Complex(re, im)),
        arb_text().prop_map(Value::Str),
        prop::collection::vec(1u8..=255, 0..40).prop_map(Value::Bytes),
    ]
}

/// Integer arrays of rank 0 to 3 with small dimensions, including empties.
fn arb_int_array() -> impl Strategy<Value = NdArray> {
    prop::collection::vec(0usize..4, 0..4).prop_flat_map(|shape| {
        let size = shape_size(&shape);
        prop::collection::vec(any::<i32>(), size).prop_map(move |data| {
            NdArray::new(shape.clone(), ArrayData::I32(data)).unwrap()
        })
    })
}

proptest! {
    #[test]
    fn prop_escape_roundtrip(s in ".*") {
        prop_assert_eq!(unescape(&escape(&s)).unwrap(), s);
    }

    #[test]
    fn prop_escape_output_is_valid_name(s in any::<String>()) {
        let escaped = escape(&s);
        prop_assert!(!escaped.contains('/'));
        prop_assert!(!escaped.contains('\0'));
        prop_assert!(!escaped.starts_with('.'));
    }

    #[test]
    fn prop_escape_is_identity_on_plain_names(s in "[a-zA-Z0-9_ -][a-zA-Z0-9_. -]*") {
        prop_assert_eq!(escape(&s), s);
    }

    #[test]
    fn prop_scalar_roundtrip(value in arb_scalar(), compat in any::<bool>()) {
        let options = Options::new().with_compat(compat);
        prop_assert_eq!(roundtrip(&options, &value), value);
    }

    #[test]
    fn prop_array_roundtrip(array in arb_int_array(), compat in any::<bool>()) {
        let options = Options::new().with_compat(compat);
        let value = Value::Array(array);
        prop_assert_eq!(roundtrip(&options, &value), value);
    }

    #[test]
    fn prop_list_roundtrip(items in prop::collection::vec(arb_scalar(), 0..6)) {
        let value = Value::list(items);
        prop_assert_eq!(roundtrip(&Options::new(), &value), value);
    }
}
