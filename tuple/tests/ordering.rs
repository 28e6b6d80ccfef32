//! Order-preservation tests: element order must equal packed byte order.

use galena_tuple::{pack, unpack, Element};

/// A spread of tuples already listed in canonical order.
fn ordered_fixtures() -> Vec<Vec<Element>> {
    vec![
        vec![],
        vec![Element::Nil],
        vec![Element::Nil, Element::Int(0)],
        vec![Element::Bytes(vec![])],
        vec![Element::Bytes(vec![0x00])],
        vec![Element::Bytes(vec![0x00, 0x01])],
        vec![Element::Bytes(vec![0x01])],
        vec![Element::String(String::new())],
        vec![Element::String("a".into())],
        vec![Element::String("a".into()), Element::Int(-5)],
        vec![Element::String("a".into()), Element::Int(5)],
        vec![Element::String("b".into())],
        vec![Element::Tuple(vec![])],
        vec![Element::Tuple(vec![Element::Int(1)])],
        vec![Element::Int(i64::MIN)],
        vec![Element::Int(-1)],
        vec![Element::Int(0)],
        vec![Element::Int(1)],
        vec![Element::Int(i64::MAX)],
        vec![Element::Float(f32::NEG_INFINITY)],
        vec![Element::Float(-1.5)],
        vec![Element::Float(1.5)],
        vec![Element::Double(-1.5)],
        vec![Element::Double(1.5)],
        vec![Element::Bool(false)],
        vec![Element::Bool(true)],
        vec![Element::Uuid([0x00; 16])],
        vec![Element::Uuid([0xff; 16])],
    ]
}

#[test]
fn packed_order_equals_tuple_order() {
    let fixtures = ordered_fixtures();

    for window in fixtures.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        assert!(
            pack(a) < pack(b),
            "pack({a:?}) should sort before pack({b:?})"
        );
        assert!(a < b, "{a:?} should sort before {b:?}");
    }
}

#[test]
fn every_fixture_roundtrips() {
    for tuple in ordered_fixtures() {
        let packed = pack(&tuple);
        assert_eq!(unpack(&packed).unwrap(), tuple, "{tuple:?}");
    }
}

#[test]
fn sorting_packed_equals_sorting_elements() {
    let mut fixtures = ordered_fixtures();
    fixtures.reverse();

    let mut by_elements = fixtures.clone();
    by_elements.sort();

    let mut by_bytes = fixtures;
    by_bytes.sort_by_key(|t| pack(t));

    assert_eq!(by_elements, by_bytes);
}
