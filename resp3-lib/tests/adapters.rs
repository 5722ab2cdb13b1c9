//! Decoding RESP3 encodings into every supported destination shape.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use resp3_lib::{decode, decode_n, AggregateSize, Error, Kind, NodeTree};

#[test]
fn simple_string_into_string() {
    assert_eq!(decode::<String>(b"+PONG\r\n").unwrap(), "PONG");
}

#[test]
fn integers() {
    assert_eq!(decode::<i64>(b":42\r\n").unwrap(), 42);
    assert_eq!(decode::<i64>(b":-7\r\n").unwrap(), -7);
    assert_eq!(decode::<u64>(b":18446744073709551615\r\n").unwrap(), u64::MAX);
}

#[test]
fn doubles_including_special_values() {
    assert_eq!(decode::<f64>(b",3.25\r\n").unwrap(), 3.25);
    assert_eq!(decode::<f64>(b",inf\r\n").unwrap(), f64::INFINITY);
    assert_eq!(decode::<f64>(b",-inf\r\n").unwrap(), f64::NEG_INFINITY);
    // An integer reply decodes into a floating destination too.
    assert_eq!(decode::<f64>(b":3\r\n").unwrap(), 3.0);
}

#[test]
fn booleans() {
    assert!(decode::<bool>(b"#t\r\n").unwrap());
    assert!(!decode::<bool>(b"#f\r\n").unwrap());
}

#[test]
fn blob_string_into_bytes() {
    assert_eq!(decode::<Bytes>(b"$5\r\nhello\r\n").unwrap(), "hello");
}

#[test]
fn verbatim_string_drops_the_format_prefix() {
    assert_eq!(
        decode::<String>(b"=15\r\ntxt:Some string\r\n").unwrap(),
        "Some string"
    );
}

#[test]
fn big_number_into_string() {
    let input = b"(3492890328409238509324850943850943825024385\r\n";
    assert_eq!(
        decode::<String>(input).unwrap(),
        "3492890328409238509324850943850943825024385"
    );
}

#[test]
fn streamed_string_concatenates_chunks() {
    let input = b"$?\r\n;4\r\nHell\r\n;5\r\no wor\r\n;2\r\nld\r\n;0\r\n";
    assert_eq!(decode::<String>(input).unwrap(), "Hello world");
}

#[test]
fn streamed_string_is_not_a_container() {
    // The chunks are fragments of one scalar, never collection elements.
    let input = b"$?\r\n;4\r\nHell\r\n;5\r\no wor\r\n;2\r\nld\r\n;0\r\n";
    assert_eq!(decode::<Vec<String>>(input), Err(Error::ExpectsAggregate));
    assert_eq!(
        decode::<HashMap<String, String>>(input),
        Err(Error::ExpectsAggregate)
    );
}

#[test]
fn streamed_string_into_a_single_slot_tuple() {
    let input = b"$?\r\n;4\r\nHell\r\n;5\r\no wor\r\n;2\r\nld\r\n;0\r\n";
    let (value,): (String,) = decode(input).unwrap();
    assert_eq!(value, "Hello world");
}

#[test]
fn streamed_string_as_a_tuple_element() {
    let input = b"*2\r\n$?\r\n;3\r\nfoo\r\n;0\r\n:42\r\n";
    let value: (String, i64) = decode(input).unwrap();
    assert_eq!(value, ("foo".into(), 42));
}

#[test]
fn optionals_absorb_nulls() {
    assert_eq!(decode::<Option<String>>(b"_\r\n").unwrap(), None);
    assert_eq!(decode::<Option<String>>(b"$-1\r\n").unwrap(), None);
    assert_eq!(
        decode::<Option<String>>(b"+yes\r\n").unwrap(),
        Some("yes".to_string())
    );
}

#[test]
fn null_into_plain_scalar_is_an_error() {
    assert_eq!(decode::<String>(b"_\r\n"), Err(Error::ExpectsScalar));
}

#[test]
fn array_with_nulls_into_vec_of_optionals() {
    let input = b"*3\r\n$2\r\nv1\r\n$-1\r\n$2\r\nv3\r\n";
    let values: Vec<Option<Bytes>> = decode(input).unwrap();
    assert_eq!(
        values,
        vec![Some(Bytes::from("v1")), None, Some(Bytes::from("v3"))]
    );
}

#[test]
fn nested_arrays() {
    let input = b"*2\r\n*2\r\n:1\r\n:2\r\n*1\r\n:3\r\n";
    let values: Vec<Vec<i64>> = decode(input).unwrap();
    assert_eq!(values, vec![vec![1, 2], vec![3]]);
}

#[test]
fn streamed_aggregate_into_vec() {
    let values: Vec<i64> = decode(b"*?\r\n:1\r\n:2\r\n.\r\n").unwrap();
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn empty_aggregate_into_vec() {
    let values: Vec<i64> = decode(b"*0\r\n").unwrap();
    assert!(values.is_empty());
}

#[test]
fn set_into_hash_set() {
    let values: HashSet<String> = decode(b"~2\r\n+a\r\n+b\r\n").unwrap();
    assert_eq!(values.len(), 2);
    assert!(values.contains("a") && values.contains("b"));
}

#[test]
fn map_into_hash_map() {
    let input = b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n";
    let map: HashMap<String, i64> = decode(input).unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], 1);
    assert_eq!(map["b"], 2);
}

#[test]
fn map_into_pair_sequence_preserves_order() {
    let input = b"%2\r\n+first\r\n:1\r\n+second\r\n:2\r\n";
    let pairs: Vec<(String, i64)> = decode(input).unwrap();
    assert_eq!(pairs, vec![("first".into(), 1), ("second".into(), 2)]);
}

#[test]
fn map_with_aggregate_values() {
    let input = b"%1\r\n+scores\r\n*2\r\n:10\r\n:20\r\n";
    let map: HashMap<String, Vec<i64>> = decode(input).unwrap();
    assert_eq!(map["scores"], vec![10, 20]);
}

#[test]
fn node_tree_keeps_everything_verbatim() {
    let input = b"*2\r\n+ok\r\n*1\r\n:5\r\n";
    let tree: NodeTree = decode(input).unwrap();
    let shape: Vec<(Kind, usize)> = tree.nodes.iter().map(|n| (n.kind, n.depth)).collect();
    assert_eq!(
        shape,
        vec![
            (Kind::Array, 0),
            (Kind::SimpleString, 1),
            (Kind::Array, 1),
            (Kind::Number, 2),
        ]
    );
    assert_eq!(tree.nodes[0].aggregate_size, AggregateSize::Count(2));
}

#[test]
fn aggregate_into_scalar_is_an_error() {
    assert_eq!(decode::<i64>(b"*1\r\n:1\r\n"), Err(Error::ExpectsScalar));
}

#[test]
fn scalar_into_vec_is_an_error() {
    assert_eq!(
        decode::<Vec<i64>>(b":1\r\n"),
        Err(Error::ExpectsAggregate)
    );
}

#[test]
fn error_reply_surfaces_as_server_error() {
    match decode::<String>(b"-ERR unknown command\r\n") {
        Err(Error::Server(msg)) => assert_eq!(msg, "ERR unknown command"),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn tuple_from_a_sized_aggregate() {
    let value: (String, i64) = decode(b"*2\r\n+foo\r\n:42\r\n").unwrap();
    assert_eq!(value, ("foo".into(), 42));
}

#[test]
fn tuple_slots_may_hold_aggregates() {
    let value: (Vec<i64>, String) = decode(b"*2\r\n*2\r\n:1\r\n:2\r\n+ok\r\n").unwrap();
    assert_eq!(value, (vec![1, 2], "ok".into()));
}

#[test]
fn tuple_from_a_map_counts_expanded_children() {
    let input = b"%2\r\n+a\r\n:1\r\n+b\r\n:2\r\n";
    let value: (String, i64, String, i64) = decode(input).unwrap();
    assert_eq!(value, ("a".into(), 1, "b".into(), 2));
}

#[test]
fn tuple_arity_mismatch_fails_without_touching_slots() {
    let result = decode::<(i64, i64)>(b"*3\r\n:1\r\n:2\r\n:3\r\n");
    assert_eq!(result, Err(Error::IncompatibleSize));
}

#[test]
fn streamed_aggregate_into_tuple_cannot_be_size_checked() {
    let result = decode::<(i64, i64)>(b"*?\r\n:1\r\n:2\r\n.\r\n");
    assert_eq!(result, Err(Error::IncompatibleSize));
}

#[test]
fn pipelined_responses_into_tuple() {
    let value: (String, i64) = decode_n(b"$3\r\nfoo\r\n:42\r\n", 2).unwrap();
    assert_eq!(value, ("foo".into(), 42));
}

#[test]
fn pipelined_responses_with_aggregates() {
    let input = b"*2\r\n$1\r\na\r\n$1\r\nb\r\n:7\r\n";
    let value: (Vec<String>, i64) = decode_n(input, 2).unwrap();
    assert_eq!(value, (vec!["a".to_string(), "b".to_string()], 7));
}

#[test]
fn pipelined_arity_mismatch() {
    let result = decode_n::<(i64, i64)>(b":1\r\n:2\r\n:3\r\n", 3);
    assert_eq!(result, Err(Error::IncompatibleSize));
}

#[test]
fn tuple_slot_decode_matches_standalone_decode() {
    let standalone: Vec<i64> = decode(b"*2\r\n:1\r\n:2\r\n").unwrap();
    let (slotted, _): (Vec<i64>, String) = decode_n(b"*2\r\n:1\r\n:2\r\n+ok\r\n", 2).unwrap();
    assert_eq!(standalone, slotted);
}

#[test]
fn ignore_destination_accepts_anything() {
    decode::<()>(b"*2\r\n+deep\r\n%1\r\n+k\r\n:1\r\n").unwrap();
}
