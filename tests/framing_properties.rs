//! Property test for the framed wire codec's round-trip invariant
//! (spec.md §8: "any JSON value the codec can encode decodes back to an
//! equal value").

use bytes::BytesMut;
use payagent::framer::{Frame, FrameCodec};
use proptest::prelude::*;
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder};

fn arb_json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

fn arb_json_object() -> impl Strategy<Value = Value> {
    prop::collection::hash_map("[a-zA-Z][a-zA-Z0-9]{0,8}", arb_json_scalar(), 0..6)
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<String, Value>>()))
}

proptest! {
    #[test]
    fn any_encodable_object_round_trips(value in arb_json_object()) {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(value.clone(), &mut buf).expect("encode never fails for a JSON object");

        let decoded = codec.decode(&mut buf).expect("decode never errors").expect("one full frame is buffered");
        match decoded {
            Frame::Value(decoded_value) => prop_assert_eq!(decoded_value, value),
            Frame::Invalid { reason, .. } => prop_assert!(false, "unexpected invalid frame: {reason}"),
        }
        prop_assert!(buf.is_empty());
    }
}
