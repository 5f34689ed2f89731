use edscript::protocol::codec::{CodecError, FrameDecoder, encode_frame};
use edscript::protocol::{ErrorKind, OperationError, ResponseEnvelope};
use proptest::prelude::*;
use serde_json::json;

fn response_strategy() -> impl Strategy<Value = ResponseEnvelope> {
    prop_oneof![
        (any::<u64>(), ".*").prop_map(|(id, text)| {
            ResponseEnvelope::success(id, json!({ "description": text }))
        }),
        (any::<u64>(), "[A-Za-z]{1,16}", ".*").prop_map(|(id, kind, message)| {
            ResponseEnvelope::failure(id, OperationError::new(ErrorKind::from(kind), message))
        }),
        any::<u64>().prop_map(|id| ResponseEnvelope::success(id, serde_json::Value::Null)),
    ]
}

proptest! {
    #[test]
    fn frames_survive_arbitrary_chunking(
        responses in prop::collection::vec(response_strategy(), 1..8),
        cuts in prop::collection::vec(1usize..64, 0..32),
    ) {
        let mut stream = Vec::new();
        for response in &responses {
            stream.extend(encode_frame(response).unwrap());
        }

        let mut decoder = FrameDecoder::new(1 << 20);
        let mut decoded = Vec::new();
        let mut rest = stream.as_slice();
        let mut cuts = cuts.into_iter();
        while !rest.is_empty() {
            let take = cuts.next().unwrap_or(rest.len()).min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            rest = tail;
            decoder.push(chunk);
            while let Some(message) = decoder.next_message::<ResponseEnvelope>().unwrap() {
                decoded.push(message);
            }
        }

        prop_assert_eq!(decoded, responses);
        prop_assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn truncated_stream_yields_nothing(
        response in response_strategy(),
        keep in 0usize..1000,
    ) {
        let frame = encode_frame(&response).unwrap();
        let keep = keep % frame.len();
        let mut decoder = FrameDecoder::new(1 << 20);
        decoder.push(&frame[..keep]);
        prop_assert!(decoder.next_frame().unwrap().is_none());
        prop_assert_eq!(decoder.buffered(), keep);
    }
}

#[test]
fn oversized_length_prefix_is_malformed() {
    let mut decoder = FrameDecoder::new(16);
    decoder.push(&[0, 0, 1, 0]);
    assert!(matches!(
        decoder.next_frame(),
        Err(CodecError::MalformedFrame(_))
    ));
}
