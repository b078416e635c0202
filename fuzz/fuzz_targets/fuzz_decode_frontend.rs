#![no_main]

use bytes::{BufMut, BytesMut};
use libfuzzer_sys::fuzz_target;

use pg_bridge::messages::FrontendMessage;

fuzz_target!(|data: &[u8]| {
    // Wrap arbitrary bytes in a well-framed message so the decoder sees the
    // payload shapes a framer would actually hand it.
    if data.is_empty() {
        return;
    }
    let mut frame = BytesMut::with_capacity(data.len() + 4);
    frame.put_u8(data[0]);
    frame.put_i32(4 + (data.len() - 1) as i32);
    frame.put_slice(&data[1..]);
    let _ = FrontendMessage::decode(frame);
});
