#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use packet_relay::core::codec::FrameCodec;
use packet_relay::core::obfuscation::{self, KeystreamTable, KEYSTREAM_LEN};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Framing and de-obfuscation must never panic, whatever arrives on the wire
    let mut table = [0u8; KEYSTREAM_LEN];
    for (i, b) in table.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(31);
    }
    let table = KeystreamTable::new(1, table);

    let mut codec = FrameCodec;
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = obfuscation::from_server(&frame, Some(&table));
        let _ = obfuscation::from_client(&frame, Some(&table), 0);
    }
});
